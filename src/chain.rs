//! Mapping requests onto descriptor chains
//!
//! A request of `L` bytes, on an endpoint with max packet size `M`, is
//! described by `max(1, ceil(L / M))` descriptors. Every descriptor but the
//! last describes exactly `M` bytes of the buffer; the last describes the
//! remainder, and carries the last flag. A request that asks for a
//! terminating zero-length packet gets one more, empty, descriptor when `L`
//! is a non-zero multiple of `M`.

use usb_device::UsbDirection;

use crate::{
    desc::Ownership,
    pool::{Chain, DescriptorAllocator},
    Error, Request,
};

/// The number of descriptors needed to describe `length` bytes
pub fn descriptor_count(length: usize, max_packet: usize, zero: bool) -> usize {
    let max_packet = max_packet.max(1);
    let count = length.div_ceil(max_packet).max(1);
    if zero && length != 0 && length % max_packet == 0 {
        count + 1
    } else {
        count
    }
}

/// Build the descriptor chain for `request`
///
/// `buffer` is the controller-visible address of the request's buffer. On
/// failure, nothing is left allocated.
pub fn build(
    alloc: &mut DescriptorAllocator,
    request: &Request,
    max_packet: usize,
    buffer: u32,
) -> Result<Chain, Error> {
    let max_packet = max_packet.max(1);
    let count = descriptor_count(request.length(), max_packet, request.zero());
    let chain = alloc.alloc(count)?;

    // Keep the controller away from the chain until it's fully described.
    let head = alloc.descriptor(chain.head());
    head.set_ownership(Ownership::HostBusy);

    let mut remaining = request.length();
    let mut offset = 0;
    let mut handle = Some(chain.head());
    while let Some(current) = handle {
        handle = alloc.next(current);
        let desc = alloc.descriptor(current);
        let bytes = remaining.min(max_packet);
        desc.set_buffer(buffer.wrapping_add(offset as u32));
        desc.set_bytes(bytes);
        desc.set_last(handle.is_none());
        remaining -= bytes;
        offset += bytes;
    }

    head.set_ownership(Ownership::HostReady);
    Ok(chain)
}

/// Build a one-descriptor, zero-length chain, for a control status stage
/// that the driver sends on its own
pub fn zero_length(alloc: &mut DescriptorAllocator) -> Result<Chain, Error> {
    let chain = alloc.alloc(1)?;
    let desc = alloc.descriptor(chain.head());
    desc.set_bytes(0);
    desc.set_last(true);
    Ok(chain)
}

/// What the controller did with a chain, so far
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes moved, including the running count of a descriptor that's
    /// still in progress. See [`Descriptor::bytes()`](crate::desc::Descriptor::bytes).
    pub bytes: usize,
    /// The transfer is finished
    pub done: bool,
    /// A descriptor reported an error
    pub error: bool,
    /// The controller is in the middle of a descriptor
    pub busy: bool,
}

/// Inspect `chain` for completion
///
/// An IN chain is finished once its last descriptor is done. An OUT chain is
/// also finished by a short packet.
pub fn progress(
    alloc: &DescriptorAllocator,
    chain: &Chain,
    direction: UsbDirection,
    max_packet: usize,
) -> Progress {
    let mut progress = Progress::default();
    for desc in alloc.iter(chain) {
        match desc.ownership() {
            Ownership::DmaDone => {
                let bytes = desc.bytes();
                progress.bytes += bytes;
                if desc.has_error() {
                    progress.error = true;
                    progress.done = true;
                    break;
                }
                if desc.is_last() || (direction == UsbDirection::Out && bytes < max_packet) {
                    progress.done = true;
                    break;
                }
            }
            Ownership::DmaBusy => {
                progress.bytes += desc.bytes();
                progress.busy = true;
                break;
            }
            Ownership::HostReady | Ownership::HostBusy => break,
        }
    }
    progress
}
