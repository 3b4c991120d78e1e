//! Descriptor memory and the descriptor allocator
//!
//! Descriptors live in static memory that the controller can reach. Software
//! never holds pointers into that memory; it refers to a descriptor through a
//! [`Handle`], an index into the pool. A separate table maps each handle to
//! the address that the controller sees.

#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use core::{
    cell::Cell,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{desc::Descriptor, Error};

/// The most descriptors that a pool can hand out. Any
/// descriptors allocated beyond this are wasted.
pub const MAX_DESCRIPTORS: usize = 4096;

/// Terminates a link list.
const NIL: u16 = u16::MAX;

/// Refers to one descriptor in the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Handle(u16);

impl Handle {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A list of descriptors.
#[repr(align(16))]
struct DescriptorList<const COUNT: usize>([Descriptor; COUNT]);

/// Static memory for buffer descriptors.
///
/// Each controller needs a `DescriptorPool`. Allocate a `static` pool and
/// supply it when you probe the controller. Make sure that pools are not
/// shared across controllers; otherwise, the probe fails.
///
/// ```
/// use usbd_dma::DescriptorPool;
///
/// static DESCRIPTORS: DescriptorPool<128> = DescriptorPool::new();
/// ```
///
/// Size the pool for the transfers that you expect to have in flight. A
/// transfer of `L` bytes on an endpoint with max packet size `M` holds
/// `ceil(L / M)` descriptors, and endpoint 0 permanently holds one more
/// for the setup packet.
pub struct DescriptorPool<const COUNT: usize = 64> {
    descriptors: DescriptorList<COUNT>,
    /// Ownership links. A free descriptor links to the next free descriptor;
    /// an allocated descriptor links to the next descriptor of its chain.
    links: [Cell<u16>; COUNT],
    /// Controller-visible address of each descriptor.
    addresses: [Cell<u32>; COUNT],
    taken: AtomicBool,
}

unsafe impl<const COUNT: usize> Sync for DescriptorPool<COUNT> {}

impl<const COUNT: usize> DescriptorPool<COUNT> {
    /// Allocate memory for `COUNT` descriptors.
    pub const fn new() -> Self {
        const DESC: Descriptor = Descriptor::new();
        const LINK: Cell<u16> = Cell::new(NIL);
        const ADDRESS: Cell<u32> = Cell::new(0);
        Self {
            descriptors: DescriptorList([DESC; COUNT]),
            links: [LINK; COUNT],
            addresses: [ADDRESS; COUNT],
            taken: AtomicBool::new(false),
        }
    }

    /// Acquire the allocator.
    ///
    /// `dma_address` translates a descriptor's location into the address
    /// that the controller uses to fetch it. Returns `None` if the allocator
    /// was already taken.
    pub(crate) fn allocator(
        &self,
        dma_address: impl Fn(*const Descriptor) -> u32,
    ) -> Option<DescriptorAllocator<'_>> {
        if self.taken.swap(true, Ordering::SeqCst) {
            return None;
        }

        let count = COUNT.min(MAX_DESCRIPTORS);
        let descriptors = &self.descriptors.0[..count];
        let links = &self.links[..count];
        let addresses = &self.addresses[..count];

        for (idx, ((desc, link), address)) in descriptors
            .iter()
            .zip(links)
            .zip(addresses)
            .enumerate()
        {
            desc.reset();
            address.set(dma_address(desc));
            link.set(if idx + 1 < count { idx as u16 + 1 } else { NIL });
        }

        Some(DescriptorAllocator {
            descriptors,
            links,
            addresses,
            free: if count > 0 { 0 } else { NIL },
            available: count,
        })
    }
}

/// A chain of descriptors, linked through their ownership links
///
/// A chain is not `Clone`. Whoever holds it is responsible for giving it
/// back to the allocator.
#[derive(Debug, PartialEq, Eq)]
pub struct Chain {
    head: Handle,
    tail: Handle,
    len: usize,
}

impl Chain {
    /// The first descriptor of the chain
    pub fn head(&self) -> Handle {
        self.head
    }

    /// The last descriptor of the chain
    pub fn tail(&self) -> Handle {
        self.tail
    }

    /// The number of descriptors in the chain
    pub fn len(&self) -> usize {
        self.len
    }
}

/// Hands out and recycles descriptor chains
pub struct DescriptorAllocator<'a> {
    descriptors: &'a [Descriptor],
    links: &'a [Cell<u16>],
    addresses: &'a [Cell<u32>],
    free: u16,
    available: usize,
}

unsafe impl Send for DescriptorAllocator<'_> {}

impl<'a> DescriptorAllocator<'a> {
    /// Returns the total number of descriptors in the pool.
    pub fn capacity(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns the number of descriptors that are ready for allocation.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Allocate a chain of `count` descriptors.
    ///
    /// Each descriptor is host ready, with no buffer, and the chain is
    /// linked into a ring. Nothing is taken from the pool if it cannot
    /// satisfy the whole request.
    pub fn alloc(&mut self, count: usize) -> Result<Chain, Error> {
        if count == 0 {
            return Err(Error::InvalidArgument);
        }
        if count > self.available {
            return Err(Error::NoMemory);
        }

        let head = Handle(self.free);
        let mut tail = head;
        for _ in 0..count {
            tail = Handle(self.free);
            self.free = self.links[tail.index()].get();
            self.descriptors[tail.index()].reset();
        }
        self.available -= count;

        // The handles came off the free list in order, and the free list
        // links still thread them together. Terminate, then ring the
        // controller-visible links.
        self.links[tail.index()].set(NIL);
        let chain = Chain {
            head,
            tail,
            len: count,
        };
        let mut handle = head;
        while let Some(next) = self.next(handle) {
            self.descriptor(handle).set_next(self.address(next));
            handle = next;
        }
        self.descriptor(tail).set_next(self.address(head));
        Ok(chain)
    }

    /// Release a chain back to the pool.
    ///
    /// Does nothing when there's no chain. The caller must make sure that
    /// the controller is no longer using the chain.
    pub fn free(&mut self, chain: Option<Chain>) {
        let Some(chain) = chain else {
            return;
        };
        let mut handle = Some(chain.head);
        while let Some(current) = handle {
            handle = self.next(current);
            self.descriptors[current.index()].reset();
            self.links[current.index()].set(self.free);
            self.free = current.0;
            self.available += 1;
        }
    }

    /// Access the descriptor behind `handle`
    pub fn descriptor(&self, handle: Handle) -> &'a Descriptor {
        &self.descriptors[handle.index()]
    }

    /// The controller-visible address of the descriptor behind `handle`
    pub fn address(&self, handle: Handle) -> u32 {
        self.addresses[handle.index()].get()
    }

    /// The handle that follows `handle` in its chain
    pub fn next(&self, handle: Handle) -> Option<Handle> {
        let link = self.links[handle.index()].get();
        (link != NIL).then_some(Handle(link))
    }

    /// Find the descriptor that the controller knows as `address`
    pub fn handle(&self, address: u32) -> Option<Handle> {
        self.addresses
            .iter()
            .position(|addr| addr.get() == address)
            .map(|idx| Handle(idx as u16))
    }

    /// Visit the descriptors of `chain`, in order
    pub fn iter<'c>(&'c self, chain: &'c Chain) -> impl Iterator<Item = &'a Descriptor> + 'c {
        let mut handle = Some(chain.head);
        core::iter::from_fn(move || {
            let current = handle?;
            handle = self.next(current);
            Some(self.descriptor(current))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DescriptorPool;
    use crate::{desc::Ownership, Error};

    fn address(desc: *const crate::desc::Descriptor) -> u32 {
        desc as usize as u32
    }

    #[test]
    fn acquire_allocator() {
        let pool = DescriptorPool::<4>::new();
        pool.allocator(address).unwrap();
        for _ in 0..10 {
            assert!(pool.allocator(address).is_none());
        }
    }

    #[test]
    fn alloc_free_round_trip() {
        let pool = DescriptorPool::<16>::new();
        let mut alloc = pool.allocator(address).unwrap();
        assert_eq!(alloc.available(), 16);
        for count in 1..=16 {
            let chain = alloc.alloc(count).unwrap();
            assert_eq!(chain.len(), count);
            assert_eq!(alloc.available(), 16 - count);
            alloc.free(Some(chain));
            assert_eq!(alloc.available(), 16);
        }
    }

    #[test]
    fn alloc_initializes_ring() {
        let pool = DescriptorPool::<8>::new();
        let mut alloc = pool.allocator(address).unwrap();

        // Dirty a descriptor so that we see the reset.
        let chain = alloc.alloc(1).unwrap();
        let desc = alloc.descriptor(chain.head());
        desc.set_ownership(Ownership::DmaDone);
        desc.set_buffer(0x1234);
        alloc.free(Some(chain));

        let chain = alloc.alloc(3).unwrap();
        assert_eq!(alloc.iter(&chain).count(), 3);
        for desc in alloc.iter(&chain) {
            assert_eq!(desc.ownership(), Ownership::HostReady);
            assert_eq!(desc.BUFPTR.read(), 0);
        }

        let second = alloc.next(chain.head()).unwrap();
        assert_eq!(
            alloc.descriptor(chain.head()).next(),
            alloc.address(second)
        );
        assert_eq!(
            alloc.descriptor(chain.tail()).next(),
            alloc.address(chain.head())
        );
        assert_eq!(alloc.handle(alloc.address(second)), Some(second));
    }

    #[test]
    fn overflow_does_not_leak() {
        let pool = DescriptorPool::<4>::new();
        let mut alloc = pool.allocator(address).unwrap();
        let held = alloc.alloc(3).unwrap();
        assert_eq!(alloc.alloc(2), Err(Error::NoMemory));
        assert_eq!(alloc.available(), 1);
        let last = alloc.alloc(1).unwrap();
        assert_eq!(alloc.available(), 0);
        alloc.free(Some(held));
        alloc.free(Some(last));
        assert_eq!(alloc.available(), 4);
        assert_eq!(alloc.alloc(5), Err(Error::NoMemory));
        assert_eq!(alloc.available(), 4);
    }

    #[test]
    fn free_nothing() {
        let pool = DescriptorPool::<2>::new();
        let mut alloc = pool.allocator(address).unwrap();
        alloc.free(None);
        alloc.free(None);
        assert_eq!(alloc.available(), 2);
    }

    #[test]
    fn alloc_zero() {
        let pool = DescriptorPool::<2>::new();
        let mut alloc = pool.allocator(address).unwrap();
        assert_eq!(alloc.alloc(0), Err(Error::InvalidArgument));
    }
}
