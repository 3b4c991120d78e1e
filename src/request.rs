//! Transfer requests
//!
//! A [`Request`] describes one logical transfer on one endpoint. The function
//! layer creates it, gives it to the controller with
//! [`queue()`](crate::Controller::queue), and gets it back exactly once,
//! through [`Gadget::complete()`](crate::Gadget::complete), with a final
//! [`Status`].

/// How a request finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Status {
    /// Still owned by the controller
    Pending,
    /// Transferred `length` bytes, or an OUT transfer ended with a short packet
    Complete,
    /// The recovery timer closed a stuck OUT transfer. `actual()` describes
    /// the data that arrived.
    Partial,
    /// Removed by [`dequeue()`](crate::Controller::dequeue)
    Cancelled,
    /// Removed by a bus reset, disconnect, or endpoint disable
    Shutdown,
    /// The descriptor pool couldn't describe the transfer
    NoMemory,
    /// The controller reported a DMA or bus error
    Io,
    /// The control transfer was interrupted by an unexpected setup packet,
    /// or didn't fit the control transfer's current phase
    Protocol,
}

/// One transfer, queued on one endpoint
///
/// The request owns its buffer for as long as it lives. The buffer must be
/// memory that the controller can reach with DMA.
#[derive(Debug)]
pub struct Request {
    id: u32,
    buffer: &'static mut [u8],
    length: usize,
    actual: usize,
    status: Status,
    zero: bool,
}

impl Request {
    /// Create a request that transfers the whole `buffer`
    ///
    /// `id` is chosen by the caller. It identifies the request for
    /// [`dequeue()`](crate::Controller::dequeue), and an endpoint refuses
    /// two queued requests with the same `id`.
    pub fn new(id: u32, buffer: &'static mut [u8]) -> Self {
        let length = buffer.len();
        Request {
            id,
            buffer,
            length,
            actual: 0,
            status: Status::Pending,
            zero: false,
        }
    }

    /// Transfer only the first `length` bytes of the buffer
    ///
    /// `length` is clamped to the buffer length.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.min(self.buffer.len());
        self
    }

    /// Terminate an IN transfer that's a multiple of the max packet size
    /// with a zero-length packet
    pub fn with_zero(mut self, zero: bool) -> Self {
        self.zero = zero;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The number of bytes requested
    pub fn length(&self) -> usize {
        self.length
    }

    /// The number of bytes actually transferred
    pub fn actual(&self) -> usize {
        self.actual
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn zero(&self) -> bool {
        self.zero
    }

    /// The bytes that were transferred
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual]
    }

    pub fn buffer(&self) -> &[u8] {
        self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer
    }

    /// Release the buffer
    pub fn into_buffer(self) -> &'static mut [u8] {
        self.buffer
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    pub(crate) fn set_zero(&mut self, zero: bool) {
        self.zero = zero;
    }

    pub(crate) fn set_actual(&mut self, actual: usize) {
        self.actual = actual.min(self.length);
    }

    /// Prepare the request for another trip through an endpoint queue
    pub(crate) fn start(&mut self) {
        self.actual = 0;
        self.status = Status::Pending;
    }

    pub(crate) fn finish(&mut self, status: Status) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{Request, Status};
    use std::{boxed::Box, vec};

    fn buffer(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0; len].into_boxed_slice())
    }

    #[test]
    fn lengths() {
        let request = Request::new(1, buffer(64));
        assert_eq!(request.length(), 64);
        assert_eq!(request.status(), Status::Pending);
        let request = request.with_length(100);
        assert_eq!(request.length(), 64);
        let mut request = request.with_length(10);
        assert_eq!(request.length(), 10);

        request.set_actual(32);
        assert_eq!(request.actual(), 10);
        assert_eq!(request.data().len(), 10);
    }

    #[test]
    fn restart() {
        let mut request = Request::new(7, buffer(8));
        request.set_actual(8);
        request.finish(Status::Complete);
        request.start();
        assert_eq!(request.actual(), 0);
        assert_eq!(request.status(), Status::Pending);
        assert_eq!(request.into_buffer().len(), 8);
    }
}
