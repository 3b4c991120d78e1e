//! The function layer interface
//!
//! The controller never calls into the function layer while it's servicing
//! hardware. It records [`Event`]s instead, and hands them to a [`Gadget`]
//! when you call [`poll()`](crate::Controller::poll). Callbacks may queue
//! and dequeue requests, but they should finish quickly; they may run in
//! interrupt context.

use usb_device::endpoint::EndpointAddress;

use heapless::Deque;

use crate::{Error, Request, SetupPacket};

/// A USB function driver
pub trait Gadget {
    /// Handle a control request
    ///
    /// Return `Ok(())` to accept the request. If it has a data stage, queue
    /// the data stage request on endpoint 0. If it doesn't, or if it's a
    /// configuration change that the hardware already completed, queue a
    /// zero-length request on endpoint 0 to acknowledge it.
    ///
    /// Return an error to stall the control endpoint.
    fn setup(&mut self, setup: &SetupPacket) -> Result<(), Error>;

    /// A queued request is finished, and is now yours again
    fn complete(&mut self, endpoint: EndpointAddress, request: Request);

    /// The host is gone. Any requests that were queued follow as
    /// [`Shutdown`](crate::Status::Shutdown) completions.
    fn disconnect(&mut self) {}

    /// The bus is suspended
    fn suspend(&mut self) {}

    /// The bus resumed after a suspend
    fn resume(&mut self) {}
}

/// Something that the function layer needs to know about
#[derive(Debug)]
pub enum Event {
    /// A setup packet arrived, or the hardware completed a configuration
    /// change. `tag` matches the callback's result to this packet.
    Setup { tag: u32, setup: SetupPacket },
    /// A request retired
    Complete {
        endpoint: EndpointAddress,
        request: Request,
    },
    Disconnect,
    Suspend,
    Resume,
}

/// Room for bus events, beyond one completion per queued request
///
/// At most one `Setup`, one `Disconnect`, and one of `Suspend` or `Resume`
/// are ever pending.
pub(crate) const EVENT_RESERVE: usize = 16;

/// Every request that an endpoint can hold, plus the reserve
pub(crate) const EVENT_CAPACITY: usize =
    crate::MAX_ENDPOINTS * 2 * crate::QUEUE_DEPTH + EVENT_RESERVE;

/// Events waiting for the function layer
///
/// Completions are never merged; they carry requests. Bus events that the
/// function layer hasn't seen yet collapse into the newest one:
///
/// - a setup packet replaces an older one, whose result would be stale.
/// - a suspend and a resume cancel each other.
/// - a disconnect discards the setup and power events of the session it
///   ends. A disconnect that's still pending absorbs the next one, so the
///   shutdown completions still follow a disconnect.
pub(crate) struct Events(Deque<Event, EVENT_CAPACITY>);

impl Events {
    pub(crate) const fn new() -> Self {
        Events(Deque::new())
    }

    pub(crate) fn push(&mut self, event: Event) {
        match event {
            Event::Setup { .. } => {
                self.retain(|pending| !matches!(pending, Event::Setup { .. }));
            }
            Event::Suspend | Event::Resume => {
                let cancelled = matches!(
                    (&event, self.power()),
                    (Event::Suspend, Some(Event::Resume)) | (Event::Resume, Some(Event::Suspend))
                );
                let repeated = matches!(
                    (&event, self.power()),
                    (Event::Suspend, Some(Event::Suspend)) | (Event::Resume, Some(Event::Resume))
                );
                if cancelled {
                    self.retain(|pending| !matches!(pending, Event::Suspend | Event::Resume));
                }
                if cancelled || repeated {
                    return;
                }
            }
            Event::Disconnect => {
                self.retain(|pending| {
                    !matches!(pending, Event::Setup { .. } | Event::Suspend | Event::Resume)
                });
                if self.0.iter().any(|pending| matches!(pending, Event::Disconnect)) {
                    return;
                }
            }
            Event::Complete { .. } => {}
        }
        if let Err(_event) = self.0.push_back(event) {
            warn!("EVENT QUEUE FULL; DROPPING {:?}", _event);
        }
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.0.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// The pending suspend or resume
    fn power(&self) -> Option<&Event> {
        self.0
            .iter()
            .find(|pending| matches!(pending, Event::Suspend | Event::Resume))
    }

    /// Drop pending events that don't satisfy `keep`, preserving the order
    /// of the rest
    fn retain(&mut self, mut keep: impl FnMut(&Event) -> bool) {
        for _ in 0..self.0.len() {
            let Some(event) = self.0.pop_front() else {
                break;
            };
            if keep(&event) {
                // Room was just made by the pop.
                let _ = self.0.push_back(event);
            }
        }
    }
}

/// Hand `event` to `gadget`
///
/// Returns the tag and result of a setup callback, which the caller must
/// hand back to the controller.
pub(crate) fn deliver(gadget: &mut impl Gadget, event: Event) -> Option<(u32, Result<(), Error>)> {
    match event {
        Event::Setup { tag, setup } => Some((tag, gadget.setup(&setup))),
        Event::Complete { endpoint, request } => {
            gadget.complete(endpoint, request);
            None
        }
        Event::Disconnect => {
            gadget.disconnect();
            None
        }
        Event::Suspend => {
            gadget.suspend();
            None
        }
        Event::Resume => {
            gadget.resume();
            None
        }
    }
}
