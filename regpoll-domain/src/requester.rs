use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::metadata::RegisterMetadata;
use super::transport::{PollTransport, Ticket};

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// Capability interface implemented by every consumer of register data.
///
/// The scheduler calls these from the control context only. All methods
/// except [`Requester::perform_poll`] have default no-op implementations;
/// implementors only override what they need.
pub trait Requester: Send + Sync {
    // ---
    /// Submit this requester's own read to the transport.
    ///
    /// The requester knows its address range, count, and node; the
    /// scheduler only decides when it is this requester's turn.
    fn perform_poll(&self, transport: &dyn PollTransport) -> Ticket;

    // ---

    /// One register value from a completed read (or a system register
    /// event when `register == 0`).
    fn receive_value(&self, register: u16, value: u16, node: u8) {
        let _ = (register, value, node);
    }

    // ---

    /// A transaction failed. `requester` is the handle the failed
    /// transaction was attributed to, if any.
    fn receive_exception(&self, requester: Option<&RequesterHandle>, reason: &str) {
        let _ = (requester, reason);
    }

    // ---

    /// One step of a metadata sequence completed for this requester.
    fn receive_metadata(&self, metadata: &RegisterMetadata, node: u8) {
        let _ = (metadata, node);
    }
}

// ---------------------------------------------------------------------------
// RequesterHandle
// ---------------------------------------------------------------------------

/// Non-owning, comparable reference to a [`Requester`].
///
/// The scheduler never keeps a consumer alive. A handle whose consumer has
/// been dropped simply fails to [`upgrade`](RequesterHandle::upgrade) and is
/// treated like a cleared reference.
#[derive(Clone)]
pub struct RequesterHandle(Weak<dyn Requester>);

// ---

impl RequesterHandle {
    // ---
    pub fn new<R>(requester: &Arc<R>) -> Self
    where
        R: Requester + 'static,
    {
        let weak: Weak<R> = Arc::downgrade(requester);
        Self(weak)
    }

    // ---

    pub fn upgrade(&self) -> Option<Arc<dyn Requester>> {
        self.0.upgrade()
    }

    // ---

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    // ---

    /// `true` if this handle refers to `requester`.
    pub fn refers_to<R>(&self, requester: &R) -> bool
    where
        R: Requester,
    {
        self.addr() == (requester as *const R).cast::<()>()
    }

    // ---

    fn addr(&self) -> *const () {
        self.0.as_ptr().cast::<()>()
    }
}

// ---

impl PartialEq for RequesterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for RequesterHandle {}

impl Hash for RequesterHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for RequesterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_tuple("RequesterHandle")
            .field(&self.addr())
            .field(&if self.is_alive() { "alive" } else { "dropped" })
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    struct Idle;

    impl Requester for Idle {
        fn perform_poll(&self, transport: &dyn PollTransport) -> Ticket {
            transport.read(40001, 1, 0)
        }
    }

    // ---

    #[test]
    fn handles_compare_by_identity() {
        // ---
        let a = Arc::new(Idle);
        let b = Arc::new(Idle);

        assert_eq!(RequesterHandle::new(&a), RequesterHandle::new(&a));
        assert_ne!(RequesterHandle::new(&a), RequesterHandle::new(&b));
        assert!(RequesterHandle::new(&a).refers_to(a.as_ref()));
        assert!(!RequesterHandle::new(&a).refers_to(b.as_ref()));
    }

    // ---

    #[test]
    fn dropped_requester_does_not_upgrade() {
        // ---
        let a = Arc::new(Idle);
        let handle = RequesterHandle::new(&a);
        assert!(handle.upgrade().is_some());

        drop(a);
        assert!(!handle.is_alive());
        assert!(handle.upgrade().is_none());
    }
}
