//! [`TransportWorker`] — dedicated thread that owns the device connection.
//!
//! # Design
//!
//! Device I/O is blocking, so it never runs on the control context:
//!
//! - A dedicated `std::thread` owns the [`DeviceLink`] and sleeps on a
//!   condvar until a request is posted to its mailbox or it is told to quit.
//! - [`PollTransport::submit`] validates the request, posts it, and returns
//!   a [`Ticket`] immediately. Illegal requests are answered with an error
//!   event straight away and never touch the wire.
//! - Outcomes are delivered as [`TransportEvent`]s on a tokio channel read
//!   by the control loop. The mailbox lock is never held during I/O.
//! - The device connection is opened on the worker thread; the first event
//!   is always `Connected` or `ConnectFailed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

// ---

use tokio::sync::mpsc;

// ---

use regpoll_domain::{
    // ---
    DeviceLinkPtr,
    ErrorCode,
    PollTransport,
    Ticket,
    TransactionRequest,
    TransportEvent,
};

// ---

use super::error::TransportError;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens the device connection. Runs once, on the worker thread.
pub type Connector = Box<dyn FnOnce() -> Result<DeviceLinkPtr, ErrorCode> + Send>;

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Mailbox {
    // ---
    /// Request waiting for the worker.
    pending: Option<(Ticket, TransactionRequest)>,

    /// Worker should exit at its next wakeup.
    quit: bool,

    /// Values of the most recent successful transaction.
    result: Vec<u16>,

    /// Most recently submitted request.
    last: Option<TransactionRequest>,
}

#[derive(Default)]
struct Shared {
    mailbox: Mutex<Mailbox>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TransportWorker
// ---------------------------------------------------------------------------

pub struct TransportWorker {
    // ---
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    next_ticket: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

// ---

impl TransportWorker {
    // ---
    /// Spawn the worker thread and start connecting with `connector`.
    ///
    /// Events are delivered on `events_tx` for the worker's lifetime.
    pub fn spawn(
        connector: Connector,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<Self>, TransportError> {
        // ---
        let shared = Arc::new(Shared::default());

        let thread = {
            let shared = shared.clone();
            let events_tx = events_tx.clone();
            std::thread::Builder::new()
                .name("regpoll-transport".into())
                .spawn(move || run(connector, &shared, &events_tx))
                .map_err(|e| TransportError::Worker(format!("spawn failed: {e}")))?
        };

        Ok(Arc::new(Self {
            shared,
            events_tx,
            next_ticket: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        }))
    }

    // ---

    /// Stop the worker and wait for it to release the device.
    ///
    /// Blocks for at most one in-progress transaction. Idempotent.
    pub fn close(&self) {
        // ---
        self.signal_quit();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("transport worker panicked");
            }
        }
    }

    // ---

    fn signal_quit(&self) {
        // ---
        self.shared.lock().quit = true;
        self.shared.wake.notify_all();
    }
}

// ---

impl PollTransport for TransportWorker {
    // ---
    fn submit(&self, request: TransactionRequest) -> Ticket {
        // ---
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));

        if let Err(code) = request.validate() {
            tracing::debug!(%ticket, %code, ?request, "request rejected before I/O");
            self.shared.lock().last = Some(request);
            let _ = self.events_tx.send(TransportEvent::Error(ticket, code));
            return ticket;
        }

        {
            let mut mb = self.shared.lock();
            if let Some((displaced, _)) = mb.pending.take() {
                tracing::warn!(%displaced, "request replaced before the worker picked it up");
            }
            mb.last = Some(request.clone());
            mb.pending = Some((ticket, request));
        }
        self.shared.wake.notify_one();
        ticket
    }

    // ---

    fn take_result(&self) -> Vec<u16> {
        std::mem::take(&mut self.shared.lock().result)
    }

    fn start_register(&self) -> u16 {
        // ---
        self.shared
            .lock()
            .last
            .as_ref()
            .map_or(0, TransactionRequest::start_register)
    }

    fn unit_id(&self) -> u8 {
        // ---
        self.shared
            .lock()
            .last
            .as_ref()
            .map_or(0, TransactionRequest::node)
    }
}

// ---

impl Drop for TransportWorker {
    fn drop(&mut self) {
        // Do not join here; the worker may be mid-transaction.
        self.signal_quit();
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

fn run(connector: Connector, shared: &Shared, events_tx: &mpsc::UnboundedSender<TransportEvent>) {
    // ---
    let mut link = match connector() {
        Ok(link) => {
            let _ = events_tx.send(TransportEvent::Connected);
            link
        }
        Err(code) => {
            tracing::warn!(%code, "device connect failed");
            let _ = events_tx.send(TransportEvent::ConnectFailed(code));
            return;
        }
    };

    loop {
        let next = {
            let mut mb = shared.lock();
            loop {
                if mb.quit {
                    break None;
                }
                if let Some(next) = mb.pending.take() {
                    break Some(next);
                }
                mb = shared.wake.wait(mb).unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some((ticket, request)) = next else {
            break;
        };

        tracing::debug!(%ticket, node = request.node(), "transaction start");
        let event = match link.execute(&request) {
            Ok(values) => {
                shared.lock().result = values;
                TransportEvent::Complete(ticket)
            }
            Err(code) => {
                tracing::debug!(%ticket, %code, "transaction failed");
                TransportEvent::Error(ticket, code)
            }
        };

        if events_tx.send(event).is_err() {
            tracing::debug!("event channel closed, worker exiting");
            break;
        }
    }

    link.close();
    tracing::debug!("transport worker exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::AtomicBool;

    use regpoll_domain::DeviceLink;

    use super::*;

    /// Echoes the request's register number back as every value.
    struct EchoLink {
        calls: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
    }

    impl DeviceLink for EchoLink {
        fn execute(&mut self, request: &TransactionRequest) -> Result<Vec<u16>, ErrorCode> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match request {
                TransactionRequest::Read {
                    first_register,
                    count,
                    ..
                } => Ok(vec![*first_register; usize::from(*count)]),
                _ => Err(ErrorCode::ILLEGAL_FUNCTION),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    fn echo_worker() -> (
        Arc<TransportWorker>,
        mpsc::UnboundedReceiver<TransportEvent>,
        Arc<AtomicU64>,
        Arc<AtomicBool>,
    ) {
        // ---
        let calls = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let link = EchoLink {
            calls: calls.clone(),
            closed: closed.clone(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = TransportWorker::spawn(Box::new(move || Ok(Box::new(link) as DeviceLinkPtr)), tx)
            .unwrap();
        assert_eq!(rx.blocking_recv(), Some(TransportEvent::Connected));
        (worker, rx, calls, closed)
    }

    // ---

    #[test]
    fn connect_failure_is_reported() {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker =
            TransportWorker::spawn(Box::new(|| Err(ErrorCode::CONNECTION_FAILED)), tx).unwrap();

        assert_eq!(
            rx.blocking_recv(),
            Some(TransportEvent::ConnectFailed(ErrorCode::CONNECTION_FAILED))
        );
        worker.close();
    }

    // ---

    #[test]
    fn completed_read_exposes_values() {
        // ---
        let (worker, mut rx, _calls, closed) = echo_worker();

        let ticket = worker.read(40007, 3, 4);
        assert_eq!(rx.blocking_recv(), Some(TransportEvent::Complete(ticket)));
        assert_eq!(worker.take_result(), vec![40007; 3]);
        assert!(worker.take_result().is_empty());
        assert_eq!(worker.start_register(), 40007);
        assert_eq!(worker.unit_id(), 4);

        worker.close();
        assert!(closed.load(Ordering::Relaxed));
    }

    // ---

    #[test]
    fn illegal_request_never_reaches_the_device() {
        // ---
        let (worker, mut rx, calls, _closed) = echo_worker();

        let ticket = worker.read(20001, 1, 1);
        assert_eq!(
            rx.blocking_recv(),
            Some(TransportEvent::Error(ticket, ErrorCode::ILLEGAL_DATA_ADDRESS))
        );
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(worker.unit_id(), 1);

        worker.close();
    }

    // ---

    #[test]
    fn device_errors_carry_the_ticket() {
        // ---
        let (worker, mut rx, _calls, _closed) = echo_worker();

        let first = worker.device_id(2);
        assert_eq!(
            rx.blocking_recv(),
            Some(TransportEvent::Error(first, ErrorCode::ILLEGAL_FUNCTION))
        );

        let second = worker.read(1, 8, 2);
        assert!(second > first);
        assert_eq!(rx.blocking_recv(), Some(TransportEvent::Complete(second)));

        worker.close();
        worker.close();
    }
}
