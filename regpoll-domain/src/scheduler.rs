//! [`PollScheduler`] — arbitration between write, probe, metadata, and read
//! demand over a transport that allows one transaction at a time.
//!
//! # Priority
//!
//! Each arbitration pass recomputes the next action from scratch:
//!
//! ```text
//! Write  >  DeviceIdProbe  >  Metadata  >  Read  >  Inactive
//! ```
//!
//! A metadata sequence that cannot produce a transaction (provider missing,
//! cursor past its bound, requester gone) is discarded and the pass falls
//! through to read demand, or rescans if there is none.
//!
//! # Lifecycle
//!
//! Every dispatch arms a watchdog deadline. The owner of the scheduler
//! (the control loop) waits on [`PollScheduler::watchdog_deadline`] and
//! calls [`PollScheduler::on_watchdog_expired`] when it passes; the stuck
//! transaction is then failed exactly as if the device had reported
//! [`ErrorCode::DEVICE_TIMEOUT`]. Signals that arrive for a transaction the
//! scheduler has already given up on are recognised by their [`Ticket`] and
//! dropped.
//!
//! The scheduler is single-threaded by construction: it lives in the control
//! context and every method takes `&mut self`. Requester callbacks run
//! synchronously inside those methods and cannot re-enter the scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use super::error::ErrorCode;
use super::event::{
    Activity, DeviceIdentity, PollCounts, PollEvent, SystemRegister, SENTINEL_NODE,
};
use super::metadata::{decode_metadata, MetadataProvider, MetadataSequence};
use super::queues::{QueueDepths, RequestQueues};
use super::requester::RequesterHandle;
use super::transport::{PollTransport, Ticket, TransportEvent};
use super::write::WriteRequest;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Watchdog used when the caller supplies a zero timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Broadcast channel depth. Slow listeners lag rather than block the loop.
const EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// PollAction
// ---------------------------------------------------------------------------

/// What the scheduler is (or was last) doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollAction {
    // ---
    #[default]
    Inactive,
    Write,
    Metadata,
    Read,
    DeviceIdProbe,
}

// ---------------------------------------------------------------------------
// PollScheduler
// ---------------------------------------------------------------------------

pub struct PollScheduler {
    // ---
    /// Live transport. `None` while disconnected.
    transport: Option<Arc<dyn PollTransport>>,

    /// Optional metadata encoder/decoder, fixed for the scheduler's lifetime.
    metadata: Option<Arc<dyn MetadataProvider>>,

    queues: RequestQueues,

    /// Consumers that receive broadcast values and exceptions directly.
    subscribers: Vec<RequesterHandle>,

    events_tx: broadcast::Sender<PollEvent>,

    timeout: Duration,

    /// Watchdog deadline for the transaction in flight.
    deadline: Option<Instant>,

    current_action: PollAction,

    /// Consumer the in-flight transaction is attributed to.
    current_requester: Option<RequesterHandle>,

    /// Ticket of the in-flight transaction.
    current_ticket: Option<Ticket>,

    /// Re-entrancy guard: a transaction is outstanding or a pass is running.
    active: bool,

    /// The last read demand was dispatched; announce the batch when it settles.
    batch_pending: bool,

    counts: PollCounts,
}

// ---

impl PollScheduler {
    // ---
    /// Create a disconnected scheduler.
    ///
    /// `metadata` is the metadata provider, or `None` when the feature is
    /// unavailable; metadata sequences are then dropped without traffic.
    pub fn new(metadata: Option<Arc<dyn MetadataProvider>>) -> Self {
        // ---
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport: None,
            metadata,
            queues: RequestQueues::new(),
            subscribers: Vec::new(),
            events_tx,
            timeout: DEFAULT_TIMEOUT,
            deadline: None,
            current_action: PollAction::Inactive,
            current_requester: None,
            current_ticket: None,
            active: false,
            batch_pending: false,
            counts: PollCounts::default(),
        }
    }

    // ---

    /// Listen to every event the scheduler emits.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PollEvent> {
        self.events_tx.subscribe()
    }

    // ---

    /// Deliver broadcast values and exceptions to `requester` directly.
    ///
    /// Undone by [`PollScheduler::remove_reference`].
    pub fn subscribe(&mut self, requester: RequesterHandle) {
        // ---
        self.subscribers.retain(RequesterHandle::is_alive);
        if !self.subscribers.contains(&requester) {
            self.subscribers.push(requester);
        }
    }

    // ---

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    // ---------------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------------

    /// Attach a freshly connected transport.
    ///
    /// Clears all queues, zeroes the counters, and broadcasts
    /// [`SystemRegister::Connected`] on the sentinel node.
    pub fn start(&mut self, transport: Arc<dyn PollTransport>, timeout: Duration) {
        // ---
        if self.transport.is_some() {
            tracing::warn!("scheduler already connected, restarting");
            self.stop();
        }

        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self.queues.clear(self.metadata.as_deref());
        self.reset_in_flight();
        self.counts = PollCounts::default();
        self.transport = Some(transport);

        tracing::info!(timeout_ms = self.timeout.as_millis() as u64, "scheduler connected");
        self.emit(PollEvent::system(SystemRegister::Connected, SENTINEL_NODE));
    }

    // ---

    /// Detach the transport and drop all pending demand.
    ///
    /// Emits [`PollEvent::PollingComplete`] if read demand was outstanding,
    /// so callers waiting for quiescence are released, then
    /// [`SystemRegister::Disconnected`] on the sentinel node.
    pub fn stop(&mut self) {
        // ---
        if self.transport.take().is_none() {
            return;
        }

        let batch_pending = self.batch_pending;
        self.reset_in_flight();
        let had_reads = self.queues.clear(self.metadata.as_deref());

        tracing::info!("scheduler disconnected");
        if had_reads || batch_pending {
            self.emit(PollEvent::PollingComplete);
        }
        self.emit(PollEvent::system(SystemRegister::Disconnected, SENTINEL_NODE));
    }

    // ---

    fn reset_in_flight(&mut self) {
        // ---
        self.current_requester = None;
        self.current_ticket = None;
        self.current_action = PollAction::Inactive;
        self.deadline = None;
        self.active = false;
        self.batch_pending = false;
    }

    // ---------------------------------------------------------------------------
    // Submission API
    // ---------------------------------------------------------------------------

    /// Queue one read cycle for `requester`.
    pub fn enqueue_read(&mut self, requester: RequesterHandle) {
        // ---
        if !self.is_connected() {
            tracing::debug!("enqueue_read ignored: not connected");
            return;
        }
        self.queues.reads.push_back(requester);
        self.figure_next();
    }

    // ---

    pub fn enqueue_write(&mut self, request: WriteRequest) {
        // ---
        if !self.is_connected() {
            tracing::debug!("enqueue_write ignored: not connected");
            return;
        }
        self.queues.writes.push_back(request);
        self.figure_next();
    }

    // ---

    pub fn enqueue_metadata(&mut self, sequence: MetadataSequence) {
        // ---
        if !self.is_connected() {
            tracing::debug!("enqueue_metadata ignored: not connected");
            return;
        }
        self.queues.metadata.push_back(sequence);
        self.figure_next();
    }

    // ---

    /// Queue a device identity probe for `node`.
    pub fn request_device_id(&mut self, node: u8) {
        // ---
        if !self.is_connected() {
            tracing::debug!("request_device_id ignored: not connected");
            return;
        }
        self.queues.probes.push_back(node);
        self.figure_next();
    }

    // ---

    /// Release every reference to `requester`.
    ///
    /// Queued writes and metadata sequences still run but no longer notify
    /// it; its read demand is dropped. An in-flight transaction is not
    /// cancelled, only its notification target is cleared.
    pub fn remove_reference(&mut self, requester: &RequesterHandle) {
        // ---
        self.subscribers.retain(|s| s != requester);
        let drained = self.queues.remove_reference(requester);

        if self.current_requester.as_ref() == Some(requester) {
            self.current_requester = None;
        }

        if drained {
            self.emit(PollEvent::PollingComplete);
        }
    }

    // ---------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------

    /// Success and error totals since the current connection began.
    pub fn counts(&self) -> PollCounts {
        self.counts
    }

    pub fn activity(&self) -> Activity {
        // ---
        Activity {
            active: self.active,
            requester: self.current_requester.clone(),
        }
    }

    pub fn current_action(&self) -> PollAction {
        self.current_action
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.queues.depths()
    }

    /// When the in-flight transaction is declared timed out, if one is armed.
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    // ---------------------------------------------------------------------------
    // Transport signals
    // ---------------------------------------------------------------------------

    /// Route a transaction signal from the transport.
    ///
    /// Connection-level events are the control loop's business and are
    /// ignored here.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        // ---
        match event {
            TransportEvent::Complete(ticket) => self.on_complete(ticket),
            TransportEvent::Error(ticket, code) => self.on_error(ticket, code),
            TransportEvent::Connected | TransportEvent::ConnectFailed(_) => {}
        }
    }

    // ---

    /// The transaction identified by `ticket` succeeded.
    pub fn on_complete(&mut self, ticket: Ticket) {
        // ---
        if !self.is_current(ticket) {
            tracing::debug!(%ticket, "ignoring completion for abandoned transaction");
            return;
        }

        self.deadline = None;
        self.counts.success += 1;
        self.active = false;
        self.current_ticket = None;

        let Some(transport) = self.transport.clone() else {
            return;
        };
        let node = transport.unit_id();

        match self.current_action {
            PollAction::Metadata => {
                self.emit(PollEvent::system(SystemRegister::MetadataStepComplete, node));
                self.complete_metadata_step(transport.as_ref(), node);
            }

            PollAction::Read => {
                let values = transport.take_result();
                let mut register = transport.start_register();
                tracing::debug!(register, node, count = values.len(), "read complete");
                for value in values {
                    self.emit(PollEvent::RegisterData {
                        register,
                        value,
                        node,
                    });
                    register = register.wrapping_add(1);
                }
            }

            PollAction::DeviceIdProbe => {
                let identity = DeviceIdentity::from_values(node, &transport.take_result());
                tracing::info!(node, text = %identity.text, running = identity.running, "device identity");
                self.emit(PollEvent::system(SystemRegister::DeviceIdPollComplete, node));
                self.emit(PollEvent::DeviceIdentity(identity));
            }

            PollAction::Write => {
                tracing::debug!(node, "write complete");
                self.emit(PollEvent::system(SystemRegister::WriteComplete, node));
            }

            PollAction::Inactive => {}
        }

        self.settle_batch();
        self.figure_next();
    }

    // ---

    /// The transaction identified by `ticket` failed with `code`.
    pub fn on_error(&mut self, ticket: Ticket, code: ErrorCode) {
        // ---
        if !self.is_current(ticket) {
            tracing::debug!(%ticket, %code, "ignoring error for abandoned transaction");
            return;
        }
        self.fail(code);
    }

    // ---

    /// The watchdog deadline passed with the transaction still outstanding.
    pub fn on_watchdog_expired(&mut self) {
        // ---
        if !self.active || self.current_ticket.is_none() {
            return;
        }
        tracing::warn!(
            ticket = ?self.current_ticket,
            action = ?self.current_action,
            "transaction timed out"
        );
        self.fail(ErrorCode::DEVICE_TIMEOUT);
    }

    // ---

    /// Fire the watchdog if its deadline is at or before `now`.
    pub fn poll_watchdog(&mut self, now: Instant) {
        // ---
        if self.deadline.is_some_and(|d| d <= now) {
            self.on_watchdog_expired();
        }
    }

    // ---

    fn is_current(&self, ticket: Ticket) -> bool {
        self.transport.is_some() && self.active && self.current_ticket == Some(ticket)
    }

    // ---

    fn fail(&mut self, code: ErrorCode) {
        // ---
        self.deadline = None;
        self.counts.error += 1;
        self.active = false;
        self.current_ticket = None;

        tracing::warn!(%code, action = ?self.current_action, "poll exception");
        self.emit(PollEvent::PollException {
            requester: self.current_requester.clone(),
            reason: code.reason().to_string(),
        });

        // The requester already heard about the failure through the
        // exception; the rest of its range is abandoned.
        if self.current_action == PollAction::Metadata {
            if let Some(mut seq) = self.queues.metadata.pop_front() {
                tracing::debug!(
                    register = seq.current_register,
                    last = seq.last_register,
                    "abandoning metadata sequence"
                );
                seq.dispose_request(self.metadata.as_deref());
            }
        }

        self.settle_batch();
        self.figure_next();
    }

    // ---

    fn settle_batch(&mut self) {
        // ---
        if std::mem::take(&mut self.batch_pending) {
            self.emit(PollEvent::PollingComplete);
        }
    }

    // ---------------------------------------------------------------------------
    // Arbitration
    // ---------------------------------------------------------------------------

    /// Pick and dispatch the next transaction, if nothing is in flight.
    fn figure_next(&mut self) {
        // ---
        if self.active {
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };

        self.active = true;
        self.current_requester = None;

        let next_action = loop {
            let mut next = if self.queues.reads.is_empty() {
                PollAction::Inactive
            } else {
                PollAction::Read
            };
            if !self.queues.metadata.is_empty() {
                next = PollAction::Metadata;
            }
            if !self.queues.probes.is_empty() {
                next = PollAction::DeviceIdProbe;
            }
            if !self.queues.writes.is_empty() {
                next = PollAction::Write;
            }

            match next {
                PollAction::Write => {
                    self.dispatch_write(transport.as_ref());
                    break next;
                }

                PollAction::DeviceIdProbe => {
                    self.dispatch_probe(transport.as_ref());
                    break next;
                }

                PollAction::Metadata => {
                    if self.dispatch_metadata(transport.as_ref()) {
                        break next;
                    }
                    // Sequence finished or unusable: try a read in this pass.
                    if !self.queues.reads.is_empty() && self.dispatch_read(transport.as_ref()) {
                        break PollAction::Read;
                    }
                }

                PollAction::Read => {
                    if self.dispatch_read(transport.as_ref()) {
                        break next;
                    }
                }

                PollAction::Inactive => {
                    self.active = false;
                    break next;
                }
            }
        };

        self.current_action = next_action;

        // A drained batch with nothing in flight settles immediately.
        if !self.active {
            self.settle_batch();
        }
    }

    // ---

    fn arm(&mut self, ticket: Ticket, requester: Option<RequesterHandle>) {
        // ---
        self.current_ticket = Some(ticket);
        self.current_requester = requester;
        self.deadline = Some(Instant::now() + self.timeout);
    }

    // ---

    fn dispatch_write(&mut self, transport: &dyn PollTransport) {
        // ---
        let Some(write) = self.queues.writes.pop_front() else {
            return;
        };
        tracing::debug!(
            node = write.node,
            register = write.first_register,
            count = write.values.len(),
            "dispatch write"
        );
        let ticket = transport.write(write.first_register, write.values, write.node);
        self.arm(ticket, write.requester);
    }

    // ---

    fn dispatch_probe(&mut self, transport: &dyn PollTransport) {
        // ---
        let Some(node) = self.queues.probes.pop_front() else {
            return;
        };
        tracing::debug!(node, "dispatch device id probe");
        let ticket = transport.device_id(node);
        self.arm(ticket, None);
    }

    // ---

    /// Dispatch the next step of the front metadata sequence.
    ///
    /// Returns `false` after discarding a sequence that cannot continue.
    fn dispatch_metadata(&mut self, transport: &dyn PollTransport) -> bool {
        // ---
        let provider = self.metadata.clone().filter(|p| p.is_available());

        let dispatched = match (provider.as_deref(), self.queues.metadata.front_mut()) {
            (Some(provider), Some(seq))
                if !seq.is_exhausted() && seq.requester.as_ref().is_some_and(|r| r.is_alive()) =>
            {
                seq.dispose_request(Some(provider));
                match provider.create_request(seq.current_register) {
                    Some(handle) => {
                        let pdu = provider.encode(&handle);
                        tracing::debug!(
                            node = seq.node,
                            register = seq.current_register,
                            function_code = handle.function_code,
                            "dispatch metadata step"
                        );
                        let ticket = transport.raw(handle.function_code, pdu, seq.node);
                        seq.request = Some(handle);
                        Some((ticket, seq.requester.clone()))
                    }
                    None => {
                        tracing::warn!(
                            register = seq.current_register,
                            "metadata provider has no request for register"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        if let Some((ticket, requester)) = dispatched {
            self.arm(ticket, requester);
            return true;
        }

        if let Some(mut seq) = self.queues.metadata.pop_front() {
            tracing::debug!(
                node = seq.node,
                register = seq.current_register,
                provider = provider.is_some(),
                "metadata sequence finished"
            );
            seq.dispose_request(provider.as_deref());
        }
        false
    }

    // ---

    /// Hand the front read demand to its requester.
    ///
    /// Returns `false` if the requester is gone and nothing was submitted.
    fn dispatch_read(&mut self, transport: &dyn PollTransport) -> bool {
        // ---
        let Some(handle) = self.queues.reads.pop_front() else {
            return false;
        };
        if self.queues.reads.is_empty() {
            self.batch_pending = true;
        }

        match handle.upgrade() {
            Some(requester) => {
                let ticket = requester.perform_poll(transport);
                tracing::debug!(%ticket, "dispatch read");
                self.arm(ticket, Some(handle));
                true
            }
            None => {
                tracing::debug!("dropping read demand for released requester");
                false
            }
        }
    }

    // ---

    fn complete_metadata_step(&mut self, transport: &dyn PollTransport, node: u8) {
        // ---
        let response: Vec<u8> = transport.take_result().into_iter().map(|v| v as u8).collect();
        let provider = self.metadata.clone();

        let Some(seq) = self.queues.metadata.front_mut() else {
            return;
        };

        let metadata = match (seq.request.take(), provider.as_deref()) {
            (Some(handle), Some(provider)) => {
                let md = decode_metadata(provider, &handle, &response);
                provider.dispose(handle);
                Some(md)
            }
            _ => None,
        };
        seq.advance();

        let requester = seq.requester.as_ref().and_then(RequesterHandle::upgrade);
        if let (Some(md), Some(requester)) = (metadata, requester) {
            requester.receive_metadata(&md, node);
        }
    }

    // ---

    fn emit(&self, event: PollEvent) {
        // ---
        for handle in &self.subscribers {
            let Some(subscriber) = handle.upgrade() else {
                continue;
            };
            match &event {
                PollEvent::RegisterData {
                    register,
                    value,
                    node,
                } => subscriber.receive_value(*register, *value, *node),
                PollEvent::PollException { requester, reason } => {
                    subscriber.receive_exception(requester.as_ref(), reason)
                }
                PollEvent::PollingComplete | PollEvent::DeviceIdentity(_) => {}
            }
        }

        // No listeners is fine.
        let _ = self.events_tx.send(event);
    }
}

// ---

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
