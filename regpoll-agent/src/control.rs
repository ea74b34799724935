//! [`ControlLoop`] — single task that owns the [`PollScheduler`].
//!
//! # Design
//!
//! The scheduler is not thread-safe and does not need to be. One tokio task
//! owns it and is the only code that calls into it:
//!
//! - Callers clone [`SchedulerHandle`] and send [`ControlCmd`] messages.
//! - Transport signals arrive on the worker's event channel.
//! - The watchdog is a `sleep_until` on the scheduler's current deadline,
//!   re-armed on every loop iteration.
//!
//! `TransportEvent::Connected` attaches the worker to the scheduler.
//! `ConnectFailed` ends the loop with an error; there is no reconnect.

use std::sync::Arc;
use std::time::Instant;

// ---

use anyhow::anyhow;
use tokio::sync::{broadcast, mpsc, oneshot};

// ---

use regpoll_domain::{
    // ---
    MetadataProvider,
    MetadataSequence,
    PollAction,
    PollCounts,
    PollEvent,
    PollScheduler,
    QueueDepths,
    RequesterHandle,
    TransportEvent,
    WriteRequest,
};
use regpoll_transport::TransportWorker;

// ---------------------------------------------------------------------------
// ControlCmd
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ControlCmd {
    // ---
    EnqueueRead(RequesterHandle),
    EnqueueWrite(WriteRequest),
    EnqueueMetadata(MetadataSequence),
    RequestDeviceId(u8),

    /// Deliver broadcast values and exceptions to this consumer.
    Subscribe(RequesterHandle),

    /// The consumer is going away; drop every reference to it.
    RemoveReference(RequesterHandle),

    Status(oneshot::Sender<ControlStatus>),

    /// Disconnect and end the loop.
    Shutdown,
}

// ---------------------------------------------------------------------------
// ControlStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlStatus {
    // ---
    pub connected: bool,
    pub active: bool,
    pub action: PollAction,
    pub counts: PollCounts,
    pub depths: QueueDepths,
}

// ---

impl ControlStatus {
    // ---
    /// Nothing in flight and nothing queued.
    pub fn is_idle(&self) -> bool {
        !self.active && self.depths == QueueDepths::default()
    }
}

// ---------------------------------------------------------------------------
// SchedulerHandle
// ---------------------------------------------------------------------------

/// Cheap-clone sender handle onto the [`ControlLoop`].
#[derive(Clone)]
pub struct SchedulerHandle {
    // ---
    tx: mpsc::Sender<ControlCmd>,
}

// ---

impl SchedulerHandle {
    // ---
    /// Send a command. Returns `false` if the loop has exited.
    pub async fn send(&self, cmd: ControlCmd) -> bool {
        // ---
        if self.tx.send(cmd).await.is_err() {
            tracing::debug!("control loop gone, dropping command");
            return false;
        }
        true
    }

    // ---

    pub async fn enqueue_read(&self, requester: RequesterHandle) -> bool {
        self.send(ControlCmd::EnqueueRead(requester)).await
    }

    pub async fn enqueue_write(&self, request: WriteRequest) -> bool {
        self.send(ControlCmd::EnqueueWrite(request)).await
    }

    pub async fn enqueue_metadata(&self, sequence: MetadataSequence) -> bool {
        self.send(ControlCmd::EnqueueMetadata(sequence)).await
    }

    pub async fn request_device_id(&self, node: u8) -> bool {
        self.send(ControlCmd::RequestDeviceId(node)).await
    }

    pub async fn subscribe(&self, requester: RequesterHandle) -> bool {
        self.send(ControlCmd::Subscribe(requester)).await
    }

    pub async fn remove_reference(&self, requester: RequesterHandle) -> bool {
        self.send(ControlCmd::RemoveReference(requester)).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(ControlCmd::Shutdown).await
    }

    // ---

    /// Snapshot of the scheduler, or `None` if the loop has exited.
    pub async fn status(&self) -> Option<ControlStatus> {
        // ---
        let (tx, rx) = oneshot::channel();
        if !self.send(ControlCmd::Status(tx)).await {
            return None;
        }
        rx.await.ok()
    }
}

// ---------------------------------------------------------------------------
// ControlLoop
// ---------------------------------------------------------------------------

pub struct ControlLoop {
    // ---
    scheduler: PollScheduler,
    worker: Arc<TransportWorker>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    cmd_rx: mpsc::Receiver<ControlCmd>,
    timeout: std::time::Duration,
}

// ---

impl ControlLoop {
    // ---
    pub fn new(
        worker: Arc<TransportWorker>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        metadata: Option<Arc<dyn MetadataProvider>>,
        timeout: std::time::Duration,
    ) -> (Self, SchedulerHandle) {
        // ---
        let (tx, cmd_rx) = mpsc::channel(64);
        let control = Self {
            scheduler: PollScheduler::new(metadata),
            worker,
            transport_rx,
            cmd_rx,
            timeout,
        };
        (control, SchedulerHandle { tx })
    }

    // ---

    /// Listen to scheduler events. Call before [`ControlLoop::run`] so the
    /// connect event is not missed.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PollEvent> {
        self.scheduler.subscribe_events()
    }

    // ---

    pub async fn run(mut self) -> anyhow::Result<()> {
        // ---
        let result = loop {
            let deadline = self.scheduler.watchdog_deadline();

            tokio::select! {
                event = self.transport_rx.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        self.scheduler.start(self.worker.clone(), self.timeout);
                    }
                    Some(TransportEvent::ConnectFailed(code)) => {
                        break Err(anyhow!("device connect failed: {code}"));
                    }
                    Some(event) => self.scheduler.handle_transport_event(event),
                    None => {
                        tracing::warn!("transport worker exited");
                        break Ok(());
                    }
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ControlCmd::Shutdown) | None => break Ok(()),
                    Some(cmd) => self.apply(cmd),
                },

                _ = watchdog(deadline) => self.scheduler.on_watchdog_expired(),
            }
        };

        self.scheduler.stop();

        let worker = self.worker.clone();
        tokio::task::spawn_blocking(move || worker.close()).await?;
        tracing::info!("control loop exiting");

        result
    }

    // ---

    fn apply(&mut self, cmd: ControlCmd) {
        // ---
        match cmd {
            ControlCmd::EnqueueRead(r) => self.scheduler.enqueue_read(r),
            ControlCmd::EnqueueWrite(w) => self.scheduler.enqueue_write(w),
            ControlCmd::EnqueueMetadata(m) => self.scheduler.enqueue_metadata(m),
            ControlCmd::RequestDeviceId(node) => self.scheduler.request_device_id(node),
            ControlCmd::Subscribe(r) => self.scheduler.subscribe(r),
            ControlCmd::RemoveReference(r) => self.scheduler.remove_reference(&r),
            ControlCmd::Status(reply) => {
                let activity = self.scheduler.activity();
                let _ = reply.send(ControlStatus {
                    connected: self.scheduler.is_connected(),
                    active: activity.active,
                    action: self.scheduler.current_action(),
                    counts: self.scheduler.counts(),
                    depths: self.scheduler.queue_depths(),
                });
            }
            ControlCmd::Shutdown => {}
        }
    }
}

// ---

/// Resolves at `deadline`, or never if no transaction is armed.
async fn watchdog(deadline: Option<Instant>) {
    // ---
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
