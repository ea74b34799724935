//! One polling session: connect, seed the queues, pump events, shut down.

use std::sync::Arc;
use std::time::Duration;

// ---

use anyhow::{bail, Context};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ---

use regpoll_domain::{
    // ---
    DeviceLinkPtr,
    MetadataProvider,
    MetadataSequence,
    PollEvent,
    RegisterMetadata,
    RequesterHandle,
    SystemRegister,
    WriteBatcher,
};
use regpoll_link_sim::{SimConfig, SimDevice, SimHandle, SimMetadataProvider};
use regpoll_transport::{Connector, TcpLink, TransportWorker};

// ---

use super::config::Config;
use super::control::{ControlLoop, SchedulerHandle};
use super::poller::RegisterPoller;
use super::report::{status_line, Reporter};

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    // ---
    let timeout = cfg.timeout();
    let pollers: Vec<Arc<RegisterPoller>> = cfg
        .polls
        .iter()
        .map(|p| Arc::new(RegisterPoller::new(p.node.unwrap_or(cfg.node), p.register, p.count)))
        .collect();

    let (connector, metadata) = if cfg.simulate {
        let sim = SimHandle::default();
        seed_simulation(&sim, &pollers);
        let device = SimDevice::with_handle(SimConfig::perfect(), sim);
        let connector: Connector = Box::new(move || Ok(Box::new(device) as DeviceLinkPtr));
        let provider: Arc<dyn MetadataProvider> = Arc::new(SimMetadataProvider::new());
        (connector, Some(provider))
    } else {
        let endpoint = cfg.endpoint();
        tracing::info!(%endpoint, "connecting");
        let connector: Connector = Box::new(move || match TcpLink::connect(endpoint.as_str(), timeout) {
            Ok(link) => Ok(Box::new(link) as DeviceLinkPtr),
            Err(e) => {
                tracing::warn!("connect: {e}");
                Err(e.code())
            }
        });
        (connector, None)
    };

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let worker = TransportWorker::spawn(connector, transport_tx).context("spawn transport worker")?;
    let (control, handle) = ControlLoop::new(worker, transport_rx, metadata, timeout);
    let mut events = control.subscribe_events();
    let mut control_task = tokio::spawn(control.run());

    // Wait for the connection before queueing anything; the scheduler
    // drops work submitted while disconnected.
    tokio::select! {
        connected = wait_connected(&mut events) => connected?,
        ended = &mut control_task => {
            ended??;
            bail!("control loop ended before connecting");
        }
    }

    let requesters: Vec<RequesterHandle> = pollers.iter().map(RequesterHandle::new).collect();
    for r in &requesters {
        handle.subscribe(r.clone()).await;
    }
    seed_work(&cfg, &handle, &pollers, &requesters).await?;

    let reporter = Reporter::new(cfg.json);
    let outcome = pump(&cfg, &handle, &mut events, &mut control_task, &requesters, &reporter).await;

    // Teardown: release consumers, then the connection.
    for r in &requesters {
        handle.remove_reference(r.clone()).await;
    }
    let counts = handle.status().await.map(|s| s.counts).unwrap_or_default();
    handle.shutdown().await;
    if !control_task.is_finished() {
        control_task.await??;
    }

    for poller in &pollers {
        let (received, exceptions) = poller.tallies();
        tracing::debug!(
            node = poller.node,
            register = poller.first_register,
            received,
            exceptions,
            values = ?poller.values(),
            "poller done"
        );
        for md in poller.metadata() {
            reporter.metadata(poller.node, &md);
        }
    }
    reporter.summary(counts, outcome?);
    Ok(())
}

// ---

async fn wait_connected(events: &mut broadcast::Receiver<PollEvent>) -> anyhow::Result<()> {
    // ---
    loop {
        match events.recv().await {
            Ok(ev) if ev.as_system().map(|(s, _)| s) == Some(SystemRegister::Connected) => {
                return Ok(());
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => bail!("event channel closed"),
        }
    }
}

// ---

async fn seed_work(
    cfg: &Config,
    handle: &SchedulerHandle,
    pollers: &[Arc<RegisterPoller>],
    requesters: &[RequesterHandle],
) -> anyhow::Result<()> {
    // ---
    for node in &cfg.device_ids {
        handle.request_device_id(*node).await;
    }

    let mut batcher = WriteBatcher::default();
    for w in &cfg.writes {
        let node = w.node.unwrap_or(cfg.node);
        for (reg, value) in (w.register..).zip(&w.values) {
            batcher
                .push(reg, *value, node)
                .with_context(|| format!("write {reg}@{node}"))?;
        }
        for request in batcher.take_ready() {
            handle.enqueue_write(request).await;
        }
    }
    for request in batcher.finish() {
        handle.enqueue_write(request).await;
    }

    if cfg.metadata {
        for (poller, r) in pollers.iter().zip(requesters) {
            let seq = MetadataSequence::new(
                Some(r.clone()),
                poller.node,
                poller.first_register,
                poller.last_register(),
            );
            handle.enqueue_metadata(seq).await;
        }
    }

    for r in requesters {
        handle.enqueue_read(r.clone()).await;
    }
    Ok(())
}

// ---

/// Print events until the session is done. Returns completed batch count.
async fn pump(
    cfg: &Config,
    handle: &SchedulerHandle,
    events: &mut broadcast::Receiver<PollEvent>,
    control_task: &mut JoinHandle<anyhow::Result<()>>,
    requesters: &[RequesterHandle],
    reporter: &Reporter,
) -> anyhow::Result<u64> {
    // ---
    let mut cycles = 0u64;
    let mut status_tick = (cfg.status_secs > 0).then(|| {
        let period = Duration::from_secs(cfg.status_secs);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    // One-shot work may already be finished (or there was none).
    if !cfg.continuous && handle.status().await.map_or(true, |s| s.is_idle()) {
        drain_buffered(events, reporter, &mut cycles);
        return Ok(cycles);
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(ev) => ev,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event listener lagging");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(cycles),
                };

                if event == PollEvent::PollingComplete {
                    cycles += 1;
                }
                reporter.event(&event, cycles);

                if event.as_system().map(|(s, _)| s) == Some(SystemRegister::Disconnected) {
                    return Ok(cycles);
                }

                if cfg.continuous && event == PollEvent::PollingComplete {
                    if cfg.cycles.is_some_and(|n| cycles >= n) {
                        return Ok(cycles);
                    }
                    for r in requesters {
                        handle.enqueue_read(r.clone()).await;
                    }
                } else if !cfg.continuous
                    && handle.status().await.map_or(true, |s| s.is_idle())
                {
                    drain_buffered(events, reporter, &mut cycles);
                    return Ok(cycles);
                }
            }

            _ = tick(&mut status_tick) => {
                if let Some(status) = handle.status().await {
                    tracing::info!(action = ?status.action, "{}", status_line(&status));
                }
            }

            ended = &mut *control_task => {
                ended??;
                return Ok(cycles);
            }

            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupted");
                return Ok(cycles);
            }
        }
    }
}

// ---

/// Report events already broadcast. Once the scheduler is idle every
/// outcome has been sent, so this empties the backlog.
fn drain_buffered(events: &mut broadcast::Receiver<PollEvent>, reporter: &Reporter, cycles: &mut u64) {
    // ---
    while let Ok(event) = events.try_recv() {
        if event == PollEvent::PollingComplete {
            *cycles += 1;
        }
        reporter.event(&event, *cycles);
    }
}

// ---

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    // ---
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ---

/// Give the simulated device plausible contents for every polled block.
fn seed_simulation(sim: &SimHandle, pollers: &[Arc<RegisterPoller>]) {
    // ---
    for p in pollers {
        let values: Vec<u16> = (0..p.count).map(|i| i.wrapping_mul(10)).collect();
        sim.set_registers(p.node, p.first_register, &values);
        for (i, register) in (p.first_register..=p.last_register()).enumerate() {
            sim.set_metadata(
                p.node,
                RegisterMetadata {
                    register,
                    label: Some(format!("Point {}", i + 1)),
                    limits: Some((0, i32::from(u16::MAX))),
                    default: Some(0),
                    ..Default::default()
                },
            );
        }
    }
    sim.set_identity(0, "regpoll-sim", true);
}
