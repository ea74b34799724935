//! Transport worker driven against the simulated device.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use regpoll_domain::{
    DeviceLinkPtr, ErrorCode, PollTransport, RegisterMetadata, TransportEvent,
    CUSTOM_START_REGISTER,
};
use regpoll_link_sim::{encode_record, SimConfig, SimDevice, SimHandle, METADATA_FUNCTION};
use regpoll_transport::TransportWorker;

// ---

fn spawn_sim(config: SimConfig) -> (Arc<TransportWorker>, mpsc::UnboundedReceiver<TransportEvent>, SimHandle) {
    // ---
    let device = SimDevice::new(config);
    let handle = device.handle();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker =
        TransportWorker::spawn(Box::new(move || Ok(Box::new(device) as DeviceLinkPtr)), tx).unwrap();
    assert_eq!(rx.blocking_recv(), Some(TransportEvent::Connected));
    (worker, rx, handle)
}

// ---

#[test]
fn write_then_read_round_trip() {
    // ---
    let (worker, mut rx, sim) = spawn_sim(SimConfig::perfect());

    let t = worker.write(40001, vec![10, 20, 30, 40], 3);
    assert_eq!(rx.blocking_recv(), Some(TransportEvent::Complete(t)));
    assert_eq!(sim.register(3, 40004), 40);

    let t = worker.read(40001, 4, 3);
    assert_eq!(rx.blocking_recv(), Some(TransportEvent::Complete(t)));
    assert_eq!(worker.take_result(), vec![10, 20, 30, 40]);
    assert_eq!(worker.start_register(), 40001);
    assert_eq!(worker.unit_id(), 3);

    worker.close();
}

// ---

#[test]
fn device_exception_becomes_error_event() {
    // ---
    let (worker, mut rx, sim) = spawn_sim(SimConfig::perfect());
    sim.fail_next(ErrorCode::SLAVE_DEVICE_BUSY);

    let t = worker.read(30001, 2, 1);
    assert_eq!(
        rx.blocking_recv(),
        Some(TransportEvent::Error(t, ErrorCode::SLAVE_DEVICE_BUSY))
    );
    worker.close();
}

// ---

#[test]
fn raw_metadata_query_returns_record_bytes() {
    // ---
    let (worker, mut rx, sim) = spawn_sim(SimConfig::perfect());
    let md = RegisterMetadata {
        register: 40001,
        label: Some("Flow".into()),
        ..Default::default()
    };
    sim.set_metadata(2, md.clone());

    let t = worker.raw(METADATA_FUNCTION, vec![0x01, 0x9C, 0x41], 2);
    assert_eq!(rx.blocking_recv(), Some(TransportEvent::Complete(t)));
    assert_eq!(worker.start_register(), CUSTOM_START_REGISTER);

    let bytes: Vec<u8> = worker.take_result().into_iter().map(|v| v as u8).collect();
    assert_eq!(bytes, encode_record(&md));
    worker.close();
}

// ---

#[test]
fn close_waits_out_a_stalled_transaction() {
    // ---
    let (worker, mut rx, sim) = spawn_sim(SimConfig::perfect());
    sim.hang_next(Duration::from_millis(100));

    let t = worker.read(40001, 1, 0);
    while sim.log().is_empty() {
        std::thread::sleep(Duration::from_millis(5));
    }
    worker.close();
    drop(worker);

    assert_eq!(
        rx.blocking_recv(),
        Some(TransportEvent::Error(t, ErrorCode::DEVICE_TIMEOUT))
    );
    // Worker has exited and dropped its sender.
    assert_eq!(rx.blocking_recv(), None);
}
