// Lifecycle and I/O tests, driven against the simulated network backend

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::Event;
use crate::config::StartConfig;
use crate::error::Error;
use crate::framework::{EventFn, Framework, OperationMode, Status};
use crate::iface::{Interface, State};
use crate::sim::{SimAttachment, SimNetwork};

fn shared_config() -> StartConfig {
    StartConfig::prepare(
        "10.0.0.2".parse().unwrap(),
        "10.0.0.254".parse().unwrap(),
        "255.255.255.0".parse().unwrap(),
        OperationMode::Shared,
        false,
        false,
    )
    .expect("valid config")
}

fn isolated_config() -> StartConfig {
    StartConfig::prepare(
        "10.0.0.2".parse().unwrap(),
        "10.0.0.254".parse().unwrap(),
        "255.255.255.0".parse().unwrap(),
        OperationMode::Shared,
        true,
        false,
    )
    .expect("valid config")
}

/// Wrapper counting framework calls, to pin down how often the handle
/// actually reaches the framework.
struct CountingFramework {
    inner: SimAttachment,
    stops: AtomicUsize,
}

impl Framework for CountingFramework {
    fn start(&self, config: &StartConfig, on_event: EventFn) -> (Status, u64, u64) {
        self.inner.start(config, on_event)
    }

    fn stop(&self) -> Status {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.stop()
    }

    fn write(&self, frame: &[u8]) -> Status {
        self.inner.write(frame)
    }

    fn read(&self, buf: &mut [u8]) -> (Status, usize) {
        self.inner.read(buf)
    }
}

#[test]
fn start_then_immediate_stop() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));

    let (capacity, mut bridge) = iface.start(&shared_config()).expect("start");
    assert_eq!(capacity.max_packet_size, 65550);
    assert_eq!(capacity.mtu, 1500);
    assert_eq!(iface.state(), State::Running);

    iface.stop().expect("stop");
    assert_eq!(iface.state(), State::Stopped);

    // Peer traffic on the hub must not reach the stopped handle's bridge.
    let peer = Interface::new(Arc::new(net.attachment()));
    let (_, _peer_bridge) = peer.start(&shared_config()).expect("peer start");
    peer.write(&[0xAB; 64]).expect("peer write");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(bridge.try_recv(), None);
}

#[test]
fn write_above_max_packet_size_fails() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));
    let (capacity, _bridge) = iface.start(&shared_config()).expect("start");

    let oversized = vec![0u8; capacity.max_packet_size + 1];
    match iface.write(&oversized) {
        Err(Error::PacketTooLarge { len, max }) => {
            assert_eq!(len, capacity.max_packet_size + 1);
            assert_eq!(max, capacity.max_packet_size);
        }
        other => panic!("expected PacketTooLarge, got {other:?}"),
    }

    // A frame of exactly the limit is still accepted.
    let exact = vec![0u8; capacity.max_packet_size];
    iface.write(&exact).expect("max-size write");
}

#[test]
fn io_outside_running_state_fails() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));

    assert!(matches!(iface.write(&[1u8; 8]), Err(Error::InterfaceNotRunning)));
    assert!(matches!(iface.read(), Err(Error::InterfaceNotRunning)));
    assert!(matches!(iface.capacity(), Err(Error::InterfaceNotRunning)));

    let (_, _bridge) = iface.start(&shared_config()).expect("start");
    iface.stop().expect("stop");

    assert!(matches!(iface.write(&[1u8; 8]), Err(Error::InterfaceNotRunning)));
    assert!(matches!(iface.read(), Err(Error::InterfaceNotRunning)));
    assert!(matches!(iface.capacity(), Err(Error::InterfaceNotRunning)));
}

#[test]
fn second_start_is_rejected_without_disturbing_the_first() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));
    let (capacity, _bridge) = iface.start(&shared_config()).expect("start");

    assert!(matches!(
        iface.start(&shared_config()),
        Err(Error::AlreadyStarted)
    ));

    assert_eq!(iface.state(), State::Running);
    assert_eq!(iface.capacity().expect("still running"), capacity);
    iface.write(&[7u8; 16]).expect("write still works");
}

#[test]
fn stop_twice_reaches_framework_once() {
    let net = SimNetwork::new();
    let counting = Arc::new(CountingFramework {
        inner: net.attachment(),
        stops: AtomicUsize::new(0),
    });
    let iface = Interface::new(counting.clone());

    let (_, _bridge) = iface.start(&shared_config()).expect("start");
    iface.stop().expect("first stop");
    assert!(matches!(iface.stop(), Err(Error::InvalidState(_))));
    assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_before_start_is_rejected() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));
    assert!(matches!(iface.stop(), Err(Error::InvalidState(_))));
    assert_eq!(iface.state(), State::Created);
}

#[test]
fn empty_write_is_rejected() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));
    let (_, _bridge) = iface.start(&shared_config()).expect("start");

    match iface.write(&[]) {
        Err(Error::WriteFailed(status)) => assert_eq!(status, Status::INVALID_ARGUMENT),
        other => panic!("expected WriteFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn end_to_end_shared_network() {
    let net = SimNetwork::new();
    let vm_a = Interface::new(Arc::new(net.attachment()));
    let vm_b = Interface::new(Arc::new(net.attachment()));

    let (capacity, _a_bridge) = vm_a.start(&shared_config()).expect("start a");
    assert_eq!(capacity.max_packet_size, 65550);
    assert_eq!(capacity.mtu, 1500);
    let (_, mut b_bridge) = vm_b.start(&shared_config()).expect("start b");

    vm_a.write(&[0x5A; 64]).expect("64-byte write");

    let event = tokio::time::timeout(Duration::from_secs(1), b_bridge.recv())
        .await
        .expect("event before timeout")
        .expect("bridge open");
    let Event::PacketsAvailable { count } = event else {
        panic!("unexpected event: {event:?}");
    };
    assert_eq!(count, 1);

    let frame = vm_b.read().expect("read");
    assert!(frame.len() <= capacity.max_packet_size);
    assert_eq!(frame.as_ref(), &[0x5A; 64][..]);

    vm_b.stop().expect("stop");
    assert!(matches!(vm_b.read(), Err(Error::InterfaceNotRunning)));
}

#[test]
fn concurrent_writes_are_not_torn() {
    let net = SimNetwork::new();
    let writer = Arc::new(Interface::new(Arc::new(net.attachment())));
    let receiver = Interface::new(Arc::new(net.attachment()));
    let (_, _writer_bridge) = writer.start(&shared_config()).expect("start writer");
    let (_, _receiver_bridge) = receiver.start(&shared_config()).expect("start receiver");

    let mut handles = Vec::new();
    for marker in 0..100u8 {
        let writer = writer.clone();
        handles.push(std::thread::spawn(move || writer.write(&[marker; 100])));
    }
    for handle in handles {
        handle.join().expect("writer thread").expect("write");
    }

    // Drain by polling: announcements may be coalesced, the frames are not.
    let mut seen = HashSet::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 100 {
        assert!(
            Instant::now() < deadline,
            "only {} of 100 frames arrived",
            seen.len()
        );
        match receiver.read() {
            Ok(frame) => {
                assert_eq!(frame.len(), 100);
                let marker = frame[0];
                assert!(
                    frame.iter().all(|&byte| byte == marker),
                    "torn frame for marker {marker}"
                );
                assert!(seen.insert(marker), "duplicate frame for marker {marker}");
            }
            Err(Error::ReadFailed(_)) => std::thread::sleep(Duration::from_millis(1)),
            Err(err) => panic!("read failed: {err}"),
        }
    }
}

#[tokio::test]
async fn framework_death_surfaces_through_bridge_and_io() {
    let net = SimNetwork::new();
    let iface = Interface::new(Arc::new(net.attachment()));
    let (_, mut bridge) = iface.start(&shared_config()).expect("start");

    net.kill();

    let event = tokio::time::timeout(Duration::from_secs(1), bridge.recv())
        .await
        .expect("event before timeout")
        .expect("bridge open");
    assert_eq!(event, Event::InterfaceDead);

    assert_eq!(iface.state(), State::Failed);
    assert!(matches!(iface.write(&[1u8; 8]), Err(Error::InterfaceDead)));
    assert!(matches!(iface.read(), Err(Error::InterfaceDead)));

    // A dead handle can still be wound down exactly once.
    iface.stop().expect("stop");
    assert_eq!(iface.state(), State::Stopped);
    assert!(matches!(iface.stop(), Err(Error::InvalidState(_))));
}

#[test]
fn start_on_dead_network_fails_the_handle() {
    let net = SimNetwork::new();
    net.kill();

    let iface = Interface::new(Arc::new(net.attachment()));
    match iface.start(&shared_config()) {
        Err(Error::StartFailed(status)) => assert_eq!(status, Status::GENERAL_FAILURE),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert_eq!(iface.state(), State::Failed);
    assert!(matches!(iface.stop(), Err(Error::InvalidState(_))));
}

#[test]
fn isolation_blocks_vm_to_vm_delivery() {
    let net = SimNetwork::new();
    let vm_a = Interface::new(Arc::new(net.attachment()));
    let vm_b = Interface::new(Arc::new(net.attachment()));
    let (_, _a_bridge) = vm_a.start(&isolated_config()).expect("start a");
    let (_, mut b_bridge) = vm_b.start(&shared_config()).expect("start b");

    vm_a.write(&[0xEE; 32]).expect("write is accepted");
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(b_bridge.try_recv(), None);
    match vm_b.read() {
        Err(Error::ReadFailed(status)) => assert_eq!(status, Status::NO_PACKET_READ),
        other => panic!("expected ReadFailed, got {other:?}"),
    }
}
