mod common;

use std::io::Read;
use std::net::{Ipv4Addr, TcpStream};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{MockDevice, loopback_host, next_port, test_config, wait_until};
use emotilink::{
    ConnectPath, ConnectionState, DisconnectReason, HostError, HostEvent, Packet, WifiHost,
};

fn wait_for_event(
    host: &WifiHost,
    timeout_ms: u64,
    mut wanted: impl FnMut(&HostEvent) -> bool,
) -> Option<HostEvent> {
    let events = host.events();
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) if wanted(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

fn connected_host(device_id: &str) -> (WifiHost, MockDevice) {
    let port = next_port();
    let device = MockDevice::start(device_id, port);
    let mut host = loopback_host(test_config(port));
    host.begin().unwrap();

    assert!(wait_until(2000, || host
        .discovered_device_ids()
        .contains(&device_id.to_string())));
    host.connect_to_device(device_id).unwrap();
    assert!(wait_until(2000, || host.state() == ConnectionState::Connected));
    (host, device)
}

#[test]
fn test_discovery_handshake_and_disconnect() {
    let (mut host, device) = connected_host("mock-1");

    let connected = wait_for_event(&host, 1000, |e| matches!(e, HostEvent::Connected { .. }));
    assert_eq!(
        connected,
        Some(HostEvent::Connected {
            device_id: Some("mock-1".to_string()),
            ip: Ipv4Addr::LOCALHOST.into(),
            via: ConnectPath::Handshake,
        })
    );
    assert!(device.connects.load(Ordering::SeqCst) >= 1);
    assert!(wait_until(1000, || device.pings.load(Ordering::SeqCst) >= 1));

    host.disconnect_from_device().unwrap();
    assert_eq!(host.state(), ConnectionState::Idle);
    assert!(
        wait_for_event(&host, 1000, |e| *e
            == HostEvent::Disconnected {
                reason: DisconnectReason::Requested
            })
        .is_some()
    );

    assert!(matches!(
        host.disconnect_from_device(),
        Err(HostError::NotConnected)
    ));
    host.stop();
}

#[test]
fn test_data_is_buffered_and_decoded() {
    let (host, device) = connected_host("mock-2");

    device.send_data("EA", device.next_packet_number(), &["0.25", "0.50"]);

    assert!(wait_until(1000, || host.has_data()));
    let records = host.read_data();
    assert_eq!(records.len(), 1);
    assert!(records[0].ends_with(",EA,1,100,0.25,0.50"));
    assert!(host.read_data().is_empty());

    let sample = wait_for_event(&host, 1000, |e| matches!(e, HostEvent::Sample { .. }));
    match sample {
        Some(HostEvent::Sample { channel, value, .. }) => {
            assert_eq!(channel, "EA");
            assert_eq!(value, 0.25);
        }
        other => panic!("expected a sample, got {other:?}"),
    }
    assert_eq!(host.ingest_stats().packets, 1);
}

#[test]
fn test_duplicate_request_data_acknowledged_twice() {
    let (host, device) = connected_host("mock-3");

    device.send_data("RD", 42, &["TL"]);
    device.send_data("RD", 42, &["TL"]);

    let replies: Vec<Packet> = (0..4).filter_map(|_| device.recv_data()).collect();
    let tags: Vec<&str> = replies.iter().map(Packet::type_tag).collect();
    assert_eq!(tags, vec!["TL", "AK", "TL", "AK"]);
    assert_eq!(replies[1].fields, vec!["42", "RD"]);

    assert!(wait_until(1000, || host.ingest_stats().duplicates == 1));
    assert_eq!(host.read_data().len(), 2);
}

#[test]
fn test_silent_device_times_out() {
    let port = next_port();
    let device = MockDevice::start("mock-4", port);
    let mut config = test_config(port);
    config.timings.connection_timeout_ms = 300;
    let mut host = loopback_host(config);
    host.begin().unwrap();

    assert!(wait_until(2000, || !host.discovered_device_ids().is_empty()));
    host.connect_to_device("mock-4").unwrap();
    assert!(wait_until(2000, || host.state() == ConnectionState::Connected));

    device.answer_ping.store(false, Ordering::SeqCst);
    assert!(wait_until(3000, || host.state() == ConnectionState::Idle));
    assert!(
        wait_for_event(&host, 1000, |e| *e
            == HostEvent::Disconnected {
                reason: DisconnectReason::Timeout
            })
        .is_some()
    );
}

#[test]
fn test_quiet_device_becomes_unavailable() {
    let port = next_port();
    let device = MockDevice::start("mock-5", port);
    let mut config = test_config(port);
    config.timings.availability_timeout_ms = 150;
    let mut host = loopback_host(config);
    host.begin().unwrap();

    assert!(wait_until(2000, || host
        .discovered_devices()
        .iter()
        .any(|d| d.device_id == "mock-5" && d.is_available)));

    device.answer_hello.store(false, Ordering::SeqCst);
    assert!(wait_until(2000, || host
        .discovered_devices()
        .iter()
        .any(|d| d.device_id == "mock-5" && !d.is_available)));

    assert!(matches!(
        host.connect_to_device("mock-5"),
        Err(HostError::DeviceUnavailable(id)) if id == "mock-5"
    ));
    assert!(matches!(
        host.connect_to_device("nobody"),
        Err(HostError::DeviceNotFound(_))
    ));

    device.answer_hello.store(true, Ordering::SeqCst);
    assert!(wait_until(2000, || host
        .discovered_devices()
        .iter()
        .any(|d| d.device_id == "mock-5" && d.is_available)));
    host.connect_to_device("mock-5").unwrap();
    assert!(wait_until(2000, || host.state() == ConnectionState::Connected));
}

#[test]
fn test_control_client_connects_and_closes() {
    let port = next_port();
    let device = MockDevice::start("mock-6", port);
    device.answer_hello.store(false, Ordering::SeqCst);
    let mut host = loopback_host(test_config(port));
    host.begin().unwrap();

    let control_port = host.control_port().unwrap();
    let client = TcpStream::connect((Ipv4Addr::LOCALHOST, control_port)).unwrap();
    assert!(wait_until(2000, || host.state() == ConnectionState::Connected));

    let session = host.session().unwrap();
    assert_eq!(session.via(), Some(ConnectPath::ControlChannel));
    assert_eq!(session.device_id(), None);

    drop(client);
    assert!(wait_until(2000, || host.state() == ConnectionState::Idle));
    assert!(
        wait_for_event(&host, 1000, |e| *e
            == HostEvent::Disconnected {
                reason: DisconnectReason::ControlClosed
            })
        .is_some()
    );
}

#[test]
fn test_recording_commands_travel_over_control() {
    let (host, _device) = connected_host("mock-7");
    assert!(matches!(
        host.start_recording_on_sd(),
        Err(HostError::ControlUnavailable(_))
    ));

    let control_port = host.control_port().unwrap();
    let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, control_port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(1000)))
        .unwrap();

    assert!(wait_until(2000, || host.start_recording_on_sd().is_ok()));
    host.send_note("lap, two").unwrap();

    let mut received = String::new();
    let mut buf = [0u8; 1024];
    while received.matches('\n').count() < 3 {
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0, "control connection closed early");
        received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
    }

    let packets: Vec<Packet> = received
        .lines()
        .map(|line| Packet::parse(line).unwrap())
        .collect();
    assert_eq!(packets[0].type_tag(), "RB");
    assert_eq!(packets[1].type_tag(), "UN");
    assert_eq!(packets[1].field(0), Some("Recording ordered"));
    assert_eq!(packets[2].type_tag(), "UN");
    assert_eq!(packets[2].field(0), Some("lap  two"));
    assert_eq!(packets[2].fields.len(), 2);
}

#[test]
fn test_begin_and_stop_lifecycle() {
    let port = next_port();
    let mut host = loopback_host(test_config(port));

    assert!(matches!(
        host.connect_to_device("x"),
        Err(HostError::NotRunning)
    ));
    host.begin().unwrap();
    assert!(matches!(host.begin(), Err(HostError::AlreadyRunning)));
    assert!(host.data_port().is_some());

    host.stop();
    host.stop();
    assert!(!host.is_running());
    assert_eq!(host.data_port(), None);
    assert!(matches!(host.send_note("late"), Err(HostError::NotRunning)));

    host.begin().unwrap();
    assert!(host.is_running());
}

#[test]
fn test_begin_without_networks_fails() {
    let mut host = WifiHost::new(
        test_config(next_port()),
        emotilink::ChannelFrequencies::standard(),
    )
    .with_address_source(Vec::<Ipv4Addr>::new());

    assert!(matches!(host.begin(), Err(HostError::NoNetworks)));
    assert!(!host.is_running());
}
