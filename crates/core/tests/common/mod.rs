#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use emotilink::packet::{encode, payload_label, type_tag};
use emotilink::{HostConfig, Packet, WifiHost};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

pub fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

/// Loopback-only settings with short intervals so tests finish quickly.
pub fn test_config(advertising_port: u16) -> HostConfig {
    let mut config = HostConfig::default();
    config.ports.advertising_port = advertising_port;
    config.ports.data_port = 0;
    config.wifi.send_advertising_interval_ms = 50;
    config.wifi.check_advertising_interval_ms = 5;
    config.wifi.advertising_thread_sleep_us = 1000;
    config.wifi.data_thread_sleep_us = 500;
    config.wifi.control_thread_sleep_us = 1000;
    config.wifi.enable_broadcast = false;
    config.wifi.enable_unicast = true;
    config.wifi.unicast_ip_range = (1, 1);
    config.wifi.unicast_min_loop_delay_ms = 1;
    config.timings.ping_interval_ms = 50;
    config.timings.start_cxn_interval_ms = 20;
    config.timings.start_cxn_timeout_ms = 2000;
    config.timings.connection_timeout_ms = 2000;
    config.timings.availability_timeout_ms = 1000;
    config
}

pub fn loopback_host(config: HostConfig) -> WifiHost {
    WifiHost::new(config, emotilink::ChannelFrequencies::standard())
        .with_address_source(vec![Ipv4Addr::LOCALHOST])
}

pub fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// A fake sensor answering the advertising protocol on loopback.
pub struct MockDevice {
    pub id: String,
    pub answer_hello: Arc<AtomicBool>,
    pub answer_ping: Arc<AtomicBool>,
    pub hellos: Arc<AtomicUsize>,
    pub connects: Arc<AtomicUsize>,
    pub pings: Arc<AtomicUsize>,
    host_data_port: Arc<AtomicU16>,
    data: UdpSocket,
    packet_number: AtomicU16,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockDevice {
    pub fn start(id: &str, advertising_port: u16) -> Self {
        let advertising = UdpSocket::bind((Ipv4Addr::LOCALHOST, advertising_port)).unwrap();
        advertising
            .set_read_timeout(Some(Duration::from_millis(5)))
            .unwrap();
        let data = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        data.set_read_timeout(Some(Duration::from_millis(1000)))
            .unwrap();

        let answer_hello = Arc::new(AtomicBool::new(true));
        let answer_ping = Arc::new(AtomicBool::new(true));
        let hellos = Arc::new(AtomicUsize::new(0));
        let connects = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let host_data_port = Arc::new(AtomicU16::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let responder = Responder {
            id: id.to_string(),
            socket: advertising,
            answer_hello: Arc::clone(&answer_hello),
            answer_ping: Arc::clone(&answer_ping),
            hellos: Arc::clone(&hellos),
            connects: Arc::clone(&connects),
            pings: Arc::clone(&pings),
            host_data_port: Arc::clone(&host_data_port),
            stop: Arc::clone(&stop),
        };
        let handle = thread::spawn(move || responder.run());

        Self {
            id: id.to_string(),
            answer_hello,
            answer_ping,
            hellos,
            connects,
            pings,
            host_data_port,
            data,
            packet_number: AtomicU16::new(0),
            stop,
            handle: Some(handle),
        }
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data.local_addr().unwrap()
    }

    /// Sends a data packet to the port the host announced in its CONNECT.
    pub fn send_data(&self, tag: &str, packet_number: u16, payload: &[&str]) {
        let port = self.host_data_port.load(Ordering::SeqCst);
        assert_ne!(port, 0, "host data port not learned yet");
        let packet = encode(tag, packet_number, payload, 1, 100);
        self.data.send_to(packet.as_bytes(), (Ipv4Addr::LOCALHOST, port)).unwrap();
    }

    pub fn next_packet_number(&self) -> u16 {
        self.packet_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Next packet the host sent to the data socket, if one arrives in time.
    pub fn recv_data(&self) -> Option<Packet> {
        let mut buf = [0u8; 2048];
        let (size, _) = self.data.recv_from(&mut buf).ok()?;
        Packet::parse(std::str::from_utf8(&buf[..size]).ok()?).ok()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Responder {
    id: String,
    socket: UdpSocket,
    answer_hello: Arc<AtomicBool>,
    answer_ping: Arc<AtomicBool>,
    hellos: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
    host_data_port: Arc<AtomicU16>,
    stop: Arc<AtomicBool>,
}

impl Responder {
    fn run(self) {
        let mut buf = [0u8; 2048];
        let mut packet_number = 0u16;
        while !self.stop.load(Ordering::SeqCst) {
            let Ok((size, from)) = self.socket.recv_from(&mut buf) else {
                continue;
            };
            let Ok(text) = std::str::from_utf8(&buf[..size]) else {
                continue;
            };
            let Ok(packet) = Packet::parse(text) else {
                continue;
            };

            let reply = match packet.type_tag() {
                type_tag::HELLO_EMOTIBIT => {
                    self.hellos.fetch_add(1, Ordering::SeqCst);
                    self.answer_hello.load(Ordering::SeqCst).then(|| {
                        encode(
                            type_tag::HELLO_HOST,
                            packet_number,
                            &[
                                payload_label::DATA_PORT,
                                "-1",
                                payload_label::DEVICE_ID,
                                &self.id,
                            ],
                            1,
                            100,
                        )
                    })
                }
                type_tag::EMOTIBIT_CONNECT => {
                    self.connects.fetch_add(1, Ordering::SeqCst);
                    let port = packet
                        .keyed_value(payload_label::DATA_PORT)
                        .and_then(|port| port.parse::<u16>().ok())
                        .unwrap_or(0);
                    self.host_data_port.store(port, Ordering::SeqCst);
                    Some(self.pong(packet_number, port))
                }
                type_tag::PING => {
                    self.pings.fetch_add(1, Ordering::SeqCst);
                    let port = self.host_data_port.load(Ordering::SeqCst);
                    self.answer_ping
                        .load(Ordering::SeqCst)
                        .then(|| self.pong(packet_number, port))
                }
                _ => None,
            };

            if let Some(reply) = reply {
                packet_number = packet_number.wrapping_add(1);
                let _ = self.socket.send_to(reply.as_bytes(), from);
            }
        }
    }

    fn pong(&self, packet_number: u16, data_port: u16) -> String {
        let port = data_port.to_string();
        encode(
            type_tag::PONG,
            packet_number,
            &[payload_label::DATA_PORT, &port],
            1,
            100,
        )
    }
}
