use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::state::{ConnectionState, Outcome, Outgoing, SessionState, Transition};
use crate::config::SessionTimings;
use crate::discovery::DeviceTable;
use crate::error::{HostError, Result};
use crate::event::{ConnectPath, EventSender, HostEvent};
use crate::net::{Channel, NetworkTransport};
use crate::packet::{
    DEFAULT_DATA_RELIABILITY, DEFAULT_PROTOCOL_VERSION, encode, payload_label, type_tag,
};

/// Drives one device session across the advertising, data and control
/// threads.
///
/// The session lock is never held while touching the control client.
pub struct ConnectionManager {
    session: Mutex<SessionState>,
    table: Arc<DeviceTable>,
    transport: Arc<NetworkTransport>,
    events: EventSender,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<NetworkTransport>,
        table: Arc<DeviceTable>,
        timings: SessionTimings,
        events: EventSender,
    ) -> Self {
        let session = SessionState::new(transport.data_port(), transport.control_port(), timings);
        Self {
            session: Mutex::new(session),
            table,
            transport,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().phase()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    /// A copy of the current session.
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn target_ip(&self) -> Option<IpAddr> {
        self.lock().ip()
    }

    /// Starts the handshake with a discovered, available device.
    pub fn connect(&self, device_id: &str) -> Result<()> {
        let record = self
            .table
            .get(device_id)
            .ok_or_else(|| HostError::DeviceNotFound(device_id.to_string()))?;
        if !record.is_available {
            return Err(HostError::DeviceUnavailable(device_id.to_string()));
        }

        let outcome = self.apply(Transition::Begin {
            device_id: record.device_id,
            ip: record.ip,
        })?;
        if outcome == Outcome::Unchanged {
            log::debug!("Connect to {device_id} ignored, a session is already active");
        }
        self.publish(outcome);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        let target = self.target_ip();
        let outcome = self.apply(Transition::Disconnect)?;
        if let Some(ip) = target {
            self.say_goodbye(ip);
        }
        self.transport.close_control();
        self.publish(outcome);
        Ok(())
    }

    /// Ends any session without requiring one to exist.
    pub fn shutdown(&self) {
        let target = self.target_ip();
        if let Ok(outcome) = self.apply(Transition::Shutdown) {
            if matches!(outcome, Outcome::Disconnected { .. }) {
                if let Some(ip) = target {
                    self.say_goodbye(ip);
                }
            }
            self.publish(outcome);
        }
        self.transport.close_control();
    }

    /// Handles a PONG received on the advertising channel.
    pub fn handle_pong(&self, from: IpAddr, data_port: Option<u16>) {
        let outcome = self.apply(Transition::Pong { from, data_port });
        if let Ok(outcome @ Outcome::Connected { .. }) = outcome {
            let flushed = self.transport.flush_data();
            if flushed > 0 {
                log::debug!("Discarded {flushed} stale data datagrams");
            }
            self.publish(outcome);
        }
    }

    /// Offers a freshly accepted TCP client as the control channel.
    pub fn accept_control(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.transport.attach_control(stream, peer) {
            log::warn!("{e}");
            return;
        }
        match self.apply(Transition::ControlAccepted { peer: peer.ip() }) {
            Ok(Outcome::Rejected) => {
                log::warn!("Control client {peer} does not match the session, closing it");
                self.transport.close_control();
            }
            Ok(outcome) => {
                log::info!("Control client connected from {peer}");
                self.publish(outcome);
            }
            Err(e) => log::warn!("{e}"),
        }
    }

    pub fn control_closed(&self, peer: IpAddr) {
        log::info!("Control client {peer} closed the connection");
        if let Ok(outcome) = self.apply(Transition::ControlClosed { peer }) {
            self.publish(outcome);
        }
    }

    /// Runs the periodic session work: deadlines first, then any CONNECT or
    /// PING that is due.
    pub fn tick(&self, now: Instant) {
        let (outcome, due) = {
            let mut session = self.lock();
            let outcome = session.apply(Transition::Tick, now);
            (outcome, session.due_message(now))
        };

        match outcome {
            Ok(outcome @ Outcome::Disconnected { .. }) => {
                self.transport.close_control();
                self.publish(outcome);
                return;
            }
            Ok(outcome) => self.publish(outcome),
            Err(e) => log::warn!("{e}"),
        }

        if let Some(message) = due {
            self.send_outgoing(message);
        }
    }

    /// Records the port inbound data arrives from; replies go back there.
    pub fn observe_data_sender(&self, from: SocketAddr) {
        if self.lock().observe_data_port(from.port()) {
            log::debug!("Device data port is now {}", from.port());
        }
    }

    /// Where request-data replies go, falling back to `from` before the
    /// device's data port is known.
    pub fn data_reply_addr(&self, from: SocketAddr) -> SocketAddr {
        let session = self.lock();
        match (session.ip(), session.data_return_port()) {
            (Some(ip), Some(port)) => SocketAddr::new(ip, port),
            (Some(ip), None) => SocketAddr::new(ip, from.port()),
            _ => from,
        }
    }

    /// Writes a packet to the control client of the connected device.
    pub fn send_control(&self, packet: &str) -> Result<()> {
        let ip = {
            let session = self.lock();
            if !session.is_connected() {
                return Err(HostError::NotConnected);
            }
            session.ip().ok_or(HostError::NotConnected)?
        };
        self.transport.send_control(packet, ip)
    }

    fn send_outgoing(&self, message: Outgoing) {
        let data_port = self.transport.data_port().to_string();
        let (ip, packet) = match message {
            Outgoing::Connect(ip) => {
                let control_port = self.transport.control_port().to_string();
                let packet = encode(
                    type_tag::EMOTIBIT_CONNECT,
                    self.transport.next_packet_number(Channel::Advertising),
                    &[
                        payload_label::CONTROL_PORT,
                        &control_port,
                        payload_label::DATA_PORT,
                        &data_port,
                    ],
                    DEFAULT_PROTOCOL_VERSION,
                    DEFAULT_DATA_RELIABILITY,
                );
                (ip, packet)
            }
            Outgoing::Ping(ip) => {
                let packet = encode(
                    type_tag::PING,
                    self.transport.next_packet_number(Channel::Advertising),
                    &[payload_label::DATA_PORT, &data_port],
                    DEFAULT_PROTOCOL_VERSION,
                    DEFAULT_DATA_RELIABILITY,
                );
                (ip, packet)
            }
        };

        let IpAddr::V4(v4) = ip else {
            log::warn!("Cannot advertise to non-IPv4 device {ip}");
            return;
        };
        if let Err(e) = self.transport.send_advertising(&packet, v4) {
            log::warn!("Failed to send {} to {ip}: {e}", packet.trim_end());
        }
    }

    fn say_goodbye(&self, ip: IpAddr) {
        let packet = encode(
            type_tag::EMOTIBIT_DISCONNECT,
            self.transport.next_packet_number(Channel::Control),
            &[],
            DEFAULT_PROTOCOL_VERSION,
            DEFAULT_DATA_RELIABILITY,
        );
        if let Err(e) = self.transport.send_control(&packet, ip) {
            log::debug!("Disconnect notice not sent: {e}");
        }
    }

    fn apply(&self, transition: Transition) -> Result<Outcome> {
        self.lock().apply(transition, Instant::now())
    }

    fn publish(&self, outcome: Outcome) {
        match outcome {
            Outcome::Unchanged | Outcome::Rejected => {}
            Outcome::Connecting { device_id, ip } => {
                self.events
                    .log(format!("Connecting to {device_id} at {ip}"));
            }
            Outcome::Connected { device_id, ip, via } => {
                let path = match via {
                    ConnectPath::Handshake => "handshake",
                    ConnectPath::ControlChannel => "control channel",
                };
                log::info!(
                    "Connected to {} at {ip} via {path}",
                    device_id.as_deref().unwrap_or("device")
                );
                self.events.emit(HostEvent::Connected { device_id, ip, via });
            }
            Outcome::Disconnected { device_id, reason } => {
                log::info!(
                    "Session with {} ended: {}",
                    device_id.as_deref().unwrap_or("device"),
                    reason.as_str()
                );
                self.events.emit(HostEvent::Disconnected { reason });
            }
            Outcome::Abandoned { device_id } => {
                self.events.log(format!(
                    "Gave up connecting to {}: {}",
                    device_id.as_deref().unwrap_or("device"),
                    HostError::HandshakeTimeout
                ));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
