use std::net::IpAddr;
use std::time::Instant;

use crate::config::SessionTimings;
use crate::error::{HostError, Result};
use crate::event::{ConnectPath, DisconnectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Begin { device_id: String, ip: IpAddr },
    Pong { from: IpAddr, data_port: Option<u16> },
    ControlAccepted { peer: IpAddr },
    ControlClosed { peer: IpAddr },
    Disconnect,
    Shutdown,
    /// Checks the handshake and liveness deadlines.
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Connecting {
        device_id: String,
        ip: IpAddr,
    },
    Connected {
        device_id: Option<String>,
        ip: IpAddr,
        via: ConnectPath,
    },
    Disconnected {
        device_id: Option<String>,
        reason: DisconnectReason,
    },
    /// The handshake was given up before the device confirmed it.
    Abandoned {
        device_id: Option<String>,
    },
    /// A control client that does not belong to the session target.
    Rejected,
}

/// A packet the session wants sent to its device on the advertising channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outgoing {
    Connect(IpAddr),
    Ping(IpAddr),
}

/// The single owner of connection phase and the timers that drive it.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: ConnectionState,
    device_id: Option<String>,
    ip: Option<IpAddr>,
    via: Option<ConnectPath>,
    data_port: u16,
    control_port: u16,
    data_return_port: Option<u16>,
    timings: SessionTimings,
    start_timer: Option<Instant>,
    connection_timer: Option<Instant>,
    last_connect_sent: Option<Instant>,
    last_ping_sent: Option<Instant>,
}

impl SessionState {
    pub fn new(data_port: u16, control_port: u16, timings: SessionTimings) -> Self {
        Self {
            phase: ConnectionState::Idle,
            device_id: None,
            ip: None,
            via: None,
            data_port,
            control_port,
            data_return_port: None,
            timings,
            start_timer: None,
            connection_timer: None,
            last_connect_sent: None,
            last_ping_sent: None,
        }
    }

    pub fn phase(&self) -> ConnectionState {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionState::Connected
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn via(&self) -> Option<ConnectPath> {
        self.via
    }

    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Port the device sends data from, once it has sent any.
    pub fn data_return_port(&self) -> Option<u16> {
        self.data_return_port
    }

    /// Records the source port of inbound data. Returns true if it changed.
    pub fn observe_data_port(&mut self, port: u16) -> bool {
        if !self.is_connected() || self.data_return_port == Some(port) {
            return false;
        }
        self.data_return_port = Some(port);
        true
    }

    pub fn apply(&mut self, transition: Transition, now: Instant) -> Result<Outcome> {
        use ConnectionState::*;

        let outcome = match (self.phase, transition) {
            (Idle, Transition::Begin { device_id, ip }) => {
                self.phase = Connecting;
                self.device_id = Some(device_id.clone());
                self.ip = Some(ip);
                self.start_timer = Some(now);
                self.last_connect_sent = None;
                Outcome::Connecting { device_id, ip }
            }
            (_, Transition::Begin { .. }) => Outcome::Unchanged,

            (Connecting, Transition::Pong { from, data_port })
                if self.ip == Some(from) && data_port == Some(self.data_port) =>
            {
                self.enter_connected(from, ConnectPath::Handshake, now)
            }
            (Connected, Transition::Pong { from, .. }) if self.ip == Some(from) => {
                self.connection_timer = Some(now);
                Outcome::Unchanged
            }
            (_, Transition::Pong { .. }) => Outcome::Unchanged,

            (Idle, Transition::ControlAccepted { peer }) => {
                self.device_id = None;
                self.enter_connected(peer, ConnectPath::ControlChannel, now)
            }
            (Connecting, Transition::ControlAccepted { peer }) if self.ip == Some(peer) => {
                self.enter_connected(peer, ConnectPath::ControlChannel, now)
            }
            (Connected, Transition::ControlAccepted { peer }) if self.ip == Some(peer) => {
                Outcome::Unchanged
            }
            (_, Transition::ControlAccepted { .. }) => Outcome::Rejected,

            (Connected, Transition::ControlClosed { peer }) if self.ip == Some(peer) => {
                self.disconnected(DisconnectReason::ControlClosed)
            }
            (_, Transition::ControlClosed { .. }) => Outcome::Unchanged,

            (Connected, Transition::Disconnect) => self.disconnected(DisconnectReason::Requested),
            (_, Transition::Disconnect) => return Err(HostError::NotConnected),

            (Connected, Transition::Shutdown) => self.disconnected(DisconnectReason::Shutdown),
            (Connecting, Transition::Shutdown) => self.abandoned(),
            (Idle, Transition::Shutdown) => Outcome::Unchanged,

            (Connecting, Transition::Tick)
                if self.start_timer.is_some_and(|start| {
                    now.saturating_duration_since(start) > self.timings.start_cxn_timeout()
                }) =>
            {
                self.abandoned()
            }
            (Connected, Transition::Tick)
                if self.connection_timer.is_some_and(|last| {
                    now.saturating_duration_since(last) > self.timings.connection_timeout()
                }) =>
            {
                self.disconnected(DisconnectReason::Timeout)
            }
            (_, Transition::Tick) => Outcome::Unchanged,
        };
        Ok(outcome)
    }

    /// The next CONNECT or PING that is due, if any.
    pub fn due_message(&mut self, now: Instant) -> Option<Outgoing> {
        let ip = self.ip?;
        let (last_sent, interval, message) = match self.phase {
            ConnectionState::Connecting => (
                &mut self.last_connect_sent,
                self.timings.start_cxn_interval(),
                Outgoing::Connect(ip),
            ),
            ConnectionState::Connected => (
                &mut self.last_ping_sent,
                self.timings.ping_interval(),
                Outgoing::Ping(ip),
            ),
            ConnectionState::Idle => return None,
        };
        if last_sent.is_some_and(|last| now.saturating_duration_since(last) < interval) {
            return None;
        }
        *last_sent = Some(now);
        Some(message)
    }

    fn enter_connected(&mut self, ip: IpAddr, via: ConnectPath, now: Instant) -> Outcome {
        self.phase = ConnectionState::Connected;
        self.ip = Some(ip);
        self.via = Some(via);
        self.start_timer = None;
        self.connection_timer = Some(now);
        self.last_ping_sent = Some(now);
        self.data_return_port = None;
        Outcome::Connected {
            device_id: self.device_id.clone(),
            ip,
            via,
        }
    }

    fn disconnected(&mut self, reason: DisconnectReason) -> Outcome {
        let device_id = self.reset();
        Outcome::Disconnected { device_id, reason }
    }

    fn abandoned(&mut self) -> Outcome {
        let device_id = self.reset();
        Outcome::Abandoned { device_id }
    }

    fn reset(&mut self) -> Option<String> {
        self.phase = ConnectionState::Idle;
        self.ip = None;
        self.via = None;
        self.data_return_port = None;
        self.start_timer = None;
        self.connection_timer = None;
        self.last_connect_sent = None;
        self.last_ping_sent = None;
        self.device_id.take()
    }
}
