use std::net::IpAddr;

/// Notifications published to whoever drives the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A raw record from the data channel, newline stripped.
    NewPacket(String),
    Sample {
        channel: String,
        time_secs: f64,
        value: f64,
    },
    RecordingState {
        is_recording: bool,
        file_name: Option<String>,
    },
    BatteryLevel(u8),
    PowerMode(String),
    DeviceDiscovered {
        device_id: String,
        ip: IpAddr,
    },
    Connected {
        device_id: Option<String>,
        ip: IpAddr,
        via: ConnectPath,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    /// An advertising packet with no handler, passed through verbatim.
    InfoPacket(String),
    Log(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPath {
    Handshake,
    ControlChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    Timeout,
    ControlClosed,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Requested => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ControlClosed => "control channel closed",
            DisconnectReason::Shutdown => "host shut down",
        }
    }
}
