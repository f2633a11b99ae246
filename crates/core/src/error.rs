use std::io;

use crate::packet::PacketError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("could not bind port {port} after {attempts} attempts")]
    BindFailed { port: u16, attempts: u32 },
    #[error("no usable local network found, check that network adapters are enabled")]
    NoNetworks,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("device {0} is not available")]
    DeviceUnavailable(String),
    #[error("not connected to a device")]
    NotConnected,
    #[error("control channel unavailable: {0}")]
    ControlUnavailable(String),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("host is not running")]
    NotRunning,
    #[error("host is already running")]
    AlreadyRunning,
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
