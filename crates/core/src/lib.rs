pub mod buffer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod host;
pub mod ingest;
pub mod net;
pub mod packet;
pub mod session;

pub use buffer::DoubleBuffer;
pub use config::{
    DEFAULT_ADVERTISING_PORT, DEFAULT_DATA_PORT, HostConfig, PortSettings, SessionTimings,
    TimestampFormat, WifiHostSettings,
};
pub use discovery::{DeviceRecord, DeviceTable, DiscoveryEngine};
pub use error::{HostError, Result};
pub use event::{ConnectPath, DisconnectReason, EventSender, HostEvent};
pub use host::WifiHost;
pub use ingest::{ChannelFrequencies, IngestStats, SampleDecoder};
pub use net::{LocalAddressSource, NetworkFilter, NetworkTransport, SystemAddresses};
pub use packet::{Packet, PacketError, PacketHeader};
pub use session::{ConnectionManager, ConnectionState, SessionState};
