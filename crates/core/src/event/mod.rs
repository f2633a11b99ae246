mod sink;
mod types;

pub use sink::{EVENT_CHANNEL_CAPACITY, EventSender, event_channel};
pub use types::{ConnectPath, DisconnectReason, HostEvent};
