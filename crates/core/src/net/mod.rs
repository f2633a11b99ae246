mod networks;
mod transport;

pub use networks::{
    LocalAddressSource, NetworkFilter, SystemAddresses, in_network_list, matches_pattern,
    subnet_host, subnet_of,
};
pub use transport::{
    CONTROL_WRITE_TIMEOUT, Channel, ControlPoll, MAX_DATAGRAM_SIZE, NetworkTransport,
    PacketCounters,
};
