mod codec;
mod tags;
mod timestamp;

pub use codec::{
    DEFAULT_DATA_RELIABILITY, DEFAULT_PROTOCOL_VERSION, Elements, HEADER_LENGTH, Packet,
    PacketError, PacketHeader, Record, decode_header, encode, encode_at, find_keyed_value,
    next_element, now_millis, split_records,
};
pub use tags::{
    EMOTIBIT_AVAILABLE, PACKET_DELIMITER, PAYLOAD_DELIMITER, payload_label, type_tag,
};
pub use timestamp::{DEFAULT_TIMESTAMP_FORMAT, format_timestamp, local_timestamp};
