use std::fmt::Write as _;

use super::tags::{PACKET_DELIMITER, PAYLOAD_DELIMITER};

pub const HEADER_LENGTH: usize = 6;
pub const DEFAULT_PROTOCOL_VERSION: u8 = 1;
pub const DEFAULT_DATA_RELIABILITY: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("malformed packet header")]
    MalformedHeader,
    #[error("invalid numeric value {value:?} in field {field}")]
    InvalidNumericField { field: usize, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub timestamp: i64,
    pub packet_number: u16,
    pub data_length: u16,
    pub type_tag: String,
    pub protocol_version: u8,
    pub data_reliability: u8,
}

impl PacketHeader {
    pub fn new(type_tag: &str, packet_number: u16, data_length: u16) -> Self {
        Self {
            timestamp: now_millis(),
            packet_number,
            data_length,
            type_tag: type_tag.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            data_reliability: DEFAULT_DATA_RELIABILITY,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn encode(
    type_tag: &str,
    packet_number: u16,
    fields: &[&str],
    protocol_version: u8,
    data_reliability: u8,
) -> String {
    encode_at(
        now_millis(),
        type_tag,
        packet_number,
        fields,
        protocol_version,
        data_reliability,
    )
}

pub fn encode_at(
    timestamp: i64,
    type_tag: &str,
    packet_number: u16,
    fields: &[&str],
    protocol_version: u8,
    data_reliability: u8,
) -> String {
    let mut packet = String::with_capacity(32 + fields.iter().map(|f| f.len() + 1).sum::<usize>());
    // Writing into a String cannot fail.
    let _ = write!(
        packet,
        "{timestamp},{packet_number},{},{type_tag},{protocol_version},{data_reliability}",
        fields.len()
    );
    for field in fields {
        packet.push(PAYLOAD_DELIMITER);
        packet.push_str(field);
    }
    packet.push(PACKET_DELIMITER);
    packet
}

/// Parses the six header fields of a single record.
///
/// Returns the header and the byte offset where the payload begins, or `None`
/// when the record carries no payload.
pub fn decode_header(packet: &str) -> Result<(PacketHeader, Option<usize>), PacketError> {
    let mut fields = [""; HEADER_LENGTH];
    let mut start = 0;
    let mut payload_start = None;

    for (i, slot) in fields.iter_mut().enumerate() {
        let rest = packet.get(start..).ok_or(PacketError::MalformedHeader)?;
        match rest.find(PAYLOAD_DELIMITER) {
            Some(end) => {
                *slot = &rest[..end];
                start += end + 1;
                if i == HEADER_LENGTH - 1 {
                    payload_start = Some(start);
                }
            }
            None if i == HEADER_LENGTH - 1 => *slot = rest,
            None => return Err(PacketError::MalformedHeader),
        }
        if slot.is_empty() {
            return Err(PacketError::MalformedHeader);
        }
    }

    let header = PacketHeader {
        timestamp: parse_header_field(fields[0])?,
        packet_number: wrap_u16(parse_header_field(fields[1])?),
        data_length: wrap_u16(parse_header_field(fields[2])?),
        type_tag: fields[3].to_string(),
        protocol_version: parse_header_field(fields[4])?,
        data_reliability: parse_header_field(fields[5])?,
    };
    Ok((header, payload_start))
}

fn parse_header_field<T: std::str::FromStr>(field: &str) -> Result<T, PacketError> {
    field.trim().parse().map_err(|_| PacketError::MalformedHeader)
}

fn wrap_u16(value: i64) -> u16 {
    value.rem_euclid(1 << 16) as u16
}

/// Reads one payload element starting at `start`.
///
/// Yields the element and the offset of the next one; the offset is `None`
/// once the end of the packet is reached. Returns `None` when `start` is
/// already past the last element.
pub fn next_element(packet: &str, start: usize) -> Option<(&str, Option<usize>)> {
    let rest = packet.get(start..).filter(|rest| !rest.is_empty())?;
    match rest.find(PAYLOAD_DELIMITER) {
        Some(end) => {
            let next = start + end + 1;
            Some((&rest[..end], (next < packet.len()).then_some(next)))
        }
        None => Some((rest, None)),
    }
}

/// Iterator over the payload elements of a record.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    packet: &'a str,
    offset: Option<usize>,
}

impl<'a> Elements<'a> {
    pub fn new(packet: &'a str, start: Option<usize>) -> Self {
        Self {
            packet,
            offset: start,
        }
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let (element, next) = next_element(self.packet, self.offset?)?;
        self.offset = next;
        Some(element)
    }
}

/// Returns the element following the first case-insensitive match of `key`.
pub fn find_keyed_value<'a>(packet: &'a str, key: &str, start: usize) -> Option<&'a str> {
    let mut elements = Elements::new(packet, Some(start));
    while let Some(element) = elements.next() {
        if element.eq_ignore_ascii_case(key) {
            return elements.next();
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Packet(&'a str),
    Empty,
    /// Trailing bytes with no packet delimiter.
    Unterminated(&'a str),
}

/// Splits a datagram into newline-terminated records.
pub fn split_records(message: &str) -> Vec<Record<'_>> {
    let mut records = Vec::new();
    let mut rest = message;
    while !rest.is_empty() {
        let Some(end) = rest.find(PACKET_DELIMITER) else {
            records.push(Record::Unterminated(rest));
            break;
        };
        records.push(if end == 0 {
            Record::Empty
        } else {
            Record::Packet(&rest[..end])
        });
        rest = &rest[end + 1..];
    }
    records
}

/// A fully decoded record: header plus payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub fields: Vec<String>,
}

impl Packet {
    pub fn new(header: PacketHeader, fields: Vec<String>) -> Self {
        Self { header, fields }
    }

    pub fn parse(record: &str) -> Result<Self, PacketError> {
        let record = record.trim_end_matches(PACKET_DELIMITER);
        let (header, payload_start) = decode_header(record)?;
        let fields = Elements::new(record, payload_start)
            .map(str::to_string)
            .collect();
        Ok(Self { header, fields })
    }

    pub fn type_tag(&self) -> &str {
        &self.header.type_tag
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn keyed_value(&self, key: &str) -> Option<&str> {
        let position = self.fields.iter().position(|f| f.eq_ignore_ascii_case(key))?;
        self.field(position + 1)
    }

    pub fn numeric_field<T: std::str::FromStr>(&self, index: usize) -> Result<T, PacketError> {
        let value = self.field(index).unwrap_or_default();
        value
            .trim()
            .parse()
            .map_err(|_| PacketError::InvalidNumericField {
                field: index,
                value: value.to_string(),
            })
    }

    pub fn to_wire(&self) -> String {
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        encode_at(
            self.header.timestamp,
            &self.header.type_tag,
            self.header.packet_number,
            &fields,
            self.header.protocol_version,
            self.header.data_reliability,
        )
    }
}
