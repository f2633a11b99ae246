mod decoder;
mod frequencies;

pub use decoder::SampleDecoder;
pub use frequencies::ChannelFrequencies;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::DoubleBuffer;
use crate::config::TimestampFormat;
use crate::event::{EventSender, HostEvent};
use crate::net::{Channel, MAX_DATAGRAM_SIZE, NetworkTransport};
use crate::packet::{
    DEFAULT_DATA_RELIABILITY, DEFAULT_PROTOCOL_VERSION, Elements, PacketHeader, Record,
    decode_header, encode, local_timestamp, split_records, type_tag,
};
use crate::session::ConnectionManager;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub datagrams: u64,
    pub dropped_datagrams: u64,
    pub packets: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub empty: u64,
}

/// Counters shared between the data thread and readers of the host.
#[derive(Debug, Default)]
pub struct IngestCounters {
    datagrams: AtomicU64,
    dropped_datagrams: AtomicU64,
    packets: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    empty: AtomicU64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            dropped_datagrams: self.dropped_datagrams.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reads the data channel: splits datagrams into records, answers request-data
/// packets, buffers every record and publishes it.
pub struct DataIngestion {
    transport: Arc<NetworkTransport>,
    session: Arc<ConnectionManager>,
    buffer: Arc<DoubleBuffer<String>>,
    events: EventSender,
    counters: Arc<IngestCounters>,
    decoder: SampleDecoder,
    timestamp_format: TimestampFormat,
    last_packet_number: Option<u16>,
    was_connected: bool,
    recv_buf: Vec<u8>,
}

impl DataIngestion {
    pub fn new(
        transport: Arc<NetworkTransport>,
        session: Arc<ConnectionManager>,
        buffer: Arc<DoubleBuffer<String>>,
        frequencies: Arc<ChannelFrequencies>,
        timestamp_format: TimestampFormat,
        events: EventSender,
    ) -> Self {
        Self {
            transport,
            session,
            buffer,
            events,
            counters: Arc::new(IngestCounters::default()),
            decoder: SampleDecoder::new(frequencies),
            timestamp_format,
            last_packet_number: None,
            was_connected: false,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    /// Drains every datagram waiting on the data socket.
    pub fn poll(&mut self) -> io::Result<usize> {
        let mut processed = 0;
        while let Some((size, from)) = self.transport.recv_data(&mut self.recv_buf)? {
            let message = String::from_utf8_lossy(&self.recv_buf[..size]).into_owned();
            self.process_datagram(&message, from);
            processed += 1;
        }
        Ok(processed)
    }

    pub fn process_datagram(&mut self, message: &str, from: SocketAddr) {
        IngestCounters::bump(&self.counters.datagrams);

        let connected = self.session.is_connected();
        if connected && !self.was_connected {
            self.decoder.reset();
            self.last_packet_number = None;
        }
        self.was_connected = connected;
        if !connected {
            IngestCounters::bump(&self.counters.dropped_datagrams);
            return;
        }

        self.session.observe_data_sender(from);

        for record in split_records(message) {
            let packet = match record {
                Record::Packet(packet) => packet,
                Record::Empty => {
                    IngestCounters::bump(&self.counters.empty);
                    log::debug!("Empty data record from {from}");
                    continue;
                }
                Record::Unterminated(rest) => {
                    IngestCounters::bump(&self.counters.malformed);
                    log::debug!("Malformed data record from {from}, no delimiter: {rest:?}");
                    continue;
                }
            };
            self.process_record(packet, from);
        }
    }

    fn process_record(&mut self, packet: &str, from: SocketAddr) {
        let (header, payload_start) = match decode_header(packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                IngestCounters::bump(&self.counters.malformed);
                log::debug!("Dropping data record from {from}: {e}");
                return;
            }
        };
        IngestCounters::bump(&self.counters.packets);

        if self.last_packet_number == Some(header.packet_number) {
            IngestCounters::bump(&self.counters.duplicates);
        } else {
            self.last_packet_number = Some(header.packet_number);
        }

        if header.type_tag == type_tag::REQUEST_DATA {
            self.answer_request(packet, &header, payload_start, from);
        }

        self.buffer.write(packet.to_string());
        self.events.emit(HostEvent::NewPacket(packet.to_string()));
        for event in self.decoder.decode(packet) {
            self.events.emit(event);
        }
    }

    /// Replies to each requested element, then acknowledges the request.
    fn answer_request(
        &self,
        packet: &str,
        header: &PacketHeader,
        payload_start: Option<usize>,
        from: SocketAddr,
    ) {
        let reply_to = self.session.data_reply_addr(from);

        for element in Elements::new(packet, payload_start) {
            match element {
                type_tag::TIMESTAMP_LOCAL => {
                    let timestamp = local_timestamp(self.timestamp_format.as_str());
                    let reply = encode(
                        type_tag::TIMESTAMP_LOCAL,
                        self.transport.next_packet_number(Channel::Control),
                        &[&timestamp],
                        DEFAULT_PROTOCOL_VERSION,
                        DEFAULT_DATA_RELIABILITY,
                    );
                    self.send(&reply, reply_to);
                }
                type_tag::TIMESTAMP_UTC => log::trace!("UTC timestamp requests are not served"),
                other => log::trace!("Ignoring request for {other}"),
            }
        }

        let packet_number = header.packet_number.to_string();
        let ack = encode(
            type_tag::ACK,
            self.transport.next_packet_number(Channel::Data),
            &[&packet_number, &header.type_tag],
            DEFAULT_PROTOCOL_VERSION,
            DEFAULT_DATA_RELIABILITY,
        );
        self.send(&ack, reply_to);
    }

    fn send(&self, packet: &str, to: SocketAddr) {
        if let Err(e) = self.transport.send_data(packet, to) {
            log::warn!("Failed to send {} to {to}: {e}", packet.trim_end());
        }
    }
}
