mod advertiser;
mod table;

pub use advertiser::Advertiser;
pub use table::{DeviceRecord, DeviceTable};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{SessionTimings, WifiHostSettings};
use crate::error::{HostError, Result};
use crate::event::{EventSender, HostEvent};
use crate::net::{Channel, LocalAddressSource, NetworkFilter, NetworkTransport, subnet_of};
use crate::packet::{
    DEFAULT_DATA_RELIABILITY, DEFAULT_PROTOCOL_VERSION, EMOTIBIT_AVAILABLE, Record, decode_header,
    encode, find_keyed_value, payload_label, split_records, type_tag,
};

const NETWORK_QUERY_ATTEMPTS: usize = 10;

/// What an advertising-channel packet meant, for whoever owns the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    HelloHost { device_id: String, is_available: bool },
    Pong { from: IpAddr, data_port: Option<u16> },
    Info(String),
}

/// Finds devices on the local networks and keeps their availability current.
///
/// Owned by the advertising thread; only the device table is shared.
pub struct DiscoveryEngine {
    table: Arc<DeviceTable>,
    advertiser: Advertiser,
    filter: NetworkFilter,
    source: Arc<dyn LocalAddressSource>,
    available_networks: Vec<String>,
    emotibit_networks: Vec<String>,
    availability_timeout: Duration,
    events: EventSender,
}

impl DiscoveryEngine {
    pub fn new(
        settings: &WifiHostSettings,
        timings: &SessionTimings,
        table: Arc<DeviceTable>,
        source: Arc<dyn LocalAddressSource>,
        events: EventSender,
    ) -> Self {
        Self {
            table,
            advertiser: Advertiser::new(settings),
            filter: NetworkFilter::new(
                settings.network_include_list.clone(),
                settings.network_exclude_list.clone(),
            ),
            source,
            available_networks: Vec::new(),
            emotibit_networks: Vec::new(),
            availability_timeout: timings.availability_timeout(),
            events,
        }
    }

    pub fn table(&self) -> &Arc<DeviceTable> {
        &self.table
    }

    pub fn available_networks(&self) -> &[String] {
        &self.available_networks
    }

    /// Subnets a device has answered from. Only the first is ever recorded.
    pub fn emotibit_networks(&self) -> &[String] {
        &self.emotibit_networks
    }

    /// Re-reads the local adapters and applies the include/exclude lists.
    pub fn refresh_networks(&mut self) -> Result<&[String]> {
        let mut addrs = Vec::new();
        for attempt in 1..=NETWORK_QUERY_ATTEMPTS {
            match self.source.local_ipv4() {
                Ok(found) if !found.is_empty() => {
                    addrs = found;
                    break;
                }
                Ok(_) => log::debug!("No local addresses found (attempt {attempt})"),
                Err(e) => log::warn!("Failed to list local addresses: {e}"),
            }
        }

        let networks = self.filter.subnets(&addrs);
        if networks != self.available_networks {
            let listing: Vec<String> = networks.iter().map(|n| format!("[{n}.*]")).collect();
            log::info!("Available network(s): {}", listing.join(" "));
        }
        self.available_networks = networks;

        if self.available_networks.is_empty() {
            return Err(HostError::NoNetworks);
        }
        Ok(&self.available_networks)
    }

    /// Sends HELLO_EMOTIBIT to this iteration's targets. Returns how many went
    /// out.
    pub fn advertise(&mut self, transport: &NetworkTransport, now: Instant) -> usize {
        if self.advertiser.start_cycle_if_due(now) && self.emotibit_networks.is_empty() {
            if let Err(e) = self.refresh_networks() {
                log::warn!("{e}");
            }
        }

        let targets =
            self.advertiser
                .next_targets(now, &self.available_networks, &self.emotibit_networks);
        let mut sent = 0;
        for ip in targets {
            let packet = encode(
                type_tag::HELLO_EMOTIBIT,
                transport.next_packet_number(Channel::Advertising),
                &[],
                DEFAULT_PROTOCOL_VERSION,
                DEFAULT_DATA_RELIABILITY,
            );
            match transport.send_advertising(&packet, ip) {
                Ok(_) => sent += 1,
                Err(e) => log::debug!("Advertising to {ip} failed: {e}"),
            }
        }
        sent
    }

    /// Interprets one advertising datagram. `connected_ip` is the device the
    /// session currently targets, if any; only its PONGs refresh liveness.
    pub fn handle_datagram(
        &mut self,
        message: &str,
        from: SocketAddr,
        connected_ip: Option<IpAddr>,
        now: Instant,
    ) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        for record in split_records(message) {
            let packet = match record {
                Record::Packet(packet) | Record::Unterminated(packet) => packet,
                Record::Empty => continue,
            };
            let (header, payload_start) = match decode_header(packet) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::debug!("Dropping advertising record from {from}: {e}");
                    continue;
                }
            };
            let keyed =
                |key: &str| payload_start.and_then(|start| find_keyed_value(packet, key, start));

            match header.type_tag.as_str() {
                type_tag::HELLO_HOST => {
                    let Some(data_port) = keyed(payload_label::DATA_PORT) else {
                        log::debug!("HELLO_HOST from {from} without data port");
                        continue;
                    };
                    let is_available =
                        data_port.trim().parse::<i32>().ok() == Some(EMOTIBIT_AVAILABLE);
                    let device_id = keyed(payload_label::DEVICE_ID)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| from.ip().to_string());
                    self.record_hello(&device_id, from.ip(), is_available, now);
                    inbound.push(Inbound::HelloHost {
                        device_id,
                        is_available,
                    });
                }
                type_tag::PONG => {
                    if connected_ip == Some(from.ip()) {
                        self.table.refresh_ip(from.ip(), now);
                    }
                    let data_port = keyed(payload_label::DATA_PORT)
                        .and_then(|port| port.trim().parse::<u16>().ok());
                    inbound.push(Inbound::Pong {
                        from: from.ip(),
                        data_port,
                    });
                }
                _ => inbound.push(Inbound::Info(packet.to_string())),
            }
        }
        inbound
    }

    /// Marks devices that have gone quiet as unavailable.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let expired = self.table.sweep(now, self.availability_timeout);
        for device_id in &expired {
            log::info!("Device {device_id} is no longer available");
        }
        expired
    }

    fn record_hello(&mut self, device_id: &str, ip: IpAddr, is_available: bool, now: Instant) {
        if let IpAddr::V4(v4) = ip {
            if self.emotibit_networks.is_empty() {
                let network = subnet_of(v4);
                log::info!("EmotiBit network: [{network}.*]");
                self.emotibit_networks.push(network);
            }
        }

        if self.table.upsert(device_id, ip, is_available, now) {
            log::info!("Discovered device {device_id} at {ip}");
            self.events.emit(HostEvent::DeviceDiscovered {
                device_id: device_id.to_string(),
                ip,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::packet::encode_at;
    use std::net::Ipv4Addr;

    fn new_engine(
        addrs: Vec<Ipv4Addr>,
    ) -> (DiscoveryEngine, crossbeam_channel::Receiver<HostEvent>) {
        let (events, rx) = event_channel(64);
        let engine = DiscoveryEngine::new(
            &WifiHostSettings::default(),
            &SessionTimings::default(),
            Arc::new(DeviceTable::new()),
            Arc::new(addrs),
            events,
        );
        (engine, rx)
    }

    fn device_addr() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 42], 3131))
    }

    #[test]
    fn test_hello_host_registers_available_device() {
        let (mut engine, rx) = new_engine(vec![Ipv4Addr::new(192, 168, 1, 5)]);
        let hello = encode_at(10, "HH", 0, &["DP", "-1", "DI", "MD-V5-0000123"], 1, 100);

        let inbound = engine.handle_datagram(&hello, device_addr(), None, Instant::now());

        assert_eq!(
            inbound,
            vec![Inbound::HelloHost {
                device_id: "MD-V5-0000123".to_string(),
                is_available: true
            }]
        );
        let record = engine.table().get("MD-V5-0000123").unwrap();
        assert!(record.is_available);
        assert_eq!(record.ip, device_addr().ip());
        assert_eq!(engine.emotibit_networks(), ["192.168.1"]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            HostEvent::DeviceDiscovered { .. }
        ));
    }

    #[test]
    fn test_hello_host_restores_aged_out_device() {
        let (mut engine, rx) = new_engine(Vec::new());
        let start = Instant::now();
        let hello = encode_at(10, "HH", 0, &["DP", "-1", "DI", "MD-V5-0000123"], 1, 100);
        engine.handle_datagram(&hello, device_addr(), None, start);

        let aged = start + engine.availability_timeout + Duration::from_millis(1);
        assert_eq!(engine.sweep(aged), vec!["MD-V5-0000123".to_string()]);
        assert!(!engine.table().get("MD-V5-0000123").unwrap().is_available);

        let back = aged + Duration::from_millis(10);
        engine.handle_datagram(&hello, device_addr(), None, back);

        let record = engine.table().get("MD-V5-0000123").unwrap();
        assert!(record.is_available);
        assert_eq!(record.last_seen, back);
        // Only the first sighting is announced.
        assert!(matches!(
            rx.try_recv().unwrap(),
            HostEvent::DeviceDiscovered { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_busy_device_without_id_uses_ip() {
        let (mut engine, _rx) = new_engine(Vec::new());
        let hello = encode_at(10, "HH", 0, &["DP", "3132"], 1, 100);

        engine.handle_datagram(&hello, device_addr(), None, Instant::now());

        let record = engine.table().get("192.168.1.42").unwrap();
        assert!(!record.is_available);
    }

    #[test]
    fn test_hello_host_without_data_port_ignored() {
        let (mut engine, _rx) = new_engine(Vec::new());
        let hello = encode_at(10, "HH", 0, &["DI", "abc"], 1, 100);

        assert!(engine
            .handle_datagram(&hello, device_addr(), None, Instant::now())
            .is_empty());
        assert!(engine.table().is_empty());
    }

    #[test]
    fn test_pong_refreshes_only_connected_device() {
        let (mut engine, _rx) = new_engine(Vec::new());
        let start = Instant::now();
        engine.table().upsert("dev", device_addr().ip(), true, start);
        let pong = encode_at(10, "PO", 1, &["DP", "3132"], 1, 100);
        let later = start + Duration::from_secs(3);

        let inbound = engine.handle_datagram(&pong, device_addr(), None, later);
        assert_eq!(
            inbound,
            vec![Inbound::Pong {
                from: device_addr().ip(),
                data_port: Some(3132)
            }]
        );
        assert_eq!(engine.table().get("dev").unwrap().last_seen, start);

        engine.handle_datagram(&pong, device_addr(), Some(device_addr().ip()), later);
        assert_eq!(engine.table().get("dev").unwrap().last_seen, later);
    }

    #[test]
    fn test_other_packets_are_info() {
        let (mut engine, _rx) = new_engine(Vec::new());
        let message = format!(
            "{}garbage\n",
            encode_at(10, "EI", 1, &["fw", "1.2"], 1, 100)
        );

        let inbound = engine.handle_datagram(&message, device_addr(), None, Instant::now());
        assert_eq!(
            inbound,
            vec![Inbound::Info("10,1,2,EI,1,100,fw,1.2".to_string())]
        );
    }

    #[test]
    fn test_refresh_networks_applies_filters() {
        let (mut engine, _rx) = new_engine(vec![
            Ipv4Addr::new(192, 168, 1, 5),
            Ipv4Addr::new(10, 1, 2, 3),
        ]);
        assert_eq!(
            engine.refresh_networks().unwrap(),
            ["192.168.1".to_string(), "10.1.2".to_string()]
        );

        let (mut empty, _rx) = new_engine(Vec::new());
        assert!(matches!(empty.refresh_networks(), Err(HostError::NoNetworks)));
    }
}
