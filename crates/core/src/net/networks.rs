use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// Source of the host's own IPv4 addresses.
pub trait LocalAddressSource: Send + Sync {
    fn local_ipv4(&self) -> io::Result<Vec<Ipv4Addr>>;
}

/// Enumerates the machine's adapters, skipping loopback.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAddresses;

impl LocalAddressSource for SystemAddresses {
    fn local_ipv4(&self) -> io::Result<Vec<Ipv4Addr>> {
        let addrs = if_addrs::get_if_addrs()?
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| match iface.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .collect();
        Ok(addrs)
    }
}

/// A fixed address list, used when the adapters are known up front.
impl LocalAddressSource for Vec<Ipv4Addr> {
    fn local_ipv4(&self) -> io::Result<Vec<Ipv4Addr>> {
        Ok(self.clone())
    }
}

/// First three octets of an address, e.g. `"192.168.1"`.
pub fn subnet_of(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{a}.{b}.{c}")
}

pub fn subnet_host(subnet: &str, host_id: u8) -> Option<Ipv4Addr> {
    format!("{subnet}.{host_id}").parse().ok()
}

/// Octet-wise match where `*` matches any octet. An empty pattern never
/// matches.
pub fn matches_pattern(address: &str, pattern: &str) -> bool {
    if pattern.is_empty() || address.is_empty() {
        return false;
    }
    address
        .split('.')
        .zip(pattern.split('.'))
        .all(|(octet, wanted)| wanted == "*" || wanted == octet)
}

pub fn in_network_list(address: &str, list: &[String]) -> bool {
    list.iter().any(|pattern| matches_pattern(address, pattern))
}

#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl NetworkFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn accepts(&self, subnet: &str) -> bool {
        in_network_list(subnet, &self.include) && !in_network_list(subnet, &self.exclude)
    }

    /// Deduplicated subnets of `addrs` that pass the filter, in adapter order.
    pub fn subnets(&self, addrs: &[Ipv4Addr]) -> Vec<String> {
        let mut subnets: Vec<String> = Vec::new();
        for ip in addrs {
            let subnet = subnet_of(*ip);
            if !subnets.contains(&subnet) && self.accepts(&subnet) {
                subnets.push(subnet);
            }
        }
        subnets
    }
}
