use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::config::WifiHostSettings;
use crate::net::subnet_host;

/// Chooses where HELLO_EMOTIBIT goes on each advertising cycle.
///
/// A cycle either broadcasts once or, when broadcast is off, sweeps unicast
/// addresses in small rate-limited bursts. Once a device subnet is known it is
/// the only subnet advertised to.
#[derive(Debug)]
pub struct Advertiser {
    send_interval: Duration,
    enable_broadcast: bool,
    enable_unicast: bool,
    host_range: (u8, u8),
    ips_per_burst: u32,
    min_burst_delay: Duration,
    last_cycle: Option<Instant>,
    last_burst: Option<Instant>,
    broadcast_pending: bool,
    sweep_in_progress: bool,
    broadcast_network: usize,
    unicast_network: usize,
    host_id: u8,
    device_subnet_known: bool,
}

impl Advertiser {
    pub fn new(settings: &WifiHostSettings) -> Self {
        let (low, high) = settings.unicast_ip_range;
        let host_range = (low.min(high), low.max(high));
        Self {
            send_interval: settings.send_advertising_interval(),
            enable_broadcast: settings.enable_broadcast,
            enable_unicast: settings.enable_unicast,
            host_range,
            ips_per_burst: settings.n_unicast_ips_per_loop.max(1),
            min_burst_delay: settings.unicast_min_loop_delay(),
            last_cycle: None,
            last_burst: None,
            broadcast_pending: false,
            sweep_in_progress: false,
            broadcast_network: 0,
            unicast_network: 0,
            host_id: host_range.0,
            device_subnet_known: false,
        }
    }

    /// Starts a new cycle when the send interval has elapsed.
    pub fn start_cycle_if_due(&mut self, now: Instant) -> bool {
        let due = self
            .last_cycle
            .is_none_or(|last| now.saturating_duration_since(last) >= self.send_interval);
        if due {
            self.last_cycle = Some(now);
            self.broadcast_pending = true;
            self.sweep_in_progress = true;
        }
        due
    }

    pub fn next_targets(
        &mut self,
        now: Instant,
        available: &[String],
        device_networks: &[String],
    ) -> Vec<Ipv4Addr> {
        let found = !device_networks.is_empty();
        if found && !self.device_subnet_known {
            self.device_subnet_known = true;
            self.host_id = self.host_range.0;
            self.unicast_network = 0;
        }

        if self.enable_broadcast && self.broadcast_pending {
            self.broadcast_pending = false;
            self.sweep_in_progress = false;
            let subnet = if found {
                device_networks.first()
            } else if available.is_empty() {
                None
            } else {
                let index = self.broadcast_network % available.len();
                self.broadcast_network = (index + 1) % available.len();
                available.get(index)
            };
            return subnet
                .and_then(|subnet| subnet_host(subnet, 255))
                .into_iter()
                .collect();
        }

        if !self.enable_unicast || !self.sweep_in_progress {
            return Vec::new();
        }
        if self
            .last_burst
            .is_some_and(|last| now.saturating_duration_since(last) < self.min_burst_delay)
        {
            return Vec::new();
        }
        self.last_burst = Some(now);

        let networks = if found { device_networks } else { available };
        if networks.is_empty() {
            self.sweep_in_progress = false;
            return Vec::new();
        }

        let mut targets = Vec::new();
        for _ in 0..self.ips_per_burst {
            let network = &networks[self.unicast_network.min(networks.len() - 1)];
            targets.extend(subnet_host(network, self.host_id));

            if self.host_id < self.host_range.1 {
                self.host_id += 1;
                continue;
            }
            self.host_id = self.host_range.0;
            if found {
                self.sweep_in_progress = false;
                break;
            }
            self.unicast_network += 1;
            if self.unicast_network >= networks.len() {
                self.unicast_network = 0;
                self.sweep_in_progress = false;
                break;
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(broadcast: bool, unicast: bool, range: (u8, u8)) -> WifiHostSettings {
        WifiHostSettings {
            send_advertising_interval_ms: 1000,
            enable_broadcast: broadcast,
            enable_unicast: unicast,
            unicast_ip_range: range,
            n_unicast_ips_per_loop: 1,
            unicast_min_loop_delay_ms: 0,
            ..WifiHostSettings::default()
        }
    }

    fn nets(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn drain_cycle(
        adv: &mut Advertiser,
        now: Instant,
        available: &[String],
        found: &[String],
    ) -> Vec<Ipv4Addr> {
        let mut all = Vec::new();
        for _ in 0..64 {
            all.extend(adv.next_targets(now, available, found));
        }
        all
    }

    #[test]
    fn test_broadcast_round_robins_one_subnet_per_cycle() {
        let mut adv = Advertiser::new(&settings(true, true, (2, 254)));
        let available = nets(&["192.168.1", "10.0.0"]);
        let start = Instant::now();

        assert!(adv.start_cycle_if_due(start));
        assert_eq!(
            drain_cycle(&mut adv, start, &available, &[]),
            vec![Ipv4Addr::new(192, 168, 1, 255)]
        );

        assert!(!adv.start_cycle_if_due(start + Duration::from_millis(500)));
        assert!(adv.start_cycle_if_due(start + Duration::from_millis(1000)));
        assert_eq!(
            drain_cycle(&mut adv, start, &available, &[]),
            vec![Ipv4Addr::new(10, 0, 0, 255)]
        );
    }

    #[test]
    fn test_broadcast_prefers_device_subnet() {
        let mut adv = Advertiser::new(&settings(true, false, (2, 254)));
        let available = nets(&["192.168.1", "10.0.0"]);
        let found = nets(&["10.0.0"]);
        let now = Instant::now();

        adv.start_cycle_if_due(now);
        assert_eq!(
            adv.next_targets(now, &available, &found),
            vec![Ipv4Addr::new(10, 0, 0, 255)]
        );
    }

    #[test]
    fn test_unicast_sweeps_every_network_then_stops() {
        let mut adv = Advertiser::new(&settings(false, true, (1, 3)));
        let available = nets(&["192.168.1", "10.0.0"]);
        let now = Instant::now();

        adv.start_cycle_if_due(now);
        let mut targets = Vec::new();
        for step in 0..20 {
            targets.extend(adv.next_targets(now + Duration::from_millis(step), &available, &[]));
        }
        assert_eq!(
            targets,
            vec![
                Ipv4Addr::new(192, 168, 1, 1),
                Ipv4Addr::new(192, 168, 1, 2),
                Ipv4Addr::new(192, 168, 1, 3),
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
            ]
        );
    }

    #[test]
    fn test_unicast_bursts_are_rate_limited() {
        let mut config = settings(false, true, (1, 10));
        config.unicast_min_loop_delay_ms = 3;
        config.n_unicast_ips_per_loop = 2;
        let mut adv = Advertiser::new(&config);
        let available = nets(&["192.168.1"]);
        let now = Instant::now();

        adv.start_cycle_if_due(now);
        assert_eq!(adv.next_targets(now, &available, &[]).len(), 2);
        assert!(adv.next_targets(now + Duration::from_millis(1), &available, &[]).is_empty());
        assert_eq!(
            adv.next_targets(now + Duration::from_millis(3), &available, &[]),
            vec![Ipv4Addr::new(192, 168, 1, 3), Ipv4Addr::new(192, 168, 1, 4)]
        );
    }

    #[test]
    fn test_device_subnet_restarts_sweep_at_range_start() {
        let mut adv = Advertiser::new(&settings(false, true, (1, 3)));
        let available = nets(&["192.168.1", "10.0.0"]);
        let found = nets(&["10.0.0"]);
        let now = Instant::now();

        adv.start_cycle_if_due(now);
        adv.next_targets(now, &available, &[]);
        adv.next_targets(now + Duration::from_millis(1), &available, &[]);

        let mut targets = Vec::new();
        for step in 2..20 {
            targets.extend(adv.next_targets(now + Duration::from_millis(step), &available, &found));
        }
        assert_eq!(
            targets,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
            ]
        );
    }

    #[test]
    fn test_nothing_sent_without_networks() {
        let mut adv = Advertiser::new(&settings(true, true, (2, 254)));
        let now = Instant::now();
        adv.start_cycle_if_due(now);
        assert!(drain_cycle(&mut adv, now, &[], &[]).is_empty());
    }
}
