use std::time::Duration;

use serde::Deserialize;

use crate::packet::DEFAULT_TIMESTAMP_FORMAT;

pub const DEFAULT_ADVERTISING_PORT: u16 = 3131;
pub const DEFAULT_DATA_PORT: u16 = DEFAULT_ADVERTISING_PORT + 1;
pub const DEFAULT_BIND_ATTEMPTS: u32 = 10;

/// Everything the host needs at startup. Read once and never mutated while
/// the host runs.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub wifi: WifiHostSettings,
    pub timings: SessionTimings,
    pub ports: PortSettings,
    pub timestamp_format: TimestampFormat,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WifiHostSettings {
    pub send_advertising_interval_ms: u64,
    pub check_advertising_interval_ms: u64,
    /// Zero yields instead of sleeping.
    pub advertising_thread_sleep_us: u64,
    pub data_thread_sleep_us: u64,
    pub control_thread_sleep_us: u64,
    pub enable_broadcast: bool,
    pub enable_unicast: bool,
    /// Inclusive host-id range swept by unicast advertising.
    pub unicast_ip_range: (u8, u8),
    pub n_unicast_ips_per_loop: u32,
    pub unicast_min_loop_delay_ms: u64,
    pub network_include_list: Vec<String>,
    pub network_exclude_list: Vec<String>,
}

impl Default for WifiHostSettings {
    fn default() -> Self {
        Self {
            send_advertising_interval_ms: 1000,
            check_advertising_interval_ms: 100,
            advertising_thread_sleep_us: 0,
            data_thread_sleep_us: 0,
            control_thread_sleep_us: 1000,
            enable_broadcast: true,
            enable_unicast: true,
            unicast_ip_range: (2, 254),
            n_unicast_ips_per_loop: 1,
            unicast_min_loop_delay_ms: 3,
            network_include_list: vec!["*.*.*.*".to_string()],
            network_exclude_list: Vec::new(),
        }
    }
}

impl WifiHostSettings {
    pub fn send_advertising_interval(&self) -> Duration {
        Duration::from_millis(self.send_advertising_interval_ms)
    }

    pub fn check_advertising_interval(&self) -> Duration {
        Duration::from_millis(self.check_advertising_interval_ms)
    }

    pub fn unicast_min_loop_delay(&self) -> Duration {
        Duration::from_millis(self.unicast_min_loop_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionTimings {
    pub ping_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub availability_timeout_ms: u64,
    pub start_cxn_interval_ms: u64,
    pub start_cxn_timeout_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 500,
            connection_timeout_ms: 10_000,
            availability_timeout_ms: 1000,
            start_cxn_interval_ms: 100,
            start_cxn_timeout_ms: 5000,
        }
    }
}

impl SessionTimings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }

    pub fn start_cxn_interval(&self) -> Duration {
        Duration::from_millis(self.start_cxn_interval_ms)
    }

    pub fn start_cxn_timeout(&self) -> Duration {
        Duration::from_millis(self.start_cxn_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortSettings {
    /// Port the devices listen on for advertising traffic.
    pub advertising_port: u16,
    /// First data port tried; the control port starts one above it. Zero
    /// picks ephemeral ports for both.
    pub data_port: u16,
    pub bind_attempts: u32,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            advertising_port: DEFAULT_ADVERTISING_PORT,
            data_port: DEFAULT_DATA_PORT,
            bind_attempts: DEFAULT_BIND_ATTEMPTS,
        }
    }
}

/// strftime pattern for host-side timestamps. Also understands `%i`
/// (milliseconds) and `%f` (microseconds).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TimestampFormat(pub String);

impl Default for TimestampFormat {
    fn default() -> Self {
        Self(DEFAULT_TIMESTAMP_FORMAT.to_string())
    }
}

impl TimestampFormat {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
