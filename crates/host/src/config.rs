use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use emotilink::{
    ChannelFrequencies, HostConfig, PortSettings, SessionTimings, TimestampFormat,
    WifiHostSettings,
};
use serde::Deserialize;

/// Layout of the optional TOML file passed with `--config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub wifi: WifiHostSettings,
    pub timings: SessionTimings,
    pub ports: PortSettings,
    pub timestamp_format: TimestampFormat,
    /// Rates layered over the standard channel set.
    pub channel_frequencies: Option<ChannelFrequencies>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            wifi: self.wifi.clone(),
            timings: self.timings.clone(),
            ports: self.ports.clone(),
            timestamp_format: self.timestamp_format.clone(),
        }
    }

    pub fn frequencies(&self) -> ChannelFrequencies {
        let mut frequencies = ChannelFrequencies::standard();
        if let Some(extra) = &self.channel_frequencies {
            frequencies.merge(extra);
        }
        frequencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_gives_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.host_config(), HostConfig::default());
        assert_eq!(config.frequencies(), ChannelFrequencies::standard());
    }

    #[test]
    fn test_frequencies_layer_over_standard() {
        let config = AppConfig::parse(
            r#"
            [channel_frequencies]
            EA = 30.0
            XX = 2.0
            "#,
        )
        .unwrap();

        let frequencies = config.frequencies();
        assert_eq!(frequencies.frequency("EA"), Some(30.0));
        assert_eq!(frequencies.frequency("XX"), Some(2.0));
        assert_eq!(frequencies.frequency("AX"), Some(25.0));
    }

    #[test]
    fn test_sections_map_onto_host_config() {
        let config = AppConfig::parse(
            r#"
            timestamp_format = "%H:%M:%S-%i"

            [ports]
            data_port = 4000

            [wifi]
            enable_broadcast = false
            network_exclude_list = ["10.0.*"]
            "#,
        )
        .unwrap();

        let host = config.host_config();
        assert_eq!(host.ports.data_port, 4000);
        assert_eq!(host.ports.advertising_port, 3131);
        assert!(!host.wifi.enable_broadcast);
        assert_eq!(host.wifi.network_exclude_list, vec!["10.0.*"]);
        assert_eq!(host.timestamp_format.as_str(), "%H:%M:%S-%i");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(AppConfig::parse("tick_rate = 60").is_err());
    }
}
