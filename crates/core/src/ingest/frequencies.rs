use std::collections::HashMap;

use serde::Deserialize;

use crate::packet::type_tag;

/// Sampling rate in Hz for each channel that carries plottable samples.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ChannelFrequencies {
    rates: HashMap<String, f64>,
}

impl Default for ChannelFrequencies {
    fn default() -> Self {
        Self::standard()
    }
}

impl ChannelFrequencies {
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// Rates of the stock sensor set.
    pub fn standard() -> Self {
        let mut frequencies = Self::empty();
        for channel in [
            type_tag::ACCELEROMETER_X,
            type_tag::ACCELEROMETER_Y,
            type_tag::ACCELEROMETER_Z,
            type_tag::GYROSCOPE_X,
            type_tag::GYROSCOPE_Y,
            type_tag::GYROSCOPE_Z,
            type_tag::MAGNETOMETER_X,
            type_tag::MAGNETOMETER_Y,
            type_tag::MAGNETOMETER_Z,
            type_tag::PPG_INFRARED,
            type_tag::PPG_RED,
            type_tag::PPG_GREEN,
        ] {
            frequencies.insert(channel, 25.0);
        }
        for channel in [
            type_tag::TEMPERATURE_0,
            type_tag::TEMPERATURE_1,
            type_tag::THERMOPILE,
        ] {
            frequencies.insert(channel, 7.5);
        }
        for channel in [type_tag::EDA, type_tag::EDL, type_tag::EDR] {
            frequencies.insert(channel, 15.0);
        }
        // Derived channels
        for channel in [
            type_tag::HEART_RATE,
            type_tag::SCR_RISE_TIME,
            type_tag::SCR_FREQUENCY,
            type_tag::SCR_AMPLITUDE,
            type_tag::INTER_HEARTBEAT_INTERVAL,
            type_tag::BATTERY_VOLTAGE,
        ] {
            frequencies.insert(channel, 1.0);
        }
        frequencies
    }

    /// Non-positive rates are ignored.
    pub fn insert(&mut self, channel: &str, hz: f64) {
        if hz > 0.0 && hz.is_finite() {
            self.rates.insert(channel.to_string(), hz);
        } else {
            log::warn!("Ignoring invalid frequency {hz} for channel {channel}");
        }
    }

    /// Applies every rate from `other` on top of these.
    pub fn merge(&mut self, other: &ChannelFrequencies) {
        for (channel, hz) in &other.rates {
            self.insert(channel, *hz);
        }
    }

    pub fn frequency(&self, channel: &str) -> Option<f64> {
        self.rates.get(channel).copied().filter(|hz| *hz > 0.0)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.frequency(channel).is_some()
    }

    pub fn channels(&self) -> Vec<&str> {
        let mut channels: Vec<&str> = self.rates.keys().map(String::as_str).collect();
        channels.sort_unstable();
        channels
    }
}
