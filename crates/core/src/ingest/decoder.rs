use std::sync::Arc;

use super::ChannelFrequencies;
use crate::event::HostEvent;
use crate::packet::{PAYLOAD_DELIMITER, PacketError, payload_label, type_tag};

const MIN_FIELDS: usize = 7;
const DATA_START: usize = 6;

/// Turns raw data records into UI events: timestamped samples, recording
/// state, battery level and power mode.
#[derive(Debug)]
pub struct SampleDecoder {
    frequencies: Arc<ChannelFrequencies>,
    initial_timestamp: Option<i64>,
}

impl SampleDecoder {
    pub fn new(frequencies: Arc<ChannelFrequencies>) -> Self {
        Self {
            frequencies,
            initial_timestamp: None,
        }
    }

    /// Forgets the time origin; the next sample packet starts at zero.
    pub fn reset(&mut self) {
        self.initial_timestamp = None;
    }

    pub fn decode(&mut self, record: &str) -> Vec<HostEvent> {
        let record = record.trim();
        if record.is_empty() {
            return vec![HostEvent::Log("Empty packet".to_string())];
        }

        let fields: Vec<&str> = record.split(PAYLOAD_DELIMITER).collect();
        if fields.len() < MIN_FIELDS {
            return vec![HostEvent::Log(format!("Malformed packet: {record}"))];
        }

        match fields[3] {
            type_tag::EMOTIBIT_MODE => device_state(&fields),
            type_tag::BATTERY_PERCENT => battery(&fields),
            type_tag::USER_NOTE => Vec::new(),
            channel => match self.frequencies.frequency(channel) {
                Some(hz) => self.samples(channel, hz, &fields),
                None => Vec::new(),
            },
        }
    }

    fn samples(&mut self, channel: &str, hz: f64, fields: &[&str]) -> Vec<HostEvent> {
        let Ok(timestamp) = fields[0].parse::<i64>() else {
            return vec![HostEvent::Log(format!("Invalid timestamp {:?}", fields[0]))];
        };
        let Ok(count) = fields[2].parse::<usize>() else {
            return vec![HostEvent::Log(format!("Invalid data length {:?}", fields[2]))];
        };
        let data = &fields[DATA_START..];
        if data.len() < count {
            return vec![HostEvent::Log(format!(
                "Insufficient data in {channel} packet: expected {count}, got {}",
                data.len()
            ))];
        }

        let initial = *self.initial_timestamp.get_or_insert(timestamp);
        let relative = (timestamp - initial) as f64 / 1000.0;
        let dt = 1.0 / hz;

        data[..count]
            .iter()
            .enumerate()
            .map(|(i, raw)| match raw.trim().parse::<f64>() {
                Ok(value) => HostEvent::Sample {
                    channel: channel.to_string(),
                    time_secs: relative - (count - 1 - i) as f64 * dt,
                    value,
                },
                Err(_) => HostEvent::Log(
                    PacketError::InvalidNumericField {
                        field: DATA_START + i,
                        value: raw.to_string(),
                    }
                    .to_string(),
                ),
            })
            .collect()
    }
}

fn device_state(fields: &[&str]) -> Vec<HostEvent> {
    let mut events = Vec::new();
    let power_mode_at = match fields.get(7).copied() {
        Some(type_tag::RECORD_BEGIN) => {
            let Some(file_name) = fields.get(8) else {
                return events;
            };
            events.push(HostEvent::RecordingState {
                is_recording: true,
                file_name: Some(file_name.to_string()),
            });
            9
        }
        Some(type_tag::RECORD_END) => {
            events.push(HostEvent::RecordingState {
                is_recording: false,
                file_name: None,
            });
            8
        }
        _ => return events,
    };

    if fields.get(power_mode_at).copied() == Some(payload_label::POWER_STATUS) {
        if let Some(mode) = fields.get(power_mode_at + 1) {
            events.push(HostEvent::PowerMode(mode.to_string()));
        }
    }
    events
}

fn battery(fields: &[&str]) -> Vec<HostEvent> {
    match fields[DATA_START].trim().parse::<i64>() {
        Ok(level) => vec![HostEvent::BatteryLevel(level.clamp(0, 100) as u8)],
        Err(_) => Vec::new(),
    }
}
