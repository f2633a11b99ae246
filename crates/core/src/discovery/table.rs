use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub ip: IpAddr,
    pub is_available: bool,
    pub last_seen: Instant,
}

/// Every device heard from, keyed by device id. Callers only ever get copies.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Mutex<HashMap<String, DeviceRecord>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the device was not known before. Known records are
    /// updated in place.
    pub fn upsert(&self, device_id: &str, ip: IpAddr, is_available: bool, now: Instant) -> bool {
        match self.lock().entry(device_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.ip = ip;
                record.is_available = is_available;
                record.last_seen = now;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(DeviceRecord {
                    device_id: device_id.to_string(),
                    ip,
                    is_available,
                    last_seen: now,
                });
                true
            }
        }
    }

    /// Marks every record at `ip` as seen and available.
    pub fn refresh_ip(&self, ip: IpAddr, now: Instant) -> usize {
        let mut devices = self.lock();
        let mut refreshed = 0;
        for record in devices.values_mut().filter(|r| r.ip == ip) {
            record.last_seen = now;
            record.is_available = true;
            refreshed += 1;
        }
        refreshed
    }

    /// Flags records silent for longer than `timeout` as unavailable and
    /// returns the ids that changed.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut devices = self.lock();
        let mut expired = Vec::new();
        for record in devices.values_mut() {
            if record.is_available && now.saturating_duration_since(record.last_seen) > timeout {
                record.is_available = false;
                expired.push(record.device_id.clone());
            }
        }
        expired.sort();
        expired
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.lock().get(device_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn records(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceRecord>> {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
