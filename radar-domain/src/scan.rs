use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::advertisement;

/// A single BLE sighting as reported by the hardware during one scan window.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct ScanDevice {
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub scan_time: DateTime<Utc>,
    pub raw_advertisement: Option<Vec<u8>>,
    pub address_type: Option<u8>,
    pub is_paired: bool,
    pub service_uuids: BTreeSet<String>,
    pub is_connectable: bool,
    pub device_class: Option<u32>,
}

impl ScanDevice {
    #[must_use]
    pub fn new(address: impl Into<String>, rssi: i16, scan_time: DateTime<Utc>) -> ScanDevice {
        ScanDevice {
            address: address.into(),
            name: None,
            rssi,
            scan_time,
            raw_advertisement: None,
            address_type: None,
            is_paired: false,
            service_uuids: BTreeSet::new(),
            is_connectable: false,
            device_class: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> ScanDevice {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_services<I, S>(mut self, services: I) -> ScanDevice
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_uuids = services.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_raw_advertisement(mut self, raw: Vec<u8>) -> ScanDevice {
        self.raw_advertisement = Some(raw);
        self
    }

    pub fn manufacturer_id(&self) -> Option<u16> {
        self.raw_advertisement
            .as_deref()
            .and_then(advertisement::manufacturer_id)
    }
}

/// Devices observed during one scan window, one entry per address.
///
/// Later sightings of the same address replace earlier ones. Arrival order of
/// the first sighting of each address is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanBatch {
    scan_time: DateTime<Utc>,
    order: Vec<String>,
    devices: HashMap<String, ScanDevice>,
}

impl ScanBatch {
    #[must_use]
    pub fn new(scan_time: DateTime<Utc>) -> ScanBatch {
        ScanBatch {
            scan_time: scan_time.trunc_subsecs(3),
            order: Vec::new(),
            devices: HashMap::new(),
        }
    }

    #[must_use]
    pub fn started_now() -> ScanBatch {
        ScanBatch::new(Utc::now())
    }

    pub fn from_devices(scan_time: DateTime<Utc>, devices: Vec<ScanDevice>) -> ScanBatch {
        let mut batch = ScanBatch::new(scan_time);
        for device in devices {
            batch.upsert(device);
        }
        batch
    }

    /// Records a sighting, stamping it with the batch time.
    pub fn upsert(&mut self, mut device: ScanDevice) {
        device.scan_time = self.scan_time;
        if !self.devices.contains_key(&device.address) {
            self.order.push(device.address.clone());
        }
        self.devices.insert(device.address.clone(), device);
    }

    pub fn scan_time(&self) -> DateTime<Utc> {
        self.scan_time
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<&ScanDevice> {
        self.devices.get(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanDevice> {
        self.order.iter().filter_map(|address| self.devices.get(address))
    }

    pub fn into_devices(mut self) -> Vec<ScanDevice> {
        self.order
            .iter()
            .filter_map(|address| self.devices.remove(address))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::{ScanBatch, ScanDevice};

    #[test]
    fn last_sighting_wins() {
        let start = Utc.timestamp_opt(10, 0).unwrap();
        let mut batch = ScanBatch::new(start);
        batch.upsert(ScanDevice::new("AA:BB", -60, start));
        batch.upsert(ScanDevice::new("CC:DD", -70, start));
        batch.upsert(ScanDevice::new("AA:BB", -40, start).with_name("Tag"));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get("AA:BB").unwrap().rssi, -40);
        assert_eq!(batch.addresses(), vec!["AA:BB".to_string(), "CC:DD".to_string()]);
    }

    #[test]
    fn sightings_take_batch_time() {
        let start = Utc.timestamp_opt(10, 0).unwrap();
        let later = Utc.timestamp_opt(12, 0).unwrap();
        let mut batch = ScanBatch::new(start);
        batch.upsert(ScanDevice::new("AA:BB", -60, later));
        assert_eq!(batch.get("AA:BB").unwrap().scan_time, start);
    }

    #[test]
    fn batch_time_is_truncated_to_millis() {
        let start = Utc.timestamp_opt(10, 123_456_789).unwrap();
        let batch = ScanBatch::new(start);
        assert_eq!(batch.scan_time(), Utc.timestamp_opt(10, 123_000_000).unwrap());
    }
}
