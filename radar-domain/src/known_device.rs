use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{advertisement, scan::ScanDevice};

/// Persisted identity of a device plus its most recent sighting.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct KnownDevice {
    pub address: String,
    pub name: Option<String>,
    /// Name set by the user, never overwritten by sightings.
    pub custom_name: Option<String>,
    pub manufacturer_id: Option<u16>,
    pub manufacturer_name: Option<String>,
    pub tags: BTreeSet<String>,
    pub favorite: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// `last_seen` before the most recent sighting, if any.
    pub previous_seen: Option<DateTime<Utc>>,
    pub detect_count: u32,
    pub rssi: i16,
    pub address_type: Option<u8>,
    pub is_paired: bool,
    pub is_connectable: bool,
    pub device_class: Option<u32>,
    pub service_uuids: BTreeSet<String>,
    pub raw_advertisement: Option<Vec<u8>>,
}

impl KnownDevice {
    #[must_use]
    pub fn from_scan(device: &ScanDevice) -> KnownDevice {
        let manufacturer_id = device.manufacturer_id();
        KnownDevice {
            address: device.address.clone(),
            name: device.name.clone(),
            custom_name: None,
            manufacturer_id,
            manufacturer_name: manufacturer_id
                .and_then(advertisement::manufacturer_name)
                .map(str::to_string),
            tags: BTreeSet::new(),
            favorite: false,
            first_seen: device.scan_time,
            last_seen: device.scan_time,
            previous_seen: None,
            detect_count: 1,
            rssi: device.rssi,
            address_type: device.address_type,
            is_paired: device.is_paired,
            is_connectable: device.is_connectable,
            device_class: device.device_class,
            service_uuids: device.service_uuids.clone(),
            raw_advertisement: device.raw_advertisement.clone(),
        }
    }

    /// Overlays a new sighting. User-owned fields (tags, favorite, custom
    /// name) and `first_seen` are left untouched.
    pub fn update(&mut self, device: &ScanDevice) {
        self.previous_seen = Some(self.last_seen);
        self.last_seen = self.last_seen.max(device.scan_time);
        self.detect_count = self.detect_count.saturating_add(1);
        self.rssi = device.rssi;
        if device.name.is_some() {
            self.name = device.name.clone();
        }
        if let Some(manufacturer_id) = device.manufacturer_id() {
            self.manufacturer_id = Some(manufacturer_id);
            self.manufacturer_name =
                advertisement::manufacturer_name(manufacturer_id).map(str::to_string);
        }
        if device.address_type.is_some() {
            self.address_type = device.address_type;
        }
        self.is_paired = device.is_paired;
        self.is_connectable = device.is_connectable;
        if device.device_class.is_some() {
            self.device_class = device.device_class;
        }
        self.service_uuids
            .extend(device.service_uuids.iter().cloned());
        if device.raw_advertisement.is_some() {
            self.raw_advertisement = device.raw_advertisement.clone();
        }
    }

    /// Name shown to the user: the custom name if set, otherwise the
    /// advertised one.
    pub fn display_name(&self) -> Option<&str> {
        self.custom_name.as_deref().or(self.name.as_deref())
    }
}
