use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use radar_domain::{
    journal::JournalEntry,
    known_device::KnownDevice,
    location::LocationPoint,
    profile::{ProfileDetectEvent, RadarProfile},
};

use crate::{
    StoreError,
    store::{DeviceStore, JournalStore, LocationStore, ProfileStore},
};

#[derive(Default)]
struct Tables {
    devices: HashMap<String, KnownDevice>,
    profiles: BTreeMap<i64, RadarProfile>,
    detects: Vec<ProfileDetectEvent>,
    journal: BTreeMap<i64, JournalEntry>,
    locations: BTreeMap<i64, LocationPoint>,
    device_locations: Vec<(String, i64)>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store kept entirely in process memory. Every call holds one lock, so each
/// write is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

fn in_range(time: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    from <= time && time <= to
}

fn sorted_locations(mut locations: Vec<(i64, LocationPoint)>) -> Vec<LocationPoint> {
    locations.sort_by(|(a_id, a), (b_id, b)| a.time.cmp(&b.time).then(a_id.cmp(b_id)));
    locations.into_iter().map(|(_, point)| point).collect()
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn device(&self, address: &str) -> Result<Option<KnownDevice>, StoreError> {
        Ok(self.tables.lock().devices.get(address).cloned())
    }

    async fn devices(&self, addresses: &[String]) -> Result<Vec<KnownDevice>, StoreError> {
        let tables = self.tables.lock();
        Ok(addresses
            .iter()
            .filter_map(|address| tables.devices.get(address).cloned())
            .collect())
    }

    async fn all_devices(&self) -> Result<Vec<KnownDevice>, StoreError> {
        let mut devices: Vec<KnownDevice> = self.tables.lock().devices.values().cloned().collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(devices)
    }

    async fn save_batch(
        &self,
        devices: &[KnownDevice],
        location: Option<&LocationPoint>,
    ) -> Result<(), StoreError> {
        if devices.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.lock();
        for device in devices {
            tables.devices.insert(device.address.clone(), device.clone());
        }
        if let Some(location) = location {
            let id = tables.next_id();
            tables.locations.insert(id, *location);
            for device in devices {
                tables.device_locations.push((device.address.clone(), id));
            }
        }
        Ok(())
    }

    async fn update_device(&self, device: &KnownDevice) -> Result<(), StoreError> {
        self.tables
            .lock()
            .devices
            .insert(device.address.clone(), device.clone());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn save_profile(&self, profile: &RadarProfile) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock();
        let id = match profile.id {
            Some(id) => {
                tables.next_id = tables.next_id.max(id);
                id
            }
            None => tables.next_id(),
        };
        let mut stored = profile.clone();
        stored.id = Some(id);
        tables.profiles.insert(id, stored);
        Ok(id)
    }

    async fn profile(&self, id: i64) -> Result<Option<RadarProfile>, StoreError> {
        Ok(self.tables.lock().profiles.get(&id).cloned())
    }

    async fn profiles(&self) -> Result<Vec<RadarProfile>, StoreError> {
        Ok(self.tables.lock().profiles.values().cloned().collect())
    }

    async fn enabled_profiles(&self) -> Result<Vec<RadarProfile>, StoreError> {
        Ok(self
            .tables
            .lock()
            .profiles
            .values()
            .filter(|profile| profile.enabled)
            .cloned()
            .collect())
    }

    async fn delete_profile(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        tables.detects.retain(|event| event.profile_id != id);
        Ok(tables.profiles.remove(&id).is_some())
    }

    async fn insert_detect(&self, event: &ProfileDetectEvent) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let mut stored = event.clone();
        stored.id = Some(id);
        tables.detects.push(stored);
        Ok(id)
    }

    async fn last_detect(&self, profile_id: i64) -> Result<Option<ProfileDetectEvent>, StoreError> {
        Ok(self
            .tables
            .lock()
            .detects
            .iter()
            .filter(|event| event.profile_id == profile_id)
            .max_by(|a, b| a.trigger_time.cmp(&b.trigger_time).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn detects_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProfileDetectEvent>, StoreError> {
        let mut detects: Vec<ProfileDetectEvent> = self
            .tables
            .lock()
            .detects
            .iter()
            .filter(|event| in_range(event.trigger_time, from, to))
            .cloned()
            .collect();
        detects.sort_by(|a, b| a.trigger_time.cmp(&b.trigger_time).then(a.id.cmp(&b.id)));
        Ok(detects)
    }
}

#[async_trait]
impl JournalStore for MemoryStore {
    async fn append(&self, entry: &JournalEntry) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let mut stored = entry.clone();
        stored.id = Some(id);
        tables.journal.insert(id, stored);
        Ok(id)
    }

    async fn entries(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let mut entries: Vec<JournalEntry> = self
            .tables
            .lock()
            .journal
            .values()
            .filter(|entry| in_range(entry.time, from, to))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn entry(&self, id: i64) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.tables.lock().journal.get(&id).cloned())
    }

    async fn delete_before(&self, time: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock();
        let before = tables.journal.len();
        tables.journal.retain(|_, entry| entry.time >= time);
        Ok((before - tables.journal.len()) as u64)
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn insert_location(&self, point: &LocationPoint) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        tables.locations.insert(id, *point);
        Ok(id)
    }

    async fn locations_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationPoint>, StoreError> {
        let tables = self.tables.lock();
        Ok(sorted_locations(
            tables
                .locations
                .iter()
                .filter(|(_, point)| in_range(point.time, from, to))
                .map(|(id, point)| (*id, *point))
                .collect(),
        ))
    }

    async fn locations_for_device(&self, address: &str) -> Result<Vec<LocationPoint>, StoreError> {
        let tables = self.tables.lock();
        Ok(sorted_locations(
            tables
                .device_locations
                .iter()
                .filter(|(device, _)| device == address)
                .filter_map(|(_, id)| tables.locations.get(id).map(|point| (*id, *point)))
                .collect(),
        ))
    }

    async fn locations_for_profile(&self, profile_id: i64) -> Result<Vec<LocationPoint>, StoreError> {
        let tables = self.tables.lock();
        let trigger_times: Vec<DateTime<Utc>> = tables
            .detects
            .iter()
            .filter(|event| event.profile_id == profile_id)
            .map(|event| event.trigger_time)
            .collect();
        Ok(sorted_locations(
            tables
                .locations
                .iter()
                .filter(|(_, point)| trigger_times.contains(&point.time))
                .map(|(id, point)| (*id, *point))
                .collect(),
        ))
    }
}
