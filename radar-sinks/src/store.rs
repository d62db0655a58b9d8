use async_trait::async_trait;
use chrono::{DateTime, Utc};

use radar_domain::{
    journal::JournalEntry,
    known_device::KnownDevice,
    location::LocationPoint,
    profile::{ProfileDetectEvent, RadarProfile},
};

use crate::StoreError;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn device(&self, address: &str) -> Result<Option<KnownDevice>, StoreError>;
    async fn devices(&self, addresses: &[String]) -> Result<Vec<KnownDevice>, StoreError>;
    async fn all_devices(&self) -> Result<Vec<KnownDevice>, StoreError>;

    /// Writes every device of one batch, and links `location` to each of
    /// them, as a single atomic unit.
    async fn save_batch(
        &self,
        devices: &[KnownDevice],
        location: Option<&LocationPoint>,
    ) -> Result<(), StoreError>;

    /// Stores user edits (tags, favorite, custom name) of one device.
    async fn update_device(&self, device: &KnownDevice) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Inserts when `profile.id` is `None`, otherwise replaces. Returns the id.
    async fn save_profile(&self, profile: &RadarProfile) -> Result<i64, StoreError>;
    async fn profile(&self, id: i64) -> Result<Option<RadarProfile>, StoreError>;
    async fn profiles(&self) -> Result<Vec<RadarProfile>, StoreError>;
    async fn enabled_profiles(&self) -> Result<Vec<RadarProfile>, StoreError>;
    /// Removes the profile together with its detect events.
    async fn delete_profile(&self, id: i64) -> Result<bool, StoreError>;

    async fn insert_detect(&self, event: &ProfileDetectEvent) -> Result<i64, StoreError>;
    async fn last_detect(&self, profile_id: i64) -> Result<Option<ProfileDetectEvent>, StoreError>;
    async fn detects_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProfileDetectEvent>, StoreError>;
}

#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn append(&self, entry: &JournalEntry) -> Result<i64, StoreError>;
    /// Entries with `from <= time <= to`, oldest first.
    async fn entries(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>, StoreError>;
    async fn entry(&self, id: i64) -> Result<Option<JournalEntry>, StoreError>;
    /// Bulk garbage collection. Returns the number of removed entries.
    async fn delete_before(&self, time: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn insert_location(&self, point: &LocationPoint) -> Result<i64, StoreError>;
    async fn locations_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationPoint>, StoreError>;
    async fn locations_for_device(&self, address: &str) -> Result<Vec<LocationPoint>, StoreError>;
    /// Locations recorded at the trigger times of the profile's detect events.
    async fn locations_for_profile(&self, profile_id: i64) -> Result<Vec<LocationPoint>, StoreError>;
}

/// Everything the scan pipeline and the history views need from storage.
pub trait RadarStore: DeviceStore + ProfileStore + JournalStore + LocationStore {}

impl<T> RadarStore for T where T: DeviceStore + ProfileStore + JournalStore + LocationStore {}
