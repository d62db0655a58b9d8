use std::{collections::BTreeSet, path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Pool, QueryBuilder, Row, Sqlite,
    sqlite::{SqlitePoolOptions, SqliteRow},
};
use tracing::debug;

use radar_domain::{
    journal::{JournalEntry, JournalReport},
    known_device::KnownDevice,
    location::LocationPoint,
    profile::{Filter, ProfileDetectEvent, RadarProfile},
};

use crate::{
    StoreError,
    store::{DeviceStore, JournalStore, LocationStore, ProfileStore},
};

pub struct SqliteStore {
    pool: Arc<Pool<Sqlite>>,
}

impl SqliteStore {
    pub async fn create_from_file<P>(path_arg: P) -> Result<SqliteStore, StoreError>
    where
        P: AsRef<Path>,
    {
        let url = format!("sqlite://{}?mode=rwc", path_arg.as_ref().display());
        let pool = Arc::new(SqlitePoolOptions::new().connect(&url).await?);
        SqliteStore::create_from_pool(pool).await
    }

    /// A private database living as long as the store. One connection only,
    /// since every connection to `sqlite::memory:` sees a different database.
    pub async fn in_memory() -> Result<SqliteStore, StoreError> {
        let pool = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?,
        );
        SqliteStore::create_from_pool(pool).await
    }

    pub async fn create_from_pool(pool: Arc<Pool<Sqlite>>) -> Result<SqliteStore, StoreError> {
        sqlx::migrate!("../migrations").run(&*pool).await?;
        Ok(SqliteStore { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const UPSERT_DEVICE: &str = "
    INSERT OR REPLACE INTO known_devices (
        address, name, custom_name, manufacturer_id, manufacturer_name, tags, favorite,
        first_seen, last_seen, previous_seen, detect_count, rssi, address_type,
        is_paired, is_connectable, device_class, service_uuids, raw_advertisement)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn upsert_device(
    device: &KnownDevice,
) -> Result<sqlx::query::Query<'static, Sqlite, sqlx::sqlite::SqliteArguments<'static>>, StoreError>
{
    Ok(sqlx::query(UPSERT_DEVICE)
        .bind(device.address.clone())
        .bind(device.name.clone())
        .bind(device.custom_name.clone())
        .bind(device.manufacturer_id.map(i64::from))
        .bind(device.manufacturer_name.clone())
        .bind(serde_json::to_string(&device.tags)?)
        .bind(device.favorite)
        .bind(device.first_seen.timestamp_millis())
        .bind(device.last_seen.timestamp_millis())
        .bind(device.previous_seen.map(|t| t.timestamp_millis()))
        .bind(i64::from(device.detect_count))
        .bind(i64::from(device.rssi))
        .bind(device.address_type.map(i64::from))
        .bind(device.is_paired)
        .bind(device.is_connectable)
        .bind(device.device_class.map(i64::from))
        .bind(serde_json::to_string(&device.service_uuids)?)
        .bind(device.raw_advertisement.clone()))
}

fn device_from_row(row: &SqliteRow) -> Result<KnownDevice, StoreError> {
    let tags: String = row.try_get("tags")?;
    let service_uuids: String = row.try_get("service_uuids")?;
    Ok(KnownDevice {
        address: row.try_get("address")?,
        name: row.try_get("name")?,
        custom_name: row.try_get("custom_name")?,
        manufacturer_id: narrow_opt(row.try_get("manufacturer_id")?, "manufacturer_id")?,
        manufacturer_name: row.try_get("manufacturer_name")?,
        tags: serde_json::from_str::<BTreeSet<String>>(&tags)?,
        favorite: row.try_get("favorite")?,
        first_seen: time_at(row.try_get("first_seen")?)?,
        last_seen: time_at(row.try_get("last_seen")?)?,
        previous_seen: row
            .try_get::<Option<i64>, _>("previous_seen")?
            .map(time_at)
            .transpose()?,
        detect_count: narrow(row.try_get("detect_count")?, "detect_count")?,
        rssi: narrow(row.try_get("rssi")?, "rssi")?,
        address_type: narrow_opt(row.try_get("address_type")?, "address_type")?,
        is_paired: row.try_get("is_paired")?,
        is_connectable: row.try_get("is_connectable")?,
        device_class: narrow_opt(row.try_get("device_class")?, "device_class")?,
        service_uuids: serde_json::from_str::<BTreeSet<String>>(&service_uuids)?,
        raw_advertisement: row.try_get("raw_advertisement")?,
    })
}

fn profile_from_row(row: &SqliteRow) -> Result<RadarProfile, StoreError> {
    let filter: String = row.try_get("filter")?;
    Ok(RadarProfile {
        id: Some(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        enabled: row.try_get("enabled")?,
        filter: serde_json::from_str::<Filter>(&filter)?,
    })
}

fn detect_from_row(row: &SqliteRow) -> Result<ProfileDetectEvent, StoreError> {
    let addresses: String = row.try_get("device_addresses")?;
    Ok(ProfileDetectEvent {
        id: Some(row.try_get("id")?),
        profile_id: row.try_get("profile_id")?,
        trigger_time: time_at(row.try_get("trigger_time")?)?,
        device_addresses: serde_json::from_str(&addresses)?,
    })
}

fn journal_from_row(row: &SqliteRow) -> Result<JournalEntry, StoreError> {
    let report: String = row.try_get("report")?;
    Ok(JournalEntry {
        id: Some(row.try_get("id")?),
        time: time_at(row.try_get("time")?)?,
        report: serde_json::from_str::<JournalReport>(&report)?,
    })
}

fn location_from_row(row: &SqliteRow) -> Result<LocationPoint, StoreError> {
    Ok(LocationPoint::new(
        row.try_get("lat")?,
        row.try_get("lng")?,
        time_at(row.try_get("time")?)?,
    ))
}

fn time_at(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn narrow_opt<T: TryFrom<i64>>(value: Option<i64>, column: &str) -> Result<Option<T>, StoreError> {
    value.map(|v| narrow(v, column)).transpose()
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn device(&self, address: &str) -> Result<Option<KnownDevice>, StoreError> {
        let row = sqlx::query("SELECT * FROM known_devices WHERE address = ?")
            .bind(address)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn devices(&self, addresses: &[String]) -> Result<Vec<KnownDevice>, StoreError> {
        if addresses.is_empty() {
            return Ok(vec![]);
        }
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM known_devices WHERE address IN (");
        let mut separated = query.separated(", ");
        for address in addresses {
            separated.push_bind(address.as_str());
        }
        separated.push_unseparated(")");
        let rows = query.build().fetch_all(&*self.pool).await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn all_devices(&self) -> Result<Vec<KnownDevice>, StoreError> {
        let rows = sqlx::query("SELECT * FROM known_devices ORDER BY last_seen DESC")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn save_batch(
        &self,
        devices: &[KnownDevice],
        location: Option<&LocationPoint>,
    ) -> Result<(), StoreError> {
        if devices.is_empty() {
            return Ok(());
        }
        let p = self.pool.clone();
        let mut tx = p.begin().await?;

        for device in devices {
            upsert_device(device)?.execute(&mut *tx).await?;
        }

        if let Some(location) = location {
            let location_id = sqlx::query("INSERT INTO locations (lat, lng, time) VALUES (?, ?, ?)")
                .bind(location.lat)
                .bind(location.lng)
                .bind(location.time.timestamp_millis())
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();
            for device in devices {
                sqlx::query(
                    "INSERT OR IGNORE INTO device_locations (device_address, location_id) VALUES (?, ?)",
                )
                .bind(device.address.as_str())
                .bind(location_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!("Saved {} devices", devices.len());
        Ok(())
    }

    async fn update_device(&self, device: &KnownDevice) -> Result<(), StoreError> {
        upsert_device(device)?.execute(&*self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn save_profile(&self, profile: &RadarProfile) -> Result<i64, StoreError> {
        let filter = serde_json::to_string(&profile.filter)?;
        let id = match profile.id {
            Some(id) => {
                sqlx::query(
                    "INSERT OR REPLACE INTO radar_profiles (id, name, description, enabled, filter)
                    VALUES (?, ?, ?, ?, ?)",
                )
                .bind(id)
                .bind(profile.name.as_str())
                .bind(profile.description.as_deref())
                .bind(profile.enabled)
                .bind(filter)
                .execute(&*self.pool)
                .await?;
                id
            }
            None => sqlx::query(
                "INSERT INTO radar_profiles (name, description, enabled, filter) VALUES (?, ?, ?, ?)",
            )
            .bind(profile.name.as_str())
            .bind(profile.description.as_deref())
            .bind(profile.enabled)
            .bind(filter)
            .execute(&*self.pool)
            .await?
            .last_insert_rowid(),
        };
        Ok(id)
    }

    async fn profile(&self, id: i64) -> Result<Option<RadarProfile>, StoreError> {
        let row = sqlx::query("SELECT * FROM radar_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn profiles(&self) -> Result<Vec<RadarProfile>, StoreError> {
        let rows = sqlx::query("SELECT * FROM radar_profiles ORDER BY id")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn enabled_profiles(&self) -> Result<Vec<RadarProfile>, StoreError> {
        let rows = sqlx::query("SELECT * FROM radar_profiles WHERE enabled = 1 ORDER BY id")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn delete_profile(&self, id: i64) -> Result<bool, StoreError> {
        let p = self.pool.clone();
        let mut tx = p.begin().await?;
        sqlx::query("DELETE FROM profile_detects WHERE profile_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM radar_profiles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn insert_detect(&self, event: &ProfileDetectEvent) -> Result<i64, StoreError> {
        let id = sqlx::query(
            "INSERT INTO profile_detects (profile_id, trigger_time, device_addresses) VALUES (?, ?, ?)",
        )
        .bind(event.profile_id)
        .bind(event.trigger_time.timestamp_millis())
        .bind(serde_json::to_string(&event.device_addresses)?)
        .execute(&*self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn last_detect(&self, profile_id: i64) -> Result<Option<ProfileDetectEvent>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM profile_detects WHERE profile_id = ?
            ORDER BY trigger_time DESC, id DESC LIMIT 1",
        )
        .bind(profile_id)
        .fetch_optional(&*self.pool)
        .await?;
        row.as_ref().map(detect_from_row).transpose()
    }

    async fn detects_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProfileDetectEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM profile_detects WHERE trigger_time >= ? AND trigger_time <= ?
            ORDER BY trigger_time, id",
        )
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(detect_from_row).collect()
    }
}

#[async_trait]
impl JournalStore for SqliteStore {
    async fn append(&self, entry: &JournalEntry) -> Result<i64, StoreError> {
        let id = sqlx::query("INSERT INTO journal (time, report) VALUES (?, ?)")
            .bind(entry.time.timestamp_millis())
            .bind(serde_json::to_string(&entry.report)?)
            .execute(&*self.pool)
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    async fn entries(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM journal WHERE time >= ? AND time <= ? ORDER BY time, id")
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(journal_from_row).collect()
    }

    async fn entry(&self, id: i64) -> Result<Option<JournalEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM journal WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(journal_from_row).transpose()
    }

    async fn delete_before(&self, time: DateTime<Utc>) -> Result<u64, StoreError> {
        let deleted = sqlx::query("DELETE FROM journal WHERE time < ?")
            .bind(time.timestamp_millis())
            .execute(&*self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[async_trait]
impl LocationStore for SqliteStore {
    async fn insert_location(&self, point: &LocationPoint) -> Result<i64, StoreError> {
        let id = sqlx::query("INSERT INTO locations (lat, lng, time) VALUES (?, ?, ?)")
            .bind(point.lat)
            .bind(point.lng)
            .bind(point.time.timestamp_millis())
            .execute(&*self.pool)
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    async fn locations_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationPoint>, StoreError> {
        let rows = sqlx::query("SELECT * FROM locations WHERE time >= ? AND time <= ? ORDER BY time, id")
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(location_from_row).collect()
    }

    async fn locations_for_device(&self, address: &str) -> Result<Vec<LocationPoint>, StoreError> {
        let rows = sqlx::query(
            "SELECT l.lat, l.lng, l.time FROM locations l
            JOIN device_locations dl ON dl.location_id = l.id
            WHERE dl.device_address = ?
            ORDER BY l.time, l.id",
        )
        .bind(address)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(location_from_row).collect()
    }

    async fn locations_for_profile(&self, profile_id: i64) -> Result<Vec<LocationPoint>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT l.id, l.lat, l.lng, l.time FROM locations l
            JOIN profile_detects pd ON l.time = pd.trigger_time
            WHERE pd.profile_id = ?
            ORDER BY l.time, l.id",
        )
        .bind(profile_id)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(location_from_row).collect()
    }
}
