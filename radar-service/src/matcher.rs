use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use radar_domain::{known_device::KnownDevice, profile::ProfileDetectEvent};
use radar_sinks::{StoreError, store::RadarStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileResult {
    pub profile_id: i64,
    pub profile_name: String,
    pub matched_addresses: Vec<String>,
    /// Trigger time of the profile's detect event before this one.
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Evaluates enabled radar profiles against merged device records.
#[derive(Clone)]
pub struct ProfileMatcher {
    store: Arc<dyn RadarStore>,
}

impl ProfileMatcher {
    pub fn new(store: Arc<dyn RadarStore>) -> ProfileMatcher {
        ProfileMatcher { store }
    }

    /// Every profile with at least one matching device yields a result and a
    /// detect event stamped `trigger_time`.
    pub async fn check_batch(
        &self,
        devices: &[KnownDevice],
        trigger_time: DateTime<Utc>,
    ) -> Result<Vec<ProfileResult>, StoreError> {
        if devices.is_empty() {
            return Ok(vec![]);
        }

        let mut results = vec![];
        for profile in self.store.enabled_profiles().await? {
            let Some(profile_id) = profile.id else {
                continue;
            };
            let filter = profile.filter.compile();
            let matched_addresses: Vec<String> = devices
                .iter()
                .filter(|device| filter.matches(device))
                .map(|device| device.address.clone())
                .collect();
            if matched_addresses.is_empty() {
                continue;
            }

            let last_triggered = self
                .store
                .last_detect(profile_id)
                .await?
                .map(|event| event.trigger_time);
            self.store
                .insert_detect(&ProfileDetectEvent::new(
                    profile_id,
                    trigger_time,
                    matched_addresses.clone(),
                ))
                .await?;
            debug!(
                "Profile {} matched {} device(s)",
                profile.name,
                matched_addresses.len()
            );
            results.push(ProfileResult {
                profile_id,
                profile_name: profile.name,
                matched_addresses,
                last_triggered,
            });
        }
        Ok(results)
    }
}
