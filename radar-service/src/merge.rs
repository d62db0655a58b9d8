use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use radar_domain::{known_device::KnownDevice, location::LocationPoint, scan::ScanBatch};
use radar_sinks::{StoreError, store::RadarStore};

#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    /// Merged records of every device in the batch, in arrival order.
    pub saved_batch: Vec<KnownDevice>,
    /// Devices of the batch that were already known before it.
    pub known_devices_count: usize,
}

/// Folds scan batches into the known-device store.
#[derive(Clone)]
pub struct BatchMerger {
    store: Arc<dyn RadarStore>,
}

impl BatchMerger {
    pub fn new(store: Arc<dyn RadarStore>) -> BatchMerger {
        BatchMerger { store }
    }

    /// `location`, when given, is recorded at the batch time and linked to
    /// every device of the batch in the same write.
    pub async fn merge_batch(
        &self,
        batch: &ScanBatch,
        location: Option<LocationPoint>,
    ) -> Result<SaveResult, StoreError> {
        if batch.is_empty() {
            return Ok(SaveResult {
                saved_batch: vec![],
                known_devices_count: 0,
            });
        }

        let mut existing: HashMap<String, KnownDevice> = self
            .store
            .devices(&batch.addresses())
            .await?
            .into_iter()
            .map(|device| (device.address.clone(), device))
            .collect();

        let mut known_devices_count = 0;
        let saved_batch: Vec<KnownDevice> = batch
            .iter()
            .map(|sighting| match existing.remove(&sighting.address) {
                Some(mut known) => {
                    known_devices_count += 1;
                    known.update(sighting);
                    known
                }
                None => KnownDevice::from_scan(sighting),
            })
            .collect();

        let location = location.map(|l| LocationPoint::new(l.lat, l.lng, batch.scan_time()));
        self.store.save_batch(&saved_batch, location.as_ref()).await?;
        debug!(
            "Merged {} devices, {known_devices_count} already known",
            saved_batch.len()
        );

        Ok(SaveResult {
            saved_batch,
            known_devices_count,
        })
    }
}
