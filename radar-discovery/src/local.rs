use async_trait::async_trait;
use btleplug::api::{
    AddressType, Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, bleuuid::uuid_from_u16,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use radar_domain::{advertisement::Advertisement, scan::ScanDevice};

use crate::{BackendEvent, BleBackend, ScanError, ScanFilterSpec};

const EVENT_BUFFER: usize = 256;

/// Scans with the host's first Bluetooth adapter.
pub struct LocalBackend {
    adapter: Option<Adapter>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl LocalBackend {
    pub async fn new() -> Result<LocalBackend, ScanError> {
        let manager = Manager::new().await.map_err(backend_error)?;
        let mut adapter_list = manager.adapters().await.map_err(backend_error)?;
        if adapter_list.is_empty() {
            warn!("No Bluetooth adapters found");
        }
        Ok(LocalBackend {
            adapter: adapter_list.pop(),
            forwarder: Mutex::new(None),
        })
    }

    fn adapter(&self) -> Result<&Adapter, ScanError> {
        self.adapter.as_ref().ok_or(ScanError::HardwareUnavailable)
    }
}

#[async_trait]
impl BleBackend for LocalBackend {
    async fn is_enabled(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.adapter_info().await.is_ok(),
            None => false,
        }
    }

    async fn start_scan(
        &self,
        filter: ScanFilterSpec,
    ) -> Result<mpsc::Receiver<BackendEvent>, ScanError> {
        let adapter = self.adapter()?.clone();
        let mut events = adapter.events().await.map_err(backend_error)?;

        let services = match filter {
            ScanFilterSpec::Open => vec![],
            ScanFilterSpec::Services(uuids) => uuids.iter().filter_map(|u| parse_uuid(u)).collect(),
        };
        adapter
            .start_scan(ScanFilter { services })
            .await
            .map_err(backend_error)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                match read_device(&adapter, &id).await {
                    Ok(Some(device)) => {
                        if tx.send(BackendEvent::Result(device)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Skipping {id:?}: {e}"),
                }
            }
        });
        if let Some(previous) = self.forwarder.lock().replace(forwarder) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), ScanError> {
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
        self.adapter()?.stop_scan().await.map_err(backend_error)
    }
}

async fn read_device(adapter: &Adapter, id: &PeripheralId) -> Result<Option<ScanDevice>, btleplug::Error> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    Ok(to_scan_device(properties))
}

/// Sightings without a signal strength are dropped.
fn to_scan_device(properties: PeripheralProperties) -> Option<ScanDevice> {
    let rssi = properties.rssi?;
    let raw = Advertisement::new(
        properties.local_name.clone(),
        properties.manufacturer_data.clone(),
    )
    .to_raw();

    let mut device = ScanDevice::new(properties.address.to_string(), rssi, Utc::now())
        .with_services(properties.services.iter().map(Uuid::to_string));
    device.name = properties.local_name;
    device.raw_advertisement = raw;
    device.address_type = properties.address_type.map(|t| match t {
        AddressType::Public => 0,
        AddressType::Random => 1,
    });
    device.device_class = properties.class;
    Some(device)
}

/// Accepts full UUIDs and 16-bit short forms such as `feaa`.
fn parse_uuid(value: &str) -> Option<Uuid> {
    if value.len() == 4
        && let Ok(short) = u16::from_str_radix(value, 16)
    {
        return Some(uuid_from_u16(short));
    }
    match Uuid::parse_str(value) {
        Ok(uuid) => Some(uuid),
        Err(e) => {
            warn!("Ignoring service filter {value}: {e}");
            None
        }
    }
}

fn backend_error(e: btleplug::Error) -> ScanError {
    ScanError::Backend(e.to_string())
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use btleplug::api::{AddressType, BDAddr, PeripheralProperties};

    use super::{parse_uuid, to_scan_device};

    fn properties(rssi: Option<i16>) -> PeripheralProperties {
        let mut properties = PeripheralProperties::default();
        properties.address = BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        properties.address_type = Some(AddressType::Random);
        properties.local_name = Some("Tag".to_string());
        properties.rssi = rssi;
        properties.manufacturer_data = HashMap::from([(0x004C, vec![0x12, 0x19])]);
        properties
    }

    #[test]
    fn properties_become_scan_device() {
        let device = to_scan_device(properties(Some(-63))).unwrap();
        assert_eq!(device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.rssi, -63);
        assert_eq!(device.name.as_deref(), Some("Tag"));
        assert_eq!(device.address_type, Some(1));
        assert_eq!(device.manufacturer_id(), Some(0x004C));
    }

    #[test]
    fn missing_rssi_is_dropped() {
        assert!(to_scan_device(properties(None)).is_none());
    }

    #[test]
    fn short_uuid_expands() {
        assert_eq!(
            parse_uuid("feaa").unwrap().to_string(),
            "0000feaa-0000-1000-8000-00805f9b34fb"
        );
        assert!(parse_uuid("not-a-uuid").is_none());
    }
}
