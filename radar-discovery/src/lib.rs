pub mod error;
pub mod local;
pub mod power;
pub mod service_cache;
pub mod session;

use async_trait::async_trait;
use tokio::sync::mpsc;

use radar_domain::scan::ScanDevice;

pub use error::ScanError;

/// What the hardware is asked to listen for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilterSpec {
    /// Report every advertisement.
    Open,
    /// Only report devices advertising one of these service UUIDs.
    Services(Vec<String>),
}

/// One hardware callback delivered during a scan window.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Result(ScanDevice),
    Failed(i32),
}

/// Seam between the scan session and a concrete Bluetooth stack.
///
/// `start_scan` registers for results and hands back the callback stream;
/// `stop_scan` must tear the registration down.
#[async_trait]
pub trait BleBackend: Send + Sync {
    async fn is_enabled(&self) -> bool;
    async fn start_scan(
        &self,
        filter: ScanFilterSpec,
    ) -> Result<mpsc::Receiver<BackendEvent>, ScanError>;
    async fn stop_scan(&self) -> Result<(), ScanError>;
}
