use radar_discovery::ScanError;
use radar_sinks::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Bluetooth is turned off or not available on this device")]
    HardwareUnavailable,
    #[error("BLE Scan failed with error code: {code} ({description})")]
    ScanFailure { code: i32, description: &'static str },
    #[error("{0}")]
    PermissionDenied(String),
    #[error("failed to persist scan results")]
    PersistenceFailure(#[from] StoreError),
    #[error("{0}")]
    UnexpectedFailure(String),
    #[error("Ble Scan service has been stopped after {0} errors")]
    FailureLimitReached(u32),
}

impl ServiceError {
    /// Failures that stop the scanner outright instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::PermissionDenied(_) | ServiceError::FailureLimitReached(_)
        )
    }
}

impl From<ScanError> for ServiceError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::HardwareUnavailable => ServiceError::HardwareUnavailable,
            ScanError::ScanFailure { code, description } => {
                ServiceError::ScanFailure { code, description }
            }
            other => ServiceError::UnexpectedFailure(other.to_string()),
        }
    }
}
