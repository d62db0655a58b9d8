#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Bluetooth is turned off or not available on this device")]
    HardwareUnavailable,
    #[error("BLE Scan failed with error code: {code} ({description})")]
    ScanFailure { code: i32, description: &'static str },
    #[error("BLE Scan failed because previous scan is not finished")]
    AlreadyScanning,
    #[error("bluetooth backend error: {0}")]
    Backend(String),
}

impl ScanError {
    pub fn scan_failure(code: i32) -> ScanError {
        ScanError::ScanFailure {
            code,
            description: describe_failure(code),
        }
    }
}

/// Maps the platform's scan failure codes to readable text.
pub fn describe_failure(code: i32) -> &'static str {
    match code {
        1 => "scan already started",
        2 => "application registration failed",
        3 => "internal error",
        4 => "feature unsupported",
        5 => "out of hardware resources",
        6 => "scanning too frequently",
        _ => "unknown error",
    }
}
