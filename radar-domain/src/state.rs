use serde::{Deserialize, Serialize};

/// Lifecycle of the background scanner.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScannerState {
    Disabled,
    Idling,
    Scanning,
    Analyzing,
}

impl ScannerState {
    pub fn is_active(&self) -> bool {
        *self != ScannerState::Disabled
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, ScannerState::Scanning | ScannerState::Analyzing)
    }
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ScannerState::{Analyzing, Disabled, Idling, Scanning};
        let name = match self {
            Disabled => "DISABLED",
            Idling => "IDLING",
            Scanning => "SCANNING",
            Analyzing => "ANALYZING",
        };
        write!(f, "{name}")
    }
}

/// What the persistent status notification currently says. Exactly one is
/// active at a time.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum NotificationContent {
    NoDataYet,
    BluetoothIsTurnedOff,
    LocationIsTurnedOff,
    BackgroundLocationIsRestricted,
    KnownDevicesAround(usize),
    TotalDevicesAround(usize),
}

impl std::fmt::Display for NotificationContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use NotificationContent::{
            BackgroundLocationIsRestricted, BluetoothIsTurnedOff, KnownDevicesAround,
            LocationIsTurnedOff, NoDataYet, TotalDevicesAround,
        };
        match self {
            NoDataYet => write!(f, "no data yet"),
            BluetoothIsTurnedOff => write!(f, "bluetooth is turned off"),
            LocationIsTurnedOff => write!(f, "location is turned off"),
            BackgroundLocationIsRestricted => write!(f, "background location is restricted"),
            KnownDevicesAround(count) => write!(f, "{count} known devices around"),
            TotalDevicesAround(count) => write!(f, "{count} devices around"),
        }
    }
}
