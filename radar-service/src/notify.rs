use tracing::{info, warn};

use radar_domain::state::NotificationContent;

use crate::matcher::ProfileResult;

/// Conditions that leave the scanner blind, reported once per streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Warning {
    LocationIsTurnedOff,
    BluetoothIsTurnedOff,
    BackgroundLocationIsRestricted,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::LocationIsTurnedOff => write!(
                f,
                "The BLE scanner did not return anything. This may happen if geolocation is turned off at the system level."
            ),
            Warning::BluetoothIsTurnedOff => {
                write!(f, "Bluetooth is turned off or not available on this device")
            }
            Warning::BackgroundLocationIsRestricted => {
                write!(f, "Can't scan BLE without background location permission")
            }
        }
    }
}

impl std::error::Error for Warning {}

impl Warning {
    pub fn content(&self) -> NotificationContent {
        match self {
            Warning::LocationIsTurnedOff => NotificationContent::LocationIsTurnedOff,
            Warning::BluetoothIsTurnedOff => NotificationContent::BluetoothIsTurnedOff,
            Warning::BackgroundLocationIsRestricted => {
                NotificationContent::BackgroundLocationIsRestricted
            }
        }
    }
}

/// User-facing notification surface.
pub trait Notifier: Send + Sync {
    /// Replaces the content of the persistent status notification.
    fn update_content(&self, content: NotificationContent);
    fn notify_warning(&self, warning: Warning);
    fn notify_profiles(&self, results: &[ProfileResult]);
}

/// Notifier for terminals: everything goes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn update_content(&self, content: NotificationContent) {
        info!("Status: {content}");
    }

    fn notify_warning(&self, warning: Warning) {
        warn!("{warning}");
    }

    fn notify_profiles(&self, results: &[ProfileResult]) {
        for result in results {
            info!(
                "Profile \"{}\" matched {} device(s): {}",
                result.profile_name,
                result.matched_addresses.len(),
                result.matched_addresses.join(", ")
            );
        }
    }
}
