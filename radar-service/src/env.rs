use chrono::Utc;

use radar_domain::location::LocationPoint;

/// Host permission and system-setting state that gates scanning.
pub trait Capabilities: Send + Sync {
    fn required_permissions_granted(&self) -> bool;
    fn background_location_granted(&self) -> bool;
    /// System location services are switched on.
    fn location_available(&self) -> bool;
}

/// Desktop hosts have no permission model, so everything is granted.
#[derive(Debug, Clone, Copy)]
pub struct GrantedCapabilities;

impl Capabilities for GrantedCapabilities {
    fn required_permissions_granted(&self) -> bool {
        true
    }

    fn background_location_granted(&self) -> bool {
        true
    }

    fn location_available(&self) -> bool {
        true
    }
}

pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<LocationPoint>;
}

/// Always reports the same coordinates, or nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation {
    position: Option<(f64, f64)>,
}

impl FixedLocation {
    pub fn new(lat: f64, lng: f64) -> FixedLocation {
        FixedLocation {
            position: Some((lat, lng)),
        }
    }

    pub fn none() -> FixedLocation {
        FixedLocation::default()
    }
}

impl LocationProvider for FixedLocation {
    fn current_location(&self) -> Option<LocationPoint> {
        self.position
            .map(|(lat, lng)| LocationPoint::new(lat, lng, Utc::now()))
    }
}
