use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
pub struct LocationPoint {
    pub lat: f64,
    pub lng: f64,
    pub time: DateTime<Utc>,
}

impl LocationPoint {
    #[must_use]
    pub fn new(lat: f64, lng: f64, time: DateTime<Utc>) -> LocationPoint {
        LocationPoint { lat, lng, time }
    }
}
