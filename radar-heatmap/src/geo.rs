use std::{
    f64::consts::{FRAC_PI_2, FRAC_PI_4},
    hash::{Hash, Hasher},
};

use radar_domain::location::LocationPoint;

use crate::PADDING_METERS;

pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// Web-Mercator is undefined at the poles; latitudes are clamped to this.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Web-Mercator metres, x towards east and y towards north.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    pub fn project(&self) -> Projected {
        let lat = self.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        Projected {
            x: EARTH_RADIUS_M * self.lng.to_radians(),
            y: EARTH_RADIUS_M * (FRAC_PI_4 + lat / 2.0).tan().ln(),
        }
    }
}

impl Projected {
    pub fn unproject(&self) -> GeoPoint {
        GeoPoint {
            lat: (2.0 * (self.y / EARTH_RADIUS_M).exp().atan() - FRAC_PI_2).to_degrees(),
            lng: (self.x / EARTH_RADIUS_M).to_degrees(),
        }
    }
}

/// Projected metres per ground metre at `lat`.
pub fn scale_at(lat: f64) -> f64 {
    1.0 / lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians().cos()
}

/// One location sample drawn as a blob of `radius_m` ground metres.
///
/// Equality and hashing are bitwise so points can key the render cache.
#[derive(Debug, Clone, Copy)]
pub struct HeatPoint {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
}

impl HeatPoint {
    pub fn new(lat: f64, lng: f64, radius_m: f64) -> HeatPoint {
        HeatPoint { lat, lng, radius_m }
    }

    pub fn at(lat: f64, lng: f64) -> HeatPoint {
        HeatPoint::new(lat, lng, PADDING_METERS)
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn projected(&self) -> Projected {
        self.position().project()
    }

    pub fn projected_radius(&self) -> f64 {
        self.radius_m * scale_at(self.lat)
    }

    fn bits(&self) -> [u64; 3] {
        [self.lat.to_bits(), self.lng.to_bits(), self.radius_m.to_bits()]
    }
}

impl PartialEq for HeatPoint {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for HeatPoint {}

impl Hash for HeatPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl From<LocationPoint> for HeatPoint {
    fn from(location: LocationPoint) -> Self {
        HeatPoint::at(location.lat, location.lng)
    }
}

impl From<&LocationPoint> for HeatPoint {
    fn from(location: &LocationPoint) -> Self {
        HeatPoint::at(location.lat, location.lng)
    }
}

#[cfg(test)]
mod test {
    use super::{EARTH_RADIUS_M, GeoPoint, HeatPoint, scale_at};

    #[test]
    fn origin_projects_to_zero() {
        let p = GeoPoint::new(0.0, 0.0).project();
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
    }

    #[test]
    fn antimeridian_is_half_circumference() {
        let p = GeoPoint::new(0.0, 180.0).project();
        assert!((p.x - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1e-6);
    }

    #[test]
    fn projection_round_trips() {
        for (lat, lng) in [(52.52, 13.405), (-33.86, 151.21), (64.1, -21.9)] {
            let back = GeoPoint::new(lat, lng).project().unproject();
            assert!((back.lat - lat).abs() < 1e-9);
            assert!((back.lng - lng).abs() < 1e-9);
        }
    }

    #[test]
    fn scale_grows_with_latitude() {
        assert!((scale_at(0.0) - 1.0).abs() < 1e-12);
        assert!((scale_at(60.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn points_compare_by_value() {
        assert_eq!(HeatPoint::at(1.0, 2.0), HeatPoint::new(1.0, 2.0, 50.0));
        assert_ne!(HeatPoint::at(1.0, 2.0), HeatPoint::at(1.0, 2.000001));
    }
}
