use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters, as used by the attendance fence.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both coordinates are finite and inside the WGS84 ranges.
    /// The distance math itself does not check; callers validate input at
    /// the edge and NaN simply propagates.
    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance (haversine) in meters.
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let dphi = (b.latitude - a.latitude).to_radians();
    let dlambda = (b.longitude - a.longitude).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHOOL: GeoPoint = GeoPoint {
        latitude: -6.2088,
        longitude: 106.8456,
    };

    #[test]
    fn zero_distance_to_self() {
        assert_eq!(distance_meters(SCHOOL, SCHOOL), 0.0);
    }

    #[test]
    fn symmetric() {
        let b = GeoPoint::new(-6.2090, 106.8459);
        let ab = distance_meters(SCHOOL, b);
        let ba = distance_meters(b, SCHOOL);
        assert!((ab - ba).abs() < 1e-9);
        assert!(ab > 0.0);
    }

    #[test]
    fn hundredth_degree_latitude_is_about_1113m() {
        let b = GeoPoint::new(SCHOOL.latitude + 0.01, SCHOOL.longitude);
        let d = distance_meters(SCHOOL, b);
        let expected = 1_113.0;
        assert!(
            (d - expected).abs() / expected < 0.05,
            "got {d} m, expected ~{expected} m"
        );
    }

    #[test]
    fn nearby_teacher_is_tens_of_meters_out() {
        let teacher = GeoPoint::new(-6.2090, 106.8459);
        let d = distance_meters(SCHOOL, teacher);
        assert!(d > 10.0 && d < 60.0, "got {d} m");
    }

    #[test]
    fn nan_propagates() {
        let bad = GeoPoint::new(f64::NAN, 106.8);
        assert!(distance_meters(SCHOOL, bad).is_nan());
        assert!(!bad.in_range());
    }
}
