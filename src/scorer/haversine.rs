// src/scorer/haversine.rs

/// Mean Earth radius in km, per spec §4.4 step 4.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two `(latitude, longitude)` points in
/// decimal degrees, in kilometres. Pure and symmetric — callers decide
/// separately whether a point should be treated as "unknown" (spec §9:
/// coordinates of exactly `(0,0)` are ambiguous and are special-cased by
/// the scorer *before* calling this function, not inside it, so this
/// function stays trivially testable against spec §8 invariant 6).
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;

    if (lat1, lon1) == (lat2, lon2) {
        return 0.0;
    }

    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1_r.cos() * lat2_r.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distance_to_self_is_zero() {
        assert_eq!(haversine_km((40.0, -74.0), (40.0, -74.0)), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = (40.7128, -74.0060);
        let b = (34.0522, -118.2437);
        let d1 = haversine_km(a, b);
        let d2 = haversine_km(b, a);
        assert!((d1 - d2).abs() < 0.001);
    }

    #[test]
    fn nyc_to_la_is_approximately_right() {
        let nyc = (40.7128, -74.0060);
        let la = (34.0522, -118.2437);
        let d = haversine_km(nyc, la);
        // Known great-circle distance is roughly 3935-3945 km.
        assert!((d - 3940.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn closer_points_have_smaller_distance() {
        let client = (41.0, -74.0);
        let near = (40.0, -74.0);
        let far = (34.0, -118.0);
        assert!(haversine_km(client, near) < haversine_km(client, far));
    }

    proptest! {
        /// Spec §8 invariant 6: haversine is symmetric for any two points.
        #[test]
        fn symmetric_for_any_coordinates(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let d1 = haversine_km((lat1, lon1), (lat2, lon2));
            let d2 = haversine_km((lat2, lon2), (lat1, lon1));
            prop_assert!((d1 - d2).abs() < 1e-6);
        }

        /// Distance never exceeds half the great-circle circumference.
        #[test]
        fn bounded_by_half_circumference(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let d = haversine_km((lat1, lon1), (lat2, lon2));
            prop_assert!(d <= EARTH_RADIUS_KM * std::f64::consts::PI + 1e-6);
            prop_assert!(d >= 0.0);
        }
    }
}
