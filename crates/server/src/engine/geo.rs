use shared::{Coordinate, Territory};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h past 1 near antipodes
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

pub fn is_within_territory(point: Coordinate, territory: &Territory) -> bool {
    distance(point, territory.center) <= territory.radius_meters
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUMBAI: Coordinate = Coordinate::new(19.0760, 72.8777);

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let pairs = [
            (MUMBAI, Coordinate::new(19.20, 72.90)),
            (Coordinate::new(-33.8688, 151.2093), Coordinate::new(51.5074, -0.1278)),
            (Coordinate::new(89.9, 0.0), Coordinate::new(-89.9, 180.0)),
        ];
        for (a, b) in pairs {
            assert!((distance(a, b) - distance(b, a)).abs() < 1e-6);
            assert_eq!(distance(a, a), 0.0);
            assert_eq!(distance(b, b), 0.0);
        }
    }

    #[test]
    fn antipodal_points_are_half_circumference() {
        let d = distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        let half = std::f64::consts::PI * EARTH_RADIUS_METERS;
        assert!((d - half).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = distance(Coordinate::new(10.0, 72.0), Coordinate::new(11.0, 72.0));
        assert!((d - 111_195.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn center_is_always_inside() {
        for radius in [0.0, 1.0, 10_000.0] {
            let territory = Territory {
                center: MUMBAI,
                radius_meters: radius,
            };
            assert!(is_within_territory(MUMBAI, &territory));
        }
    }

    #[test]
    fn sample_north_of_mumbai_is_outside_10km() {
        let territory = Territory {
            center: MUMBAI,
            radius_meters: 10_000.0,
        };
        let sample = Coordinate::new(19.20, 72.90);

        let d = distance(sample, MUMBAI);
        assert!(d > 13_900.0 && d < 14_100.0, "got {}", d);
        assert!(!is_within_territory(sample, &territory));
    }

    #[test]
    fn boundary_is_inclusive() {
        let sample = Coordinate::new(19.10, 72.8777);
        let territory = Territory {
            center: MUMBAI,
            radius_meters: distance(sample, MUMBAI),
        };
        assert!(is_within_territory(sample, &territory));
    }
}
