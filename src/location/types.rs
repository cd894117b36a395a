use std::time::SystemTime;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Accuracy and speed use a negative value when the source did not report them.
pub const UNKNOWN: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub horizontal_accuracy: f64,
    /// Meters per second
    pub speed: f64,
    pub timestamp: SystemTime,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: SystemTime) -> Self {
        PositionFix {
            latitude,
            longitude,
            horizontal_accuracy: UNKNOWN,
            speed: UNKNOWN,
            timestamp,
        }
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &PositionFix) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().atan2((1.0 - a).sqrt())
    }

    pub fn speed_kmh(&self) -> Option<f64> {
        (self.speed >= 0.0).then(|| self.speed * 3.6)
    }

    pub fn accuracy(&self) -> Option<f64> {
        (self.horizontal_accuracy >= 0.0).then_some(self.horizontal_accuracy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationStatus {
    pub authorization: AuthorizationStatus,
    pub is_tracking: bool,
    pub latest: Option<PositionFix>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(latitude: f64, longitude: f64) -> PositionFix {
        PositionFix::new(latitude, longitude, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn distance_of_small_offsets_at_the_equator() {
        let origin = fix(0.0, 0.0);

        let near = origin.distance_to(&fix(0.0, 0.00003));
        assert!((near - 3.336).abs() < 0.01, "{}", near);

        let far = origin.distance_to(&fix(0.0, 0.0001));
        assert!((far - 11.12).abs() < 0.01, "{}", far);
    }

    #[test]
    fn distance_is_symmetric_and_zero_for_same_point() {
        let a = fix(52.3676, 4.9041);
        let b = fix(51.9244, 4.4777);

        assert_eq!(a.distance_to(&a), 0.0);
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
        // Amsterdam to Rotterdam, roughly 57 km
        assert!((a.distance_to(&b) - 57_000.0).abs() < 1_000.0);
    }

    #[test]
    fn unknown_values_are_hidden() {
        let mut position = fix(0.0, 0.0);
        assert_eq!(position.speed_kmh(), None);
        assert_eq!(position.accuracy(), None);

        position.speed = 10.0;
        position.horizontal_accuracy = 4.0;
        assert_eq!(position.speed_kmh(), Some(36.0));
        assert_eq!(position.accuracy(), Some(4.0));
    }
}
