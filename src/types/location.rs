//! Location fix types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A position sample as reported by the platform location service
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters, `None` when the platform has no estimate
    pub accuracy: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl PlatformFix {
    /// Create a fix stamped with the current time
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f32>) -> Self {
        Self { latitude, longitude, accuracy, timestamp: Utc::now() }
    }
}

/// The most recent GPS sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Meters, 0 when unknown
    pub accuracy: f64,
    pub sampled_at: DateTime<Utc>,
}

impl LocationFix {
    /// A fix with no position information, used when nothing has been sampled yet
    pub fn unknown() -> Self {
        Self { latitude: 0.0, longitude: 0.0, accuracy: 0.0, sampled_at: DateTime::<Utc>::UNIX_EPOCH }
    }
}

impl From<PlatformFix> for LocationFix {
    fn from(fix: PlatformFix) -> Self {
        let accuracy = match fix.accuracy {
            Some(meters) if meters.is_finite() && meters >= 0.0 => f64::from(meters),
            _ => 0.0,
        };

        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy,
            sampled_at: fix.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_invalid_accuracy_reports_zero() {
        for accuracy in [None, Some(f32::NAN), Some(-3.0), Some(f32::INFINITY)] {
            let fix = LocationFix::from(PlatformFix::new(37.1234, -122.1234, accuracy));
            assert_eq!(fix.accuracy, 0.0, "accuracy {:?} should map to 0", accuracy);
            assert_eq!(fix.latitude, 37.1234);
            assert_eq!(fix.longitude, -122.1234);
        }
    }

    #[test]
    fn valid_accuracy_is_kept() {
        let fix = LocationFix::from(PlatformFix::new(1.0, 2.0, Some(5.5)));
        assert_eq!(fix.accuracy, 5.5);
    }
}
