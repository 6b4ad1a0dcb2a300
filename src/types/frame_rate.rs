//! Frame rate control for the capture throttle

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Target emission rate for accepted camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRate {
    /// At most this many frames per second
    Max(u32),

    /// At least this many milliseconds between accepted frames
    IntervalMs(u64),
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate::IntervalMs(200)
    }
}

impl FrameRate {
    /// Minimum time between two accepted frames.
    ///
    /// A zero rate is clamped to one frame per second.
    pub fn interval(self) -> Duration {
        match self {
            FrameRate::Max(hz) => Duration::from_millis(1000 / u64::from(hz.max(1))),
            FrameRate::IntervalMs(ms) => Duration::from_millis(ms.max(1)),
        }
    }

    /// Published fps estimate: `1000 / interval_ms`.
    ///
    /// This is a static function of the configured throttle, not a measurement.
    pub fn fps_estimate(self) -> u32 {
        let ms = self.interval().as_millis().max(1);
        u32::try_from(1000 / ms).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_five_hz() {
        let rate = FrameRate::default();
        assert_eq!(rate.interval(), Duration::from_millis(200));
        assert_eq!(rate.fps_estimate(), 5);
    }

    #[test]
    fn max_and_interval_agree() {
        assert_eq!(FrameRate::Max(5).interval(), FrameRate::IntervalMs(200).interval());
        assert_eq!(FrameRate::Max(10).fps_estimate(), 10);
        assert_eq!(FrameRate::IntervalMs(3000).fps_estimate(), 0);
    }

    #[test]
    fn zero_values_are_clamped() {
        assert_eq!(FrameRate::Max(0).interval(), Duration::from_secs(1));
        assert_eq!(FrameRate::IntervalMs(0).interval(), Duration::from_millis(1));
    }
}
