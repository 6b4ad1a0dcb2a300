//! Frame throttling

use std::time::Duration;
use tokio::time::Instant;

use crate::types::FrameRate;

/// Minimum-interval gate applied to raw frame capture timestamps.
///
/// The first frame always passes. Afterwards a frame passes only if its capture
/// time is at least one interval after the last accepted frame; anything earlier,
/// including out-of-order timestamps, is rejected before any decoding happens.
#[derive(Debug, Clone)]
pub struct FrameGate {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl FrameGate {
    /// Create a gate for the given rate
    pub fn new(rate: FrameRate) -> Self {
        Self { interval: rate.interval(), last_accepted: None }
    }

    /// Decide whether a frame captured at `captured_at` is accepted
    pub fn admit(&mut self, captured_at: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            match captured_at.checked_duration_since(last) {
                Some(elapsed) if elapsed >= self.interval => {}
                _ => return false,
            }
        }
        self.last_accepted = Some(captured_at);
        true
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn burst_within_interval_admits_one() {
        let mut gate = FrameGate::new(FrameRate::default());
        let base = Instant::now();

        let accepted =
            (0..10).filter(|i| gate.admit(base + Duration::from_millis(i * 20))).count();

        assert_eq!(accepted, 1);
    }

    #[test]
    fn frame_exactly_one_interval_later_passes() {
        let mut gate = FrameGate::new(FrameRate::IntervalMs(200));
        let base = Instant::now();
        assert!(gate.admit(base));
        assert!(!gate.admit(base + Duration::from_millis(199)));
        assert!(gate.admit(base + Duration::from_millis(200)));
    }

    #[test]
    fn out_of_order_frames_are_rejected() {
        let mut gate = FrameGate::new(FrameRate::IntervalMs(200));
        let base = Instant::now() + Duration::from_secs(10);
        assert!(gate.admit(base));
        assert!(!gate.admit(base - Duration::from_secs(5)));
    }

    #[test]
    fn rejected_frames_do_not_move_the_window() {
        let mut gate = FrameGate::new(FrameRate::IntervalMs(200));
        let base = Instant::now();
        assert!(gate.admit(base));
        assert!(!gate.admit(base + Duration::from_millis(150)));
        assert!(gate.admit(base + Duration::from_millis(210)));
    }

    proptest! {
        #[test]
        fn accepted_frames_are_never_closer_than_the_interval(
            mut offsets in prop::collection::vec(0u64..5_000, 1..200),
            interval_ms in 1u64..500
        ) {
            offsets.sort_unstable();
            let mut gate = FrameGate::new(FrameRate::IntervalMs(interval_ms));
            let base = Instant::now();

            let accepted: Vec<u64> =
                offsets.iter().copied().filter(|ms| gate.admit(base + Duration::from_millis(*ms))).collect();

            prop_assert_eq!(accepted.first(), offsets.first());
            for pair in accepted.windows(2) {
                prop_assert!(pair[1] - pair[0] >= interval_ms);
            }
        }
    }
}
