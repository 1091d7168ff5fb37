//! Authoritative multiplier clock math.
//!
//! The multiplier is a closed-form function of elapsed time,
//! `m(t) = exp(k * t)`, so the crash instant is derived once from the
//! precomputed crash point (`t_crash = ln(crashPoint) / k`) and each tick
//! only compares elapsed time against it. The clock holds no business
//! state and is restarted per round.

use crate::types::floor_cents;

/// Default growth constant per millisecond (~1.82x at 10 seconds).
pub const DEFAULT_GROWTH_RATE_K: f64 = 6.0e-5;

#[derive(Debug, Clone, Copy)]
pub struct MultiplierClock {
    growth_rate_k: f64,
}

impl MultiplierClock {
    pub fn new(growth_rate_k: f64) -> Self {
        Self { growth_rate_k }
    }

    /// Multiplier at `elapsed_ms` since round start, truncated to cents.
    /// Truncation keeps the reported value from overshooting the continuous
    /// curve between ticks.
    pub fn multiplier_at(&self, elapsed_ms: u64) -> f64 {
        let m = (self.growth_rate_k * elapsed_ms as f64).exp();
        floor_cents(m).max(1.0)
    }

    /// Elapsed milliseconds at which the round reaches `crash_point`.
    /// Rounded up so `multiplier_at(crash_time_ms) >= crash_point` holds.
    pub fn crash_time_ms(&self, crash_point: f64) -> u64 {
        (crash_point.max(1.0).ln() / self.growth_rate_k).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_one() {
        let clock = MultiplierClock::new(DEFAULT_GROWTH_RATE_K);
        assert_eq!(clock.multiplier_at(0), 1.0);
    }

    #[test]
    fn multiplier_is_monotone() {
        let clock = MultiplierClock::new(DEFAULT_GROWTH_RATE_K);
        let mut previous = 0.0;
        for t in (0..30_000).step_by(100) {
            let m = clock.multiplier_at(t);
            assert!(m >= previous, "multiplier regressed at t={}", t);
            previous = m;
        }
    }

    #[test]
    fn crash_time_reaches_crash_point() {
        let clock = MultiplierClock::new(DEFAULT_GROWTH_RATE_K);
        for crash_point in [1.0, 1.02, 1.5, 2.0, 3.42, 10.0, 250.0] {
            let t = clock.crash_time_ms(crash_point);
            // The continuous curve has reached the crash point by t_crash;
            // the truncated sample may sit at most one cent below it.
            assert!(
                clock.multiplier_at(t) >= crash_point - 0.01,
                "crash_point {} at t {}",
                crash_point,
                t
            );
            if t > 0 {
                assert!(clock.multiplier_at(t - 1) < crash_point + 0.01);
            }
        }
    }

    #[test]
    fn instant_crash_has_zero_crash_time() {
        let clock = MultiplierClock::new(DEFAULT_GROWTH_RATE_K);
        assert_eq!(clock.crash_time_ms(1.0), 0);
    }
}
