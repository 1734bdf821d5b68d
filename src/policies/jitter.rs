//! # Jitter for periodic schedules.
//!
//! [`Jitter`] spreads scheduled work so that a fleet of agents booted at the
//! same moment does not hit the update server in lockstep.
//!
//! - [`Jitter::None`]: exact delay, predictable (tests)
//! - [`Jitter::Between`]: uniform delay in `[min, max]` (first update check)
//! - [`Jitter::Spread`]: `delay ± delay × fraction` (periodic rescheduling)

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a scheduled delay.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Jitter {
    /// No jitter: use the delay as given.
    #[default]
    None,

    /// Ignore the input and pick uniformly in `[min, max]`.
    Between { min: Duration, max: Duration },

    /// Symmetric spread around the input, e.g. `0.1` for ±10%.
    Spread(f64),
}

impl Jitter {
    /// Startup jitter before the first update cycle (1–10s).
    pub const STARTUP: Jitter = Jitter::Between {
        min: Duration::from_secs(1),
        max: Duration::from_secs(10),
    };

    /// Reschedule jitter for the update interval (±10%).
    pub const INTERVAL: Jitter = Jitter::Spread(0.1);

    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match *self {
            Jitter::None => delay,
            Jitter::Between { min, max } => between(min, max),
            Jitter::Spread(fraction) => spread(delay, fraction),
        }
    }
}

/// Uniform pick in `[min, max]` (arguments may come in either order).
fn between(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let lo_ms = lo.as_millis() as u64;
    let hi_ms = hi.as_millis() as u64;
    if lo_ms == hi_ms {
        return lo;
    }
    Duration::from_millis(rand::rng().random_range(lo_ms..=hi_ms))
}

/// `delay ± delay × fraction`, never negative.
fn spread(delay: Duration, fraction: f64) -> Duration {
    let ms = delay.as_millis() as u64;
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let span = (ms as f64 * fraction) as u64;
    if span == 0 {
        return delay;
    }
    let lo = ms.saturating_sub(span);
    let hi = ms.saturating_add(span);
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}
