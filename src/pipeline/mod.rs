pub mod backfill;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod intel;
pub mod market;
pub mod recorder;
pub mod resolver;

pub use backfill::MetricsBackfiller;
pub use engine::{EngineSettings, PipelineEngine};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};

/// Upper bound for every hour window (intel horizon, cycle horizon, fixture
/// tolerance). 30 days.
pub const MAX_WINDOW_HOURS: i64 = 720;

pub fn hours(h: i64) -> Result<TimeDelta> {
    TimeDelta::try_hours(h).with_context(|| format!("{} hours is out of range", h))
}

/// `at + h` hours, or an error when the instant is not representable.
pub fn shift_hours(at: DateTime<Utc>, h: i64) -> Result<DateTime<Utc>> {
    at.checked_add_signed(hours(h)?)
        .with_context(|| format!("{} + {}h is out of range", at, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_shift_hours_rejects_overflow() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(shift_hours(at, 3).unwrap(), Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        assert!(shift_hours(at, 10_000_000_000).is_err());
        assert!(shift_hours(at, i64::MAX).is_err());
        assert!(hours(i64::MIN).is_err());
    }
}
