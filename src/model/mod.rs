use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::models::Triple;

pub mod artifact;
pub mod eval;

/// Everything a model needs to price one fixture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchContext {
    pub league_id: i64,
    pub season: i32,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff_utc: DateTime<Utc>,
}

/// Trait every 1X2 probability source must implement.
///
/// Implementations may fail for any reason (unknown artifact, missing team
/// stats, league mismatch); callers turn the error into a per-item
/// `model_error` and carry on.
pub trait ProbabilitySource: Send + Sync {
    fn predict(&self, artifact: &str, ctx: &MatchContext) -> Result<Triple>;
}

/// Fixed-output source for pipeline tests.
#[cfg(test)]
pub struct StaticSource(pub Result<Triple, String>);

#[cfg(test)]
impl ProbabilitySource for StaticSource {
    fn predict(&self, _artifact: &str, _ctx: &MatchContext) -> Result<Triple> {
        self.0.clone().map_err(|e| anyhow::anyhow!(e))
    }
}
