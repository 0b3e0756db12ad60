use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::db::models::ArtifactMetrics;
use crate::db::Database;
use crate::pipeline::backfill::score_metrics;

use super::{MatchContext, ProbabilitySource};

/// Which finished fixtures an artifact is scored on.
#[derive(Debug, Clone, Default)]
pub struct EvalFilter {
    pub league_id: Option<i64>,
    pub season: Option<i32>,
    pub limit: Option<i64>,
    pub notes: Option<String>,
}

/// Score `artifact` over finished catalog fixtures and append the averaged
/// Brier / log-loss / top-1 to `artifact_metrics`.
///
/// Fixtures the source cannot price (missing stats, wrong league) are skipped
/// and counted in the notes.
pub fn evaluate_artifact(
    db: &Database,
    source: &dyn ProbabilitySource,
    artifact: &str,
    filter: &EvalFilter,
) -> Result<ArtifactMetrics> {
    let fixtures = db.list_finished_fixtures(filter.league_id, filter.season, filter.limit)?;
    if fixtures.is_empty() {
        bail!("no finished fixtures found for given filters");
    }

    let (mut brier, mut logloss, mut top1) = (0.0, 0.0, 0.0);
    let mut n: i64 = 0;
    let mut skipped = 0usize;
    let mut first_kickoff = None;
    let mut last_kickoff = None;

    for f in &fixtures {
        let Some(result) = f.result() else { continue };
        let ctx = MatchContext {
            league_id: f.league_id,
            season: f.season,
            home_team_id: f.home_team_id,
            away_team_id: f.away_team_id,
            kickoff_utc: f.kickoff_utc,
        };
        let p = match source.predict(artifact, &ctx) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: skipping fixture {}: {:#}", artifact, f.fixture_id, e);
                skipped += 1;
                continue;
            }
        };

        let m = score_metrics(&p, result.outcome);
        brier += m.brier;
        logloss += m.logloss;
        top1 += m.top1_acc;
        n += 1;
        first_kickoff.get_or_insert(f.kickoff_utc);
        last_kickoff = Some(f.kickoff_utc);
    }

    if n == 0 {
        bail!("artifact {} could not price any of {} fixtures", artifact, fixtures.len());
    }

    let notes = match (&filter.notes, skipped) {
        (Some(text), 0) => Some(text.clone()),
        (Some(text), k) => Some(format!("{} (skipped {})", text, k)),
        (None, 0) => None,
        (None, k) => Some(format!("skipped {}", k)),
    };

    let metrics = ArtifactMetrics {
        artifact_id: artifact.to_string(),
        league_id: filter.league_id,
        season: filter.season,
        n_games: n,
        brier: brier / n as f64,
        logloss: logloss / n as f64,
        top1_acc: top1 / n as f64,
        eval_from_utc: first_kickoff,
        eval_to_utc: last_kickoff,
        notes,
    };
    db.insert_artifact_metrics(&metrics)?;

    info!(
        "Evaluated {} on {} games: brier={:.4} logloss={:.4} top1={:.3}",
        artifact, n, metrics.brier, metrics.logloss, metrics.top1_acc
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Fixture, Triple};
    use crate::model::StaticSource;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn seed(db: &Database) {
        let base = Utc.with_ymd_and_hms(2024, 8, 17, 14, 0, 0).unwrap();
        for (id, gh, ga) in [(1, 2, 0), (2, 1, 1), (3, 0, 3)] {
            db.upsert_fixture(&Fixture {
                fixture_id: id,
                league_id: 39,
                season: 2024,
                kickoff_utc: base + Duration::days(id * 7),
                home_team_id: 10,
                away_team_id: 20,
                is_finished: true,
                goals_home: Some(gh),
                goals_away: Some(ga),
            })
            .unwrap();
        }
    }

    #[test]
    fn test_averages_over_finished_fixtures() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let source = StaticSource(Ok(Triple::new(0.5, 0.3, 0.2)));

        let m = evaluate_artifact(&db, &source, "epl.json", &EvalFilter::default()).unwrap();
        assert_eq!(m.n_games, 3);
        // H: 0.25+0.09+0.04, D: 0.25+0.49+0.04, A: 0.25+0.09+0.64
        assert_relative_eq!(m.brier, (0.38 + 0.78 + 0.98) / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.top1_acc, 1.0 / 3.0, epsilon = 1e-9);
        assert!(m.eval_from_utc < m.eval_to_utc);

        let stored = db.list_artifact_metrics("epl.json").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].n_games, 3);
    }

    #[test]
    fn test_unpriceable_artifact_fails() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let source = StaticSource(Err("no stats".into()));
        assert!(evaluate_artifact(&db, &source, "epl.json", &EvalFilter::default()).is_err());
        assert!(db.list_artifact_metrics("epl.json").unwrap().is_empty());
    }

    #[test]
    fn test_empty_selection_fails() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let source = StaticSource(Ok(Triple::new(0.5, 0.3, 0.2)));
        let filter = EvalFilter {
            league_id: Some(140),
            ..Default::default()
        };
        assert!(evaluate_artifact(&db, &source, "epl.json", &filter).is_err());
    }
}
