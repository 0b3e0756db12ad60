use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::models::{ScoreMetrics, Side, Triple};
use crate::db::Database;

use super::error::ItemError;

const LOGLOSS_EPS: f64 = 1e-15;

/// Brier, log-loss and top-1 correctness of `p` against the realised outcome.
pub fn score_metrics(p: &Triple, outcome: Side) -> ScoreMetrics {
    let brier = Side::ALL
        .iter()
        .map(|&s| {
            let y = if s == outcome { 1.0 } else { 0.0 };
            (p.get(s) - y).powi(2)
        })
        .sum();
    let logloss = -p.get(outcome).clamp(LOGLOSS_EPS, 1.0).ln();
    let top1_acc = if p.argmax() == outcome { 1.0 } else { 0.0 };
    ScoreMetrics {
        brier,
        logloss,
        top1_acc,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Outcome written to `records` rows, `scored` of which had a model triple
    Scored { records: usize, scored: usize },
    NotApplicable,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BackfillSummary {
    pub fixtures: usize,
    pub records: usize,
    pub scored: usize,
    pub not_applicable: usize,
    pub failed: usize,
}

/// Attaches real results and metrics to audit records of finished fixtures.
#[derive(Clone)]
pub struct MetricsBackfiller {
    db: Database,
}

impl MetricsBackfiller {
    pub fn new(db: Database) -> Self {
        MetricsBackfiller { db }
    }

    pub fn backfill_fixture(&self, fixture_id: i64, now: DateTime<Utc>) -> Result<BackfillOutcome> {
        let result = match self.db.get_fixture(fixture_id)?.and_then(|f| f.result()) {
            Some(r) => r,
            None => {
                debug!("Fixture {}: {}", fixture_id, ItemError::MetricsNotApplicable);
                return Ok(BackfillOutcome::NotApplicable);
            }
        };

        let records = self.db.list_audit_predictions_for_fixture(fixture_id)?;
        let mut written = 0;
        let mut scored = 0;
        for rec in &records {
            let metrics = rec.p_model.map(|p| score_metrics(&p, result.outcome));
            let applied = self.db.set_audit_outcome(
                &rec.event_id,
                &rec.artifact_filename,
                &result,
                rec.p_model.as_ref(),
                metrics.as_ref(),
                now,
            )?;
            if !applied {
                // re-evaluated meanwhile; that write scored itself or the next pass will
                debug!(
                    "Record {} / {} changed while scoring, skipped",
                    rec.event_id, rec.artifact_filename
                );
                continue;
            }
            written += 1;
            if metrics.is_some() {
                scored += 1;
            }
        }

        debug!(
            "Fixture {} finished {}-{} ({}): {} records, {} scored",
            fixture_id,
            result.goals_home,
            result.goals_away,
            result.outcome,
            written,
            scored
        );
        Ok(BackfillOutcome::Scored {
            records: written,
            scored,
        })
    }

    /// Backfill every finished fixture still missing outcome or metrics, or
    /// every referenced finished fixture when `all` is set.
    pub fn run_pending(&self, all: bool, now: DateTime<Utc>) -> Result<BackfillSummary> {
        let fixture_ids = self.db.list_fixtures_pending_backfill(all)?;
        self.run_for(&fixture_ids, now)
    }

    pub fn run_for(&self, fixture_ids: &[i64], now: DateTime<Utc>) -> Result<BackfillSummary> {
        let mut summary = BackfillSummary::default();
        for &id in fixture_ids {
            summary.fixtures += 1;
            match self.backfill_fixture(id, now) {
                Ok(BackfillOutcome::Scored { records, scored }) => {
                    summary.records += records;
                    summary.scored += scored;
                }
                Ok(BackfillOutcome::NotApplicable) => summary.not_applicable += 1,
                Err(e) => {
                    warn!("Backfill of fixture {} failed: {:#}", id, e);
                    summary.failed += 1;
                }
            }
        }
        if summary.fixtures > 0 {
            info!(
                "Backfill: {} fixtures, {} records, {} scored, {} failed",
                summary.fixtures, summary.records, summary.scored, summary.failed
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        AuditPredictionRecord, Fixture, MatchConfidence, OddsQuote, RecordStatus,
    };
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_brier_bounds() {
        let certain = score_metrics(&Triple::new(1.0, 0.0, 0.0), Side::Home);
        assert_relative_eq!(certain.brier, 0.0, epsilon = 1e-12);
        assert_relative_eq!(certain.logloss, 0.0, epsilon = 1e-12);
        assert_eq!(certain.top1_acc, 1.0);

        let third = 1.0 / 3.0;
        let uniform = score_metrics(&Triple::new(third, third, third), Side::Draw);
        assert_relative_eq!(uniform.brier, 0.667, epsilon = 1e-3);
        assert_relative_eq!(uniform.logloss, 3f64.ln(), epsilon = 1e-9);
        // tie goes to H, so a uniform forecast never "hits" a draw
        assert_eq!(uniform.top1_acc, 0.0);

        let wrong = score_metrics(&Triple::new(1.0, 0.0, 0.0), Side::Away);
        assert_relative_eq!(wrong.brier, 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrong.logloss, -(1e-15f64).ln(), epsilon = 1e-9);
    }

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 26, 12, 30, 0).unwrap()
    }

    fn fixture(finished: bool) -> Fixture {
        Fixture {
            fixture_id: 55,
            league_id: 39,
            season: 2024,
            kickoff_utc: kickoff(),
            home_team_id: 1,
            away_team_id: 2,
            is_finished: finished,
            goals_home: finished.then_some(0),
            goals_away: finished.then_some(2),
        }
    }

    fn record(event_id: &str, p_model: Option<Triple>) -> AuditPredictionRecord {
        AuditPredictionRecord {
            event_id: event_id.into(),
            artifact_filename: "a.json".into(),
            sport_key: "soccer_epl".into(),
            kickoff_utc: kickoff(),
            captured_at_utc: None,
            bookmaker: None,
            market: None,
            league_id: Some(39),
            season: Some(2024),
            fixture_id: Some(55),
            home_team_id: Some(1),
            away_team_id: Some(2),
            match_confidence: MatchConfidence::Exact,
            odds: OddsQuote::default(),
            p_mkt: None,
            p_model,
            best_side: None,
            best_ev: None,
            status: if p_model.is_some() { RecordStatus::Ok } else { RecordStatus::Incomplete },
            reason: None,
            result: None,
            metrics: None,
            created_at_utc: None,
            updated_at_utc: None,
        }
    }

    #[test]
    fn test_unfinished_fixture_is_not_applicable() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_fixture(&fixture(false)).unwrap();
        db.upsert_audit_prediction(&record("e1", Some(Triple::new(0.2, 0.3, 0.5))), kickoff())
            .unwrap();
        let bf = MetricsBackfiller::new(db.clone());
        assert_eq!(bf.backfill_fixture(55, kickoff()).unwrap(), BackfillOutcome::NotApplicable);
        assert!(db.get_audit_prediction("e1", "a.json").unwrap().unwrap().metrics.is_none());
        assert!(db.list_fixtures_pending_backfill(false).unwrap().is_empty());
    }

    #[test]
    fn test_backfill_writes_outcome_and_metrics() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_fixture(&fixture(true)).unwrap();
        db.upsert_audit_prediction(&record("e1", Some(Triple::new(0.2, 0.3, 0.5))), kickoff())
            .unwrap();
        db.upsert_audit_prediction(&record("e2", None), kickoff()).unwrap();

        let bf = MetricsBackfiller::new(db.clone());
        let now = kickoff() + Duration::hours(3);
        let summary = bf.run_pending(false, now).unwrap();
        assert_eq!((summary.fixtures, summary.records, summary.scored), (1, 2, 1));

        let scored = db.get_audit_prediction("e1", "a.json").unwrap().unwrap();
        assert_eq!(scored.result.unwrap().outcome, Side::Away);
        let m = scored.metrics.unwrap();
        assert_relative_eq!(m.brier, 0.04 + 0.09 + 0.25, epsilon = 1e-9);
        assert_relative_eq!(m.logloss, -(0.5f64).ln(), epsilon = 1e-9);
        assert_eq!(m.top1_acc, 1.0);

        let unscored = db.get_audit_prediction("e2", "a.json").unwrap().unwrap();
        assert_eq!(unscored.result.unwrap().goals_away, 2);
        assert!(unscored.metrics.is_none());

        // nothing pending on the second pass; a forced pass rewrites the same values
        assert_eq!(bf.run_pending(false, now).unwrap().fixtures, 0);
        bf.run_pending(true, now).unwrap();
        let again = db.get_audit_prediction("e1", "a.json").unwrap().unwrap();
        assert_eq!(again.metrics, scored.metrics);
    }

    #[test]
    fn test_metrics_not_written_over_a_newer_model_triple() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_fixture(&fixture(true)).unwrap();
        db.upsert_audit_prediction(&record("e1", Some(Triple::new(0.2, 0.3, 0.5))), kickoff())
            .unwrap();

        // a scoring pass reads the record...
        let read = db.list_audit_predictions_for_fixture(55).unwrap().remove(0);
        let result = fixture(true).result().unwrap();
        let stale = score_metrics(&read.p_model.unwrap(), result.outcome);

        // ...an evaluation rewrites it before the scores land
        let newer = Triple::new(0.6, 0.3, 0.1);
        db.upsert_audit_prediction(&record("e1", Some(newer)), kickoff() + Duration::minutes(1))
            .unwrap();

        let applied = db
            .set_audit_outcome("e1", "a.json", &result, read.p_model.as_ref(), Some(&stale), kickoff())
            .unwrap();
        assert!(!applied);
        assert!(db.get_audit_prediction("e1", "a.json").unwrap().unwrap().metrics.is_none());

        // the next pass scores the triple that is actually stored
        let bf = MetricsBackfiller::new(db.clone());
        assert_eq!(
            bf.backfill_fixture(55, kickoff() + Duration::hours(3)).unwrap(),
            BackfillOutcome::Scored { records: 1, scored: 1 }
        );
        let rec = db.get_audit_prediction("e1", "a.json").unwrap().unwrap();
        assert_eq!(rec.p_model, Some(newer));
        let m = rec.metrics.unwrap();
        assert_relative_eq!(m.brier, score_metrics(&newer, Side::Away).brier, epsilon = 1e-12);
        assert_eq!(m.top1_acc, 0.0);
    }
}
