use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::models::{
    AuditPredictionRecord, EventResolution, Fixture, OddsEvent, OddsSnapshot, RecordStatus,
};
use crate::db::Database;

use super::backfill::score_metrics;
use super::evaluator::{EvalContext, EvalReport};

/// Assemble the current-belief row for one (event, artifact).
///
/// Pure: the same inputs always produce the same record. If the fixture is
/// already finished, result and metrics are attached here so a rewritten
/// `p_model` never sits next to metrics computed from an older one.
pub fn build_record(
    event: &OddsEvent,
    artifact: &str,
    resolution: &EventResolution,
    ctx: &EvalContext,
    snapshot: Option<&OddsSnapshot>,
    fixture: Option<&Fixture>,
    report: &EvalReport,
) -> AuditPredictionRecord {
    let evaluation = report.outcome.as_ref().ok();
    let p_model = evaluation.map(|e| e.p_model);
    let result = fixture.and_then(Fixture::result);
    let metrics = match (p_model, result) {
        (Some(p), Some(r)) => Some(score_metrics(&p, r.outcome)),
        _ => None,
    };
    let (status, reason) = match &report.outcome {
        Ok(_) => (RecordStatus::Ok, None),
        Err(e) => (RecordStatus::Incomplete, Some(e.reason())),
    };

    AuditPredictionRecord {
        event_id: event.event_id.clone(),
        artifact_filename: artifact.to_string(),
        sport_key: event.sport_key.clone(),
        kickoff_utc: event.commence_time_utc,
        captured_at_utc: snapshot.map(|s| s.captured_at_utc),
        bookmaker: snapshot.map(|s| s.bookmaker.clone()),
        market: snapshot.map(|s| s.market.clone()),
        league_id: ctx.league_id,
        season: ctx.season,
        fixture_id: resolution.fixture_id,
        home_team_id: ctx.home_team_id,
        away_team_id: ctx.away_team_id,
        match_confidence: resolution.confidence,
        odds: snapshot.map(OddsSnapshot::quote).unwrap_or_default(),
        p_mkt: report.market.map(|m| m.novig),
        p_model,
        best_side: evaluation.map(|e| e.best_side),
        best_ev: evaluation.map(|e| e.best_ev),
        status,
        reason,
        result,
        metrics,
        created_at_utc: None,
        updated_at_utc: None,
    }
}

/// Idempotent writer for audit records.
#[derive(Clone)]
pub struct AuditRecorder {
    db: Database,
}

impl AuditRecorder {
    pub fn new(db: Database) -> Self {
        AuditRecorder { db }
    }

    pub fn record(&self, rec: &AuditPredictionRecord, now: DateTime<Utc>) -> Result<()> {
        self.db.upsert_audit_prediction(rec, now)
    }
}
