use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::models::{
    AuditPredictionRecord, EventResolution, Fixture, OddsEvent, OddsSnapshot, RecordStatus,
};
use crate::db::Database;
use crate::model::ProbabilitySource;

use super::evaluator::{evaluate, ContextOverride, EvalContext};
use super::recorder::{build_record, AuditRecorder};
use super::resolver::{IdentityResolver, ResolutionDetail, TeamDirectory};
use super::shift_hours;

/// Knobs for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub artifacts: Vec<String>,
    pub assume_league_id: Option<i64>,
    pub assume_season: Option<i32>,
    /// Only events kicking off within this many hours are evaluated
    pub cycle_hours_ahead: i64,
    pub fuzzy_threshold: f64,
    pub fixture_tolerance_hours: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub events: usize,
    pub records: usize,
    pub ok: usize,
    pub incomplete: usize,
    pub failed: usize,
}

/// Everything a single (event, artifact) evaluation reads.
struct EventInputs {
    resolution: EventResolution,
    fixture: Option<Fixture>,
    snapshot: Option<OddsSnapshot>,
}

/// Resolver → normalizer → evaluator → recorder, once per (event, artifact).
pub struct PipelineEngine {
    db: Database,
    resolver: IdentityResolver,
    source: Arc<dyn ProbabilitySource>,
    recorder: AuditRecorder,
    settings: EngineSettings,
}

impl PipelineEngine {
    pub fn new(db: Database, source: Arc<dyn ProbabilitySource>, settings: EngineSettings) -> Result<Self> {
        Ok(PipelineEngine {
            resolver: IdentityResolver::new(settings.fuzzy_threshold, settings.fixture_tolerance_hours)?,
            recorder: AuditRecorder::new(db.clone()),
            db,
            source,
            settings,
        })
    }

    /// Evaluate every upcoming event against every configured artifact.
    /// Per-item problems end up on the record; only storage failures on an
    /// individual event are counted as `failed` and skipped.
    pub fn run_cycle(&self, sport_key: Option<&str>, now: DateTime<Utc>) -> Result<CycleSummary> {
        let dir = TeamDirectory::load(&self.db)?;
        let horizon = shift_hours(now, self.settings.cycle_hours_ahead)?;
        let events: Vec<OddsEvent> = self
            .db
            .list_odds_events(sport_key)?
            .into_iter()
            .filter(|e| e.commence_time_utc >= now && e.commence_time_utc <= horizon)
            .collect();

        let mut summary = CycleSummary {
            events: events.len(),
            ..Default::default()
        };

        for ev in &events {
            let inputs = match self.load_inputs(ev, &dir) {
                Ok(i) => i,
                Err(e) => {
                    warn!("Event {}: resolution failed: {:#}", ev.event_id, e);
                    summary.failed += 1;
                    continue;
                }
            };
            for artifact in &self.settings.artifacts {
                match self.process_pair(ev, artifact, &inputs, None, now) {
                    Ok(rec) => {
                        summary.records += 1;
                        match rec.status {
                            RecordStatus::Ok => summary.ok += 1,
                            RecordStatus::Incomplete => summary.incomplete += 1,
                        }
                    }
                    Err(e) => {
                        warn!("Event {} / {}: {:#}", ev.event_id, artifact, e);
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            "Cycle {}: {} events, {} records ({} ok, {} incomplete, {} failed)",
            sport_key.unwrap_or("*"),
            summary.events,
            summary.records,
            summary.ok,
            summary.incomplete,
            summary.failed
        );
        Ok(summary)
    }

    /// What-if evaluation of one stored event. The record is persisted like
    /// any cycle result and returned as stored.
    pub fn evaluate_event(
        &self,
        event_id: &str,
        artifact: &str,
        overrides: Option<&ContextOverride>,
        now: DateTime<Utc>,
    ) -> Result<AuditPredictionRecord> {
        let Some(ev) = self.db.get_odds_event(event_id)? else {
            bail!("unknown event '{}'", event_id);
        };
        let dir = TeamDirectory::load(&self.db)?;
        let inputs = self.load_inputs(&ev, &dir)?;
        let rec = self.process_pair(&ev, artifact, &inputs, overrides, now)?;
        Ok(self
            .db
            .get_audit_prediction(&rec.event_id, &rec.artifact_filename)?
            .unwrap_or(rec))
    }

    /// Resolve one stored event and report both sides with their candidate
    /// suggestions. The resolution is written back like a cycle would.
    pub fn resolve_event(&self, event_id: &str) -> Result<ResolutionDetail> {
        let Some(ev) = self.db.get_odds_event(event_id)? else {
            bail!("unknown event '{}'", event_id);
        };
        let dir = TeamDirectory::load(&self.db)?;
        self.resolver.resolve_and_store(&self.db, &ev, &dir)
    }

    fn load_inputs(&self, ev: &OddsEvent, dir: &TeamDirectory) -> Result<EventInputs> {
        let resolution = self.resolver.resolve_and_store(&self.db, ev, dir)?.resolution;
        let fixture = match resolution.fixture_id {
            Some(id) => self.db.get_fixture(id)?,
            None => None,
        };
        let snapshot = self.db.latest_snapshot(&ev.event_id)?;
        Ok(EventInputs {
            resolution,
            fixture,
            snapshot,
        })
    }

    fn process_pair(
        &self,
        ev: &OddsEvent,
        artifact: &str,
        inputs: &EventInputs,
        overrides: Option<&ContextOverride>,
        now: DateTime<Utc>,
    ) -> Result<AuditPredictionRecord> {
        let ctx = EvalContext::build(
            &inputs.resolution,
            inputs.fixture.as_ref(),
            ev.commence_time_utc,
            (self.settings.assume_league_id, self.settings.assume_season),
            overrides,
        );
        let quote = inputs
            .snapshot
            .as_ref()
            .map(OddsSnapshot::quote)
            .unwrap_or_default();

        let report = evaluate(self.source.as_ref(), artifact, &ctx, &quote);
        if let Err(e) = &report.outcome {
            warn!(
                "Event {} ({} vs {}) / {}: {}",
                ev.event_id, ev.home_name, ev.away_name, artifact, e
            );
        }

        let rec = build_record(
            ev,
            artifact,
            &inputs.resolution,
            &ctx,
            inputs.snapshot.as_ref(),
            inputs.fixture.as_ref(),
            &report,
        );
        self.recorder.record(&rec, now)?;
        Ok(rec)
    }
}
