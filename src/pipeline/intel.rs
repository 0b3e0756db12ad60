//! Read-only ranking over audit records.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::db::models::{
    AuditPredictionRecord, MatchConfidence, OddsQuote, RecordStatus, Side, Triple,
};
use crate::db::Database;

use super::market::{complete_odds, ev_triple};
use super::{shift_hours, MAX_WINDOW_HOURS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum SortKey {
    BestEv,
    EvH,
    EvD,
    EvA,
    EdgeH,
    EdgeD,
    EdgeA,
    Kickoff,
    /// Age of the priced snapshot; ascending puts the freshest line first
    Freshness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntelQuery {
    pub sport_key: Option<String>,
    pub artifact_filename: Option<String>,
    pub hours_ahead: i64,
    pub min_confidence: MatchConfidence,
    pub limit: usize,
    pub offset: usize,
    pub sort: SortKey,
    pub order: SortOrder,
}

impl Default for IntelQuery {
    fn default() -> Self {
        IntelQuery {
            sport_key: None,
            artifact_filename: None,
            hours_ahead: 72,
            min_confidence: MatchConfidence::None,
            limit: 50,
            offset: 0,
            sort: SortKey::BestEv,
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedView {
    pub match_confidence: MatchConfidence,
    pub fixture_id: Option<i64>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub league_id: Option<i64>,
    pub season: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotView {
    pub bookmaker: Option<String>,
    pub market: Option<String>,
    pub captured_at_utc: Option<DateTime<Utc>>,
    /// Seconds between capture and the report time
    pub freshness_seconds: Option<i64>,
    pub odds: OddsQuote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelView {
    pub p_model: Triple,
    pub edge: Option<Triple>,
    pub ev: Option<Triple>,
    pub best_side: Option<Side>,
    pub best_ev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntelEntry {
    pub event_id: String,
    pub artifact_filename: String,
    pub sport_key: String,
    pub kickoff_utc: DateTime<Utc>,
    pub resolved: ResolvedView,
    pub latest_snapshot: Option<SnapshotView>,
    pub market_probs: Option<Triple>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: RecordStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntelCounts {
    pub total: usize,
    pub ok_model: usize,
    pub missing_team: usize,
    pub missing_odds: usize,
    pub model_error: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntelReport {
    pub generated_at_utc: DateTime<Utc>,
    pub query: IntelQuery,
    pub counts: IntelCounts,
    pub entries: Vec<IntelEntry>,
}

impl IntelEntry {
    fn from_record(rec: AuditPredictionRecord, now: DateTime<Utc>) -> Self {
        let latest_snapshot = rec.bookmaker.is_some().then(|| SnapshotView {
            bookmaker: rec.bookmaker.clone(),
            market: rec.market.clone(),
            captured_at_utc: rec.captured_at_utc,
            freshness_seconds: rec.captured_at_utc.map(|c| (now - c).num_seconds()),
            odds: rec.odds,
        });
        let model = rec.p_model.map(|p| ModelView {
            p_model: p,
            edge: rec
                .p_mkt
                .map(|m| Triple::from_fn(|s| p.get(s) - m.get(s))),
            ev: complete_odds(&rec.odds).map(|o| ev_triple(&p, &o)),
            best_side: rec.best_side,
            best_ev: rec.best_ev,
        });
        let error = match rec.status {
            RecordStatus::Ok => None,
            RecordStatus::Incomplete => rec.reason.clone(),
        };

        IntelEntry {
            event_id: rec.event_id,
            artifact_filename: rec.artifact_filename,
            sport_key: rec.sport_key,
            kickoff_utc: rec.kickoff_utc,
            resolved: ResolvedView {
                match_confidence: rec.match_confidence,
                fixture_id: rec.fixture_id,
                home_team_id: rec.home_team_id,
                away_team_id: rec.away_team_id,
                league_id: rec.league_id,
                season: rec.season,
            },
            latest_snapshot,
            market_probs: rec.p_mkt,
            model,
            error,
            status: rec.status,
            reason: rec.reason,
        }
    }

    fn sort_value(&self, key: SortKey) -> Option<f64> {
        let model = self.model.as_ref();
        match key {
            SortKey::BestEv => model?.best_ev,
            SortKey::EvH => model?.ev.map(|t| t.h),
            SortKey::EvD => model?.ev.map(|t| t.d),
            SortKey::EvA => model?.ev.map(|t| t.a),
            SortKey::EdgeH => model?.edge.map(|t| t.h),
            SortKey::EdgeD => model?.edge.map(|t| t.d),
            SortKey::EdgeA => model?.edge.map(|t| t.a),
            SortKey::Kickoff => Some(self.kickoff_utc.timestamp() as f64),
            SortKey::Freshness => self.latest_snapshot.as_ref()?.freshness_seconds.map(|s| s as f64),
        }
        .filter(|v| v.is_finite())
    }
}

impl IntelCounts {
    fn add(&mut self, entry: &IntelEntry) {
        self.total += 1;
        if entry.status == RecordStatus::Ok && entry.model.is_some() {
            self.ok_model += 1;
        }
        match entry.reason.as_deref() {
            Some("missing_team_id") => self.missing_team += 1,
            Some("missing_odds") => self.missing_odds += 1,
            Some(r) if r.starts_with("model_error") => self.model_error += 1,
            _ => {}
        }
    }
}

/// Sort with missing values last in either direction; ties by kickoff, then
/// event id, then artifact.
fn compare(a: &IntelEntry, b: &IntelEntry, sort: SortKey, order: SortOrder) -> Ordering {
    let by_value = match (a.sort_value(sort), b.sort_value(sort)) {
        (Some(x), Some(y)) => match order {
            SortOrder::Asc => x.total_cmp(&y),
            SortOrder::Desc => y.total_cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_value
        .then_with(|| a.kickoff_utc.cmp(&b.kickoff_utc))
        .then_with(|| a.event_id.cmp(&b.event_id))
        .then_with(|| a.artifact_filename.cmp(&b.artifact_filename))
}

/// Filter, count, sort and paginate records. Counts cover the whole filtered
/// set, not just the returned page.
pub fn rank(records: Vec<AuditPredictionRecord>, q: &IntelQuery, now: DateTime<Utc>) -> Result<IntelReport> {
    let horizon = shift_hours(now, q.hours_ahead)?;
    let mut entries: Vec<IntelEntry> = records
        .into_iter()
        .filter(|r| r.kickoff_utc >= now && r.kickoff_utc <= horizon)
        .filter(|r| r.match_confidence >= q.min_confidence)
        .filter(|r| q.sport_key.as_deref().map_or(true, |s| r.sport_key == s))
        .filter(|r| {
            q.artifact_filename
                .as_deref()
                .map_or(true, |a| r.artifact_filename == a)
        })
        .map(|r| IntelEntry::from_record(r, now))
        .collect();

    let mut counts = IntelCounts::default();
    for e in &entries {
        counts.add(e);
    }

    entries.sort_by(|a, b| compare(a, b, q.sort, q.order));
    let entries = entries.into_iter().skip(q.offset).take(q.limit).collect();

    Ok(IntelReport {
        generated_at_utc: now,
        query: q.clone(),
        counts,
        entries,
    })
}

pub fn query(db: &Database, q: &IntelQuery, now: DateTime<Utc>) -> Result<IntelReport> {
    if q.limit == 0 {
        bail!("limit must be > 0");
    }
    if !(0..=MAX_WINDOW_HOURS).contains(&q.hours_ahead) {
        bail!("hours_ahead must be between 0 and {}", MAX_WINDOW_HOURS);
    }
    let records = db.list_audit_predictions(q.sport_key.as_deref(), q.artifact_filename.as_deref())?;
    rank(records, q, now)
}
