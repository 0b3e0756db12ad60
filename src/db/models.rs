use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a persisted enum column holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("unrecognised {kind} value '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        ParseEnumError {
            kind,
            value: value.to_string(),
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

/// One leg of a 1X2 market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "H")]
    Home,
    #[serde(rename = "D")]
    Draw,
    #[serde(rename = "A")]
    Away,
}

impl Side {
    /// Priority order for every H/D/A tie-break.
    pub const ALL: [Side; 3] = [Side::Home, Side::Draw, Side::Away];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Home => "H",
            Side::Draw => "D",
            Side::Away => "A",
        }
    }

    /// Full-time result from a final scoreline.
    pub fn from_goals(goals_home: i32, goals_away: i32) -> Side {
        if goals_home > goals_away {
            Side::Home
        } else if goals_home == goals_away {
            Side::Draw
        } else {
            Side::Away
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "H" => Ok(Side::Home),
            "D" => Ok(Side::Draw),
            "A" => Ok(Side::Away),
            other => Err(ParseEnumError::new("side", other)),
        }
    }
}

/// Reliability tier of a name-to-identity match.
///
/// Variant order is the reliability order, so `Ord` gives
/// `Exact > Ilike > Fuzzy > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchConfidence {
    None,
    Fuzzy,
    Ilike,
    Exact,
}

impl MatchConfidence {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchConfidence::None => "NONE",
            MatchConfidence::Fuzzy => "FUZZY",
            MatchConfidence::Ilike => "ILIKE",
            MatchConfidence::Exact => "EXACT",
        }
    }
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchConfidence {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(MatchConfidence::None),
            "FUZZY" => Ok(MatchConfidence::Fuzzy),
            "ILIKE" => Ok(MatchConfidence::Ilike),
            "EXACT" => Ok(MatchConfidence::Exact),
            _ => Err(ParseEnumError::new("match_confidence", s)),
        }
    }
}

/// "ok" | "incomplete"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Incomplete,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::Incomplete => "incomplete",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(RecordStatus::Ok),
            "incomplete" => Ok(RecordStatus::Incomplete),
            other => Err(ParseEnumError::new("status", other)),
        }
    }
}

macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_column!(Side);
text_column!(MatchConfidence);
text_column!(RecordStatus);

// ── Value triples ────────────────────────────────────────────────────────────

/// A per-outcome value (probability, edge or EV) for H, D and A.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    #[serde(rename = "H")]
    pub h: f64,
    #[serde(rename = "D")]
    pub d: f64,
    #[serde(rename = "A")]
    pub a: f64,
}

impl Triple {
    pub fn new(h: f64, d: f64, a: f64) -> Self {
        Triple { h, d, a }
    }

    /// Rebuild from three nullable columns; `None` unless all are present.
    pub fn from_parts(h: Option<f64>, d: Option<f64>, a: Option<f64>) -> Option<Self> {
        Some(Triple::new(h?, d?, a?))
    }

    pub fn from_fn(mut f: impl FnMut(Side) -> f64) -> Self {
        Triple::new(f(Side::Home), f(Side::Draw), f(Side::Away))
    }

    pub fn get(&self, side: Side) -> f64 {
        match side {
            Side::Home => self.h,
            Side::Draw => self.d,
            Side::Away => self.a,
        }
    }

    pub fn sum(&self) -> f64 {
        self.h + self.d + self.a
    }

    /// Side with the largest value; earlier sides in `Side::ALL` win ties.
    pub fn argmax(&self) -> Side {
        let mut best = Side::Home;
        for side in [Side::Draw, Side::Away] {
            if self.get(side) > self.get(best) {
                best = side;
            }
        }
        best
    }
}

/// Decimal odds as quoted; any leg may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    #[serde(rename = "H")]
    pub h: Option<f64>,
    #[serde(rename = "D")]
    pub d: Option<f64>,
    #[serde(rename = "A")]
    pub a: Option<f64>,
}

impl OddsQuote {
    pub fn new(h: Option<f64>, d: Option<f64>, a: Option<f64>) -> Self {
        OddsQuote { h, d, a }
    }
}

// ── Odds feed ────────────────────────────────────────────────────────────────

/// A provider-announced event plus its resolution against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsEvent {
    /// Provider-assigned event ID
    pub event_id: String,
    pub sport_key: String,
    pub commence_time_utc: DateTime<Utc>,
    pub home_name: String,
    pub away_name: String,
    pub resolved_home_team_id: Option<i64>,
    pub resolved_away_team_id: Option<i64>,
    pub resolved_fixture_id: Option<i64>,
    /// `None` until the resolver has run once
    pub match_confidence: Option<MatchConfidence>,
}

impl OddsEvent {
    pub fn new(
        event_id: &str,
        sport_key: &str,
        commence_time_utc: DateTime<Utc>,
        home_name: &str,
        away_name: &str,
    ) -> Self {
        OddsEvent {
            event_id: event_id.to_string(),
            sport_key: sport_key.to_string(),
            commence_time_utc,
            home_name: home_name.to_string(),
            away_name: away_name.to_string(),
            resolved_home_team_id: None,
            resolved_away_team_id: None,
            resolved_fixture_id: None,
            match_confidence: None,
        }
    }
}

/// Output of the identity resolver for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResolution {
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub fixture_id: Option<i64>,
    pub confidence: MatchConfidence,
}

/// A captured 1X2 price line from one bookmaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub id: Option<i64>,
    pub event_id: String,
    pub bookmaker: String,
    /// Provider market key, e.g. "h2h"
    pub market: String,
    pub odds_home: Option<f64>,
    pub odds_draw: Option<f64>,
    pub odds_away: Option<f64>,
    pub captured_at_utc: DateTime<Utc>,
}

impl OddsSnapshot {
    pub fn quote(&self) -> OddsQuote {
        OddsQuote::new(self.odds_home, self.odds_draw, self.odds_away)
    }
}

// ── Audit ────────────────────────────────────────────────────────────────────

/// Real final score attached to a record once its fixture finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureResult {
    pub goals_home: i32,
    pub goals_away: i32,
    pub outcome: Side,
}

impl FixtureResult {
    pub fn from_goals(goals_home: i32, goals_away: i32) -> Self {
        FixtureResult {
            goals_home,
            goals_away,
            outcome: Side::from_goals(goals_home, goals_away),
        }
    }
}

/// Proper scoring-rule metrics for one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetrics {
    pub brier: f64,
    pub logloss: f64,
    /// 1.0 if the model's top pick was the actual outcome, else 0.0
    pub top1_acc: f64,
}

/// The single "current belief" row per (event, artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPredictionRecord {
    pub event_id: String,
    pub artifact_filename: String,
    pub sport_key: String,
    pub kickoff_utc: DateTime<Utc>,
    pub captured_at_utc: Option<DateTime<Utc>>,
    pub bookmaker: Option<String>,
    pub market: Option<String>,
    pub league_id: Option<i64>,
    pub season: Option<i32>,
    pub fixture_id: Option<i64>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub match_confidence: MatchConfidence,
    pub odds: OddsQuote,
    /// No-vig market probabilities
    pub p_mkt: Option<Triple>,
    pub p_model: Option<Triple>,
    pub best_side: Option<Side>,
    pub best_ev: Option<f64>,
    pub status: RecordStatus,
    pub reason: Option<String>,
    pub result: Option<FixtureResult>,
    pub metrics: Option<ScoreMetrics>,
    /// Set by the store on first insert
    pub created_at_utc: Option<DateTime<Utc>>,
    /// Set by the store on every write
    pub updated_at_utc: Option<DateTime<Utc>>,
}

/// Aggregate evaluation of an artifact over finished fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    pub artifact_id: String,
    pub league_id: Option<i64>,
    pub season: Option<i32>,
    pub n_games: i64,
    pub brier: f64,
    pub logloss: f64,
    pub top1_acc: f64,
    pub eval_from_utc: Option<DateTime<Utc>>,
    pub eval_to_utc: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

// ── Reference catalog ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub league_id: i64,
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub team_id: i64,
    pub name: String,
    pub country: Option<String>,
    /// Alternative spellings the odds provider may use
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub fixture_id: i64,
    pub league_id: i64,
    pub season: i32,
    pub kickoff_utc: DateTime<Utc>,
    pub home_team_id: i64,
    pub away_team_id: i64,
    #[serde(default)]
    pub is_finished: bool,
    pub goals_home: Option<i32>,
    pub goals_away: Option<i32>,
}

impl Fixture {
    /// Final result, once the fixture is finished with both goal counts set.
    pub fn result(&self) -> Option<FixtureResult> {
        if !self.is_finished {
            return None;
        }
        Some(FixtureResult::from_goals(self.goals_home?, self.goals_away?))
    }
}

/// Season aggregates for one team in one league.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonStats {
    pub league_id: i64,
    pub season: i32,
    pub team_id: i64,
    pub played: i32,
    pub wins: i32,
    pub draws: i32,
    pub losses: i32,
    pub goals_for: i32,
    pub goals_against: i32,
    pub points: i32,
    pub home_played: i32,
    pub home_points: i32,
    pub away_played: i32,
    pub away_points: i32,
}

impl TeamSeasonStats {
    fn per_game(value: i32, games: i32) -> f64 {
        if games > 0 {
            value as f64 / games as f64
        } else {
            0.0
        }
    }

    pub fn ppg(&self) -> f64 {
        Self::per_game(self.points, self.played)
    }

    pub fn gf_pg(&self) -> f64 {
        Self::per_game(self.goals_for, self.played)
    }

    pub fn ga_pg(&self) -> f64 {
        Self::per_game(self.goals_against, self.played)
    }

    pub fn gd_pg(&self) -> f64 {
        Self::per_game(self.goals_for - self.goals_against, self.played)
    }

    pub fn home_ppg(&self) -> f64 {
        Self::per_game(self.home_points, self.home_played)
    }

    pub fn away_ppg(&self) -> f64 {
        Self::per_game(self.away_points, self.away_played)
    }
}
