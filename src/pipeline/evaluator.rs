use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{EventResolution, Fixture, OddsQuote, Side, Triple};
use crate::model::{MatchContext, ProbabilitySource};

use super::error::ItemError;
use super::market::{complete_odds, ev_triple, normalize, MarketProbs};

/// Model-vs-market comparison for one (event, artifact).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub p_model: Triple,
    /// `p_model − p_novig` per side
    pub edge: Triple,
    /// `p_model × odds − 1` per side
    pub ev: Triple,
    pub best_side: Side,
    pub best_ev: f64,
}

/// Caller-supplied what-if values. Team ids fill sides the resolver left
/// empty; a league/season pair is used when there is no fixture and wins
/// over the configured fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextOverride {
    pub league_id: Option<i64>,
    pub season: Option<i32>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
}

/// The identity context an evaluation runs under, possibly partial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalContext {
    pub league_id: Option<i64>,
    pub season: Option<i32>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub kickoff_utc: DateTime<Utc>,
}

impl EvalContext {
    pub fn build(
        resolution: &EventResolution,
        fixture: Option<&Fixture>,
        kickoff_utc: DateTime<Utc>,
        fallback: (Option<i64>, Option<i32>),
        overrides: Option<&ContextOverride>,
    ) -> Self {
        let ov = overrides.copied().unwrap_or_default();
        let (league_id, season) = league_season(fixture, (ov.league_id, ov.season), fallback);
        EvalContext {
            league_id,
            season,
            home_team_id: resolution.home_team_id.or(ov.home_team_id),
            away_team_id: resolution.away_team_id.or(ov.away_team_id),
            kickoff_utc,
        }
    }
}

/// League and season always come from one source: the fixture, else a
/// complete override, else a complete fallback. With no complete pair the
/// first partial one is kept so the record shows what was known.
fn league_season(
    fixture: Option<&Fixture>,
    overrides: (Option<i64>, Option<i32>),
    fallback: (Option<i64>, Option<i32>),
) -> (Option<i64>, Option<i32>) {
    if let Some(f) = fixture {
        return (Some(f.league_id), Some(f.season));
    }
    let pairs = [overrides, fallback];
    pairs
        .iter()
        .find(|(l, s)| l.is_some() && s.is_some())
        .or_else(|| pairs.iter().find(|(l, s)| l.is_some() || s.is_some()))
        .copied()
        .unwrap_or((None, None))
}

/// Evaluator output. `market` is kept even when the evaluation itself failed
/// so the no-vig probabilities are still persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub market: Option<MarketProbs>,
    pub outcome: Result<Evaluation, ItemError>,
}

/// A model triple must be finite, within [0, 1] and sum to 1 ± 1e-6.
pub fn validate_probs(p: &Triple) -> Result<(), ItemError> {
    for side in Side::ALL {
        let v = p.get(side);
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(ItemError::ModelEvaluation(format!(
                "invalid probability {} for {}",
                v, side
            )));
        }
    }
    let total = p.sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err(ItemError::ModelEvaluation(format!(
            "probabilities sum to {:.8}",
            total
        )));
    }
    Ok(())
}

/// Edges, EVs and the best pick. `best_side` ties resolve H > D > A.
pub fn score(p_model: Triple, market: &MarketProbs, odds: &Triple) -> Evaluation {
    let edge = Triple::from_fn(|s| p_model.get(s) - market.novig.get(s));
    let ev = ev_triple(&p_model, odds);
    let best_side = ev.argmax();
    Evaluation {
        p_model,
        edge,
        ev,
        best_side,
        best_ev: ev.get(best_side),
    }
}

/// Run one evaluation. Failure checks happen in a fixed order: team
/// identity, then market completeness, then the model.
pub fn evaluate(
    source: &dyn ProbabilitySource,
    artifact: &str,
    ctx: &EvalContext,
    quote: &OddsQuote,
) -> EvalReport {
    let market = normalize(quote).ok();
    let outcome = run(source, artifact, ctx, quote, market.as_ref());
    EvalReport { market, outcome }
}

fn run(
    source: &dyn ProbabilitySource,
    artifact: &str,
    ctx: &EvalContext,
    quote: &OddsQuote,
    market: Option<&MarketProbs>,
) -> Result<Evaluation, ItemError> {
    let (Some(home_team_id), Some(away_team_id)) = (ctx.home_team_id, ctx.away_team_id) else {
        return Err(ItemError::ResolutionMissing);
    };
    let (Some(market), Some(odds)) = (market, complete_odds(quote)) else {
        return Err(ItemError::MarketDataIncomplete);
    };
    let (Some(league_id), Some(season)) = (ctx.league_id, ctx.season) else {
        return Err(ItemError::ModelEvaluation(
            "no league/season context (no fixture, fallback or override)".into(),
        ));
    };

    let mctx = MatchContext {
        league_id,
        season,
        home_team_id,
        away_team_id,
        kickoff_utc: ctx.kickoff_utc,
    };
    let p_model = source
        .predict(artifact, &mctx)
        .map_err(|e| ItemError::ModelEvaluation(format!("{:#}", e)))?;
    validate_probs(&p_model)?;

    Ok(score(p_model, market, &odds))
}
