//! Provider event → catalog identity resolution.
//!
//! Team names coming from an odds provider rarely match the catalog
//! verbatim ("Man Utd", "Atlético Madrid", "Brighton and Hove Albion").
//! Each side is resolved through an ordered chain of matchers, most
//! reliable first, and the first hit wins:
//!
//! - **EXACT**: normalized equality with a team name or alias
//! - **ILIKE**: every query token is a substring of the candidate name
//! - **FUZZY**: token-sorted Levenshtein similarity above a threshold
//!
//! Once both teams are known the catalog fixture is found by kickoff
//! proximity.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::db::models::{EventResolution, Fixture, MatchConfidence, OddsEvent};
use crate::db::Database;

use super::hours;

/// Tokens that carry no identity ("FC", "Club", "de" …).
const STOP_WORDS: &[&str] = &[
    "fc", "cf", "sc", "ac", "afc", "cfc", "the", "club", "de", "da", "do", "and",
];

/// Case-fold, strip accents and punctuation, and drop club stop words.
/// "Atlético de Madrid" → "atletico madrid"
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    folded
        .split_whitespace()
        .filter(|t| !STOP_WORDS.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sorted_tokens(norm: &str) -> String {
    let mut tokens: Vec<&str> = norm.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// One spelling of one team, pre-normalized.
#[derive(Debug, Clone)]
struct Candidate {
    team_id: i64,
    name: String,
    norm: String,
    sorted: String,
}

/// In-memory index of every known team spelling. Built once per cycle.
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    candidates: Vec<Candidate>,
}

impl TeamDirectory {
    pub fn new(names: Vec<(i64, String)>) -> Self {
        let candidates = names
            .into_iter()
            .filter_map(|(team_id, name)| {
                let norm = normalize_name(&name);
                if norm.is_empty() {
                    return None;
                }
                let sorted = sorted_tokens(&norm);
                Some(Candidate {
                    team_id,
                    name,
                    norm,
                    sorted,
                })
            })
            .collect();
        TeamDirectory { candidates }
    }

    pub fn load(db: &Database) -> Result<Self> {
        Ok(Self::new(db.list_team_names()?))
    }
}

/// A resolved team plus how it was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMatch {
    pub team_id: i64,
    pub confidence: MatchConfidence,
    /// 1.0 for exact/substring hits, similarity ratio for fuzzy ones
    pub score: f64,
    /// Catalog spelling that produced the hit
    pub matched_name: String,
}

/// A catalog team worth a look when a side did not resolve exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSuggestion {
    pub team_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideResolution {
    pub raw_name: String,
    pub matched: Option<TeamMatch>,
    /// Substring candidates, tightest first; empty on an exact hit
    pub suggestions: Vec<TeamSuggestion>,
}

/// Full resolver output for one event. `resolution` is what gets stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionDetail {
    pub event_id: String,
    pub home: SideResolution,
    pub away: SideResolution,
    pub resolution: EventResolution,
}

pub const MAX_SUGGESTIONS: usize = 5;

/// One tier of the resolution chain.
pub trait NameMatcher: Send + Sync {
    fn tier(&self) -> MatchConfidence;

    /// Best candidate for an already-normalized, non-empty query.
    fn find(&self, query: &str, dir: &TeamDirectory) -> Option<TeamMatch>;
}

pub struct ExactMatcher;

impl NameMatcher for ExactMatcher {
    fn tier(&self) -> MatchConfidence {
        MatchConfidence::Exact
    }

    fn find(&self, query: &str, dir: &TeamDirectory) -> Option<TeamMatch> {
        dir.candidates
            .iter()
            .filter(|c| c.norm == query)
            .min_by_key(|c| c.team_id)
            .map(|c| TeamMatch {
                team_id: c.team_id,
                confidence: self.tier(),
                score: 1.0,
                matched_name: c.name.clone(),
            })
    }
}

pub struct IlikeMatcher;

impl IlikeMatcher {
    /// Every spelling containing all query tokens, tightest name first.
    fn hits<'a>(query: &str, dir: &'a TeamDirectory) -> Vec<&'a Candidate> {
        let tokens: Vec<&str> = query.split_whitespace().collect();
        let mut hits: Vec<&Candidate> = dir
            .candidates
            .iter()
            .filter(|c| tokens.iter().all(|t| c.norm.contains(t)))
            .collect();
        hits.sort_by_key(|c| (c.norm.len(), c.team_id));
        hits
    }

    /// Up to `limit` distinct teams, in hit order.
    pub fn suggest(query: &str, dir: &TeamDirectory, limit: usize) -> Vec<TeamSuggestion> {
        let mut out: Vec<TeamSuggestion> = Vec::new();
        for c in Self::hits(query, dir) {
            if out.len() == limit {
                break;
            }
            if out.iter().all(|s| s.team_id != c.team_id) {
                out.push(TeamSuggestion {
                    team_id: c.team_id,
                    name: c.name.clone(),
                });
            }
        }
        out
    }
}

impl NameMatcher for IlikeMatcher {
    fn tier(&self) -> MatchConfidence {
        MatchConfidence::Ilike
    }

    fn find(&self, query: &str, dir: &TeamDirectory) -> Option<TeamMatch> {
        Self::hits(query, dir).first().map(|c| TeamMatch {
            team_id: c.team_id,
            confidence: self.tier(),
            score: 1.0,
            matched_name: c.name.clone(),
        })
    }
}

pub struct FuzzyMatcher {
    pub threshold: f64,
}

impl NameMatcher for FuzzyMatcher {
    fn tier(&self) -> MatchConfidence {
        MatchConfidence::Fuzzy
    }

    fn find(&self, query: &str, dir: &TeamDirectory) -> Option<TeamMatch> {
        let query = sorted_tokens(query);
        let mut best: Option<(&Candidate, f64)> = None;
        for c in &dir.candidates {
            let score = strsim::normalized_levenshtein(&query, &c.sorted);
            if score < self.threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((b, s)) => score > s || (score == s && c.team_id < b.team_id),
            };
            if better {
                best = Some((c, score));
            }
        }
        best.map(|(c, score)| TeamMatch {
            team_id: c.team_id,
            confidence: self.tier(),
            score,
            matched_name: c.name.clone(),
        })
    }
}

/// Resolves provider events to catalog team and fixture IDs.
pub struct IdentityResolver {
    matchers: Vec<Box<dyn NameMatcher>>,
    fixture_tolerance: TimeDelta,
}

impl IdentityResolver {
    pub fn new(fuzzy_threshold: f64, fixture_tolerance_hours: i64) -> Result<Self> {
        Ok(IdentityResolver {
            matchers: vec![
                Box::new(ExactMatcher),
                Box::new(IlikeMatcher),
                Box::new(FuzzyMatcher {
                    threshold: fuzzy_threshold,
                }),
            ],
            fixture_tolerance: hours(fixture_tolerance_hours)?,
        })
    }

    /// Walk the matcher chain; the first tier with a hit wins.
    pub fn resolve_team(&self, raw_name: &str, dir: &TeamDirectory) -> Option<TeamMatch> {
        let query = normalize_name(raw_name);
        if query.is_empty() {
            return None;
        }
        self.matchers.iter().find_map(|m| m.find(&query, dir))
    }

    fn resolve_side(&self, raw_name: &str, dir: &TeamDirectory) -> SideResolution {
        let matched = self.resolve_team(raw_name, dir);
        let exact = matched
            .as_ref()
            .is_some_and(|m| m.confidence == MatchConfidence::Exact);
        let query = normalize_name(raw_name);
        let suggestions = if exact || query.is_empty() {
            Vec::new()
        } else {
            IlikeMatcher::suggest(&query, dir, MAX_SUGGESTIONS)
        };
        SideResolution {
            raw_name: raw_name.to_string(),
            matched,
            suggestions,
        }
    }

    /// Nearest-kickoff fixture inside the tolerance window; ties go to the
    /// lowest fixture ID.
    pub fn pick_fixture(&self, commence_time: DateTime<Utc>, candidates: &[Fixture]) -> Option<i64> {
        candidates
            .iter()
            .map(|f| ((f.kickoff_utc - commence_time).abs(), f.fixture_id))
            .filter(|(gap, _)| *gap <= self.fixture_tolerance)
            .min()
            .map(|(_, id)| id)
    }

    /// Resolve both teams and, when possible, the fixture. Pure given the
    /// directory and the fixtures for the resolved pair.
    pub fn resolve(
        &self,
        ev: &OddsEvent,
        dir: &TeamDirectory,
        fixtures_for_pair: impl FnOnce(i64, i64) -> Result<Vec<Fixture>>,
    ) -> Result<ResolutionDetail> {
        let home = self.resolve_side(&ev.home_name, dir);
        let mut away = self.resolve_side(&ev.away_name, dir);

        if let (Some(h), Some(a)) = (&home.matched, &away.matched) {
            if h.team_id == a.team_id {
                warn!(
                    "Event {}: '{}' and '{}' both resolved to team {}; dropping away match",
                    ev.event_id, ev.home_name, ev.away_name, h.team_id
                );
                away.matched = None;
            }
        }

        let (confidence, fixture_id) = match (&home.matched, &away.matched) {
            (Some(h), Some(a)) => {
                let candidates = fixtures_for_pair(h.team_id, a.team_id)?;
                (
                    h.confidence.min(a.confidence),
                    self.pick_fixture(ev.commence_time_utc, &candidates),
                )
            }
            _ => (MatchConfidence::None, None),
        };

        let describe = |side: &SideResolution| match &side.matched {
            Some(m) => format!("{} '{}' {} {:.2}", m.team_id, m.matched_name, m.confidence, m.score),
            None => format!("- ({} suggestions)", side.suggestions.len()),
        };
        debug!(
            "Resolved {} ({} vs {}): home=[{}] away=[{}] fixture={:?} [{}]",
            ev.event_id,
            ev.home_name,
            ev.away_name,
            describe(&home),
            describe(&away),
            fixture_id,
            confidence
        );

        let resolution = EventResolution {
            home_team_id: home.matched.as_ref().map(|m| m.team_id),
            away_team_id: away.matched.as_ref().map(|m| m.team_id),
            fixture_id,
            confidence,
        };
        Ok(ResolutionDetail {
            event_id: ev.event_id.clone(),
            home,
            away,
            resolution,
        })
    }

    /// Resolve against the database and write the result back onto the event.
    pub fn resolve_and_store(
        &self,
        db: &Database,
        ev: &OddsEvent,
        dir: &TeamDirectory,
    ) -> Result<ResolutionDetail> {
        let detail = self.resolve(ev, dir, |h, a| db.list_fixtures_for_pair(h, a))?;
        db.set_event_resolution(&ev.event_id, &detail.resolution)?;
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn dir(names: &[(i64, &str)]) -> TeamDirectory {
        TeamDirectory::new(names.iter().map(|(id, n)| (*id, n.to_string())).collect())
    }

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(0.8, 6).unwrap()
    }

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 5, 16, 30, 0).unwrap()
    }

    fn fixture(id: i64, offset_hours: i64) -> Fixture {
        Fixture {
            fixture_id: id,
            league_id: 39,
            season: 2024,
            kickoff_utc: kickoff() + Duration::hours(offset_hours),
            home_team_id: 42,
            away_team_id: 49,
            is_finished: false,
            goals_home: None,
            goals_away: None,
        }
    }

    #[test]
    fn test_normalize_strips_accents_punctuation_and_stop_words() {
        assert_eq!(normalize_name("Atlético de Madrid"), "atletico madrid");
        assert_eq!(normalize_name("  Brighton & Hove Albion FC "), "brighton hove albion");
        assert_eq!(normalize_name("1. FC Köln"), "1 koln");
        assert_eq!(normalize_name("FC"), "");
    }

    #[test]
    fn test_exact_match_via_alias() {
        let d = dir(&[(33, "Manchester United"), (33, "Man Utd"), (50, "Manchester City")]);
        let m = resolver().resolve_team("MAN UTD", &d).unwrap();
        assert_eq!(m.team_id, 33);
        assert_eq!(m.confidence, MatchConfidence::Exact);
    }

    #[test]
    fn test_exact_beats_fuzzy_candidate() {
        // "Arsenall" would be a fuzzy hit with a lower id; the exact tier must win.
        let d = dir(&[(1, "Arsenall"), (42, "Arsenal")]);
        let m = resolver().resolve_team("Arsenal", &d).unwrap();
        assert_eq!(m.team_id, 42);
        assert_eq!(m.confidence, MatchConfidence::Exact);
    }

    #[test]
    fn test_ilike_substring_match() {
        let d = dir(&[(51, "Brighton and Hove Albion"), (52, "Brentford")]);
        let m = resolver().resolve_team("Brighton", &d).unwrap();
        assert_eq!(m.team_id, 51);
        assert_eq!(m.confidence, MatchConfidence::Ilike);
    }

    #[test]
    fn test_ilike_prefers_tightest_name() {
        let d = dir(&[(7, "Wolverhampton Wanderers Reserves"), (39, "Wolverhampton Wanderers")]);
        let m = resolver().resolve_team("Wolverhampton", &d).unwrap();
        assert_eq!(m.team_id, 39);
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        let d = dir(&[(47, "Tottenham Hotspur"), (48, "West Ham United")]);
        let m = resolver().resolve_team("Tottenham Hotspurs", &d).unwrap();
        assert_eq!(m.team_id, 47);
        assert_eq!(m.confidence, MatchConfidence::Fuzzy);
        assert!(m.score >= 0.8 && m.score < 1.0);
    }

    #[test]
    fn test_fuzzy_tie_breaks_on_lowest_id() {
        let d = dir(&[(9, "Everton"), (3, "Everton")]);
        let m = FuzzyMatcher { threshold: 0.5 }.find("evertn", &d).unwrap();
        assert_eq!(m.team_id, 3);
    }

    #[test]
    fn test_no_match_below_threshold() {
        let d = dir(&[(42, "Arsenal"), (49, "Chelsea")]);
        assert!(resolver().resolve_team("Real Sociedad", &d).is_none());
        assert!(resolver().resolve_team("FC", &d).is_none());
    }

    #[test]
    fn test_pick_fixture_nearest_then_lowest_id() {
        let r = resolver();
        let fixtures = vec![fixture(300, 2), fixture(200, -2), fixture(100, 5), fixture(400, 30)];
        assert_eq!(r.pick_fixture(kickoff(), &fixtures), Some(200));

        let only_far = vec![fixture(400, 30), fixture(401, -7)];
        assert_eq!(r.pick_fixture(kickoff(), &only_far), None);
    }

    #[test]
    fn test_resolve_event_combines_tiers() {
        let d = dir(&[(42, "Arsenal"), (49, "Chelsea FC")]);
        let ev = OddsEvent::new("ev1", "soccer_epl", kickoff(), "Arsenal", "Chelsee");
        let res = resolver()
            .resolve(&ev, &d, |h, a| {
                assert_eq!((h, a), (42, 49));
                Ok(vec![fixture(900, 1)])
            })
            .unwrap()
            .resolution;
        assert_eq!(res.home_team_id, Some(42));
        assert_eq!(res.away_team_id, Some(49));
        assert_eq!(res.fixture_id, Some(900));
        assert_eq!(res.confidence, MatchConfidence::Fuzzy);
    }

    #[test]
    fn test_resolve_event_one_side_missing_is_none() {
        let d = dir(&[(42, "Arsenal")]);
        let ev = OddsEvent::new("ev2", "soccer_epl", kickoff(), "Arsenal", "Girona");
        let res = resolver()
            .resolve(&ev, &d, |_, _| panic!("fixture lookup needs both teams"))
            .unwrap()
            .resolution;
        assert_eq!(res.home_team_id, Some(42));
        assert_eq!(res.away_team_id, None);
        assert_eq!(res.fixture_id, None);
        assert_eq!(res.confidence, MatchConfidence::None);
    }

    #[test]
    fn test_resolve_and_store_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [(42, "Arsenal"), (49, "Chelsea")] {
            db.upsert_team(&crate::db::models::Team {
                team_id: id,
                name: name.into(),
                country: None,
                aliases: vec![],
            })
            .unwrap();
        }
        db.upsert_fixture(&fixture(900, 0)).unwrap();
        let ev = OddsEvent::new("ev3", "soccer_epl", kickoff(), "Arsenal", "Chelsea");
        db.insert_odds_event(&ev).unwrap();

        let d = TeamDirectory::load(&db).unwrap();
        let first = resolver().resolve_and_store(&db, &ev, &d).unwrap();
        let second = resolver().resolve_and_store(&db, &ev, &d).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.resolution.confidence, MatchConfidence::Exact);

        let stored = db.get_odds_event("ev3").unwrap().unwrap();
        assert_eq!(stored.resolved_fixture_id, Some(900));
        assert_eq!(stored.match_confidence, Some(MatchConfidence::Exact));
    }

    #[test]
    fn test_suggestions_for_non_exact_sides() {
        let d = dir(&[
            (10, "Real Madrid"),
            (11, "Real Madrid Castilla"),
            (12, "Real Madrid Femenino"),
            (12, "Real Madrid Women"),
            (13, "Real Sociedad"),
            (14, "Real Betis"),
            (42, "Arsenal"),
        ]);
        let ev = OddsEvent::new("ev4", "soccer_spain_la_liga", kickoff(), "Arsenal", "Madrid");
        let detail = resolver().resolve(&ev, &d, |_, _| Ok(vec![])).unwrap();

        assert!(detail.home.suggestions.is_empty());
        assert_eq!(detail.home.matched.as_ref().map(|m| m.team_id), Some(42));

        let away = &detail.away;
        assert_eq!(away.raw_name, "Madrid");
        assert_eq!(away.matched.as_ref().map(|m| m.confidence), Some(MatchConfidence::Ilike));
        let ids: Vec<i64> = away.suggestions.iter().map(|s| s.team_id).collect();
        assert_eq!(ids, vec![10, 12, 11]);
        assert_eq!(away.suggestions[1].name, "Real Madrid Women");
    }

    #[test]
    fn test_suggestions_capped_and_empty_without_hits() {
        let names: Vec<(i64, String)> = (1..=8).map(|i| (i, format!("United {}", i))).collect();
        let d = TeamDirectory::new(names);
        assert_eq!(IlikeMatcher::suggest("united", &d, MAX_SUGGESTIONS).len(), MAX_SUGGESTIONS);

        let ev = OddsEvent::new("ev5", "soccer_epl", kickoff(), "Girona", "Osasuna");
        let detail = resolver().resolve(&ev, &d, |_, _| Ok(vec![])).unwrap();
        assert!(detail.home.matched.is_none());
        assert!(detail.home.suggestions.is_empty());
        assert_eq!(detail.resolution.confidence, MatchConfidence::None);
    }

    #[test]
    fn test_out_of_range_tolerance_is_rejected() {
        assert!(IdentityResolver::new(0.8, i64::MAX).is_err());
        assert!(IdentityResolver::new(0.8, 720).is_ok());
    }
}
