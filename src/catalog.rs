//! Reference catalog import (leagues, teams, fixtures, season aggregates).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::db::models::{Fixture, League, Team, TeamSeasonStats};
use crate::db::Database;
use crate::pipeline::backfill::BackfillSummary;
use crate::pipeline::MetricsBackfiller;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub leagues: Vec<League>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
    #[serde(default)]
    pub team_season_stats: Vec<TeamSeasonStats>,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ImportSummary {
    pub leagues: usize,
    pub teams: usize,
    pub fixtures: usize,
    pub team_season_stats: usize,
    pub backfill: BackfillSummary,
}

pub fn load_file(path: &Path) -> Result<Catalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse catalog {}", path.display()))
}

/// Upsert the whole catalog, then backfill audit records of every fixture
/// that arrived finished.
pub fn import(db: &Database, catalog: &Catalog, now: DateTime<Utc>) -> Result<ImportSummary> {
    for league in &catalog.leagues {
        db.upsert_league(league)?;
    }
    for team in &catalog.teams {
        db.upsert_team(team)?;
    }
    let mut finished = Vec::new();
    for fixture in &catalog.fixtures {
        db.upsert_fixture(fixture)?;
        if fixture.result().is_some() {
            finished.push(fixture.fixture_id);
        }
    }
    for stats in &catalog.team_season_stats {
        db.upsert_team_season_stats(stats)?;
    }

    let backfill = MetricsBackfiller::new(db.clone()).run_for(&finished, now)?;

    info!(
        "Catalog imported: {} leagues, {} teams, {} fixtures ({} finished), {} season rows",
        catalog.leagues.len(),
        catalog.teams.len(),
        catalog.fixtures.len(),
        finished.len(),
        catalog.team_season_stats.len()
    );
    Ok(ImportSummary {
        leagues: catalog.leagues.len(),
        teams: catalog.teams.len(),
        fixtures: catalog.fixtures.len(),
        team_season_stats: catalog.team_season_stats.len(),
        backfill,
    })
}
