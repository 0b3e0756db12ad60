use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Reference catalog ────────────────────────────────────────────────────

    pub fn upsert_league(&self, league: &League) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO leagues (league_id, name, country) VALUES (?1,?2,?3)
             ON CONFLICT(league_id) DO UPDATE SET
                name=excluded.name,
                country=excluded.country",
            params![league.league_id, league.name, league.country],
        )?;
        Ok(())
    }

    /// Upsert a team together with its aliases (aliases are only ever added)
    pub fn upsert_team(&self, team: &Team) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO teams (team_id, name, country) VALUES (?1,?2,?3)
             ON CONFLICT(team_id) DO UPDATE SET
                name=excluded.name,
                country=excluded.country",
            params![team.team_id, team.name, team.country],
        )?;
        for alias in &team.aliases {
            tx.execute(
                "INSERT OR IGNORE INTO team_aliases (team_id, alias) VALUES (?1,?2)",
                params![team.team_id, alias],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Every known spelling as (team_id, name): canonical names plus aliases
    pub fn list_team_names(&self) -> Result<Vec<(i64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT team_id, name FROM teams
             UNION
             SELECT team_id, alias FROM team_aliases
             ORDER BY 1, 2",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_fixture(&self, fixture: &Fixture) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO fixtures (fixture_id, league_id, season, kickoff_utc,
                                   home_team_id, away_team_id, is_finished,
                                   goals_home, goals_away)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(fixture_id) DO UPDATE SET
                league_id=excluded.league_id,
                season=excluded.season,
                kickoff_utc=excluded.kickoff_utc,
                home_team_id=excluded.home_team_id,
                away_team_id=excluded.away_team_id,
                is_finished=excluded.is_finished,
                goals_home=excluded.goals_home,
                goals_away=excluded.goals_away",
            params![
                fixture.fixture_id,
                fixture.league_id,
                fixture.season,
                fixture.kickoff_utc,
                fixture.home_team_id,
                fixture.away_team_id,
                fixture.is_finished,
                fixture.goals_home,
                fixture.goals_away,
            ],
        )?;
        Ok(())
    }

    pub fn get_fixture(&self, fixture_id: i64) -> Result<Option<Fixture>> {
        let conn = self.conn()?;
        let fixture = conn
            .query_row(
                &format!("SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE fixture_id=?1"),
                params![fixture_id],
                map_fixture,
            )
            .optional()?;
        Ok(fixture)
    }

    /// All fixtures with this exact home/away pairing
    pub fn list_fixtures_for_pair(&self, home_team_id: i64, away_team_id: i64) -> Result<Vec<Fixture>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures
             WHERE home_team_id=?1 AND away_team_id=?2
             ORDER BY fixture_id"
        ))?;
        let fixtures = stmt
            .query_map(params![home_team_id, away_team_id], map_fixture)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fixtures)
    }

    /// Finished fixtures with both scores, oldest kickoff first
    pub fn list_finished_fixtures(
        &self,
        league_id: Option<i64>,
        season: Option<i32>,
        limit: Option<i64>,
    ) -> Result<Vec<Fixture>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures
             WHERE is_finished=1 AND goals_home IS NOT NULL AND goals_away IS NOT NULL
               AND (?1 IS NULL OR league_id=?1)
               AND (?2 IS NULL OR season=?2)
             ORDER BY kickoff_utc ASC, fixture_id ASC
             LIMIT ?3"
        ))?;
        let fixtures = stmt
            .query_map(params![league_id, season, limit.unwrap_or(-1)], map_fixture)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fixtures)
    }

    pub fn upsert_team_season_stats(&self, s: &TeamSeasonStats) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO team_season_stats (
                league_id, season, team_id, played, wins, draws, losses,
                goals_for, goals_against, points,
                home_played, home_points, away_played, away_points
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(league_id, season, team_id) DO UPDATE SET
                played=excluded.played,
                wins=excluded.wins,
                draws=excluded.draws,
                losses=excluded.losses,
                goals_for=excluded.goals_for,
                goals_against=excluded.goals_against,
                points=excluded.points,
                home_played=excluded.home_played,
                home_points=excluded.home_points,
                away_played=excluded.away_played,
                away_points=excluded.away_points",
            params![
                s.league_id,
                s.season,
                s.team_id,
                s.played,
                s.wins,
                s.draws,
                s.losses,
                s.goals_for,
                s.goals_against,
                s.points,
                s.home_played,
                s.home_points,
                s.away_played,
                s.away_points,
            ],
        )?;
        Ok(())
    }

    pub fn get_team_season_stats(
        &self,
        league_id: i64,
        season: i32,
        team_id: i64,
    ) -> Result<Option<TeamSeasonStats>> {
        let conn = self.conn()?;
        let stats = conn
            .query_row(
                "SELECT league_id, season, team_id, played, wins, draws, losses,
                        goals_for, goals_against, points,
                        home_played, home_points, away_played, away_points
                 FROM team_season_stats
                 WHERE league_id=?1 AND season=?2 AND team_id=?3",
                params![league_id, season, team_id],
                |row| {
                    Ok(TeamSeasonStats {
                        league_id: row.get(0)?,
                        season: row.get(1)?,
                        team_id: row.get(2)?,
                        played: row.get(3)?,
                        wins: row.get(4)?,
                        draws: row.get(5)?,
                        losses: row.get(6)?,
                        goals_for: row.get(7)?,
                        goals_against: row.get(8)?,
                        points: row.get(9)?,
                        home_played: row.get(10)?,
                        home_points: row.get(11)?,
                        away_played: row.get(12)?,
                        away_points: row.get(13)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    // ── Odds events & snapshots ───────────────────────────────────────────────

    /// Insert a provider event once; later calls leave the stored row untouched.
    /// Returns whether a new row was created.
    pub fn insert_odds_event(&self, ev: &OddsEvent) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO odds_events (
                event_id, sport_key, commence_time_utc, home_name, away_name
             ) VALUES (?1,?2,?3,?4,?5)",
            params![
                ev.event_id,
                ev.sport_key,
                ev.commence_time_utc,
                ev.home_name,
                ev.away_name,
            ],
        )?;
        Ok(n > 0)
    }

    pub fn get_odds_event(&self, event_id: &str) -> Result<Option<OddsEvent>> {
        let conn = self.conn()?;
        let ev = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM odds_events WHERE event_id=?1"),
                params![event_id],
                map_odds_event,
            )
            .optional()?;
        Ok(ev)
    }

    /// Events ordered by kickoff, optionally restricted to one sport
    pub fn list_odds_events(&self, sport_key: Option<&str>) -> Result<Vec<OddsEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM odds_events
             WHERE (?1 IS NULL OR sport_key=?1)
             ORDER BY commence_time_utc ASC, event_id ASC"
        ))?;
        let events = stmt
            .query_map(params![sport_key], map_odds_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Overwrite the resolution fields of an event (the only mutable part)
    pub fn set_event_resolution(&self, event_id: &str, res: &EventResolution) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE odds_events SET
                resolved_home_team_id=?1,
                resolved_away_team_id=?2,
                resolved_fixture_id=?3,
                match_confidence=?4
             WHERE event_id=?5",
            params![
                res.home_team_id,
                res.away_team_id,
                res.fixture_id,
                res.confidence,
                event_id,
            ],
        )?;
        Ok(())
    }

    /// Append a snapshot. Re-capturing the same line is a no-op.
    pub fn insert_snapshot(&self, snap: &OddsSnapshot) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO odds_snapshots_1x2 (
                event_id, bookmaker, market, odds_home, odds_draw, odds_away, captured_at_utc
             ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                snap.event_id,
                snap.bookmaker,
                snap.market,
                snap.odds_home,
                snap.odds_draw,
                snap.odds_away,
                snap.captured_at_utc,
            ],
        )?;
        Ok(n > 0)
    }

    /// Most recent capture for an event (ties broken by insertion order)
    pub fn latest_snapshot(&self, event_id: &str) -> Result<Option<OddsSnapshot>> {
        let conn = self.conn()?;
        let snap = conn
            .query_row(
                "SELECT id, event_id, bookmaker, market, odds_home, odds_draw, odds_away, captured_at_utc
                 FROM odds_snapshots_1x2
                 WHERE event_id=?1
                 ORDER BY captured_at_utc DESC, id DESC
                 LIMIT 1",
                params![event_id],
                |row| {
                    Ok(OddsSnapshot {
                        id: row.get(0)?,
                        event_id: row.get(1)?,
                        bookmaker: row.get(2)?,
                        market: row.get(3)?,
                        odds_home: row.get(4)?,
                        odds_draw: row.get(5)?,
                        odds_away: row.get(6)?,
                        captured_at_utc: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(snap)
    }

    #[cfg(test)]
    pub fn count_snapshots(&self, event_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM odds_snapshots_1x2 WHERE event_id=?1",
            params![event_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    // ── Audit predictions ─────────────────────────────────────────────────────

    /// Upsert the current-belief record for (event_id, artifact_filename).
    ///
    /// Every value column is overwritten; `created_at_utc` is only written on
    /// the first insert.
    pub fn upsert_audit_prediction(&self, rec: &AuditPredictionRecord, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let p_mkt = rec.p_mkt;
        let p_model = rec.p_model;
        conn.execute(
            "INSERT INTO audit_predictions (
                event_id, artifact_filename, sport_key, kickoff_utc, captured_at_utc,
                bookmaker, market, league_id, season, fixture_id,
                home_team_id, away_team_id, match_confidence,
                odds_h, odds_d, odds_a,
                p_mkt_h, p_mkt_d, p_mkt_a,
                p_model_h, p_model_d, p_model_a,
                best_side, best_ev, status, reason,
                goals_home, goals_away, outcome,
                brier, logloss, top1_acc,
                created_at_utc, updated_at_utc
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,
                       ?18,?19,?20,?21,?22,?23,?24,?25,?26,?27,?28,?29,?30,?31,?32,?33,?33)
             ON CONFLICT(event_id, artifact_filename) DO UPDATE SET
                sport_key=excluded.sport_key,
                kickoff_utc=excluded.kickoff_utc,
                captured_at_utc=excluded.captured_at_utc,
                bookmaker=excluded.bookmaker,
                market=excluded.market,
                league_id=excluded.league_id,
                season=excluded.season,
                fixture_id=excluded.fixture_id,
                home_team_id=excluded.home_team_id,
                away_team_id=excluded.away_team_id,
                match_confidence=excluded.match_confidence,
                odds_h=excluded.odds_h,
                odds_d=excluded.odds_d,
                odds_a=excluded.odds_a,
                p_mkt_h=excluded.p_mkt_h,
                p_mkt_d=excluded.p_mkt_d,
                p_mkt_a=excluded.p_mkt_a,
                p_model_h=excluded.p_model_h,
                p_model_d=excluded.p_model_d,
                p_model_a=excluded.p_model_a,
                best_side=excluded.best_side,
                best_ev=excluded.best_ev,
                status=excluded.status,
                reason=excluded.reason,
                goals_home=excluded.goals_home,
                goals_away=excluded.goals_away,
                outcome=excluded.outcome,
                brier=excluded.brier,
                logloss=excluded.logloss,
                top1_acc=excluded.top1_acc,
                updated_at_utc=excluded.updated_at_utc",
            params![
                rec.event_id,
                rec.artifact_filename,
                rec.sport_key,
                rec.kickoff_utc,
                rec.captured_at_utc,
                rec.bookmaker,
                rec.market,
                rec.league_id,
                rec.season,
                rec.fixture_id,
                rec.home_team_id,
                rec.away_team_id,
                rec.match_confidence,
                rec.odds.h,
                rec.odds.d,
                rec.odds.a,
                p_mkt.map(|p| p.h),
                p_mkt.map(|p| p.d),
                p_mkt.map(|p| p.a),
                p_model.map(|p| p.h),
                p_model.map(|p| p.d),
                p_model.map(|p| p.a),
                rec.best_side,
                rec.best_ev,
                rec.status,
                rec.reason,
                rec.result.map(|r| r.goals_home),
                rec.result.map(|r| r.goals_away),
                rec.result.map(|r| r.outcome),
                rec.metrics.map(|m| m.brier),
                rec.metrics.map(|m| m.logloss),
                rec.metrics.map(|m| m.top1_acc),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_audit_prediction(
        &self,
        event_id: &str,
        artifact_filename: &str,
    ) -> Result<Option<AuditPredictionRecord>> {
        let conn = self.conn()?;
        let rec = conn
            .query_row(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_predictions
                     WHERE event_id=?1 AND artifact_filename=?2"
                ),
                params![event_id, artifact_filename],
                map_audit_prediction,
            )
            .optional()?;
        Ok(rec)
    }

    /// Records optionally filtered by sport and artifact, ordered by kickoff
    pub fn list_audit_predictions(
        &self,
        sport_key: Option<&str>,
        artifact_filename: Option<&str>,
    ) -> Result<Vec<AuditPredictionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_predictions
             WHERE (?1 IS NULL OR sport_key=?1)
               AND (?2 IS NULL OR artifact_filename=?2)
             ORDER BY kickoff_utc ASC, event_id ASC, artifact_filename ASC"
        ))?;
        let rows = stmt
            .query_map(params![sport_key, artifact_filename], map_audit_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_audit_predictions_for_fixture(&self, fixture_id: i64) -> Result<Vec<AuditPredictionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_predictions
             WHERE fixture_id=?1
             ORDER BY event_id ASC, artifact_filename ASC"
        ))?;
        let rows = stmt
            .query_map(params![fixture_id], map_audit_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Overwrite only the outcome and metric columns of one record. The write
    /// is skipped (returns false) when the stored model triple is no longer
    /// `scored_p_model`, i.e. the record was re-evaluated since it was read.
    pub fn set_audit_outcome(
        &self,
        event_id: &str,
        artifact_filename: &str,
        result: &FixtureResult,
        scored_p_model: Option<&Triple>,
        metrics: Option<&ScoreMetrics>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE audit_predictions SET
                goals_home=?1,
                goals_away=?2,
                outcome=?3,
                brier=?4,
                logloss=?5,
                top1_acc=?6,
                updated_at_utc=?7
             WHERE event_id=?8 AND artifact_filename=?9
               AND p_model_h IS ?10 AND p_model_d IS ?11 AND p_model_a IS ?12",
            params![
                result.goals_home,
                result.goals_away,
                result.outcome,
                metrics.map(|m| m.brier),
                metrics.map(|m| m.logloss),
                metrics.map(|m| m.top1_acc),
                now,
                event_id,
                artifact_filename,
                scored_p_model.map(|p| p.h),
                scored_p_model.map(|p| p.d),
                scored_p_model.map(|p| p.a),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Finished fixtures referenced by audit rows that still lack an outcome
    /// or metrics. With `all`, every finished referenced fixture is returned.
    pub fn list_fixtures_pending_backfill(&self, all: bool) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT a.fixture_id
             FROM audit_predictions a
             JOIN fixtures f ON f.fixture_id = a.fixture_id
             WHERE f.is_finished = 1
               AND f.goals_home IS NOT NULL
               AND f.goals_away IS NOT NULL
               AND (?1 OR a.outcome IS NULL OR (a.p_model_h IS NOT NULL AND a.brier IS NULL))
             ORDER BY a.fixture_id",
        )?;
        let ids = stmt
            .query_map(params![all], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    // ── Artifact metrics ──────────────────────────────────────────────────────

    pub fn insert_artifact_metrics(&self, m: &ArtifactMetrics) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO artifact_metrics (
                artifact_id, league_id, season, n_games,
                brier, logloss, top1_acc,
                eval_from_utc, eval_to_utc, notes, created_at_utc
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                m.artifact_id,
                m.league_id,
                m.season,
                m.n_games,
                m.brier,
                m.logloss,
                m.top1_acc,
                m.eval_from_utc,
                m.eval_to_utc,
                m.notes,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[cfg(test)]
    pub fn list_artifact_metrics(&self, artifact_id: &str) -> Result<Vec<ArtifactMetrics>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT artifact_id, league_id, season, n_games, brier, logloss, top1_acc,
                    eval_from_utc, eval_to_utc, notes
             FROM artifact_metrics WHERE artifact_id=?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![artifact_id], |row| {
                Ok(ArtifactMetrics {
                    artifact_id: row.get(0)?,
                    league_id: row.get(1)?,
                    season: row.get(2)?,
                    n_games: row.get(3)?,
                    brier: row.get(4)?,
                    logloss: row.get(5)?,
                    top1_acc: row.get(6)?,
                    eval_from_utc: row.get(7)?,
                    eval_to_utc: row.get(8)?,
                    notes: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const FIXTURE_COLUMNS: &str = "fixture_id, league_id, season, kickoff_utc, home_team_id, \
     away_team_id, is_finished, goals_home, goals_away";

const EVENT_COLUMNS: &str = "event_id, sport_key, commence_time_utc, home_name, away_name, \
     resolved_home_team_id, resolved_away_team_id, resolved_fixture_id, match_confidence";

const AUDIT_COLUMNS: &str = "event_id, artifact_filename, sport_key, kickoff_utc, captured_at_utc, \
     bookmaker, market, league_id, season, fixture_id, home_team_id, away_team_id, \
     match_confidence, odds_h, odds_d, odds_a, p_mkt_h, p_mkt_d, p_mkt_a, \
     p_model_h, p_model_d, p_model_a, best_side, best_ev, status, reason, \
     goals_home, goals_away, outcome, brier, logloss, top1_acc, \
     created_at_utc, updated_at_utc";

fn map_fixture(row: &rusqlite::Row) -> rusqlite::Result<Fixture> {
    Ok(Fixture {
        fixture_id: row.get(0)?,
        league_id: row.get(1)?,
        season: row.get(2)?,
        kickoff_utc: row.get(3)?,
        home_team_id: row.get(4)?,
        away_team_id: row.get(5)?,
        is_finished: row.get(6)?,
        goals_home: row.get(7)?,
        goals_away: row.get(8)?,
    })
}

fn map_odds_event(row: &rusqlite::Row) -> rusqlite::Result<OddsEvent> {
    Ok(OddsEvent {
        event_id: row.get(0)?,
        sport_key: row.get(1)?,
        commence_time_utc: row.get(2)?,
        home_name: row.get(3)?,
        away_name: row.get(4)?,
        resolved_home_team_id: row.get(5)?,
        resolved_away_team_id: row.get(6)?,
        resolved_fixture_id: row.get(7)?,
        match_confidence: row.get(8)?,
    })
}

fn map_audit_prediction(row: &rusqlite::Row) -> rusqlite::Result<AuditPredictionRecord> {
    let goals_home: Option<i32> = row.get(26)?;
    let goals_away: Option<i32> = row.get(27)?;
    let outcome: Option<Side> = row.get(28)?;
    let result = match (goals_home, goals_away, outcome) {
        (Some(goals_home), Some(goals_away), Some(outcome)) => Some(FixtureResult {
            goals_home,
            goals_away,
            outcome,
        }),
        _ => None,
    };
    let brier: Option<f64> = row.get(29)?;
    let logloss: Option<f64> = row.get(30)?;
    let top1_acc: Option<f64> = row.get(31)?;
    let metrics = match (brier, logloss, top1_acc) {
        (Some(brier), Some(logloss), Some(top1_acc)) => Some(ScoreMetrics {
            brier,
            logloss,
            top1_acc,
        }),
        _ => None,
    };

    Ok(AuditPredictionRecord {
        event_id: row.get(0)?,
        artifact_filename: row.get(1)?,
        sport_key: row.get(2)?,
        kickoff_utc: row.get(3)?,
        captured_at_utc: row.get(4)?,
        bookmaker: row.get(5)?,
        market: row.get(6)?,
        league_id: row.get(7)?,
        season: row.get(8)?,
        fixture_id: row.get(9)?,
        home_team_id: row.get(10)?,
        away_team_id: row.get(11)?,
        match_confidence: row.get(12)?,
        odds: OddsQuote::new(row.get(13)?, row.get(14)?, row.get(15)?),
        p_mkt: Triple::from_parts(row.get(16)?, row.get(17)?, row.get(18)?),
        p_model: Triple::from_parts(row.get(19)?, row.get(20)?, row.get(21)?),
        best_side: row.get(22)?,
        best_ev: row.get(23)?,
        status: row.get(24)?,
        reason: row.get(25)?,
        result,
        metrics,
        created_at_utc: row.get(32)?,
        updated_at_utc: row.get(33)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS leagues (
    league_id   INTEGER PRIMARY KEY,
    name        TEXT    NOT NULL,
    country     TEXT
);

CREATE TABLE IF NOT EXISTS teams (
    team_id     INTEGER PRIMARY KEY,
    name        TEXT    NOT NULL,
    country     TEXT
);

CREATE TABLE IF NOT EXISTS team_aliases (
    team_id     INTEGER NOT NULL,
    alias       TEXT    NOT NULL,
    PRIMARY KEY (team_id, alias),
    FOREIGN KEY (team_id) REFERENCES teams(team_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS fixtures (
    fixture_id    INTEGER PRIMARY KEY,
    league_id     INTEGER NOT NULL,
    season        INTEGER NOT NULL,
    kickoff_utc   TEXT    NOT NULL,
    home_team_id  INTEGER NOT NULL,
    away_team_id  INTEGER NOT NULL,
    is_finished   INTEGER NOT NULL DEFAULT 0,
    goals_home    INTEGER,
    goals_away    INTEGER
);

CREATE TABLE IF NOT EXISTS team_season_stats (
    league_id     INTEGER NOT NULL,
    season        INTEGER NOT NULL,
    team_id       INTEGER NOT NULL,
    played        INTEGER NOT NULL,
    wins          INTEGER NOT NULL,
    draws         INTEGER NOT NULL,
    losses        INTEGER NOT NULL,
    goals_for     INTEGER NOT NULL,
    goals_against INTEGER NOT NULL,
    points        INTEGER NOT NULL,
    home_played   INTEGER NOT NULL,
    home_points   INTEGER NOT NULL,
    away_played   INTEGER NOT NULL,
    away_points   INTEGER NOT NULL,
    PRIMARY KEY (league_id, season, team_id)
);

CREATE TABLE IF NOT EXISTS odds_events (
    event_id              TEXT    PRIMARY KEY,
    sport_key             TEXT    NOT NULL,
    commence_time_utc     TEXT    NOT NULL,
    home_name             TEXT    NOT NULL,
    away_name             TEXT    NOT NULL,
    resolved_home_team_id INTEGER,
    resolved_away_team_id INTEGER,
    resolved_fixture_id   INTEGER,
    match_confidence      TEXT
);

CREATE TABLE IF NOT EXISTS odds_snapshots_1x2 (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id        TEXT    NOT NULL,
    bookmaker       TEXT    NOT NULL,
    market          TEXT    NOT NULL,
    odds_home       REAL,
    odds_draw       REAL,
    odds_away       REAL,
    captured_at_utc TEXT    NOT NULL,
    UNIQUE (event_id, bookmaker, market, captured_at_utc),
    FOREIGN KEY (event_id) REFERENCES odds_events(event_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS audit_predictions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id          TEXT    NOT NULL,
    artifact_filename TEXT    NOT NULL,
    sport_key         TEXT    NOT NULL,
    kickoff_utc       TEXT    NOT NULL,
    captured_at_utc   TEXT,
    bookmaker         TEXT,
    market            TEXT,
    league_id         INTEGER,
    season            INTEGER,
    fixture_id        INTEGER,
    home_team_id      INTEGER,
    away_team_id      INTEGER,
    match_confidence  TEXT    NOT NULL,
    odds_h            REAL,
    odds_d            REAL,
    odds_a            REAL,
    p_mkt_h           REAL,
    p_mkt_d           REAL,
    p_mkt_a           REAL,
    p_model_h         REAL,
    p_model_d         REAL,
    p_model_a         REAL,
    best_side         TEXT,
    best_ev           REAL,
    status            TEXT    NOT NULL,
    reason            TEXT,
    goals_home        INTEGER,
    goals_away        INTEGER,
    outcome           TEXT,
    brier             REAL,
    logloss           REAL,
    top1_acc          REAL,
    created_at_utc    TEXT    NOT NULL,
    updated_at_utc    TEXT    NOT NULL,
    UNIQUE (event_id, artifact_filename)
);

CREATE TABLE IF NOT EXISTS artifact_metrics (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    artifact_id    TEXT    NOT NULL,
    league_id      INTEGER,
    season         INTEGER,
    n_games        INTEGER NOT NULL,
    brier          REAL    NOT NULL,
    logloss        REAL    NOT NULL,
    top1_acc       REAL    NOT NULL,
    eval_from_utc  TEXT,
    eval_to_utc    TEXT,
    notes          TEXT,
    created_at_utc TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fixtures_pair ON fixtures(home_team_id, away_team_id);
CREATE INDEX IF NOT EXISTS idx_odds_events_sport ON odds_events(sport_key, commence_time_utc);
CREATE INDEX IF NOT EXISTS idx_snapshots_event ON odds_snapshots_1x2(event_id, captured_at_utc);
CREATE INDEX IF NOT EXISTS idx_audit_fixture ON audit_predictions(fixture_id);
CREATE INDEX IF NOT EXISTS idx_audit_sport ON audit_predictions(sport_key, kickoff_utc);
"#;
