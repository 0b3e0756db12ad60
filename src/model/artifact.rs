//! Multinomial logistic-regression artifacts stored as JSON files.
//!
//! An artifact is trained offline; at prediction time the match features are
//! rebuilt from `team_season_stats` and pushed through
//! `softmax(intercept + coef · x)`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::db::models::{Side, TeamSeasonStats, Triple};
use crate::db::Database;

use super::{MatchContext, ProbabilitySource};

pub const FEATURES: [&str; 5] = [
    "delta_ppg",
    "delta_gf_pg",
    "delta_ga_pg",
    "delta_gd_pg",
    "delta_home_adv",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRegArtifact {
    pub model_version: String,
    pub feature_version: String,
    pub league_id: i64,
    #[serde(default)]
    pub train_seasons: Vec<i32>,
    pub feature_order: Vec<String>,
    /// Class label per coefficient row, e.g. ["H", "D", "A"]
    pub classes: Vec<Side>,
    /// One row per class, one column per feature
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    #[serde(default)]
    pub trained_at_utc: Option<String>,
    #[serde(default)]
    pub n_samples: Option<i64>,
}

impl LogRegArtifact {
    /// Shape checks that make `predict_from_features` infallible.
    pub fn validate(&self) -> Result<()> {
        let mut classes = self.classes.clone();
        classes.sort_by_key(|s| s.as_str());
        classes.dedup();
        if self.classes.len() != 3 || classes.len() != 3 {
            bail!("artifact classes must be exactly H, D and A");
        }
        if self.intercept.len() != 3 || self.coef.len() != 3 {
            bail!(
                "artifact needs 3 intercepts and 3 coefficient rows, got {} and {}",
                self.intercept.len(),
                self.coef.len()
            );
        }
        let n = self.feature_order.len();
        if let Some(row) = self.coef.iter().find(|row| row.len() != n) {
            bail!("coefficient row has {} entries, expected {}", row.len(), n);
        }
        if let Some(f) = self.feature_order.iter().find(|f| !FEATURES.contains(&f.as_str())) {
            bail!("unknown feature '{}'", f);
        }
        Ok(())
    }

    /// Class probabilities for a feature vector in `feature_order` order.
    pub fn predict_from_features(&self, x: &[f64]) -> Triple {
        let logits: Vec<f64> = self
            .intercept
            .iter()
            .zip(&self.coef)
            .map(|(b, row)| b + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>())
            .collect();
        let probs = softmax(&logits);

        let mut out = Triple::new(0.0, 0.0, 0.0);
        for (side, p) in self.classes.iter().zip(probs) {
            match side {
                Side::Home => out.h = p,
                Side::Draw => out.d = p,
                Side::Away => out.a = p,
            }
        }
        out
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Home-minus-away deltas of the season aggregates.
pub fn match_features(home: &TeamSeasonStats, away: &TeamSeasonStats) -> HashMap<&'static str, f64> {
    HashMap::from([
        ("delta_ppg", home.ppg() - away.ppg()),
        ("delta_gf_pg", home.gf_pg() - away.gf_pg()),
        ("delta_ga_pg", home.ga_pg() - away.ga_pg()),
        ("delta_gd_pg", home.gd_pg() - away.gd_pg()),
        ("delta_home_adv", home.home_ppg() - away.away_ppg()),
    ])
}

/// Loads artifacts from a directory on first use and keeps them in memory.
pub struct ArtifactStore {
    dir: PathBuf,
    db: Database,
    cache: Mutex<HashMap<String, Arc<LogRegArtifact>>>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, db: Database) -> Self {
        ArtifactStore {
            dir: dir.into(),
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, filename: &str) -> Result<Arc<LogRegArtifact>> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            bail!("invalid artifact filename '{}'", filename);
        }

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact cache mutex poisoned"))?;
        if let Some(art) = cache.get(filename) {
            return Ok(Arc::clone(art));
        }

        let path = self.dir.join(filename);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("artifact not found: {}", path.display()))?;
        let art: LogRegArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse artifact {}", filename))?;
        art.validate()
            .with_context(|| format!("Invalid artifact {}", filename))?;

        debug!(
            "Loaded artifact {} ({} / {}, league {})",
            filename, art.model_version, art.feature_version, art.league_id
        );
        let art = Arc::new(art);
        cache.insert(filename.to_string(), Arc::clone(&art));
        Ok(art)
    }

    fn team_stats(&self, ctx: &MatchContext, team_id: i64) -> Result<TeamSeasonStats> {
        match self.db.get_team_season_stats(ctx.league_id, ctx.season, team_id)? {
            Some(s) => Ok(s),
            None => bail!(
                "team_season_stats not found for team {} (league {}, season {})",
                team_id,
                ctx.league_id,
                ctx.season
            ),
        }
    }
}

impl ProbabilitySource for ArtifactStore {
    fn predict(&self, artifact: &str, ctx: &MatchContext) -> Result<Triple> {
        let art = self.load(artifact)?;
        if art.league_id != ctx.league_id {
            bail!(
                "artifact league_id {} does not match request league_id {}",
                art.league_id,
                ctx.league_id
            );
        }

        let home = self.team_stats(ctx, ctx.home_team_id)?;
        let away = self.team_stats(ctx, ctx.away_team_id)?;
        let feats = match_features(&home, &away);
        let x: Vec<f64> = art
            .feature_order
            .iter()
            .map(|f| feats.get(f.as_str()).copied().unwrap_or_default())
            .collect();

        let p = art.predict_from_features(&x);
        debug!(
            "{}: {} vs {} @ {} -> H {:.3} D {:.3} A {:.3}",
            artifact, ctx.home_team_id, ctx.away_team_id, ctx.kickoff_utc, p.h, p.d, p.a
        );
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use std::io::Write;

    fn artifact_json(league_id: i64) -> String {
        serde_json::json!({
            "model_version": "1x2_logreg_v1",
            "feature_version": "features_v1",
            "league_id": league_id,
            "train_seasons": [2022, 2023],
            "feature_order": FEATURES,
            "classes": ["H", "D", "A"],
            "coef": [
                [0.8, 0.0, 0.0, 0.0, 0.2],
                [0.0, 0.0, 0.0, 0.0, 0.0],
                [-0.8, 0.0, 0.0, 0.0, -0.2]
            ],
            "intercept": [0.2, 0.0, -0.2],
            "trained_at_utc": "2024-07-01T00:00:00Z",
            "n_samples": 760
        })
        .to_string()
    }

    fn stats(team_id: i64, points: i32, home_points: i32, away_points: i32) -> TeamSeasonStats {
        TeamSeasonStats {
            league_id: 39,
            season: 2024,
            team_id,
            played: 10,
            wins: 5,
            draws: 2,
            losses: 3,
            goals_for: 15,
            goals_against: 10,
            points,
            home_played: 5,
            home_points,
            away_played: 5,
            away_points,
        }
    }

    fn store_with(files: &[(&str, String)]) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(body.as_bytes()).unwrap();
        }
        let db = Database::open_in_memory().unwrap();
        db.upsert_team_season_stats(&stats(42, 20, 12, 8)).unwrap();
        db.upsert_team_season_stats(&stats(49, 10, 6, 4)).unwrap();
        let store = ArtifactStore::new(dir.path(), db);
        (dir, store)
    }

    fn ctx(league_id: i64) -> MatchContext {
        MatchContext {
            league_id,
            season: 2024,
            home_team_id: 42,
            away_team_id: 49,
            kickoff_utc: Utc::now(),
        }
    }

    #[test]
    fn test_softmax_is_a_distribution() {
        let p = softmax(&[1000.0, 999.0, 998.0]);
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn test_zero_model_is_uniform() {
        let art: LogRegArtifact = serde_json::from_str(&artifact_json(39)).unwrap();
        let art = LogRegArtifact {
            coef: vec![vec![0.0; 5]; 3],
            intercept: vec![0.0; 3],
            ..art
        };
        let p = art.predict_from_features(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_relative_eq!(p.h, 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(p.a, 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_features_are_home_minus_away() {
        let f = match_features(&stats(42, 20, 12, 8), &stats(49, 10, 6, 4));
        assert_relative_eq!(f["delta_ppg"], 1.0, epsilon = 1e-12);
        assert_relative_eq!(f["delta_gd_pg"], 0.0, epsilon = 1e-12);
        // 12/5 home ppg vs 4/5 away ppg
        assert_relative_eq!(f["delta_home_adv"], 1.6, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_from_store() {
        let (_dir, store) = store_with(&[("epl.json", artifact_json(39))]);
        let p = store.predict("epl.json", &ctx(39)).unwrap();
        assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-9);
        assert!(p.h > p.d && p.d > p.a);
        // second call comes from the cache
        assert_eq!(store.predict("epl.json", &ctx(39)).unwrap(), p);
    }

    #[test]
    fn test_league_mismatch_is_an_error() {
        let (_dir, store) = store_with(&[("epl.json", artifact_json(39))]);
        let err = store.predict("epl.json", &ctx(140)).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_missing_stats_is_an_error() {
        let (_dir, store) = store_with(&[("epl.json", artifact_json(39))]);
        let mut c = ctx(39);
        c.away_team_id = 777;
        assert!(store.predict("epl.json", &c).is_err());
    }

    #[test]
    fn test_rejects_bad_filenames_and_shapes() {
        let bad = artifact_json(39).replace("[0.2,0.0,-0.2]", "[0.2,0.0]");
        let (_dir, store) = store_with(&[("bad.json", bad)]);
        assert!(store.load("../etc/passwd").is_err());
        assert!(store.load("nested/x.json").is_err());
        assert!(store.load("missing.json").is_err());
        assert!(store.load("bad.json").is_err());
    }
}
