use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::db::models::MatchConfidence;
use crate::pipeline::intel::{SortKey, SortOrder};
use crate::pipeline::MAX_WINDOW_HOURS;

/// Odds resolution, model-vs-market evaluation and audit backfill
#[derive(Parser, Debug, Clone)]
#[command(name = "odds-audit", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "odds_audit.db", global = true)]
    pub database_path: String,

    /// Directory holding model artifact JSON files
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "artifacts/models", global = true)]
    pub artifacts_dir: PathBuf,

    /// Artifact filenames evaluated on every cycle (comma separated)
    #[arg(long = "artifact", env = "ARTIFACTS", value_delimiter = ',', global = true)]
    pub artifacts: Vec<String>,

    /// Max distance between provider commence time and catalog kickoff
    #[arg(long, env = "FIXTURE_TOLERANCE_HOURS", default_value = "6", global = true)]
    pub fixture_tolerance_hours: i64,

    /// Minimum similarity (0.0–1.0) for a fuzzy team-name match
    #[arg(long, env = "FUZZY_THRESHOLD", default_value = "0.80", global = true)]
    pub fuzzy_threshold: f64,

    /// League used when an event has no resolved fixture
    #[arg(long, env = "ASSUME_LEAGUE_ID", global = true)]
    pub assume_league_id: Option<i64>,

    /// Season used when an event has no resolved fixture
    #[arg(long, env = "ASSUME_SEASON", global = true)]
    pub assume_season: Option<i32>,

    /// Only events kicking off within this many hours are evaluated
    #[arg(long, env = "CYCLE_HOURS_AHEAD", default_value = "72", global = true)]
    pub cycle_hours_ahead: i64,

    /// The Odds API base URL
    #[arg(
        long,
        env = "THE_ODDS_API_BASE_URL",
        default_value = "https://api.the-odds-api.com/v4",
        global = true
    )]
    pub the_odds_api_url: String,

    /// The Odds API key (required for ingest)
    #[arg(long, env = "THE_ODDS_API_KEY", global = true)]
    pub the_odds_api_key: Option<String>,

    /// Bookmaker regions requested from The Odds API
    #[arg(long, env = "THE_ODDS_REGIONS", default_value = "eu", global = true)]
    pub regions: String,

    /// Provider sport keys to ingest and evaluate (comma separated)
    #[arg(
        long = "sport-key",
        env = "SPORT_KEYS",
        value_delimiter = ',',
        default_value = "soccer_epl",
        global = true
    )]
    pub sport_keys: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch current odds for every sport key and store events + snapshots
    Ingest,
    /// Resolve, evaluate and record every upcoming event once
    Cycle,
    /// Attach results and metrics to records of finished fixtures
    Backfill {
        /// Re-score every finished fixture, not just pending ones
        #[arg(long)]
        all: bool,
    },
    /// Ranked view over current audit records (JSON)
    Intel(IntelArgs),
    /// Show how one stored event resolves, with candidate teams per side
    Resolve {
        #[arg(long)]
        event_id: String,
    },
    /// Evaluate one stored event, optionally under what-if context
    Evaluate(EvaluateArgs),
    /// Score an artifact on finished catalog fixtures
    EvalArtifact(EvalArtifactArgs),
    /// Load leagues/teams/fixtures/stats from a JSON file
    ImportCatalog {
        #[arg(long)]
        file: PathBuf,
    },
    /// Run ingest, cycle and backfill on intervals until interrupted
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IntelArgs {
    /// Restrict to one sport key
    #[arg(long = "sport")]
    pub sport_key: Option<String>,
    #[arg(long)]
    pub artifact_filename: Option<String>,
    #[arg(long, default_value = "72")]
    pub hours_ahead: i64,
    #[arg(long, default_value = "NONE")]
    pub min_confidence: MatchConfidence,
    #[arg(long, default_value = "50")]
    pub limit: usize,
    #[arg(long, default_value = "0")]
    pub offset: usize,
    #[arg(long, value_enum, default_value = "best_ev")]
    pub sort: SortKey,
    #[arg(long, value_enum, default_value = "desc")]
    pub order: SortOrder,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long)]
    pub event_id: String,
    /// Artifact to evaluate with (defaults to the first configured one)
    #[arg(long = "with-artifact")]
    pub artifact: Option<String>,
    #[arg(long)]
    pub home_team_id: Option<i64>,
    #[arg(long)]
    pub away_team_id: Option<i64>,
    #[arg(long)]
    pub league_id: Option<i64>,
    #[arg(long)]
    pub season: Option<i32>,
}

#[derive(Args, Debug, Clone)]
pub struct EvalArtifactArgs {
    /// Artifact filename inside the artifacts directory
    #[arg(long = "file")]
    pub artifact: String,
    #[arg(long)]
    pub league_id: Option<i64>,
    #[arg(long)]
    pub season: Option<i32>,
    #[arg(long)]
    pub limit: Option<i64>,
    /// Free text stored with the metrics row
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, env = "INGEST_INTERVAL_SECS", default_value = "900")]
    pub ingest_interval_secs: u64,
    #[arg(long, env = "CYCLE_INTERVAL_SECS", default_value = "300")]
    pub cycle_interval_secs: u64,
    #[arg(long, env = "BACKFILL_INTERVAL_SECS", default_value = "1800")]
    pub backfill_interval_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            anyhow::bail!("fuzzy_threshold must be between 0.0 and 1.0");
        }
        let windows = [
            ("fixture_tolerance_hours", self.fixture_tolerance_hours),
            ("cycle_hours_ahead", self.cycle_hours_ahead),
        ];
        for (name, hours) in windows {
            if !(0..=MAX_WINDOW_HOURS).contains(&hours) {
                anyhow::bail!("{} must be between 0 and {}", name, MAX_WINDOW_HOURS);
            }
        }
        let needs_artifacts = matches!(self.command, Command::Cycle | Command::Run(_));
        if needs_artifacts && self.artifacts.is_empty() {
            anyhow::bail!("at least one --artifact (ARTIFACTS) is required for this command");
        }
        let needs_feed = matches!(self.command, Command::Ingest | Command::Run(_));
        if needs_feed && self.the_odds_api_key.is_none() {
            anyhow::bail!("THE_ODDS_API_KEY is required to fetch odds");
        }
        match &self.command {
            Command::Intel(args) => {
                if args.limit == 0 {
                    anyhow::bail!("limit must be > 0");
                }
                if !(0..=MAX_WINDOW_HOURS).contains(&args.hours_ahead) {
                    anyhow::bail!("hours_ahead must be between 0 and {}", MAX_WINDOW_HOURS);
                }
            }
            Command::Evaluate(args) => {
                if args.artifact.is_none() && self.artifacts.is_empty() {
                    anyhow::bail!("evaluate needs --with-artifact or a configured --artifact");
                }
            }
            Command::Run(args) => {
                if args.ingest_interval_secs == 0
                    || args.cycle_interval_secs == 0
                    || args.backfill_interval_secs == 0
                {
                    anyhow::bail!("daemon intervals must be positive");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("odds-audit").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_and_lists() {
        let c = parse(&["--artifact", "epl_v1.json,epl_v2.json", "cycle"]);
        assert_eq!(c.artifacts, vec!["epl_v1.json", "epl_v2.json"]);
        assert_eq!(c.fixture_tolerance_hours, 6);
        assert!((c.fuzzy_threshold - 0.8).abs() < 1e-12);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_intel_args() {
        let c = parse(&["intel", "--sort", "edge_h", "--order", "asc", "--min-confidence", "ilike"]);
        match c.command {
            Command::Intel(args) => {
                assert_eq!(args.sort, SortKey::EdgeH);
                assert_eq!(args.order, SortOrder::Asc);
                assert_eq!(args.min_confidence, MatchConfidence::Ilike);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        assert!(parse(&["cycle"]).validate().is_err());
        assert!(parse(&["--fuzzy-threshold", "1.5", "backfill"]).validate().is_err());
        assert!(parse(&["intel", "--limit", "0"]).validate().is_err());
        assert!(parse(&["backfill", "--all"]).validate().is_ok());
        assert!(parse(&["resolve", "--event-id", "ev-1"]).validate().is_ok());
    }

    #[test]
    fn test_hour_windows_are_bounded() {
        assert!(parse(&["intel", "--hours-ahead", "10000000000"]).validate().is_err());
        assert!(parse(&["intel", "--hours-ahead", "720"]).validate().is_ok());
        assert!(parse(&["--cycle-hours-ahead", "721", "backfill"]).validate().is_err());
        assert!(parse(&["--fixture-tolerance-hours", "9999999999999", "backfill"])
            .validate()
            .is_err());
        assert!(parse(&["--fixture-tolerance-hours=-1", "backfill"]).validate().is_err());
    }
}
