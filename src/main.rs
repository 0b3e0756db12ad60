use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod catalog;
mod config;
mod db;
mod model;
mod odds;
mod pipeline;

use config::{Command, Config, EvalArtifactArgs, EvaluateArgs, IntelArgs, RunArgs};
use db::Database;
use model::artifact::ArtifactStore;
use model::eval::{evaluate_artifact, EvalFilter};
use odds::{OddsProvider, TheOddsApi};
use pipeline::evaluator::ContextOverride;
use pipeline::intel::{self, IntelQuery};
use pipeline::{EngineSettings, MetricsBackfiller, PipelineEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    match config.command.clone() {
        Command::Ingest => {
            let provider = odds_provider(&config)?;
            let summary = odds::ingest_all(&db, provider, &config.sport_keys).await;
            print_json(&summary)?;
        }
        Command::Cycle => {
            let engine = build_engine(&config, &db)?;
            for key in &config.sport_keys {
                let summary = engine.run_cycle(Some(key), Utc::now())?;
                print_json(&summary)?;
            }
        }
        Command::Backfill { all } => {
            let summary = MetricsBackfiller::new(db.clone()).run_pending(all, Utc::now())?;
            print_json(&summary)?;
        }
        Command::Intel(args) => {
            let report = intel::query(&db, &intel_query(args), Utc::now())?;
            print_json(&report)?;
        }
        Command::Resolve { event_id } => {
            let detail = build_engine(&config, &db)?.resolve_event(&event_id)?;
            print_json(&detail)?;
        }
        Command::Evaluate(args) => run_evaluate(&config, &db, args)?,
        Command::EvalArtifact(args) => run_eval_artifact(&config, &db, args)?,
        Command::ImportCatalog { file } => {
            let cat = catalog::load_file(&file)?;
            let summary = catalog::import(&db, &cat, Utc::now())?;
            print_json(&summary)?;
        }
        Command::Run(args) => run_daemon(&config, db, args).await?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_engine(config: &Config, db: &Database) -> Result<PipelineEngine> {
    let store = ArtifactStore::new(config.artifacts_dir.clone(), db.clone());
    PipelineEngine::new(
        db.clone(),
        Arc::new(store),
        EngineSettings {
            artifacts: config.artifacts.clone(),
            assume_league_id: config.assume_league_id,
            assume_season: config.assume_season,
            cycle_hours_ahead: config.cycle_hours_ahead,
            fuzzy_threshold: config.fuzzy_threshold,
            fixture_tolerance_hours: config.fixture_tolerance_hours,
        },
    )
}

fn odds_provider(config: &Config) -> Result<Arc<dyn OddsProvider>> {
    let key = config
        .the_odds_api_key
        .as_deref()
        .context("THE_ODDS_API_KEY not set")?;
    Ok(Arc::new(TheOddsApi::new(
        key,
        Some(&config.the_odds_api_url),
        &config.regions,
    )?))
}

fn intel_query(args: IntelArgs) -> IntelQuery {
    IntelQuery {
        sport_key: args.sport_key,
        artifact_filename: args.artifact_filename,
        hours_ahead: args.hours_ahead,
        min_confidence: args.min_confidence,
        limit: args.limit,
        offset: args.offset,
        sort: args.sort,
        order: args.order,
    }
}

fn run_evaluate(config: &Config, db: &Database, args: EvaluateArgs) -> Result<()> {
    let artifact = match args.artifact.or_else(|| config.artifacts.first().cloned()) {
        Some(a) => a,
        None => anyhow::bail!("no artifact configured"),
    };
    let overrides = ContextOverride {
        league_id: args.league_id,
        season: args.season,
        home_team_id: args.home_team_id,
        away_team_id: args.away_team_id,
    };
    let engine = build_engine(config, db)?;
    let rec = engine.evaluate_event(&args.event_id, &artifact, Some(&overrides), Utc::now())?;
    print_json(&rec)
}

fn run_eval_artifact(config: &Config, db: &Database, args: EvalArtifactArgs) -> Result<()> {
    let store = ArtifactStore::new(config.artifacts_dir.clone(), db.clone());
    let filter = EvalFilter {
        league_id: args.league_id,
        season: args.season,
        limit: args.limit,
        notes: args.notes,
    };
    let metrics = evaluate_artifact(db, &store, &args.artifact, &filter)?;
    print_json(&metrics)
}

/// Interval loop: ingest → cycle → backfill. SQLite-heavy passes run on the
/// blocking pool so the timers keep ticking.
async fn run_daemon(config: &Config, db: Database, args: RunArgs) -> Result<()> {
    let provider = odds_provider(config)?;
    let engine = Arc::new(build_engine(config, &db)?);
    let backfiller = MetricsBackfiller::new(db.clone());
    let sport_keys = config.sport_keys.clone();

    info!(
        "Daemon started: {} sport key(s), {} artifact(s); ingest every {}s, cycle every {}s, backfill every {}s",
        sport_keys.len(),
        config.artifacts.len(),
        args.ingest_interval_secs,
        args.cycle_interval_secs,
        args.backfill_interval_secs
    );

    let mut ingest_interval = tokio::time::interval(Duration::from_secs(args.ingest_interval_secs));
    let mut cycle_interval = tokio::time::interval(Duration::from_secs(args.cycle_interval_secs));
    let mut backfill_interval = tokio::time::interval(Duration::from_secs(args.backfill_interval_secs));

    loop {
        tokio::select! {
            _ = ingest_interval.tick() => {
                odds::ingest_all(&db, Arc::clone(&provider), &sport_keys).await;
            }
            _ = cycle_interval.tick() => {
                let engine = Arc::clone(&engine);
                let keys = sport_keys.clone();
                let res = tokio::task::spawn_blocking(move || -> Result<()> {
                    for key in &keys {
                        engine.run_cycle(Some(key), Utc::now())?;
                    }
                    Ok(())
                })
                .await;
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Cycle failed: {:#}", e),
                    Err(e) => error!("Cycle task panicked: {}", e),
                }
            }
            _ = backfill_interval.tick() => {
                let bf = backfiller.clone();
                match tokio::task::spawn_blocking(move || bf.run_pending(false, Utc::now())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Backfill failed: {:#}", e),
                    Err(e) => error!("Backfill task panicked: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
