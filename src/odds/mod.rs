pub mod provider;
pub mod theodds;

pub use provider::{OddsProvider, ProviderEvent};
pub use theodds::TheOddsApi;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::models::{OddsEvent, OddsSnapshot};
use crate::db::Database;

const H2H: &str = "h2h";
const DRAW_NAMES: &[&str] = &["draw", "tie", "empate"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub events: usize,
    pub new_events: usize,
    pub snapshots: usize,
}

/// Split a provider event into the stored event and one 1X2 snapshot per
/// bookmaker h2h market. Outcomes are mapped by name; unknown names are
/// ignored, so a line without a draw price yields a snapshot with a null
/// draw leg, and a line where nothing matched is dropped.
///
/// Capture time is the market's `last_update`, else the bookmaker's, else
/// `now`. Lines without any timestamp are therefore recorded afresh on every
/// ingest, which keeps them current as the latest snapshot.
pub fn parse_event(ev: &ProviderEvent, now: DateTime<Utc>) -> (OddsEvent, Vec<OddsSnapshot>) {
    let event = OddsEvent::new(&ev.id, &ev.sport_key, ev.commence_time, &ev.home_team, &ev.away_team);
    let home = ev.home_team.trim();
    let away = ev.away_team.trim();

    let mut snapshots = Vec::new();
    for bk in &ev.bookmakers {
        for market in bk.markets.iter().filter(|m| m.key.eq_ignore_ascii_case(H2H)) {
            let mut snap = OddsSnapshot {
                id: None,
                event_id: ev.id.clone(),
                bookmaker: bk.key.clone(),
                market: market.key.to_lowercase(),
                odds_home: None,
                odds_draw: None,
                odds_away: None,
                captured_at_utc: market.last_update.or(bk.last_update).unwrap_or(now),
            };
            for o in &market.outcomes {
                let name = o.name.trim();
                if name.eq_ignore_ascii_case(home) {
                    snap.odds_home = Some(o.price);
                } else if name.eq_ignore_ascii_case(away) {
                    snap.odds_away = Some(o.price);
                } else if DRAW_NAMES.iter().any(|d| name.eq_ignore_ascii_case(d)) {
                    snap.odds_draw = Some(o.price);
                }
            }
            if snap.odds_home.is_none() && snap.odds_draw.is_none() && snap.odds_away.is_none() {
                debug!("{} / {}: no outcome matched the fixture, line skipped", ev.id, bk.key);
                continue;
            }
            snapshots.push(snap);
        }
    }
    (event, snapshots)
}

/// Store a batch of provider events: each event is inserted once, snapshots
/// are appended (re-captures of the same line are ignored).
pub fn store_events(db: &Database, events: &[ProviderEvent], now: DateTime<Utc>) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    for ev in events {
        let (event, snapshots) = parse_event(ev, now);
        summary.events += 1;
        if db.insert_odds_event(&event)? {
            summary.new_events += 1;
        }
        for snap in &snapshots {
            if db.insert_snapshot(snap)? {
                summary.snapshots += 1;
            }
        }
    }
    Ok(summary)
}

/// Fetch all sports concurrently. A failing sport is logged and skipped.
pub async fn ingest_all(
    db: &Database,
    provider: Arc<dyn OddsProvider>,
    sport_keys: &[String],
) -> IngestSummary {
    let fetches = sport_keys.iter().map(|key| {
        let provider = Arc::clone(&provider);
        async move { (key, provider.fetch_odds(key).await) }
    });

    let mut total = IngestSummary::default();
    for (key, result) in join_all(fetches).await {
        let stored = result.and_then(|events| store_events(db, &events, Utc::now()));
        match stored {
            Ok(s) => {
                info!(
                    "{} {}: {} events ({} new), {} new snapshots",
                    provider.name(),
                    key,
                    s.events,
                    s.new_events,
                    s.snapshots
                );
                total.events += s.events;
                total.new_events += s.new_events;
                total.snapshots += s.snapshots;
            }
            Err(e) => warn!("Odds ingest for {} failed: {:#}", key, e),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    const PAYLOAD: &str = r#"[
      {
        "id": "e912304de2b2ce35b473ce2ecd3d1502",
        "sport_key": "soccer_epl",
        "sport_title": "EPL",
        "commence_time": "2025-02-01T15:00:00Z",
        "home_team": "Arsenal",
        "away_team": "Chelsea",
        "bookmakers": [
          {
            "key": "pinnacle",
            "title": "Pinnacle",
            "last_update": "2025-02-01T09:58:00Z",
            "markets": [
              {
                "key": "h2h",
                "last_update": "2025-02-01T09:59:30Z",
                "outcomes": [
                  {"name": "Arsenal", "price": 2.0},
                  {"name": "Chelsea", "price": 4.0},
                  {"name": "Draw", "price": 3.5}
                ]
              }
            ]
          },
          {
            "key": "onlyhome",
            "title": "Partial",
            "markets": [
              {"key": "h2h", "outcomes": [{"name": "ARSENAL", "price": 1.95}, {"name": "Chelsea", "price": 4.2}]},
              {"key": "totals", "outcomes": [{"name": "Over", "price": 1.9}]}
            ]
          },
          {
            "key": "mislabelled",
            "title": "Other fixture names",
            "last_update": "2025-02-01T09:50:00Z",
            "markets": [
              {"key": "h2h", "outcomes": [{"name": "Arsenal FC", "price": 2.1}, {"name": "Chelsea FC", "price": 3.9}]}
            ]
          }
        ]
      }
    ]"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap()
    }

    fn events() -> Vec<ProviderEvent> {
        serde_json::from_str(PAYLOAD).unwrap()
    }

    #[test]
    fn test_parse_maps_outcomes_and_capture_time() {
        let (event, snaps) = parse_event(&events()[0], now());
        assert_eq!(event.home_name, "Arsenal");
        assert_eq!(snaps.len(), 2);
        assert!(snaps.iter().all(|s| s.bookmaker != "mislabelled"));

        let pin = &snaps[0];
        assert_eq!((pin.odds_home, pin.odds_draw, pin.odds_away), (Some(2.0), Some(3.5), Some(4.0)));
        assert_eq!(pin.captured_at_utc, Utc.with_ymd_and_hms(2025, 2, 1, 9, 59, 30).unwrap());

        let partial = &snaps[1];
        assert_eq!(partial.odds_home, Some(1.95));
        assert_eq!(partial.odds_draw, None);
        assert_eq!(partial.captured_at_utc, now());
    }

    #[test]
    fn test_untimestamped_line_is_recaptured_each_ingest() {
        let db = Database::open_in_memory().unwrap();
        store_events(&db, &events(), now()).unwrap();
        let later = now() + Duration::minutes(15);
        let again = store_events(&db, &events(), later).unwrap();
        // only the line without last_update gets a new row
        assert_eq!(again.snapshots, 1);
        let latest = db.latest_snapshot("e912304de2b2ce35b473ce2ecd3d1502").unwrap().unwrap();
        assert_eq!((latest.bookmaker.as_str(), latest.captured_at_utc), ("onlyhome", later));
    }

    #[test]
    fn test_store_is_insert_once() {
        let db = Database::open_in_memory().unwrap();
        let first = store_events(&db, &events(), now()).unwrap();
        assert_eq!(first, IngestSummary { events: 1, new_events: 1, snapshots: 2 });
        let again = store_events(&db, &events(), now()).unwrap();
        assert_eq!(again, IngestSummary { events: 1, new_events: 0, snapshots: 0 });
        assert_eq!(db.count_snapshots("e912304de2b2ce35b473ce2ecd3d1502").unwrap(), 2);
    }

    struct FakeProvider;

    #[async_trait]
    impl OddsProvider for FakeProvider {
        async fn fetch_odds(&self, sport_key: &str) -> Result<Vec<ProviderEvent>> {
            match sport_key {
                "soccer_epl" => Ok(serde_json::from_str(PAYLOAD)?),
                other => anyhow::bail!("unknown sport {}", other),
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_ingest_all_skips_failing_sport() {
        let db = Database::open_in_memory().unwrap();
        let keys = vec!["soccer_epl".to_string(), "soccer_mars".to_string()];
        let total = ingest_all(&db, Arc::new(FakeProvider), &keys).await;
        assert_eq!(total.events, 1);
        assert_eq!(db.list_odds_events(None).unwrap().len(), 1);
    }
}
