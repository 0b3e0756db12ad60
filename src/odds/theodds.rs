use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::provider::{OddsProvider, ProviderEvent};

/// Odds feed backed by The Odds API v4.
/// Docs: <https://the-odds-api.com/liveapi/guides/v4/>
pub struct TheOddsApi {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
    regions: String,
}

impl TheOddsApi {
    pub fn new(api_key: &str, base_url: Option<&str>, regions: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(TheOddsApi {
            http,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or("https://api.the-odds-api.com/v4")
                .trim_end_matches('/')
                .to_string(),
            regions: regions.to_string(),
        })
    }
}

#[async_trait]
impl OddsProvider for TheOddsApi {
    fn name(&self) -> &str {
        "TheOddsApi"
    }

    async fn fetch_odds(&self, sport_key: &str) -> Result<Vec<ProviderEvent>> {
        let url = format!("{}/sports/{}/odds", self.base_url, sport_key);
        debug!("Fetching h2h odds from {} ({})", url, self.regions);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", self.regions.as_str()),
                ("markets", "h2h"),
                ("oddsFormat", "decimal"),
                ("dateFormat", "iso"),
            ])
            .send()
            .await
            .context("The Odds API request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "The Odds API error {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            );
        }

        if let Some(left) = resp
            .headers()
            .get("x-requests-remaining")
            .and_then(|v| v.to_str().ok())
        {
            debug!("The Odds API requests remaining: {}", left);
        }

        let events: Vec<ProviderEvent> = resp
            .json()
            .await
            .context("Failed to parse The Odds API response")?;
        Ok(events)
    }
}
