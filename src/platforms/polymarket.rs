//! Polymarket integration.
//!
//! Uses the Gamma API for market discovery (no auth required). Only binary
//! markets are supported: `outcomePrices` must carry exactly two prices,
//! YES first.
//!
//! Gamma API: https://gamma-api.polymarket.com

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, info};

use crate::platforms::MarketProvider;
use crate::types::{MarketSnapshot, MarketState};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
const USER_AGENT: &str = concat!("edgescout/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Gamma API response types
// ---------------------------------------------------------------------------

/// Gamma returns several numeric fields either as numbers or as strings.
fn de_flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

fn de_flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }))
}

#[derive(Debug, Deserialize, Clone)]
pub struct GammaMarket {
    #[serde(default, deserialize_with = "de_flexible_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub closed: bool,
    /// Either a JSON-encoded string `"[\"0.65\",\"0.35\"]"` or a plain array.
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "de_flexible_f64")]
    pub volume: Option<f64>,
    #[serde(default, rename = "volumeNum", deserialize_with = "de_flexible_f64")]
    pub volume_num: Option<f64>,
    #[serde(default, deserialize_with = "de_flexible_f64")]
    pub liquidity: Option<f64>,
    #[serde(default, rename = "liquidityNum", deserialize_with = "de_flexible_f64")]
    pub liquidity_num: Option<f64>,
}

impl GammaMarket {
    fn market_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn volume(&self) -> f64 {
        self.volume.or(self.volume_num).unwrap_or(0.0)
    }

    fn liquidity(&self) -> f64 {
        self.liquidity.or(self.liquidity_num).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    base_url: String,
}

impl PolymarketClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(GAMMA_API_URL, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch active markets from the Gamma API, ordered by volume.
    pub async fn fetch_gamma_markets(
        &self,
        limit: usize,
        min_liquidity: f64,
    ) -> Result<Vec<GammaMarket>> {
        let url = format!("{}/markets", self.base_url);
        debug!(limit, min_liquidity, "Fetching Polymarket markets from Gamma API");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("closed", "false".to_string()),
                ("limit", limit.to_string()),
                ("order", "volume".to_string()),
                ("ascending", "false".to_string()),
                ("liquidity_num_min", min_liquidity.to_string()),
            ])
            .send()
            .await
            .context("Gamma API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status}: {body}");
        }

        let markets: Vec<GammaMarket> = resp
            .json()
            .await
            .context("Failed to parse Gamma markets response")?;

        info!(count = markets.len(), "Fetched raw Gamma markets");
        Ok(markets)
    }

    /// Fetch one market by id.
    pub async fn fetch_gamma_market(&self, market_id: &str) -> Result<GammaMarket> {
        let url = format!("{}/markets/{}", self.base_url, market_id);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Gamma API request failed for market {market_id}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status} for market {market_id}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Gamma market {market_id}"))
    }

    /// Convert a Gamma market into a snapshot.
    ///
    /// Returns `None` when the id, question, or a two-outcome price pair is
    /// missing. Price sanity is left to the scan cycle's screening.
    pub fn convert_market(gm: &GammaMarket) -> Option<MarketSnapshot> {
        let market_id = gm.market_id()?;
        if gm.question.trim().is_empty() {
            return None;
        }
        let (yes_price, no_price) = Self::parse_outcome_prices(gm.outcome_prices.as_ref()?)?;

        Some(MarketSnapshot {
            market_id: market_id.to_string(),
            question: gm.question.clone(),
            description: gm.description.clone().filter(|d| !d.trim().is_empty()),
            slug: gm.slug.clone(),
            yes_price,
            no_price,
            volume: gm.volume(),
            liquidity: gm.liquidity(),
            close_time: gm.end_date.as_deref().and_then(parse_end_date),
        })
    }

    /// Parse Gamma outcome prices. Exactly two entries, YES first.
    pub fn parse_outcome_prices(value: &serde_json::Value) -> Option<(f64, f64)> {
        let items: Vec<serde_json::Value> = match value {
            serde_json::Value::String(s) => serde_json::from_str(s).ok()?,
            serde_json::Value::Array(a) => a.clone(),
            _ => return None,
        };
        if items.len() != 2 {
            return None;
        }

        let as_f64 = |v: &serde_json::Value| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Some((as_f64(&items[0])?, as_f64(&items[1])?))
    }
}

fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|nd| nd.and_hms_opt(23, 59, 59))
                .map(|ndt| ndt.and_utc())
        })
}

// ---------------------------------------------------------------------------
// MarketProvider trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketProvider for PolymarketClient {
    async fn fetch_active_markets(
        &self,
        limit: usize,
        min_liquidity: f64,
    ) -> Result<Vec<MarketSnapshot>> {
        let gamma_markets = self.fetch_gamma_markets(limit, min_liquidity).await?;
        let raw = gamma_markets.len();

        let markets: Vec<MarketSnapshot> = gamma_markets
            .iter()
            .filter_map(|gm| {
                let converted = Self::convert_market(gm);
                if converted.is_none() {
                    debug!(id = ?gm.id, question = %gm.question, "Dropping unparseable Gamma market");
                }
                converted
            })
            .take(limit)
            .collect();

        info!(raw, parsed = markets.len(), "Polymarket snapshots ready");
        Ok(markets)
    }

    async fn fetch_market_state(&self, market_id: &str) -> Result<MarketState> {
        let gm = self.fetch_gamma_market(market_id).await?;
        let (yes_price, no_price) = gm
            .outcome_prices
            .as_ref()
            .and_then(Self::parse_outcome_prices)
            .with_context(|| format!("Market {market_id} has no binary outcome prices"))?;

        Ok(MarketState {
            market_id: market_id.to_string(),
            yes_price,
            no_price,
            closed: gm.closed,
        })
    }

    fn name(&self) -> &str {
        "polymarket"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
