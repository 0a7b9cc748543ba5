//! Market data providers.
//!
//! Defines the `MarketProvider` trait. The only implementation today is the
//! read-only Polymarket Gamma client.

pub mod polymarket;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{MarketSnapshot, MarketState};

/// Source of active market snapshots.
///
/// The scan cycle treats `fetch_active_markets` as a pure function of its
/// arguments; any error or timeout is a soft failure for that cycle.
#[async_trait]
pub trait MarketProvider: Send + Sync {
    /// Up to `limit` active markets, highest volume first.
    ///
    /// `min_liquidity` is a hint; callers still screen every snapshot.
    async fn fetch_active_markets(
        &self,
        limit: usize,
        min_liquidity: f64,
    ) -> Result<Vec<MarketSnapshot>>;

    /// Current prices and closed flag for one market.
    async fn fetch_market_state(&self, market_id: &str) -> Result<MarketState>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
