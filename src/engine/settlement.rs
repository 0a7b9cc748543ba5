//! Settlement of resolved markets and mark-to-market lookups.
//!
//! Both walk the ledger's Open positions and ask the provider for each
//! market's current state. A failed lookup skips that position only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::ledger::{Ledger, Position};
use crate::platforms::MarketProvider;
use crate::types::{d, MarketState, Side};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SettlementReport {
    /// Open positions looked at.
    pub checked: usize,
    pub settled: Vec<Position>,
    /// Markets still trading.
    pub still_open: usize,
    /// `(market_id, error)` for failed lookups or ledger writes.
    pub errors: Vec<(String, String)>,
}

impl SettlementReport {
    pub fn realized_pnl(&self) -> Decimal {
        self.settled.iter().filter_map(|p| p.realized_pnl()).sum()
    }
}

async fn fetch_state(
    provider: &dyn MarketProvider,
    market_id: &str,
    timeout: Duration,
) -> Result<MarketState, String> {
    match tokio::time::timeout(timeout, provider.fetch_market_state(market_id)).await {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("state fetch timed out after {}s", timeout.as_secs())),
    }
}

/// Close every Open position whose market has stopped trading, at the
/// market's final price for the position's side.
pub async fn settle_resolved(
    provider: &dyn MarketProvider,
    ledger: &mut Ledger,
    fetch_timeout: Duration,
    now: DateTime<Utc>,
) -> SettlementReport {
    let mut report = SettlementReport::default();
    if let Err(e) = ledger.refresh() {
        warn!(error = %e, "Ledger refresh failed before settlement");
    }

    let open: Vec<(Uuid, String, Side)> = ledger
        .get_open_positions()
        .into_iter()
        .map(|p| (p.position_id, p.market_id.clone(), p.side))
        .collect();
    report.checked = open.len();

    for (position_id, market_id, side) in open {
        let state = match fetch_state(provider, &market_id, fetch_timeout).await {
            Ok(s) => s,
            Err(e) => {
                warn!(market_id = %market_id, error = %e, "Settlement lookup failed");
                report.errors.push((market_id, e));
                continue;
            }
        };

        if !state.closed {
            report.still_open += 1;
            continue;
        }

        let exit_price = d(state.price_of(side)).clamp(Decimal::ZERO, Decimal::ONE);
        match ledger.close_position(position_id, exit_price, now) {
            Ok(closed) => report.settled.push(closed),
            Err(e) => {
                warn!(market_id = %market_id, kind = e.kind(), error = %e, "Settlement not recorded");
                report.errors.push((market_id, format!("{}: {e}", e.kind())));
            }
        }
    }

    info!(
        checked = report.checked,
        settled = report.settled.len(),
        still_open = report.still_open,
        errors = report.errors.len(),
        realized_pnl = %report.realized_pnl(),
        "Settlement pass complete"
    );
    report
}

/// Current side-basis price for each Open position's market, keyed by
/// market id. Markets that fail to load are left out.
pub async fn fetch_marks(
    provider: &dyn MarketProvider,
    ledger: &Ledger,
    fetch_timeout: Duration,
) -> HashMap<String, Decimal> {
    let mut marks = HashMap::new();
    for position in ledger.get_open_positions() {
        if marks.contains_key(&position.market_id) {
            continue;
        }
        match fetch_state(provider, &position.market_id, fetch_timeout).await {
            Ok(state) => {
                marks.insert(position.market_id.clone(), d(state.price_of(position.side)));
            }
            Err(e) => warn!(market_id = %position.market_id, error = %e, "Mark lookup failed"),
        }
    }
    marks
}
