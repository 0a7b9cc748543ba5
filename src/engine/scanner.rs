//! Snapshot screening.
//!
//! Drops malformed or illiquid snapshots before they can reach the
//! evaluator or the ledger. Survivors keep provider order.

use tracing::debug;

use crate::types::{MarketSnapshot, SkipReason};

#[derive(Debug, Clone, Copy)]
pub struct ScreeningRules {
    pub min_liquidity: f64,
    pub price_sum_tolerance: f64,
}

impl Default for ScreeningRules {
    fn default() -> Self {
        Self {
            min_liquidity: 1000.0,
            price_sum_tolerance: 0.02,
        }
    }
}

#[derive(Debug, Default)]
pub struct Screened {
    pub accepted: Vec<MarketSnapshot>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Check one snapshot: structure first, then the liquidity floor.
pub fn check(snapshot: &MarketSnapshot, rules: &ScreeningRules) -> Result<(), SkipReason> {
    snapshot.validate(rules.price_sum_tolerance)?;
    if snapshot.liquidity < rules.min_liquidity {
        return Err(SkipReason::BelowLiquidityFloor {
            liquidity: snapshot.liquidity,
            floor: rules.min_liquidity,
        });
    }
    Ok(())
}

pub fn screen(snapshots: Vec<MarketSnapshot>, rules: &ScreeningRules) -> Screened {
    let mut out = Screened::default();
    for snapshot in snapshots {
        match check(&snapshot, rules) {
            Ok(()) => out.accepted.push(snapshot),
            Err(reason) => {
                debug!(market_id = %snapshot.market_id, reason = %reason, "Snapshot skipped");
                out.skipped.push((snapshot.market_id, reason));
            }
        }
    }
    out
}
