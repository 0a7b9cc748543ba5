//! Ledger durability across instances, settlement and marking.

use chrono::Utc;
use rust_decimal_macros::dec;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use edgescout::engine::ledger::{Ledger, LedgerError, NewPosition};
use edgescout::engine::settlement;
use edgescout::types::*;

use crate::mock_provider::*;

fn new_position(market_id: &str, side: Side, entry: rust_decimal::Decimal) -> NewPosition {
    NewPosition {
        market_id: market_id.to_string(),
        question: format!("Will {market_id} happen?"),
        side,
        entry_price: entry,
        size: dec!(1),
        confidence: 8,
        reasoning: "underpriced".to_string(),
    }
}

#[test]
fn test_second_instance_sees_writes_and_cannot_double_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    let mut a = Ledger::open(&path, Duration::from_secs(1)).unwrap();
    let mut b = Ledger::open(&path, Duration::from_secs(1)).unwrap();

    a.open_position(new_position("m1", Side::Yes, dec!(0.35)), Utc::now())
        .unwrap();

    // b's cache is stale, but the write path reloads under the lock.
    let err = assert_err!(b.open_position(new_position("m1", Side::No, dec!(0.65)), Utc::now()));
    assert!(matches!(err, LedgerError::DuplicateOpenPosition { .. }));
    assert_eq!(err.kind(), "DuplicateOpenPosition");

    assert_ok!(b.refresh());
    assert_eq!(b.positions().len(), 1);
    assert_eq!(b.positions()[0].side, Side::Yes);
}

#[test]
fn test_closed_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    {
        let mut ledger = Ledger::open(&path, Duration::from_secs(1)).unwrap();
        let win = ledger
            .open_position(new_position("win", Side::Yes, dec!(0.4)), Utc::now())
            .unwrap();
        let loss = ledger
            .open_position(new_position("loss", Side::Yes, dec!(0.6)), Utc::now())
            .unwrap();
        ledger
            .open_position(new_position("open", Side::Yes, dec!(0.5)), Utc::now())
            .unwrap();
        ledger.close_position(win.position_id, dec!(1), Utc::now()).unwrap();
        ledger.close_position(loss.position_id, dec!(0), Utc::now()).unwrap();
    }

    let ledger = Ledger::open(&path, Duration::from_secs(1)).unwrap();
    let summary = ledger.compute_summary();
    assert_eq!(summary.open_count, 1);
    assert_eq!(summary.closed_count, 2);
    assert_eq!(summary.wins, 1);
    assert_eq!(summary.total_realized_pnl, dec!(0.0));
    assert!((summary.win_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_settlement_closes_only_resolved_markets() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35), snapshot("m2", 0.5)]);
    let mut ledger = Ledger::open(dir.path().join("ledger.json"), Duration::from_secs(1)).unwrap();
    ledger
        .open_position(new_position("m1", Side::Yes, dec!(0.35)), Utc::now())
        .unwrap();
    ledger
        .open_position(new_position("m2", Side::Yes, dec!(0.5)), Utc::now())
        .unwrap();

    provider.resolve("m1", 1.0);
    let report =
        settlement::settle_resolved(&provider, &mut ledger, Duration::from_secs(1), Utc::now())
            .await;

    assert_eq!(report.checked, 2);
    assert_eq!(report.settled.len(), 1);
    assert_eq!(report.still_open, 1);
    assert_eq!(report.realized_pnl(), dec!(0.65));
    assert_eq!(ledger.get_open_positions()[0].market_id, "m2");

    // Nothing left to settle for m1 on a second pass.
    let again =
        settlement::settle_resolved(&provider, &mut ledger, Duration::from_secs(1), Utc::now())
            .await;
    assert!(again.settled.is_empty());
    assert_eq!(again.checked, 1);
}

#[tokio::test]
async fn test_settled_no_position_counts_as_win() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);
    let mut ledger = Ledger::open(dir.path().join("ledger.json"), Duration::from_secs(1)).unwrap();
    ledger
        .open_position(new_position("m1", Side::No, dec!(0.65)), Utc::now())
        .unwrap();

    provider.resolve("m1", 0.0);
    let report =
        settlement::settle_resolved(&provider, &mut ledger, Duration::from_secs(1), Utc::now())
            .await;
    assert_eq!(report.realized_pnl(), dec!(0.35));

    let summary = Ledger::open(dir.path().join("ledger.json"), Duration::from_secs(1))
        .unwrap()
        .compute_summary();
    assert_eq!(summary.wins, 1);
    assert_eq!(summary.total_realized_pnl, dec!(0.35));
}

#[tokio::test]
async fn test_settlement_survives_provider_outage() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);
    let mut ledger = Ledger::open(dir.path().join("ledger.json"), Duration::from_secs(1)).unwrap();
    ledger
        .open_position(new_position("m1", Side::Yes, dec!(0.35)), Utc::now())
        .unwrap();

    provider.set_error(Some("timeout"));
    let report =
        settlement::settle_resolved(&provider, &mut ledger, Duration::from_secs(1), Utc::now())
            .await;

    assert_eq!(report.errors.len(), 1);
    assert_eq!(ledger.get_open_positions().len(), 1);
}

#[tokio::test]
async fn test_mark_to_market_from_provider_prices() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.45)]);
    let mut ledger = Ledger::open(dir.path().join("ledger.json"), Duration::from_secs(1)).unwrap();
    let p = ledger
        .open_position(new_position("m1", Side::Yes, dec!(0.35)), Utc::now())
        .unwrap();

    let marks = settlement::fetch_marks(&provider, &ledger, Duration::from_secs(1)).await;
    let unrealized = ledger.mark_to_market(&marks);

    assert_eq!(unrealized.len(), 1);
    assert_eq!(unrealized[&p.position_id], dec!(0.10));
}
