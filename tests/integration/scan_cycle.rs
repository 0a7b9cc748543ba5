//! End-to-end scan cycles against the mock provider, a scripted evaluator
//! and a scripted notifier, with the ledger on a real temp directory.

use chrono::{Duration as ChronoDuration, Utc};
use mockall::predicate::eq;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use edgescout::alerts::{AlertDispatcher, NotifyError};
use edgescout::engine::cooldown::AlertCooldown;
use edgescout::engine::cycle::{CycleSettings, ScanCycle};
use edgescout::engine::ledger::Ledger;
use edgescout::storage::{self, FileLock};
use edgescout::types::*;

use crate::mock_provider::*;

fn settings() -> CycleSettings {
    CycleSettings {
        courtesy_delay: Duration::ZERO,
        ..CycleSettings::default()
    }
}

fn open_ledger(dir: &TempDir) -> Ledger {
    Ledger::open(dir.path().join("ledger.json"), Duration::from_millis(200)).unwrap()
}

fn dispatcher(sink: MockSink) -> AlertDispatcher {
    AlertDispatcher::new(Duration::from_secs(5)).with_notifier(Box::new(ScriptedNotifier(sink)))
}

#[tokio::test]
async fn test_high_confidence_market_becomes_position_and_alert() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);

    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .with(eq("m1".to_string()))
        .times(1)
        .returning(|_| judged(8, Side::Yes));
    let mut sink = MockSink::new();
    sink.expect_deliver()
        .with(eq("m1".to_string()), eq(8u8))
        .times(1)
        .returning(|_, _| Ok(()));

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);
    let mut cooldown = AlertCooldown::new();
    let now = Utc::now();

    let report = cycle.run(&mut ledger, &mut cooldown, now).await;

    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.positions_opened.len(), 1);
    assert_eq!(report.alerts_emitted(), 1);
    assert_eq!(report.alerts_delivered, 1);
    assert_eq!(cooldown.last_alerted("m1"), Some(now));

    // The position is on disk, not just in the cache.
    let reopened = open_ledger(&dir);
    let open = reopened.get_open_positions();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].market_id, "m1");
    assert_eq!(open[0].side, Side::Yes);
    assert_eq!(open[0].entry_price, dec!(0.35));
    assert_eq!(open[0].confidence, 8);
}

#[tokio::test]
async fn test_low_confidence_market_is_ignored() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);

    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .times(1)
        .returning(|_| judged(5, Side::Yes));
    let mut sink = MockSink::new();
    sink.expect_deliver().times(0);

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);

    let report = cycle
        .run(&mut ledger, &mut AlertCooldown::new(), Utc::now())
        .await;

    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.below_threshold, 1);
    assert!(report.positions_opened.is_empty());
    assert_eq!(report.alerts_emitted(), 0);
    assert!(open_ledger(&dir).positions().is_empty());
}

#[tokio::test]
async fn test_invalid_snapshot_never_reaches_evaluator() {
    let dir = TempDir::new().unwrap();
    let mut crossed = snapshot("crossed", 0.35);
    crossed.no_price = 0.75;
    let provider = MockProvider::new(vec![crossed]);

    let mut judge = MockJudge::new();
    judge.expect_judge().times(0);
    let mut sink = MockSink::new();
    sink.expect_deliver().times(0);

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);

    let report = cycle
        .run(&mut ledger, &mut AlertCooldown::new(), Utc::now())
        .await;

    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.markets_skipped.len(), 1);
    assert!(matches!(
        report.markets_skipped[0].1,
        SkipReason::PriceSumOutOfTolerance { .. }
    ));
    assert!(ledger.positions().is_empty());
}

#[tokio::test]
async fn test_evaluator_errors_are_isolated() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![
        snapshot("m1", 0.5),
        snapshot("m2", 0.5),
        snapshot("m3", 0.6),
    ]);

    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .with(eq("m1".to_string()))
        .returning(|_| EvaluationResult::ProviderError("429 Too Many Requests".into()));
    judge
        .expect_judge()
        .with(eq("m2".to_string()))
        .returning(|_| EvaluationResult::ParseError("expected value at line 1".into()));
    judge
        .expect_judge()
        .with(eq("m3".to_string()))
        .returning(|_| judged(9, Side::No));
    let mut sink = MockSink::new();
    sink.expect_deliver()
        .with(eq("m3".to_string()), eq(9u8))
        .times(1)
        .returning(|_, _| Ok(()));

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);

    let report = cycle
        .run(&mut ledger, &mut AlertCooldown::new(), Utc::now())
        .await;

    assert_eq!(report.evaluator_failures.len(), 2);
    assert_eq!(report.positions_opened.len(), 1);
    let p = &report.positions_opened[0];
    assert_eq!(p.market_id, "m3");
    assert_eq!(p.side, Side::No);
    assert_eq!(p.entry_price, dec!(0.4));
}

#[tokio::test]
async fn test_provider_outage_skips_cycle() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);
    provider.set_error(Some("gamma 503"));

    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .times(1)
        .returning(|_| judged(8, Side::Yes));
    let mut sink = MockSink::new();
    sink.expect_deliver().times(1).returning(|_, _| Ok(()));

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);
    let mut cooldown = AlertCooldown::new();

    let down = cycle.run(&mut ledger, &mut cooldown, Utc::now()).await;
    assert_eq!(down.markets_scanned, 0);
    assert!(down.provider_error.as_deref().unwrap().contains("gamma 503"));
    assert!(ledger.positions().is_empty());

    provider.set_error(None);
    let up = cycle.run(&mut ledger, &mut cooldown, Utc::now()).await;
    assert!(up.provider_error.is_none());
    assert_eq!(up.positions_opened.len(), 1);
    assert_eq!(provider.fetch_count(), 2);
}

#[tokio::test]
async fn test_held_ledger_lock_blocks_position_and_alert() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);

    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .times(1)
        .returning(|_| judged(8, Side::Yes));
    let mut sink = MockSink::new();
    sink.expect_deliver().times(0);

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);
    let mut cooldown = AlertCooldown::new();

    let lock_path = storage::lock_path_for(ledger.path());
    let held = FileLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();

    let report = cycle.run(&mut ledger, &mut cooldown, Utc::now()).await;
    drop(held);

    assert!(report.positions_opened.is_empty());
    assert_eq!(report.persistence_failures.len(), 1);
    assert_eq!(report.persistence_failures[0].0, "m1");
    assert_eq!(report.alerts_emitted(), 0);
    assert!(cooldown.is_empty());
    assert!(open_ledger(&dir).positions().is_empty());
}

#[tokio::test]
async fn test_failed_delivery_allows_retry_next_cycle() {
    let dir = TempDir::new().unwrap();
    let cooldown_path = dir.path().join("alert_cooldown.json");
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);

    let mut judge = MockJudge::new();
    judge.expect_judge().times(2).returning(|_| judged(8, Side::Yes));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut sink = MockSink::new();
    sink.expect_deliver()
        .with(eq("m1".to_string()), eq(8u8))
        .times(2)
        .returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(NotifyError::Http("connection reset".into()))
            } else {
                Ok(())
            }
        });

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let mut ledger = open_ledger(&dir);
    let t0 = Utc::now();

    let first = {
        let mut cooldown = AlertCooldown::new();
        let report = cycle.run(&mut ledger, &mut cooldown, t0).await;
        cooldown.save(&cooldown_path).unwrap();
        report
    };

    // The position stands even though nobody heard about it.
    assert_eq!(first.positions_opened.len(), 1);
    assert_eq!(first.alerts_delivered, 0);
    assert_eq!(first.notification_failures.len(), 1);
    assert_eq!(first.notification_failures[0].1, "scripted");

    // Same judgment half an hour later, after a restart: the alert goes out.
    let mut cooldown = AlertCooldown::load(&cooldown_path).unwrap();
    assert!(cooldown.is_pending("m1"));
    let t1 = t0 + ChronoDuration::minutes(30);
    let second = cycle.run(&mut ledger, &mut cooldown, t1).await;

    assert!(second.positions_opened.is_empty());
    assert_eq!(second.already_open, 1);
    assert_eq!(second.alerts_emitted(), 1);
    assert_eq!(second.alerts_delivered, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(cooldown.last_alerted("m1"), Some(t1));
    assert!(!cooldown.is_pending("m1"));
    assert_eq!(ledger.positions().len(), 1);
}

#[tokio::test]
async fn test_restart_respects_persisted_cooldown() {
    let dir = TempDir::new().unwrap();
    let cooldown_path = dir.path().join("alert_cooldown.json");
    let provider = MockProvider::new(vec![snapshot("m1", 0.35)]);

    let mut judge = MockJudge::new();
    judge.expect_judge().times(3).returning(|_| judged(8, Side::Yes));
    let mut sink = MockSink::new();
    sink.expect_deliver().times(1).returning(|_, _| Ok(()));

    let evaluator = ScriptedEvaluator(judge);
    let dispatcher = dispatcher(sink);
    let cycle = ScanCycle::new(&provider, &evaluator, &dispatcher, settings());
    let t0 = Utc::now();

    // First process: open and alert, persist the cooldown.
    {
        let mut ledger = open_ledger(&dir);
        let mut cooldown = AlertCooldown::new();
        let report = cycle.run(&mut ledger, &mut cooldown, t0).await;
        assert_eq!(report.alerts_delivered, 1);
        cooldown.save(&cooldown_path).unwrap();

        let id = report.positions_opened[0].position_id;
        ledger
            .close_position(id, dec!(0.5), t0 + ChronoDuration::minutes(10))
            .unwrap();
    }

    // Second process, inside the window: a fresh position, but no alert.
    let mut ledger = open_ledger(&dir);
    let mut cooldown = AlertCooldown::load(&cooldown_path).unwrap();
    let report = cycle
        .run(&mut ledger, &mut cooldown, t0 + ChronoDuration::minutes(20))
        .await;
    assert_eq!(report.positions_opened.len(), 1);
    assert_eq!(report.alerts_emitted(), 0);

    // After the window, same confidence on an open position stays quiet.
    let report = cycle
        .run(&mut ledger, &mut cooldown, t0 + ChronoDuration::hours(5))
        .await;
    assert_eq!(report.already_open, 1);
    assert_eq!(report.alerts_emitted(), 0);
    assert_eq!(ledger.positions().len(), 2);
    assert_eq!(ledger.get_open_positions().len(), 1);
}
