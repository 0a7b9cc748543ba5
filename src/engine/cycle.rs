//! Scan cycle: fetch -> screen -> evaluate -> decide -> record -> alert.
//!
//! One pass never fails as a whole. Provider outages, evaluator errors,
//! ledger write failures and notifier failures are each recorded in the
//! [`CycleReport`] and the pass carries on with what it can still do.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDispatcher, NotifyError};
use crate::config::AppConfig;
use crate::engine::cooldown::AlertCooldown;
use crate::engine::ledger::{Ledger, LedgerError, NewPosition, Position};
use crate::engine::scanner::{self, ScreeningRules};
use crate::llm::EdgeEvaluator;
use crate::platforms::MarketProvider;
use crate::types::{
    d, Alert, EdgeJudgment, EvaluationFailure, MarketSnapshot, SkipReason,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub market_limit: usize,
    pub screening: ScreeningRules,
    pub min_confidence: u8,
    pub position_size: Decimal,
    pub courtesy_delay: Duration,
    pub max_concurrent_evaluations: usize,
    pub fetch_timeout: Duration,
    pub evaluation_timeout: Duration,
    pub cooldown: ChronoDuration,
    pub realert_confidence_delta: u8,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            market_limit: 50,
            screening: ScreeningRules::default(),
            min_confidence: 7,
            position_size: Decimal::ONE,
            courtesy_delay: Duration::from_secs(6),
            max_concurrent_evaluations: 1,
            fetch_timeout: Duration::from_secs(30),
            evaluation_timeout: Duration::from_secs(60),
            cooldown: ChronoDuration::minutes(240),
            realert_confidence_delta: 2,
        }
    }
}

impl CycleSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let size = d(cfg.scan.position_size);
        Self {
            market_limit: cfg.scan.market_limit,
            screening: ScreeningRules {
                min_liquidity: cfg.scan.min_liquidity,
                price_sum_tolerance: cfg.scan.price_sum_tolerance,
            },
            min_confidence: cfg.scan.min_confidence,
            position_size: if size > Decimal::ZERO { size } else { Decimal::ONE },
            courtesy_delay: Duration::from_secs(cfg.scan.courtesy_delay_secs),
            max_concurrent_evaluations: cfg.scan.max_concurrent_evaluations.max(1),
            fetch_timeout: Duration::from_secs(cfg.scan.fetch_timeout_secs),
            evaluation_timeout: Duration::from_secs(cfg.scan.evaluation_timeout_secs),
            cooldown: cfg.cooldown(),
            realert_confidence_delta: cfg.alerts.realert_confidence_delta,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Summary of one pass.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Snapshots returned by the provider.
    pub markets_scanned: usize,
    pub markets_skipped: Vec<(String, SkipReason)>,
    pub evaluator_failures: Vec<(String, EvaluationFailure)>,
    /// Judged markets under the confidence threshold.
    pub below_threshold: usize,
    /// Actionable markets that already had an Open position.
    pub already_open: usize,
    pub positions_opened: Vec<Position>,
    /// Ledger writes that did not commit: `(market_id, error)`.
    pub persistence_failures: Vec<(String, String)>,
    pub alerts: Vec<Alert>,
    /// Alerts accepted by at least one notifier.
    pub alerts_delivered: usize,
    /// `(market_id, sink, error)`
    pub notification_failures: Vec<(String, String, NotifyError)>,
    pub provider_error: Option<String>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            markets_scanned: 0,
            markets_skipped: Vec::new(),
            evaluator_failures: Vec::new(),
            below_threshold: 0,
            already_open: 0,
            positions_opened: Vec::new(),
            persistence_failures: Vec::new(),
            alerts: Vec::new(),
            alerts_delivered: 0,
            notification_failures: Vec::new(),
            provider_error: None,
        }
    }

    pub fn alerts_emitted(&self) -> usize {
        self.alerts.len()
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} skipped={} eval_failures={} below_threshold={} already_open={} opened={} persist_failures={} alerts={} delivered={}",
            self.markets_scanned,
            self.markets_skipped.len(),
            self.evaluator_failures.len(),
            self.below_threshold,
            self.already_open,
            self.positions_opened.len(),
            self.persistence_failures.len(),
            self.alerts_emitted(),
            self.alerts_delivered,
        )?;
        if let Some(e) = &self.provider_error {
            write!(f, " provider_error=\"{e}\"")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

pub struct ScanCycle<'a> {
    provider: &'a dyn MarketProvider,
    evaluator: &'a dyn EdgeEvaluator,
    dispatcher: &'a AlertDispatcher,
    settings: CycleSettings,
}

impl<'a> ScanCycle<'a> {
    pub fn new(
        provider: &'a dyn MarketProvider,
        evaluator: &'a dyn EdgeEvaluator,
        dispatcher: &'a AlertDispatcher,
        settings: CycleSettings,
    ) -> Self {
        Self {
            provider,
            evaluator,
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one full pass.
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        cooldown: &mut AlertCooldown,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let mut report = CycleReport::new(now);
        info!(
            provider = self.provider.name(),
            model = self.evaluator.model_name(),
            threshold = self.settings.min_confidence,
            "Starting scan cycle"
        );

        if let Err(e) = ledger.refresh() {
            // Writes reload under the lock, so a stale cache is only cosmetic.
            warn!(error = %e, "Ledger refresh failed, using cached positions");
        }
        let pruned = cooldown.prune(now, self.settings.cooldown);
        if pruned > 0 {
            debug!(pruned, "Expired alert cooldowns pruned");
        }
        let dropped = cooldown.retain_pending(|m| ledger.open_position_for(m).is_some());
        if dropped > 0 {
            debug!(dropped, "Pending alerts for closed positions dropped");
        }

        // 1. Fetch
        let mut snapshots = match self.fetch().await {
            Ok(s) if s.is_empty() => {
                info!("Provider returned no markets");
                report.provider_error = Some("provider returned no markets".to_string());
                return report.finish();
            }
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Market fetch failed, skipping cycle");
                report.provider_error = Some(e);
                return report.finish();
            }
        };
        snapshots.truncate(self.settings.market_limit);
        report.markets_scanned = snapshots.len();

        // 2. Screen
        let screened = scanner::screen(snapshots, &self.settings.screening);
        report.markets_skipped.extend(screened.skipped);
        info!(
            scanned = report.markets_scanned,
            eligible = screened.accepted.len(),
            skipped = report.markets_skipped.len(),
            "Markets screened"
        );

        // 3. Evaluate
        let evaluated = self.evaluate_all(screened.accepted).await;

        // 4. Decide and record
        for (snapshot, result) in evaluated {
            match result {
                Err(failure) => {
                    warn!(market_id = %snapshot.market_id, error = %failure, "Evaluation failed");
                    report.evaluator_failures.push((snapshot.market_id, failure));
                }
                Ok(judgment) if !judgment.is_actionable(self.settings.min_confidence) => {
                    debug!(
                        market_id = %snapshot.market_id,
                        confidence = judgment.confidence,
                        "Below threshold"
                    );
                    report.below_threshold += 1;
                }
                Ok(judgment) => {
                    self.act_on(&snapshot, judgment, ledger, cooldown, now, &mut report);
                }
            }
        }

        // 5. Notify, then record the cooldown.
        for alert in &report.alerts {
            let outcome = self.dispatcher.dispatch(alert).await;
            if !outcome.delivered.is_empty() {
                report.alerts_delivered += 1;
            }
            for (sink, err) in outcome.failures {
                report
                    .notification_failures
                    .push((alert.market_id.clone(), sink, err));
            }
            if outcome.accepted {
                cooldown.record(&alert.market_id, now);
            } else {
                cooldown.mark_pending(&alert.market_id, now);
            }
        }

        let report = report.finish();
        info!(summary = %report, "Scan cycle complete");
        report
    }

    async fn fetch(&self) -> Result<Vec<MarketSnapshot>, String> {
        let call = self.provider.fetch_active_markets(
            self.settings.market_limit,
            self.settings.screening.min_liquidity,
        );
        match tokio::time::timeout(self.settings.fetch_timeout, call).await {
            Ok(Ok(snapshots)) => Ok(snapshots),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!(
                "market fetch timed out after {}s",
                self.settings.fetch_timeout.as_secs()
            )),
        }
    }

    /// Evaluate in provider order. Up to `max_concurrent_evaluations` calls
    /// are in flight; every call after the first waits the courtesy delay.
    async fn evaluate_all(
        &self,
        snapshots: Vec<MarketSnapshot>,
    ) -> Vec<(MarketSnapshot, Result<EdgeJudgment, EvaluationFailure>)> {
        let delay = self.settings.courtesy_delay;
        let timeout = self.settings.evaluation_timeout;
        let evaluator = self.evaluator;

        stream::iter(snapshots.into_iter().enumerate())
            .map(move |(i, snapshot)| async move {
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let call = evaluator.evaluate(&snapshot, None);
                let result = match tokio::time::timeout(timeout, call).await {
                    Ok(r) => r.into_judgment(),
                    Err(_) => Err(EvaluationFailure::Timeout(timeout.as_secs())),
                };
                (snapshot, result)
            })
            .buffered(self.settings.max_concurrent_evaluations.max(1))
            .collect()
            .await
    }

    fn act_on(
        &self,
        snapshot: &MarketSnapshot,
        judgment: EdgeJudgment,
        ledger: &mut Ledger,
        cooldown: &AlertCooldown,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let market_id = snapshot.market_id.as_str();
        let cooled = cooldown.should_alert(market_id, now, self.settings.cooldown)
            && !report.alerts.iter().any(|a| a.market_id == market_id);

        if let Some(existing) = ledger.open_position_for(market_id) {
            let delta = judgment.confidence.abs_diff(existing.confidence);
            report.already_open += 1;
            if cooled && cooldown.is_pending(market_id) {
                info!(market_id, "Retrying undelivered alert");
                report.alerts.push(Alert::new(snapshot, judgment, now));
            } else if cooled && delta >= self.settings.realert_confidence_delta {
                info!(market_id, delta, "Re-alerting open position after confidence change");
                report.alerts.push(Alert::new(snapshot, judgment, now));
            } else {
                debug!(market_id, delta, "Position already open, no alert");
            }
            return;
        }

        let side = judgment.recommended_side;
        let new = NewPosition {
            market_id: market_id.to_string(),
            question: snapshot.question.clone(),
            side,
            entry_price: d(snapshot.price_of(side)),
            size: self.settings.position_size,
            confidence: judgment.confidence,
            reasoning: judgment.reasoning.clone(),
        };

        match ledger.open_position(new, now) {
            Ok(position) => {
                report.positions_opened.push(position);
                if cooled {
                    report.alerts.push(Alert::new(snapshot, judgment, now));
                } else {
                    debug!(market_id, "Opened within cooldown window, alert suppressed");
                }
            }
            Err(e @ LedgerError::DuplicateOpenPosition { .. }) => {
                // Another process opened it after our refresh.
                warn!(market_id, error = %e, "Open position appeared concurrently");
                report
                    .markets_skipped
                    .push((market_id.to_string(), SkipReason::AlreadyOpen));
            }
            Err(e) => {
                warn!(market_id, kind = e.kind(), error = %e, "Position not recorded");
                report
                    .persistence_failures
                    .push((market_id.to_string(), format!("{}: {e}", e.kind())));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
