//! Mock market provider and evaluator/notifier doubles for integration
//! testing.
//!
//! `MockProvider` is a deterministic `MarketProvider` whose snapshots,
//! per-market states and failure mode are controllable from test code.
//! Evaluator and notifier behaviour is scripted through `mockall`
//! expectations on small synchronous traits, wrapped to satisfy the
//! crate's async traits.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mockall::automock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use edgescout::alerts::{Notifier, NotifyError};
use edgescout::llm::EdgeEvaluator;
use edgescout::platforms::MarketProvider;
use edgescout::types::*;

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A liquid, well-formed snapshot with `no = 1 - yes`.
pub fn snapshot(market_id: &str, yes_price: f64) -> MarketSnapshot {
    MarketSnapshot {
        market_id: market_id.to_string(),
        question: format!("Will {market_id} happen?"),
        description: Some("Resolves YES if it happens.".to_string()),
        slug: market_id.to_string(),
        yes_price,
        no_price: 1.0 - yes_price,
        volume: 250_000.0,
        liquidity: 25_000.0,
        close_time: None,
    }
}

pub fn judged(confidence: u8, side: Side) -> EvaluationResult {
    EvaluationResult::Judged(EdgeJudgment {
        confidence,
        recommended_side: side,
        reasoning: format!("{side} is underpriced"),
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct MockProvider {
    markets: Vec<MarketSnapshot>,
    states: Arc<Mutex<HashMap<String, MarketState>>>,
    /// If set, every call fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
    fetches: Arc<Mutex<usize>>,
}

impl MockProvider {
    pub fn new(markets: Vec<MarketSnapshot>) -> Self {
        Self {
            markets,
            states: Arc::new(Mutex::new(HashMap::new())),
            force_error: Arc::new(Mutex::new(None)),
            fetches: Arc::new(Mutex::new(0)),
        }
    }

    pub fn set_error(&self, msg: Option<&str>) {
        *self.force_error.lock().unwrap() = msg.map(String::from);
    }

    /// Mark `market_id` resolved at `yes_price`.
    pub fn resolve(&self, market_id: &str, yes_price: f64) {
        self.states.lock().unwrap().insert(
            market_id.to_string(),
            MarketState {
                market_id: market_id.to_string(),
                yes_price,
                no_price: 1.0 - yes_price,
                closed: true,
            },
        );
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap()
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketProvider for MockProvider {
    async fn fetch_active_markets(
        &self,
        limit: usize,
        _min_liquidity: f64,
    ) -> Result<Vec<MarketSnapshot>> {
        *self.fetches.lock().unwrap() += 1;
        self.check_error()?;
        Ok(self.markets.iter().take(limit).cloned().collect())
    }

    async fn fetch_market_state(&self, market_id: &str) -> Result<MarketState> {
        self.check_error()?;
        if let Some(state) = self.states.lock().unwrap().get(market_id) {
            return Ok(state.clone());
        }
        let snap = self
            .markets
            .iter()
            .find(|m| m.market_id == market_id)
            .ok_or_else(|| anyhow!("Market not found: {market_id}"))?;
        Ok(MarketState {
            market_id: market_id.to_string(),
            yes_price: snap.yes_price,
            no_price: snap.no_price,
            closed: false,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[automock]
pub trait Judge {
    fn judge(&self, market_id: String) -> EvaluationResult;
}

pub struct ScriptedEvaluator(pub MockJudge);

#[async_trait]
impl EdgeEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, market: &MarketSnapshot, _context: Option<&str>) -> EvaluationResult {
        self.0.judge(market.market_id.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[automock]
pub trait Sink {
    fn deliver(&self, market_id: String, confidence: u8) -> Result<(), NotifyError>;
}

pub struct ScriptedNotifier(pub MockSink);

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.0
            .deliver(alert.market_id.clone(), alert.judgment.confidence)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
