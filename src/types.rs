//! Shared types for the EDGESCOUT agent.
//!
//! These types form the data model used across all modules. Market
//! snapshots and judgments are cycle-local values; positions live in the
//! ledger (`engine::ledger`).

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept when converting snapshot prices into ledger decimals.
pub const PRICE_DP: u32 = 6;

/// Maximum reasoning length (characters) kept for downstream display.
pub const MAX_REASONING_CHARS: usize = 500;

/// Convert a float price into a ledger decimal, rounded to [`PRICE_DP`].
///
/// Non-finite input maps to zero; snapshots are screened before they get here.
pub fn d(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp(PRICE_DP)
        .normalize()
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A point-in-time view of a binary prediction market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_id: String,
    pub question: String,
    /// Free-text market description, forwarded to the evaluator as context.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: String,
    /// Current YES price (0.0–1.0)
    pub yes_price: f64,
    /// Current NO price (0.0–1.0)
    pub no_price: f64,
    pub volume: f64,
    pub liquidity: f64,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (YES: {:.1}% | NO: {:.1}% | vol: ${:.0} | liq: ${:.0})",
            self.question,
            self.yes_price * 100.0,
            self.no_price * 100.0,
            self.volume,
            self.liquidity,
        )
    }
}

impl MarketSnapshot {
    /// Price of the given side.
    pub fn price_of(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.yes_price,
            Side::No => self.no_price,
        }
    }

    /// Public market page.
    pub fn url(&self) -> String {
        format!("https://polymarket.com/event/{}", self.slug)
    }

    /// Check the structural price/size invariants.
    ///
    /// Both prices must be strictly inside (0, 1) and sum to 1 within
    /// `tolerance`; volume and liquidity must be finite and non-negative.
    pub fn validate(&self, tolerance: f64) -> Result<(), SkipReason> {
        let in_range = |p: f64| p.is_finite() && p > 0.0 && p < 1.0;
        if !in_range(self.yes_price) || !in_range(self.no_price) {
            return Err(SkipReason::PriceOutOfRange {
                yes_price: self.yes_price,
                no_price: self.no_price,
            });
        }

        let sum = self.yes_price + self.no_price;
        if (sum - 1.0).abs() > tolerance {
            return Err(SkipReason::PriceSumOutOfTolerance { sum });
        }

        if !self.volume.is_finite()
            || !self.liquidity.is_finite()
            || self.volume < 0.0
            || self.liquidity < 0.0
        {
            return Err(SkipReason::InvalidVolume);
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn sample(market_id: &str, yes_price: f64, liquidity: f64) -> Self {
        Self {
            market_id: market_id.to_string(),
            question: format!("Will {market_id} resolve YES?"),
            description: None,
            slug: market_id.to_string(),
            yes_price,
            no_price: 1.0 - yes_price,
            volume: 50_000.0,
            liquidity,
            close_time: None,
        }
    }
}

/// Current state of a single market, used for settlement and marking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub market_id: String,
    pub yes_price: f64,
    pub no_price: f64,
    /// Whether trading has ended (market resolved or closed).
    pub closed: bool,
}

impl MarketState {
    pub fn price_of(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.yes_price,
            Side::No => self.no_price,
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// +1 for Yes, -1 for No. Used by the PnL formula.
    pub fn direction_sign(&self) -> Decimal {
        match self {
            Side::Yes => Decimal::ONE,
            Side::No => Decimal::NEGATIVE_ONE,
        }
    }

    /// Convert a price quoted on this side to the Yes-price basis.
    pub fn yes_basis(&self, price: Decimal) -> Decimal {
        match self {
            Side::Yes => price,
            Side::No => Decimal::ONE - price,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "Yes"),
            Side::No => write!(f, "No"),
        }
    }
}

/// Case-insensitive parse of an outcome label.
impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "y" => Ok(Side::Yes),
            "no" | "n" => Ok(Side::No),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Why a snapshot never reached the evaluator (or was not acted upon).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("liquidity ${liquidity:.0} below floor ${floor:.0}")]
    BelowLiquidityFloor { liquidity: f64, floor: f64 },

    #[error("price out of range (yes={yes_price}, no={no_price})")]
    PriceOutOfRange { yes_price: f64, no_price: f64 },

    #[error("yes+no={sum:.4} outside tolerance")]
    PriceSumOutOfTolerance { sum: f64 },

    #[error("negative or non-finite volume/liquidity")]
    InvalidVolume,

    #[error("open position already recorded by another process")]
    AlreadyOpen,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// A validated LLM verdict on one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeJudgment {
    /// 1–10
    pub confidence: u8,
    pub recommended_side: Side,
    pub reasoning: String,
}

impl fmt::Display for EdgeJudgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}/10: {}",
            self.recommended_side, self.confidence, self.reasoning
        )
    }
}

impl EdgeJudgment {
    pub fn is_actionable(&self, threshold: u8) -> bool {
        self.confidence >= threshold
    }

    /// Filled bar for display: one green dot per two points of confidence.
    pub fn confidence_bar(&self) -> String {
        let filled = (self.confidence / 2).min(5) as usize;
        format!("{}{}", "🟢".repeat(filled), "⚪".repeat(5 - filled))
    }
}

/// Outcome of one evaluator call, after strict parse-and-validate.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Judged(EdgeJudgment),
    /// The model answered but the answer was not a valid judgment.
    ParseError(String),
    /// Transport, HTTP, or rate-limit failure.
    ProviderError(String),
}

/// Why a market's evaluation produced no judgment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationFailure {
    #[error("evaluation timed out after {0}s")]
    Timeout(u64),

    #[error("malformed evaluator output: {0}")]
    MalformedOutput(String),

    #[error("evaluator provider error: {0}")]
    Provider(String),
}

impl EvaluationResult {
    /// Split into judgment or failure.
    pub fn into_judgment(self) -> Result<EdgeJudgment, EvaluationFailure> {
        match self {
            EvaluationResult::Judged(j) => Ok(j),
            EvaluationResult::ParseError(e) => Err(EvaluationFailure::MalformedOutput(e)),
            EvaluationResult::ProviderError(e) => Err(EvaluationFailure::Provider(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// An edge notification for one market. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub market_id: String,
    pub question: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub judgment: EdgeJudgment,
    pub generated_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(snapshot: &MarketSnapshot, judgment: EdgeJudgment, now: DateTime<Utc>) -> Self {
        Self {
            market_id: snapshot.market_id.clone(),
            question: snapshot.question.clone(),
            yes_price: snapshot.yes_price,
            no_price: snapshot.no_price,
            judgment,
            generated_at: now,
        }
    }

    /// "Yes: 35.0% | No: 65.0%"
    pub fn odds_line(&self) -> String {
        format!(
            "Yes: {:.1}% | No: {:.1}%",
            self.yes_price * 100.0,
            self.no_price * 100.0
        )
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) -> {}",
            self.market_id,
            self.question,
            self.odds_line(),
            self.judgment
        )
    }
}

/// Truncate `text` to at most `max` characters, never splitting a char.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_d_rounds_float_noise() {
        assert_eq!(d(0.35), dec!(0.35));
        assert_eq!(d(0.1 + 0.2), dec!(0.3));
        assert_eq!(d(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_side_display_and_parse() {
        assert_eq!(Side::Yes.to_string(), "Yes");
        assert_eq!("NO".parse::<Side>().unwrap(), Side::No);
        assert_eq!(" yes ".parse::<Side>().unwrap(), Side::Yes);
        assert!("maybe".parse::<Side>().is_err());
    }

    #[test]
    fn test_side_direction_sign() {
        assert_eq!(Side::Yes.direction_sign(), dec!(1));
        assert_eq!(Side::No.direction_sign(), dec!(-1));
    }

    #[test]
    fn test_side_yes_basis() {
        assert_eq!(Side::Yes.yes_basis(dec!(0.35)), dec!(0.35));
        assert_eq!(Side::No.yes_basis(dec!(0.65)), dec!(0.35));
        assert_eq!(Side::No.yes_basis(dec!(1)), dec!(0));
    }

    #[test]
    fn test_side_serialization() {
        assert_eq!(serde_json::to_string(&Side::Yes).unwrap(), "\"Yes\"");
        let no: Side = serde_json::from_str("\"No\"").unwrap();
        assert_eq!(no, Side::No);
    }

    #[test]
    fn test_validate_accepts_fair_book() {
        let s = MarketSnapshot::sample("m1", 0.35, 10_000.0);
        assert!(s.validate(0.02).is_ok());
    }

    #[test]
    fn test_validate_rejects_crossed_book() {
        let mut s = MarketSnapshot::sample("m1", 0.35, 10_000.0);
        s.no_price = 0.75; // sum 1.10
        assert!(matches!(
            s.validate(0.02),
            Err(SkipReason::PriceSumOutOfTolerance { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_degenerate_prices() {
        let mut s = MarketSnapshot::sample("m1", 0.5, 10_000.0);
        s.yes_price = 0.0;
        s.no_price = 1.0;
        assert!(matches!(s.validate(0.02), Err(SkipReason::PriceOutOfRange { .. })));

        s.yes_price = f64::NAN;
        assert!(matches!(s.validate(0.02), Err(SkipReason::PriceOutOfRange { .. })));
    }

    #[test]
    fn test_validate_rejects_negative_liquidity() {
        let s = MarketSnapshot::sample("m1", 0.5, -1.0);
        assert_eq!(s.validate(0.02), Err(SkipReason::InvalidVolume));
    }

    #[test]
    fn test_confidence_bar() {
        let j = EdgeJudgment {
            confidence: 8,
            recommended_side: Side::Yes,
            reasoning: String::new(),
        };
        assert_eq!(j.confidence_bar(), "🟢🟢🟢🟢⚪");
        assert!(j.is_actionable(7));
        assert!(!j.is_actionable(9));
    }

    #[test]
    fn test_into_judgment_maps_failures() {
        let r = EvaluationResult::ParseError("bad json".into());
        assert_eq!(
            r.into_judgment(),
            Err(EvaluationFailure::MalformedOutput("bad json".into()))
        );
        let r = EvaluationResult::ProviderError("429".into());
        assert!(matches!(r.into_judgment(), Err(EvaluationFailure::Provider(_))));
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("🟢🟢🟢", 2), "🟢🟢...");
    }

    #[test]
    fn test_alert_odds_line() {
        let s = MarketSnapshot::sample("m1", 0.35, 10_000.0);
        let j = EdgeJudgment {
            confidence: 8,
            recommended_side: Side::Yes,
            reasoning: "cheap".into(),
        };
        let alert = Alert::new(&s, j, Utc::now());
        assert_eq!(alert.odds_line(), "Yes: 35.0% | No: 65.0%");
        assert!(alert.to_string().contains("m1"));
    }
}
