//! Alert delivery.
//!
//! Defines the `Notifier` trait and the `AlertDispatcher` that fans one
//! alert out to every configured sink. Delivery is best-effort: failures
//! are logged and reported, never retried within the same cycle, and never
//! roll back a ledger write.

pub mod moltbook;
pub mod telegram;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::Alert;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("rejected by {sink}: {message}")]
    Rejected { sink: String, message: String },

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NotifyError::Timeout(0)
        } else {
            NotifyError::Http(e.to_string())
        }
    }
}

/// A sink that delivers alerts to humans or other agents.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError>;

    /// Sink name for logging and reports.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Per-alert delivery result.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub delivered: Vec<String>,
    pub failures: Vec<(String, NotifyError)>,
    /// True if at least one sink accepted the alert, or no sinks exist.
    pub accepted: bool,
}

pub struct AlertDispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            notifiers: Vec::new(),
            timeout,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn push(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    /// Send `alert` to every sink, each bounded by the dispatch timeout.
    pub async fn dispatch(&self, alert: &Alert) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for notifier in &self.notifiers {
            let result = match tokio::time::timeout(self.timeout, notifier.send_alert(alert)).await
            {
                Ok(r) => r,
                Err(_) => Err(NotifyError::Timeout(self.timeout.as_secs())),
            };

            match result {
                Ok(()) => {
                    debug!(sink = notifier.name(), market_id = %alert.market_id, "Alert delivered");
                    outcome.delivered.push(notifier.name().to_string());
                }
                Err(e) => {
                    warn!(sink = notifier.name(), market_id = %alert.market_id, error = %e, "Alert delivery failed");
                    outcome.failures.push((notifier.name().to_string(), e));
                }
            }
        }

        outcome.accepted = self.notifiers.is_empty() || !outcome.delivered.is_empty();
        outcome
    }
}

/// Escape characters that break Telegram/Moltbook legacy Markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeJudgment, MarketSnapshot, Side};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedNotifier {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Notifier for FixedNotifier {
        async fn send_alert(&self, _alert: &Alert) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Http("boom".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct SlowNotifier;

    #[async_trait]
    impl Notifier for SlowNotifier {
        async fn send_alert(&self, _alert: &Alert) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn alert() -> Alert {
        Alert::new(
            &MarketSnapshot::sample("m1", 0.35, 10_000.0),
            EdgeJudgment {
                confidence: 8,
                recommended_side: Side::Yes,
                reasoning: "cheap".into(),
            },
            Utc::now(),
        )
    }

    fn fixed(name: &'static str, fail: bool) -> (Box<dyn Notifier>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FixedNotifier {
                name,
                fail,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_no_sinks_counts_as_accepted() {
        let d = AlertDispatcher::new(Duration::from_secs(1));
        let out = d.dispatch(&alert()).await;
        assert!(out.accepted);
        assert!(out.delivered.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_still_accepted() {
        let (ok, ok_calls) = fixed("ok", false);
        let (bad, bad_calls) = fixed("bad", true);
        let d = AlertDispatcher::new(Duration::from_secs(1))
            .with_notifier(bad)
            .with_notifier(ok);

        let out = d.dispatch(&alert()).await;
        assert!(out.accepted);
        assert_eq!(out.delivered, vec!["ok".to_string()]);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failed_not_accepted() {
        let (bad, _) = fixed("bad", true);
        let d = AlertDispatcher::new(Duration::from_secs(1)).with_notifier(bad);
        assert!(!d.dispatch(&alert()).await.accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_times_out() {
        let d = AlertDispatcher::new(Duration::from_secs(1)).with_notifier(Box::new(SlowNotifier));
        let out = d.dispatch(&alert()).await;
        assert!(!out.accepted);
        assert_eq!(out.failures[0].1, NotifyError::Timeout(1));
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b *c* [d]"), "a\\_b \\*c\\* \\[d]");
        assert_eq!(escape_markdown("plain"), "plain");
    }
}
