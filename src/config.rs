//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a missing file or section still yields a
//! working configuration. Secrets (API keys, bot tokens) are referenced by
//! env-var name in the config and resolved at runtime (after `.env` is
//! loaded) into `SecretString`s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub scan: ScanConfig,
    pub llm: LlmConfig,
    pub ledger: LedgerConfig,
    pub alerts: AlertsConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub scan_interval_minutes: u64,
    /// Directory holding the ledger, cooldown and heartbeat files.
    pub data_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "EDGESCOUT".to_string(),
            scan_interval_minutes: 30,
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// Markets requested per cycle (highest volume first).
    pub market_limit: usize,
    pub min_liquidity: f64,
    /// Allowed `|yes + no - 1|`.
    pub price_sum_tolerance: f64,
    pub min_confidence: u8,
    /// Paper notional per position.
    pub position_size: f64,
    /// Pause between evaluator calls.
    pub courtesy_delay_secs: u64,
    pub max_concurrent_evaluations: usize,
    pub fetch_timeout_secs: u64,
    pub evaluation_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            market_limit: 50,
            min_liquidity: 1000.0,
            price_sum_tolerance: 0.02,
            min_confidence: 7,
            position_size: 1.0,
            courtesy_delay_secs: 6,
            max_concurrent_evaluations: 1,
            fetch_timeout_secs: 30,
            evaluation_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// "openrouter" or "gemini". OpenRouter falls back to Gemini when its
    /// key is missing.
    pub provider: String,
    pub model: Option<String>,
    /// Fallback model for OpenRouter (used when primary model fails).
    pub fallback_model: Option<String>,
    pub api_key_env: String,
    pub gemini_api_key_env: String,
    pub gemini_model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: None,
            fallback_model: None,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            gemini_api_key_env: "GEMINI_API_KEY".to_string(),
            gemini_model: None,
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Defaults to `<data_dir>/ledger.json`.
    pub path: Option<PathBuf>,
    pub lock_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_minutes: i64,
    /// Minimum confidence change before an already-open market re-alerts.
    pub realert_confidence_delta: u8,
    pub notify_timeout_secs: u64,
    pub telegram_bot_token_env: String,
    pub telegram_chat_id_env: String,
    pub moltbook_api_key_env: String,
    pub moltbook_enabled: bool,
    pub moltbook_submolt: String,
    /// Agent asked for a second opinion over Moltbook DM.
    pub peer_agent: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 240,
            realert_confidence_delta: 2,
            notify_timeout_secs: 15,
            telegram_bot_token_env: "TELEGRAM_BOT_TOKEN".to_string(),
            telegram_chat_id_env: "TELEGRAM_CHANNEL_ID".to_string(),
            moltbook_api_key_env: "MOLTBOOK_API_KEY".to_string(),
            moltbook_enabled: false,
            moltbook_submolt: "trading".to_string(),
            peer_agent: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub moltbook_check_hours: f64,
    pub settlement_hours: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            moltbook_check_hours: 4.0,
            settlement_hours: 6.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret; empty or unset variables are `None`.
    pub fn secret(env_name: &str) -> Option<SecretString> {
        Self::resolve_env(env_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }

    /// Env vars that must be set for a scan, by name. Empty means ready.
    pub fn validate(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if Self::secret(&self.llm.api_key_env).is_none()
            && Self::secret(&self.llm.gemini_api_key_env).is_none()
        {
            missing.push(format!(
                "{} or {}",
                self.llm.api_key_env, self.llm.gemini_api_key_env
            ));
        }
        missing
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .path
            .clone()
            .unwrap_or_else(|| self.agent.data_dir.join("ledger.json"))
    }

    pub fn cooldown_path(&self) -> PathBuf {
        self.agent.data_dir.join("alert_cooldown.json")
    }

    pub fn heartbeat_path(&self) -> PathBuf {
        self.agent.data_dir.join("heartbeat.json")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.lock_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.fetch_timeout_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.agent.scan_interval_minutes.max(1).saturating_mul(60))
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.alerts.cooldown_minutes.max(0))
            .unwrap_or(chrono::Duration::MAX)
    }
}
