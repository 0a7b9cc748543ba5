//! Telegram Bot API notifier (`sendMessage`, Markdown).

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{escape_markdown, NotifyError, Notifier};
use crate::types::Alert;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    http: Client,
    bot_token: SecretString,
    chat_id: String,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: SecretString, chat_id: String) -> Result<Self, NotifyError> {
        if chat_id.trim().is_empty() {
            return Err(NotifyError::NotConfigured("telegram chat id".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        Ok(Self {
            http,
            bot_token,
            chat_id,
            base_url: TELEGRAM_API_URL.to_string(),
        })
    }

    /// Send raw Markdown text to the configured chat.
    pub async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.bot_token.expose_secret()
        );
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        // Strip the URL (it carries the token) from transport errors.
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::from(e.without_url()))?;

        let status = resp.status();
        let parsed: Option<TelegramResponse> = resp.json().await.ok();
        match parsed {
            Some(r) if r.ok => Ok(()),
            Some(r) => Err(NotifyError::Rejected {
                sink: "telegram".into(),
                message: r.description.unwrap_or_else(|| status.to_string()),
            }),
            None => Err(NotifyError::Rejected {
                sink: "telegram".into(),
                message: format!("HTTP {status}"),
            }),
        }
    }

    /// Verify the bot can post to the chat.
    pub async fn send_test(&self, agent_name: &str) -> Result<(), NotifyError> {
        let text = format!(
            "🤖 *{} test alert*\n\n✅ Connection successful!\nEdge alerts will be delivered here.\n\n_This is a test message._",
            escape_markdown(agent_name)
        );
        self.send_text(&text).await?;
        info!(chat_id = %self.chat_id, "Telegram test message sent");
        Ok(())
    }
}

/// Markdown body for an edge alert.
pub fn format_alert(alert: &Alert) -> String {
    let j = &alert.judgment;
    format!(
        "🎯 *EDGE ALERT*\n\n\
         📈 *Market:* {}\n\n\
         📊 *Odds:* {}\n\
         💪 *Confidence:* {} ({}/10)\n\
         🎲 *Recommended:* {}\n\n\
         💡 *Analysis:* {}",
        escape_markdown(&alert.question),
        alert.odds_line(),
        j.confidence_bar(),
        j.confidence,
        j.recommended_side,
        escape_markdown(&j.reasoning),
    )
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.send_text(&format_alert(alert)).await
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
