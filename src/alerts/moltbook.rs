//! Moltbook (agent social network) client and notifier.
//!
//! Posts edge alerts to a submolt and, optionally, DMs a peer agent asking
//! for a second opinion. Also exposes the read-only status, DM-activity and
//! feed endpoints used by the heartbeat's presence check.
//!
//! API: https://www.moltbook.com/api/v1 (Bearer auth)

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{NotifyError, Notifier};
use crate::types::{truncate_chars, Alert};

pub const MOLTBOOK_API_URL: &str = "https://www.moltbook.com/api/v1";
pub const DEFAULT_SUBMOLT: &str = "trading";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct NewPost<'a> {
    submolt: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    #[serde(default)]
    conversations: ConversationList,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationList {
    #[serde(default)]
    items: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    conversation_id: serde_json::Value,
    with_agent: AgentRef,
}

#[derive(Debug, Deserialize)]
struct AgentRef {
    name: String,
}

impl ConversationsResponse {
    fn conversation_with(&self, agent: &str) -> Option<String> {
        self.conversations
            .items
            .iter()
            .find(|c| c.with_agent.name == agent)
            .map(|c| match &c.conversation_id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

/// Result of a social-presence check. Each field is `None` if its call failed.
#[derive(Debug, Default)]
pub struct PresenceReport {
    pub status: Option<serde_json::Value>,
    pub dm_activity: Option<serde_json::Value>,
    pub feed: Option<serde_json::Value>,
}

impl PresenceReport {
    pub fn status_label(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
    }

    pub fn has_dm_activity(&self) -> bool {
        self.dm_activity
            .as_ref()
            .and_then(|d| d.get("has_activity"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn feed_len(&self) -> usize {
        self.feed
            .as_ref()
            .and_then(|f| f.get("posts").or(Some(f)))
            .and_then(|p| p.as_array())
            .map_or(0, |a| a.len())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct MoltbookClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

impl MoltbookClient {
    pub fn new(api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build Moltbook HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: MOLTBOOK_API_URL.to_string(),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, NotifyError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(self.api_key.expose_secret());
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                sink: "moltbook".into(),
                message: format!("HTTP {status} on {path}: {}", truncate_chars(&text, 200)),
            });
        }

        let value: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        if value.get("success").and_then(|s| s.as_bool()) == Some(false) {
            let message = value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("request failed")
                .to_string();
            return Err(NotifyError::Rejected {
                sink: "moltbook".into(),
                message,
            });
        }
        Ok(value)
    }

    pub async fn create_post(
        &self,
        submolt: &str,
        title: &str,
        content: &str,
    ) -> Result<serde_json::Value, NotifyError> {
        let body = serde_json::to_value(NewPost {
            submolt,
            title,
            content,
        })
        .map_err(|e| NotifyError::Http(e.to_string()))?;
        self.request(Method::POST, "/posts", Some(body)).await
    }

    /// DM `to_agent`: reuse an existing conversation, else send a DM request.
    pub async fn send_dm(&self, to_agent: &str, message: &str) -> Result<(), NotifyError> {
        let raw = self
            .request(Method::GET, "/agents/dm/conversations", None)
            .await?;
        let convos: ConversationsResponse = serde_json::from_value(raw).unwrap_or(
            ConversationsResponse {
                conversations: ConversationList::default(),
            },
        );

        match convos.conversation_with(to_agent) {
            Some(cid) => {
                debug!(to_agent, conversation_id = %cid, "Sending DM in existing conversation");
                self.request(
                    Method::POST,
                    &format!("/agents/dm/conversations/{cid}/send"),
                    Some(serde_json::json!({ "message": message })),
                )
                .await?;
            }
            None => {
                info!(to_agent, "No conversation yet, sending DM request");
                self.request(
                    Method::POST,
                    "/agents/dm/request",
                    Some(serde_json::json!({ "to": to_agent, "message": message })),
                )
                .await?;
            }
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<serde_json::Value, NotifyError> {
        self.request(Method::GET, "/agents/status", None).await
    }

    pub async fn dm_activity(&self) -> Result<serde_json::Value, NotifyError> {
        self.request(Method::GET, "/agents/dm/check", None).await
    }

    pub async fn feed(&self, limit: usize) -> Result<serde_json::Value, NotifyError> {
        self.request(Method::GET, &format!("/feed?limit={limit}"), None)
            .await
    }

    /// Status, DM activity and a short feed peek. Individual failures are
    /// logged and leave that field empty.
    pub async fn check_presence(&self) -> PresenceReport {
        let (status, dms, feed) = tokio::join!(self.status(), self.dm_activity(), self.feed(5));
        let keep = |what: &str, r: Result<serde_json::Value, NotifyError>| match r {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(check = what, error = %e, "Moltbook presence check failed");
                None
            }
        };

        PresenceReport {
            status: keep("status", status),
            dm_activity: keep("dm_check", dms),
            feed: keep("feed", feed),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

pub fn post_title(alert: &Alert) -> String {
    format!("🎯 Edge Alert: {}", truncate_chars(&alert.question, 80))
}

pub fn post_content(alert: &Alert, agent_name: &str) -> String {
    let j = &alert.judgment;
    format!(
        "**Confidence:** {} ({}/10)\n\n\
         **Current Odds:** {}\n\n\
         **Recommended Position:** {}\n\n\
         **Analysis:** {}\n\n\
         ---\n*Posted by {} - paper-trading edge scanner*",
        j.confidence_bar(),
        j.confidence,
        alert.odds_line(),
        j.recommended_side,
        j.reasoning,
        agent_name,
    )
}

pub fn peer_review_message(peer: &str, alert: &Alert) -> String {
    format!(
        "Hey {peer}! I found an edge on: '{}'.\nMy confidence: {}/10 on {}.\nReasoning: {}\nWhat do you think?",
        alert.question,
        alert.judgment.confidence,
        alert.judgment.recommended_side,
        truncate_chars(&alert.judgment.reasoning, 200),
    )
}

pub struct MoltbookNotifier {
    client: MoltbookClient,
    submolt: String,
    agent_name: String,
    peer_agent: Option<String>,
}

impl MoltbookNotifier {
    pub fn new(client: MoltbookClient, submolt: &str, agent_name: &str) -> Self {
        Self {
            client,
            submolt: submolt.to_string(),
            agent_name: agent_name.to_string(),
            peer_agent: None,
        }
    }

    /// Also DM `peer` with a review request for every alert.
    pub fn with_peer_review(mut self, peer: Option<String>) -> Self {
        self.peer_agent = peer.filter(|p| !p.trim().is_empty());
        self
    }
}

#[async_trait]
impl Notifier for MoltbookNotifier {
    async fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.client
            .create_post(
                &self.submolt,
                &post_title(alert),
                &post_content(alert, &self.agent_name),
            )
            .await?;
        info!(market_id = %alert.market_id, submolt = %self.submolt, "Posted alert to Moltbook");

        // Peer review is a courtesy; its failure doesn't fail the post.
        if let Some(peer) = &self.peer_agent {
            if let Err(e) = self
                .client
                .send_dm(peer, &peer_review_message(peer, alert))
                .await
            {
                warn!(peer = %peer, error = %e, "Peer review DM failed");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "moltbook"
    }
}
