//! Operator alert webhooks.
//!
//! Sent fire-and-forget (a delivery failure is logged, never propagated)
//! when the relay permanently fails an outbox row or a consumer worker
//! sends a record to the DLQ. Disabled by default; webhooks are optional.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Webhook configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Enable webhook notifications (default: false).
    pub enabled: bool,
    pub url: Option<String>,
    /// Optional secret for HMAC-signing payloads.
    pub secret: Option<String>,
    #[serde(with = "docpipe_types::duration")]
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            secret: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Events that trigger an operator alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    /// An outbox row exhausted `max_attempts` and was permanently failed.
    RelayRowFailed {
        outbox_id: i64,
        document_uuid: Uuid,
        attempts: i32,
        last_error: String,
    },
    /// A record exhausted its pipeline retry budget and was moved to the DLQ.
    RecordSentToDlq {
        document_uuid: Uuid,
        content_hash: String,
        step_name: String,
        attempts: u32,
        final_error: String,
    },
    /// A migration job finished with one or more failed items.
    MigrationJobCompletedWithFailures {
        job_id: Uuid,
        total_items: i64,
        failed_items: i64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertPayload {
    pub timestamp: DateTime<Utc>,
    pub event: AlertEvent,
}

/// Fire-and-forget HMAC-signed webhook client. Delivery is spawned onto the
/// tokio runtime and never awaited by the caller.
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("webhook URL is required when webhooks are enabled")?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build webhook HTTP client")?;

        Ok(Self {
            client,
            url,
            secret: config.secret.clone(),
        })
    }

    /// Send an alert without blocking the caller. Delivery failures are
    /// logged, never propagated — an operator alert must never itself
    /// become a reason the relay or worker stalls.
    pub fn send_event(&self, event: AlertEvent) {
        let payload = AlertPayload {
            timestamp: Utc::now(),
            event,
        };

        let client = self.client.clone();
        let url = self.url.clone();
        let secret = self.secret.clone();

        tokio::spawn(async move {
            if let Err(e) = do_send_event(&client, &url, secret.as_deref(), &payload).await {
                warn!(error = %e, "webhook delivery failed (non-blocking)");
            }
        });
    }
}

async fn do_send_event(
    client: &reqwest::Client,
    url: &str,
    secret: Option<&str>,
    payload: &AlertPayload,
) -> Result<()> {
    let json = serde_json::to_string(payload).context("failed to serialize webhook payload")?;

    let mut request = client.post(url).header("Content-Type", "application/json");

    if let Some(secret) = secret {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        type HmacSha256 = Hmac<Sha256>;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(json.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-Docpipe-Signature", format!("sha256={signature}"));
    }

    let response = request
        .body(json)
        .send()
        .await
        .context("failed to send webhook request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("webhook returned error status {}: {}", status, body);
    }

    Ok(())
}

/// Send an alert if webhooks are configured; silently returns otherwise.
pub fn maybe_send_event(config: &WebhookConfig, event: AlertEvent) {
    if !config.enabled {
        return;
    }
    let url = match &config.url {
        Some(url) if !url.is_empty() => url.clone(),
        _ => return,
    };

    let client = match reqwest::Client::builder().timeout(config.timeout).build() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build webhook client");
            return;
        }
    };
    let secret = config.secret.clone();

    tokio::spawn(async move {
        let payload = AlertPayload {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = do_send_event(&client, &url, secret.as_deref(), &payload).await {
            warn!(error = %e, "webhook delivery failed (non-blocking)");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    #[test]
    fn default_config_is_disabled() {
        let config = WebhookConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn signature_is_real_hmac_not_naive_concatenation() {
        use sha2::Digest;

        let secret = "topsecret";
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z"}"#;

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(json.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let mut hasher = Sha256::new();
        hasher.update(format!("{json}{secret}").as_bytes());
        let naive = hex::encode(hasher.finalize());

        assert_ne!(signature, naive);
    }
}
