use std::time::{Duration, Instant};

use anyhow::Context;

use crate::error::{RelayError, Result};
use crate::util::{snippet, SNIPPET_CHARS};

/// Raw 2xx reply from an automation webhook.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub text: String,
}

/// UpstreamClient performs the single JSON POST each relayed request makes
/// to its automation webhook. Every call is bounded by the configured timeout.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout_ms: u64) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `payload` and read the reply as text. Non-2xx replies and
    /// transport failures are errors; nothing is retried.
    pub async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<UpstreamReply> {
        let start = Instant::now();
        let resp = match self.client.post(url).json(payload).send().await {
            Ok(r) => r,
            Err(err) => {
                let kind = if err.is_timeout() { "timeout" } else { "network error" };
                tracing::warn!(error = ?err, elapsed_ms = start.elapsed().as_millis() as u64, "upstream {}", kind);
                return Err(RelayError::UpstreamTransport {
                    status: None,
                    message: format!("{}: {}", kind, err),
                    snippet: None,
                });
            }
        };
        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(upstream_status = status.as_u16(), error = ?err, "upstream read error");
                return Err(RelayError::UpstreamTransport {
                    status: Some(status.as_u16()),
                    message: format!("read error: {}", err),
                    snippet: None,
                });
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if !status.is_success() {
            tracing::error!(
                upstream_status = status.as_u16(),
                elapsed_ms,
                body_snippet = %snippet(&text, SNIPPET_CHARS),
                "upstream returned non-success status"
            );
            return Err(RelayError::UpstreamTransport {
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status.as_u16()),
                snippet: Some(snippet(&text, SNIPPET_CHARS)),
            });
        }
        tracing::debug!(upstream_status = status.as_u16(), elapsed_ms, "upstream replied");
        Ok(UpstreamReply {
            status: status.as_u16(),
            text,
        })
    }
}
