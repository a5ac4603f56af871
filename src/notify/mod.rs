use serde::Serialize;

use crate::config::Config;
use crate::error::RelayError;

/// Discord rejects webhook messages longer than this many characters
pub const CONTENT_LIMIT: usize = 2000;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts plain-text messages to a Discord webhook
pub struct Notifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(cfg: &Config) -> Result<Self, RelayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = cfg.http_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            webhook_url: cfg.webhook.url.clone(),
            client: builder.build()?,
        })
    }

    /// Send one message. Any non-2xx answer is an error.
    pub async fn send(&self, message: &str) -> Result<(), RelayError> {
        let content = truncate(message, CONTENT_LIMIT);
        self.client
            .post(&self.webhook_url)
            .json(&WebhookMessage { content: &content })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub fn no_backups_message(server_id: &str) -> String {
    format!("⚠️ No backups found for server `{}`.", server_id)
}

pub fn success_message(filename: &str, size_human: &str, link: &str) -> String {
    format!(
        "✅ Backup `{}` ({}) uploaded to Google Drive:\n{}",
        filename, size_human, link
    )
}

pub fn failure_message(err: &RelayError) -> String {
    format!("❌ Backup run failed: {}", err)
}

/// Cut `text` to at most `limit` characters, marking the cut with an ellipsis
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}
