use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::AlertSink;
use crate::config::{NotifierConfig, RequestConfig};
use crate::error::{NotifierError, NotifierResult};

/// Alert sink forwarding messages to a Telegram chat
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    request_config: RequestConfig,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier
    pub fn new(config: &NotifierConfig, request_config: RequestConfig) -> NotifierResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(NotifierError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a single sendMessage request (internal)
    async fn execute_request(&self, message: &str) -> NotifierResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);

        debug!(chat_id = %self.chat_id, chars = message.len(), "Sending Telegram message");

        let response = self
            .client
            .post(&url)
            .json(&SendMessageRequest {
                chat_id: &self.chat_id,
                text: message,
                parse_mode: "Markdown",
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifierError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    NotifierError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: SendMessageResponse =
            response
                .json()
                .await
                .map_err(|e| NotifierError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !body.ok {
            return Err(NotifierError::Api {
                status: status.as_u16(),
                message: body.description.unwrap_or_else(|| "not ok".to_string()),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl AlertSink for TelegramNotifier {
    async fn send_notification(&self, message: &str) -> NotifierResult<()> {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Telegram send"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(message).await {
                Ok(()) => {
                    info!(
                        latency_ms = start.elapsed().as_millis(),
                        "Notification delivered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Notification send failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(NotifierError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_creation() {
        let config = NotifierConfig {
            bot_token: "test_token".to_string(),
            chat_id: "12345".to_string(),
            base_url: "https://api.telegram.org".to_string(),
        };

        let notifier = TelegramNotifier::new(&config, RequestConfig::default());
        assert!(notifier.is_ok());
        assert_eq!(notifier.unwrap().base_url(), "https://api.telegram.org");
    }
}
