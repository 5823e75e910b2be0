use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::app::{Result, TributaryError};
use crate::domain::Item;
use crate::notify::Notifier;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    item: &'a Item,
}

/// POSTs each item as JSON to an http(s) target.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    timeout: Duration,
    max_retries: u8,
    backoff: Duration,
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn failed(target: &str, reason: impl ToString) -> TributaryError {
        TributaryError::DeliveryFailed {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, target: &str, item: &Item) -> Result<()> {
        let payload = WebhookPayload { target, item };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(target)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let reason = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => {
                        tracing::debug!(url = target, id = %item.id, "Delivered");
                        return Ok(());
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(Self::failed(target, reason));
            }
            tracing::debug!(url = target, attempt, reason = %reason, "Delivery failed, retrying");
            tokio::time::sleep(self.backoff * (1u32 << (attempt - 1))).await;
        }
    }
}
