//! Hub transport with bounded, protocol-aware retry.
//!
//! Retries only statuses that indicate a transient condition (429 and 5xx)
//! or transport-level failures, with jittered exponential backoff between
//! attempts. Everything else maps to a [`HubStatus`] the orchestrator acts
//! on; the transport itself never loops forever.

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;

use super::payload::{StartupPayload, SyncPayload};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle pooled connections are dropped after this, so the transport holds
/// no sockets for long once the sync cycle stops feeding it.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;
const RETRY_MAX_DELAY_MS: u64 = 3_000;

const DEFAULT_HUB_BASE_URL: &str = "https://hub.apimeter.io";
const HUB_BASE_URL_ENV: &str = "APIMETER_HUB_BASE_URL";

/// Classified outcome of a hub request, after retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubStatus {
    Ok,
    /// Malformed payload; a client-side bug. Never retried.
    ValidationError,
    /// Misconfigured credential. Disables the pipeline permanently.
    InvalidClientId,
    /// Account over quota. Suspends log shipping only.
    PaymentRequired,
    /// Transient network or server condition; the caller requeues.
    Retryable,
}

pub struct HubTransport {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    env: String,
}

impl HubTransport {
    pub fn new(client_id: &str, env: &str, base_url_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .expect("failed to build hub HTTP client");
        let base_url = base_url_override
            .map(str::to_string)
            .or_else(|| std::env::var(HUB_BASE_URL_ENV).ok())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HUB_BASE_URL.to_string());
        Self {
            http,
            base_url,
            client_id: client_id.to_string(),
            env: env.to_string(),
        }
    }

    fn endpoint_url(&self, endpoint: &str, query: Option<&str>) -> String {
        let mut url = format!(
            "{}/v2/{}/{}/{}",
            self.base_url, self.client_id, self.env, endpoint
        );
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    pub async fn send_startup(&self, payload: &StartupPayload) -> HubStatus {
        self.post_json("startup", payload).await
    }

    pub async fn send_sync(&self, payload: &SyncPayload) -> HubStatus {
        self.post_json("sync", payload).await
    }

    /// Upload one gzip batch file as a raw body.
    pub async fn send_log(&self, file_uuid: &str, content: Vec<u8>) -> HubStatus {
        let url = self.endpoint_url("log", Some(&format!("uuid={file_uuid}")));
        self.execute(self.http.post(url).body(content)).await
    }

    async fn post_json<T: Serialize + ?Sized>(&self, endpoint: &str, payload: &T) -> HubStatus {
        let url = self.endpoint_url(endpoint, None);
        self.execute(self.http.post(url).json(payload)).await
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> HubStatus {
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(retry_backoff(attempt)).await;
            }

            let Some(request) = request.try_clone() else {
                break;
            };
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return HubStatus::Ok;
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        tracing::warn!(status = %status, attempt, "hub returned retryable status");
                        continue;
                    }
                    return match status {
                        StatusCode::NOT_FOUND => HubStatus::InvalidClientId,
                        StatusCode::UNPROCESSABLE_ENTITY => {
                            tracing::warn!("hub rejected payload as invalid");
                            HubStatus::ValidationError
                        }
                        StatusCode::PAYMENT_REQUIRED => HubStatus::PaymentRequired,
                        _ => {
                            tracing::warn!(status = %status, "unexpected status from hub");
                            HubStatus::Retryable
                        }
                    };
                }
                Err(error) => {
                    tracing::warn!(%error, attempt, "failed to reach hub");
                    continue;
                }
            }
        }
        HubStatus::Retryable
    }
}

/// Jittered exponential backoff between retry attempts.
fn retry_backoff(attempt: u32) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = RETRY_BASE_DELAY_MS
        .saturating_mul(exponential_base)
        .min(RETRY_MAX_DELAY_MS);

    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let first = retry_backoff(1);
        assert!(first.as_millis() >= 250);

        let second = retry_backoff(2);
        assert!(second.as_millis() >= 500);

        let capped = retry_backoff(10);
        assert!(capped.as_millis() >= 3_000 && capped.as_millis() < 3_400);
    }

    #[test]
    fn builds_hub_urls() {
        let transport = HubTransport::new("c-id", "prod", Some("http://hub.test"));
        assert_eq!(
            transport.endpoint_url("sync", None),
            "http://hub.test/v2/c-id/prod/sync"
        );
        assert_eq!(
            transport.endpoint_url("log", Some("uuid=abc")),
            "http://hub.test/v2/c-id/prod/log?uuid=abc"
        );
    }
}
