//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::http::is_idempotent;

/// Retry tunables shared by all HTTP-backed providers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval_ms: 1_000,
            max_interval_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Un-jittered backoff for attempt `n` (1-indexed):
    /// `min(initial × multiplier^(n-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.initial_interval_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(self.max_interval_ms))
    }

    /// Delay before attempt `n`, jittered to `delay×0.75 + U(0, delay×0.5)`
    /// so concurrent clients do not retry in lockstep. A vendor-supplied
    /// `Retry-After` is used verbatim instead, capped at the max interval.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(requested) = retry_after {
            return requested.min(self.max_interval());
        }
        jitter(self.base_delay(attempt))
    }
}

fn jitter(delay: Duration) -> Duration {
    let factor = 0.75 + rand::thread_rng().gen_range(0.0..0.5);
    delay.mul_f64(factor)
}

/// Run `op` up to `max_retries + 1` times, sleeping the configured backoff
/// between retryable failures. Only the final failure is surfaced.
pub async fn with_retries<T, F, Fut>(config: &RetryConfig, label: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt == config.max_retries {
                    return Err(err);
                }
                let delay = config.delay_for(attempt + 1, err.retry_after());
                warn!(
                    provider = label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Send a request, retrying transparently only when the method is idempotent.
///
/// Non-idempotent requests get exactly one transport attempt; their callers
/// decide whether to re-send based on the returned error's retryable flag.
pub async fn send_idempotent(
    config: &RetryConfig,
    provider: &str,
    request: RequestBuilder,
) -> Result<Response> {
    let idempotent = request
        .try_clone()
        .and_then(|r| r.build().ok())
        .is_some_and(|r| is_idempotent(r.method()));

    if !idempotent {
        let response = request.send().await?;
        return check_status(provider, response).await;
    }

    with_retries(config, provider, || async {
        let Some(request) = request.try_clone() else {
            return Err(GatewayError::Config(
                "request body is not replayable".to_string(),
            ));
        };
        let response = request.send().await?;
        check_status(provider, response).await
    })
    .await
}

async fn check_status(provider: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(api_error_from_response(response, provider).await)
    }
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Turn a non-success response into a typed API error, capturing the vendor
/// message, error code and any `Retry-After` header.
pub async fn api_error_from_response(response: Response, provider: &str) -> GatewayError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    let (message, code) = match serde_json::from_str::<WireErrorEnvelope>(&body) {
        Ok(envelope) => {
            let code = envelope
                .error
                .kind
                .or_else(|| envelope.error.code.map(|c| c.to_string()));
            (envelope.error.message, code)
        }
        // Truncate raw bodies to keep large or sensitive responses out of logs.
        Err(_) => {
            const MAX_ERROR_BODY: usize = 512;
            let message = if body.len() > MAX_ERROR_BODY {
                let cut = body
                    .char_indices()
                    .take_while(|(i, _)| *i < MAX_ERROR_BODY)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0);
                format!("{}... [truncated]", &body[..cut])
            } else {
                body
            };
            (message, None)
        }
    };

    GatewayError::Api {
        provider: provider.to_string(),
        status,
        message,
        code,
        retry_after,
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    parse_retry_after_value(value)
}

/// `Retry-After` carries either delay seconds or an HTTP date.
fn parse_retry_after_value(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.signed_duration_since(chrono::Utc::now());
    delta.to_std().ok()
}
