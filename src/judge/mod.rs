//! Semantic-judgment collaborator.
//!
//! The bridge engine asks an external service whether two units from
//! different domains are conceptually connected. The service is treated as
//! unreliable: calls may time out or return malformed payloads, so the HTTP
//! client validates every verdict and [`RetryingJudge`] wraps providers
//! with bounded retries and a typed not-connected fallback. A judgment
//! failure degrades one pair, never a batch.

use crate::models::{BridgeVerdict, StructuralUnit};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trait for semantic-judgment providers.
pub trait BridgeJudge: Send + Sync {
    /// Returns the provider name for logging.
    fn name(&self) -> &'static str;

    /// Judges whether two units are conceptually connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalService`] on transport failure or a
    /// malformed verdict.
    fn judge(&self, source: &StructuralUnit, target: &StructuralUnit) -> Result<BridgeVerdict>;
}

/// Configuration for the judgment collaborator.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Service endpoint; `None` disables the HTTP judge.
    pub endpoint: Option<String>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds (linear).
    pub retry_backoff_ms: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 15_000,
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl JudgeConfig {
    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `PALIMPSEST_JUDGE_ENDPOINT` | Service URL | unset |
    /// | `PALIMPSEST_JUDGE_TIMEOUT_MS` | Per-call timeout | 15000 |
    /// | `PALIMPSEST_JUDGE_MAX_RETRIES` | Retries per pair | 2 |
    /// | `PALIMPSEST_JUDGE_RETRY_BACKOFF_MS` | Linear backoff step | 250 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PALIMPSEST_JUDGE_ENDPOINT")
            && !v.is_empty()
        {
            self.endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_JUDGE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.timeout_ms = parsed.max(1);
        }
        if let Ok(v) = std::env::var("PALIMPSEST_JUDGE_MAX_RETRIES")
            && let Ok(parsed) = v.parse::<u32>()
        {
            self.max_retries = parsed;
        }
        if let Ok(v) = std::env::var("PALIMPSEST_JUDGE_RETRY_BACKOFF_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.retry_backoff_ms = parsed;
        }
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// One endpoint of a judgment request.
#[derive(Debug, Serialize)]
struct UnitPayload<'a> {
    text: &'a str,
    domain: &'a str,
    importance: f32,
}

impl<'a> UnitPayload<'a> {
    fn from_unit(unit: &'a StructuralUnit) -> Self {
        Self {
            text: &unit.text,
            domain: &unit.domain_label,
            importance: unit.importance_score,
        }
    }
}

#[derive(Debug, Serialize)]
struct JudgeRequest<'a> {
    source: UnitPayload<'a>,
    target: UnitPayload<'a>,
}

/// Wire shape of the service response. Optional fields guard against
/// partially-filled payloads; validation happens after decoding.
#[derive(Debug, Deserialize)]
struct JudgeResponse {
    connected: bool,
    bridge_type: Option<crate::models::BridgeType>,
    shared_concept: Option<String>,
    strength: Option<f32>,
}

/// HTTP client for the judgment service.
pub struct HttpJudge {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpJudge {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no endpoint is configured, or
    /// [`Error::ExternalService`] if the HTTP client cannot be built.
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::InvalidInput("judge endpoint not configured".to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::ExternalService {
                operation: "judge_client_build".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self { endpoint, client })
    }
}

impl BridgeJudge for HttpJudge {
    fn name(&self) -> &'static str {
        "http"
    }

    fn judge(&self, source: &StructuralUnit, target: &StructuralUnit) -> Result<BridgeVerdict> {
        let request = JudgeRequest {
            source: UnitPayload::from_unit(source),
            target: UnitPayload::from_unit(target),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else if e.is_request() {
                    "request"
                } else {
                    "unknown"
                };
                tracing::error!(
                    provider = "http",
                    error = %e,
                    error_kind = error_kind,
                    is_timeout = e.is_timeout(),
                    is_connect = e.is_connect(),
                    "Judge request failed"
                );
                Error::ExternalService {
                    operation: "judge_bridge".to_string(),
                    cause: format!("{error_kind} error: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            tracing::error!(
                provider = "http",
                status = %status,
                body = %body,
                "Judge API returned error status"
            );
            return Err(Error::ExternalService {
                operation: "judge_bridge".to_string(),
                cause: format!("API returned status: {status} - {body}"),
            });
        }

        let decoded: JudgeResponse = response.json().map_err(|e| {
            tracing::error!(provider = "http", error = %e, "Failed to parse judge response");
            Error::ExternalService {
                operation: "judge_bridge".to_string(),
                cause: format!("malformed response: {e}"),
            }
        })?;

        if !decoded.connected {
            return Ok(BridgeVerdict::not_connected());
        }
        let strength = decoded.strength.ok_or_else(|| Error::ExternalService {
            operation: "judge_bridge".to_string(),
            cause: "connected verdict missing strength".to_string(),
        })?;
        let verdict = BridgeVerdict {
            connected: true,
            bridge_type: decoded
                .bridge_type
                .unwrap_or(crate::models::BridgeType::Other),
            shared_concept: decoded.shared_concept.unwrap_or_default(),
            strength,
        };
        verdict.validate()?;
        Ok(verdict)
    }
}

/// Bounded-retry decorator with a typed fallback verdict.
///
/// Retries transport failures with linear backoff; once the budget is
/// exhausted the pair degrades to [`BridgeVerdict::not_connected`] instead
/// of surfacing an error, so one bad call can never abort a detection
/// batch.
pub struct RetryingJudge<J: BridgeJudge> {
    inner: J,
    max_retries: u32,
    backoff: Duration,
}

impl<J: BridgeJudge> RetryingJudge<J> {
    /// Wraps a judge with the given retry budget.
    #[must_use]
    pub const fn new(inner: J, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }

    /// Wraps a judge using the configured budget.
    #[must_use]
    pub const fn from_config(inner: J, config: &JudgeConfig) -> Self {
        Self::new(
            inner,
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}

impl<J: BridgeJudge> BridgeJudge for RetryingJudge<J> {
    fn name(&self) -> &'static str {
        "retrying"
    }

    fn judge(&self, source: &StructuralUnit, target: &StructuralUnit) -> Result<BridgeVerdict> {
        let mut attempt = 0u32;
        loop {
            match self.inner.judge(source, target) {
                Ok(verdict) => return Ok(verdict),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempt = attempt,
                        error = %e,
                        "Judge call failed, retrying"
                    );
                    std::thread::sleep(self.backoff.saturating_mul(attempt));
                },
                Err(e) => {
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempts = attempt + 1,
                        error = %e,
                        "Judge retries exhausted, degrading to not-connected"
                    );
                    metrics::counter!(
                        "judge_fallbacks_total",
                        "provider" => self.inner.name()
                    )
                    .increment(1);
                    return Ok(BridgeVerdict::not_connected());
                },
            }
        }
    }
}

/// Judge that always returns a fixed verdict.
///
/// The offline counterpart of [`HttpJudge`]: keeps the bridge path wired
/// when no service is configured, and doubles as a deterministic stand-in
/// under test.
pub struct StaticJudge {
    verdict: BridgeVerdict,
    calls: std::sync::atomic::AtomicUsize,
}

impl StaticJudge {
    /// Creates a judge returning the given verdict for every pair.
    #[must_use]
    pub const fn new(verdict: BridgeVerdict) -> Self {
        Self {
            verdict,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Creates a judge that reports every pair as unconnected.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self::new(BridgeVerdict::not_connected())
    }

    /// Returns how many pairs were judged.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl BridgeJudge for StaticJudge {
    fn name(&self) -> &'static str {
        "static"
    }

    fn judge(&self, _source: &StructuralUnit, _target: &StructuralUnit) -> Result<BridgeVerdict> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(self.verdict.clone())
    }
}
