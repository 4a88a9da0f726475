//! Blocking client for OpenAI-compatible chat completion endpoints.

use super::{
    Completion, CompletionCache, CompletionRequest, CompletionResponse, Message, RateLimiter,
    RetryPolicy,
};
use crate::models::{
    CompletionConfig, CompletionError, EvalError, Result, WarningCategory, WarningLog,
    expand_headers,
};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
    /// Token ids as strings, the way the API expects JSON object keys.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    logit_bias: BTreeMap<String, i32>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    code: Option<serde_json::Value>,
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
}

/// Client for any OpenAI-compatible endpoint.
///
/// Features:
/// - Retry with the backoff curves of [`RetryPolicy`]
/// - Per-model rate-limit tracking from response headers
/// - One retry on a larger-context fallback model when a prompt overflows
/// - Optional shared [`CompletionCache`]
/// - Token and cost tracking
pub struct LLMClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    fallback_models: HashMap<String, String>,
    rate_limiter: Arc<RateLimiter>,
    cache: Option<Arc<CompletionCache>>,
    warnings: WarningLog,
    pricing: HashMap<String, ModelPricing>,
    // Tracking
    total_requests: AtomicU64,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    total_cost_micros: AtomicU64,
}

impl LLMClient {
    /// Create a client from the `[completion]` config section.
    ///
    /// `api_key` is `None` for local endpoints without auth.
    pub fn new(
        config: &CompletionConfig,
        api_key: Option<String>,
        cache: Option<Arc<CompletionCache>>,
        warnings: WarningLog,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let headers = build_headers(api_key.as_deref(), &expand_headers(&config.headers))?;

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EvalError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            retry: RetryPolicy::default().with_max_attempts(config.max_retries),
            fallback_models: config.fallback_models.clone(),
            rate_limiter: Arc::new(RateLimiter::new()),
            cache,
            warnings,
            pricing: HashMap::new(),
            total_requests: AtomicU64::new(0),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share a rate limiter with other clients hitting the same account.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_pricing(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.pricing.insert(model.into(), pricing);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> Option<&Arc<CompletionCache>> {
        self.cache.as_ref()
    }

    /// Calculate cost for a request.
    fn calculate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let Some(pricing) = self.pricing.get(model) else {
            return 0.0;
        };
        let input_cost = (input_tokens as f64 / 1_000_000.0) * pricing.input_price_per_1m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * pricing.output_price_per_1m;
        input_cost + output_cost
    }

    /// One HTTP round trip, no retries.
    fn send(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, CompletionError> {
        let payload = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            logit_bias: request
                .logit_bias
                .iter()
                .map(|(token, bias)| (token.to_string(), *bias))
                .collect(),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(self.timeout)
                } else {
                    CompletionError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0);

        // The cool-down never outlasts the longest rate-limit wait.
        let cap = self.retry.rate_limit_cap;
        let cool_down = retry_after.map_or(Duration::ZERO, |secs| {
            Duration::try_from_secs_f64(secs).map_or(cap, |hint| hint.min(cap))
        });
        self.rate_limiter
            .record_request(&request.model, status, &headers, cool_down);

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(
                status,
                &request.model,
                &body,
                retry_after,
                &self.warnings,
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .map_err(|e| CompletionError::InvalidResponse(format!("failed to parse body: {e}")))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompletionError::InvalidResponse("no choices in response".to_string()))?;

        let (input_tokens, output_tokens) = body
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            input_tokens,
            output_tokens,
        })
    }

    /// Send with retries, sleeping between attempts per the retry policy.
    fn send_with_retries(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, CompletionError> {
        let mut attempt = 0;
        loop {
            self.rate_limiter.wait_if_needed(&request.model);
            self.total_requests.fetch_add(1, Ordering::Relaxed);

            let error = match self.send(request) {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let Some(delay) = self.retry.delay_for(&error, attempt) else {
                return Err(error);
            };
            debug!(
                model = %request.model,
                attempt = attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying completion"
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Get total cost tracked.
    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Get total tokens tracked as `(input, output)`.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    /// HTTP attempts made, retries included.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Reset tracking.
    pub fn reset_tracking(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_input_tokens.store(0, Ordering::Relaxed);
        self.total_output_tokens.store(0, Ordering::Relaxed);
        self.total_cost_micros.store(0, Ordering::Relaxed);
    }
}

impl Completion for LLMClient {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, CompletionError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.lookup(request)
        {
            debug!(model = %request.model, "Completion cache hit");
            return Ok(hit);
        }

        let response = match self.send_with_retries(request) {
            Err(CompletionError::ContextWindowExceeded { model }) => {
                let Some(fallback) = self.fallback_models.get(&model) else {
                    return Err(CompletionError::ContextWindowExceeded { model });
                };
                info!(
                    model = %model,
                    fallback = %fallback,
                    "Context window exceeded, retrying on fallback model"
                );
                let fallback_request = CompletionRequest {
                    model: fallback.clone(),
                    ..request.clone()
                };
                self.send_with_retries(&fallback_request)?
            }
            other => other?,
        };

        // A biased single-token answer always stops on the length limit.
        let single_token_answer = request.max_tokens <= 1 && !response.content.trim().is_empty();
        if response.truncated() && !single_token_answer {
            self.warnings.emit(
                WarningCategory::CompletionTruncated,
                format!(
                    "{} stopped after {} tokens",
                    response.model, request.max_tokens
                ),
            );
        }

        let cost = self.calculate_cost(
            &response.model,
            response.input_tokens,
            response.output_tokens,
        );
        self.total_input_tokens
            .fetch_add(response.input_tokens as u64, Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(response.output_tokens as u64, Ordering::Relaxed);
        self.total_cost_micros
            .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);

        if let Some(cache) = &self.cache {
            cache.update(request, response.clone());
        }
        Ok(response)
    }
}

fn build_headers(api_key: Option<&str>, custom: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(api_key) = api_key {
        let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            EvalError::InvalidConfig("API key contains invalid header characters".to_string())
        })?;
        headers.insert(AUTHORIZATION, value);
    }

    for (key, value) in custom {
        let name = HeaderName::try_from(key.as_str())
            .map_err(|_| EvalError::InvalidConfig(format!("invalid header name '{key}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| EvalError::InvalidConfig(format!("invalid value for header '{key}'")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Map a non-success status onto the error taxonomy.
///
/// Statuses outside the taxonomy are reported as
/// [`WarningCategory::UnknownCompletionError`] and treated as permanent.
fn classify_status(
    status: u16,
    model: &str,
    body: &str,
    retry_after: Option<f64>,
    warnings: &WarningLog,
) -> CompletionError {
    let (message, code) = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(api_error) => (
            api_error.error.message,
            api_error
                .error
                .code
                .and_then(|c| c.as_str().map(str::to_string)),
        ),
        Err(_) => (body.to_string(), None),
    };

    match status {
        400 if code.as_deref() == Some("context_length_exceeded") => {
            CompletionError::ContextWindowExceeded {
                model: model.to_string(),
            }
        }
        401 => CompletionError::AuthenticationFailed(message),
        403 => CompletionError::PermissionDenied(message),
        404 => CompletionError::ModelNotFound(model.to_string()),
        429 => CompletionError::RateLimited {
            message,
            retry_after_secs: retry_after,
        },
        408 | 409 | 500..=599 => CompletionError::ServiceUnavailable { status, message },
        400 | 422 => CompletionError::InvalidRequest(message),
        _ => {
            warnings.emit(
                WarningCategory::UnknownCompletionError,
                format!("{model} returned status {status}: {message}"),
            );
            CompletionError::InvalidRequest(message)
        }
    }
}
