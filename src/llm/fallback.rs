//! Provider Fallback Policy
//!
//! Retrying a flaky provider and then moving to the next one is a
//! generation concern. The integrity loop's attempt budget is separate.

use super::GenerationBackend;
use crate::error::ProviderError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a provider failure bears on retrying the same backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network hiccup or empty reply
    Transient,
    /// HTTP 429 or a quota message
    RateLimited,
    /// Provider overloaded or model not loaded
    Unavailable,
    /// Bad request, bad credentials or bad spec; only another backend can help
    Fatal,
}

/// Substrings of transport error messages, checked in order
const MESSAGE_HINTS: &[(&str, ErrorClass)] = &[
    ("429", ErrorClass::RateLimited),
    ("rate limit", ErrorClass::RateLimited),
    ("too many requests", ErrorClass::RateLimited),
    ("quota", ErrorClass::RateLimited),
    ("503", ErrorClass::Unavailable),
    ("unavailable", ErrorClass::Unavailable),
    ("overloaded", ErrorClass::Unavailable),
    ("invalid", ErrorClass::Fatal),
    ("unauthorized", ErrorClass::Fatal),
    ("forbidden", ErrorClass::Fatal),
];

impl ErrorClass {
    pub fn of(error: &ProviderError) -> Self {
        match error {
            ProviderError::NotConfigured { .. } | ProviderError::UnknownBackend(_) | ProviderError::Exhausted(_) => {
                Self::Fatal
            }
            ProviderError::EmptyResponse { .. } => Self::Transient,
            ProviderError::Status { status, .. } => match *status {
                429 => Self::RateLimited,
                408 | 500 => Self::Transient,
                502..=504 | 529 => Self::Unavailable,
                _ => Self::Fatal,
            },
            ProviderError::Request { message, .. } => Self::from_message(message),
        }
    }

    /// Unrecognised transport errors count as transient
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        MESSAGE_HINTS
            .iter()
            .find(|(hint, _)| lower.contains(hint))
            .map(|(_, class)| *class)
            .unwrap_or(Self::Transient)
    }

    pub fn retryable(self) -> bool {
        self != Self::Fatal
    }
}

/// Per-backend retry budget and backoff curve
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first call, per backend
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Relative spread applied to each delay; 0 disables it
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Each backend gets exactly one call
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Wait before retry number `retry` (0-based)
    pub fn backoff(&self, retry: usize, class: ErrorClass) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let mut secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if class == ErrorClass::RateLimited {
            secs *= 5.0;
        }
        secs = secs.min(self.max_delay.as_secs_f64());

        if self.jitter > 0.0 {
            secs += secs * self.jitter * rand::thread_rng().gen_range(-1.0..1.0);
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Ordered list of backends with a per-backend retry policy.
///
/// Reports the primary backend's name; which backend actually served a
/// call is logged.
pub struct FallbackChain {
    name: String,
    backends: Vec<Arc<dyn GenerationBackend>>,
    policy: RetryPolicy,
}

impl FallbackChain {
    /// `backends[0]` is the primary
    pub fn new(backends: Vec<Arc<dyn GenerationBackend>>, policy: RetryPolicy) -> Self {
        let name = backends
            .first()
            .map(|b| b.name().to_string())
            .unwrap_or_else(|| "empty-chain".to_string());
        Self {
            name,
            backends,
            policy,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl GenerationBackend for FallbackChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, ProviderError> {
        let mut failures: Vec<String> = Vec::new();

        for (position, backend) in self.backends.iter().enumerate() {
            let mut attempt = 0;
            loop {
                match backend.generate(prompt, system_prompt).await {
                    Ok(text) => {
                        if position > 0 {
                            info!("Fallback backend {} served request for {}", backend.name(), self.name);
                        }
                        return Ok(text);
                    }
                    Err(e) => {
                        let class = ErrorClass::of(&e);
                        if !class.retryable() || attempt >= self.policy.max_retries {
                            warn!("Backend {} failed ({:?}): {}", backend.name(), class, e);
                            failures.push(format!("{}: {}", backend.name(), e));
                            break;
                        }

                        let delay = self.policy.backoff(attempt, class);
                        debug!("{} failed ({:?}), retry {} in {:?}", backend.name(), class, attempt + 1, delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }

        if failures.is_empty() {
            failures.push("no backends configured".to_string());
        }
        Err(ProviderError::Exhausted(failures.join("; ")))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.health_check().await {
                Ok(()) => return Ok(()),
                Err(e) => failures.push(format!("{}: {}", backend.name(), e)),
            }
        }
        Err(ProviderError::Exhausted(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times with `error`, then answers with its name
    struct FlakyBackend {
        name: String,
        failures: usize,
        calls: AtomicUsize,
        error: fn(&str) -> ProviderError,
    }

    impl FlakyBackend {
        fn new(name: &str, failures: usize, error: fn(&str) -> ProviderError) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                failures,
                calls: AtomicUsize::new(0),
                error,
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for FlakyBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _prompt: &str, _system: Option<&str>) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)(&self.name))
            } else {
                Ok(format!("from {}", self.name))
            }
        }
    }

    fn transient(backend: &str) -> ProviderError {
        ProviderError::request(backend, "connection reset")
    }

    fn unconfigured(backend: &str) -> ProviderError {
        ProviderError::not_configured(backend, "key missing")
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_status_classes() {
        let status = |status| ProviderError::Status {
            backend: "x".to_string(),
            status,
            body: String::new(),
        };
        assert_eq!(ErrorClass::of(&status(429)), ErrorClass::RateLimited);
        assert_eq!(ErrorClass::of(&status(503)), ErrorClass::Unavailable);
        assert_eq!(ErrorClass::of(&status(401)), ErrorClass::Fatal);
        assert_eq!(ErrorClass::of(&status(400)), ErrorClass::Fatal);
        assert!(!ErrorClass::of(&unconfigured("x")).retryable());
        assert!(ErrorClass::of(&transient("x")).retryable());
    }

    #[test]
    fn test_message_hints() {
        assert_eq!(ErrorClass::from_message("Rate limit exceeded"), ErrorClass::RateLimited);
        assert_eq!(ErrorClass::from_message("model is overloaded"), ErrorClass::Unavailable);
        assert_eq!(ErrorClass::from_message("invalid api key"), ErrorClass::Fatal);
        assert_eq!(ErrorClass::from_message("connection reset by peer"), ErrorClass::Transient);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff(0, ErrorClass::Transient), Duration::from_millis(100));
        assert_eq!(policy.backoff(2, ErrorClass::Transient), Duration::from_millis(400));
        assert_eq!(policy.backoff(10, ErrorClass::Transient), Duration::from_secs(1));
        assert_eq!(policy.backoff(0, ErrorClass::RateLimited), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            jitter: 0.2,
            ..Default::default()
        };
        for _ in 0..50 {
            let secs = policy.backoff(0, ErrorClass::Transient).as_secs_f64();
            assert!((0.8..=1.2).contains(&secs), "{}", secs);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures_on_same_backend() {
        let primary = FlakyBackend::new("primary", 2, transient);
        let chain = FallbackChain::new(vec![primary.clone()], fast_policy(2));

        let text = chain.generate("p", None).await.unwrap();
        assert_eq!(text, "from primary");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_moves_to_next_backend() {
        let primary = FlakyBackend::new("primary", usize::MAX, unconfigured);
        let secondary = FlakyBackend::new("secondary", 0, transient);
        let chain = FallbackChain::new(vec![primary.clone(), secondary.clone()], fast_policy(3));

        assert_eq!(chain.name(), "primary");
        let text = chain.generate("p", None).await.unwrap();
        assert_eq!(text, "from secondary");
        // Not configured is never retried
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_lists_every_backend() {
        let a = FlakyBackend::new("a", usize::MAX, transient);
        let b = FlakyBackend::new("b", usize::MAX, unconfigured);
        let chain = FallbackChain::new(vec![a.clone(), b], fast_policy(1));

        let err = chain.generate("p", None).await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ProviderError::Exhausted(_)));
        assert!(message.contains("a:"));
        assert!(message.contains("b:"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let chain = FallbackChain::new(Vec::new(), RetryPolicy::none());
        assert!(chain.is_empty());
        assert!(chain.generate("p", None).await.is_err());
    }
}
