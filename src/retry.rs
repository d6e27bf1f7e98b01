//! Bounded retry with exponential backoff around the call path.
//!
//! [`Retry`] is a [`CallMiddleware`] that re-invokes its delegate on
//! transient failures only. Backoff doubles per attempt: `base * 2^attempt`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::middleware::{CallMiddleware, ToolInvoker};

/// Retry budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocation attempts (not additional retries): the delegate is
    /// invoked at most this many times.
    pub attempts: u32,
    /// Backoff unit; the sleep before attempt `n+1` is `base * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default backoff base.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// Backoff to sleep after a failed attempt (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(20)))
    }
}

/// Retry middleware.
///
/// Retries [`Error::Transport`], [`Error::Timeout`], and transient injected
/// faults. Protocol, RPC, and validation errors propagate immediately; on
/// exhaustion the final error is re-raised unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    /// Creates the middleware from a policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The configured policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl CallMiddleware for Retry {
    async fn invoke(&self, next: &dyn ToolInvoker, name: &str, args: Value) -> Result<Value> {
        let mut last = None;
        for attempt in 0..self.policy.attempts {
            match next.invoke(name, args.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(
                        tool = name,
                        attempt = attempt + 1,
                        attempts = self.policy.attempts,
                        error = %err,
                        "transient failure"
                    );
                    if attempt + 1 < self.policy.attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                    last = Some(err);
                },
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| {
            Error::Validation("retry policy allows zero attempts".to_string())
        }))
    }
}

/// Invokes `name` on `invoker`, retrying transient failures up to `retries`
/// total attempts with the default backoff base.
pub async fn call_with_retry(
    invoker: &dyn ToolInvoker,
    name: &str,
    args: Value,
    retries: u32,
) -> Result<Value> {
    Retry::new(RetryPolicy::new(retries))
        .invoke(invoker, name, args)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultSubtype;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Delegate that fails a fixed number of times before succeeding, or
    /// forever if `failures` is `u64::MAX`.
    struct FlakyInvoker {
        calls: AtomicU64,
        failures: u64,
        error: fn() -> Error,
    }

    impl FlakyInvoker {
        fn always(error: fn() -> Error) -> Self {
            Self {
                calls: AtomicU64::new(0),
                failures: u64::MAX,
                error,
            }
        }

        fn failing_first(failures: u64, error: fn() -> Error) -> Self {
            Self {
                calls: AtomicU64::new(0),
                failures,
                error,
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl ToolInvoker for FlakyInvoker {
        async fn invoke(&self, _name: &str, args: Value) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(args)
            }
        }
    }

    fn transport_error() -> Error {
        Error::Transport("pipe closed".to_string())
    }

    fn protocol_error() -> Error {
        Error::Protocol("bad frame".to_string())
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_exhaustion_invokes_delegate_exactly_r_times() {
        let delegate = FlakyInvoker::always(transport_error);
        let err = Retry::new(fast_policy(4))
            .invoke(&delegate, "echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(delegate.calls(), 4);
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let delegate = FlakyInvoker::failing_first(2, transport_error);
        let result = Retry::new(fast_policy(3))
            .invoke(&delegate, "echo", json!({"ok": true}))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(delegate.calls(), 3);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_never_retried() {
        let delegate = FlakyInvoker::always(protocol_error);
        let err = Retry::new(fast_policy(5))
            .invoke(&delegate, "echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(delegate.calls(), 1);
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_validation_errors_are_never_retried() {
        let delegate = FlakyInvoker::always(|| Error::Validation("bad workload".to_string()));
        let err = Retry::new(fast_policy(5))
            .invoke(&delegate, "echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(delegate.calls(), 1);
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_transient_injected_faults_are_retried() {
        let delegate = FlakyInvoker::always(|| Error::Injected {
            subtype: FaultSubtype::Connection,
        });
        let err = Retry::new(fast_policy(3))
            .invoke(&delegate, "echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(delegate.calls(), 3);
        assert!(matches!(err, Error::Injected { .. }));
    }

    #[tokio::test]
    async fn test_non_transient_injected_faults_are_not_retried() {
        let delegate = FlakyInvoker::always(|| Error::Injected {
            subtype: FaultSubtype::Generic,
        });
        let err = Retry::new(fast_policy(3))
            .invoke(&delegate, "echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(delegate.calls(), 1);
        assert!(matches!(err, Error::Injected { .. }));
    }

    #[tokio::test]
    async fn test_call_with_retry_helper_matches_middleware() {
        let delegate = FlakyInvoker::failing_first(1, transport_error);
        // Default base delay is 100ms; one retry sleeps 100ms, acceptable in tests.
        let result = call_with_retry(&delegate, "echo", json!({"v": 1}), 2)
            .await
            .unwrap();
        assert_eq!(result, json!({"v": 1}));
        assert_eq!(delegate.calls(), 2);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }
}
