//! Fault injection for the tool-invocation call path.
//!
//! [`FaultInjector`] is a [`CallMiddleware`] composed in front of the retry
//! wrapper for the duration of a run. Per call, active faults compose in a
//! fixed order: latency, then the error gate (which skips delegation
//! entirely), then delegation, then result corruption. Resource exhaustion
//! is independent of the call path: a background task owned by the
//! [`FaultScope`], cancelled and joined when the scope shuts down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, FaultSubtype, Result};
use crate::middleware::{CallMiddleware, ToolInvoker};

/// Discriminant for the configured fault kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// Sleep before delegating.
    Latency,
    /// Raise an injected error instead of delegating.
    Error,
    /// Mutate a successful result.
    Corruption,
    /// Background memory/CPU pressure.
    Exhaustion,
}

fn default_exhaustion_mib() -> usize {
    64
}

/// One configured fault.
///
/// Several may be active simultaneously; the injector composes them in the
/// fixed order latency → error gate → delegate → corruption regardless of
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FaultConfig {
    /// Sleep for a duration sampled uniformly from `[min_ms, max_ms]`.
    Latency {
        /// Chance a given call is delayed, in `[0, 1]`.
        probability: f64,
        /// Lower bound of the injected delay (milliseconds).
        min_ms: u64,
        /// Upper bound of the injected delay (milliseconds).
        max_ms: u64,
    },
    /// Raise an [`Error::Injected`] without delegating.
    Error {
        /// Chance a given call fails, in `[0, 1]`.
        probability: f64,
        /// Subtypes sampled uniformly; all four when empty.
        #[serde(default)]
        subtypes: Vec<FaultSubtype>,
    },
    /// Corrupt a successful result with a uniformly chosen strategy.
    Corruption {
        /// Chance a given result is corrupted, in `[0, 1]`.
        probability: f64,
    },
    /// Hold scratch memory and burn CPU in the background for the lifetime
    /// of the fault scope.
    Exhaustion {
        /// Scratch allocation size in MiB.
        #[serde(default = "default_exhaustion_mib")]
        memory_mib: usize,
    },
}

impl FaultConfig {
    /// The kind discriminant of this config.
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Latency { .. } => FaultKind::Latency,
            Self::Error { .. } => FaultKind::Error,
            Self::Corruption { .. } => FaultKind::Corruption,
            Self::Exhaustion { .. } => FaultKind::Exhaustion,
        }
    }

    /// Firing probability; exhaustion is always active while scoped.
    pub fn probability(&self) -> f64 {
        match self {
            Self::Latency { probability, .. }
            | Self::Error { probability, .. }
            | Self::Corruption { probability } => *probability,
            Self::Exhaustion { .. } => 1.0,
        }
    }

    /// Rejects probabilities outside `[0, 1]` and inverted latency bounds.
    pub fn validate(&self) -> Result<()> {
        let p = self.probability();
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::Validation(format!(
                "fault probability {p} is outside [0, 1]"
            )));
        }
        if let Self::Latency { min_ms, max_ms, .. } = self {
            if min_ms > max_ms {
                return Err(Error::Validation(format!(
                    "latency fault has min_ms {min_ms} > max_ms {max_ms}"
                )));
            }
        }
        Ok(())
    }
}

/// How a result payload gets mangled by the corruption fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionStrategy {
    /// Halve the first text content (or a top-level string).
    Truncate,
    /// Replace the payload with a marker carrying the original keys.
    Scramble,
    /// Replace the payload with `null`.
    Nullify,
}

impl CorruptionStrategy {
    const ALL: [Self; 3] = [Self::Truncate, Self::Scramble, Self::Nullify];
}

/// Applies one corruption strategy to a result payload.
fn corrupt(mut value: Value, strategy: CorruptionStrategy) -> Value {
    match strategy {
        CorruptionStrategy::Truncate => {
            if let Some(Value::String(text)) = value.pointer_mut("/content/0/text") {
                truncate_half(text);
            } else if let Value::String(ref mut text) = value {
                truncate_half(text);
            }
            value
        },
        CorruptionStrategy::Scramble => {
            let keys: Vec<Value> = match &value {
                Value::Object(map) => map.keys().cloned().map(Value::String).collect(),
                _ => Vec::new(),
            };
            json!({"corrupted": true, "originalKeys": keys})
        },
        CorruptionStrategy::Nullify => Value::Null,
    }
}

fn truncate_half(text: &mut String) {
    let mut cut = text.len() / 2;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Per-kind counters of fired faults, exposed for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultStats {
    /// Calls that were delayed.
    pub latency_injected: u64,
    /// Calls that received an injected error.
    pub errors_injected: u64,
    /// Results that were corrupted.
    pub corruptions_injected: u64,
}

impl FaultStats {
    /// Total fired faults across all kinds.
    pub fn total(&self) -> u64 {
        self.latency_injected + self.errors_injected + self.corruptions_injected
    }
}

impl std::ops::AddAssign for FaultStats {
    fn add_assign(&mut self, other: Self) {
        self.latency_injected += other.latency_injected;
        self.errors_injected += other.errors_injected;
        self.corruptions_injected += other.corruptions_injected;
    }
}

#[derive(Debug, Default)]
struct FaultCounters {
    latency: AtomicU64,
    errors: AtomicU64,
    corruptions: AtomicU64,
}

/// Middleware that injects latency, errors, and result corruption.
///
/// Exhaustion configs are ignored here; they belong to the [`FaultScope`].
pub struct FaultInjector {
    latency: Option<(f64, u64, u64)>,
    error: Option<(f64, Vec<FaultSubtype>)>,
    corruption: Option<f64>,
    counters: FaultCounters,
    rng: parking_lot::Mutex<StdRng>,
}

impl FaultInjector {
    /// Builds an injector from the call-path fault configs.
    pub fn new(configs: &[FaultConfig]) -> Self {
        Self::from_rng(configs, StdRng::from_rng(&mut rand::rng()))
    }

    /// Builds an injector with a fixed seed for reproducible firing.
    pub fn with_seed(configs: &[FaultConfig], seed: u64) -> Self {
        Self::from_rng(configs, StdRng::seed_from_u64(seed))
    }

    fn from_rng(configs: &[FaultConfig], rng: StdRng) -> Self {
        let mut latency = None;
        let mut error = None;
        let mut corruption = None;
        for config in configs {
            match config {
                FaultConfig::Latency {
                    probability,
                    min_ms,
                    max_ms,
                } => latency = Some((*probability, *min_ms, *max_ms)),
                FaultConfig::Error {
                    probability,
                    subtypes,
                } => {
                    let subtypes = if subtypes.is_empty() {
                        FaultSubtype::ALL.to_vec()
                    } else {
                        subtypes.clone()
                    };
                    error = Some((*probability, subtypes));
                },
                FaultConfig::Corruption { probability } => corruption = Some(*probability),
                FaultConfig::Exhaustion { .. } => {},
            }
        }
        Self {
            latency,
            error,
            corruption,
            counters: FaultCounters::default(),
            rng: parking_lot::Mutex::new(rng),
        }
    }

    /// Snapshot of the per-kind fired-fault counters.
    pub fn stats(&self) -> FaultStats {
        FaultStats {
            latency_injected: self.counters.latency.load(Ordering::Relaxed),
            errors_injected: self.counters.errors.load(Ordering::Relaxed),
            corruptions_injected: self.counters.corruptions.load(Ordering::Relaxed),
        }
    }

    fn roll(&self) -> f64 {
        self.rng.lock().random_range(0.0..1.0)
    }

    fn sample_delay(&self, min_ms: u64, max_ms: u64) -> Duration {
        let ms = if min_ms >= max_ms {
            min_ms
        } else {
            self.rng.lock().random_range(min_ms..=max_ms)
        };
        Duration::from_millis(ms)
    }

    fn pick_subtype(&self, subtypes: &[FaultSubtype]) -> FaultSubtype {
        let idx = self.rng.lock().random_range(0..subtypes.len());
        subtypes[idx]
    }

    fn pick_strategy(&self) -> CorruptionStrategy {
        let idx = self.rng.lock().random_range(0..CorruptionStrategy::ALL.len());
        CorruptionStrategy::ALL[idx]
    }
}

#[async_trait]
impl CallMiddleware for FaultInjector {
    async fn invoke(&self, next: &dyn ToolInvoker, name: &str, args: Value) -> Result<Value> {
        if let Some((probability, min_ms, max_ms)) = self.latency {
            if self.roll() < probability {
                let delay = self.sample_delay(min_ms, max_ms);
                debug!(tool = name, delay_ms = delay.as_millis() as u64, "injecting latency");
                self.counters.latency.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
            }
        }

        if let Some((probability, ref subtypes)) = self.error {
            if self.roll() < probability {
                let subtype = self.pick_subtype(subtypes);
                warn!(tool = name, %subtype, "injecting error");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Injected { subtype });
            }
        }

        let value = next.invoke(name, args).await?;

        if let Some(probability) = self.corruption {
            if self.roll() < probability {
                let strategy = self.pick_strategy();
                warn!(tool = name, ?strategy, "corrupting result");
                self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
                return Ok(corrupt(value, strategy));
            }
        }

        Ok(value)
    }
}

/// The exhaustion background task: holds scratch memory and burns CPU,
/// yielding between rounds so it pressures rather than starves the runtime.
async fn exhaustion_loop(memory_mib: usize, token: CancellationToken) {
    let mut hog: Vec<Vec<u8>> = Vec::with_capacity(memory_mib);
    for _ in 0..memory_mib {
        hog.push(vec![0u8; 1024 * 1024]);
    }
    debug!(mib = memory_mib, "exhaustion task holding scratch memory");

    let mut spin: u64 = 0;
    while !token.is_cancelled() {
        for i in 0..100_000u64 {
            spin = spin.wrapping_add(i.wrapping_mul(i));
        }
        tokio::task::yield_now().await;
    }
    debug!(checksum = spin, held_mib = hog.len(), "exhaustion task stopped");
}

struct ExhaustionTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Drop for ExhaustionTask {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// A scoped fault-injection activation.
///
/// Owns the injector installed in the run's call chain and the exhaustion
/// background task, if one is configured. [`Self::shutdown`] cancels and
/// joins the task; dropping the scope aborts it, so no exit path leaves
/// orphaned work. At most one scope may be active per client at a time.
pub struct FaultScope {
    injector: Arc<FaultInjector>,
    exhaustion: Option<ExhaustionTask>,
}

impl FaultScope {
    /// Activates the given fault configs, spawning the exhaustion task if
    /// one is present. `seed` fixes the injector's randomness for
    /// reproducible runs.
    pub fn activate(configs: &[FaultConfig], seed: Option<u64>) -> Self {
        let injector = match seed {
            Some(seed) => FaultInjector::with_seed(configs, seed),
            None => FaultInjector::new(configs),
        };
        let exhaustion = configs.iter().find_map(|config| match config {
            FaultConfig::Exhaustion { memory_mib } => {
                let token = CancellationToken::new();
                let handle = tokio::spawn(exhaustion_loop(*memory_mib, token.clone()));
                Some(ExhaustionTask {
                    token,
                    handle: Some(handle),
                })
            },
            _ => None,
        });
        Self {
            injector: Arc::new(injector),
            exhaustion,
        }
    }

    /// The injector to compose into the run's call chain.
    pub fn injector(&self) -> Arc<FaultInjector> {
        self.injector.clone()
    }

    /// Fired-fault counters accumulated so far.
    pub fn stats(&self) -> FaultStats {
        self.injector.stats()
    }

    /// Cancels and joins the exhaustion task, then releases the scope.
    pub async fn shutdown(mut self) {
        if let Some(mut task) = self.exhaustion.take() {
            task.token.cancel();
            if let Some(handle) = task.handle.take() {
                let _ = handle.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU64 as TestCounter;
    use std::time::Instant;

    struct StubInvoker {
        calls: TestCounter,
        response: Value,
    }

    impl StubInvoker {
        fn new(response: Value) -> Self {
            Self {
                calls: TestCounter::new(0),
                response,
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl ToolInvoker for StubInvoker {
        async fn invoke(&self, _name: &str, _args: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.response.clone())
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_probability() {
        let config = FaultConfig::Error {
            probability: 1.5,
            subtypes: vec![],
        };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let config = FaultConfig::Corruption { probability: -0.1 };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_latency_bounds() {
        let config = FaultConfig::Latency {
            probability: 0.5,
            min_ms: 500,
            max_ms: 100,
        };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_fault_config_toml_shape() {
        let config: FaultConfig = toml::from_str(
            r#"
kind = "latency"
probability = 0.5
min_ms = 100
max_ms = 500
"#,
        )
        .unwrap();
        assert_eq!(config.kind(), FaultKind::Latency);
        assert!((config.probability() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_error_probability_one_never_delegates() {
        let configs = [FaultConfig::Error {
            probability: 1.0,
            subtypes: vec![FaultSubtype::Generic],
        }];
        let injector = FaultInjector::with_seed(&configs, 7);
        let delegate = StubInvoker::new(json!({"ok": true}));

        for _ in 0..5 {
            let err = injector
                .invoke(&delegate, "echo", json!({}))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Injected {
                    subtype: FaultSubtype::Generic
                }
            ));
        }
        assert_eq!(delegate.calls(), 0);
        assert_eq!(injector.stats().errors_injected, 5);
    }

    #[tokio::test]
    async fn test_probability_zero_is_a_pass_through() {
        let configs = [
            FaultConfig::Latency {
                probability: 0.0,
                min_ms: 1000,
                max_ms: 2000,
            },
            FaultConfig::Error {
                probability: 0.0,
                subtypes: vec![],
            },
            FaultConfig::Corruption { probability: 0.0 },
        ];
        let injector = FaultInjector::with_seed(&configs, 7);
        let delegate = StubInvoker::new(json!({"ok": true}));

        let result = injector.invoke(&delegate, "echo", json!({})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(delegate.calls(), 1);
        assert_eq!(injector.stats(), FaultStats::default());
    }

    #[tokio::test]
    async fn test_latency_probability_one_delays_every_call() {
        let configs = [FaultConfig::Latency {
            probability: 1.0,
            min_ms: 20,
            max_ms: 30,
        }];
        let injector = FaultInjector::with_seed(&configs, 7);
        let delegate = StubInvoker::new(json!({}));

        for _ in 0..3 {
            let begin = Instant::now();
            injector.invoke(&delegate, "echo", json!({})).await.unwrap();
            assert!(
                begin.elapsed() >= Duration::from_millis(20),
                "call returned before the injected delay elapsed"
            );
        }
        assert_eq!(injector.stats().latency_injected, 3);
    }

    #[tokio::test]
    async fn test_corruption_probability_one_mutates_every_result() {
        let configs = [FaultConfig::Corruption { probability: 1.0 }];
        let injector = FaultInjector::with_seed(&configs, 7);
        let original = json!({"content": [{"text": "abcdefgh"}]});
        let delegate = StubInvoker::new(original.clone());

        for _ in 0..6 {
            let result = injector.invoke(&delegate, "echo", json!({})).await.unwrap();
            let corrupted = result.is_null()
                || result.get("corrupted") == Some(&Value::Bool(true))
                || result["content"][0]["text"] == json!("abcd");
            assert!(corrupted, "unexpected result shape: {result}");
        }
        assert_eq!(injector.stats().corruptions_injected, 6);
        assert_eq!(delegate.calls(), 6);
    }

    #[test]
    fn test_truncate_halves_text_content() {
        let value = json!({"content": [{"text": "abcdefgh"}]});
        let out = corrupt(value, CorruptionStrategy::Truncate);
        assert_eq!(out["content"][0]["text"], "abcd");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let value = Value::String("ééé".to_string());
        let out = corrupt(value, CorruptionStrategy::Truncate);
        let text = out.as_str().unwrap();
        assert!(text.len() < "ééé".len());
        assert!(std::str::from_utf8(text.as_bytes()).is_ok());
    }

    #[test]
    fn test_scramble_keeps_original_keys() {
        let value = json!({"a": 1, "b": 2});
        let out = corrupt(value, CorruptionStrategy::Scramble);
        assert_eq!(out["corrupted"], true);
        assert_eq!(out["originalKeys"], json!(["a", "b"]));
    }

    #[test]
    fn test_nullify_discards_the_payload() {
        let out = corrupt(json!({"a": 1}), CorruptionStrategy::Nullify);
        assert!(out.is_null());
    }

    #[tokio::test]
    async fn test_fault_scope_shutdown_joins_exhaustion_task() {
        let configs = [FaultConfig::Exhaustion { memory_mib: 1 }];
        let scope = FaultScope::activate(&configs, Some(7));
        // Give the task a moment to start spinning.
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.shutdown().await;
    }

    #[tokio::test]
    async fn test_fault_scope_without_exhaustion_shuts_down_immediately() {
        let scope = FaultScope::activate(&[], None);
        scope.shutdown().await;
    }

    #[test]
    fn test_fault_stats_accumulate() {
        let mut total = FaultStats::default();
        total += FaultStats {
            latency_injected: 2,
            errors_injected: 1,
            corruptions_injected: 0,
        };
        total += FaultStats {
            latency_injected: 1,
            errors_injected: 0,
            corruptions_injected: 3,
        };
        assert_eq!(total.latency_injected, 3);
        assert_eq!(total.errors_injected, 1);
        assert_eq!(total.corruptions_injected, 3);
        assert_eq!(total.total(), 7);
    }
}
