//! Workload execution engine.
//!
//! [`WorkloadEngine`] drives a [`Workload`] against a [`ProtocolClient`]
//! through a per-run call chain (fault injector → retry → client), honoring
//! the workload's execution pattern, the warmup phase, and the wall-clock
//! deadline. Outcomes flow into a [`MetricsAggregator`]; the run ends with a
//! [`BenchmarkResult`] unless consecutive server-start failures exhaust the
//! configured budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::ProtocolClient;
use crate::error::{Error, Result};
use crate::fault::{FaultConfig, FaultScope};
use crate::metrics::{BenchmarkResult, LatencySample, MetricsAggregator};
use crate::middleware::{Layered, ToolInvoker};
use crate::retry::{Retry, RetryPolicy};
use crate::workload::{Workload, WorkloadPattern};

/// Tunables for the engine's pacing and recovery behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Seed for operation selection and fault firing; omit for entropy.
    pub seed: Option<u64>,
    /// Retry policy installed below the fault injector.
    pub retry: RetryPolicy,
    /// Delay between operations in sequential legs.
    pub sequential_delay: Duration,
    /// A parallel-pattern iteration fans out every `parallel_every` turns.
    pub parallel_every: u64,
    /// Fan-out width of a parallel batch.
    pub parallel_fan_out: usize,
    /// Operations between quiet pauses in the burst pattern.
    pub burst_size: u64,
    /// Quiet pause length in the burst pattern.
    pub burst_pause: Duration,
    /// Delay between operations during warmup.
    pub warmup_delay: Duration,
    /// Consecutive server-start failures tolerated before the run aborts.
    pub max_start_failures: u32,
    /// Backoff base between start attempts.
    pub start_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            retry: RetryPolicy::default(),
            sequential_delay: Duration::from_millis(5),
            parallel_every: 5,
            parallel_fan_out: 5,
            burst_size: 10,
            burst_pause: Duration::from_millis(500),
            warmup_delay: Duration::from_millis(10),
            max_start_failures: 3,
            start_backoff: Duration::from_millis(500),
        }
    }
}

/// Tracks consecutive failed server starts across the run.
struct StartBudget {
    consecutive: u32,
    max: u32,
}

/// Drives workloads against one protocol client.
///
/// `run` takes `&mut self` so fault scopes cannot overlap on the same
/// client.
pub struct WorkloadEngine {
    client: Arc<ProtocolClient>,
    config: EngineConfig,
}

impl WorkloadEngine {
    /// Creates an engine over the given client.
    pub fn new(client: Arc<ProtocolClient>, config: EngineConfig) -> Self {
        Self { client, config }
    }

    /// The engine's client handle.
    pub fn client(&self) -> &Arc<ProtocolClient> {
        &self.client
    }

    /// Runs a workload with no faults configured.
    pub async fn run(&mut self, workload: &Workload) -> Result<BenchmarkResult> {
        self.run_with_faults(workload, &[]).await
    }

    /// Runs a workload with the given fault profile active for the whole
    /// measured run.
    ///
    /// Configuration errors surface before the server is spawned. The run
    /// always completes with a result -- every operation failing included --
    /// unless consecutive start failures exhaust the budget, in which case
    /// the server is presumed unrecoverable and the error propagates.
    pub async fn run_with_faults(
        &mut self,
        workload: &Workload,
        faults: &[FaultConfig],
    ) -> Result<BenchmarkResult> {
        workload.validate()?;
        for fault in faults {
            fault.validate()?;
        }

        let mut budget = StartBudget {
            consecutive: 0,
            max: self.config.max_start_failures,
        };
        self.ensure_started(&mut budget).await?;

        info!(
            workload = %workload.name,
            pattern = %workload.pattern,
            duration_secs = workload.duration.as_secs(),
            faults = faults.len(),
            "starting benchmark run"
        );

        let scope = FaultScope::activate(faults, self.config.seed);
        let outcome = self.drive(workload, &scope, &mut budget).await;
        let fault_stats = scope.stats();
        scope.shutdown().await;
        if let Err(err) = self.client.stop().await {
            warn!(%err, "failed to stop server after run");
        }

        let (aggregator, started_at, elapsed) = outcome?;
        let result = aggregator.finish(
            workload.name.clone(),
            workload.pattern.to_string(),
            started_at,
            elapsed,
            fault_stats,
        );
        info!(
            completed = result.operations_completed,
            failures = result.failures + result.injected_failures,
            throughput = result.throughput,
            "benchmark run finished"
        );
        Ok(result)
    }

    /// Warmup plus the measured loop.
    async fn drive(
        &self,
        workload: &Workload,
        scope: &FaultScope,
        budget: &mut StartBudget,
    ) -> Result<(MetricsAggregator, chrono::DateTime<Utc>, Duration)> {
        let chain: Arc<dyn ToolInvoker> = Arc::new(Layered::new(
            scope.injector(),
            Layered::new(Retry::new(self.config.retry), self.client.clone()),
        ));
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        // Warmup: outcomes are discarded, not recorded.
        let warmup_end = Instant::now() + workload.warmup;
        while Instant::now() < warmup_end {
            let op = workload.select_operation(&mut rng);
            let _ = chain.invoke(&op.tool, op.generate_params()).await;
            tokio::time::sleep(self.config.warmup_delay).await;
        }

        let started_at = Utc::now();
        let begin = Instant::now();
        let deadline = begin + workload.duration;
        let mut aggregator = MetricsAggregator::new();
        let mut iteration: u64 = 0;

        // No new operation starts past the deadline; in-flight ones finish.
        while Instant::now() < deadline {
            iteration += 1;
            let parallel_leg = match workload.pattern {
                WorkloadPattern::Sequential | WorkloadPattern::Burst => false,
                WorkloadPattern::Parallel => iteration % self.config.parallel_every == 0,
                WorkloadPattern::Mixed => iteration % 2 == 0,
            };

            if parallel_leg {
                self.run_batch(workload, &chain, &mut rng, &mut aggregator, budget)
                    .await?;
            } else {
                self.run_single(workload, &chain, &mut rng, &mut aggregator, budget)
                    .await?;
            }

            match workload.pattern {
                WorkloadPattern::Sequential => {
                    tokio::time::sleep(self.config.sequential_delay).await;
                },
                WorkloadPattern::Burst => {
                    if iteration % self.config.burst_size == 0 {
                        debug!(iteration, "burst quiet interval");
                        tokio::time::sleep(self.config.burst_pause).await;
                    }
                },
                WorkloadPattern::Mixed if !parallel_leg => {
                    tokio::time::sleep(self.config.sequential_delay).await;
                },
                _ => {},
            }
        }

        Ok((aggregator, started_at, begin.elapsed()))
    }

    /// Executes one operation and records its outcome.
    async fn run_single(
        &self,
        workload: &Workload,
        chain: &Arc<dyn ToolInvoker>,
        rng: &mut StdRng,
        aggregator: &mut MetricsAggregator,
        budget: &mut StartBudget,
    ) -> Result<()> {
        let op = workload.select_operation(rng);
        let params = op.generate_params();
        let begin = Instant::now();
        let outcome = chain.invoke(&op.tool, params).await;
        let duration = begin.elapsed();

        let transport_failure = matches!(outcome, Err(Error::Transport(_)));
        aggregator.record(to_sample(&op.tool, duration, &outcome));
        if transport_failure {
            self.ensure_started(budget).await?;
        }
        Ok(())
    }

    /// Fans out a batch of concurrent operations and records every member.
    ///
    /// One member failing never cancels the others; the batch is joined as a
    /// whole.
    async fn run_batch(
        &self,
        workload: &Workload,
        chain: &Arc<dyn ToolInvoker>,
        rng: &mut StdRng,
        aggregator: &mut MetricsAggregator,
        budget: &mut StartBudget,
    ) -> Result<()> {
        let picks: Vec<(String, Value)> = (0..self.config.parallel_fan_out)
            .map(|_| {
                let op = workload.select_operation(rng);
                (op.tool.clone(), op.generate_params())
            })
            .collect();

        let futures = picks.into_iter().map(|(tool, params)| {
            let chain = chain.clone();
            async move {
                let begin = Instant::now();
                let outcome = chain.invoke(&tool, params).await;
                (tool, begin.elapsed(), outcome)
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut transport_failure = false;
        for (tool, duration, outcome) in results {
            transport_failure |= matches!(outcome, Err(Error::Transport(_)));
            aggregator.record(to_sample(&tool, duration, &outcome));
        }
        if transport_failure {
            self.ensure_started(budget).await?;
        }
        Ok(())
    }

    /// Starts (or restarts) the server, tolerating up to the configured
    /// number of consecutive failures before declaring it unrecoverable.
    async fn ensure_started(&self, budget: &mut StartBudget) -> Result<()> {
        loop {
            match self.client.start().await {
                Ok(()) => {
                    budget.consecutive = 0;
                    return Ok(());
                },
                Err(err) => {
                    budget.consecutive += 1;
                    warn!(
                        consecutive = budget.consecutive,
                        max = budget.max,
                        error = %err,
                        "server start failed"
                    );
                    if budget.consecutive >= budget.max {
                        return Err(Error::Transport(format!(
                            "aborting run after {} consecutive start failures: {err}",
                            budget.consecutive
                        )));
                    }
                    let backoff = self
                        .config
                        .start_backoff
                        .saturating_mul(2u32.saturating_pow(budget.consecutive.min(10)));
                    tokio::time::sleep(backoff).await;
                },
            }
        }
    }
}

fn to_sample(tool: &str, duration: Duration, outcome: &Result<Value>) -> LatencySample {
    match outcome {
        Ok(_) => LatencySample::success(tool, duration),
        Err(err) if err.is_injected() => LatencySample::injected(tool, duration),
        Err(_) => LatencySample::failure(tool, duration),
    }
}
