//! Phased chaos orchestration and resilience scoring.
//!
//! [`ChaosRunner`] drives a fixed operation list through five phases --
//! baseline, latency, errors, combined, recovery -- building a fresh fault
//! chain per phase, and folds the per-phase outcomes into a
//! [`ResilienceReport`]: how far the server degrades under chaos and how
//! completely it recovers afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::ProtocolClient;
use crate::error::Result;
use crate::fault::{FaultConfig, FaultScope, FaultStats};
use crate::middleware::{Layered, ToolInvoker};
use crate::workload::Operation;

/// Chaos run configuration.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Operation list executed once, sequentially, in every phase.
    pub operations: Vec<Operation>,
    /// Latency fault used in the latency phase.
    pub latency: FaultConfig,
    /// Error fault used in the errors phase.
    pub error: FaultConfig,
    /// Faults used in the combined phase.
    pub combined: Vec<FaultConfig>,
    /// Stabilization pause before the recovery phase.
    pub recovery_pause: Duration,
    /// Seed for fault firing; omit for entropy.
    pub seed: Option<u64>,
}

impl ChaosConfig {
    /// Creates a config with the standard phase faults: 100-500ms latency at
    /// p=0.5, errors at p=0.2, and a lighter combined profile with
    /// corruption.
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            latency: FaultConfig::Latency {
                probability: 0.5,
                min_ms: 100,
                max_ms: 500,
            },
            error: FaultConfig::Error {
                probability: 0.2,
                subtypes: Vec::new(),
            },
            combined: vec![
                FaultConfig::Latency {
                    probability: 0.3,
                    min_ms: 50,
                    max_ms: 200,
                },
                FaultConfig::Error {
                    probability: 0.1,
                    subtypes: Vec::new(),
                },
                FaultConfig::Corruption { probability: 0.05 },
            ],
            recovery_pause: Duration::from_secs(2),
            seed: None,
        }
    }

    /// Fixes the seed for reproducible fault firing.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Measurements from one chaos phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase name.
    pub phase: String,
    /// Operations attempted.
    pub operations: u64,
    /// Operations that returned a result.
    pub successes: u64,
    /// Operations that failed (organically or by injection).
    pub failures: u64,
    /// Successes over attempts, in `[0, 1]`.
    pub success_rate: f64,
    /// Mean latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Largest latency in milliseconds.
    pub max_latency_ms: u64,
    /// Wall-clock phase duration in seconds.
    pub duration_secs: f64,
}

/// Letter grade derived from the resilience score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    /// Score >= 90.
    A,
    /// Score >= 80.
    B,
    /// Score >= 70.
    C,
    /// Score >= 60.
    D,
    /// Score < 60.
    F,
}

impl Grade {
    /// Maps a 0-100 score to a grade.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::A
        } else if score >= 80.0 {
            Self::B
        } else if score >= 70.0 {
            Self::C
        } else if score >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(s)
    }
}

/// Aggregated view over a full chaos run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceReport {
    /// Per-phase outcomes in execution order: baseline, latency, errors,
    /// combined, recovery.
    pub phases: Vec<PhaseOutcome>,
    /// 0-100: degradation under combined chaos plus recovery afterwards,
    /// each worth half, relative to the baseline.
    pub resilience_score: f64,
    /// Percent loss of success rate under combined chaos vs baseline.
    pub degradation: f64,
    /// Recovery-phase success rate as a percentage.
    pub recovery_rate: f64,
    /// Percent latency increase under combined chaos vs baseline.
    pub performance_impact: f64,
    /// Combined-phase success rate as a percentage.
    pub chaos_tolerance: f64,
    /// Letter grade for the resilience score.
    pub grade: Grade,
    /// Fired-fault counters accumulated across all phases.
    pub faults: FaultStats,
}

/// Runs the five chaos phases against one client.
pub struct ChaosRunner {
    client: Arc<ProtocolClient>,
    config: ChaosConfig,
}

impl ChaosRunner {
    /// Creates a runner over the given client.
    pub fn new(client: Arc<ProtocolClient>, config: ChaosConfig) -> Self {
        Self { client, config }
    }

    /// Executes baseline → latency → errors → combined → recovery and
    /// derives the resilience report. The server is started before the
    /// first phase and stopped after the last.
    pub async fn run(&mut self) -> Result<ResilienceReport> {
        self.client.start().await?;

        let mut faults = FaultStats::default();
        let mut phases = Vec::with_capacity(5);

        let baseline = self.run_phase("baseline", &[], &mut faults).await?;
        phases.push(baseline);

        let latency_faults = [self.config.latency.clone()];
        phases.push(self.run_phase("latency", &latency_faults, &mut faults).await?);

        let error_faults = [self.config.error.clone()];
        phases.push(self.run_phase("errors", &error_faults, &mut faults).await?);

        let combined_faults = self.config.combined.clone();
        phases.push(
            self.run_phase("combined", &combined_faults, &mut faults)
                .await?,
        );

        // Let the system stabilize before measuring recovery.
        tokio::time::sleep(self.config.recovery_pause).await;
        phases.push(self.run_phase("recovery", &[], &mut faults).await?);

        if let Err(err) = self.client.stop().await {
            tracing::warn!(%err, "failed to stop server after chaos run");
        }

        Ok(build_report(phases, faults))
    }

    /// Runs the operation list once through a phase-scoped fault chain.
    async fn run_phase(
        &self,
        name: &str,
        faults: &[FaultConfig],
        totals: &mut FaultStats,
    ) -> Result<PhaseOutcome> {
        for fault in faults {
            fault.validate()?;
        }
        info!(phase = name, faults = faults.len(), "chaos phase starting");

        let scope = FaultScope::activate(faults, self.config.seed);
        let chain = Layered::new(scope.injector(), self.client.clone());

        let begin = Instant::now();
        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut latencies: Vec<u64> = Vec::with_capacity(self.config.operations.len());
        for op in &self.config.operations {
            let op_begin = Instant::now();
            match chain.invoke(&op.tool, op.generate_params()).await {
                Ok(_) => successes += 1,
                Err(_) => failures += 1,
            }
            latencies.push(op_begin.elapsed().as_millis() as u64);
        }

        *totals += scope.stats();
        scope.shutdown().await;

        let operations = successes + failures;
        let avg = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };
        let outcome = PhaseOutcome {
            phase: name.to_string(),
            operations,
            successes,
            failures,
            success_rate: if operations == 0 {
                0.0
            } else {
                successes as f64 / operations as f64
            },
            avg_latency_ms: avg,
            max_latency_ms: latencies.iter().copied().max().unwrap_or(0),
            duration_secs: begin.elapsed().as_secs_f64(),
        };
        info!(
            phase = name,
            success_rate = outcome.success_rate,
            avg_latency_ms = outcome.avg_latency_ms,
            "chaos phase finished"
        );
        Ok(outcome)
    }
}

/// Folds phase outcomes into the resilience report.
fn build_report(phases: Vec<PhaseOutcome>, faults: FaultStats) -> ResilienceReport {
    let rate = |name: &str| -> f64 {
        phases
            .iter()
            .find(|p| p.phase == name)
            .map_or(0.0, |p| p.success_rate)
    };
    let latency = |name: &str| -> f64 {
        phases
            .iter()
            .find(|p| p.phase == name)
            .map_or(0.0, |p| p.avg_latency_ms)
    };

    let baseline = rate("baseline");
    let chaos = rate("combined");
    let recovery = rate("recovery");

    let resilience_score = if baseline > 0.0 {
        ((chaos / baseline) * 50.0 + (recovery / baseline) * 50.0).min(100.0)
    } else {
        0.0
    };
    let degradation = if baseline > 0.0 {
        (1.0 - chaos / baseline) * 100.0
    } else {
        100.0
    };

    let baseline_latency = latency("baseline");
    let chaos_latency = latency("combined");
    let performance_impact = if baseline_latency > 0.0 {
        (chaos_latency - baseline_latency) / baseline_latency * 100.0
    } else {
        0.0
    };

    ResilienceReport {
        phases,
        resilience_score,
        degradation,
        recovery_rate: recovery * 100.0,
        performance_impact,
        chaos_tolerance: chaos * 100.0,
        grade: Grade::from_score(resilience_score),
        faults,
    }
}
