//! Workload definitions: weighted operations, execution patterns, and the
//! standard profile library.
//!
//! A [`Workload`] is read-only configuration: a named mix of weighted
//! [`Operation`]s plus an execution pattern and duration. Selection draws a
//! uniform value in `[0, total_weight)` and scans cumulative weights in
//! declaration order, so runs are reproducible under a seeded random source.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, RngExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Generates call parameters for one operation invocation.
///
/// Generators must produce collision-free identifiers (e.g., unique file
/// paths) across concurrent invocations; the standard generators use uuid
/// suffixes for this.
pub type ParamsGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

/// A single weighted operation in a workload. Immutable once added.
#[derive(Clone)]
pub struct Operation {
    /// Tool to invoke.
    pub tool: String,
    /// Scheduling weight relative to the workload's other operations.
    pub weight: f64,
    params: ParamsGenerator,
}

impl Operation {
    /// Creates an operation with an explicit parameter generator.
    pub fn new(tool: impl Into<String>, weight: f64, params: ParamsGenerator) -> Self {
        Self {
            tool: tool.into(),
            weight,
            params,
        }
    }

    /// Creates an operation that always passes the same arguments.
    pub fn with_fixed_args(tool: impl Into<String>, weight: f64, args: Value) -> Self {
        Self::new(tool, weight, Arc::new(move || args.clone()))
    }

    /// Generates parameters for one invocation.
    pub fn generate_params(&self) -> Value {
        (self.params)()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("tool", &self.tool)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Execution pattern for a workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadPattern {
    /// One operation at a time with a fixed small delay between.
    Sequential,
    /// Every Kth operation fans out a batch of concurrent calls.
    Parallel,
    /// Pause for a quiet interval after every M consecutive operations.
    Burst,
    /// Alternate sequential and parallel legs per call.
    Mixed,
}

impl fmt::Display for WorkloadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Burst => "burst",
            Self::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

/// A named traffic profile: weighted operations plus pattern and timing.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Profile name, carried into the benchmark result.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Weighted operations, selected in declaration order.
    pub operations: Vec<Operation>,
    /// Execution pattern.
    pub pattern: WorkloadPattern,
    /// Measured-phase duration.
    pub duration: Duration,
    /// Warmup duration; warmup outcomes are discarded.
    pub warmup: Duration,
}

impl Workload {
    /// Creates an empty workload with 60s duration and 5s warmup.
    pub fn new(name: impl Into<String>, pattern: WorkloadPattern) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            operations: Vec::new(),
            pattern,
            duration: Duration::from_secs(60),
            warmup: Duration::from_secs(5),
        }
    }

    /// Sets the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends an operation.
    pub fn operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Sets the measured-phase duration.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the warmup duration.
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Sum of all operation weights.
    pub fn total_weight(&self) -> f64 {
        self.operations.iter().map(|op| op.weight).sum()
    }

    /// Rejects empty workloads, non-positive or non-finite weights, and
    /// zero durations. Called before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(Error::Validation(format!(
                "workload '{}' has no operations",
                self.name
            )));
        }
        for op in &self.operations {
            if !op.weight.is_finite() || op.weight <= 0.0 {
                return Err(Error::Validation(format!(
                    "operation '{}' has invalid weight {}",
                    op.tool, op.weight
                )));
            }
        }
        if self.total_weight() <= 0.0 {
            return Err(Error::Validation(format!(
                "workload '{}' has non-positive total weight",
                self.name
            )));
        }
        if self.duration.is_zero() {
            return Err(Error::Validation(format!(
                "workload '{}' has zero duration",
                self.name
            )));
        }
        Ok(())
    }

    /// Selects an operation by weight.
    ///
    /// Draws uniformly from `[0, total_weight)` and returns the first
    /// operation whose cumulative weight exceeds the draw, scanning in
    /// declaration order. Deterministic given a seeded `rng`.
    pub fn select_operation<R: Rng>(&self, rng: &mut R) -> &Operation {
        let total = self.total_weight();
        let draw = rng.random_range(0.0..total);
        let mut cumulative = 0.0;
        for op in &self.operations {
            cumulative += op.weight;
            if draw < cumulative {
                return op;
            }
        }
        // Unreachable barring float rounding at the upper edge.
        self.operations
            .last()
            .expect("validated workload has at least one operation")
    }
}

/// Standard workload profiles with default per-tool parameter generators.
///
/// All file-touching generators root their paths under a caller-supplied
/// scratch directory and suffix them with a uuid fragment so concurrent
/// invocations never collide.
pub mod standard {
    use super::*;

    fn uuid8() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    fn path_str(base: &Path, name: &str) -> String {
        base.join(name).display().to_string()
    }

    /// The default parameter generator for a known tool name.
    pub fn default_params(tool: &str, base: &Path) -> ParamsGenerator {
        let base = base.to_path_buf();
        match tool {
            "write_file" => Arc::new(move || {
                let size = rand::rng().random_range(100..=1000);
                json!({
                    "path": path_str(&base, &format!("bench_{}.txt", uuid8())),
                    "content": "x".repeat(size),
                })
            }),
            "read_text_file" => {
                Arc::new(move || json!({"path": path_str(&base, "bench_read.txt")}))
            },
            "list_directory" => Arc::new(move || json!({"path": base.display().to_string()})),
            "create_directory" => Arc::new(move || {
                json!({"path": path_str(&base, &format!("bench_dir_{}", uuid8()))})
            }),
            "delete_file" => Arc::new(move || {
                json!({"path": path_str(&base, &format!("bench_delete_{}.txt", uuid8()))})
            }),
            "get_file_info" => Arc::new(move || json!({"path": base.display().to_string()})),
            _ => Arc::new(|| json!({})),
        }
    }

    fn op(tool: &str, weight: f64, base: &Path) -> Operation {
        Operation::new(tool, weight, default_params(tool, base))
    }

    /// Balanced mix of create, read, update, and delete operations.
    pub fn crud_heavy(base: &Path) -> Workload {
        Workload::new("crud_heavy", WorkloadPattern::Mixed)
            .describe("Balanced mix of create, read, update, delete operations")
            .operation(op("write_file", 0.3, base))
            .operation(op("read_text_file", 0.4, base))
            .operation(op("write_file", 0.2, base))
            .operation(op("delete_file", 0.1, base))
    }

    /// 80% reads with some directory listings.
    pub fn read_intensive(base: &Path) -> Workload {
        Workload::new("read_intensive", WorkloadPattern::Parallel)
            .describe("80% reads, 20% directory listings")
            .operation(op("read_text_file", 0.8, base))
            .operation(op("list_directory", 0.15, base))
            .operation(op("get_file_info", 0.05, base))
    }

    /// Write-dominated profile with small and large payloads.
    pub fn write_intensive(base: &Path) -> Workload {
        let small_base = base.to_path_buf();
        let small: ParamsGenerator = Arc::new(move || {
            let size = rand::rng().random_range(10..=100);
            json!({
                "path": path_str(&small_base, &format!("write_small_{}.txt", uuid8())),
                "content": "x".repeat(size),
            })
        });
        let large_base = base.to_path_buf();
        let large: ParamsGenerator = Arc::new(move || {
            let size = rand::rng().random_range(1000..=10_000);
            json!({
                "path": path_str(&large_base, &format!("write_large_{}.txt", uuid8())),
                "content": "x".repeat(size),
            })
        });
        Workload::new("write_intensive", WorkloadPattern::Sequential)
            .describe("70% writes, 30% directory operations")
            .operation(Operation::new("write_file", 0.5, small))
            .operation(Operation::new("write_file", 0.2, large))
            .operation(op("create_directory", 0.2, base))
            .operation(op("list_directory", 0.1, base))
    }

    /// Realistic mixed profile based on typical application usage.
    pub fn real_world_mix(base: &Path) -> Workload {
        Workload::new("real_world_mix", WorkloadPattern::Mixed)
            .describe("Balanced mix simulating real application usage")
            .operation(op("list_directory", 0.2, base))
            .operation(op("read_text_file", 0.3, base))
            .operation(op("write_file", 0.2, base))
            .operation(op("get_file_info", 0.15, base))
            .operation(op("create_directory", 0.1, base))
            .operation(op("delete_file", 0.05, base))
    }

    /// Bursts of high activity with quiet periods.
    pub fn burst_load(base: &Path) -> Workload {
        Workload::new("burst_load", WorkloadPattern::Burst)
            .describe("Bursts of high activity with quiet periods")
            .operation(op("write_file", 0.4, base))
            .operation(op("read_text_file", 0.4, base))
            .operation(op("list_directory", 0.2, base))
    }

    /// Metadata-heavy profile focusing on listings and file info.
    pub fn metadata_heavy(base: &Path) -> Workload {
        Workload::new("metadata_heavy", WorkloadPattern::Parallel)
            .describe("Focus on metadata operations")
            .operation(op("list_directory", 0.4, base))
            .operation(op("get_file_info", 0.4, base))
            .operation(op("create_directory", 0.1, base))
            .operation(op("read_text_file", 0.1, base))
    }

    /// Read-process-write pattern for ETL-like traffic.
    pub fn sequential_processing(base: &Path) -> Workload {
        Workload::new("sequential_processing", WorkloadPattern::Sequential)
            .describe("Read-process-write pattern")
            .operation(op("read_text_file", 0.33, base))
            .operation(op("write_file", 0.33, base))
            .operation(op("delete_file", 0.34, base))
            .duration(Duration::from_secs(30))
    }

    /// All standard profiles.
    pub fn all(base: &Path) -> Vec<Workload> {
        vec![
            crud_heavy(base),
            read_intensive(base),
            write_intensive(base),
            real_world_mix(base),
            burst_load(base),
            metadata_heavy(base),
            sequential_processing(base),
        ]
    }

    /// Shortened profiles for rapid smoke benchmarks.
    pub fn quick(base: &Path) -> Vec<Workload> {
        [read_intensive(base), write_intensive(base), real_world_mix(base)]
            .into_iter()
            .map(|w| {
                w.duration(Duration::from_secs(10))
                    .warmup(Duration::from_secs(2))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn noop() -> ParamsGenerator {
        Arc::new(|| json!({}))
    }

    fn two_op_workload() -> Workload {
        Workload::new("two", WorkloadPattern::Sequential)
            .operation(Operation::new("a", 0.7, noop()))
            .operation(Operation::new("b", 0.3, noop()))
    }

    #[test]
    fn test_validate_rejects_empty_workload() {
        let workload = Workload::new("empty", WorkloadPattern::Sequential);
        assert!(matches!(workload.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_weight() {
        let workload = Workload::new("bad", WorkloadPattern::Sequential)
            .operation(Operation::new("a", 0.0, noop()));
        assert!(matches!(workload.validate(), Err(Error::Validation(_))));

        let workload = Workload::new("bad", WorkloadPattern::Sequential)
            .operation(Operation::new("a", -1.0, noop()));
        assert!(matches!(workload.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_accepts_standard_profiles() {
        let base = Path::new("/tmp/scratch");
        for workload in standard::all(base) {
            workload.validate().unwrap_or_else(|e| {
                panic!("standard workload '{}' failed validation: {e}", workload.name)
            });
        }
    }

    #[test]
    fn test_selection_is_deterministic_with_a_fixed_seed() {
        let workload = two_op_workload();
        let picks = |seed: u64| -> Vec<String> {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50)
                .map(|_| workload.select_operation(&mut rng).tool.clone())
                .collect()
        };
        assert_eq!(picks(42), picks(42));
        assert_ne!(picks(42), picks(43));
    }

    #[test]
    fn test_selection_prefers_declaration_order_on_scan() {
        // Two operations with identical tool names but distinct generators;
        // the scan must hit the first matching cumulative bucket.
        let workload = Workload::new("dup", WorkloadPattern::Sequential)
            .operation(Operation::with_fixed_args("t", 1.0, json!({"slot": 0})))
            .operation(Operation::with_fixed_args("t", 1.0, json!({"slot": 1})));
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = [false, false];
        for _ in 0..200 {
            let op = workload.select_operation(&mut rng);
            let slot = op.generate_params()["slot"].as_u64().unwrap() as usize;
            seen[slot] = true;
        }
        assert!(seen[0] && seen[1], "both duplicate slots should be drawn");
    }

    #[test]
    fn test_zero_weight_operations_are_never_selected() {
        let workload = Workload::new("mixed", WorkloadPattern::Sequential)
            .operation(Operation::new("never", 0.0, noop()))
            .operation(Operation::new("always", 1.0, noop()));
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..1000 {
            assert_eq!(workload.select_operation(&mut rng).tool, "always");
        }
    }

    #[test]
    fn test_standard_write_paths_are_collision_free() {
        let base = Path::new("/tmp/scratch");
        let gen = standard::default_params("write_file", base);
        let a = gen()["path"].as_str().unwrap().to_string();
        let b = gen()["path"].as_str().unwrap().to_string();
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp/scratch/bench_"));
    }

    #[test]
    fn test_unknown_tool_gets_empty_params() {
        let gen = standard::default_params("mystery", Path::new("/tmp"));
        assert_eq!(gen(), json!({}));
    }

    #[test]
    fn test_pattern_display_names() {
        assert_eq!(WorkloadPattern::Sequential.to_string(), "sequential");
        assert_eq!(WorkloadPattern::Parallel.to_string(), "parallel");
        assert_eq!(WorkloadPattern::Burst.to_string(), "burst");
        assert_eq!(WorkloadPattern::Mixed.to_string(), "mixed");
    }
}
