//! TOML-based run configuration.
//!
//! A run config describes the server command, the weighted operation mix,
//! the execution pattern, and any fault profile, and converts into the typed
//! values the engine consumes. Semantic violations are rejected by
//! [`RunConfig::validate`] before a run starts.
//!
//! # Example TOML
//!
//! ```toml
//! [settings]
//! name = "smoke"
//! pattern = "mixed"
//! duration_secs = 60
//! warmup_secs = 5
//! seed = 42
//!
//! [server]
//! command = "npx"
//! args = ["@modelcontextprotocol/server-filesystem", "/tmp/scratch"]
//!
//! [[operation]]
//! tool = "write_file"
//! weight = 0.3
//!
//! [[operation]]
//! tool = "read_text_file"
//! weight = 0.7
//!
//! [[fault]]
//! kind = "latency"
//! probability = 0.5
//! min_ms = 100
//! max_ms = 500
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ServerConfig;
use crate::error::{Error, Result};
use crate::fault::FaultConfig;
use crate::workload::{standard, Operation, Workload, WorkloadPattern};

/// Top-level run configuration parsed from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// General run settings.
    pub settings: Settings,
    /// How to spawn the server under test.
    pub server: ServerSection,
    /// Weighted operation mix. The field name is `operation` (not
    /// `operations`) because TOML `[[operation]]` array-of-tables syntax
    /// creates a key called `operation`.
    pub operation: Vec<OperationSpec>,
    /// Optional fault profile, same array-of-tables convention.
    #[serde(default)]
    pub fault: Vec<FaultConfig>,
}

/// General run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Workload name carried into the result.
    #[serde(default = "default_name")]
    pub name: String,
    /// Execution pattern.
    pub pattern: WorkloadPattern,
    /// Measured-phase duration in seconds.
    pub duration_secs: u64,
    /// Warmup duration in seconds; warmup outcomes are discarded.
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
    /// Seed for the run's random source; omit for entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Per-call read timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Handshake deadline in milliseconds.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_name() -> String {
    "custom".to_string()
}

fn default_warmup_secs() -> u64 {
    5
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_startup_timeout_ms() -> u64 {
    10_000
}

/// Server spawn configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One weighted operation declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Tool to invoke.
    pub tool: String,
    /// Scheduling weight.
    pub weight: f64,
    /// Fixed arguments; when omitted the standard generator for the tool
    /// name is used.
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl RunConfig {
    /// Parses a TOML string into a validated config.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Validation(format!("failed to parse config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Validation(format!("failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Semantic validation, run before anything is spawned.
    ///
    /// Checks: at least one operation, positive weights with a positive
    /// total, a positive duration, and well-formed fault configs.
    pub fn validate(&self) -> Result<()> {
        if self.operation.is_empty() {
            return Err(Error::Validation(
                "config must declare at least one [[operation]]".to_string(),
            ));
        }
        let total: f64 = self.operation.iter().map(|op| op.weight).sum();
        for op in &self.operation {
            if !op.weight.is_finite() || op.weight <= 0.0 {
                return Err(Error::Validation(format!(
                    "operation '{}' has invalid weight {}",
                    op.tool, op.weight
                )));
            }
        }
        if total <= 0.0 {
            return Err(Error::Validation(
                "total operation weight must be greater than 0".to_string(),
            ));
        }
        if self.settings.duration_secs == 0 {
            return Err(Error::Validation(
                "settings.duration_secs must be greater than 0".to_string(),
            ));
        }
        for fault in &self.fault {
            fault.validate()?;
        }
        Ok(())
    }

    /// Builds the workload, rooting default parameter generators at
    /// `scratch`.
    pub fn workload(&self, scratch: &Path) -> Workload {
        let mut workload = Workload::new(self.settings.name.clone(), self.settings.pattern)
            .duration(Duration::from_secs(self.settings.duration_secs))
            .warmup(Duration::from_secs(self.settings.warmup_secs));
        for spec in &self.operation {
            let op = match &spec.arguments {
                Some(args) => Operation::with_fixed_args(&spec.tool, spec.weight, args.clone()),
                None => Operation::new(
                    &spec.tool,
                    spec.weight,
                    standard::default_params(&spec.tool, scratch),
                ),
            };
            workload = workload.operation(op);
        }
        workload
    }

    /// Builds the server spawn config.
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(&self.server.command)
            .request_timeout(Duration::from_millis(self.settings.request_timeout_ms))
            .startup_timeout(Duration::from_millis(self.settings.startup_timeout_ms));
        for arg in &self.server.args {
            config = config.arg(arg);
        }
        for (key, value) in &self.server.env {
            config = config.env(key, value);
        }
        config
    }

    /// The declared fault profile.
    pub fn faults(&self) -> &[FaultConfig] {
        &self.fault
    }
}
