//! Reliability, chaos, and benchmarking harness for MCP tool servers.
//!
//! This crate spawns a tool server as a child process, speaks
//! newline-delimited JSON-RPC 2.0 over its stdio streams, and measures how
//! the server behaves under synthetic load and injected faults:
//!
//! - [`client::ProtocolClient`] owns the child process, the `initialize`
//!   handshake, and request/response correlation.
//! - [`retry::Retry`] wraps the call path with bounded exponential backoff.
//! - [`fault::FaultInjector`] injects latency, errors, result corruption,
//!   and background resource pressure through a per-run middleware chain.
//! - [`engine::WorkloadEngine`] drives weighted, patterned traffic and
//!   produces a [`metrics::BenchmarkResult`].
//! - [`chaos::ChaosRunner`] runs phased chaos and scores resilience.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mcp_reliability_lab::{
//!     EngineConfig, ProtocolClient, ServerConfig, WorkloadEngine,
//! };
//! use mcp_reliability_lab::workload::standard;
//!
//! # async fn example() -> mcp_reliability_lab::Result<()> {
//! let config = ServerConfig::new("npx")
//!     .arg("@modelcontextprotocol/server-filesystem")
//!     .arg("/tmp/scratch");
//! let client = Arc::new(ProtocolClient::new(config));
//! let mut engine = WorkloadEngine::new(client, EngineConfig::default());
//!
//! let workload = standard::real_world_mix(std::path::Path::new("/tmp/scratch"))
//!     .duration(Duration::from_secs(30));
//! let result = engine.run(&workload).await?;
//! println!("{} ops/sec, p95 {}ms", result.throughput, result.latency.p95_ms);
//! # Ok(())
//! # }
//! ```

pub mod chaos;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod metrics;
pub mod middleware;
pub mod retry;
pub mod types;
pub mod workload;

pub use chaos::{ChaosConfig, ChaosRunner, Grade, PhaseOutcome, ResilienceReport};
pub use client::{ClientState, ProtocolClient, ServerConfig};
pub use config::RunConfig;
pub use engine::{EngineConfig, WorkloadEngine};
pub use error::{Error, FaultSubtype, Result};
pub use fault::{FaultConfig, FaultInjector, FaultKind, FaultScope, FaultStats};
pub use metrics::{BenchmarkResult, LatencySample, MetricsAggregator, Outcome};
pub use middleware::{CallMiddleware, Layered, ToolInvoker};
pub use retry::{call_with_retry, Retry, RetryPolicy};
pub use types::ToolDescriptor;
pub use workload::{Operation, Workload, WorkloadPattern};

/// Installs a tracing subscriber honoring `RUST_LOG`.
///
/// Convenience for binaries and examples; calling it twice is harmless.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
