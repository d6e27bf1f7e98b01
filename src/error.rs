//! Error types for the reliability harness.
//!
//! Defines the [`Error`] taxonomy shared by the protocol client, retry
//! wrapper, fault injector, and workload engine, with classification helpers
//! used by the retry policy and the metrics pipeline.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Subtype tag carried by injected faults so deliberate failures stay
/// distinguishable from organic ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultSubtype {
    /// Simulated request timeout.
    Timeout,
    /// Simulated connection loss.
    Connection,
    /// Simulated permission denial.
    Permission,
    /// Unclassified injected failure.
    Generic,
}

impl FaultSubtype {
    /// All subtypes, in the order the error gate samples from by default.
    pub const ALL: [Self; 4] = [
        Self::Timeout,
        Self::Connection,
        Self::Permission,
        Self::Generic,
    ];

    /// Returns `true` for subtypes that model transient transport conditions.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }
}

impl fmt::Display for FaultSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Permission => "permission",
            Self::Generic => "generic",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the protocol client and the layers composed on top
/// of it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The peer violated the wire protocol: malformed envelope, mismatched
    /// request id, or a response carrying both/neither of result and error.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The child process exited or a stdio pipe broke.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No matching response arrived within the deadline.
    #[error("no matching response within {timeout:?}")]
    Timeout { timeout: Duration },

    /// A fault deliberately raised by the fault injector.
    #[error("injected {subtype} fault")]
    Injected { subtype: FaultSubtype },

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Invalid workload or fault configuration, rejected before a run starts.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Error {
    /// Returns the error category as a static string for metrics
    /// classification.
    ///
    /// Categories: `"protocol"`, `"transport"`, `"timeout"`, `"injected"`,
    /// `"rpc"`, `"validation"`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Injected { .. } => "injected",
            Self::Rpc { .. } => "rpc",
            Self::Validation(_) => "validation",
        }
    }

    /// Returns `true` if the retry wrapper may retry this error.
    ///
    /// Transport and timeout failures are transient; injected faults are
    /// transient only when their subtype models a transport condition.
    /// Protocol, RPC, and validation errors are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Injected { subtype } => subtype.is_transient(),
            Self::Protocol(_) | Self::Rpc { .. } | Self::Validation(_) => false,
        }
    }

    /// Returns `true` if this error was raised by the fault injector.
    pub fn is_injected(&self) -> bool {
        matches!(self, Self::Injected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_and_timeout_are_transient() {
        assert!(Error::Transport("pipe closed".to_string()).is_transient());
        assert!(Error::Timeout {
            timeout: Duration::from_secs(5)
        }
        .is_transient());
    }

    #[test]
    fn test_protocol_and_validation_are_not_transient() {
        assert!(!Error::Protocol("bad envelope".to_string()).is_transient());
        assert!(!Error::Validation("zero weight".to_string()).is_transient());
        assert!(!Error::Rpc {
            code: -32601,
            message: "Method not found".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_injected_transience_follows_subtype() {
        assert!(Error::Injected {
            subtype: FaultSubtype::Timeout
        }
        .is_transient());
        assert!(Error::Injected {
            subtype: FaultSubtype::Connection
        }
        .is_transient());
        assert!(!Error::Injected {
            subtype: FaultSubtype::Permission
        }
        .is_transient());
        assert!(!Error::Injected {
            subtype: FaultSubtype::Generic
        }
        .is_transient());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::Protocol(String::new()).category(), "protocol");
        assert_eq!(Error::Transport(String::new()).category(), "transport");
        assert_eq!(
            Error::Timeout {
                timeout: Duration::ZERO
            }
            .category(),
            "timeout"
        );
        assert_eq!(
            Error::Injected {
                subtype: FaultSubtype::Generic
            }
            .category(),
            "injected"
        );
        assert_eq!(Error::Validation(String::new()).category(), "validation");
    }

    #[test]
    fn test_fault_subtype_display() {
        assert_eq!(FaultSubtype::Timeout.to_string(), "timeout");
        assert_eq!(FaultSubtype::Connection.to_string(), "connection");
        assert_eq!(FaultSubtype::Permission.to_string(), "permission");
        assert_eq!(FaultSubtype::Generic.to_string(), "generic");
    }
}
