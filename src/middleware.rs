//! Middleware seam for the tool-invocation call path.
//!
//! The workload engine never calls the client directly; it calls through a
//! chain of [`CallMiddleware`] layers built once per run. Scoped behavior
//! (fault injection, retries) is achieved by constructing a fresh chain for
//! each run instead of mutating shared state, so there is nothing to restore
//! when a run ends.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Anything that can execute a named tool invocation.
///
/// Implemented by the protocol client at the bottom of the chain and by
/// [`Layered`] for every composed layer above it.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `name` with `args`, returning the result payload.
    async fn invoke(&self, name: &str, args: Value) -> Result<Value>;
}

#[async_trait]
impl<T: ToolInvoker + ?Sized> ToolInvoker for Arc<T> {
    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        (**self).invoke(name, args).await
    }
}

/// A single interception layer in the call chain.
///
/// Implementations decide whether and how to delegate to `next`; skipping
/// delegation entirely (e.g., an injected error) is allowed.
#[async_trait]
pub trait CallMiddleware: Send + Sync {
    /// Handle one invocation, delegating to `next` as appropriate.
    async fn invoke(&self, next: &dyn ToolInvoker, name: &str, args: Value) -> Result<Value>;
}

#[async_trait]
impl<T: CallMiddleware + ?Sized> CallMiddleware for Arc<T> {
    async fn invoke(&self, next: &dyn ToolInvoker, name: &str, args: Value) -> Result<Value> {
        (**self).invoke(next, name, args).await
    }
}

/// One middleware composed in front of an inner invoker.
///
/// Chains are built innermost-first at construction time and are immutable
/// afterwards:
///
/// ```ignore
/// let chain = Layered::new(fault_injector, Layered::new(retry, client));
/// ```
pub struct Layered<M, I> {
    middleware: M,
    inner: I,
}

impl<M, I> Layered<M, I> {
    /// Composes `middleware` in front of `inner`.
    pub fn new(middleware: M, inner: I) -> Self {
        Self { middleware, inner }
    }
}

#[async_trait]
impl<M: CallMiddleware, I: ToolInvoker> ToolInvoker for Layered<M, I> {
    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        self.middleware.invoke(&self.inner, name, args).await
    }
}
