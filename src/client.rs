//! Protocol client owning a tool server child process.
//!
//! [`ProtocolClient`] spawns the configured server command, performs the
//! `initialize` handshake over newline-delimited JSON-RPC on the child's
//! stdio streams, and correlates request/response traffic by monotonic id.
//! Exactly one call may be outstanding at a time; the session mutex
//! serializes concurrent callers.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::middleware::ToolInvoker;
use crate::types::{
    methods, InitializeParams, InitializeResult, ListToolsResult, RequestEnvelope,
    ResponseEnvelope, RpcError, ToolDescriptor,
};

/// How to spawn and talk to the server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Deadline for the handshake response.
    pub startup_timeout: Duration,
    /// Per-call deadline for a matching response.
    pub request_timeout: Duration,
    /// Grace period between closing stdin and force-killing the child.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Creates a config with default timeouts (10s startup, 5s per request,
    /// 5s shutdown grace).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            startup_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the per-call read timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the handshake deadline.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

/// Lifecycle state of a [`ProtocolClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Never started.
    Unstarted,
    /// Spawn and handshake in progress.
    Starting,
    /// Handshake complete, accepting calls.
    Ready,
    /// Shutdown in progress.
    Stopping,
    /// Cleanly stopped (possibly after a force-kill).
    Stopped,
    /// The child exited unexpectedly.
    Crashed,
}

/// A live child process with its stdio halves.
struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// JSON-RPC client for a spawned tool server.
///
/// All methods take `&self`; the internal session mutex guarantees that at
/// most one request is outstanding on the wire at any moment. Callers that
/// need true concurrency must use separate client instances.
pub struct ProtocolClient {
    config: ServerConfig,
    session: Mutex<Option<Session>>,
    state: parking_lot::Mutex<ClientState>,
    next_id: AtomicU64,
    server: parking_lot::Mutex<Option<InitializeResult>>,
}

impl ProtocolClient {
    /// Creates an unstarted client for the given server configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            state: parking_lot::Mutex::new(ClientState::Unstarted),
            next_id: AtomicU64::new(1),
            server: parking_lot::Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    /// Handshake result from the server, if the client has started.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.lock().clone()
    }

    /// Spawns the server process and performs the `initialize` handshake.
    ///
    /// Blocks until a well-formed handshake response arrives or the startup
    /// timeout elapses. Fails with [`Error::Transport`] if the process exits
    /// before responding and [`Error::Protocol`] if the response is malformed
    /// or missing required fields. A no-op if the client is already running.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            debug!(command = %self.config.command, "server already running");
            return Ok(());
        }
        self.set_state(ClientState::Starting);

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            self.set_state(ClientState::Crashed);
            Error::Transport(format!("failed to spawn {}: {e}", self.config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout was not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        let mut session = Session {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = to_params(&InitializeParams::default())?;
        let envelope = RequestEnvelope::new(id, methods::INITIALIZE, params);

        match round_trip(&mut session, &envelope, self.config.startup_timeout).await {
            Ok(Ok(value)) => {
                let init: InitializeResult = serde_json::from_value(value).map_err(|e| {
                    let _ = session.child.start_kill();
                    self.set_state(ClientState::Crashed);
                    Error::Protocol(format!("malformed handshake response: {e}"))
                })?;
                info!(
                    command = %self.config.command,
                    protocol = %init.protocol_version,
                    "server started"
                );
                *self.server.lock() = Some(init);
                *guard = Some(session);
                self.set_state(ClientState::Ready);
                Ok(())
            },
            Ok(Err(rpc)) => {
                let _ = session.child.start_kill();
                self.set_state(ClientState::Crashed);
                Err(Error::Protocol(format!(
                    "handshake rejected by server: {} ({})",
                    rpc.message, rpc.code
                )))
            },
            Err(err) => {
                let _ = session.child.start_kill();
                self.set_state(ClientState::Crashed);
                Err(err)
            },
        }
    }

    /// Stops the server process.
    ///
    /// Closes stdin to request a graceful exit, waits the configured grace
    /// period, and force-kills the child if it is still alive. Always leaves
    /// the client `Stopped`; calling it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            self.set_state(ClientState::Stopped);
            return Ok(());
        };
        self.set_state(ClientState::Stopping);

        let Session {
            mut child,
            stdin,
            stdout,
        } = session;
        // Closing stdin signals termination to a stdio server.
        drop(stdin);
        drop(stdout);

        match tokio::time::timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "server exited"),
            Ok(Err(err)) => warn!(%err, "failed to reap server process"),
            Err(_) => {
                warn!(
                    grace = ?self.config.shutdown_grace,
                    "server did not exit within grace period, killing"
                );
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to kill server process");
                }
            },
        }

        self.set_state(ClientState::Stopped);
        Ok(())
    }

    /// Stops and restarts the server process.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Fetches the tool catalog, preserving server-declared order.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let value = self.request(methods::TOOLS_LIST, json!({})).await?;
        let parsed: ListToolsResult = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    /// Invokes a tool and returns its result payload.
    ///
    /// A JSON-RPC error object from the server surfaces as [`Error::Rpc`].
    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        self.request(methods::TOOLS_CALL, json!({"name": name, "arguments": args}))
            .await
    }

    /// Issues one request and awaits its matching response.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("server not started".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = RequestEnvelope::new(id, method, params);
        let outcome = round_trip(session, &envelope, self.config.request_timeout).await;

        if matches!(outcome, Err(Error::Transport(_))) {
            // The child is gone; drop the dead session so stop()/start() see
            // a clean slate.
            self.set_state(ClientState::Crashed);
            if let Some(mut dead) = guard.take() {
                let _ = dead.child.start_kill();
            }
        }

        match outcome? {
            Ok(value) => Ok(value),
            Err(RpcError { code, message, .. }) => Err(Error::Rpc { code, message }),
        }
    }
}

#[async_trait]
impl ToolInvoker for ProtocolClient {
    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        self.call(name, args).await
    }
}

/// Writes one request line and reads frames until the matching response.
///
/// Notifications (method present, no id) are logged and skipped. A response
/// with a different id, or one violating the exclusive result/error rule, is
/// a protocol violation. EOF means the child closed its output stream.
async fn round_trip(
    session: &mut Session,
    envelope: &RequestEnvelope,
    timeout: Duration,
) -> Result<std::result::Result<Value, RpcError>> {
    let mut frame = serde_json::to_vec(envelope)
        .map_err(|e| Error::Protocol(format!("failed to encode request: {e}")))?;
    frame.push(b'\n');

    session
        .stdin
        .write_all(&frame)
        .await
        .map_err(|e| Error::Transport(format!("failed to write request: {e}")))?;
    session
        .stdin
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("failed to flush request: {e}")))?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::time::timeout_at(deadline, session.stdout.read_line(&mut line)).await;
        let bytes = match read {
            Err(_) => return Err(Error::Timeout { timeout }),
            Ok(result) => {
                result.map_err(|e| Error::Transport(format!("failed to read response: {e}")))?
            },
        };
        if bytes == 0 {
            return Err(Error::Transport(
                "server closed its output stream".to_string(),
            ));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| Error::Protocol(format!("invalid JSON frame: {e}")))?;
        if value.get("method").is_some() && value.get("id").is_none() {
            debug!(frame = %trimmed, "skipping notification while awaiting response");
            continue;
        }

        let response: ResponseEnvelope = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed response envelope: {e}")))?;
        if response.id != envelope.id {
            return Err(Error::Protocol(format!(
                "response id {} does not match outstanding request id {}",
                response.id, envelope.id
            )));
        }
        return response.into_outcome();
    }
}

/// Forwards child stderr lines to tracing until the stream closes.
async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "mcp.server", "{line}");
    }
}

fn to_params<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Protocol(format!("failed to encode params: {e}")))
}
