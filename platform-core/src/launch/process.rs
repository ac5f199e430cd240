//! Process launch strategy (§4.10): spawns a child, waits for TCP readiness,
//! surfaces its stdio to the host's log, and force-kills on stop.
//!
//! Graceful shutdown happens one layer up, via the Orchestrator's polite
//! `PluginControl.Shutdown` RPC before `Stop` is ever called (§4.11
//! `RemovePlugin` step 5); `Stop` itself only needs to be a safe, idempotent
//! backstop, not a second negotiation.

use async_trait::async_trait;
use platform_plugin_sdk::models::PluginSpec;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{LaunchHandle, LaunchStrategy, Stopper};
use crate::error::PlatformError;

pub struct ProcessLaunchConfig {
    pub readiness_timeout: Duration,
    pub stop_grace: Duration,
    /// If set, spawned processes receive `HOST_URL` and are expected to
    /// self-register via `Handshake` rather than wait for `SetRuntimeIdentity`.
    pub host_url: Option<String>,
}

pub struct ProcessLaunchStrategy {
    config: ProcessLaunchConfig,
}

impl ProcessLaunchStrategy {
    pub fn new(config: ProcessLaunchConfig) -> Self {
        Self { config }
    }
}

struct ProcessStopper {
    child: Mutex<Option<Child>>,
    grace: Duration,
}

#[async_trait]
impl Stopper for ProcessStopper {
    async fn stop(&self) -> Result<(), PlatformError> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(()); // already stopped
        };
        // Give any in-flight polite shutdown a moment to land before the kill.
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => child.kill().await.map_err(|e| PlatformError::Internal {
                message: format!("failed to kill plugin process: {e}"),
            }),
        }
    }
}

#[async_trait]
impl LaunchStrategy for ProcessLaunchStrategy {
    async fn launch(&self, spec: &PluginSpec) -> Result<LaunchHandle, PlatformError> {
        let command = spec.command.as_ref().ok_or_else(|| PlatformError::InvalidArgument {
            message: "process launch strategy requires `command`".to_string(),
        })?;

        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| PlatformError::Internal {
            message: format!("failed to reserve a loopback port: {e}"),
        })?;
        let port = listener.local_addr().map_err(|e| PlatformError::Internal {
            message: format!("failed to read reserved port: {e}"),
        })?.port();
        drop(listener); // release before the child binds it

        let mut cmd = Command::new(command);
        cmd.args(&spec.args)
            .env("PORT", port.to_string())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(host_url) = &self.config.host_url {
            cmd.env("HOST_URL", host_url);
        }

        let mut child = cmd.spawn().map_err(|e| PlatformError::Internal {
            message: format!("failed to spawn plugin process '{command}': {e}"),
        })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_forwarder(spec.self_id.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_forwarder(spec.self_id.clone(), "stderr", stderr);
        }

        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid loopback address");
        wait_for_readiness(addr, self.config.readiness_timeout).await?;

        let endpoint_url = format!("http://127.0.0.1:{port}");
        Ok(LaunchHandle::new(
            endpoint_url,
            ProcessStopper {
                child: Mutex::new(Some(child)),
                grace: self.config.stop_grace,
            },
        ))
    }
}

async fn wait_for_readiness(addr: SocketAddr, timeout: Duration) -> Result<(), PlatformError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PlatformError::DeadlineExceeded {
                message: format!("plugin did not become reachable on {addr} within {timeout:?}"),
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn spawn_log_forwarder(self_id: String, stream_name: &'static str, reader: impl tokio::io::AsyncRead + Unpin + Send + 'static) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(plugin = %self_id, stream = stream_name, "{line}");
        }
    });
}
