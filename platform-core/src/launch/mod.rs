//! Launch Strategies (§4.10): pluggable start/stop of a plugin instance.
//!
//! `Process` spawns a real child; `InMemory` runs the plugin's own Axum
//! router over a zero-socket in-process duplex transport (used by the test
//! harness, §10); `External` assumes the plugin is already running and
//! self-registers. All three share one `Launch`/`Stop` interface so the
//! Orchestrator (§4.11) never branches on strategy kind beyond checking
//! whether a [`DuplexTransport`] is present.

mod external;
mod in_memory;
mod process;

use std::sync::Arc;

pub use external::ExternalLaunchStrategy;
pub use in_memory::{build_request, DuplexTransport, InMemoryLaunchStrategy, IN_MEMORY_HOST};
pub use process::{ProcessLaunchConfig, ProcessLaunchStrategy};

use async_trait::async_trait;
use platform_plugin_sdk::models::PluginSpec;

use crate::error::PlatformError;

/// A running (or already-stopped) plugin instance.
pub struct LaunchHandle {
    pub endpoint_url: String,
    /// Present only for the `InMemory` strategy. When set, callers must
    /// reach this plugin through the duplex transport instead of `reqwest`
    /// against `endpoint_url` (which is a synthetic, unroutable string).
    pub transport: Option<Arc<DuplexTransport>>,
    stopper: Box<dyn Stopper>,
}

impl LaunchHandle {
    fn new(endpoint_url: String, stopper: impl Stopper + 'static) -> Self {
        Self {
            endpoint_url,
            transport: None,
            stopper: Box::new(stopper),
        }
    }

    fn with_transport(endpoint_url: String, transport: Arc<DuplexTransport>, stopper: impl Stopper + 'static) -> Self {
        Self {
            endpoint_url,
            transport: Some(transport),
            stopper: Box::new(stopper),
        }
    }

    /// Idempotent graceful-then-forced (or no-op) termination, per strategy.
    pub async fn stop(&self) -> Result<(), PlatformError> {
        self.stopper.stop().await
    }
}

#[async_trait]
trait Stopper: Send + Sync {
    async fn stop(&self) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait LaunchStrategy: Send + Sync {
    async fn launch(&self, spec: &PluginSpec) -> Result<LaunchHandle, PlatformError>;
}
