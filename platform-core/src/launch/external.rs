//! External / unmanaged launch strategy (§4.10): the plugin is already
//! running somewhere the operator configured; there is nothing to start or
//! stop, and the plugin is expected to self-register via `Handshake`.

use async_trait::async_trait;
use platform_plugin_sdk::models::PluginSpec;

use super::{LaunchHandle, LaunchStrategy, Stopper};
use crate::error::PlatformError;

pub struct ExternalLaunchStrategy;

struct NoopStopper;

#[async_trait]
impl Stopper for NoopStopper {
    async fn stop(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[async_trait]
impl LaunchStrategy for ExternalLaunchStrategy {
    async fn launch(&self, spec: &PluginSpec) -> Result<LaunchHandle, PlatformError> {
        let endpoint_url = spec.endpoint_url.clone().ok_or_else(|| PlatformError::InvalidArgument {
            message: "external launch strategy requires `endpoint_url`".to_string(),
        })?;
        Ok(LaunchHandle::new(endpoint_url, NoopStopper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launch_returns_the_configured_endpoint() {
        let strategy = ExternalLaunchStrategy;
        let spec = PluginSpec {
            self_id: "already-running".to_string(),
            strategy: platform_plugin_sdk::models::LaunchStrategyKind::External,
            command: None,
            args: vec![],
            endpoint_url: Some("http://127.0.0.1:9999".to_string()),
        };
        let handle = strategy.launch(&spec).await.unwrap();
        assert_eq!(handle.endpoint_url, "http://127.0.0.1:9999");
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_endpoint_url_is_rejected() {
        let strategy = ExternalLaunchStrategy;
        let spec = PluginSpec {
            self_id: "already-running".to_string(),
            strategy: platform_plugin_sdk::models::LaunchStrategyKind::External,
            command: None,
            args: vec![],
            endpoint_url: None,
        };
        assert!(strategy.launch(&spec).await.is_err());
    }
}
