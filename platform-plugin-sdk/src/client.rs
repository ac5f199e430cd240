//! # Plugin Client
//!
//! The HTTP client a plugin process uses to talk to the host: admit itself
//! via `Handshake`, report health, register and discover services, request
//! capability grants, and watch a service type for availability changes.
//!
//! One `reqwest::Client` wrapping a single host base URL, covering the
//! plain request/response calls of §6 plus one SSE stream for watching a
//! service type.
//!
//! ## Example
//!
//! ```no_run
//! use platform_plugin_sdk::client::PluginClient;
//! use platform_plugin_sdk::models::HandshakeRequest;
//!
//! # async fn run() -> Result<(), platform_plugin_sdk::error::ClientError> {
//! let client = PluginClient::new("http://127.0.0.1:8080");
//! let response = client
//!     .handshake(HandshakeRequest {
//!         self_id: "logger".to_string(),
//!         self_version: "1.0.0".to_string(),
//!         provides: vec![],
//!         requires: vec![],
//!         core_protocol_version: "1.0".to_string(),
//!         magic_cookie: "shared-secret".to_string(),
//!         endpoint_base_url: "http://127.0.0.1:9001".to_string(),
//!     })
//!     .await?;
//! println!("admitted as {}", response.runtime_id);
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::RwLock;

use crate::error::ClientError;
use crate::models::{
    CapabilityGrantResponse, DiscoverServiceResponse, HandshakeRequest, HandshakeResponse, RegisterServiceRequest,
    ReportHealthRequest, RequestCapabilityRequest, UnregisterServiceRequest, WatchServiceEvent,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity a plugin holds once admitted, either by a successful `Handshake`
/// or by the host pushing `SetRuntimeIdentity` in managed mode.
#[derive(Debug, Clone, Default)]
struct Identity {
    runtime_id: Option<String>,
    runtime_token: Option<String>,
}

/// HTTP client for a plugin process. Not `Clone`: build one per plugin
/// instance and share it behind an `Arc` if multiple tasks need it.
pub struct PluginClient {
    http: reqwest::Client,
    host_base_url: String,
    identity: RwLock<Identity>,
}

impl PluginClient {
    /// Builds a client targeting `host_base_url` (e.g. `http://127.0.0.1:8080`,
    /// no trailing slash required) with the default request timeout.
    pub fn new(host_base_url: impl Into<String>) -> Self {
        Self::with_timeout(host_base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(host_base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client configuration is always valid"),
            host_base_url: host_base_url.into().trim_end_matches('/').to_string(),
            identity: RwLock::new(Identity::default()),
        }
    }

    /// Installs an identity handed to this plugin by the host out-of-band
    /// (managed-mode `SetRuntimeIdentity`, §6), so subsequent calls carry it
    /// without having gone through `handshake()` first.
    pub async fn set_runtime_identity(&self, runtime_id: String, runtime_token: String) {
        let mut identity = self.identity.write().await;
        identity.runtime_id = Some(runtime_id);
        identity.runtime_token = Some(runtime_token);
    }

    pub async fn runtime_id(&self) -> Option<String> {
        self.identity.read().await.runtime_id.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host_base_url, path)
    }

    async fn auth_headers(&self) -> Result<(String, String), ClientError> {
        let identity = self.identity.read().await;
        let runtime_id = identity.runtime_id.clone().ok_or_else(|| ClientError::Configuration {
            message: "no runtime identity yet: call handshake() or set_runtime_identity() first".to_string(),
        })?;
        let runtime_token = identity.runtime_token.clone().ok_or_else(|| ClientError::Configuration {
            message: "no runtime token yet: call handshake() or set_runtime_identity() first".to_string(),
        })?;
        Ok((runtime_id, runtime_token))
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(Self::classify_error_body(status, &body))
        }
    }

    /// Parses the host's `{"error":{"message","kind","code"}}` body when
    /// present so a 409 classifies as `Conflict` vs `FailedPrecondition`
    /// correctly; falls back to the raw body text and a status-only
    /// classification for non-JSON or unexpected error bodies.
    fn classify_error_body(status: reqwest::StatusCode, body: &str) -> ClientError {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => {
                let kind = value["error"]["kind"].as_str().map(str::to_string);
                let message = value["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| body.to_string());
                ClientError::from_kind_and_status(kind.as_deref(), status, message)
            }
            Err(_) => ClientError::from_status(status, body.to_string()),
        }
    }

    /// `Handshake`: admits this plugin and stores the returned identity for
    /// use by every subsequent call.
    pub async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse, ClientError> {
        let response = self.http.post(self.url("/handshake")).json(&request).send().await?;
        let response: HandshakeResponse = Self::handle_response(response).await?;
        self.set_runtime_identity(response.runtime_id.clone(), response.runtime_token.clone())
            .await;
        Ok(response)
    }

    /// `ReportHealth`.
    pub async fn report_health(&self, request: ReportHealthRequest) -> Result<(), ClientError> {
        let (runtime_id, runtime_token) = self.auth_headers().await?;
        let response = self
            .http
            .post(self.url("/lifecycle/report-health"))
            .header("x-plugin-runtime-id", runtime_id)
            .bearer_auth(runtime_token)
            .json(&request)
            .send()
            .await?;
        Self::handle_response::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// `RegisterService`.
    pub async fn register_service(&self, request: RegisterServiceRequest) -> Result<(), ClientError> {
        let (runtime_id, runtime_token) = self.auth_headers().await?;
        let response = self
            .http
            .post(self.url("/registry/register"))
            .header("x-plugin-runtime-id", runtime_id)
            .bearer_auth(runtime_token)
            .json(&request)
            .send()
            .await?;
        Self::handle_response::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// `UnregisterService`.
    pub async fn unregister_service(&self, request: UnregisterServiceRequest) -> Result<(), ClientError> {
        let (runtime_id, runtime_token) = self.auth_headers().await?;
        let response = self
            .http
            .post(self.url("/registry/unregister"))
            .header("x-plugin-runtime-id", runtime_id)
            .bearer_auth(runtime_token)
            .json(&request)
            .send()
            .await?;
        Self::handle_response::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// `DiscoverService`.
    pub async fn discover_service(
        &self,
        service_type: &str,
        min_version: &str,
    ) -> Result<DiscoverServiceResponse, ClientError> {
        let (runtime_id, runtime_token) = self.auth_headers().await?;
        let response = self
            .http
            .get(self.url("/registry/discover"))
            .header("x-plugin-runtime-id", runtime_id)
            .bearer_auth(runtime_token)
            .query(&[("type", service_type), ("min_version", min_version)])
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// `RequestCapability`.
    pub async fn request_capability(
        &self,
        request: RequestCapabilityRequest,
    ) -> Result<CapabilityGrantResponse, ClientError> {
        let (runtime_id, runtime_token) = self.auth_headers().await?;
        let response = self
            .http
            .post(self.url("/broker/request-capability"))
            .header("x-plugin-runtime-id", runtime_id)
            .bearer_auth(runtime_token)
            .json(&request)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// `WatchService`: a lazily-consumed stream of `AVAILABLE`/`UNAVAILABLE`
    /// transitions, decoded from the host's server-sent-event response body.
    pub async fn watch_service(
        &self,
        service_type: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<WatchServiceEvent, ClientError>> + Send>>, ClientError> {
        let (runtime_id, runtime_token) = self.auth_headers().await?;
        let response = self
            .http
            .get(self.url("/registry/watch"))
            .header("x-plugin-runtime-id", runtime_id)
            .bearer_auth(runtime_token)
            .query(&[("type", service_type), ("min_version", "0.0.0")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(Self::classify_error_body(status, &body));
        }

        let byte_stream = response.bytes_stream();
        let events = async_stream::stream! {
            let mut buffer = String::new();
            tokio::pin!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ClientError::Http(e));
                        continue;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    for line in event.lines() {
                        if let Some(data) = line.strip_prefix("data:") {
                            match serde_json::from_str::<WatchServiceEvent>(data.trim()) {
                                Ok(event) => yield Ok(event),
                                Err(e) => yield Err(ClientError::Serialization(e)),
                            }
                        }
                    }
                }
            }
        };
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HandshakeResponse, HealthState};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn handshake_stores_returned_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/handshake"))
            .respond_with(ResponseTemplate::new(200).set_body_json(HandshakeResponse {
                runtime_id: "rt-1".to_string(),
                runtime_token: "tok-1".to_string(),
                available_capabilities: vec![],
            }))
            .mount(&server)
            .await;

        let client = PluginClient::new(server.uri());
        let response = client
            .handshake(HandshakeRequest {
                self_id: "logger".to_string(),
                self_version: "1.0.0".to_string(),
                provides: vec![],
                requires: vec![],
                core_protocol_version: "1.0".to_string(),
                magic_cookie: "cookie".to_string(),
                endpoint_base_url: "http://127.0.0.1:9001".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.runtime_id, "rt-1");
        assert_eq!(client.runtime_id().await.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn report_health_without_identity_fails_fast() {
        let client = PluginClient::new("http://127.0.0.1:1");
        let err = client
            .report_health(ReportHealthRequest {
                state: HealthState::Healthy,
                reason: None,
                unavailable_deps: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
    }

    #[tokio::test]
    async fn host_error_response_maps_to_matching_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/handshake"))
            .respond_with(ResponseTemplate::new(409).set_body_string("core_protocol_version mismatch"))
            .mount(&server)
            .await;

        let client = PluginClient::new(server.uri());
        let err = client
            .handshake(HandshakeRequest {
                self_id: "logger".to_string(),
                self_version: "1.0.0".to_string(),
                provides: vec![],
                requires: vec![],
                core_protocol_version: "2.0".to_string(),
                magic_cookie: "cookie".to_string(),
                endpoint_base_url: "http://127.0.0.1:9001".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::FailedPrecondition { .. }));
    }
}
