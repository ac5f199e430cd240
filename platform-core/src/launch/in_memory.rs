//! In-memory launch strategy (§4.10): runs a plugin's own Axum router inside
//! this process over a zero-socket duplex transport, for the test harness
//! (§10) and for plugins linked directly into the host binary.
//!
//! [`DuplexTransport`] is the named shared resource of §5: it is both the
//! listener (the server side `axum::serve`'s custom [`axum::serve::Listener`]
//! pulls accepted streams from) and the dialer (`dial()` hands out the client
//! side of a fresh `tokio::io::duplex` pair). `close()` drops the accept
//! channel so every dial from then on fails immediately with
//! `PlatformError::Unavailable` instead of blocking; connections already
//! accepted keep running to completion. No loopback socket, no port, no OS
//! networking stack involved at any point.

use std::sync::Arc;
use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use hyper::client::conn::http1 as client_conn;
use hyper_util::rt::TokioIo;
use platform_plugin_sdk::models::PluginSpec;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{LaunchHandle, LaunchStrategy, Stopper};
use crate::error::PlatformError;

const DUPLEX_BUFFER: usize = 64 * 1024;

/// One in-process listener/dialer pair. There is no socket address; the only
/// way to reach the served router is through [`DuplexTransport::dial`].
pub struct DuplexTransport {
    accept_tx: Mutex<Option<mpsc::UnboundedSender<DuplexStream>>>,
}

impl DuplexTransport {
    fn new() -> (Arc<Self>, DuplexListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { accept_tx: Mutex::new(Some(tx)) }), DuplexListener { rx })
    }

    /// Opens a fresh logical connection to the served router. Never blocks
    /// on the server side: the duplex pair is created here and its server
    /// half handed to the accept loop.
    pub async fn dial(&self) -> Result<DuplexStream, PlatformError> {
        let guard = self.accept_tx.lock().await;
        let tx = guard.as_ref().ok_or_else(|| PlatformError::Unavailable {
            message: "in-memory transport is closed".to_string(),
        })?;
        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        tx.send(server).map_err(|_| PlatformError::Unavailable {
            message: "in-memory transport's accept loop is gone".to_string(),
        })?;
        Ok(client)
    }

    /// Refuses every dial from now on. Does not touch connections already
    /// accepted; the accept loop simply idles once the channel drains.
    async fn close(&self) {
        self.accept_tx.lock().await.take();
    }

    /// Dials, sends `request`, and returns the raw response so the caller
    /// can stream or buffer the body as it needs.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<hyper::body::Incoming>, PlatformError> {
        let stream = self.dial().await?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = client_conn::handshake(io).await.map_err(|e| PlatformError::Unavailable {
            message: format!("in-memory handshake failed: {e}"),
        })?;
        tokio::spawn(async move {
            let _ = conn.await;
        });
        sender.send_request(request).await.map_err(|e| PlatformError::Unavailable {
            message: format!("in-memory request failed: {e}"),
        })
    }

    /// Same as [`DuplexTransport::send`], but buffers the full response body
    /// for callers that need to parse it (e.g. JSON), rather than stream it.
    pub async fn send_buffered(&self, request: Request<Body>) -> Result<(axum::http::response::Parts, Vec<u8>), PlatformError> {
        let response = self.send(request).await?;
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.map_err(|e| PlatformError::Unavailable {
            message: format!("in-memory response body read failed: {e}"),
        })?;
        Ok((parts, bytes.to_bytes().to_vec()))
    }
}

impl std::fmt::Debug for DuplexTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexTransport").finish_non_exhaustive()
    }
}

/// Host header sent on every in-memory request; there is no real authority
/// to put there, but HTTP/1.1 requires one.
pub const IN_MEMORY_HOST: &str = "in-memory.local";

struct DuplexListener {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl axum::serve::Listener for DuplexListener {
    type Io = DuplexStream;
    type Addr = ();

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            if let Some(stream) = self.rx.recv().await {
                return (stream, ());
            }
            // Channel closed: never accept again, but never busy-loop either.
            std::future::pending::<()>().await;
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(())
    }
}

/// Plugins this strategy knows how to run, keyed by `self_id`. Registered
/// ahead of time by whatever assembled the test harness or embedded plugin.
pub struct InMemoryLaunchStrategy {
    routers: HashMap<String, Router>,
}

impl InMemoryLaunchStrategy {
    pub fn new() -> Self {
        Self {
            routers: HashMap::new(),
        }
    }

    pub fn register(mut self, self_id: impl Into<String>, router: Router) -> Self {
        self.routers.insert(self_id.into(), router);
        self
    }
}

impl Default for InMemoryLaunchStrategy {
    fn default() -> Self {
        Self::new()
    }
}

struct TransportStopper {
    transport: Arc<DuplexTransport>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Stopper for TransportStopper {
    async fn stop(&self) -> Result<(), PlatformError> {
        self.transport.close().await;
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl LaunchStrategy for InMemoryLaunchStrategy {
    async fn launch(&self, spec: &PluginSpec) -> Result<LaunchHandle, PlatformError> {
        let router = self
            .routers
            .get(&spec.self_id)
            .cloned()
            .ok_or_else(|| PlatformError::InvalidArgument {
                message: format!("no in-memory router registered for self_id '{}'", spec.self_id),
            })?;

        let (transport, listener) = DuplexTransport::new();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(LaunchHandle::with_transport(
            format!("in-memory:{}", spec.self_id),
            transport.clone(),
            TransportStopper {
                transport,
                handle: Mutex::new(Some(handle)),
            },
        ))
    }
}

/// Builds a GET/POST request targeting `path` on an in-memory transport,
/// with the `Host` header HTTP/1.1 requires and no real authority to supply.
pub fn build_request(method: axum::http::Method, path: &str, body: Body) -> Result<Request<Body>, PlatformError> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(HeaderName::from_static("host"), IN_MEMORY_HOST)
        .body(body)
        .map_err(|e| PlatformError::Internal {
            message: format!("failed to build in-memory request: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn launch_serves_the_registered_router_and_stop_is_idempotent() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let strategy = InMemoryLaunchStrategy::new().register("echo", router);
        let spec = PluginSpec {
            self_id: "echo".to_string(),
            strategy: platform_plugin_sdk::models::LaunchStrategyKind::InMemory,
            command: None,
            args: vec![],
            endpoint_url: None,
        };

        let handle = strategy.launch(&spec).await.unwrap();
        let transport = handle.transport.clone().unwrap();
        let request = build_request(axum::http::Method::GET, "/ping", Body::empty()).unwrap();
        let (parts, body) = transport.send_buffered(request).await.unwrap();
        assert_eq!(parts.status, axum::http::StatusCode::OK);
        assert_eq!(body, b"pong");

        handle.stop().await.unwrap();
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn dial_after_close_is_refused() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let strategy = InMemoryLaunchStrategy::new().register("echo", router);
        let spec = PluginSpec {
            self_id: "echo".to_string(),
            strategy: platform_plugin_sdk::models::LaunchStrategyKind::InMemory,
            command: None,
            args: vec![],
            endpoint_url: None,
        };
        let handle = strategy.launch(&spec).await.unwrap();
        let transport = handle.transport.clone().unwrap();
        handle.stop().await.unwrap();

        let err = transport.dial().await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn unregistered_self_id_is_rejected() {
        let strategy = InMemoryLaunchStrategy::new();
        let spec = PluginSpec {
            self_id: "missing".to_string(),
            strategy: platform_plugin_sdk::models::LaunchStrategyKind::InMemory,
            command: None,
            args: vec![],
            endpoint_url: None,
        };
        let err = strategy.launch(&spec).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
