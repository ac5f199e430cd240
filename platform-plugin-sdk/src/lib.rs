//! # Host Platform Plugin SDK
//!
//! The client SDK for writing a plugin: a process that admits itself to a
//! host platform core over RPC, declares what it provides and requires,
//! reports its own health, discovers and calls other plugins' services
//! through the host's mediated router, and can request time-limited
//! capability grants for host-provided services.
//!
//! ## Quick Start
//!
//! ```no_run
//! use platform_plugin_sdk::client::PluginClient;
//! use platform_plugin_sdk::models::{HandshakeRequest, ServiceDeclaration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), platform_plugin_sdk::error::ClientError> {
//!     let client = PluginClient::new("http://127.0.0.1:8080");
//!     let response = client
//!         .handshake(HandshakeRequest {
//!             self_id: "logger".to_string(),
//!             self_version: "1.0.0".to_string(),
//!             provides: vec![ServiceDeclaration {
//!                 service_type: "logging".to_string(),
//!                 version: "1.0.0".to_string(),
//!                 endpoint_path: "/log".to_string(),
//!             }],
//!             requires: vec![],
//!             core_protocol_version: "1.0".to_string(),
//!             magic_cookie: "shared-secret".to_string(),
//!             endpoint_base_url: "http://127.0.0.1:9001".to_string(),
//!         })
//!         .await?;
//!     println!("admitted as {}", response.runtime_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - **`client`**: [`client::PluginClient`], the HTTP client for every host-facing call.
//! - **`models`**: wire types shared between a plugin and the host.
//! - **`error`**: [`error::ClientError`], mirroring the host's error-kind taxonomy.

pub mod client;
pub mod error;
pub mod models;

pub use client::PluginClient;
pub use error::ClientError;

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, ClientError>;
