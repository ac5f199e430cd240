//! Per-request caller context, threaded through middleware and handlers for
//! tracing, logging, and authorization decisions.
//!
//! Grounded on `request_context.rs`'s `RequestContext`, narrowed from
//! end-user auth (`user_id`/`api_key`) to the one identity this platform
//! actually authenticates callers as: a plugin's `runtime_id`, established
//! by a validated runtime (or capability-grant) bearer token.

use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Identity and timing data attached to one inbound HTTP request.
///
/// Populated by the auth middleware (`middleware.rs`) once a bearer token
/// validates, or left with `caller_runtime_id: None` for endpoints that
/// don't require one (e.g. `Handshake` itself, which is how a runtime_id
/// comes to exist in the first place).
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub request_id: String,
    pub caller_runtime_id: Option<String>,
    pub start_time: Instant,
    pub metadata: HashMap<String, String>,
}

impl CallerContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            caller_runtime_id: None,
            start_time: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_caller(caller_runtime_id: Option<String>) -> Self {
        Self {
            caller_runtime_id,
            ..Self::new()
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_no_caller() {
        let ctx = CallerContext::new();
        assert!(ctx.caller_runtime_id.is_none());
        assert!(!ctx.request_id.is_empty());
    }

    #[test]
    fn with_caller_records_runtime_id() {
        let ctx = CallerContext::with_caller(Some("rt-1".to_string()));
        assert_eq!(ctx.caller_runtime_id.as_deref(), Some("rt-1"));
    }

    #[test]
    fn metadata_roundtrips() {
        let ctx = CallerContext::new().with_metadata("service_type".to_string(), "storage".to_string());
        assert_eq!(ctx.get_metadata("service_type"), Some(&"storage".to_string()));
        assert!(ctx.get_metadata("missing").is_none());
    }
}
