//! Bounded pure validation functions for plugin-supplied strings (§4.3).
//!
//! Nothing invalid is ever stored: every call site validates before touching
//! the registry, lifecycle store, or dependency graph.

use crate::error::PlatformError;

const SELF_ID_MAX: usize = 128;
const VERSION_MAX: usize = 64;
const SERVICE_TYPE_MAX: usize = 128;
const ENDPOINT_PATH_MAX: usize = 256;
const METADATA_KEY_MAX: usize = 256;
const METADATA_VALUE_MAX: usize = 4096;
const METADATA_ENTRIES_MAX: usize = 100;

fn invalid(field: &str, reason: &str) -> PlatformError {
    PlatformError::InvalidArgument {
        message: format!("{field}: {reason}"),
    }
}

/// `^[A-Za-z][A-Za-z0-9_.-]*$`, ≤128 bytes.
pub fn validate_self_id(value: &str) -> Result<(), PlatformError> {
    if value.is_empty() || value.len() > SELF_ID_MAX {
        return Err(invalid(
            "self_id",
            &format!("must be 1..={SELF_ID_MAX} bytes"),
        ));
    }
    let mut chars = value.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphabetic() {
        return Err(invalid("self_id", "must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(invalid(
            "self_id",
            "must match [A-Za-z][A-Za-z0-9_.-]*",
        ));
    }
    Ok(())
}

/// `MAJOR.MINOR.PATCH[-PRE]`, no leading `v`, ≤64 bytes.
pub fn validate_version(value: &str) -> Result<(), PlatformError> {
    if value.is_empty() || value.len() > VERSION_MAX {
        return Err(invalid(
            "version",
            &format!("must be 1..={VERSION_MAX} bytes"),
        ));
    }
    if value.starts_with('v') || value.starts_with('V') {
        return Err(invalid("version", "must not have a leading 'v'"));
    }
    let (core, _pre) = match value.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (value, None),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return Err(invalid("version", "must be semver MAJOR.MINOR.PATCH[-PRE]"));
    }
    Ok(())
}

/// Parses the numeric `(major, minor, patch)` triple, ignoring any `-PRE` suffix.
/// Caller is expected to have already run [`validate_version`].
pub fn parse_semver_core(value: &str) -> (u64, u64, u64) {
    let core = value.split('-').next().unwrap_or(value);
    let mut parts = core.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Alphanumeric + `-_`, no `/`, no `..`, no NUL, ≤128 bytes.
pub fn validate_service_type(value: &str) -> Result<(), PlatformError> {
    if value.is_empty() || value.len() > SERVICE_TYPE_MAX {
        return Err(invalid(
            "type",
            &format!("must be 1..={SERVICE_TYPE_MAX} bytes"),
        ));
    }
    if value.contains('/') || value.contains("..") || value.contains('\0') {
        return Err(invalid("type", "must not contain '/', '..', or NUL"));
    }
    if !value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
        return Err(invalid("type", "must be alphanumeric plus '-_'"));
    }
    Ok(())
}

/// Must start with `/`, no NUL, ≤256 bytes.
pub fn validate_endpoint_path(value: &str) -> Result<(), PlatformError> {
    if value.is_empty() || value.len() > ENDPOINT_PATH_MAX {
        return Err(invalid(
            "endpoint_path",
            &format!("must be 1..={ENDPOINT_PATH_MAX} bytes"),
        ));
    }
    if !value.starts_with('/') {
        return Err(invalid("endpoint_path", "must start with '/'"));
    }
    if value.contains('\0') {
        return Err(invalid("endpoint_path", "must not contain NUL"));
    }
    Ok(())
}

/// `^[A-Za-z][A-Za-z0-9_-]*$`, ≤256 bytes.
pub fn validate_metadata_key(value: &str) -> Result<(), PlatformError> {
    if value.is_empty() || value.len() > METADATA_KEY_MAX {
        return Err(invalid(
            "metadata key",
            &format!("must be 1..={METADATA_KEY_MAX} bytes"),
        ));
    }
    let mut chars = value.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphabetic() {
        return Err(invalid("metadata key", "must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-')) {
        return Err(invalid("metadata key", "must match [A-Za-z][A-Za-z0-9_-]*"));
    }
    Ok(())
}

/// No NUL, ≤4096 bytes.
pub fn validate_metadata_value(value: &str) -> Result<(), PlatformError> {
    if value.len() > METADATA_VALUE_MAX {
        return Err(invalid(
            "metadata value",
            &format!("must be ≤{METADATA_VALUE_MAX} bytes"),
        ));
    }
    if value.contains('\0') {
        return Err(invalid("metadata value", "must not contain NUL"));
    }
    Ok(())
}

/// Validates an entire metadata map: entry count bound plus per-entry key/value bounds.
pub fn validate_metadata(
    metadata: &std::collections::HashMap<String, String>,
) -> Result<(), PlatformError> {
    if metadata.len() > METADATA_ENTRIES_MAX {
        return Err(invalid(
            "metadata",
            &format!("must have ≤{METADATA_ENTRIES_MAX} entries"),
        ));
    }
    for (key, value) in metadata {
        validate_metadata_key(key)?;
        validate_metadata_value(value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_id_accepts_spec_example() {
        assert!(validate_self_id("lg").is_ok());
        assert!(validate_self_id("storage-v2.internal_1").is_ok());
    }

    #[test]
    fn self_id_rejects_leading_digit() {
        assert!(validate_self_id("1plugin").is_err());
    }

    #[test]
    fn self_id_rejects_oversize() {
        let long = "a".repeat(SELF_ID_MAX + 1);
        assert!(validate_self_id(&long).is_err());
    }

    #[test]
    fn version_accepts_prerelease() {
        assert!(validate_version("1.0.0").is_ok());
        assert!(validate_version("1.2.3-beta.1").is_ok());
    }

    #[test]
    fn version_rejects_leading_v() {
        assert!(validate_version("v1.0.0").is_err());
    }

    #[test]
    fn version_rejects_malformed() {
        assert!(validate_version("1.0").is_err());
        assert!(validate_version("1.0.x").is_err());
    }

    #[test]
    fn parse_semver_core_ignores_prerelease() {
        assert_eq!(parse_semver_core("1.2.3-rc.1"), (1, 2, 3));
    }

    #[test]
    fn service_type_rejects_path_traversal() {
        assert!(validate_service_type("../etc").is_err());
        assert!(validate_service_type("logger/v1").is_err());
    }

    #[test]
    fn endpoint_path_requires_leading_slash() {
        assert!(validate_endpoint_path("logger.v1.Logger").is_err());
        assert!(validate_endpoint_path("/logger.v1.Logger/").is_ok());
    }

    #[test]
    fn metadata_enforces_entry_cap() {
        let map: std::collections::HashMap<String, String> = (0..101)
            .map(|i| (format!("k{i}"), "v".to_string()))
            .collect();
        assert!(validate_metadata(&map).is_err());
    }
}
