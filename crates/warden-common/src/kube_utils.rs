//! Shared Kubernetes utilities using kube-rs
//!
//! The agent only ever reads CNPG resources through `DynamicObject`, so
//! the helpers here cover building an `ApiResource` for a known kind,
//! reading nested fields by path, and checking owner references.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};

use crate::FieldError;

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for marker types of the custom resources the agent reads
/// so that every list/watch call uses the same apiVersion and plural.
///
/// # Example
/// ```ignore
/// impl HasApiResource for ScheduledBackup {
///     const API_VERSION: &'static str = "postgresql.cnpg.io/v1";
///     const KIND: &'static str = "ScheduledBackup";
/// }
///
/// let ar = ScheduledBackup::api_resource();
/// assert_eq!(ar.plural, "scheduledbackups");
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "postgresql.cnpg.io/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "ScheduledBackup")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); core resources have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a kind the way the API server names its resources
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Structured field access
// =============================================================================

/// Read a nested string field from a dynamic object.
///
/// `path` is relative to the object root, e.g. `&["status", "phase"]`.
/// Returns `Ok(None)` when any segment is absent or null, and an error when
/// the field exists but is not a string.
pub fn nested_str<'a>(obj: &'a DynamicObject, path: &[&str]) -> Result<Option<&'a str>, FieldError> {
    let mut current = &obj.data;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }

    match current {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s.as_str())),
        _ => Err(FieldError::WrongType {
            path: path.join("."),
            expected: "string",
        }),
    }
}

/// Check whether any owner reference matches the given kind and name
pub fn has_owner(owner_refs: &[OwnerReference], kind: &str, name: &str) -> bool {
    owner_refs.iter().any(|r| r.kind == kind && r.name == name)
}

/// Check whether a dynamic object is owned by a resource with the given kind and name
pub fn is_owned_by(obj: &DynamicObject, kind: &str, name: &str) -> bool {
    obj.metadata
        .owner_references
        .as_deref()
        .map(|refs| has_owner(refs, kind, name))
        .unwrap_or(false)
}
