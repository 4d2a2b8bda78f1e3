//! Cached-entry envelope and key format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key prefix shared by every recent-writes entry.
pub const KEY_PREFIX: &str = "fhir";

/// Build the cache key for a document: `fhir:<kind-lowercased>:<id>`.
pub fn cache_key(kind: &str, id: &str) -> String {
    format!("{KEY_PREFIX}:{}:{id}", kind.to_lowercase())
}

/// Scan pattern matching every entry of one kind.
pub fn kind_pattern(kind: &str) -> String {
    format!("{KEY_PREFIX}:{}:*", kind.to_lowercase())
}

/// Envelope stored per document: the body plus write metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResource {
    /// The document body.
    pub resource: Value,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// Document kind label.
    pub resource_type: String,
}

impl CachedResource {
    /// Wrap a document for caching, stamped now.
    pub fn new(kind: impl Into<String>, resource: Value) -> Self {
        Self {
            resource,
            cached_at: Utc::now(),
            resource_type: kind.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(cache_key("Patient", "123"), "fhir:patient:123");
        assert_eq!(cache_key("MedicationRequest", "abc"), "fhir:medicationrequest:abc");
        assert_eq!(kind_pattern("Condition"), "fhir:condition:*");
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = CachedResource::new(
            "Patient",
            serde_json::json!({"resourceType": "Patient", "id": "p1"}),
        );

        let json = serde_json::to_string(&entry).unwrap();
        let back: CachedResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resource_type, "Patient");
        assert_eq!(back.resource["id"], "p1");
        assert_eq!(back.cached_at, entry.cached_at);
    }
}
