//! Read-through cache coordination for tool dispatches.
//!
//! Read-only tools are served from cache when a fingerprint-keyed entry
//! exists; successful mutations invalidate every cached entry for the
//! tenant when the tool touches a known entity. All failures are logged
//! and swallowed: the cache can only ever make a dispatch faster, never
//! break it.

use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::CacheBackend;

/// Namespace prefix for every result-cache key.
const NAMESPACE: &str = "braid";

/// Length of the hex fingerprint embedded in cache keys.
const FINGERPRINT_LEN: usize = 12;

/// Entity families whose mutations invalidate the tenant's cache, with the
/// prefix patterns that recognize a mutating tool name.
const ENTITY_PATTERNS: &[(&str, &str)] = &[
    ("lead", r"^(create|update|delete|qualify|convert)_lead"),
    ("account", r"^(create|update|delete)_account"),
    ("contact", r"^(create|update|delete)_contact"),
    ("opportunity", r"^(create|update|delete)_opportunity"),
    ("activity", r"^(create|update|delete|complete)_activity"),
    ("note", r"^(create|update|delete)_note"),
    ("bizdev", r"^(create|update|delete)_bizdev"),
];

/// Coordinates fingerprinting, read-through, and write invalidation.
pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
    patterns: Vec<(&'static str, Regex)>,
}

impl CacheCoordinator {
    /// Wrap a backend with the built-in entity-pattern table.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        let patterns = ENTITY_PATTERNS
            .iter()
            .map(|(entity, pattern)| {
                (*entity, Regex::new(pattern).expect("static entity pattern"))
            })
            .collect();
        Self { backend, patterns }
    }

    /// Deterministic fingerprint of a canonical argument map.
    ///
    /// Keys are ordered before hashing so that semantically equal maps
    /// always produce the same fingerprint.
    pub fn fingerprint(args: &Map<String, Value>) -> String {
        let mut rendered = String::new();
        stable_render(&Value::Object(args.clone()), &mut rendered);
        let digest = Sha256::digest(rendered.as_bytes());
        let mut hexed = hex::encode(digest);
        hexed.truncate(FINGERPRINT_LEN);
        hexed
    }

    /// Cache key for one tenant + tool + argument fingerprint.
    pub fn key(tenant: Uuid, tool: &str, fingerprint: &str) -> String {
        format!("{NAMESPACE}:{tenant}:{tool}:{fingerprint}")
    }

    /// Probe the cache; `None` on miss or backend failure.
    pub async fn read(&self, key: &str) -> Option<Value> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a successful read result. Failures are logged and swallowed.
    pub async fn store(&self, key: &str, value: &Value, ttl_secs: u64) {
        if let Err(e) = self.backend.set(key, value.clone(), ttl_secs).await {
            warn!(key, error = %e, "cache store failed");
        }
    }

    /// The entity family a mutating tool name belongs to, when any.
    pub fn matching_entity(&self, tool: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(tool))
            .map(|(entity, _)| *entity)
    }

    /// Invalidate the tenant's cached entries after a successful mutation.
    ///
    /// Returns whether the tool matched an entity pattern (and invalidation
    /// was therefore attempted). Backend failures are logged and swallowed.
    pub async fn invalidate_after_write(&self, tenant: Uuid, tool: &str) -> bool {
        let Some(entity) = self.matching_entity(tool) else {
            return false;
        };
        match self.backend.invalidate_tenant(tenant, NAMESPACE).await {
            Ok(removed) => {
                debug!(%tenant, tool, entity, removed, "cache invalidated after write");
            }
            Err(e) => {
                warn!(%tenant, tool, entity, error = %e, "cache invalidation failed");
            }
        }
        true
    }
}

/// Render JSON with object keys sorted, for stable hashing.
fn stable_render(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    stable_render(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                stable_render(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
