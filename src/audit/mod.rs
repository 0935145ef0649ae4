//! Asynchronous audit trail for tool dispatches.
//!
//! Every dispatch (beyond the unauthenticated early exit) produces one
//! structured row. Result payloads are never copied into the trail; only a
//! fixed summary placeholder is stored, so CRM data cannot leak through the
//! audit store. Writes are fire-and-forget: failures are logged and the
//! dispatch result is unaffected.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::EngineError;
use crate::filter::recognize_entity;
use crate::gate::GateClearance;
use crate::types::{AccessToken, TenantRecord};

/// Maximum stored length of an error message.
const ERROR_MESSAGE_CAP: usize = 500;

/// Placeholder stored instead of the real result payload.
fn result_placeholder() -> Value {
    serde_json::json!({ "summary": "Result logged" })
}

/// Errors from an audit store. Logged and swallowed by the sink.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The store could not accept the row.
    #[error("audit store write failed: {0}")]
    WriteFailed(String),
}

/// One structured audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Tool name as dispatched.
    pub tool: String,
    /// Braid function the tool maps to.
    pub braid_function: String,
    /// Braid source file the function lives in.
    pub braid_file: String,
    /// Policy that governed the dispatch.
    pub policy: String,
    /// Tool class used for rate limiting.
    pub tool_class: String,
    /// Authorized tenant uuid.
    pub tenant_id: Uuid,
    /// Caller's user uuid; null when the caller passed a non-uuid.
    pub user_id: Option<Uuid>,
    /// Caller's email, including one migrated out of the user-id slot.
    pub user_email: Option<String>,
    /// Caller's role.
    pub user_role: String,
    /// Canonicalized input arguments.
    pub input_args: Value,
    /// `"ok"` or `"error"`.
    pub result_tag: String,
    /// Summary placeholder for successful dispatches; never the payload.
    pub result_value: Option<Value>,
    /// Error kind tag for failed dispatches.
    pub error_type: Option<String>,
    /// Error message, capped at 500 characters.
    pub error_message: Option<String>,
    /// Wall-clock execution time in milliseconds (0 for cache hits).
    pub execution_time_ms: u64,
    /// Whether the result was served from cache.
    pub cache_hit: bool,
    /// Entity family the tool touches, when recognized.
    pub entity_type: Option<String>,
    /// Primary record id pulled from the arguments, when present.
    pub entity_id: Option<String>,
    /// Row creation time.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a row from one dispatch's context.
    #[allow(clippy::too_many_arguments)]
    pub fn from_dispatch(
        clearance: &GateClearance,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        token: &AccessToken,
        input_args: Value,
        result: &Result<Value, EngineError>,
        execution_time_ms: u64,
        cache_hit: bool,
    ) -> Self {
        let (resolved_user_id, migrated_email) = resolve_user_id(user_id);
        let user_email = migrated_email.or_else(|| token.user_email.clone());

        let (result_tag, result_value, error_type, error_message) = match result {
            Ok(_) => ("ok".to_owned(), Some(result_placeholder()), None, None),
            Err(e) => (
                "error".to_owned(),
                None,
                Some(e.kind().to_owned()),
                Some(truncate(&e.to_string(), ERROR_MESSAGE_CAP)),
            ),
        };

        let entity_type = recognize_entity(&clearance.tool.name).map(str::to_owned);
        let entity_id = extract_entity_id(&input_args, entity_type.as_deref());

        Self {
            tool: clearance.tool.name.clone(),
            braid_function: clearance.tool.function_name.clone(),
            braid_file: clearance.tool.source_file.clone(),
            policy: clearance.policy.name.clone(),
            tool_class: clearance.policy.tool_class.as_str().to_owned(),
            tenant_id: tenant.id,
            user_id: resolved_user_id,
            user_email,
            user_role: token.user_role.to_string(),
            input_args,
            result_tag,
            result_value,
            error_type,
            error_message,
            execution_time_ms,
            cache_hit,
            entity_type,
            entity_id,
            timestamp: Utc::now(),
        }
    }
}

/// Parse the caller-supplied user id; emails that land in the slot are
/// migrated out so the uuid column stays clean.
fn resolve_user_id(user_id: Option<&str>) -> (Option<Uuid>, Option<String>) {
    match user_id {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => (Some(id), None),
            Err(_) if raw.contains('@') => {
                warn!(value = raw, "email passed as user id, migrating to user_email");
                (None, Some(raw.to_owned()))
            }
            Err(_) => {
                warn!(value = raw, "non-uuid user id dropped from audit row");
                (None, None)
            }
        },
        None => (None, None),
    }
}

/// Best-effort entity id extraction from the canonical arguments.
fn extract_entity_id(args: &Value, entity: Option<&str>) -> Option<String> {
    let map = args.as_object()?;
    if let Some(entity) = entity {
        if let Some(id) = map.get(&format!("{entity}_id")).and_then(Value::as_str) {
            return Some(id.to_owned());
        }
    }
    map.iter()
        .find(|(k, _)| k.ends_with("_id") && *k != "tenant_id")
        .and_then(|(_, v)| v.as_str().map(str::to_owned))
        .or_else(|| map.get("id").and_then(Value::as_str).map(str::to_owned))
}

fn truncate(s: &str, cap: usize) -> String {
    s.chars().take(cap).collect()
}

/// Append-only destination for audit rows.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one row.
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// In-memory audit store for tests and single-process development.
#[derive(Default)]
pub struct MemoryAuditStore {
    rows: tokio::sync::RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all appended rows.
    pub async fn rows(&self) -> Vec<AuditRecord> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.rows.write().await.push(record.clone());
        Ok(())
    }
}

/// Fire-and-forget wrapper around an [`AuditStore`].
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
}

impl AuditSink {
    /// Wrap a store.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append a row in the background. Write failures are logged, never raised.
    pub fn record(&self, record: AuditRecord) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.append(&record).await {
                warn!(tool = %record.tool, error = %e, "audit row dropped");
            }
        });
    }
}
