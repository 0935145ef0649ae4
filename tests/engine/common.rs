//! Shared harness for engine integration tests: a scriptable mock executor
//! plus in-memory cache and audit collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use straylight::audit::{AuditRecord, AuditStore, MemoryAuditStore};
use straylight::cache::{CacheBackend, InMemoryCache};
use straylight::config::EngineConfig;
use straylight::credential::{CredentialSigner, SigningSecret};
use straylight::dispatch::Engine;
use straylight::error::EngineError;
use straylight::executor::{ExecutorCall, ToolExecutor};
use straylight::types::{AccessToken, Role, TenantRecord, TOKEN_SOURCE_TENANT_AUTHORIZATION};

type Handler = Box<dyn Fn(&ExecutorCall) -> Result<Value, EngineError> + Send + Sync>;

/// Scriptable executor that records every call it receives.
pub struct MockExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    handler: Handler,
}

impl MockExecutor {
    /// An executor that answers every call with the same payload.
    pub fn always_ok(value: Value) -> Arc<Self> {
        Self::with(move |_| Ok(value.clone()))
    }

    /// An executor driven by a handler keyed off the call.
    pub fn with(
        handler: impl Fn(&ExecutorCall) -> Result<Value, EngineError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().expect("mock lock").clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock lock").len()
    }

    /// Function names called, in order.
    pub fn called_functions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.function_name)
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    async fn execute(&self, call: ExecutorCall) -> Result<Value, EngineError> {
        self.calls.lock().expect("mock lock").push(call.clone());
        (self.handler)(&call)
    }
}

/// Fully wired engine over in-memory collaborators.
pub struct Harness {
    pub engine: Arc<Engine>,
    pub cache: Arc<InMemoryCache>,
    pub audit: Arc<MemoryAuditStore>,
    pub executor: Arc<MockExecutor>,
}

/// Build a harness around the given mock executor.
pub fn harness(executor: Arc<MockExecutor>) -> Harness {
    let cache = Arc::new(InMemoryCache::new());
    let audit = Arc::new(MemoryAuditStore::new());
    let engine = Arc::new(Engine::new(
        EngineConfig::default(),
        Arc::clone(&cache) as Arc<dyn CacheBackend>,
        Arc::clone(&audit) as Arc<dyn AuditStore>,
        Arc::clone(&executor) as Arc<dyn ToolExecutor>,
        CredentialSigner::new(SigningSecret::new("integration-secret")),
    ));
    Harness {
        engine,
        cache,
        audit,
        executor,
    }
}

/// A fresh tenant.
pub fn tenant() -> TenantRecord {
    TenantRecord {
        id: Uuid::new_v4(),
        slug: "acme".to_owned(),
    }
}

/// A valid token for the given role.
pub fn token(role: Role) -> AccessToken {
    AccessToken {
        verified: true,
        source: TOKEN_SOURCE_TENANT_AUTHORIZATION.to_owned(),
        user_role: role,
        user_id: Some(Uuid::new_v4().to_string()),
        user_email: Some("tester@acme.test".to_owned()),
        user_name: Some("Tester".to_owned()),
    }
}

/// Poll the audit store until at least `at_least` rows landed (or time out).
pub async fn audit_rows(store: &MemoryAuditStore, at_least: usize) -> Vec<AuditRecord> {
    for _ in 0..200 {
        let rows = store.rows().await;
        if rows.len() >= at_least {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    store.rows().await
}

/// An executor payload resembling a lead listing.
pub fn lead_listing() -> Value {
    json!([
        {"id": "L1", "name": "Ada Lovelace", "status": "open"},
        {"id": "L2", "name": "Grace Hopper", "status": "open"},
    ])
}
