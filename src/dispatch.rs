//! The dispatcher: one end-to-end tool invocation through the engine.
//!
//! Composes the security gate, argument canonicalizer, cache coordinator,
//! executor, metrics accumulator, audit sink, and field filter around a
//! single backend call. The unauthenticated early exit is the one path
//! with zero side effects; everything else is observed.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use crate::audit::{AuditRecord, AuditSink, AuditStore};
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::CacheBackend;
use crate::canon::{canonicalize, CanonicalArgs};
use crate::config::EngineConfig;
use crate::credential::CredentialSigner;
use crate::error::EngineError;
use crate::executor::{ExecutorCall, ExecutorDeps, ExecutorOptions, ToolExecutor};
use crate::filter::FieldFilter;
use crate::gate::{GateClearance, SecurityGate};
use crate::metrics::{DispatchSample, MetricsAccumulator};
use crate::policy::{PolicyTable, POLICY_READ_ONLY};
use crate::registry::ToolRegistry;
use crate::types::{AccessToken, DispatchResult, TenantRecord};

/// How a batch of dispatches is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Independent concurrent dispatches; results keep input order.
    Parallel,
    /// One dispatch at a time, in input order.
    Sequential,
}

/// One entry in a batch dispatch.
#[derive(Debug, Clone)]
pub struct BatchCall {
    /// Tool to invoke.
    pub tool: String,
    /// Raw argument map.
    pub args: Value,
}

/// The tool dispatch engine.
///
/// Immutable after construction; safe to share behind an [`Arc`] across
/// request handlers and chain executors.
pub struct Engine {
    policies: Arc<PolicyTable>,
    registry: Arc<ToolRegistry>,
    gate: SecurityGate,
    cache: CacheCoordinator,
    metrics: Arc<MetricsAccumulator>,
    audit: AuditSink,
    filter: FieldFilter,
    executor: Arc<dyn ToolExecutor>,
    signer: CredentialSigner,
    config: EngineConfig,
}

impl Engine {
    /// Assemble an engine over the given collaborators.
    ///
    /// Runs registry cross-validation at construction; problems are logged
    /// as warnings, never fatals.
    pub fn new(
        config: EngineConfig,
        cache_backend: Arc<dyn CacheBackend>,
        audit_store: Arc<dyn AuditStore>,
        executor: Arc<dyn ToolExecutor>,
        signer: CredentialSigner,
    ) -> Self {
        let policies = Arc::new(PolicyTable::builtin());
        let registry = Arc::new(ToolRegistry::builtin());
        Self::with_registry(
            config,
            policies,
            registry,
            cache_backend,
            audit_store,
            executor,
            signer,
        )
    }

    /// Assemble an engine with caller-provided tables (schema-parser output).
    #[allow(clippy::too_many_arguments)]
    pub fn with_registry(
        config: EngineConfig,
        policies: Arc<PolicyTable>,
        registry: Arc<ToolRegistry>,
        cache_backend: Arc<dyn CacheBackend>,
        audit_store: Arc<dyn AuditStore>,
        executor: Arc<dyn ToolExecutor>,
        signer: CredentialSigner,
    ) -> Self {
        let warnings = registry.validate(&policies);
        info!(
            tools = registry.len(),
            warnings = warnings.len(),
            "engine initialised"
        );

        let gate = SecurityGate::new(
            Arc::clone(&policies),
            Arc::clone(&registry),
            Arc::clone(&cache_backend),
        );

        Self {
            policies,
            registry,
            gate,
            cache: CacheCoordinator::new(Arc::clone(&cache_backend)),
            metrics: Arc::new(MetricsAccumulator::new(cache_backend)),
            audit: AuditSink::new(audit_store),
            filter: FieldFilter::builtin(),
            executor,
            signer,
            config,
        }
    }

    /// The shared tool registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The shared policy table.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// The metrics accumulator, for readback.
    pub fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    /// Dispatch one tool invocation.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        token: &AccessToken,
    ) -> DispatchResult {
        // Unauthenticated callers get nothing: no metrics, no audit.
        if !token.is_valid() {
            return Err(EngineError::Authorization {
                message: "access token is missing, unverified, or from the wrong source"
                    .to_owned(),
            });
        }

        let clearance = match self.gate.check(tool_name, args, tenant, user_id, token).await {
            Ok(clearance) => clearance,
            Err(e) => {
                // Gate rejections count against the tenant's error rate but
                // produce no audit row: no policy was resolved to attribute.
                self.spawn_metrics(
                    tenant.id,
                    tool_name.to_owned(),
                    DispatchSample {
                        ok: false,
                        cache_hit: false,
                        latency_ms: 0,
                    },
                );
                return Err(e);
            }
        };

        let canon = canonicalize(&clearance.tool, args, tenant, &self.registry);
        let read_only = clearance.policy.name == POLICY_READ_ONLY;

        let internal_token =
            self.signer
                .mint(user_id, tenant.id, self.config.internal_token_ttl_secs)?;

        let fingerprint = CacheCoordinator::fingerprint(&canon.map);
        let cache_key = CacheCoordinator::key(tenant.id, &clearance.tool.name, &fingerprint);

        if read_only {
            if let Some(cached) = self.cache.read(&cache_key).await {
                self.spawn_metrics(
                    tenant.id,
                    clearance.tool.name.clone(),
                    DispatchSample {
                        ok: true,
                        cache_hit: true,
                        latency_ms: 0,
                    },
                );
                self.audit.record(AuditRecord::from_dispatch(
                    &clearance,
                    tenant,
                    user_id,
                    token,
                    Value::Object(canon.map.clone()),
                    &Ok(cached.clone()),
                    0,
                    true,
                ));
                return Ok(self
                    .filter
                    .apply(&clearance.tool.name, cached, token.user_role));
            }
        }

        let call = self.build_call(&clearance, &canon, tenant, user_id, internal_token);

        let started = Instant::now();
        let result = self.run_executor(call).await;
        let execution_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Ok(value) = &result {
            if read_only {
                let ttl = self.registry.per_tool_ttl(&clearance.tool.name);
                self.cache.store(&cache_key, value, ttl).await;
            } else {
                self.cache
                    .invalidate_after_write(tenant.id, &clearance.tool.name)
                    .await;
            }
        }

        self.spawn_metrics(
            tenant.id,
            clearance.tool.name.clone(),
            DispatchSample {
                ok: result.is_ok(),
                cache_hit: false,
                latency_ms: execution_time_ms,
            },
        );
        self.audit.record(AuditRecord::from_dispatch(
            &clearance,
            tenant,
            user_id,
            token,
            Value::Object(canon.map.clone()),
            &result,
            execution_time_ms,
            false,
        ));

        result.map(|value| self.filter.apply(&clearance.tool.name, value, token.user_role))
    }

    /// Dispatch a batch of calls under one tenant and token.
    ///
    /// Results preserve input order in both modes. Parallel mode runs each
    /// dispatch as an independent task; there is no cross-call transaction.
    pub async fn execute_batch(
        self: Arc<Self>,
        calls: Vec<BatchCall>,
        mode: BatchMode,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        token: &AccessToken,
    ) -> Vec<DispatchResult> {
        match mode {
            BatchMode::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(
                        self.execute(&call.tool, &call.args, tenant, user_id, token)
                            .await,
                    );
                }
                results
            }
            BatchMode::Parallel => {
                let handles: Vec<_> = calls
                    .into_iter()
                    .map(|call| {
                        let engine = Arc::clone(&self);
                        let tenant = tenant.clone();
                        let user_id = user_id.map(str::to_owned);
                        let token = token.clone();
                        tokio::spawn(async move {
                            engine
                                .execute(&call.tool, &call.args, &tenant, user_id.as_deref(), &token)
                                .await
                        })
                    })
                    .collect();

                let mut results = Vec::with_capacity(handles.len());
                for handle in handles {
                    results.push(handle.await.unwrap_or_else(|e| {
                        Err(EngineError::Execution {
                            message: format!("batch task failed: {e}"),
                            operation: None,
                        })
                    }));
                }
                results
            }
        }
    }

    /// Assemble the executor call envelope.
    fn build_call(
        &self,
        clearance: &GateClearance,
        canon: &CanonicalArgs,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        internal_token: String,
    ) -> ExecutorCall {
        let mut policy_context =
            serde_json::to_value(&clearance.policy).unwrap_or_else(|_| Value::Object(Default::default()));
        if let Value::Object(map) = &mut policy_context {
            map.insert("tenant_id".to_owned(), Value::String(tenant.id.to_string()));
            map.insert(
                "user_id".to_owned(),
                user_id.map_or(Value::Null, |u| Value::String(u.to_owned())),
            );
        }

        ExecutorCall {
            source_file: clearance.tool.source_file.clone(),
            function_name: clearance.tool.function_name.clone(),
            policy_context,
            deps: ExecutorDeps {
                data_source: None,
                backend_base_url: self.config.backend_base_url.clone(),
                tenant_id: tenant.id,
                user_id: user_id.map(str::to_owned),
                internal_token,
                created_by: Some(self.config.created_by.clone()),
            },
            args: canon.positional.clone(),
            options: ExecutorOptions {
                cache: false,
                timeout_ms: self.config.executor_timeout_secs.saturating_mul(1000),
            },
        }
    }

    /// Run the executor on its own task with the outer timeout.
    ///
    /// A panic inside the executor surfaces as `ExecutionError` rather than
    /// unwinding through the dispatch.
    async fn run_executor(&self, call: ExecutorCall) -> DispatchResult {
        let operation = call.function_name.clone();
        let timeout = std::time::Duration::from_secs(self.config.executor_timeout_secs);
        let executor = Arc::clone(&self.executor);
        let mut handle = tokio::spawn(async move { executor.execute(call).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                warn!(%operation, error = %join_error, "executor task panicked");
                Err(EngineError::Execution {
                    message: format!("executor task failed: {join_error}"),
                    operation: Some(operation),
                })
            }
            Err(_) => {
                handle.abort();
                Err(EngineError::Execution {
                    message: format!(
                        "timed out after {}s",
                        self.config.executor_timeout_secs
                    ),
                    operation: Some(operation),
                })
            }
        }
    }

    fn spawn_metrics(&self, tenant: uuid::Uuid, tool: String, sample: DispatchSample) {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            metrics.record(tenant, &tool, sample).await;
        });
    }
}
