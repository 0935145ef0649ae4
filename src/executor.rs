//! The external Tool Executor seam.
//!
//! The engine never runs Braid functions itself; it hands a fully resolved
//! call (function identity, policy context, deps, positional args) to a
//! [`ToolExecutor`]. Production uses the HTTP implementation against the
//! Braid backend; tests plug in mocks.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::EngineError;

/// Backend dependencies injected into every executor call.
#[derive(Debug, Clone)]
pub struct ExecutorDeps {
    /// Opaque data-source handle the host wants threaded through.
    pub data_source: Option<Value>,
    /// Base URL of the Braid backend.
    pub backend_base_url: String,
    /// Authorized tenant uuid.
    pub tenant_id: Uuid,
    /// Caller's user id, when known.
    pub user_id: Option<String>,
    /// Short-lived internal service credential.
    pub internal_token: String,
    /// Attribution string for records the call creates.
    pub created_by: Option<String>,
}

/// Per-call options.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Whether the executor may use its own cache. The engine always passes
    /// `false`; cache coherency is owned on this side of the seam.
    pub cache: bool,
    /// Call timeout in milliseconds.
    pub timeout_ms: u64,
}

/// One fully resolved executor call.
#[derive(Debug, Clone)]
pub struct ExecutorCall {
    /// Braid source file implementing the function.
    pub source_file: String,
    /// Braid function name.
    pub function_name: String,
    /// The governing policy merged with `{tenant_id, user_id}`.
    pub policy_context: Value,
    /// Backend dependencies.
    pub deps: ExecutorDeps,
    /// Positional arguments in the function's declared order.
    pub args: Vec<Value>,
    /// Per-call options.
    pub options: ExecutorOptions,
}

/// Executes resolved tool calls against the backing business API.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run one call and return the canonical result.
    async fn execute(&self, call: ExecutorCall) -> Result<Value, EngineError>;
}

/// HTTP executor calling the Braid backend's internal function endpoint.
pub struct HttpToolExecutor {
    client: reqwest::Client,
}

impl HttpToolExecutor {
    /// Build over a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(&self, call: ExecutorCall) -> Result<Value, EngineError> {
        let module = call.source_file.trim_end_matches(".js");
        let url = format!(
            "{}/internal/braid/{module}/{}",
            call.deps.backend_base_url.trim_end_matches('/'),
            call.function_name
        );

        let body = json!({
            "args": call.args,
            "context": call.policy_context,
            "options": { "cache": call.options.cache },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&call.deps.internal_token)
            .timeout(std::time::Duration::from_millis(call.options.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Execution {
                        message: format!("backend call timed out: {e}"),
                        operation: Some(call.function_name.clone()),
                    }
                } else {
                    EngineError::Network {
                        message: format!("backend unreachable: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| EngineError::Api {
                message: format!("backend returned malformed JSON: {e}"),
                code: Some(status.as_u16()),
            });
        }

        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_else(|| format!("backend returned status {status}"));

        Err(map_status(status.as_u16(), message, &call))
    }
}

/// Map a non-2xx backend status to the engine error taxonomy.
fn map_status(code: u16, message: String, call: &ExecutorCall) -> EngineError {
    match code {
        400 => EngineError::Validation {
            message,
            field: None,
        },
        401 | 403 => EngineError::PermissionDenied { message },
        404 => EngineError::NotFound {
            message,
            entity: None,
            id: None,
        },
        _ if message.to_lowercase().contains("database") => EngineError::Database { message },
        _ => EngineError::Api {
            message: format!("{} failed: {message}", call.function_name),
            code: Some(code),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ExecutorCall {
        ExecutorCall {
            source_file: "leads.js".to_owned(),
            function_name: "listLeads".to_owned(),
            policy_context: json!({}),
            deps: ExecutorDeps {
                data_source: None,
                backend_base_url: "http://localhost:0".to_owned(),
                tenant_id: Uuid::nil(),
                user_id: None,
                internal_token: "t".to_owned(),
                created_by: None,
            },
            args: vec![],
            options: ExecutorOptions {
                cache: false,
                timeout_ms: 50,
            },
        }
    }

    #[test]
    fn test_map_status_taxonomy() {
        let c = call();
        assert!(matches!(
            map_status(400, "bad".to_owned(), &c),
            EngineError::Validation { .. }
        ));
        assert!(matches!(
            map_status(401, "no".to_owned(), &c),
            EngineError::PermissionDenied { .. }
        ));
        assert!(matches!(
            map_status(403, "no".to_owned(), &c),
            EngineError::PermissionDenied { .. }
        ));
        assert!(matches!(
            map_status(404, "gone".to_owned(), &c),
            EngineError::NotFound { .. }
        ));
        assert!(matches!(
            map_status(500, "database connection refused".to_owned(), &c),
            EngineError::Database { .. }
        ));
        assert!(matches!(
            map_status(502, "upstream".to_owned(), &c),
            EngineError::Api {
                code: Some(502),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let executor = HttpToolExecutor::new();
        let result = executor.execute(call()).await;
        assert!(matches!(
            result,
            Err(EngineError::Network { .. }) | Err(EngineError::Execution { .. })
        ));
    }
}
