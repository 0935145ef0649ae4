//! Security gate: the strict pre-flight check sequence every dispatch
//! passes before any backend call.
//!
//! Ordering is fixed: token → registry → argument validation → role →
//! rate limit → delete confirmation. The rate-limit counter lives in the
//! cache backend; counter failures never block a dispatch (fail-open).

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::cache::CacheBackend;
use crate::error::EngineError;
use crate::policy::{Policy, PolicyTable};
use crate::registry::{Tool, ToolRegistry};
use crate::types::{AccessToken, TenantRecord};

/// Seconds a rate-limit window lasts, and the `retryAfter` hint on rejection.
const RATE_WINDOW_SECS: u64 = 60;

/// Tool-name prefixes whose primary id parameter must be present.
const ID_REQUIRED_PREFIXES: &[&str] = &["get_", "delete_", "update_", "qualify_", "complete_"];

/// A dispatch that cleared the gate: the resolved tool and its policy.
#[derive(Debug, Clone)]
pub struct GateClearance {
    /// The registered tool being dispatched.
    pub tool: Tool,
    /// The policy governing it.
    pub policy: Policy,
}

/// The security gate. Shares the immutable tables and the counter backend.
pub struct SecurityGate {
    policies: Arc<PolicyTable>,
    registry: Arc<ToolRegistry>,
    counters: Arc<dyn CacheBackend>,
}

impl SecurityGate {
    /// Build a gate over the shared tables and counter backend.
    pub fn new(
        policies: Arc<PolicyTable>,
        registry: Arc<ToolRegistry>,
        counters: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            policies,
            registry,
            counters,
        }
    }

    /// Run the full check sequence for one dispatch.
    pub async fn check(
        &self,
        tool_name: &str,
        args: &Value,
        tenant: &TenantRecord,
        user_id: Option<&str>,
        token: &AccessToken,
    ) -> Result<GateClearance, EngineError> {
        // 1. Token.
        if !token.is_valid() {
            return Err(EngineError::Authorization {
                message: "access token is missing, unverified, or from the wrong source"
                    .to_owned(),
            });
        }

        // 2. Registry.
        let tool = self
            .registry
            .lookup(tool_name)
            .ok_or_else(|| EngineError::UnknownTool {
                tool: tool_name.to_owned(),
            })?
            .clone();

        let policy = self
            .policies
            .lookup(&tool.policy)
            .ok_or_else(|| EngineError::Validation {
                message: format!("tool '{}' references unknown policy '{}'", tool.name, tool.policy),
                field: None,
            })?
            .clone();

        // 3. Argument validation. Hard failures reject; format oddities warn.
        self.validate_args(&tool, args, tenant)?;

        // 4. Role, by literal membership in the policy's required set.
        if !policy.required_roles.is_empty()
            && !policy.required_roles.contains(&token.user_role)
        {
            return Err(EngineError::InsufficientPermissions {
                message: format!(
                    "role '{}' may not invoke '{}' (policy '{}')",
                    token.user_role, tool.name, policy.name
                ),
            });
        }

        // 5. Rate limit.
        self.check_rate_limit(&tool, &policy, tenant.id, user_id)
            .await?;

        // 6. Delete confirmation.
        if policy.requires_confirmation
            && tool.name.contains("delete")
            && !is_confirmed(args)
        {
            return Err(EngineError::ConfirmationRequired {
                message: format!(
                    "'{}' is destructive; pass confirmed=true or force=true",
                    tool.name
                ),
                tool: tool.name.clone(),
            });
        }

        Ok(GateClearance { tool, policy })
    }

    /// Per-tool argument validation. Presence failures block; malformed
    /// uuid-shaped fields only warn.
    fn validate_args(
        &self,
        tool: &Tool,
        args: &Value,
        tenant: &TenantRecord,
    ) -> Result<(), EngineError> {
        if tenant.id.is_nil() {
            return Err(EngineError::Validation {
                message: "authorized tenant uuid is missing".to_owned(),
                field: Some("tenant".to_owned()),
            });
        }

        let requires_id = ID_REQUIRED_PREFIXES
            .iter()
            .any(|prefix| tool.name.starts_with(prefix))
            || tool.name == "convert_lead_to_account";
        if requires_id {
            if let Some(field) = self.primary_id_param(tool) {
                let present = args
                    .get(&field)
                    .is_some_and(|v| !v.is_null() && v.as_str() != Some(""));
                if !present {
                    return Err(EngineError::Validation {
                        message: format!("'{}' requires '{field}'", tool.name),
                        field: Some(field),
                    });
                }
            }
        }

        // Uuid-format checks are advisory: the backend is authoritative.
        if let Value::Object(map) = args {
            for (key, value) in map {
                if key.ends_with("_id") {
                    if let Some(s) = value.as_str() {
                        if !s.is_empty() && Uuid::parse_str(s).is_err() {
                            warn!(tool = %tool.name, field = %key, "id field is not a uuid");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// The first id-shaped parameter of the tool's function, when known.
    fn primary_id_param(&self, tool: &Tool) -> Option<String> {
        self.registry
            .param_order(&tool.function_name)
            .and_then(|params| params.iter().find(|p| p.ends_with("_id")).cloned())
    }

    /// Read-then-increment rate limiting.
    ///
    /// Two concurrent dispatches may both observe a count at the limit and
    /// both proceed; the overshoot is bounded by concurrency. Counter
    /// backend failures log and allow.
    async fn check_rate_limit(
        &self,
        tool: &Tool,
        policy: &Policy,
        tenant_id: Uuid,
        user_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let user = user_id.unwrap_or("anonymous");
        let class = policy.tool_class.as_str();
        let key = format!("braid:ratelimit:{tenant_id}:{user}:{class}");

        let current = match self.counters.get(&key).await {
            Ok(value) => value.and_then(|v| v.as_i64()).unwrap_or(0),
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "rate-limit read failed, allowing");
                return Ok(());
            }
        };

        if current >= i64::from(policy.rate_per_minute) {
            return Err(EngineError::RateLimitExceeded {
                message: format!(
                    "{class} limited to {} calls/min for this user",
                    policy.rate_per_minute
                ),
                retry_after_secs: RATE_WINDOW_SECS,
            });
        }

        if let Err(e) = self.counters.increment(&key, RATE_WINDOW_SECS).await {
            warn!(tool = %tool.name, error = %e, "rate-limit increment failed, allowing");
        }
        Ok(())
    }
}

/// Whether the caller explicitly confirmed a destructive call.
fn is_confirmed(args: &Value) -> bool {
    let flag = |name: &str| args.get(name).and_then(Value::as_bool) == Some(true);
    flag("confirmed") || flag("force")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FailingCache, InMemoryCache};
    use crate::types::{Role, TOKEN_SOURCE_TENANT_AUTHORIZATION};
    use serde_json::json;

    fn gate_with(counters: Arc<dyn CacheBackend>) -> SecurityGate {
        SecurityGate::new(
            Arc::new(PolicyTable::builtin()),
            Arc::new(ToolRegistry::builtin()),
            counters,
        )
    }

    fn gate() -> SecurityGate {
        gate_with(Arc::new(InMemoryCache::new()))
    }

    fn tenant() -> TenantRecord {
        TenantRecord {
            id: Uuid::new_v4(),
            slug: "acme".to_owned(),
        }
    }

    fn token(role: Role) -> AccessToken {
        AccessToken {
            verified: true,
            source: TOKEN_SOURCE_TENANT_AUTHORIZATION.to_owned(),
            user_role: role,
            user_id: Some(Uuid::new_v4().to_string()),
            user_email: Some("u@acme.test".to_owned()),
            user_name: Some("U".to_owned()),
        }
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let gate = gate();
        let mut bad = token(Role::Admin);
        bad.verified = false;
        let result = gate
            .check("list_leads", &json!({}), &tenant(), Some("u1"), &bad)
            .await;
        assert!(matches!(result, Err(EngineError::Authorization { .. })));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let gate = gate();
        let result = gate
            .check("unknown_tool", &json!({}), &tenant(), Some("u1"), &token(Role::Admin))
            .await;
        let err = result.expect_err("should fail");
        assert!(matches!(err, EngineError::UnknownTool { ref tool } if tool == "unknown_tool"));
        assert!(err.to_string().contains("unknown_tool"));
    }

    #[tokio::test]
    async fn test_missing_id_field_is_validation_error() {
        let gate = gate();
        let result = gate
            .check("get_lead", &json!({}), &tenant(), Some("u1"), &token(Role::User))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Validation { field: Some(ref f), .. }) if f == "lead_id"
        ));
    }

    #[tokio::test]
    async fn test_role_below_policy_floor_rejected() {
        let gate = gate();
        let result = gate
            .check(
                "delete_account",
                &json!({"account_id": "a1"}),
                &tenant(),
                Some("u1"),
                &token(Role::User),
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientPermissions { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_without_confirmation_rejected() {
        let gate = gate();
        let result = gate
            .check(
                "delete_account",
                &json!({"account_id": "a1"}),
                &tenant(),
                Some("u1"),
                &token(Role::Manager),
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::ConfirmationRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_with_confirmed_passes() {
        let gate = gate();
        let clearance = gate
            .check(
                "delete_account",
                &json!({"account_id": "a1", "confirmed": true}),
                &tenant(),
                Some("u1"),
                &token(Role::Manager),
            )
            .await
            .expect("should clear");
        assert_eq!(clearance.tool.name, "delete_account");
        assert_eq!(clearance.policy.name, "delete");
    }

    #[tokio::test]
    async fn test_delete_with_force_passes() {
        let gate = gate();
        gate.check(
            "delete_lead",
            &json!({"lead_id": "l1", "force": true}),
            &tenant(),
            Some("u1"),
            &token(Role::Admin),
        )
        .await
        .expect("force should satisfy confirmation");
    }

    #[tokio::test]
    async fn test_read_only_open_to_user() {
        let gate = gate();
        gate.check("list_leads", &json!({}), &tenant(), Some("u1"), &token(Role::User))
            .await
            .expect("read_only is unrestricted");
    }

    #[tokio::test]
    async fn test_system_tool_rejects_admin() {
        let gate = gate();
        let result = gate
            .check(
                "run_nightly_rollup",
                &json!({}),
                &tenant(),
                Some("u1"),
                &token(Role::Admin),
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientPermissions { .. })
        ));
        gate.check(
            "run_nightly_rollup",
            &json!({}),
            &tenant(),
            Some("svc"),
            &token(Role::System),
        )
        .await
        .expect("system role clears");
    }

    #[tokio::test]
    async fn test_rate_limit_trips_at_policy_ceiling() {
        let counters = Arc::new(InMemoryCache::new());
        let gate = gate_with(Arc::clone(&counters) as Arc<dyn CacheBackend>);
        let tenant = tenant();
        let token = token(Role::User);

        // external_api allows 10/min.
        for _ in 0..10 {
            gate.check(
                "sync_external_calendar",
                &json!({"provider": "gcal"}),
                &tenant,
                Some("u1"),
                &token,
            )
            .await
            .expect("under the limit");
        }
        let result = gate
            .check(
                "sync_external_calendar",
                &json!({"provider": "gcal"}),
                &tenant,
                Some("u1"),
                &token,
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::RateLimitExceeded { retry_after_secs: 60, .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_user() {
        let gate = gate();
        let tenant = tenant();
        let token = token(Role::User);
        for _ in 0..10 {
            gate.check(
                "sync_external_calendar",
                &json!({"provider": "gcal"}),
                &tenant,
                Some("u1"),
                &token,
            )
            .await
            .expect("under the limit");
        }
        // A different user has a fresh counter.
        gate.check(
            "sync_external_calendar",
            &json!({"provider": "gcal"}),
            &tenant,
            Some("u2"),
            &token,
        )
        .await
        .expect("separate counter per user");
    }

    #[tokio::test]
    async fn test_rate_limit_fails_open_when_backend_down() {
        let gate = gate_with(Arc::new(FailingCache));
        gate.check("list_leads", &json!({}), &tenant(), Some("u1"), &token(Role::User))
            .await
            .expect("counter outage must not block dispatch");
    }

    #[tokio::test]
    async fn test_nil_tenant_rejected() {
        let gate = gate();
        let nil_tenant = TenantRecord {
            id: Uuid::nil(),
            slug: "acme".to_owned(),
        };
        let result = gate
            .check("list_leads", &json!({}), &nil_tenant, Some("u1"), &token(Role::User))
            .await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
    }
}
