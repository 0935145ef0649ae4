//! End-to-end dispatch behavior: gating, canonicalization, caching,
//! metrics, audit, and field filtering around the executor seam.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use straylight::dispatch::{BatchCall, BatchMode};
use straylight::error::EngineError;
use straylight::executor::{ExecutorCall, ToolExecutor};
use straylight::metrics::MetricsWindow;
use straylight::types::Role;

use crate::common::{audit_rows, harness, lead_listing, tenant, token, MockExecutor};

#[tokio::test]
async fn test_unknown_tool_rejected_without_execution() {
    let h = harness(MockExecutor::always_ok(json!({})));
    let result = h
        .engine
        .execute("unknown_tool", &json!({}), &tenant(), Some("u1"), &token(Role::Admin))
        .await;

    let err = result.expect_err("unknown tool must fail");
    assert!(matches!(err, EngineError::UnknownTool { .. }));
    assert!(err.to_string().contains("unknown_tool"));
    assert_eq!(h.executor.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_token_has_zero_side_effects() {
    let h = harness(MockExecutor::always_ok(json!({})));
    let mut bad = token(Role::Admin);
    bad.source = "api-key".to_owned();
    let tenant = tenant();

    let result = h
        .engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &bad)
        .await;
    assert!(matches!(result, Err(EngineError::Authorization { .. })));
    assert_eq!(h.executor.call_count(), 0);

    // Give any stray fire-and-forget task time to land, then assert nothing did.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.audit.rows().await.is_empty());
    let metrics = h
        .engine
        .metrics()
        .realtime_metrics(Some(tenant.id), MetricsWindow::Minute)
        .await;
    assert_eq!(metrics.calls, 0);
}

#[tokio::test]
async fn test_list_leads_canonicalization_reaches_executor() {
    let h = harness(MockExecutor::always_ok(lead_listing()));
    let tenant = tenant();

    let result = h
        .engine
        .execute(
            "list_leads",
            &json!({"filter": {"status": "all", "limit": "25"}}),
            &tenant,
            Some("u1"),
            &token(Role::User),
        )
        .await;
    assert!(result.is_ok());
    assert_eq!(h.executor.call_count(), 1);

    let call = &h.executor.calls()[0];
    assert_eq!(call.function_name, "listLeads");
    assert_eq!(call.source_file, "leads.js");
    // listLeads(tenant, status, source, assigned_to, limit, offset)
    assert_eq!(call.args.len(), 6);
    assert_eq!(call.args[0], json!(tenant.id.to_string()));
    assert_eq!(call.args[1], json!("unset"), "wildcard status must be erased");
    assert_eq!(call.args[4], json!(25), "string limit must be coerced");
    // The engine owns caching; the executor must be told not to.
    assert!(!call.options.cache);
    // Policy context carries the merged identifiers.
    assert_eq!(call.policy_context["tenant_id"], tenant.id.to_string());
    assert_eq!(call.policy_context["name"], "read_only");
}

#[tokio::test]
async fn test_read_through_cache_skips_executor() {
    let h = harness(MockExecutor::always_ok(lead_listing()));
    let tenant = tenant();
    let token = token(Role::User);
    let args = json!({"status": "open"});

    let first = h
        .engine
        .execute("list_leads", &args, &tenant, Some("u1"), &token)
        .await
        .expect("first dispatch");
    let second = h
        .engine
        .execute("list_leads", &args, &tenant, Some("u1"), &token)
        .await
        .expect("second dispatch");

    assert_eq!(first, second);
    assert_eq!(h.executor.call_count(), 1, "second read must come from cache");
    assert!(h.cache.live_len().await > 0, "the listing must be cached");

    let rows = audit_rows(&h.audit, 2).await;
    assert_eq!(rows.len(), 2);
    let hit = rows.iter().find(|r| r.cache_hit).expect("cache-hit row");
    assert_eq!(hit.execution_time_ms, 0);
}

#[tokio::test]
async fn test_equal_args_share_a_cache_entry_across_key_order() {
    let h = harness(MockExecutor::always_ok(lead_listing()));
    let tenant = tenant();
    let token = token(Role::User);

    h.engine
        .execute(
            "list_leads",
            &json!({"status": "open", "limit": 10}),
            &tenant,
            Some("u1"),
            &token,
        )
        .await
        .expect("first");
    h.engine
        .execute(
            "list_leads",
            &json!({"limit": 10, "status": "open"}),
            &tenant,
            Some("u1"),
            &token,
        )
        .await
        .expect("second");

    assert_eq!(h.executor.call_count(), 1, "fingerprint must ignore key order");
}

#[tokio::test]
async fn test_write_invalidates_tenant_cache() {
    let h = harness(MockExecutor::always_ok(lead_listing()));
    let tenant = tenant();
    let token = token(Role::User);

    h.engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token)
        .await
        .expect("prime cache");
    assert_eq!(h.executor.call_count(), 1);

    h.engine
        .execute(
            "update_lead",
            &json!({"lead_id": "L1", "updates": {"status": "won"}}),
            &tenant,
            Some("u1"),
            &token,
        )
        .await
        .expect("write");

    h.engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token)
        .await
        .expect("re-read");
    assert_eq!(
        h.executor.call_count(),
        3,
        "mutation must invalidate the cached listing"
    );
}

#[tokio::test]
async fn test_non_matching_write_keeps_cache() {
    let h = harness(MockExecutor::always_ok(json!({"id": "X"})));
    let tenant = tenant();
    let token = token(Role::Admin);

    h.engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token)
        .await
        .expect("prime cache");
    h.engine
        .execute(
            "manage_user_roles",
            &json!({"user_id": "u2", "role": "manager"}),
            &tenant,
            Some("u1"),
            &token,
        )
        .await
        .expect("admin write outside the entity patterns");
    h.engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token)
        .await
        .expect("re-read");

    assert_eq!(
        h.executor.called_functions(),
        vec!["listLeads", "manageUserRoles"],
        "listing must still be served from cache"
    );
}

#[tokio::test]
async fn test_delete_gating_role_then_confirmation() {
    let h = harness(MockExecutor::always_ok(json!({"deleted": true})));
    let tenant = tenant();

    let as_user = h
        .engine
        .execute(
            "delete_account",
            &json!({"account_id": "a1"}),
            &tenant,
            Some("u1"),
            &token(Role::User),
        )
        .await;
    assert!(matches!(
        as_user,
        Err(EngineError::InsufficientPermissions { .. })
    ));

    let as_manager = h
        .engine
        .execute(
            "delete_account",
            &json!({"account_id": "a1"}),
            &tenant,
            Some("u1"),
            &token(Role::Manager),
        )
        .await;
    assert!(matches!(
        as_manager,
        Err(EngineError::ConfirmationRequired { .. })
    ));
    assert_eq!(h.executor.call_count(), 0, "gate failures never execute");

    h.engine
        .execute(
            "delete_account",
            &json!({"account_id": "a1", "confirmed": true}),
            &tenant,
            Some("u1"),
            &token(Role::Manager),
        )
        .await
        .expect("confirmed delete clears the gate");
    assert_eq!(h.executor.call_count(), 1);
}

#[tokio::test]
async fn test_caller_tenant_is_overridden_on_the_wire() {
    let h = harness(MockExecutor::always_ok(json!([])));
    let tenant = tenant();

    h.engine
        .execute(
            "list_leads",
            &json!({"tenant": "11111111-2222-3333-4444-555555555555"}),
            &tenant,
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect("dispatch");

    let call = &h.executor.calls()[0];
    assert_eq!(
        call.args[0],
        json!(tenant.id.to_string()),
        "outbound tenant must be the authorized one"
    );
    assert_eq!(call.deps.tenant_id, tenant.id);
}

#[tokio::test]
async fn test_executor_error_propagates_and_is_audited() {
    let h = harness(MockExecutor::with(|_| {
        Err(EngineError::Api {
            message: "backend exploded".to_owned(),
            code: Some(502),
        })
    }));
    let tenant = tenant();

    let result = h
        .engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token(Role::User))
        .await;
    assert!(matches!(result, Err(EngineError::Api { code: Some(502), .. })));

    let rows = audit_rows(&h.audit, 1).await;
    assert_eq!(rows[0].result_tag, "error");
    assert_eq!(rows[0].error_type.as_deref(), Some("APIError"));
    assert!(rows[0]
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("backend exploded")));
}

#[tokio::test]
async fn test_field_filter_applies_by_role() {
    let account = json!({"id": "A1", "name": "Acme", "annual_revenue": 900_000});
    let h = harness(MockExecutor::always_ok(account));
    let tenant = tenant();

    let as_user = h
        .engine
        .execute(
            "get_account",
            &json!({"account_id": "a1"}),
            &tenant,
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect("dispatch");
    assert!(as_user.get("annual_revenue").is_none());
    assert_eq!(as_user["name"], "Acme");

    // Different tenant so the cached (unfiltered) entry is not shared.
    let other_tenant = crate::common::tenant();
    let as_manager = h
        .engine
        .execute(
            "get_account",
            &json!({"account_id": "a1"}),
            &other_tenant,
            Some("u1"),
            &token(Role::Manager),
        )
        .await
        .expect("dispatch");
    assert_eq!(as_manager["annual_revenue"], 900_000);
}

#[tokio::test]
async fn test_cache_hit_is_filtered_for_the_reader() {
    let account = json!({"id": "A1", "name": "Acme", "annual_revenue": 900_000});
    let h = harness(MockExecutor::always_ok(account));
    let tenant = tenant();
    let args = json!({"account_id": "a1"});

    // Manager primes the cache with the unfiltered payload.
    h.engine
        .execute("get_account", &args, &tenant, Some("u1"), &token(Role::Manager))
        .await
        .expect("prime");
    // A user hitting the same cache entry must still get the redacted view.
    let as_user = h
        .engine
        .execute("get_account", &args, &tenant, Some("u2"), &token(Role::User))
        .await
        .expect("cache hit");
    assert_eq!(h.executor.call_count(), 1);
    assert!(as_user.get("annual_revenue").is_none());
}

#[tokio::test]
async fn test_executor_timeout_becomes_execution_error() {
    struct SlowExecutor;

    #[async_trait::async_trait]
    impl ToolExecutor for SlowExecutor {
        async fn execute(&self, _call: ExecutorCall) -> Result<serde_json::Value, EngineError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    let cache = Arc::new(straylight::cache::InMemoryCache::new());
    let audit = Arc::new(straylight::audit::MemoryAuditStore::new());
    let mut config = straylight::config::EngineConfig::default();
    config.executor_timeout_secs = 0;
    let engine = straylight::dispatch::Engine::new(
        config,
        cache,
        audit,
        Arc::new(SlowExecutor),
        straylight::credential::CredentialSigner::new(
            straylight::credential::SigningSecret::new("s"),
        ),
    );

    let result = engine
        .execute("list_leads", &json!({}), &tenant(), Some("u1"), &token(Role::User))
        .await;
    let err = result.expect_err("must time out");
    assert!(matches!(err, EngineError::Execution { .. }));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_metrics_accumulate_for_tenant_and_global() {
    let h = harness(MockExecutor::always_ok(lead_listing()));
    let tenant = tenant();
    let token = token(Role::User);

    h.engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token)
        .await
        .expect("ok dispatch");
    h.engine
        .execute("list_leads", &json!({}), &tenant, Some("u1"), &token)
        .await
        .expect("cache hit");

    // Metrics are fire-and-forget; poll until both dispatches landed.
    let mut observed = h
        .engine
        .metrics()
        .realtime_metrics(Some(tenant.id), MetricsWindow::Minute)
        .await;
    for _ in 0..200 {
        if observed.calls >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        observed = h
            .engine
            .metrics()
            .realtime_metrics(Some(tenant.id), MetricsWindow::Minute)
            .await;
    }
    assert_eq!(observed.calls, 2);
    assert_eq!(observed.errors, 0);
    assert_eq!(observed.cache_hits, 1);

    let global = h
        .engine
        .metrics()
        .realtime_metrics(None, MetricsWindow::Minute)
        .await;
    assert!(global.calls >= 2);
}

#[tokio::test]
async fn test_audit_migrates_email_user_id() {
    let h = harness(MockExecutor::always_ok(json!([])));
    h.engine
        .execute(
            "list_leads",
            &json!({}),
            &tenant(),
            Some("person@acme.test"),
            &token(Role::User),
        )
        .await
        .expect("dispatch");

    let rows = audit_rows(&h.audit, 1).await;
    assert_eq!(rows[0].user_id, None);
    assert_eq!(rows[0].user_email.as_deref(), Some("person@acme.test"));
}

#[tokio::test]
async fn test_batch_sequential_and_parallel_preserve_order() {
    let h = harness(MockExecutor::with(|call| {
        Ok(json!({ "function": call.function_name }))
    }));
    let tenant = tenant();
    let token = token(Role::User);
    let calls = vec![
        BatchCall {
            tool: "list_leads".to_owned(),
            args: json!({}),
        },
        BatchCall {
            tool: "nonexistent_tool".to_owned(),
            args: json!({}),
        },
        BatchCall {
            tool: "list_accounts".to_owned(),
            args: json!({}),
        },
    ];

    for mode in [BatchMode::Sequential, BatchMode::Parallel] {
        let results = Arc::clone(&h.engine)
            .execute_batch(calls.clone(), mode, &tenant, Some("u1"), &token)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().expect("first ok")["function"],
            "listLeads"
        );
        assert!(matches!(
            results[1],
            Err(EngineError::UnknownTool { .. })
        ));
        assert_eq!(
            results[2].as_ref().expect("third ok")["function"],
            "listAccounts"
        );
    }
}
