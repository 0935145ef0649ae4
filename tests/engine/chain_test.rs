//! Chain executor behavior: validation, conditions, optional-step
//! failures, rollback, and dynamic step generation.

use std::sync::Arc;

use serde_json::json;

use straylight::chain::{
    ChainCatalog, ChainExecutor, ChainStep, StepArgs, StepStatus,
};
use straylight::error::EngineError;
use straylight::types::Role;

use crate::common::{harness, tenant, token, Harness, MockExecutor};

fn chain_harness(executor: Arc<MockExecutor>) -> (Harness, ChainExecutor) {
    let h = harness(executor);
    let chains = ChainExecutor::with_builtin(Arc::clone(&h.engine));
    (h, chains)
}

#[tokio::test]
async fn test_unknown_chain_fails_validation() {
    let (_h, chains) = chain_harness(MockExecutor::always_ok(json!({})));
    let failure = chains
        .execute_chain("no_such_chain", &json!({}), &tenant(), Some("u1"), &token(Role::Admin))
        .await
        .expect_err("unknown chain");
    assert!(matches!(
        failure.error,
        EngineError::ChainValidation { .. }
    ));
    assert!(!failure.rolled_back);
}

#[tokio::test]
async fn test_role_below_chain_floor_fails_validation_without_dispatch() {
    let (h, chains) = chain_harness(MockExecutor::always_ok(json!({})));
    let failure = chains
        .execute_chain(
            "account_with_contact",
            &json!({"account_name": "Acme"}),
            &tenant(),
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect_err("user rank is below manager");
    match &failure.error {
        EngineError::ChainValidation { reasons, .. } => {
            assert!(reasons.iter().any(|r| r.contains("required role")));
        }
        other => panic!("expected ChainValidation, got {other:?}"),
    }
    assert_eq!(h.executor.call_count(), 0, "no steps may run");
}

#[tokio::test]
async fn test_lead_to_opportunity_optional_failure_still_succeeds() {
    let executor = MockExecutor::with(|call| match call.function_name.as_str() {
        "qualifyLead" => Ok(json!({"id": "L1", "status": "qualified"})),
        "convertLeadToAccount" => Ok(json!({"account": {"id": "A1", "name": "X"}})),
        "createOpportunity" => Err(EngineError::Api {
            message: "stage rejected".to_owned(),
            code: Some(500),
        }),
        other => panic!("unexpected function {other}"),
    });
    let (h, chains) = chain_harness(executor);

    let run = chains
        .execute_chain(
            "lead_to_opportunity",
            &json!({"lead_id": "L1", "opportunity_name": "D1", "amount": 0}),
            &tenant(),
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect("optional failure must not fail the chain");

    assert_eq!(run.execution_log.len(), 3);
    assert_eq!(run.execution_log[0].status, StepStatus::Completed);
    assert_eq!(run.execution_log[1].status, StepStatus::Completed);
    assert_eq!(run.execution_log[2].status, StepStatus::Error);
    assert!(run
        .execution_log
        .iter()
        .all(|entry| !entry.id.starts_with("rollback:")));

    // Context keeps the error; results keeps only the successes.
    assert!(run.context["opportunity"]["error"].is_object());
    assert_eq!(run.results["convert"]["account"]["id"], "A1");
    assert_eq!(
        h.executor.called_functions(),
        vec!["qualifyLead", "convertLeadToAccount", "createOpportunity"]
    );
}

#[tokio::test]
async fn test_opportunity_step_reads_account_id_from_context() {
    let executor = MockExecutor::with(|call| match call.function_name.as_str() {
        "qualifyLead" => Ok(json!({"id": "L1"})),
        "convertLeadToAccount" => Ok(json!({"account": {"id": "A-77", "name": "X"}})),
        "createOpportunity" => Ok(json!({"id": "O1"})),
        other => panic!("unexpected function {other}"),
    });
    let (h, chains) = chain_harness(executor);

    chains
        .execute_chain(
            "lead_to_opportunity",
            &json!({"lead_id": "L1", "opportunity_name": "D1", "amount": 1000}),
            &tenant(),
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect("full success");

    let calls = h.executor.calls();
    let create = calls
        .iter()
        .find(|c| c.function_name == "createOpportunity")
        .expect("createOpportunity call");
    // createOpportunity(tenant, data): the templated data carries the
    // account id produced by the convert step.
    assert_eq!(create.args[1]["account_id"], "A-77");
    assert_eq!(create.args[1]["name"], "D1");
}

#[tokio::test]
async fn test_first_required_step_failure_rolls_back_without_compensation() {
    let executor = MockExecutor::with(|call| match call.function_name.as_str() {
        "createAccount" => Err(EngineError::Validation {
            message: "duplicate name".to_owned(),
            field: Some("name".to_owned()),
        }),
        other => panic!("unexpected function {other}"),
    });
    let (h, chains) = chain_harness(executor);

    let failure = chains
        .execute_chain(
            "account_with_contact",
            &json!({
                "account_name": "Acme",
                "contact_first_name": "Ada",
                "contact_last_name": "Lovelace",
            }),
            &tenant(),
            Some("u1"),
            &token(Role::Manager),
        )
        .await
        .expect_err("required step failed");

    assert!(matches!(
        failure.error,
        EngineError::ChainStepFailed { .. }
    ));
    assert_eq!(failure.failed_step.as_deref(), Some("account"));
    assert!(failure.rolled_back, "rollback procedure must run");
    // Nothing succeeded, so both compensation conditions are false: the
    // only executor call is the failed create.
    assert_eq!(h.executor.called_functions(), vec!["createAccount"]);
    assert!(failure
        .step_error
        .as_deref()
        .is_some_and(|e| matches!(e, EngineError::Validation { .. })));
}

#[tokio::test]
async fn test_later_required_failure_compensates_completed_steps() {
    let executor = MockExecutor::with(|call| match call.function_name.as_str() {
        "createAccount" => Ok(json!({"id": "A1", "name": "Acme"})),
        "createContact" => Err(EngineError::Database {
            message: "constraint violation".to_owned(),
        }),
        "deleteAccount" => Ok(json!({"deleted": true})),
        other => panic!("unexpected function {other}"),
    });
    let (h, chains) = chain_harness(executor);

    let failure = chains
        .execute_chain(
            "account_with_contact",
            &json!({
                "account_name": "Acme",
                "contact_first_name": "Ada",
                "contact_last_name": "Lovelace",
            }),
            &tenant(),
            Some("u1"),
            &token(Role::Manager),
        )
        .await
        .expect_err("contact step failed");

    assert_eq!(failure.failed_step.as_deref(), Some("contact"));
    assert!(failure.rolled_back);
    // The account compensation ran; the contact compensation was skipped
    // because the contact step never succeeded.
    assert_eq!(
        h.executor.called_functions(),
        vec!["createAccount", "createContact", "deleteAccount"]
    );

    let rollback_entry = failure
        .execution_log
        .iter()
        .find(|e| e.id == "rollback:delete_account")
        .expect("rollback log entry");
    assert_eq!(rollback_entry.status, StepStatus::Completed);
    assert_eq!(
        rollback_entry.args.as_ref().expect("args")["confirmed"],
        true,
        "compensating delete must self-confirm"
    );
}

#[tokio::test]
async fn test_condition_not_met_is_logged_as_skipped() {
    let (h, _) = chain_harness(MockExecutor::always_ok(json!({"id": "X"})));

    let mut catalog = ChainCatalog::empty();
    let builtin = ChainCatalog::builtin();
    let mut chain = builtin.get("morning_briefing").expect("chain").clone();
    chain.steps[1].condition = Some(Arc::new(|_context| false));
    catalog.register(chain);
    let chains = ChainExecutor::new(Arc::clone(&h.engine), catalog);

    let run = chains
        .execute_chain("morning_briefing", &json!({}), &tenant(), Some("u1"), &token(Role::User))
        .await
        .expect("chain succeeds");

    assert_eq!(run.execution_log.len(), 2);
    assert_eq!(run.execution_log[1].status, StepStatus::Skipped);
    assert_eq!(
        run.execution_log[1].reason.as_deref(),
        Some("condition_not_met")
    );
    assert_eq!(h.executor.call_count(), 1, "skipped steps never dispatch");
}

#[tokio::test]
async fn test_argument_generation_failure_on_optional_step_continues() {
    let executor = MockExecutor::with(|call| match call.function_name.as_str() {
        "qualifyLead" => Ok(json!({"id": "L1"})),
        "convertLeadToAccount" => Ok(json!({"account": {"id": "A1"}})),
        other => panic!("unexpected function {other}"),
    });
    let (h, chains) = chain_harness(executor);

    // No opportunity_name: the optional opportunity step's template fails.
    let run = chains
        .execute_chain(
            "lead_to_opportunity",
            &json!({"lead_id": "L1", "account_name": "Acme"}),
            &tenant(),
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect("optional template failure must not fail the chain");

    assert_eq!(run.execution_log.len(), 3);
    assert_eq!(run.execution_log[2].status, StepStatus::Error);
    assert!(run.context["opportunity"]["error"]["kind"]
        .as_str()
        .is_some_and(|k| k == "ArgumentGenerationError"));
    assert_eq!(h.executor.call_count(), 2, "failed template never dispatches");
}

#[tokio::test]
async fn test_dynamic_chain_generates_one_step_per_lead() {
    let (h, chains) = chain_harness(MockExecutor::always_ok(json!({"updated": true})));

    let run = chains
        .execute_chain(
            "bulk_lead_update",
            &json!({"lead_ids": ["L1", "L2", "L3"], "updates": {"status": "contacted"}}),
            &tenant(),
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect("bulk update succeeds");

    assert_eq!(run.execution_log.len(), 3);
    assert_eq!(h.executor.call_count(), 3);
    assert!(run.results.get("update_0").is_some());
    assert!(run.results.get("update_2").is_some());
}

#[tokio::test]
async fn test_empty_dynamic_chain_is_an_error() {
    let (h, chains) = chain_harness(MockExecutor::always_ok(json!({})));

    let failure = chains
        .execute_chain(
            "bulk_lead_update",
            &json!({"lead_ids": []}),
            &tenant(),
            Some("u1"),
            &token(Role::User),
        )
        .await
        .expect_err("no steps generated");
    assert!(matches!(failure.error, EngineError::EmptyChain { .. }));
    assert_eq!(h.executor.call_count(), 0);
}

#[tokio::test]
async fn test_chain_with_unknown_tool_fails_validation() {
    let (h, _) = chain_harness(MockExecutor::always_ok(json!({})));

    let mut catalog = ChainCatalog::empty();
    let builtin = ChainCatalog::builtin();
    let mut chain = builtin.get("morning_briefing").expect("chain").clone();
    chain.steps.push(ChainStep {
        id: "bogus".to_owned(),
        tool: "not_a_tool".to_owned(),
        args: StepArgs::Literal(json!({})),
        required: false,
        condition: None,
    });
    catalog.register(chain);
    let chains = ChainExecutor::new(Arc::clone(&h.engine), catalog);

    let failure = chains
        .execute_chain("morning_briefing", &json!({}), &tenant(), Some("u1"), &token(Role::User))
        .await
        .expect_err("unknown tool in steps");
    match &failure.error {
        EngineError::ChainValidation { reasons, .. } => {
            assert!(reasons.iter().any(|r| r.contains("not_a_tool")));
        }
        other => panic!("expected ChainValidation, got {other:?}"),
    }
    assert_eq!(h.executor.call_count(), 0);
}

#[tokio::test]
async fn test_list_chains_exposes_catalog() {
    let (_h, chains) = chain_harness(MockExecutor::always_ok(json!({})));
    let names = chains.list_chains();
    assert!(names.contains(&"lead_to_opportunity"));
    assert!(names.contains(&"account_with_contact"));
    assert!(chains.chain("lead_to_opportunity").is_some());
    assert!(chains.chain("nope").is_none());
}
