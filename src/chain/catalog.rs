//! Built-in chain catalog.
//!
//! Three static chains cover the common CRM motions (lead conversion,
//! account onboarding, bizdev intake) and one dynamic chain fans a single
//! update over a list of leads. Chains with destructive compensations
//! require manager rank so their rollbacks can actually clear the gate.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{ChainDefinition, ChainStep, RollbackStep, StepArgs};
use crate::error::EngineError;
use crate::policy::{POLICY_READ_ONLY, POLICY_WRITE};
use crate::types::Role;

/// Named chain definitions, immutable after construction.
pub struct ChainCatalog {
    chains: BTreeMap<String, ChainDefinition>,
}

impl ChainCatalog {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        let mut chains = BTreeMap::new();
        for chain in [
            lead_to_opportunity(),
            account_with_contact(),
            bizdev_source_with_lead(),
            bulk_lead_update(),
            morning_briefing(),
        ] {
            chains.insert(chain.name.clone(), chain);
        }
        Self { chains }
    }

    /// An empty catalog, for hosts that register their own chains.
    pub fn empty() -> Self {
        Self {
            chains: BTreeMap::new(),
        }
    }

    /// Register a chain, replacing any existing definition of the same name.
    pub fn register(&mut self, chain: ChainDefinition) {
        self.chains.insert(chain.name.clone(), chain);
    }

    /// Look up a chain by name.
    pub fn get(&self, name: &str) -> Option<&ChainDefinition> {
        self.chains.get(name)
    }

    /// Ordered chain names.
    pub fn names(&self) -> Vec<&str> {
        self.chains.keys().map(String::as_str).collect()
    }

    /// Every definition, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &ChainDefinition> {
        self.chains.values()
    }
}

/// Pull a required string field out of the chain input.
fn input_str(input: &Value, key: &str) -> Result<String, EngineError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| EngineError::Validation {
            message: format!("chain input requires '{key}'"),
            field: Some(key.to_owned()),
        })
}

/// Qualify a lead, convert it to an account, then open an opportunity.
///
/// The opportunity step is optional: a failed opportunity leaves a
/// converted account behind, which is still forward progress.
fn lead_to_opportunity() -> ChainDefinition {
    ChainDefinition {
        name: "lead_to_opportunity".to_owned(),
        description: "Qualify a lead, convert it to an account, and open an opportunity"
            .to_owned(),
        required_role: Role::User,
        policy_name: POLICY_WRITE.to_owned(),
        steps: vec![
            ChainStep {
                id: "qualify".to_owned(),
                tool: "qualify_lead".to_owned(),
                args: StepArgs::Template(Arc::new(|input, _context| {
                    let lead_id = input_str(input, "lead_id")?;
                    let notes = input
                        .get("qualification_notes")
                        .and_then(Value::as_str)
                        .unwrap_or("Qualified via assistant chain");
                    Ok(json!({ "lead_id": lead_id, "qualification_notes": notes }))
                })),
                required: true,
                condition: None,
            },
            ChainStep {
                id: "convert".to_owned(),
                tool: "convert_lead_to_account".to_owned(),
                args: StepArgs::Template(Arc::new(|input, _context| {
                    let lead_id = input_str(input, "lead_id")?;
                    let account_name = input
                        .get("account_name")
                        .or_else(|| input.get("opportunity_name"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| EngineError::Validation {
                            message: "chain input requires 'account_name' or 'opportunity_name'"
                                .to_owned(),
                            field: Some("account_name".to_owned()),
                        })?;
                    Ok(json!({ "lead_id": lead_id, "account_name": account_name }))
                })),
                required: true,
                condition: Some(Arc::new(|context| context.succeeded("qualify"))),
            },
            ChainStep {
                id: "opportunity".to_owned(),
                tool: "create_opportunity".to_owned(),
                args: StepArgs::Template(Arc::new(|input, context| {
                    let name = input_str(input, "opportunity_name")?;
                    let account_id = context
                        .value_at("convert", &["account", "id"])
                        .cloned()
                        .ok_or_else(|| EngineError::Validation {
                            message: "conversion result carries no account id".to_owned(),
                            field: None,
                        })?;
                    Ok(json!({
                        "data": {
                            "name": name,
                            "amount": input.get("amount").cloned().unwrap_or(Value::Null),
                            "account_id": account_id,
                            "stage": "prospecting",
                        }
                    }))
                })),
                required: false,
                condition: Some(Arc::new(|context| context.succeeded("convert"))),
            },
        ],
        rollback: Vec::new(),
        dynamic: false,
        generator: None,
    }
}

/// Create an account, then its primary contact, compensating both on a
/// required failure. Manager rank: the compensations are deletes.
fn account_with_contact() -> ChainDefinition {
    ChainDefinition {
        name: "account_with_contact".to_owned(),
        description: "Create an account with its primary contact, rolling back on failure"
            .to_owned(),
        required_role: Role::Manager,
        policy_name: POLICY_WRITE.to_owned(),
        steps: vec![
            ChainStep {
                id: "account".to_owned(),
                tool: "create_account".to_owned(),
                args: StepArgs::Template(Arc::new(|input, _context| {
                    let name = input_str(input, "account_name")?;
                    Ok(json!({
                        "data": {
                            "name": name,
                            "industry": input.get("industry").cloned().unwrap_or(Value::Null),
                        }
                    }))
                })),
                required: true,
                condition: None,
            },
            ChainStep {
                id: "contact".to_owned(),
                tool: "create_contact".to_owned(),
                args: StepArgs::Template(Arc::new(|input, context| {
                    let first_name = input_str(input, "contact_first_name")?;
                    let last_name = input_str(input, "contact_last_name")?;
                    let account_id = context
                        .value_at("account", &["id"])
                        .cloned()
                        .ok_or_else(|| EngineError::Validation {
                            message: "account result carries no id".to_owned(),
                            field: None,
                        })?;
                    Ok(json!({
                        "data": {
                            "first_name": first_name,
                            "last_name": last_name,
                            "email": input.get("contact_email").cloned().unwrap_or(Value::Null),
                            "account_id": account_id,
                        }
                    }))
                })),
                required: true,
                condition: Some(Arc::new(|context| context.succeeded("account"))),
            },
        ],
        // Declared forward, executed in reverse: contact first, then account.
        rollback: vec![
            RollbackStep {
                tool: "delete_account".to_owned(),
                args: Arc::new(|context| {
                    context.value_at("account", &["id"]).and_then(Value::as_str).map(
                        |id| json!({ "account_id": id, "confirmed": true }),
                    )
                }),
                condition: Some(Arc::new(|context| context.succeeded("account"))),
            },
            RollbackStep {
                tool: "delete_contact".to_owned(),
                args: Arc::new(|context| {
                    context.value_at("contact", &["id"]).and_then(Value::as_str).map(
                        |id| json!({ "contact_id": id, "confirmed": true }),
                    )
                }),
                condition: Some(Arc::new(|context| context.succeeded("contact"))),
            },
        ],
        dynamic: false,
        generator: None,
    }
}

/// Register a bizdev source, then an optional first lead attributed to it.
fn bizdev_source_with_lead() -> ChainDefinition {
    ChainDefinition {
        name: "bizdev_source_with_lead".to_owned(),
        description: "Register a bizdev source and attribute a first lead to it".to_owned(),
        required_role: Role::Manager,
        policy_name: POLICY_WRITE.to_owned(),
        steps: vec![
            ChainStep {
                id: "source".to_owned(),
                tool: "create_bizdev_source".to_owned(),
                args: StepArgs::Template(Arc::new(|input, _context| {
                    let name = input_str(input, "source_name")?;
                    Ok(json!({
                        "data": {
                            "name": name,
                            "channel": input.get("channel").cloned().unwrap_or(Value::Null),
                        }
                    }))
                })),
                required: true,
                condition: None,
            },
            ChainStep {
                id: "lead".to_owned(),
                tool: "create_lead".to_owned(),
                args: StepArgs::Template(Arc::new(|input, context| {
                    let first_name = input_str(input, "lead_first_name")?;
                    let last_name = input_str(input, "lead_last_name")?;
                    let source_id = context
                        .value_at("source", &["id"])
                        .cloned()
                        .unwrap_or(Value::Null);
                    Ok(json!({
                        "data": {
                            "first_name": first_name,
                            "last_name": last_name,
                            "source_id": source_id,
                        }
                    }))
                })),
                required: false,
                condition: Some(Arc::new(|context| context.succeeded("source"))),
            },
        ],
        rollback: vec![RollbackStep {
            tool: "delete_bizdev_source".to_owned(),
            args: Arc::new(|context| {
                context.value_at("source", &["id"]).and_then(Value::as_str).map(
                    |id| json!({ "source_id": id, "confirmed": true }),
                )
            }),
            condition: Some(Arc::new(|context| context.succeeded("source"))),
        }],
        dynamic: false,
        generator: None,
    }
}

/// Apply one update payload to every lead in the input list.
fn bulk_lead_update() -> ChainDefinition {
    ChainDefinition {
        name: "bulk_lead_update".to_owned(),
        description: "Apply one update payload to a list of leads".to_owned(),
        required_role: Role::User,
        policy_name: POLICY_WRITE.to_owned(),
        steps: Vec::new(),
        rollback: Vec::new(),
        dynamic: true,
        generator: Some(Arc::new(|input| {
            let lead_ids = input
                .get("lead_ids")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let updates = input.get("updates").cloned().unwrap_or(Value::Null);

            Ok(lead_ids
                .into_iter()
                .enumerate()
                .map(|(index, lead_id)| ChainStep {
                    id: format!("update_{index}"),
                    tool: "update_lead".to_owned(),
                    args: StepArgs::Literal(json!({
                        "lead_id": lead_id,
                        "updates": updates.clone(),
                    })),
                    required: false,
                    condition: None,
                })
                .collect())
        })),
    }
}

/// A read-only snapshot chain used by dashboards; no mutations, no rollback.
fn morning_briefing() -> ChainDefinition {
    ChainDefinition {
        name: "morning_briefing".to_owned(),
        description: "Snapshot plus open activities for the daily briefing".to_owned(),
        required_role: Role::User,
        policy_name: POLICY_READ_ONLY.to_owned(),
        steps: vec![
            ChainStep {
                id: "snapshot".to_owned(),
                tool: "get_crm_snapshot".to_owned(),
                args: StepArgs::Literal(json!({ "period": "7d" })),
                required: true,
                condition: None,
            },
            ChainStep {
                id: "activities".to_owned(),
                tool: "list_activities".to_owned(),
                args: StepArgs::Literal(json!({ "activity_type": "task", "limit": 10 })),
                required: false,
                condition: None,
            },
        ],
        rollback: Vec::new(),
        dynamic: false,
        generator: None,
    }
}
