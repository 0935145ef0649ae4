//! Argument canonicalization for outbound Braid calls.
//!
//! Every dispatch passes its raw argument map through here after the
//! security gate and before the executor: the authorized tenant is pinned,
//! filter submaps are unwrapped, scalars are normalized, update payloads are
//! rehydrated, and the map is converted to the positional form the Braid
//! function expects. The whole transformation is idempotent.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::registry::{Tool, ToolRegistry};
use crate::types::TenantRecord;

/// Tools whose `filter` submap is shallow-merged into the argument map.
const FILTER_UNWRAP_TOOLS: &[&str] = &[
    "list_leads",
    "list_opportunities_by_stage",
    "list_accounts",
    "search_contacts",
];

/// Update-style tools whose `updates` payload is rehydrated and stamped
/// with the tenant id.
const UPDATE_TOOLS: &[&str] = &[
    "update_activity",
    "update_lead",
    "update_account",
    "update_contact",
    "update_opportunity",
    "update_note",
    "update_bizdev_source",
];

/// Placeholder for parameters the caller did not supply.
const UNSET: &str = "unset";

/// `status` values that mean "no filter" and are erased.
const STATUS_WILDCARDS: &[&str] = &["all", "any", ""];

/// Canonicalized arguments: the normalized map plus its positional form.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalArgs {
    /// The normalized argument map; always carries `tenant`.
    pub map: Map<String, Value>,
    /// Arguments ordered for the Braid function call.
    pub positional: Vec<Value>,
    /// Whether a parameter order existed for the function.
    pub had_param_order: bool,
}

/// Canonicalize a raw argument map for one tool dispatch.
///
/// Non-object argument payloads are treated as empty maps. The output map
/// is a fixpoint: feeding it back through produces the identical result.
pub fn canonicalize(
    tool: &Tool,
    raw: &Value,
    tenant: &TenantRecord,
    registry: &ToolRegistry,
) -> CanonicalArgs {
    let mut map = match raw {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => {
            warn!(tool = %tool.name, args_type = %json_type(other), "non-object args, starting from empty map");
            Map::new()
        }
    };

    pin_tenant(&mut map, tool, tenant);

    if FILTER_UNWRAP_TOOLS.contains(&tool.name.as_str()) {
        unwrap_filter(&mut map);
    }

    coerce_limit(&mut map, &tool.name);
    erase_status_wildcard(&mut map);

    if UPDATE_TOOLS.contains(&tool.name.as_str()) {
        rehydrate_updates(&mut map, &tool.name, tenant);
    }

    let (positional, had_param_order) = to_positional(&map, tool, registry);

    CanonicalArgs {
        map,
        positional,
        had_param_order,
    }
}

/// Pin the authorized tenant uuid, overriding whatever the caller sent.
fn pin_tenant(map: &mut Map<String, Value>, tool: &Tool, tenant: &TenantRecord) {
    let authorized = tenant.id.to_string();
    if let Some(supplied) = map.get("tenant") {
        let matches = match supplied {
            Value::String(s) => {
                s.is_empty() || s == "default" || *s == authorized || *s == tenant.slug
            }
            Value::Null => true,
            _ => false,
        };
        if !matches {
            warn!(
                tool = %tool.name,
                supplied = %supplied,
                authorized = %authorized,
                "security override: caller-supplied tenant replaced with authorized tenant"
            );
        }
    }
    map.insert("tenant".to_owned(), Value::String(authorized));
}

/// Shallow-merge a `filter` submap into the argument map and drop it.
fn unwrap_filter(map: &mut Map<String, Value>) {
    let Some(filter) = map.remove("filter") else {
        return;
    };
    match filter {
        Value::Object(fields) => {
            for (key, value) in fields {
                map.entry(key).or_insert(value);
            }
        }
        other => {
            warn!(filter_type = %json_type(&other), "non-object filter dropped");
        }
    }
}

/// Coerce a decimal-string `limit` to an integer; leave anything else alone.
/// Unparseable strings pass through untouched for the backend to reject.
fn coerce_limit(map: &mut Map<String, Value>, tool: &str) {
    let coerced = match map.get("limit") {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };
    if let Some(n) = coerced {
        debug!(tool, limit = n, "coerced string limit to integer");
        map.insert("limit".to_owned(), Value::from(n));
    }
}

/// Drop `status` when it is one of the wildcard values.
fn erase_status_wildcard(map: &mut Map<String, Value>) {
    let is_wildcard = matches!(
        map.get("status"),
        Some(Value::String(s)) if STATUS_WILDCARDS.contains(&s.as_str())
    );
    if is_wildcard {
        map.remove("status");
    }
}

/// Parse string `updates` payloads and stamp the tenant id into map payloads.
fn rehydrate_updates(map: &mut Map<String, Value>, tool: &str, tenant: &TenantRecord) {
    let parsed = match map.get("updates") {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(tool, error = %e, "updates payload is not valid JSON, passing through");
                None
            }
        },
        _ => None,
    };

    if let Some(mut parsed) = parsed {
        if let Value::Object(fields) = &mut parsed {
            fields.insert(
                "tenant_id".to_owned(),
                Value::String(tenant.id.to_string()),
            );
        }
        map.insert("updates".to_owned(), parsed);
    } else if let Some(Value::Object(fields)) = map.get_mut("updates") {
        fields.insert(
            "tenant_id".to_owned(),
            Value::String(tenant.id.to_string()),
        );
    }
}

/// Convert the map to the function's positional argument list.
///
/// Missing parameters become the `"unset"` placeholder. Functions without a
/// known parameter order receive the whole map as a single argument.
fn to_positional(
    map: &Map<String, Value>,
    tool: &Tool,
    registry: &ToolRegistry,
) -> (Vec<Value>, bool) {
    match registry.param_order(&tool.function_name) {
        Some(order) => {
            let positional = order
                .iter()
                .map(|param| {
                    map.get(param)
                        .cloned()
                        .unwrap_or_else(|| Value::String(UNSET.to_owned()))
                })
                .collect();
            (positional, true)
        }
        None => {
            debug!(
                function = %tool.function_name,
                "no parameter order known, passing args as a single map"
            );
            (vec![Value::Object(map.clone())], false)
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
