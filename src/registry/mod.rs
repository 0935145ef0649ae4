//! Static tool registry: name → Braid function identity, policy, cache TTL,
//! and per-function ordered parameter lists.
//!
//! The parameter-order table is normally produced at startup by the external
//! schema parser from the Braid tool definition files; [`ParamTable::builtin`]
//! ships the known signatures so the engine can run without one.

mod catalog;

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::policy::PolicyTable;

/// One registered tool. Immutable after registration.
#[derive(Debug, Clone)]
pub struct Tool {
    /// Tool name as the LLM invokes it (snake_case).
    pub name: String,
    /// Braid source file implementing the function.
    pub source_file: String,
    /// Braid function name (camelCase) inside the source file.
    pub function_name: String,
    /// Name of the policy governing this tool.
    pub policy: String,
}

/// Ordered parameter lists keyed by Braid function name, with the optional
/// `@policy` annotations the schema parser extracts for cross-validation.
#[derive(Debug, Default)]
pub struct ParamTable {
    orders: HashMap<String, Vec<String>>,
    annotations: HashMap<String, String>,
}

impl ParamTable {
    /// The built-in signatures for the known Braid functions.
    pub fn builtin() -> Self {
        Self {
            orders: catalog::builtin_param_orders(),
            annotations: HashMap::new(),
        }
    }

    /// Build from the external schema parser's output.
    pub fn from_parsed(
        orders: HashMap<String, Vec<String>>,
        annotations: HashMap<String, String>,
    ) -> Self {
        Self {
            orders,
            annotations,
        }
    }

    /// Ordered parameter names for a function, when known.
    pub fn order(&self, function_name: &str) -> Option<&[String]> {
        self.orders.get(function_name).map(Vec::as_slice)
    }

    /// The `@policy` annotation the schema parser found, when present.
    pub fn annotation(&self, function_name: &str) -> Option<&str> {
        self.annotations.get(function_name).map(String::as_str)
    }
}

/// Registry of every dispatchable tool. Immutable after construction.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
    ttls: HashMap<String, u64>,
    params: ParamTable,
    default_ttl_secs: u64,
}

impl ToolRegistry {
    /// Build the built-in Braid tool registry with built-in signatures.
    pub fn builtin() -> Self {
        Self::with_params(ParamTable::builtin())
    }

    /// Build the built-in tool registry with a caller-provided parameter
    /// table (the schema parser's startup output).
    pub fn with_params(params: ParamTable) -> Self {
        let mut tools = BTreeMap::new();
        for tool in catalog::builtin_tools() {
            tools.insert(tool.name.clone(), tool);
        }
        Self {
            tools,
            ttls: catalog::builtin_ttls(),
            params,
            default_ttl_secs: catalog::DEFAULT_CACHE_TTL_SECS,
        }
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Whether the registry contains the named tool.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Every registered tool, ordered by name.
    pub fn list(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Cache TTL for a tool's results; unknown tools get the default.
    pub fn per_tool_ttl(&self, name: &str) -> u64 {
        self.ttls
            .get(name)
            .copied()
            .unwrap_or(self.default_ttl_secs)
    }

    /// Ordered parameter names for a Braid function, when known.
    pub fn param_order(&self, function_name: &str) -> Option<&[String]> {
        self.params.order(function_name)
    }

    /// Cross-validate the registry against the policy table and the
    /// parameter table. Returns warnings; none of them are fatal.
    pub fn validate(&self, policies: &PolicyTable) -> Vec<String> {
        let mut warnings = Vec::new();
        for tool in self.tools.values() {
            if !policies.contains(&tool.policy) {
                warnings.push(format!(
                    "tool '{}' references unknown policy '{}'",
                    tool.name, tool.policy
                ));
            }
            if self.params.order(&tool.function_name).is_none() {
                warnings.push(format!(
                    "function '{}' has no parameter order; args will pass as a single map",
                    tool.function_name
                ));
            }
            if let Some(annotated) = self.params.annotation(&tool.function_name) {
                if annotated != tool.policy {
                    warnings.push(format!(
                        "function '{}' annotated @policy {annotated} but registry says {}",
                        tool.function_name, tool.policy
                    ));
                }
            }
        }
        for warning in &warnings {
            warn!(%warning, "registry validation");
        }
        warnings
    }
}
