//! Static security policies gating every tool dispatch.
//!
//! Seven named policies cover the Braid tool surface. The table is built
//! once at startup and shared immutably; the security gate and the cache
//! coordinator consult it on every dispatch.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::types::Role;

/// Coarse tool grouping used for rate-limit counter keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// Pure reads: list, get, search, snapshot.
    ReadOperations,
    /// Creates and non-destructive mutations.
    WriteOperations,
    /// Destructive deletes.
    DeleteOperations,
    /// Tenant administration.
    AdminOperations,
    /// Internal system maintenance.
    SystemOperations,
    /// AI suggestion and drafting tools.
    AiOperations,
    /// Calls that reach third-party services.
    ExternalOperations,
}

impl ToolClass {
    /// Stable string used in rate-limit keys and audit rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOperations => "read_operations",
            Self::WriteOperations => "write_operations",
            Self::DeleteOperations => "delete_operations",
            Self::AdminOperations => "admin_operations",
            Self::SystemOperations => "system_operations",
            Self::AiOperations => "ai_operations",
            Self::ExternalOperations => "external_operations",
        }
    }
}

/// A named bundle of access rules. Immutable after table construction.
#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    /// Policy name as referenced by the tool registry.
    pub name: String,
    /// Rate-limit grouping for this policy's tools.
    pub tool_class: ToolClass,
    /// Operations the policy permits. Empty means every operation.
    pub allowed_ops: HashSet<String>,
    /// Operations the policy forbids. Denial wins over allowance.
    pub denied_ops: HashSet<String>,
    /// Roles permitted to invoke tools under this policy. Empty means all.
    pub required_roles: Vec<Role>,
    /// Calls per minute per (tenant, user, tool class).
    pub rate_per_minute: u32,
    /// Whether destructive tools under this policy demand explicit confirmation.
    pub requires_confirmation: bool,
    /// Whether dispatches under this policy must be audited.
    pub audit_required: bool,
    /// Whether the canonicalizer pins the authorized tenant into every call.
    pub tenant_isolation: bool,
}

/// Policy name for read-only tools.
pub const POLICY_READ_ONLY: &str = "read_only";
/// Policy name for write tools.
pub const POLICY_WRITE: &str = "write";
/// Policy name for delete tools.
pub const POLICY_DELETE: &str = "delete";
/// Policy name for tenant-administration tools.
pub const POLICY_ADMIN_ONLY: &str = "admin_only";
/// Policy name for internal system tools.
pub const POLICY_SYSTEM_INTERNAL: &str = "system_internal";
/// Policy name for AI suggestion tools.
pub const POLICY_AI_SUGGESTIONS: &str = "ai_suggestions";
/// Policy name for third-party API tools.
pub const POLICY_EXTERNAL_API: &str = "external_api";

/// The process-wide policy table.
#[derive(Debug)]
pub struct PolicyTable {
    policies: HashMap<String, Policy>,
}

fn ops(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

/// Every role from `floor` upward, by rank.
fn roles_from(floor: Role) -> Vec<Role> {
    [
        Role::User,
        Role::Manager,
        Role::Admin,
        Role::Superadmin,
        Role::System,
    ]
    .into_iter()
    .filter(|r| r.rank() >= floor.rank())
    .collect()
}

impl PolicyTable {
    /// Build the seven built-in policies.
    pub fn builtin() -> Self {
        let mut policies = HashMap::new();

        let table = [
            Policy {
                name: POLICY_READ_ONLY.to_owned(),
                tool_class: ToolClass::ReadOperations,
                allowed_ops: ops(&["read", "list", "get", "search", "count"]),
                denied_ops: ops(&["create", "update", "delete"]),
                required_roles: Vec::new(),
                rate_per_minute: 100,
                requires_confirmation: false,
                audit_required: false,
                tenant_isolation: true,
            },
            Policy {
                name: POLICY_WRITE.to_owned(),
                tool_class: ToolClass::WriteOperations,
                allowed_ops: ops(&["create", "update", "qualify", "convert", "complete"]),
                denied_ops: ops(&["delete"]),
                required_roles: roles_from(Role::User),
                rate_per_minute: 50,
                requires_confirmation: false,
                audit_required: true,
                tenant_isolation: true,
            },
            Policy {
                name: POLICY_DELETE.to_owned(),
                tool_class: ToolClass::DeleteOperations,
                allowed_ops: ops(&["delete"]),
                denied_ops: HashSet::new(),
                required_roles: roles_from(Role::Manager),
                rate_per_minute: 20,
                requires_confirmation: true,
                audit_required: true,
                tenant_isolation: true,
            },
            Policy {
                name: POLICY_ADMIN_ONLY.to_owned(),
                tool_class: ToolClass::AdminOperations,
                allowed_ops: ops(&["read", "list", "create", "update", "delete", "manage"]),
                denied_ops: HashSet::new(),
                required_roles: roles_from(Role::Admin),
                rate_per_minute: 30,
                requires_confirmation: true,
                audit_required: false,
                tenant_isolation: true,
            },
            Policy {
                name: POLICY_SYSTEM_INTERNAL.to_owned(),
                tool_class: ToolClass::SystemOperations,
                allowed_ops: HashSet::new(),
                denied_ops: HashSet::new(),
                required_roles: vec![Role::System],
                rate_per_minute: 200,
                requires_confirmation: false,
                audit_required: false,
                tenant_isolation: false,
            },
            Policy {
                name: POLICY_AI_SUGGESTIONS.to_owned(),
                tool_class: ToolClass::AiOperations,
                allowed_ops: ops(&["read", "list", "suggest", "draft", "score"]),
                denied_ops: ops(&["delete"]),
                required_roles: roles_from(Role::User),
                rate_per_minute: 40,
                requires_confirmation: false,
                audit_required: true,
                tenant_isolation: true,
            },
            Policy {
                name: POLICY_EXTERNAL_API.to_owned(),
                tool_class: ToolClass::ExternalOperations,
                allowed_ops: ops(&["read", "sync", "enrich"]),
                denied_ops: ops(&["delete"]),
                required_roles: roles_from(Role::User),
                rate_per_minute: 10,
                requires_confirmation: false,
                audit_required: true,
                tenant_isolation: true,
            },
        ];

        for policy in table {
            policies.insert(policy.name.clone(), policy);
        }

        Self { policies }
    }

    /// Look up a policy by name.
    pub fn lookup(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Whether the table contains the named policy.
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// The minimum role permitted under a policy, `None` when unrestricted.
    pub fn minimum_role(&self, name: &str) -> Option<Role> {
        self.policies
            .get(name)
            .and_then(|p| p.required_roles.iter().copied().min_by_key(|r| r.rank()))
    }

    /// Whether a policy permits an operation. The denied list wins.
    pub fn is_operation_allowed(&self, name: &str, op: &str) -> bool {
        match self.policies.get(name) {
            Some(policy) => {
                if policy.denied_ops.contains(op) {
                    return false;
                }
                policy.allowed_ops.is_empty() || policy.allowed_ops.contains(op)
            }
            None => false,
        }
    }

    /// Calls-per-minute ceiling for a policy; 0 for unknown policies.
    pub fn rate_limit(&self, name: &str) -> u32 {
        self.policies.get(name).map_or(0, |p| p.rate_per_minute)
    }

    /// Whether the policy demands explicit confirmation on destructive tools.
    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.policies
            .get(name)
            .is_some_and(|p| p.requires_confirmation)
    }
}
