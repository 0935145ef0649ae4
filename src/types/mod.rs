//! Core types shared across the engine: roles, tokens, tenants, results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Result of one end-to-end dispatch through the engine.
pub type DispatchResult = Result<serde_json::Value, EngineError>;

/// Caller roles, totally ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular tenant user.
    User,
    /// Team manager.
    Manager,
    /// Tenant administrator.
    Admin,
    /// Cross-tenant super administrator.
    Superadmin,
    /// Internal system principal (schedulers, migrations).
    System,
}

impl Role {
    /// Numeric rank; higher rank satisfies any lower minimum.
    pub fn rank(self) -> u8 {
        match self {
            Self::User => 1,
            Self::Manager => 2,
            Self::Admin => 3,
            Self::Superadmin => 4,
            Self::System => 5,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Manager => f.write_str("manager"),
            Self::Admin => f.write_str("admin"),
            Self::Superadmin => f.write_str("superadmin"),
            Self::System => f.write_str("system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            "superadmin" => Ok(Self::Superadmin),
            "system" => Ok(Self::System),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

/// Token source string the engine accepts; anything else is rejected.
pub const TOKEN_SOURCE_TENANT_AUTHORIZATION: &str = "tenant-authorization";

/// Access token produced by the host authenticator after tenant authorization.
///
/// Opaque to the engine beyond the fields below. A dispatch proceeds only
/// when `verified` is set and `source` names the tenant-authorization flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Whether the host authenticator verified the caller.
    pub verified: bool,
    /// Authorization flow that produced the token.
    pub source: String,
    /// Role the caller holds inside the tenant.
    pub user_role: Role,
    /// Caller's user id as the host supplied it (uuid expected, not enforced here).
    pub user_id: Option<String>,
    /// Caller's email address.
    pub user_email: Option<String>,
    /// Caller's display name.
    pub user_name: Option<String>,
}

impl AccessToken {
    /// A token is valid iff it is verified and came from tenant authorization.
    pub fn is_valid(&self) -> bool {
        self.verified && self.source == TOKEN_SOURCE_TENANT_AUTHORIZATION
    }
}

/// The tenant a dispatch is authorized against.
///
/// Outbound calls and audit rows always carry `id`, never `slug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Tenant uuid used in every outbound call and cache key.
    pub id: Uuid,
    /// Human-readable tenant slug; display only.
    pub slug: String,
}
