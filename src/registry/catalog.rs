//! Built-in Braid tool catalog: tool table, cache TTL overrides, and the
//! known function signatures.

use std::collections::HashMap;

use super::Tool;
use crate::policy::{
    POLICY_ADMIN_ONLY, POLICY_AI_SUGGESTIONS, POLICY_DELETE, POLICY_EXTERNAL_API,
    POLICY_READ_ONLY, POLICY_SYSTEM_INTERNAL, POLICY_WRITE,
};

/// Cache TTL applied when a tool has no override.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 90;

fn tool(name: &str, source_file: &str, function_name: &str, policy: &str) -> Tool {
    Tool {
        name: name.to_owned(),
        source_file: source_file.to_owned(),
        function_name: function_name.to_owned(),
        policy: policy.to_owned(),
    }
}

/// The full built-in tool table.
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        // Leads
        tool("list_leads", "leads.js", "listLeads", POLICY_READ_ONLY),
        tool("get_lead", "leads.js", "getLead", POLICY_READ_ONLY),
        tool("create_lead", "leads.js", "createLead", POLICY_WRITE),
        tool("update_lead", "leads.js", "updateLead", POLICY_WRITE),
        tool("delete_lead", "leads.js", "deleteLead", POLICY_DELETE),
        tool("qualify_lead", "leads.js", "qualifyLead", POLICY_WRITE),
        tool(
            "convert_lead_to_account",
            "leads.js",
            "convertLeadToAccount",
            POLICY_WRITE,
        ),
        // Accounts
        tool("list_accounts", "accounts.js", "listAccounts", POLICY_READ_ONLY),
        tool("get_account", "accounts.js", "getAccount", POLICY_READ_ONLY),
        tool("create_account", "accounts.js", "createAccount", POLICY_WRITE),
        tool("update_account", "accounts.js", "updateAccount", POLICY_WRITE),
        tool("delete_account", "accounts.js", "deleteAccount", POLICY_DELETE),
        // Contacts
        tool(
            "search_contacts",
            "contacts.js",
            "searchContacts",
            POLICY_READ_ONLY,
        ),
        tool("get_contact", "contacts.js", "getContact", POLICY_READ_ONLY),
        tool("create_contact", "contacts.js", "createContact", POLICY_WRITE),
        tool("update_contact", "contacts.js", "updateContact", POLICY_WRITE),
        tool("delete_contact", "contacts.js", "deleteContact", POLICY_DELETE),
        // Opportunities
        tool(
            "list_opportunities",
            "opportunities.js",
            "listOpportunities",
            POLICY_READ_ONLY,
        ),
        tool(
            "list_opportunities_by_stage",
            "opportunities.js",
            "listOpportunitiesByStage",
            POLICY_READ_ONLY,
        ),
        tool(
            "get_opportunity",
            "opportunities.js",
            "getOpportunity",
            POLICY_READ_ONLY,
        ),
        tool(
            "create_opportunity",
            "opportunities.js",
            "createOpportunity",
            POLICY_WRITE,
        ),
        tool(
            "update_opportunity",
            "opportunities.js",
            "updateOpportunity",
            POLICY_WRITE,
        ),
        tool(
            "delete_opportunity",
            "opportunities.js",
            "deleteOpportunity",
            POLICY_DELETE,
        ),
        // Activities
        tool(
            "list_activities",
            "activities.js",
            "listActivities",
            POLICY_READ_ONLY,
        ),
        tool("get_activity", "activities.js", "getActivity", POLICY_READ_ONLY),
        tool(
            "create_activity",
            "activities.js",
            "createActivity",
            POLICY_WRITE,
        ),
        tool(
            "update_activity",
            "activities.js",
            "updateActivity",
            POLICY_WRITE,
        ),
        tool(
            "complete_activity",
            "activities.js",
            "completeActivity",
            POLICY_WRITE,
        ),
        tool(
            "delete_activity",
            "activities.js",
            "deleteActivity",
            POLICY_DELETE,
        ),
        // Notes
        tool("list_notes", "notes.js", "listNotes", POLICY_READ_ONLY),
        tool("create_note", "notes.js", "createNote", POLICY_WRITE),
        tool("update_note", "notes.js", "updateNote", POLICY_WRITE),
        tool("delete_note", "notes.js", "deleteNote", POLICY_DELETE),
        // Bizdev sources
        tool(
            "list_bizdev_sources",
            "bizdev.js",
            "listBizdevSources",
            POLICY_READ_ONLY,
        ),
        tool(
            "create_bizdev_source",
            "bizdev.js",
            "createBizdevSource",
            POLICY_WRITE,
        ),
        tool(
            "update_bizdev_source",
            "bizdev.js",
            "updateBizdevSource",
            POLICY_WRITE,
        ),
        tool(
            "delete_bizdev_source",
            "bizdev.js",
            "deleteBizdevSource",
            POLICY_DELETE,
        ),
        // Employees and documents (read-only surface)
        tool(
            "list_employees",
            "employees.js",
            "listEmployees",
            POLICY_READ_ONLY,
        ),
        tool("get_employee", "employees.js", "getEmployee", POLICY_READ_ONLY),
        tool(
            "list_documents",
            "documents.js",
            "listDocuments",
            POLICY_READ_ONLY,
        ),
        tool("get_document", "documents.js", "getDocument", POLICY_READ_ONLY),
        // Aggregated insights
        tool(
            "get_crm_snapshot",
            "insights.js",
            "getCrmSnapshot",
            POLICY_READ_ONLY,
        ),
        tool(
            "get_dashboard_summary",
            "insights.js",
            "getDashboardSummary",
            POLICY_READ_ONLY,
        ),
        // AI assistant
        tool(
            "suggest_next_action",
            "assistant.js",
            "suggestNextAction",
            POLICY_AI_SUGGESTIONS,
        ),
        tool(
            "draft_follow_up_email",
            "assistant.js",
            "draftFollowUpEmail",
            POLICY_AI_SUGGESTIONS,
        ),
        tool(
            "score_lead_quality",
            "assistant.js",
            "scoreLeadQuality",
            POLICY_AI_SUGGESTIONS,
        ),
        // Third-party integrations
        tool(
            "enrich_account_from_web",
            "integrations.js",
            "enrichAccountFromWeb",
            POLICY_EXTERNAL_API,
        ),
        tool(
            "sync_external_calendar",
            "integrations.js",
            "syncExternalCalendar",
            POLICY_EXTERNAL_API,
        ),
        // Tenant administration
        tool(
            "manage_user_roles",
            "admin.js",
            "manageUserRoles",
            POLICY_ADMIN_ONLY,
        ),
        tool(
            "purge_tenant_cache",
            "admin.js",
            "purgeTenantCache",
            POLICY_ADMIN_ONLY,
        ),
        // System maintenance
        tool(
            "run_nightly_rollup",
            "system.js",
            "runNightlyRollup",
            POLICY_SYSTEM_INTERNAL,
        ),
        tool(
            "internal_health_check",
            "system.js",
            "internalHealthCheck",
            POLICY_SYSTEM_INTERNAL,
        ),
    ]
}

/// Per-tool cache TTL overrides, seconds. Tools absent here use the default.
pub fn builtin_ttls() -> HashMap<String, u64> {
    let mut ttls = HashMap::new();
    // Aggregates go stale fastest.
    for name in ["get_crm_snapshot", "get_dashboard_summary"] {
        ttls.insert(name.to_owned(), 30);
    }
    // Collection listings churn with every write.
    for name in [
        "list_leads",
        "list_accounts",
        "search_contacts",
        "list_opportunities",
        "list_opportunities_by_stage",
        "list_activities",
        "list_notes",
        "list_bizdev_sources",
        "list_employees",
        "list_documents",
    ] {
        ttls.insert(name.to_owned(), 60);
    }
    // Single-record reads are the most stable.
    for name in [
        "get_lead",
        "get_account",
        "get_contact",
        "get_opportunity",
        "get_activity",
        "get_employee",
        "get_document",
    ] {
        ttls.insert(name.to_owned(), 300);
    }
    ttls
}

/// Ordered parameter lists for the known Braid functions.
pub fn builtin_param_orders() -> HashMap<String, Vec<String>> {
    let mut orders = HashMap::new();
    let mut add = |function: &str, params: &[&str]| {
        orders.insert(
            function.to_owned(),
            params.iter().map(|p| (*p).to_owned()).collect(),
        );
    };

    add(
        "listLeads",
        &["tenant", "status", "source", "assigned_to", "limit", "offset"],
    );
    add("getLead", &["tenant", "lead_id"]);
    add("createLead", &["tenant", "data"]);
    add("updateLead", &["tenant", "lead_id", "updates"]);
    add("deleteLead", &["tenant", "lead_id", "confirmed"]);
    add("qualifyLead", &["tenant", "lead_id", "qualification_notes"]);
    add("convertLeadToAccount", &["tenant", "lead_id", "account_name"]);

    add(
        "listAccounts",
        &["tenant", "industry", "status", "limit", "offset"],
    );
    add("getAccount", &["tenant", "account_id"]);
    add("createAccount", &["tenant", "data"]);
    add("updateAccount", &["tenant", "account_id", "updates"]);
    add("deleteAccount", &["tenant", "account_id", "confirmed"]);

    add("searchContacts", &["tenant", "query", "account_id", "limit"]);
    add("getContact", &["tenant", "contact_id"]);
    add("createContact", &["tenant", "data"]);
    add("updateContact", &["tenant", "contact_id", "updates"]);
    add("deleteContact", &["tenant", "contact_id", "confirmed"]);

    add("listOpportunities", &["tenant", "status", "limit", "offset"]);
    add(
        "listOpportunitiesByStage",
        &["tenant", "stage", "limit", "offset"],
    );
    add("getOpportunity", &["tenant", "opportunity_id"]);
    add("createOpportunity", &["tenant", "data"]);
    add("updateOpportunity", &["tenant", "opportunity_id", "updates"]);
    add("deleteOpportunity", &["tenant", "opportunity_id", "confirmed"]);

    add(
        "listActivities",
        &["tenant", "activity_type", "assigned_to", "limit", "offset"],
    );
    add("getActivity", &["tenant", "activity_id"]);
    add("createActivity", &["tenant", "data"]);
    add("updateActivity", &["tenant", "activity_id", "updates"]);
    add("completeActivity", &["tenant", "activity_id", "outcome"]);
    add("deleteActivity", &["tenant", "activity_id", "confirmed"]);

    add("listNotes", &["tenant", "entity_type", "entity_id", "limit"]);
    add("createNote", &["tenant", "data"]);
    add("updateNote", &["tenant", "note_id", "updates"]);
    add("deleteNote", &["tenant", "note_id", "confirmed"]);

    add("listBizdevSources", &["tenant", "status", "limit"]);
    add("createBizdevSource", &["tenant", "data"]);
    add("updateBizdevSource", &["tenant", "source_id", "updates"]);
    add("deleteBizdevSource", &["tenant", "source_id", "confirmed"]);

    add(
        "listEmployees",
        &["tenant", "department", "limit", "offset"],
    );
    add("getEmployee", &["tenant", "employee_id"]);
    add(
        "listDocuments",
        &["tenant", "entity_type", "entity_id", "limit"],
    );
    add("getDocument", &["tenant", "document_id"]);

    add("getCrmSnapshot", &["tenant", "period"]);
    add("getDashboardSummary", &["tenant", "period"]);

    add("suggestNextAction", &["tenant", "entity_type", "entity_id"]);
    add("draftFollowUpEmail", &["tenant", "contact_id", "context"]);
    add("scoreLeadQuality", &["tenant", "lead_id"]);

    add("enrichAccountFromWeb", &["tenant", "account_id", "domain"]);
    add(
        "syncExternalCalendar",
        &["tenant", "provider", "calendar_id"],
    );

    add("manageUserRoles", &["tenant", "user_id", "role"]);
    add("purgeTenantCache", &["tenant", "namespace"]);

    add("runNightlyRollup", &["tenant", "date"]);
    add("internalHealthCheck", &["tenant"]);

    orders
}
