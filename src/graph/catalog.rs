//! Built-in release graph: one node per analyzable tool.
//!
//! Dependencies model "must already work for this tool to make sense":
//! mutations depend on the read that locates their target, conversions
//! depend on qualification, aggregates depend on the listings they roll up.

use super::{Effect, ToolNode};

fn node(
    name: &str,
    category: &str,
    dependencies: &[&str],
    inputs: &[&str],
    outputs: &[&str],
    effects: &[Effect],
) -> ToolNode {
    ToolNode {
        name: name.to_owned(),
        category: category.to_owned(),
        dependencies: dependencies.iter().map(|d| (*d).to_owned()).collect(),
        inputs: inputs.iter().map(|i| (*i).to_owned()).collect(),
        outputs: outputs.iter().map(|o| (*o).to_owned()).collect(),
        effects: effects.to_vec(),
    }
}

/// The static release graph.
pub fn builtin_nodes() -> Vec<ToolNode> {
    use Effect::{Create, Delete, Read, Update};

    vec![
        // Leads
        node("list_leads", "leads", &[], &["status", "source", "limit"], &["lead[]"], &[Read]),
        node("get_lead", "leads", &[], &["lead_id"], &["lead"], &[Read]),
        node("create_lead", "leads", &[], &["data"], &["lead"], &[Create]),
        node("update_lead", "leads", &["get_lead"], &["lead_id", "updates"], &["lead"], &[Update]),
        node("delete_lead", "leads", &["get_lead"], &["lead_id", "confirmed"], &[], &[Delete]),
        node(
            "qualify_lead",
            "leads",
            &["get_lead"],
            &["lead_id", "qualification_notes"],
            &["lead"],
            &[Update],
        ),
        node(
            "convert_lead_to_account",
            "leads",
            &["qualify_lead"],
            &["lead_id", "account_name"],
            &["account", "lead"],
            &[Create, Update],
        ),
        // Accounts
        node("list_accounts", "accounts", &[], &["industry", "status"], &["account[]"], &[Read]),
        node("get_account", "accounts", &[], &["account_id"], &["account"], &[Read]),
        node("create_account", "accounts", &[], &["data"], &["account"], &[Create]),
        node(
            "update_account",
            "accounts",
            &["get_account"],
            &["account_id", "updates"],
            &["account"],
            &[Update],
        ),
        node(
            "delete_account",
            "accounts",
            &["get_account"],
            &["account_id", "confirmed"],
            &[],
            &[Delete],
        ),
        // Contacts
        node("search_contacts", "contacts", &[], &["query", "account_id"], &["contact[]"], &[Read]),
        node("get_contact", "contacts", &[], &["contact_id"], &["contact"], &[Read]),
        node(
            "create_contact",
            "contacts",
            &["get_account"],
            &["data"],
            &["contact"],
            &[Create],
        ),
        node(
            "update_contact",
            "contacts",
            &["get_contact"],
            &["contact_id", "updates"],
            &["contact"],
            &[Update],
        ),
        node(
            "delete_contact",
            "contacts",
            &["get_contact"],
            &["contact_id", "confirmed"],
            &[],
            &[Delete],
        ),
        // Opportunities
        node(
            "list_opportunities",
            "opportunities",
            &[],
            &["status", "limit"],
            &["opportunity[]"],
            &[Read],
        ),
        node(
            "list_opportunities_by_stage",
            "opportunities",
            &[],
            &["stage", "limit"],
            &["opportunity[]"],
            &[Read],
        ),
        node(
            "get_opportunity",
            "opportunities",
            &[],
            &["opportunity_id"],
            &["opportunity"],
            &[Read],
        ),
        node(
            "create_opportunity",
            "opportunities",
            &["get_account"],
            &["data"],
            &["opportunity"],
            &[Create],
        ),
        node(
            "update_opportunity",
            "opportunities",
            &["get_opportunity"],
            &["opportunity_id", "updates"],
            &["opportunity"],
            &[Update],
        ),
        node(
            "delete_opportunity",
            "opportunities",
            &["get_opportunity"],
            &["opportunity_id", "confirmed"],
            &[],
            &[Delete],
        ),
        // Activities
        node(
            "list_activities",
            "activities",
            &[],
            &["activity_type", "assigned_to"],
            &["activity[]"],
            &[Read],
        ),
        node("get_activity", "activities", &[], &["activity_id"], &["activity"], &[Read]),
        node("create_activity", "activities", &[], &["data"], &["activity"], &[Create]),
        node(
            "update_activity",
            "activities",
            &["get_activity"],
            &["activity_id", "updates"],
            &["activity"],
            &[Update],
        ),
        node(
            "complete_activity",
            "activities",
            &["get_activity"],
            &["activity_id", "outcome"],
            &["activity"],
            &[Update],
        ),
        node(
            "delete_activity",
            "activities",
            &["get_activity"],
            &["activity_id", "confirmed"],
            &[],
            &[Delete],
        ),
        // Notes and bizdev
        node("list_notes", "notes", &[], &["entity_type", "entity_id"], &["note[]"], &[Read]),
        node("create_note", "notes", &[], &["data"], &["note"], &[Create]),
        node("update_note", "notes", &[], &["note_id", "updates"], &["note"], &[Update]),
        node("delete_note", "notes", &[], &["note_id", "confirmed"], &[], &[Delete]),
        node("list_bizdev_sources", "bizdev", &[], &["status"], &["source[]"], &[Read]),
        node("create_bizdev_source", "bizdev", &[], &["data"], &["source"], &[Create]),
        node(
            "update_bizdev_source",
            "bizdev",
            &[],
            &["source_id", "updates"],
            &["source"],
            &[Update],
        ),
        node(
            "delete_bizdev_source",
            "bizdev",
            &[],
            &["source_id", "confirmed"],
            &[],
            &[Delete],
        ),
        // Insights
        node(
            "get_crm_snapshot",
            "insights",
            &["list_leads", "list_accounts", "list_opportunities"],
            &["period"],
            &["snapshot"],
            &[Read],
        ),
        node(
            "get_dashboard_summary",
            "insights",
            &["get_crm_snapshot"],
            &["period"],
            &["summary"],
            &[Read],
        ),
        // Assistant
        node(
            "suggest_next_action",
            "assistant",
            &["get_crm_snapshot"],
            &["entity_type", "entity_id"],
            &["suggestion"],
            &[Read],
        ),
        node(
            "draft_follow_up_email",
            "assistant",
            &["get_contact"],
            &["contact_id", "context"],
            &["draft"],
            &[Read],
        ),
        node("score_lead_quality", "assistant", &["get_lead"], &["lead_id"], &["score"], &[Read]),
        // Integrations
        node(
            "enrich_account_from_web",
            "integrations",
            &["get_account"],
            &["account_id", "domain"],
            &["account"],
            &[Read, Update],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_dependency_is_a_node() {
        let nodes = builtin_nodes();
        let names: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        for node in &nodes {
            for dep in &node.dependencies {
                assert!(
                    names.contains(dep.as_str()),
                    "{} depends on unknown node {dep}",
                    node.name
                );
            }
        }
    }

    #[test]
    fn test_node_names_are_unique() {
        let nodes = builtin_nodes();
        let mut names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_delete_nodes_have_delete_effect() {
        for node in builtin_nodes() {
            if node.name.starts_with("delete_") {
                assert!(node.effects.contains(&Effect::Delete), "{}", node.name);
            }
        }
    }
}
