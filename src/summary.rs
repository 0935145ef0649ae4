//! Human-oriented result summaries.
//!
//! Pure string mapping used by chat glue and logging: distinguishes empty
//! results from missing records, buckets backend errors by HTTP status, and
//! keeps collection summaries short while still carrying the ids a caller
//! needs for follow-up requests.

use serde_json::Value;

use crate::error::EngineError;
use crate::types::DispatchResult;

/// Maximum entries rendered with detail.
const DETAIL_CAP: usize = 5;
/// Maximum ids included for follow-up.
const ID_CAP: usize = 25;

/// Summarize one dispatch result as a short display string.
pub fn summarize(tool: &str, result: &DispatchResult) -> String {
    match result {
        Ok(value) => summarize_ok(tool, value),
        Err(error) => summarize_error(error),
    }
}

fn summarize_ok(tool: &str, value: &Value) -> String {
    if tool.contains("snapshot") || value.get("totals").is_some() {
        return summarize_snapshot(value);
    }
    if tool.contains("dashboard") || value.get("counts").is_some() {
        return summarize_dashboard(value);
    }
    match value {
        Value::Array(items) => summarize_collection(items),
        Value::Object(map) if map.contains_key("id") => summarize_entity(value),
        Value::Null => "Done.".to_owned(),
        _ => "OK.".to_owned(),
    }
}

fn summarize_snapshot(value: &Value) -> String {
    let totals = value.get("totals").unwrap_or(&Value::Null);
    let count = |key: &str| totals.get(key).and_then(Value::as_i64).unwrap_or(0);
    let mut summary = format!(
        "CRM snapshot: {} leads, {} accounts, {} opportunities",
        count("leads"),
        count("accounts"),
        count("opportunities"),
    );
    if let Some(pipeline) = totals.get("pipeline_value").and_then(Value::as_f64) {
        summary.push_str(&format!(", pipeline {pipeline:.0}"));
    }
    if let Some(top) = value
        .get("top_accounts_by_revenue")
        .and_then(Value::as_array)
    {
        let names: Vec<&str> = top
            .iter()
            .take(3)
            .filter_map(|a| a.get("name").and_then(Value::as_str))
            .collect();
        if !names.is_empty() {
            summary.push_str(&format!("; top by revenue: {}", names.join(", ")));
        }
    }
    summary
}

fn summarize_dashboard(value: &Value) -> String {
    match value.get("counts").and_then(Value::as_object) {
        Some(counts) => {
            let parts: Vec<String> = counts
                .iter()
                .map(|(key, count)| format!("{key}={count}"))
                .collect();
            format!("Dashboard: {}", parts.join(", "))
        }
        None => "Dashboard ready.".to_owned(),
    }
}

fn summarize_collection(items: &[Value]) -> String {
    if items.is_empty() {
        return "No matching records.".to_owned();
    }

    // Deduplicate by id, preserving order; entries without ids are kept.
    let mut seen_ids: Vec<&str> = Vec::new();
    let mut unique: Vec<&Value> = Vec::new();
    for item in items {
        match item.get("id").and_then(Value::as_str) {
            Some(id) => {
                if !seen_ids.contains(&id) {
                    seen_ids.push(id);
                    unique.push(item);
                }
            }
            None => unique.push(item),
        }
    }

    let labels: Vec<String> = unique
        .iter()
        .take(DETAIL_CAP)
        .map(|item| entity_label(item))
        .collect();

    let mut summary = format!("{} records: {}", unique.len(), labels.join("; "));
    if unique.len() > DETAIL_CAP {
        summary.push_str(&format!(
            " and {} more",
            unique.len().saturating_sub(DETAIL_CAP)
        ));
    }
    if !seen_ids.is_empty() {
        let shown: Vec<&str> = seen_ids.iter().take(ID_CAP).copied().collect();
        summary.push_str(&format!(" [ids: {}]", shown.join(", ")));
    }
    summary
}

fn summarize_entity(value: &Value) -> String {
    let mut summary = entity_label(value);
    for key in ["status", "stage", "email", "amount"] {
        if let Some(field) = value.get(key) {
            if !field.is_null() {
                summary.push_str(&format!(", {key}={}", render_scalar(field)));
            }
        }
    }
    summary
}

fn entity_label(value: &Value) -> String {
    let id = value.get("id").and_then(Value::as_str).unwrap_or("?");
    let name = value
        .get("name")
        .or_else(|| value.get("title"))
        .and_then(Value::as_str);
    let first = value.get("first_name").and_then(Value::as_str);
    let last = value.get("last_name").and_then(Value::as_str);

    match (name, first, last) {
        (Some(name), _, _) => format!("{name} ({id})"),
        (None, Some(first), Some(last)) => format!("{first} {last} ({id})"),
        _ => format!("({id})"),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn summarize_error(error: &EngineError) -> String {
    match error {
        EngineError::NotFound { message, .. } => format!("Not found: {message}"),
        EngineError::Validation { message, .. } => format!("Invalid input: {message}"),
        EngineError::PermissionDenied { message } => format!("Access denied: {message}"),
        EngineError::Authorization { message } => format!("Access denied: {message}"),
        EngineError::InsufficientPermissions { message } => format!("Access denied: {message}"),
        EngineError::Network { message } => format!("Network error: {message}"),
        EngineError::Database { message } => format!("Server error: {message}"),
        EngineError::RateLimitExceeded {
            retry_after_secs, ..
        } => format!("Rate limited; retry in {retry_after_secs}s"),
        EngineError::ConfirmationRequired { message, .. } => {
            format!("Confirmation required: {message}")
        }
        EngineError::Api { message, code } => match code {
            Some(400) => format!("Invalid request: {message}"),
            Some(401 | 403) => format!("Access denied: {message}"),
            Some(404) => format!("Not found: {message}"),
            Some(status) if *status >= 500 => format!("Server error: {message}"),
            _ => format!("API error: {message}"),
        },
        other => format!("{}: {other}", other.kind()),
    }
}
