//! Role-gated redaction of sensitive fields on successful read payloads.
//!
//! The filter walks arbitrary payload shapes (objects, arrays, nesting)
//! without schema knowledge, dropping any field whose minimum role rank
//! exceeds the caller's. Entity recognition doubles as the audit sink's
//! entity tagger.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::types::Role;

/// Entity families, in recognition order, with their tool-name patterns.
const ENTITY_NAME_PATTERNS: &[(&str, &str)] = &[
    ("employee", r"(^|_)employees?($|_)"),
    ("user", r"(^|_)users?($|_)"),
    ("account", r"(^|_)accounts?($|_)"),
    ("contact", r"(^|_)contacts?($|_)"),
    ("lead", r"(^|_)leads?($|_)"),
    ("opportunity", r"(^|_)opportunit(?:y|ies)($|_)"),
    ("activity", r"(^|_)activit(?:y|ies)($|_)"),
    ("document", r"(^|_)documents?($|_)"),
    ("bizdev", r"(^|_)bizdev($|_)"),
    ("note", r"(^|_)notes?($|_)"),
];

fn compiled_patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ENTITY_NAME_PATTERNS
            .iter()
            .map(|(entity, pattern)| (*entity, Regex::new(pattern).expect("static entity pattern")))
            .collect()
    })
}

/// The entity family a tool name refers to, when recognizable.
pub fn recognize_entity(tool: &str) -> Option<&'static str> {
    compiled_patterns()
        .iter()
        .find(|(_, re)| re.is_match(tool))
        .map(|(entity, _)| *entity)
}

/// Role-gated sensitive-field table and the redaction pass over payloads.
pub struct FieldFilter {
    rules: HashMap<&'static str, Vec<(&'static str, Role)>>,
}

impl FieldFilter {
    /// The built-in sensitive-field catalog.
    pub fn builtin() -> Self {
        let mut rules: HashMap<&'static str, Vec<(&'static str, Role)>> = HashMap::new();
        rules.insert(
            "employee",
            vec![
                ("salary", Role::Admin),
                ("compensation_notes", Role::Admin),
                ("ssn", Role::Superadmin),
                ("home_address", Role::Manager),
                ("date_of_birth", Role::Manager),
            ],
        );
        rules.insert(
            "user",
            vec![
                ("password_hash", Role::System),
                ("mfa_secret", Role::System),
                ("last_login_ip", Role::Admin),
            ],
        );
        rules.insert(
            "account",
            vec![
                ("annual_revenue", Role::Manager),
                ("credit_rating", Role::Admin),
                ("internal_notes", Role::Manager),
            ],
        );
        rules.insert(
            "contact",
            vec![
                ("personal_phone", Role::Manager),
                ("personal_email", Role::Manager),
                ("private_notes", Role::Admin),
            ],
        );
        rules.insert(
            "lead",
            vec![
                ("revenue_estimate", Role::Manager),
                ("internal_score_notes", Role::Manager),
            ],
        );
        rules.insert(
            "opportunity",
            vec![
                ("margin", Role::Manager),
                ("commission_split", Role::Admin),
                ("discount_floor", Role::Admin),
            ],
        );
        rules.insert("activity", vec![("private_comment", Role::Manager)]);
        rules.insert(
            "document",
            vec![("storage_path", Role::Admin), ("signed_url", Role::Admin)],
        );
        rules.insert("bizdev", vec![("acquisition_cost", Role::Manager)]);
        rules.insert("note", vec![("private_body", Role::Manager)]);
        Self { rules }
    }

    /// Redact a successful payload for the caller's role.
    ///
    /// Unrecognized tools pass through untouched. Recognized payloads are
    /// walked recursively; arrays of records are filtered element-wise.
    pub fn apply(&self, tool: &str, payload: Value, role: Role) -> Value {
        let Some(entity) = recognize_entity(tool) else {
            return payload;
        };
        let Some(fields) = self.rules.get(entity) else {
            return payload;
        };
        redact(payload, fields, role)
    }
}

fn redact(value: Value, fields: &[(&'static str, Role)], role: Role) -> Value {
    match value {
        Value::Object(map) => {
            let kept = map
                .into_iter()
                .filter(|(key, _)| {
                    fields
                        .iter()
                        .find(|(name, _)| name == key)
                        .is_none_or(|(_, floor)| role.rank() >= floor.rank())
                })
                .map(|(key, child)| (key, redact(child, fields, role)))
                .collect();
            Value::Object(kept)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| redact(item, fields, role))
                .collect(),
        ),
        scalar => scalar,
    }
}
