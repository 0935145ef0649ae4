//! Postgres-backed audit store.
//!
//! Rows land in the `tool_audit_log` table owned by the host's migrations.
//! The store is write-only from the engine's point of view; retention and
//! querying belong to the host.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{AuditError, AuditRecord, AuditStore};

/// Audit store appending to Postgres.
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let execution_time_ms =
            i64::try_from(record.execution_time_ms).unwrap_or(i64::MAX);

        sqlx::query(
            r"
            INSERT INTO tool_audit_log (
                tool, braid_function, braid_file, policy, tool_class,
                tenant_id, user_id, user_email, user_role,
                input_args, result_tag, result_value,
                error_type, error_message,
                execution_time_ms, cache_hit,
                entity_type, entity_id, created_at
            )
            VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9,
                $10, $11, $12,
                $13, $14,
                $15, $16,
                $17, $18, $19
            )
            ",
        )
        .bind(&record.tool)
        .bind(&record.braid_function)
        .bind(&record.braid_file)
        .bind(&record.policy)
        .bind(&record.tool_class)
        .bind(record.tenant_id)
        .bind(record.user_id)
        .bind(&record.user_email)
        .bind(&record.user_role)
        .bind(&record.input_args)
        .bind(&record.result_tag)
        .bind(&record.result_value)
        .bind(&record.error_type)
        .bind(&record.error_message)
        .bind(execution_time_ms)
        .bind(record.cache_hit)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::WriteFailed(e.to_string()))?;

        Ok(())
    }
}
