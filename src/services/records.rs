// Record Service - typed entity updates and record creation for actions
//
// Entity updates go through an explicit registry of entity tags and
// writable fields; there is no reflective "any model, any field" path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),
    #[error("field '{field}' is not writable on entity '{entity}'")]
    UnknownField { entity: String, field: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Writable fields per entity tag, with the backing table name.
const ENTITY_REGISTRY: &[(&str, &str, &[&str])] = &[
    ("lead", "leads", &["status", "rating", "source", "owner_id", "country"]),
    ("contact", "contacts", &["email", "phone", "owner_id"]),
    ("account", "accounts", &["industry", "tier", "owner_id"]),
    ("deal", "deals", &["stage", "amount", "owner_id"]),
    ("case", "cases", &["status", "priority", "owner_id"]),
];

fn registry_entry(entity_type: &str) -> Option<(&'static str, &'static [&'static str])> {
    ENTITY_REGISTRY
        .iter()
        .find(|(tag, _, _)| *tag == entity_type)
        .map(|(_, table, fields)| (*table, *fields))
}

/// Validate an update against the registry, returning the table name.
pub fn resolve_update(entity_type: &str, field: &str) -> Result<&'static str, RecordError> {
    let (table, fields) =
        registry_entry(entity_type).ok_or_else(|| RecordError::UnknownEntity(entity_type.to_string()))?;
    if !fields.contains(&field) {
        return Err(RecordError::UnknownField {
            entity: entity_type.to_string(),
            field: field.to_string(),
        });
    }
    Ok(table)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<Uuid>,
    pub related_to: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSpec {
    pub subject: String,
    pub description: Option<String>,
    pub priority: String,
    pub account_id: Option<Uuid>,
}

/// A suggested follow-up surfaced to the record owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbaSpec {
    pub title: String,
    pub description: Option<String>,
    pub score: i32,
    pub related_to: Option<serde_json::Value>,
}

/// Record creation/update seam used by the action dispatcher.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn update_field(
        &self,
        entity_type: &str,
        record_id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), RecordError>;
    async fn create_task(&self, tenant_id: &str, task: TaskSpec) -> Result<Uuid, RecordError>;
    async fn create_case(&self, tenant_id: &str, case: CaseSpec) -> Result<Uuid, RecordError>;
    async fn create_next_best_action(
        &self,
        tenant_id: &str,
        nba: NbaSpec,
    ) -> Result<Uuid, RecordError>;
}

fn value_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct PgRecords {
    db_pool: PgPool,
}

impl PgRecords {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RecordService for PgRecords {
    async fn update_field(
        &self,
        entity_type: &str,
        record_id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), RecordError> {
        let table = resolve_update(entity_type, field)?;

        // table and column both come from the static registry
        let query = format!(
            "UPDATE {} SET {} = $2, updated_at = NOW() WHERE id = $1",
            table, field
        );
        sqlx::query(&query)
            .bind(record_id)
            .bind(value_as_text(value))
            .execute(&self.db_pool)
            .await?;

        info!("Updated {}.{} on {}", entity_type, field, record_id);
        Ok(())
    }

    async fn create_task(&self, tenant_id: &str, task: TaskSpec) -> Result<Uuid, RecordError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tasks (id, tenant_id, title, description, due_date, assignee_id, related_to, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.due_date)
        .bind(task.assignee)
        .bind(&task.related_to)
        .execute(&self.db_pool)
        .await?;

        Ok(id)
    }

    async fn create_case(&self, tenant_id: &str, case: CaseSpec) -> Result<Uuid, RecordError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO cases (id, tenant_id, subject, description, priority, account_id, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'open', NOW())",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&case.subject)
        .bind(&case.description)
        .bind(&case.priority)
        .bind(case.account_id)
        .execute(&self.db_pool)
        .await?;

        Ok(id)
    }

    async fn create_next_best_action(
        &self,
        tenant_id: &str,
        nba: NbaSpec,
    ) -> Result<Uuid, RecordError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO next_best_actions (id, tenant_id, title, description, score, related_to, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&nba.title)
        .bind(&nba.description)
        .bind(nba.score)
        .bind(&nba.related_to)
        .execute(&self.db_pool)
        .await?;

        Ok(id)
    }
}

/// In-memory record sink used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryRecords {
    pub updates: std::sync::Mutex<Vec<(String, Uuid, String, serde_json::Value)>>,
    pub tasks: std::sync::Mutex<Vec<TaskSpec>>,
    pub cases: std::sync::Mutex<Vec<CaseSpec>>,
    pub nbas: std::sync::Mutex<Vec<NbaSpec>>,
}

#[cfg(test)]
fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[async_trait]
impl RecordService for MemoryRecords {
    async fn update_field(
        &self,
        entity_type: &str,
        record_id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), RecordError> {
        resolve_update(entity_type, field)?;
        lock(&self.updates).push((
            entity_type.to_string(),
            record_id,
            field.to_string(),
            value.clone(),
        ));
        Ok(())
    }

    async fn create_task(&self, _tenant_id: &str, task: TaskSpec) -> Result<Uuid, RecordError> {
        lock(&self.tasks).push(task);
        Ok(Uuid::new_v4())
    }

    async fn create_case(&self, _tenant_id: &str, case: CaseSpec) -> Result<Uuid, RecordError> {
        lock(&self.cases).push(case);
        Ok(Uuid::new_v4())
    }

    async fn create_next_best_action(
        &self,
        _tenant_id: &str,
        nba: NbaSpec,
    ) -> Result<Uuid, RecordError> {
        lock(&self.nbas).push(nba);
        Ok(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_known_fields() {
        assert_eq!(resolve_update("lead", "rating").unwrap(), "leads");
        assert_eq!(resolve_update("deal", "stage").unwrap(), "deals");
    }

    #[test]
    fn test_registry_rejects_unknown_entity() {
        assert!(matches!(
            resolve_update("spaceship", "name"),
            Err(RecordError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_registry_rejects_unlisted_field() {
        assert!(matches!(
            resolve_update("lead", "secret_column"),
            Err(RecordError::UnknownField { .. })
        ));
    }
}
