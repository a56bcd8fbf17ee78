// Assignment - strategy-driven owner selection for incoming records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::workflows::{evaluate_all, lookup_path, Condition, StoreError, WorkflowStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    RoundRobin,
    Territory,
    LoadBalanced,
    Criteria,
}

/// A prioritized rule mapping matching records of one entity type to a
/// candidate pool via a selection strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub entity_type: String,
    pub strategy: AssignmentStrategy,
    pub criteria: Vec<Condition>,
    pub candidate_ids: Vec<Uuid>,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AssignmentRule {
    pub fn new(
        tenant_id: &str,
        name: &str,
        entity_type: &str,
        strategy: AssignmentStrategy,
        candidate_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            strategy,
            criteria: Vec::new(),
            candidate_ids,
            priority: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_criteria(mut self, criteria: Vec<Condition>) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A user eligible to own records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub active: bool,
    /// Covered territory codes for the territory strategy.
    pub territories: Vec<String>,
}

impl Candidate {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            active: true,
            territories: Vec::new(),
        }
    }

    pub fn with_territories(mut self, territories: Vec<&str>) -> Self {
        self.territories = territories.iter().map(|t| t.to_string()).collect();
        self
    }
}

#[derive(Clone)]
pub struct AssignmentSelector {
    store: Arc<dyn WorkflowStore>,
}

impl AssignmentSelector {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Walk the active rules for an entity type by descending priority
    /// and return the first assignee a matching rule selects. Records
    /// that already carry an owner are left alone.
    pub async fn evaluate_rules(
        &self,
        tenant_id: &str,
        entity_type: &str,
        record: &serde_json::Value,
    ) -> Result<Option<Uuid>, StoreError> {
        if has_owner(record) {
            debug!("Record already owned, skipping assignment rules");
            return Ok(None);
        }

        for rule in self.store.assignment_rules(tenant_id, entity_type).await? {
            if !evaluate_all(&rule.criteria, record) {
                continue;
            }
            if let Some(assignee) = self.select(&rule, record).await? {
                info!("Assignment rule '{}' selected assignee {}", rule.name, assignee);
                return Ok(Some(assignee));
            }
        }

        Ok(None)
    }

    /// Pick an assignee from the rule's currently active candidate pool.
    /// An empty or unmatched pool yields `None`, never an error.
    pub async fn select(
        &self,
        rule: &AssignmentRule,
        record: &serde_json::Value,
    ) -> Result<Option<Uuid>, StoreError> {
        let pool = self.active_pool(rule).await?;
        if pool.is_empty() {
            return Ok(None);
        }

        match rule.strategy {
            AssignmentStrategy::RoundRobin => {
                let slot = self.store.advance_round_robin(rule.id, pool.len()).await?;
                Ok(Some(pool[slot].id))
            }
            AssignmentStrategy::Territory => {
                let location = record_location(record);
                let location = match location {
                    Some(l) => l,
                    None => return Ok(None),
                };
                Ok(pool
                    .iter()
                    .find(|c| c.territories.iter().any(|t| t == &location))
                    .map(|c| c.id))
            }
            AssignmentStrategy::LoadBalanced => {
                let mut best: Option<(&Candidate, i64)> = None;
                for candidate in &pool {
                    let open = self
                        .store
                        .count_open_assignments(&rule.entity_type, candidate.id)
                        .await?;
                    // strictly-less keeps pool order as the tie breaker
                    if best.map(|(_, count)| open < count).unwrap_or(true) {
                        best = Some((candidate, open));
                    }
                }
                Ok(best.map(|(c, _)| c.id))
            }
            AssignmentStrategy::Criteria => Ok(Some(pool[0].id)),
        }
    }

    /// Active candidates in the rule's pool order.
    async fn active_pool(&self, rule: &AssignmentRule) -> Result<Vec<Candidate>, StoreError> {
        let fetched = self.store.get_candidates(&rule.candidate_ids).await?;
        let by_id: HashMap<Uuid, Candidate> =
            fetched.into_iter().map(|c| (c.id, c)).collect();

        Ok(rule
            .candidate_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .filter(|c| c.active)
            .cloned()
            .collect())
    }
}

fn has_owner(record: &serde_json::Value) -> bool {
    ["owner", "owner_id"].iter().any(|field| {
        record
            .get(field)
            .map(|v| !v.is_null())
            .unwrap_or(false)
    })
}

fn record_location(record: &serde_json::Value) -> Option<String> {
    lookup_path(record, "country")
        .or_else(|| lookup_path(record, "address.country"))
        .and_then(|v| v.as_str().map(|s| s.to_string()))
}
