//! Ordered, best-effort tenant teardown

use crate::client::BoundClient;
use crate::errors::Result;
use crate::namespace::NamespaceId;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdFilter {
    /// `ID!` fields filter with a plain list
    Uid,
    /// `@id` string fields filter through `in`
    External,
}

#[derive(Debug, Clone, Copy)]
struct TeardownStep {
    entity: &'static str,
    id_filter: IdFilter,
}

/// Dependents before the things they point at
const TEARDOWN_ORDER: [TeardownStep; 6] = [
    TeardownStep {
        entity: "HierarchyAssignment",
        id_filter: IdFilter::Uid,
    },
    TeardownStep {
        entity: "HierarchyLevelType",
        id_filter: IdFilter::Uid,
    },
    TeardownStep {
        entity: "HierarchyLevel",
        id_filter: IdFilter::Uid,
    },
    TeardownStep {
        entity: "Hierarchy",
        id_filter: IdFilter::Uid,
    },
    TeardownStep {
        entity: "Edge",
        id_filter: IdFilter::Uid,
    },
    TeardownStep {
        entity: "Node",
        id_filter: IdFilter::External,
    },
];

/// Entity names in deletion order
pub fn teardown_order() -> Vec<&'static str> {
    TEARDOWN_ORDER.iter().map(|s| s.entity).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub entity: &'static str,
    /// Ids listed before deleting
    pub found: usize,
    /// `numUids` reported by the delete mutations
    pub deleted: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub tenant_id: String,
    pub namespace: NamespaceId,
    pub steps: Vec<StepOutcome>,
}

impl DeletionReport {
    /// Every step ran without error
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn total_deleted(&self) -> u64 {
        self.steps.iter().map(|s| s.deleted).sum()
    }

    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.entity)
            .collect()
    }
}

impl TeardownStep {
    fn list_query(&self) -> String {
        format!("query {{ query{} {{ id }} }}", self.entity)
    }

    fn delete_mutation(&self) -> String {
        format!(
            "mutation Delete{entity}($filter: {entity}Filter!) {{ delete{entity}(filter: $filter) {{ numUids }} }}",
            entity = self.entity
        )
    }

    fn filter(&self, ids: &[String]) -> Value {
        match self.id_filter {
            IdFilter::Uid => json!({ "id": ids }),
            IdFilter::External => json!({ "id": { "in": ids } }),
        }
    }

    async fn list_ids(&self, client: &BoundClient) -> Result<Vec<String>> {
        let data = client.execute(&self.list_query(), None).await?;
        let field = format!("query{}", self.entity);
        Ok(data
            .get(&field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn run(&self, client: &BoundClient, batch_size: usize, outcome: &mut StepOutcome) -> Result<()> {
        let ids = self.list_ids(client).await?;
        outcome.found = ids.len();

        let mutation = self.delete_mutation();
        let field = format!("delete{}", self.entity);
        for batch in ids.chunks(batch_size.max(1)) {
            let variables = json!({ "filter": self.filter(batch) });
            let data = client.execute(&mutation, Some(&variables)).await?;
            outcome.deleted += data
                .get(&field)
                .and_then(|d| d.get("numUids"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
        }
        Ok(())
    }
}

/// Run every step in order. A failing step is recorded and the rest still run.
pub(super) async fn delete_all_entities(client: &BoundClient, batch_size: usize) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(TEARDOWN_ORDER.len());
    for step in TEARDOWN_ORDER {
        let mut outcome = StepOutcome {
            entity: step.entity,
            found: 0,
            deleted: 0,
            error: None,
        };
        match step.run(client, batch_size, &mut outcome).await {
            Ok(()) => tracing::info!(
                namespace = %client.namespace(),
                entity = step.entity,
                found = outcome.found,
                deleted = outcome.deleted,
                "Teardown step completed"
            ),
            Err(err) => {
                tracing::warn!(
                    namespace = %client.namespace(),
                    entity = step.entity,
                    error = %err,
                    "Teardown step failed, continuing"
                );
                outcome.error = Some(err.to_string());
            }
        }
        outcomes.push(outcome);
    }
    outcomes
}
