//! Default hierarchy seeding for new tenants

use crate::client::BoundClient;
use crate::errors::{Result, TenancyError};
use serde_json::{Value, json};
use std::collections::BTreeSet;

const QUERY_HIERARCHY_NAMES: &str = "query { queryHierarchy { id name levels { levelNumber } } }";

const ADD_HIERARCHY: &str = r#"
mutation SeedHierarchy($input: [AddHierarchyInput!]!) {
  addHierarchy(input: $input) {
    hierarchy { id name }
  }
}
"#;

/// One level of a seeded hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedLevel {
    pub number: i64,
    pub label: &'static str,
    pub allowed_types: &'static [&'static str],
}

/// Hierarchy created in every new tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedHierarchy {
    pub name: &'static str,
    pub levels: &'static [SeedLevel],
}

pub const DEFAULT_HIERARCHIES: &[SeedHierarchy] = &[SeedHierarchy {
    name: "Primary Knowledge Graph",
    levels: &[
        SeedLevel {
            number: 1,
            label: "Domain",
            allowed_types: &["DomainNode"],
        },
        SeedLevel {
            number: 2,
            label: "Concept",
            allowed_types: &["ConceptNode"],
        },
        SeedLevel {
            number: 3,
            label: "Example",
            allowed_types: &["ExampleNode"],
        },
    ],
}];

impl SeedHierarchy {
    fn input(&self) -> Value {
        let levels: Vec<Value> = self
            .levels
            .iter()
            .map(|level| {
                json!({
                    "levelNumber": level.number,
                    "label": level.label,
                    "allowedTypes": level
                        .allowed_types
                        .iter()
                        .map(|name| json!({ "typeName": name }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({ "name": self.name, "levels": levels })
    }
}

/// Names of hierarchies present in the namespace, with their level numbers
async fn existing(client: &BoundClient) -> Result<Vec<(String, BTreeSet<i64>)>> {
    let data = client.execute(QUERY_HIERARCHY_NAMES, None).await?;
    let Some(items) = data.get("queryHierarchy").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|h| {
            let name = h.get("name")?.as_str()?.to_string();
            let levels = h
                .get("levels")
                .and_then(Value::as_array)
                .map(|ls| {
                    ls.iter()
                        .filter_map(|l| l.get("levelNumber").and_then(Value::as_i64))
                        .collect()
                })
                .unwrap_or_default();
            Some((name, levels))
        })
        .collect())
}

/// Create missing hierarchies, then read them back.
pub(super) async fn seed_defaults(client: &BoundClient, plan: &[SeedHierarchy]) -> Result<usize> {
    let present = existing(client)
        .await
        .map_err(|e| TenancyError::seed_with_source("failed to list existing hierarchies", e))?;

    let missing: Vec<&SeedHierarchy> = plan
        .iter()
        .filter(|h| !present.iter().any(|(name, _)| name == h.name))
        .collect();

    if !missing.is_empty() {
        let input: Vec<Value> = missing.iter().copied().map(SeedHierarchy::input).collect();
        client
            .execute(ADD_HIERARCHY, Some(&json!({ "input": input })))
            .await
            .map_err(|e| TenancyError::seed_with_source("failed to create default hierarchies", e))?;
        tracing::info!(
            namespace = %client.namespace(),
            created = missing.len(),
            "Seeded default hierarchies"
        );
    }

    verify(client, plan).await?;
    Ok(missing.len())
}

async fn verify(client: &BoundClient, plan: &[SeedHierarchy]) -> Result<()> {
    let present = existing(client)
        .await
        .map_err(|e| TenancyError::seed_with_source("failed to read back seeded hierarchies", e))?;

    for hierarchy in plan {
        let Some((_, levels)) = present.iter().find(|(name, _)| name == hierarchy.name) else {
            return Err(TenancyError::seed(format!(
                "hierarchy '{}' missing after seeding",
                hierarchy.name
            )));
        };
        let absent: Vec<i64> = hierarchy
            .levels
            .iter()
            .map(|l| l.number)
            .filter(|n| !levels.contains(n))
            .collect();
        if !absent.is_empty() {
            return Err(TenancyError::seed(format!(
                "hierarchy '{}' missing levels {absent:?} after seeding",
                hierarchy.name
            )));
        }
    }
    Ok(())
}
