//! Entity graph storage and bounded expansion
//!
//! Enrichment results append-merge entities, relationships and per-document
//! mention counts; the read side is a bounded breadth-first traversal with
//! explicit caps on entity count and wall-clock time.

use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, Row};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::pool_manager::PoolManager;

/// An entity extracted by enrichment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
}

/// A directed relationship between two entities, by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRecord {
    pub source: String,
    pub target: String,
    pub rel_type: String,
}

/// Parse entities and relationships out of a tier-2 metadata blob
///
/// Anything that does not match the expected shape is skipped; enrichment
/// workers vary in what they emit.
pub fn parse_graph_payload(tier2: &JsonValue) -> (Vec<EntityRecord>, Vec<RelationshipRecord>) {
    let mut entities = Vec::new();
    if let Some(raw) = tier2.get("entities").and_then(JsonValue::as_array) {
        for item in raw {
            let Some(name) = item.get("name").and_then(JsonValue::as_str) else {
                continue;
            };
            if name.trim().is_empty() {
                continue;
            }
            entities.push(EntityRecord {
                name: name.to_string(),
                entity_type: item
                    .get("type")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                description: item
                    .get("description")
                    .and_then(JsonValue::as_str)
                    .map(ToString::to_string),
            });
        }
    }

    let mut relationships = Vec::new();
    if let Some(raw) = tier2.get("relationships").and_then(JsonValue::as_array) {
        for item in raw {
            let (Some(source), Some(target)) = (
                item.get("source").and_then(JsonValue::as_str),
                item.get("target").and_then(JsonValue::as_str),
            ) else {
                continue;
            };
            relationships.push(RelationshipRecord {
                source: source.to_string(),
                target: target.to_string(),
                rel_type: item
                    .get("type")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("related_to")
                    .to_string(),
            });
        }
    }

    (entities, relationships)
}

/// Append-merge a result's graph payload inside the caller's transaction
///
/// Entities upsert by name (a longer description wins), relationships insert
/// once per `(source, target, type)`, and the document's mention count bumps
/// per entity.
pub async fn merge_graph(
    conn: &mut PgConnection,
    document_id: Uuid,
    entities: &[EntityRecord],
    relationships: &[RelationshipRecord],
) -> DatabaseResult<()> {
    let operation = DatabaseOperation::MergeEntities {
        entity_count: entities.len(),
    };

    for entity in entities {
        sqlx::query(
            r"
            INSERT INTO entities (name, entity_type, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                entity_type = EXCLUDED.entity_type,
                description = CASE
                    WHEN COALESCE(LENGTH(EXCLUDED.description), 0)
                         > COALESCE(LENGTH(entities.description), 0)
                    THEN EXCLUDED.description
                    ELSE entities.description
                END,
                updated_at = NOW()
            ",
        )
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(&entity.description)
        .execute(&mut *conn)
        .await
        .map_db_err(operation.clone(), None)?;

        sqlx::query(
            r"
            INSERT INTO entity_mentions (entity_id, document_id, mention_count)
            SELECT id, $2, 1 FROM entities WHERE name = $1
            ON CONFLICT (entity_id, document_id) DO UPDATE SET
                mention_count = entity_mentions.mention_count + 1
            ",
        )
        .bind(&entity.name)
        .bind(document_id)
        .execute(&mut *conn)
        .await
        .map_db_err(operation.clone(), None)?;
    }

    for rel in relationships {
        sqlx::query(
            r"
            INSERT INTO entity_relationships (source_id, target_id, rel_type)
            SELECT s.id, t.id, $3
            FROM entities s, entities t
            WHERE s.name = $1 AND t.name = $2
            ON CONFLICT (source_id, target_id, rel_type) DO NOTHING
            ",
        )
        .bind(&rel.source)
        .bind(&rel.target)
        .bind(&rel.rel_type)
        .execute(&mut *conn)
        .await
        .map_db_err(operation.clone(), None)?;
    }

    Ok(())
}

/// Limits for the read-side traversal
#[derive(Debug, Clone, Copy)]
pub struct ExpandLimits {
    pub depth: usize,
    pub max_entities: usize,
    pub deadline: Duration,
}

impl Default for ExpandLimits {
    fn default() -> Self {
        Self {
            depth: 2,
            max_entities: 50,
            deadline: Duration::from_millis(2000),
        }
    }
}

/// One entity in an expansion result, with the documents mentioning it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEntity {
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
    pub documents: Vec<String>,
}

/// A neighbour reached during expansion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNeighbor {
    pub entity: GraphEntity,
    pub rel_type: String,
    /// "out" when the seed side is the relationship source, else "in"
    pub direction: String,
    pub depth: usize,
}

/// Traversal bookkeeping surfaced to the caller
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMeta {
    pub capped: bool,
    pub timed_out: bool,
    pub warnings: Vec<String>,
}

/// A discovered path from the seed, as entity names
#[derive(Debug, Clone, Serialize)]
pub struct GraphPath {
    pub nodes: Vec<String>,
}

/// The expansion result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNeighborhood {
    pub entity: GraphEntity,
    pub neighbors: Vec<GraphNeighbor>,
    pub paths: Vec<GraphPath>,
    pub meta: GraphMeta,
}

/// Read-side store over the entity graph tables
pub struct EntityGraphStore {
    pools: PoolManager,
}

impl EntityGraphStore {
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }

    /// Expand the neighbourhood of a seed entity by name
    ///
    /// Returns `None` when no entity carries the name. Traversal stops at
    /// the depth, entity-count cap or deadline, whichever hits first; the
    /// `meta` record says which.
    pub async fn expand(
        &self,
        name: &str,
        limits: ExpandLimits,
    ) -> DatabaseResult<Option<GraphNeighborhood>> {
        let operation = DatabaseOperation::ExpandEntity {
            name: name.to_string(),
        };
        let started = Instant::now();

        let seed = sqlx::query(
            "SELECT id, name, entity_type, description FROM entities WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pools.read_pool())
        .await
        .map_db_err(operation.clone(), None)?;

        let Some(seed) = seed else {
            return Ok(None);
        };
        let seed_id: Uuid = seed.get("id");

        let mut meta = GraphMeta::default();
        let mut visited: HashSet<Uuid> = HashSet::from([seed_id]);
        // Path back to the seed per discovered entity, as names
        let mut trails: HashMap<Uuid, Vec<String>> = HashMap::new();
        trails.insert(seed_id, vec![name.to_string()]);

        let mut neighbors: Vec<(Uuid, String, String, usize)> = Vec::new();
        let mut frontier = vec![seed_id];

        'levels: for depth in 1..=limits.depth {
            if frontier.is_empty() {
                break;
            }
            if started.elapsed() >= limits.deadline {
                meta.timed_out = true;
                meta.warnings
                    .push(format!("traversal deadline hit at depth {depth}"));
                break;
            }

            let rows = sqlx::query(
                r"
                SELECT r.source_id, r.target_id, r.rel_type,
                       s.name AS source_name, t.name AS target_name
                FROM entity_relationships r
                JOIN entities s ON s.id = r.source_id
                JOIN entities t ON t.id = r.target_id
                WHERE r.source_id = ANY($1) OR r.target_id = ANY($1)
                ORDER BY r.created_at
                ",
            )
            .bind(&frontier)
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation.clone(), None)?;

            let previous_frontier: HashSet<Uuid> = frontier.iter().copied().collect();
            let mut next_frontier = Vec::new();

            for row in rows {
                let source_id: Uuid = row.get("source_id");
                let target_id: Uuid = row.get("target_id");
                let rel_type: String = row.get("rel_type");

                let (anchor, other, other_name, direction) =
                    if previous_frontier.contains(&source_id) {
                        let name: String = row.get("target_name");
                        (source_id, target_id, name, "out")
                    } else {
                        let name: String = row.get("source_name");
                        (target_id, source_id, name, "in")
                    };

                if !visited.insert(other) {
                    continue;
                }
                if visited.len() > limits.max_entities {
                    meta.capped = true;
                    meta.warnings
                        .push(format!("entity cap {} reached", limits.max_entities));
                    break 'levels;
                }

                let mut trail = trails.get(&anchor).cloned().unwrap_or_default();
                trail.push(other_name);
                trails.insert(other, trail);
                neighbors.push((other, rel_type, direction.to_string(), depth));
                next_frontier.push(other);
            }

            frontier = next_frontier;
        }

        // Hydrate every touched entity plus its mentioning documents.
        let all_ids: Vec<Uuid> = visited.iter().copied().collect();
        let entity_rows = sqlx::query(
            "SELECT id, name, entity_type, description FROM entities WHERE id = ANY($1)",
        )
        .bind(&all_ids)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation.clone(), None)?;

        let mention_rows = sqlx::query(
            r"
            SELECT em.entity_id, d.base_id
            FROM entity_mentions em
            JOIN documents d ON d.id = em.document_id
            WHERE em.entity_id = ANY($1)
            ORDER BY em.mention_count DESC
            ",
        )
        .bind(&all_ids)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;

        let mut mentions: HashMap<Uuid, Vec<String>> = HashMap::new();
        for row in mention_rows {
            let entity_id: Uuid = row.get("entity_id");
            mentions.entry(entity_id).or_default().push(row.get("base_id"));
        }

        let mut hydrated: HashMap<Uuid, GraphEntity> = entity_rows
            .iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                let entity = GraphEntity {
                    name: row.get("name"),
                    entity_type: row.get("entity_type"),
                    description: row.get("description"),
                    documents: mentions.remove(&id).unwrap_or_default(),
                };
                (id, entity)
            })
            .collect();

        let Some(seed_entity) = hydrated.remove(&seed_id) else {
            return Ok(None);
        };

        let paths = neighbors
            .iter()
            .filter_map(|(id, _, _, _)| trails.get(id))
            .filter(|trail| trail.len() > 1)
            .map(|trail| GraphPath {
                nodes: trail.clone(),
            })
            .collect();

        let neighbors = neighbors
            .into_iter()
            .filter_map(|(id, rel_type, direction, depth)| {
                hydrated.remove(&id).map(|entity| GraphNeighbor {
                    entity,
                    rel_type,
                    direction,
                    depth,
                })
            })
            .collect();

        Ok(Some(GraphNeighborhood {
            entity: seed_entity,
            neighbors,
            paths,
            meta,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_entities_and_relationships() {
        let (entities, relationships) = parse_graph_payload(&json!({
            "entities": [
                {"name": "Tokio", "type": "library", "description": "async runtime"},
                {"name": "", "type": "noise"},
                {"nope": true}
            ],
            "relationships": [
                {"source": "Tokio", "target": "Rust", "type": "written_in"},
                {"source": "orphan"}
            ]
        }));

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Tokio");
        assert_eq!(entities[0].entity_type, "library");
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].rel_type, "written_in");
    }

    #[test]
    fn missing_sections_parse_to_empty() {
        let (entities, relationships) = parse_graph_payload(&json!({"keywords": ["x"]}));
        assert!(entities.is_empty());
        assert!(relationships.is_empty());
    }

    #[test]
    fn relationship_type_defaults() {
        let (_, relationships) = parse_graph_payload(&json!({
            "relationships": [{"source": "a", "target": "b"}]
        }));
        assert_eq!(relationships[0].rel_type, "related_to");
    }
}
