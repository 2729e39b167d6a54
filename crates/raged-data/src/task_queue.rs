//! PostgreSQL-backed enrichment task queue
//!
//! Implements the persistent, lease-based work queue using the SKIP LOCKED
//! pattern for concurrent worker processing. Tasks survive crashes; a
//! scheduled sweep releases expired leases.
//!
//! State machine per task: `pending -> processing -> (completed | pending |
//! dead)`. A task is never concurrently owned by two workers: the claim is
//! one atomic row update.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value as JsonValue, json};
use sqlx::Row;
use uuid::Uuid;

use crate::chunk_id::ChunkId;
use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::models::{ClaimedTask, QueueStats, Task, TaskPayload, TaskResult, TaskStatus};
use crate::pool_manager::PoolManager;

/// The single queue name this service uses
pub const QUEUE_NAME: &str = "enrichment";

/// Tuning knobs for the queue, taken from configuration at startup
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Lease duration granted on claim
    pub lease_seconds: i64,
    /// Attempt budget for newly enqueued tasks
    pub max_attempts: i32,
    /// Fixed delay before a failed task becomes eligible again
    pub retry_delay_seconds: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease_seconds: 300,
            max_attempts: 3,
            retry_delay_seconds: 60,
        }
    }
}

/// Queue operations for distributed enrichment workers
#[async_trait]
pub trait EnrichmentQueue: Send + Sync {
    /// Enqueue one task per payload
    ///
    /// Tasks are inserted with status='pending' and become immediately
    /// eligible for claiming.
    async fn enqueue(&self, payloads: &[TaskPayload]) -> DatabaseResult<usize>;

    /// Claim the oldest eligible task (SKIP LOCKED pattern)
    ///
    /// Atomically sets status='processing', `leased_until=now+lease` and
    /// `worker_id`. Returns the payload together with the fresh text of all
    /// chunks of the payload's document.
    async fn claim(&self, worker_id: &str) -> DatabaseResult<Option<ClaimedTask>>;

    /// Apply a worker's successful result
    ///
    /// Updates the chunk (status, tier2/tier3 metadata), promotes summary
    /// fields to the parent document, and marks the task completed. Rejects
    /// a malformed `chunkId` before touching any row.
    async fn submit_result(&self, task_id: Uuid, result: &TaskResult) -> DatabaseResult<()>;

    /// Record a worker-reported failure
    ///
    /// Below the attempt budget the task returns to pending after a fixed
    /// delay; at the budget it goes dead and the chunk is marked failed with
    /// an `_error` record in `tier3_meta`. Returns the resulting status.
    async fn fail(&self, task_id: Uuid, message: &str) -> DatabaseResult<TaskStatus>;

    /// Release expired leases back to pending without spending an attempt
    ///
    /// Returns the number of recovered tasks.
    async fn recover_stale(&self) -> DatabaseResult<u64>;

    /// Count tasks by status, optionally narrowed by collection and a text
    /// filter over `payload->>'text' | source | baseId | docType`
    async fn stats(
        &self,
        collection: Option<&str>,
        query: Option<&str>,
    ) -> DatabaseResult<QueueStats>;

    /// Bulk-delete pending/processing/dead tasks for a collection
    ///
    /// Completed tasks are never deleted. Returns the number of rows
    /// removed.
    async fn clear(&self, collection: &str, query: Option<&str>) -> DatabaseResult<u64>;
}

/// Split the summary fields out of a tier-3 metadata blob
///
/// Returns the stripped blob (with `summary*` and `_error` removed; `None`
/// when nothing remains) and the extracted document-level summaries, where
/// `summary` falls back to `summary_medium` when absent.
pub(crate) fn split_summaries(
    tier3: Option<&JsonValue>,
) -> (Option<JsonValue>, DocumentSummaries) {
    let Some(JsonValue::Object(map)) = tier3 else {
        return (tier3.cloned(), DocumentSummaries::default());
    };

    let mut stripped = map.clone();
    let summary = stripped.remove("summary").and_then(string_value);
    let summary_short = stripped.remove("summary_short").and_then(string_value);
    let summary_medium = stripped.remove("summary_medium").and_then(string_value);
    let summary_long = stripped.remove("summary_long").and_then(string_value);
    stripped.remove("_error");

    let summaries = DocumentSummaries {
        summary: summary.or_else(|| summary_medium.clone()),
        summary_short,
        summary_medium,
        summary_long,
    };

    let stripped = if stripped.is_empty() {
        None
    } else {
        Some(JsonValue::Object(stripped))
    };
    (stripped, summaries)
}

fn string_value(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s),
        _ => None,
    }
}

/// Document-level summaries promoted from a task result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DocumentSummaries {
    pub summary: Option<String>,
    pub summary_short: Option<String>,
    pub summary_medium: Option<String>,
    pub summary_long: Option<String>,
}

impl DocumentSummaries {
    fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.summary_short.is_none()
            && self.summary_medium.is_none()
            && self.summary_long.is_none()
    }
}

/// Build the `_error` record stored on a chunk when its task goes dead
pub(crate) fn error_record(
    message: &str,
    task_id: Uuid,
    attempt: i32,
    max_attempts: i32,
    chunk_index: i32,
    failed_at: chrono::DateTime<Utc>,
) -> JsonValue {
    json!({
        "message": message,
        "taskId": task_id.to_string(),
        "attempt": attempt,
        "maxAttempts": max_attempts,
        "final": true,
        "failedAt": failed_at.to_rfc3339(),
        "chunkIndex": chunk_index,
    })
}

/// Read the chunk index from a task payload: the `chunkIndex` field when
/// present, otherwise parsed from `chunkId`.
pub(crate) fn chunk_index_from_payload(payload: &JsonValue) -> Option<i32> {
    if let Some(index) = payload.get("chunkIndex").and_then(JsonValue::as_i64) {
        return i32::try_from(index).ok();
    }
    payload
        .get("chunkId")
        .and_then(JsonValue::as_str)
        .and_then(|raw| ChunkId::parse(raw).ok())
        .map(|id| id.index)
}

/// `PostgreSQL` implementation of the enrichment queue
pub struct PgEnrichmentQueue {
    pools: PoolManager,
    settings: QueueSettings,
}

impl PgEnrichmentQueue {
    pub const fn new(pools: PoolManager, settings: QueueSettings) -> Self {
        Self { pools, settings }
    }

    /// WHERE fragment for the payload text filter. `$N` is the filter
    /// parameter, matched by full-text over the payload text plus ILIKE over
    /// the searchable fields; the tsquery term is dropped on the ILIKE-only
    /// retry.
    fn payload_filter_sql(index: usize, with_tsquery: bool) -> String {
        let tsquery = if with_tsquery {
            format!(
                "to_tsvector('simple', payload->>'text') \
                 @@ websearch_to_tsquery('simple', ${index}) OR "
            )
        } else {
            String::new()
        };
        format!(
            "({tsquery}payload->>'text' ILIKE '%' || ${index} || '%' \
             OR payload->>'source' ILIKE '%' || ${index} || '%' \
             OR payload->>'baseId' ILIKE '%' || ${index} || '%' \
             OR payload->>'docType' ILIKE '%' || ${index} || '%')"
        )
    }
}

#[async_trait]
impl EnrichmentQueue for PgEnrichmentQueue {
    async fn enqueue(&self, payloads: &[TaskPayload]) -> DatabaseResult<usize> {
        if payloads.is_empty() {
            return Ok(0);
        }
        let operation = DatabaseOperation::EnqueueTasks {
            task_count: payloads.len(),
        };

        let values: Vec<JsonValue> = payloads
            .iter()
            .map(|p| serde_json::to_value(p).unwrap_or(JsonValue::Null))
            .collect();

        // One INSERT per batch; callers page the batches.
        sqlx::query(
            r"
            INSERT INTO enrichment_tasks (queue, status, payload, max_attempts, run_after)
            SELECT $1, 'pending', payload, $2, NOW()
            FROM UNNEST($3::jsonb[]) AS payload
            ",
        )
        .bind(QUEUE_NAME)
        .bind(self.settings.max_attempts)
        .bind(&values)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(payloads.len())
    }

    async fn claim(&self, worker_id: &str) -> DatabaseResult<Option<ClaimedTask>> {
        let operation = DatabaseOperation::ClaimTask {
            worker_id: worker_id.to_string(),
        };

        let now = Utc::now();
        #[allow(clippy::arithmetic_side_effects)]
        let leased_until = now + Duration::seconds(self.settings.lease_seconds);

        // SKIP LOCKED pattern: claim the oldest eligible task atomically.
        let row = sqlx::query_as::<_, Task>(
            r"
            WITH claimed AS (
                SELECT enrichment_tasks.id
                FROM enrichment_tasks
                WHERE status = 'pending'
                  AND run_after <= $1
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE enrichment_tasks
            SET status = 'processing',
                leased_until = $2,
                worker_id = $3
            FROM claimed
            WHERE enrichment_tasks.id = claimed.id
            RETURNING enrichment_tasks.*
            ",
        )
        .bind(now)
        .bind(leased_until)
        .bind(worker_id)
        .fetch_optional(self.pools.write_pool())
        .await
        .map_db_err(operation.clone(), None)?;

        let Some(task) = row else {
            return Ok(None);
        };

        // Workers computing document-level summaries need the fresh text of
        // every chunk of the payload's document.
        let collection = task
            .payload
            .get("collection")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let base_id = task
            .payload
            .get("baseId")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        let rows = sqlx::query(
            r"
            SELECT c.text
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = $1 AND d.base_id = $2
            ORDER BY c.chunk_index
            ",
        )
        .bind(&collection)
        .bind(&base_id)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;

        let document_chunks = rows.iter().map(|r| r.get("text")).collect();
        Ok(Some(ClaimedTask {
            task,
            document_chunks,
        }))
    }

    async fn submit_result(&self, task_id: Uuid, result: &TaskResult) -> DatabaseResult<()> {
        let chunk_id =
            ChunkId::parse(&result.chunk_id).map_err(|message| DatabaseError::ChunkIdInvalid {
                message,
            })?;

        let operation = DatabaseOperation::CompleteTask { task_id };

        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err(operation.clone(), None)?;

        let task_row = sqlx::query("SELECT payload FROM enrichment_tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;
        let Some(task_row) = task_row else {
            return Err(DatabaseError::NotFound {
                what: format!("task {task_id}"),
            });
        };
        let payload: JsonValue = task_row.get("payload");
        let collection = payload
            .get("collection")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        let (tier3_stripped, summaries) = split_summaries(result.tier3_meta.as_ref());

        let updated = sqlx::query(
            r"
            UPDATE chunks c
            SET enrichment_status = 'enriched',
                enriched_at = NOW(),
                tier2_meta = $1,
                tier3_meta = $2
            FROM documents d
            WHERE d.id = c.document_id
              AND d.collection = $3
              AND d.base_id = $4
              AND c.chunk_index = $5
            RETURNING d.id AS document_id
            ",
        )
        .bind(&result.tier2_meta)
        .bind(&tier3_stripped)
        .bind(&collection)
        .bind(&chunk_id.base_id)
        .bind(chunk_id.index)
        .fetch_optional(&mut *tx)
        .await
        .map_db_err(operation.clone(), None)?;

        let Some(updated) = updated else {
            return Err(DatabaseError::NotFound {
                what: format!("chunk {}", result.chunk_id),
            });
        };
        let document_id: Uuid = updated.get("document_id");

        // Entity graph payloads ride along in tier-2 metadata.
        if let Some(tier2) = &result.tier2_meta {
            let (entities, relationships) = crate::graph::parse_graph_payload(tier2);
            if !entities.is_empty() || !relationships.is_empty() {
                crate::graph::merge_graph(&mut *tx, document_id, &entities, &relationships)
                    .await?;
            }
        }

        if !summaries.is_empty() {
            sqlx::query(
                r"
                UPDATE documents
                SET summary = COALESCE($2, summary),
                    summary_short = COALESCE($3, summary_short),
                    summary_medium = COALESCE($4, summary_medium),
                    summary_long = COALESCE($5, summary_long),
                    updated_at = NOW()
                WHERE id = $1
                ",
            )
            .bind(document_id)
            .bind(&summaries.summary)
            .bind(&summaries.summary_short)
            .bind(&summaries.summary_medium)
            .bind(&summaries.summary_long)
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;
        }

        sqlx::query(
            r"
            UPDATE enrichment_tasks
            SET status = 'completed', completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_db_err(operation.clone(), None)?;

        tx.commit().await.map_db_err(operation, None)?;
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, message: &str) -> DatabaseResult<TaskStatus> {
        let operation = DatabaseOperation::FailTask { task_id };

        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err(operation.clone(), None)?;

        let row = sqlx::query(
            "SELECT attempt, max_attempts, payload FROM enrichment_tasks WHERE id = $1 FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_db_err(operation.clone(), None)?;
        let Some(row) = row else {
            return Err(DatabaseError::NotFound {
                what: format!("task {task_id}"),
            });
        };

        let attempt: i32 = row.get("attempt");
        let max_attempts: i32 = row.get("max_attempts");
        let payload: JsonValue = row.get("payload");

        if attempt < max_attempts {
            #[allow(clippy::arithmetic_side_effects)]
            let run_after = Utc::now() + Duration::seconds(self.settings.retry_delay_seconds);
            sqlx::query(
                r"
                UPDATE enrichment_tasks
                SET status = 'pending',
                    attempt = attempt + 1,
                    run_after = $2,
                    leased_until = NULL,
                    worker_id = NULL
                WHERE id = $1
                ",
            )
            .bind(task_id)
            .bind(run_after)
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;

            tx.commit().await.map_db_err(operation, None)?;
            return Ok(TaskStatus::Pending);
        }

        // Attempt budget exhausted: dead-letter the task and record the
        // failure on the chunk.
        sqlx::query(
            r"
            UPDATE enrichment_tasks
            SET status = 'dead', completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_db_err(operation.clone(), None)?;

        let collection = payload
            .get("collection")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let base_id = payload
            .get("baseId")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        if let Some(chunk_index) = chunk_index_from_payload(&payload) {
            let error = error_record(
                message,
                task_id,
                attempt,
                max_attempts,
                chunk_index,
                Utc::now(),
            );
            sqlx::query(
                r"
                UPDATE chunks c
                SET enrichment_status = 'failed',
                    tier3_meta = jsonb_set(COALESCE(c.tier3_meta, '{}'::jsonb),
                                           '{_error}', $1::jsonb)
                FROM documents d
                WHERE d.id = c.document_id
                  AND d.collection = $2
                  AND d.base_id = $3
                  AND c.chunk_index = $4
                ",
            )
            .bind(&error)
            .bind(&collection)
            .bind(&base_id)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;
        } else {
            tracing::warn!(%task_id, "dead task payload has no resolvable chunk index");
        }

        tx.commit().await.map_db_err(operation, None)?;
        Ok(TaskStatus::Dead)
    }

    async fn recover_stale(&self) -> DatabaseResult<u64> {
        let operation = DatabaseOperation::RecoverStaleTasks;
        let now = Utc::now();

        // The attempt counter is untouched: expiry is not the worker's
        // reported failure.
        let result = sqlx::query(
            r"
            UPDATE enrichment_tasks
            SET status = 'pending',
                leased_until = NULL,
                worker_id = NULL
            WHERE status = 'processing'
              AND leased_until < $1
            ",
        )
        .bind(now)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(result.rows_affected())
    }

    async fn stats(
        &self,
        collection: Option<&str>,
        query: Option<&str>,
    ) -> DatabaseResult<QueueStats> {
        match self.stats_inner(collection, query, true).await {
            Err(err) if err.is_tsquery_syntax() => {
                self.stats_inner(collection, query, false).await
            }
            other => other,
        }
    }

    async fn clear(&self, collection: &str, query: Option<&str>) -> DatabaseResult<u64> {
        match self.clear_inner(collection, query, true).await {
            Err(err) if err.is_tsquery_syntax() => {
                self.clear_inner(collection, query, false).await
            }
            other => other,
        }
    }
}

impl PgEnrichmentQueue {
    async fn stats_inner(
        &self,
        collection: Option<&str>,
        query: Option<&str>,
        with_tsquery: bool,
    ) -> DatabaseResult<QueueStats> {
        let operation = DatabaseOperation::Query {
            description: "queue_stats".to_string(),
        };

        let mut conditions = vec!["queue = $1".to_string()];
        if collection.is_some() {
            conditions.push("payload->>'collection' = $2".to_string());
        }
        if query.is_some() {
            let index = if collection.is_some() { 3 } else { 2 };
            conditions.push(Self::payload_filter_sql(index, with_tsquery));
        }

        let sql = format!(
            r"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'dead') AS dead
            FROM enrichment_tasks
            WHERE {}
            ",
            conditions.join(" AND ")
        );

        let mut q = sqlx::query(&sql).bind(QUEUE_NAME);
        if let Some(collection) = collection {
            q = q.bind(collection);
        }
        if let Some(query_text) = query {
            q = q.bind(query_text);
        }

        let row = q
            .fetch_one(self.pools.read_pool())
            .await
            .map_db_err(operation, None)?;

        Ok(QueueStats {
            pending: row.try_get("pending").unwrap_or(0),
            processing: row.try_get("processing").unwrap_or(0),
            completed: row.try_get("completed").unwrap_or(0),
            dead: row.try_get("dead").unwrap_or(0),
        })
    }

    async fn clear_inner(
        &self,
        collection: &str,
        query: Option<&str>,
        with_tsquery: bool,
    ) -> DatabaseResult<u64> {
        let operation = DatabaseOperation::ClearTasks {
            collection: collection.to_string(),
        };

        // Completed tasks are history, never cleared.
        let sql = if query.is_some() {
            format!(
                r"
                DELETE FROM enrichment_tasks
                WHERE queue = $1
                  AND status IN ('pending', 'processing', 'dead')
                  AND payload->>'collection' = $2
                  AND {}
                ",
                Self::payload_filter_sql(3, with_tsquery)
            )
        } else {
            r"
            DELETE FROM enrichment_tasks
            WHERE queue = $1
              AND status IN ('pending', 'processing', 'dead')
              AND payload->>'collection' = $2
            "
            .to_string()
        };

        let mut q = sqlx::query(&sql).bind(QUEUE_NAME).bind(collection);
        if let Some(query_text) = query {
            q = q.bind(query_text);
        }

        let result = q
            .execute(self.pools.write_pool())
            .await
            .map_db_err(operation, None)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::significant_drop_tightening
)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn payload(base_id: &str, index: i32) -> TaskPayload {
        TaskPayload {
            chunk_id: format!("{base_id}:{index}"),
            base_id: base_id.to_string(),
            chunk_index: index,
            collection: "default".to_string(),
            doc_type: "text".to_string(),
            text: format!("chunk {index} of {base_id}"),
            source: Some(format!("{base_id}.txt")),
            tier1_meta: json!({}),
        }
    }

    #[derive(Clone, Debug)]
    struct MockTask {
        id: Uuid,
        status: TaskStatus,
        payload: JsonValue,
        attempt: i32,
        max_attempts: i32,
        leased_until: Option<chrono::DateTime<Utc>>,
        worker_id: Option<String>,
        run_after: chrono::DateTime<Utc>,
    }

    #[derive(Clone, Debug, Default)]
    struct MockChunkState {
        enrichment_status: String,
        tier2_meta: Option<JsonValue>,
        tier3_meta: Option<JsonValue>,
    }

    #[derive(Clone, Debug, Default)]
    struct MockDocState {
        summary: Option<String>,
        summary_medium: Option<String>,
    }

    /// In-memory double exercising the same protocol semantics
    struct MockQueue {
        settings: QueueSettings,
        tasks: Arc<Mutex<Vec<MockTask>>>,
        chunks: Arc<Mutex<HashMap<String, MockChunkState>>>,
        documents: Arc<Mutex<HashMap<String, MockDocState>>>,
    }

    impl MockQueue {
        fn new(settings: QueueSettings) -> Self {
            Self {
                settings,
                tasks: Arc::new(Mutex::new(Vec::new())),
                chunks: Arc::new(Mutex::new(HashMap::new())),
                documents: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        fn enqueue_sync(&self, payloads: &[TaskPayload]) -> Vec<Uuid> {
            let mut tasks = self.tasks.lock().unwrap();
            payloads
                .iter()
                .map(|p| {
                    let id = Uuid::new_v4();
                    tasks.push(MockTask {
                        id,
                        status: TaskStatus::Pending,
                        payload: serde_json::to_value(p).unwrap(),
                        attempt: 1,
                        max_attempts: self.settings.max_attempts,
                        leased_until: None,
                        worker_id: None,
                        run_after: Utc::now(),
                    });
                    self.chunks
                        .lock()
                        .unwrap()
                        .entry(p.chunk_id.clone())
                        .or_insert_with(|| MockChunkState {
                            enrichment_status: "pending".to_string(),
                            ..MockChunkState::default()
                        });
                    id
                })
                .collect()
        }

        fn claim_sync(&self, worker_id: &str) -> Option<Uuid> {
            let mut tasks = self.tasks.lock().unwrap();
            let now = Utc::now();
            let candidate = tasks
                .iter_mut()
                .filter(|t| t.status == TaskStatus::Pending && t.run_after <= now)
                .min_by_key(|t| t.run_after)?;
            candidate.status = TaskStatus::Processing;
            candidate.leased_until = Some(now + Duration::seconds(self.settings.lease_seconds));
            candidate.worker_id = Some(worker_id.to_string());
            Some(candidate.id)
        }

        fn submit_sync(&self, task_id: Uuid, result: &TaskResult) -> Result<(), DatabaseError> {
            let chunk_id = ChunkId::parse(&result.chunk_id)
                .map_err(|message| DatabaseError::ChunkIdInvalid { message })?;

            let (stripped, summaries) = split_summaries(result.tier3_meta.as_ref());

            let mut chunks = self.chunks.lock().unwrap();
            let state = chunks.get_mut(&result.chunk_id).ok_or_else(|| {
                DatabaseError::NotFound {
                    what: format!("chunk {}", result.chunk_id),
                }
            })?;
            state.enrichment_status = "enriched".to_string();
            state.tier2_meta.clone_from(&result.tier2_meta);
            state.tier3_meta = stripped;

            let mut documents = self.documents.lock().unwrap();
            let doc = documents.entry(chunk_id.base_id).or_default();
            if summaries.summary.is_some() {
                doc.summary = summaries.summary;
            }
            if summaries.summary_medium.is_some() {
                doc.summary_medium = summaries.summary_medium;
            }

            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
                task.status = TaskStatus::Completed;
            }
            Ok(())
        }

        fn fail_sync(&self, task_id: Uuid, message: &str) -> TaskStatus {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks.iter_mut().find(|t| t.id == task_id).unwrap();
            if task.attempt < task.max_attempts {
                task.status = TaskStatus::Pending;
                task.attempt += 1;
                task.run_after = Utc::now() + Duration::seconds(self.settings.retry_delay_seconds);
                task.leased_until = None;
                task.worker_id = None;
                return TaskStatus::Pending;
            }
            task.status = TaskStatus::Dead;
            let chunk_index = chunk_index_from_payload(&task.payload).unwrap();
            let chunk_key = format!(
                "{}:{}",
                task.payload["baseId"].as_str().unwrap(),
                chunk_index
            );
            let error = error_record(
                message,
                task.id,
                task.attempt,
                task.max_attempts,
                chunk_index,
                Utc::now(),
            );
            let mut chunks = self.chunks.lock().unwrap();
            if let Some(state) = chunks.get_mut(&chunk_key) {
                state.enrichment_status = "failed".to_string();
                let mut map = state
                    .tier3_meta
                    .take()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                map.insert("_error".to_string(), error);
                state.tier3_meta = Some(JsonValue::Object(map));
            }
            TaskStatus::Dead
        }

        fn recover_stale_sync(&self) -> u64 {
            let mut tasks = self.tasks.lock().unwrap();
            let now = Utc::now();
            let mut recovered = 0;
            for task in tasks.iter_mut() {
                if task.status == TaskStatus::Processing
                    && task.leased_until.is_some_and(|lease| lease < now)
                {
                    task.status = TaskStatus::Pending;
                    task.leased_until = None;
                    task.worker_id = None;
                    recovered += 1;
                }
            }
            recovered
        }
    }

    // ========== PROTOCOL TESTS ==========

    #[test]
    fn claim_sets_processing_and_lease() {
        let queue = MockQueue::new(QueueSettings::default());
        queue.enqueue_sync(&[payload("doc-1", 0)]);

        let claimed = queue.claim_sync("worker-1").unwrap();
        let tasks = queue.tasks.lock().unwrap();
        let task = tasks.iter().find(|t| t.id == claimed).unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.worker_id.as_deref(), Some("worker-1"));
        assert!(task.leased_until.unwrap() > Utc::now());
    }

    #[test]
    fn two_workers_never_share_a_task() {
        let queue = MockQueue::new(QueueSettings::default());
        queue.enqueue_sync(&[payload("doc-1", 0), payload("doc-1", 1)]);

        let first = queue.claim_sync("worker-1").unwrap();
        let second = queue.claim_sync("worker-2").unwrap();
        let third = queue.claim_sync("worker-3");

        assert_ne!(first, second, "workers claimed the same task");
        assert!(third.is_none(), "empty queue must yield no claim");
    }

    #[test]
    fn submit_result_strips_and_promotes_summaries() {
        let queue = MockQueue::new(QueueSettings::default());
        queue.enqueue_sync(&[payload("doc-1", 0)]);
        let task_id = queue.claim_sync("worker-1").unwrap();

        queue
            .submit_sync(
                task_id,
                &TaskResult {
                    chunk_id: "doc-1:0".to_string(),
                    tier2_meta: Some(json!({"entities": ["Rust"]})),
                    tier3_meta: Some(json!({
                        "summary_medium": "S",
                        "keywords": ["retrieval"]
                    })),
                },
            )
            .unwrap();

        let chunks = queue.chunks.lock().unwrap();
        let state = chunks.get("doc-1:0").unwrap();
        assert_eq!(state.enrichment_status, "enriched");
        let tier3 = state.tier3_meta.as_ref().unwrap();
        assert!(tier3.get("summary_medium").is_none(), "summary must be stripped");
        assert_eq!(tier3["keywords"], json!(["retrieval"]));

        let documents = queue.documents.lock().unwrap();
        let doc = documents.get("doc-1").unwrap();
        assert_eq!(doc.summary_medium.as_deref(), Some("S"));
        // summary falls back to summary_medium when absent
        assert_eq!(doc.summary.as_deref(), Some("S"));

        let tasks = queue.tasks.lock().unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[test]
    fn submit_result_rejects_malformed_chunk_id() {
        let queue = MockQueue::new(QueueSettings::default());
        queue.enqueue_sync(&[payload("doc-1", 0)]);
        let task_id = queue.claim_sync("worker-1").unwrap();

        let err = queue
            .submit_sync(
                task_id,
                &TaskResult {
                    chunk_id: "not-a-chunk-id".to_string(),
                    tier2_meta: None,
                    tier3_meta: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ChunkIdInvalid { .. }));
    }

    #[test]
    fn fail_below_budget_requeues_with_delay() {
        let queue = MockQueue::new(QueueSettings::default());
        queue.enqueue_sync(&[payload("doc-1", 0)]);
        let task_id = queue.claim_sync("worker-1").unwrap();

        let status = queue.fail_sync(task_id, "transient upstream error");
        assert_eq!(status, TaskStatus::Pending);

        let tasks = queue.tasks.lock().unwrap();
        assert_eq!(tasks[0].attempt, 2);
        assert!(tasks[0].run_after > Utc::now(), "retry must be delayed");
        assert!(tasks[0].worker_id.is_none());
    }

    #[test]
    fn final_fail_dead_letters_and_records_error() {
        let queue = MockQueue::new(QueueSettings {
            max_attempts: 1,
            ..QueueSettings::default()
        });
        queue.enqueue_sync(&[payload("doc-1", 3)]);
        let task_id = queue.claim_sync("worker-1").unwrap();

        let status = queue.fail_sync(task_id, "model exploded");
        assert_eq!(status, TaskStatus::Dead);

        let chunks = queue.chunks.lock().unwrap();
        let state = chunks.get("doc-1:3").unwrap();
        assert_eq!(state.enrichment_status, "failed");
        let error = &state.tier3_meta.as_ref().unwrap()["_error"];
        assert_eq!(error["message"], json!("model exploded"));
        assert_eq!(error["final"], json!(true));
        assert_eq!(error["chunkIndex"], json!(3));
        assert_eq!(error["maxAttempts"], json!(1));
    }

    #[test]
    fn recover_stale_returns_task_without_spending_attempt() {
        let queue = MockQueue::new(QueueSettings {
            lease_seconds: -1, // leases are born expired
            ..QueueSettings::default()
        });
        queue.enqueue_sync(&[payload("doc-1", 0)]);
        queue.claim_sync("worker-1").unwrap();

        let recovered = queue.recover_stale_sync();
        assert_eq!(recovered, 1);

        let tasks = queue.tasks.lock().unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].attempt, 1, "recovery must not spend an attempt");
        assert!(tasks[0].worker_id.is_none());
    }

    #[test]
    fn recovered_task_can_be_reclaimed_and_completed() {
        let queue = MockQueue::new(QueueSettings {
            lease_seconds: -1,
            ..QueueSettings::default()
        });
        queue.enqueue_sync(&[payload("doc-1", 0)]);
        queue.claim_sync("worker-1").unwrap();
        queue.recover_stale_sync();

        let task_id = queue.claim_sync("worker-2").unwrap();
        queue
            .submit_sync(
                task_id,
                &TaskResult {
                    chunk_id: "doc-1:0".to_string(),
                    tier2_meta: None,
                    tier3_meta: None,
                },
            )
            .unwrap();

        let chunks = queue.chunks.lock().unwrap();
        assert_eq!(chunks.get("doc-1:0").unwrap().enrichment_status, "enriched");
    }

    // ========== HELPER TESTS ==========

    #[test]
    fn split_summaries_extracts_all_fields() {
        let (stripped, summaries) = split_summaries(Some(&json!({
            "summary": "full",
            "summary_short": "s",
            "summary_medium": "m",
            "summary_long": "l",
            "_error": {"stale": true},
            "topics": ["a"]
        })));
        assert_eq!(stripped, Some(json!({"topics": ["a"]})));
        assert_eq!(summaries.summary.as_deref(), Some("full"));
        assert_eq!(summaries.summary_short.as_deref(), Some("s"));
        assert_eq!(summaries.summary_medium.as_deref(), Some("m"));
        assert_eq!(summaries.summary_long.as_deref(), Some("l"));
    }

    #[test]
    fn split_summaries_empty_blob_stores_null() {
        let (stripped, summaries) = split_summaries(Some(&json!({"summary_medium": "m"})));
        assert_eq!(stripped, None);
        assert_eq!(summaries.summary.as_deref(), Some("m"));
    }

    #[test]
    fn chunk_index_prefers_explicit_field() {
        assert_eq!(
            chunk_index_from_payload(&json!({"chunkIndex": 5, "chunkId": "doc:9"})),
            Some(5)
        );
        assert_eq!(
            chunk_index_from_payload(&json!({"chunkId": "doc:9"})),
            Some(9)
        );
        assert_eq!(chunk_index_from_payload(&json!({})), None);
    }
}
