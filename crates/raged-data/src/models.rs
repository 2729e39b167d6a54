//! Domain models for database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A logical source ingested once per `(collection, identity_key)`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub base_id: String,
    pub collection: String,
    pub source: String,
    pub identity_key: String,
    pub mime_type: Option<String>,

    // Document-level summaries promoted from enrichment results
    pub summary: Option<String>,
    pub summary_short: Option<String>,
    pub summary_medium: Option<String>,
    pub summary_long: Option<String>,

    // Raw payload: inline bytes or a blob-store key, never both
    pub raw_data: Option<Vec<u8>>,
    pub raw_key: Option<String>,

    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One embedded fragment of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub doc_type: String,
    pub source: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub repo_id: Option<String>,
    pub repo_url: Option<String>,
    pub item_url: Option<String>,
    pub tier1_meta: JsonValue,
    pub tier2_meta: Option<JsonValue>,
    pub tier3_meta: Option<JsonValue>,
    pub enrichment_status: EnrichmentStatus,
    pub enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Enrichment lifecycle of a chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    None,
    Pending,
    Processing,
    Enriched,
    Failed,
}

impl std::str::FromStr for EnrichmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "enriched" => Ok(Self::Enriched),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid enrichment status: {s}")),
        }
    }
}

impl From<String> for EnrichmentStatus {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::None)
    }
}

impl std::fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Enriched => "enriched",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}

/// Status of an enrichment task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        s.as_str().parse().unwrap_or(Self::Pending)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        };
        write!(f, "{status}")
    }
}

/// One unit of enrichment work
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub queue: String,
    pub status: String,
    pub payload: JsonValue,
    pub attempt: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub run_after: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payload carried by every enrichment task
///
/// Field names are the wire names workers see; `tier1Meta` stays an opaque
/// JSON bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub chunk_id: String,
    pub base_id: String,
    pub chunk_index: i32,
    pub collection: String,
    pub doc_type: String,
    pub text: String,
    pub source: Option<String>,
    pub tier1_meta: JsonValue,
}

/// A claimed task handed to a worker, with the fresh text of all chunks of
/// the payload's document (document-level summarisation needs them)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedTask {
    pub task: Task,
    pub document_chunks: Vec<String>,
}

/// Fields a worker submits when a task succeeds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub chunk_id: String,
    #[serde(default)]
    pub tier2_meta: Option<JsonValue>,
    #[serde(default)]
    pub tier3_meta: Option<JsonValue>,
}

/// Data required to insert one chunk during ingestion
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub doc_type: String,
    pub source: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub repo_id: Option<String>,
    pub repo_url: Option<String>,
    pub item_url: Option<String>,
    pub tier1_meta: JsonValue,
    pub enrichment_status: EnrichmentStatus,
}

/// Data required to upsert a document during ingestion
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub base_id: String,
    pub collection: String,
    pub source: String,
    pub identity_key: String,
    pub mime_type: Option<String>,
    pub raw_data: Option<Vec<u8>>,
    pub raw_key: Option<String>,
}

/// The slice of a chunk row the enrichment enqueue pagination needs
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChunkSeed {
    pub chunk_index: i32,
    pub text: String,
    pub doc_type: String,
    pub source: Option<String>,
    pub tier1_meta: JsonValue,
}

/// Outcome of a document upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First observation of this `(collection, identity_key)`
    Created,
    /// Existing document; content replaced because overwrite was requested
    Replaced,
    /// Existing document; only `last_seen` was refreshed
    Refreshed,
}

/// A retrieval hit: chunk joined to its owning document
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: Uuid,
    pub base_id: String,
    pub chunk_index: i32,
    pub text: String,
    pub doc_type: String,
    pub source: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub item_url: Option<String>,
    pub tier1_meta: JsonValue,
    pub tier2_meta: Option<JsonValue>,
    pub tier3_meta: Option<JsonValue>,
    pub enrichment_status: EnrichmentStatus,
    pub summary: Option<String>,
    pub summary_short: Option<String>,
    pub payload_checksum: String,
    pub score: f32,
}

/// Per-collection document/chunk counts
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CollectionStats {
    pub collection: String,
    pub documents: i64,
    pub chunks: i64,
}

/// Task counts by status for queue introspection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead: i64,
}

/// Chunk counts by enrichment status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStatusCounts {
    pub none: i64,
    pub pending: i64,
    pub processing: i64,
    pub enriched: i64,
    pub failed: i64,
}

/// Per-chunk enrichment state for the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnrichmentState {
    pub chunk_index: i32,
    pub status: EnrichmentStatus,
    pub enriched_at: Option<DateTime<Utc>>,
    pub has_error: bool,
}

/// Enrichment report for one document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentReport {
    pub base_id: String,
    pub collection: String,
    pub chunks: Vec<ChunkEnrichmentState>,
    pub has_summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_status_round_trips() {
        for status in ["none", "pending", "processing", "enriched", "failed"] {
            let parsed: EnrichmentStatus = status.parse().unwrap_or(EnrichmentStatus::None);
            assert_eq!(parsed.to_string(), status);
        }
    }

    #[test]
    fn unknown_enrichment_status_is_rejected() {
        assert!("done".parse::<EnrichmentStatus>().is_err());
    }

    #[test]
    fn task_status_round_trips() {
        for status in ["pending", "processing", "completed", "dead"] {
            let parsed: TaskStatus = status.parse().unwrap_or(TaskStatus::Pending);
            assert_eq!(parsed.to_string(), status);
        }
    }

    #[test]
    fn task_payload_uses_wire_names() {
        let payload = TaskPayload {
            chunk_id: "doc-1:0".to_string(),
            base_id: "doc-1".to_string(),
            chunk_index: 0,
            collection: "default".to_string(),
            doc_type: "text".to_string(),
            text: "hello".to_string(),
            source: None,
            tier1_meta: serde_json::json!({}),
        };
        let value = serde_json::to_value(&payload).unwrap_or_default();
        assert!(value.get("chunkId").is_some());
        assert!(value.get("docType").is_some());
        assert!(value.get("chunk_id").is_none());
    }
}
