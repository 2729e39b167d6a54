//! Strategy-driven query service
//!
//! Semantic search embeds the query once and runs a cosine kNN; metadata
//! runs the compiled filter alone; full-text goes through the tsquery/ILIKE
//! scan. A semantic query with no hits falls back to full-text so exact
//! phrases still land.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use raged_data::blob::BlobStore;
use raged_data::models::SearchHit;
use raged_data::repository::DocumentRepository;
use raged_data::{Filter, payload_checksum};
use raged_embeddings::EmbeddingService;

use crate::error::{QueryError, QueryResult as Result};

/// `topK` bounds
const TOP_K_MIN: i64 = 1;
const TOP_K_MAX: i64 = 100;
const TOP_K_DEFAULT: i64 = 8;

/// Retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Semantic,
    Metadata,
    Fulltext,
}

impl Strategy {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Metadata => "metadata",
            Self::Fulltext => "fulltext",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "metadata" => Ok(Self::Metadata),
            "fulltext" | "full-text" => Ok(Self::Fulltext),
            other => Err(QueryError::UnknownStrategy(other.to_string())),
        }
    }
}

/// The query request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: Option<String>,
    pub collection: Option<String>,
    pub strategy: Option<String>,
    pub filter: Option<JsonValue>,
    pub top_k: Option<i64>,
    pub min_score: Option<f32>,
}

/// One shaped result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub doc_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_url: Option<String>,
    pub tier1_meta: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier2_meta: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier3_meta: Option<JsonValue>,
    pub enrichment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub payload_checksum: String,
}

impl From<SearchHit> for QueryResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.chunk_id,
            score: hit.score,
            text: hit.text,
            doc_type: hit.doc_type,
            source: hit.source,
            path: hit.path,
            lang: hit.lang,
            item_url: hit.item_url,
            tier1_meta: hit.tier1_meta,
            tier2_meta: hit.tier2_meta,
            tier3_meta: hit.tier3_meta,
            enrichment_status: hit.enrichment_status.to_string(),
            summary: hit.summary.or(hit.summary_short),
            payload_checksum: hit.payload_checksum,
        }
    }
}

/// How the request was routed
#[derive(Debug, Clone, Serialize)]
pub struct QueryRouting {
    pub strategy: String,
    pub method: String,
    pub confidence: f32,
    pub ms: u64,
}

/// The query response body
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub ok: bool,
    pub results: Vec<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<QueryRouting>,
}

/// Raw bytes of the top-ranked document
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    pub base_id: String,
    pub mime_type: Option<String>,
    pub body: Bytes,
}

/// Concatenated text of the top-ranked document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulltextDocument {
    pub base_id: String,
    pub text: String,
    pub chunks: usize,
    pub payload_checksum: String,
}

/// Derive the similarity floor from the query's term count
pub fn auto_min_score(query: &str) -> f32 {
    match query.split_whitespace().count() {
        0 | 1 => 0.3,
        2 => 0.4,
        3 | 4 => 0.5,
        _ => 0.6,
    }
}

/// Clamp `topK` into its accepted range
pub fn clamp_top_k(requested: Option<i64>) -> i64 {
    requested.unwrap_or(TOP_K_DEFAULT).clamp(TOP_K_MIN, TOP_K_MAX)
}

/// The query service
pub struct QueryService {
    repository: Arc<dyn DocumentRepository>,
    embedder: Arc<dyn EmbeddingService>,
    blob: Option<Arc<dyn BlobStore>>,
    default_collection: String,
}

impl QueryService {
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        embedder: Arc<dyn EmbeddingService>,
        blob: Option<Arc<dyn BlobStore>>,
        default_collection: String,
    ) -> Self {
        Self {
            repository,
            embedder,
            blob,
            default_collection,
        }
    }

    /// Run a query
    ///
    /// # Errors
    ///
    /// Returns a filter error for a bad filter, `EmptyQuery` when a
    /// text-requiring strategy has no query, and backend errors verbatim.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let collection = request
            .collection
            .clone()
            .unwrap_or_else(|| self.default_collection.clone());
        let filter = match &request.filter {
            Some(raw) => Filter::parse(raw)?,
            None => Filter::default(),
        };
        let top_k = clamp_top_k(request.top_k);
        let query_text = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        let (strategy, confidence) = match &request.strategy {
            Some(raw) => (raw.parse::<Strategy>()?, 1.0),
            // No query but a filter: the caller wants a metadata scan.
            None if query_text.is_none() && !filter.is_empty() => (Strategy::Metadata, 0.7),
            None => (Strategy::Semantic, 0.7),
        };

        let (results, method) = match strategy {
            Strategy::Semantic => {
                let query_text = query_text.ok_or(QueryError::EmptyQuery)?;
                let min_score = request
                    .min_score
                    .unwrap_or_else(|| auto_min_score(query_text));
                let texts = vec![query_text.to_string()];
                let embedding = self
                    .embedder
                    .embed(&texts)
                    .await?
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                let hits = self
                    .repository
                    .semantic_search(&collection, embedding, &filter, top_k, min_score)
                    .await?;
                if hits.is_empty() {
                    // Exact phrases with rare tokens can miss the vector
                    // space entirely; retry through the text scan.
                    debug!(collection, "semantic search empty, trying full-text");
                    let hits = self
                        .repository
                        .fulltext_search(&collection, query_text, &filter, top_k)
                        .await?;
                    (hits, "semantic+fulltext-fallback")
                } else {
                    (hits, "semantic")
                }
            }
            Strategy::Metadata => {
                let hits = self
                    .repository
                    .metadata_scan(&collection, &filter, top_k)
                    .await?;
                (hits, "metadata")
            }
            Strategy::Fulltext => {
                let query_text = query_text.ok_or(QueryError::EmptyQuery)?;
                let hits = self
                    .repository
                    .fulltext_search(&collection, query_text, &filter, top_k)
                    .await?;
                (hits, "fulltext")
            }
        };

        let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(QueryResponse {
            ok: true,
            results: results.into_iter().map(QueryResult::from).collect(),
            routing: Some(QueryRouting {
                strategy: strategy.as_str().to_string(),
                method: method.to_string(),
                confidence,
                ms,
            }),
        })
    }

    /// Raw bytes of the top-ranked document
    ///
    /// # Errors
    ///
    /// `NotFound` when the query has no hit, the document vanished, or no
    /// raw payload exists; blob retrieval failures propagate as database
    /// errors (502 at the boundary).
    pub async fn download_first(&self, request: QueryRequest) -> Result<DownloadedDocument> {
        let document = self.first_document(request).await?;

        if let Some(raw_data) = document.raw_data {
            return Ok(DownloadedDocument {
                base_id: document.base_id,
                mime_type: document.mime_type,
                body: Bytes::from(raw_data),
            });
        }
        if let Some(raw_key) = &document.raw_key {
            let Some(blob) = &self.blob else {
                return Err(QueryError::NotFound(format!(
                    "raw payload of '{}' is off-loaded and no blob store is configured",
                    document.base_id
                )));
            };
            let body = blob.get(raw_key).await?;
            return Ok(DownloadedDocument {
                base_id: document.base_id,
                mime_type: document.mime_type,
                body,
            });
        }
        Err(QueryError::NotFound(format!(
            "document '{}' has no raw payload",
            document.base_id
        )))
    }

    /// Concatenated chunk text of the top-ranked document
    ///
    /// # Errors
    ///
    /// `NotFound` when the query has no hit or the document vanished.
    pub async fn fulltext_first(&self, request: QueryRequest) -> Result<FulltextDocument> {
        let document = self.first_document(request).await?;
        let texts = self.repository.chunk_texts(document.id).await?;
        if texts.is_empty() {
            return Err(QueryError::NotFound(format!(
                "document '{}' has no chunks",
                document.base_id
            )));
        }
        Ok(FulltextDocument {
            base_id: document.base_id,
            payload_checksum: payload_checksum(&texts),
            chunks: texts.len(),
            text: texts.join("\n\n"),
        })
    }

    /// The document behind the top-ranked hit of a query
    async fn first_document(
        &self,
        mut request: QueryRequest,
    ) -> Result<raged_data::models::Document> {
        request.top_k = Some(1);
        let response = self.query(request).await?;
        let Some(first) = response.results.first() else {
            return Err(QueryError::NotFound("no matching chunk".to_string()));
        };

        // The chunk id prefix is the owning document's base id.
        let base_id = raged_data::ChunkId::parse(&first.id)
            .map(|id| id.base_id)
            .unwrap_or_else(|_| first.id.clone());
        self.repository
            .get_document_by_base_id(None, &base_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(format!("document '{base_id}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raged_data::error::DatabaseResult;
    use raged_data::models::{
        ChunkSeed, ChunkStatusCounts, CollectionStats, Document, EnrichmentReport,
        EnrichmentStatus, NewChunk, NewDocument, UpsertOutcome,
    };
    use raged_embeddings::EmbeddingResult;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn hit(base_id: &str, index: i32, score: f32) -> SearchHit {
        SearchHit {
            chunk_id: format!("{base_id}:{index}"),
            document_id: Uuid::new_v4(),
            base_id: base_id.to_string(),
            chunk_index: index,
            text: "chunk text".to_string(),
            doc_type: "text".to_string(),
            source: None,
            path: None,
            lang: None,
            item_url: None,
            tier1_meta: json!({}),
            tier2_meta: None,
            tier3_meta: None,
            enrichment_status: EnrichmentStatus::None,
            summary: None,
            summary_short: None,
            payload_checksum: "abc".to_string(),
            score,
        }
    }

    /// Records the arguments of the last strategy call
    #[derive(Default)]
    struct RecordingRepo {
        semantic_hits: Mutex<Vec<SearchHit>>,
        fulltext_hits: Mutex<Vec<SearchHit>>,
        metadata_hits: Mutex<Vec<SearchHit>>,
        last_min_score: Mutex<Option<f32>>,
        last_top_k: Mutex<Option<i64>>,
        document: Mutex<Option<Document>>,
        chunk_texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentRepository for RecordingRepo {
        async fn upsert_document(
            &self,
            _doc: &NewDocument,
            _overwrite: bool,
        ) -> DatabaseResult<(Document, UpsertOutcome)> {
            unreachable!("not used by query tests")
        }

        async fn replace_chunks(
            &self,
            _document_id: Uuid,
            _chunks: &[NewChunk],
            _expected_dim: usize,
        ) -> DatabaseResult<usize> {
            Ok(0)
        }

        async fn get_document_by_base_id(
            &self,
            _collection: Option<&str>,
            _base_id: &str,
        ) -> DatabaseResult<Option<Document>> {
            Ok(self.document.lock().unwrap().clone())
        }

        async fn get_document(&self, _id: Uuid) -> DatabaseResult<Option<Document>> {
            Ok(self.document.lock().unwrap().clone())
        }

        async fn chunk_texts(&self, _document_id: Uuid) -> DatabaseResult<Vec<String>> {
            Ok(self.chunk_texts.lock().unwrap().clone())
        }

        async fn chunk_page(
            &self,
            _document_id: Uuid,
            _after_index: i32,
            _limit: i64,
        ) -> DatabaseResult<Vec<ChunkSeed>> {
            Ok(Vec::new())
        }

        async fn semantic_search(
            &self,
            _collection: &str,
            _embedding: Vec<f32>,
            _filter: &Filter,
            top_k: i64,
            min_score: f32,
        ) -> DatabaseResult<Vec<SearchHit>> {
            *self.last_min_score.lock().unwrap() = Some(min_score);
            *self.last_top_k.lock().unwrap() = Some(top_k);
            Ok(self.semantic_hits.lock().unwrap().clone())
        }

        async fn metadata_scan(
            &self,
            _collection: &str,
            _filter: &Filter,
            top_k: i64,
        ) -> DatabaseResult<Vec<SearchHit>> {
            *self.last_top_k.lock().unwrap() = Some(top_k);
            Ok(self.metadata_hits.lock().unwrap().clone())
        }

        async fn fulltext_search(
            &self,
            _collection: &str,
            _query: &str,
            _filter: &Filter,
            _top_k: i64,
        ) -> DatabaseResult<Vec<SearchHit>> {
            Ok(self.fulltext_hits.lock().unwrap().clone())
        }

        async fn collection_stats(&self) -> DatabaseResult<Vec<CollectionStats>> {
            Ok(Vec::new())
        }

        async fn chunk_status_counts(
            &self,
            _collection: Option<&str>,
            _query: Option<&str>,
        ) -> DatabaseResult<ChunkStatusCounts> {
            Ok(ChunkStatusCounts::default())
        }

        async fn enrichment_report(
            &self,
            _collection: Option<&str>,
            _base_id: &str,
        ) -> DatabaseResult<Option<EnrichmentReport>> {
            Ok(None)
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingService for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn service(repo: Arc<RecordingRepo>) -> QueryService {
        QueryService::new(repo, Arc::new(StubEmbedder), None, "default".to_string())
    }

    #[test]
    fn min_score_derivation_follows_term_count() {
        assert!((auto_min_score("hello") - 0.3).abs() < f32::EPSILON);
        assert!((auto_min_score("hello world") - 0.4).abs() < f32::EPSILON);
        assert!((auto_min_score("one two three") - 0.5).abs() < f32::EPSILON);
        assert!((auto_min_score("one two three four") - 0.5).abs() < f32::EPSILON);
        assert!((auto_min_score("a b c d e") - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn top_k_clamps_into_range() {
        assert_eq!(clamp_top_k(None), 8);
        assert_eq!(clamp_top_k(Some(0)), 1);
        assert_eq!(clamp_top_k(Some(-5)), 1);
        assert_eq!(clamp_top_k(Some(1000)), 100);
        assert_eq!(clamp_top_k(Some(25)), 25);
    }

    #[tokio::test]
    async fn semantic_uses_auto_min_score() {
        let repo = Arc::new(RecordingRepo::default());
        repo.semantic_hits.lock().unwrap().push(hit("doc", 0, 0.9));

        let response = service(Arc::clone(&repo))
            .query(QueryRequest {
                query: Some("hello".to_string()),
                top_k: Some(1),
                ..QueryRequest::default()
            })
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "doc:0");
        let min_score = repo.last_min_score.lock().unwrap().unwrap();
        assert!((min_score - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn explicit_min_score_wins() {
        let repo = Arc::new(RecordingRepo::default());
        service(Arc::clone(&repo))
            .query(QueryRequest {
                query: Some("hello".to_string()),
                min_score: Some(0.85),
                ..QueryRequest::default()
            })
            .await
            .unwrap();
        let min_score = repo.last_min_score.lock().unwrap().unwrap();
        assert!((min_score - 0.85).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn empty_semantic_falls_back_to_fulltext() {
        let repo = Arc::new(RecordingRepo::default());
        repo.fulltext_hits.lock().unwrap().push(hit("doc", 2, 1.0));

        let response = service(Arc::clone(&repo))
            .query(QueryRequest {
                query: Some("verbatim phrase".to_string()),
                ..QueryRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        let routing = response.routing.unwrap();
        assert_eq!(routing.strategy, "semantic");
        assert_eq!(routing.method, "semantic+fulltext-fallback");
    }

    #[tokio::test]
    async fn filter_without_query_routes_to_metadata() {
        let repo = Arc::new(RecordingRepo::default());
        repo.metadata_hits.lock().unwrap().push(hit("doc", 0, 1.0));

        let response = service(Arc::clone(&repo))
            .query(QueryRequest {
                filter: Some(json!({"docType": "code"})),
                ..QueryRequest::default()
            })
            .await
            .unwrap();

        let routing = response.routing.unwrap();
        assert_eq!(routing.strategy, "metadata");
        assert!((response.results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn semantic_without_query_is_empty_query_error() {
        let repo = Arc::new(RecordingRepo::default());
        let err = service(repo)
            .query(QueryRequest {
                strategy: Some("semantic".to_string()),
                ..QueryRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::EmptyQuery));
    }

    #[tokio::test]
    async fn bad_filter_is_a_filter_error() {
        let repo = Arc::new(RecordingRepo::default());
        let err = service(repo)
            .query(QueryRequest {
                query: Some("x".to_string()),
                filter: Some(json!({"conditions": [{"field": "nope", "op": "eq", "value": 1}]})),
                ..QueryRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Filter(_)));
    }

    #[tokio::test]
    async fn download_first_prefers_inline_raw_data() {
        let repo = Arc::new(RecordingRepo::default());
        repo.semantic_hits.lock().unwrap().push(hit("doc-1", 0, 0.9));
        let now = chrono::Utc::now();
        *repo.document.lock().unwrap() = Some(Document {
            id: Uuid::new_v4(),
            base_id: "doc-1".to_string(),
            collection: "default".to_string(),
            source: "doc-1.txt".to_string(),
            identity_key: "doc-1.txt".to_string(),
            mime_type: Some("text/plain".to_string()),
            summary: None,
            summary_short: None,
            summary_medium: None,
            summary_long: None,
            raw_data: Some(b"raw bytes".to_vec()),
            raw_key: None,
            ingested_at: now,
            updated_at: now,
            last_seen: now,
        });

        let downloaded = service(repo)
            .download_first(QueryRequest {
                query: Some("anything".to_string()),
                ..QueryRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(downloaded.base_id, "doc-1");
        assert_eq!(&downloaded.body[..], b"raw bytes");
    }

    #[tokio::test]
    async fn download_first_without_match_is_not_found() {
        let repo = Arc::new(RecordingRepo::default());
        let err = service(repo)
            .download_first(QueryRequest {
                query: Some("anything".to_string()),
                ..QueryRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }

    #[tokio::test]
    async fn fulltext_first_concatenates_chunks() {
        let repo = Arc::new(RecordingRepo::default());
        repo.semantic_hits.lock().unwrap().push(hit("doc-1", 0, 0.9));
        let now = chrono::Utc::now();
        *repo.document.lock().unwrap() = Some(Document {
            id: Uuid::new_v4(),
            base_id: "doc-1".to_string(),
            collection: "default".to_string(),
            source: "doc-1.txt".to_string(),
            identity_key: "doc-1.txt".to_string(),
            mime_type: None,
            summary: None,
            summary_short: None,
            summary_medium: None,
            summary_long: None,
            raw_data: None,
            raw_key: None,
            ingested_at: now,
            updated_at: now,
            last_seen: now,
        });
        *repo.chunk_texts.lock().unwrap() =
            vec!["first part".to_string(), "second part".to_string()];

        let full = service(repo)
            .fulltext_first(QueryRequest {
                query: Some("anything".to_string()),
                ..QueryRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(full.text, "first part\n\nsecond part");
        assert_eq!(full.chunks, 2);
    }
}
