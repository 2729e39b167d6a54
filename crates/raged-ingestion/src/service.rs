//! Ingestion orchestration
//!
//! One request flows resolve -> classify -> chunk -> embed -> upsert ->
//! enqueue. Per-item resolution failures populate `errors[]`; embedding and
//! database failures abort the batch. A committed upsert is never rolled
//! back by a later enqueue failure.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use raged_data::blob::BlobStore;
use raged_data::models::{EnrichmentStatus, NewChunk, NewDocument, TaskPayload, UpsertOutcome};
use raged_data::repository::DocumentRepository;
use raged_data::task_queue::EnrichmentQueue;
use raged_embeddings::EmbeddingService;
use raged_fetch::{FetchFailure, FetchedDoc, UrlFetcher};

use crate::chunking::{ChunkerConfig, chunk_text};
use crate::doc_type::{classify_doc_type, extract_tier1, language_of};
use crate::error::{IngestError, IngestResult};
use crate::identity::identity_key;

/// Tasks per enqueue INSERT
const ENQUEUE_BATCH_SIZE: usize = 100;
/// Chunk rows per enqueue pagination page
const CHUNK_PAGE_SIZE: i64 = 1000;

/// One item to ingest: inline text with a source, or a URL to fetch
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestItem {
    pub text: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
    pub doc_type: Option<String>,
    pub base_id: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub repo_id: Option<String>,
    pub repo_url: Option<String>,
    pub item_url: Option<String>,
}

/// The ingest request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub collection: Option<String>,
    pub items: Vec<IngestItem>,
    pub enrich: Option<bool>,
    pub overwrite: Option<bool>,
}

/// Outcome of one ingested document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedDocument {
    pub base_id: String,
    pub chunks: usize,
    pub created: bool,
}

/// The ingest response body
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub upserted: usize,
    pub chunks: usize,
    pub documents: Vec<IngestedDocument>,
    pub errors: Vec<FetchFailure>,
    pub warnings: Vec<String>,
}

/// Ingestion tuning taken from configuration at startup
#[derive(Debug, Clone)]
pub struct IngestServiceConfig {
    pub vector_dim: usize,
    pub enrichment_enabled: bool,
    pub blob_threshold_bytes: usize,
    pub default_collection: String,
    pub chunker: ChunkerConfig,
}

impl Default for IngestServiceConfig {
    fn default() -> Self {
        Self {
            vector_dim: 768,
            enrichment_enabled: false,
            blob_threshold_bytes: 1024 * 1024,
            default_collection: "default".to_string(),
            chunker: ChunkerConfig::default(),
        }
    }
}

/// A resolved item ready for the pipeline
struct ResolvedItem {
    item: IngestItem,
    text: String,
    source: String,
    fetched_mime: Option<String>,
}

/// The ingestion service
///
/// Collaborators arrive as trait objects so the pipeline is testable with
/// in-memory fakes.
pub struct IngestService {
    repository: Arc<dyn DocumentRepository>,
    embedder: Arc<dyn EmbeddingService>,
    fetcher: Arc<UrlFetcher>,
    queue: Arc<dyn EnrichmentQueue>,
    blob: Option<Arc<dyn BlobStore>>,
    config: IngestServiceConfig,
}

impl IngestService {
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        embedder: Arc<dyn EmbeddingService>,
        fetcher: Arc<UrlFetcher>,
        queue: Arc<dyn EnrichmentQueue>,
        blob: Option<Arc<dyn BlobStore>>,
        config: IngestServiceConfig,
    ) -> Self {
        Self {
            repository,
            embedder,
            fetcher,
            queue,
            blob,
            config,
        }
    }

    /// Ingest a batch of items
    ///
    /// # Errors
    ///
    /// Returns an error when the embedding backend or the database fails;
    /// per-URL fetch failures surface in the report instead.
    pub async fn ingest(&self, request: IngestRequest) -> IngestResult<IngestReport> {
        let collection = request
            .collection
            .clone()
            .unwrap_or_else(|| self.config.default_collection.clone());
        let overwrite = request.overwrite.unwrap_or(false);
        let enrich = request.enrich.unwrap_or(true) && self.config.enrichment_enabled;

        let mut report = IngestReport::default();

        // Resolve URL-only items first; failures do not abort the batch.
        let urls: Vec<String> = request
            .items
            .iter()
            .filter(|item| item.text.is_none())
            .filter_map(|item| item.url.clone())
            .collect();
        let mut fetched: HashMap<String, FetchedDoc> = HashMap::new();
        if !urls.is_empty() {
            let outcome = self.fetcher.fetch_batch(&urls).await;
            for doc in outcome.fetched {
                fetched.insert(doc.url.clone(), doc);
            }
            for err in &outcome.errors {
                warn!(url = %err.url, reason = %err.reason, "fetch failed during ingest");
                report.errors.push(err.into());
            }
        }

        let mut resolved = Vec::new();
        for item in request.items {
            if let Some(text) = item.text.clone() {
                let source = item
                    .source
                    .clone()
                    .or_else(|| item.url.clone())
                    .unwrap_or_else(|| "inline".to_string());
                resolved.push(ResolvedItem {
                    item,
                    text,
                    source,
                    fetched_mime: None,
                });
            } else if let Some(url) = item.url.clone() {
                // A failed fetch already produced an errors[] entry.
                if let Some(doc) = fetched.get(&url) {
                    let text = String::from_utf8_lossy(&doc.body).into_owned();
                    resolved.push(ResolvedItem {
                        item,
                        text,
                        source: url,
                        fetched_mime: doc
                            .content_type
                            .as_deref()
                            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string()),
                    });
                }
            } else {
                report
                    .warnings
                    .push("item without text or url skipped".to_string());
            }
        }

        // Items commit in request order.
        let mut enqueue_targets = Vec::new();
        for resolved_item in resolved {
            let Some(outcome) = self
                .ingest_one(&collection, resolved_item, overwrite, enrich, &mut report)
                .await?
            else {
                continue;
            };
            enqueue_targets.push(outcome);
        }

        // Enqueue failures surface as warnings; the upserts stay committed.
        if enrich {
            for target in enqueue_targets {
                if let Err(err) = self.enqueue_document(&collection, &target).await {
                    warn!(base_id = %target.base_id, error = %err, "enrichment enqueue failed");
                    report
                        .warnings
                        .push(format!("enqueue failed for {}: {err}", target.base_id));
                }
            }
        }

        Ok(report)
    }

    async fn ingest_one(
        &self,
        collection: &str,
        resolved: ResolvedItem,
        overwrite: bool,
        enrich: bool,
        report: &mut IngestReport,
    ) -> IngestResult<Option<EnqueueTarget>> {
        let ResolvedItem {
            item,
            text,
            source,
            fetched_mime,
        } = resolved;

        let identity = identity_key(&source);
        let base_id = item.base_id.clone().unwrap_or_else(|| identity.clone());
        let doc_type = classify_doc_type(item.doc_type.as_deref(), &source, &text);
        let tier1 = extract_tier1(doc_type, &text, &source);

        let chunk_texts = chunk_text(&text, &self.config.chunker);
        if chunk_texts.is_empty() {
            report
                .warnings
                .push(format!("'{source}' produced no chunks, skipped"));
            return Ok(None);
        }

        let embeddings = self.embedder.embed(&chunk_texts).await?;

        // Raw payload: off-load to the blob store above the threshold.
        let raw_bytes = text.clone().into_bytes();
        let (raw_data, raw_key) = match &self.blob {
            Some(blob) if raw_bytes.len() > self.config.blob_threshold_bytes => {
                let key = raw_payload_key(collection, &identity);
                blob.put(&key, raw_bytes.into()).await?;
                (None, Some(key))
            }
            _ => (Some(raw_bytes), None),
        };

        let new_document = NewDocument {
            base_id: base_id.clone(),
            collection: collection.to_string(),
            source: source.clone(),
            identity_key: identity,
            mime_type: Some(
                fetched_mime.unwrap_or_else(|| doc_type.default_mime().to_string()),
            ),
            raw_data,
            raw_key,
        };

        let (document, outcome) = self.repository.upsert_document(&new_document, overwrite).await?;
        let created = outcome == UpsertOutcome::Created;

        // A refresh without overwrite only bumps last_seen.
        if outcome == UpsertOutcome::Refreshed {
            info!(base_id = %document.base_id, "re-ingest refreshed last_seen only");
            report.documents.push(IngestedDocument {
                base_id: document.base_id,
                chunks: 0,
                created: false,
            });
            report.upserted += 1;
            return Ok(None);
        }

        let lang = item
            .lang
            .clone()
            .or_else(|| language_of(&source).map(ToString::to_string));
        let status = if enrich {
            EnrichmentStatus::Pending
        } else {
            EnrichmentStatus::None
        };

        let new_chunks: Vec<NewChunk> = chunk_texts
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| NewChunk {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                chunk_index: index as i32,
                text: chunk.clone(),
                embedding,
                doc_type: doc_type.as_str().to_string(),
                source: Some(source.clone()),
                path: item.path.clone(),
                lang: lang.clone(),
                repo_id: item.repo_id.clone(),
                repo_url: item.repo_url.clone(),
                item_url: item.item_url.clone().or_else(|| {
                    source.starts_with("http").then(|| source.clone())
                }),
                tier1_meta: tier1.clone(),
                enrichment_status: status,
            })
            .collect();

        let inserted = self
            .repository
            .replace_chunks(document.id, &new_chunks, self.config.vector_dim)
            .await?;

        info!(
            base_id = %document.base_id,
            chunks = inserted,
            doc_type = %doc_type,
            "ingested document"
        );
        report.upserted += 1;
        report.chunks += inserted;
        report.documents.push(IngestedDocument {
            base_id: document.base_id.clone(),
            chunks: inserted,
            created,
        });

        Ok(Some(EnqueueTarget {
            document_id: document.id,
            base_id: document.base_id,
        }))
    }

    /// Enqueue enrichment tasks for an already-ingested document
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when no document carries the base id, and
    /// database errors verbatim.
    pub async fn enqueue_for_document(
        &self,
        collection: &str,
        base_id: &str,
    ) -> IngestResult<usize> {
        let Some(document) = self
            .repository
            .get_document_by_base_id(Some(collection), base_id)
            .await?
        else {
            return Err(IngestError::InvalidRequest(format!(
                "unknown document '{base_id}' in collection '{collection}'"
            )));
        };
        self.enqueue_document(
            collection,
            &EnqueueTarget {
                document_id: document.id,
                base_id: document.base_id,
            },
        )
        .await
    }

    /// Enqueue one task per chunk, paginated to bound memory
    async fn enqueue_document(
        &self,
        collection: &str,
        target: &EnqueueTarget,
    ) -> IngestResult<usize> {
        let mut cursor = -1;
        let mut total = 0;
        loop {
            let page = self
                .repository
                .chunk_page(target.document_id, cursor, CHUNK_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map_or(cursor, |seed| seed.chunk_index);

            for window in page.chunks(ENQUEUE_BATCH_SIZE) {
                let payloads: Vec<TaskPayload> = window
                    .iter()
                    .map(|seed| TaskPayload {
                        chunk_id: format!("{}:{}", target.base_id, seed.chunk_index),
                        base_id: target.base_id.clone(),
                        chunk_index: seed.chunk_index,
                        collection: collection.to_string(),
                        doc_type: seed.doc_type.clone(),
                        text: seed.text.clone(),
                        source: seed.source.clone(),
                        tier1_meta: seed.tier1_meta.clone(),
                    })
                    .collect();
                total += self.queue.enqueue(&payloads).await?;
            }
        }
        Ok(total)
    }
}

struct EnqueueTarget {
    document_id: uuid::Uuid,
    base_id: String,
}

/// Blob key for an off-loaded raw payload
fn raw_payload_key(collection: &str, identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    format!("raw/{collection}/{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raged_config::FetchConfig;
    use raged_data::error::{DatabaseError, DatabaseResult};
    use raged_data::filter::Filter;
    use raged_data::models::{
        ChunkSeed, ChunkStatusCounts, ClaimedTask, CollectionStats, Document, EnrichmentReport,
        QueueStats, SearchHit, TaskResult, TaskStatus,
    };
    use raged_embeddings::{EmbeddingError, EmbeddingResult};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MockRepo {
        documents: Mutex<HashMap<(String, String), Document>>,
        chunks: Mutex<HashMap<Uuid, Vec<NewChunk>>>,
    }

    fn mock_document(new_doc: &NewDocument) -> Document {
        let now = chrono::Utc::now();
        Document {
            id: Uuid::new_v4(),
            base_id: new_doc.base_id.clone(),
            collection: new_doc.collection.clone(),
            source: new_doc.source.clone(),
            identity_key: new_doc.identity_key.clone(),
            mime_type: new_doc.mime_type.clone(),
            summary: None,
            summary_short: None,
            summary_medium: None,
            summary_long: None,
            raw_data: new_doc.raw_data.clone(),
            raw_key: new_doc.raw_key.clone(),
            ingested_at: now,
            updated_at: now,
            last_seen: now,
        }
    }

    #[async_trait]
    impl DocumentRepository for MockRepo {
        async fn upsert_document(
            &self,
            doc: &NewDocument,
            overwrite: bool,
        ) -> DatabaseResult<(Document, UpsertOutcome)> {
            let mut documents = self.documents.lock().unwrap();
            let key = (doc.collection.clone(), doc.identity_key.clone());
            if let Some(existing) = documents.get_mut(&key) {
                existing.last_seen = chrono::Utc::now();
                let outcome = if overwrite {
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Refreshed
                };
                return Ok((existing.clone(), outcome));
            }
            let document = mock_document(doc);
            documents.insert(key, document.clone());
            Ok((document, UpsertOutcome::Created))
        }

        async fn replace_chunks(
            &self,
            document_id: Uuid,
            chunks: &[NewChunk],
            expected_dim: usize,
        ) -> DatabaseResult<usize> {
            for chunk in chunks {
                if chunk.embedding.len() != expected_dim {
                    return Err(DatabaseError::VectorDimensionMismatch {
                        got: chunk.embedding.len(),
                        expected: expected_dim,
                    });
                }
            }
            self.chunks
                .lock()
                .unwrap()
                .insert(document_id, chunks.to_vec());
            Ok(chunks.len())
        }

        async fn get_document_by_base_id(
            &self,
            _collection: Option<&str>,
            _base_id: &str,
        ) -> DatabaseResult<Option<Document>> {
            Ok(None)
        }

        async fn get_document(&self, _id: Uuid) -> DatabaseResult<Option<Document>> {
            Ok(None)
        }

        async fn chunk_texts(&self, _document_id: Uuid) -> DatabaseResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn chunk_page(
            &self,
            document_id: Uuid,
            after_index: i32,
            limit: i64,
        ) -> DatabaseResult<Vec<ChunkSeed>> {
            let chunks = self.chunks.lock().unwrap();
            let Some(list) = chunks.get(&document_id) else {
                return Ok(Vec::new());
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Ok(list
                .iter()
                .filter(|c| c.chunk_index > after_index)
                .take(limit as usize)
                .map(|c| ChunkSeed {
                    chunk_index: c.chunk_index,
                    text: c.text.clone(),
                    doc_type: c.doc_type.clone(),
                    source: c.source.clone(),
                    tier1_meta: c.tier1_meta.clone(),
                })
                .collect())
        }

        async fn semantic_search(
            &self,
            _collection: &str,
            _embedding: Vec<f32>,
            _filter: &Filter,
            _top_k: i64,
            _min_score: f32,
        ) -> DatabaseResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        async fn metadata_scan(
            &self,
            _collection: &str,
            _filter: &Filter,
            _top_k: i64,
        ) -> DatabaseResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        async fn fulltext_search(
            &self,
            _collection: &str,
            _query: &str,
            _filter: &Filter,
            _top_k: i64,
        ) -> DatabaseResult<Vec<SearchHit>> {
            Ok(Vec::new())
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

    struct MockEmbedder {
        dimension: usize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingService for MockEmbedder {
        async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            if self.fail {
                return Err(EmbeddingError::Upstream {
                    message: "backend down".to_string(),
                });
            }
            Ok(texts.iter().map(|_| vec![0.1; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    #[derive(Default)]
    struct MockQueue {
        enqueued: Mutex<Vec<TaskPayload>>,
    }

    #[async_trait]
    impl EnrichmentQueue for MockQueue {
        async fn enqueue(&self, payloads: &[TaskPayload]) -> DatabaseResult<usize> {
            self.enqueued.lock().unwrap().extend(payloads.iter().cloned());
            Ok(payloads.len())
        }

        async fn claim(&self, _worker_id: &str) -> DatabaseResult<Option<ClaimedTask>> {
            Ok(None)
        }

        async fn submit_result(
            &self,
            _task_id: Uuid,
            _result: &TaskResult,
        ) -> DatabaseResult<()> {
            Ok(())
        }

        async fn fail(&self, _task_id: Uuid, _message: &str) -> DatabaseResult<TaskStatus> {
            Ok(TaskStatus::Pending)
        }

        async fn recover_stale(&self) -> DatabaseResult<u64> {
            Ok(0)
        }

        async fn stats(
            &self,
            _collection: Option<&str>,
            _query: Option<&str>,
        ) -> DatabaseResult<QueueStats> {
            Ok(QueueStats::default())
        }

        async fn clear(&self, _collection: &str, _query: Option<&str>) -> DatabaseResult<u64> {
            Ok(0)
        }
    }

    fn service(enrich_enabled: bool, embed_fail: bool) -> (IngestService, Arc<MockQueue>) {
        let queue = Arc::new(MockQueue::default());
        let service = IngestService::new(
            Arc::new(MockRepo::default()),
            Arc::new(MockEmbedder {
                dimension: 8,
                fail: embed_fail,
            }),
            Arc::new(UrlFetcher::new(FetchConfig::default()).unwrap()),
            Arc::clone(&queue) as Arc<dyn EnrichmentQueue>,
            None,
            IngestServiceConfig {
                vector_dim: 8,
                enrichment_enabled: enrich_enabled,
                ..IngestServiceConfig::default()
            },
        );
        (service, queue)
    }

    fn text_item(text: &str, source: &str) -> IngestItem {
        IngestItem {
            text: Some(text.to_string()),
            source: Some(source.to_string()),
            ..IngestItem::default()
        }
    }

    #[tokio::test]
    async fn single_text_item_creates_one_chunk_pending() {
        let (service, queue) = service(true, false);
        let report = service
            .ingest(IngestRequest {
                items: vec![text_item("hello world", "x.txt")],
                enrich: Some(true),
                ..IngestRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(report.upserted, 1);
        assert_eq!(report.chunks, 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.documents[0].base_id, "x.txt");

        let enqueued = queue.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].chunk_id, "x.txt:0");
        assert_eq!(enqueued[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn enrichment_disabled_enqueues_nothing() {
        let (service, queue) = service(false, false);
        service
            .ingest(IngestRequest {
                items: vec![text_item("hello world", "x.txt")],
                enrich: Some(true),
                ..IngestRequest::default()
            })
            .await
            .unwrap();

        assert!(queue.enqueued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn loopback_url_is_reported_not_fatal() {
        let (service, _) = service(false, false);
        let report = service
            .ingest(IngestRequest {
                items: vec![IngestItem {
                    url: Some("http://127.0.0.1/".to_string()),
                    ..IngestItem::default()
                }],
                ..IngestRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(report.upserted, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].url, "http://127.0.0.1/");
    }

    #[tokio::test]
    async fn empty_text_is_skipped_with_warning() {
        let (service, _) = service(false, false);
        let report = service
            .ingest(IngestRequest {
                items: vec![text_item("   ", "empty.txt")],
                ..IngestRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(report.upserted, 0);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_aborts_the_batch() {
        let (service, _) = service(false, true);
        let err = service
            .ingest(IngestRequest {
                items: vec![text_item("hello", "x.txt")],
                ..IngestRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));
    }

    #[tokio::test]
    async fn reingest_without_overwrite_refreshes_only() {
        let (service, _) = service(false, false);
        let request = IngestRequest {
            items: vec![text_item("hello world", "x.txt")],
            ..IngestRequest::default()
        };
        let first = service.ingest(request.clone()).await.unwrap();
        assert_eq!(first.chunks, 1);

        let second = service.ingest(request).await.unwrap();
        assert_eq!(second.upserted, 1);
        assert_eq!(second.chunks, 0, "refresh must not rewrite chunks");
        assert!(!second.documents[0].created);
    }

    #[tokio::test]
    async fn reingest_with_overwrite_replaces_chunks() {
        let (service, _) = service(false, false);
        service
            .ingest(IngestRequest {
                items: vec![text_item("hello world", "x.txt")],
                ..IngestRequest::default()
            })
            .await
            .unwrap();

        let report = service
            .ingest(IngestRequest {
                items: vec![text_item("fresh content", "x.txt")],
                overwrite: Some(true),
                ..IngestRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(report.chunks, 1);
    }
}
