//! Document and chunk repository
//!
//! All SQL touching the documents/chunks tables lives here: the idempotent
//! ingestion upsert, atomic chunk replacement, and the three retrieval
//! queries (vector kNN, metadata scan, full-text with ILIKE fallback).

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::collections::HashMap;
use uuid::Uuid;

use crate::chunk_id::{ChunkId, payload_checksum};
use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::filter::Filter;
use crate::models::{
    ChunkEnrichmentState, ChunkSeed, ChunkStatusCounts, CollectionStats, Document,
    EnrichmentReport, EnrichmentStatus, NewChunk, NewDocument, SearchHit, UpsertOutcome,
};
use crate::pool_manager::PoolManager;

/// Storage operations the ingestion and query services depend on
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Upsert a document by `(collection, identity_key)`
    ///
    /// On conflict the row's `last_seen`/`updated_at` are refreshed; content
    /// columns are replaced only when `overwrite` is set.
    async fn upsert_document(
        &self,
        doc: &NewDocument,
        overwrite: bool,
    ) -> DatabaseResult<(Document, UpsertOutcome)>;

    /// Atomically replace all chunks of a document
    ///
    /// Validates every embedding against `expected_dim` before the
    /// transaction opens; a mismatch aborts with
    /// [`DatabaseError::VectorDimensionMismatch`].
    async fn replace_chunks(
        &self,
        document_id: Uuid,
        chunks: &[NewChunk],
        expected_dim: usize,
    ) -> DatabaseResult<usize>;

    /// Look up a document by base id, optionally narrowed to a collection
    async fn get_document_by_base_id(
        &self,
        collection: Option<&str>,
        base_id: &str,
    ) -> DatabaseResult<Option<Document>>;

    /// Look up a document by primary key
    async fn get_document(&self, id: Uuid) -> DatabaseResult<Option<Document>>;

    /// All chunk texts of a document in index order
    async fn chunk_texts(&self, document_id: Uuid) -> DatabaseResult<Vec<String>>;

    /// One page of chunk seeds after `after_index`, for enqueue pagination
    async fn chunk_page(
        &self,
        document_id: Uuid,
        after_index: i32,
        limit: i64,
    ) -> DatabaseResult<Vec<ChunkSeed>>;

    /// Cosine kNN over chunk embeddings within a collection
    async fn semantic_search(
        &self,
        collection: &str,
        embedding: Vec<f32>,
        filter: &Filter,
        top_k: i64,
        min_score: f32,
    ) -> DatabaseResult<Vec<SearchHit>>;

    /// Filter-only scan ordered by chunk recency; every hit scores 1.0
    async fn metadata_scan(
        &self,
        collection: &str,
        filter: &Filter,
        top_k: i64,
    ) -> DatabaseResult<Vec<SearchHit>>;

    /// Full-text scan with automatic ILIKE-only retry on tsquery syntax errors
    async fn fulltext_search(
        &self,
        collection: &str,
        query: &str,
        filter: &Filter,
        top_k: i64,
    ) -> DatabaseResult<Vec<SearchHit>>;

    /// Per-collection document and chunk counts
    async fn collection_stats(&self) -> DatabaseResult<Vec<CollectionStats>>;

    /// Chunk counts by enrichment status
    ///
    /// `query` matches full-text plus ILIKE over the chunk text, document
    /// source, doc type and document summaries; unparseable tsquery input
    /// retries as ILIKE only.
    async fn chunk_status_counts(
        &self,
        collection: Option<&str>,
        query: Option<&str>,
    ) -> DatabaseResult<ChunkStatusCounts>;

    /// Per-document enrichment report
    async fn enrichment_report(
        &self,
        collection: Option<&str>,
        base_id: &str,
    ) -> DatabaseResult<Option<EnrichmentReport>>;
}

/// Bind a JSON parameter as its natural Postgres type
///
/// Placeholder order is established by the caller pushing values in order;
/// this only selects the wire encoding.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q JsonValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        JsonValue::String(s) => query.bind(s.as_str()),
        JsonValue::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        JsonValue::Number(n) => query.bind(n.as_f64()),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Null => query.bind(Option::<String>::None),
        other => query.bind(other),
    }
}

/// `PostgreSQL` implementation over the shared pool manager
pub struct PgDocumentRepository {
    pools: PoolManager,
}

impl PgDocumentRepository {
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }

    /// The SELECT list shared by the three retrieval queries
    const HIT_COLUMNS: &'static str = r"
        c.id AS chunk_row_id, c.document_id, c.chunk_index, c.text, c.doc_type,
        c.source, c.path, c.lang, c.item_url,
        c.tier1_meta, c.tier2_meta, c.tier3_meta, c.enrichment_status,
        d.base_id, d.summary, d.summary_short";

    fn hit_from_row(row: &PgRow, score: f32) -> SearchHit {
        let base_id: String = row.get("base_id");
        let chunk_index: i32 = row.get("chunk_index");
        let status: String = row.get("enrichment_status");
        SearchHit {
            chunk_id: ChunkId::new(base_id.clone(), chunk_index).to_string(),
            document_id: row.get("document_id"),
            base_id,
            chunk_index,
            text: row.get("text"),
            doc_type: row.get("doc_type"),
            source: row.get("source"),
            path: row.get("path"),
            lang: row.get("lang"),
            item_url: row.get("item_url"),
            tier1_meta: row.get("tier1_meta"),
            tier2_meta: row.get("tier2_meta"),
            tier3_meta: row.get("tier3_meta"),
            enrichment_status: EnrichmentStatus::from(status),
            summary: row.get("summary"),
            summary_short: row.get("summary_short"),
            payload_checksum: String::new(),
            score,
        }
    }

    /// Compute payload checksums for the documents behind a hit set and
    /// stamp them onto the hits.
    async fn attach_checksums(&self, hits: &mut [SearchHit]) -> DatabaseResult<()> {
        if hits.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = {
            let mut ids: Vec<Uuid> = hits.iter().map(|h| h.document_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        let operation = DatabaseOperation::Query {
            description: "payload_checksums".to_string(),
        };
        let rows = sqlx::query(
            r"
            SELECT document_id, text
            FROM chunks
            WHERE document_id = ANY($1)
            ORDER BY document_id, chunk_index
            ",
        )
        .bind(&ids)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;

        let mut texts: HashMap<Uuid, Vec<String>> = HashMap::new();
        for row in rows {
            let document_id: Uuid = row.get("document_id");
            texts.entry(document_id).or_default().push(row.get("text"));
        }
        let checksums: HashMap<Uuid, String> = texts
            .into_iter()
            .map(|(id, texts)| (id, payload_checksum(&texts)))
            .collect();

        for hit in hits {
            if let Some(checksum) = checksums.get(&hit.document_id) {
                hit.payload_checksum = checksum.clone();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn upsert_document(
        &self,
        doc: &NewDocument,
        overwrite: bool,
    ) -> DatabaseResult<(Document, UpsertOutcome)> {
        let operation = DatabaseOperation::UpsertDocument {
            collection: doc.collection.clone(),
            identity_key: doc.identity_key.clone(),
        };

        // `xmax = 0` distinguishes a fresh insert from a conflict update.
        let sql = if overwrite {
            r"
            INSERT INTO documents
                (base_id, collection, source, identity_key, mime_type, raw_data, raw_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (collection, identity_key) DO UPDATE SET
                base_id = EXCLUDED.base_id,
                source = EXCLUDED.source,
                mime_type = EXCLUDED.mime_type,
                raw_data = EXCLUDED.raw_data,
                raw_key = EXCLUDED.raw_key,
                updated_at = NOW(),
                last_seen = NOW()
            RETURNING *, (xmax = 0) AS was_inserted
            "
        } else {
            r"
            INSERT INTO documents
                (base_id, collection, source, identity_key, mime_type, raw_data, raw_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (collection, identity_key) DO UPDATE SET
                updated_at = NOW(),
                last_seen = NOW()
            RETURNING *, (xmax = 0) AS was_inserted
            "
        };

        let row = sqlx::query(sql)
            .bind(&doc.base_id)
            .bind(&doc.collection)
            .bind(&doc.source)
            .bind(&doc.identity_key)
            .bind(&doc.mime_type)
            .bind(&doc.raw_data)
            .bind(&doc.raw_key)
            .fetch_one(self.pools.write_pool())
            .await
            .map_db_err(operation, None)?;

        let was_inserted: bool = row.get("was_inserted");
        let document = document_from_row(&row);
        let outcome = if was_inserted {
            UpsertOutcome::Created
        } else if overwrite {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Refreshed
        };
        Ok((document, outcome))
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

        let operation = DatabaseOperation::ReplaceChunks {
            document_id,
            chunk_count: chunks.len(),
        };

        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err(operation.clone(), None)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;

        for chunk in chunks {
            sqlx::query(
                r"
                INSERT INTO chunks
                    (document_id, chunk_index, text, embedding, doc_type, source, path,
                     lang, repo_id, repo_url, item_url, tier1_meta, enrichment_status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ",
            )
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(Vector::from(chunk.embedding.clone()))
            .bind(&chunk.doc_type)
            .bind(&chunk.source)
            .bind(&chunk.path)
            .bind(&chunk.lang)
            .bind(&chunk.repo_id)
            .bind(&chunk.repo_url)
            .bind(&chunk.item_url)
            .bind(&chunk.tier1_meta)
            .bind(chunk.enrichment_status.to_string())
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;
        }

        tx.commit().await.map_db_err(operation, None)?;
        Ok(chunks.len())
    }

    async fn get_document_by_base_id(
        &self,
        collection: Option<&str>,
        base_id: &str,
    ) -> DatabaseResult<Option<Document>> {
        let operation = DatabaseOperation::GetDocument {
            base_id: base_id.to_string(),
        };

        let row = if let Some(collection) = collection {
            sqlx::query(
                r"
                SELECT * FROM documents
                WHERE collection = $1 AND base_id = $2
                ORDER BY last_seen DESC
                LIMIT 1
                ",
            )
            .bind(collection)
            .bind(base_id)
            .fetch_optional(self.pools.read_pool())
            .await
        } else {
            sqlx::query(
                r"
                SELECT * FROM documents
                WHERE base_id = $1
                ORDER BY last_seen DESC
                LIMIT 1
                ",
            )
            .bind(base_id)
            .fetch_optional(self.pools.read_pool())
            .await
        }
        .map_db_err(operation, None)?;

        Ok(row.as_ref().map(document_from_row))
    }

    async fn get_document(&self, id: Uuid) -> DatabaseResult<Option<Document>> {
        let operation = DatabaseOperation::Query {
            description: "get_document_by_id".to_string(),
        };
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pools.read_pool())
            .await
            .map_db_err(operation, None)?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn chunk_texts(&self, document_id: Uuid) -> DatabaseResult<Vec<String>> {
        let operation = DatabaseOperation::GetChunks { document_id };
        let rows = sqlx::query(
            "SELECT text FROM chunks WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;
        Ok(rows.iter().map(|r| r.get("text")).collect())
    }

    async fn chunk_page(
        &self,
        document_id: Uuid,
        after_index: i32,
        limit: i64,
    ) -> DatabaseResult<Vec<ChunkSeed>> {
        let operation = DatabaseOperation::GetChunks { document_id };
        sqlx::query_as::<_, ChunkSeed>(
            r"
            SELECT chunk_index, text, doc_type, source, tier1_meta
            FROM chunks
            WHERE document_id = $1 AND chunk_index > $2
            ORDER BY chunk_index
            LIMIT $3
            ",
        )
        .bind(document_id)
        .bind(after_index)
        .bind(limit)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)
    }

    async fn semantic_search(
        &self,
        collection: &str,
        embedding: Vec<f32>,
        filter: &Filter,
        top_k: i64,
        min_score: f32,
    ) -> DatabaseResult<Vec<SearchHit>> {
        let operation = DatabaseOperation::SemanticSearch {
            collection: collection.to_string(),
        };

        // $1 embedding, $2 collection, filter params from $3, then
        // min_score and limit.
        let fragment = filter.compile(3);
        let min_score_idx = fragment.next_index;
        let limit_idx = min_score_idx + 1;
        let sql = format!(
            r"
            SELECT {columns},
                   1 - (c.embedding <=> $1) AS score
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = $2{filter}
              AND 1 - (c.embedding <=> $1) >= ${min_score_idx}
            ORDER BY c.embedding <=> $1, d.id, c.chunk_index
            LIMIT ${limit_idx}
            ",
            columns = Self::HIT_COLUMNS,
            filter = fragment.sql,
        );

        let mut query = sqlx::query(&sql)
            .bind(Vector::from(embedding))
            .bind(collection);
        for param in &fragment.params {
            query = bind_value(query, param);
        }
        query = query.bind(min_score).bind(top_k);

        let rows = query
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation, None)?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let score: f64 = row.get("score");
                #[allow(clippy::cast_possible_truncation)]
                Self::hit_from_row(row, score as f32)
            })
            .collect();
        self.attach_checksums(&mut hits).await?;
        Ok(hits)
    }

    async fn metadata_scan(
        &self,
        collection: &str,
        filter: &Filter,
        top_k: i64,
    ) -> DatabaseResult<Vec<SearchHit>> {
        let operation = DatabaseOperation::MetadataScan {
            collection: collection.to_string(),
        };

        let fragment = filter.compile(2);
        let limit_idx = fragment.next_index;
        let sql = format!(
            r"
            SELECT {columns}
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = $1{filter}
            ORDER BY c.created_at DESC, d.id, c.chunk_index
            LIMIT ${limit_idx}
            ",
            columns = Self::HIT_COLUMNS,
            filter = fragment.sql,
        );

        let mut query = sqlx::query(&sql).bind(collection);
        for param in &fragment.params {
            query = bind_value(query, param);
        }
        query = query.bind(top_k);

        let rows = query
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation, None)?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| Self::hit_from_row(row, 1.0))
            .collect();
        self.attach_checksums(&mut hits).await?;
        Ok(hits)
    }

    async fn fulltext_search(
        &self,
        collection: &str,
        query_text: &str,
        filter: &Filter,
        top_k: i64,
    ) -> DatabaseResult<Vec<SearchHit>> {
        let operation = DatabaseOperation::FulltextSearch {
            collection: collection.to_string(),
        };

        // Primary pass combines the tsquery with an ILIKE containment check.
        let fragment = filter.compile(3);
        let limit_idx = fragment.next_index;
        let sql = format!(
            r"
            SELECT {columns},
                   ts_rank(to_tsvector('simple', c.text),
                           websearch_to_tsquery('simple', $2)) AS rank
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = $1{filter}
              AND (to_tsvector('simple', c.text) @@ websearch_to_tsquery('simple', $2)
                   OR c.text ILIKE '%' || $2 || '%')
            ORDER BY rank DESC, d.id, c.chunk_index
            LIMIT ${limit_idx}
            ",
            columns = Self::HIT_COLUMNS,
            filter = fragment.sql,
        );

        let mut query = sqlx::query(&sql).bind(collection).bind(query_text);
        for param in &fragment.params {
            query = bind_value(query, param);
        }
        query = query.bind(top_k);

        let result = query.fetch_all(self.pools.read_pool()).await;

        let rows = match result.map_db_err(operation.clone(), None) {
            Ok(rows) => rows,
            Err(err) if err.is_tsquery_syntax() => {
                tracing::debug!(
                    collection,
                    "tsquery rejected the query text, retrying with ILIKE only"
                );
                return self
                    .fulltext_ilike_only(collection, query_text, filter, top_k)
                    .await;
            }
            Err(err) => return Err(err),
        };

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let rank: f32 = row.get("rank");
                Self::hit_from_row(row, rank)
            })
            .collect();
        self.attach_checksums(&mut hits).await?;
        Ok(hits)
    }

    async fn collection_stats(&self) -> DatabaseResult<Vec<CollectionStats>> {
        let operation = DatabaseOperation::Query {
            description: "collection_stats".to_string(),
        };
        sqlx::query_as::<_, CollectionStats>(
            r"
            SELECT d.collection,
                   COUNT(DISTINCT d.id) AS documents,
                   COUNT(c.id) AS chunks
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.collection
            ORDER BY d.collection
            ",
        )
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)
    }

    async fn chunk_status_counts(
        &self,
        collection: Option<&str>,
        query: Option<&str>,
    ) -> DatabaseResult<ChunkStatusCounts> {
        match self
            .chunk_status_counts_inner(collection, query, true)
            .await
        {
            Err(err) if err.is_tsquery_syntax() => {
                self.chunk_status_counts_inner(collection, query, false).await
            }
            other => other,
        }
    }

    async fn enrichment_report(
        &self,
        collection: Option<&str>,
        base_id: &str,
    ) -> DatabaseResult<Option<EnrichmentReport>> {
        let Some(document) = self.get_document_by_base_id(collection, base_id).await? else {
            return Ok(None);
        };

        let operation = DatabaseOperation::GetChunks {
            document_id: document.id,
        };
        let rows = sqlx::query(
            r"
            SELECT chunk_index, enrichment_status, enriched_at,
                   (tier3_meta ? '_error') AS has_error
            FROM chunks
            WHERE document_id = $1
            ORDER BY chunk_index
            ",
        )
        .bind(document.id)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;

        let chunks = rows
            .iter()
            .map(|row| {
                let status: String = row.get("enrichment_status");
                ChunkEnrichmentState {
                    chunk_index: row.get("chunk_index"),
                    status: EnrichmentStatus::from(status),
                    enriched_at: row.get("enriched_at"),
                    has_error: row.try_get("has_error").unwrap_or(false),
                }
            })
            .collect();

        Ok(Some(EnrichmentReport {
            base_id: document.base_id,
            collection: document.collection,
            chunks,
            has_summary: document.summary.is_some() || document.summary_medium.is_some(),
        }))
    }
}

impl PgDocumentRepository {
    async fn chunk_status_counts_inner(
        &self,
        collection: Option<&str>,
        query: Option<&str>,
        with_tsquery: bool,
    ) -> DatabaseResult<ChunkStatusCounts> {
        let operation = DatabaseOperation::Query {
            description: "chunk_status_counts".to_string(),
        };

        let mut conditions = vec!["TRUE".to_string()];
        if collection.is_some() {
            conditions.push("d.collection = $1".to_string());
        }
        if query.is_some() {
            let index = if collection.is_some() { 2 } else { 1 };
            let tsquery = if with_tsquery {
                format!(
                    "to_tsvector('simple', c.text) @@ websearch_to_tsquery('simple', ${index}) OR "
                )
            } else {
                String::new()
            };
            conditions.push(format!(
                "({tsquery}c.text ILIKE '%' || ${index} || '%' \
                 OR d.source ILIKE '%' || ${index} || '%' \
                 OR c.doc_type ILIKE '%' || ${index} || '%' \
                 OR d.summary ILIKE '%' || ${index} || '%' \
                 OR d.summary_short ILIKE '%' || ${index} || '%' \
                 OR d.summary_medium ILIKE '%' || ${index} || '%' \
                 OR d.summary_long ILIKE '%' || ${index} || '%')"
            ));
        }

        let sql = format!(
            r"
            SELECT
                COUNT(*) FILTER (WHERE c.enrichment_status = 'none') AS none_count,
                COUNT(*) FILTER (WHERE c.enrichment_status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE c.enrichment_status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE c.enrichment_status = 'enriched') AS enriched,
                COUNT(*) FILTER (WHERE c.enrichment_status = 'failed') AS failed
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE {}
            ",
            conditions.join(" AND ")
        );

        let mut q = sqlx::query(&sql);
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

        Ok(ChunkStatusCounts {
            none: row.try_get("none_count").unwrap_or(0),
            pending: row.try_get("pending").unwrap_or(0),
            processing: row.try_get("processing").unwrap_or(0),
            enriched: row.try_get("enriched").unwrap_or(0),
            failed: row.try_get("failed").unwrap_or(0),
        })
    }

    /// ILIKE-only retry used when the tsquery parser rejects the input
    async fn fulltext_ilike_only(
        &self,
        collection: &str,
        query_text: &str,
        filter: &Filter,
        top_k: i64,
    ) -> DatabaseResult<Vec<SearchHit>> {
        let operation = DatabaseOperation::FulltextSearch {
            collection: collection.to_string(),
        };

        let fragment = filter.compile(3);
        let limit_idx = fragment.next_index;
        let sql = format!(
            r"
            SELECT {columns}
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = $1{filter}
              AND c.text ILIKE '%' || $2 || '%'
            ORDER BY c.created_at DESC, d.id, c.chunk_index
            LIMIT ${limit_idx}
            ",
            columns = Self::HIT_COLUMNS,
            filter = fragment.sql,
        );

        let mut query = sqlx::query(&sql).bind(collection).bind(query_text);
        for param in &fragment.params {
            query = bind_value(query, param);
        }
        query = query.bind(top_k);

        let rows = query
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation, None)?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| Self::hit_from_row(row, 1.0))
            .collect();
        self.attach_checksums(&mut hits).await?;
        Ok(hits)
    }
}

/// Map a full document row
fn document_from_row(row: &PgRow) -> Document {
    Document {
        id: row.get("id"),
        base_id: row.get("base_id"),
        collection: row.get("collection"),
        source: row.get("source"),
        identity_key: row.get("identity_key"),
        mime_type: row.get("mime_type"),
        summary: row.get("summary"),
        summary_short: row.get("summary_short"),
        summary_medium: row.get("summary_medium"),
        summary_long: row.get("summary_long"),
        raw_data: row.get("raw_data"),
        raw_key: row.get("raw_key"),
        ingested_at: row.get("ingested_at"),
        updated_at: row.get("updated_at"),
        last_seen: row.get("last_seen"),
    }
}
