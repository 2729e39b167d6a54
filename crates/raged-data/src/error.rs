//! Structured error handling for the data layer
//!
//! Provides error types with full context for database operations, the task
//! queue, and blob storage failures.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for database operations
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

/// Database operation type for error context
#[derive(Debug, Clone)]
pub enum DatabaseOperation {
    /// Document operations
    UpsertDocument {
        collection: String,
        identity_key: String,
    },
    GetDocument {
        base_id: String,
    },
    ReplaceChunks {
        document_id: Uuid,
        chunk_count: usize,
    },
    GetChunks {
        document_id: Uuid,
    },

    /// Retrieval operations
    SemanticSearch {
        collection: String,
    },
    MetadataScan {
        collection: String,
    },
    FulltextSearch {
        collection: String,
    },

    /// Task queue operations
    EnqueueTasks {
        task_count: usize,
    },
    ClaimTask {
        worker_id: String,
    },
    CompleteTask {
        task_id: Uuid,
    },
    FailTask {
        task_id: Uuid,
    },
    RecoverStaleTasks,
    ClearTasks {
        collection: String,
    },

    /// Graph operations
    MergeEntities {
        entity_count: usize,
    },
    ExpandEntity {
        name: String,
    },

    /// Generic operations
    Query {
        description: String,
    },
    Transaction {
        description: String,
    },
    Migration {
        version: i64,
    },
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpsertDocument {
                collection,
                identity_key,
            } => write!(
                f,
                "upsert_document(collection={collection}, identity={identity_key})"
            ),
            Self::GetDocument { base_id } => write!(f, "get_document(base_id={base_id})"),
            Self::ReplaceChunks {
                document_id,
                chunk_count,
            } => write!(
                f,
                "replace_chunks(document={document_id}, count={chunk_count})"
            ),
            Self::GetChunks { document_id } => {
                write!(f, "get_chunks(document={document_id})")
            }
            Self::SemanticSearch { collection } => {
                write!(f, "semantic_search(collection={collection})")
            }
            Self::MetadataScan { collection } => {
                write!(f, "metadata_scan(collection={collection})")
            }
            Self::FulltextSearch { collection } => {
                write!(f, "fulltext_search(collection={collection})")
            }
            Self::EnqueueTasks { task_count } => {
                write!(f, "enqueue_tasks(count={task_count})")
            }
            Self::ClaimTask { worker_id } => write!(f, "claim_task(worker={worker_id})"),
            Self::CompleteTask { task_id } => write!(f, "complete_task(task={task_id})"),
            Self::FailTask { task_id } => write!(f, "fail_task(task={task_id})"),
            Self::RecoverStaleTasks => write!(f, "recover_stale_tasks"),
            Self::ClearTasks { collection } => {
                write!(f, "clear_tasks(collection={collection})")
            }
            Self::MergeEntities { entity_count } => {
                write!(f, "merge_entities(count={entity_count})")
            }
            Self::ExpandEntity { name } => write!(f, "expand_entity(name={name})"),
            Self::Query { description } => write!(f, "query({description})"),
            Self::Transaction { description } => write!(f, "transaction({description})"),
            Self::Migration { version } => write!(f, "migration(v{version})"),
        }
    }
}

/// Database error with operation context
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Query execution error
    #[error(
        "Query failed for operation '{operation}': {message} (correlation_id={correlation_id:?})"
    )]
    QueryFailed {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Constraint violation
    #[error(
        "Database constraint violation in table '{table}': {constraint} (operation='{operation}', correlation_id={correlation_id:?})"
    )]
    ConstraintViolation {
        table: String,
        constraint: String,
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Query timeout
    #[error(
        "Query timeout for operation '{operation}' (timeout={timeout_secs}s, correlation_id={correlation_id:?})"
    )]
    QueryTimeout {
        operation: Box<DatabaseOperation>,
        timeout_secs: u64,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// A row the operation requires does not exist
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A worker-supplied chunk id failed format validation
    #[error("Invalid chunk id: {message}")]
    ChunkIdInvalid { message: String },

    /// Vector dimension did not match the configured constant
    #[error("Vector dimension mismatch: got {got}, expected {expected}")]
    VectorDimensionMismatch { got: usize, expected: usize },

    /// Transaction rollback
    #[error(
        "Transaction rolled back for operation '{operation}': {reason} (correlation_id={correlation_id:?})"
    )]
    TransactionRollback {
        operation: Box<DatabaseOperation>,
        reason: String,
        correlation_id: Option<String>,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Migration error
    #[error("Database migration failed at version {version}: {message}")]
    MigrationFailed { version: i64, message: String },

    /// Blob store error
    #[error("Blob store unavailable: {message}")]
    BlobStoreUnavailable { message: String },

    /// Configuration error
    #[error("Database configuration error: {message}")]
    ConfigurationError { message: String },

    /// Unexpected database state
    #[error(
        "Unexpected database state for operation '{operation}': {message} (correlation_id={correlation_id:?})"
    )]
    UnexpectedState {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
    },
}

impl DatabaseError {
    /// Create a new query failed error from `sqlx::Error`
    pub fn query_failed(
        operation: DatabaseOperation,
        source: sqlx::Error,
        correlation_id: Option<String>,
    ) -> Self {
        let message = source.to_string();

        if let Some(db_err) = source.as_database_error() {
            if let Some(constraint) = db_err.constraint() {
                let table = Self::extract_table_from_constraint(constraint)
                    .unwrap_or_else(|| "unknown".to_string());

                return Self::ConstraintViolation {
                    table,
                    constraint: constraint.to_string(),
                    operation: Box::new(operation),
                    correlation_id,
                    source,
                };
            }
        }

        if message.contains("timeout") || message.contains("timed out") {
            return Self::QueryTimeout {
                operation: Box::new(operation),
                timeout_secs: 30,
                correlation_id,
                source,
            };
        }

        Self::QueryFailed {
            operation: Box::new(operation),
            message,
            correlation_id,
            source,
        }
    }

    /// Whether this error is a tsquery syntax failure
    ///
    /// Used by the full-text scan to decide that the caller's query cannot be
    /// parsed by `websearch_to_tsquery` and the ILIKE fallback should run
    /// instead. SQLSTATE `42601` is the generic syntax error class and
    /// `2201B` covers invalid regular/tsquery arguments.
    pub fn is_tsquery_syntax(&self) -> bool {
        let source = match self {
            Self::QueryFailed { source, .. }
            | Self::ConstraintViolation { source, .. }
            | Self::QueryTimeout { source, .. } => source,
            _ => return false,
        };
        source
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "42601" || code == "2201B")
    }

    /// Extract the table name from a constraint like `documents_collection_identity_key_key`
    fn extract_table_from_constraint(constraint: &str) -> Option<String> {
        constraint.split('_').next().map(ToString::to_string)
    }
}

/// Extension trait to map `sqlx` errors with operation context
pub trait DatabaseErrorExt<T> {
    /// Map an `sqlx::Error` into a contextual [`DatabaseError`]
    fn map_db_err(
        self,
        operation: DatabaseOperation,
        correlation_id: Option<String>,
    ) -> DatabaseResult<T>;
}

impl<T> DatabaseErrorExt<T> for std::result::Result<T, sqlx::Error> {
    fn map_db_err(
        self,
        operation: DatabaseOperation,
        correlation_id: Option<String>,
    ) -> DatabaseResult<T> {
        self.map_err(|e| DatabaseError::query_failed(operation, e, correlation_id))
    }
}
