//! `PostgreSQL` context store
//!
//! Chunks live in `context_chunks` with their embedding as a `REAL[]`.
//! `replace_context` runs upsert, delete and insert inside one transaction,
//! and the upsert takes the context row lock, so two replaces of the same
//! context serialize and readers only ever see a committed set. Both upserts
//! only touch a row whose stored owner matches the caller.

use crate::error::{StoreError, StoreResult};
use crate::store::{
    ChunkRecord, ContextOwner, ContextState, ContextStatus, ContextStore, ReplaceContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repoctx_common::CorrelationId;
use repoctx_data::{DatabaseErrorExt, DatabaseOperation};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use std::time::Instant;

/// Rows per multi-row INSERT; 9 binds per row keeps well under the 65535 limit
const INSERT_BATCH_ROWS: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct ContextRow {
    context_id: String,
    repo_id: String,
    user_id: String,
    status: String,
    commit_sha: Option<String>,
    chunk_count: i32,
    file_count: i32,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContextRow> for ContextState {
    type Error = StoreError;

    fn try_from(row: ContextRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            context_id: row.context_id,
            repo_id: row.repo_id,
            user_id: row.user_id,
            commit_sha: row.commit_sha,
            chunk_count: usize::try_from(row.chunk_count).unwrap_or_default(),
            file_count: usize::try_from(row.file_count).unwrap_or_default(),
            last_error: row.last_error,
            updated_at: row.updated_at,
        })
    }
}

/// Integer columns of one chunk, range-checked before the transaction opens
struct ChunkRow<'a> {
    record: &'a ChunkRecord,
    sequence_index: i32,
    start_offset: i32,
    end_offset: i32,
}

fn to_i32(value: usize, what: &str, path: &str) -> StoreResult<i32> {
    i32::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("{what} {value} out of range in {path}")))
}

fn chunk_rows(records: &[ChunkRecord]) -> StoreResult<Vec<ChunkRow<'_>>> {
    records
        .iter()
        .map(|record| {
            let path = record.chunk.source_path.as_str();
            Ok(ChunkRow {
                record,
                sequence_index: to_i32(record.chunk.sequence_index, "sequence_index", path)?,
                start_offset: to_i32(record.chunk.start_offset, "start_offset", path)?,
                end_offset: to_i32(record.chunk.end_offset, "end_offset", path)?,
            })
        })
        .collect()
}

/// Context store backed by the shared `PostgreSQL` pool
#[derive(Clone)]
pub struct PostgresContextStore {
    pool: PgPool,
}

impl PostgresContextStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContextStore for PostgresContextStore {
    #[tracing::instrument(
        skip(self, replace, correlation_id),
        fields(chunk_count = replace.records.len(), correlation_id = %correlation_id)
    )]
    async fn replace_context(
        &self,
        context_id: &str,
        replace: ReplaceContext,
        correlation_id: &CorrelationId,
    ) -> StoreResult<usize> {
        replace.validate()?;
        let rows = chunk_rows(&replace.records)?;
        let chunk_count = to_i32(rows.len(), "chunk_count", context_id)?;
        let file_count = to_i32(replace.file_count, "file_count", context_id)?;
        let dimension = to_i32(replace.dimension, "dimension", context_id)?;

        let start = Instant::now();
        let cid = Some(correlation_id.to_string());
        let operation = || DatabaseOperation::ReplaceContext {
            context_id: context_id.to_string(),
            chunk_count: rows.len(),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_db_err(operation(), cid.clone())?;

        // A row owned by someone else is left untouched and reports zero rows
        let claimed = sqlx::query(
            r"
            INSERT INTO contexts (context_id, repo_id, user_id, status)
            VALUES ($1, $2, $3, 'processing')
            ON CONFLICT (context_id) DO UPDATE
            SET updated_at = NOW()
            WHERE contexts.user_id = EXCLUDED.user_id
              AND contexts.repo_id = EXCLUDED.repo_id
            ",
        )
        .bind(context_id)
        .bind(&replace.owner.repo_id)
        .bind(&replace.owner.user_id)
        .execute(&mut *tx)
        .await
        .map_db_err(operation(), cid.clone())?;
        if claimed.rows_affected() == 0 {
            return Err(StoreError::OwnerMismatch {
                context_id: context_id.to_string(),
            });
        }

        sqlx::query("DELETE FROM context_chunks WHERE context_id = $1")
            .bind(context_id)
            .execute(&mut *tx)
            .await
            .map_db_err(operation(), cid.clone())?;

        for batch in rows.chunks(INSERT_BATCH_ROWS) {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO context_chunks (context_id, source_path, sequence_index, \
                 start_offset, end_offset, content_hash, language, content, embedding) ",
            );
            builder.push_values(batch, |mut row, chunk_row| {
                let chunk = &chunk_row.record.chunk;
                row.push_bind(context_id)
                    .push_bind(chunk.source_path.as_str())
                    .push_bind(chunk_row.sequence_index)
                    .push_bind(chunk_row.start_offset)
                    .push_bind(chunk_row.end_offset)
                    .push_bind(chunk.content_hash.as_str())
                    .push_bind(chunk.language)
                    .push_bind(chunk.content.as_str())
                    .push_bind(chunk_row.record.embedding.as_slice());
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_db_err(operation(), cid.clone())?;
        }

        sqlx::query(
            r"
            UPDATE contexts
            SET status = 'completed',
                commit_sha = $2,
                chunk_count = $3,
                file_count = $4,
                dimension = $5,
                last_error = NULL,
                updated_at = NOW()
            WHERE context_id = $1
            ",
        )
        .bind(context_id)
        .bind(replace.commit_sha.as_deref())
        .bind(chunk_count)
        .bind(file_count)
        .bind(dimension)
        .execute(&mut *tx)
        .await
        .map_db_err(operation(), cid.clone())?;

        tx.commit().await.map_db_err(operation(), cid)?;

        tracing::debug!(
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Context replaced"
        );
        Ok(rows.len())
    }

    #[tracing::instrument(skip(self))]
    async fn job_auth_scope(&self, user_id: &str) -> StoreResult<HashSet<String>> {
        let repo_ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT repo_id FROM contexts WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_db_err(
                    DatabaseOperation::LoadAuthScope {
                        user_id: user_id.to_string(),
                    },
                    None,
                )?;

        Ok(repo_ids.into_iter().collect())
    }

    #[tracing::instrument(skip(self))]
    async fn context_state(&self, context_id: &str) -> StoreResult<Option<ContextState>> {
        let row = sqlx::query_as::<_, ContextRow>(
            r"
            SELECT context_id, repo_id, user_id, status, commit_sha,
                   chunk_count, file_count, last_error, updated_at
            FROM contexts
            WHERE context_id = $1
            ",
        )
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await
        .map_db_err(
            DatabaseOperation::LoadContextState {
                context_id: context_id.to_string(),
            },
            None,
        )?;

        row.map(ContextState::try_from).transpose()
    }

    #[tracing::instrument(skip(self, owner, error, correlation_id), fields(correlation_id = %correlation_id))]
    async fn mark_context_status(
        &self,
        context_id: &str,
        owner: &ContextOwner,
        status: ContextStatus,
        error: Option<&str>,
        correlation_id: &CorrelationId,
    ) -> StoreResult<()> {
        let updated = sqlx::query(
            r"
            INSERT INTO contexts (context_id, repo_id, user_id, status, last_error)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (context_id) DO UPDATE
            SET status = EXCLUDED.status,
                last_error = EXCLUDED.last_error,
                updated_at = NOW()
            WHERE contexts.user_id = EXCLUDED.user_id
              AND contexts.repo_id = EXCLUDED.repo_id
            ",
        )
        .bind(context_id)
        .bind(&owner.repo_id)
        .bind(&owner.user_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_db_err(
            DatabaseOperation::MarkContextStatus {
                context_id: context_id.to_string(),
                status: status.to_string(),
            },
            Some(correlation_id.to_string()),
        )?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::OwnerMismatch {
                context_id: context_id.to_string(),
            });
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn chunk_hashes(&self, context_id: &str) -> StoreResult<Vec<String>> {
        let hashes = sqlx::query_scalar(
            r"
            SELECT content_hash
            FROM context_chunks
            WHERE context_id = $1
            ORDER BY source_path, sequence_index
            ",
        )
        .bind(context_id)
        .fetch_all(&self.pool)
        .await
        .map_db_err(
            DatabaseOperation::LoadChunkHashes {
                context_id: context_id.to_string(),
            },
            None,
        )?;

        Ok(hashes)
    }
}
