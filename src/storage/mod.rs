//! Durable job postings and their embeddings, backed by SQLite.
//!
//! Each posting row carries a SHA-256 of its description. When an upsert
//! changes the description the stored embedding is cleared, so only new or
//! edited postings are re-embedded. Embeddings are stored as little-endian
//! f32 blobs together with their dimension and the model that produced them.
//!
//! Every write runs in its own transaction; a failed write never leaves a
//! partially updated row behind.

mod error;

pub use error::{StoreError, StoreResult};

use std::collections::HashSet;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use sha2::{Digest, Sha256};

use crate::types::{JobId, JobPosting, NewJobPosting};
use crate::vector::Embedding;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS job_postings (
    job_id            INTEGER PRIMARY KEY,
    title             TEXT NOT NULL,
    company           TEXT NOT NULL DEFAULT '',
    description       TEXT NOT NULL,
    location          TEXT,
    salary_range      TEXT,
    job_type          TEXT,
    post_date         TEXT,
    url               TEXT,
    description_hash  TEXT NOT NULL,
    embedding         BLOB,
    embedding_dim     INTEGER,
    embedding_model   TEXT,
    updated_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_job_postings_unembedded
    ON job_postings(job_id) WHERE embedding IS NULL;
"#;

const POSTING_COLUMNS: &str = "job_id, title, company, description, location, salary_range, \
     job_type, post_date, url, embedding";

/// SQLite bind-parameter budget per `IN (...)` query.
const ID_CHUNK: usize = 500;

/// Outcome of [`JobStore::upsert_posting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Existing row updated; `embedding_cleared` when the description changed.
    Updated { embedding_cleared: bool },
}

/// Relational store for postings and embeddings.
///
/// The connection sits behind a mutex so the store can be shared across
/// threads; SQLite serializes writers anyway.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").finish_non_exhaustive()
    }
}

impl JobStore {
    /// Open or create the store at the provided sqlite path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the value; used by tests and benches.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a posting, or update it in place.
    ///
    /// A changed description clears the stored embedding.
    pub fn upsert_posting(&self, posting: &NewJobPosting) -> StoreResult<UpsertOutcome> {
        if posting.description.trim().is_empty() {
            return Err(StoreError::InvalidPosting {
                id: posting.job_id,
                reason: "description is empty".to_string(),
            });
        }
        if posting.title.trim().is_empty() {
            return Err(StoreError::InvalidPosting {
                id: posting.job_id,
                reason: "title is empty".to_string(),
            });
        }

        let hash = description_hash(&posting.description);
        let now = chrono::Utc::now().to_rfc3339();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT description_hash FROM job_postings WHERE job_id = ?1",
                params![posting.job_id.get()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO job_postings (
                        job_id, title, company, description, location, salary_range,
                        job_type, post_date, url, description_hash, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        posting.job_id.get(),
                        posting.title,
                        posting.company,
                        posting.description,
                        posting.location,
                        posting.salary_range,
                        posting.job_type,
                        posting.post_date,
                        posting.url,
                        hash,
                        now
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some(previous_hash) => {
                let changed = previous_hash != hash;
                tx.execute(
                    "UPDATE job_postings SET
                        title = ?2, company = ?3, description = ?4, location = ?5,
                        salary_range = ?6, job_type = ?7, post_date = ?8, url = ?9,
                        description_hash = ?10, updated_at = ?11
                     WHERE job_id = ?1",
                    params![
                        posting.job_id.get(),
                        posting.title,
                        posting.company,
                        posting.description,
                        posting.location,
                        posting.salary_range,
                        posting.job_type,
                        posting.post_date,
                        posting.url,
                        hash,
                        now
                    ],
                )?;
                if changed {
                    tx.execute(
                        "UPDATE job_postings
                         SET embedding = NULL, embedding_dim = NULL, embedding_model = NULL
                         WHERE job_id = ?1",
                        params![posting.job_id.get()],
                    )?;
                }
                UpsertOutcome::Updated {
                    embedding_cleared: changed,
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_posting(&self, id: JobId) -> StoreResult<Option<JobPosting>> {
        let conn = self.conn.lock();
        let posting = conn
            .query_row(
                &format!("SELECT {POSTING_COLUMNS} FROM job_postings WHERE job_id = ?1"),
                params![id.get()],
                posting_from_row,
            )
            .optional()?;
        Ok(posting)
    }

    /// Fetches postings for `ids`, preserving the requested order.
    ///
    /// Ids that no longer exist are skipped.
    pub fn get_postings(&self, ids: &[JobId]) -> StoreResult<Vec<JobPosting>> {
        let conn = self.conn.lock();
        let mut found = std::collections::HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT {POSTING_COLUMNS} FROM job_postings WHERE job_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(JobId::get)), posting_from_row)?;
            for posting in rows {
                let posting = posting?;
                found.insert(posting.job_id, posting);
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Removes a posting and its embedding.
    pub fn delete_posting(&self, id: JobId) -> StoreResult<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM job_postings WHERE job_id = ?1", params![id.get()])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Returns the subset of `ids` still present in the store.
    pub fn existing_ids(&self, ids: &[JobId]) -> StoreResult<HashSet<JobId>> {
        let conn = self.conn.lock();
        let mut existing = HashSet::with_capacity(ids.len());

        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT job_id FROM job_postings WHERE job_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(JobId::get)), |row| {
                row.get::<_, i64>(0)
            })?;
            for id in rows {
                existing.insert(JobId::new(id?));
            }
        }

        Ok(existing)
    }

    /// Postings whose embedding is absent, ordered by job id.
    pub fn get_postings_missing_embeddings(&self) -> StoreResult<Vec<JobPosting>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSTING_COLUMNS} FROM job_postings WHERE embedding IS NULL ORDER BY job_id ASC"
        ))?;
        let postings = stmt
            .query_map([], posting_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(postings)
    }

    /// Stores the embedding for an existing posting.
    ///
    /// The first stored embedding fixes the store's dimension; later ones must
    /// match it until all embeddings are cleared.
    pub fn save_embedding(&self, id: JobId, embedding: &Embedding, model_id: &str) -> StoreResult<()> {
        let dimension = embedding.dimension().get();
        let blob = embedding.to_le_bytes();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT job_id FROM job_postings WHERE job_id = ?1",
                params![id.get()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id));
        }

        let established: Option<i64> = tx
            .query_row(
                "SELECT embedding_dim FROM job_postings
                 WHERE embedding IS NOT NULL AND job_id != ?1 LIMIT 1",
                params![id.get()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(expected) = established {
            if expected as usize != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: expected as usize,
                    actual: dimension,
                });
            }
        }

        tx.execute(
            "UPDATE job_postings
             SET embedding = ?2, embedding_dim = ?3, embedding_model = ?4
             WHERE job_id = ?1",
            params![id.get(), blob, dimension as i64, model_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All stored embeddings ordered by ascending job id.
    ///
    /// The order is stable for a fixed store state; index positions are
    /// assigned from it.
    pub fn get_all_embeddings(&self) -> StoreResult<Vec<(JobId, Embedding)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, embedding FROM job_postings
             WHERE embedding IS NOT NULL ORDER BY job_id ASC",
        )?;
        let embeddings = stmt
            .query_map([], |row| {
                let id = JobId::new(row.get(0)?);
                let blob: Vec<u8> = row.get(1)?;
                let embedding = decode_embedding(1, &blob)?;
                Ok((id, embedding))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(embeddings)
    }

    /// Clears embeddings produced by any model other than `model_id`.
    ///
    /// Returns the number of postings that now need re-embedding.
    pub fn clear_embeddings_not_from(&self, model_id: &str) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let cleared = conn.execute(
            "UPDATE job_postings
             SET embedding = NULL, embedding_dim = NULL, embedding_model = NULL
             WHERE embedding IS NOT NULL
               AND (embedding_model IS NULL OR embedding_model != ?1)",
            params![model_id],
        )?;
        Ok(cleared)
    }

    /// Clears every stored embedding, forcing a full re-embed.
    pub fn clear_embeddings(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let cleared = conn.execute(
            "UPDATE job_postings
             SET embedding = NULL, embedding_dim = NULL, embedding_model = NULL
             WHERE embedding IS NOT NULL",
            [],
        )?;
        Ok(cleared)
    }

    pub fn count_postings(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM job_postings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_embedded(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job_postings WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Hex SHA-256 of a description.
pub fn description_hash(description: &str) -> String {
    let digest = Sha256::digest(description.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn decode_embedding(column: usize, blob: &[u8]) -> rusqlite::Result<Embedding> {
    Embedding::from_le_bytes(blob)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Blob, Box::new(e)))
}

fn posting_from_row(row: &Row<'_>) -> rusqlite::Result<JobPosting> {
    let blob: Option<Vec<u8>> = row.get(9)?;
    let embedding = blob
        .as_deref()
        .map(|bytes| decode_embedding(9, bytes))
        .transpose()?;

    Ok(JobPosting {
        job_id: JobId::new(row.get(0)?),
        title: row.get(1)?,
        company: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        salary_range: row.get(5)?,
        job_type: row.get(6)?,
        post_date: row.get(7)?,
        url: row.get(8)?,
        embedding,
    })
}
