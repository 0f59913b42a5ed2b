//! Postgres-backed job store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | Postgres Code | JobStoreError | Notes |
//! |------------|---------------|---------------|-------|
//! | Database (unique violation) | `23505` | `Duplicate` | Second active job for a subject |
//! | Database (check violation) | `23514` | `Storage` | Should not occur; writes are guarded |
//! | Database (other) | Any other | `Storage` | |
//! | Row decode | - | `Corrupt` | Unknown status or out-of-range counters |
//!
//! Every status change is a single `UPDATE ... WHERE id = $1 AND status = $2`,
//! so two contexts racing on the same row cannot both succeed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use gradeflow_core::{JobId, PrincipalId, SubjectId};

use super::store::{ABANDONED_MESSAGE, JobStore, JobStoreError};
use super::types::{Job, JobFilter, JobStatus, NewJob, Priority, StatusCounts, StatusUpdate};

const JOB_COLUMNS: &str = "id, subject_id, status, priority, attempts, max_attempts, requested_by, \
     started_at, completed_at, error_message, created_at, updated_at";

/// Postgres-backed [`JobStore`].
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_one_job(&self, sql: &str, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_job", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    /// Resolve a unique violation into the job that holds the subject.
    async fn duplicate_of(&self, subject_id: &SubjectId) -> JobStoreError {
        match self.active_for_subject(subject_id).await {
            Ok(Some(existing)) => JobStoreError::Duplicate {
                subject_id: subject_id.clone(),
                existing: existing.id,
            },
            Ok(None) => JobStoreError::Storage(format!(
                "unique violation for subject {subject_id} but no active job found"
            )),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, new_job), fields(subject_id = %new_job.subject_id), err)]
    async fn create(&self, new_job: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::new(new_job, Utc::now());

        let sql = format!(
            r#"
            INSERT INTO feedback_jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(job.id.as_uuid())
            .bind(job.subject_id.as_str())
            .bind(job.status.as_str())
            .bind(job.priority.0)
            .bind(job.attempts as i32)
            .bind(job.max_attempts as i32)
            .bind(job.requested_by.map(|p| *p.as_uuid()))
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.error_message.as_deref())
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_one(&*self.pool)
            .await;

        match result {
            Ok(row) => decode_job(&row),
            Err(e) if is_unique_violation(&e) => Err(self.duplicate_of(&job.subject_id).await),
            Err(e) => Err(map_sqlx_error("create_job", e)),
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM feedback_jobs WHERE id = $1");
        self.fetch_one_job(&sql, id)
            .await?
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn active_for_subject(&self, subject_id: &SubjectId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM feedback_jobs
            WHERE subject_id = $1 AND status IN ('pending', 'processing')
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(subject_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_for_subject", e))?;

        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM feedback_jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT $1
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_pending", e))?;

        rows.iter().map(decode_job).collect()
    }

    async fn count_processing(&self) -> Result<usize, JobStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM feedback_jobs WHERE status = 'processing'")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_processing", e))?;

        let n: i64 = row
            .try_get("n")
            .map_err(|e| JobStoreError::Corrupt(format!("failed to read count: {e}")))?;
        Ok(n.max(0) as usize)
    }

    #[instrument(
        skip(self, update),
        fields(job_id = %id, from = %expected, to = %update.status),
        err
    )]
    async fn update_status(
        &self,
        id: JobId,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<Option<Job>, JobStoreError> {
        if !expected.can_transition_to(update.status) {
            return Ok(None);
        }

        let sql = format!(
            r#"
            UPDATE feedback_jobs SET
                status = $3,
                attempts = CASE $4::TEXT
                    WHEN 'increment' THEN attempts + 1
                    WHEN 'reset' THEN 0
                    ELSE attempts
                END,
                started_at = CASE $5::TEXT
                    WHEN 'set' THEN $6::TIMESTAMPTZ
                    WHEN 'clear' THEN NULL
                    ELSE started_at
                END,
                completed_at = CASE $7::TEXT
                    WHEN 'set' THEN $8::TIMESTAMPTZ
                    WHEN 'clear' THEN NULL
                    ELSE completed_at
                END,
                error_message = CASE $9::TEXT
                    WHEN 'set' THEN $10::TEXT
                    WHEN 'clear' THEN NULL
                    ELSE error_message
                END,
                updated_at = $11
            WHERE id = $1
              AND status = $2
              AND ($4::TEXT <> 'increment' OR attempts < max_attempts)
              AND ($12::INTEGER IS NULL OR (attempts = $12 AND started_at = $13::TIMESTAMPTZ))
            RETURNING {JOB_COLUMNS}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(expected.as_str())
            .bind(update.status.as_str())
            .bind(update.attempts.mode())
            .bind(update.started_at.mode())
            .bind(update.started_at.value().copied())
            .bind(update.completed_at.mode())
            .bind(update.completed_at.value().copied())
            .bind(update.error_message.mode())
            .bind(update.error_message.value().map(|s| s.as_str()))
            .bind(update.at)
            .bind(update.claim.map(|t| t.attempts as i32))
            .bind(update.claim.map(|t| t.started_at))
            .fetch_optional(&*self.pool)
            .await;

        match result {
            Ok(row) => row.map(|r| decode_job(&r)).transpose(),
            Err(e) if is_unique_violation(&e) => {
                let job = self.get(id).await?;
                Err(self.duplicate_of(&job.subject_id).await)
            }
            Err(e) => Err(map_sqlx_error("update_status", e)),
        }
    }

    #[instrument(skip(self), err)]
    async fn recover_stale(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE feedback_jobs SET
                status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END,
                started_at = CASE WHEN attempts < max_attempts THEN NULL ELSE started_at END,
                completed_at = CASE WHEN attempts < max_attempts THEN completed_at ELSE $2 END,
                error_message = CASE WHEN attempts < max_attempts THEN error_message ELSE $3 END,
                updated_at = $2
            WHERE status = 'processing' AND started_at < $1
            RETURNING {JOB_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(started_before)
            .bind(now)
            .bind(ABANDONED_MESSAGE)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("recover_stale", e))?;

        let mut jobs = rows.iter().map(decode_job).collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(Job::selection_order);
        Ok(jobs)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM feedback_jobs
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR subject_id = $2)
              AND ($3::UUID IS NULL OR requested_by = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.subject_id.as_ref().map(|s| s.as_str()))
            .bind(filter.requested_by.map(|p| *p.as_uuid()))
            .bind(filter.limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(decode_job).collect()
    }

    async fn count_by_status(
        &self,
        since: DateTime<Utc>,
        requested_by: Option<PrincipalId>,
    ) -> Result<StatusCounts, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM feedback_jobs
            WHERE created_at >= $1
              AND ($2::UUID IS NULL OR requested_by = $2)
            GROUP BY status
            "#,
        )
        .bind(since)
        .bind(requested_by.map(|p| *p.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_by_status", e))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| JobStoreError::Corrupt(format!("failed to read status: {e}")))?;
            let n: i64 = row
                .try_get("n")
                .map_err(|e| JobStoreError::Corrupt(format!("failed to read count: {e}")))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Corrupt(e.to_string()))?;
            counts.add(status, n.max(0) as usize);
        }
        Ok(counts)
    }

    async fn pending_ahead_of(&self, job: &Job) -> Result<usize, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM feedback_jobs
            WHERE status = 'pending'
              AND (priority > $1
                   OR (priority = $1 AND (created_at, id) < ($2, $3)))
            "#,
        )
        .bind(job.priority.0)
        .bind(job.created_at)
        .bind(job.id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_ahead_of", e))?;

        let n: i64 = row
            .try_get("n")
            .map_err(|e| JobStoreError::Corrupt(format!("failed to read count: {e}")))?;
        Ok(n.max(0) as usize)
    }

    #[instrument(skip(self), err)]
    async fn purge_failed(&self) -> Result<u64, JobStoreError> {
        let result = sqlx::query("DELETE FROM feedback_jobs WHERE status = 'failed'")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_failed", e))?;
        Ok(result.rows_affected())
    }
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            JobStoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn decode_job(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let row = JobRow::from_row(row)
        .map_err(|e| JobStoreError::Corrupt(format!("failed to decode job row: {e}")))?;
    Job::try_from(row)
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    subject_id: String,
    status: String,
    priority: i32,
    attempts: i32,
    max_attempts: i32,
    requested_by: Option<uuid::Uuid>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            requested_by: row.try_get("requested_by")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let counter = |name: &str, v: i32| {
            u32::try_from(v).map_err(|_| JobStoreError::Corrupt(format!("negative {name}: {v}")))
        };

        Ok(Job {
            id: JobId::from_uuid(row.id),
            subject_id: SubjectId::parse(row.subject_id)
                .map_err(|e| JobStoreError::Corrupt(e.to_string()))?,
            status: row
                .status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Corrupt(e.to_string()))?,
            priority: Priority(row.priority),
            attempts: counter("attempts", row.attempts)?,
            max_attempts: counter("max_attempts", row.max_attempts)?,
            requested_by: row.requested_by.map(PrincipalId::from_uuid),
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
