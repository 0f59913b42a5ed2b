//! Postgres-backed feedback store (`feedback_results` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use gradeflow_ai::Feedback;
use gradeflow_core::{JobId, SubjectId};

use super::{FeedbackRecord, FeedbackStore, ResultStoreError};

const RECORD_COLUMNS: &str = "id, job_id, subject_id, version, body, metadata, claimed_at, created_at";

#[derive(Debug, Clone)]
pub struct PostgresFeedbackStore {
    pool: Arc<PgPool>,
}

impl PostgresFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl FeedbackStore for PostgresFeedbackStore {
    #[instrument(skip(self, feedback), fields(job_id = %job_id, subject_id = %subject_id), err)]
    async fn save(
        &self,
        job_id: JobId,
        subject_id: &SubjectId,
        feedback: &Feedback,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<FeedbackRecord>, ResultStoreError> {
        let sql = format!(
            r#"
            INSERT INTO feedback_results (id, job_id, subject_id, version, body, metadata, claimed_at, created_at)
            VALUES (
                $1, $2, $3,
                (SELECT COALESCE(MAX(version), 0) + 1 FROM feedback_results WHERE subject_id = $3),
                $4, $5, $6, $7
            )
            ON CONFLICT (job_id)
            DO UPDATE SET
                body = EXCLUDED.body,
                metadata = EXCLUDED.metadata,
                claimed_at = EXCLUDED.claimed_at,
                created_at = EXCLUDED.created_at
            WHERE feedback_results.claimed_at <= EXCLUDED.claimed_at
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(Uuid::now_v7())
            .bind(job_id.as_uuid())
            .bind(subject_id.as_str())
            .bind(&feedback.body)
            .bind(&feedback.metadata)
            .bind(claimed_at)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("save_feedback", e))?;

        row.map(|r| decode_record(&r)).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn discard(&self, job_id: JobId, claimed_at: DateTime<Utc>) -> Result<bool, ResultStoreError> {
        let result = sqlx::query("DELETE FROM feedback_results WHERE job_id = $1 AND claimed_at = $2")
            .bind(job_id.as_uuid())
            .bind(claimed_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("discard_feedback", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn for_job(&self, job_id: JobId) -> Result<Option<FeedbackRecord>, ResultStoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM feedback_results WHERE job_id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("feedback_for_job", e))?;

        row.map(|r| decode_record(&r)).transpose()
    }

    async fn history(&self, subject_id: &SubjectId) -> Result<Vec<FeedbackRecord>, ResultStoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM feedback_results WHERE subject_id = $1 ORDER BY version DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(subject_id.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("feedback_history", e))?;

        rows.iter().map(decode_record).collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ResultStoreError {
    match err {
        sqlx::Error::Database(db_err) => ResultStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        _ => ResultStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_record(row: &sqlx::postgres::PgRow) -> Result<FeedbackRecord, ResultStoreError> {
    let row = FeedbackRow::from_row(row)
        .map_err(|e| ResultStoreError::Corrupt(format!("failed to decode feedback row: {e}")))?;
    FeedbackRecord::try_from(row)
}

#[derive(Debug)]
struct FeedbackRow {
    id: Uuid,
    job_id: Uuid,
    subject_id: String,
    version: i32,
    body: String,
    metadata: serde_json::Value,
    claimed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for FeedbackRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(FeedbackRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            subject_id: row.try_get("subject_id")?,
            version: row.try_get("version")?,
            body: row.try_get("body")?,
            metadata: row.try_get("metadata")?,
            claimed_at: row.try_get("claimed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<FeedbackRow> for FeedbackRecord {
    type Error = ResultStoreError;

    fn try_from(row: FeedbackRow) -> Result<Self, Self::Error> {
        Ok(FeedbackRecord {
            id: row.id,
            job_id: JobId::from_uuid(row.job_id),
            subject_id: SubjectId::parse(row.subject_id)
                .map_err(|e| ResultStoreError::Corrupt(e.to_string()))?,
            version: u32::try_from(row.version)
                .map_err(|_| ResultStoreError::Corrupt(format!("invalid version: {}", row.version)))?,
            body: row.body,
            metadata: row.metadata,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
        })
    }
}
