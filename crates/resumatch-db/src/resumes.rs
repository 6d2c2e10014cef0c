//! PostgreSQL result store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use resumatch_core::{
    check_dimension, Entities, MatchResult, Result, ResultStore, ResumeFields, ResumeRecord,
    ResumeStatus,
};

const RESUME_COLUMNS: &str = "id, original_filename, upload_date, status, source_path, raw_text, \
                              entities, embedding, match_results, updated_at";

/// PostgreSQL implementation of [`ResultStore`].
///
/// Embeddings live in a pgvector column; entities and match results are
/// JSONB. Match results are merged server-side with `||`, so concurrent
/// attaches for different job descriptions never overwrite each other.
#[derive(Clone)]
pub struct PgResultStore {
    pool: Pool<Postgres>,
    dimension: usize,
}

impl PgResultStore {
    pub fn new(pool: Pool<Postgres>, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    fn parse_resume_row(row: sqlx::postgres::PgRow) -> ResumeRecord {
        let entities: Option<Json<Entities>> = row.get("entities");
        let embedding: Option<Vector> = row.get("embedding");
        let match_results: Json<BTreeMap<String, MatchResult>> = row.get("match_results");
        let status: String = row.get("status");

        ResumeRecord {
            id: row.get("id"),
            original_filename: row.get("original_filename"),
            upload_date: row.get("upload_date"),
            status: ResumeStatus::parse(&status),
            source_path: row.get("source_path"),
            raw_text: row.get("raw_text"),
            entities: entities.map(|e| e.0),
            embedding: embedding.map(|v| v.to_vec()),
            match_results: match_results.0,
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn upsert(&self, resume_id: Uuid, fields: ResumeFields) -> Result<ResumeRecord> {
        if let Some(embedding) = &fields.embedding {
            check_dimension(embedding, self.dimension)?;
        }

        let now = Utc::now();
        let query = format!(
            "INSERT INTO resumes (id, original_filename, upload_date, status, source_path,
                                  raw_text, entities, embedding, updated_at)
             VALUES ($1, COALESCE($2, ''), $3, COALESCE($4, 'uploaded'), $5, $6, $7, $8, $3)
             ON CONFLICT (id) DO UPDATE SET
                 original_filename = COALESCE($2, resumes.original_filename),
                 status = COALESCE($4, resumes.status),
                 source_path = COALESCE($5, resumes.source_path),
                 raw_text = COALESCE($6, resumes.raw_text),
                 entities = COALESCE($7, resumes.entities),
                 embedding = COALESCE($8, resumes.embedding),
                 updated_at = $3
             RETURNING {RESUME_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(resume_id)
            .bind(fields.original_filename)
            .bind(now)
            .bind(fields.status.map(|s| s.as_str()))
            .bind(fields.source_path)
            .bind(fields.raw_text)
            .bind(fields.entities.map(Json))
            .bind(fields.embedding.map(Vector::from))
            .fetch_one(&self.pool)
            .await?;

        debug!(
            subsystem = "storage",
            component = "result_store",
            op = "upsert",
            resume_id = %resume_id,
            "Resume record upserted"
        );
        Ok(Self::parse_resume_row(row))
    }

    async fn get(&self, resume_id: Uuid) -> Result<Option<ResumeRecord>> {
        let query = format!("SELECT {RESUME_COLUMNS} FROM resumes WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(resume_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::parse_resume_row))
    }

    async fn attach_match_result(&self, resume_id: Uuid, result: &MatchResult) -> Result<bool> {
        let value = serde_json::to_value(result)?;
        let updated = sqlx::query(
            "UPDATE resumes
             SET match_results = match_results || jsonb_build_object($2::text, $3::jsonb),
                 updated_at = $4
             WHERE id = $1",
        )
        .bind(resume_id)
        .bind(&result.job_fingerprint)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !updated {
            warn!(
                subsystem = "storage",
                component = "result_store",
                op = "attach_match_result",
                resume_id = %resume_id,
                "Match result for unknown resume dropped"
            );
        }
        Ok(updated)
    }

    async fn set_status(&self, resume_id: Uuid, status: ResumeStatus) -> Result<bool> {
        let updated = sqlx::query("UPDATE resumes SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(resume_id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;
        Ok(updated)
    }

    async fn list(&self, limit: i64) -> Result<Vec<ResumeRecord>> {
        let query = format!(
            "SELECT {RESUME_COLUMNS} FROM resumes ORDER BY upload_date DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&query)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::parse_resume_row).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
