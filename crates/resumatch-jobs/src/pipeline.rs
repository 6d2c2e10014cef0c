//! The resume match pipeline: fetch → text → entities/embedding → score →
//! attach.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, trace, warn};

use resumatch_core::defaults::{
    PROGRESS_DONE, PROGRESS_FETCHED, PROGRESS_NLP_DONE, PROGRESS_SCORED, PROGRESS_TEXT_EXTRACTED,
    RANK_LIMIT,
};
use resumatch_core::{
    Entities, Error, ErrorKind, Extractor, Job, JobDescription, MatchResult, Result,
    ResultStore, ResumeFields, ResumeRecord, ResumeStatus, TextSource,
};
use resumatch_inference::MatchScorer;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Runs one match job against the shared stores and extractor.
pub struct ResumeMatchHandler {
    results: Arc<dyn ResultStore>,
    extractor: Arc<dyn Extractor>,
    text_source: Arc<dyn TextSource>,
    scorer: MatchScorer,
}

impl ResumeMatchHandler {
    pub fn new(
        results: Arc<dyn ResultStore>,
        extractor: Arc<dyn Extractor>,
        text_source: Arc<dyn TextSource>,
    ) -> Self {
        Self {
            results,
            extractor,
            text_source,
            scorer: MatchScorer::default(),
        }
    }

    pub fn with_scorer(mut self, scorer: MatchScorer) -> Self {
        self.scorer = scorer;
        self
    }

    #[instrument(
        skip(self, ctx),
        fields(
            subsystem = "pipeline",
            component = "match_handler",
            job_id = %ctx.job_id(),
            resume_id = %ctx.resume_id(),
            attempt = ctx.attempt()
        )
    )]
    async fn run(&self, ctx: &JobContext) -> Result<MatchResult> {
        let start = Instant::now();
        let resume_id = ctx.resume_id();

        let record = self
            .results
            .get(resume_id)
            .await?
            .ok_or(Error::ResumeNotFound(resume_id))?;
        self.results
            .set_status(resume_id, ResumeStatus::Processing)
            .await?;
        ctx.report_progress(PROGRESS_FETCHED, Some("Resume fetched"))
            .await?;

        let text = self.resume_text(&record).await?;
        ctx.report_progress(PROGRESS_TEXT_EXTRACTED, Some("Text extracted"))
            .await?;

        let (entities, embedding) = self.analyze(&record, &text).await?;
        ctx.report_progress(PROGRESS_NLP_DONE, Some("Entities and embedding ready"))
            .await?;

        let job = ctx.payload();
        let job_embedding = self.extractor.embed(&job.text).await?;
        let result = self
            .scorer
            .score(resume_id, &entities, &embedding, job, &job_embedding)?;
        ctx.report_progress(PROGRESS_SCORED, Some("Match scored"))
            .await?;

        if !self.results.attach_match_result(resume_id, &result).await? {
            return Err(Error::ResumeNotFound(resume_id));
        }
        self.results
            .set_status(resume_id, ResumeStatus::Complete)
            .await?;
        ctx.report_progress(PROGRESS_DONE, Some("Match complete"))
            .await?;

        info!(
            job_fingerprint = %result.job_fingerprint,
            score = result.score,
            similarity = result.similarity,
            matched = result.matched_skills.len(),
            missing = result.missing_skills.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Resume matched"
        );
        Ok(result)
    }

    /// Stored text, or text loaded from the upload and persisted.
    async fn resume_text(&self, record: &ResumeRecord) -> Result<String> {
        if let Some(text) = record.raw_text.as_ref().filter(|t| !t.trim().is_empty()) {
            debug!("Using stored resume text");
            return Ok(text.clone());
        }

        let source = record.source_path.as_deref().ok_or_else(|| {
            Error::ExtractionFailed("resume has no text and no stored upload".to_string())
        })?;
        let text = self.text_source.load_text(source).await?;
        self.results
            .upsert(record.id, ResumeFields::new().raw_text(text.clone()))
            .await?;
        Ok(text)
    }

    /// Cached entities and embedding, or a fresh extraction persisted.
    async fn analyze(&self, record: &ResumeRecord, text: &str) -> Result<(Entities, Vec<f32>)> {
        if let (Some(entities), Some(embedding)) = (&record.entities, &record.embedding) {
            if embedding.len() == self.extractor.dimension() {
                debug!("Using stored entities and embedding");
                return Ok((entities.clone(), embedding.clone()));
            }
            warn!(
                stored = embedding.len(),
                expected = self.extractor.dimension(),
                "Stored embedding has a stale dimension, re-extracting"
            );
        }

        let extraction = self.extractor.extract(text).await?;
        self.results
            .upsert(
                record.id,
                ResumeFields::new()
                    .entities(extraction.entities.clone())
                    .embedding(extraction.embedding.clone()),
            )
            .await?;
        Ok((extraction.entities, extraction.embedding))
    }

    /// Score every analyzed resume against `job` and return the best
    /// `limit`, highest composite score first.
    ///
    /// Runs inline and persists nothing.
    #[instrument(
        skip(self, job),
        fields(subsystem = "pipeline", component = "ranking", op = "rank_candidates")
    )]
    pub async fn rank_candidates(
        &self,
        job: &JobDescription,
        limit: usize,
    ) -> Result<Vec<MatchResult>> {
        if job.text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "job description text must not be empty".to_string(),
            ));
        }
        if limit == 0 {
            return Ok(vec![]);
        }

        let job_embedding = self.extractor.embed(&job.text).await?;
        let records = self.results.list(i64::MAX).await?;
        let total = records.len();

        let mut ranked = Vec::new();
        for record in records {
            let (Some(entities), Some(embedding)) = (&record.entities, &record.embedding) else {
                continue;
            };
            if embedding.len() != job_embedding.len() {
                trace!(resume_id = %record.id, "Skipping resume with stale embedding dimension");
                continue;
            }
            let result = self
                .scorer
                .score(record.id, entities, embedding, job, &job_embedding)?;
            trace!(resume_id = %record.id, score = result.score, "Candidate scored");
            ranked.push(result);
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.resume_id.cmp(&b.resume_id))
        });
        ranked.truncate(limit);

        debug!(
            scanned = total,
            returned = ranked.len(),
            "Candidates ranked"
        );
        Ok(ranked)
    }

    /// [`rank_candidates`](Self::rank_candidates) with the default limit.
    pub async fn rank_top(&self, job: &JobDescription) -> Result<Vec<MatchResult>> {
        self.rank_candidates(job, RANK_LIMIT).await
    }
}

#[async_trait]
impl JobHandler for ResumeMatchHandler {
    fn name(&self) -> &'static str {
        "resume_match"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        match self.run(&ctx).await {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => JobResult::Success(value),
                Err(e) => JobResult::Failed(e.into()),
            },
            Err(e) => {
                debug!(
                    job_id = %ctx.job_id(),
                    error_kind = %e.kind(),
                    transient = e.is_transient(),
                    last_attempt = ctx.is_last_attempt(),
                    "Pipeline stage failed"
                );
                JobResult::Failed(e)
            }
        }
    }

    async fn on_terminal_failure(&self, job: &Job, kind: ErrorKind) {
        match self
            .results
            .set_status(job.resume_id, ResumeStatus::Failed)
            .await
        {
            Ok(_) => debug!(
                subsystem = "pipeline",
                resume_id = %job.resume_id,
                error_kind = %kind,
                "Resume marked failed"
            ),
            Err(e) => warn!(
                subsystem = "pipeline",
                resume_id = %job.resume_id,
                error = %e,
                "Could not mark resume failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumatch_core::{new_v7, Extraction};
    use resumatch_db::{MemoryResultStore, Stores};
    use resumatch_inference::ResumeExtractor;
    use uuid::Uuid;

    struct NoUploads;

    #[async_trait]
    impl TextSource for NoUploads {
        async fn load_text(&self, reference: &str) -> Result<String> {
            Err(Error::NotFound(reference.to_string()))
        }
    }

    /// Extractor returning fixed entities, counting calls.
    struct CountingExtractor {
        inner: ResumeExtractor,
        extract_calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Extractor for CountingExtractor {
        async fn extract(&self, text: &str) -> Result<Extraction> {
            self.extract_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.extract(text).await
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.inner.embed(text).await
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    async fn store_with_text(text: &str) -> (Arc<MemoryResultStore>, Uuid) {
        let store = Arc::new(MemoryResultStore::new(64));
        let id = new_v7();
        store
            .upsert(
                id,
                ResumeFields::new()
                    .original_filename("cv.txt")
                    .raw_text(text),
            )
            .await
            .unwrap();
        (store, id)
    }

    fn job_for(resume_id: Uuid, jd: JobDescription) -> Job {
        Job::new_pending(resume_id, jd, 3)
    }

    #[tokio::test]
    async fn test_run_attaches_result_and_completes_resume() {
        let (store, id) = store_with_text("Python and Docker engineer, 6 years experience").await;
        let handler = ResumeMatchHandler::new(
            store.clone(),
            Arc::new(ResumeExtractor::offline(64)),
            Arc::new(NoUploads),
        );
        let jd = JobDescription::new("Python engineer").with_required_skills(["Python", "Kubernetes"]);

        let result = handler.run(&JobContext::new(job_for(id, jd.clone()))).await.unwrap();

        assert_eq!(result.matched_skills.len(), 1);
        assert!(result.missing_skills.contains("Kubernetes"));
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ResumeStatus::Complete);
        assert!(record.is_analyzed());
        assert_eq!(record.match_results[&jd.fingerprint()].id, result.id);
    }

    #[tokio::test]
    async fn test_cached_analysis_skips_extraction() {
        let (store, id) = store_with_text("Rust developer").await;
        let extractor = Arc::new(CountingExtractor {
            inner: ResumeExtractor::offline(64),
            extract_calls: Default::default(),
        });
        let handler = ResumeMatchHandler::new(store.clone(), extractor.clone(), Arc::new(NoUploads));

        for text in ["Rust engineer", "Systems programmer"] {
            let ctx = JobContext::new(job_for(id, JobDescription::new(text)));
            handler.run(&ctx).await.unwrap();
        }

        assert_eq!(
            extractor
                .extract_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(store.get(id).await.unwrap().unwrap().match_results.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_resume_is_not_found() {
        let handler = ResumeMatchHandler::new(
            Arc::new(MemoryResultStore::new(64)),
            Arc::new(ResumeExtractor::offline(64)),
            Arc::new(NoUploads),
        );
        let ctx = JobContext::new(job_for(Uuid::new_v4(), JobDescription::new("x")));
        match handler.execute(ctx).await {
            JobResult::Failed(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_text_and_no_upload_is_extraction_failed() {
        let store = Arc::new(MemoryResultStore::new(64));
        let id = new_v7();
        store
            .upsert(id, ResumeFields::new().original_filename("cv.pdf"))
            .await
            .unwrap();
        let handler = ResumeMatchHandler::new(
            store,
            Arc::new(ResumeExtractor::offline(64)),
            Arc::new(NoUploads),
        );
        let err = handler
            .run(&JobContext::new(job_for(id, JobDescription::new("x"))))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    }

    #[tokio::test]
    async fn test_terminal_failure_marks_resume_failed() {
        let (store, id) = store_with_text("Go developer").await;
        let handler = ResumeMatchHandler::new(
            store.clone(),
            Arc::new(ResumeExtractor::offline(64)),
            Arc::new(NoUploads),
        );
        handler
            .on_terminal_failure(&job_for(id, JobDescription::new("x")), ErrorKind::Timeout)
            .await;
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            ResumeStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_rank_candidates_orders_by_score() {
        let stores = Stores::memory(64);
        let extractor = Arc::new(ResumeExtractor::offline(64));
        let handler =
            ResumeMatchHandler::new(stores.results.clone(), extractor.clone(), Arc::new(NoUploads));

        let texts = [
            "Python Django PostgreSQL backend developer",
            "Python developer",
            "Registered nurse, pediatrics",
        ];
        let mut ids = Vec::new();
        for text in texts {
            let id = new_v7();
            let extraction = extractor.extract(text).await.unwrap();
            stores
                .results
                .upsert(
                    id,
                    ResumeFields::new()
                        .original_filename("cv.txt")
                        .entities(extraction.entities)
                        .embedding(extraction.embedding),
                )
                .await
                .unwrap();
            ids.push(id);
        }
        // Not analyzed yet; never ranked.
        stores
            .results
            .upsert(new_v7(), ResumeFields::new().original_filename("new.txt"))
            .await
            .unwrap();

        let jd = JobDescription::new("Python Django backend developer")
            .with_required_skills(["Python", "Django", "PostgreSQL"]);
        let ranked = handler.rank_candidates(&jd, 2).await.unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].resume_id, ids[0]);
        assert_eq!(ranked[1].resume_id, ids[1]);
        assert!(ranked[0].score >= ranked[1].score);
        assert!(handler.rank_candidates(&jd, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rank_top_uses_default_limit() {
        let stores = Stores::memory(32);
        let extractor = Arc::new(ResumeExtractor::offline(32));
        let handler =
            ResumeMatchHandler::new(stores.results.clone(), extractor.clone(), Arc::new(NoUploads));

        for i in 0..(RANK_LIMIT + 3) {
            let extraction = extractor
                .extract(&format!("Go developer with {i} years of experience"))
                .await
                .unwrap();
            stores
                .results
                .upsert(
                    new_v7(),
                    ResumeFields::new()
                        .entities(extraction.entities)
                        .embedding(extraction.embedding),
                )
                .await
                .unwrap();
        }

        let ranked = handler
            .rank_top(&JobDescription::new("Go developer"))
            .await
            .unwrap();
        assert_eq!(ranked.len(), RANK_LIMIT);
    }
}
