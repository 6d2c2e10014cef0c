//! Similarity and composite match scoring.

use std::collections::BTreeSet;

use chrono::Utc;
use uuid::Uuid;

use resumatch_core::defaults::{
    LOW_SIMILARITY_THRESHOLD, SIMILARITY_WEIGHT, SKILL_OVERLAP_WEIGHT,
};
use resumatch_core::{
    new_v7, Entities, Error, ExperienceMatch, JobDescription, MatchResult, Result,
};

/// Cosine similarity clamped to `[0, 1]`.
///
/// An all-zero vector scores 0.0. Vectors of different length are an
/// `EmbeddingDimensionMismatch`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::EmbeddingDimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(0.0, 1.0))
}

fn lowercased(skills: &BTreeSet<String>) -> BTreeSet<String> {
    skills.iter().map(|s| s.to_lowercase()).collect()
}

/// Split `required` into (matched, missing) against `resume`, ignoring case.
/// Names keep the job description's spelling.
pub fn partition_skills(
    resume: &BTreeSet<String>,
    required: &BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let have = lowercased(resume);
    required
        .iter()
        .cloned()
        .partition(|skill| have.contains(&skill.to_lowercase()))
}

/// `|resume ∩ required| / |required|`, or 1.0 when nothing is required.
pub fn skill_overlap_ratio(resume: &BTreeSet<String>, required: &BTreeSet<String>) -> f32 {
    let required_lc = lowercased(required);
    if required_lc.is_empty() {
        return 1.0;
    }
    let have = lowercased(resume);
    let matched = required_lc.intersection(&have).count();
    matched as f32 / required_lc.len() as f32
}

/// `0.6 * similarity + 0.4 * overlap`, in `[0, 1]`.
pub fn composite_score(
    similarity: f32,
    resume: &BTreeSet<String>,
    required: &BTreeSet<String>,
) -> f32 {
    SIMILARITY_WEIGHT * similarity + SKILL_OVERLAP_WEIGHT * skill_overlap_ratio(resume, required)
}

fn experience_match(resume_years: Option<f32>, required_years: Option<f32>) -> ExperienceMatch {
    let meets_requirement = match required_years {
        None => true,
        Some(required) => resume_years.is_some_and(|have| have >= required),
    };
    ExperienceMatch {
        resume_years,
        required_years,
        meets_requirement,
    }
}

/// Builds [`MatchResult`]s.
#[derive(Debug, Clone)]
pub struct MatchScorer {
    low_similarity_threshold: f32,
}

impl Default for MatchScorer {
    fn default() -> Self {
        Self {
            low_similarity_threshold: LOW_SIMILARITY_THRESHOLD,
        }
    }
}

impl MatchScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Similarity below which a "tailor your resume" note is added.
    pub fn with_low_similarity_threshold(mut self, threshold: f32) -> Self {
        self.low_similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Score one resume against one job description.
    pub fn score(
        &self,
        resume_id: Uuid,
        resume_entities: &Entities,
        resume_embedding: &[f32],
        job: &JobDescription,
        job_embedding: &[f32],
    ) -> Result<MatchResult> {
        let similarity = cosine_similarity(resume_embedding, job_embedding)?;
        let composite = composite_score(similarity, &resume_entities.skills, &job.required_skills);
        let (matched_skills, missing_skills) =
            partition_skills(&resume_entities.skills, &job.required_skills);
        let experience = experience_match(
            resume_entities.experience_years,
            job.min_experience_years,
        );
        let recommendations = self.recommendations(similarity, &missing_skills, &experience);

        Ok(MatchResult {
            id: new_v7(),
            resume_id,
            job_fingerprint: job.fingerprint(),
            similarity,
            score: (composite * 100.0).clamp(0.0, 100.0),
            matched_skills,
            missing_skills,
            experience,
            recommendations,
            created_at: Utc::now(),
        })
    }

    fn recommendations(
        &self,
        similarity: f32,
        missing_skills: &BTreeSet<String>,
        experience: &ExperienceMatch,
    ) -> Vec<String> {
        let mut notes: Vec<String> = missing_skills
            .iter()
            .map(|skill| format!("Add experience with {skill}"))
            .collect();

        if !experience.meets_requirement {
            if let Some(required) = experience.required_years {
                let have = experience.resume_years.unwrap_or(0.0);
                notes.push(format!(
                    "Role asks for {required} years of experience; resume shows {have}"
                ));
            }
        }

        if similarity < self.low_similarity_threshold {
            notes.push(
                "Tailor the resume summary to the job description's wording".to_string(),
            );
        }

        if notes.is_empty() {
            notes.push("Strong match: all required skills and experience present".to_string());
        }
        notes
    }
}
