//! Rule-based entity recognition.
//!
//! Skills come from a lexicon of canonical names matched case-insensitively
//! on token boundaries, education from degree patterns, and experience from
//! "N years" phrases (the largest figure wins).

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use resumatch_core::{Entities, Error, Result};

/// Pulls structured entities out of plain text.
///
/// Implementations are pure and shareable across threads.
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Entities;
}

/// Canonical skill names recognized by [`SkillLexicon::default`].
pub const DEFAULT_SKILLS: &[&str] = &[
    "Python",
    "Java",
    "JavaScript",
    "TypeScript",
    "Rust",
    "Go",
    "C",
    "C++",
    "C#",
    "Ruby",
    "PHP",
    "Kotlin",
    "Swift",
    "Scala",
    "SQL",
    "PostgreSQL",
    "MySQL",
    "MongoDB",
    "Redis",
    "Elasticsearch",
    "Kafka",
    "RabbitMQ",
    "Celery",
    "Docker",
    "Kubernetes",
    "Terraform",
    "AWS",
    "GCP",
    "Azure",
    "Linux",
    "Git",
    "React",
    "Angular",
    "Vue",
    "Node.js",
    "Django",
    "Flask",
    "FastAPI",
    "Spring",
    "GraphQL",
    "REST",
    "HTML",
    "CSS",
    "Machine Learning",
    "Deep Learning",
    "NLP",
    "Computer Vision",
    "TensorFlow",
    "PyTorch",
    "scikit-learn",
    "Pandas",
    "NumPy",
    "Spark",
    "Hadoop",
    "Airflow",
    "Data Analysis",
    "Statistics",
    "Agile",
    "Scrum",
    "CI/CD",
];

/// Degree patterns, checked in order; each hit adds its canonical label.
static DEGREE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("PhD", r"(?i)\b(?:ph\.?\s?d\.?|doctorate|doctor of philosophy)(?:[^A-Za-z]|$)"),
        ("MBA", r"(?i)\bm\.?b\.?a\b"),
        ("Master", r"(?i)\b(?:master(?:'s|s)?(?: degree| of)|m\.sc?\.?|msc|m\.eng\.?)(?:[^A-Za-z]|$)"),
        ("Bachelor", r"(?i)\b(?:bachelor(?:'s|s)?(?: degree| of)?|b\.sc?\.?|bsc|b\.a\.|b\.eng\.?)(?:[^A-Za-z]|$)"),
        ("Associate", r"(?i)\bassociate(?:'s)? degree\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("valid degree pattern")))
    .collect()
});

/// "5 years", "3.5 yrs", "10+ years".
static EXPERIENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}(?:\.\d)?)\s*\+?\s*(?:years?|yrs?)\b").expect("valid experience pattern")
});

/// Longest believable career, in years.
const MAX_EXPERIENCE_YEARS: f32 = 60.0;

// Symbols like "+" and "#" are part of a skill token, so plain \b would let
// "C" match inside "C++".
fn skill_pattern(name: &str) -> String {
    format!(
        r"(?i)(?:^|[^A-Za-z0-9+#.])({})(?:$|[^A-Za-z0-9+#])",
        regex::escape(name)
    )
}

/// Lexicon-driven [`EntityRecognizer`].
pub struct SkillLexicon {
    skills: Vec<(String, Regex)>,
}

impl SkillLexicon {
    /// Build a lexicon from canonical skill names.
    ///
    /// Names are matched case-insensitively and reported in the spelling
    /// given here. Blank names are skipped.
    pub fn new<I, S>(skills: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for skill in skills {
            let name = skill.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let regex = Regex::new(&skill_pattern(name))
                .map_err(|e| Error::Config(format!("invalid skill '{name}': {e}")))?;
            compiled.push((name.to_string(), regex));
        }
        Ok(Self { skills: compiled })
    }

    /// Number of skills in the lexicon.
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Canonical names of every lexicon skill found in `text`.
    pub fn find_skills(&self, text: &str) -> BTreeSet<String> {
        self.skills
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for SkillLexicon {
    fn default() -> Self {
        Self {
            skills: DEFAULT_SKILLS
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        Regex::new(&skill_pattern(name)).expect("default skills are valid patterns"),
                    )
                })
                .collect(),
        }
    }
}

/// Canonical degree labels mentioned in `text`.
pub fn find_education(text: &str) -> BTreeSet<String> {
    DEGREE_PATTERNS
        .iter()
        .filter(|(_, regex)| regex.is_match(text))
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Largest "N years" figure in `text`, if any.
pub fn find_experience_years(text: &str) -> Option<f32> {
    EXPERIENCE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f32>().ok())
        .filter(|years| *years > 0.0 && *years <= MAX_EXPERIENCE_YEARS)
        .fold(None, |best: Option<f32>, years| {
            Some(best.map_or(years, |b| b.max(years)))
        })
}

impl EntityRecognizer for SkillLexicon {
    fn recognize(&self, text: &str) -> Entities {
        let entities = Entities {
            skills: self.find_skills(text),
            experience_years: find_experience_years(text),
            education: find_education(text),
        };
        trace!(
            subsystem = "inference",
            component = "entities",
            skill_count = entities.skills.len(),
            education_count = entities.education.len(),
            experience_years = ?entities.experience_years,
            "Entities recognized"
        );
        entities
    }
}
