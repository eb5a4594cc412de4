//! AI generation port: CV parsing, CV improvement, cover letters.
//!
//! Workers depend on [`GenerationService`]; the production implementation
//! forwards to the single `LlmClient`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm_client::LlmError;

pub mod prompts;
pub mod service;

pub use service::LlmGenerationService;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Formal,
    Creative,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Friendly => "friendly",
            Tone::Formal => "formal",
            Tone::Creative => "creative",
        }
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "professional" => Ok(Tone::Professional),
            "friendly" => Ok(Tone::Friendly),
            "formal" => Ok(Tone::Formal),
            "creative" => Ok(Tone::Creative),
            other => Err(format!(
                "Invalid tone '{other}'. Expected one of: professional, friendly, formal, creative"
            )),
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured CV as returned by the parser. Every field tolerates absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedCv {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub summary: Option<String>,
    pub positions: Vec<Value>,
    pub education: Vec<Value>,
    pub skills: Vec<String>,
    pub languages: Vec<String>,
    pub certifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCv {
    pub improved_cv_markdown: String,
    /// Free text or a list of bullet strings, whichever the model returned.
    #[serde(default)]
    pub changelog: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverLetter {
    #[serde(alias = "short_version")]
    pub short: String,
    #[serde(alias = "full_version")]
    pub full: String,
    #[serde(alias = "key_bullets", default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("malformed generation output: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Malformed output is worth another sample; rejected requests are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Llm(e) => e.is_transient(),
            GenerationError::Malformed(_) => true,
        }
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn parse_cv(&self, text: &str) -> Result<ParsedCv, GenerationError>;

    async fn fix_cv(
        &self,
        parsed: &Value,
        goal: &str,
        notes: Option<&str>,
    ) -> Result<FixedCv, GenerationError>;

    /// `candidate` is the merged profile/CV summary sent to the model.
    async fn cover_letter(
        &self,
        candidate: &Value,
        job_text: &str,
        tone: Tone,
    ) -> Result<CoverLetter, GenerationError>;
}
