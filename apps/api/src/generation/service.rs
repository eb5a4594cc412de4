use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use super::prompts::{
    fill_template, COVER_LETTER_PROMPT_TEMPLATE, COVER_LETTER_SYSTEM, FIX_CV_PROMPT_TEMPLATE,
    FIX_CV_SYSTEM, JSON_REPLY_RULES, PARSE_CV_PROMPT_TEMPLATE, PARSE_CV_SYSTEM,
};
use super::{CoverLetter, FixedCv, GenerationError, GenerationService, ParsedCv, Tone};
use crate::llm_client::{CallOptions, LlmClient};

const PARSE_OPTIONS: CallOptions = CallOptions::new(0.3, 4096);
const FIX_OPTIONS: CallOptions = CallOptions::new(0.7, 4096);
const COVER_LETTER_OPTIONS: CallOptions = CallOptions::new(0.8, 2048);

pub struct LlmGenerationService {
    llm: LlmClient,
}

impl LlmGenerationService {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

fn system_prompt(role: &str) -> String {
    format!("{role} {JSON_REPLY_RULES}")
}

fn pretty(value: &Value) -> Result<String, GenerationError> {
    serde_json::to_string_pretty(value).map_err(|e| GenerationError::Malformed(e.to_string()))
}

#[async_trait]
impl GenerationService for LlmGenerationService {
    #[instrument(skip_all, fields(chars = text.len()))]
    async fn parse_cv(&self, text: &str) -> Result<ParsedCv, GenerationError> {
        let prompt = fill_template(PARSE_CV_PROMPT_TEMPLATE, &[("cv_text", text)]);
        let parsed: ParsedCv = self
            .llm
            .call_json(&prompt, &system_prompt(PARSE_CV_SYSTEM), PARSE_OPTIONS)
            .await?;
        info!(
            positions = parsed.positions.len(),
            skills = parsed.skills.len(),
            "CV parsed"
        );
        Ok(parsed)
    }

    #[instrument(skip_all)]
    async fn fix_cv(
        &self,
        parsed: &Value,
        goal: &str,
        notes: Option<&str>,
    ) -> Result<FixedCv, GenerationError> {
        let notes = notes
            .filter(|n| !n.trim().is_empty())
            .map(|n| format!("Additional notes: {n}"))
            .unwrap_or_default();
        let cv_json = pretty(parsed)?;
        let prompt = fill_template(
            FIX_CV_PROMPT_TEMPLATE,
            &[("cv_json", cv_json.as_str()), ("goal", goal), ("notes", notes.as_str())],
        );

        let fixed: FixedCv = self
            .llm
            .call_json(&prompt, &system_prompt(FIX_CV_SYSTEM), FIX_OPTIONS)
            .await?;
        if fixed.improved_cv_markdown.trim().is_empty() {
            return Err(GenerationError::Malformed(
                "improved_cv_markdown is empty".to_string(),
            ));
        }
        Ok(fixed)
    }

    #[instrument(skip_all, fields(tone = %tone))]
    async fn cover_letter(
        &self,
        candidate: &Value,
        job_text: &str,
        tone: Tone,
    ) -> Result<CoverLetter, GenerationError> {
        let candidate_json = pretty(candidate)?;
        let prompt = fill_template(
            COVER_LETTER_PROMPT_TEMPLATE,
            &[
                ("candidate_json", candidate_json.as_str()),
                ("job_text", job_text),
                ("tone", tone.as_str()),
            ],
        );

        let letter: CoverLetter = self
            .llm
            .call_json(
                &prompt,
                &system_prompt(COVER_LETTER_SYSTEM),
                COVER_LETTER_OPTIONS,
            )
            .await?;
        if letter.full.trim().is_empty() {
            return Err(GenerationError::Malformed("full cover letter is empty".to_string()));
        }
        Ok(letter)
    }
}
