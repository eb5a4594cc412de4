// Prompt constants for the generation port. Placeholders are `{name}` and
// are substituted with `fill_template` before sending.

/// Appended to every system prompt; answers are decoded as a single JSON object.
pub const JSON_REPLY_RULES: &str = "Reply with exactly one JSON object and nothing else: \
    no prose before or after it, no markdown fences, no commentary.";

pub const PARSE_CV_SYSTEM: &str = "You are a professional resume parser.";

pub const PARSE_CV_PROMPT_TEMPLATE: &str = r#"Extract structured information from the following resume text.

Resume text:
{cv_text}

Return a JSON object with this EXACT schema:
{
  "full_name": "string",
  "email": "string or null",
  "phone": "string or null",
  "location": "string or null",
  "summary": "string or null",
  "positions": [
    {
      "title": "string",
      "company": "string",
      "start": "YYYY-MM or YYYY",
      "end": "YYYY-MM or YYYY or 'Present'",
      "description": "string"
    }
  ],
  "education": [
    {"degree": "string", "school": "string", "year": "YYYY or string", "field": "string or null"}
  ],
  "skills": ["string"],
  "languages": ["string"],
  "certifications": ["string"]
}

Be thorough and extract all information."#;

pub const FIX_CV_SYSTEM: &str =
    "You are an expert career coach specializing in ATS-optimized resumes.";

/// Replace `{cv_json}`, `{goal}` and `{notes}` before sending.
pub const FIX_CV_PROMPT_TEMPLATE: &str = r#"Current CV data:
{cv_json}

Goal: {goal}
{notes}

Please:
1. Optimize this CV for Applicant Tracking Systems
2. Improve formatting, bullet points, and action verbs
3. Highlight achievements with metrics where the data supports them
4. Make sure keywords match the goal
5. Keep it professional and concise

Return a JSON object with:
{
  "improved_cv_markdown": "Full improved CV in markdown. Use '# ' for the name, '## ' for sections and '- ' for bullets.",
  "changelog": ["what was changed and why"]
}"#;

pub const COVER_LETTER_SYSTEM: &str =
    "You are an expert at writing compelling, personalized cover letters.";

/// Replace `{candidate_json}`, `{job_text}` and `{tone}` before sending.
pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"Candidate profile:
{candidate_json}

Job description:
{job_text}

Tone: {tone}

Write a personalized cover letter that highlights relevant experience and
skills, shows enthusiasm for the role and stays authentic. Do not invent
experience the profile does not contain.

Return JSON with:
{
  "short_version": "200-300 character version for quick apply",
  "full_version": "400-600 word cover letter",
  "key_bullets": ["3-5 key selling points"]
}"#;

/// Fills `{name}` placeholders in one pass. Inserted values are never
/// rescanned, and braces that do not name a variable are kept as written.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let extra: usize = vars.iter().map(|(_, value)| value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match hit {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
