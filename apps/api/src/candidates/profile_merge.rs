//! Profile reconciliation rules shared by the parse and cover-letter workers.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::generation::ParsedCv;
use crate::models::cv::ParsedResumeRow;
use crate::models::user::{Profile, User};

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Fills only the profile fields that are currently empty. A field the user
/// already edited is never overwritten. Returns the names of filled fields.
///
/// `last_parsed_at` is always updated.
pub fn merge_parsed_into_profile(
    profile: &mut Profile,
    parsed: &ParsedCv,
    parsed_at: DateTime<Utc>,
) -> Vec<&'static str> {
    let mut filled = Vec::new();

    macro_rules! fill_text {
        ($field:ident, $source:expr, $name:literal) => {
            if is_blank(&profile.$field) {
                if let Some(value) = non_blank($source) {
                    profile.$field = Some(value);
                    filled.push($name);
                }
            }
        };
    }
    macro_rules! fill_list {
        ($field:ident, $source:expr, $name:literal) => {
            if profile.$field.is_empty() && !$source.is_empty() {
                profile.$field = $source.clone();
                filled.push($name);
            }
        };
    }

    fill_text!(full_name, &parsed.full_name, "full_name");
    fill_text!(phone, &parsed.phone, "phone");
    fill_text!(location, &parsed.location, "location");
    fill_text!(about, &parsed.summary, "about");
    fill_list!(skills, parsed.skills, "skills");
    fill_list!(languages, parsed.languages, "languages");
    fill_list!(certifications, parsed.certifications, "certifications");

    if is_empty_json(&profile.experience) && !parsed.positions.is_empty() {
        profile.experience = Value::Array(parsed.positions.clone());
        filled.push("experience");
    }
    if is_empty_json(&profile.education) && !parsed.education.is_empty() {
        profile.education = Value::Array(parsed.education.clone());
        filled.push("education");
    }

    profile.last_parsed_at = Some(parsed_at);
    filled
}

/// Recovers the structured CV from a stored parse, tolerating older payloads.
pub fn parsed_cv_from_row(row: &ParsedResumeRow) -> ParsedCv {
    let mut parsed: ParsedCv = serde_json::from_value(row.json_payload.clone()).unwrap_or_default();
    if parsed.skills.is_empty() {
        parsed.skills = row.skills.clone();
    }
    if parsed.positions.is_empty() {
        if let Value::Array(positions) = &row.positions {
            parsed.positions = positions.clone();
        }
    }
    parsed
}

/// Union preserving first-seen order, compared case-insensitively.
fn union_skills(primary: &[String], secondary: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    primary
        .iter()
        .chain(secondary)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Candidate summary sent to cover-letter generation. Profile data wins,
/// CV data fills the gaps and skills are unioned.
pub fn candidate_summary(
    user: Option<&User>,
    profile: Option<&Profile>,
    cv: Option<&ParsedCv>,
) -> Value {
    let empty = ParsedCv::default();
    let cv = cv.unwrap_or(&empty);
    let pick = |from_profile: Option<&Option<String>>, from_cv: &Option<String>| {
        from_profile.and_then(non_blank).or_else(|| non_blank(from_cv))
    };

    let experience = profile
        .map(|p| p.experience.clone())
        .filter(|e| !is_empty_json(e))
        .unwrap_or_else(|| Value::Array(cv.positions.clone()));
    let education = profile
        .map(|p| p.education.clone())
        .filter(|e| !is_empty_json(e))
        .unwrap_or_else(|| Value::Array(cv.education.clone()));

    let list = |from_profile: Option<&Vec<String>>, from_cv: &Vec<String>| {
        from_profile
            .filter(|l| !l.is_empty())
            .unwrap_or(from_cv)
            .clone()
    };

    json!({
        "full_name": pick(profile.map(|p| &p.full_name), &cv.full_name),
        "email": user.map(|u| u.email.clone()).or_else(|| non_blank(&cv.email)),
        "phone": pick(profile.map(|p| &p.phone), &cv.phone),
        "location": pick(profile.map(|p| &p.location), &cv.location),
        "summary": pick(profile.map(|p| &p.about), &cv.summary),
        "skills": union_skills(profile.map(|p| p.skills.as_slice()).unwrap_or_default(), &cv.skills),
        "experience": experience,
        "education": education,
        "languages": list(profile.map(|p| &p.languages), &cv.languages),
        "certifications": list(profile.map(|p| &p.certifications), &cv.certifications),
    })
}
