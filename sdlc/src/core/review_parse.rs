//! Parsing of the untrusted review agent response.
//!
//! The response is free text that should contain one JSON object. It is
//! schema-validated before deserialization; anything that fails falls back to
//! a keyword heuristic. Parsing never returns an error.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::{IssueSeverity, Perspective, ReviewIssue};

const REVIEW_OUTPUT_SCHEMA: &str = include_str!("../../schemas/review_output.schema.json");
const HEURISTIC_DESCRIPTION_CHARS: usize = 500;

static REVIEW_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(REVIEW_OUTPUT_SCHEMA).expect("embedded review schema is valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded review schema compiles")
});

/// Review findings recovered from an agent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReview {
    pub issues: Vec<ReviewIssue>,
    pub summary: Option<String>,
    /// The response could not be interpreted; the review must not pass.
    pub forced_fail: bool,
    pub from_heuristic: bool,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    summary: Option<String>,
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIssue {
    severity: IssueSeverity,
    category: String,
    description: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default, alias = "suggested_fix")]
    suggested_fix: Option<String>,
    #[serde(default)]
    perspectives: Option<Vec<Perspective>>,
}

impl From<RawIssue> for ReviewIssue {
    fn from(raw: RawIssue) -> Self {
        let mut perspectives = raw.perspectives.unwrap_or_default();
        perspectives.dedup();
        ReviewIssue {
            severity: raw.severity,
            category: raw.category,
            description: raw.description,
            file: raw.file.filter(|file| !file.trim().is_empty()),
            line: raw.line,
            suggested_fix: raw.suggested_fix.filter(|fix| !fix.trim().is_empty()),
            perspectives,
        }
    }
}

/// Parse a review response, falling back to keyword heuristics.
pub fn parse_review_response(response: &str) -> ParsedReview {
    match parse_structured(response) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!(%reason, "review response failed validation; using heuristic fallback");
            parse_heuristic(response)
        }
    }
}

/// Find the first balanced `{...}` fragment that parses as JSON.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(bytes, start) {
            let candidate = &text[start..=end];
            if serde_json::from_str::<Value>(candidate).is_ok() {
                return Some(candidate);
            }
        }
        search_from = start + 1;
    }
    None
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_structured(response: &str) -> Result<ParsedReview, String> {
    let fragment = extract_json_object(response).ok_or("no JSON object found")?;
    let value: Value = serde_json::from_str(fragment).map_err(|err| err.to_string())?;
    let errors: Vec<String> = REVIEW_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(format!("schema validation failed: {}", errors.join("; ")));
    }
    let raw: RawReview = serde_json::from_value(value).map_err(|err| err.to_string())?;
    debug!(issues = raw.issues.len(), "parsed structured review");
    Ok(ParsedReview {
        issues: raw.issues.into_iter().map(ReviewIssue::from).collect(),
        summary: raw.summary.filter(|summary| !summary.trim().is_empty()),
        forced_fail: false,
        from_heuristic: false,
    })
}

fn parse_heuristic(response: &str) -> ParsedReview {
    let mut issues = Vec::new();
    for line in response.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let lower = line.to_ascii_lowercase();
        let severity = if mentions(&lower, &["block", "must fix"]) {
            IssueSeverity::Blocker
        } else if mentions(&lower, &["critical", "reject"]) {
            IssueSeverity::Critical
        } else if mentions(&lower, &["should fix"]) {
            IssueSeverity::Major
        } else {
            continue;
        };
        let description: String = line
            .trim_start_matches(['-', '*', '#', ' '])
            .chars()
            .take(HEURISTIC_DESCRIPTION_CHARS)
            .collect();
        issues.push(ReviewIssue::new(severity, "review", description));
    }

    if !issues.is_empty() {
        return ParsedReview {
            issues,
            summary: None,
            forced_fail: false,
            from_heuristic: true,
        };
    }

    let lower = response.to_ascii_lowercase();
    if mentions(&lower, &["approved", "lgtm", "looks good", "pass"]) {
        return ParsedReview {
            issues,
            summary: None,
            forced_fail: false,
            from_heuristic: true,
        };
    }

    ParsedReview {
        issues: vec![
            ReviewIssue::new(
                IssueSeverity::Major,
                "review_parse",
                "Review response could not be parsed and did not clearly approve the changes.",
            )
            .with_suggested_fix("Re-run the review so it returns the structured JSON format."),
        ],
        summary: None,
        forced_fail: true,
        from_heuristic: true,
    }
}

/// Words that negate the keyword directly after them ("nothing blocking").
const NEGATIONS: &[&str] = &["no", "not", "without", "nothing", "never", "none", "zero"];

/// Keyword match at a word start that ignores directly negated mentions.
///
/// Degraded mode for unparseable responses: only the single word before the
/// keyword is inspected, so longer negations ("no real blockers") still count.
fn mentions(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| {
        lower.match_indices(keyword).any(|(idx, _)| {
            let before = &lower[..idx];
            if before.chars().next_back().is_some_and(char::is_alphanumeric) {
                return false;
            }
            let before = before.trim_end();
            let previous_word = before
                .rsplit(|c: char| !c.is_alphanumeric())
                .next()
                .unwrap_or_default();
            !(before.ends_with("n't") || NEGATIONS.contains(&previous_word))
        })
    })
}
