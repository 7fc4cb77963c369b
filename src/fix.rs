use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::findings::Finding;

/// One surgical edit proposed by the model.
///
/// The advisory line numbers are never consulted to locate the edit; only
/// `original_code` is. Alternative key spellings the model sometimes emits
/// (`old_code`/`new_code`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    #[serde(default)]
    pub file: String,
    #[serde(alias = "old_code", default)]
    pub original_code: String,
    #[serde(alias = "new_code", default)]
    pub fixed_code: String,
    #[serde(alias = "issue", default)]
    pub issue_addressed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
}

/// The edits returned by one model call, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixBatch {
    #[serde(default)]
    pub fixes: Vec<Fix>,
    #[serde(default)]
    pub summary: String,
}

/// Raw shape of the model reply: a batch plus, in the combined find-and-fix
/// variant, a sibling list of the issues it identified. Unknown fields are
/// ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixResponse {
    #[serde(default)]
    pub fixes: Vec<Fix>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<Finding>,
}

/// Result of validating a parsed response: the accepted batch plus how many
/// fixes were dropped.
#[derive(Debug)]
pub struct ValidatedBatch {
    pub batch: FixBatch,
    pub dropped: u32,
    pub issues: Vec<Finding>,
}

/// Pull the JSON payload out of a free-form model reply.
///
/// Tries, in order: the first fenced block opened by ```json (or a plain
/// ``` fence whose body starts with `{`), then the span from the first `{`
/// to the last `}`, then the whole trimmed reply.
pub fn extract_json(response: &str) -> String {
    if let Some(block) = extract_fenced_block(response) {
        return block;
    }
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}'))
        && start < end
    {
        return response[start..=end].to_string();
    }
    response.trim().to_string()
}

fn extract_fenced_block(response: &str) -> Option<String> {
    let mut search = 0;
    while let Some(pos) = response[search..].find("```") {
        let abs = search + pos;
        let after = &response[abs + 3..];
        let Some(line_end) = after.find('\n') else {
            return None;
        };
        let tag = after[..line_end].trim();
        let body = &after[line_end + 1..];
        let opens_json = tag.eq_ignore_ascii_case("json")
            || (tag.is_empty() && body.trim_start().starts_with('{'));
        if opens_json {
            let inner = match body.find("```") {
                Some(close) => &body[..close],
                None => body,
            };
            return Some(inner.trim().to_string());
        }
        search = abs + 3;
    }
    None
}

/// Parse a model reply into a `FixResponse`.
pub fn parse_fix_response(raw: &str) -> Result<FixResponse> {
    let json = extract_json(raw);
    serde_json::from_str(&json)
        .map_err(|e| Error::Parse(format!("failed to parse fix response JSON: {e}")))
}

/// Centralized acceptance check: a fix needs a file, an original fragment,
/// and a replacement. Everything else is advisory.
fn is_valid(fix: &Fix) -> bool {
    !fix.file.trim().is_empty()
        && !fix.original_code.is_empty()
        && !fix.fixed_code.is_empty()
}

/// Validate a parsed response, dropping (and logging) unusable fixes.
pub fn validate_response(response: FixResponse) -> ValidatedBatch {
    let mut fixes = Vec::with_capacity(response.fixes.len());
    let mut dropped = 0;

    for fix in response.fixes {
        if !is_valid(&fix) {
            warn!(
                file = %fix.file,
                issue = %fix.issue_addressed,
                "dropping fix with missing file, original_code, or fixed_code"
            );
            dropped += 1;
            continue;
        }
        if let (Some(start), Some(end)) = (fix.line_start, fix.line_end)
            && (start < 1 || end < start)
        {
            // Advisory coordinates only; keep the fix but flag the range.
            warn!(file = %fix.file, start, end, "fix carries an invalid line range");
        }
        fixes.push(fix);
    }

    ValidatedBatch {
        batch: FixBatch {
            fixes,
            summary: response.summary,
        },
        dropped,
        issues: response.issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_fenced_with_tag() {
        let raw = "Here are the fixes:\n```json\n{\"fixes\": []}\n```\nDone.";
        assert_eq!(extract_json(raw), r#"{"fixes": []}"#);
    }

    #[test]
    fn test_extract_json_bare_fence_opening_brace() {
        let raw = "```\n{\"fixes\": []}\n```";
        assert_eq!(extract_json(raw), r#"{"fixes": []}"#);
    }

    #[test]
    fn test_extract_json_bare_fence_not_json_falls_through() {
        // A fenced code sample that is not JSON must not be picked; the
        // brace-span strategy should find the object after it.
        let raw = "```\nlet x = 1;\n```\nresult: {\"fixes\": []}";
        assert_eq!(extract_json(raw), r#"{"fixes": []}"#);
    }

    #[test]
    fn test_extract_json_brace_span() {
        let raw = "Sure! {\"fixes\": [], \"summary\": \"ok\"} hope that helps";
        assert_eq!(extract_json(raw), r#"{"fixes": [], "summary": "ok"}"#);
    }

    #[test]
    fn test_extract_json_whole_response() {
        assert_eq!(extract_json("  null  "), "null");
    }

    #[test]
    fn test_extract_json_unclosed_fence() {
        let raw = "```json\n{\"fixes\": []}";
        assert_eq!(extract_json(raw), r#"{"fixes": []}"#);
    }

    #[test]
    fn test_parse_canonical_keys() {
        let raw = r#"{
            "fixes": [{
                "file": "src/db.go",
                "original_code": "query := fmt.Sprintf(q, id)",
                "fixed_code": "query := db.Prepare(q)",
                "issue_addressed": "SQL injection",
                "line_start": 10,
                "line_end": 10
            }],
            "summary": "parameterized the query"
        }"#;
        let response = parse_fix_response(raw).unwrap();
        assert_eq!(response.fixes.len(), 1);
        assert_eq!(response.fixes[0].file, "src/db.go");
        assert_eq!(response.fixes[0].line_start, Some(10));
        assert_eq!(response.summary, "parameterized the query");
    }

    #[test]
    fn test_parse_alias_keys() {
        let raw = r#"{
            "fixes": [{
                "file": "a.py",
                "old_code": "print(x)",
                "new_code": "logger.info(x)",
                "issue": "print in production code"
            }],
            "summary": "s"
        }"#;
        let response = parse_fix_response(raw).unwrap();
        assert_eq!(response.fixes[0].original_code, "print(x)");
        assert_eq!(response.fixes[0].fixed_code, "logger.info(x)");
        assert_eq!(response.fixes[0].issue_addressed, "print in production code");
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let raw = r#"{"fixes": [], "summary": "", "confidence": 0.9, "notes": ["x"]}"#;
        assert!(parse_fix_response(raw).is_ok());
    }

    #[test]
    fn test_parse_issues_sibling() {
        let raw = r#"{
            "fixes": [],
            "summary": "",
            "issues": [{"file": "a.go", "line": 3, "description": "unchecked error"}]
        }"#;
        let response = parse_fix_response(raw).unwrap();
        assert_eq!(response.issues.len(), 1);
        assert_eq!(response.issues[0].text, "unchecked error");
    }

    #[test]
    fn test_parse_garbage_errors() {
        assert!(parse_fix_response("I could not produce JSON, sorry").is_err());
    }

    fn fix(file: &str, original: &str, fixed: &str) -> Fix {
        Fix {
            file: file.to_string(),
            original_code: original.to_string(),
            fixed_code: fixed.to_string(),
            issue_addressed: String::new(),
            line_start: None,
            line_end: None,
        }
    }

    #[test]
    fn test_validate_drops_empty_fields() {
        let response = FixResponse {
            fixes: vec![
                fix("a.go", "x", "y"),
                fix("", "x", "y"),
                fix("b.go", "", "y"),
                fix("c.go", "x", ""),
            ],
            summary: "s".to_string(),
            issues: vec![],
        };
        let validated = validate_response(response);
        assert_eq!(validated.batch.fixes.len(), 1);
        assert_eq!(validated.dropped, 3);
        assert_eq!(validated.batch.fixes[0].file, "a.go");
        assert_eq!(validated.batch.summary, "s");
    }

    #[test]
    fn test_validate_keeps_fix_with_bad_line_range() {
        let mut f = fix("a.go", "x", "y");
        f.line_start = Some(9);
        f.line_end = Some(3);
        let validated = validate_response(FixResponse {
            fixes: vec![f],
            summary: String::new(),
            issues: vec![],
        });
        assert_eq!(validated.batch.fixes.len(), 1);
        assert_eq!(validated.dropped, 0);
    }

    #[test]
    fn test_validate_empty_response() {
        let validated = validate_response(FixResponse::default());
        assert!(validated.batch.fixes.is_empty());
        assert_eq!(validated.dropped, 0);
    }

    #[test]
    fn test_fix_batch_round_trips_for_correction_prompt() {
        let batch = FixBatch {
            fixes: vec![fix("a.go", "x", "y")],
            summary: "did things".to_string(),
        };
        let json = serde_json::to_string_pretty(&batch).unwrap();
        let back: FixBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }
}
