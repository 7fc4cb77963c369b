use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::platform::ReviewComment;

/// A reviewer-style observation feeding the fix prompt. Findings never
/// influence where an edit is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(alias = "description", alias = "issue", default)]
    pub text: String,
}

/// Extract findings from the review comments already posted on a PR.
///
/// Inline comments carry their anchor path/line and contribute their body
/// verbatim. General comments are scanned line-by-line for the
/// `path/to/file.ext:123: text` convention reviewers (and review bots)
/// commonly use.
pub fn findings_from_comments(comments: &[ReviewComment]) -> Vec<Finding> {
    let coordinate = Regex::new(r"^([\w./-]+\.\w+):(\d+):?\s+(.+)$").expect("static regex");

    let mut findings = Vec::new();
    for comment in comments {
        if let Some(path) = &comment.path {
            findings.push(Finding {
                file: path.clone(),
                line: comment.line.unwrap_or(0),
                text: comment.body.trim().to_string(),
            });
            continue;
        }
        for line in comment.body.lines() {
            if let Some(caps) = coordinate.captures(line.trim()) {
                findings.push(Finding {
                    file: caps[1].to_string(),
                    line: caps[2].parse().unwrap_or(0),
                    text: caps[3].trim().to_string(),
                });
            }
        }
    }
    findings
}

/// Render findings as a markdown list for prompt injection.
pub fn render_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No issues found.".to_string();
    }
    findings
        .iter()
        .map(|f| format!("- `{}` L{}: {}", f.file, f.line, f.text))
        .collect::<Vec<_>>()
        .join("\n")
}
