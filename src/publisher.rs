use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::RunOutcome;
use crate::error::{Error, Result};
use crate::git;
use crate::platform::{PlatformClient, PullRequest};

const DEFAULT_TITLE: &str = include_str!("default_prompts/pr-title.md");
const DEFAULT_BODY: &str = include_str!("default_prompts/pr-body.md");
const DEFAULT_COMMIT: &str = "Apply automated review fixes for PR #{original_pr_id}";

/// Placeholders whose values are author-controlled and get markdown-escaped
/// in the description; status/explanation/file-list placeholders pass
/// through so they can embed markdown.
const ESCAPED_PLACEHOLDERS: &[&str] = &["{original_title}"];

/// Publishes verified fixes: branch, stage, commit, push, then open a
/// stacked PR whose destination is the original PR's source branch.
pub struct Publisher<'a, P: PlatformClient> {
    platform: &'a P,
    config: &'a Config,
}

impl<'a, P: PlatformClient> Publisher<'a, P> {
    pub fn new(platform: &'a P, config: &'a Config) -> Self {
        Self { platform, config }
    }

    /// `{prefix}-{source_branch}-{UTC timestamp}`; the timestamp makes
    /// collisions vanishingly unlikely.
    pub fn branch_name(&self, source_branch: &str) -> String {
        self.branch_name_at(source_branch, Utc::now())
    }

    pub fn branch_name_at(&self, source_branch: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}",
            self.config.branch_prefix,
            source_branch,
            now.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Publish the outcome's modified files on `fix_branch` and open (or
    /// reuse) the stacked PR. Updates the outcome with branch and PR info.
    pub fn publish(
        &self,
        fix_branch: &str,
        original_pr: &PullRequest,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        git::validate_branch_name(fix_branch)?;
        let repo = &self.config.repo_root;

        // Idempotency: an open PR from this branch means a previous publish
        // already completed; reuse it without touching git again.
        if let Some(existing) = self.platform.find_open_pr_by_source(fix_branch)? {
            info!(pr = existing.id, "reusing existing stacked PR");
            outcome.branch_name = Some(fix_branch.to_string());
            outcome.pr_number = Some(existing.id);
            outcome.pr_url = Some(existing.link);
            return Ok(());
        }

        let branch = self.create_branch_with_retry(repo, fix_branch)?;
        outcome.branch_name = Some(branch.clone());

        git::stage_files(repo, &outcome.files_changed)
            .map_err(|e| Error::Publish(e.to_string()))?;
        let commit_message = substitute(DEFAULT_COMMIT, &self.fields(original_pr, outcome), &[]);
        git::commit(repo, &commit_message).map_err(|e| Error::Publish(e.to_string()))?;
        git::push(repo, &branch).map_err(|e| Error::Publish(e.to_string()))?;

        // Surface a clearer error than the platform's default when the push
        // did not land.
        if !self.platform.branch_exists(&branch)? {
            return Err(Error::Publish(format!(
                "branch {branch} not found on remote after push"
            )));
        }

        let fields = self.fields(original_pr, outcome);
        let title = substitute(&self.template("pr-title.md", DEFAULT_TITLE), &fields, &[]);
        let description = substitute(
            &self.template("pr-body.md", DEFAULT_BODY),
            &fields,
            ESCAPED_PLACEHOLDERS,
        );

        let created = self.platform.create_pull_request(
            title.trim(),
            &description,
            &branch,
            &original_pr.source_branch,
            true,
        )?;
        info!(pr = created.id, url = %created.link, "opened stacked PR");
        outcome.pr_number = Some(created.id);
        outcome.pr_url = Some(created.link);
        Ok(())
    }

    fn create_branch_with_retry(&self, repo: &Path, fix_branch: &str) -> Result<String> {
        match git::create_branch(repo, fix_branch) {
            Ok(()) => Ok(fix_branch.to_string()),
            Err(first_err) if git::local_branch_exists(repo, fix_branch) => {
                let suffixed = format!("{fix_branch}-{}", short_suffix());
                warn!(
                    branch = fix_branch,
                    retry = %suffixed,
                    "fix branch collided; retrying once with suffix"
                );
                match git::create_branch(repo, &suffixed) {
                    Ok(()) => Ok(suffixed),
                    Err(_) => Err(Error::Publish(format!(
                        "could not create fix branch {fix_branch}: {first_err}"
                    ))),
                }
            }
            Err(e) => Err(Error::Publish(e.to_string())),
        }
    }

    fn template(&self, name: &str, default: &str) -> String {
        if let Some(ref dir) = self.config.templates_dir {
            let path = Path::new(dir).join(name);
            if let Ok(content) = std::fs::read_to_string(&path) {
                return content;
            }
        }
        default.to_string()
    }

    fn fields(&self, original_pr: &PullRequest, outcome: &RunOutcome) -> Vec<(String, String)> {
        let status = |passed: bool| if passed { "passed" } else { "failed" }.to_string();
        let file_list = if outcome.files_changed.is_empty() {
            "(none)".to_string()
        } else {
            outcome
                .files_changed
                .iter()
                .map(|f| format!("- `{f}`"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        vec![
            ("{pr_id}".to_string(), original_pr.id.to_string()),
            ("{original_title}".to_string(), original_pr.title.clone()),
            ("{original_pr_id}".to_string(), original_pr.id.to_string()),
            ("{original_pr_link}".to_string(), original_pr.link.clone()),
            (
                "{issue_count}".to_string(),
                outcome.fixes_applied.to_string(),
            ),
            (
                "{iteration_count}".to_string(),
                outcome.iterations.to_string(),
            ),
            ("{file_list}".to_string(), file_list),
            (
                "{build_status}".to_string(),
                status(outcome.build_passed),
            ),
            ("{test_status}".to_string(), status(outcome.tests_passed)),
            ("{lint_status}".to_string(), status(outcome.lint_passed)),
            ("{ai_explanation}".to_string(), outcome.summary.clone()),
        ]
    }
}

/// Straightforward placeholder substitution. Placeholders listed in
/// `escaped` have their values markdown-escaped first.
fn substitute(template: &str, fields: &[(String, String)], escaped: &[&str]) -> String {
    let mut out = template.to_string();
    for (placeholder, value) in fields {
        let value = if escaped.contains(&placeholder.as_str()) {
            markdown_escape(value)
        } else {
            value.clone()
        };
        out = out.replace(placeholder, &value);
    }
    out
}

fn markdown_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '`' | '*' | '_' | '{' | '}' | '[' | ']' | '(' | ')' | '#' | '+' | '-' | '.'
                | '!' | '|' | '>'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn short_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:04x}", nanos & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::cli::Cli;
    use crate::config::{ConfigFile, merge};
    use clap::Parser;

    struct NoopPlatform;

    impl PlatformClient for NoopPlatform {
        fn get_pull_request(&self, _id: u64) -> Result<PullRequest> {
            unimplemented!()
        }
        fn get_diff(&self, _id: u64) -> Result<String> {
            unimplemented!()
        }
        fn list_comments(&self, _id: u64) -> Result<Vec<crate::platform::ReviewComment>> {
            unimplemented!()
        }
        fn post_comment(&self, _id: u64, _body: &str) -> Result<()> {
            unimplemented!()
        }
        fn find_open_pr_by_source(&self, _branch: &str) -> Result<Option<PullRequest>> {
            Ok(None)
        }
        fn branch_exists(&self, _branch: &str) -> Result<bool> {
            Ok(true)
        }
        fn create_pull_request(
            &self,
            _title: &str,
            _description: &str,
            _source: &str,
            _destination: &str,
            _close: bool,
        ) -> Result<PullRequest> {
            unimplemented!()
        }
    }

    fn config() -> Config {
        let cli = Cli::parse_from(["prmend", "--pr", "1"]);
        merge(ConfigFile::default(), &cli).unwrap()
    }

    fn original_pr() -> PullRequest {
        PullRequest {
            id: 42,
            title: "Add *widget* parser".to_string(),
            description: String::new(),
            source_branch: "feature/widget".to_string(),
            destination_branch: "main".to_string(),
            author: "Dana".to_string(),
            link: "https://bitbucket.org/acme/widget/pull-requests/42".to_string(),
        }
    }

    fn outcome() -> RunOutcome {
        RunOutcome {
            success: true,
            files_changed: vec!["src/a.go".to_string(), "src/b.go".to_string()],
            fixes_applied: 3,
            fixes_failed: 0,
            iterations: 2,
            summary: "Parameterized the query and closed the handle.".to_string(),
            format_passed: true,
            lint_passed: true,
            build_passed: true,
            tests_passed: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_branch_name_format() {
        let config = config();
        let publisher = Publisher::new(&NoopPlatform, &config);
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 5).unwrap();
        assert_eq!(
            publisher.branch_name_at("feature/widget", now),
            "prmend-feature/widget-20260801T123005Z"
        );
        assert!(git::validate_branch_name(&publisher.branch_name("feature/widget")).is_ok());
    }

    #[test]
    fn test_fields_cover_all_placeholders() {
        let config = config();
        let publisher = Publisher::new(&NoopPlatform, &config);
        let fields = publisher.fields(&original_pr(), &outcome());
        for placeholder in [
            "{pr_id}",
            "{original_title}",
            "{original_pr_id}",
            "{original_pr_link}",
            "{issue_count}",
            "{iteration_count}",
            "{file_list}",
            "{build_status}",
            "{test_status}",
            "{lint_status}",
            "{ai_explanation}",
        ] {
            assert!(
                fields.iter().any(|(p, _)| p == placeholder),
                "missing {placeholder}"
            );
        }
    }

    #[test]
    fn test_default_body_substitution() {
        let config = config();
        let publisher = Publisher::new(&NoopPlatform, &config);
        let fields = publisher.fields(&original_pr(), &outcome());
        let body = substitute(DEFAULT_BODY, &fields, ESCAPED_PLACEHOLDERS);

        assert!(body.contains("PR #42"));
        assert!(body.contains("- `src/a.go`"));
        assert!(body.contains("Build: passed"));
        assert!(body.contains("Tests: failed"));
        assert!(body.contains("Parameterized the query"));
        // Author-controlled title is escaped.
        assert!(body.contains(r"Add \*widget\* parser"));
        assert!(!body.contains('{'), "unsubstituted placeholder left: {body}");
    }

    #[test]
    fn test_title_not_escaped() {
        let config = config();
        let publisher = Publisher::new(&NoopPlatform, &config);
        let fields = publisher.fields(&original_pr(), &outcome());
        let title = substitute(DEFAULT_TITLE, &fields, &[]);
        assert_eq!(
            title.trim(),
            "Automated review fixes for PR #42: Add *widget* parser"
        );
    }

    #[test]
    fn test_markdown_escape() {
        assert_eq!(markdown_escape("a*b_c[d]"), r"a\*b\_c\[d\]");
        assert_eq!(markdown_escape("plain"), "plain");
        assert_eq!(markdown_escape("`rm -rf`"), r"\`rm \-rf\`");
    }

    #[test]
    fn test_template_override() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("pr-title.md"), "Custom: {original_pr_id}").unwrap();

        let cli = Cli::parse_from([
            "prmend",
            "--pr",
            "1",
            "--templates-dir",
            tmp.path().to_str().unwrap(),
        ]);
        let config = merge(ConfigFile::default(), &cli).unwrap();
        let publisher = Publisher::new(&NoopPlatform, &config);
        assert_eq!(
            publisher.template("pr-title.md", DEFAULT_TITLE),
            "Custom: {original_pr_id}"
        );
        // Missing override falls back to the default.
        assert_eq!(publisher.template("pr-body.md", DEFAULT_BODY), DEFAULT_BODY);
    }

    #[test]
    fn test_short_suffix_is_four_hex_chars() {
        let suffix = short_suffix();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_commit_message_substitution() {
        let config = config();
        let publisher = Publisher::new(&NoopPlatform, &config);
        let fields = publisher.fields(&original_pr(), &outcome());
        let message = substitute(DEFAULT_COMMIT, &fields, &[]);
        assert_eq!(message, "Apply automated review fixes for PR #42");
    }
}
