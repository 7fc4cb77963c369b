use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::applier::Applier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::extract_files;
use crate::findings::{Finding, render_findings};
use crate::fix::{FixBatch, parse_fix_response, validate_response};
use crate::llm::LlmTransport;
use crate::prompts::PromptEngine;
use crate::verify::{VerificationResult, Verifier, format_files};

/// Terminal record of one remediation run.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RunOutcome {
    pub success: bool,
    pub files_changed: Vec<String>,
    pub fixes_applied: u32,
    pub fixes_failed: u32,
    pub iterations: u32,
    pub summary: String,
    pub format_passed: bool,
    pub lint_passed: bool,
    pub build_passed: bool,
    pub tests_passed: bool,
    pub error_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

impl RunOutcome {
    /// Success with nothing done: no findings, no iterations, no edits.
    pub fn no_op_success() -> Self {
        Self {
            success: true,
            format_passed: true,
            lint_passed: true,
            build_passed: true,
            tests_passed: true,
            ..Default::default()
        }
    }
}

/// Per-run mutable state owned by the controller.
#[derive(Debug, Default)]
struct IterationState {
    iteration_index: u32,
    last_fix_batch: Option<FixBatch>,
    last_verification: Option<VerificationResult>,
    last_modified_files: Vec<String>,
    files_changed: BTreeSet<String>,
    fixes_applied: u32,
    fixes_failed: u32,
    error_messages: Vec<String>,
}

impl IterationState {
    fn last_combined_errors(&self) -> &str {
        self.last_verification
            .as_ref()
            .map(|v| v.combined_errors.as_str())
            .unwrap_or("")
    }
}

/// The bounded find-apply-verify-correct loop.
///
/// Owns all per-run mutable state; the applier's backup table is the safety
/// net that restores the pre-run working tree on any terminal failure.
pub struct IterationController<L: LlmTransport, V: Verifier> {
    llm: L,
    verifier: V,
    prompts: PromptEngine,
    config: Config,
}

impl<L: LlmTransport, V: Verifier> IterationController<L, V> {
    pub fn new(llm: L, verifier: V, prompts: PromptEngine, config: Config) -> Self {
        Self {
            llm,
            verifier,
            prompts,
            config,
        }
    }

    /// Run the loop to completion. Every run yields a `RunOutcome`; errors
    /// roll the working tree back and surface in `error_messages`.
    pub async fn run(
        &self,
        findings: &[Finding],
        diff: &str,
        initial_files: &BTreeMap<String, String>,
    ) -> RunOutcome {
        if findings.is_empty() {
            info!("no findings to remediate");
            return RunOutcome::no_op_success();
        }

        let mut applier = Applier::new(&self.config.repo_root);
        let mut state = IterationState::default();

        match self
            .run_loop(findings, diff, initial_files, &mut applier, &mut state)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                state.error_messages.push(e.to_string());
                if let Err(restore_err) = applier.restore() {
                    state
                        .error_messages
                        .push(format!("rollback failed: {restore_err}"));
                }
                self.outcome(false, &state)
            }
        }
    }

    async fn run_loop(
        &self,
        findings: &[Finding],
        diff: &str,
        initial_files: &BTreeMap<String, String>,
        applier: &mut Applier,
        state: &mut IterationState,
    ) -> Result<RunOutcome> {
        for iteration in 1..=self.config.max_iterations {
            state.iteration_index = iteration;
            info!(iteration, max = self.config.max_iterations, "starting iteration");

            let prompt = if iteration == 1 {
                self.initial_prompt(findings, diff, initial_files)?
            } else {
                self.correction_prompt(state)?
            };

            // Transport and parse failures are fatal; the loop is a
            // convergence mechanism for verification, not a retry mechanism
            // for the model.
            let reply = self.llm.send(&prompt)?;
            let response = parse_fix_response(&reply)?;
            let validated = validate_response(response);
            state.fixes_failed += validated.dropped;

            if validated.batch.fixes.is_empty() {
                info!(iteration, "model returned no fixes; nothing to do");
                // Commit nothing: any earlier iterations' edits failed
                // verification, so the pre-run tree is restored.
                applier.restore()?;
                let mut outcome = self.outcome(true, state);
                outcome.files_changed.clear();
                outcome.fixes_applied = 0;
                return Ok(outcome);
            }

            let modified = applier.apply(&validated.batch)?;
            state.fixes_applied += validated.batch.fixes.len() as u32;
            state.files_changed.extend(modified.iter().cloned());
            state.last_modified_files = modified.clone();
            state.last_fix_batch = Some(validated.batch);

            if self.config.auto_format {
                format_files(&self.config.verification(), &modified).await;
            }

            let result = self.verifier.run_all().await?;
            info!(
                iteration,
                all_passed = result.all_passed,
                "verification finished"
            );

            if result.all_passed {
                state.last_verification = Some(result);
                applier.clear_backups();
                return Ok(self.outcome(true, state));
            }

            state
                .error_messages
                .push(format!("iteration {iteration}: verification failed"));
            state.last_verification = Some(result);
            // Edits stay applied; the next iteration corrects on top of them.
        }

        Err(Error::Verification(format!(
            "max iterations exceeded ({}): {}",
            self.config.max_iterations,
            state.last_combined_errors()
        )))
    }

    fn initial_prompt(
        &self,
        findings: &[Finding],
        diff: &str,
        initial_files: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("review_issues".to_string(), render_findings(findings));
        vars.insert("diff_content".to_string(), diff.to_string());
        vars.insert(
            "file_contents".to_string(),
            render_file_contents(initial_files),
        );
        self.prompts.render_phase("initial", &vars)
    }

    fn correction_prompt(&self, state: &IterationState) -> Result<String> {
        let widened = self.widened_files(state);
        let previous_fix = state
            .last_fix_batch
            .as_ref()
            .map(|batch| serde_json::to_string_pretty(batch).unwrap_or_default())
            .unwrap_or_default();

        let mut vars = HashMap::new();
        vars.insert(
            "error_output".to_string(),
            state.last_combined_errors().to_string(),
        );
        vars.insert("previous_fix".to_string(), previous_fix);
        vars.insert("file_content".to_string(), render_file_contents(&widened));
        self.prompts.render_phase("correction", &vars)
    }

    /// The correction context: files touched in the previous iteration plus
    /// files named in its verification errors, read fresh from disk so the
    /// model sees the applied edits.
    fn widened_files(&self, state: &IterationState) -> BTreeMap<String, String> {
        let mut paths: BTreeSet<String> = state.last_modified_files.iter().cloned().collect();
        paths.extend(extract_files(state.last_combined_errors()));

        let mut contents = BTreeMap::new();
        for path in paths {
            match std::fs::read_to_string(self.config.repo_root.join(&path)) {
                Ok(content) => {
                    contents.insert(path, content);
                }
                Err(e) => {
                    warn!(file = %path, error = %e, "skipping unreadable file in widened context");
                }
            }
        }
        contents
    }

    fn outcome(&self, success: bool, state: &IterationState) -> RunOutcome {
        let verification = state.last_verification.as_ref();
        RunOutcome {
            success,
            files_changed: state.files_changed.iter().cloned().collect(),
            fixes_applied: state.fixes_applied,
            fixes_failed: state.fixes_failed,
            iterations: state.iteration_index,
            summary: state
                .last_fix_batch
                .as_ref()
                .map(|b| b.summary.clone())
                .unwrap_or_default(),
            format_passed: verification.is_none_or(|v| v.format.passed),
            lint_passed: verification.is_none_or(|v| v.lint.passed),
            build_passed: verification.is_none_or(|v| v.build.passed),
            tests_passed: verification.is_none_or(|v| v.test.passed),
            error_messages: state.error_messages.clone(),
            pr_url: None,
            pr_number: None,
            branch_name: None,
        }
    }
}

/// Render path → content pairs as fenced blocks for prompt injection.
pub fn render_file_contents(files: &BTreeMap<String, String>) -> String {
    files
        .iter()
        .map(|(path, content)| format!("### {path}\n\n```\n{content}\n```"))
        .collect::<Vec<_>>()
        .join("\n\n")
}
