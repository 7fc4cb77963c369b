mod dotnet;
mod golang;
mod node;
mod python;
mod rustlang;

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::VerificationConfig;
use crate::detect::{self, Language};
use crate::error::{Error, Result};
use crate::process::{ToolCommand, run_tool};

/// Marker recorded for a gate that did not run because an earlier gate in
/// the same language already failed.
pub const SKIPPED_MARKER: &str = "skipped due to prior failure";

/// One check class: pass/fail plus the captured tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub output: String,
}

impl CheckResult {
    fn passed_empty() -> Self {
        Self {
            passed: true,
            output: String::new(),
        }
    }

    fn skipped() -> Self {
        Self {
            passed: false,
            output: SKIPPED_MARKER.to_string(),
        }
    }
}

/// Aggregated verification outcome across all detected languages.
///
/// `all_passed` holds iff every enabled check class passed; disabled classes
/// are recorded as passed with empty output so the conjunction stays simple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub format: CheckResult,
    pub lint: CheckResult,
    pub build: CheckResult,
    pub test: CheckResult,
    pub combined_errors: String,
    pub all_passed: bool,
}

impl VerificationResult {
    pub fn passed_empty() -> Self {
        Self {
            format: CheckResult::passed_empty(),
            lint: CheckResult::passed_empty(),
            build: CheckResult::passed_empty(),
            test: CheckResult::passed_empty(),
            combined_errors: String::new(),
            all_passed: true,
        }
    }

    /// Fold another language's result into this one.
    pub fn merge(&mut self, other: VerificationResult) {
        merge_check(&mut self.format, other.format);
        merge_check(&mut self.lint, other.lint);
        merge_check(&mut self.build, other.build);
        merge_check(&mut self.test, other.test);
        append_separated(&mut self.combined_errors, &other.combined_errors);
        self.all_passed = self.all_passed && other.all_passed;
    }
}

fn merge_check(into: &mut CheckResult, other: CheckResult) {
    into.passed = into.passed && other.passed;
    append_separated(&mut into.output, &other.output);
}

fn append_separated(into: &mut String, other: &str) {
    if other.is_empty() {
        return;
    }
    if into.is_empty() {
        into.push_str(other);
    } else {
        into.push_str("\n\n");
        into.push_str(other);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckClass {
    Format,
    Lint,
    Build,
    Test,
}

/// Fail-fast gate sequencing shared by the language verifiers.
///
/// Gates run in the canonical order format → lint → build → test. A
/// disabled class is recorded as passed with empty output; once a gate
/// fails, later gates are recorded with the skip marker instead of running.
pub(crate) struct GateSet<'a> {
    config: &'a VerificationConfig,
    result: VerificationResult,
    failed: bool,
}

impl<'a> GateSet<'a> {
    pub(crate) fn new(config: &'a VerificationConfig) -> Self {
        Self {
            config,
            result: VerificationResult::passed_empty(),
            failed: false,
        }
    }

    pub(crate) fn enabled(&self, class: CheckClass) -> bool {
        match class {
            CheckClass::Format => self.config.run_format,
            CheckClass::Lint => self.config.run_lint,
            CheckClass::Build => self.config.run_build,
            CheckClass::Test => self.config.run_tests,
        }
    }

    fn slot(&mut self, class: CheckClass) -> &mut CheckResult {
        match class {
            CheckClass::Format => &mut self.result.format,
            CheckClass::Lint => &mut self.result.lint,
            CheckClass::Build => &mut self.result.build,
            CheckClass::Test => &mut self.result.test,
        }
    }

    /// Record a gate outcome produced outside `run` (bespoke checks such as
    /// gofmt's list-of-files convention or a dependency install).
    pub(crate) fn record(&mut self, class: CheckClass, passed: bool, output: String) {
        *self.slot(class) = CheckResult { passed, output };
        if !passed {
            self.failed = true;
        }
    }

    /// Mark a gate as skipped because an earlier one failed.
    pub(crate) fn skip(&mut self, class: CheckClass) {
        if self.enabled(class) {
            *self.slot(class) = CheckResult::skipped();
        }
    }

    pub(crate) fn already_failed(&self) -> bool {
        self.failed
    }

    /// Run one gate command. `None` means the class does not apply to this
    /// language and stays recorded as passed/empty.
    pub(crate) async fn run(
        &mut self,
        class: CheckClass,
        command: Option<ToolCommand>,
    ) -> Result<()> {
        if !self.enabled(class) {
            return Ok(());
        }
        if self.failed {
            self.skip(class);
            return Ok(());
        }
        let Some(command) = command else {
            return Ok(());
        };

        let command = command.with_timeout(self.config.tool_timeout);
        let output = run_tool(command).await?;
        self.record(class, output.success(), output.combined());
        Ok(())
    }

    /// Finish the language run, collecting failing outputs into
    /// `combined_errors`.
    pub(crate) fn finish(mut self) -> VerificationResult {
        let mut combined = String::new();
        for check in [
            &self.result.format,
            &self.result.lint,
            &self.result.build,
            &self.result.test,
        ] {
            if !check.passed {
                append_separated(&mut combined, &check.output);
            }
        }
        self.result.combined_errors = combined;
        self.result.all_passed = self.result.format.passed
            && self.result.lint.passed
            && self.result.build.passed
            && self.result.test.passed;
        self.result
    }
}

/// Which verifier serves a language tag. JS and TS share the node verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VerifierKind {
    Go,
    Node,
    Python,
    Rust,
    Dotnet,
}

fn verifier_for(language: Language) -> Result<VerifierKind> {
    match language {
        Language::Go => Ok(VerifierKind::Go),
        Language::Javascript | Language::Typescript => Ok(VerifierKind::Node),
        Language::Python => Ok(VerifierKind::Python),
        Language::Rust => Ok(VerifierKind::Rust),
        Language::Csharp => Ok(VerifierKind::Dotnet),
        Language::Java | Language::Ruby | Language::Php => Err(Error::Execution(format!(
            "unsupported language: {language}"
        ))),
    }
}

/// The one operation the iteration loop needs from verification.
pub trait Verifier {
    fn run_all(&self) -> impl std::future::Future<Output = Result<VerificationResult>> + Send;
}

/// Detects the repository's languages once, then runs every language's
/// verifier on demand and merges the results.
#[derive(Debug)]
pub struct VerifierDispatcher {
    config: VerificationConfig,
    languages: Vec<Language>,
}

impl VerifierDispatcher {
    pub fn new(config: VerificationConfig) -> Result<Self> {
        let languages = detect::detect(&config.repo_root)?;
        Ok(Self { config, languages })
    }

    #[cfg(test)]
    pub fn with_languages(config: VerificationConfig, languages: Vec<Language>) -> Self {
        Self { config, languages }
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    async fn run_all_impl(&self) -> Result<VerificationResult> {
        let mut merged = VerificationResult::passed_empty();
        let mut ran: HashSet<VerifierKind> = HashSet::new();

        for language in &self.languages {
            let kind = verifier_for(*language)?;
            if !ran.insert(kind) {
                continue;
            }
            debug!(language = %language, "running verifier");
            let result = match kind {
                VerifierKind::Go => golang::verify(&self.config).await?,
                VerifierKind::Node => node::verify(&self.config).await?,
                VerifierKind::Python => python::verify(&self.config).await?,
                VerifierKind::Rust => rustlang::verify(&self.config).await?,
                VerifierKind::Dotnet => dotnet::verify(&self.config).await?,
            };
            merged.merge(result);
        }

        Ok(merged)
    }
}

impl Verifier for VerifierDispatcher {
    async fn run_all(&self) -> Result<VerificationResult> {
        self.run_all_impl().await
    }
}

/// Best-effort formatter pass over just-modified files, run before
/// verification to clear trivial formatting noise. Failures are logged and
/// never abort the run.
pub async fn format_files(config: &VerificationConfig, files: &[String]) {
    let mut by_tool: Vec<(&str, Vec<&str>, Vec<String>)> = vec![
        ("gofmt", vec!["-w"], vec![]),
        ("rustfmt", vec![], vec![]),
        ("black", vec!["--quiet"], vec![]),
        ("npx", vec!["--no-install", "prettier", "--write"], vec![]),
    ];

    for file in files {
        let idx = match Path::new(file).extension().and_then(|e| e.to_str()) {
            Some("go") => 0,
            Some("rs") => 1,
            Some("py") => 2,
            Some("js" | "jsx" | "ts" | "tsx") => 3,
            _ => continue,
        };
        by_tool[idx].2.push(file.clone());
    }

    for (program, base_args, files) in by_tool {
        if files.is_empty() {
            continue;
        }
        let mut args: Vec<&str> = base_args;
        args.extend(files.iter().map(String::as_str));
        let command = ToolCommand::new(program, &args, &config.repo_root)
            .with_timeout(config.tool_timeout)
            .with_log_prefix("format");
        match run_tool(command).await {
            Ok(output) if !output.success() => {
                warn!(program, "auto-format reported issues: {}", output.combined());
            }
            Ok(_) => {}
            Err(e) => warn!(program, error = %e, "auto-format could not run"),
        }
    }
}
