use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use prmend::cli::Cli;
use prmend::config::{self, Config};
use prmend::controller::{IterationController, RunOutcome, render_file_contents};
use prmend::diff::changed_files;
use prmend::error::{Error, Result};
use prmend::findings::{Finding, findings_from_comments};
use prmend::fix::parse_fix_response;
use prmend::git;
use prmend::llm::{AnthropicClient, LlmTransport};
use prmend::platform::{BitbucketClient, PlatformClient, workspace_repo_from_url};
use prmend::prompts::PromptEngine;
use prmend::publisher::Publisher;
use prmend::verify::VerifierDispatcher;

fn init_logging(pipeline: bool) {
    let default_filter = if pipeline { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let pipeline = config::pipeline_mode();
    init_logging(pipeline);

    info!(pipeline, "prmend starting");

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let outcome = match run(&config).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    if pipeline {
        // Machine-readable outcome on stdout; progress went to stderr.
        match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error: could not serialize outcome: {e}"),
        }
    }

    if !outcome.success {
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> Result<RunOutcome> {
    let (workspace, repo_slug) = resolve_workspace(config)?;
    info!(workspace = %workspace, repo_slug = %repo_slug, pr = config.pr, "resolved repository");

    let platform = BitbucketClient::new(&workspace, &repo_slug)?;
    let prompts = PromptEngine::new(config.templates_dir.clone());

    let pr = platform.get_pull_request(config.pr)?;
    info!(pr = pr.id, title = %pr.title, source = %pr.source_branch, "fetched pull request");

    let diff = platform.get_diff(pr.id)?;
    let initial_files = read_changed_files(config, &diff);

    let comments = platform.list_comments(pr.id)?;
    let mut findings = findings_from_comments(&comments);
    info!(count = findings.len(), "parsed findings from review comments");

    let llm = AnthropicClient::new(&config.model, config.max_tokens)?;

    if findings.is_empty() && config.generate {
        findings = generate_findings(&llm, &prompts, &diff, &initial_files)?;
        info!(count = findings.len(), "model generated findings");
    }

    if findings.is_empty() {
        info!("nothing to remediate");
        return Ok(RunOutcome::no_op_success());
    }

    let verifier = VerifierDispatcher::new(config.verification())?;
    let controller = IterationController::new(llm, verifier, prompts, config.clone());
    let mut outcome = controller.run(&findings, &diff, &initial_files).await;

    if outcome.success && !outcome.files_changed.is_empty() {
        if config.dry_run {
            info!("dry run: skipping branch/commit/push/PR creation");
        } else {
            let publisher = Publisher::new(&platform, config);
            let fix_branch = publisher.branch_name(&pr.source_branch);
            match publisher.publish(&fix_branch, &pr, &mut outcome) {
                Ok(()) => notify_original_pr(&platform, pr.id, &outcome),
                Err(e) => {
                    // The fix branch may remain locally and remotely; the
                    // outcome carries its name so the caller can finish by
                    // hand.
                    outcome.success = false;
                    outcome.error_messages.push(e.to_string());
                }
            }
        }
    }

    Ok(outcome)
}

fn resolve_workspace(config: &Config) -> Result<(String, String)> {
    if let (Some(workspace), Some(slug)) = (&config.workspace, &config.repo_slug) {
        return Ok((workspace.clone(), slug.clone()));
    }
    let url = git::origin_url(&config.repo_root)?;
    workspace_repo_from_url(&url).ok_or_else(|| {
        Error::ConfigValidation(format!(
            "cannot determine workspace/repo_slug from origin URL {url}; pass --workspace and --repo-slug"
        ))
    })
}

/// Contents of the files the diff touches, read from the working tree.
fn read_changed_files(config: &Config, diff: &str) -> BTreeMap<String, String> {
    let mut contents = BTreeMap::new();
    for file in changed_files(diff) {
        match std::fs::read_to_string(config.repo_root.join(&file)) {
            Ok(content) => {
                contents.insert(file, content);
            }
            Err(e) => warn!(file = %file, error = %e, "skipping unreadable changed file"),
        }
    }
    contents
}

/// Leave a summary comment on the original PR pointing at the stacked fix
/// PR. Best-effort: the fixes are already published.
fn notify_original_pr(platform: &impl PlatformClient, pr_id: u64, outcome: &RunOutcome) {
    let (Some(url), Some(number)) = (&outcome.pr_url, outcome.pr_number) else {
        return;
    };
    let body = format!(
        "Automated review fixes opened in [PR #{number}]({url}) targeting this PR's source branch ({} fixes over {} iterations).",
        outcome.fixes_applied, outcome.iterations
    );
    if let Err(e) = platform.post_comment(pr_id, &body) {
        warn!(error = %e, "could not post summary comment on the original PR");
    }
}

/// Ask the model to review the diff itself; its `issues` become the
/// findings the remediation loop works from.
fn generate_findings(
    llm: &impl LlmTransport,
    prompts: &PromptEngine,
    diff: &str,
    initial_files: &BTreeMap<String, String>,
) -> Result<Vec<Finding>> {
    let mut vars = HashMap::new();
    vars.insert("diff_content".to_string(), diff.to_string());
    vars.insert(
        "file_contents".to_string(),
        render_file_contents(initial_files),
    );
    let prompt = prompts.render_phase("find", &vars)?;
    let reply = llm.send(&prompt)?;
    let response = parse_fix_response(&reply)?;
    Ok(response.issues)
}
