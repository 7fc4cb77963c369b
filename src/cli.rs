use clap::Parser;

/// prmend — automated code-review remediation with stacked pull requests
#[derive(Parser, Debug)]
#[command(name = "prmend", version, about)]
pub struct Cli {
    /// Pull request id to remediate
    #[arg(long)]
    pub pr: u64,

    /// Repository working tree root
    #[arg(long, default_value = ".")]
    pub repo_root: String,

    /// Path to config file
    #[arg(long)]
    pub config: Option<String>,

    /// Maximum fix-verify iterations before giving up
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Run the loop but skip branch/commit/push/PR creation
    #[arg(long)]
    pub dry_run: bool,

    /// Generate findings with the model when the PR has no review comments
    #[arg(long)]
    pub generate: bool,

    /// Skip the format check
    #[arg(long)]
    pub skip_format: bool,

    /// Skip the static-analysis check
    #[arg(long)]
    pub skip_lint: bool,

    /// Skip the build check
    #[arg(long)]
    pub skip_build: bool,

    /// Skip the test check
    #[arg(long)]
    pub skip_tests: bool,

    /// Disable the post-apply auto-format pass
    #[arg(long)]
    pub no_auto_format: bool,

    /// Prefix for the fix branch name
    #[arg(long)]
    pub branch_prefix: Option<String>,

    /// Model for fix generation
    #[arg(long)]
    pub model: Option<String>,

    /// Platform workspace (defaults to the origin remote URL)
    #[arg(long)]
    pub workspace: Option<String>,

    /// Platform repository slug (defaults to the origin remote URL)
    #[arg(long)]
    pub repo_slug: Option<String>,

    /// Directory with prompt/PR template overrides
    #[arg(long)]
    pub templates_dir: Option<String>,

    /// Per-toolchain subprocess timeout in seconds
    #[arg(long)]
    pub tool_timeout: Option<u64>,
}
