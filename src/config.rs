use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub platform: Option<String>,
    pub workspace: Option<String>,
    pub repo_slug: Option<String>,
    pub branch_prefix: Option<String>,
    pub max_iterations: Option<u32>,
    pub run_format: Option<bool>,
    pub run_lint: Option<bool>,
    pub run_build: Option<bool>,
    pub run_tests: Option<bool>,
    pub auto_format: Option<bool>,
    pub generate: Option<bool>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    #[serde(alias = "tool_timeout")]
    pub tool_timeout_secs: Option<u64>,
    pub templates_dir: Option<String>,
}

/// Which check classes the verifiers run, and where.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    pub repo_root: PathBuf,
    pub run_format: bool,
    pub run_lint: bool,
    pub run_build: bool,
    pub run_tests: bool,
    pub tool_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub pr: u64,
    pub repo_root: PathBuf,
    pub platform: String,
    pub workspace: Option<String>,
    pub repo_slug: Option<String>,
    pub branch_prefix: String,
    pub max_iterations: u32,
    pub run_format: bool,
    pub run_lint: bool,
    pub run_build: bool,
    pub run_tests: bool,
    pub auto_format: bool,
    pub dry_run: bool,
    pub generate: bool,
    pub model: String,
    pub max_tokens: u32,
    pub tool_timeout_secs: u64,
    pub templates_dir: Option<String>,
}

const DEFAULT_CONFIG_FILE: &str = ".prmend/config.toml";

/// Environment variables set by common CI systems. Any of them present (and
/// non-empty) switches the tool into pipeline mode.
const PIPELINE_ENV_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "BITBUCKET_BUILD_NUMBER",
    "TF_BUILD",
    "CIRCLECI",
];

/// True when running under a recognized CI system: verbose logging is forced,
/// no prompting, and the run outcome is emitted as JSON on stdout.
pub fn pipeline_mode() -> bool {
    PIPELINE_ENV_VARS
        .iter()
        .any(|var| std::env::var(var).is_ok_and(|v| !v.is_empty()))
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_from(cli, Path::new(&cli.repo_root))
    }

    pub fn load_from(cli: &Cli, project_dir: &Path) -> Result<Self> {
        let file_config = match &cli.config {
            Some(explicit_path) => {
                let path = Path::new(explicit_path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                let content = std::fs::read_to_string(path)?;
                parse_config(&content)?
            }
            None => {
                let path = project_dir.join(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    let content = std::fs::read_to_string(&path)?;
                    parse_config(&content)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        merge(file_config, cli)
    }

    pub fn verification(&self) -> VerificationConfig {
        VerificationConfig {
            repo_root: self.repo_root.clone(),
            run_format: self.run_format,
            run_lint: self.run_lint,
            run_build: self.run_build,
            run_tests: self.run_tests,
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
        }
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    Ok(config)
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Result<Config> {
    let config = Config {
        pr: cli.pr,
        repo_root: PathBuf::from(&cli.repo_root),
        platform: file.platform.unwrap_or_else(|| "bitbucket".to_string()),
        workspace: cli.workspace.clone().or(file.workspace),
        repo_slug: cli.repo_slug.clone().or(file.repo_slug),
        branch_prefix: cli
            .branch_prefix
            .clone()
            .or(file.branch_prefix)
            .unwrap_or_else(|| "prmend".to_string()),
        max_iterations: cli.max_iterations.or(file.max_iterations).unwrap_or(5),
        run_format: !cli.skip_format && file.run_format.unwrap_or(true),
        run_lint: !cli.skip_lint && file.run_lint.unwrap_or(true),
        run_build: !cli.skip_build && file.run_build.unwrap_or(true),
        run_tests: !cli.skip_tests && file.run_tests.unwrap_or(true),
        auto_format: !cli.no_auto_format && file.auto_format.unwrap_or(true),
        dry_run: cli.dry_run,
        generate: cli.generate || file.generate.unwrap_or(false),
        model: cli
            .model
            .clone()
            .or(file.model)
            .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
        max_tokens: file.max_tokens.unwrap_or(8192),
        tool_timeout_secs: cli.tool_timeout.or(file.tool_timeout_secs).unwrap_or(600),
        templates_dir: cli.templates_dir.clone().or(file.templates_dir),
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.platform.as_str() {
        "bitbucket" => {}
        other => {
            return Err(Error::ConfigValidation(format!(
                "unknown platform: {other} (expected: bitbucket)"
            )));
        }
    }
    if config.max_iterations == 0 {
        return Err(Error::ConfigValidation(
            "max_iterations must be > 0".to_string(),
        ));
    }
    if config.tool_timeout_secs == 0 {
        return Err(Error::ConfigValidation(
            "tool_timeout must be > 0".to_string(),
        ));
    }
    if config.branch_prefix.is_empty() {
        return Err(Error::ConfigValidation(
            "branch_prefix must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_valid_config() {
        let toml = r#"
platform = "bitbucket"
workspace = "acme"
repo_slug = "widget"
branch_prefix = "mend"
max_iterations = 3
run_tests = false
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.workspace.as_deref(), Some("acme"));
        assert_eq!(config.max_iterations, Some(3));
        assert_eq!(config.run_tests, Some(false));
    }

    #[test]
    fn test_parse_tool_timeout_alias() {
        let config = parse_config(r#"tool_timeout = 30"#).unwrap();
        assert_eq!(config.tool_timeout_secs, Some(30));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_unknown_field() {
        let err = parse_config(r#"bogus = "value""#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_defaults_applied() {
        let cli = Cli::parse_from(["prmend", "--pr", "1"]);
        let config = merge(ConfigFile::default(), &cli).unwrap();
        assert_eq!(config.platform, "bitbucket");
        assert_eq!(config.branch_prefix, "prmend");
        assert_eq!(config.max_iterations, 5);
        assert!(config.run_format);
        assert!(config.run_lint);
        assert!(config.run_build);
        assert!(config.run_tests);
        assert!(config.auto_format);
        assert!(!config.generate);
        assert_eq!(config.model, "claude-sonnet-4-5");
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.tool_timeout_secs, 600);
    }

    #[test]
    fn test_cli_overrides_config() {
        let file = ConfigFile {
            branch_prefix: Some("file-prefix".to_string()),
            max_iterations: Some(2),
            model: Some("file-model".to_string()),
            ..Default::default()
        };
        let cli = Cli::parse_from([
            "prmend",
            "--pr",
            "1",
            "--branch-prefix",
            "cli-prefix",
            "--model",
            "cli-model",
        ]);
        let config = merge(file, &cli).unwrap();
        assert_eq!(config.branch_prefix, "cli-prefix"); // CLI wins
        assert_eq!(config.model, "cli-model"); // CLI wins
        assert_eq!(config.max_iterations, 2); // file value kept
    }

    #[test]
    fn test_skip_flags_override_file_switches() {
        let file = ConfigFile {
            run_tests: Some(true),
            run_build: Some(true),
            ..Default::default()
        };
        let cli = Cli::parse_from(["prmend", "--pr", "1", "--skip-tests"]);
        let config = merge(file, &cli).unwrap();
        assert!(!config.run_tests);
        assert!(config.run_build);
    }

    #[test]
    fn test_file_disables_check_class() {
        let file = ConfigFile {
            run_lint: Some(false),
            ..Default::default()
        };
        let cli = Cli::parse_from(["prmend", "--pr", "1"]);
        let config = merge(file, &cli).unwrap();
        assert!(!config.run_lint);
        assert!(config.run_format);
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let file = ConfigFile {
            platform: Some("gitlab".to_string()),
            ..Default::default()
        };
        let cli = Cli::parse_from(["prmend", "--pr", "1"]);
        let err = merge(file, &cli).unwrap_err();
        assert!(err.to_string().contains("unknown platform: gitlab"));
    }

    #[test]
    fn test_zero_max_iterations_rejected() {
        let cli = Cli::parse_from(["prmend", "--pr", "1", "--max-iterations", "0"]);
        let err = merge(ConfigFile::default(), &cli).unwrap_err();
        assert!(err.to_string().contains("max_iterations must be > 0"));
    }

    #[test]
    fn test_zero_tool_timeout_rejected() {
        let cli = Cli::parse_from(["prmend", "--pr", "1", "--tool-timeout", "0"]);
        let err = merge(ConfigFile::default(), &cli).unwrap_err();
        assert!(err.to_string().contains("tool_timeout must be > 0"));
    }

    #[test]
    fn test_load_missing_default_config_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["prmend", "--pr", "1"]);
        let config = Config::load_from(&cli, tmp.path()).unwrap();
        assert_eq!(config.platform, "bitbucket");
        assert_eq!(config.max_iterations, 5);
    }

    #[test]
    fn test_load_default_config_from_project_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg_dir = tmp.path().join(".prmend");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), r#"max_iterations = 7"#).unwrap();
        let cli = Cli::parse_from(["prmend", "--pr", "1"]);
        let config = Config::load_from(&cli, tmp.path()).unwrap();
        assert_eq!(config.max_iterations, 7);
    }

    #[test]
    fn test_load_explicit_missing_config_errors() {
        let cli = Cli::parse_from([
            "prmend",
            "--pr",
            "1",
            "--config",
            "/nonexistent/config.toml",
        ]);
        let err = Config::load(&cli).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_verification_config_carries_switches() {
        let cli = Cli::parse_from(["prmend", "--pr", "1", "--skip-format", "--tool-timeout", "5"]);
        let config = merge(ConfigFile::default(), &cli).unwrap();
        let vc = config.verification();
        assert!(!vc.run_format);
        assert!(vc.run_build);
        assert_eq!(vc.tool_timeout, Duration::from_secs(5));
        assert_eq!(vc.repo_root, PathBuf::from("."));
    }

    #[test]
    #[serial_test::serial]
    fn test_pipeline_mode_detects_ci_env() {
        // Guard against ambient CI variables in the test environment.
        let saved: Vec<(String, Option<String>)> = PIPELINE_ENV_VARS
            .iter()
            .map(|v| (v.to_string(), std::env::var(v).ok()))
            .collect();
        for var in PIPELINE_ENV_VARS {
            unsafe { std::env::remove_var(var) };
        }

        assert!(!pipeline_mode());
        unsafe { std::env::set_var("BITBUCKET_BUILD_NUMBER", "12") };
        assert!(pipeline_mode());
        unsafe { std::env::remove_var("BITBUCKET_BUILD_NUMBER") };

        // Empty value does not count.
        unsafe { std::env::set_var("CI", "") };
        assert!(!pipeline_mode());
        unsafe { std::env::remove_var("CI") };

        for (var, value) in saved {
            if let Some(value) = value {
                unsafe { std::env::set_var(var, value) };
            }
        }
    }
}
