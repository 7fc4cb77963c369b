use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::error::{Error, Result};

/// Validate that a branch name is safe: matches `^[a-zA-Z0-9/_.-]+$` and does
/// not start with `refs/`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Git("branch name must not be empty".to_string()));
    }
    if name.starts_with("refs/") {
        return Err(Error::Git(format!(
            "branch name must not start with 'refs/': {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_' || c == '.' || c == '-')
    {
        return Err(Error::Git(format!(
            "branch name contains invalid characters (allowed: a-zA-Z0-9/_.-): {name}"
        )));
    }
    Ok(())
}

/// Run a git command with the given working directory, capturing stdout and
/// stderr. On failure the error carries the combined output so the command
/// can be diagnosed by pasting it.
pub fn git_in_dir(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| Error::Execution(format!("failed to run git: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = [stdout.trim(), stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        Err(Error::Git(format!(
            "git {} failed: {combined}",
            args.join(" ")
        )))
    }
}

/// Name of the branch currently checked out.
pub fn current_branch(repo: &Path) -> Result<String> {
    let out = git_in_dir(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(out.trim().to_string())
}

/// Create and check out a branch at the current HEAD.
pub fn create_branch(repo: &Path, name: &str) -> Result<()> {
    validate_branch_name(name)?;
    git_in_dir(repo, &["checkout", "-b", name])?;
    info!(branch = name, "created fix branch");
    Ok(())
}

/// True when a local branch of that name already exists.
pub fn local_branch_exists(repo: &Path, name: &str) -> bool {
    let local_ref = format!("refs/heads/{name}");
    git_in_dir(repo, &["show-ref", "--verify", "--quiet", &local_ref]).is_ok()
}

/// Stage only the given repo-relative paths.
pub fn stage_files(repo: &Path, files: &[String]) -> Result<()> {
    if files.is_empty() {
        return Err(Error::Git("nothing to stage".to_string()));
    }
    let mut args = vec!["add", "--"];
    args.extend(files.iter().map(String::as_str));
    git_in_dir(repo, &args)?;
    Ok(())
}

/// Commit staged changes with the given message.
pub fn commit(repo: &Path, message: &str) -> Result<()> {
    git_in_dir(repo, &["commit", "-m", message])?;
    Ok(())
}

/// Push a branch to origin, setting the upstream.
pub fn push(repo: &Path, branch: &str) -> Result<()> {
    git_in_dir(repo, &["push", "-u", "origin", branch])?;
    info!(branch, "pushed fix branch to origin");
    Ok(())
}

/// URL of the `origin` remote, if configured.
pub fn origin_url(repo: &Path) -> Result<String> {
    let out = git_in_dir(repo, &["remote", "get-url", "origin"])?;
    Ok(out.trim().to_string())
}
