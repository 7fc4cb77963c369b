use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::VerificationConfig;
use crate::detect::IGNORE_DIRS;
use crate::error::Result;
use crate::process::ToolCommand;
use crate::verify::{CheckClass, GateSet, VerificationResult};

/// First solution file found by a recursive scan that skips the ignored
/// directories. `None` when the project has loose csproj files only.
pub(crate) fn find_solution(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !IGNORE_DIRS.iter().any(|d| name == *d)
        })
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_type().is_file()
                && e.file_name().to_string_lossy().ends_with(".sln")
        })
        .map(|e| e.path().to_path_buf())
}

/// dotnet verifier: build the solution, then test it with `--no-build` so
/// the compilation is not repeated. Format and lint classes do not apply.
pub(crate) async fn verify(config: &VerificationConfig) -> Result<VerificationResult> {
    let root = &config.repo_root;
    let mut gates = GateSet::new(config);

    let solution = find_solution(root);
    let solution_arg = solution
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());

    let mut build_args: Vec<&str> = vec!["build"];
    let mut test_args: Vec<&str> = vec!["test"];
    if let Some(ref sln) = solution_arg {
        build_args.push(sln);
        test_args.push(sln);
    }
    test_args.push("--no-build");

    gates
        .run(
            CheckClass::Build,
            Some(
                ToolCommand::new("dotnet", &build_args, root)
                    .with_log_prefix("verify:dotnet:build"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Test,
            Some(
                ToolCommand::new("dotnet", &test_args, root).with_log_prefix("verify:dotnet:test"),
            ),
        )
        .await?;

    Ok(gates.finish())
}
