use crate::config::VerificationConfig;
use crate::error::Result;
use crate::process::{ToolCommand, run_tool};
use crate::verify::{CheckClass, GateSet, VerificationResult};

/// Go verifier: gofmt listing, `go vet`, `go build`, `go test`, all over
/// `./...`.
pub(crate) async fn verify(config: &VerificationConfig) -> Result<VerificationResult> {
    let root = &config.repo_root;
    let mut gates = GateSet::new(config);

    // gofmt exits 0 either way; unformatted files are reported by listing
    // them on stdout.
    if gates.enabled(CheckClass::Format) {
        let command = ToolCommand::new("gofmt", &["-l", "."], root)
            .with_timeout(config.tool_timeout)
            .with_log_prefix("verify:go:fmt");
        let output = run_tool(command).await?;
        let unformatted = output.stdout.trim();
        let passed = output.success() && unformatted.is_empty();
        let report = if passed {
            String::new()
        } else if unformatted.is_empty() {
            output.combined()
        } else {
            format!("gofmt: files need formatting:\n{unformatted}")
        };
        gates.record(CheckClass::Format, passed, report);
    }

    gates
        .run(
            CheckClass::Lint,
            Some(
                ToolCommand::new("go", &["vet", "./..."], root).with_log_prefix("verify:go:vet"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Build,
            Some(
                ToolCommand::new("go", &["build", "./..."], root)
                    .with_log_prefix("verify:go:build"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Test,
            Some(
                ToolCommand::new("go", &["test", "./..."], root).with_log_prefix("verify:go:test"),
            ),
        )
        .await?;

    Ok(gates.finish())
}
