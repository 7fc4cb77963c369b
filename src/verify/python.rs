use crate::config::VerificationConfig;
use crate::error::Result;
use crate::process::{ToolCommand, run_tool};
use crate::verify::{CheckClass, GateSet, VerificationResult};

/// Exit code pytest uses when it collected no tests.
const PYTEST_NO_TESTS: i32 = 5;

/// Python verifier: `black --check`, `ruff check`, byte-compilation as the
/// build stand-in, then pytest.
pub(crate) async fn verify(config: &VerificationConfig) -> Result<VerificationResult> {
    let root = &config.repo_root;
    let mut gates = GateSet::new(config);

    gates
        .run(
            CheckClass::Format,
            Some(
                ToolCommand::new("black", &["--check", "."], root)
                    .with_log_prefix("verify:py:black"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Lint,
            Some(
                ToolCommand::new("ruff", &["check", "."], root).with_log_prefix("verify:py:ruff"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Build,
            Some(
                ToolCommand::new("python3", &["-m", "compileall", "-q", "."], root)
                    .with_log_prefix("verify:py:compile"),
            ),
        )
        .await?;

    // pytest exits 5 on an empty test collection; that is not a failure.
    if gates.enabled(CheckClass::Test) {
        if gates.already_failed() {
            gates.skip(CheckClass::Test);
        } else {
            let command = ToolCommand::new("pytest", &[], root)
                .with_timeout(config.tool_timeout)
                .with_log_prefix("verify:py:pytest");
            let output = run_tool(command).await?;
            let passed = output.success() || output.exit_code == PYTEST_NO_TESTS;
            let report = if passed { String::new() } else { output.combined() };
            gates.record(CheckClass::Test, passed, report);
        }
    }

    Ok(gates.finish())
}
