use crate::config::VerificationConfig;
use crate::error::Result;
use crate::process::ToolCommand;
use crate::verify::{CheckClass, GateSet, VerificationResult};

/// Rust verifier: `cargo fmt --check`, clippy with warnings denied,
/// `cargo build`, `cargo test`.
pub(crate) async fn verify(config: &VerificationConfig) -> Result<VerificationResult> {
    let root = &config.repo_root;
    let mut gates = GateSet::new(config);

    gates
        .run(
            CheckClass::Format,
            Some(
                ToolCommand::new("cargo", &["fmt", "--check"], root)
                    .with_log_prefix("verify:rust:fmt"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Lint,
            Some(
                ToolCommand::new("cargo", &["clippy", "--", "-D", "warnings"], root)
                    .with_log_prefix("verify:rust:clippy"),
            ),
        )
        .await?;
    gates
        .run(
            CheckClass::Build,
            Some(ToolCommand::new("cargo", &["build"], root).with_log_prefix("verify:rust:build")),
        )
        .await?;
    gates
        .run(
            CheckClass::Test,
            Some(ToolCommand::new("cargo", &["test"], root).with_log_prefix("verify:rust:test")),
        )
        .await?;

    Ok(gates.finish())
}
