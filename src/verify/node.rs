use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::config::VerificationConfig;
use crate::error::{Error, Result};
use crate::process::{ToolCommand, run_tool};
use crate::verify::{CheckClass, GateSet, VerificationResult};

/// npm's placeholder for a project with no test suite.
const NO_TEST_PLACEHOLDER: &str = "no test specified";

/// Pick the package manager from lockfile presence, in priority order.
pub(crate) fn detect_package_manager(root: &Path) -> &'static str {
    if root.join("pnpm-lock.yaml").exists() {
        "pnpm"
    } else if root.join("yarn.lock").exists() {
        "yarn"
    } else {
        // package-lock.json, or no lockfile at all
        "npm"
    }
}

#[derive(Debug, Deserialize, Default)]
struct Manifest {
    #[serde(default)]
    scripts: HashMap<String, String>,
}

fn load_scripts(root: &Path) -> Result<HashMap<String, String>> {
    let path = root.join("package.json");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Execution(format!("cannot read {}: {e}", path.display())))?;
    let manifest: Manifest = serde_json::from_str(&content)
        .map_err(|e| Error::Execution(format!("cannot parse {}: {e}", path.display())))?;
    Ok(manifest.scripts)
}

/// A script counts only when defined and not npm's "no test specified"
/// placeholder.
pub(crate) fn usable_script<'a>(
    scripts: &'a HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    scripts
        .get(name)
        .map(String::as_str)
        .filter(|body| !body.contains(NO_TEST_PLACEHOLDER))
}

/// Node verifier, shared by javascript and typescript: detect the package
/// manager, make sure dependencies are installed, then run the `lint`,
/// `build`, and `test` manifest scripts where defined.
pub(crate) async fn verify(config: &VerificationConfig) -> Result<VerificationResult> {
    let root = &config.repo_root;
    let mut gates = GateSet::new(config);

    let pm = detect_package_manager(root);
    let scripts = load_scripts(root)?;
    debug!(package_manager = pm, scripts = scripts.len(), "node project");

    // Install once when node_modules is missing; a failed install fails the
    // build class and short-circuits the script gates.
    if !root.join("node_modules").exists() {
        let command = ToolCommand::new(pm, &["install"], root)
            .with_timeout(config.tool_timeout)
            .with_log_prefix("verify:node:install");
        let output = run_tool(command).await?;
        if !output.success() {
            gates.record(CheckClass::Build, false, output.combined());
            gates.skip(CheckClass::Lint);
            gates.skip(CheckClass::Test);
            return Ok(gates.finish());
        }
    }

    let script_command = |name: &str| -> Option<ToolCommand> {
        usable_script(&scripts, name).map(|_| {
            ToolCommand::new(pm, &["run", name], root)
                .with_log_prefix(&format!("verify:node:{name}"))
        })
    };

    // No formatter class for node projects; lint covers style.
    gates.run(CheckClass::Lint, script_command("lint")).await?;
    gates.run(CheckClass::Build, script_command("build")).await?;
    gates.run(CheckClass::Test, script_command("test")).await?;

    Ok(gates.finish())
}
