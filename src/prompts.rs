use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const DEFAULT_INITIAL: &str = include_str!("default_prompts/initial.md");
const DEFAULT_CORRECTION: &str = include_str!("default_prompts/correction.md");
const DEFAULT_FIND: &str = include_str!("default_prompts/find.md");
const FIX_SCHEMA: &str = include_str!("default_prompts/_fix-schema.md");

fn default_template(phase: &str) -> Option<&'static str> {
    match phase {
        "initial" => Some(DEFAULT_INITIAL),
        "correction" => Some(DEFAULT_CORRECTION),
        "find" => Some(DEFAULT_FIND),
        _ => None,
    }
}

/// Prompt template engine with embedded defaults and user overrides.
pub struct PromptEngine {
    override_dir: Option<String>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<String>) -> Self {
        Self { override_dir }
    }

    /// Load a prompt template for the given phase.
    /// User overrides in `override_dir` take precedence over defaults.
    pub fn load_template(&self, phase: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = Path::new(dir).join(format!("{phase}.md"));
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                })?;
                return Ok(content);
            }
        }

        default_template(phase)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Prompt(format!("unknown prompt phase: {phase}")))
    }

    /// Load a template and render it with the given variables.
    ///
    /// The `fix_schema` variable is auto-injected when not supplied, so
    /// templates can reference the expected reply shape without callers
    /// threading it through.
    pub fn render_phase(&self, phase: &str, vars: &HashMap<String, String>) -> Result<String> {
        let template = self.load_template(phase)?;
        let mut all_vars = vars.clone();
        all_vars
            .entry("fix_schema".to_string())
            .or_insert_with(|| FIX_SCHEMA.to_string());
        render_template(&template, &all_vars)
    }
}

/// Render a template string using the `upon` template engine.
/// Supports `{{ var }}`, `{% if %}`, and `{% for %}` syntax.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let engine = upon::Engine::new();
    let compiled = engine
        .compile(template)
        .map_err(|e| Error::Prompt(format!("template compile error: {e}")))?;
    compiled
        .render(
            &engine,
            upon::to_value(vars).map_err(|e| Error::Prompt(e.to_string()))?,
        )
        .to_string()
        .map_err(|e| Error::Prompt(format!("template render error: {e}")))
}
