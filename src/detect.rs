use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Directories never descended into during detection.
pub(crate) const IGNORE_DIRS: &[&str] = &[
    "vendor",
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    "target",
];

/// Minimum source-file count for a language without a config file.
const FILE_COUNT_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Go,
    Python,
    Javascript,
    Typescript,
    Java,
    Rust,
    Ruby,
    Php,
    Csharp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Csharp => "csharp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LangStats {
    has_config: bool,
    file_count: usize,
}

/// Walk the tree and produce the ordered language list.
///
/// A language is included when it has a config file or at least
/// `FILE_COUNT_THRESHOLD` source files; config presence overrides the
/// threshold. Config-file languages come first, then by file count
/// descending with the tag name as a stable tiebreak. An empty result is an
/// error, never an empty list.
pub fn detect(repo_path: &Path) -> Result<Vec<Language>> {
    let mut stats: HashMap<Language, LangStats> = HashMap::new();

    let walker = WalkDir::new(repo_path).into_iter().filter_entry(|entry| {
        // The root itself is always walked, whatever it is named.
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name == "node_modules" {
            // Advisory marker only; the directory itself is not descended.
            debug!(path = %entry.path().display(), "node_modules present (javascript/typescript hint)");
        }
        !IGNORE_DIRS.iter().any(|d| name == *d)
    });

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();

        for language in config_languages(&name, entry.path()) {
            stats.entry(language).or_default().has_config = true;
        }
        if let Some(language) = extension_language(&name) {
            stats.entry(language).or_default().file_count += 1;
        }
    }

    let mut included: Vec<(Language, LangStats)> = stats
        .into_iter()
        .filter(|(_, s)| s.has_config || s.file_count >= FILE_COUNT_THRESHOLD)
        .collect();

    // Config-file languages first; within each group, file count descending;
    // tag name as the final tiebreak so the order is stable across runs.
    included.sort_by(|(lang_a, a), (lang_b, b)| {
        b.has_config
            .cmp(&a.has_config)
            .then(b.file_count.cmp(&a.file_count))
            .then(lang_a.as_str().cmp(lang_b.as_str()))
    });

    let languages: Vec<Language> = included.into_iter().map(|(lang, _)| lang).collect();
    if languages.is_empty() {
        return Err(Error::Detect(format!(
            "no recognized languages under {}",
            repo_path.display()
        )));
    }

    debug!(?languages, "detected languages");
    Ok(languages)
}

/// Languages implied by a config/manifest file name.
fn config_languages(name: &str, path: &Path) -> Vec<Language> {
    match name {
        "go.mod" | "go.sum" => vec![Language::Go],
        "package.json" => {
            let mut languages = vec![Language::Javascript];
            if let Ok(contents) = std::fs::read_to_string(path)
                && contents.contains("\"typescript\"")
            {
                languages.push(Language::Typescript);
            }
            languages
        }
        "tsconfig.json" => vec![Language::Typescript],
        "pyproject.toml" | "setup.py" | "requirements.txt" | "Pipfile" => {
            vec![Language::Python]
        }
        "pom.xml" | "build.gradle" => vec![Language::Java],
        "Cargo.toml" => vec![Language::Rust],
        "Gemfile" => vec![Language::Ruby],
        "composer.json" => vec![Language::Php],
        _ if name.ends_with(".csproj") || name.ends_with(".sln") => vec![Language::Csharp],
        _ => vec![],
    }
}

/// Language implied by a source-file extension.
fn extension_language(name: &str) -> Option<Language> {
    let ext = name.rsplit_once('.')?.1;
    match ext {
        "go" => Some(Language::Go),
        "py" => Some(Language::Python),
        "js" | "jsx" => Some(Language::Javascript),
        "ts" | "tsx" => Some(Language::Typescript),
        "java" => Some(Language::Java),
        "rs" => Some(Language::Rust),
        "rb" => Some(Language::Ruby),
        "php" => Some(Language::Php),
        "cs" => Some(Language::Csharp),
        _ => None,
    }
}
