use std::collections::BTreeSet;

/// Extensions the extractor recognizes as source files.
const SOURCE_EXTENSIONS: &[&str] = &[
    ".go", ".py", ".js", ".jsx", ".ts", ".tsx", ".cs", ".java", ".rs", ".rb", ".php",
];

/// Status phrases from wrapper diagnostics; lines carrying them are skipped
/// wholesale to avoid false positives.
const STATUS_PHRASES: &[&str] = &["failed:", "check failed"];

/// Extract the source files implicated by toolchain error output.
///
/// Two line shapes are recognized: the coordinate form
/// (`path/file.go:17:3: message`) and a bare path standing alone on its own
/// line (gofmt-style listings). A candidate path must contain no whitespace
/// in either form, so prose-prefixed lines like `at handler src/app.js:10`
/// never contribute one. Paths are normalized to forward slashes and
/// deduplicated; the set order is stable.
pub fn extract_files(text: &str) -> BTreeSet<String> {
    let mut files = BTreeSet::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lower = line.to_lowercase();
        if STATUS_PHRASES.iter().any(|p| lower.contains(p)) {
            continue;
        }

        // Coordinate form: everything before the first colon.
        if let Some((prefix, _)) = line.split_once(':')
            && has_source_extension(prefix)
            && !prefix.chars().any(char::is_whitespace)
        {
            files.insert(normalize(prefix));
            continue;
        }

        // Bare-path form: a single token with no colons.
        if !line.contains(':')
            && !line.chars().any(char::is_whitespace)
            && has_source_extension(line)
        {
            files.insert(normalize(line));
        }
    }

    files
}

fn has_source_extension(path: &str) -> bool {
    SOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}
