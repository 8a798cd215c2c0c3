//! Source language detection for worker requests.
//!
//! The worker formats its hints as a block comment in the learner's language,
//! so each request carries the detected language and its comment delimiters.

use std::path::Path;

/// Language assumed when the filename is missing or unrecognized.
pub const DEFAULT_LANGUAGE: &str = "python";

/// Detects the programming language from a filename's extension.
///
/// Falls back to [`DEFAULT_LANGUAGE`] when there is no filename or the
/// extension is unknown.
///
/// # Examples
///
/// ```
/// use learnsor_worker::detect_language;
///
/// assert_eq!(detect_language(Some("main.rs")), "rust");
/// assert_eq!(detect_language(Some("App.TSX")), "typescript");
/// assert_eq!(detect_language(None), "python");
/// ```
#[must_use]
pub fn detect_language(filename: Option<&str>) -> &'static str {
    let Some(extension) = filename
        .map(Path::new)
        .and_then(Path::extension)
        .and_then(|ext| ext.to_str())
    else {
        return DEFAULT_LANGUAGE;
    };

    match extension.to_ascii_lowercase().as_str() {
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "c" | "h" => "c",
        "cs" => "csharp",
        "java" => "java",
        "kt" => "kotlin",
        "swift" => "swift",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        _ => DEFAULT_LANGUAGE,
    }
}

/// Returns the block comment delimiters for a language.
///
/// Unknown languages get Python's triple quotes.
#[must_use]
pub fn comment_delimiters(language: &str) -> (&'static str, &'static str) {
    match language.to_ascii_lowercase().as_str() {
        "javascript" | "typescript" | "cpp" | "c" | "csharp" | "java" | "rust" | "go" | "php"
        | "swift" | "kotlin" | "scala" => ("/*", "*/"),
        "ruby" => ("=begin", "=end"),
        "shell" => ("<< 'COMMENT'", "COMMENT"),
        _ => ("\"\"\"", "\"\"\""),
    }
}
