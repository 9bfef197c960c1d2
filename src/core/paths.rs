//! Path normalization utilities
//!
//! Relative paths in scan output always use '/' as separator.

use std::path::Path;

/// Normalize a path to use '/' as separator (for cross-platform consistency)
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Make a path relative to the root directory
pub fn make_relative(path: &Path, root: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(normalize_path)
}

/// Append one name to a '/'-separated relative path
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Lowercased extension with a leading dot, or "" when there is none
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Fence language for a file, derived from its extension
pub fn language_for(path: &Path) -> &'static str {
    let ext = dotted_extension(path);
    match ext.as_str() {
        ".rs" => "rust",
        ".py" | ".pyw" => "python",
        ".js" | ".mjs" | ".cjs" => "javascript",
        ".jsx" => "jsx",
        ".ts" | ".mts" | ".cts" => "typescript",
        ".tsx" => "tsx",
        ".go" => "go",
        ".java" => "java",
        ".kt" | ".kts" => "kotlin",
        ".c" | ".h" => "c",
        ".cc" | ".cpp" | ".cxx" | ".hpp" | ".hh" => "cpp",
        ".cs" => "csharp",
        ".rb" => "ruby",
        ".php" => "php",
        ".swift" => "swift",
        ".sh" | ".bash" | ".zsh" => "bash",
        ".ps1" => "powershell",
        ".sql" => "sql",
        ".html" | ".htm" => "html",
        ".css" => "css",
        ".scss" => "scss",
        ".vue" => "vue",
        ".svelte" => "svelte",
        ".json" => "json",
        ".yaml" | ".yml" => "yaml",
        ".toml" => "toml",
        ".xml" => "xml",
        ".md" | ".markdown" => "markdown",
        ".lua" => "lua",
        ".dart" => "dart",
        ".scala" => "scala",
        ".r" => "r",
        _ => match path.file_name().and_then(|n| n.to_str()) {
            Some("Dockerfile") => "dockerfile",
            Some("Makefile") => "makefile",
            _ => "",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        let path = Path::new("src/main.rs");
        assert_eq!(normalize_path(path), "src/main.rs");
    }

    #[test]
    fn test_make_relative() {
        let root = Path::new("/project");
        let path = Path::new("/project/src/main.rs");
        assert_eq!(make_relative(path, root), Some("src/main.rs".to_string()));
    }

    #[test]
    fn test_make_relative_not_under_root() {
        let root = Path::new("/project");
        let path = Path::new("/other/file.rs");
        assert_eq!(make_relative(path, root), None);
    }

    #[test]
    fn test_make_relative_same_as_root() {
        let root = Path::new("/project");
        assert_eq!(make_relative(root, root), Some("".to_string()));
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("", "src"), "src");
        assert_eq!(join_relative("src", "main.rs"), "src/main.rs");
    }

    #[test]
    fn test_dotted_extension() {
        assert_eq!(dotted_extension(Path::new("a/B.RS")), ".rs");
        assert_eq!(dotted_extension(Path::new("Makefile")), "");
    }

    #[test]
    fn test_language_for() {
        assert_eq!(language_for(Path::new("src/main.rs")), "rust");
        assert_eq!(language_for(Path::new("app.TSX")), "tsx");
        assert_eq!(language_for(Path::new("Dockerfile")), "dockerfile");
        assert_eq!(language_for(Path::new("notes.unknown")), "");
    }
}
