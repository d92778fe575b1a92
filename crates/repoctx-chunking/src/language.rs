//! File extension to language hint mapping

/// Hint used when no extension matches
pub const PLAIN_TEXT: &str = "text";

const EXTENSION_MAP: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("scala", "scala"),
    ("go", "go"),
    ("rs", "rust"),
    ("c", "cpp"),
    ("h", "cpp"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("sql", "sql"),
    ("sh", "shell"),
    ("md", "markdown"),
    ("toml", "toml"),
    ("yml", "yaml"),
    ("yaml", "yaml"),
    ("json", "json"),
];

/// Language hint for a path, based on its extension (case-insensitive)
pub fn detect_language(path: &str) -> &'static str {
    let Some((_, extension)) = path.rsplit_once('.') else {
        return PLAIN_TEXT;
    };
    if extension.contains('/') {
        return PLAIN_TEXT;
    }

    EXTENSION_MAP
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map_or(PLAIN_TEXT, |(_, language)| language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(detect_language("src/main.rs"), "rust");
        assert_eq!(detect_language("app/handlers/queue_worker.py"), "python");
        assert_eq!(detect_language("include/Widget.HPP"), "cpp");
    }

    #[test]
    fn test_unknown_or_missing_extension_is_text() {
        assert_eq!(detect_language("Makefile"), PLAIN_TEXT);
        assert_eq!(detect_language("notes.xyz"), PLAIN_TEXT);
        assert_eq!(detect_language("some.dir/README"), PLAIN_TEXT);
    }
}
