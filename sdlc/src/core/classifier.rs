//! Deterministic classification of changed paths.

use std::path::{Component, Path};

use crate::core::types::ContentType;

/// Directory holding pipeline metadata (stories, config). Never counts as work.
pub const METADATA_DIR: &str = ".ai-sdlc";

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "kt", "rb", "c", "h", "cc",
    "cpp", "hpp", "cs", "swift", "php", "scala", "vue", "svelte", "sh",
];
const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "env", "conf", "cfg", "properties", "xml",
];
const CONFIG_FILE_NAMES: &[&str] = &[
    "Dockerfile",
    "Makefile",
    ".gitignore",
    ".dockerignore",
    ".editorconfig",
    ".npmrc",
    ".nvmrc",
];
const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "rst", "adoc", "txt"];
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec"];

/// Changed paths bucketed by kind. Metadata paths are dropped entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub source: Vec<String>,
    pub tests: Vec<String>,
    pub config: Vec<String>,
    pub docs: Vec<String>,
}

impl ChangeSet {
    /// Classify `paths`, ignoring pipeline metadata and the story file itself.
    pub fn classify<P: AsRef<str>>(paths: &[P], story_path: Option<&str>) -> Self {
        let mut set = ChangeSet::default();
        for raw in paths {
            let path = normalize(raw.as_ref());
            if path.is_empty()
                || is_metadata_path(Path::new(&path))
                || story_path.is_some_and(|story| normalize(story) == path)
            {
                continue;
            }
            if is_test_file(&path) {
                set.tests.push(path);
            } else if is_source_file(&path) {
                set.source.push(path);
            } else if is_config_file(&path) {
                set.config.push(path);
            } else if is_documentation_file(&path) {
                set.docs.push(path);
            }
        }
        set
    }
}

/// Resolve the content type a story expects.
///
/// The legacy `requires_source_changes` flag overrides the explicit field when
/// set; otherwise the explicit field applies, defaulting to `code`.
pub fn effective_content_type(
    explicit: Option<ContentType>,
    requires_source_changes: Option<bool>,
) -> ContentType {
    match requires_source_changes {
        Some(true) => ContentType::Code,
        Some(false) => ContentType::Configuration,
        None => explicit.unwrap_or(ContentType::Code),
    }
}

/// Describe what is missing for `content_type`, or `None` when the changes fit.
pub fn missing_required_changes(content_type: ContentType, changes: &ChangeSet) -> Option<String> {
    let has_source = !changes.source.is_empty();
    let has_config = !changes.config.is_empty();
    let has_docs = !changes.docs.is_empty();
    match content_type {
        ContentType::Code if !has_source => {
            Some("No source code changes detected. Implementation wrote only metadata or tests.".to_string())
        }
        ContentType::Configuration if !has_config => {
            Some("No configuration file changes detected.".to_string())
        }
        ContentType::Documentation if !has_docs => {
            Some("No documentation changes detected outside the story file.".to_string())
        }
        ContentType::Mixed if !has_source || !(has_config || has_docs) => Some(format!(
            "Mixed story requires both source and configuration/documentation changes (source: {}, configuration: {}, documentation: {}).",
            changes.source.len(),
            changes.config.len(),
            changes.docs.len()
        )),
        _ => None,
    }
}

pub fn is_source_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_test_file(path: &str) -> bool {
    let path = normalize(path);
    let lower = path.to_ascii_lowercase();
    let mut segments: Vec<&str> = lower.split('/').collect();
    let Some(file_name) = segments.pop() else {
        return false;
    };
    if segments.iter().any(|dir| TEST_DIRS.contains(dir)) {
        return is_source_file(&path);
    }
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    file_name.contains(".test.")
        || file_name.contains(".spec.")
        || (file_name.starts_with("test_") && file_name.ends_with(".py"))
        || stem.ends_with("_test")
}

pub fn is_config_file(path: &str) -> bool {
    let path = normalize(path);
    let file_name = path.rsplit('/').next().unwrap_or(&path);
    CONFIG_FILE_NAMES.contains(&file_name)
        || path.starts_with(".github/")
        || extension(&path).is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_documentation_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| DOC_EXTENSIONS.contains(&ext.as_str()))
}

fn is_metadata_path(path: &Path) -> bool {
    let mut components = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir | Component::RootDir));

    match components.next() {
        Some(Component::Normal(name)) => name == METADATA_DIR,
        _ => false,
    }
}

fn normalize(path: &str) -> String {
    path.trim().trim_start_matches("./").replace('\\', "/")
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_and_story_are_ignored() {
        let paths = [
            ".ai-sdlc/stories/S-1/story.md",
            "./.ai-sdlc/config.toml",
            "docs/story.md",
        ];
        let set = ChangeSet::classify(&paths, Some("docs/story.md"));
        assert_eq!(set, ChangeSet::default());
    }

    #[test]
    fn similar_prefix_is_not_metadata() {
        let set = ChangeSet::classify(&[".ai-sdlcx/run.py", "src/.ai-sdlc/x.rs"], None);
        assert_eq!(set.source, vec![".ai-sdlcx/run.py", "src/.ai-sdlc/x.rs"]);
    }

    #[test]
    fn tests_are_not_source() {
        let set = ChangeSet::classify(
            &[
                "src/parser.test.ts",
                "tests/cli.rs",
                "pkg/test_io.py",
                "src/lib.rs",
            ],
            None,
        );
        assert_eq!(set.source, vec!["src/lib.rs"]);
        assert_eq!(set.tests.len(), 3);
    }

    #[test]
    fn fixtures_under_test_dirs_are_not_tests() {
        assert!(!is_test_file("tests/fixtures/data.json"));
        assert!(is_config_file("tests/fixtures/data.json"));
    }

    #[test]
    fn effective_content_type_precedence() {
        assert_eq!(effective_content_type(None, None), ContentType::Code);
        assert_eq!(effective_content_type(None, Some(true)), ContentType::Code);
        assert_eq!(
            effective_content_type(None, Some(false)),
            ContentType::Configuration
        );
        assert_eq!(
            effective_content_type(Some(ContentType::Documentation), None),
            ContentType::Documentation
        );
    }

    #[test]
    fn legacy_flag_overrides_explicit_content_type() {
        assert_eq!(
            effective_content_type(Some(ContentType::Documentation), Some(true)),
            ContentType::Code
        );
        assert_eq!(
            effective_content_type(Some(ContentType::Code), Some(false)),
            ContentType::Configuration
        );
    }

    #[test]
    fn code_story_requires_source() {
        let only_tests = ChangeSet::classify(&["tests/cli.rs"], None);
        assert!(missing_required_changes(ContentType::Code, &only_tests).is_some());
        let with_source = ChangeSet::classify(&["src/main.rs"], None);
        assert!(missing_required_changes(ContentType::Code, &with_source).is_none());
    }

    #[test]
    fn mixed_story_requires_both_kinds() {
        let source_only = ChangeSet::classify(&["src/main.rs"], None);
        assert!(missing_required_changes(ContentType::Mixed, &source_only).is_some());
        let both = ChangeSet::classify(&["src/main.rs", "config/app.yaml"], None);
        assert!(missing_required_changes(ContentType::Mixed, &both).is_none());
    }

    #[test]
    fn documentation_story_ignores_story_file() {
        let set = ChangeSet::classify(&["stories/S-1.md"], Some("stories/S-1.md"));
        assert!(missing_required_changes(ContentType::Documentation, &set).is_some());
        let set = ChangeSet::classify(&["README.md"], Some("stories/S-1.md"));
        assert!(missing_required_changes(ContentType::Documentation, &set).is_none());
    }
}
