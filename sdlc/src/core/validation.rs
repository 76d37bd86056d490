//! Input validation that must pass before any subprocess is spawned.

use std::path::{Component, Path};

const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '(', ')', '{', '}', '!', '*', '?', '\n', '\r', '\0',
];

/// Reject working-directory strings that could escape or inject.
///
/// Existence and canonical form are checked by the I/O layer; this covers
/// the lexical rules only.
pub fn validate_working_dir(path: &Path) -> Result<(), String> {
    let display = path.to_string_lossy();
    if display.trim().is_empty() {
        return Err("working directory is empty".to_string());
    }
    if !path.is_absolute() {
        return Err(format!("working directory must be absolute: {display}"));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err("working directory must not contain '..' components".to_string());
    }
    if let Some(ch) = display.chars().find(|ch| SHELL_METACHARACTERS.contains(ch)) {
        return Err(format!(
            "working directory contains forbidden character {ch:?}"
        ));
    }
    Ok(())
}

/// Validate a branch or ref name against git's ref-format rules.
pub fn validate_branch_name(name: &str) -> Result<(), String> {
    let fail = |reason: &str| Err(format!("invalid branch name {name:?}: {reason}"));
    if name.is_empty() {
        return fail("empty");
    }
    if name.len() > 255 {
        return fail("too long");
    }
    if name.starts_with('-') {
        return fail("starts with '-'");
    }
    if name == "@" || name.contains("@{") {
        return fail("contains '@{'");
    }
    if name.contains("..") || name.contains("//") {
        return fail("contains '..' or '//'");
    }
    if name.starts_with('/') || name.ends_with('/') || name.ends_with('.') {
        return fail("bad leading or trailing character");
    }
    if name.ends_with(".lock") || name.split('/').any(|part| part.starts_with('.')) {
        return fail("component starts with '.' or ends with '.lock'");
    }
    if let Some(ch) = name.chars().find(|ch| {
        ch.is_control()
            || ch.is_whitespace()
            || matches!(ch, '~' | '^' | ':' | '?' | '*' | '[' | '\\')
            || SHELL_METACHARACTERS.contains(ch)
    }) {
        return Err(format!("invalid branch name {name:?}: forbidden character {ch:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_absolute_dir() {
        assert!(validate_working_dir(Path::new("/tmp/project-1")).is_ok());
    }

    #[test]
    fn rejects_relative_traversal_and_metacharacters() {
        assert!(validate_working_dir(Path::new("project")).is_err());
        assert!(validate_working_dir(Path::new("/tmp/../etc")).is_err());
        assert!(validate_working_dir(Path::new("/tmp/x;rm -rf")).is_err());
        assert!(validate_working_dir(Path::new("/tmp/$(id)")).is_err());
    }

    #[test]
    fn accepts_common_branch_names() {
        for name in ["main", "master", "feature/S-12-login", "release-1.2"] {
            assert!(validate_branch_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_unsafe_refs() {
        for name in [
            "",
            "-delete",
            "a..b",
            "feat/.hidden",
            "x.lock",
            "with space",
            "a:b",
            "x;y",
            "trailing/",
            "@",
        ] {
            assert!(validate_branch_name(name).is_err(), "{name:?}");
        }
    }
}
