//! Git adapter for the pipeline.
//!
//! Every git call goes through this wrapper in argument-array form. The
//! working directory is validated once in [`Git::open`] before any
//! subprocess is spawned.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::classifier::METADATA_DIR;
use crate::core::fingerprint::fingerprint;
use crate::core::validation::{validate_branch_name, validate_working_dir};

/// Base branches tried in order before falling back to `HEAD~1`.
const BASE_BRANCH_CANDIDATES: &[&str] = &["main", "master"];
const FALLBACK_BASE: &str = "HEAD~1";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    /// Validate and canonicalize `workdir`, then wrap it.
    pub fn open(workdir: impl AsRef<Path>) -> Result<Self> {
        let workdir = workdir.as_ref();
        let canonical = workdir
            .canonicalize()
            .with_context(|| format!("working directory {} does not exist", workdir.display()))?;
        if !canonical.is_dir() {
            return Err(anyhow!(
                "working directory {} is not a directory",
                canonical.display()
            ));
        }
        validate_working_dir(&canonical).map_err(|err| anyhow!(err))?;
        Ok(Self { workdir: canonical })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.status_raw()?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if the working tree has any staged, unstaged, or untracked change.
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.status_raw()?.trim().is_empty())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes. The message is passed as one literal argument.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(())
    }

    /// Fingerprint of the working tree relative to the last commit.
    ///
    /// Pipeline metadata (story files, progress logs) is excluded: it changes
    /// on every attempt regardless of what the agent did.
    #[instrument(skip_all)]
    pub fn working_tree_fingerprint(&self) -> Result<String> {
        let exclude = format!(":(exclude){METADATA_DIR}");
        let diff = self.run_capture(&["diff", "HEAD", "--", ".", &exclude])?;
        let status =
            self.run_capture(&["status", "--porcelain=v1", "-uall", "--", ".", &exclude])?;
        Ok(fingerprint(&diff, &status))
    }

    /// First of `main`/`master` that resolves locally.
    pub fn detect_base_branch(&self) -> Option<String> {
        BASE_BRANCH_CANDIDATES
            .iter()
            .find(|branch| {
                validate_branch_name(branch).is_ok()
                    && self
                        .run(&["rev-parse", "--verify", "--quiet", branch])
                        .is_ok_and(|out| out.status.success())
            })
            .map(|branch| (*branch).to_string())
    }

    /// Merge base of `HEAD` and `branch`.
    pub fn merge_base(&self, branch: &str) -> Result<String> {
        validate_branch_name(branch).map_err(|err| anyhow!(err))?;
        Ok(self.run_capture(&["merge-base", "HEAD", branch])?.trim().to_string())
    }

    /// Files changed since the merge base with the detected base branch.
    ///
    /// Falls back to `HEAD~1` when no base branch exists. Untracked files are
    /// included so uncommitted new work counts as a change.
    #[instrument(skip_all)]
    pub fn changed_files_since_base(&self) -> Result<Vec<String>> {
        let base = match self.detect_base_branch() {
            Some(branch) => match self.merge_base(&branch) {
                Ok(commit) => commit,
                Err(err) => {
                    warn!(branch = %branch, err = %err, "merge-base failed, using HEAD~1");
                    FALLBACK_BASE.to_string()
                }
            },
            None => FALLBACK_BASE.to_string(),
        };
        debug!(base = %base, "diffing against base");
        let out = self.run_capture(&["diff", "--name-status", &base])?;
        let mut files = parse_name_status(&out);
        for entry in self.status_porcelain()? {
            if entry.is_untracked() && !files.contains(&entry.path) {
                files.push(entry.path);
            }
        }
        Ok(files)
    }

    /// Tracked and untracked (non-ignored) files in the working tree.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files", "--cached", "--others", "--exclude-standard"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn status_raw(&self) -> Result<String> {
        self.run_capture(&["status", "--porcelain=v1", "-uall"])
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry {
        code,
        path: unquote(&path),
    })
}

/// Paths from `git diff --name-status`; renames and copies yield the new path.
fn parse_name_status(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let status = fields.next()?.trim();
            if status.is_empty() {
                return None;
            }
            let path = if status.starts_with('R') || status.starts_with('C') {
                fields.nth(1)
            } else {
                fields.next()
            }?;
            Some(unquote(path.trim()))
        })
        .collect()
}

fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::fs;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn parses_name_status_output() {
        let out = "M\tsrc/lib.rs\nA\t\"with space.rs\"\nR100\told.rs\tnew.rs\nD\tgone.rs\n";
        assert_eq!(
            parse_name_status(out),
            vec!["src/lib.rs", "with space.rs", "new.rs", "gone.rs"]
        );
    }

    #[test]
    fn open_rejects_missing_directory() {
        assert!(Git::open("/definitely/not/here").is_err());
    }

    /// Verifies untracked files change the fingerprint and show up as changes.
    #[test]
    fn fingerprint_tracks_untracked_files() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git().expect("git");
        let clean = git.working_tree_fingerprint().expect("fingerprint");
        assert_eq!(clean, git.working_tree_fingerprint().expect("fingerprint"));

        fs::write(repo.path().join("new.rs"), "fn main() {}\n").expect("write");
        let dirty = git.working_tree_fingerprint().expect("fingerprint");
        assert_ne!(clean, dirty);
        assert!(git.has_uncommitted_changes().expect("status"));
    }

    #[test]
    fn fingerprint_ignores_pipeline_metadata() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git().expect("git");
        let before = git.working_tree_fingerprint().expect("fingerprint");
        repo.write_story("S-1", "# Story\n").expect("story");
        repo.write_file(".ai-sdlc/progress/S-1-implement-1.log", "log\n")
            .expect("log");
        assert_eq!(before, git.working_tree_fingerprint().expect("fingerprint"));
    }

    #[test]
    fn changed_files_include_committed_and_untracked_work() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git().expect("git");
        assert_eq!(git.detect_base_branch().as_deref(), Some("main"));
        repo.checkout_new_branch("feature/S-1").expect("branch");

        fs::create_dir_all(repo.path().join("src")).expect("mkdir");
        fs::write(repo.path().join("src/lib.rs"), "pub fn a() {}\n").expect("write");
        git.add_all().expect("add");
        git.commit("feat: add lib").expect("commit");
        fs::write(repo.path().join("notes.txt"), "n\n").expect("write");

        let changed = git.changed_files_since_base().expect("changed");
        assert!(changed.contains(&"src/lib.rs".to_string()));
        assert!(changed.contains(&"notes.txt".to_string()));
    }
}
