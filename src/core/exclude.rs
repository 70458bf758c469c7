//! Ignore rules for the source scan.
//!
//! Patterns use gitignore syntax and come from two places: `--exclude`
//! arguments and an optional `.sync-ignore` file at the source root. The
//! ignore file itself is never synced, and a target's own copy is left alone.

use crate::core::error::SetupError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use tracing::{debug, info};

pub const IGNORE_FILE_NAME: &str = ".sync-ignore";

/// Decides whether a relative path is left out of a scan.
///
/// Returning `true` for a directory prunes its whole subtree.
pub trait IgnorePredicate: Send + Sync {
    fn should_ignore(&self, relative_path: &str, is_dir: bool) -> bool;
}

/// Keeps everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIgnore;

impl IgnorePredicate for NoIgnore {
    fn should_ignore(&self, _relative_path: &str, _is_dir: bool) -> bool {
        false
    }
}

/// Skips only the root-level ignore file; used for the target scan so a
/// `.sync-ignore` kept in the target is never planned for deletion
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreFileOnly;

impl IgnorePredicate for IgnoreFileOnly {
    fn should_ignore(&self, relative_path: &str, is_dir: bool) -> bool {
        !is_dir && relative_path == IGNORE_FILE_NAME
    }
}

impl<F> IgnorePredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_ignore(&self, relative_path: &str, _is_dir: bool) -> bool {
        self(relative_path)
    }
}

/// Compiled gitignore-style matcher
#[derive(Debug)]
pub struct IgnoreMatcher {
    gitignore: Gitignore,
    patterns: Vec<String>,
}

impl IgnoreMatcher {
    /// Combine CLI patterns with the source root's `.sync-ignore` file, if any.
    pub fn load(source_root: &Path, cli_patterns: &[String]) -> Result<Self, SetupError> {
        let mut patterns = cli_patterns.to_vec();

        let ignore_file = source_root.join(IGNORE_FILE_NAME);
        match std::fs::read_to_string(&ignore_file) {
            Ok(content) => {
                let from_file = parse_ignore_lines(&content);
                info!("Loaded {} patterns from {}", from_file.len(), IGNORE_FILE_NAME);
                patterns.extend(from_file);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No {} in source root", IGNORE_FILE_NAME);
            }
            Err(e) => {
                return Err(SetupError::Io {
                    path: ignore_file,
                    source: e,
                })
            }
        }

        Self::from_patterns(source_root, &patterns)
    }

    pub fn from_patterns(root: &Path, patterns: &[String]) -> Result<Self, SetupError> {
        let mut builder = GitignoreBuilder::new(root);

        let own_file = format!("/{}", IGNORE_FILE_NAME);
        builder
            .add_line(None, &own_file)
            .map_err(|e| SetupError::IgnorePattern {
                pattern: own_file.clone(),
                message: e.to_string(),
            })?;

        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| SetupError::IgnorePattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
        }

        let gitignore = builder.build().map_err(|e| SetupError::IgnorePattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        })?;

        Ok(Self {
            gitignore,
            patterns: patterns.to_vec(),
        })
    }

    /// Patterns in effect, CLI patterns first.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl IgnorePredicate for IgnoreMatcher {
    fn should_ignore(&self, relative_path: &str, is_dir: bool) -> bool {
        self.gitignore
            .matched(Path::new(relative_path), is_dir)
            .is_ignore()
    }
}

/// Non-blank, non-comment lines of an ignore file.
pub fn parse_ignore_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ignore_lines_skips_comments_and_blanks() {
        let content = "# build output\n\ntarget/\n  *.log  \n#*.tmp\n";
        assert_eq!(parse_ignore_lines(content), vec!["target/", "*.log"]);
    }

    #[test]
    fn test_ignore_file_is_always_excluded() {
        let dir = TempDir::new().unwrap();
        let matcher = IgnoreMatcher::load(dir.path(), &[]).unwrap();

        assert!(matcher.should_ignore(IGNORE_FILE_NAME, false));
        assert!(!matcher.should_ignore("docs/.sync-ignore", false));
        assert!(!matcher.should_ignore("readme.md", false));
    }

    #[test]
    fn test_load_combines_cli_and_file_patterns() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE_NAME), "# comment\n*.log\nbuild/\n").unwrap();

        let matcher = IgnoreMatcher::load(dir.path(), &["*.tmp".to_string()]).unwrap();

        assert_eq!(matcher.patterns(), &["*.tmp", "*.log", "build/"]);
        assert!(matcher.should_ignore("x.tmp", false));
        assert!(matcher.should_ignore("logs/app.log", false));
        assert!(matcher.should_ignore("build", true));
        // directory-only pattern does not hit a file of the same name
        assert!(!matcher.should_ignore("build", false));
    }

    #[test]
    fn test_negated_pattern_keeps_file() {
        let dir = TempDir::new().unwrap();
        let patterns = vec!["*.log".to_string(), "!keep.log".to_string()];
        let matcher = IgnoreMatcher::from_patterns(dir.path(), &patterns).unwrap();

        assert!(matcher.should_ignore("debug.log", false));
        assert!(!matcher.should_ignore("keep.log", false));
    }

    #[test]
    fn test_closure_predicate() {
        let predicate = |path: &str| path.starts_with("skip");
        assert!(predicate.should_ignore("skip/me", true));
        assert!(!predicate.should_ignore("keep", false));
        assert!(!NoIgnore.should_ignore("anything", true));
    }

    #[test]
    fn test_target_predicate_skips_only_root_ignore_file() {
        assert!(IgnoreFileOnly.should_ignore(IGNORE_FILE_NAME, false));
        assert!(!IgnoreFileOnly.should_ignore("docs/.sync-ignore", false));
        assert!(!IgnoreFileOnly.should_ignore("debug.log", false));
    }
}
