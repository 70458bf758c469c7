//! Scan results: one `Entry` per filesystem node, keyed by relative path.

use serde::Serialize;
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Relative path -> entry, one per scanned tree
pub type Mapping = HashMap<String, Entry>;

/// A single file or directory captured during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Slash separated, never empty, never includes the scan root
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Bytes; always 0 for directories
    pub size: u64,
    pub modified_time: SystemTime,
    pub is_dir: bool,
    pub permission_mode: u32,
}

impl Entry {
    pub fn from_metadata(relative_path: String, absolute_path: PathBuf, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        Self {
            relative_path,
            absolute_path,
            size: if is_dir { 0 } else { metadata.len() },
            modified_time: metadata.modified().unwrap_or(UNIX_EPOCH),
            is_dir,
            permission_mode: permission_mode(metadata),
        }
    }

    /// Modification time truncated to whole seconds since the epoch.
    pub fn modified_secs(&self) -> i64 {
        match self.modified_time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => {
                let before = e.duration();
                let secs = before.as_secs() as i64;
                if before.subsec_nanos() > 0 {
                    -secs - 1
                } else {
                    -secs
                }
            }
        }
    }

    /// Number of separators in the relative path; top level entries are depth 0.
    pub fn depth(&self) -> usize {
        path_depth(&self.relative_path)
    }

    pub fn kind_label(&self) -> &'static str {
        if self.is_dir {
            "directory"
        } else {
            "file"
        }
    }
}

pub fn path_depth(relative_path: &str) -> usize {
    relative_path.matches('/').count()
}

/// Slash-normalised path of `path` relative to `root`.
///
/// Returns `None` for the root itself, for paths outside the root, and for
/// names that are not valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => continue,
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Join a slash separated relative path onto a native root.
pub fn join_relative(root: &Path, relative_path: &str) -> PathBuf {
    relative_path
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(unix)]
fn permission_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_mode(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}
