use crate::core::entry::{relative_path, Entry, Mapping};
use crate::core::error::{ScanError, ScanWarning};
use crate::core::exclude::IgnorePredicate;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Which side of the sync a scan is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRole {
    /// Must exist; links are followed so their content gets synced
    Source,
    /// May be missing (treated as empty); links are recorded, not followed
    Target,
}

impl fmt::Display for ScanRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanRole::Source => write!(f, "source"),
            ScanRole::Target => write!(f, "target"),
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Subtrees walked at the same time
    pub max_concurrent: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

/// Everything one scan produced
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub mapping: Mapping,
    pub warnings: Vec<ScanWarning>,
}

/// Concurrent directory walker
pub struct TreeScanner {
    config: ScanConfig,
}

impl TreeScanner {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_config(ScanConfig { max_concurrent })
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self {
            config: ScanConfig {
                max_concurrent: config.max_concurrent.max(1),
            },
        }
    }

    /// Walk `root` and map every visited, non-ignored node by relative path.
    ///
    /// Each immediate child of the root is walked as its own subtree on a
    /// blocking worker. Workers build private mappings which are merged once
    /// all of them have finished.
    pub async fn scan(
        &self,
        root: &Path,
        role: ScanRole,
        ignore: Arc<dyn IgnorePredicate>,
    ) -> Result<ScanOutcome, ScanError> {
        info!("Scanning {}: {}", role, root.display());

        match tokio::fs::metadata(root).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(ScanError::RootNotDirectory(root.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return match role {
                    ScanRole::Target => {
                        info!("Target {} does not exist yet, treating as empty", root.display());
                        Ok(ScanOutcome::default())
                    }
                    ScanRole::Source => Err(ScanError::RootNotFound(root.to_path_buf())),
                };
            }
            Err(e) => {
                return Err(ScanError::RootUnreadable {
                    path: root.to_path_buf(),
                    source: e,
                })
            }
        }

        let root_buf = root.to_path_buf();
        let (canonical_root, children, mut warnings) = tokio::task::spawn_blocking(move || {
            let canonical = std::fs::canonicalize(&root_buf)?;
            let (children, warnings) = list_children(&root_buf)?;
            Ok::<_, std::io::Error>((canonical, children, warnings))
        })
        .await
            .map_err(|e| ScanError::Worker(e.to_string()))?
            .map_err(|e| ScanError::RootUnreadable {
                path: root.to_path_buf(),
                source: e,
            })?;

        let follow_links = role == ScanRole::Source;
        let canonical_root = Arc::new(canonical_root);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut handles = Vec::with_capacity(children.len());

        for child in children {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ScanError::Worker(e.to_string()))?;
            let root = root.to_path_buf();
            let canonical_root = canonical_root.clone();
            let ignore = ignore.clone();

            handles.push(tokio::task::spawn_blocking(move || {
                let walked = walk_subtree(&root, &canonical_root, &child, follow_links, ignore.as_ref());
                drop(permit);
                walked
            }));
        }

        let mut mapping = Mapping::new();
        for handle in handles {
            let (local, local_warnings) = handle
                .await
                .map_err(|e| ScanError::Worker(e.to_string()))?;
            mapping.extend(local);
            warnings.extend(local_warnings);
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        info!(
            "Finished scanning {}: {} entries, {} warnings",
            role,
            mapping.len(),
            warnings.len()
        );

        Ok(ScanOutcome { mapping, warnings })
    }
}

fn list_children(root: &Path) -> std::io::Result<(Vec<PathBuf>, Vec<ScanWarning>)> {
    let mut children = Vec::new();
    let mut warnings = Vec::new();

    for item in std::fs::read_dir(root)? {
        match item {
            Ok(entry) => children.push(entry.path()),
            Err(e) => warnings.push(ScanWarning {
                path: root.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    Ok((children, warnings))
}

/// Walk one subtree into a private mapping. Ignored directories are pruned.
///
/// walkdir only detects loops among the ancestors of `start`, and the scan
/// root is never one of them, so followed links leading back to the root
/// (or above it) are caught here against `canonical_root`.
fn walk_subtree(
    root: &Path,
    canonical_root: &Path,
    start: &Path,
    follow_links: bool,
    ignore: &dyn IgnorePredicate,
) -> (Mapping, Vec<ScanWarning>) {
    let mut mapping = Mapping::new();
    let mut warnings = Vec::new();

    let mut walker = WalkDir::new(start)
        .follow_links(follow_links)
        .follow_root_links(follow_links)
        .into_iter();

    while let Some(item) = walker.next() {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                warnings.push(ScanWarning {
                    path: e.path().map(Path::to_path_buf).unwrap_or_else(|| start.to_path_buf()),
                    message: e.to_string(),
                });
                continue;
            }
        };

        let is_dir = entry.file_type().is_dir();

        if follow_links
            && is_dir
            && entry.path_is_symlink()
            && leads_to_ancestor(entry.path(), canonical_root)
        {
            warnings.push(ScanWarning {
                path: entry.path().to_path_buf(),
                message: format!("file system loop: link points to {} or above it", canonical_root.display()),
            });
            walker.skip_current_dir();
            continue;
        }

        let Some(rel) = relative_path(root, entry.path()) else {
            warnings.push(ScanWarning {
                path: entry.path().to_path_buf(),
                message: "path is not valid UTF-8".to_string(),
            });
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        };

        if ignore.should_ignore(&rel, is_dir) {
            debug!(path = %rel, "Ignoring");
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => {
                let node = Entry::from_metadata(rel.clone(), entry.path().to_path_buf(), &metadata);
                mapping.insert(rel, node);
            }
            Err(e) => warnings.push(ScanWarning {
                path: entry.path().to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    (mapping, warnings)
}

/// Whether `path` resolves to `canonical_root` or one of its ancestors.
fn leads_to_ancestor(path: &Path, canonical_root: &Path) -> bool {
    match std::fs::canonicalize(path) {
        Ok(resolved) => canonical_root.starts_with(&resolved),
        Err(_) => false,
    }
}
