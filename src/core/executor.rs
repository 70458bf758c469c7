use crate::core::entry::{join_relative, Entry};
use crate::core::error::ActionError;
use crate::core::planner::{Action, ActionKind, Plan};
use crate::core::progress::ProgressObserver;
use filetime::FileTime;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Actions in flight at once
    pub max_concurrency: usize,
    pub copy_buffer_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

/// Aggregate outcome of applying a plan
#[derive(Debug, Default)]
pub struct ApplyResult {
    pub applied: usize,
    /// Actions deliberately not applied (directory updates)
    pub skipped: usize,
    pub bytes_copied: u64,
    pub errors: Vec<ActionError>,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

enum ActionOutcome {
    Applied { bytes: u64 },
    Skipped,
}

struct ApplyContext {
    source_root: PathBuf,
    target_root: PathBuf,
    copy_buffer_size: usize,
    progress: Arc<dyn ProgressObserver>,
}

#[derive(Default)]
struct ApplyTally {
    applied: AtomicUsize,
    skipped: AtomicUsize,
    bytes_copied: AtomicU64,
    errors: Mutex<Vec<ActionError>>,
}

/// Applies a plan under bounded concurrency.
///
/// Every action is attempted; a failure is recorded and never cancels other
/// actions. Deletes are applied as one wave before adds and updates.
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(max_concurrency: usize) -> Self {
        Self::with_config(ExecutorConfig {
            max_concurrency,
            ..Default::default()
        })
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config: ExecutorConfig {
                max_concurrency: config.max_concurrency.max(1),
                copy_buffer_size: config.copy_buffer_size.max(4096),
            },
        }
    }

    pub async fn apply(
        &self,
        plan: Plan,
        source_root: &Path,
        target_root: &Path,
        progress: Arc<dyn ProgressObserver>,
    ) -> ApplyResult {
        progress.on_apply_started(plan.len(), plan.total_copy_bytes());
        info!(
            "Applying {} actions with up to {} in flight",
            plan.len(),
            self.config.max_concurrency
        );

        let ctx = Arc::new(ApplyContext {
            source_root: source_root.to_path_buf(),
            target_root: target_root.to_path_buf(),
            copy_buffer_size: self.config.copy_buffer_size,
            progress,
        });
        let tally = Arc::new(ApplyTally::default());

        let (deletes, writes): (Vec<_>, Vec<_>) = plan
            .actions
            .into_iter()
            .partition(|a| a.kind == ActionKind::Delete);

        self.run_wave(deletes, &ctx, &tally).await;
        self.run_wave(writes, &ctx, &tally).await;

        let errors = std::mem::take(&mut *tally.errors.lock());
        let result = ApplyResult {
            applied: tally.applied.load(Ordering::Relaxed),
            skipped: tally.skipped.load(Ordering::Relaxed),
            bytes_copied: tally.bytes_copied.load(Ordering::Relaxed),
            errors,
        };

        if result.is_success() {
            info!("Applied {} actions, {} bytes copied", result.applied, result.bytes_copied);
        } else {
            warn!(
                "Applied {} actions, {} failed",
                result.applied,
                result.errors.len()
            );
        }
        result
    }

    async fn run_wave(&self, actions: Vec<Action>, ctx: &Arc<ApplyContext>, tally: &Arc<ApplyTally>) {
        if actions.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut handles = Vec::with_capacity(actions.len());
        let mut labels = Vec::with_capacity(actions.len());

        for action in actions {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tally.errors.lock().push(ActionError::new(
                        action.kind,
                        &action.relative_path,
                        "schedule",
                        io::Error::other(e.to_string()),
                    ));
                    continue;
                }
            };

            labels.push((action.kind, action.relative_path.clone()));
            let ctx = ctx.clone();
            let tally = tally.clone();

            handles.push(tokio::spawn(async move {
                let outcome = execute_action(&action, &ctx).await;
                match outcome {
                    Ok(ActionOutcome::Applied { bytes }) => {
                        tally.applied.fetch_add(1, Ordering::Relaxed);
                        tally.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
                        ctx.progress.on_action_finished(&action.relative_path, true);
                    }
                    Ok(ActionOutcome::Skipped) => {
                        tally.skipped.fetch_add(1, Ordering::Relaxed);
                        ctx.progress.on_action_finished(&action.relative_path, true);
                    }
                    Err(e) => {
                        error!("{}", e);
                        ctx.progress.on_action_finished(&action.relative_path, false);
                        tally.errors.lock().push(e);
                    }
                }
                drop(permit);
            }));
        }

        let joined = futures::future::join_all(handles).await;
        for ((kind, path), result) in labels.into_iter().zip(joined) {
            if let Err(e) = result {
                tally
                    .errors
                    .lock()
                    .push(ActionError::new(kind, &path, "complete", io::Error::other(e.to_string())));
            }
        }
    }
}

async fn execute_action(action: &Action, ctx: &ApplyContext) -> Result<ActionOutcome, ActionError> {
    let rel = action.relative_path.as_str();
    let target_path = join_relative(&ctx.target_root, rel);

    match action.kind {
        ActionKind::Add | ActionKind::Update => {
            let Some(source) = &action.source_entry else {
                return Err(ActionError::new(
                    action.kind,
                    rel,
                    "read source entry",
                    io::Error::new(io::ErrorKind::InvalidInput, "action carries no source entry"),
                ));
            };

            if source.is_dir {
                if action.kind == ActionKind::Update {
                    error!(path = %rel, "Update planned for a directory; not applying it");
                    return Ok(ActionOutcome::Skipped);
                }
                debug!(path = %rel, "Creating directory");
                create_directory(&target_path, source.permission_mode)
                    .await
                    .map_err(|e| ActionError::new(action.kind, rel, "create directory", e))?;
                return Ok(ActionOutcome::Applied { bytes: 0 });
            }

            let source_path = join_relative(&ctx.source_root, rel);
            let bytes = copy_file(action.kind, rel, source, &source_path, &target_path, ctx).await?;
            Ok(ActionOutcome::Applied { bytes })
        }
        ActionKind::Delete => {
            debug!(path = %rel, "Deleting");
            remove_path(&target_path)
                .await
                .map_err(|e| ActionError::new(ActionKind::Delete, rel, "remove", e))?;
            Ok(ActionOutcome::Applied { bytes: 0 })
        }
    }
}

/// Create a directory and any missing parents. Existing directories are fine.
///
/// A file copy may already have created the directory with default bits, so
/// the mode is applied again after the create.
async fn create_directory(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    builder.create(path).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// Remove a file, link or whole directory tree. A missing path counts as removed.
async fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match removed {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Stream `source_path` over `target_path`, flush it to disk, then carry
/// over the modification time.
async fn copy_file(
    kind: ActionKind,
    rel: &str,
    source: &Entry,
    source_path: &Path,
    target_path: &Path,
    ctx: &ApplyContext,
) -> Result<u64, ActionError> {
    let fail = |operation: &'static str| move |e: io::Error| ActionError::new(kind, rel, operation, e);

    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(fail("create parent directory"))?;
    }

    // never write through a link left in the target
    if let Ok(existing) = fs::symlink_metadata(target_path).await {
        if existing.file_type().is_symlink() {
            fs::remove_file(target_path)
                .await
                .map_err(fail("replace symlink"))?;
        }
    }

    ctx.progress.on_file_started(rel, source.size);
    debug!(path = %rel, "Copying {} bytes", source.size);

    let mut reader = fs::File::open(source_path).await.map_err(fail("open source"))?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(source.permission_mode);
    let mut writer = options.open(target_path).await.map_err(fail("open target"))?;

    let mut buffer = vec![0u8; ctx.copy_buffer_size];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buffer).await.map_err(fail("read source"))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .await
            .map_err(fail("write target"))?;
        copied += n as u64;
        ctx.progress.on_bytes_copied(n as u64);
    }

    writer.flush().await.map_err(fail("flush target"))?;
    writer.sync_all().await.map_err(fail("sync target"))?;
    drop(writer);

    let mtime = FileTime::from_system_time(source.modified_time);
    let path = target_path.to_path_buf();
    match tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(path = %rel, "Failed to set modification time: {}", e),
        Err(e) => warn!(path = %rel, "Failed to set modification time: {}", e),
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::hash_file;
    use crate::core::exclude::NoIgnore;
    use crate::core::planner;
    use crate::core::progress::{NoProgress, TransferStats};
    use crate::core::scanner::{ScanRole, TreeScanner};
    use std::fs as stdfs;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    struct Trees {
        source: TempDir,
        target: TempDir,
    }

    impl Trees {
        fn new() -> Self {
            Self {
                source: TempDir::new().unwrap(),
                target: TempDir::new().unwrap(),
            }
        }

        fn src(&self, rel: &str) -> PathBuf {
            self.source.path().join(rel)
        }

        fn dst(&self, rel: &str) -> PathBuf {
            self.target.path().join(rel)
        }

        async fn plan(&self) -> Plan {
            let scanner = TreeScanner::new(4);
            let source = scanner
                .scan(self.source.path(), ScanRole::Source, Arc::new(NoIgnore))
                .await
                .unwrap();
            let target = scanner
                .scan(self.target.path(), ScanRole::Target, Arc::new(NoIgnore))
                .await
                .unwrap();
            planner::plan(&source.mapping, &target.mapping, &hash_file).plan
        }

        async fn apply(&self, plan: Plan, progress: Arc<dyn ProgressObserver>) -> ApplyResult {
            Executor::new(4)
                .apply(plan, self.source.path(), self.target.path(), progress)
                .await
        }
    }

    #[tokio::test]
    async fn test_adds_create_tree_and_keep_mtime() {
        let trees = Trees::new();
        stdfs::create_dir_all(trees.src("a")).unwrap();
        stdfs::write(trees.src("a/b.txt"), b"0123456789").unwrap();
        let stamp = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(trees.src("a/b.txt"), stamp).unwrap();

        let plan = trees.plan().await;
        assert_eq!(plan.adds, 2);

        let stats = Arc::new(TransferStats::default());
        let result = trees.apply(plan, stats.clone()).await;

        assert!(result.is_success());
        assert_eq!(result.applied, 2);
        assert_eq!(result.bytes_copied, 10);
        assert_eq!(stdfs::read(trees.dst("a/b.txt")).unwrap(), b"0123456789");
        let copied = stdfs::metadata(trees.dst("a/b.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied).unix_seconds(), 1_600_000_000);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_announced, 10);
        assert_eq!(snapshot.bytes_transferred, 10);
        assert_eq!(snapshot.files_completed, 2);
    }

    #[tokio::test]
    async fn test_update_truncates_longer_target() {
        let trees = Trees::new();
        stdfs::write(trees.src("f.txt"), b"short").unwrap();
        stdfs::write(trees.dst("f.txt"), b"a much longer previous body").unwrap();

        let plan = trees.plan().await;
        assert_eq!(plan.updates, 1);
        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success());
        assert_eq!(stdfs::read(trees.dst("f.txt")).unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_deletes_remove_files_and_trees() {
        let trees = Trees::new();
        stdfs::create_dir_all(trees.dst("old/deep")).unwrap();
        stdfs::write(trees.dst("old/deep/x.txt"), b"x").unwrap();
        stdfs::write(trees.dst("stray.txt"), b"x").unwrap();

        let plan = trees.plan().await;
        assert_eq!(plan.deletes, 4);
        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success(), "{:?}", result.errors);
        assert_eq!(stdfs::read_dir(trees.target.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_of_vanished_path_succeeds() {
        let trees = Trees::new();
        let gone = Entry {
            relative_path: "gone.txt".to_string(),
            absolute_path: trees.dst("gone.txt"),
            size: 1,
            modified_time: UNIX_EPOCH,
            is_dir: false,
            permission_mode: 0o644,
        };
        let plan = Plan::from_actions(vec![Action::delete(&gone)]);
        let result = trees.apply(plan, Arc::new(NoProgress)).await;
        assert!(result.is_success());
        assert_eq!(result.applied, 1);
    }

    #[tokio::test]
    async fn test_kind_change_file_to_directory() {
        let trees = Trees::new();
        stdfs::create_dir_all(trees.src("node")).unwrap();
        stdfs::write(trees.src("node/inner.txt"), b"inside").unwrap();
        stdfs::write(trees.dst("node"), b"was a file").unwrap();

        let plan = trees.plan().await;
        assert_eq!(plan.actions[0].kind, ActionKind::Delete);
        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success(), "{:?}", result.errors);
        assert!(trees.dst("node").is_dir());
        assert_eq!(stdfs::read(trees.dst("node/inner.txt")).unwrap(), b"inside");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let trees = Trees::new();
        stdfs::write(trees.src("good.txt"), b"good").unwrap();

        let mut plan = trees.plan().await;
        let phantom = Entry {
            relative_path: "phantom.txt".to_string(),
            absolute_path: trees.src("phantom.txt"),
            size: 3,
            modified_time: UNIX_EPOCH + Duration::from_secs(5),
            is_dir: false,
            permission_mode: 0o644,
        };
        plan.actions.push(Action::add(&phantom));
        let plan = Plan::from_actions(plan.actions);

        let stats = Arc::new(TransferStats::default());
        let result = Executor::new(1)
            .apply(plan, trees.source.path(), trees.target.path(), stats.clone())
            .await;

        assert_eq!(result.applied, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].relative_path, "phantom.txt");
        assert_eq!(result.errors[0].operation, "open source");
        assert_eq!(stdfs::read(trees.dst("good.txt")).unwrap(), b"good");
        assert_eq!(stats.snapshot().files_failed, 1);
    }

    #[tokio::test]
    async fn test_directory_update_is_skipped() {
        let trees = Trees::new();
        let dir = Entry {
            relative_path: "d".to_string(),
            absolute_path: trees.src("d"),
            size: 0,
            modified_time: UNIX_EPOCH,
            is_dir: true,
            permission_mode: 0o755,
        };
        let plan = Plan::from_actions(vec![Action::update(&dir, &dir)]);
        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success());
        assert_eq!(result.applied, 0);
        assert_eq!(result.skipped, 1);
        assert!(!trees.dst("d").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_file_gets_source_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let trees = Trees::new();
        stdfs::write(trees.src("run.sh"), b"#!/bin/sh\n").unwrap();
        stdfs::set_permissions(trees.src("run.sh"), stdfs::Permissions::from_mode(0o750)).unwrap();

        let plan = trees.plan().await;
        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success());
        let mode = stdfs::metadata(trees.dst("run.sh")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_replaces_target_symlink_instead_of_following_it() {
        let trees = Trees::new();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim.txt");
        stdfs::write(&victim, b"untouched").unwrap();

        stdfs::write(trees.src("link"), b"new content").unwrap();
        std::os::unix::fs::symlink(&victim, trees.dst("link")).unwrap();

        let plan = trees.plan().await;
        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success(), "{:?}", result.errors);
        assert_eq!(stdfs::read(&victim).unwrap(), b"untouched");
        assert!(!stdfs::symlink_metadata(trees.dst("link")).unwrap().file_type().is_symlink());
        assert_eq!(stdfs::read(trees.dst("link")).unwrap(), b"new content");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_directory_gets_source_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let trees = Trees::new();
        stdfs::create_dir(trees.src("private")).unwrap();
        stdfs::write(trees.src("private/key"), b"k").unwrap();
        stdfs::set_permissions(trees.src("private"), stdfs::Permissions::from_mode(0o700)).unwrap();

        let plan = trees.plan().await;
        // as if a file copy had made the parent first
        stdfs::create_dir(trees.dst("private")).unwrap();
        stdfs::set_permissions(trees.dst("private"), stdfs::Permissions::from_mode(0o755)).unwrap();

        let result = trees.apply(plan, Arc::new(NoProgress)).await;

        assert!(result.is_success(), "{:?}", result.errors);
        let mode = stdfs::metadata(trees.dst("private")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    /// Tracks how many copies are between start and finish at once.
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ProgressObserver for InFlight {
        fn on_file_started(&self, _relative_path: &str, _size: u64) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn on_action_finished(&self, _relative_path: &str, _succeeded: bool) {
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_copies_in_flight_never_exceed_the_limit() {
        let trees = Trees::new();
        for i in 0..12 {
            stdfs::write(trees.src(&format!("big{i:02}.bin")), vec![i as u8; 256 * 1024]).unwrap();
        }

        let plan = trees.plan().await;
        let observer = Arc::new(InFlight::default());
        let executor = Executor::with_config(ExecutorConfig {
            max_concurrency: 2,
            copy_buffer_size: 4096,
        });
        let result = executor
            .apply(plan, trees.source.path(), trees.target.path(), observer.clone())
            .await;

        assert!(result.is_success(), "{:?}", result.errors);
        assert_eq!(result.applied, 12);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 12);
        let peak = observer.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak {peak}");
    }
}
