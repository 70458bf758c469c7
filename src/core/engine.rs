use crate::core::digest::{DigestPool, DEFAULT_DIGEST_WORKERS};
use crate::core::error::{ComparisonWarning, ScanWarning, SetupError, SyncError};
use crate::core::exclude::{IgnoreFileOnly, IgnoreMatcher};
use crate::core::executor::{Executor, ExecutorConfig, DEFAULT_COPY_BUFFER_SIZE, DEFAULT_MAX_CONCURRENCY};
use crate::core::planner::{CompareConfig, Plan, PlanOutcome, Planner};
use crate::core::progress::{NoProgress, ProgressObserver, SyncStatus};
use crate::core::scanner::{ScanConfig, ScanRole, TreeScanner};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Apply-phase concurrency
    pub max_concurrency: usize,
    /// Hashing threads used while planning
    pub digest_workers: usize,
    pub scan: ScanConfig,
    pub copy_buffer_size: usize,
    pub compare: CompareConfig,
    /// Extra ignore patterns combined with the source's ignore file
    pub exclude: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            digest_workers: DEFAULT_DIGEST_WORKERS,
            scan: ScanConfig::default(),
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            compare: CompareConfig::default(),
            exclude: Vec::new(),
        }
    }
}

/// Result of scanning both trees and planning, before anything is applied
#[derive(Debug)]
pub struct SyncAnalysis {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub source_entries: usize,
    pub target_entries: usize,
    pub plan: Plan,
    pub scan_warnings: Vec<ScanWarning>,
    pub comparison_warnings: Vec<ComparisonWarning>,
}

impl SyncAnalysis {
    pub fn warning_count(&self) -> usize {
        self.scan_warnings.len() + self.comparison_warnings.len()
    }
}

/// Outcome of an applied run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: SyncStatus,
    pub source_entries: usize,
    pub target_entries: usize,
    pub planned_adds: usize,
    pub planned_updates: usize,
    pub planned_deletes: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    pub scan_warnings: usize,
    pub comparison_warnings: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        self.failed > 0
    }
}

/// Scan, plan and apply pipeline
///
/// Runs the pipeline in two steps so a caller can inspect the plan between
/// them: [`SyncEngine::analyze`] validates, scans and plans;
/// [`SyncEngine::execute`] applies the plan and reports.
pub struct SyncEngine {
    config: SyncConfig,
    progress: Arc<dyn ProgressObserver>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Validate both roots, scan them concurrently and build the plan.
    pub async fn analyze(&self, source: &Path, target: &Path) -> Result<SyncAnalysis, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync", run_id = %run_id);
        self.analyze_inner(run_id, source, target).instrument(span).await
    }

    async fn analyze_inner(&self, run_id: Uuid, source: &Path, target: &Path) -> Result<SyncAnalysis, SyncError> {
        let started_at = Utc::now();
        let result = self.scan_and_plan(run_id, started_at, source, target).await;
        if let Err(e) = &result {
            self.progress.on_status(SyncStatus::Failed, &e.to_string());
        }
        result
    }

    async fn scan_and_plan(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        source: &Path,
        target: &Path,
    ) -> Result<SyncAnalysis, SyncError> {
        let (source_root, target_root) = validate_roots(source, target)?;
        info!("Syncing {} -> {}", source_root.display(), target_root.display());

        let matcher = IgnoreMatcher::load(&source_root, &self.config.exclude)?;
        debug!("Ignore patterns: {:?}", matcher.patterns());

        self.progress.on_status(SyncStatus::Scanning, "Scanning source and target");
        let scanner = TreeScanner::with_config(self.config.scan.clone());
        let (source_scan, target_scan) = tokio::join!(
            scanner.scan(&source_root, ScanRole::Source, Arc::new(matcher)),
            scanner.scan(&target_root, ScanRole::Target, Arc::new(IgnoreFileOnly)),
        );
        let source_scan = source_scan.map_err(SyncError::SourceScan)?;
        let target_scan = target_scan.map_err(SyncError::TargetScan)?;

        let source_entries = source_scan.mapping.len();
        let target_entries = target_scan.mapping.len();
        let mut scan_warnings = source_scan.warnings;
        scan_warnings.extend(target_scan.warnings);

        self.progress.on_status(SyncStatus::Comparing, "Comparing trees");
        let digest_workers = self.config.digest_workers;
        let compare = self.config.compare.clone();
        let source_mapping = source_scan.mapping;
        let target_mapping = target_scan.mapping;

        let outcome = tokio::task::spawn_blocking(move || -> io::Result<PlanOutcome> {
            let pool = DigestPool::start(digest_workers)?;
            let outcome = Planner::with_config(&pool, compare).plan(&source_mapping, &target_mapping);
            pool.shutdown();
            Ok(outcome)
        })
        .await
        .map_err(|e| SyncError::Planning(e.to_string()))?
        .map_err(|e| SyncError::Planning(e.to_string()))?;

        if !scan_warnings.is_empty() || !outcome.warnings.is_empty() {
            warn!(
                "{} entries could not be scanned, {} compared conservatively",
                scan_warnings.len(),
                outcome.warnings.len()
            );
        }

        Ok(SyncAnalysis {
            run_id,
            started_at,
            source_root,
            target_root,
            source_entries,
            target_entries,
            plan: outcome.plan,
            scan_warnings,
            comparison_warnings: outcome.warnings,
        })
    }

    /// Apply an analysed plan. Action failures end up in the report; they
    /// never abort the run.
    pub async fn execute(&self, analysis: SyncAnalysis) -> SyncReport {
        let span = info_span!("sync", run_id = %analysis.run_id);
        self.execute_inner(analysis).instrument(span).await
    }

    async fn execute_inner(&self, analysis: SyncAnalysis) -> SyncReport {
        let SyncAnalysis {
            run_id,
            started_at,
            source_root,
            target_root,
            source_entries,
            target_entries,
            plan,
            scan_warnings,
            comparison_warnings,
        } = analysis;

        let (planned_adds, planned_updates, planned_deletes) = (plan.adds, plan.updates, plan.deletes);

        self.progress
            .on_status(SyncStatus::Syncing, &format!("Applying {} actions", plan.len()));

        let executor = Executor::with_config(ExecutorConfig {
            max_concurrency: self.config.max_concurrency,
            copy_buffer_size: self.config.copy_buffer_size,
        });
        let result = executor
            .apply(plan, &source_root, &target_root, self.progress.clone())
            .await;

        let end_time = Utc::now();
        let status = if result.is_success() {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };

        let message = if result.is_success() {
            format!("Applied {} actions", result.applied)
        } else {
            format!("{} of {} actions failed", result.errors.len(), result.applied + result.errors.len())
        };
        self.progress.on_status(status, &message);
        info!("{}", message);

        SyncReport {
            run_id: run_id.to_string(),
            source: source_root,
            target: target_root,
            start_time: started_at,
            end_time,
            duration_ms: (end_time - started_at).num_milliseconds().max(0) as u64,
            status,
            source_entries,
            target_entries,
            planned_adds,
            planned_updates,
            planned_deletes,
            applied: result.applied,
            skipped: result.skipped,
            failed: result.errors.len(),
            bytes_transferred: result.bytes_copied,
            scan_warnings: scan_warnings.len(),
            comparison_warnings: comparison_warnings.len(),
            errors: result.errors.iter().map(ToString::to_string).collect(),
        }
    }

    /// Analyse and apply without stopping in between.
    pub async fn run(&self, source: &Path, target: &Path) -> Result<SyncReport, SyncError> {
        let analysis = self.analyze(source, target).await?;
        Ok(self.execute(analysis).await)
    }
}

/// Resolve both roots and reject layouts a one-way sync cannot handle.
///
/// The source must be an existing directory. The target may be missing; it
/// is resolved through its nearest existing ancestor.
pub fn validate_roots(source: &Path, target: &Path) -> Result<(PathBuf, PathBuf), SetupError> {
    let source_root = match std::fs::canonicalize(source) {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SetupError::SourceMissing(source.to_path_buf()))
        }
        Err(e) => {
            return Err(SetupError::Io {
                path: source.to_path_buf(),
                source: e,
            })
        }
    };
    if !source_root.is_dir() {
        return Err(SetupError::SourceNotDirectory(source.to_path_buf()));
    }

    let target_root = match std::fs::symlink_metadata(target) {
        Ok(_) => {
            let resolved = std::fs::canonicalize(target).map_err(|e| SetupError::Io {
                path: target.to_path_buf(),
                source: e,
            })?;
            if !resolved.is_dir() {
                return Err(SetupError::TargetNotDirectory(target.to_path_buf()));
            }
            resolved
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => resolve_missing(target)?,
        Err(e) => {
            return Err(SetupError::Io {
                path: target.to_path_buf(),
                source: e,
            })
        }
    };

    if source_root == target_root {
        return Err(SetupError::SamePath(source_root));
    }
    if target_root.starts_with(&source_root) {
        return Err(SetupError::TargetInsideSource {
            source_root,
            target: target_root,
        });
    }
    if source_root.starts_with(&target_root) {
        return Err(SetupError::SourceInsideTarget {
            source_root,
            target: target_root,
        });
    }

    Ok((source_root, target_root))
}

fn resolve_missing(path: &Path) -> Result<PathBuf, SetupError> {
    let io_error = |e: io::Error| SetupError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let absolute = std::path::absolute(path).map_err(io_error)?;

    for ancestor in absolute.ancestors().skip(1) {
        if ancestor.exists() {
            let base = std::fs::canonicalize(ancestor).map_err(io_error)?;
            let rest = absolute.strip_prefix(ancestor).unwrap_or(&absolute);
            return Ok(base.join(rest));
        }
    }
    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StatusRecorder {
        seen: Mutex<Vec<SyncStatus>>,
    }

    impl ProgressObserver for StatusRecorder {
        fn on_status(&self, status: SyncStatus, _message: &str) {
            self.seen.lock().push(status);
        }
    }

    #[test]
    fn test_validate_accepts_missing_target_under_existing_parent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();

        let (source, target) =
            validate_roots(&dir.path().join("src"), &dir.path().join("out/nested")).unwrap();
        let base = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(source, base.join("src"));
        assert_eq!(target, base.join("out/nested"));
    }

    #[test]
    fn test_validate_rejects_bad_layouts() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(dir.path().join("file"), b"x").unwrap();

        assert!(matches!(
            validate_roots(&dir.path().join("nope"), dir.path()),
            Err(SetupError::SourceMissing(_))
        ));
        assert!(matches!(
            validate_roots(&dir.path().join("file"), &dir.path().join("t")),
            Err(SetupError::SourceNotDirectory(_))
        ));
        assert!(matches!(
            validate_roots(&src, &dir.path().join("file")),
            Err(SetupError::TargetNotDirectory(_))
        ));
        assert!(matches!(validate_roots(&src, &src.join(".")), Err(SetupError::SamePath(_))));
        assert!(matches!(
            validate_roots(&src, &src.join("inner")),
            Err(SetupError::TargetInsideSource { .. })
        ));
        assert!(matches!(
            validate_roots(&src, dir.path()),
            Err(SetupError::SourceInsideTarget { .. })
        ));
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_not_nested() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        assert!(validate_roots(&dir.path().join("data"), &dir.path().join("data-backup")).is_ok());
    }

    #[tokio::test]
    async fn test_run_converges_and_reports() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        let target = dir.path().join("dst");
        fs::create_dir_all(source.join("docs")).unwrap();
        fs::write(source.join("docs/readme.md"), b"hello").unwrap();
        fs::write(source.join("skip.log"), b"noise").unwrap();

        let recorder = Arc::new(StatusRecorder::default());
        let engine = SyncEngine::new(SyncConfig {
            exclude: vec!["*.log".to_string()],
            ..Default::default()
        })
        .with_progress(recorder.clone());

        let report = engine.run(&source, &target).await.unwrap();

        assert_eq!(report.status, SyncStatus::Completed);
        assert_eq!(report.planned_adds, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(report.bytes_transferred, 5);
        assert!(!report.has_errors());
        assert_eq!(fs::read(target.join("docs/readme.md")).unwrap(), b"hello");
        assert!(!target.join("skip.log").exists());
        assert_eq!(
            *recorder.seen.lock(),
            vec![
                SyncStatus::Scanning,
                SyncStatus::Comparing,
                SyncStatus::Syncing,
                SyncStatus::Completed
            ]
        );

        let again = engine.analyze(&source, &target).await.unwrap();
        assert!(again.plan.is_empty());
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported_as_failed() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(StatusRecorder::default());
        let engine = SyncEngine::new(SyncConfig::default()).with_progress(recorder.clone());

        let err = engine
            .analyze(&dir.path().join("missing"), &dir.path().join("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Setup(SetupError::SourceMissing(_))));
        assert_eq!(*recorder.seen.lock(), vec![SyncStatus::Failed]);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let now = Utc::now();
        let report = SyncReport {
            run_id: "r".to_string(),
            source: PathBuf::from("/a"),
            target: PathBuf::from("/b"),
            start_time: now,
            end_time: now,
            duration_ms: 0,
            status: SyncStatus::Completed,
            source_entries: 1,
            target_entries: 0,
            planned_adds: 1,
            planned_updates: 0,
            planned_deletes: 0,
            applied: 1,
            skipped: 0,
            failed: 0,
            bytes_transferred: 3,
            scan_warnings: 0,
            comparison_warnings: 0,
            errors: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["bytesTransferred"], 3);
        assert_eq!(json["status"], "completed");
        assert!(json.get("startTime").is_some());
    }
}
