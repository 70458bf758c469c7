use crate::core::digest::ContentDigest;
use crate::core::entry::{path_depth, Entry, Mapping};
use crate::core::error::ComparisonWarning;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// What to do with one relative path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Present in source, absent in target
    Add,
    /// Files on both sides whose content differs
    Update,
    /// Present in target, absent in source
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Add => write!(f, "add"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Delete => write!(f, "delete"),
        }
    }
}

/// One classified operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub kind: ActionKind,
    pub relative_path: String,
    /// Set for Add and Update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_entry: Option<Entry>,
    /// Set for Update and Delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_entry: Option<Entry>,
}

impl Action {
    pub fn add(source: &Entry) -> Self {
        Self {
            kind: ActionKind::Add,
            relative_path: source.relative_path.clone(),
            source_entry: Some(source.clone()),
            target_entry: None,
        }
    }

    pub fn update(source: &Entry, target: &Entry) -> Self {
        Self {
            kind: ActionKind::Update,
            relative_path: source.relative_path.clone(),
            source_entry: Some(source.clone()),
            target_entry: Some(target.clone()),
        }
    }

    pub fn delete(target: &Entry) -> Self {
        Self {
            kind: ActionKind::Delete,
            relative_path: target.relative_path.clone(),
            source_entry: None,
            target_entry: Some(target.clone()),
        }
    }

    /// Whether the node this action produces or removes is a directory.
    pub fn is_dir(&self) -> bool {
        match self.kind {
            ActionKind::Delete => self.target_entry.as_ref().is_some_and(|e| e.is_dir),
            _ => self.source_entry.as_ref().is_some_and(|e| e.is_dir),
        }
    }

    /// Bytes the executor will copy for this action.
    pub fn copy_bytes(&self) -> u64 {
        match (self.kind, &self.source_entry) {
            (ActionKind::Add | ActionKind::Update, Some(src)) if !src.is_dir => src.size,
            _ => 0,
        }
    }
}

/// Ordered actions for one run plus summary counts.
///
/// Deletes come first, deepest path first. Adds and updates follow in
/// ascending path order, so a directory precedes its contents.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub actions: Vec<Action>,
    pub adds: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl Plan {
    pub fn from_actions(mut actions: Vec<Action>) -> Self {
        sort_actions(&mut actions);
        let mut plan = Plan {
            actions: Vec::new(),
            adds: 0,
            updates: 0,
            deletes: 0,
        };
        for action in &actions {
            match action.kind {
                ActionKind::Add => plan.adds += 1,
                ActionKind::Update => plan.updates += 1,
                ActionKind::Delete => plan.deletes += 1,
            }
        }
        plan.actions = actions;
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn total_copy_bytes(&self) -> u64 {
        self.actions.iter().map(Action::copy_bytes).sum()
    }
}

/// Deletes first (deepest first, then by path), then adds and updates by path.
pub fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| {
        let a_delete = a.kind == ActionKind::Delete;
        let b_delete = b.kind == ActionKind::Delete;
        match (a_delete, b_delete) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => path_depth(&b.relative_path)
                .cmp(&path_depth(&a.relative_path))
                .then_with(|| a.relative_path.cmp(&b.relative_path)),
            (false, false) => a.relative_path.cmp(&b.relative_path),
        }
    });
}

/// Result of comparing two files by metadata alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// Same size and same truncated modification time
    Equal,
    /// Size differs
    Different,
    /// Same size, modification time differs; needs a content digest
    Inconclusive,
}

/// Comparison settings
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Allowed gap between whole-second modification times. 0 means the
    /// truncated times must be equal.
    pub time_tolerance_seconds: i64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 0,
        }
    }
}

/// Plan plus the comparison warnings raised while building it
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub warnings: Vec<ComparisonWarning>,
}

/// Classifies every path of two mappings into actions.
///
/// Runs on the calling thread; digests are requested one at a time and only
/// for inconclusive comparisons.
pub struct Planner<'a> {
    config: CompareConfig,
    digest: &'a dyn ContentDigest,
}

impl<'a> Planner<'a> {
    pub fn new(digest: &'a dyn ContentDigest) -> Self {
        Self::with_config(digest, CompareConfig::default())
    }

    pub fn with_config(digest: &'a dyn ContentDigest, config: CompareConfig) -> Self {
        Self { config, digest }
    }

    pub fn compare_files(&self, source: &Entry, target: &Entry) -> FileRelation {
        if source.size != target.size {
            debug!(
                path = %source.relative_path,
                "Size differs (src={}, dst={})",
                source.size,
                target.size
            );
            return FileRelation::Different;
        }

        let time_diff = (source.modified_secs() - target.modified_secs()).abs();
        if time_diff > self.config.time_tolerance_seconds {
            debug!(path = %source.relative_path, "Same size, mtime differs by {}s", time_diff);
            return FileRelation::Inconclusive;
        }

        FileRelation::Equal
    }

    pub fn plan(&self, source: &Mapping, target: &Mapping) -> PlanOutcome {
        info!("Comparing source and target...");

        let mut actions = Vec::new();
        let mut warnings = Vec::new();

        let all_paths: BTreeSet<&String> = source.keys().chain(target.keys()).collect();
        for path in all_paths {
            match (source.get(path), target.get(path)) {
                (Some(src), None) => actions.push(Action::add(src)),
                (None, Some(dst)) => actions.push(Action::delete(dst)),
                (Some(src), Some(dst)) if src.is_dir != dst.is_dir => {
                    debug!(path = %path, "Kind changed from {} to {}", dst.kind_label(), src.kind_label());
                    actions.push(Action::delete(dst));
                    actions.push(Action::add(src));
                }
                (Some(src), Some(dst)) => {
                    if !src.is_dir && self.needs_update(src, dst, &mut warnings) {
                        actions.push(Action::update(src, dst));
                    }
                }
                (None, None) => {}
            }
        }

        let plan = Plan::from_actions(actions);
        info!(
            "Comparison complete. Plan: {} adds, {} updates, {} deletes",
            plan.adds, plan.updates, plan.deletes
        );

        PlanOutcome { plan, warnings }
    }

    fn needs_update(&self, source: &Entry, target: &Entry, warnings: &mut Vec<ComparisonWarning>) -> bool {
        match self.compare_files(source, target) {
            FileRelation::Equal => false,
            FileRelation::Different => true,
            FileRelation::Inconclusive => {
                let src_digest = match self.digest.digest(&source.absolute_path) {
                    Ok(d) => d,
                    Err(e) => return self.assume_changed(source, "source", e, warnings),
                };
                let dst_digest = match self.digest.digest(&target.absolute_path) {
                    Ok(d) => d,
                    Err(e) => return self.assume_changed(source, "target", e, warnings),
                };
                debug!(path = %source.relative_path, "Digest src={} dst={}", src_digest, dst_digest);
                src_digest != dst_digest
            }
        }
    }

    fn assume_changed(
        &self,
        source: &Entry,
        side: &str,
        err: std::io::Error,
        warnings: &mut Vec<ComparisonWarning>,
    ) -> bool {
        let warning = ComparisonWarning {
            relative_path: source.relative_path.clone(),
            message: format!("{} digest failed: {}", side, err),
        };
        warn!("{}", warning);
        warnings.push(warning);
        true
    }
}

/// Plan with default comparison settings.
pub fn plan(source: &Mapping, target: &Mapping, digest: &dyn ContentDigest) -> PlanOutcome {
    Planner::new(digest).plan(source, target)
}
