//! Terminal output: plan summaries, run reports and the copy progress bar

use crate::core::planner::{Action, ActionKind, Plan};
use crate::core::progress::{ProgressObserver, SyncStatus};
use crate::core::{SyncAnalysis, SyncReport};
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};

fn action_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Add => "[ADD   ]",
        ActionKind::Update => "[UPDATE]",
        ActionKind::Delete => "[DELETE]",
    }
}

pub fn format_action(action: &Action) -> String {
    let marker = if action.is_dir() { "/" } else { "" };
    format!("{} {}{}", action_label(action.kind), action.relative_path, marker)
}

/// Summary lines followed by at most `sample_limit` actions.
pub fn plan_lines(plan: &Plan, sample_limit: usize) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Plan: {} to add, {} to update, {} to delete ({} actions)",
            plan.adds,
            plan.updates,
            plan.deletes,
            plan.len()
        ),
        format!("Data to copy: {}", HumanBytes(plan.total_copy_bytes())),
    ];

    lines.extend(plan.actions.iter().take(sample_limit).map(format_action));

    let hidden = plan.len().saturating_sub(sample_limit);
    if hidden > 0 {
        lines.push(format!("... and {} more actions", hidden));
    }
    lines
}

pub fn print_analysis(analysis: &SyncAnalysis, sample_limit: usize) {
    println!("Source: {} ({} entries)", analysis.source_root.display(), analysis.source_entries);
    println!("Target: {} ({} entries)", analysis.target_root.display(), analysis.target_entries);
    if analysis.warning_count() > 0 {
        println!(
            "Warnings: {} unreadable, {} compared conservatively",
            analysis.scan_warnings.len(),
            analysis.comparison_warnings.len()
        );
    }
    for line in plan_lines(&analysis.plan, sample_limit) {
        println!("{}", line);
    }
}

pub fn print_report(report: &SyncReport) {
    println!(
        "Applied {} actions, copied {} in {:.1}s",
        report.applied,
        HumanBytes(report.bytes_transferred),
        report.duration_ms as f64 / 1000.0
    );
    if report.skipped > 0 {
        println!("Skipped {} actions", report.skipped);
    }
    if report.has_errors() {
        eprintln!("{} actions failed:", report.failed);
        for error in &report.errors {
            eprintln!("  {}", error);
        }
    }
}

/// Byte progress bar drawn on stderr while the plan is applied.
///
/// Stays hidden until the apply phase starts so it never overlaps the plan
/// summary or the confirmation prompt.
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_apply_started(&self, _total_actions: usize, total_bytes: u64) {
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            self.bar.set_style(style.progress_chars("#>-"));
        }
        self.bar.set_length(total_bytes);
        self.bar.set_position(0);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }

    fn on_file_started(&self, relative_path: &str, _size: u64) {
        self.bar.set_message(format!("Copying: {}", relative_path));
    }

    fn on_bytes_copied(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn on_status(&self, status: SyncStatus, _message: &str) {
        if matches!(status, SyncStatus::Completed | SyncStatus::Failed) {
            self.bar.finish_and_clear();
        }
    }
}
