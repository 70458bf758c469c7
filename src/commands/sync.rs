use crate::commands::display::{self, ProgressBarObserver};
use crate::config::{AppConfig, ConfirmDefault};
use crate::core::progress::{NoProgress, ProgressObserver};
use crate::core::SyncEngine;
use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One-way directory synchronization: make TARGET match SOURCE
#[derive(Parser, Debug, Clone)]
#[command(name = "syncdir")]
#[command(author, version, about, long_about = None)]
pub struct SyncArgs {
    /// Directory to copy from
    #[arg(required_unless_present = "write_config")]
    pub source: Option<PathBuf>,

    /// Directory to bring in line with SOURCE; created if missing
    #[arg(required_unless_present = "write_config")]
    pub target: Option<PathBuf>,

    /// Gitignore-style pattern to leave out of the source (repeatable)
    #[arg(short = 'e', long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Print the plan and change nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the plan (with --dry-run) or the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Apply without asking for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Actions applied at the same time
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Threads used to hash files whose timestamps differ
    #[arg(long, value_name = "N")]
    pub digest_workers: Option<usize>,

    /// Log level; overrides the configured one
    #[arg(short = 'v', long, value_enum)]
    pub verbosity: Option<Verbosity>,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Save the effective configuration and exit
    #[arg(long)]
    pub write_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Debug => "debug",
            Verbosity::Info => "info",
            Verbosity::Warn => "warn",
            Verbosity::Error => "error",
        }
    }
}

impl SyncArgs {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(jobs) = self.jobs {
            config.max_concurrency = jobs;
        }
        if let Some(workers) = self.digest_workers {
            config.digest_workers = workers;
        }
        if let Some(verbosity) = self.verbosity {
            config.log.level = verbosity.as_str().to_string();
        }
    }

    fn roots(&self) -> anyhow::Result<(&Path, &Path)> {
        match (&self.source, &self.target) {
            (Some(source), Some(target)) => Ok((source.as_path(), target.as_path())),
            _ => Err(anyhow!("both SOURCE and TARGET are required")),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    DryRun,
    Declined,
    NothingToDo,
    ConfigWritten,
    /// Apply finished but this many actions failed
    CompletedWithErrors(usize),
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::CompletedWithErrors(_) => 2,
            _ => 0,
        }
    }
}

/// Run one sync from parsed arguments and loaded configuration.
pub async fn run(args: SyncArgs, mut config: AppConfig, config_dir: &Path) -> anyhow::Result<Outcome> {
    args.apply_overrides(&mut config);

    if args.write_config {
        let path = config
            .save(config_dir)
            .with_context(|| format!("failed to write configuration to {}", config_dir.display()))?;
        println!("Configuration written to {}", path.display());
        return Ok(Outcome::ConfigWritten);
    }

    let (source, target) = args.roots()?;

    let progress: Arc<dyn ProgressObserver> = if args.no_progress || args.json {
        Arc::new(NoProgress)
    } else {
        Arc::new(ProgressBarObserver::new())
    };
    let engine = SyncEngine::new(config.sync_config(args.exclude.clone())).with_progress(progress);

    let analysis = engine
        .analyze(source, target)
        .await
        .context("sync could not start")?;

    if args.dry_run && args.json {
        println!("{}", serde_json::to_string_pretty(&analysis.plan)?);
        return Ok(Outcome::DryRun);
    }

    if analysis.plan.is_empty() {
        println!("Target is already up to date.");
        return Ok(if args.dry_run { Outcome::DryRun } else { Outcome::NothingToDo });
    }

    display::print_analysis(&analysis, config.sample_limit);

    if args.dry_run {
        println!("Dry run: no changes made.");
        return Ok(Outcome::DryRun);
    }

    if !args.yes {
        let default = config.confirm_default;
        let accepted = tokio::task::spawn_blocking(move || confirm(default))
            .await
            .context("confirmation prompt failed")?
            .context("could not read confirmation")?;
        if !accepted {
            info!("Synchronization declined");
            println!("Synchronization cancelled.");
            return Ok(Outcome::Declined);
        }
    }

    let report = engine.execute(analysis).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display::print_report(&report);
    }

    Ok(if report.has_errors() {
        Outcome::CompletedWithErrors(report.failed)
    } else {
        Outcome::Completed
    })
}

/// Ask on stdin/stdout whether to proceed.
pub fn confirm(default: ConfirmDefault) -> io::Result<bool> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    confirm_with(&mut stdin.lock(), &mut stdout, default)
}

/// Prompt on `output` and read one answer from `input`. End of input declines.
pub fn confirm_with<R: BufRead, W: Write>(input: &mut R, output: &mut W, default: ConfirmDefault) -> io::Result<bool> {
    let hint = match default {
        ConfirmDefault::Accept => "[Y/n]",
        ConfirmDefault::Decline => "[y/N]",
    };
    write!(output, "Proceed with synchronization? {} ", hint)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        writeln!(output)?;
        return Ok(false);
    }
    Ok(parse_answer(&line, default))
}

fn parse_answer(line: &str, default: ConfirmDefault) -> bool {
    match line.trim().to_lowercase().as_str() {
        "" => default == ConfirmDefault::Accept,
        "y" | "yes" => true,
        _ => false,
    }
}
