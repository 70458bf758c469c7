use clap::Parser;
use std::process::ExitCode;
use syncdir_lib::commands::sync::{self, SyncArgs};
use syncdir_lib::config::{self, AppConfig};
use syncdir_lib::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args = SyncArgs::parse();

    let config_dir = config::config_dir();
    let app_config = AppConfig::load(&config_dir);

    // flushes the log file on exit
    let _log_guard = logging::init_logging(
        args.verbosity.map(|v| v.as_str()),
        &app_config.log,
        &logging::get_log_dir(),
    );

    match sync::run(args, app_config, &config_dir).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
