mod cli;
mod daemon;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use panwatch_config::Config;

use crate::cli::{Cli, Command};
use crate::error::DaemonError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = panwatch_config::load_config(cli.global.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => {
            print_check(&config);
            Ok(())
        }
        Command::Run => daemon::run(&config).await,
    }
}

fn print_check(config: &Config) {
    let polling = &config.polling;
    let timeout = polling
        .request_timeout()
        .map_or_else(|| "none".to_owned(), |t| format!("{}s", t.as_secs()));
    println!(
        "polling: timeout {timeout}, {} concurrent per appliance, every {}s ({}s interfaces)",
        polling.max_running(),
        polling.tracking_interval_secs,
        polling.ifs_tracking_interval_secs,
    );
    println!(
        "thresholds: cpu {}%, memory {}%, history {}h",
        polling.high_cpu_threshold_pct, polling.high_memory_threshold_pct, polling.max_history_hours,
    );

    if config.appliances.is_empty() {
        println!("no appliances configured");
    }
    for profile in &config.appliances {
        let auth = match panwatch_config::resolve_credentials(profile) {
            Ok(panwatch_core::ApplianceCredentials::ApiKey(_)) => "api key",
            Ok(panwatch_core::ApplianceCredentials::Password { .. }) => "password",
            Err(_) => "MISSING",
        };
        println!(
            "{}  credentials: {auth}  tls: {:?}  optional pollers: {}",
            profile.url,
            profile.tls_mode(),
            profile.optional_pollers.len()
        );
    }
}
