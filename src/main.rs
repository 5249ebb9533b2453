//! Depot - local artifact cache with lazy mirroring
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use depot::cli::args::LogFormat;
use depot::cli::{commands, Cli, Commands};
use depot::config::{Config, ConfigManager};
use depot::error::DepotResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> DepotResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions(args) = cli.command {
        commands::completions(args);
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = config_manager.load().await?;
    apply_overrides(&cli, &mut config);

    init_logging(&cli, &config);
    depot::ui::init_theme();
    debug!("Using store at {}", config.store_root().display());

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Fetch(args) => commands::fetch(args, &config).await,
        Commands::Get(args) => commands::get(args, &config).await,
        Commands::Add(args) => commands::add(args, &config).await,
        Commands::List(args) => commands::list(args, &config).await,
        Commands::Path(args) => commands::path(args, &config).await,
        Commands::Remove(args) => commands::remove(args, &config).await,
        Commands::Verify(args) => commands::verify(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}

fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(ref store) = cli.store {
        config.store.root = Some(store.clone());
    }
    if cli.offline {
        config.mirror.offline = true;
    }
}

/// Logs go to stderr; stdout carries artifact bytes and listings
fn init_logging(cli: &Cli, config: &Config) {
    // 0 = warn, 1 = info, 2+ = debug; DEPOT_LOG overrides
    let filter = EnvFilter::try_from_env("DEPOT_LOG").unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("depot=warn"),
        1 => EnvFilter::new("depot=info"),
        _ => EnvFilter::new("depot=debug"),
    });

    let json = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => config.general.log_format.eq_ignore_ascii_case("json"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
