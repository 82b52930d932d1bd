use std::sync::{Arc, mpsc};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pkgsync::cli::{Cli, Commands};
use pkgsync::config::SyncSettings;
use pkgsync::service::SyncService;
use pkgsync::sync::{SyncContext, SyncEngine, SyncMode};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = load_settings(&cli)?;
    let ctx = Arc::new(SyncContext::new(settings));

    match cli.command {
        Commands::Pull { override_all } => run_full(&ctx, SyncMode::Pull, override_all),
        Commands::Push { override_all } => run_full(&ctx, SyncMode::Push, override_all),
        Commands::Sync { override_all } => run_full(&ctx, SyncMode::Both, override_all),
        Commands::Item { ref key, direction } => {
            let engine = SyncEngine::new(Arc::clone(&ctx))?;
            let applied = engine.sync_item(direction.into(), key)?;
            println!("{key}: {}", applied.as_str());
            Ok(())
        }
        Commands::Watch => run_watch(ctx),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "pkgsync=debug" } else { "pkgsync=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<SyncSettings> {
    // Both roots on the command line is a complete configuration on its
    // own; no settings file required
    if let (Some(local), Some(remote)) = (cli.local.clone(), cli.remote.clone()) {
        return Ok(SyncSettings::new(local, remote));
    }

    let mut settings = SyncSettings::discover(cli.config.as_deref())?;
    if let Some(local) = cli.local.clone() {
        settings.local_folder = local;
    }
    if let Some(remote) = cli.remote.clone() {
        settings.sync_folder = remote;
    }
    Ok(settings)
}

fn run_full(ctx: &Arc<SyncContext>, mode: SyncMode, override_all: bool) -> anyhow::Result<()> {
    let engine = SyncEngine::new(Arc::clone(ctx))?;
    let report = engine.full_sync(mode, override_all)?;
    print!("{}", report.summary());

    if !report.is_success() {
        anyhow::bail!("sync completed with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn run_watch(ctx: Arc<SyncContext>) -> anyhow::Result<()> {
    let service = SyncService::start(ctx)?;
    service.request_full_sync(SyncMode::Both, false);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set Ctrl+C handler")?;

    println!("Watching for changes, press Ctrl+C to stop");
    rx.recv().context("Interrupt channel closed")?;

    service.shutdown();
    println!("Stopped");
    Ok(())
}
