// src/main.rs

//! # Scanwatch Main Entry Point
//!
//! Loads configuration, sets up logging, connects to the configured media
//! servers and runs the watch engine until Ctrl-C or SIGTERM.

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scanwatch::backend::BackendRegistry;
use scanwatch::config::AppConfig;
use scanwatch::dispatch::Dispatcher;
use scanwatch::scan::ScanRegistry;
use scanwatch::service::RemoteScan;

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default tracing subscriber failed");

    tracing::debug!("Scanwatch starting with configuration: {:?}", app_config);

    let remote_scan = &app_config.remote_scan;
    let registry = ScanRegistry::from_entries(&remote_scan.scans);
    if registry.is_empty() {
        error!("No scans configured, nothing to watch");
        std::process::exit(1);
    }

    if app_config.dry_run {
        for group in registry.iter() {
            let targets: Vec<String> = group
                .targets
                .iter()
                .map(|t| format!("{}({}):{}", t.kind, t.server_name, t.library))
                .collect();
            println!("{}", group.name);
            println!("  targets: {}", targets.join(", "));
            for path in &group.paths {
                println!("  path: {}", path.display());
            }
        }
        return Ok(());
    }

    let mut sigterm = signal(SignalKind::terminate())?;

    // The blocking HTTP clients must be created and dropped off the async runtime.
    let servers = app_config.servers.clone();
    let filter = remote_scan.filter();
    let timings = remote_scan.timings();
    let service = tokio::task::spawn_blocking(move || -> Result<RemoteScan> {
        let backends = BackendRegistry::from_config(&servers);
        if backends.is_empty() {
            warn!("No media servers configured, changes will only be logged");
        }
        let service = RemoteScan::new(registry, filter, timings, Dispatcher::new(backends));
        service.start()?;
        Ok(service)
    })
    .await??;
    info!("Watching {} scan group(s)", service.registry().len());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down."),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down."),
    }

    tokio::task::spawn_blocking(move || service.shutdown()).await?;

    Ok(())
}
