//! pw-shadow - mirror application audio streams into shadow outputs
//!
//! Watches the PipeWire graph for matching application streams, creates a
//! shadow output stream for each and keeps volume and mute in sync between
//! the two.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use pw_shadow::config::{watcher::ConfigWatcher, AppConfig};
use pw_shadow::paths::AppPaths;

/// Mirror application audio streams into shadow PipeWire outputs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily-rotated logs to the state directory
    #[arg(long)]
    log_file: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect(args.config.as_deref());

    let log_dir = if args.log_file {
        paths.ensure_logs_dir()?;
        Some(paths.logs_dir.as_path())
    } else {
        None
    };
    let _log_guard = init_logging(&args.log_level, log_dir)?;

    info!("Starting pw-shadow v{}...", env!("CARGO_PKG_VERSION"));

    if args.print_config {
        let config = AppConfig::load_or_default(&paths.config).await?;
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let (config_watcher, config) = if paths.config_exists {
        info!("Configuration file: {}", paths.config.display());
        let (watcher, config) = ConfigWatcher::new(paths.config.clone()).await?;
        (Some(watcher), (*config).clone())
    } else {
        info!(
            "No configuration file found, using defaults (create {} to customize)",
            paths.config.display()
        );
        (None, AppConfig::default())
    };

    run_app(config, config_watcher, shutdown_signal()).await?;

    info!("pw-shadow shutdown complete");
    Ok(())
}

#[cfg(feature = "pipewire")]
async fn run_app(
    config: AppConfig,
    mut config_watcher: Option<ConfigWatcher>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    use pw_shadow::graph::pipewire::PipewireBackend;
    use pw_shadow::mirror::AppNameFilter;
    use pw_shadow::{Mirror, MirrorActor, MirrorOptions};
    use tokio::sync::mpsc;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let backend = PipewireBackend::start(events_tx)?;

    let mirror = Mirror::new(
        backend.graph(),
        Box::new(AppNameFilter::from_config(&config.matching)),
        MirrorOptions::from_config(&config),
    );
    let (mirror_handle, mut mirror_task) =
        MirrorActor::spawn(mirror, events_rx, config.stall_after());

    info!(
        "Watching for streams from: {}",
        config.matching.app_names.join(", ")
    );

    tokio::pin!(shutdown);

    let mut task_finished = false;
    loop {
        tokio::select! {
            Some(new_config) = next_config(&mut config_watcher) => {
                info!("Configuration file changed, applying to new streams");
                mirror_handle.apply_config(&new_config);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping mirror");
                break;
            }

            result = &mut mirror_task => {
                if let Err(e) = result {
                    warn!("Mirror task ended abnormally: {}", e);
                } else {
                    warn!("Mirror task ended, audio backend is gone");
                }
                task_finished = true;
                break;
            }
        }
    }

    if !task_finished {
        mirror_handle.shutdown();
        if let Err(e) = mirror_task.await {
            warn!("Mirror task ended abnormally: {}", e);
        }
    }
    backend.stop();

    Ok(())
}

#[cfg(not(feature = "pipewire"))]
async fn run_app(
    _config: AppConfig,
    _config_watcher: Option<ConfigWatcher>,
    _shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    anyhow::bail!(
        "pw-shadow was built without an audio backend; rebuild with `--features pipewire`"
    )
}

/// Next reload from the watcher, or pending forever when not watching
#[cfg_attr(not(feature = "pipewire"), allow(dead_code))]
async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

/// Console logging, plus a daily-rotated file when `log_dir` is set.
///
/// The returned guard flushes the file writer and must outlive the program.
fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pw-shadow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
