//! BucketKV Server Binary
//!
//! Runs every job in a directory and, when given a registration FIFO,
//! serves subscriber clients at the same time.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use bucketkv::job::run_jobs;
use bucketkv::session::{make_fifo, signal, FifoTransport, SessionManager};
use bucketkv::{Config, Store};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// BucketKV Server
#[derive(Parser, Debug)]
#[command(name = "bucketkv-server")]
#[command(about = "Concurrent bucket-locked key-value store")]
#[command(version)]
struct Args {
    /// Directory containing .job files
    jobs_dir: PathBuf,

    /// Maximum concurrent backups
    max_backups: usize,

    /// Number of job worker threads
    max_threads: usize,

    /// Registration FIFO path (enables client sessions)
    registry_path: Option<PathBuf>,

    /// Maximum concurrent client sessions
    #[arg(short = 's', long, default_value = "4")]
    max_sessions: usize,

    /// Maximum subscriptions per client
    #[arg(long, default_value = "10")]
    max_subscriptions: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bucketkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("BucketKV Server v{}", bucketkv::VERSION);
    tracing::info!("Jobs directory: {}", args.jobs_dir.display());

    let mut builder = Config::builder()
        .jobs_dir(&args.jobs_dir)
        .max_backups(args.max_backups)
        .worker_threads(args.max_threads)
        .max_sessions(args.max_sessions)
        .max_subscriptions(args.max_subscriptions);
    if let Some(registry) = &args.registry_path {
        builder = builder.registry_path(registry);
    }
    let config = builder.build();

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    // Must happen before any thread is spawned so every thread inherits it
    if config.registry_path.is_some() {
        if let Err(e) = signal::block_reset_signal() {
            tracing::error!("Failed to block reset signal: {}", e);
            std::process::exit(1);
        }
    }

    let store = Arc::new(Store::new(config.clone()));
    if let Err(e) = store.init() {
        tracing::error!("Failed to initialize KVS: {}", e);
        std::process::exit(1);
    }

    let registry = match &config.registry_path {
        Some(path) => match start_sessions(&store, &config, path.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to start session server: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    match run_jobs(&store, &config.jobs_dir, config.worker_threads) {
        Ok(summary) => tracing::info!(
            "Processed {} job files ({} failed), {} commands ({} failed), {} backups",
            summary.files,
            summary.failed_files,
            summary.commands,
            summary.failed_commands,
            summary.backups
        ),
        Err(e) => {
            tracing::error!("Failed to open jobs directory: {}", e);
            std::process::exit(1);
        }
    }

    store.wait_for_backups();

    if let Some(registry) = registry {
        if registry.join().is_err() {
            tracing::error!("Registration thread panicked");
        }
    }

    if let Err(e) = store.terminate() {
        tracing::error!("Failed to terminate KVS: {}", e);
    }
    tracing::info!("Server stopped");
}

/// Start the session pool, the reset-signal waiter and the registration reader
fn start_sessions(
    store: &Arc<Store>,
    config: &Config,
    registry_path: PathBuf,
) -> bucketkv::Result<std::thread::JoinHandle<()>> {
    make_fifo(&registry_path)?;
    tracing::info!("Registration FIFO: {}", registry_path.display());

    let manager = Arc::new(SessionManager::new(
        Arc::clone(store),
        Arc::new(FifoTransport),
        config,
    ));
    // session threads live for the whole process
    let _workers = manager.spawn_workers()?;

    let resetter = Arc::clone(&manager);
    std::thread::Builder::new()
        .name("kvs-reset".into())
        .spawn(move || loop {
            match signal::wait_reset_signal() {
                Ok(()) => {
                    resetter.reset();
                }
                Err(e) => {
                    tracing::error!("Reset signal wait failed: {}", e);
                    return;
                }
            }
        })?;

    let handle = std::thread::Builder::new()
        .name("kvs-registry".into())
        .spawn(move || loop {
            // blocks until a client opens the FIFO for writing
            let mut registry = match File::open(&registry_path) {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!("Failed to open {}: {}", registry_path.display(), e);
                    manager.shutdown();
                    return;
                }
            };
            if let Err(e) = manager.serve_registry(&mut registry) {
                tracing::error!("Registration channel failed: {}", e);
                manager.shutdown();
                return;
            }
        })?;

    Ok(handle)
}
