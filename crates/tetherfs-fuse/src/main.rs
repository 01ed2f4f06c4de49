//! tetherfs mount daemon.
//!
//! Usage: tetherfs <config.json>

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tetherfs_fuse::config::{FsConfig, LogConfig};
use tetherfs_fuse::mount::mount_and_serve;

fn print_usage(prog: &str) {
    eprintln!("Usage: {} <config.json>", prog);
    eprintln!();
    eprintln!("The configuration file names the mount point, the remote");
    eprintln!("roots, the per-remote connection count, the cache directory");
    eprintln!("and the logging sink.");
}

fn init_logging(cfg: &LogConfig) -> anyhow::Result<()> {
    if !cfg.logging {
        return Ok(());
    }
    let filter = EnvFilter::new(if cfg.debug { "debug" } else { "info" });
    if cfg.console {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.path)?;
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
            .with(filter)
            .init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let prog = args.first().map(|s| s.as_str()).unwrap_or("tetherfs");

    if args.len() != 2 || args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage(prog);
        if args.iter().any(|a| a == "-h" || a == "--help") {
            return Ok(());
        }
        std::process::exit(1);
    }

    let config = FsConfig::load(&PathBuf::from(&args[1]))?;
    init_logging(&config.log)?;

    tracing::info!(
        mount_point = %config.mount_point,
        remotes = config.remote_roots.len(),
        "tetherfs starting"
    );

    // The FUSE session owns the main thread; transport tasks live on the
    // runtime's workers.
    let runtime = tokio::runtime::Runtime::new()?;
    mount_and_serve(config, runtime.handle().clone())
}
