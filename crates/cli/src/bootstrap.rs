use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// `--verbose` lowers the default level to debug; `RUST_LOG` still wins when
/// set. With a log path the subscriber appends to that file instead of
/// stdout (ANSI off, since nobody tails colored logs from a file).
pub fn init_logging(verbose: bool, log_path: Option<&str>) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
