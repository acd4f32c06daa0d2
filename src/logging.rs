use std::path::Path;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber, writing to both stderr and a log
/// file under the results folder. Only called once, from `main` before the
/// supervisor is constructed.
pub fn init(results_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(results_dir)?;
    let log_path = results_dir.join("analysis.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr.and(file))
        .with_ansi(false)
        .init();

    Ok(())
}
