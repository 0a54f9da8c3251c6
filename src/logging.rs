use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
    sync::Mutex,
};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console output on stderr plus an append-only copy in `log_file`.
///
/// Every stage of every run shares the same file. If it cannot be opened the
/// subscriber degrades to console-only instead of failing the run.
pub fn init(log_file: &Path) {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match open_log_file(log_file) {
        Ok(file) => {
            let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            let _ = tracing_subscriber::registry()
                .with(env)
                .with(console)
                .with(file_layer)
                .try_init();
        }
        Err(e) => {
            let _ = tracing_subscriber::registry()
                .with(env)
                .with(console)
                .try_init();
            warn!(file = %log_file.display(), error = %e, "log file unavailable, console only");
        }
    }
}

/// Open `log_file` for appending, creating its directory first. Either step's
/// error is returned as is.
fn open_log_file(log_file: &Path) -> io::Result<File> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(log_file)
}
