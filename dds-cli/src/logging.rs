//! Logging setup: stderr plus a per-session log file.
//!
//! The session's logs directory only exists after login, so the file layer
//! writes into a handle that is attached later. Events before that go to
//! stderr only.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Name of the log file inside the session's logs directory.
pub const LOG_FILE: &str = "dds-cli.log";

#[derive(Clone, Default)]
pub struct SessionLog(Arc<Mutex<Option<File>>>);

impl SessionLog {
    /// Starts mirroring log output into `logs_dir/dds-cli.log`.
    pub fn attach(&self, logs_dir: &Path) -> io::Result<()> {
        let file = File::create(logs_dir.join(LOG_FILE))?;
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Some(file);
        Ok(())
    }
}

impl Write for SessionLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock().unwrap_or_else(|p| p.into_inner()).as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock().unwrap_or_else(|p| p.into_inner()).as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init() -> SessionLog {
    let log = SessionLog::default();
    let file_writer = log.clone();

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(move || file_writer.clone()),
        )
        .try_init();
    log
}
