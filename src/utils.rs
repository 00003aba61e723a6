use anyhow::Result;
use chrono::{DateTime, Local};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;

// Utility helpers for the binary: a small file-backed logger so an operator
// session leaves a reviewable trail.

pub struct SimpleLogger {
    log_file: std::fs::File,
}

impl SimpleLogger {
    pub fn new(path: &str) -> Result<Self> {
        let log_file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(SimpleLogger { log_file })
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now: DateTime<Local> = Local::now();
            let line = format!(
                "[{}] {} [{}:{}] {}\n",
                now.format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );
            if let Ok(mut file) = self.log_file.try_clone() {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.log_file.try_clone() {
            let _ = file.flush();
        }
    }
}

/// Route log output to a file when a path is given, otherwise to stderr via
/// env_logger.
pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    match log_file {
        Some(path) => {
            let logger = SimpleLogger::new(path)?;
            log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
        }
        None => {
            env_logger::Builder::new().filter_level(level).init();
        }
    }
    log::info!(
        "Logging initialized at level {} ({} v{})",
        level,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}
