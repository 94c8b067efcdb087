//! Minimal stderr logger for the `os-emu` binary.
//!
//! Library code only talks to the `log` facade; installing a logger is the
//! binary's choice.

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{LevelFilter, Log, Metadata, Record};

static LOGGER: StderrLogger = StderrLogger::new(LevelFilter::Off);

/// Writes `LEVEL [thread] target: message` lines to stderr.
#[derive(Debug)]
pub struct StderrLogger {
    level: AtomicUsize,
}

impl StderrLogger {
    pub const fn new(level: LevelFilter) -> Self {
        Self {
            level: AtomicUsize::new(level as usize),
        }
    }

    pub fn level(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn set_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }

    /// Install the process-wide logger at `level`. Fails if any logger is
    /// already set.
    pub fn install(level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_logger(&LOGGER)?;
        LOGGER.set_level(level);
        log::set_max_level(level);
        Ok(())
    }

    fn format(record: &Record<'_>) -> String {
        let thread = std::thread::current();
        format!(
            "{:<5} [{}] {}: {}",
            record.level(),
            thread.name().unwrap_or("?"),
            record.target(),
            record.args()
        )
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format(record);
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Parse `off|error|warn|info|debug|trace` (case-insensitive).
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    s.parse().ok()
}
