//! Stderr logger.
//!
//! Implements the `log::Log` trait for the wrapper. Level comes from the
//! `-v` count, else from `EXEC_WRAP_LOG`, else warnings only.

use std::io::Write;

use log::{LevelFilter, Metadata, Record};

/// Environment variable holding a level name (`error` .. `trace`).
pub const ENV_LEVEL: &str = "EXEC_WRAP_LOG";

static LOGGER: StderrLogger = StderrLogger;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // A failed write has nowhere to be reported.
            let _ = writeln!(
                std::io::stderr().lock(),
                "exec-wrap: {:<5} {}",
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Level for a `-v` count, falling back to the environment.
pub fn level(verbose: u8, env: Option<&str>) -> LevelFilter {
    match verbose {
        0 => env
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize the logger.
///
/// # Arguments
/// * `max_level` - The maximum log level to display.
pub fn init(max_level: LevelFilter) {
    // Only fails if a logger is already installed; keep that one.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(max_level);
}
