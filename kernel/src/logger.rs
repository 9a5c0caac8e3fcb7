//! Kernel logger for the `log` facade.
//!
//! Records are formatted once and kept in a bounded ring, a `dmesg`-style
//! buffer that can be read back with [`recent`]. Hosted builds also echo
//! every record to stderr.

use crate::sync::Mutex;
use alloc::{collections::VecDeque, format, string::String, vec::Vec};
use log::{LevelFilter, Metadata, Record};

/// Number of records the ring keeps.
pub const RING_CAPACITY: usize = 256;

static LOGGER: Logger = Logger {
    ring: Mutex::new(VecDeque::new()),
};

struct Logger {
    ring: Mutex<VecDeque<String>>,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!(
            "{:<5} [{}] {}",
            record.level(),
            record.target(),
            record.args()
        );

        #[cfg(not(target_os = "none"))]
        std::eprintln!("{line}");

        let mut ring = self.ring.lock();
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(line);
    }

    fn flush(&self) {}
}

/// Installs the logger at `level`. Later calls only change the level.
pub fn init(level: LevelFilter) {
    // Fails only if a logger is already installed, which is fine.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// The newest records, oldest first.
pub fn recent() -> Vec<String> {
    LOGGER.ring.lock().iter().cloned().collect()
}

/// Parses a level name such as `"debug"`. Anything unknown turns logging off.
pub fn parse_level(value: &str) -> LevelFilter {
    match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_reach_the_ring() {
        init(LevelFilter::Info);
        init(LevelFilter::Info);
        log::warn!("ring check {}", 42);
        assert!(recent()
            .iter()
            .any(|line| line.starts_with("WARN") && line.ends_with("ring check 42")));
    }

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("loud"), LevelFilter::Off);
    }
}
