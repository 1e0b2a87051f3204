use env_logger::{Builder, Target};
use log::LevelFilter;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub fn setup_logging() {
    let mut builder = Builder::from_default_env();

    builder
        .target(Target::Stdout)
        .filter_level(LevelFilter::Info)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}

/// Suppresses repeats of the same message key inside a time window.
///
/// Noisy failure paths (a peer flooding malformed datagrams, a dead broadcast
/// route) log once per window instead of once per packet. Callers decide what
/// to log; this only decides whether to emit it now.
pub struct LogThrottle {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// True when the caller should emit `key` now; false while suppressed.
    pub fn should_log(&self, key: &str) -> bool {
        let mut last = self.last.lock().unwrap();
        let now = Instant::now();
        match last.get(key) {
            Some(prev) if now.duration_since(*prev) < self.window => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }
}
