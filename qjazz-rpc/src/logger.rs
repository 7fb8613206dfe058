use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    level: log::LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: log::LevelFilter::Info,
        }
    }
}

impl Logging {
    pub(crate) fn init(&self) {
        use std::io::Write;

        // Show the log target from debug level up
        let with_target = self.level >= log::LevelFilter::Debug;

        env_logger::Builder::new()
            .filter_level(self.level)
            .format(move |buf, record| {
                if with_target {
                    writeln!(
                        buf,
                        "{} {:5} ({}) {}",
                        buf.timestamp_millis(),
                        record.level(),
                        record.target(),
                        record.args(),
                    )
                } else {
                    writeln!(
                        buf,
                        "{} {:5} {}",
                        buf.timestamp(),
                        record.level(),
                        record.args(),
                    )
                }
            })
            .init();
    }
}
