use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

use crate::av::clock::UCLOCK_FREQ;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::new());
}

/// Runtime configuration of the pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// SCTE-35 section re-emission interval in 27 MHz ticks
    pub scte35_interval: u64,
    /// Frames buffered per stage before the oldest is dropped
    pub queue_limit: usize,
}

impl Config {
    fn new() -> Self {
        // Default values
        let mut config = Config {
            scte35_interval: UCLOCK_FREQ,
            queue_limit: 64,
        };

        // Try loading from environment variables first
        if let Ok(interval) = env::var("SDIKIT_SCTE35_INTERVAL") {
            if let Ok(interval) = interval.parse() {
                config.scte35_interval = interval;
            }
        }
        if let Ok(limit) = env::var("SDIKIT_QUEUE_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.queue_limit = limit;
            }
        }

        // Then try loading from config file
        let config_paths = ["./config.toml", "./sdikit_config.toml"];
        for path in &config_paths {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    for line in content.lines() {
                        let mut parts = line.splitn(2, '=');
                        let key = parts.next().map(str::trim);
                        let value = parts.next().map(str::trim);
                        match (key, value) {
                            (Some("scte35_interval"), Some(v)) => {
                                if let Ok(v) = v.parse() {
                                    config.scte35_interval = v;
                                }
                            }
                            (Some("queue_limit"), Some(v)) => {
                                if let Ok(v) = v.parse() {
                                    config.queue_limit = v;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        config
    }

    /// Reloads the configuration from the environment and config files
    pub fn reload() {
        let new_config = Config::new();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }
}

/// Returns the configured SCTE-35 interval in 27 MHz ticks
pub fn get_scte35_interval() -> u64 {
    CONFIG.read().unwrap().scte35_interval
}

/// Returns the configured per-stage queue limit
pub fn get_queue_limit() -> usize {
    CONFIG.read().unwrap().queue_limit
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# SDIKIT Configuration
# This is a template. Replace the values with your actual configuration.

# SCTE-35 section re-emission interval, in 27 MHz ticks
scte35_interval = 27000000

# Frames buffered per stage before the oldest is dropped
queue_limit = 64
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
