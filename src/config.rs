//! # Configuration
//!
//! Layered the way the teacher's original `config.rs` already layered a
//! single RTSP URL: built-in defaults, overridden by an optional TOML file,
//! overridden by environment variables. Extended here to what the engine
//! actually needs — adapter selection, data directory, rewrite cadence, and
//! logging.

use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

lazy_static! {
    static ref CONFIG: RwLock<EngineConfig> = RwLock::new(EngineConfig::load());
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter`-compatible level/directive string.
    pub level: String,
    /// Emit newline-delimited JSON instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// DVB adapter index (`/dev/dvb/adapter<N>`).
    pub adapter: u32,
    /// Directory holding `adapter<N>.db` and the shell history file.
    pub data_dir: PathBuf,
    /// How often the service filter re-emits synthesised PAT/PMT packets.
    pub rewrite_cadence_ms: u64,
    /// Conservative MTU used to size UDP delivery-method datagrams.
    pub udp_mtu: usize,
    /// Maximum number of services whose PMT is actively monitored per mux.
    pub max_monitored_services: usize,
    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            data_dir: default_data_dir(),
            rewrite_cadence_ms: 400,
            udp_mtu: 1400,
            max_monitored_services: 256,
            log: LogConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "dvbengine")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./dvbengine-data"))
}

impl EngineConfig {
    fn load() -> Self {
        let mut config = EngineConfig::default();

        for path in ["./config.toml", "./dvbengine.toml"] {
            config.apply_file(path);
        }

        if let Ok(v) = env::var("DVBENGINE_ADAPTER") {
            if let Ok(n) = v.parse() {
                config.adapter = n;
            }
        }
        if let Ok(v) = env::var("DVBENGINE_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("DVBENGINE_LOG") {
            config.log.level = v;
        }
        if let Ok(v) = env::var("DVBENGINE_REWRITE_CADENCE_MS") {
            if let Ok(n) = v.parse() {
                config.rewrite_cadence_ms = n;
            }
        }

        config
    }

    fn apply_file<P: AsRef<Path>>(&mut self, path: P) {
        let Ok(mut file) = File::open(path) else {
            return;
        };
        let mut content = String::new();
        if file.read_to_string(&mut content).is_err() {
            return;
        }
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key {
                "adapter" => {
                    if let Ok(n) = value.parse() {
                        self.adapter = n;
                    }
                }
                "data_dir" => self.data_dir = PathBuf::from(value),
                "rewrite_cadence_ms" => {
                    if let Ok(n) = value.parse() {
                        self.rewrite_cadence_ms = n;
                    }
                }
                "udp_mtu" => {
                    if let Ok(n) = value.parse() {
                        self.udp_mtu = n;
                    }
                }
                "log_level" => self.log.level = value.to_string(),
                "log_json" => self.log.json = value == "true",
                _ => {}
            }
        }
    }

    /// Re-reads configuration from the environment and config files.
    pub fn reload() {
        let new_config = EngineConfig::load();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }

    /// Returns the path of the SQLite database for this engine's adapter.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("adapter{}.db", self.adapter))
    }

    /// Returns the path of the operator shell's history file.
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.txt")
    }
}

/// Returns a clone of the current global configuration.
pub fn get() -> EngineConfig {
    CONFIG.read().unwrap().clone()
}

/// Creates a default config template file if it doesn't exist.
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# dvbengine configuration template.
# Copy to config.toml next to the binary and fill in your values.

adapter = 0
rewrite_cadence_ms = 400
udp_mtu = 1400
log_level = "info"
log_json = false
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.rewrite_cadence_ms, 400);
        assert_eq!(config.udp_mtu, 1400);
        assert_eq!(config.max_monitored_services, 256);
    }

    #[test]
    fn store_path_includes_adapter_index() {
        let mut config = EngineConfig::default();
        config.adapter = 2;
        config.data_dir = PathBuf::from("/tmp/dvbengine-test");
        assert_eq!(
            config.store_path(),
            PathBuf::from("/tmp/dvbengine-test/adapter2.db")
        );
    }
}
