use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use confab_sfu::SfuConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sfu: SfuConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted signaling frame, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// In-process media engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of media workers rooms are spread across
    pub workers: usize,
    /// Address advertised in ICE candidates
    pub announced_ip: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            announced_ip: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // CONFAB_SERVER__PORT, CONFAB_SFU__MAX_PEERS_PER_ROOM, ...
        builder = builder.add_source(
            Environment::with_prefix("CONFAB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Collect every configuration problem instead of failing on the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.server.max_message_size < 1024 {
            errors.push("server.max_message_size must be at least 1024 bytes".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }
        if self.engine.workers == 0 {
            errors.push("engine.workers must be at least 1".to_string());
        }
        if self.engine.announced_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "engine.announced_ip is not an IP address: {}",
                self.engine.announced_ip
            ));
        }
        if let Err(sfu_errors) = self.sfu.validate() {
            errors.extend(sfu_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:3000");
        assert_eq!(config.sfu.max_peers_per_room, 50);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.port = 0;
        config.logging.format = "xml".to_string();
        config.engine.workers = 0;
        config.engine.announced_ip = "localhost".to_string();
        config.sfu.media_codecs.clear();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| e.contains("server.port")));
        assert!(errors.iter().any(|e| e.contains("sfu.media_codecs")));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("confab-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[server]\nport = 4443\n\n[sfu]\nmax_rooms = 7\ncreate_room_on_join = true\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.port, 4443);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sfu.max_rooms, 7);
        assert!(config.sfu.create_room_on_join);
        assert_eq!(config.sfu.media_codecs.len(), 2);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/confab.toml")).unwrap();
        assert_eq!(config.server.port, ServerConfig::default().port);
    }
}
