//! Configuration management for the Meridian binary.
//!
//! This module handles loading, validation, and conversion of configuration
//! from TOML files and command-line arguments.

use meridian_core::HostConfig;
use meridian_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_max_connections() -> usize {
    1000
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_handshake_timeout() -> u64 {
    5000
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and host settings
    pub server: ServerSettings,
    /// Sync-context replication settings
    #[serde(default)]
    pub sync: SyncSettings,
    /// Upstream settings used when running as a client
    #[serde(default)]
    pub client: ClientSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a socket may take to finish the WebSocket upgrade
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Host tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Milliseconds allowed for the Syn/SynAck/Ack exchange
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Replicate scalar and array values, not only JSON objects
    #[serde(default)]
    pub replicate_non_objects: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// WebSocket URL of the upstream server; `--connect` overrides it
    pub upstream_url: Option<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            tick_interval_ms: default_tick_interval(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Host settings shared by server and client mode.
    pub fn to_host_config(&self) -> HostConfig {
        HostConfig {
            tick_interval_ms: self.server.tick_interval_ms,
            handshake_timeout_ms: self.server.handshake_timeout_ms,
            replicate_non_objects: self.sync.replicate_non_objects,
        }
    }

    /// Converts the application configuration to a server configuration.
    ///
    /// # Returns
    ///
    /// A `ServerConfig` ready for [`MeridianServer::new`](meridian_server::MeridianServer::new),
    /// or an error if the bind address does not parse.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            host: self.to_host_config(),
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.server.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".to_string());
        }

        if self.server.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be greater than 0".to_string());
        }

        if let Some(url) = &self.client.upstream_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(format!("Upstream URL must use ws:// or wss://: {url}"));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_converts() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config.to_server_config().unwrap();
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.connection_timeout, 60);
        assert_eq!(server_config.host, HostConfig::default());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.bind_address = "127.0.0.1:8080".to_string();
        config.server.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        config.server.tick_interval_ms = 20;
        config.client.upstream_url = Some("http://example.com".to_string());
        assert!(config.validate().is_err());

        config.client.upstream_url = Some("ws://127.0.0.1:8080".to_string());
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        tokio::fs::write(
            &path,
            r#"
[server]
bind_address = "0.0.0.0:9100"

[sync]
replicate_non_objects = true

[logging]
level = "warn"
json_format = true
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.client.upstream_url, None);
        assert!(config.to_host_config().replicate_non_objects);
        assert_eq!(config.to_server_config().unwrap().bind_address.port(), 9100);
    }
}
