use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid cycle_millis: {0}. Must be positive")]
    InvalidCycleMillis(u64),

    #[error("Invalid rpc timeout: {0}. Must be positive")]
    InvalidRpcTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Actor has no name")]
    UnnamedActor,

    #[error("Duplicate actor name: {0}")]
    DuplicateActorName(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .lattice/config.yaml (project config)
    /// 3. .lattice/local.yaml (local overrides, optional)
    /// 4. Environment variables (`LATTICE_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".lattice/config.yaml"))
            .merge(Yaml::file(".lattice/local.yaml"))
            .merge(Env::prefixed("LATTICE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.time.cycle_millis == 0 {
            return Err(ConfigError::InvalidCycleMillis(config.time.cycle_millis));
        }

        if config.rpc.timeout_seconds == 0 {
            return Err(ConfigError::InvalidRpcTimeout(config.rpc.timeout_seconds));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let mut names = std::collections::HashSet::new();
        for actor in &config.actors {
            if actor.name.is_empty() {
                return Err(ConfigError::UnnamedActor);
            }
            if !names.insert(actor.name.as_str()) {
                return Err(ConfigError::DuplicateActorName(actor.name.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ActorConfig, ActorRole};

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn zero_cycle_rejected() {
        let mut config = Config::default();
        config.time.cycle_millis = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCycleMillis(0))
        ));
    }

    #[test]
    fn duplicate_actor_names_rejected() {
        let mut config = Config::default();
        let actor = ActorConfig {
            name: "site".into(),
            role: ActorRole::Authority,
            policy: "default".into(),
            description: None,
        };
        config.actors.push(actor.clone());
        config.actors.push(actor);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateActorName(_))
        ));
    }

    #[test]
    fn yaml_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("lattice-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            "time:\n  cycle_millis: 500\n  manual: true\nactors:\n  - name: broker\n    role: broker\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.time.cycle_millis, 500);
        assert!(config.time.manual);
        assert_eq!(config.actors.len(), 1);
        assert_eq!(config.actors[0].policy, "default");

        std::fs::remove_dir_all(&dir).ok();
    }
}
