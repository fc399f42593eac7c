//! Configuration for sluice
//!
//! Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for sluice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// HTTP transport configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Startup initialization configuration
    #[serde(default)]
    pub initialization: InitializationConfig,

    /// Backend runtime configuration
    #[serde(default)]
    pub backend: BackendConfig,
}

impl SluiceConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.queue.validate()?;
        self.initialization.validate()?;
        self.backend.validate()?;
        Ok(())
    }

    /// Create from environment variables, falling back to defaults
    ///
    /// Reads:
    /// - `SLUICE_BIND_ADDRESS`: full bind address (default: "0.0.0.0:8080")
    /// - `SLUICE_PORT`: port only, combined with host 0.0.0.0
    /// - `SLUICE_QUEUE_CAPACITY`: admission queue capacity
    /// - `SLUICE_INITIALIZATION_RECIPE_URL`: recipe URL
    /// - `SLUICE_DUMMY_INITIALIZATION`: skip real initialization (tests only)
    /// - `SLUICE_BACKEND_WORKDIR`: directory the bundle is installed into
    /// - `SLUICE_BACKEND_ENTRYPOINT`: whitespace separated argv
    /// - `SLUICE_EXEC_TIMEOUT_MS`: per-execution timeout
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(address) = std::env::var("SLUICE_BIND_ADDRESS") {
            config.server.bind_address = address;
        } else if let Some(port) = env_parse::<u16>("SLUICE_PORT") {
            config.server.bind_address = format!("0.0.0.0:{}", port);
        }

        if let Some(capacity) = env_parse::<usize>("SLUICE_QUEUE_CAPACITY") {
            config.queue.capacity = capacity;
        }

        config.initialization.recipe_url = std::env::var("SLUICE_INITIALIZATION_RECIPE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        if let Some(dummy) = env_parse::<bool>("SLUICE_DUMMY_INITIALIZATION") {
            config.initialization.dummy = dummy;
        }

        if let Ok(workdir) = std::env::var("SLUICE_BACKEND_WORKDIR") {
            config.backend.workdir = workdir;
        }

        if let Ok(entrypoint) = std::env::var("SLUICE_BACKEND_ENTRYPOINT") {
            let argv: Vec<String> = entrypoint.split_whitespace().map(str::to_string).collect();
            if !argv.is_empty() {
                config.backend.entrypoint = Some(argv);
            }
        }

        if let Some(timeout_ms) = env_parse::<u64>("SLUICE_EXEC_TIMEOUT_MS") {
            config.backend.exec_timeout_ms = timeout_ms;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    SERVER_BIND_ADDRESS_DEFAULT.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if !self.bind_address.contains(':') {
            return Err(Error::InvalidConfiguration {
                field: "server.bind_address".into(),
                reason: "must be in host:port format".into(),
            });
        }
        Ok(())
    }
}

/// Admission queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of requests buffered before new ones are rejected
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    QUEUE_CAPACITY_COUNT_DEFAULT
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfiguration {
                field: "queue.capacity".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.capacity > QUEUE_CAPACITY_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "queue.capacity".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.capacity, QUEUE_CAPACITY_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}

/// How the backend runtime is prepared before traffic is admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializationMode {
    /// No-op initialization, for local and test runs
    Dummy,
    /// Fetch and install the bundle described by the recipe at this URL
    Recipe(String),
    /// No recipe configured, serve with whatever the backend already has
    Skip,
}

/// Startup initialization configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializationConfig {
    /// URL of the initialization recipe document
    #[serde(default)]
    pub recipe_url: Option<String>,

    /// Use the no-op initializer (tests only)
    #[serde(default)]
    pub dummy: bool,
}

impl InitializationConfig {
    /// Resolve which initializer the orchestrator runs
    pub fn mode(&self) -> InitializationMode {
        if self.dummy {
            return InitializationMode::Dummy;
        }

        match &self.recipe_url {
            Some(url) => InitializationMode::Recipe(url.clone()),
            None => InitializationMode::Skip,
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.recipe_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidConfiguration {
                    field: "initialization.recipe_url".into(),
                    reason: "must be an http or https URL".into(),
                });
            }
        }
        Ok(())
    }
}

/// Backend runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Directory the backend bundle is installed into
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Command line that runs one execution (may also come from the recipe)
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,

    /// Timeout for a single execution (milliseconds)
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,

    /// Maximum size of a single execution result
    #[serde(default = "default_output_bytes_max")]
    pub output_bytes_max: usize,
}

fn default_workdir() -> String {
    std::env::temp_dir()
        .join("sluice-backend")
        .to_string_lossy()
        .into_owned()
}

fn default_exec_timeout_ms() -> u64 {
    EXECUTION_TIMEOUT_MS_DEFAULT
}

fn default_output_bytes_max() -> usize {
    RESULT_SIZE_BYTES_MAX
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            entrypoint: None,
            exec_timeout_ms: default_exec_timeout_ms(),
            output_bytes_max: default_output_bytes_max(),
        }
    }
}

impl BackendConfig {
    fn validate(&self) -> Result<()> {
        if self.workdir.is_empty() {
            return Err(Error::InvalidConfiguration {
                field: "backend.workdir".into(),
                reason: "must not be empty".into(),
            });
        }

        if matches!(&self.entrypoint, Some(argv) if argv.is_empty()) {
            return Err(Error::InvalidConfiguration {
                field: "backend.entrypoint".into(),
                reason: "must name a program".into(),
            });
        }

        if self.exec_timeout_ms == 0 || self.exec_timeout_ms > EXECUTION_TIMEOUT_MS_MAX {
            return Err(Error::InvalidConfiguration {
                field: "backend.exec_timeout_ms".into(),
                reason: format!("must be in 1..={}", EXECUTION_TIMEOUT_MS_MAX),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SluiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.capacity, QUEUE_CAPACITY_COUNT_DEFAULT);
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let mut config = SluiceConfig::default();
        config.queue.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration { field, .. }) if field == "queue.capacity"
        ));
    }

    #[test]
    fn test_capacity_over_limit_is_invalid() {
        let mut config = SluiceConfig::default();
        config.queue.capacity = QUEUE_CAPACITY_COUNT_MAX + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recipe_url_must_be_http() {
        let mut config = SluiceConfig::default();
        config.initialization.recipe_url = Some("ftp://example.com/recipe".into());
        assert!(config.validate().is_err());

        config.initialization.recipe_url = Some("https://example.com/recipe".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_initialization_mode() {
        let mut init = InitializationConfig::default();
        assert_eq!(init.mode(), InitializationMode::Skip);

        init.recipe_url = Some("https://example.com/recipe".into());
        assert_eq!(
            init.mode(),
            InitializationMode::Recipe("https://example.com/recipe".into())
        );

        // dummy wins over a configured recipe
        init.dummy = true;
        assert_eq!(init.mode(), InitializationMode::Dummy);
    }

    #[test]
    fn test_empty_entrypoint_is_invalid() {
        let mut config = SluiceConfig::default();
        config.backend.entrypoint = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_partial_sections() {
        let config: SluiceConfig =
            serde_json::from_str(r#"{ "queue": { "capacity": 3 } }"#).unwrap();
        assert_eq!(config.queue.capacity, 3);
        assert_eq!(config.server.bind_address, SERVER_BIND_ADDRESS_DEFAULT);
        assert!(!config.initialization.dummy);
    }
}
