//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{Result, ServiceError};

/// Trait for service configuration types.
///
/// Implement this trait for a service's configuration struct to get
/// loading, validation, and access to the logging section.
pub trait ServiceConfig: Sized + DeserializeOwned + Default {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ServiceError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = modlink_common::parse_config(&content)
            .map_err(|e| ServiceError::ConfigParse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load from `path` if given, otherwise start from the defaults.
    ///
    /// Defaults are not validated here; callers apply CLI/environment
    /// overrides first and validate afterwards.
    fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        peers: Vec<String>,
    }

    impl ServiceConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.peers.is_empty() {
                return Err(ServiceError::validation("At least one peer required"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(ServiceError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_config_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.json5");
        std::fs::write(&good, "{ peers: ['10.8.0.2'], logging: { level: 'debug' } }").unwrap();
        let config = TestConfig::load(&good).unwrap();
        assert_eq!(config.peers, vec!["10.8.0.2"]);
        assert_eq!(config.logging().level, "debug");

        let empty = dir.path().join("empty.json5");
        std::fs::write(&empty, "{}").unwrap();
        assert!(matches!(
            TestConfig::load(&empty),
            Err(ServiceError::ConfigValidation(_))
        ));

        let broken = dir.path().join("broken.json5");
        std::fs::write(&broken, "{ peers: [").unwrap();
        assert!(matches!(
            TestConfig::load(&broken),
            Err(ServiceError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config = TestConfig::load_or_default(None).unwrap();
        assert!(config.peers.is_empty());
    }
}
