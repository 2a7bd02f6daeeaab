//! Configuration for the registry and participant coordinators
//!
//! Plain serde structs with sensible defaults, loadable from a JSON file.

use crate::coordinator::AggregationMode;
use crate::error::Result;
use crate::sharing::RngSecurity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the rendezvous registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ready participants needed before a peer list is published, unless the task overrides it
    pub min_participants: usize,
    /// How long a readiness may stay pending before it is pruned (milliseconds)
    pub ready_timeout_ms: u64,
    /// Capacity of the task publication queue
    pub task_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_participants: 2,
            ready_timeout_ms: 60_000,
            task_queue_capacity: 16,
        }
    }
}

impl RegistryConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Configuration for one participant coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Plain weight exchange or secret-shared exchange
    pub mode: AggregationMode,
    /// Bound of the uniform share distribution; must dominate weight magnitudes
    pub max_share_value: f64,
    /// Randomness required for share generation
    pub rng_security: RngSecurity,
    /// Wait for the assigned identity after connecting (milliseconds)
    pub identity_timeout_ms: u64,
    /// Wait for the peer list after declaring readiness (milliseconds)
    pub ready_timeout_ms: u64,
    /// Wait for peer contributions in each exchange phase (milliseconds)
    pub exchange_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: AggregationMode::Secure,
            max_share_value: 1_000.0,
            rng_security: RngSecurity::Insecure,
            identity_timeout_ms: 5_000,
            ready_timeout_ms: 60_000,
            exchange_timeout_ms: 10_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FedConfig {
    pub registry: RegistryConfig,
    pub coordinator: CoordinatorConfig,
}

impl FedConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FedConfig::default();
        assert_eq!(config.registry.min_participants, 2);
        assert_eq!(config.coordinator.mode, AggregationMode::Secure);
        assert_eq!(config.coordinator.rng_security, RngSecurity::Insecure);
        assert_eq!(config.coordinator.exchange_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FedConfig =
            serde_json::from_str(r#"{ "registry": { "min_participants": 5 } }"#).unwrap();
        assert_eq!(config.registry.min_participants, 5);
        assert_eq!(config.registry.task_queue_capacity, 16);
        assert_eq!(config.coordinator.ready_timeout_ms, 60_000);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("fedshare-config-{}.json", uuid::Uuid::new_v4()));
        let mut config = FedConfig::default();
        config.coordinator.mode = AggregationMode::Plain;
        config.coordinator.max_share_value = 42.0;
        config.save(&path).unwrap();

        let loaded = FedConfig::load(&path).unwrap();
        assert_eq!(loaded.coordinator.mode, AggregationMode::Plain);
        assert!((loaded.coordinator.max_share_value - 42.0).abs() < f64::EPSILON);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FedConfig::load("/nonexistent/fedshare.json"),
            Err(crate::FedError::Io(_))
        ));
    }
}
