use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::SimError;

/// What to do when a species location cannot be resolved against the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Log and skip the change.
    #[default]
    Warn,
    /// Abort the run with [`SimError::UnresolvedLocation`].
    Fail,
}

/// Engine settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for the random stream; drawn at random and logged when absent.
    pub seed: Option<u64>,
    pub unresolved_locations: UnresolvedPolicy,
    /// Clock value the run starts from, e.g. when resuming from a saved state.
    pub start_seconds: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            unresolved_locations: UnresolvedPolicy::Warn,
            start_seconds: 0.0,
        }
    }
}

/// Periodic sampling plan for [`crate::Simulation::run_sampled`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub total_seconds: f64,
    pub chunk_seconds: f64,
    pub species: Vec<String>,
    /// Report sample times in hours instead of seconds.
    pub use_hours: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            total_seconds: 3600.0,
            chunk_seconds: 60.0,
            species: Vec::new(),
            use_hours: false,
        }
    }
}

/// Top-level run file: engine settings plus the sampling plan.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub simulation: SimulationConfig,
    pub sampling: SamplingConfig,
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> Result<Self, SimError> {
        serde_json::from_str(text).map_err(|err| SimError::Config(err.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Load from a JSON file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    tracing::info!("loaded run configuration from {:?}", path.as_ref());
                    config
                }
                Err(e) => {
                    tracing::warn!("failed to parse run configuration: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("run configuration file not found, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config = RunConfig::from_json_str(
            r#"{"simulation": {"seed": 42, "unresolved_locations": "fail"},
                "sampling": {"species": ["a", "b"], "use_hours": true}}"#,
        )
        .unwrap();
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.simulation.unresolved_locations, UnresolvedPolicy::Fail);
        assert_eq!(config.simulation.start_seconds, 0.0);
        assert_eq!(config.sampling.species, ["a", "b"]);
        assert!(config.sampling.use_hours);
        assert_eq!(config.sampling.chunk_seconds, 60.0);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RunConfig::from_json_str("{\"simulation\": 3}").unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = RunConfig::load_or_default("/nonexistent/run.json");
        assert_eq!(config, RunConfig::default());
        assert!(matches!(RunConfig::load("/nonexistent/run.json"), Err(SimError::Io(_))));
    }
}
