use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Tuning for the per-round search budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryScalingConfig {
    /// Budget of the first round of a scan.
    pub initial: usize,
    /// Growth factor applied after every round.
    pub factor: f64,
    /// Upper bound for any single round.
    pub max: usize,
}

impl Default for QueryScalingConfig {
    fn default() -> Self {
        Self {
            initial: 10,
            factor: 1.5,
            max: 100,
        }
    }
}

/// Scanner configuration.
///
/// Every field has a default, so a config file only needs the values it
/// wants to override:
///
/// ```json
/// { "query_scaling": { "max": 250 }, "max_allowed_block_delta": 20 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub query_scaling: QueryScalingConfig,

    /// Minimum number of search keys handed to each selected epoch.
    /// Capped by the round budget.
    pub min_outputs_per_epoch: usize,

    /// Max tolerated gap between the view service, the ledger and consensus.
    pub max_allowed_block_delta: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            query_scaling: QueryScalingConfig::default(),
            min_outputs_per_epoch: 2,
            max_allowed_block_delta: 10,
        }
    }
}

impl ScanConfig {
    /// Loads a JSON config file and validates it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scan config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing scan config {}", path.display()))?;
        config.validate()?;

        log::info!("[CONFIG] Loaded scan config from {}", path.display());
        log::debug!("[CONFIG] {:?}", config);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scaling = &self.query_scaling;
        if scaling.initial == 0 {
            bail!("query_scaling.initial must be > 0");
        }
        if scaling.max < scaling.initial {
            bail!(
                "query_scaling.max ({}) must be >= query_scaling.initial ({})",
                scaling.max,
                scaling.initial
            );
        }
        if !scaling.factor.is_finite() || scaling.factor < 1.0 {
            bail!("query_scaling.factor must be a finite number >= 1.0");
        }
        if self.max_allowed_block_delta == 0 {
            bail!("max_allowed_block_delta must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_reference_scaling() {
        let config = ScanConfig::default();
        assert_eq!(config.query_scaling.initial, 10);
        assert_eq!(config.query_scaling.max, 100);
        assert_eq!(config.min_outputs_per_epoch, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.json");
        std::fs::write(&path, r#"{ "query_scaling": { "max": 250 } }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.query_scaling.max, 250);
        assert_eq!(config.query_scaling.initial, 10);
        assert_eq!(config.max_allowed_block_delta, 10);
    }

    #[test]
    fn rejects_shrinking_factor() {
        let mut config = ScanConfig::default();
        config.query_scaling.factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(ScanConfig::load(&dir.path().join("nope.json")).is_err());
    }
}
