//! TOML configuration for validation policy and SEED output.
//!
//! ```toml
//! [validation]
//! sensitivity_tolerance = 0.05
//! sample_rate_tolerance = 1e-4
//! unit_comparison = "case-insensitive"
//! normalize_codes = true
//!
//! [seed]
//! record_length = 4096
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::{MetadataError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub seed: SeedConfig,
}

/// How unit names are compared when checking a stage chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitComparison {
    Exact,
    #[default]
    CaseInsensitive,
}

impl UnitComparison {
    pub fn matches(self, a: &str, b: &str) -> bool {
        match self {
            Self::Exact => a == b,
            Self::CaseInsensitive => a.trim().eq_ignore_ascii_case(b.trim()),
        }
    }
}

/// Validator policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Relative tolerance between declared sensitivity and the product of
    /// stage gains before a `SensitivityMismatch` is reported.
    pub sensitivity_tolerance: f64,
    /// Relative tolerance between the channel sample rate and the rate
    /// derived from the decimation chain.
    pub sample_rate_tolerance: f64,
    pub unit_comparison: UnitComparison,
    /// Trim and uppercase codes, and map a `--` location to blank.
    pub normalize_codes: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sensitivity_tolerance: 0.05,
            sample_rate_tolerance: 1e-4,
            unit_comparison: UnitComparison::default(),
            normalize_codes: true,
        }
    }
}

/// Dataless SEED writer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Logical record length in bytes.
    pub record_length: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            record_length: 4096,
        }
    }
}

impl SeedConfig {
    /// Base-2 exponent of the record length, as written in blockette 10.
    pub fn record_length_exponent(&self) -> Result<u8> {
        let len = self.record_length;
        if !len.is_power_of_two() || !(256..=32768).contains(&len) {
            return Err(MetadataError::InvalidConfig(format!(
                "record_length must be a power of two between 256 and 32768, got {len}"
            )));
        }
        Ok(len.trailing_zeros() as u8)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.seed.record_length_exponent()?;
        if config.validation.sensitivity_tolerance < 0.0
            || config.validation.sample_rate_tolerance < 0.0
        {
            return Err(MetadataError::InvalidConfig(
                "tolerances must not be negative".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [validation]
            sensitivity_tolerance = 0.01
            unit_comparison = "exact"

            [seed]
            record_length = 8192
        "#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.validation.sensitivity_tolerance, 0.01);
        assert_eq!(config.validation.unit_comparison, UnitComparison::Exact);
        assert_eq!(config.validation.sample_rate_tolerance, 1e-4);
        assert!(config.validation.normalize_codes);
        assert_eq!(config.seed.record_length_exponent().unwrap(), 13);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.seed.record_length, 4096);
        assert_eq!(config.validation.sensitivity_tolerance, 0.05);
    }

    #[test]
    fn test_rejects_bad_record_length() {
        let err = Config::from_toml_str("[seed]\nrecord_length = 1000\n").unwrap_err();
        assert!(matches!(err, MetadataError::InvalidConfig(_)));
    }

    #[test]
    fn test_unit_comparison() {
        assert!(UnitComparison::CaseInsensitive.matches("m/s", "M/S"));
        assert!(!UnitComparison::Exact.matches("m/s", "M/S"));
    }
}
