use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Tunables of a [`Database`](crate::Database) or
/// [`AsyncDatabase`](crate::AsyncDatabase).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdmConfig {
    /// Capacity of the reference dedup cache owned by each query set.
    pub reference_cache_size: usize,
    /// Queued operations that trigger an automatic bulk flush.
    pub bulk_batch_size: usize,
    pub bulk_ordered: bool,
    /// Surface per-item bulk failures as an error instead of only reporting
    /// them in the result.
    pub bulk_raise_on_error: bool,
    /// Depth passed to fake-data generation when none is given.
    pub fake_depth: i32,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            reference_cache_size: 1000,
            bulk_batch_size: 1000,
            bulk_ordered: true,
            bulk_raise_on_error: true,
            fake_depth: 1,
        }
    }
}

impl OdmConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.bulk_batch_size == 0 {
            return Err(SdkError::InvalidConfig(
                "bulk_batch_size must be at least 1".into(),
            ));
        }
        if self.reference_cache_size == 0 {
            return Err(SdkError::InvalidConfig(
                "reference_cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = OdmConfig::default();
        assert_eq!(c.reference_cache_size, 1000);
        assert_eq!(c.bulk_batch_size, 1000);
        assert!(c.bulk_ordered);
        assert!(c.bulk_raise_on_error);
        assert_eq!(c.fake_depth, 1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = OdmConfig::from_toml_str("bulk_batch_size = 10\nbulk_ordered = false\n").unwrap();
        assert_eq!(c.bulk_batch_size, 10);
        assert!(!c.bulk_ordered);
        assert_eq!(c.reference_cache_size, 1000);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = OdmConfig::from_toml_str("bulk_batch_size = 0").unwrap_err();
        assert!(matches!(err, SdkError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = OdmConfig::from_toml_str("bulk_batch_size = \"many\"").unwrap_err();
        assert!(matches!(err, SdkError::Config(_)));
    }

    #[test]
    fn toml_round_trip() {
        let c = OdmConfig {
            fake_depth: 3,
            ..OdmConfig::default()
        };
        let text = toml::to_string(&c).unwrap();
        assert_eq!(OdmConfig::from_toml_str(&text).unwrap(), c);
    }
}
