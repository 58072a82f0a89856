//! YAML Parameter Overrides
//!
//! An optional configuration file tweaks the acquisition parameters without
//! touching the command line. Every field defaults to the built-in value,
//! so a partial file is fine.

use searcher::SearcherConfig;
use serde::{Deserialize, Serialize};

/// Scanner configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScanConfig {
    /// Acquisition parameters
    #[serde(default)]
    pub searcher: SearcherOverrides,
}

/// Overridable subset of [`SearcherConfig`]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearcherOverrides {
    pub ds_comb_arm: usize,
    pub thresh1_n_sigma: f64,
    pub thresh2_n_sigma: f64,
    pub sampling_carrier_twist: bool,
    /// Frequency search half-span in Hz
    pub search_span: f64,
    /// Frequency search step in Hz
    pub search_step: f64,
}

impl Default for SearcherOverrides {
    fn default() -> Self {
        Self {
            ds_comb_arm: 2,
            thresh1_n_sigma: 9.0,
            thresh2_n_sigma: 9.0,
            sampling_carrier_twist: true,
            search_span: 100e3,
            search_step: 5e3,
        }
    }
}

impl ScanConfig {
    /// Load the configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Materialize the acquisition parameters
    pub fn searcher_config(&self) -> SearcherConfig {
        let o = &self.searcher;
        let n = (o.search_span / o.search_step).round() as i64;
        SearcherConfig {
            f_search_set: (-n..=n).map(|k| k as f64 * o.search_step).collect(),
            ds_comb_arm: o.ds_comb_arm,
            thresh1_n_sigma: o.thresh1_n_sigma,
            thresh2_n_sigma: o.thresh2_n_sigma,
            sampling_carrier_twist: o.sampling_carrier_twist,
            k_factor: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_builtin_search_set() {
        let config = ScanConfig::default().searcher_config();
        assert_eq!(config.f_search_set, searcher::default_f_search_set());
        assert_eq!(config.ds_comb_arm, 2);
        assert!(config.sampling_carrier_twist);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = "searcher:\n  search_span: 50000.0\n  thresh1_n_sigma: 7.5\n";
        let config: ScanConfig = serde_yaml::from_str(yaml).unwrap();
        let sc = config.searcher_config();
        assert_eq!(sc.thresh1_n_sigma, 7.5);
        assert_eq!(sc.thresh2_n_sigma, 9.0);
        assert_eq!(sc.f_search_set.len(), 21);
        assert_eq!(sc.f_search_set[0], -50e3);
    }
}
