//! Construction of algorithms from configuration.

use crate::algorithm::SearchAlgorithm;
use crate::exhaustive::ExhaustiveSearch;
use dse_space::DesignSpace;
use dse_types::{DseResult, SearchError};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExhaustiveConfig {
    pub batch_size: usize,
}

impl Default for ExhaustiveConfig {
    fn default() -> Self {
        Self { batch_size: 8 }
    }
}

/// `search.algorithm` section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AlgorithmConfig {
    pub name: String,
    pub exhaustive: ExhaustiveConfig,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            name: "exhaustive".to_string(),
            exhaustive: ExhaustiveConfig::default(),
        }
    }
}

/// Makes the configured algorithm over `space`.
pub fn create_algorithm(
    config: &AlgorithmConfig,
    space: DesignSpace,
) -> DseResult<Box<dyn SearchAlgorithm>> {
    match config.name.as_str() {
        "exhaustive" => Ok(Box::new(ExhaustiveSearch::new(
            space,
            config.exhaustive.batch_size,
        )?)),
        other => {
            error!(name = other, "Unrecognized algorithm");
            Err(SearchError::UnknownAlgorithm {
                name: other.to_string(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::reference_space;
    use dse_types::DseError;

    #[test]
    fn test_config_defaults() {
        let config: AlgorithmConfig =
            serde_json::from_str(r#"{"exhaustive": {"batch-size": 4}}"#).unwrap();
        assert_eq!(config.name, "exhaustive");
        assert_eq!(config.exhaustive.batch_size, 4);
    }

    #[test]
    fn test_create_algorithm() {
        let algo = create_algorithm(&AlgorithmConfig::default(), reference_space()).unwrap();
        assert_eq!(algo.name(), "exhaustive");

        let config = AlgorithmConfig {
            name: "gradient".to_string(),
            ..AlgorithmConfig::default()
        };
        assert!(matches!(
            create_algorithm(&config, reference_space()),
            Err(DseError::Search(SearchError::UnknownAlgorithm { .. }))
        ));
    }
}
