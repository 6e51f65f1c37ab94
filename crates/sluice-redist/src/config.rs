//! Channel configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RedistError;

/// How sources and destinations exchange chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// Every linked pair exchanges a message every iteration, empty or not.
    #[default]
    Collective,
    /// Only non-empty chunks travel; counts are announced first.
    PointToPoint,
}

impl FromStr for Discipline {
    type Err = RedistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collective" => Ok(Discipline::Collective),
            "p2p" | "point_to_point" => Ok(Discipline::PointToPoint),
            other => Err(RedistError::Configuration(format!("unknown transport discipline '{}'", other))),
        }
    }
}

/// How Morton codes are assigned to destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZCurveMapping {
    /// Code `c` goes to destination `c mod n`.
    #[default]
    RoundRobin,
    /// The code space is cut into `n` contiguous runs.
    Contiguous,
}

fn default_dims() -> u8 {
    3
}

fn default_slices() -> [u32; 3] {
    [8, 8, 8]
}

/// Redistribution strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Item `i` goes to destination `i mod n`.
    RoundRobin,
    /// Balanced contiguous blocks of the global item sequence.
    #[default]
    Count,
    /// Geometric sub-blocks of the record's domain.
    Block {
        /// Number of leading axes that may be cut.
        #[serde(default = "default_dims")]
        dims: u8,
    },
    /// Whole records forwarded along a fixed rank mapping.
    Proc,
    /// Spatial bucketing by Morton code.
    Zcurve {
        /// Bounding box: min x,y,z then max x,y,z. Discovered when absent.
        #[serde(default)]
        bbox: Option<[f32; 6]>,
        /// Cells per axis.
        #[serde(default = "default_slices")]
        slices: [u32; 3],
        /// Code to destination mapping.
        #[serde(default)]
        mapping: ZCurveMapping,
    },
}

impl FromStr for StrategyConfig {
    type Err = RedistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round" | "round_robin" => Ok(StrategyConfig::RoundRobin),
            "count" => Ok(StrategyConfig::Count),
            "block" => Ok(StrategyConfig::Block { dims: default_dims() }),
            "proc" => Ok(StrategyConfig::Proc),
            "zcurve" => Ok(StrategyConfig::Zcurve {
                bbox: None,
                slices: default_slices(),
                mapping: ZCurveMapping::default(),
            }),
            other => Err(RedistError::Configuration(format!("unknown redistribution strategy '{}'", other))),
        }
    }
}

/// Configuration of one redistribution channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RedistConfig {
    /// Splitting strategy.
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Transport discipline.
    #[serde(default)]
    pub discipline: Discipline,
    /// Give up on missing announced messages after this many milliseconds.
    #[serde(default)]
    pub recv_timeout_ms: Option<u64>,
}

impl RedistConfig {
    /// Configuration with the given strategy and discipline.
    pub fn new(strategy: StrategyConfig, discipline: Discipline) -> Self {
        Self {
            strategy,
            discipline,
            recv_timeout_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!("count".parse::<StrategyConfig>().unwrap(), StrategyConfig::Count);
        assert_eq!("round".parse::<StrategyConfig>().unwrap(), StrategyConfig::RoundRobin);
        assert_eq!(
            "block".parse::<StrategyConfig>().unwrap(),
            StrategyConfig::Block { dims: 3 }
        );
        assert!(matches!(
            "zcurve".parse::<StrategyConfig>().unwrap(),
            StrategyConfig::Zcurve { bbox: None, slices: [8, 8, 8], .. }
        ));
        assert!(matches!(
            "bogus".parse::<StrategyConfig>(),
            Err(RedistError::Configuration(_))
        ));
    }

    #[test]
    fn test_discipline_names() {
        assert_eq!("p2p".parse::<Discipline>().unwrap(), Discipline::PointToPoint);
        assert_eq!("collective".parse::<Discipline>().unwrap(), Discipline::Collective);
        assert!("mpi".parse::<Discipline>().is_err());
    }

    #[test]
    fn test_json_config() {
        let json = r#"{
            "strategy": { "name": "zcurve", "slices": [4, 4, 0] },
            "discipline": "point_to_point"
        }"#;
        let config: RedistConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.discipline, Discipline::PointToPoint);
        assert_eq!(
            config.strategy,
            StrategyConfig::Zcurve {
                bbox: None,
                slices: [4, 4, 0],
                mapping: ZCurveMapping::RoundRobin
            }
        );
        assert_eq!(config.recv_timeout_ms, None);
    }

    #[test]
    fn test_defaults() {
        let config: RedistConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RedistConfig::default());
        assert_eq!(config.strategy, StrategyConfig::Count);
        assert_eq!(config.discipline, Discipline::Collective);
    }
}
