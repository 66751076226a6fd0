// Configuration module for reading Robot.toml
// This module provides typed configuration management for the robot

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::difficulty::Difficulty;
use crate::error::ConfigError;
use crate::types::GridSize;

/// Main configuration structure containing all tunable parameters
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub robot: RobotConfig,
    pub timing: TimingConfig,
    pub reconnect: ReconnectConfig,
    pub grid: GridConfig,
    pub evaluator: EvaluatorConfig,
    pub debug: DebugConfig,
}

/// Where and how to connect
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// WebSocket base URL; the player slot is appended to it
    pub endpoint: String,
    /// Slots to try, in order
    pub player_slots: Vec<u8>,
    pub connect_timeout_ms: u64,
}

/// Per-process robot settings
#[derive(Debug, Deserialize, Clone)]
pub struct RobotConfig {
    pub difficulty: i64,
    /// Base seed for the evaluator's random source; drawn from the OS when unset
    pub seed: Option<u64>,
    /// Stop after this many completed games; play forever when unset
    pub max_games: Option<u32>,
}

/// Timing and latency constants
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    pub tick_budget_ms: u64,
    pub network_overhead_ms: u64,
    pub ready_delay_ms: u64,
    pub stats_report_interval_secs: u64,
}

impl TimingConfig {
    /// Computes the effective computation budget per tick
    pub fn effective_budget_ms(&self) -> u64 {
        self.tick_budget_ms.saturating_sub(self.network_overhead_ms)
    }

    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }
}

/// Reconnect backoff policy
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter, in [0, 1)
    pub jitter: f64,
    /// Escalate to a fatal error after this many failures in a row; retry forever when unset
    pub max_consecutive_failures: Option<u32>,
}

/// Grid size assumed when an update does not carry one
#[derive(Debug, Deserialize, Clone)]
pub struct GridConfig {
    pub width: i32,
    pub height: i32,
}

impl GridConfig {
    pub fn size(&self) -> GridSize {
        GridSize {
            width: self.width,
            height: self.height,
        }
    }
}

/// Move evaluator constants. Difficulty interpolates between zero and the `max_*` values.
#[derive(Debug, Deserialize, Clone)]
pub struct EvaluatorConfig {
    // Search shape
    pub max_lookahead_depth: u8,
    pub min_flood_radius: u32,
    pub max_flood_radius: u32,
    pub space_margin: usize,

    // Blend weights at difficulty 10
    pub max_weight_space: i32,
    pub max_weight_lookahead: i32,
    pub max_weight_item: i32,
    pub max_weight_edge: i32,

    // Edge avoidance
    pub edge_min_level: u8,
    pub edge_distance_cap: i32,

    // Safety tiers
    pub score_contested: i32,
    pub score_lethal: i32,
}

/// Debug configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    pub enabled: bool,
    pub log_file_path: String,
}

impl Config {
    /// Loads configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the Robot.toml configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    /// Loads default configuration from Robot.toml in the working directory
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::from_file("Robot.toml")
    }

    /// Creates a configuration with hardcoded default values as fallback
    /// This should match the constants defined in Robot.toml
    pub fn default_hardcoded() -> Self {
        Config {
            server: ServerConfig {
                endpoint: "ws://localhost:8000/ws/".to_string(),
                player_slots: vec![1, 2],
                connect_timeout_ms: 5000,
            },
            robot: RobotConfig {
                difficulty: 5,
                seed: None,
                max_games: None,
            },
            timing: TimingConfig {
                tick_budget_ms: 120,
                network_overhead_ms: 30,
                ready_delay_ms: 1000,
                stats_report_interval_secs: 60,
            },
            reconnect: ReconnectConfig {
                min_backoff_ms: 500,
                max_backoff_ms: 30_000,
                multiplier: 2.0,
                jitter: 0.2,
                max_consecutive_failures: None,
            },
            grid: GridConfig {
                width: 30,
                height: 20,
            },
            evaluator: EvaluatorConfig {
                max_lookahead_depth: 4,
                min_flood_radius: 2,
                max_flood_radius: 12,
                space_margin: 8,
                max_weight_space: 200,
                max_weight_lookahead: 300,
                max_weight_item: 400,
                max_weight_edge: 30,
                edge_min_level: 5,
                edge_distance_cap: 3,
                score_contested: -5_000,
                score_lethal: -100_000,
            },
            debug: DebugConfig {
                enabled: false,
                log_file_path: "copperhead_debug.jsonl".to_string(),
            },
        }
    }

    /// Attempts to load from file, falls back to hardcoded defaults on error
    pub fn load_or_default() -> Self {
        Self::load_default().unwrap_or_else(|e| {
            log::warn!("Could not load Robot.toml ({}), using hardcoded defaults", e);
            Self::default_hardcoded()
        })
    }

    /// Validated difficulty setting
    pub fn difficulty(&self) -> Result<Difficulty, ConfigError> {
        Difficulty::new(self.robot.difficulty)
    }

    /// Checks every value the robot cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.difficulty()?;
        validate_endpoint(&self.server.endpoint)?;

        if self.server.player_slots.is_empty() {
            return Err(ConfigError::Invalid("server.player_slots is empty".into()));
        }
        if self.grid.width <= 0 || self.grid.height <= 0 {
            return Err(ConfigError::Invalid(format!(
                "grid must be non-empty, got {}x{}",
                self.grid.width, self.grid.height
            )));
        }

        let reconnect = &self.reconnect;
        if reconnect.min_backoff_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.min_backoff_ms must be positive".into()));
        }
        if reconnect.max_backoff_ms < reconnect.min_backoff_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_backoff_ms is below reconnect.min_backoff_ms".into(),
            ));
        }
        if reconnect.multiplier < 1.0 {
            return Err(ConfigError::Invalid("reconnect.multiplier must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&reconnect.jitter) {
            return Err(ConfigError::Invalid("reconnect.jitter must lie in [0, 1)".into()));
        }

        let eval = &self.evaluator;
        if eval.min_flood_radius > eval.max_flood_radius {
            return Err(ConfigError::Invalid(
                "evaluator.min_flood_radius exceeds evaluator.max_flood_radius".into(),
            ));
        }
        let weights = [
            eval.max_weight_space,
            eval.max_weight_lookahead,
            eval.max_weight_item,
            eval.max_weight_edge,
        ];
        if weights.iter().any(|&w| w < 0) {
            return Err(ConfigError::Invalid("evaluator weights must be non-negative".into()));
        }
        // Positive terms must never lift a candidate across a safety tier
        let positive_span = eval.max_weight_space
            + eval.max_weight_lookahead
            + eval.max_weight_item
            + eval.max_weight_edge;
        if eval.score_contested >= 0
            || eval.score_lethal >= eval.score_contested
            || positive_span * 2 >= -eval.score_contested
            || positive_span * 2 >= eval.score_contested - eval.score_lethal
        {
            return Err(ConfigError::Invalid(
                "evaluator safety tiers must dominate the blend weights".into(),
            ));
        }

        Ok(())
    }
}

/// Endpoint must be an absolute ws:// or wss:// URL
pub fn validate_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}', expected ws or wss", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_budget_calculation() {
        let config = Config::default_hardcoded();
        assert_eq!(config.timing.effective_budget_ms(), 90);
    }

    #[test]
    fn test_hardcoded_defaults_are_valid() {
        let config = Config::default_hardcoded();
        assert!(config.validate().is_ok());
        assert_eq!(config.difficulty().unwrap().level(), 5);
    }

    #[test]
    fn test_robot_toml_can_be_parsed() {
        let result = Config::from_file("Robot.toml");
        assert!(result.is_ok(), "Failed to parse Robot.toml: {:?}", result.err());
    }

    #[test]
    fn test_all_config_values_match_hardcoded_defaults() {
        let file_config = Config::from_file("Robot.toml").expect("Robot.toml should be parseable");
        let hardcoded = Config::default_hardcoded();

        assert_eq!(file_config.server.endpoint, hardcoded.server.endpoint);
        assert_eq!(file_config.server.player_slots, hardcoded.server.player_slots);
        assert_eq!(file_config.robot.difficulty, hardcoded.robot.difficulty);
        assert_eq!(file_config.robot.max_games, hardcoded.robot.max_games);
        assert_eq!(file_config.timing.tick_budget_ms, hardcoded.timing.tick_budget_ms);
        assert_eq!(file_config.timing.ready_delay_ms, hardcoded.timing.ready_delay_ms);
        assert_eq!(file_config.reconnect.min_backoff_ms, hardcoded.reconnect.min_backoff_ms);
        assert_eq!(file_config.reconnect.max_backoff_ms, hardcoded.reconnect.max_backoff_ms);
        assert_eq!(
            file_config.reconnect.max_consecutive_failures,
            hardcoded.reconnect.max_consecutive_failures
        );
        assert_eq!(file_config.grid.width, hardcoded.grid.width);
        assert_eq!(file_config.grid.height, hardcoded.grid.height);
        assert_eq!(
            file_config.evaluator.max_lookahead_depth,
            hardcoded.evaluator.max_lookahead_depth
        );
        assert_eq!(file_config.evaluator.max_weight_item, hardcoded.evaluator.max_weight_item);
        assert_eq!(file_config.evaluator.score_contested, hardcoded.evaluator.score_contested);
        assert_eq!(file_config.evaluator.score_lethal, hardcoded.evaluator.score_lethal);
        assert_eq!(file_config.evaluator.edge_min_level, hardcoded.evaluator.edge_min_level);
        assert_eq!(file_config.debug.log_file_path, hardcoded.debug.log_file_path);
    }

    #[test]
    fn test_invalid_difficulty_rejected() {
        let mut config = Config::default_hardcoded();
        config.robot.difficulty = 11;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDifficulty(11))));
        config.robot.difficulty = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDifficulty(0))));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(validate_endpoint("ws://localhost:8000/ws/").is_ok());
        assert!(validate_endpoint("wss://copperhead.example/ws/").is_ok());
        assert!(matches!(
            validate_endpoint("http://localhost:8000/ws/"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_bad_backoff_rejected() {
        let mut config = Config::default_hardcoded();
        config.reconnect.max_backoff_ms = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_weights_must_not_cross_safety_tiers() {
        let mut config = Config::default_hardcoded();
        config.evaluator.max_weight_item = 10_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Config::from_file("nonexistent.toml");
        assert!(matches!(result, Err(ConfigError::Read(_))));
    }
}
