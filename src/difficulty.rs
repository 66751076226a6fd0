// Difficulty setting and the search/blend profile it maps to
//
// Level 1 looks at immediate safety only and picks uniformly among the safest moves.
// Level 10 searches deepest, weights item seeking most and never injects mistakes.
// Everything in between is a linear interpolation, so each knob is monotone in the level.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EvaluatorConfig;
use crate::error::ConfigError;

/// Validated difficulty level in [1, 10]
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "i64", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(level: i64) -> Result<Self, ConfigError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&level) {
            Ok(Difficulty(level as u8))
        } else {
            Err(ConfigError::InvalidDifficulty(level))
        }
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    /// Every valid level, lowest first
    pub fn all() -> impl Iterator<Item = Difficulty> {
        (Self::MIN..=Self::MAX).map(Difficulty)
    }

    /// Position of this level between MIN (0.0) and MAX (1.0)
    fn fraction(&self) -> f64 {
        (self.0 - Self::MIN) as f64 / (Self::MAX - Self::MIN) as f64
    }

    /// Probability of playing a random move from the safest class instead of the
    /// best-scoring one. Level 1 always does, so its ties are uniformly random.
    pub fn mistake_chance(&self) -> f64 {
        if self.0 == Self::MIN {
            1.0
        } else {
            (Self::MAX - self.0) as f64 / 20.0
        }
    }
}

impl TryFrom<i64> for Difficulty {
    type Error = ConfigError;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        Difficulty::new(level)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> u8 {
        d.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Concrete search depth and blend weights for one difficulty level
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyProfile {
    pub level: u8,
    pub lookahead_depth: u8,
    pub flood_radius: u32,
    pub weight_space: i32,
    pub weight_lookahead: i32,
    pub weight_item: i32,
    pub weight_edge: i32,
    pub mistake_chance: f64,
}

impl DifficultyProfile {
    pub fn new(difficulty: Difficulty, config: &EvaluatorConfig) -> Self {
        let t = difficulty.fraction();
        let searching = difficulty.level() > Difficulty::MIN;
        let scaled = |max: i32| if searching { lerp(0.0, max as f64, t) as i32 } else { 0 };

        let lookahead_depth = if searching && config.max_lookahead_depth > 0 {
            lerp(1.0, config.max_lookahead_depth as f64, t) as u8
        } else {
            0
        };
        let flood_radius = if searching {
            lerp(config.min_flood_radius as f64, config.max_flood_radius as f64, t) as u32
        } else {
            0
        };
        let weight_edge = if difficulty.level() >= config.edge_min_level {
            scaled(config.max_weight_edge)
        } else {
            0
        };

        DifficultyProfile {
            level: difficulty.level(),
            lookahead_depth,
            flood_radius,
            weight_space: scaled(config.max_weight_space),
            weight_lookahead: if lookahead_depth > 0 { scaled(config.max_weight_lookahead) } else { 0 },
            weight_item: scaled(config.max_weight_item),
            weight_edge,
            mistake_chance: difficulty.mistake_chance(),
        }
    }
}

fn lerp(lo: f64, hi: f64, t: f64) -> f64 {
    (lo + (hi - lo) * t).round()
}
