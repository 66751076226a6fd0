// Error taxonomy for the robot
//
// ParseError and the evaluator's soft timeout are recovered where they occur.
// ChannelError drives the reconnect loop. ConfigError is fatal at startup.

use thiserror::Error;

use crate::types::{PlayerId, Position};

/// Malformed or inconsistent board update. The tick is skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed update: {0}")]
    Malformed(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid player id '{0}'")]
    InvalidPlayerId(String),

    #[error("invalid direction '{0}'")]
    InvalidDirection(String),

    #[error("{what} at ({}, {}) lies outside the {width}x{height} grid", .position.row, .position.col)]
    OutOfBounds {
        what: &'static str,
        position: Position,
        width: i32,
        height: i32,
    },

    #[error("cell ({}, {}) claimed by snakes {first} and {second}", .position.row, .position.col)]
    Collision {
        position: Position,
        first: PlayerId,
        second: PlayerId,
    },

    #[error("player {0} is not on the board")]
    UnknownPlayer(PlayerId),
}

/// Connection-level failure. Triggers a transition to Reconnecting.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),
}

/// Invalid startup configuration. Fatal before any connection attempt.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("difficulty must be between 1 and 10, got {0}")]
    InvalidDifficulty(i64),

    #[error("invalid server endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal session outcome
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("giving up after {attempts} consecutive connection failures: {last}")]
    RetriesExhausted { attempts: u32, last: ChannelError },
}
