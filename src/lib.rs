// Library exports for the CopperHead robot
// The binary, the replay tool and the integration tests all build on these modules

pub mod backoff;
pub mod board;
pub mod channel;
pub mod config;
pub mod debug_logger;
pub mod difficulty;
pub mod error;
pub mod evaluator;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod stats;
pub mod types;
pub mod ws;
