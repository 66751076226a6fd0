// Debug logging module for asynchronous decision logging
//
// Fire-and-forget writes keep file I/O off the tick path. Each answered tick
// becomes one JSONL line holding everything needed to re-run the evaluator:
// the parsed board, our player id, the difficulty and the per-tick seed.

use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::board::BoardState;
use crate::difficulty::Difficulty;
use crate::evaluator::{CandidateScore, Decision};
use crate::types::{Direction, PlayerId};

/// One line of the debug log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub tick: u64,
    pub player_id: PlayerId,
    pub difficulty: Difficulty,
    pub seed: u64,
    pub chosen_move: Direction,
    pub score: i32,
    pub depth_reached: u8,
    pub timed_out: bool,
    #[serde(default)]
    pub candidates: Vec<CandidateScore>,
    pub board: BoardState,
    pub timestamp: String,
}

/// Shared debug logger state
/// Uses Arc<Mutex<File>> so clones handed to tasks write to the same file
#[derive(Clone)]
pub struct DebugLogger {
    file: Arc<Mutex<Option<File>>>,
    enabled: bool,
}

impl DebugLogger {
    /// Creates a new debug logger
    /// If enabled is true, initializes the log file (truncating if it exists)
    pub async fn new(enabled: bool, log_file_path: &str) -> Self {
        if !enabled {
            return Self::disabled();
        }

        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file_path)
            .await
        {
            Ok(file) => {
                log::info!("Debug logging enabled: {}", log_file_path);
                DebugLogger {
                    file: Arc::new(Mutex::new(Some(file))),
                    enabled: true,
                }
            }
            Err(e) => {
                error!("Failed to create debug log file '{}': {}", log_file_path, e);
                Self::disabled()
            }
        }
    }

    /// Creates a disabled debug logger (no-op)
    pub fn disabled() -> Self {
        DebugLogger {
            file: Arc::new(Mutex::new(None)),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Logs an answered tick asynchronously (fire-and-forget)
    pub fn log_decision(
        &self,
        player_id: PlayerId,
        difficulty: Difficulty,
        seed: u64,
        board: BoardState,
        decision: &Decision,
    ) {
        if !self.enabled {
            return;
        }

        let record = DecisionRecord {
            tick: board.tick,
            player_id,
            difficulty,
            seed,
            chosen_move: decision.direction,
            score: decision.score,
            depth_reached: decision.depth_reached,
            timed_out: decision.timed_out,
            candidates: decision.candidates.clone(),
            board,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let file_handle = self.file.clone();

        tokio::spawn(async move {
            Self::write_record(file_handle, record).await;
        });
    }

    async fn write_record(file_handle: Arc<Mutex<Option<File>>>, record: DecisionRecord) {
        let mut file_guard = file_handle.lock().await;
        let Some(file) = file_guard.as_mut() else {
            return;
        };

        let line = match serde_json::to_string(&record) {
            Ok(json) => format!("{}\n", json),
            Err(e) => {
                error!("Failed to serialize debug log entry: {}", e);
                return;
            }
        };
        if let Err(e) = file.write_all(line.as_bytes()).await {
            error!("Failed to write debug log entry: {}", e);
        } else if let Err(e) = file.flush().await {
            error!("Failed to flush debug log: {}", e);
        }
    }
}
