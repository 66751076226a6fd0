// Replay module for re-running logged decisions
//
// This module provides functionality to:
// 1. Parse JSONL debug logs
// 2. Re-run the evaluator on each logged board with the logged seed
// 3. Compare logged vs replayed moves
// 4. Print a summary report
//
// Replays run without a deadline. A tick that timed out live may therefore
// legitimately disagree with its replay; those are reported separately.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use crate::config::Config;
use crate::debug_logger::DecisionRecord;
use crate::difficulty::Difficulty;
use crate::evaluator::Evaluator;
use crate::types::Direction;

/// Result of replaying a single tick
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub tick: u64,
    pub logged_move: Direction,
    pub replayed_move: Direction,
    pub matches: bool,
    /// The live decision hit its deadline
    pub timed_out_live: bool,
    pub logged_score: i32,
    pub replayed_score: i32,
    pub depth_reached: u8,
    pub computation_time_ms: u128,
}

/// Statistics for a complete replay session
#[derive(Debug, Default, PartialEq)]
pub struct ReplayStats {
    pub total_ticks: usize,
    pub matches: usize,
    pub mismatches: usize,
    /// Mismatches on ticks that timed out live
    pub timeout_mismatches: usize,
    pub match_rate: f64,
}

/// Replay engine for analyzing debug logs
pub struct ReplayEngine {
    evaluator: Evaluator,
    difficulty_override: Option<Difficulty>,
    verbose: bool,
}

impl ReplayEngine {
    /// Creates a new replay engine
    ///
    /// # Arguments
    /// * `config` - Evaluator weights are taken from here
    /// * `difficulty_override` - Replay every tick at this level instead of the logged one
    /// * `verbose` - Log each tick as it is replayed
    pub fn new(config: Config, difficulty_override: Option<Difficulty>, verbose: bool) -> Self {
        ReplayEngine {
            evaluator: Evaluator::new(config.evaluator),
            difficulty_override,
            verbose,
        }
    }

    /// Loads all records from a JSONL file
    pub fn load_log_file<P: AsRef<Path>>(&self, log_path: P) -> Result<Vec<DecisionRecord>, String> {
        let file = File::open(log_path.as_ref()).map_err(|e| format!("Failed to open log file: {}", e))?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| format!("Failed to read line {}: {}", line_num + 1, e))?;

            if line.trim().is_empty() {
                continue;
            }

            let record: DecisionRecord = serde_json::from_str(&line)
                .map_err(|e| format!("Failed to parse JSON on line {}: {}", line_num + 1, e))?;

            records.push(record);
        }

        info!("Loaded {} log entries", records.len());
        Ok(records)
    }

    /// Replays a single record and compares the result
    pub fn replay_record(&self, record: &DecisionRecord) -> Result<ReplayResult, String> {
        let difficulty = self.difficulty_override.unwrap_or(record.difficulty);
        let mut rng = StdRng::seed_from_u64(record.seed);
        let start_time = Instant::now();

        let decision = self
            .evaluator
            .select_move_with_deadline(&record.board, record.player_id, difficulty, &mut rng, None)
            .map_err(|e| format!("Tick {}: {}", record.tick, e))?;

        let result = ReplayResult {
            tick: record.tick,
            logged_move: record.chosen_move,
            replayed_move: decision.direction,
            matches: record.chosen_move == decision.direction,
            timed_out_live: record.timed_out,
            logged_score: record.score,
            replayed_score: decision.score,
            depth_reached: decision.depth_reached,
            computation_time_ms: start_time.elapsed().as_millis(),
        };

        if self.verbose {
            if result.matches {
                info!(
                    "Tick {}: MATCH - {} (score: {}, depth: {}, time: {}ms)",
                    result.tick,
                    result.replayed_move,
                    result.replayed_score,
                    result.depth_reached,
                    result.computation_time_ms
                );
            } else {
                warn!(
                    "Tick {}: MISMATCH - Logged: {}, Replayed: {} (score: {} vs {}, depth: {}{})",
                    result.tick,
                    result.logged_move,
                    result.replayed_move,
                    result.logged_score,
                    result.replayed_score,
                    result.depth_reached,
                    if result.timed_out_live { ", timed out live" } else { "" }
                );
            }
        }

        Ok(result)
    }

    /// Replays every record, skipping ones that cannot be evaluated
    pub fn replay_all(&self, records: &[DecisionRecord]) -> Vec<ReplayResult> {
        records
            .iter()
            .filter_map(|record| match self.replay_record(record) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Failed to replay: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Replays the records for the given ticks only
    pub fn replay_ticks(&self, records: &[DecisionRecord], ticks: &[u64]) -> Result<Vec<ReplayResult>, String> {
        let mut results = Vec::new();

        for tick in ticks {
            let record = records
                .iter()
                .find(|r| r.tick == *tick)
                .ok_or_else(|| format!("Tick {} not found in log file", tick))?;
            results.push(self.replay_record(record)?);
        }

        Ok(results)
    }

    /// Generates statistics from replay results
    pub fn generate_stats(results: &[ReplayResult]) -> ReplayStats {
        let total_ticks = results.len();
        let matches = results.iter().filter(|r| r.matches).count();
        let timeout_mismatches = results.iter().filter(|r| !r.matches && r.timed_out_live).count();
        let match_rate = if total_ticks > 0 {
            (matches as f64 / total_ticks as f64) * 100.0
        } else {
            0.0
        };

        ReplayStats {
            total_ticks,
            matches,
            mismatches: total_ticks - matches,
            timeout_mismatches,
            match_rate,
        }
    }

    /// Prints a report of replay results
    pub fn print_report(&self, results: &[ReplayResult]) {
        let stats = Self::generate_stats(results);

        println!("\n===========================================================");
        println!("                    REPLAY REPORT");
        println!("===========================================================");
        println!("Total Ticks:    {}", stats.total_ticks);
        println!("Matches:        {} ({:.1}%)", stats.matches, stats.match_rate);
        println!(
            "Mismatches:     {} ({} on ticks that timed out live)",
            stats.mismatches, stats.timeout_mismatches
        );
        println!("===========================================================\n");

        if !results.is_empty() {
            let avg_time: f64 =
                results.iter().map(|r| r.computation_time_ms as f64).sum::<f64>() / results.len() as f64;
            let avg_depth: f64 =
                results.iter().map(|r| r.depth_reached as f64).sum::<f64>() / results.len() as f64;

            println!("Average Depth Reached:      {:.1}", avg_depth);
            println!("Average Computation Time:   {:.1}ms\n", avg_time);
        }

        for result in results.iter().filter(|r| !r.matches) {
            println!(
                "Tick {}: {} -> {} (score: {}, depth: {}{})",
                result.tick,
                result.logged_move,
                result.replayed_move,
                result.replayed_score,
                result.depth_reached,
                if result.timed_out_live { ", timed out live" } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardState;
    use crate::types::{GridSize, Item, ItemKind, PlayerId, Position, Snake};

    fn record(seed: u64, difficulty: u8) -> DecisionRecord {
        let board = BoardState {
            size: GridSize { width: 10, height: 10 },
            snakes: vec![
                Snake {
                    id: PlayerId(1),
                    body: vec![Position::new(5, 5), Position::new(5, 4), Position::new(5, 3)],
                    heading: Direction::Right,
                    alive: true,
                },
                Snake {
                    id: PlayerId(2),
                    body: vec![Position::new(1, 1), Position::new(1, 2)],
                    heading: Direction::Left,
                    alive: true,
                },
            ],
            items: vec![Item { position: Position::new(2, 8), kind: ItemKind::Food }],
            tick: 4,
            terminal: false,
        };
        let difficulty = Difficulty::new(difficulty as i64).unwrap();
        let evaluator = Evaluator::new(Config::default_hardcoded().evaluator);
        let mut rng = StdRng::seed_from_u64(seed);
        let decision = evaluator
            .select_move_with_deadline(&board, PlayerId(1), difficulty, &mut rng, None)
            .unwrap();

        DecisionRecord {
            tick: board.tick,
            player_id: PlayerId(1),
            difficulty,
            seed,
            chosen_move: decision.direction,
            score: decision.score,
            depth_reached: decision.depth_reached,
            timed_out: false,
            candidates: decision.candidates,
            board,
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_replay_reproduces_logged_move() {
        let engine = ReplayEngine::new(Config::default_hardcoded(), None, false);
        for (seed, level) in [(1, 1), (2, 3), (3, 7), (4, 10)] {
            let rec = record(seed, level);
            let result = engine.replay_record(&rec).unwrap();
            assert!(result.matches, "seed {} level {}", seed, level);
            assert_eq!(result.replayed_score, rec.score);
        }
    }

    #[test]
    fn test_replay_ticks_reports_missing_tick() {
        let engine = ReplayEngine::new(Config::default_hardcoded(), None, false);
        let records = vec![record(1, 5)];
        assert!(engine.replay_ticks(&records, &[4]).is_ok());
        assert!(engine.replay_ticks(&records, &[99]).is_err());
    }

    #[test]
    fn test_generate_stats() {
        let engine = ReplayEngine::new(Config::default_hardcoded(), None, false);
        let records = vec![record(1, 10), record(2, 10)];
        let stats = ReplayEngine::generate_stats(&engine.replay_all(&records));
        assert_eq!(stats.total_ticks, 2);
        assert_eq!(stats.matches, 2);
        assert_eq!(stats.match_rate, 100.0);
        assert_eq!(ReplayEngine::generate_stats(&[]), ReplayStats::default());
    }
}
