// Win/loss bookkeeping for the lifetime of the process

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a game ended for us
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOutcome {
    Win,
    Loss,
    Draw,
    /// The connection dropped before the server announced a result
    Aborted,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Win => "win",
            SessionOutcome::Loss => "loss",
            SessionOutcome::Draw => "draw",
            SessionOutcome::Aborted => "aborted",
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCounter {
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub aborted: u64,
}

impl StatsCounter {
    pub fn get(&self, outcome: SessionOutcome) -> u64 {
        match outcome {
            SessionOutcome::Win => self.wins,
            SessionOutcome::Loss => self.losses,
            SessionOutcome::Draw => self.draws,
            SessionOutcome::Aborted => self.aborted,
        }
    }

    pub fn games(&self) -> u64 {
        self.wins + self.losses + self.draws + self.aborted
    }

    /// Share of games won, in percent
    pub fn win_rate(&self) -> f64 {
        match self.games() {
            0 => 0.0,
            n => self.wins as f64 * 100.0 / n as f64,
        }
    }
}

impl fmt::Display for StatsCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}W {}L {}D {}A, {} games, {:.1}% won",
            self.wins,
            self.losses,
            self.draws,
            self.aborted,
            self.games(),
            self.win_rate()
        )
    }
}

/// Monotonic outcome counters. Owned by the session, which is the only writer.
#[derive(Debug, Default)]
pub struct StatsTracker {
    counts: StatsCounter,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: SessionOutcome) {
        let slot = match outcome {
            SessionOutcome::Win => &mut self.counts.wins,
            SessionOutcome::Loss => &mut self.counts.losses,
            SessionOutcome::Draw => &mut self.counts.draws,
            SessionOutcome::Aborted => &mut self.counts.aborted,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn snapshot(&self) -> StatsCounter {
        self.counts
    }
}
