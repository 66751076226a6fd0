// Move evaluator
//
// Scores each legal candidate move with a tiered safety check followed by a
// difficulty-weighted blend of free space, lookahead survival, item seeking
// and edge distance. Pure: the only inputs are the board, our id, the
// difficulty and the random source. An optional deadline lets the lookahead
// return its last completed iteration instead of running long.

use log::debug;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::board::BoardState;
use crate::config::EvaluatorConfig;
use crate::difficulty::{Difficulty, DifficultyProfile};
use crate::error::ParseError;
use crate::types::{Direction, GridSize, PlayerId, Position, Snake};

/// Immediate safety of a candidate, worst first
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Safety {
    /// Leaves the grid or enters an occupied cell
    Lethal,
    /// Enters a cell the opponent's head can also reach this tick
    Contested,
    Safe,
}

/// Score breakdown for one candidate
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub direction: Direction,
    pub safety: Safety,
    pub space: i32,
    pub lookahead: i32,
    pub item: i32,
    pub edge: i32,
    pub total: i32,
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub direction: Direction,
    /// Best-scoring move before any mistake was applied
    pub planned: Direction,
    /// Total of the chosen candidate
    pub score: i32,
    /// Deepest lookahead iteration that completed
    pub depth_reached: u8,
    /// The deadline cut the lookahead short; `direction` is the best found so far
    pub timed_out: bool,
    pub candidates: Vec<CandidateScore>,
}

/// Static obstacles for one evaluation
struct Obstacles {
    size: GridSize,
    /// Every snake cell
    blocked: Vec<bool>,
    /// Cells of snakes other than ours
    others: Vec<bool>,
    contested: HashSet<Position>,
}

impl Obstacles {
    fn new(board: &BoardState, self_id: PlayerId) -> Self {
        let mut blocked = vec![false; board.size.cell_count()];
        let mut others = vec![false; board.size.cell_count()];
        for snake in &board.snakes {
            for cell in snake.body.iter().filter(|c| board.size.contains(c)) {
                let i = index(board.size, cell);
                blocked[i] = true;
                if snake.id != self_id {
                    others[i] = true;
                }
            }
        }

        let mut contested = HashSet::new();
        for opponent in board.opponents(self_id).filter(|s| s.alive && !s.is_empty()) {
            contested.extend(reachable_next(opponent));
        }

        Obstacles {
            size: board.size,
            blocked,
            others,
            contested,
        }
    }

    fn is_free(&self, pos: &Position) -> bool {
        self.size.contains(pos) && !self.blocked[index(self.size, pos)]
    }

    /// Free of other snakes; the lookahead tracks our own body itself
    fn is_free_of_others(&self, pos: &Position) -> bool {
        self.size.contains(pos) && !self.others[index(self.size, pos)]
    }
}

fn index(size: GridSize, pos: &Position) -> usize {
    pos.row as usize * size.width as usize + pos.col as usize
}

/// Cells an opponent's head can enter next tick (the straight projection included)
fn reachable_next(snake: &Snake) -> impl Iterator<Item = Position> + '_ {
    let reverse = snake.heading.opposite();
    let single = snake.len() == 1;
    Direction::all()
        .into_iter()
        .filter(move |d| single || *d != reverse)
        .map(move |d| d.apply(&snake.head()))
}

/// Legal candidate directions: no reversal onto a neck
pub fn candidate_moves(snake: &Snake) -> Vec<Direction> {
    if snake.len() <= 1 {
        return Direction::all().to_vec();
    }
    let reverse = snake.heading.opposite();
    Direction::all().into_iter().filter(|d| *d != reverse).collect()
}

/// Move evaluator holding the static tuning constants
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Evaluator { config }
    }

    pub fn profile(&self, difficulty: Difficulty) -> DifficultyProfile {
        DifficultyProfile::new(difficulty, &self.config)
    }

    /// Picks the next direction for `self_id` with no time limit
    pub fn select_move<R: Rng>(
        &self,
        board: &BoardState,
        self_id: PlayerId,
        difficulty: Difficulty,
        rng: &mut R,
    ) -> Result<Direction, ParseError> {
        self.select_move_with_deadline(board, self_id, difficulty, rng, None)
            .map(|d| d.direction)
    }

    /// Picks the next direction, stopping the lookahead at `deadline`
    ///
    /// # Arguments
    /// * `board` - Current board state
    /// * `self_id` - Which snake we control
    /// * `difficulty` - Governs depth, weights and randomness
    /// * `rng` - Random source; a seeded one makes the result reproducible
    /// * `deadline` - Soft limit; the last completed lookahead iteration is used past it
    ///
    /// # Returns
    /// * `Decision` - Chosen direction with the per-candidate breakdown
    pub fn select_move_with_deadline<R: Rng>(
        &self,
        board: &BoardState,
        self_id: PlayerId,
        difficulty: Difficulty,
        rng: &mut R,
        deadline: Option<Instant>,
    ) -> Result<Decision, ParseError> {
        let me = board
            .snake(self_id)
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::UnknownPlayer(self_id))?;
        let profile = self.profile(difficulty);
        let obstacles = Obstacles::new(board, self_id);
        let head = me.head();
        let nearest_item = board
            .items
            .iter()
            .map(|item| item.position)
            .min_by_key(|pos| head.distance(pos));

        let candidates = candidate_moves(me);
        let safety: Vec<Safety> = candidates
            .iter()
            .map(|dir| {
                let next = dir.apply(&head);
                if !obstacles.is_free(&next) {
                    Safety::Lethal
                } else if obstacles.contested.contains(&next) {
                    Safety::Contested
                } else {
                    Safety::Safe
                }
            })
            .collect();

        // Free space around each landing cell
        let space: Vec<i32> = candidates
            .par_iter()
            .zip(safety.par_iter())
            .map(|(dir, safety)| {
                if *safety == Safety::Lethal || profile.weight_space == 0 {
                    return 0;
                }
                let reachable = flood_fill(&obstacles, dir.apply(&head), profile.flood_radius);
                let target = me.len() + self.config.space_margin;
                (profile.weight_space as i64 * reachable.min(target) as i64 / target as i64) as i32
            })
            .collect();

        // Iterative deepening lookahead; an iteration cut by the deadline is discarded
        let mut survival = vec![0u8; candidates.len()];
        let mut depth_reached = 0;
        let mut timed_out = false;
        for depth in 1..=profile.lookahead_depth {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                timed_out = true;
                debug!("Lookahead deadline reached before depth {}", depth);
                break;
            }
            let aborted = AtomicBool::new(false);
            let iteration: Vec<u8> = candidates
                .par_iter()
                .zip(safety.par_iter())
                .map(|(dir, safety)| {
                    if *safety == Safety::Lethal {
                        return 0;
                    }
                    let mut body: VecDeque<Position> = me.body.iter().copied().collect();
                    advance(&mut body, dir.apply(&head), board);
                    survive(&obstacles, board, &body, *dir, depth - 1, deadline, &aborted)
                })
                .collect();

            if aborted.load(Ordering::Acquire) {
                timed_out = true;
                debug!(
                    "Lookahead deadline reached during depth {}, keeping depth {}",
                    depth, depth_reached
                );
                break;
            }
            survival = iteration;
            depth_reached = depth;
        }

        let mut scores = Vec::with_capacity(candidates.len());
        for (i, dir) in candidates.iter().enumerate() {
            let next = dir.apply(&head);
            let mut score = CandidateScore {
                direction: *dir,
                safety: safety[i],
                space: 0,
                lookahead: 0,
                item: 0,
                edge: 0,
                total: 0,
            };

            if safety[i] != Safety::Lethal {
                score.space = space[i];
                if depth_reached > 0 {
                    // The move itself is step one; deeper steps come from the lookahead
                    let survived = 1 + survival[i] as i32;
                    score.lookahead =
                        profile.weight_lookahead * survived / (depth_reached as i32);
                }
                if let Some(item) = nearest_item {
                    score.item = profile.weight_item * (head.distance(&item) - next.distance(&item));
                }
                if profile.weight_edge > 0 && self.config.edge_distance_cap > 0 {
                    let cap = self.config.edge_distance_cap;
                    score.edge = profile.weight_edge * edge_distance(board.size, &next).min(cap) / cap;
                }
            }

            score.total =
                self.tier_score(score.safety) + score.space + score.lookahead + score.item + score.edge;
            scores.push(score);
        }

        let best = scores.iter().map(|s| s.total).max().unwrap_or(i32::MIN);
        let tied: Vec<Direction> = scores
            .iter()
            .filter(|s| s.total == best)
            .map(|s| s.direction)
            .collect();
        let planned = if tied.len() == 1 {
            tied[0]
        } else {
            preferred(&tied, me, nearest_item)
        };

        // A mistake swaps the plan for another move of the safest class. The roll
        // is drawn first and the pool does not depend on the level, so with a
        // shared seed every level deviates on a subset of the ticks the level
        // below it deviates on.
        let top = scores.iter().map(|s| s.safety).max().unwrap_or(Safety::Lethal);
        let pool: Vec<Direction> = scores
            .iter()
            .filter(|s| s.safety == top)
            .map(|s| s.direction)
            .collect();
        let roll: f64 = rng.random();
        let direction = if roll < profile.mistake_chance && pool.len() > 1 {
            let offset = rng.random_range(0..pool.len());
            let at = pool.iter().position(|d| *d == planned).unwrap_or(0);
            pool[(at + offset) % pool.len()]
        } else {
            planned
        };
        if direction != planned {
            debug!("Mistake at {}: planned {}, playing {}", difficulty, planned, direction);
        }
        let score = scores
            .iter()
            .find(|s| s.direction == direction)
            .map_or(best, |s| s.total);

        Ok(Decision {
            direction,
            planned,
            score,
            depth_reached,
            timed_out,
            candidates: scores,
        })
    }

    fn tier_score(&self, safety: Safety) -> i32 {
        match safety {
            Safety::Lethal => self.config.score_lethal,
            Safety::Contested => self.config.score_contested,
            Safety::Safe => 0,
        }
    }
}

/// Deterministic tie-break: straight, then toward the item, then fixed order
fn preferred(tied: &[Direction], me: &Snake, item: Option<Position>) -> Direction {
    if tied.contains(&me.heading) {
        return me.heading;
    }
    if let Some(item) = item {
        let head = me.head();
        if let Some(dir) = tied
            .iter()
            .find(|d| d.apply(&head).distance(&item) < head.distance(&item))
        {
            return *dir;
        }
    }
    Direction::all()
        .into_iter()
        .find(|d| tied.contains(d))
        .unwrap_or(me.heading)
}

/// Distance to the nearest wall
fn edge_distance(size: GridSize, pos: &Position) -> i32 {
    pos.row
        .min(size.height - 1 - pos.row)
        .min(pos.col)
        .min(size.width - 1 - pos.col)
}

/// Counts free cells reachable from `start` within `radius` steps (start excluded)
fn flood_fill(obstacles: &Obstacles, start: Position, radius: u32) -> usize {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start);
    queue.push_back((start, 0u32));

    let mut count = 0;
    while let Some((pos, dist)) = queue.pop_front() {
        if dist >= radius {
            continue;
        }
        for dir in Direction::all() {
            let next = dir.apply(&pos);
            if obstacles.is_free(&next) && visited.insert(next) {
                count += 1;
                queue.push_back((next, dist + 1));
            }
        }
    }
    count
}

/// Moves the simulated head; the tail stays put when an item is eaten
fn advance(body: &mut VecDeque<Position>, next: Position, board: &BoardState) {
    body.push_front(next);
    if !board.items.iter().any(|item| item.position == next) {
        body.pop_back();
    }
}

/// Number of further steps (up to `depth`) our snake can survive.
/// Opponents are treated as static. Sets `aborted` once the deadline passes.
fn survive(
    obstacles: &Obstacles,
    board: &BoardState,
    body: &VecDeque<Position>,
    heading: Direction,
    depth: u8,
    deadline: Option<Instant>,
    aborted: &AtomicBool,
) -> u8 {
    if depth == 0 {
        return 0;
    }
    if aborted.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d) {
        aborted.store(true, Ordering::Release);
        return 0;
    }

    let head = body[0];
    let mut best = 0;
    for dir in Direction::all() {
        if dir == heading.opposite() {
            continue;
        }
        let next = dir.apply(&head);
        // The tail cell frees up as we move, so it is not an obstacle
        let tail_len = body.len().saturating_sub(1);
        if !obstacles.is_free_of_others(&next) || body.range(..tail_len).any(|c| *c == next) {
            continue;
        }

        let mut child = body.clone();
        advance(&mut child, next, board);
        let survived = 1 + survive(obstacles, board, &child, dir, depth - 1, deadline, aborted);
        best = best.max(survived);
        if best == depth {
            break;
        }
    }
    best
}
