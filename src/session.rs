// Session state machine
//
// Owns the channel lifecycle: connect, wait for a role, play, record the
// outcome, go again. Channel failures lead to a jittered backoff and a fresh
// connection. Every wait races the shutdown signal.
//
// The transition table is the pure `SessionState::next`; `Session::run`
// performs the I/O for each state and feeds the resulting events through it.

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::backoff::Backoff;
use crate::board::BoardState;
use crate::channel::{Channel, Connector, InboundMessage};
use crate::config::Config;
use crate::debug_logger::DebugLogger;
use crate::difficulty::Difficulty;
use crate::error::{ChannelError, ConfigError, SessionError};
use crate::evaluator::Evaluator;
use crate::protocol::OutboundMessage;
use crate::stats::{SessionOutcome, StatsCounter, StatsTracker};
use crate::types::PlayerId;

/// Scheduled reconnect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// Consecutive failures so far, this one included
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingRole,
    Playing { player_id: PlayerId },
    GameOver { outcome: SessionOutcome },
    Reconnecting(Retry),
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    ConnectFailed(Retry),
    RoleAssigned(PlayerId),
    BoardUpdated,
    GameEnded(SessionOutcome),
    NextGameOffered,
    ChannelFailed(Retry),
    BackoffElapsed,
    Stop,
}

impl SessionState {
    /// Transition table. Events that do not apply to the current state leave it unchanged.
    pub fn next(self, event: SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (_, E::Stop) => S::ShuttingDown,
            (S::ShuttingDown, _) => S::ShuttingDown,

            (S::Connecting, E::Connected) => S::AwaitingRole,
            (S::Connecting, E::ConnectFailed(retry)) => S::Reconnecting(retry),

            (S::AwaitingRole, E::RoleAssigned(player_id)) => S::Playing { player_id },

            (state @ S::Playing { .. }, E::BoardUpdated) => state,
            (S::Playing { .. }, E::GameEnded(outcome)) => S::GameOver { outcome },

            (S::GameOver { .. }, E::NextGameOffered) => S::AwaitingRole,

            (
                S::Connecting | S::AwaitingRole | S::Playing { .. } | S::GameOver { .. },
                E::ChannelFailed(retry),
            ) => S::Reconnecting(retry),

            (S::Reconnecting(_), E::BackoffElapsed) => S::Connecting,

            (state, _) => state,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::AwaitingRole => write!(f, "awaiting role"),
            SessionState::Playing { player_id } => write!(f, "playing as {}", player_id),
            SessionState::GameOver { outcome } => write!(f, "game over ({})", outcome.as_str()),
            SessionState::Reconnecting(retry) => {
                write!(f, "reconnecting (attempt {}, in {:?})", retry.attempt, retry.delay)
            }
            SessionState::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Resolves once the shutdown flag is set. Never resolves if the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// What the Playing / AwaitingRole loop should do after one message
enum Step {
    Continue,
    Event(SessionEvent),
    Fail(ChannelError),
}

/// One robot: a connector, an evaluator and the running statistics
pub struct Session<C: Connector> {
    connector: C,
    config: Config,
    difficulty: Difficulty,
    evaluator: Arc<Evaluator>,
    state: SessionState,
    stats: StatsTracker,
    stats_tx: watch::Sender<StatsCounter>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    jitter_rng: StdRng,
    seed: u64,
    debug_logger: DebugLogger,
    games_completed: u32,
    update_seq: u64,
    last_tick: Option<u64>,
    /// Last tick answered in a game the channel dropped out of. It is recorded
    /// as aborted unless a later running board resumes it.
    interrupted: Option<u64>,
    /// Message read while skipping ahead to the newest update
    pending: Option<Result<InboundMessage, ChannelError>>,
}

impl<C: Connector> Session<C> {
    /// Creates a session; fails if the configured difficulty is out of range
    ///
    /// # Arguments
    /// * `connector` - Opens channels to the game server
    /// * `config` - Validated configuration
    /// * `shutdown` - Set to `true` to stop the session from any state
    pub fn new(
        connector: C,
        config: Config,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ConfigError> {
        let difficulty = config.difficulty()?;
        let seed = config.robot.seed.unwrap_or_else(|| rand::rng().random());
        let (stats_tx, _) = watch::channel(StatsCounter::default());

        Ok(Session {
            connector,
            difficulty,
            evaluator: Arc::new(Evaluator::new(config.evaluator.clone())),
            state: SessionState::Connecting,
            stats: StatsTracker::new(),
            stats_tx,
            shutdown,
            backoff: Backoff::new(&config.reconnect),
            jitter_rng: StdRng::seed_from_u64(seed),
            seed,
            debug_logger: DebugLogger::disabled(),
            games_completed: 0,
            update_seq: 0,
            last_tick: None,
            interrupted: None,
            pending: None,
            config,
        })
    }

    pub fn with_debug_logger(mut self, logger: DebugLogger) -> Self {
        self.debug_logger = logger;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stats(&self) -> StatsCounter {
        self.stats.snapshot()
    }

    /// Receiver that sees every statistics update
    pub fn subscribe_stats(&self) -> watch::Receiver<StatsCounter> {
        self.stats_tx.subscribe()
    }

    fn transition(&mut self, event: SessionEvent) {
        let next = self.state.clone().next(event);
        if next != self.state {
            info!("Session: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn record(&mut self, outcome: SessionOutcome) {
        self.stats.record(outcome);
        let snapshot = self.stats.snapshot();
        self.stats_tx.send_replace(snapshot);
        info!("Game {}: {}", outcome.as_str(), snapshot);
    }

    /// Drives the state machine until shutdown
    ///
    /// # Returns
    /// * `Ok(StatsCounter)` - Final statistics after a requested shutdown
    /// * `Err(SessionError)` - The configured consecutive-failure cap was reached
    pub async fn run(&mut self) -> Result<StatsCounter, SessionError> {
        info!("Session starting at difficulty {} (seed {})", self.difficulty, self.seed);
        let mut channel: Option<C::Channel> = None;

        loop {
            if *self.shutdown.borrow() && self.state != SessionState::ShuttingDown {
                self.transition(SessionEvent::Stop);
            }

            match self.state.clone() {
                SessionState::Connecting => {
                    let attempt = tokio::select! {
                        biased;
                        _ = stopped(&mut self.shutdown) => None,
                        result = self.connector.connect() => Some(result),
                    };
                    match attempt {
                        None => self.transition(SessionEvent::Stop),
                        Some(Ok(mut ch)) => {
                            self.backoff.reset();
                            self.last_tick = None;
                            self.pending = None;
                            self.transition(SessionEvent::Connected);
                            match ch.send(OutboundMessage::ready()).await {
                                Ok(()) => {
                                    info!("Ready! Playing at difficulty {}", self.difficulty);
                                    channel = Some(ch);
                                }
                                Err(e) => {
                                    ch.close().await;
                                    self.fail(e)?;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let retry = self.schedule_retry(e)?;
                            self.transition(SessionEvent::ConnectFailed(retry));
                        }
                    }
                }

                SessionState::AwaitingRole | SessionState::Playing { .. } => {
                    let Some(ch) = channel.as_mut() else {
                        self.fail(ChannelError::Closed)?;
                        continue;
                    };
                    let next = match self.pending.take() {
                        Some(message) => Some(message),
                        None => tokio::select! {
                            biased;
                            _ = stopped(&mut self.shutdown) => None,
                            message = ch.receive() => Some(message),
                        },
                    };
                    let step = match next {
                        None => Step::Event(SessionEvent::Stop),
                        Some(Ok(message)) => {
                            // The move deadline runs from here, not from when evaluation starts
                            let received = Instant::now();
                            let message = self.newest_update(ch, message);
                            self.handle_message(ch, message, received).await
                        }
                        Some(Err(e)) => Step::Fail(e),
                    };
                    match step {
                        Step::Continue => {}
                        Step::Event(event) => self.transition(event),
                        Step::Fail(e) => {
                            if let Some(mut ch) = channel.take() {
                                ch.close().await;
                            }
                            self.fail(e)?;
                        }
                    }
                }

                SessionState::GameOver { .. } => {
                    if let Some(max) = self.config.robot.max_games {
                        if self.games_completed >= max {
                            info!("Played {} game(s), stopping", self.games_completed);
                            self.transition(SessionEvent::Stop);
                            continue;
                        }
                    }

                    let delay = self.config.timing.ready_delay();
                    let elapsed = tokio::select! {
                        biased;
                        _ = stopped(&mut self.shutdown) => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if !elapsed {
                        self.transition(SessionEvent::Stop);
                        continue;
                    }

                    let sent = match channel.as_mut() {
                        Some(ch) => ch.send(OutboundMessage::ready()).await,
                        None => Err(ChannelError::Closed),
                    };
                    match sent {
                        Ok(()) => {
                            info!("Ready for next game!");
                            self.last_tick = None;
                            self.transition(SessionEvent::NextGameOffered);
                        }
                        Err(e) => {
                            if let Some(mut ch) = channel.take() {
                                ch.close().await;
                            }
                            self.fail(e)?;
                        }
                    }
                }

                SessionState::Reconnecting(retry) => {
                    let elapsed = tokio::select! {
                        biased;
                        _ = stopped(&mut self.shutdown) => false,
                        _ = tokio::time::sleep(retry.delay) => true,
                    };
                    self.transition(if elapsed {
                        SessionEvent::BackoffElapsed
                    } else {
                        SessionEvent::Stop
                    });
                }

                SessionState::ShuttingDown => {
                    if let Some(mut ch) = channel.take() {
                        ch.close().await;
                    }
                    self.settle_interrupted(None);
                    let snapshot = self.stats.snapshot();
                    info!("Session stopped: {}", snapshot);
                    return Ok(snapshot);
                }
            }
        }
    }

    /// Handles a channel failure from any connected state
    fn fail(&mut self, e: ChannelError) -> Result<(), SessionError> {
        warn!("Channel failure while {}: {}", self.state, e);
        if matches!(self.state, SessionState::Playing { .. }) {
            self.interrupted = Some(self.last_tick.unwrap_or(0));
        }
        let retry = self.schedule_retry(e)?;
        self.transition(SessionEvent::ChannelFailed(retry));
        Ok(())
    }

    /// Computes the next backoff, or gives up once the failure cap is hit
    fn schedule_retry(&mut self, e: ChannelError) -> Result<Retry, SessionError> {
        let delay = self.backoff.next_delay(&mut self.jitter_rng);
        let attempt = self.backoff.failures();

        if let Some(cap) = self.config.reconnect.max_consecutive_failures {
            if attempt >= cap {
                error!("Giving up after {} consecutive failures", attempt);
                self.settle_interrupted(None);
                self.state = SessionState::ShuttingDown;
                return Err(SessionError::RetriesExhausted { attempts: attempt, last: e });
            }
        }

        info!("Reconnect attempt {} in {:?} ({})", attempt, delay, e);
        Ok(Retry { attempt, delay })
    }

    /// Records the interrupted game as aborted unless `resumed_tick` continues it
    fn settle_interrupted(&mut self, resumed_tick: Option<u64>) {
        let Some(last) = self.interrupted.take() else {
            return;
        };
        match resumed_tick {
            Some(tick) if tick > last => info!("Resuming interrupted game at tick {}", tick),
            _ => self.record(SessionOutcome::Aborted),
        }
    }

    /// Skips ahead to the newest update already buffered on the channel.
    /// The first message of any other kind is kept for the next read.
    fn newest_update(&mut self, ch: &mut C::Channel, message: InboundMessage) -> InboundMessage {
        let InboundMessage::BoardUpdate(mut game) = message else {
            return message;
        };
        let mut skipped = 0;
        while let Some(next) = ch.receive().now_or_never() {
            match next {
                Ok(InboundMessage::BoardUpdate(newer)) => {
                    game = newer;
                    skipped += 1;
                }
                other => {
                    self.pending = Some(other);
                    break;
                }
            }
        }
        if skipped > 0 {
            debug!("Skipped {} queued update(s)", skipped);
        }
        InboundMessage::BoardUpdate(game)
    }

    async fn handle_message(
        &mut self,
        ch: &mut C::Channel,
        message: InboundMessage,
        received: Instant,
    ) -> Step {
        match (self.state.clone(), message) {
            (SessionState::AwaitingRole, InboundMessage::RoleAssignment(player_id)) => {
                info!("Game started! Playing as player {}", player_id);
                self.settle_interrupted(None);
                self.last_tick = None;
                Step::Event(SessionEvent::RoleAssigned(player_id))
            }
            (SessionState::AwaitingRole, InboundMessage::BoardUpdate(game)) => {
                // The game is already running; we play the slot we connected as
                let player_id = ch.player_id();
                info!("Joined a running game as player {}", player_id);
                // A running board without a tick can only be the game we dropped out of
                let tick = game.get("tick").and_then(serde_json::Value::as_u64);
                self.settle_interrupted(Some(tick.unwrap_or(u64::MAX)));
                self.last_tick = None;
                self.transition(SessionEvent::RoleAssigned(player_id));
                self.play_tick(ch, player_id, game, received).await
            }
            (SessionState::AwaitingRole, InboundMessage::GameOverNotice { winner }) => {
                // A game we were not playing ended; offer ourselves for the next one
                debug!("Game ended while awaiting a role (winner {:?})", winner);
                self.settle_interrupted(None);
                self.last_tick = None;
                let elapsed = tokio::select! {
                    biased;
                    _ = stopped(&mut self.shutdown) => false,
                    _ = tokio::time::sleep(self.config.timing.ready_delay()) => true,
                };
                if !elapsed {
                    return Step::Event(SessionEvent::Stop);
                }
                match ch.send(OutboundMessage::ready()).await {
                    Ok(()) => {
                        info!("Ready for next game!");
                        Step::Continue
                    }
                    Err(e) => Step::Fail(e),
                }
            }
            (SessionState::Playing { player_id }, InboundMessage::BoardUpdate(game)) => {
                self.play_tick(ch, player_id, game, received).await
            }
            (SessionState::Playing { player_id }, InboundMessage::GameOverNotice { winner }) => {
                let outcome = match winner {
                    Some(w) if w == player_id => SessionOutcome::Win,
                    Some(_) => SessionOutcome::Loss,
                    None => SessionOutcome::Draw,
                };
                self.games_completed += 1;
                self.record(outcome);
                Step::Event(SessionEvent::GameEnded(outcome))
            }
            (_, InboundMessage::Waiting) => {
                debug!("Waiting for opponent...");
                Step::Continue
            }
            (_, InboundMessage::ServerError(message)) => Step::Fail(ChannelError::Server(message)),
            (state, message) => {
                debug!("Ignoring {:?} while {}", message, state);
                Step::Continue
            }
        }
    }

    /// Parses one update, evaluates it and answers with exactly one move
    async fn play_tick(
        &mut self,
        ch: &mut C::Channel,
        player_id: PlayerId,
        game: serde_json::Value,
        received: Instant,
    ) -> Step {
        self.update_seq += 1;

        let board = match BoardState::from_json(&game, self.config.grid.size(), self.update_seq) {
            Ok(board) => board,
            Err(e) => {
                warn!("Skipping malformed update: {}", e);
                return Step::Continue;
            }
        };
        if self.last_tick.is_some_and(|last| board.tick <= last) {
            debug!("Skipping stale tick {}", board.tick);
            return Step::Continue;
        }
        if board.terminal {
            debug!("Tick {} is terminal, no move", board.tick);
            return Step::Continue;
        }

        let seed = tick_seed(self.seed, board.tick);
        let deadline = received + Duration::from_millis(self.config.timing.effective_budget_ms());
        let evaluator = Arc::clone(&self.evaluator);
        let difficulty = self.difficulty;
        let task_board = board.clone();
        let evaluated = tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            evaluator.select_move_with_deadline(&task_board, player_id, difficulty, &mut rng, Some(deadline))
        })
        .await;

        let decision = match evaluated {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!("Skipping tick {}: {}", board.tick, e);
                return Step::Continue;
            }
            Err(e) => {
                error!("Evaluator task failed on tick {}: {}", board.tick, e);
                return Step::Continue;
            }
        };

        if decision.timed_out {
            debug!(
                "Tick {}: deadline hit, using depth {} result",
                board.tick, decision.depth_reached
            );
        }
        debug!(
            "Tick {}: {} (score {}, depth {}, {}ms)",
            board.tick,
            decision.direction,
            decision.score,
            decision.depth_reached,
            received.elapsed().as_millis()
        );

        self.last_tick = Some(board.tick);
        let direction = decision.direction;
        self.debug_logger
            .log_decision(player_id, difficulty, seed, board, &decision);

        match ch.send(OutboundMessage::Move { direction }).await {
            Ok(()) => Step::Event(SessionEvent::BoardUpdated),
            Err(e) => Step::Fail(e),
        }
    }
}

/// Per-tick evaluator seed; replaying a logged tick with it reproduces the move
pub fn tick_seed(base: u64, tick: u64) -> u64 {
    base ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY: Retry = Retry {
        attempt: 1,
        delay: Duration::from_millis(500),
    };

    fn connected_states() -> Vec<SessionState> {
        vec![
            SessionState::Connecting,
            SessionState::AwaitingRole,
            SessionState::Playing { player_id: PlayerId(1) },
            SessionState::GameOver { outcome: SessionOutcome::Win },
        ]
    }

    #[test]
    fn test_happy_path() {
        let state = SessionState::Connecting
            .next(SessionEvent::Connected)
            .next(SessionEvent::RoleAssigned(PlayerId(2)));
        assert_eq!(state, SessionState::Playing { player_id: PlayerId(2) });

        let state = state.next(SessionEvent::BoardUpdated);
        assert_eq!(state, SessionState::Playing { player_id: PlayerId(2) });

        let state = state.next(SessionEvent::GameEnded(SessionOutcome::Loss));
        assert_eq!(state, SessionState::GameOver { outcome: SessionOutcome::Loss });

        assert_eq!(state.next(SessionEvent::NextGameOffered), SessionState::AwaitingRole);
    }

    #[test]
    fn test_channel_failure_always_reconnects() {
        for state in connected_states() {
            assert_eq!(
                state.clone().next(SessionEvent::ChannelFailed(RETRY)),
                SessionState::Reconnecting(RETRY),
                "from {}",
                state
            );
        }
    }

    #[test]
    fn test_connect_failure_and_backoff_loop() {
        let state = SessionState::Connecting.next(SessionEvent::ConnectFailed(RETRY));
        assert_eq!(state, SessionState::Reconnecting(RETRY));
        assert_eq!(state.next(SessionEvent::BackoffElapsed), SessionState::Connecting);
    }

    #[test]
    fn test_stop_from_any_state_is_final() {
        let mut all = connected_states();
        all.push(SessionState::Reconnecting(RETRY));
        all.push(SessionState::ShuttingDown);
        for state in all {
            let stopped = state.next(SessionEvent::Stop);
            assert_eq!(stopped, SessionState::ShuttingDown);
            assert_eq!(stopped.next(SessionEvent::Connected), SessionState::ShuttingDown);
        }
    }

    #[test]
    fn test_inapplicable_events_are_ignored() {
        assert_eq!(
            SessionState::AwaitingRole.next(SessionEvent::GameEnded(SessionOutcome::Win)),
            SessionState::AwaitingRole
        );
        assert_eq!(
            SessionState::Connecting.next(SessionEvent::BoardUpdated),
            SessionState::Connecting
        );
    }

    #[test]
    fn test_tick_seed_varies_by_tick() {
        assert_ne!(tick_seed(7, 1), tick_seed(7, 2));
        assert_eq!(tick_seed(7, 3), tick_seed(7, 3));
    }
}
