// Integration tests for the session driver against a scripted connector
//
// The tokio clock is paused, so backoff sleeps and the ready delay complete
// instantly while still advancing virtual time we can measure.

use async_trait::async_trait;
use copperhead_robot::channel::{Channel, Connector, InboundMessage};
use copperhead_robot::config::Config;
use copperhead_robot::error::{ChannelError, SessionError};
use copperhead_robot::protocol::OutboundMessage;
use copperhead_robot::session::Session;
use copperhead_robot::types::PlayerId;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

struct ScriptedChannel {
    inbound: mpsc::UnboundedReceiver<InboundMessage>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    slot: PlayerId,
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), ChannelError> {
        self.outbound.send(message).map_err(|_| ChannelError::Closed)
    }

    async fn receive(&mut self) -> Result<InboundMessage, ChannelError> {
        self.inbound.recv().await.ok_or(ChannelError::Closed)
    }

    fn player_id(&self) -> PlayerId {
        self.slot
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Hands out pre-built channels in order, then refuses every further attempt
struct ScriptedConnector {
    script: VecDeque<ScriptedChannel>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Channel = ScriptedChannel;

    async fn connect(&mut self) -> Result<ScriptedChannel, ChannelError> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.script.pop_front().ok_or_else(|| ChannelError::Connect {
            url: "ws://test/ws/1".to_string(),
            reason: "refused".to_string(),
        })
    }
}

/// Test side of one scripted channel
struct Peer {
    to_robot: mpsc::UnboundedSender<InboundMessage>,
    from_robot: mpsc::UnboundedReceiver<OutboundMessage>,
}

fn pipe(slot: u8) -> (ScriptedChannel, Peer) {
    let (to_robot, inbound) = mpsc::unbounded_channel();
    let (outbound, from_robot) = mpsc::unbounded_channel();
    (
        ScriptedChannel {
            inbound,
            outbound,
            slot: PlayerId(slot),
        },
        Peer { to_robot, from_robot },
    )
}

fn connector(channels: Vec<ScriptedChannel>) -> (ScriptedConnector, Arc<Mutex<Vec<Instant>>>) {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    (
        ScriptedConnector {
            script: channels.into(),
            attempts: attempts.clone(),
        },
        attempts,
    )
}

fn config() -> Config {
    let mut config = Config::default_hardcoded();
    config.robot.seed = Some(7);
    config
}

/// Running game on a 10x10 board, player 1 heading right in open space
fn game(tick: u64) -> Value {
    json!({
        "running": true,
        "tick": tick,
        "width": 10,
        "height": 10,
        "snakes": {
            "1": { "body": [[5, 5], [4, 5], [3, 5]], "direction": "right", "alive": true },
            "2": { "body": [[5, 1], [6, 1], [7, 1]], "direction": "left", "alive": true }
        },
        "food": [[8, 8]]
    })
}

fn is_move(message: &OutboundMessage) -> bool {
    matches!(message, OutboundMessage::Move { .. })
}

#[tokio::test(start_paused = true)]
async fn test_plays_games_until_max_games() {
    let (channel, mut peer) = pipe(1);
    let (connector, attempts) = connector(vec![channel]);
    let mut config = config();
    config.robot.max_games = Some(2);

    for message in [
        InboundMessage::RoleAssignment(PlayerId(1)),
        InboundMessage::BoardUpdate(game(1)),
        InboundMessage::GameOverNotice { winner: Some(PlayerId(1)) },
        InboundMessage::Waiting,
        InboundMessage::RoleAssignment(PlayerId(1)),
        InboundMessage::BoardUpdate(game(1)),
        InboundMessage::GameOverNotice { winner: None },
    ] {
        peer.to_robot.send(message).unwrap();
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config, shutdown_rx).unwrap();
    let stats = session.run().await.unwrap();

    assert_eq!(stats.wins, 1);
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.games(), 2);
    assert_eq!(attempts.lock().unwrap().len(), 1);

    let mut sent = Vec::new();
    while let Ok(message) = peer.from_robot.try_recv() {
        sent.push(message);
    }
    assert_eq!(sent.len(), 4, "sent: {:?}", sent);
    assert_eq!(sent[0], OutboundMessage::ready());
    assert!(is_move(&sent[1]));
    assert_eq!(sent[2], OutboundMessage::ready());
    assert!(is_move(&sent[3]));
}

#[tokio::test(start_paused = true)]
async fn test_channel_loss_mid_game_reconnects_after_backoff() {
    let (first, mut first_peer) = pipe(1);
    let (second, mut second_peer) = pipe(1);
    let (connector, attempts) = connector(vec![first, second]);

    first_peer.to_robot.send(InboundMessage::RoleAssignment(PlayerId(1))).unwrap();
    first_peer.to_robot.send(InboundMessage::BoardUpdate(game(1))).unwrap();
    // Hang up once the buffered messages are consumed
    drop(first_peer.to_robot);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config(), shutdown_rx).unwrap();
    let stats_rx = session.subscribe_stats();
    let handle = tokio::spawn(async move { session.run().await });

    assert_eq!(first_peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    assert!(is_move(&first_peer.from_robot.recv().await.unwrap()));
    // The dead channel is dropped without any further traffic
    assert_eq!(first_peer.from_robot.recv().await, None);

    assert_eq!(second_peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    {
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_millis(500));
    }
    // Still open: a running board could resume the game
    assert_eq!(stats_rx.borrow().aborted, 0);

    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.games(), 1);
    drop(second_peer.to_robot);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_consecutive_failures() {
    let (connector, attempts) = connector(vec![]);
    let mut config = config();
    config.reconnect.max_consecutive_failures = Some(3);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config, shutdown_rx).unwrap();

    match session.run().await {
        Err(SessionError::RetriesExhausted { attempts: count, last }) => {
            assert_eq!(count, 3);
            assert!(matches!(last, ChannelError::Connect { .. }));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(500));
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_backoff() {
    let (connector, attempts) = connector(vec![]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config(), shutdown_rx).unwrap();
    let handle = tokio::spawn(async move { session.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.games(), 0);
    assert_eq!(attempts.lock().unwrap().len(), 1);
}

/// Lets the session drain whatever it has been sent
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_skips_malformed_and_stale_updates() {
    let (channel, mut peer) = pipe(1);
    let (connector, _) = connector(vec![channel]);

    peer.to_robot.send(InboundMessage::RoleAssignment(PlayerId(1))).unwrap();
    peer.to_robot
        .send(InboundMessage::BoardUpdate(json!({ "running": true, "snakes": "garbage" })))
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config(), shutdown_rx).unwrap();
    let handle = tokio::spawn(async move { session.run().await });

    assert_eq!(peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    settle().await;

    peer.to_robot.send(InboundMessage::BoardUpdate(game(5))).unwrap();
    assert!(is_move(&peer.from_robot.recv().await.unwrap()));

    for tick in [5, 4] {
        peer.to_robot.send(InboundMessage::BoardUpdate(game(tick))).unwrap();
        settle().await;
    }
    peer.to_robot.send(InboundMessage::BoardUpdate(game(6))).unwrap();
    assert!(is_move(&peer.from_robot.recv().await.unwrap()));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert!(peer.from_robot.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_answers_only_newest_buffered_update() {
    let (channel, mut peer) = pipe(1);
    let (connector, _) = connector(vec![channel]);

    for message in [
        InboundMessage::RoleAssignment(PlayerId(1)),
        InboundMessage::BoardUpdate(game(1)),
        InboundMessage::BoardUpdate(game(2)),
        InboundMessage::BoardUpdate(game(3)),
    ] {
        peer.to_robot.send(message).unwrap();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config(), shutdown_rx).unwrap();
    let handle = tokio::spawn(async move { session.run().await });

    assert_eq!(peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    assert!(is_move(&peer.from_robot.recv().await.unwrap()));

    // Tick 3 was the one answered, so it is now stale
    peer.to_robot.send(InboundMessage::BoardUpdate(game(3))).unwrap();
    settle().await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert!(peer.from_robot.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_resumed_game_is_recorded_once() {
    let (first, first_peer) = pipe(1);
    let (second, second_peer) = pipe(1);
    let (connector, attempts) = connector(vec![first, second]);
    let mut config = config();
    config.robot.max_games = Some(1);

    first_peer.to_robot.send(InboundMessage::RoleAssignment(PlayerId(1))).unwrap();
    first_peer.to_robot.send(InboundMessage::BoardUpdate(game(1))).unwrap();
    drop(first_peer.to_robot);
    second_peer.to_robot.send(InboundMessage::BoardUpdate(game(2))).unwrap();
    second_peer
        .to_robot
        .send(InboundMessage::GameOverNotice { winner: Some(PlayerId(1)) })
        .unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config, shutdown_rx).unwrap();
    let stats = session.run().await.unwrap();

    assert_eq!(stats.wins, 1);
    assert_eq!(stats.aborted, 0);
    assert_eq!(stats.games(), 1);
    assert_eq!(attempts.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_new_game_after_reconnect_aborts_the_lost_one() {
    let (first, first_peer) = pipe(1);
    let (second, second_peer) = pipe(1);
    let (connector, _) = connector(vec![first, second]);
    let mut config = config();
    config.robot.max_games = Some(1);

    first_peer.to_robot.send(InboundMessage::RoleAssignment(PlayerId(1))).unwrap();
    first_peer.to_robot.send(InboundMessage::BoardUpdate(game(7))).unwrap();
    drop(first_peer.to_robot);
    for message in [
        InboundMessage::RoleAssignment(PlayerId(1)),
        InboundMessage::BoardUpdate(game(1)),
        InboundMessage::GameOverNotice { winner: Some(PlayerId(2)) },
    ] {
        second_peer.to_robot.send(message).unwrap();
    }

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config, shutdown_rx).unwrap();
    let stats = session.run().await.unwrap();

    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.games(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_game_over_while_awaiting_role_offers_ready_again() {
    let (channel, mut peer) = pipe(1);
    let (connector, _) = connector(vec![channel]);

    peer.to_robot
        .send(InboundMessage::GameOverNotice { winner: Some(PlayerId(2)) })
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config(), shutdown_rx).unwrap();
    let handle = tokio::spawn(async move { session.run().await });

    let start = Instant::now();
    assert_eq!(peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    assert_eq!(peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    assert!(start.elapsed() >= config().timing.ready_delay());

    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.games(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_triggers_reconnect() {
    let (first, mut first_peer) = pipe(1);
    let (second, mut second_peer) = pipe(2);
    let (connector, attempts) = connector(vec![first, second]);

    first_peer
        .to_robot
        .send(InboundMessage::ServerError("slot taken".to_string()))
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut session = Session::new(connector, config(), shutdown_rx).unwrap();
    let handle = tokio::spawn(async move { session.run().await });

    assert_eq!(first_peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    assert_eq!(second_peer.from_robot.recv().await, Some(OutboundMessage::ready()));
    assert_eq!(attempts.lock().unwrap().len(), 2);

    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap().unwrap();
    // No game was in progress, so nothing is recorded
    assert_eq!(stats.games(), 0);
}
