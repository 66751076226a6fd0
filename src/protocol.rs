// CopperHead wire protocol
//
// The server speaks JSON text frames. Inbound frames carry a "type" tag,
// outbound frames an "action" tag. Coordinates arrive as [x, y] pairs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::channel::InboundMessage;
use crate::error::ChannelError;
use crate::types::{Direction, PlayerId};

/// Game mode requested with every `ready`
pub const TWO_PLAYER_MODE: &str = "two_player";

/// Raw game object of a `state` frame
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct RawGame {
    #[serde(default)]
    pub snakes: Option<BTreeMap<String, RawSnake>>,
    #[serde(default)]
    pub food: Option<RawFood>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub tick: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct RawSnake {
    #[serde(default)]
    pub body: Option<Vec<[i32; 2]>>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub alive: Option<bool>,
}

/// The server sends a single food pair; lists are accepted as well
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawFood {
    One([i32; 2]),
    Many(Vec<[i32; 2]>),
}

impl RawFood {
    pub fn cells(&self) -> Vec<[i32; 2]> {
        match self {
            RawFood::One(cell) => vec![*cell],
            RawFood::Many(cells) => cells.clone(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame {
    State {
        #[serde(default)]
        game: Option<Value>,
    },
    Start {
        #[serde(default)]
        player_id: Option<u8>,
    },
    Gameover {
        #[serde(default)]
        winner: Option<u8>,
    },
    Waiting {},
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Frames sent to the server
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OutboundMessage {
    Ready { mode: String },
    Move { direction: Direction },
}

impl OutboundMessage {
    pub fn ready() -> Self {
        OutboundMessage::Ready {
            mode: TWO_PLAYER_MODE.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Protocol(e.to_string()))
    }
}

/// Decodes one text frame. `slot` is the player id the channel connected as,
/// used when a `start` frame does not name the player.
///
/// Returns `Ok(None)` for frame types the robot does not care about.
pub fn decode(text: &str, slot: PlayerId) -> Result<Option<InboundMessage>, ChannelError> {
    let frame: ServerFrame = serde_json::from_str(text)
        .map_err(|e| ChannelError::Protocol(format!("undecodable frame: {}", e)))?;

    let message = match frame {
        ServerFrame::State { game: Some(game) } => {
            let running = game.get("running").and_then(Value::as_bool).unwrap_or(false);
            if running {
                InboundMessage::BoardUpdate(game)
            } else {
                InboundMessage::Waiting
            }
        }
        ServerFrame::State { game: None } => InboundMessage::Waiting,
        ServerFrame::Start { player_id } => {
            InboundMessage::RoleAssignment(player_id.map(PlayerId).unwrap_or(slot))
        }
        ServerFrame::Gameover { winner } => InboundMessage::GameOverNotice {
            winner: winner.map(PlayerId),
        },
        ServerFrame::Waiting {} => InboundMessage::Waiting,
        ServerFrame::Error { message } => {
            InboundMessage::ServerError(message.unwrap_or_else(|| "unspecified".to_string()))
        }
        ServerFrame::Unknown => return Ok(None),
    };

    Ok(Some(message))
}
