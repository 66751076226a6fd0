// Channel contract consumed by the session
//
// A Connector opens a Channel; a Channel is an ordered, reliable stream of
// structured messages. The WebSocket implementation lives in `ws`, tests
// provide scripted ones.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ChannelError;
use crate::protocol::OutboundMessage;
use crate::types::PlayerId;

/// Messages the session reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The server assigned us a role in a new game
    RoleAssignment(PlayerId),
    /// Raw `game` object of a running game
    BoardUpdate(Value),
    /// The game ended; `None` means a draw
    GameOverNotice { winner: Option<PlayerId> },
    ServerError(String),
    /// Lobby chatter: waiting for an opponent, or an idle board
    Waiting,
}

#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), ChannelError>;

    /// Next message, or `ChannelError::Closed` once the peer hung up.
    /// Must be cancel safe: a dropped call loses no message.
    async fn receive(&mut self) -> Result<InboundMessage, ChannelError>;

    /// Player slot this channel connected as
    fn player_id(&self) -> PlayerId;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send {
    type Channel: Channel;

    async fn connect(&mut self) -> Result<Self::Channel, ChannelError>;
}
