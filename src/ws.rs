// WebSocket channel over tokio-tungstenite
//
// CopperHead addresses player slots by URL: ws://host/ws/1, ws://host/ws/2.
// The connector tries each configured slot in order.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::channel::{Channel, Connector, InboundMessage};
use crate::error::ChannelError;
use crate::protocol::{self, OutboundMessage};
use crate::types::PlayerId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    endpoint: Url,
    slots: Vec<PlayerId>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(endpoint: Url, slots: Vec<PlayerId>, connect_timeout: Duration) -> Self {
        WsConnector {
            endpoint,
            slots,
            connect_timeout,
        }
    }

    /// Endpoint URL for a player slot
    pub fn slot_url(&self, slot: PlayerId) -> String {
        format!("{}{}", self.endpoint, slot)
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&mut self) -> Result<WsChannel, ChannelError> {
        let mut last = ChannelError::Connect {
            url: self.endpoint.to_string(),
            reason: "no player slots configured".to_string(),
        };

        for &slot in &self.slots {
            let url = self.slot_url(slot);
            info!("Connecting to {}", url);
            let attempt = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await;
            match attempt {
                Ok(Ok((stream, _))) => {
                    info!("Connected as player {}", slot);
                    let (writer, reader) = stream.split();
                    return Ok(WsChannel {
                        writer,
                        reader,
                        slot,
                    });
                }
                Ok(Err(e)) => {
                    warn!("Player {} slot failed: {}", slot, e);
                    last = ChannelError::Connect { url, reason: e.to_string() };
                }
                Err(_) => {
                    warn!("Player {} slot timed out after {:?}", slot, self.connect_timeout);
                    last = ChannelError::Connect { url, reason: "timed out".to_string() };
                }
            }
        }

        Err(last)
    }
}

pub struct WsChannel {
    writer: SplitSink<WsStream, Message>,
    reader: SplitStream<WsStream>,
    slot: PlayerId,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), ChannelError> {
        let payload = message.encode()?;
        self.writer
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn receive(&mut self) -> Result<InboundMessage, ChannelError> {
        loop {
            let frame = match self.reader.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => return Err(ChannelError::Closed),
            };

            match frame {
                Message::Text(text) => {
                    if let Some(message) = protocol::decode(text.as_str(), self.slot)? {
                        return Ok(message);
                    }
                    debug!("Ignoring frame: {}", text.as_str());
                }
                Message::Close(_) => return Err(ChannelError::Closed),
                // Pings are answered by tungstenite itself
                _ => {}
            }
        }
    }

    fn player_id(&self) -> PlayerId {
        self.slot
    }

    async fn close(&mut self) {
        let _ = self.writer.send(Message::Close(None)).await;
        let _ = self.writer.close().await;
    }
}
