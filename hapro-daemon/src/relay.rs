//! NotificationRelay: the subscription channel to the host's event bus.
//!
//! ```text
//! Connecting ──auth_required/auth──▶ AwaitingAuth ──auth_ok/subscribe──▶ Authenticated
//!                                                                              │
//!                                              result{success:true} ──────────┘
//!                                                        ▼
//!                                                   Subscribed ──event──▶ forward(data)
//!
//! any state ──close──▶ Closed ──(reconnect_delay)──▶ new session
//! ```
//!
//! States only move forward within one connection. A well-formed message that
//! is illegal in the current state is a protocol violation: logged, ignored,
//! state unchanged.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use hapro_client::NotificationSink;

use crate::error::DaemonError;
use crate::protocol::{InboundMessage, OutboundMessage, SUBSCRIBE_ID};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelayState {
    Connecting,
    AwaitingAuth,
    Authenticated,
    Subscribed,
    Closed,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RelayState::Connecting => "connecting",
            RelayState::AwaitingAuth => "awaiting_auth",
            RelayState::Authenticated => "authenticated",
            RelayState::Subscribed => "subscribed",
            RelayState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// What the connection loop should do after one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Reply(OutboundMessage),
    Forward(Value),
    Stay,
    Violation {
        state: RelayState,
        message: &'static str,
    },
}

/// Handshake state for one connection attempt.
#[derive(Debug)]
pub struct RelaySession {
    state: RelayState,
    access_token: String,
    event_type: String,
}

impl RelaySession {
    pub fn new(access_token: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            state: RelayState::Connecting,
            access_token: access_token.into(),
            event_type: event_type.into(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn handle(&mut self, message: InboundMessage) -> Step {
        use InboundMessage as In;
        use RelayState as S;

        match (self.state, message) {
            (_, In::Unknown) => Step::Stay,
            (S::Closed, msg) => self.violation(msg),

            (S::Connecting, In::AuthRequired) => {
                self.state = S::AwaitingAuth;
                Step::Reply(OutboundMessage::Auth {
                    access_token: self.access_token.clone(),
                })
            }
            (S::AwaitingAuth, In::AuthOk) => {
                self.state = S::Authenticated;
                Step::Reply(OutboundMessage::SubscribeEvents {
                    id: SUBSCRIBE_ID,
                    event_type: self.event_type.clone(),
                })
            }
            (S::AwaitingAuth, In::AuthInvalid { message }) => {
                error!(
                    reason = message.as_deref().unwrap_or("unspecified"),
                    "event bus rejected the access token"
                );
                Step::Stay
            }
            (S::Authenticated, In::CommandResult { success: true }) => {
                self.state = S::Subscribed;
                info!(event_type = %self.event_type, "subscribed to host events");
                Step::Stay
            }
            (S::Authenticated, In::CommandResult { success: false }) => {
                warn!(event_type = %self.event_type, "event subscription was refused");
                Step::Stay
            }
            (S::Subscribed, In::CommandResult { .. }) => Step::Stay,
            (S::Subscribed, In::Event { event }) => Step::Forward(event.data),

            (_, msg) => self.violation(msg),
        }
    }

    pub fn close(&mut self) {
        self.state = RelayState::Closed;
    }

    fn violation(&self, message: InboundMessage) -> Step {
        Step::Violation {
            state: self.state,
            message: message.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel seam
// ---------------------------------------------------------------------------

/// A message-oriented duplex channel carrying JSON text frames.
#[async_trait]
pub trait EventChannel: Send {
    /// Next text frame. `None` once the peer has closed; an `Err` is followed
    /// by `None` on the next call.
    async fn recv(&mut self) -> Option<Result<String, DaemonError>>;

    async fn send(&mut self, frame: String) -> Result<(), DaemonError>;
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    type Channel: EventChannel;

    async fn connect(&self) -> Result<Self::Channel, DaemonError>;
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self) -> Result<WsChannel, DaemonError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| DaemonError::Channel(format!("{}: {err}", self.url)))?;
        Ok(WsChannel {
            stream,
            failed: false,
        })
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
}

#[async_trait]
impl EventChannel for WsChannel {
    async fn recv(&mut self) -> Option<Result<String, DaemonError>> {
        if self.failed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(DaemonError::Channel(err.to_string())));
                }
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), DaemonError> {
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|err| DaemonError::Channel(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RelaySettings {
    pub access_token: String,
    pub event_type: String,
    pub reconnect_delay: Duration,
}

/// How far one connection got before it closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub reached: RelayState,
    pub forwarded: usize,
}

/// Drive one connection until the peer closes it.
pub async fn run_session<C: EventChannel>(
    channel: &mut C,
    settings: &RelaySettings,
    sink: &Arc<dyn NotificationSink>,
) -> SessionSummary {
    let mut session = RelaySession::new(settings.access_token.clone(), settings.event_type.clone());
    let mut forwarded = 0usize;

    while let Some(frame) = channel.recv().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                error!(state = %session.state(), error = %err, "subscription channel error");
                continue;
            }
        };
        let Some(message) = InboundMessage::decode(&frame) else {
            debug!("ignoring undecodable frame");
            continue;
        };

        match session.handle(message) {
            Step::Reply(reply) => {
                let encoded = match reply.encode() {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        error!(error = %err, "failed to encode handshake reply");
                        continue;
                    }
                };
                if let Err(err) = channel.send(encoded).await {
                    error!(state = %session.state(), error = %err, "handshake send failed");
                }
            }
            Step::Forward(payload) => {
                forwarded += 1;
                let sink = sink.clone();
                tokio::spawn(async move { sink.send_notification(payload).await });
            }
            Step::Stay => {}
            Step::Violation { state, message } => {
                warn!(%state, message, "protocol violation on subscription channel; ignored");
            }
        }
    }

    let reached = session.state();
    session.close();
    SessionSummary { reached, forwarded }
}

/// Connect, run, and reconnect after `reconnect_delay`, until shutdown. There
/// is no retry ceiling and the delay never grows.
pub async fn run_relay<K: ChannelConnector>(
    connector: K,
    settings: RelaySettings,
    sink: Arc<dyn NotificationSink>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        let attempt = async {
            match connector.connect().await {
                Ok(mut channel) => {
                    debug!("subscription channel opened");
                    Some(run_session(&mut channel, &settings, &sink).await)
                }
                Err(err) => {
                    error!(error = %err, "subscription channel failed to open");
                    None
                }
            }
        };

        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            summary = attempt => {
                let reached = summary.map(|s| s.reached).unwrap_or(RelayState::Connecting);
                warn!(
                    %reached,
                    retry_in_secs = settings.reconnect_delay.as_secs(),
                    "subscription channel closed; reconnecting",
                );
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
    }
}
