// WebSocket bridge to the chat-platform adapter.
//
// The adapter connects to a local port, streams chat events in as JSON text
// frames, and executes the actions the bot queues for it. `BridgePlatform`
// is the `ChatPlatform` implementation that turns core calls into those
// queued actions and waits for the matching ACTION_RESULT.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use rollcall_core::{ChannelId, ChatPlatform, MessageId, UserId};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::{ActionRequest, ActionResult, BotAction};

/// Events emitted by the bridge to the application layer.
#[derive(Debug, PartialEq)]
pub enum BridgeEvent {
    /// An adapter has connected.
    Connected { addr: String },
    /// The current adapter has disconnected.
    Disconnected,
    /// A text frame from the adapter (raw JSON).
    Message(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("outbound action queue is closed")]
    QueueClosed,

    #[error("no answer from adapter within {0:?}")]
    Timeout(Duration),

    #[error("request {0} was dropped before the adapter answered")]
    Dropped(u64),

    #[error("adapter rejected {action}: {reason}")]
    Rejected { action: &'static str, reason: String },

    #[error("adapter answered {action} without `{field}`")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error("failed to encode action: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Bind the bridge listener on `127.0.0.1:{port}`.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}"))
        .await
        .with_context(|| format!("failed to bind bridge on port {port}"))?;
    info!("bridge listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve adapters one at a time on `listener`.
///
/// Inbound frames are forwarded through `tx`. Actions queued on `outbound`
/// are written to whichever adapter is connected; while none is, they wait
/// in the queue. Returns when `tx` or `outbound` is closed.
pub async fn run(
    listener: TcpListener,
    tx: mpsc::Sender<BridgeEvent>,
    mut outbound: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("accepted TCP connection from {addr_str}");

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {addr_str}: {e}");
                continue;
            }
        };

        if tx
            .send(BridgeEvent::Connected {
                addr: addr_str.clone(),
            })
            .await
            .is_err()
        {
            break;
        }

        let (mut write, read) = ws_stream.split();
        let keep_serving = tokio::select! {
            inbound = process_message_stream(read, &tx, &addr_str) => inbound.is_ok(),
            end = forward_actions(&mut outbound, &mut write) => end == ForwardEnd::ConnectionLost,
        };

        if tx.send(BridgeEvent::Disconnected).await.is_err() || !keep_serving {
            break;
        }
    }

    info!("bridge stopped");
    Ok(())
}

/// Forward text frames from `stream` through `tx` until the peer closes or
/// errors. Returns `Err(())` if the receiver was dropped.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<BridgeEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if tx.send(BridgeEvent::Message(text.to_string())).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("adapter {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong, Frame.
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The socket refused a frame; the queue is still usable.
    ConnectionLost,
    /// Every sender is gone; nothing more will be queued.
    QueueClosed,
}

/// Write queued actions to `sink` as text frames.
pub async fn forward_actions<Si>(outbound: &mut mpsc::Receiver<String>, sink: &mut Si) -> ForwardEnd
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    while let Some(text) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!("failed to write action to adapter: {e}");
            return ForwardEnd::ConnectionLost;
        }
    }
    ForwardEnd::QueueClosed
}

// ---------------------------------------------------------------------------
// ChatPlatform over the bridge
// ---------------------------------------------------------------------------

/// Sends actions to the adapter and matches each ACTION_RESULT to the
/// request that is waiting for it.
pub struct BridgePlatform {
    outbound: mpsc::Sender<String>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ActionResult>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl BridgePlatform {
    pub fn new(outbound: mpsc::Sender<String>, timeout: Duration) -> Self {
        BridgePlatform {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ActionResult>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand an ACTION_RESULT to its waiting request. Returns `false` when no
    /// request with that id is waiting (late or unsolicited answer).
    pub fn complete(&self, result: ActionResult) -> bool {
        let Some(waiter) = self.pending().remove(&result.request_id) else {
            return false;
        };
        waiter.send(result).is_ok()
    }

    /// Fail every waiting request, e.g. after the adapter disconnected.
    /// Returns how many were waiting.
    pub fn abandon_pending(&self) -> usize {
        let mut pending = self.pending();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Queue `action` and wait for a successful ACTION_RESULT.
    async fn request(&self, action: BotAction) -> Result<ActionResult, BridgeError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = action.kind();
        let text = serde_json::to_string(&ActionRequest { request_id, action })?;

        let (waiter, answer) = oneshot::channel();
        self.pending().insert(request_id, waiter);
        debug!(request_id, kind, "queueing action");

        let exchange = async {
            self.outbound
                .send(text)
                .await
                .map_err(|_| BridgeError::QueueClosed)?;
            answer.await.map_err(|_| BridgeError::Dropped(request_id))
        };

        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.pending().remove(&request_id);
                return Err(e);
            }
            Err(_) => {
                self.pending().remove(&request_id);
                return Err(BridgeError::Timeout(self.timeout));
            }
        };

        if !result.ok {
            return Err(BridgeError::Rejected {
                action: kind,
                reason: result
                    .error
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl ChatPlatform for BridgePlatform {
    async fn resolve_display_name(&self, user: UserId) -> anyhow::Result<String> {
        let result = self
            .request(BotAction::ResolveUser { user_id: user })
            .await?;
        let name = result.display_name.ok_or(BridgeError::MissingField {
            action: "RESOLVE_USER",
            field: "display_name",
        })?;
        Ok(name)
    }

    async fn post_reply(&self, channel: ChannelId, text: &str) -> anyhow::Result<MessageId> {
        let result = self
            .request(BotAction::PostReply {
                channel_id: channel,
                text: text.to_string(),
            })
            .await?;
        let message = result.message_id.ok_or(BridgeError::MissingField {
            action: "POST_REPLY",
            field: "message_id",
        })?;
        Ok(message)
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        glyph: &str,
    ) -> anyhow::Result<()> {
        self.request(BotAction::AddReaction {
            channel_id: channel,
            message_id: message,
            emoji: glyph.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        glyph: &str,
        user: UserId,
    ) -> anyhow::Result<()> {
        self.request(BotAction::RemoveReaction {
            channel_id: channel,
            message_id: message,
            emoji: glyph.to_string(),
            user_id: user,
        })
        .await?;
        Ok(())
    }
}
