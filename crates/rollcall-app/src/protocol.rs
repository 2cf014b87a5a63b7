// JSON messages exchanged with the chat-platform adapter over the bridge.
//
// Inbound messages are tagged by `type`; outbound requests carry a
// `request_id` the adapter echoes back in its ACTION_RESULT.

use rollcall_core::{ChannelId, MessageId, ReactionEvent, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Adapter -> bot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterMessage {
    /// First message after connecting: which platform, and the bot's own id.
    AdapterHello { payload: HelloPayload },
    MessageCreated { payload: ChatMessage },
    ReactionAdded { payload: ReactionPayload },
    ActionResult { payload: ActionResult },
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub platform: String,
    pub self_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// A chat message that may contain a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// `None` for direct messages.
    #[serde(default)]
    pub guild_id: Option<u64>,
    #[serde(default)]
    pub guild_name: Option<String>,
    pub author: Author,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionPayload {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    #[serde(default)]
    pub reactor_is_self: bool,
}

impl ReactionPayload {
    /// Convert to a core event. `self_id` is the bot's identity from the
    /// hello, if one arrived.
    pub fn into_event(self, self_id: Option<UserId>) -> ReactionEvent {
        let reactor_is_self = self.reactor_is_self || self_id == Some(self.user_id);
        ReactionEvent {
            channel_id: self.channel_id,
            message_id: self.message_id,
            voter_id: self.user_id,
            glyph: self.emoji,
            reactor_is_self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub request_id: u64,
    pub ok: bool,
    /// Set for POST_REPLY.
    #[serde(default)]
    pub message_id: Option<MessageId>,
    /// Set for RESOLVE_USER.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Bot -> adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub request_id: u64,
    pub action: BotAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotAction {
    PostReply {
        channel_id: ChannelId,
        text: String,
    },
    AddReaction {
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: String,
    },
    RemoveReaction {
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: String,
        user_id: UserId,
    },
    ResolveUser {
        user_id: UserId,
    },
}

impl BotAction {
    /// Wire name of the action, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            BotAction::PostReply { .. } => "POST_REPLY",
            BotAction::AddReaction { .. } => "ADD_REACTION",
            BotAction::RemoveReaction { .. } => "REMOVE_REACTION",
            BotAction::ResolveUser { .. } => "RESOLVE_USER",
        }
    }
}
