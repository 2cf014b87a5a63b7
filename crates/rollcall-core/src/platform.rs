// The chat platform as seen from the core: a handful of best-effort calls.

use async_trait::async_trait;
use tracing::debug;

use crate::ids::{ChannelId, MessageId, UserId};

/// Outbound operations against the chat platform.
///
/// Every call is best-effort from the core's point of view: callers log a
/// failure and carry on, and none of these is ever awaited while the store
/// or live-vote lock is held.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Human-readable name for `user`.
    async fn resolve_display_name(&self, user: UserId) -> anyhow::Result<String>;

    /// Post `text` to `channel`, returning the id of the new message.
    async fn post_reply(&self, channel: ChannelId, text: &str) -> anyhow::Result<MessageId>;

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        glyph: &str,
    ) -> anyhow::Result<()>;

    /// Take `user`'s `glyph` reaction off `message`.
    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        glyph: &str,
        user: UserId,
    ) -> anyhow::Result<()>;
}

/// Resolve a display name, falling back to the raw id.
pub async fn display_name_or_id(platform: &dyn ChatPlatform, user: UserId) -> String {
    match platform.resolve_display_name(user).await {
        Ok(name) if !name.trim().is_empty() => name,
        Ok(_) => user.to_string(),
        Err(e) => {
            debug!(%user, "display name lookup failed: {e}");
            user.to_string()
        }
    }
}
