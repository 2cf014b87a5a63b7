// Reaction events in, vote casts out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::glyph;
use crate::ids::{ChannelId, MessageId, UserId};
use crate::live_vote::LiveVoteRegistry;
use crate::platform::ChatPlatform;
use crate::store::AggregateStore;

/// A reaction-added notification from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub voter_id: UserId,
    pub glyph: String,
    /// The reaction was placed by the bot itself (e.g. seeding the glyphs).
    pub reactor_is_self: bool,
}

/// What a reaction turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    SelfReaction,
    /// The message does not carry a live vote.
    NotALiveVote,
    UnknownGlyph,
    /// A valid glyph past the end of this vote's candidate list.
    NoSuchCandidate { position: usize },
    Counted {
        poll: String,
        candidate: UserId,
        /// Glyph the voter held before, if it has to be taken back.
        retract: Option<String>,
    },
}

pub struct ReactionHandler {
    store: Arc<AggregateStore>,
    registry: Arc<LiveVoteRegistry>,
}

impl ReactionHandler {
    pub fn new(store: Arc<AggregateStore>, registry: Arc<LiveVoteRegistry>) -> Self {
        ReactionHandler { store, registry }
    }

    /// Apply `event` to the live-vote registry and the store without touching
    /// the network.
    pub fn apply(&self, event: &ReactionEvent) -> ReactionOutcome {
        if event.reactor_is_self {
            return ReactionOutcome::SelfReaction;
        }

        let Some(vote) = self.registry.lookup(event.message_id) else {
            return ReactionOutcome::NotALiveVote;
        };

        let Some(position) = glyph::position_of(&event.glyph) else {
            return ReactionOutcome::UnknownGlyph;
        };
        let Some(candidate) = vote.candidate_at(position) else {
            return ReactionOutcome::NoSuchCandidate { position };
        };

        self.store
            .cast_vote(&vote.poll, &candidate.to_string(), event.voter_id);

        let retract = self
            .registry
            .record_choice(event.message_id, event.voter_id, event.glyph.clone())
            .filter(|previous| *previous != event.glyph);

        info!(
            poll = %vote.poll,
            voter = %event.voter_id,
            %candidate,
            message = %event.message_id,
            "live vote counted"
        );

        ReactionOutcome::Counted {
            poll: vote.poll,
            candidate,
            retract,
        }
    }

    /// Apply `event`, then ask the platform to drop the voter's previous
    /// glyph. A failed retraction is logged and the vote stands.
    pub async fn handle(
        &self,
        event: &ReactionEvent,
        platform: &dyn ChatPlatform,
    ) -> ReactionOutcome {
        let outcome = self.apply(event);

        match &outcome {
            ReactionOutcome::Counted {
                retract: Some(old), ..
            } => {
                if let Err(e) = platform
                    .remove_reaction(event.channel_id, event.message_id, old, event.voter_id)
                    .await
                {
                    warn!(
                        message = %event.message_id,
                        voter = %event.voter_id,
                        "failed to remove previous reaction {old}: {e}"
                    );
                }
            }
            ReactionOutcome::Counted { .. } => {}
            other => {
                debug!(message = %event.message_id, glyph = %event.glyph, "reaction ignored: {other:?}");
            }
        }

        outcome
    }
}
