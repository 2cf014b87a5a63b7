// Library root for the registration/poll core: the aggregate store, raffle
// sampling, and the live reaction-vote state machine.

pub mod glyph;
pub mod ids;
pub mod live_vote;
pub mod names;
pub mod platform;
pub mod raffle;
pub mod reaction;
pub mod store;

pub use ids::{ChannelId, MessageId, UserId};
pub use live_vote::{LiveVote, LiveVoteError, LiveVoteRegistry};
pub use platform::ChatPlatform;
pub use reaction::{ReactionEvent, ReactionHandler, ReactionOutcome};
pub use store::{AggregateStore, LoadReport, StoreError, StorePaths};
