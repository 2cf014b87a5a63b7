// Live (reaction-driven) votes that are currently open, and the glyph each
// participant holds on each of them.
//
// Nothing here is persisted: a restart forgets open live votes, while the
// tallies they already fed into the aggregate store survive.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::glyph::MAX_CANDIDATES;
use crate::ids::{MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveVoteError {
    #[error("a live vote offers at most 9 candidates, got {0}")]
    TooManyCandidates(usize),

    #[error("a live vote needs at least one candidate")]
    NoCandidates,

    #[error("message {0} already carries a live vote")]
    AlreadyOpen(MessageId),
}

/// A poll bound to one message, with its candidates frozen in glyph order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveVote {
    pub poll: String,
    pub candidates: Vec<UserId>,
}

impl LiveVote {
    /// Candidate behind a 1-based glyph position.
    pub fn candidate_at(&self, position: usize) -> Option<UserId> {
        position
            .checked_sub(1)
            .and_then(|idx| self.candidates.get(idx))
            .copied()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    votes: HashMap<MessageId, LiveVote>,
    choices: HashMap<(MessageId, UserId), String>,
}

/// Open live votes and per-voter glyph choices, behind their own lock
/// (independent of the aggregate store's).
#[derive(Debug, Default)]
pub struct LiveVoteRegistry {
    state: Mutex<RegistryState>,
}

impl LiveVoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start accepting reactions on `message` for `poll`.
    ///
    /// Callers truncate to [`MAX_CANDIDATES`] before calling; a longer list is
    /// rejected rather than cut silently. A message can host one live vote.
    pub fn open(
        &self,
        message: MessageId,
        poll: impl Into<String>,
        candidates: Vec<UserId>,
    ) -> Result<(), LiveVoteError> {
        if candidates.len() > MAX_CANDIDATES {
            return Err(LiveVoteError::TooManyCandidates(candidates.len()));
        }
        if candidates.is_empty() {
            return Err(LiveVoteError::NoCandidates);
        }

        let mut state = self.lock();
        if state.votes.contains_key(&message) {
            return Err(LiveVoteError::AlreadyOpen(message));
        }
        state.votes.insert(
            message,
            LiveVote {
                poll: poll.into(),
                candidates,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, message: MessageId) -> Option<LiveVote> {
        self.lock().votes.get(&message).cloned()
    }

    /// Store `glyph` as the one `voter` holds on `message`, returning the
    /// glyph it replaced.
    pub fn record_choice(
        &self,
        message: MessageId,
        voter: UserId,
        glyph: impl Into<String>,
    ) -> Option<String> {
        self.lock().choices.insert((message, voter), glyph.into())
    }

    pub fn open_count(&self) -> usize {
        self.lock().votes.len()
    }
}
