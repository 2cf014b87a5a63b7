// Raffle sampling: pick k distinct winners uniformly from a group.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::ids::UserId;

/// Draw `min(max(k, 1), members.len())` distinct winners using the thread
/// RNG. Every subset of that size is equally likely.
pub fn select_winners(members: &BTreeSet<UserId>, k: usize) -> Vec<UserId> {
    select_winners_with(members, k, &mut rand::thread_rng())
}

/// As [`select_winners`], with an explicit RNG.
///
/// Runs a partial Fisher–Yates shuffle over the members, so uniformity only
/// depends on the quality of `rng`. The order of the returned winners carries
/// no meaning.
pub fn select_winners_with<R: Rng + ?Sized>(
    members: &BTreeSet<UserId>,
    k: usize,
    rng: &mut R,
) -> Vec<UserId> {
    let mut pool: Vec<UserId> = members.iter().copied().collect();
    let amount = k.max(1).min(pool.len());
    let (chosen, _) = pool.partial_shuffle(rng, amount);
    chosen.to_vec()
}
