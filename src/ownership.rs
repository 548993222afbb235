use crate::events::{Direction, TokenId, TransferEvent};
use std::cmp::Ordering;
use std::collections::BTreeSet;

type Tagged<'a> = (Direction, &'a TransferEvent);

/// Replay ordering: block, then log index. A received and a sent event at the
/// same position are the two halves of a self-transfer; the sent half goes
/// first so the wallet ends up holding the token.
fn replay_order((da, a): &Tagged, (db, b): &Tagged) -> Ordering {
    a.block_number
        .cmp(&b.block_number)
        .then(a.log_index.cmp(&b.log_index))
        .then_with(|| match (da, db) {
            (Direction::Sent, Direction::Received) => Ordering::Less,
            (Direction::Received, Direction::Sent) => Ordering::Greater,
            _ => Ordering::Equal,
        })
        .then(a.token_id.cmp(&b.token_id))
}

/// Derive the set of tokens currently held by the wallet from its full
/// transfer history. Input order does not matter.
pub fn build_ownership_set(
    received: &[TransferEvent],
    sent: &[TransferEvent],
) -> BTreeSet<TokenId> {
    let mut events: Vec<Tagged> = received
        .iter()
        .map(|e| (Direction::Received, e))
        .chain(sent.iter().map(|e| (Direction::Sent, e)))
        .collect();

    events.sort_by(replay_order);

    let mut owned = BTreeSet::new();
    for (direction, event) in events {
        match direction {
            Direction::Received => {
                owned.insert(event.token_id);
            }
            Direction::Sent => {
                owned.remove(&event.token_id);
            }
        }
    }
    owned
}

/// Owned token ids, newest id first.
pub fn sorted_descending(ids: impl IntoIterator<Item = TokenId>) -> Vec<TokenId> {
    let set: BTreeSet<TokenId> = ids.into_iter().collect();
    set.into_iter().rev().collect()
}
