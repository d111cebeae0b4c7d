//! Order-book sequencer (C3) — per-token snapshot/delta integrity core.
//!
//! Each token's book state is gated by a monotonically increasing
//! sequence number. A snapshot establishes a new baseline unconditionally;
//! a delta is only accepted once a baseline exists and its sequence is not
//! behind the last one observed. Bounded by both an entry-count cap and a
//! per-entry TTL so an abandoned or noisy token can never grow the map
//! without bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::Token;

/// Upper bound on distinct tokens tracked at once. Beyond this, the
/// oldest-touched entries are evicted during a prune pass.
pub const MAX_ENTRIES: usize = 10_000;

/// A token's state is discarded if untouched for this long.
pub const ENTRY_TTL: Duration = Duration::from_secs(600);

/// A prune pass runs every this many processed messages, in addition to
/// being invoked from the upstream session's heartbeat tick.
pub const PRUNE_EVERY_MESSAGES: u64 = 1000;

/// Which half of the snapshot/delta pair an inbound book message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Snapshot,
    Delta,
}

/// Outcome of feeding one book message through the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Message should be applied and forwarded. `gap` is `true` when a
    /// delta's sequence skipped ahead of the expected next value — still
    /// accepted, but worth surfacing to callers that care.
    Accept { gap: bool },
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A delta arrived before any snapshot established a baseline.
    NoBaseline,
    /// A delta's sequence is at or behind the last sequence already
    /// applied.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct TokenState {
    last_sequence: i64,
    has_baseline: bool,
    last_touched: Instant,
}

impl TokenState {
    fn fresh() -> Self {
        Self {
            last_sequence: i64::MIN,
            has_baseline: false,
            last_touched: Instant::now(),
        }
    }
}

/// Gap-tolerance policy. Upstream venues occasionally skip sequence
/// numbers during bursty periods; rejecting every gap would starve the
/// relay of real book updates, so the default tolerates them and flags
/// them for observability instead of dropping.
#[derive(Debug, Clone, Copy)]
pub struct SequencerPolicy {
    pub accept_gaps: bool,
}

impl Default for SequencerPolicy {
    fn default() -> Self {
        Self { accept_gaps: true }
    }
}

/// Per-token sequence-gated book state, bounded by [`MAX_ENTRIES`] and
/// [`ENTRY_TTL`].
pub struct Sequencer {
    state: Mutex<HashMap<Token, TokenState>>,
    messages_seen: AtomicU64,
    policy: SequencerPolicy,
}

impl Sequencer {
    pub fn new(policy: SequencerPolicy) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            messages_seen: AtomicU64::new(0),
            policy,
        }
    }

    /// Feed one book message for `token_id` at `sequence` through the
    /// gate, updating internal state as a side effect. Also triggers a
    /// prune pass every [`PRUNE_EVERY_MESSAGES`] calls.
    ///
    /// `sequence` is `None` when the venue omitted it from the frame. A
    /// snapshot with no sequence establishes a baseline of `0`; a delta
    /// with no sequence is accepted unconditionally — implicit-in-arrival,
    /// not gated — and leaves the tracked baseline untouched.
    pub fn process(&self, token_id: &Token, kind: MessageKind, sequence: Option<i64>) -> Decision {
        let seen = self.messages_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % PRUNE_EVERY_MESSAGES == 0 {
            self.prune();
        }

        let mut state = self.state.lock().expect("sequencer mutex poisoned");
        let entry = state.entry(token_id.clone()).or_insert_with(TokenState::fresh);

        let decision = match kind {
            MessageKind::Snapshot => {
                entry.has_baseline = true;
                entry.last_sequence = sequence.unwrap_or(0);
                Decision::Accept { gap: false }
            }
            MessageKind::Delta if !entry.has_baseline => Decision::Drop(DropReason::NoBaseline),
            MessageKind::Delta => match sequence {
                None => Decision::Accept { gap: false },
                Some(sequence) if sequence <= entry.last_sequence => Decision::Drop(DropReason::Stale),
                Some(sequence) => {
                    let gap = sequence > entry.last_sequence + 1;
                    if gap && !self.policy.accept_gaps {
                        Decision::Drop(DropReason::Stale)
                    } else {
                        entry.last_sequence = sequence;
                        Decision::Accept { gap }
                    }
                }
            },
        };

        entry.last_touched = Instant::now();

        if let Decision::Drop(reason) = decision {
            debug!(token_id = %token_id, ?kind, ?sequence, ?reason, "dropped orderbook message");
        }

        decision
    }

    /// Drop the tracked state for one token, forcing the next message to
    /// be treated as pre-baseline. Used when a downstream resubscribes
    /// and the upstream session requests a fresh snapshot.
    pub fn reset_token(&self, token_id: &Token) {
        let mut state = self.state.lock().expect("sequencer mutex poisoned");
        state.remove(token_id);
    }

    /// Evict entries untouched for longer than [`ENTRY_TTL`], then, if
    /// still over [`MAX_ENTRIES`], evict the least-recently-touched
    /// entries until back under the cap.
    pub fn prune(&self) {
        let mut state = self.state.lock().expect("sequencer mutex poisoned");
        let now = Instant::now();
        let before = state.len();
        state.retain(|_, s| now.duration_since(s.last_touched) < ENTRY_TTL);

        if state.len() > MAX_ENTRIES {
            let mut by_age: Vec<(Token, Instant)> =
                state.iter().map(|(k, v)| (k.clone(), v.last_touched)).collect();
            by_age.sort_by_key(|(_, touched)| *touched);
            let excess = state.len() - MAX_ENTRIES;
            for (token_id, _) in by_age.into_iter().take(excess) {
                state.remove(&token_id);
            }
        }

        let pruned = before.saturating_sub(state.len());
        if pruned > 0 {
            debug!(pruned, remaining = state.len(), "sequencer prune");
        }
    }

    /// Number of tokens currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().expect("sequencer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_in_order_delta_is_accepted() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();

        assert_eq!(
            seq.process(&token, MessageKind::Snapshot, Some(10)),
            Decision::Accept { gap: false }
        );
        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(11)),
            Decision::Accept { gap: false }
        );
    }

    #[test]
    fn delta_before_any_snapshot_is_dropped() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();

        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(1)),
            Decision::Drop(DropReason::NoBaseline)
        );
    }

    #[test]
    fn stale_delta_is_dropped() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();

        seq.process(&token, MessageKind::Snapshot, Some(10));
        seq.process(&token, MessageKind::Delta, Some(11));

        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(11)),
            Decision::Drop(DropReason::Stale)
        );
        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(5)),
            Decision::Drop(DropReason::Stale)
        );
    }

    #[test]
    fn gap_is_accepted_and_flagged_by_default() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();

        seq.process(&token, MessageKind::Snapshot, Some(10));
        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(20)),
            Decision::Accept { gap: true }
        );
    }

    #[test]
    fn gap_is_dropped_when_policy_rejects_gaps() {
        let seq = Sequencer::new(SequencerPolicy { accept_gaps: false });
        let token: Token = "T1".into();

        seq.process(&token, MessageKind::Snapshot, Some(10));
        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(20)),
            Decision::Drop(DropReason::Stale)
        );
    }

    #[test]
    fn reset_token_forces_a_fresh_baseline() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();

        seq.process(&token, MessageKind::Snapshot, Some(10));
        seq.reset_token(&token);

        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(11)),
            Decision::Drop(DropReason::NoBaseline)
        );
    }

    #[test]
    fn delta_with_no_sequence_is_accepted_unconditionally() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();

        seq.process(&token, MessageKind::Snapshot, Some(100));
        assert_eq!(
            seq.process(&token, MessageKind::Delta, None),
            Decision::Accept { gap: false }
        );
        // A later delta with a real sequence is still gated against the
        // snapshot's baseline, not against the ungated delta above.
        assert_eq!(
            seq.process(&token, MessageKind::Delta, Some(101)),
            Decision::Accept { gap: false }
        );
    }

    #[test]
    fn prune_evicts_entries_past_ttl() {
        let seq = Sequencer::new(SequencerPolicy::default());
        let token: Token = "T1".into();
        seq.process(&token, MessageKind::Snapshot, Some(1));

        {
            let mut state = seq.state.lock().unwrap();
            let entry = state.get_mut(&token).unwrap();
            entry.last_touched = Instant::now() - ENTRY_TTL - Duration::from_secs(1);
        }

        seq.prune();
        assert!(seq.is_empty());
    }
}
