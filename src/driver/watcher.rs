//! Mechanism for tracking ceremony execution

use std::time::Duration;

use crate::conversation::{CeremonyKind, PartyIndex};

/// Event observed by [RoundDriver](super::RoundDriver)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Message of given round was written to the relay
    Sent { round: u32 },
    /// Counterparty message of given round was accepted
    Received { round: u32 },
    /// Envelope that doesn't match the expected round was skipped
    StaleEnvelope {
        from: PartyIndex,
        round: u32,
        expected: u32,
    },
    /// Conversation outlived its validity window
    Expired { overdue: Duration },
}

/// Looks after ceremony execution in [RoundDriver](super::RoundDriver)
pub trait CeremonyWatcher: Send {
    fn observe(&mut self, kind: CeremonyKind, event: Event);
}

/// Watcher that doesn't do anything when event happens
pub struct BlindWatcher;

impl CeremonyWatcher for BlindWatcher {
    fn observe(&mut self, _kind: CeremonyKind, _event: Event) {}
}

/// Watcher that reports events via [tracing]
pub struct TracingWatcher;

impl CeremonyWatcher for TracingWatcher {
    fn observe(&mut self, kind: CeremonyKind, event: Event) {
        match event {
            Event::Sent { round } => tracing::debug!(%kind, round, "sent message"),
            Event::Received { round } => tracing::debug!(%kind, round, "received message"),
            Event::StaleEnvelope {
                from,
                round,
                expected,
            } => tracing::warn!(%kind, %from, round, expected, "ignored stale envelope"),
            Event::Expired { overdue } => {
                tracing::warn!(%kind, ?overdue, "conversation expired, still waiting for counterparty")
            }
        }
    }
}

impl<W: CeremonyWatcher + ?Sized> CeremonyWatcher for &mut W {
    fn observe(&mut self, kind: CeremonyKind, event: Event) {
        (**self).observe(kind, event)
    }
}
