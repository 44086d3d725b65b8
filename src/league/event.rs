//! Observability event system.
//!
//! Provides a callback-based event sink for every state transition and
//! every message sent/received across the three agent kinds. Implement
//! [`EventHandler`] to receive notifications; the default implementation is
//! a silent no-op, so omitting a handler entirely must not affect behavior.
//!
//! # Example
//!
//! ```rust,no_run
//! use league_core::league::event::{EventHandler, LeagueEvent};
//! use async_trait::async_trait;
//!
//! struct PrintingHandler;
//!
//! #[async_trait]
//! impl EventHandler for PrintingHandler {
//!     async fn on_event(&self, event: &LeagueEvent) {
//!         println!("{event:?}");
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::league::identity::{LeagueId, MatchId, PlayerId, RefereeId, RoundId};

/// One observable occurrence in the life of a league. Every variant carries
/// enough identifiers for a handler to correlate it without extra lookups.
#[derive(Debug, Clone)]
pub enum LeagueEvent {
    /// A peer registered (or attempted to and failed) with the League Manager.
    PeerRegistered {
        league_id: LeagueId,
        kind: PeerKind,
        accepted: bool,
        reason: Option<String>,
    },
    /// The league's state machine transitioned.
    LeagueStateChanged { league_id: LeagueId, from: String, to: String },
    /// A Round was dispatched to referees.
    RoundStarted { league_id: LeagueId, round_id: RoundId, match_count: usize },
    /// Every Match of a Round has a recorded result.
    RoundCompleted { league_id: LeagueId, round_id: RoundId },
    /// A Match transitioned state.
    MatchStateChanged {
        match_id: MatchId,
        from: String,
        to: String,
    },
    /// A single game-round within a Match was scored.
    GameRoundScored {
        match_id: MatchId,
        game_round_id: u32,
        move_a: Value,
        move_b: Value,
        winner: String,
    },
    /// A default move was substituted for a timed-out or invalid move.
    DefaultMoveSubstituted {
        match_id: MatchId,
        player_id: PlayerId,
        game_round_id: u32,
        reason: String,
    },
    /// A Match was forfeited or abandoned.
    MatchTerminatedAbnormally {
        match_id: MatchId,
        reason: String,
        abandoned: bool,
    },
    /// A Referee reported a Match result to the League Manager.
    MatchResultReported {
        match_id: MatchId,
        referee_id: RefereeId,
        duplicate: bool,
        accepted: bool,
    },
    /// A message was sent to a peer.
    MessageSent { message_type: String, sender: String, recipient: String },
    /// A message was received from a peer.
    MessageReceived { message_type: String, sender: String },
    /// A transient error was absorbed and retried locally.
    TransientErrorAbsorbed { context: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Player,
    Referee,
}

/// Sink for [`LeagueEvent`]s. All methods default to doing nothing;
/// implement only the ones you care about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: &LeagueEvent) {
        let _ = event;
    }
}

/// The default handler installed when an agent is constructed without an
/// explicit one. Drops every event.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn on_event(&self, _event: &LeagueEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn noop_handler_accepts_any_event_without_panicking() {
        let handler = NoopEventHandler;
        handler
            .on_event(&LeagueEvent::MessageReceived {
                message_type: "player.register.request".into(),
                sender: "p1".into(),
            })
            .await;
    }

    #[tokio::test]
    async fn custom_handler_observes_events() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler(counter.clone());
        handler
            .on_event(&LeagueEvent::RoundCompleted {
                league_id: LeagueId::new("l1"),
                round_id: RoundId::new("R1"),
            })
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
