//! `Strategy` interface plus the one reference implementation the core
//! ships: uniform-random move selection.
//!
//! Registered and resolved the same way as [`crate::league::game::GameRegistry`]
//! — a name-keyed map of constructors, rather than reflection-based
//! discovery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;

use crate::league::game::ParityGame;
use league_protocol::messages::RunningScore;

/// One (own_move, opponent_move, round_winner_role) tuple from a match's
/// history, as exposed to a `Strategy`.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub own_move: Value,
    pub opponent_move: Value,
    pub round_winner_role: String,
}

/// Cooperative cancellation signal a `Strategy` must observe. The Player
/// agent flips it 250ms before the Referee's
/// deadline; a well-behaved `Strategy` checks it between steps of a
/// long-running decision and returns early.
#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only snapshot of a game session handed to a `Strategy`. The core
/// guarantees this is a consistent snapshot as of the moment
/// `choose_move.call` was received; the `Strategy` may hold its own state
/// across calls.
#[derive(Clone)]
pub struct GameView {
    pub game_type: String,
    pub role_tag: String,
    pub game_round_id: u32,
    pub running_score: RunningScore,
    pub history: Vec<HistoryEntry>,
    pub cancellation: CancellationSignal,
}

/// External collaborator contract for choosing a move. The
/// core only ever invokes this interface with a deadline it enforces
/// itself (see `crate::league::player_agent`); implementations are never
/// trusted to self-enforce their own timeout.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable name this implementation is registered under.
    fn name(&self) -> &str;

    /// Chooses a move for the given view. Implementations should poll
    /// `view.cancellation.is_cancelled()` if the decision takes nontrivial
    /// time; a cancelled call that keeps running past the deadline is
    /// simply ignored by the caller, which substitutes the default move.
    async fn choose_move(&self, view: GameView) -> Value;
}

/// Reference implementation: picks uniformly at random among the parity
/// game's legal moves. Used as the default in tests and demos.
pub struct RandomStrategy;

#[async_trait]
impl Strategy for RandomStrategy {
    fn name(&self) -> &str {
        "random"
    }

    async fn choose_move(&self, _view: GameView) -> Value {
        let n = rand::thread_rng().gen_range(ParityGame::MIN_MOVE..=ParityGame::MAX_MOVE);
        Value::from(n)
    }
}

type StrategyConstructor = Arc<dyn Fn() -> Arc<dyn Strategy> + Send + Sync>;

/// Name-keyed registry of `Strategy` constructors.
pub struct StrategyRegistry {
    constructors: DashMap<String, StrategyConstructor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
        }
    }

    /// A registry pre-populated with the one reference strategy the core
    /// ships.
    pub fn with_reference_strategies() -> Self {
        let registry = Self::new();
        registry.register("random", || Arc::new(RandomStrategy));
        registry
    }

    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Strategy> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn build(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.constructors.get(name).map(|ctor| ctor())
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_reference_strategies()
    }
}

/// Strategy that always sleeps past its deadline, used by match-protocol
/// tests exercising move-timeout substitution.
pub struct StallingStrategy {
    pub sleep: std::time::Duration,
}

#[async_trait]
impl Strategy for StallingStrategy {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn choose_move(&self, view: GameView) -> Value {
        tokio::time::sleep(self.sleep).await;
        let _ = view.cancellation.is_cancelled();
        Value::from(ParityGame::DEFAULT_MOVE)
    }
}

/// Descriptions of the built-in strategies, for display/status purposes.
pub fn builtin_strategy_names() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("random", "Uniform random move in the game's legal range");
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_view() -> GameView {
        GameView {
            game_type: "parity".into(),
            role_tag: "ODD".into(),
            game_round_id: 1,
            running_score: RunningScore { a: 0, b: 0 },
            history: vec![],
            cancellation: CancellationSignal::new(),
        }
    }

    #[tokio::test]
    async fn random_strategy_stays_in_legal_range() {
        let strategy = RandomStrategy;
        for _ in 0..50 {
            let mv = strategy.choose_move(empty_view()).await;
            let n = mv.as_i64().unwrap();
            assert!((1..=10).contains(&n));
        }
    }

    #[test]
    fn cancellation_signal_starts_uncancelled() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        signal.cancel();
        assert!(signal.is_cancelled());
    }

    #[test]
    fn registry_resolves_reference_strategy_by_name() {
        let registry = StrategyRegistry::with_reference_strategies();
        let strategy = registry.build("random").expect("random registered");
        assert_eq!(strategy.name(), "random");
        assert!(registry.build("nonexistent").is_none());
    }
}
