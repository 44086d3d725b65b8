//! `GameRules` interface: the out-of-core, externally-supplied contract a
//! game implements to plug into the tournament, plus the one reference
//! implementation the core ships for tests and demos: the parity game.
//!
//! Dynamic dispatch mirrors a tool-protocol pattern
//! (`Arc<dyn GameRules>` behind a name-keyed registry): a `GameRules`
//! implementor is resolved by game-type string rather than by static type,
//! so new games can be added without recompiling the agents.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;

use league_protocol::messages::{GameRoundRecord, RoundWinner, RunningScore, Side};

/// Outcome of `GameRules::finalize`: the winning side, if any, and the
/// final running score.
#[derive(Debug, Clone)]
pub struct FinalOutcome {
    pub winner: Option<Side>,
    pub final_score: RunningScore,
}

/// External collaborator contract for one game's rules. The core only
/// ever invokes this interface; it never inspects a move's
/// shape itself, which is why moves travel the wire as `serde_json::Value`.
pub trait GameRules: Send + Sync {
    /// Stable name this implementation is registered under, e.g. `"parity"`.
    fn game_type(&self) -> &str;

    /// Human-readable label for a side within this game, e.g. `"ODD"` /
    /// `"EVEN"`. Side A is ODD by convention.
    fn role_label(&self, side: Side) -> String;

    /// `true` iff `mv` is a legal move for the given role.
    fn validate(&self, mv: &Value, role_tag: &str) -> bool;

    /// Deterministic fallback used when a player fails to produce a move
    /// in time or produces an invalid one.
    fn default_move(&self, role_tag: &str) -> Value;

    /// Scores one completed game-round given both sides' (already
    /// validated or defaulted) moves.
    fn score_round(&self, move_a: &Value, move_b: &Value) -> RoundWinner;

    /// Declares the match winner (if any) from the full round history and
    /// the accumulated score.
    fn finalize(&self, history: &[GameRoundRecord], score: RunningScore) -> FinalOutcome;
}

/// Reference implementation: the parity game.
///
/// Two roles, `ODD` and `EVEN`; each round both players choose an integer
/// in `[1, 10]`; ODD wins a round iff the sum of both moves is odd.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParityGame;

impl ParityGame {
    pub const DEFAULT_MOVE: i64 = 3;
    pub const MIN_MOVE: i64 = 1;
    pub const MAX_MOVE: i64 = 10;
}

impl GameRules for ParityGame {
    fn game_type(&self) -> &str {
        "parity"
    }

    fn role_label(&self, side: Side) -> String {
        match side {
            Side::A => "ODD".to_string(),
            Side::B => "EVEN".to_string(),
        }
    }

    fn validate(&self, mv: &Value, _role_tag: &str) -> bool {
        match mv.as_i64() {
            Some(n) => (Self::MIN_MOVE..=Self::MAX_MOVE).contains(&n),
            None => false,
        }
    }

    fn default_move(&self, _role_tag: &str) -> Value {
        Value::from(Self::DEFAULT_MOVE)
    }

    fn score_round(&self, move_a: &Value, move_b: &Value) -> RoundWinner {
        let a = move_a.as_i64().unwrap_or(Self::DEFAULT_MOVE);
        let b = move_b.as_i64().unwrap_or(Self::DEFAULT_MOVE);
        if (a + b) % 2 != 0 {
            RoundWinner::A
        } else {
            RoundWinner::B
        }
    }

    fn finalize(&self, _history: &[GameRoundRecord], score: RunningScore) -> FinalOutcome {
        let winner = match score.a.cmp(&score.b) {
            std::cmp::Ordering::Greater => Some(Side::A),
            std::cmp::Ordering::Less => Some(Side::B),
            // Impossible when best_of_k is odd, but the interface still
            // has to return something for an even K.
            std::cmp::Ordering::Equal => None,
        };
        FinalOutcome { winner, final_score: score }
    }
}

type GameConstructor = Arc<dyn Fn() -> Arc<dyn GameRules> + Send + Sync>;

/// Name-keyed registry of `GameRules` constructors: a map from game-type
/// string to a constructor, standing in for reflection-based plugin
/// discovery.
pub struct GameRegistry {
    constructors: DashMap<String, GameConstructor>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
        }
    }

    /// A registry pre-populated with the one reference game the core ships.
    pub fn with_reference_games() -> Self {
        let registry = Self::new();
        registry.register("parity", || Arc::new(ParityGame));
        registry
    }

    pub fn register<F>(&self, game_type: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn GameRules> + Send + Sync + 'static,
    {
        self.constructors
            .insert(game_type.into(), Arc::new(constructor));
    }

    pub fn build(&self, game_type: &str) -> Option<Arc<dyn GameRules>> {
        self.constructors.get(game_type).map(|ctor| ctor())
    }

    pub fn supports(&self, game_type: &str) -> bool {
        self.constructors.contains_key(game_type)
    }

    pub fn game_types(&self) -> Vec<String> {
        self.constructors.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::with_reference_games()
    }
}

/// Process-wide default registry, analogous to a lazily initialized
/// connection pool. Agents may construct their own
/// `GameRegistry` instead; this is a convenience for the common case.
pub static DEFAULT_GAMES: Lazy<GameRegistry> = Lazy::new(GameRegistry::with_reference_games);

/// Helper used by tests that want a bare lookup table without the registry
/// machinery, e.g. asserting which game types a Player advertises.
pub fn builtin_game_types() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("parity", "Parity game: ODD vs EVEN, moves 1..=10");
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_validate_rejects_out_of_range_and_non_integer() {
        let game = ParityGame;
        assert!(game.validate(&Value::from(1), "ODD"));
        assert!(game.validate(&Value::from(10), "ODD"));
        assert!(!game.validate(&Value::from(0), "ODD"));
        assert!(!game.validate(&Value::from(11), "ODD"));
        assert!(!game.validate(&Value::from("five"), "ODD"));
    }

    #[test]
    fn parity_score_round_odd_sum_favors_a() {
        let game = ParityGame;
        assert_eq!(game.score_round(&Value::from(3), &Value::from(4)), RoundWinner::A);
        assert_eq!(game.score_round(&Value::from(4), &Value::from(4)), RoundWinner::B);
    }

    #[test]
    fn parity_finalize_picks_higher_score() {
        let game = ParityGame;
        let outcome = game.finalize(&[], RunningScore { a: 3, b: 2 });
        assert_eq!(outcome.winner, Some(Side::A));
        let outcome = game.finalize(&[], RunningScore { a: 1, b: 4 });
        assert_eq!(outcome.winner, Some(Side::B));
    }

    #[test]
    fn registry_resolves_reference_game_by_name() {
        let registry = GameRegistry::with_reference_games();
        assert!(registry.supports("parity"));
        assert!(!registry.supports("chess"));
        let game = registry.build("parity").expect("parity registered");
        assert_eq!(game.game_type(), "parity");
    }

    #[test]
    fn registry_accepts_custom_game_registration() {
        let registry = GameRegistry::new();
        registry.register("parity", || Arc::new(ParityGame));
        assert!(registry.supports("parity"));
        assert_eq!(registry.game_types(), vec!["parity".to_string()]);
    }
}
