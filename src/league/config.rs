//! Configuration for league-core.
//!
//! Provides the [`LeagueConfig`] struct for configuring a league's scoring,
//! scheduling, and timing parameters. Users construct this manually or via
//! [`LeagueConfig::from_env`] — no TOML/YAML/file-parsing dependency is
//! introduced, matching the rest of this crate's "configure in code"
//! philosophy.
//!
//! # Example
//!
//! ```rust
//! use league_core::LeagueConfig;
//!
//! // Use the default (2 minimum players, best-of-5, etc.)
//! let config = LeagueConfig::default();
//!
//! // Or override specific fields
//! let config = LeagueConfig {
//!     min_players: 4,
//!     ..LeagueConfig::default()
//! };
//! ```

use std::env;
use std::time::Duration;

/// Global configuration for one league instance.
///
/// This struct is intentionally minimal; every field has a documented
/// default and reading it from the environment is opt-in via
/// [`LeagueConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeagueConfig {
    /// Minimum ACTIVE players required for `start_league` to succeed.
    pub min_players: usize,
    /// Points awarded to the winner of a Match.
    pub points_win: i64,
    /// Points awarded to each side of a drawn Match.
    pub points_draw: i64,
    /// Game-rounds per Match. Must be odd so `finalize` always has a
    /// winner.
    pub best_of_k: u32,
    /// Default per-move deadline, in milliseconds.
    pub move_deadline_ms: u64,
    /// Byte length of generated `AuthToken`s before hex encoding.
    pub auth_token_bytes: usize,
}

impl LeagueConfig {
    /// Reads overrides from environment variables, falling back to
    /// [`LeagueConfig::default`] for anything unset or unparsable.
    ///
    /// # Example
    ///
    /// ```rust
    /// use league_core::LeagueConfig;
    /// let config = LeagueConfig::from_env();
    /// assert!(config.best_of_k % 2 == 1);
    /// ```
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_players: env_usize("LEAGUE_MIN_PLAYERS").unwrap_or(defaults.min_players),
            points_win: env_i64("LEAGUE_POINTS_WIN").unwrap_or(defaults.points_win),
            points_draw: env_i64("LEAGUE_POINTS_DRAW").unwrap_or(defaults.points_draw),
            best_of_k: env_u32("LEAGUE_BEST_OF_K").unwrap_or(defaults.best_of_k),
            move_deadline_ms: env_u64("LEAGUE_MOVE_DEADLINE_MS").unwrap_or(defaults.move_deadline_ms),
            auth_token_bytes: env_usize("LEAGUE_AUTH_TOKEN_BYTES").unwrap_or(defaults.auth_token_bytes),
        }
    }

    pub fn move_deadline(&self) -> Duration {
        Duration::from_millis(self.move_deadline_ms)
    }
}

impl Default for LeagueConfig {
    /// Creates a config with the standard tournament defaults: 2 minimum
    /// players, win=3/draw=1 scoring, best-of-5, 30s move deadline,
    /// 32-byte tokens.
    ///
    /// # Example
    ///
    /// ```rust
    /// use league_core::LeagueConfig;
    /// let config = LeagueConfig::default();
    /// assert_eq!(config.min_players, 2);
    /// ```
    fn default() -> Self {
        Self {
            min_players: 2,
            points_win: 3,
            points_draw: 1,
            best_of_k: 5,
            move_deadline_ms: 30_000,
            auth_token_bytes: 32,
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_standard_tournament_settings() {
        let config = LeagueConfig::default();
        assert_eq!(config.min_players, 2);
        assert_eq!(config.points_win, 3);
        assert_eq!(config.points_draw, 1);
        assert_eq!(config.best_of_k, 5);
        assert_eq!(config.move_deadline_ms, 30_000);
        assert_eq!(config.auth_token_bytes, 32);
    }

    #[test]
    fn move_deadline_converts_millis_to_duration() {
        let config = LeagueConfig {
            move_deadline_ms: 1500,
            ..LeagueConfig::default()
        };
        assert_eq!(config.move_deadline(), Duration::from_millis(1500));
    }
}
