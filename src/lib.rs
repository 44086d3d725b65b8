// src/lib.rs

// Import the top-level `league` module.
pub mod league;

// Re-exporting key items for easier external access.
pub use league::config::LeagueConfig;
pub use league::errors::LeagueError;
pub use league::identity::{AuthToken, LeagueId, MatchId, PlayerId, RefereeId, RoundId};
pub use league::manager_agent::LeagueManager;
pub use league::player_agent::PlayerAgent;
pub use league::referee_agent::RefereeAgent;
