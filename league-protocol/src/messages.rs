//! The `league.v2` message family.
//!
//! Every message carries the common envelope fields
//! `{protocol, message_type, league_id, conversation_id, sender, timestamp}`
//! plus a payload specific to its `message_type`. `Envelope<T>` factors the
//! common fields out so each payload struct only declares what is unique to
//! it, the way a shared result envelope factors common shape out of
//! protocol-specific structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "league.v2";

/// Fields common to every `league.v2` message, carried once in the
/// envelope rather than duplicated per payload: `league_id` belongs here,
/// exactly once, rather than in each payload struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub protocol: String,
    pub message_type: String,
    pub league_id: String,
    pub conversation_id: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(
        message_type: impl Into<String>,
        league_id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        payload: T,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            message_type: message_type.into(),
            league_id: league_id.into(),
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------- Side/Game

/// Deterministic side assignment within a Match: the lexicographically
/// smaller PlayerID is always side A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Outcome of scoring a single game-round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundWinner {
    A,
    B,
    Draw,
}

/// Terminal outcome of a Match for one participant's `game.over` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchOutcomeStatus {
    Win,
    Loss,
    Draw,
    Forfeit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistrationStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningScore {
    pub a: u32,
    pub b: u32,
}

/// One completed game-round entry in a Match's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRoundRecord {
    pub game_round_id: u32,
    pub move_a: Value,
    pub move_b: Value,
    pub round_winner: RoundWinner,
}

// -------------------------------------------------------------- Registration

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRegisterRequest {
    pub display_name: String,
    pub version: String,
    pub supported_game_types: Vec<String>,
    pub contact_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRegisterResponse {
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// The League Manager's own bearer token, learned once here so the
    /// peer can authenticate inbound Manager-originated calls
    /// (`round.announce`, `standings.update`, `league.completed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefereeRegisterRequest {
    pub display_name: String,
    pub version: String,
    pub supported_game_types: Vec<String>,
    pub contact_endpoint: String,
    pub max_concurrent_matches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referee_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefereeRegisterResponse {
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// The League Manager's own bearer token, learned once here so the
    /// referee can authenticate inbound `match.assign` calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------- Match lifecycle (LM->Ref)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAssign {
    pub match_id: String,
    pub round_id: String,
    pub player_a_id: String,
    pub player_a_endpoint: String,
    pub player_b_id: String,
    pub player_b_endpoint: String,
    pub game_type: String,
    pub best_of_k: u32,
    /// The player's own Manager-issued `AuthToken`, forwarded so the
    /// referee can authenticate the calls it makes back to that player.
    pub player_a_token: String,
    pub player_b_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ------------------------------------------------------ Match lifecycle (Ref->Player)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameInvite {
    pub match_id: String,
    pub opponent_id: String,
    pub opponent_endpoint: String,
    pub role_tag: String,
    pub game_type: String,
    pub best_of_k: u32,
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameInviteAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseMoveCall {
    pub match_id: String,
    pub game_round_id: u32,
    pub running_score: RunningScore,
    pub deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent_last_move: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseMoveResponse {
    pub match_id: String,
    pub game_round_id: u32,
    pub r#move: Value,
    /// Echoes the per-match, per-role session token handed out in this
    /// match's `game.invite`, so the referee can confirm the response
    /// really comes from the session it granted this role to.
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResult {
    pub match_id: String,
    pub game_round_id: u32,
    pub round_winner_role: String,
    pub your_move: Value,
    pub opponent_move: Value,
    pub running_score: RunningScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOver {
    pub match_id: String,
    pub status: MatchOutcomeStatus,
    pub final_score: RunningScore,
    pub history: Vec<GameRoundRecord>,
}

// --------------------------------------------------- Result reporting (Ref->LM)

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResultReport {
    pub match_id: String,
    pub round_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    pub score_a: u32,
    pub score_b: u32,
    pub history: Vec<GameRoundRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forfeit_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResultAck {
    pub accepted: bool,
    pub duplicate: bool,
}

// --------------------------------------------------- Tournament control/status

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandingsEntryWire {
    pub player_id: String,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub points: i64,
    pub tiebreak: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundAnnounce {
    pub round_id: String,
    pub matches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandingsUpdate {
    pub standings: Vec<StandingsEntryWire>,
    pub round_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueCompleted {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub champion_id: Option<String>,
    pub final_standings: Vec<StandingsEntryWire>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_with_payload() {
        let env = Envelope::new(
            "player.register.request",
            "league-1",
            "conv-1",
            "player-abc",
            PlayerRegisterRequest {
                display_name: "Alice".into(),
                version: "1.0".into(),
                supported_game_types: vec!["parity".into()],
                contact_endpoint: "http://localhost:8101".into(),
                player_id: None,
            },
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["protocol"], "league.v2");
        assert_eq!(json["display_name"], "Alice");

        let round_tripped: Envelope<PlayerRegisterRequest> =
            serde_json::from_value(json).unwrap();
        assert_eq!(round_tripped.payload.display_name, "Alice");
        assert_eq!(round_tripped.league_id, "league-1");
    }

    #[test]
    fn side_other_is_involutive() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other(), Side::A);
        assert_eq!(Side::A.other().other(), Side::A);
    }
}
