//! Core error taxonomy.
//!
//! A hand-rolled enum rather than a derive-based error crate, matching the
//! surrounding protocol layer's `ToolError`: every variant maps to exactly
//! one wire-level [`league_protocol::ErrorCode`] so an agent's RPC handler
//! never has to guess which code to answer with.

use std::fmt;

use league_protocol::ErrorCode;

#[derive(Debug, Clone)]
pub enum LeagueError {
    /// Malformed envelope or schema violation (never retried).
    InvalidRequest(String),
    /// No handler registered for the requested tool name.
    UnknownTool(String),
    /// Well-formed envelope, payload fails validation.
    InvalidParams(String),
    /// Token missing or did not match the one issued at registration.
    Unauthenticated,
    /// Registration attempted while the league is not accepting new peers.
    RegistrationClosed,
    /// Caller-supplied PlayerID/RefereeID already taken in this league.
    DuplicateId(String),
    /// Peer does not support the league's configured game type.
    UnsupportedGameType(String),
    /// Referee is already at `max_concurrent_matches`.
    CapacityExceeded,
    /// The request is not valid in the league/match's current state.
    InvalidState(String),
    /// Reference to a match_id the recipient has no record of.
    UnknownMatch(String),
    /// Internal invariant violation; fatal at the League Manager.
    Internal(String),
}

impl LeagueError {
    /// The wire-level error code this failure maps to.
    pub fn rpc_code(&self) -> ErrorCode {
        match self {
            LeagueError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            LeagueError::UnknownTool(_) => ErrorCode::UnknownTool,
            LeagueError::InvalidParams(_) => ErrorCode::InvalidParams,
            LeagueError::Unauthenticated => ErrorCode::Unauthenticated,
            LeagueError::RegistrationClosed => ErrorCode::RegistrationClosed,
            LeagueError::DuplicateId(_) => ErrorCode::DuplicateId,
            LeagueError::UnsupportedGameType(_) => ErrorCode::UnsupportedGameType,
            LeagueError::CapacityExceeded => ErrorCode::CapacityExceeded,
            LeagueError::InvalidState(_) => ErrorCode::InvalidState,
            LeagueError::UnknownMatch(_) => ErrorCode::UnknownMatch,
            LeagueError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for errors that are fatal to the whole league rather than
    /// local to one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LeagueError::Internal(_))
    }
}

impl fmt::Display for LeagueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeagueError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            LeagueError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            LeagueError::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            LeagueError::Unauthenticated => write!(f, "unauthenticated"),
            LeagueError::RegistrationClosed => write!(f, "registration closed"),
            LeagueError::DuplicateId(id) => write!(f, "duplicate id: {id}"),
            LeagueError::UnsupportedGameType(gt) => write!(f, "unsupported game type: {gt}"),
            LeagueError::CapacityExceeded => write!(f, "referee capacity exceeded"),
            LeagueError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            LeagueError::UnknownMatch(id) => write!(f, "unknown match: {id}"),
            LeagueError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for LeagueError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_maps_to_40001() {
        assert_eq!(LeagueError::Unauthenticated.rpc_code().code(), 40001);
    }

    #[test]
    fn internal_is_fatal_others_are_not() {
        assert!(LeagueError::Internal("duplicate match ids".into()).is_fatal());
        assert!(!LeagueError::CapacityExceeded.is_fatal());
    }
}
