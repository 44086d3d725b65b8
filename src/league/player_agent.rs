//! Player agent: owns a local `Strategy`, accepts invitations,
//! produces moves, and tracks one `GameSession` per active Match.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use tokio::sync::RwLock;

use league_protocol::deadlines;
use league_protocol::envelope::ErrorCode;
use league_protocol::messages::{
    ChooseMoveCall, ChooseMoveResponse, GameInvite, GameInviteAck, GameOver, GameRoundRecord,
    PlayerRegisterRequest, PlayerRegisterResponse, RegistrationStatus, RoundResult, RoundWinner,
    RunningScore,
};
use league_protocol::{RpcHandler, TransportClient};

use crate::league::event::{EventHandler, LeagueEvent, NoopEventHandler, PeerKind};
use crate::league::game::GameRegistry;
use crate::league::identity::{AuthToken, LeagueId, MatchId, PlayerId};
use crate::league::strategy::{CancellationSignal, GameView, HistoryEntry, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    MakingMove,
    AwaitingNext,
    Completed,
    Forfeited,
}

#[derive(Debug, Clone)]
pub struct GameSession {
    pub match_id: MatchId,
    pub opponent_id: PlayerId,
    pub opponent_endpoint: String,
    pub role_tag: String,
    pub game_type: String,
    pub best_of_k: u32,
    pub session_token: AuthToken,
    pub state: SessionState,
    pub running_score: RunningScore,
    pub history: Vec<HistoryEntry>,
}

/// Error surfaced only by registration; everything else is absorbed
/// locally and surfaced only through the event handler.
#[derive(Debug)]
pub struct RegistrationFailed(pub String);

pub struct PlayerAgent {
    pub display_name: String,
    pub version: String,
    pub supported_game_types: Vec<String>,
    pub contact_endpoint: String,
    manager_endpoint: String,
    strategy: Arc<dyn Strategy>,
    games: Arc<GameRegistry>,
    events: Arc<dyn EventHandler>,
    player_id: RwLock<Option<PlayerId>>,
    league_id: RwLock<Option<LeagueId>>,
    auth_token: RwLock<Option<AuthToken>>,
    /// The League Manager's own bearer token, learned at registration, used
    /// to authenticate inbound broadcast calls (`round.announce`,
    /// `standings.update`, `league.completed`).
    manager_auth_token: RwLock<Option<AuthToken>>,
    sessions: DashMap<MatchId, GameSession>,
}

impl PlayerAgent {
    pub fn new(
        display_name: impl Into<String>,
        contact_endpoint: impl Into<String>,
        manager_endpoint: impl Into<String>,
        supported_game_types: Vec<String>,
        strategy: Arc<dyn Strategy>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            version: "1.0".to_string(),
            supported_game_types,
            contact_endpoint: contact_endpoint.into(),
            manager_endpoint: manager_endpoint.into(),
            strategy,
            games: Arc::new(GameRegistry::with_reference_games()),
            events: Arc::new(NoopEventHandler),
            player_id: RwLock::new(None),
            league_id: RwLock::new(None),
            auth_token: RwLock::new(None),
            manager_auth_token: RwLock::new(None),
            sessions: DashMap::new(),
        }
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn with_game_registry(mut self, games: Arc<GameRegistry>) -> Self {
        self.games = games;
        self
    }

    pub async fn player_id(&self) -> Option<PlayerId> {
        self.player_id.read().await.clone()
    }

    /// Registers with the League Manager: up to 3 attempts,
    /// capped exponential backoff (base 500ms, cap 8s, jitter ±25%).
    pub async fn register(&self, league_id: LeagueId) -> Result<(), RegistrationFailed> {
        let client = TransportClient::new(format!("{}/mcp", self.manager_endpoint));
        let request = PlayerRegisterRequest {
            display_name: self.display_name.clone(),
            version: self.version.clone(),
            supported_game_types: self.supported_game_types.clone(),
            contact_endpoint: self.contact_endpoint.clone(),
            player_id: None,
        };

        const MAX_ATTEMPTS: u32 = 3;
        const BASE: Duration = Duration::from_millis(500);
        const CAP: Duration = Duration::from_secs(8);

        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            let result = client
                .call::<_, PlayerRegisterResponse>(
                    "player.register.request",
                    &request,
                    deadlines::REGISTRATION,
                )
                .await;

            match result {
                Ok(response) if matches!(response.status, RegistrationStatus::Accepted) => {
                    *self.player_id.write().await = response.player_id.map(PlayerId::new);
                    *self.auth_token.write().await = response.auth_token.map(AuthToken);
                    *self.manager_auth_token.write().await = response.manager_token.map(AuthToken);
                    *self.league_id.write().await = Some(league_id);
                    self.events
                        .on_event(&LeagueEvent::PeerRegistered {
                            league_id: self.league_id.read().await.clone().unwrap(),
                            kind: PeerKind::Player,
                            accepted: true,
                            reason: None,
                        })
                        .await;
                    return Ok(());
                }
                Ok(response) => {
                    return Err(RegistrationFailed(
                        response.reason.unwrap_or_else(|| "registration rejected".into()),
                    ));
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }

            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_with_jitter(BASE, CAP, attempt)).await;
            }
        }

        Err(RegistrationFailed(format!(
            "registration timed out after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn handle_invite(&self, invite: GameInvite) -> GameInviteAck {
        let match_id = MatchId::new(invite.match_id.clone());
        if self.sessions.contains_key(&match_id) {
            return GameInviteAck {
                accepted: false,
                reason: Some("already in a session for this match".into()),
            };
        }
        if !self.supported_game_types.contains(&invite.game_type) {
            return GameInviteAck {
                accepted: false,
                reason: Some(format!("unsupported game type: {}", invite.game_type)),
            };
        }

        self.sessions.insert(
            match_id.clone(),
            GameSession {
                match_id,
                opponent_id: PlayerId::new(invite.opponent_id),
                opponent_endpoint: invite.opponent_endpoint,
                role_tag: invite.role_tag,
                game_type: invite.game_type,
                best_of_k: invite.best_of_k,
                session_token: AuthToken(invite.session_token),
                state: SessionState::Accepted,
                running_score: RunningScore { a: 0, b: 0 },
                history: Vec::new(),
            },
        );

        GameInviteAck { accepted: true, reason: None }
    }

    async fn handle_choose_move(&self, call: ChooseMoveCall) -> Result<ChooseMoveResponse, (ErrorCode, String)> {
        let match_id = MatchId::new(call.match_id.clone());
        let (role_tag, game_type) = {
            let mut session = self
                .sessions
                .get_mut(&match_id)
                .ok_or((ErrorCode::UnknownMatch, "no session for this match".to_string()))?;
            session.state = SessionState::MakingMove;
            (session.role_tag.clone(), session.game_type.clone())
        };

        let cancellation = CancellationSignal::new();
        let view = {
            let session = self.sessions.get(&match_id).unwrap();
            GameView {
                game_type: game_type.clone(),
                role_tag: role_tag.clone(),
                game_round_id: call.game_round_id,
                running_score: call.running_score,
                history: session.history.clone(),
                cancellation: cancellation.clone(),
            }
        };

        let time_left = (call.deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_sub(deadlines::STRATEGY_CANCEL_MARGIN);

        let strategy = self.strategy.clone();
        let decision = tokio::spawn(async move { strategy.choose_move(view).await });

        let chosen_move = match tokio::time::timeout(time_left, decision).await {
            Ok(Ok(mv)) => mv,
            _ => {
                cancellation.cancel();
                let games = self.games.clone();
                let fallback = games
                    .build(&game_type)
                    .map(|rules| rules.default_move(&role_tag))
                    .unwrap_or(Value::from(0));
                self.events
                    .on_event(&LeagueEvent::DefaultMoveSubstituted {
                        match_id: match_id.clone(),
                        player_id: self.player_id().await.unwrap_or_else(|| PlayerId::new("")),
                        game_round_id: call.game_round_id,
                        reason: "strategy did not return before deadline".into(),
                    })
                    .await;
                fallback
            }
        };

        let session_token = if let Some(mut session) = self.sessions.get_mut(&match_id) {
            session.state = SessionState::AwaitingNext;
            session.session_token.0.clone()
        } else {
            String::new()
        };

        Ok(ChooseMoveResponse {
            match_id: call.match_id,
            game_round_id: call.game_round_id,
            r#move: chosen_move,
            session_token,
        })
    }

    async fn handle_round_result(&self, result: RoundResult) -> Value {
        let match_id = MatchId::new(result.match_id.clone());
        if let Some(mut session) = self.sessions.get_mut(&match_id) {
            session.history.push(HistoryEntry {
                own_move: result.your_move,
                opponent_move: result.opponent_move,
                round_winner_role: result.round_winner_role,
            });
            session.running_score = result.running_score;
        }
        Value::Object(Default::default())
    }

    async fn handle_game_over(&self, over: GameOver) -> Value {
        let match_id = MatchId::new(over.match_id);
        self.sessions.remove(&match_id);
        Value::Object(Default::default())
    }

    /// Test/introspection helper: current session for a match, if any.
    pub fn session(&self, match_id: &MatchId) -> Option<GameSession> {
        self.sessions.get(match_id).map(|e| e.clone())
    }
}

fn backoff_with_jitter(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1 << attempt).min(cap);
    let jitter_fraction = rand::thread_rng().gen_range(-0.25..=0.25);
    let millis = (exp.as_millis() as f64) * (1.0 + jitter_fraction);
    Duration::from_millis(millis.max(0.0) as u64)
}

#[async_trait]
impl RpcHandler for PlayerAgent {
    async fn handle_call(
        &self,
        tool: &str,
        auth_token: Option<&str>,
        arguments: Value,
    ) -> Result<Value, (ErrorCode, String)> {
        let expected = match tool {
            "game.invite" | "choose_move.call" | "round_result" | "game.over" => {
                self.auth_token.read().await.clone()
            }
            "round.announce" | "standings.update" | "league.completed" => {
                self.manager_auth_token.read().await.clone()
            }
            _ => None,
        };
        if let Some(expected) = expected {
            let presented = auth_token.map(|t| AuthToken(t.to_string()));
            if !presented.map(|t| expected.verify(&t)).unwrap_or(false) {
                return Err((ErrorCode::Unauthenticated, format!("missing or invalid auth_token for {tool}")));
            }
        }
        match tool {
            "game.invite" => {
                let invite: GameInvite = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                let ack = self.handle_invite(invite).await;
                Ok(serde_json::to_value(ack).unwrap())
            }
            "choose_move.call" => {
                let call: ChooseMoveCall = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                let response = self.handle_choose_move(call).await?;
                Ok(serde_json::to_value(response).unwrap())
            }
            "round_result" => {
                let result: RoundResult = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                Ok(self.handle_round_result(result).await)
            }
            "game.over" => {
                let over: GameOver = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                Ok(self.handle_game_over(over).await)
            }
            "round.announce" | "standings.update" | "league.completed" => {
                Ok(Value::Object(Default::default()))
            }
            other => Err((ErrorCode::UnknownTool, format!("unsupported tool: {other}"))),
        }
    }
}

/// Scores a single round locally, used by tests that want to assert the
/// player's view of history without involving a Referee.
pub fn round_winner_role(winner: RoundWinner, rules_labels: (&str, &str)) -> String {
    match winner {
        RoundWinner::A => rules_labels.0.to_string(),
        RoundWinner::B => rules_labels.1.to_string(),
        RoundWinner::Draw => "DRAW".to_string(),
    }
}

/// Builds a `GameRoundRecord`, used by tests assembling a history fixture.
pub fn make_round_record(
    game_round_id: u32,
    move_a: Value,
    move_b: Value,
    round_winner: RoundWinner,
) -> GameRoundRecord {
    GameRoundRecord { game_round_id, move_a, move_b, round_winner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::strategy::RandomStrategy;
    use league_protocol::messages::MatchOutcomeStatus;

    fn agent() -> PlayerAgent {
        PlayerAgent::new(
            "Alice",
            "http://127.0.0.1:8101",
            "http://127.0.0.1:8000",
            vec!["parity".into()],
            Arc::new(RandomStrategy),
        )
    }

    #[tokio::test]
    async fn invite_for_unsupported_game_type_is_rejected() {
        let agent = agent();
        let ack = agent
            .handle_invite(GameInvite {
                match_id: "R1M1".into(),
                opponent_id: "p2".into(),
                opponent_endpoint: "http://127.0.0.1:8102".into(),
                role_tag: "ODD".into(),
                game_type: "chess".into(),
                best_of_k: 3,
                session_token: "tok".into(),
            })
            .await;
        assert!(!ack.accepted);
    }

    #[tokio::test]
    async fn second_invite_for_same_match_is_rejected() {
        let agent = agent();
        let invite = GameInvite {
            match_id: "R1M1".into(),
            opponent_id: "p2".into(),
            opponent_endpoint: "http://127.0.0.1:8102".into(),
            role_tag: "ODD".into(),
            game_type: "parity".into(),
            best_of_k: 3,
            session_token: "tok".into(),
        };
        assert!(agent.handle_invite(invite.clone()).await.accepted);
        assert!(!agent.handle_invite(invite).await.accepted);
    }

    #[tokio::test]
    async fn choose_move_falls_back_to_default_on_timeout() {
        let agent = PlayerAgent::new(
            "Slowpoke",
            "http://127.0.0.1:8101",
            "http://127.0.0.1:8000",
            vec!["parity".into()],
            Arc::new(crate::league::strategy::StallingStrategy {
                sleep: Duration::from_secs(5),
            }),
        );
        agent
            .handle_invite(GameInvite {
                match_id: "R1M1".into(),
                opponent_id: "p2".into(),
                opponent_endpoint: "http://127.0.0.1:8102".into(),
                role_tag: "ODD".into(),
                game_type: "parity".into(),
                best_of_k: 3,
                session_token: "tok".into(),
            })
            .await;

        let response = agent
            .handle_choose_move(ChooseMoveCall {
                match_id: "R1M1".into(),
                game_round_id: 1,
                running_score: RunningScore { a: 0, b: 0 },
                deadline: Utc::now() + chrono::Duration::milliseconds(300),
                opponent_last_move: None,
            })
            .await
            .unwrap();

        assert_eq!(response.r#move, Value::from(3));
    }

    #[tokio::test]
    async fn game_over_clears_session() {
        let agent = agent();
        agent
            .handle_invite(GameInvite {
                match_id: "R1M1".into(),
                opponent_id: "p2".into(),
                opponent_endpoint: "http://127.0.0.1:8102".into(),
                role_tag: "ODD".into(),
                game_type: "parity".into(),
                best_of_k: 3,
                session_token: "tok".into(),
            })
            .await;
        agent
            .handle_game_over(GameOver {
                match_id: "R1M1".into(),
                status: MatchOutcomeStatus::Win,
                final_score: RunningScore { a: 3, b: 1 },
                history: vec![],
            })
            .await;
        assert!(agent.session(&MatchId::new("R1M1")).is_none());
    }
}
