//! Referee agent: owns `active_matches`, runs the best-of-K
//! loop for each assigned Match, and reports results to the League
//! Manager with at-least-once delivery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;

use league_protocol::deadlines;
use league_protocol::envelope::ErrorCode;
use league_protocol::messages::{
    ChooseMoveCall, ChooseMoveResponse, GameInvite, GameInviteAck, GameOver, GameRoundRecord,
    MatchAck, MatchAssign, MatchOutcomeStatus, MatchResultAck, MatchResultReport,
    RefereeRegisterRequest, RefereeRegisterResponse, RegistrationStatus, RoundResult, RoundWinner,
    RunningScore, Side,
};
use league_protocol::{RpcHandler, TransportClient};

use crate::league::event::{EventHandler, LeagueEvent, NoopEventHandler, PeerKind};
use crate::league::game::GameRegistry;
use crate::league::identity::{AuthToken, LeagueId, MatchId, PlayerId, RefereeId, RoundId};
use crate::league::repository::{in_memory::InMemoryResultRepository, ResultRepository};

const VALIDATION_FAILURE_THRESHOLD: u32 = 3;
const INVITE_RETRIES: u32 = 2;
const REPORT_BACKOFFS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];

#[derive(Debug)]
pub struct RegistrationFailed(pub String);

struct ParticipantSlot {
    player_id: PlayerId,
    endpoint: String,
    side: Side,
    /// This player's own Manager-issued token, forwarded in `match.assign`
    /// so the referee can authenticate the calls it makes to this player.
    auth_token: AuthToken,
    /// Per-match, per-role token handed out in this player's `game.invite`
    /// and expected back on every `choose_move.response` for this match.
    session_token: AuthToken,
}

pub struct RefereeAgent {
    pub display_name: String,
    pub version: String,
    pub supported_game_types: Vec<String>,
    pub contact_endpoint: String,
    pub max_concurrent_matches: u32,
    manager_endpoint: String,
    games: Arc<GameRegistry>,
    events: Arc<dyn EventHandler>,
    outbox: Arc<dyn ResultRepository>,
    referee_id: RwLock<Option<RefereeId>>,
    league_id: RwLock<Option<LeagueId>>,
    auth_token: RwLock<Option<AuthToken>>,
    /// The League Manager's own bearer token, learned at registration, used
    /// to authenticate inbound `match.assign` calls.
    manager_auth_token: RwLock<Option<AuthToken>>,
    current_load: AtomicU32,
    active_matches: DashMap<MatchId, ()>,
}

impl RefereeAgent {
    pub fn new(
        display_name: impl Into<String>,
        contact_endpoint: impl Into<String>,
        manager_endpoint: impl Into<String>,
        supported_game_types: Vec<String>,
        max_concurrent_matches: u32,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            version: "1.0".to_string(),
            supported_game_types,
            contact_endpoint: contact_endpoint.into(),
            max_concurrent_matches,
            manager_endpoint: manager_endpoint.into(),
            games: Arc::new(GameRegistry::with_reference_games()),
            events: Arc::new(NoopEventHandler),
            outbox: Arc::new(InMemoryResultRepository::default()),
            referee_id: RwLock::new(None),
            league_id: RwLock::new(None),
            auth_token: RwLock::new(None),
            manager_auth_token: RwLock::new(None),
            current_load: AtomicU32::new(0),
            active_matches: DashMap::new(),
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

    pub fn with_outbox(mut self, outbox: Arc<dyn ResultRepository>) -> Self {
        self.outbox = outbox;
        self
    }

    pub fn current_load(&self) -> u32 {
        self.current_load.load(Ordering::SeqCst)
    }

    pub async fn register(&self, league_id: LeagueId) -> Result<(), RegistrationFailed> {
        let client = TransportClient::new(format!("{}/mcp", self.manager_endpoint));
        let request = RefereeRegisterRequest {
            display_name: self.display_name.clone(),
            version: self.version.clone(),
            supported_game_types: self.supported_game_types.clone(),
            contact_endpoint: self.contact_endpoint.clone(),
            max_concurrent_matches: self.max_concurrent_matches,
            referee_id: None,
        };

        let response = client
            .call::<_, RefereeRegisterResponse>("referee.register.request", &request, deadlines::REGISTRATION)
            .await
            .map_err(|e| RegistrationFailed(e.to_string()))?;

        if !matches!(response.status, RegistrationStatus::Accepted) {
            return Err(RegistrationFailed(
                response.reason.unwrap_or_else(|| "registration rejected".into()),
            ));
        }

        *self.referee_id.write().await = response.referee_id.map(RefereeId::new);
        *self.auth_token.write().await = response.auth_token.map(AuthToken);
        *self.manager_auth_token.write().await = response.manager_token.map(AuthToken);
        *self.league_id.write().await = Some(league_id.clone());
        self.events
            .on_event(&LeagueEvent::PeerRegistered {
                league_id,
                kind: PeerKind::Referee,
                accepted: true,
                reason: None,
            })
            .await;
        Ok(())
    }

    async fn handle_match_assign(self: &Arc<Self>, assign: MatchAssign) -> MatchAck {
        if !self.supported_game_types.contains(&assign.game_type) {
            return MatchAck {
                accepted: false,
                reason: Some(format!("unsupported game type: {}", assign.game_type)),
            };
        }
        if self.current_load.load(Ordering::SeqCst) >= self.max_concurrent_matches {
            return MatchAck {
                accepted: false,
                reason: Some("referee at capacity".into()),
            };
        }

        self.current_load.fetch_add(1, Ordering::SeqCst);
        self.active_matches.insert(MatchId::new(assign.match_id.clone()), ());

        let referee = self.clone();
        tokio::spawn(async move {
            referee.run_match(assign).await;
        });

        MatchAck { accepted: true, reason: None }
    }

    async fn run_match(self: Arc<Self>, assign: MatchAssign) {
        let match_id = MatchId::new(assign.match_id.clone());
        let round_id = RoundId::new(assign.round_id.clone());
        let rules = match self.games.build(&assign.game_type) {
            Some(rules) => rules,
            None => {
                self.finish_match(&match_id).await;
                return;
            }
        };

        let own_token = self
            .auth_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| AuthToken::generate(32));
        let a = ParticipantSlot {
            player_id: PlayerId::new(assign.player_a_id.clone()),
            endpoint: assign.player_a_endpoint.clone(),
            side: Side::A,
            auth_token: AuthToken(assign.player_a_token.clone()),
            session_token: AuthToken::derive_session_token(&match_id, &rules.role_label(Side::A), &own_token),
        };
        let b = ParticipantSlot {
            player_id: PlayerId::new(assign.player_b_id.clone()),
            endpoint: assign.player_b_endpoint.clone(),
            side: Side::B,
            auth_token: AuthToken(assign.player_b_token.clone()),
            session_token: AuthToken::derive_session_token(&match_id, &rules.role_label(Side::B), &own_token),
        };

        let invite_outcome = self.run_invite_phase(&match_id, &assign, &a, &b, rules.as_ref()).await;

        let report = match invite_outcome {
            InviteOutcome::BothAccepted => {
                self.run_play_and_report(&match_id, &round_id, &assign, &a, &b, rules.as_ref())
                    .await
            }
            InviteOutcome::Forfeit { winner } => {
                self.events
                    .on_event(&LeagueEvent::MatchTerminatedAbnormally {
                        match_id: match_id.clone(),
                        reason: "invite rejected or timed out".into(),
                        abandoned: false,
                    })
                    .await;
                build_report(&match_id, &round_id, winner, RunningScore { a: 0, b: 0 }, vec![], Some("invite timeout or rejection".into()))
            }
        };

        self.report_result(report).await;
        self.active_matches.remove(&match_id);
        self.current_load.fetch_sub(1, Ordering::SeqCst);
    }

    async fn run_invite_phase(
        &self,
        match_id: &MatchId,
        assign: &MatchAssign,
        a: &ParticipantSlot,
        b: &ParticipantSlot,
        rules: &dyn crate::league::game::GameRules,
    ) -> InviteOutcome {
        let (accepted_a, accepted_b) = tokio::join!(
            self.invite_with_retries(match_id, assign, a, b, rules),
            self.invite_with_retries(match_id, assign, b, a, rules),
        );

        match (accepted_a, accepted_b) {
            (true, true) => InviteOutcome::BothAccepted,
            (true, false) => InviteOutcome::Forfeit { winner: Some(a.player_id.clone()) },
            (false, true) => InviteOutcome::Forfeit { winner: Some(b.player_id.clone()) },
            (false, false) => InviteOutcome::Forfeit { winner: None },
        }
    }

    async fn invite_with_retries(
        &self,
        match_id: &MatchId,
        assign: &MatchAssign,
        target: &ParticipantSlot,
        opponent: &ParticipantSlot,
        rules: &dyn crate::league::game::GameRules,
    ) -> bool {
        let invite = GameInvite {
            match_id: match_id.as_str().to_string(),
            opponent_id: opponent.player_id.as_str().to_string(),
            opponent_endpoint: opponent.endpoint.clone(),
            role_tag: rules.role_label(target.side),
            game_type: assign.game_type.clone(),
            best_of_k: assign.best_of_k,
            session_token: target.session_token.0.clone(),
        };

        let client = TransportClient::new(format!("{}/mcp", target.endpoint));
        for attempt in 0..=INVITE_RETRIES {
            let result = client
                .call_authenticated::<_, GameInviteAck>("game.invite", &invite, deadlines::INVITE_ACK, &target.auth_token.0)
                .await;
            if let Ok(ack) = result {
                if ack.accepted {
                    return true;
                }
                return false;
            }
            if attempt < INVITE_RETRIES {
                tokio::time::sleep(Duration::from_millis(500 * 2u64.pow(attempt))).await;
            }
        }
        false
    }

    async fn run_play_and_report(
        &self,
        match_id: &MatchId,
        round_id: &RoundId,
        assign: &MatchAssign,
        a: &ParticipantSlot,
        b: &ParticipantSlot,
        rules: &dyn crate::league::game::GameRules,
    ) -> MatchResultReport {
        let mut history: Vec<GameRoundRecord> = Vec::new();
        let mut score = RunningScore { a: 0, b: 0 };
        let clinch = assign.best_of_k.div_ceil(2);
        let mut consecutive_failures_a = 0u32;
        let mut consecutive_failures_b = 0u32;
        let mut forfeit_winner: Option<PlayerId> = None;

        let client_a = TransportClient::new(format!("{}/mcp", a.endpoint));
        let client_b = TransportClient::new(format!("{}/mcp", b.endpoint));

        for game_round_id in 1..=assign.best_of_k {
            if score.a >= clinch || score.b >= clinch {
                break;
            }

            let deadline = Utc::now()
                + chrono::Duration::from_std(deadlines::MOVE_RESPONSE).unwrap_or_default();
            let call_a = ChooseMoveCall {
                match_id: match_id.as_str().to_string(),
                game_round_id,
                running_score: score,
                deadline,
                opponent_last_move: history.last().map(|r| r.move_b.clone()),
            };
            let call_b = ChooseMoveCall {
                match_id: match_id.as_str().to_string(),
                game_round_id,
                running_score: score,
                deadline,
                opponent_last_move: history.last().map(|r| r.move_a.clone()),
            };

            let grace = deadlines::MOVE_RESPONSE + deadlines::MOVE_GRACE;
            let (response_a, response_b) = tokio::join!(
                self.collect_move(&client_a, call_a, grace, a),
                self.collect_move(&client_b, call_b, grace, b),
            );

            let (move_a, timed_out_a) = response_a;
            let (move_b, timed_out_b) = response_b;

            let role_a = rules.role_label(Side::A);
            let role_b = rules.role_label(Side::B);

            let (move_a, invalid_a) = validate_or_default(rules, move_a, &role_a);
            let (move_b, invalid_b) = validate_or_default(rules, move_b, &role_b);

            if timed_out_a || invalid_a {
                consecutive_failures_a += 1;
            } else {
                consecutive_failures_a = 0;
            }
            if timed_out_b || invalid_b {
                consecutive_failures_b += 1;
            } else {
                consecutive_failures_b = 0;
            }

            if timed_out_a || invalid_a {
                self.events
                    .on_event(&LeagueEvent::DefaultMoveSubstituted {
                        match_id: match_id.clone(),
                        player_id: a.player_id.clone(),
                        game_round_id,
                        reason: if timed_out_a { "move timeout".into() } else { "invalid move".into() },
                    })
                    .await;
            }
            if timed_out_b || invalid_b {
                self.events
                    .on_event(&LeagueEvent::DefaultMoveSubstituted {
                        match_id: match_id.clone(),
                        player_id: b.player_id.clone(),
                        game_round_id,
                        reason: if timed_out_b { "move timeout".into() } else { "invalid move".into() },
                    })
                    .await;
            }

            let winner = rules.score_round(&move_a, &move_b);
            match winner {
                RoundWinner::A => score.a += 1,
                RoundWinner::B => score.b += 1,
                RoundWinner::Draw => {}
            }

            history.push(GameRoundRecord {
                game_round_id,
                move_a: move_a.clone(),
                move_b: move_b.clone(),
                round_winner: winner,
            });

            self.events
                .on_event(&LeagueEvent::GameRoundScored {
                    match_id: match_id.clone(),
                    game_round_id,
                    move_a: move_a.clone(),
                    move_b: move_b.clone(),
                    winner: format!("{winner:?}"),
                })
                .await;

            self.send_round_result(&client_a, match_id, game_round_id, &role_a, move_a.clone(), move_b.clone(), winner, score, &a.auth_token)
                .await;
            self.send_round_result(&client_b, match_id, game_round_id, &role_b, move_b.clone(), move_a.clone(), winner, score, &b.auth_token)
                .await;

            if consecutive_failures_a >= VALIDATION_FAILURE_THRESHOLD {
                forfeit_winner = Some(b.player_id.clone());
                break;
            }
            if consecutive_failures_b >= VALIDATION_FAILURE_THRESHOLD {
                forfeit_winner = Some(a.player_id.clone());
                break;
            }
        }

        let (winner, forfeit_reason) = if let Some(w) = forfeit_winner {
            (Some(w), Some("repeated move failures".to_string()))
        } else {
            let outcome = rules.finalize(&history, score);
            (
                outcome.winner.map(|side| match side {
                    Side::A => a.player_id.clone(),
                    Side::B => b.player_id.clone(),
                }),
                None,
            )
        };

        self.send_game_over(&client_a, match_id, &a.player_id, &winner, score, &history, &a.auth_token).await;
        self.send_game_over(&client_b, match_id, &b.player_id, &winner, score, &history, &b.auth_token).await;

        build_report(match_id, round_id, winner, score, history, forfeit_reason)
    }

    /// Returns `(move, treat_as_failure)`. A missed deadline and a move
    /// submitted under a session token that doesn't match the one this
    /// referee handed out for this match+role are both treated as a
    /// failure: both fall back to the game's default move and count
    /// toward the consecutive-failure forfeit threshold.
    async fn collect_move(&self, client: &TransportClient, call: ChooseMoveCall, grace: Duration, participant: &ParticipantSlot) -> (Value, bool) {
        match client
            .call_authenticated::<_, ChooseMoveResponse>("choose_move.call", &call, grace, &participant.auth_token.0)
            .await
        {
            Ok(response) if participant.session_token.verify(&AuthToken(response.session_token.clone())) => (response.r#move, false),
            Ok(_) => (Value::Null, true),
            Err(_) => (Value::Null, true),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_round_result(
        &self,
        client: &TransportClient,
        match_id: &MatchId,
        game_round_id: u32,
        role_tag: &str,
        your_move: Value,
        opponent_move: Value,
        winner: RoundWinner,
        running_score: RunningScore,
        auth_token: &AuthToken,
    ) {
        let round_winner_role = winner_role_label(winner, role_tag);
        let message = RoundResult {
            match_id: match_id.as_str().to_string(),
            game_round_id,
            round_winner_role,
            your_move,
            opponent_move,
            running_score,
        };
        // Best-effort: delivery failure here does not affect the match;
        // the player reconstructs state from the next choose_move.call.
        let _ = client
            .call_authenticated::<_, Value>("round_result", &message, deadlines::GAME_OVER, &auth_token.0)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_game_over(
        &self,
        client: &TransportClient,
        match_id: &MatchId,
        player_id: &PlayerId,
        winner: &Option<PlayerId>,
        final_score: RunningScore,
        history: &[GameRoundRecord],
        auth_token: &AuthToken,
    ) {
        let status = match winner {
            Some(w) if w == player_id => MatchOutcomeStatus::Win,
            Some(_) => MatchOutcomeStatus::Loss,
            None => MatchOutcomeStatus::Draw,
        };
        let message = GameOver {
            match_id: match_id.as_str().to_string(),
            status,
            final_score,
            history: history.to_vec(),
        };
        let _ = client
            .call_authenticated::<_, Value>("game.over", &message, deadlines::GAME_OVER, &auth_token.0)
            .await;
    }

    async fn report_result(&self, report: MatchResultReport) {
        let client = TransportClient::new(format!("{}/mcp", self.manager_endpoint));
        let token = self.auth_token.read().await.clone();
        for (attempt, backoff) in REPORT_BACKOFFS.iter().enumerate() {
            let result = match &token {
                Some(token) => {
                    client
                        .call_authenticated::<_, MatchResultAck>(
                            "match_result.report",
                            &report,
                            deadlines::RESULT_REPORT,
                            &token.0,
                        )
                        .await
                }
                None => {
                    client
                        .call::<_, MatchResultAck>("match_result.report", &report, deadlines::RESULT_REPORT)
                        .await
                }
            };
            match result {
                Ok(ack) if ack.accepted => {
                    self.events
                        .on_event(&LeagueEvent::MatchResultReported {
                            match_id: MatchId::new(report.match_id.clone()),
                            referee_id: self.referee_id.read().await.clone().unwrap_or_else(|| RefereeId::new("")),
                            duplicate: ack.duplicate,
                            accepted: true,
                        })
                        .await;
                    return;
                }
                _ => {
                    self.events
                        .on_event(&LeagueEvent::TransientErrorAbsorbed {
                            context: "match_result.report".into(),
                            detail: format!("attempt {} failed", attempt + 1),
                        })
                        .await;
                    tokio::time::sleep(*backoff).await;
                }
            }
        }
        self.outbox.put(report).await;
    }

    async fn finish_match(&self, match_id: &MatchId) {
        self.active_matches.remove(match_id);
        self.current_load.fetch_sub(1, Ordering::SeqCst);
    }
}

enum InviteOutcome {
    BothAccepted,
    Forfeit { winner: Option<PlayerId> },
}

fn validate_or_default(rules: &dyn crate::league::game::GameRules, mv: Value, role_tag: &str) -> (Value, bool) {
    if mv.is_null() || !rules.validate(&mv, role_tag) {
        (rules.default_move(role_tag), true)
    } else {
        (mv, false)
    }
}

fn winner_role_label(winner: RoundWinner, own_role_tag: &str) -> String {
    match winner {
        RoundWinner::Draw => "DRAW".to_string(),
        _ => own_role_tag.to_string(),
    }
}

fn build_report(
    match_id: &MatchId,
    round_id: &RoundId,
    winner: Option<PlayerId>,
    score: RunningScore,
    history: Vec<GameRoundRecord>,
    forfeit_reason: Option<String>,
) -> MatchResultReport {
    MatchResultReport {
        match_id: match_id.as_str().to_string(),
        round_id: round_id.as_str().to_string(),
        winner_id: winner.map(|w| w.as_str().to_string()),
        score_a: score.a,
        score_b: score.b,
        history,
        forfeit_reason,
    }
}

impl RefereeAgent {
    /// The `Arc`-aware entry point for `match.assign`: spawns the
    /// `MatchRunner` background task, which needs to outlive this single
    /// call and therefore needs its own `Arc<RefereeAgent>` clone rather
    /// than a borrowed `&self`.
    pub async fn assign(self: &Arc<Self>, arguments: Value) -> Result<Value, (ErrorCode, String)> {
        let assign: MatchAssign =
            serde_json::from_value(arguments).map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
        let ack = self.handle_match_assign(assign).await;
        Ok(serde_json::to_value(ack).unwrap())
    }
}

/// `RpcHandler` adapter that holds the `Arc<RefereeAgent>` the runner
/// needs, so a `RefereeAgent` can be mounted behind [`league_protocol::server`]
/// like any other agent.
pub struct RefereeHandler(pub Arc<RefereeAgent>);

#[async_trait]
impl RpcHandler for RefereeHandler {
    async fn handle_call(
        &self,
        tool: &str,
        auth_token: Option<&str>,
        arguments: Value,
    ) -> Result<Value, (ErrorCode, String)> {
        match tool {
            "match.assign" => {
                let expected = self.0.manager_auth_token.read().await.clone();
                match expected {
                    Some(expected) if auth_token.map(|t| expected.verify(&AuthToken(t.to_string()))).unwrap_or(false) => {
                        self.0.assign(arguments).await
                    }
                    _ => Err((ErrorCode::Unauthenticated, "missing or invalid auth_token for match.assign".into())),
                }
            }
            other => Err((ErrorCode::UnknownTool, format!("unsupported tool: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::game::ParityGame;

    #[test]
    fn validate_or_default_flags_invalid_moves() {
        let rules = ParityGame;
        let (mv, invalid) = validate_or_default(&rules, Value::from(11), "ODD");
        assert!(invalid);
        assert_eq!(mv, Value::from(ParityGame::DEFAULT_MOVE));

        let (mv, invalid) = validate_or_default(&rules, Value::from(7), "ODD");
        assert!(!invalid);
        assert_eq!(mv, Value::from(7));
    }

    #[test]
    fn validate_or_default_treats_null_as_timeout_sentinel() {
        let rules = ParityGame;
        let (mv, invalid) = validate_or_default(&rules, Value::Null, "EVEN");
        assert!(invalid);
        assert_eq!(mv, Value::from(ParityGame::DEFAULT_MOVE));
    }

    #[tokio::test]
    async fn match_assign_respects_capacity() {
        let referee = Arc::new(RefereeAgent::new(
            "R1",
            "http://127.0.0.1:8001",
            "http://127.0.0.1:8000",
            vec!["parity".into()],
            1,
        ));
        referee.current_load.store(1, Ordering::SeqCst);
        let ack = referee
            .handle_match_assign(MatchAssign {
                match_id: "R1M1".into(),
                round_id: "R1".into(),
                player_a_id: "p1".into(),
                player_a_endpoint: "http://127.0.0.1:8101".into(),
                player_b_id: "p2".into(),
                player_b_endpoint: "http://127.0.0.1:8102".into(),
                game_type: "parity".into(),
                best_of_k: 3,
                player_a_token: "tok-a".into(),
                player_b_token: "tok-b".into(),
            })
            .await;
        assert!(!ack.accepted);
    }

    #[tokio::test]
    async fn match_assign_rejects_unsupported_game_type() {
        let referee = Arc::new(RefereeAgent::new(
            "R1",
            "http://127.0.0.1:8001",
            "http://127.0.0.1:8000",
            vec!["parity".into()],
            4,
        ));
        let ack = referee
            .handle_match_assign(MatchAssign {
                match_id: "R1M1".into(),
                round_id: "R1".into(),
                player_a_id: "p1".into(),
                player_a_endpoint: "http://127.0.0.1:8101".into(),
                player_b_id: "p2".into(),
                player_b_endpoint: "http://127.0.0.1:8102".into(),
                game_type: "chess".into(),
                best_of_k: 3,
                player_a_token: "tok-a".into(),
                player_b_token: "tok-b".into(),
            })
            .await;
        assert!(!ack.accepted);
    }
}
