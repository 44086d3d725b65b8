//! League Manager: the trust anchor and control-plane root for one league.
//!
//! Owns registration, builds the round-robin schedule, dispatches matches to
//! referees with least-loaded selection, and is the single place an
//! idempotent `match_result.report` is reconciled into league state.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};

use league_protocol::deadlines;
use league_protocol::envelope::ErrorCode;
use league_protocol::messages::{
    LeagueCompleted, MatchAck, MatchAssign, MatchResultAck, MatchResultReport,
    PlayerRegisterRequest, PlayerRegisterResponse, RefereeRegisterRequest,
    RefereeRegisterResponse, RegistrationStatus, RoundAnnounce, RunningScore, StandingsEntryWire,
    StandingsUpdate,
};
use league_protocol::{RpcHandler, TransportClient};

use crate::league::config::LeagueConfig;
use crate::league::errors::LeagueError;
use crate::league::event::{EventHandler, LeagueEvent, NoopEventHandler, PeerKind};
use crate::league::game::GameRegistry;
use crate::league::identity::{AuthToken, LeagueId, MatchId, PlayerId, RefereeId, RoundId};
use crate::league::operator::{
    LeagueStatusSnapshot, OperatorChannel, OperatorCommand, OperatorResponse,
};
use crate::league::repository::{PeerStatus, PlayerRecord, RefereeRecord};
use crate::league::scheduler::{build_schedule, MatchState, Schedule, ScheduledMatch};
use crate::league::standings::{compute_standings, CompletedMatch, StandingsEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeagueState {
    Registration,
    Ready,
    InProgress,
    Completed,
    Aborted,
}

impl fmt::Display for LeagueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LeagueState::Registration => "REGISTRATION",
            LeagueState::Ready => "READY",
            LeagueState::InProgress => "IN_PROGRESS",
            LeagueState::Completed => "COMPLETED",
            LeagueState::Aborted => "ABORTED",
        };
        write!(f, "{label}")
    }
}

/// How long `dispatch_match` waits before re-polling the referee pool
/// after every referee is either unsupported or momentarily full.
const REFEREE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct LeagueManager {
    pub league_id: LeagueId,
    pub game_type: String,
    config: LeagueConfig,
    games: Arc<GameRegistry>,
    events: Arc<dyn EventHandler>,
    /// This Manager's own bearer identity, handed to every peer at
    /// registration so it can authenticate its own outbound calls
    /// (`match.assign`, `round.announce`, `standings.update`,
    /// `league.completed`) the same way a Referee or Player authenticates
    /// theirs.
    self_token: AuthToken,
    state: RwLock<LeagueState>,
    players: DashMap<PlayerId, PlayerRecord>,
    referees: DashMap<RefereeId, RefereeRecord>,
    schedule: RwLock<Option<Schedule>>,
    current_round_index: AtomicUsize,
    match_reports: DashMap<MatchId, MatchResultReport>,
    round_notify: DashMap<RoundId, Arc<Notify>>,
    next_player_seq: AtomicU64,
    next_referee_seq: AtomicU64,
}

impl LeagueManager {
    pub fn new(league_id: LeagueId, game_type: impl Into<String>, config: LeagueConfig) -> Self {
        let self_token = AuthToken::generate(config.auth_token_bytes);
        Self {
            league_id,
            game_type: game_type.into(),
            config,
            games: Arc::new(GameRegistry::with_reference_games()),
            events: Arc::new(NoopEventHandler),
            self_token,
            state: RwLock::new(LeagueState::Registration),
            players: DashMap::new(),
            referees: DashMap::new(),
            schedule: RwLock::new(None),
            current_round_index: AtomicUsize::new(0),
            match_reports: DashMap::new(),
            round_notify: DashMap::new(),
            next_player_seq: AtomicU64::new(1),
            next_referee_seq: AtomicU64::new(1),
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

    pub async fn state(&self) -> LeagueState {
        *self.state.read().await
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    // ----------------------------------------------------------- Registration

    async fn handle_player_register(&self, request: PlayerRegisterRequest) -> PlayerRegisterResponse {
        if *self.state.read().await != LeagueState::Registration {
            return PlayerRegisterResponse {
                status: RegistrationStatus::Rejected,
                player_id: None,
                auth_token: None,
                manager_token: None,
                reason: Some("league is not accepting registrations".into()),
            };
        }
        if !request.supported_game_types.iter().any(|g| g == &self.game_type) {
            return PlayerRegisterResponse {
                status: RegistrationStatus::Rejected,
                player_id: None,
                auth_token: None,
                manager_token: None,
                reason: Some(format!("does not support game type {}", self.game_type)),
            };
        }

        let player_id = match &request.player_id {
            Some(raw) => PlayerId::new(raw.clone()),
            None => self.mint_player_id(),
        };

        if let Some(existing) = self.players.get(&player_id) {
            if existing.display_name == request.display_name && existing.endpoint == request.contact_endpoint {
                return PlayerRegisterResponse {
                    status: RegistrationStatus::Accepted,
                    player_id: Some(player_id.as_str().to_string()),
                    auth_token: Some(existing.auth_token.clone()),
                    manager_token: Some(self.self_token.0.clone()),
                    reason: None,
                };
            }
            return PlayerRegisterResponse {
                status: RegistrationStatus::Rejected,
                player_id: None,
                auth_token: None,
                manager_token: None,
                reason: Some("player_id already registered by a different peer".into()),
            };
        }

        let token = AuthToken::generate(self.config.auth_token_bytes);
        self.players.insert(
            player_id.clone(),
            PlayerRecord {
                display_name: request.display_name,
                endpoint: request.contact_endpoint,
                supported_game_types: request.supported_game_types,
                auth_token: token.0.clone(),
                status: PeerStatus::Active,
                wins: 0,
                losses: 0,
                draws: 0,
                points: 0,
                matches_played: 0,
            },
        );

        self.events
            .on_event(&LeagueEvent::PeerRegistered {
                league_id: self.league_id.clone(),
                kind: PeerKind::Player,
                accepted: true,
                reason: None,
            })
            .await;

        PlayerRegisterResponse {
            status: RegistrationStatus::Accepted,
            player_id: Some(player_id.as_str().to_string()),
            auth_token: Some(token.0),
            manager_token: Some(self.self_token.0.clone()),
            reason: None,
        }
    }

    async fn handle_referee_register(&self, request: RefereeRegisterRequest) -> RefereeRegisterResponse {
        if *self.state.read().await != LeagueState::Registration {
            return RefereeRegisterResponse {
                status: RegistrationStatus::Rejected,
                referee_id: None,
                auth_token: None,
                manager_token: None,
                reason: Some("league is not accepting registrations".into()),
            };
        }
        if !request.supported_game_types.iter().any(|g| g == &self.game_type) {
            return RefereeRegisterResponse {
                status: RegistrationStatus::Rejected,
                referee_id: None,
                auth_token: None,
                manager_token: None,
                reason: Some(format!("does not support game type {}", self.game_type)),
            };
        }

        let referee_id = match &request.referee_id {
            Some(raw) => RefereeId::new(raw.clone()),
            None => self.mint_referee_id(),
        };

        if self.referees.contains_key(&referee_id) {
            return RefereeRegisterResponse {
                status: RegistrationStatus::Rejected,
                referee_id: None,
                auth_token: None,
                manager_token: None,
                reason: Some("referee_id already registered".into()),
            };
        }

        let token = AuthToken::generate(self.config.auth_token_bytes);
        self.referees.insert(
            referee_id.clone(),
            RefereeRecord {
                endpoint: request.contact_endpoint,
                supported_game_types: request.supported_game_types,
                max_concurrent_matches: request.max_concurrent_matches,
                auth_token: token.0.clone(),
                current_load: 0,
            },
        );

        self.events
            .on_event(&LeagueEvent::PeerRegistered {
                league_id: self.league_id.clone(),
                kind: PeerKind::Referee,
                accepted: true,
                reason: None,
            })
            .await;

        RefereeRegisterResponse {
            status: RegistrationStatus::Accepted,
            referee_id: Some(referee_id.as_str().to_string()),
            auth_token: Some(token.0),
            manager_token: Some(self.self_token.0.clone()),
            reason: None,
        }
    }

    fn mint_player_id(&self) -> PlayerId {
        let seq = self.next_player_seq.fetch_add(1, Ordering::SeqCst);
        PlayerId::new(format!("auto-player-{seq}"))
    }

    fn mint_referee_id(&self) -> RefereeId {
        let seq = self.next_referee_seq.fetch_add(1, Ordering::SeqCst);
        RefereeId::new(format!("auto-referee-{seq}"))
    }

    // ------------------------------------------------------------- Results

    async fn handle_match_result_report(
        &self,
        auth_token: Option<&str>,
        report: MatchResultReport,
    ) -> Result<MatchResultAck, LeagueError> {
        let match_id = MatchId::new(report.match_id.clone());

        let referee_id = {
            let schedule = self.schedule.read().await;
            let schedule = schedule.as_ref().ok_or_else(|| LeagueError::UnknownMatch(match_id.as_str().to_string()))?;
            let m = find_match(schedule, &match_id).ok_or_else(|| LeagueError::UnknownMatch(match_id.as_str().to_string()))?;
            m.assigned_referee.clone().ok_or_else(|| LeagueError::InvalidState("match has no assigned referee".into()))?
        };

        let referee_record = self
            .referees
            .get(&referee_id)
            .ok_or_else(|| LeagueError::Internal("assigned referee is not registered".into()))?;

        let presented = auth_token.map(|t| AuthToken(t.to_string()));
        let expected = AuthToken(referee_record.auth_token.clone());
        match &presented {
            Some(token) if expected.verify(token) => {}
            _ => return Err(LeagueError::Unauthenticated),
        }
        drop(referee_record);

        if let Some(existing) = self.match_reports.get(&match_id) {
            let duplicate_matches = *existing == report;
            return Ok(MatchResultAck { accepted: duplicate_matches, duplicate: true });
        }

        self.match_reports.insert(match_id.clone(), report.clone());
        if let Some(mut referee_record) = self.referees.get_mut(&referee_id) {
            referee_record.current_load = referee_record.current_load.saturating_sub(1);
        }

        let round_id = {
            let mut schedule = self.schedule.write().await;
            let schedule = schedule.as_mut().expect("schedule present, checked above");
            let m = find_match_mut(schedule, &match_id).expect("match present, checked above");
            m.state = if report.forfeit_reason.is_some() { MatchState::Forfeited } else { MatchState::Completed };
            m.result = Some(crate::league::scheduler::MatchResult {
                winner: report.winner_id.clone().map(PlayerId::new),
                score: RunningScore { a: report.score_a, b: report.score_b },
            });
            record_player_stats(&self.players, m, &self.config);
            m.round_id.clone()
        };

        self.events
            .on_event(&LeagueEvent::MatchResultReported {
                match_id: match_id.clone(),
                referee_id,
                duplicate: false,
                accepted: true,
            })
            .await;

        let round_complete = {
            let schedule = self.schedule.read().await;
            let schedule = schedule.as_ref().expect("schedule present");
            schedule
                .rounds
                .iter()
                .find(|r| r.round_id == round_id)
                .map(|r| r.is_complete())
                .unwrap_or(false)
        };
        if round_complete {
            if let Some(notify) = self.round_notify.get(&round_id) {
                notify.notify_waiters();
            }
        }

        Ok(MatchResultAck { accepted: true, duplicate: false })
    }

    // ----------------------------------------------------------- Standings

    pub async fn standings(&self) -> Vec<StandingsEntry> {
        let player_ids: Vec<PlayerId> = self.players.iter().map(|e| e.key().clone()).collect();
        let schedule = self.schedule.read().await;
        let completed: Vec<CompletedMatch> = schedule
            .as_ref()
            .map(|s| {
                s.rounds
                    .iter()
                    .flat_map(|r| &r.matches)
                    .filter(|m| !m.is_bye())
                    .filter_map(|m| {
                        let result = m.result.as_ref()?;
                        Some(CompletedMatch {
                            player_a: m.player_a.clone(),
                            player_b: m.player_b.clone()?,
                            winner: result.winner.clone(),
                            score_a: result.score.a,
                            score_b: result.score.b,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        compute_standings(&player_ids, &completed, self.config.points_win, self.config.points_draw)
    }

    async fn standings_wire(&self) -> Vec<StandingsEntryWire> {
        self.standings()
            .await
            .into_iter()
            .map(|e| StandingsEntryWire {
                player_id: e.player_id.as_str().to_string(),
                wins: e.wins,
                losses: e.losses,
                draws: e.draws,
                points: e.points,
                tiebreak: e.game_round_diff,
            })
            .collect()
    }

    pub async fn status(&self) -> LeagueStatusSnapshot {
        let rounds_total = self.schedule.read().await.as_ref().map(|s| s.rounds.len()).unwrap_or(0);
        LeagueStatusSnapshot {
            league_id: self.league_id.clone(),
            state: self.state().await.to_string(),
            rounds_completed: self.current_round_index.load(Ordering::SeqCst),
            rounds_total,
            standings: self.standings().await,
        }
    }

    // --------------------------------------------------------- Tournament run

    /// Builds the schedule and opens the league for play. Fails with
    /// `InvalidState` if called outside `REGISTRATION` or with fewer than
    /// `config.min_players` active players.
    pub async fn start_league(&self) -> Result<(), LeagueError> {
        {
            let state = self.state.read().await;
            if *state != LeagueState::Registration {
                return Err(LeagueError::InvalidState("league already started".into()));
            }
        }
        let active_players: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|e| e.value().status == PeerStatus::Active)
            .map(|e| e.key().clone())
            .collect();
        if active_players.len() < self.config.min_players {
            return Err(LeagueError::InvalidState(format!(
                "need at least {} active players, have {}",
                self.config.min_players,
                active_players.len()
            )));
        }
        if self.referees.is_empty() {
            return Err(LeagueError::InvalidState("no referees registered".into()));
        }

        let schedule = build_schedule(active_players, &self.game_type).map_err(LeagueError::InvalidState)?;
        *self.schedule.write().await = Some(schedule);
        *self.state.write().await = LeagueState::Ready;

        self.events
            .on_event(&LeagueEvent::LeagueStateChanged {
                league_id: self.league_id.clone(),
                from: LeagueState::Registration.to_string(),
                to: LeagueState::Ready.to_string(),
            })
            .await;
        Ok(())
    }

    /// Dispatches the next round's non-BYE matches to referees and waits
    /// for every one of them to report a result, then advances the round
    /// cursor. Returns `Ok(false)` once every round has already run. The
    /// first successful call makes the `READY → IN_PROGRESS` transition;
    /// every call after that finds the league already `IN_PROGRESS`.
    pub async fn run_round(&self) -> Result<bool, LeagueError> {
        {
            let mut state = self.state.write().await;
            match *state {
                LeagueState::Ready => {
                    *state = LeagueState::InProgress;
                    drop(state);
                    self.events
                        .on_event(&LeagueEvent::LeagueStateChanged {
                            league_id: self.league_id.clone(),
                            from: LeagueState::Ready.to_string(),
                            to: LeagueState::InProgress.to_string(),
                        })
                        .await;
                }
                LeagueState::InProgress => {}
                _ => return Err(LeagueError::InvalidState("league is not in progress".into())),
            }
        }

        let round_index = self.current_round_index.load(Ordering::SeqCst);
        let (round_id, pending_match_ids, announce_ids) = {
            let schedule = self.schedule.read().await;
            let schedule = schedule.as_ref().ok_or_else(|| LeagueError::InvalidState("no schedule".into()))?;
            match schedule.rounds.get(round_index) {
                None => return Ok(false),
                Some(round) => {
                    let pending: Vec<MatchId> = round
                        .matches
                        .iter()
                        .filter(|m| !m.is_bye())
                        .map(|m| m.match_id.clone())
                        .collect();
                    let all_ids: Vec<String> = round.matches.iter().map(|m| m.match_id.as_str().to_string()).collect();
                    (round.round_id.clone(), pending, all_ids)
                }
            }
        };

        self.events
            .on_event(&LeagueEvent::RoundStarted {
                league_id: self.league_id.clone(),
                round_id: round_id.clone(),
                match_count: announce_ids.len(),
            })
            .await;
        self.broadcast_round_announce(&round_id, &announce_ids).await;

        let notify = Arc::new(Notify::new());
        self.round_notify.insert(round_id.clone(), notify.clone());

        for match_id in &pending_match_ids {
            self.dispatch_match(match_id, None).await?;
        }

        if !pending_match_ids.is_empty() {
            self.wait_for_round_with_watchdog(&round_id, &pending_match_ids, &notify).await;
        }

        self.round_notify.remove(&round_id);
        self.current_round_index.fetch_add(1, Ordering::SeqCst);

        self.events
            .on_event(&LeagueEvent::RoundCompleted {
                league_id: self.league_id.clone(),
                round_id: round_id.clone(),
            })
            .await;
        self.broadcast_standings_update(&round_id).await;

        let rounds_total = self.schedule.read().await.as_ref().map(|s| s.rounds.len()).unwrap_or(0);
        if self.current_round_index.load(Ordering::SeqCst) >= rounds_total {
            *self.state.write().await = LeagueState::Completed;
            self.events
                .on_event(&LeagueEvent::LeagueStateChanged {
                    league_id: self.league_id.clone(),
                    from: LeagueState::InProgress.to_string(),
                    to: LeagueState::Completed.to_string(),
                })
                .await;
            self.broadcast_league_completed().await;
        }

        Ok(true)
    }

    pub async fn run_all_rounds(&self) -> Result<(), LeagueError> {
        while self.run_round().await? {}
        Ok(())
    }

    /// Waits for every Match of this Round to reach a terminal state,
    /// re-polling completion every watchdog window. A Match that misses
    /// its watchdog window (its referee crashed or lost connectivity) is
    /// reassigned to a different referee once; a second miss abandons it
    /// with a `(0,0)` no-winner result so the Round can still complete.
    async fn wait_for_round_with_watchdog(&self, round_id: &RoundId, pending_match_ids: &[MatchId], notify: &Arc<Notify>) {
        let watchdog = deadlines::match_watchdog(self.config.best_of_k);
        loop {
            if self.round_is_complete(round_id).await {
                return;
            }
            if tokio::time::timeout(watchdog, notify.notified()).await.is_ok() {
                continue;
            }
            for match_id in pending_match_ids {
                self.handle_stalled_match(match_id, round_id).await;
            }
        }
    }

    async fn round_is_complete(&self, round_id: &RoundId) -> bool {
        let schedule = self.schedule.read().await;
        schedule
            .as_ref()
            .and_then(|s| s.rounds.iter().find(|r| &r.round_id == round_id))
            .map(|r| r.is_complete())
            .unwrap_or(false)
    }

    /// Reassigns a Match that missed its watchdog window to a different
    /// referee, or abandons it if it has already been through one
    /// reassignment or no alternative referee is available.
    async fn handle_stalled_match(&self, match_id: &MatchId, round_id: &RoundId) {
        let (state, current_referee, already_reassigned) = {
            let schedule = self.schedule.read().await;
            let schedule = schedule.as_ref().expect("schedule present");
            let Some(m) = find_match(schedule, match_id) else { return };
            (m.state, m.assigned_referee.clone(), m.reassigned)
        };
        if matches!(state, MatchState::Completed | MatchState::Abandoned | MatchState::Forfeited) {
            return;
        }

        let has_alternative = self.referees.iter().any(|e| {
            e.value().supported_game_types.contains(&self.game_type) && Some(e.key()) != current_referee.as_ref()
        });

        if already_reassigned || !has_alternative {
            self.abandon_match(match_id, round_id, current_referee).await;
            return;
        }

        self.events
            .on_event(&LeagueEvent::TransientErrorAbsorbed {
                context: "watchdog".into(),
                detail: format!("{match_id} missed its result-report window, reassigning"),
            })
            .await;

        if let Some(old) = &current_referee {
            if let Some(mut r) = self.referees.get_mut(old) {
                r.current_load = r.current_load.saturating_sub(1);
            }
        }
        {
            let mut schedule = self.schedule.write().await;
            let schedule = schedule.as_mut().expect("schedule present");
            let m = find_match_mut(schedule, match_id).expect("match present, checked above");
            m.reassigned = true;
            m.state = MatchState::Scheduled;
        }
        if let Err(e) = self.dispatch_match(match_id, current_referee.as_ref()).await {
            self.events
                .on_event(&LeagueEvent::TransientErrorAbsorbed {
                    context: "watchdog-reassign".into(),
                    detail: format!("{match_id} could not be reassigned: {e}"),
                })
                .await;
            self.abandon_match(match_id, round_id, None).await;
        }
    }

    async fn abandon_match(&self, match_id: &MatchId, round_id: &RoundId, referee: Option<RefereeId>) {
        {
            let mut schedule = self.schedule.write().await;
            let schedule = schedule.as_mut().expect("schedule present");
            let Some(m) = find_match_mut(schedule, match_id) else { return };
            m.state = MatchState::Abandoned;
            m.result = Some(crate::league::scheduler::MatchResult { winner: None, score: RunningScore { a: 0, b: 0 } });
        }
        if let Some(r) = referee {
            if let Some(mut rec) = self.referees.get_mut(&r) {
                rec.current_load = rec.current_load.saturating_sub(1);
            }
        }
        self.events
            .on_event(&LeagueEvent::MatchTerminatedAbnormally {
                match_id: match_id.clone(),
                reason: "watchdog window exceeded with no referee available to reassign to".into(),
                abandoned: true,
            })
            .await;
        if self.round_is_complete(round_id).await {
            if let Some(notify) = self.round_notify.get(round_id) {
                notify.notify_waiters();
            }
        }
    }

    async fn dispatch_match(&self, match_id: &MatchId, exclude: Option<&RefereeId>) -> Result<(), LeagueError> {
        let assign: MatchAssign = {
            let schedule = self.schedule.read().await;
            let schedule = schedule.as_ref().expect("schedule present");
            let m = find_match(schedule, match_id).expect("match present");
            build_match_assign(m, &self.players, self.config.best_of_k)?
        };

        if !self
            .referees
            .iter()
            .any(|e| e.value().supported_game_types.contains(&self.game_type) && Some(e.key()) != exclude)
        {
            return Err(LeagueError::CapacityExceeded);
        }

        loop {
            let Some(referee_id) = self.pick_referee(exclude) else {
                tokio::time::sleep(REFEREE_POLL_INTERVAL).await;
                continue;
            };
            let endpoint = self.referees.get(&referee_id).map(|r| r.endpoint.clone()).unwrap();
            let client = TransportClient::new(format!("{endpoint}/mcp"));
            let ack = client
                .call_authenticated::<_, MatchAck>("match.assign", &assign, deadlines::MATCH_ASSIGN, &self.self_token.0)
                .await;

            match ack {
                Ok(ack) if ack.accepted => {
                    if let Some(mut referee_record) = self.referees.get_mut(&referee_id) {
                        referee_record.current_load += 1;
                    }
                    let mut schedule = self.schedule.write().await;
                    let schedule = schedule.as_mut().expect("schedule present");
                    let m = find_match_mut(schedule, match_id).expect("match present");
                    m.state = MatchState::InProgress;
                    m.assigned_referee = Some(referee_id);
                    return Ok(());
                }
                _ => {
                    // Rejection may be transient (the referee is at capacity
                    // right now, or didn't answer in time) — not a reason to
                    // exclude it permanently. Back off and try the pool
                    // again; a referee's `current_load` only ever frees up
                    // once an in-flight match reports its result.
                    self.events
                        .on_event(&LeagueEvent::TransientErrorAbsorbed {
                            context: "match.assign".into(),
                            detail: format!("referee declined or did not answer for {match_id}"),
                        })
                        .await;
                    tokio::time::sleep(REFEREE_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Least-loaded referee that still has a free slot and supports this
    /// league's game type, other than `exclude` (the referee a watchdog
    /// reassignment is moving a Match away from). Capacity is trusted to
    /// the real `match.assign` ack (the referee enforces its own
    /// `max_concurrent_matches` locally) — the filter here is just to
    /// avoid hammering a referee we already know is full on the
    /// Manager's own bookkeeping.
    fn pick_referee(&self, exclude: Option<&RefereeId>) -> Option<RefereeId> {
        self.referees
            .iter()
            .filter(|e| e.value().supported_game_types.contains(&self.game_type))
            .filter(|e| e.value().current_load < e.value().max_concurrent_matches)
            .filter(|e| Some(e.key()) != exclude)
            .min_by(|a, b| {
                a.value()
                    .current_load
                    .cmp(&b.value().current_load)
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|e| e.key().clone())
    }

    async fn broadcast_round_announce(&self, round_id: &RoundId, match_ids: &[String]) {
        let message = RoundAnnounce { round_id: round_id.as_str().to_string(), matches: match_ids.to_vec() };
        for player in self.players.iter() {
            let client = TransportClient::new(format!("{}/mcp", player.value().endpoint));
            let _ = client
                .call_authenticated::<_, Value>("round.announce", &message, deadlines::GAME_OVER, &self.self_token.0)
                .await;
        }
    }

    async fn broadcast_standings_update(&self, round_id: &RoundId) {
        let standings = self.standings_wire().await;
        let message = StandingsUpdate { standings, round_id: round_id.as_str().to_string() };
        for player in self.players.iter() {
            let client = TransportClient::new(format!("{}/mcp", player.value().endpoint));
            let _ = client
                .call_authenticated::<_, Value>("standings.update", &message, deadlines::GAME_OVER, &self.self_token.0)
                .await;
        }
    }

    async fn broadcast_league_completed(&self) {
        let final_standings = self.standings_wire().await;
        let champion_id = final_standings.first().map(|e| e.player_id.clone());
        let message = LeagueCompleted { champion_id, final_standings };
        for player in self.players.iter() {
            let client = TransportClient::new(format!("{}/mcp", player.value().endpoint));
            let _ = client
                .call_authenticated::<_, Value>("league.completed", &message, deadlines::GAME_OVER, &self.self_token.0)
                .await;
        }
    }

    /// Drives this manager from an [`OperatorChannel`] until `Shutdown` is
    /// received or the channel closes.
    pub async fn run_operator_loop(self: Arc<Self>, channel: Arc<dyn OperatorChannel>) {
        while let Some((command, reply)) = channel.recv().await {
            let response = match command {
                OperatorCommand::StartLeague => match self.start_league().await {
                    Ok(()) => OperatorResponse::Ack,
                    Err(e) => OperatorResponse::Error(e.to_string()),
                },
                OperatorCommand::RunRound => match self.run_round().await {
                    Ok(_) => OperatorResponse::Ack,
                    Err(e) => OperatorResponse::Error(e.to_string()),
                },
                OperatorCommand::RunAllRounds => match self.run_all_rounds().await {
                    Ok(()) => OperatorResponse::Ack,
                    Err(e) => OperatorResponse::Error(e.to_string()),
                },
                OperatorCommand::Status => OperatorResponse::Status(self.status().await),
                OperatorCommand::Shutdown => {
                    let _ = reply.send(OperatorResponse::Ack);
                    return;
                }
            };
            let _ = reply.send(response);
        }
    }
}

fn find_match<'a>(schedule: &'a Schedule, match_id: &MatchId) -> Option<&'a ScheduledMatch> {
    schedule.rounds.iter().flat_map(|r| &r.matches).find(|m| &m.match_id == match_id)
}

fn find_match_mut<'a>(schedule: &'a mut Schedule, match_id: &MatchId) -> Option<&'a mut ScheduledMatch> {
    schedule.find_match_mut(match_id)
}

fn build_match_assign(
    m: &ScheduledMatch,
    players: &DashMap<PlayerId, PlayerRecord>,
    best_of_k: u32,
) -> Result<MatchAssign, LeagueError> {
    let player_b = m.player_b.clone().ok_or_else(|| LeagueError::Internal("attempted to dispatch a BYE match".into()))?;
    let a = players.get(&m.player_a).ok_or_else(|| LeagueError::Internal("scheduled player is not registered".into()))?;
    let b = players.get(&player_b).ok_or_else(|| LeagueError::Internal("scheduled player is not registered".into()))?;
    Ok(MatchAssign {
        match_id: m.match_id.as_str().to_string(),
        round_id: m.round_id.as_str().to_string(),
        player_a_id: m.player_a.as_str().to_string(),
        player_a_endpoint: a.endpoint.clone(),
        player_b_id: player_b.as_str().to_string(),
        player_b_endpoint: b.endpoint.clone(),
        game_type: m.game_type.clone(),
        best_of_k,
        player_a_token: a.auth_token.clone(),
        player_b_token: b.auth_token.clone(),
    })
}

fn record_player_stats(players: &DashMap<PlayerId, PlayerRecord>, m: &ScheduledMatch, config: &LeagueConfig) {
    let Some(player_b) = m.player_b.clone() else { return };
    let Some(result) = m.result.as_ref() else { return };
    let (points_a, points_b, win_a, win_b, draw) = match &result.winner {
        Some(w) if w == &m.player_a => (config.points_win, 0, true, false, false),
        Some(w) if w == &player_b => (0, config.points_win, false, true, false),
        _ => (config.points_draw, config.points_draw, false, false, true),
    };
    if let Some(mut a) = players.get_mut(&m.player_a) {
        a.points += points_a;
        a.matches_played += 1;
        if win_a {
            a.wins += 1;
        } else if draw {
            a.draws += 1;
        } else {
            a.losses += 1;
        }
    }
    if let Some(mut b) = players.get_mut(&player_b) {
        b.points += points_b;
        b.matches_played += 1;
        if win_b {
            b.wins += 1;
        } else if draw {
            b.draws += 1;
        } else {
            b.losses += 1;
        }
    }
}

#[async_trait]
impl RpcHandler for LeagueManager {
    async fn handle_call(
        &self,
        tool: &str,
        auth_token: Option<&str>,
        arguments: Value,
    ) -> Result<Value, (ErrorCode, String)> {
        match tool {
            "player.register.request" => {
                let request: PlayerRegisterRequest = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                let response = self.handle_player_register(request).await;
                Ok(serde_json::to_value(response).unwrap())
            }
            "referee.register.request" => {
                let request: RefereeRegisterRequest = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                let response = self.handle_referee_register(request).await;
                Ok(serde_json::to_value(response).unwrap())
            }
            "match_result.report" => {
                let report: MatchResultReport = serde_json::from_value(arguments)
                    .map_err(|e| (ErrorCode::InvalidParams, e.to_string()))?;
                let ack = self
                    .handle_match_result_report(auth_token, report)
                    .await
                    .map_err(|e| (e.rpc_code(), e.to_string()))?;
                Ok(serde_json::to_value(ack).unwrap())
            }
            other => Err((ErrorCode::UnknownTool, format!("unsupported tool: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LeagueManager {
        LeagueManager::new(LeagueId::new("league-1"), "parity", LeagueConfig::default())
    }

    async fn register_player(m: &LeagueManager, id: &str, endpoint: &str) -> PlayerRegisterResponse {
        m.handle_player_register(PlayerRegisterRequest {
            display_name: id.to_string(),
            version: "1.0".into(),
            supported_game_types: vec!["parity".into()],
            contact_endpoint: endpoint.to_string(),
            player_id: Some(id.to_string()),
        })
        .await
    }

    async fn register_referee(m: &LeagueManager, id: &str, endpoint: &str, max: u32) -> RefereeRegisterResponse {
        m.handle_referee_register(RefereeRegisterRequest {
            display_name: id.to_string(),
            version: "1.0".into(),
            supported_game_types: vec!["parity".into()],
            contact_endpoint: endpoint.to_string(),
            max_concurrent_matches: max,
            referee_id: Some(id.to_string()),
        })
        .await
    }

    #[tokio::test]
    async fn registration_rejected_for_unsupported_game_type() {
        let m = manager();
        let response = m
            .handle_player_register(PlayerRegisterRequest {
                display_name: "Alice".into(),
                version: "1.0".into(),
                supported_game_types: vec!["chess".into()],
                contact_endpoint: "http://127.0.0.1:8101".into(),
                player_id: None,
            })
            .await;
        assert!(matches!(response.status, RegistrationStatus::Rejected));
    }

    #[tokio::test]
    async fn duplicate_player_id_with_different_identity_is_rejected() {
        let m = manager();
        register_player(&m, "p1", "http://127.0.0.1:8101").await;
        let response = m
            .handle_player_register(PlayerRegisterRequest {
                display_name: "Someone Else".into(),
                version: "1.0".into(),
                supported_game_types: vec!["parity".into()],
                contact_endpoint: "http://127.0.0.1:9999".into(),
                player_id: Some("p1".into()),
            })
            .await;
        assert!(matches!(response.status, RegistrationStatus::Rejected));
    }

    #[tokio::test]
    async fn start_league_requires_min_players_and_a_referee() {
        let m = manager();
        assert!(m.start_league().await.is_err());
        register_player(&m, "p1", "http://127.0.0.1:8101").await;
        register_player(&m, "p2", "http://127.0.0.1:8102").await;
        assert!(m.start_league().await.is_err(), "no referee registered yet");
        register_referee(&m, "r1", "http://127.0.0.1:9001", 4).await;
        assert!(m.start_league().await.is_ok());
        assert_eq!(m.state().await, LeagueState::Ready);
    }

    #[tokio::test]
    async fn match_result_report_rejects_bad_token() {
        let m = manager();
        register_player(&m, "p1", "http://127.0.0.1:8101").await;
        register_player(&m, "p2", "http://127.0.0.1:8102").await;
        register_referee(&m, "r1", "http://127.0.0.1:9001", 4).await;
        m.start_league().await.unwrap();

        let report = MatchResultReport {
            match_id: "R1M1".into(),
            round_id: "R1".into(),
            winner_id: Some("p1".into()),
            score_a: 3,
            score_b: 1,
            history: vec![],
            forfeit_reason: None,
        };

        // Assign it manually since run_round would require a live referee server.
        {
            let mut schedule = m.schedule.write().await;
            let schedule = schedule.as_mut().unwrap();
            let mtc = find_match_mut(schedule, &MatchId::new("R1M1")).unwrap();
            mtc.assigned_referee = Some(RefereeId::new("r1"));
        }

        let result = m.handle_match_result_report(Some("wrong-token"), report).await;
        assert!(matches!(result, Err(LeagueError::Unauthenticated)));
    }

    #[tokio::test]
    async fn match_result_report_is_idempotent() {
        let m = manager();
        register_player(&m, "p1", "http://127.0.0.1:8101").await;
        register_player(&m, "p2", "http://127.0.0.1:8102").await;
        let referee_response = register_referee(&m, "r1", "http://127.0.0.1:9001", 4).await;
        m.start_league().await.unwrap();

        {
            let mut schedule = m.schedule.write().await;
            let schedule = schedule.as_mut().unwrap();
            let mtc = find_match_mut(schedule, &MatchId::new("R1M1")).unwrap();
            mtc.assigned_referee = Some(RefereeId::new("r1"));
        }

        let token = referee_response.auth_token.unwrap();
        let report = MatchResultReport {
            match_id: "R1M1".into(),
            round_id: "R1".into(),
            winner_id: Some("p1".into()),
            score_a: 3,
            score_b: 1,
            history: vec![],
            forfeit_reason: None,
        };

        let first = m.handle_match_result_report(Some(&token), report.clone()).await.unwrap();
        assert!(first.accepted && !first.duplicate);

        let second = m.handle_match_result_report(Some(&token), report.clone()).await.unwrap();
        assert!(second.accepted && second.duplicate);

        let mut conflicting = report;
        conflicting.score_a = 99;
        let third = m.handle_match_result_report(Some(&token), conflicting).await.unwrap();
        assert!(!third.accepted && third.duplicate);
    }
}
