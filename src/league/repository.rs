//! Persistence collaborator interfaces.
//!
//! Four keyed-put/get/list repositories plus one append-only results log.
//! None of this is consumed by the core's correctness — a league runs
//! identically whether or not anything is persisted. The in-memory
//! implementations here exist so tests (and small demos) don't need a real
//! database; production deployments inject their own.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::league::identity::{MatchId, PlayerId, RefereeId};
use crate::league::scheduler::ScheduledMatch;
use crate::league::standings::StandingsEntry;
use league_protocol::messages::MatchResultReport;

#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub display_name: String,
    pub endpoint: String,
    pub supported_game_types: Vec<String>,
    pub auth_token: String,
    pub status: PeerStatus,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub points: i64,
    pub matches_played: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Active,
    Suspended,
    Dropped,
}

#[derive(Debug, Clone)]
pub struct RefereeRecord {
    pub endpoint: String,
    pub supported_game_types: Vec<String>,
    pub max_concurrent_matches: u32,
    pub auth_token: String,
    pub current_load: u32,
}

#[async_trait]
pub trait PlayerRepository: Send + Sync {
    async fn put(&self, id: PlayerId, record: PlayerRecord);
    async fn get(&self, id: &PlayerId) -> Option<PlayerRecord>;
    async fn list(&self) -> Vec<(PlayerId, PlayerRecord)>;
}

#[async_trait]
pub trait RefereeRepository: Send + Sync {
    async fn put(&self, id: RefereeId, record: RefereeRecord);
    async fn get(&self, id: &RefereeId) -> Option<RefereeRecord>;
    async fn list(&self) -> Vec<(RefereeId, RefereeRecord)>;
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn put(&self, id: MatchId, record: ScheduledMatch);
    async fn get(&self, id: &MatchId) -> Option<ScheduledMatch>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Append-only: every delivery (including duplicates) may be recorded;
    /// idempotence of league state lives in the League Manager, not here.
    async fn put(&self, report: MatchResultReport);
    async fn get(&self, match_id: &MatchId) -> Vec<MatchResultReport>;
}

#[async_trait]
pub trait StandingsRepository: Send + Sync {
    async fn put(&self, round_id: String, standings: Vec<StandingsEntry>);
    async fn get(&self, round_id: &str) -> Option<Vec<StandingsEntry>>;
}

/// No-op in-memory implementations, sufficient for tests.
pub mod in_memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryPlayerRepository(DashMap<PlayerId, PlayerRecord>);

    #[async_trait]
    impl PlayerRepository for InMemoryPlayerRepository {
        async fn put(&self, id: PlayerId, record: PlayerRecord) {
            self.0.insert(id, record);
        }
        async fn get(&self, id: &PlayerId) -> Option<PlayerRecord> {
            self.0.get(id).map(|e| e.clone())
        }
        async fn list(&self) -> Vec<(PlayerId, PlayerRecord)> {
            self.0.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
        }
    }

    #[derive(Default)]
    pub struct InMemoryRefereeRepository(DashMap<RefereeId, RefereeRecord>);

    #[async_trait]
    impl RefereeRepository for InMemoryRefereeRepository {
        async fn put(&self, id: RefereeId, record: RefereeRecord) {
            self.0.insert(id, record);
        }
        async fn get(&self, id: &RefereeId) -> Option<RefereeRecord> {
            self.0.get(id).map(|e| e.clone())
        }
        async fn list(&self) -> Vec<(RefereeId, RefereeRecord)> {
            self.0.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
        }
    }

    #[derive(Default)]
    pub struct InMemoryMatchRepository(DashMap<MatchId, ScheduledMatch>);

    #[async_trait]
    impl MatchRepository for InMemoryMatchRepository {
        async fn put(&self, id: MatchId, record: ScheduledMatch) {
            self.0.insert(id, record);
        }
        async fn get(&self, id: &MatchId) -> Option<ScheduledMatch> {
            self.0.get(id).map(|e| e.clone())
        }
    }

    #[derive(Default)]
    pub struct InMemoryResultRepository(DashMap<MatchId, Mutex<Vec<MatchResultReport>>>);

    #[async_trait]
    impl ResultRepository for InMemoryResultRepository {
        async fn put(&self, report: MatchResultReport) {
            let match_id = MatchId::new(report.match_id.clone());
            self.0
                .entry(match_id)
                .or_insert_with(|| Mutex::new(Vec::new()))
                .lock()
                .unwrap()
                .push(report);
        }
        async fn get(&self, match_id: &MatchId) -> Vec<MatchResultReport> {
            self.0
                .get(match_id)
                .map(|e| e.lock().unwrap().clone())
                .unwrap_or_default()
        }
    }

    #[derive(Default)]
    pub struct InMemoryStandingsRepository(DashMap<String, Vec<StandingsEntry>>);

    #[async_trait]
    impl StandingsRepository for InMemoryStandingsRepository {
        async fn put(&self, round_id: String, standings: Vec<StandingsEntry>) {
            self.0.insert(round_id, standings);
        }
        async fn get(&self, round_id: &str) -> Option<Vec<StandingsEntry>> {
            self.0.get(round_id).map(|e| e.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::in_memory::*;
    use super::*;

    #[tokio::test]
    async fn player_repository_round_trips() {
        let repo = InMemoryPlayerRepository::default();
        let id = PlayerId::new("p1");
        repo.put(
            id.clone(),
            PlayerRecord {
                display_name: "Alice".into(),
                endpoint: "http://localhost:8101".into(),
                supported_game_types: vec!["parity".into()],
                auth_token: "tok".into(),
                status: PeerStatus::Active,
                wins: 0,
                losses: 0,
                draws: 0,
                points: 0,
                matches_played: 0,
            },
        )
        .await;
        let fetched = repo.get(&id).await.unwrap();
        assert_eq!(fetched.display_name, "Alice");
        assert_eq!(repo.list().await.len(), 1);
    }

    #[tokio::test]
    async fn result_repository_is_append_only() {
        let repo = InMemoryResultRepository::default();
        let report = MatchResultReport {
            match_id: "R1M1".into(),
            round_id: "R1".into(),
            winner_id: Some("p1".into()),
            score_a: 3,
            score_b: 1,
            history: vec![],
            forfeit_reason: None,
        };
        repo.put(report.clone()).await;
        repo.put(report.clone()).await;
        assert_eq!(repo.get(&MatchId::new("R1M1")).await.len(), 2);
    }
}
