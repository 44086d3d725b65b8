//! Round-robin match scheduler: `build_schedule`.
//!
//! Circle method: player 0's position never moves; every other position
//! rotates one slot clockwise each round. A pairing that includes the BYE
//! sentinel is emitted as an already-`COMPLETED` match with no winner.

use serde::{Deserialize, Serialize};

use crate::league::identity::{MatchId, PlayerId, RefereeId, RoundId};
use league_protocol::messages::RunningScore;

/// Match lifecycle state, mirrored between the Referee that owns it and
/// the League Manager's schedule view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    Scheduled,
    Invited,
    Accepted,
    InProgress,
    Completed,
    Forfeited,
    Abandoned,
}

/// One scheduled pairing. `player_b` is `None` for a BYE slot.
#[derive(Debug, Clone)]
pub struct ScheduledMatch {
    pub match_id: MatchId,
    pub round_id: RoundId,
    pub player_a: PlayerId,
    pub player_b: Option<PlayerId>,
    pub game_type: String,
    pub state: MatchState,
    pub assigned_referee: Option<RefereeId>,
    /// Set once this match has already been reassigned to a second
    /// referee after its first assignee missed the watchdog window. A
    /// second miss abandons the match rather than reassigning again.
    pub reassigned: bool,
    /// Populated immediately for BYE matches; filled in by the referee's
    /// result report for everything else.
    pub result: Option<MatchResult>,
}

impl ScheduledMatch {
    pub fn is_bye(&self) -> bool {
        self.player_b.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub winner: Option<PlayerId>,
    pub score: RunningScore,
}

#[derive(Debug, Clone)]
pub struct Round {
    pub round_id: RoundId,
    pub matches: Vec<ScheduledMatch>,
}

impl Round {
    /// A Round is complete once every non-BYE match in it has a result.
    pub fn is_complete(&self) -> bool {
        self.matches
            .iter()
            .all(|m| m.is_bye() || matches!(m.state, MatchState::Completed | MatchState::Abandoned))
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    pub rounds: Vec<Round>,
}

impl Schedule {
    pub fn match_count(&self) -> usize {
        self.rounds.iter().map(|r| r.matches.len()).sum()
    }

    pub fn non_bye_match_count(&self) -> usize {
        self.rounds
            .iter()
            .flat_map(|r| &r.matches)
            .filter(|m| !m.is_bye())
            .count()
    }

    pub fn find_match_mut(&mut self, match_id: &MatchId) -> Option<&mut ScheduledMatch> {
        self.rounds
            .iter_mut()
            .flat_map(|r| &mut r.matches)
            .find(|m| &m.match_id == match_id)
    }
}

/// Builds a round-robin [`Schedule`] over `player_ids` for `game_type`.
/// Deterministic: the same input always produces the same schedule, with
/// the same match ids and the same side assignment.
///
/// Returns `Err` for `N < 2` (the caller — `start_league` — maps this to
/// `INVALID_STATE`).
pub fn build_schedule(mut player_ids: Vec<PlayerId>, game_type: &str) -> Result<Schedule, String> {
    if player_ids.len() < 2 {
        return Err(format!(
            "cannot schedule a league with {} player(s); at least 2 required",
            player_ids.len()
        ));
    }

    player_ids.sort();

    let mut slots: Vec<Option<PlayerId>> = player_ids.into_iter().map(Some).collect();
    if slots.len() % 2 == 1 {
        slots.push(None);
    }
    let n = slots.len();
    let round_count = n - 1;

    let mut rounds = Vec::with_capacity(round_count);
    for round_index in 0..round_count {
        let round_id = RoundId::new(format!("R{}", round_index + 1));
        let mut matches = Vec::with_capacity(n / 2);

        for pair_index in 0..(n / 2) {
            let left = slots[pair_index].clone();
            let right = slots[n - 1 - pair_index].clone();
            let match_id = MatchId::new(format!("R{}M{}", round_index + 1, pair_index + 1));

            matches.push(make_match(match_id, round_id.clone(), left, right, game_type));
        }

        rounds.push(Round { round_id, matches });
        rotate(&mut slots);
    }

    Ok(Schedule { rounds })
}

fn make_match(
    match_id: MatchId,
    round_id: RoundId,
    left: Option<PlayerId>,
    right: Option<PlayerId>,
    game_type: &str,
) -> ScheduledMatch {
    match (left, right) {
        (Some(a), Some(b)) => {
            // Side assignment: lexicographically smaller PlayerID is A.
            let (player_a, player_b) = if a <= b { (a, b) } else { (b, a) };
            ScheduledMatch {
                match_id,
                round_id,
                player_a,
                player_b: Some(player_b),
                game_type: game_type.to_string(),
                state: MatchState::Scheduled,
                assigned_referee: None,
                reassigned: false,
                result: None,
            }
        }
        (Some(p), None) | (None, Some(p)) => ScheduledMatch {
            match_id,
            round_id,
            player_a: p,
            player_b: None,
            game_type: game_type.to_string(),
            state: MatchState::Completed,
            assigned_referee: None,
            reassigned: false,
            result: Some(MatchResult {
                winner: None,
                score: RunningScore { a: 0, b: 0 },
            }),
        },
        (None, None) => unreachable!("both pairing slots were BYE; scheduler bug"),
    }
}

/// Rotates every slot but position 0 one step clockwise: the last slot
/// becomes the new position 1, and everything else shifts up by one.
fn rotate(slots: &mut [Option<PlayerId>]) {
    let n = slots.len();
    if n <= 2 {
        return;
    }
    let last = slots[n - 1].clone();
    for i in (2..n).rev() {
        slots[i] = slots[i - 1].clone();
    }
    slots[1] = last;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players(n: usize) -> Vec<PlayerId> {
        (1..=n).map(|i| PlayerId::new(format!("p{i}"))).collect()
    }

    #[test]
    fn n_equals_2_is_one_round_one_match_no_byes() {
        let schedule = build_schedule(players(2), "parity").unwrap();
        assert_eq!(schedule.rounds.len(), 1);
        assert_eq!(schedule.rounds[0].matches.len(), 1);
        assert!(!schedule.rounds[0].matches[0].is_bye());
    }

    #[test]
    fn n_equals_3_is_three_rounds_each_with_one_match_and_one_bye() {
        let schedule = build_schedule(players(3), "parity").unwrap();
        assert_eq!(schedule.rounds.len(), 3);
        for round in &schedule.rounds {
            assert_eq!(round.matches.len(), 2);
            assert_eq!(round.matches.iter().filter(|m| m.is_bye()).count(), 1);
            assert_eq!(round.matches.iter().filter(|m| !m.is_bye()).count(), 1);
        }
    }

    #[test]
    fn n_equals_0_or_1_is_rejected() {
        assert!(build_schedule(vec![], "parity").is_err());
        assert!(build_schedule(players(1), "parity").is_err());
    }

    #[test]
    fn every_pair_meets_exactly_once_for_n_equals_4() {
        let schedule = build_schedule(players(4), "parity").unwrap();
        assert_eq!(schedule.rounds.len(), 3);
        assert_eq!(schedule.non_bye_match_count(), 6);
        assert_completeness(&schedule, 4);
        assert_disjointness(&schedule);
    }

    #[test]
    fn odd_player_count_inserts_one_bye_per_round() {
        let schedule = build_schedule(players(5), "parity").unwrap();
        assert_eq!(schedule.rounds.len(), 5);
        for round in &schedule.rounds {
            assert_eq!(round.matches.iter().filter(|m| m.is_bye()).count(), 1);
        }
        assert_completeness(&schedule, 5);
        assert_disjointness(&schedule);
    }

    #[test]
    fn match_ids_are_deterministic_and_one_indexed() {
        let schedule = build_schedule(players(4), "parity").unwrap();
        assert_eq!(schedule.rounds[0].matches[0].match_id, MatchId::new("R1M1"));
        assert_eq!(schedule.rounds[0].matches[1].match_id, MatchId::new("R1M2"));
        assert_eq!(schedule.rounds[1].matches[0].match_id, MatchId::new("R2M1"));
    }

    #[test]
    fn side_a_is_lexicographically_smaller() {
        let schedule = build_schedule(players(2), "parity").unwrap();
        let m = &schedule.rounds[0].matches[0];
        assert_eq!(m.player_a, PlayerId::new("p1"));
        assert_eq!(m.player_b, Some(PlayerId::new("p2")));
    }

    fn assert_completeness(schedule: &Schedule, n: usize) {
        let ids = players(n);
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let count = schedule
                    .rounds
                    .iter()
                    .flat_map(|r| &r.matches)
                    .filter(|m| {
                        !m.is_bye()
                            && ((m.player_a == ids[i] && m.player_b.as_ref() == Some(&ids[j]))
                                || (m.player_a == ids[j] && m.player_b.as_ref() == Some(&ids[i])))
                    })
                    .count();
                assert_eq!(count, 1, "pair ({i},{j}) met {count} times");
            }
        }
    }

    fn assert_disjointness(schedule: &Schedule) {
        for round in &schedule.rounds {
            let mut seen = std::collections::HashSet::new();
            for m in round.matches.iter().filter(|m| !m.is_bye()) {
                assert!(seen.insert(m.player_a.clone()));
                assert!(seen.insert(m.player_b.clone().unwrap()));
            }
        }
    }
}
