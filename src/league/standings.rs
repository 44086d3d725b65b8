//! Standings computation with a fixed, total tiebreak chain: points,
//! head-to-head, game-round differential, then PlayerID.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::league::identity::PlayerId;

/// The inputs standings computation needs from one completed, non-BYE
/// Match. `winner = None` means a draw (parity games never draw, but the
/// interface admits it for other `GameRules` implementations).
#[derive(Debug, Clone)]
pub struct CompletedMatch {
    pub player_a: PlayerId,
    pub player_b: PlayerId,
    pub winner: Option<PlayerId>,
    pub score_a: u32,
    pub score_b: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingsEntry {
    pub player_id: PlayerId,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub points: i64,
    /// Sum of (own game-round wins − opponent game-round wins) across every
    /// match the player has completed; the secondary numeric tiebreak.
    pub game_round_diff: i64,
}

/// Computes standings for `player_ids` from `matches`, applying points
/// `points_win`/`points_draw` (loss is always 0) and sorting by the full
/// tiebreak chain.
pub fn compute_standings(
    player_ids: &[PlayerId],
    matches: &[CompletedMatch],
    points_win: i64,
    points_draw: i64,
) -> Vec<StandingsEntry> {
    let mut stats: HashMap<PlayerId, StandingsEntry> = player_ids
        .iter()
        .cloned()
        .map(|id| {
            (
                id.clone(),
                StandingsEntry {
                    player_id: id,
                    wins: 0,
                    losses: 0,
                    draws: 0,
                    points: 0,
                    game_round_diff: 0,
                },
            )
        })
        .collect();

    // (winner, loser) -> true, used only to answer "did x beat y" queries.
    let mut beat: HashMap<(PlayerId, PlayerId), bool> = HashMap::new();

    for m in matches {
        if let Some(entry) = stats.get_mut(&m.player_a) {
            entry.game_round_diff += m.score_a as i64 - m.score_b as i64;
        }
        if let Some(entry) = stats.get_mut(&m.player_b) {
            entry.game_round_diff += m.score_b as i64 - m.score_a as i64;
        }

        match &m.winner {
            Some(winner) if winner == &m.player_a => {
                bump(&mut stats, &m.player_a, points_win, Outcome::Win);
                bump(&mut stats, &m.player_b, 0, Outcome::Loss);
                beat.insert((m.player_a.clone(), m.player_b.clone()), true);
            }
            Some(winner) if winner == &m.player_b => {
                bump(&mut stats, &m.player_b, points_win, Outcome::Win);
                bump(&mut stats, &m.player_a, 0, Outcome::Loss);
                beat.insert((m.player_b.clone(), m.player_a.clone()), true);
            }
            _ => {
                bump(&mut stats, &m.player_a, points_draw, Outcome::Draw);
                bump(&mut stats, &m.player_b, points_draw, Outcome::Draw);
            }
        }
    }

    let mut list: Vec<StandingsEntry> = stats.into_values().collect();
    list.sort_by(|a, b| compare(a, b, &beat));
    list
}

enum Outcome {
    Win,
    Loss,
    Draw,
}

fn bump(stats: &mut HashMap<PlayerId, StandingsEntry>, player: &PlayerId, points: i64, outcome: Outcome) {
    if let Some(entry) = stats.get_mut(player) {
        entry.points += points;
        match outcome {
            Outcome::Win => entry.wins += 1,
            Outcome::Loss => entry.losses += 1,
            Outcome::Draw => entry.draws += 1,
        }
    }
}

fn compare(a: &StandingsEntry, b: &StandingsEntry, beat: &HashMap<(PlayerId, PlayerId), bool>) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| head_to_head(a, b, beat))
        .then_with(|| b.game_round_diff.cmp(&a.game_round_diff))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

fn head_to_head(a: &StandingsEntry, b: &StandingsEntry, beat: &HashMap<(PlayerId, PlayerId), bool>) -> Ordering {
    if beat.contains_key(&(a.player_id.clone(), b.player_id.clone())) {
        Ordering::Less
    } else if beat.contains_key(&(b.player_id.clone(), a.player_id.clone())) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}
