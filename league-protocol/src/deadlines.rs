//! Default per-message deadlines.

use std::time::Duration;

pub const REGISTRATION: Duration = Duration::from_secs(10);
pub const INVITE_ACK: Duration = Duration::from_secs(5);
pub const MOVE_RESPONSE: Duration = Duration::from_secs(30);
pub const GAME_OVER: Duration = Duration::from_secs(5);
pub const RESULT_REPORT: Duration = Duration::from_secs(10);
pub const MATCH_ASSIGN: Duration = Duration::from_secs(10);

/// Grace window added to a move deadline before the referee gives up
/// waiting and substitutes a default move.
pub const MOVE_GRACE: Duration = Duration::from_millis(500);

/// How long before a Strategy's own deadline the player agent cancels it
/// and falls back to the GameRules default move.
pub const STRATEGY_CANCEL_MARGIN: Duration = Duration::from_millis(250);

/// Multiplier applied to a match's own timeout budget to get the
/// watchdog window the League Manager waits before treating a Match as
/// stalled (referee crash or lost connectivity mid-match).
pub const WATCHDOG_MULTIPLIER: u32 = 5;

/// The timeout budget one Match is expected to consume end-to-end under
/// normal operation: one invite round trip per side, `best_of_k` move
/// exchanges (each with its grace window), and a result report. The
/// watchdog window is `WATCHDOG_MULTIPLIER` times this.
pub fn match_timeout_budget(best_of_k: u32) -> Duration {
    MATCH_ASSIGN
        + INVITE_ACK
        + (MOVE_RESPONSE + MOVE_GRACE) * best_of_k
        + RESULT_REPORT
}

pub fn match_watchdog(best_of_k: u32) -> Duration {
    match_timeout_budget(best_of_k) * WATCHDOG_MULTIPLIER
}
