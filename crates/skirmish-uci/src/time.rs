//! Clock parameters to a single search budget.
//!
//! The core search knows nothing about wall clocks; it only honors the
//! stop flag. This module decides how long a `go` may run, and the engine
//! arms a timer thread that raises the flag when the budget expires.

use std::time::Duration;

use cozy_chess::Color;

use crate::command::GoParams;

/// Minimum budget handed to the timer, so a nearly flagged clock still
/// gets one depth-1 iteration.
const MIN_BUDGET: Duration = Duration::from_millis(1);

/// Reserve subtracted from the remaining clock for I/O overhead.
const OVERHEAD: Duration = Duration::from_millis(10);

/// Compute the wall-clock budget for this `go`, or `None` for an
/// unlimited search (`go infinite`, bare `go`, depth-only).
pub fn time_budget(params: &GoParams, side: Color) -> Option<Duration> {
    if params.infinite {
        return None;
    }

    if let Some(movetime) = params.movetime {
        return Some(movetime.max(MIN_BUDGET));
    }

    let (remaining, increment) = match side {
        Color::White => (params.wtime, params.winc),
        Color::Black => (params.btime, params.binc),
    };
    let remaining = remaining?;
    let increment = increment.unwrap_or(Duration::ZERO);

    let usable = remaining.saturating_sub(OVERHEAD);
    let moves_to_go = params.movestogo.unwrap_or(30).max(1);
    let budget = usable / moves_to_go + increment * 3 / 4;

    // Never commit more than half the clock to a single move.
    Some(budget.min(usable / 2).max(MIN_BUDGET))
}
