//! Wall-clock and turn-count ceilings.

use std::time::{Duration, Instant};

/// Which ceiling halted the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    Time,
    Turns,
}

impl BudgetExceeded {
    /// Failure reason reported to the caller.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Time => "time budget exceeded",
            Self::Turns => "max turns exceeded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetGuard {
    started: Instant,
    time_limit: Duration,
    max_turns: u32,
}

impl BudgetGuard {
    /// Start the clock now.
    pub fn start(time_limit: Duration, max_turns: u32) -> Self {
        Self {
            started: Instant::now(),
            time_limit,
            max_turns,
        }
    }

    pub fn from_minutes(minutes: u64, max_turns: u32) -> Self {
        Self::start(Duration::from_secs(minutes.saturating_mul(60)), max_turns)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Check both ceilings before starting turn `next_turn` (1-based).
    ///
    /// Time is checked first. A zero time limit trips immediately.
    pub fn check(&self, next_turn: u32) -> Option<BudgetExceeded> {
        if self.elapsed() >= self.time_limit {
            return Some(BudgetExceeded::Time);
        }
        if next_turn > self.max_turns {
            return Some(BudgetExceeded::Turns);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_minutes_trips_on_first_check() {
        let guard = BudgetGuard::from_minutes(0, 30);
        assert_eq!(guard.check(1), Some(BudgetExceeded::Time));
    }

    #[test]
    fn turn_ceiling() {
        let guard = BudgetGuard::from_minutes(45, 2);
        assert_eq!(guard.check(1), None);
        assert_eq!(guard.check(2), None);
        assert_eq!(guard.check(3), Some(BudgetExceeded::Turns));
    }

    #[test]
    fn time_is_checked_before_turns() {
        let guard = BudgetGuard::start(Duration::ZERO, 0);
        assert_eq!(guard.check(1), Some(BudgetExceeded::Time));
    }

    #[test]
    fn reasons() {
        assert_eq!(BudgetExceeded::Time.reason(), "time budget exceeded");
        assert_eq!(BudgetExceeded::Turns.reason(), "max turns exceeded");
    }
}
