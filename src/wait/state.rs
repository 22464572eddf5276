use serde::Serialize;

/// Seconds an agent waits for a generated tour before the wait is declared timed out.
pub const DEFAULT_BUDGET_SECS: u32 = 180;

/// At or below this many remaining seconds the wait reports the generating stage.
const GENERATING_THRESHOLD_SECS: u32 = 100;

/// Answer from the job-status collaborator for one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready { slug: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// No token was supplied, nothing was started.
    Idle,
    Waiting,
    Ready {
        #[serde(rename = "result_slug")]
        slug: String,
    },
    TimedOut,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready { .. } | Phase::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Waiting => "waiting",
            Phase::Ready { .. } => "ready",
            Phase::TimedOut => "timed_out",
        }
    }
}

/// Headline shown while waiting: the first stretch of the budget is spent
/// analyzing the request, the rest generating the tour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStage {
    Analyzing,
    Generating,
}

/// Countdown and phase of one job wait.
///
/// All transitions go through [`WaitState::tick`] and
/// [`WaitState::apply_status`]; both are no-ops once the phase left
/// `Waiting`, so a terminal phase can never be overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitState {
    budget: u32,
    remaining: u32,
    phase: Phase,
}

impl WaitState {
    pub fn idle(budget: u32) -> Self {
        Self {
            budget,
            remaining: budget,
            phase: Phase::Idle,
        }
    }

    pub fn waiting(budget: u32) -> Self {
        Self {
            budget,
            remaining: budget,
            phase: Phase::Waiting,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_waiting(&self) -> bool {
        self.phase == Phase::Waiting
    }

    pub fn result_slug(&self) -> Option<&str> {
        match &self.phase {
            Phase::Ready { slug } => Some(slug),
            _ => None,
        }
    }

    /// True when the next tick would exhaust the budget.
    pub fn is_final_tick(&self) -> bool {
        self.is_waiting() && self.remaining <= 1
    }

    /// Counts one second down. Returns `true` when this tick timed the wait out.
    pub fn tick(&mut self) -> bool {
        if !self.is_waiting() {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.phase = Phase::TimedOut;
            return true;
        }
        false
    }

    /// Applies a status answer. Returns `true` when it made the wait ready.
    pub fn apply_status(&mut self, status: &JobStatus) -> bool {
        if !self.is_waiting() {
            return false;
        }
        match status {
            JobStatus::Pending => false,
            JobStatus::Ready { slug } => {
                self.phase = Phase::Ready { slug: slug.clone() };
                true
            }
        }
    }

    pub fn clock(&self) -> String {
        format_clock(self.remaining)
    }

    /// Fraction of the budget still left, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.budget == 0 {
            return 0.0;
        }
        f64::from(self.remaining) / f64::from(self.budget)
    }

    pub fn stage(&self) -> Option<WaitStage> {
        if !self.is_waiting() {
            return None;
        }
        if self.remaining <= GENERATING_THRESHOLD_SECS {
            Some(WaitStage::Generating)
        } else {
            Some(WaitStage::Analyzing)
        }
    }
}

/// Formats seconds as `M:SS`.
pub fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(slug: &str) -> JobStatus {
        JobStatus::Ready {
            slug: slug.to_string(),
        }
    }

    #[test]
    fn clock_formats_minutes_and_padded_seconds() {
        assert_eq!(format_clock(180), "3:00");
        assert_eq!(format_clock(179), "2:59");
        assert_eq!(format_clock(65), "1:05");
        assert_eq!(format_clock(9), "0:09");
        assert_eq!(format_clock(0), "0:00");
    }

    #[test]
    fn countdown_decrements_by_one_until_timeout() {
        let mut state = WaitState::waiting(DEFAULT_BUDGET_SECS);
        for expected in (1..DEFAULT_BUDGET_SECS).rev() {
            assert!(!state.tick());
            assert_eq!(state.remaining(), expected);
            assert!(state.is_waiting());
        }
        assert!(state.is_final_tick());
        assert!(state.tick());
        assert_eq!(state.remaining(), 0);
        assert_eq!(state.phase(), &Phase::TimedOut);

        assert!(!state.tick());
        assert_eq!(state.remaining(), 0);
    }

    #[test]
    fn ready_before_budget_runs_out_stops_the_countdown() {
        let mut state = WaitState::waiting(DEFAULT_BUDGET_SECS);
        for _ in 0..12 {
            state.tick();
        }
        assert!(!state.apply_status(&JobStatus::Pending));
        assert!(state.apply_status(&ready("paris-adventure")));
        assert_eq!(state.result_slug(), Some("paris-adventure"));

        assert!(!state.tick());
        assert_eq!(state.remaining(), 168);
        assert_eq!(state.stage(), None);
    }

    #[test]
    fn ready_after_timeout_is_ignored() {
        let mut state = WaitState::waiting(2);
        state.tick();
        state.tick();
        assert_eq!(state.phase(), &Phase::TimedOut);

        assert!(!state.apply_status(&ready("late")));
        assert_eq!(state.phase(), &Phase::TimedOut);
        assert_eq!(state.result_slug(), None);
    }

    #[test]
    fn second_ready_does_not_replace_the_first() {
        let mut state = WaitState::waiting(10);
        assert!(state.apply_status(&ready("first")));
        assert!(!state.apply_status(&ready("second")));
        assert_eq!(state.result_slug(), Some("first"));
    }

    #[test]
    fn idle_state_ignores_ticks_and_answers() {
        let mut state = WaitState::idle(DEFAULT_BUDGET_SECS);
        assert!(!state.tick());
        assert!(!state.apply_status(&ready("x")));
        assert_eq!(state.phase(), &Phase::Idle);
        assert_eq!(state.remaining(), DEFAULT_BUDGET_SECS);
    }

    #[test]
    fn progress_and_stage_follow_remaining_time() {
        let mut state = WaitState::waiting(DEFAULT_BUDGET_SECS);
        assert_eq!(state.progress(), 1.0);
        assert_eq!(state.stage(), Some(WaitStage::Analyzing));

        for _ in 0..80 {
            state.tick();
        }
        assert_eq!(state.remaining(), 100);
        assert_eq!(state.stage(), Some(WaitStage::Generating));
        assert!((state.progress() - 100.0 / 180.0).abs() < f64::EPSILON);
    }

    #[test]
    fn phase_serializes_with_result_slug() {
        let value = serde_json::to_value(Phase::Ready {
            slug: "rome".into(),
        })
        .unwrap();
        assert_eq!(value["phase"], "ready");
        assert_eq!(value["result_slug"], "rome");
        let value = serde_json::to_value(Phase::TimedOut).unwrap();
        assert_eq!(value["phase"], "timed_out");
    }
}
