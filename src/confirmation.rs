//! Activity-change confirmation state machine
//!
//! When the classifier keeps suggesting a different activity than the
//! active one, and the windowed average BPM agrees, the user is asked to
//! confirm the change within a fixed countdown. The machine always comes
//! back to `Idle`: on confirm, on reject, or when the countdown runs out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::ClassificationResult;
use crate::profiles::ThresholdTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    PendingEvidence,
    AwaitingConfirmation,
}

/// An open confirmation prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationSession {
    pub id: Uuid,
    pub suggested_profile: String,
    pub remaining_seconds: u32,
    pub opened_at: DateTime<Utc>,
}

/// Observable change produced by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Opened(ConfirmationSession),
    Tick { session_id: Uuid, remaining_seconds: u32 },
    Confirmed { session_id: Uuid, profile: String },
    Rejected { session_id: Uuid, profile: String },
    Escalated { session_id: Uuid, profile: String },
}

#[derive(Debug)]
enum State {
    Idle,
    PendingEvidence { window: VecDeque<f64> },
    Awaiting(ConfirmationSession),
}

#[derive(Debug)]
pub struct ConfirmationMachine {
    state: State,
    window_size: usize,
    countdown_secs: u32,
}

impl ConfirmationMachine {
    pub fn new(window_size: usize, countdown_secs: u32) -> Self {
        Self {
            state: State::Idle,
            window_size: window_size.max(1),
            countdown_secs: countdown_secs.max(1),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::PendingEvidence { .. } => Phase::PendingEvidence,
            State::Awaiting(_) => Phase::AwaitingConfirmation,
        }
    }

    pub fn session(&self) -> Option<&ConfirmationSession> {
        match &self.state {
            State::Awaiting(session) => Some(session),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn evidence_len(&self) -> usize {
        match &self.state {
            State::PendingEvidence { window } => window.len(),
            _ => 0,
        }
    }

    /// Feed one classified sample.
    ///
    /// Samples arriving while a prompt is open do not touch the countdown.
    pub fn observe(
        &mut self,
        result: &ClassificationResult,
        bpm: Option<f64>,
        table: &ThresholdTable,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let mut window = match std::mem::replace(&mut self.state, State::Idle) {
            State::Awaiting(session) => {
                self.state = State::Awaiting(session);
                return None;
            }
            State::Idle => VecDeque::with_capacity(self.window_size),
            State::PendingEvidence { window } => window,
        };

        let bpm = match bpm {
            Some(bpm) if result.is_profile_mismatch => bpm,
            _ => {
                if !window.is_empty() {
                    debug!("Profile mismatch cleared, dropping evidence window");
                }
                return None;
            }
        };

        window.push_back(bpm);
        while window.len() > self.window_size {
            window.pop_front();
        }

        if window.len() < self.window_size {
            self.state = State::PendingEvidence { window };
            return None;
        }

        let average = window.iter().sum::<f64>() / window.len() as f64;
        if table.suggest(Some(average)) != result.suggested_profile {
            debug!(
                average,
                suggested = %result.suggested_profile,
                "Windowed average does not support the suggestion yet"
            );
            self.state = State::PendingEvidence { window };
            return None;
        }

        let session = ConfirmationSession {
            id: Uuid::new_v4(),
            suggested_profile: result.suggested_profile.clone(),
            remaining_seconds: self.countdown_secs,
            opened_at: now,
        };
        info!(
            session_id = %session.id,
            suggested = %session.suggested_profile,
            average,
            "Opening activity-change confirmation"
        );
        self.state = State::Awaiting(session.clone());
        Some(Transition::Opened(session))
    }

    /// One countdown second elapsed for `session_id`.
    pub fn tick(&mut self, session_id: Uuid) -> Option<Transition> {
        let session = match &mut self.state {
            State::Awaiting(session) if session.id == session_id => session,
            _ => {
                debug!(session_id = %session_id, "Discarding tick for a closed confirmation");
                return None;
            }
        };

        session.remaining_seconds = session.remaining_seconds.saturating_sub(1);
        if session.remaining_seconds > 0 {
            return Some(Transition::Tick {
                session_id,
                remaining_seconds: session.remaining_seconds,
            });
        }

        let profile = session.suggested_profile.clone();
        warn!(session_id = %session_id, suggested = %profile, "Confirmation timed out, escalating");
        self.state = State::Idle;
        Some(Transition::Escalated { session_id, profile })
    }

    pub fn confirm(&mut self) -> Option<Transition> {
        let session = self.take_session()?;
        info!(session_id = %session.id, profile = %session.suggested_profile, "Activity change confirmed");
        Some(Transition::Confirmed {
            session_id: session.id,
            profile: session.suggested_profile,
        })
    }

    pub fn reject(&mut self) -> Option<Transition> {
        let session = self.take_session()?;
        warn!(session_id = %session.id, profile = %session.suggested_profile, "Activity change rejected by user");
        Some(Transition::Rejected {
            session_id: session.id,
            profile: session.suggested_profile,
        })
    }

    /// Drop accumulated evidence; an open prompt keeps counting.
    pub fn clear_evidence(&mut self) {
        if matches!(self.state, State::PendingEvidence { .. }) {
            self.state = State::Idle;
        }
    }

    /// Abandon everything, used on teardown.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    fn take_session(&mut self) -> Option<ConfirmationSession> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Awaiting(session) => Some(session),
            other => {
                self.state = other;
                None
            }
        }
    }
}
