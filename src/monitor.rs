//! Per-user monitor
//!
//! Single-threaded reducer owning every state machine of one user's
//! session: the sample normalizer's hold-over state, the staleness monitor,
//! the activity-change confirmation machine, the active profile and the
//! alert history. Each external stimulus is an [`Event`]; handling it
//! mutates state and returns the [`Effect`]s the owner must carry out
//! (arming timers, raising notifications, persisting history).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::classify;
use crate::config::MonitorSettings;
use crate::confirmation::{ConfirmationMachine, ConfirmationSession, Phase, Transition};
use crate::history::{AlertHistory, HistoryPage, HistoryPager};
use crate::models::{
    AlertRecord, ClassificationResult, DisplayStatus, Notification, NotificationKind, Sample,
    Severity,
};
use crate::normalizer::{self, IngestError, RawReading};
use crate::profiles::{ActivityProfile, ProfileError, ThresholdTable};
use crate::staleness::{self, FeedState, StalenessMonitor};

/// Recent notifications kept for the display
const NOTIFICATION_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SampleReceived(RawReading),
    StalenessTimeout { generation: u64 },
    CountdownTick { session_id: Uuid },
    RefreshTick,
    Confirm,
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// (Re)arm the staleness timer for this generation
    ArmStaleness { generation: u64 },
    /// Start the one-second countdown for a confirmation prompt
    StartCountdown { session_id: Uuid },
    CancelCountdown,
    Notify(Notification),
    PersistHistory,
}

/// Everything the display boundary needs, computed in one pass
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub user_id: String,
    pub current_sample: Sample,
    pub active_profile: ActivityProfile,
    pub display_status: DisplayStatus,
    pub feed_state: FeedState,
    pub confirmation_phase: Phase,
    pub confirmation: Option<ConfirmationSession>,
    pub classification: Option<ClassificationResult>,
    pub notifications: Vec<Notification>,
    pub history_len: usize,
    pub generated_at: DateTime<Utc>,
}

pub struct Monitor {
    user_id: String,
    table: Arc<ThresholdTable>,
    settings: MonitorSettings,
    /// Hold-over source for the normalizer
    previous: Sample,
    /// What the display shows; decays toward zero while stale
    display: Sample,
    classification: Option<ClassificationResult>,
    staleness: StalenessMonitor,
    confirmation: ConfirmationMachine,
    active_profile: String,
    history: AlertHistory,
    /// Hard alert or device check, held until a warning-free sample
    latched: Option<DisplayStatus>,
    notifications: VecDeque<Notification>,
    next_notification_seq: u64,
    dirty: bool,
}

impl Monitor {
    /// Build a monitor from the user's restored history.
    ///
    /// The active profile resumes from the newest record; a label the
    /// table no longer knows degrades to resting.
    pub fn new(
        user_id: &str,
        table: Arc<ThresholdTable>,
        settings: MonitorSettings,
        restored: Vec<AlertRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut monitor = Self {
            user_id: user_id.to_string(),
            confirmation: ConfirmationMachine::new(settings.evidence_window, settings.countdown_secs),
            history: AlertHistory::new(settings.history_capacity, settings.record_normal),
            active_profile: table.resting().name.clone(),
            table,
            settings,
            previous: Sample::empty(now),
            display: Sample::empty(now),
            classification: None,
            staleness: StalenessMonitor::new(),
            latched: None,
            notifications: VecDeque::with_capacity(NOTIFICATION_LIMIT),
            next_notification_seq: 1,
            dirty: false,
        };
        monitor.restore(restored);
        monitor
    }

    /// Replace the history with persisted records and resume the profile
    /// of the newest one.
    pub fn restore(&mut self, records: Vec<AlertRecord>) {
        self.history = AlertHistory::restore(
            records,
            self.settings.history_capacity,
            self.settings.record_normal,
        );
        self.active_profile = self
            .history
            .records()
            .last()
            .map(|r| self.table.lookup_or_default(&r.profile).name.clone())
            .unwrap_or_else(|| self.table.resting().name.clone());
        self.dirty = false;

        info!(
            user_id = %self.user_id,
            restored = self.history.len(),
            profile = %self.active_profile,
            "Monitor history restored"
        );
    }

    /// Empty the alert history and persist the empty log right away.
    pub fn clear_history(&mut self) -> Vec<Effect> {
        if self.history.is_empty() {
            return Vec::new();
        }
        let removed = self.history.clear();
        info!(user_id = %self.user_id, removed, "Alert history cleared by user");
        self.dirty = false;
        vec![Effect::PersistHistory]
    }

    /// Effects to run when the session starts: arm the first silence timer.
    pub fn start(&self) -> Vec<Effect> {
        vec![Effect::ArmStaleness {
            generation: self.staleness.generation(),
        }]
    }

    /// Effects to run on teardown. Any prompt is abandoned.
    pub fn stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.confirmation.phase() == Phase::AwaitingConfirmation {
            effects.push(Effect::CancelCountdown);
        }
        self.confirmation.reset();
        effects.push(Effect::PersistHistory);
        self.dirty = false;
        effects
    }

    /// Schema-check a wire message and feed it in. A malformed message is
    /// dropped and leaves every piece of state untouched.
    pub fn ingest(&mut self, body: &[u8], now: DateTime<Utc>) -> Result<Vec<Effect>, IngestError> {
        match RawReading::parse(body) {
            Ok(raw) => Ok(self.handle(Event::SampleReceived(raw), now)),
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Dropping malformed sensor message");
                Err(e)
            }
        }
    }

    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            Event::SampleReceived(raw) => self.on_sample(raw, now),
            Event::StalenessTimeout { generation } => self.on_staleness_timeout(generation, now),
            Event::CountdownTick { session_id } => self.on_countdown_tick(session_id, now),
            Event::RefreshTick => self.on_refresh(now),
            Event::Confirm => self.on_confirm(now),
            Event::Reject => self.on_reject(now),
        }
    }

    /// Manual profile selection. Closes any open prompt.
    pub fn select_profile(&mut self, name: &str, now: DateTime<Utc>) -> Result<Vec<Effect>, ProfileError> {
        let profile = self.table.lookup(name)?.name.clone();
        let mut effects = Vec::new();

        if self.confirmation.phase() == Phase::AwaitingConfirmation {
            effects.push(Effect::CancelCountdown);
        }
        self.confirmation.reset();

        info!(user_id = %self.user_id, from = %self.active_profile, to = %profile, "Activity profile selected");
        self.active_profile = profile.clone();
        self.reclassify_display();
        effects.push(self.notify(
            NotificationKind::ProfileChanged,
            format!("Activity profile set to {}", profile),
            now,
        ));
        Ok(effects)
    }

    fn on_sample(&mut self, raw: RawReading, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();

        // Reset the silence timer before the sample is classified
        let generation = self.staleness.accept();
        effects.push(Effect::ArmStaleness { generation });

        let sample = normalizer::normalize(&raw, &self.previous, now);
        self.previous = sample.clone();
        self.display = sample.clone();

        let profile = self.table.lookup_or_default(&self.active_profile).clone();
        let result = classify(&sample, &profile, &self.table);

        if result.is_alert() {
            let changed = self
                .classification
                .as_ref()
                .map_or(true, |previous| previous.warnings != result.warnings);
            if changed {
                let labels: Vec<&str> = result.warnings.iter().map(|w| w.label()).collect();
                effects.push(self.notify(
                    NotificationKind::ThresholdWarning,
                    format!("Threshold warning under {}: {}", profile.name, labels.join(", ")),
                    now,
                ));
            }
        } else {
            self.latched = None;
        }

        if let Some(Transition::Opened(session)) =
            self.confirmation.observe(&result, sample.bpm, &self.table, now)
        {
            effects.push(Effect::StartCountdown {
                session_id: session.id,
            });
            effects.push(self.notify(
                NotificationKind::ConfirmationRequested,
                format!("Are you doing {}? Please confirm within {}s", session.suggested_profile, session.remaining_seconds),
                now,
            ));
        }

        if self
            .history
            .append(AlertRecord::classified(sample, result.clone(), &profile.name))
        {
            self.dirty = true;
        }
        self.classification = Some(result);

        effects
    }

    fn on_staleness_timeout(&mut self, generation: u64, now: DateTime<Utc>) -> Vec<Effect> {
        if !self.staleness.timeout(generation) {
            return Vec::new();
        }

        self.previous = Sample::empty(now);
        self.display = staleness::decay(&self.display, self.settings.decay_factor, now);
        self.classification = None;
        self.confirmation.clear_evidence();

        if self
            .history
            .append(AlertRecord::no_data(now, &self.active_profile))
        {
            self.dirty = true;
        }

        vec![self.notify(NotificationKind::NoSensorData, "No sensor data", now)]
    }

    fn on_countdown_tick(&mut self, session_id: Uuid, now: DateTime<Utc>) -> Vec<Effect> {
        match self.confirmation.tick(session_id) {
            Some(Transition::Escalated { profile, .. }) => {
                let text = format!(
                    "No response to the {} prompt: readings out of range for {}",
                    profile, self.active_profile
                );
                self.latched = Some(DisplayStatus::new(text.clone(), Severity::Critical));
                vec![
                    Effect::CancelCountdown,
                    self.notify(NotificationKind::HardAlert, text, now),
                ]
            }
            Some(Transition::Tick { remaining_seconds, .. }) => {
                debug!(user_id = %self.user_id, remaining_seconds, "Confirmation countdown");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_confirm(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(Transition::Confirmed { profile, .. }) = self.confirmation.confirm() else {
            debug!(user_id = %self.user_id, "Confirm without an open prompt");
            return Vec::new();
        };

        self.active_profile = self.table.lookup_or_default(&profile).name.clone();
        self.latched = None;
        self.reclassify_display();

        vec![
            Effect::CancelCountdown,
            self.notify(
                NotificationKind::ProfileChanged,
                format!("Activity profile changed to {}", self.active_profile),
                now,
            ),
        ]
    }

    fn on_reject(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(Transition::Rejected { profile, .. }) = self.confirmation.reject() else {
            debug!(user_id = %self.user_id, "Reject without an open prompt");
            return Vec::new();
        };

        let text = format!(
            "Readings suggested {} but were rejected: check the sensor placement",
            profile
        );
        self.latched = Some(DisplayStatus::new(text.clone(), Severity::DeviceError));

        vec![
            Effect::CancelCountdown,
            self.notify(NotificationKind::DeviceCheck, text, now),
        ]
    }

    fn on_refresh(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.staleness.is_stale() && !self.display.is_empty() {
            self.display = staleness::decay(&self.display, self.settings.decay_factor, now);
        }

        if self.dirty {
            self.dirty = false;
            vec![Effect::PersistHistory]
        } else {
            Vec::new()
        }
    }

    fn reclassify_display(&mut self) {
        if self.staleness.is_stale() {
            return;
        }
        let profile = self.table.lookup_or_default(&self.active_profile).clone();
        self.classification = self
            .classification
            .as_ref()
            .map(|_| classify(&self.display, &profile, &self.table));
    }

    fn notify(&mut self, kind: NotificationKind, message: impl Into<String>, now: DateTime<Utc>) -> Effect {
        let notification = Notification::new(self.next_notification_seq, kind, message, now);
        self.next_notification_seq += 1;
        match kind.severity() {
            Severity::Critical | Severity::DeviceError => {
                warn!(user_id = %self.user_id, kind = ?kind, message = %notification.message, "Notification raised")
            }
            _ => info!(user_id = %self.user_id, kind = ?kind, message = %notification.message, "Notification raised"),
        }

        if self.notifications.len() >= NOTIFICATION_LIMIT {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification.clone());
        Effect::Notify(notification)
    }

    pub fn display_status(&self) -> DisplayStatus {
        if let Some(session) = self.confirmation.session() {
            return DisplayStatus::new(
                format!(
                    "Confirm activity: {}? ({}s)",
                    session.suggested_profile, session.remaining_seconds
                ),
                Severity::Warning,
            );
        }

        if self.staleness.is_stale() {
            return DisplayStatus::new("No sensor data", Severity::NoData);
        }

        if let Some(latched) = &self.latched {
            return latched.clone();
        }

        match &self.classification {
            Some(result) if result.is_alert() => {
                let labels: Vec<&str> = result.warnings.iter().map(|w| w.label()).collect();
                DisplayStatus::new(format!("Alert: {}", labels.join(", ")), Severity::Warning)
            }
            _ => DisplayStatus::new(format!("Normal ({})", self.active_profile), Severity::Normal),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            user_id: self.user_id.clone(),
            current_sample: self.display.clone(),
            active_profile: self.active_profile().clone(),
            display_status: self.display_status(),
            feed_state: self.staleness.state(),
            confirmation_phase: self.confirmation.phase(),
            confirmation: self.confirmation.session().cloned(),
            classification: self.classification.clone(),
            notifications: self.notifications.iter().cloned().collect(),
            history_len: self.history.len(),
            generated_at: now,
        }
    }

    pub fn history_page(&self, pager: &HistoryPager) -> HistoryPage {
        pager.view(&self.history)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn active_profile(&self) -> &ActivityProfile {
        self.table.lookup_or_default(&self.active_profile)
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }
}

#[cfg(test)]
impl Monitor {
    pub fn current_sample(&self) -> &Sample {
        &self.display
    }

    pub fn feed_state(&self) -> FeedState {
        self.staleness.state()
    }

    pub fn phase(&self) -> Phase {
        self.confirmation.phase()
    }

    pub fn confirmation(&self) -> Option<&ConfirmationSession> {
        self.confirmation.session()
    }

    pub fn classification(&self) -> Option<&ClassificationResult> {
        self.classification.as_ref()
    }
}
