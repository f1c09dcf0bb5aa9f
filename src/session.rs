//! Monitor session actor
//!
//! One actix actor per monitored user. The actor owns the user's
//! [`Monitor`] and translates everything that can happen to it (inbound
//! samples, user actions, the staleness timeout, the countdown and the
//! refresh tick) into monitor events, processed one at a time in mailbox
//! order. Timers are kept as spawn handles and cancelled as soon as the
//! monitor no longer wants them.
//!
//! History is restored when the actor starts, off the registry lock. A
//! session started for a user whose previous session is still stopping
//! holds its mailbox until that session's final save has completed.

use actix::{
    Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Context, Handler, Message,
    MessageResult, SpawnHandle, WrapFuture,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::MonitorSettings;
use crate::history::{HistoryPage, HistoryPager};
use crate::monitor::{Effect, Event, Monitor, Snapshot};
use crate::normalizer::IngestError;
use crate::profiles::{ProfileError, ThresholdTable};
use crate::store::HistoryStore;

/// Countdown resolution of the confirmation prompt
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

pub struct MonitorSession {
    monitor: Monitor,
    settings: MonitorSettings,
    store: Arc<dyn HistoryStore>,
    staleness_handle: Option<SpawnHandle>,
    countdown_handle: Option<SpawnHandle>,
    /// Session being replaced; its final save must land before restore
    predecessor: Option<Addr<MonitorSession>>,
    shut_down: bool,
}

impl MonitorSession {
    /// Build a session for `user_id`. History is restored from `store`
    /// once the actor starts.
    pub fn new(
        user_id: &str,
        table: Arc<ThresholdTable>,
        settings: MonitorSettings,
        store: Arc<dyn HistoryStore>,
        predecessor: Option<Addr<MonitorSession>>,
    ) -> Self {
        Self {
            monitor: Monitor::new(user_id, table, settings.clone(), Vec::new(), Utc::now()),
            settings,
            store,
            staleness_handle: None,
            countdown_handle: None,
            predecessor,
            shut_down: false,
        }
    }

    /// Load the persisted history, then arm the monitor's start timers.
    ///
    /// A store that cannot be read yields an empty history rather than a
    /// failed session.
    fn resume(&mut self, ctx: &mut Context<Self>) {
        match self.store.load(self.monitor.user_id()) {
            Ok(records) => self.monitor.restore(records),
            Err(e) => {
                error!(user_id = %self.monitor.user_id(), error = %e, "Failed to restore history, starting empty")
            }
        }
        let effects = self.monitor.start();
        self.apply(effects, ctx);
    }

    fn dispatch(&mut self, event: Event, ctx: &mut Context<Self>) {
        let effects = self.monitor.handle(event, Utc::now());
        self.apply(effects, ctx);
    }

    fn apply(&mut self, effects: Vec<Effect>, ctx: &mut Context<Self>) {
        for effect in effects {
            match effect {
                Effect::ArmStaleness { generation } => {
                    if let Some(handle) = self.staleness_handle.take() {
                        ctx.cancel_future(handle);
                    }
                    let handle = ctx.run_later(self.settings.staleness_timeout(), move |act, ctx| {
                        act.staleness_handle = None;
                        act.dispatch(Event::StalenessTimeout { generation }, ctx);
                    });
                    self.staleness_handle = Some(handle);
                }
                Effect::StartCountdown { session_id } => {
                    self.cancel_countdown(ctx);
                    let handle = ctx.run_interval(COUNTDOWN_TICK, move |act, ctx| {
                        act.dispatch(Event::CountdownTick { session_id }, ctx);
                    });
                    self.countdown_handle = Some(handle);
                }
                Effect::CancelCountdown => self.cancel_countdown(ctx),
                Effect::Notify(notification) => {
                    debug!(
                        user_id = %self.monitor.user_id(),
                        notification_id = %notification.id,
                        "Notification queued for display"
                    );
                }
                Effect::PersistHistory if self.shut_down => self.persist_now(),
                Effect::PersistHistory => self.persist(ctx),
            }
        }
    }

    fn cancel_countdown(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.countdown_handle.take() {
            ctx.cancel_future(handle);
        }
    }

    /// Cancel timers and persist the history, once
    fn shutdown(&mut self, ctx: &mut Context<Self>) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(handle) = self.staleness_handle.take() {
            ctx.cancel_future(handle);
        }
        let effects = self.monitor.stop();
        self.apply(effects, ctx);
    }

    /// Save on the blocking pool. The mailbox waits for the save so
    /// saves land in order and before any stop.
    fn persist(&self, ctx: &mut Context<Self>) {
        let store = self.store.clone();
        let user_id = self.monitor.user_id().to_string();
        let records = self.monitor.history().to_vec();

        let save = tokio::task::spawn_blocking(move || store.save(&user_id, &records));
        ctx.wait(save.into_actor(self).map(|result, act, _| {
            let user_id = act.monitor.user_id();
            // Failures are retried on the next dirty refresh or at stop
            match result {
                Ok(Ok(())) => debug!(user_id = %user_id, "History persisted"),
                Ok(Err(e)) => error!(user_id = %user_id, error = %e, "Failed to persist history"),
                Err(e) => error!(user_id = %user_id, error = %e, "History save task failed"),
            }
        }));
    }

    /// Final save during shutdown, completed before the actor goes away
    fn persist_now(&self) {
        let user_id = self.monitor.user_id();
        let records = self.monitor.history().to_vec();
        if let Err(e) = self.store.save(user_id, &records) {
            error!(user_id = %user_id, error = %e, "Failed to persist history");
        }
    }
}

impl Actor for MonitorSession {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(user_id = %self.monitor.user_id(), "Monitor session started");

        ctx.run_interval(self.settings.refresh_interval(), |act, ctx| {
            act.dispatch(Event::RefreshTick, ctx);
        });

        match self.predecessor.take() {
            Some(previous) => {
                debug!(user_id = %self.monitor.user_id(), "Waiting for the previous session to finish saving");
                ctx.wait(previous.send(Stop).into_actor(self).map(|result, act, ctx| {
                    if result.is_err() {
                        debug!(user_id = %act.monitor.user_id(), "Previous session already stopped");
                    }
                    act.resume(ctx);
                }));
            }
            None => self.resume(ctx),
        }
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.shutdown(ctx);
        info!(user_id = %self.monitor.user_id(), "Monitor session stopped");
    }
}

/// Raw sensor message body
#[derive(Message)]
#[rtype(result = "Result<(), IngestError>")]
pub struct Ingest(pub Vec<u8>);

impl Handler<Ingest> for MonitorSession {
    type Result = Result<(), IngestError>;

    fn handle(&mut self, msg: Ingest, ctx: &mut Self::Context) -> Self::Result {
        let effects = self.monitor.ingest(&msg.0, Utc::now())?;
        self.apply(effects, ctx);
        Ok(())
    }
}

/// The user's answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Confirm,
    Reject,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Respond(pub UserAction);

impl Handler<Respond> for MonitorSession {
    type Result = ();

    fn handle(&mut self, msg: Respond, ctx: &mut Self::Context) {
        let event = match msg.0 {
            UserAction::Confirm => Event::Confirm,
            UserAction::Reject => Event::Reject,
        };
        self.dispatch(event, ctx);
    }
}

#[derive(Message)]
#[rtype(result = "Result<(), ProfileError>")]
pub struct SelectProfile(pub String);

impl Handler<SelectProfile> for MonitorSession {
    type Result = Result<(), ProfileError>;

    fn handle(&mut self, msg: SelectProfile, ctx: &mut Self::Context) -> Self::Result {
        let effects = self.monitor.select_profile(&msg.0, Utc::now())?;
        self.apply(effects, ctx);
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "Snapshot")]
pub struct GetSnapshot;

impl Handler<GetSnapshot> for MonitorSession {
    type Result = MessageResult<GetSnapshot>;

    fn handle(&mut self, _: GetSnapshot, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.monitor.snapshot(Utc::now()))
    }
}

/// Compute one history page inside the actor, against a consistent view
#[derive(Message)]
#[rtype(result = "HistoryPage")]
pub struct ViewHistory(pub HistoryPager);

impl Handler<ViewHistory> for MonitorSession {
    type Result = MessageResult<ViewHistory>;

    fn handle(&mut self, msg: ViewHistory, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.monitor.history_page(&msg.0))
    }
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct ClearHistory;

impl Handler<ClearHistory> for MonitorSession {
    type Result = usize;

    fn handle(&mut self, _: ClearHistory, ctx: &mut Self::Context) -> usize {
        let removed = self.monitor.history().len();
        let effects = self.monitor.clear_history();
        if effects.is_empty() {
            debug!(user_id = %self.monitor.user_id(), "Clear requested on an empty history");
        }
        self.apply(effects, ctx);
        removed
    }
}

/// Stop the session. History is persisted before the reply.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Stop;

impl Handler<Stop> for MonitorSession {
    type Result = ();

    fn handle(&mut self, _: Stop, ctx: &mut Self::Context) {
        self.shutdown(ctx);
        ctx.stop();
    }
}
