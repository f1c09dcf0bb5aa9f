//! WebSocket module for real-time monitor updates
//!
//! One socket per connected dashboard or device, bound to a single user's
//! monitor session. Pushes display snapshots, notifications and device
//! configuration; accepts confirmation answers and history navigation.

use actix::{Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::device::DeviceConfigMessage;
use crate::history::HistoryPager;
use crate::models::{ClientMessage, Notification, WsMessage};
use crate::monitor::Snapshot;
use crate::session::{GetSnapshot, MonitorSession, Respond, SelectProfile, UserAction, ViewHistory};
use crate::state::AppState;
use crate::validation::PageConstraints;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the monitor session is polled for changes
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// WebSocket session actor
pub struct WsSession {
    client_id: String,
    user_id: String,
    last_heartbeat: Instant,
    session: Addr<MonitorSession>,
    config_rx: broadcast::Receiver<DeviceConfigMessage>,
    state: Arc<RwLock<AppState>>,
    pager: HistoryPager,
    /// Last snapshot pushed, without its generation timestamp
    last_snapshot: Option<Value>,
    /// Sequence number of the newest notification already pushed
    last_notification: Option<u64>,
}

impl WsSession {
    pub fn new(
        client_id: String,
        user_id: String,
        session: Addr<MonitorSession>,
        config_rx: broadcast::Receiver<DeviceConfigMessage>,
        state: Arc<RwLock<AppState>>,
    ) -> Self {
        Self {
            client_id,
            user_id,
            last_heartbeat: Instant::now(),
            session,
            config_rx,
            state,
            pager: HistoryPager::new(PageConstraints::DEFAULT_LIMIT),
            last_snapshot: None,
            last_notification: None,
        }
    }

    fn send(&self, msg: &WsMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn send_error(&self, message: impl Into<String>, ctx: &mut ws::WebsocketContext<Self>) {
        self.send(
            &WsMessage::Error {
                message: message.into(),
            },
            ctx,
        );
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    client_id = %act.client_id,
                    "WebSocket heartbeat timeout"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_session_polling(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(POLL_INTERVAL, |act, ctx| {
            act.forward_device_config(ctx);

            let fut = actix::fut::wrap_future::<_, Self>(act.session.send(GetSnapshot));
            ctx.spawn(fut.map(|result, act, ctx| match result {
                Ok(snapshot) => act.push_snapshot(snapshot, ctx),
                Err(e) => {
                    info!(client_id = %act.client_id, error = %e, "Monitor session gone, closing socket");
                    ctx.stop();
                }
            }));
        });
    }

    /// Push new notifications, then the snapshot if anything changed
    fn push_snapshot(&mut self, snapshot: Snapshot, ctx: &mut ws::WebsocketContext<Self>) {
        for notification in self.unseen_notifications(&snapshot.notifications) {
            self.send(&WsMessage::Notification(notification), ctx);
        }

        let Ok(mut value) = serde_json::to_value(&snapshot) else {
            return;
        };
        if let Some(fields) = value.as_object_mut() {
            fields.remove("generated_at");
        }
        if self.last_snapshot.as_ref() != Some(&value) {
            self.last_snapshot = Some(value);
            self.send(&WsMessage::Snapshot(snapshot), ctx);
        }
    }

    fn unseen_notifications(&mut self, notifications: &[Notification]) -> Vec<Notification> {
        let unseen = unseen_since(self.last_notification, notifications);
        if let Some(newest) = notifications.last() {
            self.last_notification = Some(newest.seq);
        }
        unseen
    }

    fn forward_device_config(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        loop {
            match self.config_rx.try_recv() {
                Ok(message) if message.user_id == self.user_id => {
                    debug!(client_id = %self.client_id, topic = %message.topic, "Forwarding device configuration");
                    self.send(&WsMessage::DeviceConfig(message), ctx);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(client_id = %self.client_id, skipped, "Device configuration messages dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn send_history_page(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let fut = actix::fut::wrap_future::<_, Self>(self.session.send(ViewHistory(self.pager.clone())));
        ctx.spawn(fut.map(|result, act, ctx| match result {
            Ok(page) => act.send(&WsMessage::HistoryPage(page), ctx),
            Err(e) => {
                warn!(client_id = %act.client_id, error = %e, "History view failed");
                act.send_error("History unavailable", ctx);
            }
        }));
    }

    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Ping => {
                self.last_heartbeat = Instant::now();
                self.send(&WsMessage::Pong, ctx);
            }
            ClientMessage::Confirm => self.session.do_send(Respond(UserAction::Confirm)),
            ClientMessage::Reject => self.session.do_send(Respond(UserAction::Reject)),
            ClientMessage::SelectProfile { profile } => {
                let fut = actix::fut::wrap_future::<_, Self>(self.session.send(SelectProfile(profile)));
                ctx.spawn(fut.map(|result, act, ctx| match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => act.send_error(e.to_string(), ctx),
                    Err(_) => act.send_error("Monitor session unavailable", ctx),
                }));
            }
            ClientMessage::SetHistoryFilter(filter) => {
                self.pager.set_filter(filter);
                self.send_history_page(ctx);
            }
            ClientMessage::SetPageSize { page_size } => {
                if page_size == 0 || page_size > PageConstraints::MAX_LIMIT {
                    self.send_error(
                        format!("Page size must be between 1 and {}", PageConstraints::MAX_LIMIT),
                        ctx,
                    );
                    return;
                }
                self.pager.set_page_size(page_size);
                self.send_history_page(ctx);
            }
            ClientMessage::GotoPage { page } => {
                if page == 0 {
                    self.send_error("Page number must be greater than 0", ctx);
                    return;
                }
                self.pager.goto(page);
                self.send_history_page(ctx);
            }
        }
    }
}

/// Notifications raised after sequence number `last`, oldest first.
///
/// With no position yet nothing is new: earlier notifications are part of
/// the snapshot itself.
fn unseen_since(last: Option<u64>, notifications: &[Notification]) -> Vec<Notification> {
    let Some(last) = last else {
        return Vec::new();
    };
    notifications
        .iter()
        .filter(|n| n.seq > last)
        .cloned()
        .collect()
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id, user_id = %self.user_id, "WebSocket connected");

        self.start_heartbeat(ctx);
        self.start_session_polling(ctx);

        let msg = WsMessage::Connected {
            client_id: self.client_id.clone(),
            user_id: self.user_id.clone(),
        };
        self.send(&msg, ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!(client_id = %self.client_id, "WebSocket disconnected");

        let state = self.state.clone();
        let client_id = self.client_id.clone();

        actix_rt::spawn(async move {
            let mut state = state.write().await;
            state.remove_client(&client_id);
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!(client_id = %self.client_id, message = %text);

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => self.handle_client_message(msg, ctx),
                    Err(e) => {
                        warn!(client_id = %self.client_id, error = %e);
                        self.send_error("Invalid message format", ctx);
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                info!(client_id = %self.client_id, reason = ?reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;
    use chrono::Utc;

    fn notifications(seqs: std::ops::RangeInclusive<u64>) -> Vec<Notification> {
        seqs.map(|seq| {
            Notification::new(seq, NotificationKind::ThresholdWarning, format!("warning {}", seq), Utc::now())
        })
        .collect()
    }

    #[test]
    fn test_first_poll_sends_nothing() {
        let list = notifications(1..=2);
        assert!(unseen_since(None, &list).is_empty());
    }

    #[test]
    fn test_only_newer_notifications_are_sent() {
        let list = notifications(1..=3);

        assert_eq!(unseen_since(Some(1), &list), list[1..].to_vec());
        assert!(unseen_since(Some(3), &list).is_empty());
    }

    #[test]
    fn test_burst_larger_than_buffer_sends_no_duplicates() {
        // Last push saw seq 5; 30 more were raised and only the newest 20 kept
        let list = notifications(16..=35);
        let unseen = unseen_since(Some(5), &list);

        assert_eq!(unseen.len(), 20);
        assert_eq!(unseen.first().map(|n| n.seq), Some(16));

        // The next poll after pushing them resends nothing
        assert!(unseen_since(Some(35), &list).is_empty());
    }
}
