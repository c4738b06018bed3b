//! Resilient event stream client
//!
//! Drives one connection at a time through
//! `Connecting → Authenticating → Subscribed (⇄ Degraded) → Disconnected`
//! and reconnects with exponential backoff until cancelled or a
//! configuration-level failure (rejected credentials) stops it.
//!
//! After every reconnect that follows an earlier subscription, history since
//! the last forwarded event is replayed into the channel before live reading
//! resumes, so consumers see catch-up records ahead of newer live records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::transport::{StreamConnector, StreamError, StreamSession};
use crate::cache::EntityStateCache;
use crate::config::StreamConfig;
use crate::controller::protocol::{ClientMessage, ServerMessage};
use crate::controller::StateSource;
use crate::notify::{self, NotificationSink};
use crate::types::{
    ConnectionState, Escalation, EscalationReason, StateEvent, StreamMessage, StreamStatus,
};

/// Entity id used for escalations about the stream itself.
pub const STREAM_ENTITY: &str = "sentinel.event_stream";

/// How a connection ended without an error.
enum SessionEnd {
    Cancelled,
}

pub struct EventStreamClient<C: StreamConnector> {
    connector: C,
    token: String,
    config: StreamConfig,
    history: Arc<dyn StateSource>,
    cache: Arc<EntityStateCache>,
    notifier: Arc<dyn NotificationSink>,
    notify_timeout: Duration,
    status: Arc<RwLock<StreamStatus>>,
    /// Newest event timestamp forwarded; catch-up starts here
    last_forwarded: Option<DateTime<Utc>>,
    /// Catch-up start when nothing was forwarded yet
    first_subscribed_at: Option<DateTime<Utc>>,
    /// Set once any connection reached `Subscribed`
    has_subscribed: bool,
    /// When the current connection reached `Subscribed`
    subscribed_at: Option<Instant>,
    next_id: u64,
}

impl<C: StreamConnector> EventStreamClient<C> {
    pub fn new(
        connector: C,
        token: impl Into<String>,
        config: StreamConfig,
        history: Arc<dyn StateSource>,
        cache: Arc<EntityStateCache>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            connector,
            token: token.into(),
            config,
            history,
            cache,
            notifier,
            notify_timeout: Duration::from_secs(crate::config::defaults::NOTIFY_TIMEOUT_SECS),
            status: Arc::new(RwLock::new(StreamStatus::default())),
            last_forwarded: None,
            first_subscribed_at: None,
            has_subscribed: false,
            subscribed_at: None,
            next_id: 1,
        }
    }

    /// Start catch-up from this instant on the first reconnect.
    #[must_use]
    pub fn resume_from(mut self, at: DateTime<Utc>) -> Self {
        self.last_forwarded = Some(at);
        self
    }

    #[must_use]
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Shared status for the API.
    pub fn status_handle(&self) -> Arc<RwLock<StreamStatus>> {
        Arc::clone(&self.status)
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut status = self.status.write().await;
        if status.state != state {
            debug!(from = %status.state, to = %state, "Event stream state");
            status.state = state;
        }
    }

    async fn escalate(&self, reason: EscalationReason, detail: &str) {
        let escalation = Escalation::new(STREAM_ENTITY, reason, Utc::now()).with_context("detail", detail);
        notify::deliver(self.notifier.as_ref(), &escalation, self.notify_timeout).await;
    }

    /// Run until cancelled. Returns an error only for configuration-level
    /// failures that reconnecting cannot fix.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<StreamMessage>,
        cancel: CancellationToken,
    ) -> Result<(), StreamError> {
        let mut backoff = Backoff::new(
            Duration::from_secs(self.config.reconnect_min_secs),
            Duration::from_secs(self.config.reconnect_max_secs),
        );
        let stable_after = Duration::from_secs(self.config.stable_after_secs);
        let mut consecutive_failures: u32 = 0;
        let mut auth_timeouts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let result = self.connect_and_stream(&tx, &cancel).await;

            if let Some(since) = self.subscribed_at.take() {
                consecutive_failures = 0;
                auth_timeouts = 0;
                if since.elapsed() >= stable_after {
                    backoff.reset();
                }
            }

            let err = match result {
                Ok(SessionEnd::Cancelled) => break,
                Err(e) => e,
            };

            let err = match err {
                StreamError::Timeout(what) if what == "authentication" => {
                    auth_timeouts += 1;
                    if auth_timeouts >= self.config.auth_failure_limit.max(1) {
                        StreamError::AuthUnresponsive(auth_timeouts)
                    } else {
                        StreamError::Timeout(what)
                    }
                }
                other => other,
            };

            if err.is_fatal() {
                self.set_state(ConnectionState::Disconnected).await;
                if matches!(err, StreamError::ConsumerGone) {
                    info!("Event consumer stopped, shutting down event stream");
                } else {
                    error!(error = %err, "Controller will not accept this client, stopping event stream");
                    self.escalate(EscalationReason::AuthenticationFailed, &err.to_string()).await;
                }
                return Err(err);
            }

            consecutive_failures += 1;
            self.set_state(ConnectionState::Disconnected).await;
            {
                let mut status = self.status.write().await;
                status.consecutive_failures = consecutive_failures;
                status.reconnections += 1;
            }

            if consecutive_failures == self.config.degraded_after_attempts {
                error!(attempts = consecutive_failures, error = %err, "Event stream unavailable, monitoring degraded");
                self.status.write().await.monitoring_degraded = true;
                self.escalate(EscalationReason::MonitoringDegraded, &err.to_string()).await;
            }

            let delay = backoff.next_delay();
            warn!(
                attempt = consecutive_failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Event stream reconnecting after failure"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!("Event stream stopped");
        Ok(())
    }

    async fn connect_and_stream(
        &mut self,
        tx: &mpsc::Sender<StreamMessage>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, StreamError> {
        self.set_state(ConnectionState::Connecting).await;
        let mut session = tokio::select! {
            () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            session = self.connector.connect() => session?,
        };
        self.next_id = 1;

        let result = tokio::select! {
            () = cancel.cancelled() => Ok(SessionEnd::Cancelled),
            r = self.stream_session(&mut session, tx) => r,
        };
        session.close().await;
        result
    }

    async fn stream_session(
        &mut self,
        session: &mut C::Session,
        tx: &mpsc::Sender<StreamMessage>,
    ) -> Result<SessionEnd, StreamError> {
        self.set_state(ConnectionState::Authenticating).await;
        let auth_timeout = Duration::from_secs(self.config.auth_timeout_secs);
        tokio::time::timeout(auth_timeout, self.authenticate(session))
            .await
            .map_err(|_| StreamError::Timeout("authentication"))??;
        tokio::time::timeout(auth_timeout, self.subscribe(session))
            .await
            .map_err(|_| StreamError::Timeout("subscription"))??;

        self.subscribed_at = Some(Instant::now());
        self.set_state(ConnectionState::Subscribed).await;
        {
            let mut status = self.status.write().await;
            if status.monitoring_degraded {
                info!("Event stream restored, monitoring no longer degraded");
            }
            status.monitoring_degraded = false;
            status.consecutive_failures = 0;
        }
        info!("Subscribed to controller state changes");

        let mut catch_up_gap = false;
        if self.has_subscribed && self.config.catch_up {
            if let Err(e) = self.catch_up(tx).await {
                if matches!(e, StreamError::ConsumerGone) {
                    return Err(e);
                }
                warn!(since = ?self.catch_up_start(), error = %e, "Catch-up failed, events during the outage may be missing");
                catch_up_gap = true;
                self.set_state(ConnectionState::Degraded).await;
            }
        }
        self.has_subscribed = true;
        if self.first_subscribed_at.is_none() {
            self.first_subscribed_at = Some(Utc::now());
        }

        self.read_live(session, tx, catch_up_gap).await
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn authenticate(&mut self, session: &mut C::Session) -> Result<(), StreamError> {
        loop {
            match session.recv().await? {
                Some(ServerMessage::AuthRequired { ha_version }) => {
                    debug!(version = ?ha_version, "Controller requested authentication");
                    session
                        .send(ClientMessage::Auth {
                            access_token: self.token.clone(),
                        })
                        .await?;
                }
                Some(ServerMessage::AuthOk { ha_version }) => {
                    info!(version = ?ha_version, "Authenticated with controller");
                    return Ok(());
                }
                Some(ServerMessage::AuthInvalid { message }) => {
                    return Err(StreamError::AuthRejected(
                        message.unwrap_or_else(|| "invalid access token".to_string()),
                    ));
                }
                Some(other) => {
                    return Err(StreamError::ProtocolError(format!(
                        "unexpected message during authentication: {other:?}"
                    )));
                }
                None => return Err(StreamError::ConnectionClosed),
            }
        }
    }

    async fn subscribe(&mut self, session: &mut C::Session) -> Result<(), StreamError> {
        let id = self.take_id();
        session.send(ClientMessage::subscribe_state_changed(id)).await?;
        loop {
            match session.recv().await? {
                Some(ServerMessage::Result { id: rid, success, error }) if rid == id => {
                    return if success {
                        Ok(())
                    } else {
                        Err(StreamError::SubscribeFailed(
                            error.map_or_else(|| "unknown error".to_string(), |e| format!("{}: {}", e.code, e.message)),
                        ))
                    };
                }
                Some(_) => {}
                None => return Err(StreamError::ConnectionClosed),
            }
        }
    }

    /// Replay history since the last forwarded event. Waits for channel
    /// capacity rather than dropping records.
    async fn catch_up(&mut self, tx: &mpsc::Sender<StreamMessage>) -> Result<(), StreamError> {
        let Some(since) = self.catch_up_start() else {
            return Ok(());
        };
        let entity_ids = self.cache.entity_ids();
        let events = self
            .history
            .history_since(since, &entity_ids)
            .await
            .map_err(|e| StreamError::ProtocolError(format!("history request failed: {e}")))?;

        let count = events.len();
        for event in events {
            let ts = event.timestamp;
            tx.send(StreamMessage::CatchUp(event))
                .await
                .map_err(|_| StreamError::ConsumerGone)?;
            self.advance_resume(ts);
        }

        let mut status = self.status.write().await;
        status.catch_up_events += count as u64;
        info!(since = %since, replayed = count, "Catch-up complete");
        Ok(())
    }

    fn catch_up_start(&self) -> Option<DateTime<Utc>> {
        self.last_forwarded.or(self.first_subscribed_at)
    }

    fn advance_resume(&mut self, ts: DateTime<Utc>) {
        self.last_forwarded = Some(self.last_forwarded.map_or(ts, |r| r.max(ts)));
    }

    async fn forward_live(&mut self, tx: &mpsc::Sender<StreamMessage>, event: StateEvent) -> Result<(), StreamError> {
        let ts = event.timestamp;
        match tx.try_send(StreamMessage::Live(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => return Err(StreamError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(StreamError::ConsumerGone),
        }
        self.advance_resume(ts);
        let mut status = self.status.write().await;
        status.events_received += 1;
        status.last_event_at = Some(ts);
        Ok(())
    }

    async fn read_live(
        &mut self,
        session: &mut C::Session,
        tx: &mpsc::Sender<StreamMessage>,
        catch_up_gap: bool,
    ) -> Result<SessionEnd, StreamError> {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval_secs);
        let heartbeat_timeout = Duration::from_secs(self.config.heartbeat_timeout_secs);
        let mut last_message = Instant::now();
        let mut pending_ping: Option<u64> = None;

        loop {
            let remaining = heartbeat_timeout.saturating_sub(last_message.elapsed());
            match tokio::time::timeout(heartbeat_interval.min(remaining), session.recv()).await {
                Err(_elapsed) => {
                    let silent = last_message.elapsed();
                    if silent >= heartbeat_timeout {
                        return Err(StreamError::HeartbeatLost(silent.as_secs()));
                    }
                    if pending_ping.is_none() {
                        let id = self.take_id();
                        debug!(id, silent_secs = silent.as_secs(), "No traffic, sending ping");
                        session.send(ClientMessage::Ping { id }).await?;
                        pending_ping = Some(id);
                        self.set_state(ConnectionState::Degraded).await;
                    }
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => return Err(StreamError::ConnectionClosed),
                Ok(Ok(Some(message))) => {
                    last_message = Instant::now();
                    match message {
                        ServerMessage::Event { event, .. } => {
                            if let Some(state_event) = event.state_event() {
                                self.forward_live(tx, state_event).await?;
                            }
                        }
                        ServerMessage::Pong { id } if pending_ping == Some(id) => {
                            pending_ping = None;
                        }
                        ServerMessage::Result { success: false, error, id } => {
                            warn!(id, error = ?error, "Controller reported a failed command");
                        }
                        _ => {}
                    }
                    if pending_ping.is_none() && !catch_up_gap {
                        self.set_state(ConnectionState::Subscribed).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    use crate::controller::protocol::EventPayload;
    use crate::controller::ControllerError;
    use crate::notify::MemoryNotifier;
    use crate::types::EntityState;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    #[derive(Default)]
    struct Script {
        messages: VecDeque<ServerMessage>,
        hang: bool,
        answer_pings: bool,
    }

    impl Script {
        fn subscribed(events: Vec<ServerMessage>) -> Self {
            let mut messages: VecDeque<ServerMessage> = VecDeque::from(vec![
                ServerMessage::AuthRequired { ha_version: None },
                ServerMessage::AuthOk { ha_version: None },
                ServerMessage::Result { id: 1, success: true, error: None },
            ]);
            messages.extend(events);
            Self { messages, hang: false, answer_pings: false }
        }

        fn hang(mut self) -> Self {
            self.hang = true;
            self
        }
    }

    struct FakeSession {
        script: Script,
        sent: Arc<Mutex<Vec<ClientMessage>>>,
    }

    #[async_trait]
    impl StreamSession for FakeSession {
        async fn send(&mut self, message: ClientMessage) -> Result<(), StreamError> {
            if let (true, ClientMessage::Ping { id }) = (self.script.answer_pings, &message) {
                self.script.messages.push_back(ServerMessage::Pong { id: *id });
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<ServerMessage>, StreamError> {
            if let Some(message) = self.script.messages.pop_front() {
                return Ok(Some(message));
            }
            if self.script.hang {
                futures::future::pending::<()>().await;
            }
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct FakeConnector {
        scripts: Mutex<VecDeque<Script>>,
        sent: Arc<Mutex<Vec<ClientMessage>>>,
        connects: Arc<AtomicU32>,
    }

    impl FakeConnector {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl StreamConnector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self) -> Result<FakeSession, StreamError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| StreamError::ConnectionFailed("connection refused".to_string()))?;
            Ok(FakeSession { script, sent: Arc::clone(&self.sent) })
        }
    }

    struct FakeHistory(Vec<StateEvent>);

    #[async_trait]
    impl StateSource for FakeHistory {
        async fn fetch_states(&self) -> Result<Vec<EntityState>, ControllerError> {
            Ok(Vec::new())
        }

        async fn history_since(&self, since: DateTime<Utc>, _ids: &[String]) -> Result<Vec<StateEvent>, ControllerError> {
            Ok(self.0.iter().filter(|e| e.timestamp > since).cloned().collect())
        }
    }

    /// History endpoint that is down
    struct UnreachableHistory;

    #[async_trait]
    impl StateSource for UnreachableHistory {
        async fn fetch_states(&self) -> Result<Vec<EntityState>, ControllerError> {
            Err(ControllerError::NotFound("/api/states".to_string()))
        }

        async fn history_since(&self, _since: DateTime<Utc>, _ids: &[String]) -> Result<Vec<StateEvent>, ControllerError> {
            Err(ControllerError::NotFound("/api/history/period".to_string()))
        }
    }

    fn event(entity_id: &str, state: &str, at: DateTime<Utc>) -> ServerMessage {
        let ts = at.to_rfc3339();
        ServerMessage::Event {
            id: 1,
            event: EventPayload {
                event_type: "state_changed".to_string(),
                data: json!({
                    "entity_id": entity_id,
                    "new_state": {
                        "entity_id": entity_id,
                        "state": state,
                        "attributes": {},
                        "last_changed": ts,
                        "last_updated": ts,
                    }
                }),
                time_fired: Some(at),
            },
        }
    }

    fn client(
        connector: FakeConnector,
        history: Vec<StateEvent>,
        notifier: MemoryNotifier,
        config: StreamConfig,
    ) -> EventStreamClient<FakeConnector> {
        EventStreamClient::new(
            connector,
            "token",
            config,
            Arc::new(FakeHistory(history)),
            Arc::new(EntityStateCache::new()),
            Arc::new(notifier),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_stops_client_and_escalates() {
        let script = Script {
            messages: VecDeque::from(vec![
                ServerMessage::AuthRequired { ha_version: None },
                ServerMessage::AuthInvalid { message: Some("Invalid access token".to_string()) },
            ]),
            ..Default::default()
        };
        let connector = FakeConnector::new(vec![script]);
        let sent = Arc::clone(&connector.sent);
        let notifier = MemoryNotifier::new();
        let (tx, _rx) = mpsc::channel(16);

        let result = client(connector, Vec::new(), notifier.clone(), StreamConfig::default())
            .run(tx, CancellationToken::new())
            .await;

        assert!(matches!(result, Err(StreamError::AuthRejected(_))));
        assert_eq!(
            sent.lock().unwrap()[0],
            ClientMessage::Auth { access_token: "token".to_string() }
        );
        let escalations = notifier.escalations();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].reason, EscalationReason::AuthenticationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_is_forwarded_before_resumed_live_events() {
        let connector = FakeConnector::new(vec![
            Script::subscribed(vec![event("sensor.a", "on", t(10))]),
            Script::subscribed(vec![event("sensor.a", "off", t(30))]).hang(),
        ]);
        let history = vec![
            StateEvent::new("sensor.a", "on", t(10)),
            StateEvent::new("sensor.b", "unavailable", t(20)),
        ];
        let stream = client(connector, history, MemoryNotifier::new(), StreamConfig::default());
        let status = stream.status_handle();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(tx, cancel.clone()));

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(rx.recv().await.unwrap());
        }
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());

        assert!(matches!(&received[0], StreamMessage::Live(e) if e.timestamp == t(10)));
        assert!(matches!(&received[1], StreamMessage::CatchUp(e) if e.entity_id == "sensor.b"));
        assert!(matches!(&received[2], StreamMessage::Live(e) if e.timestamp == t(30)));

        let status = status.read().await;
        assert_eq!(status.reconnections, 1);
        assert_eq!(status.catch_up_events, 1);
        assert_eq!(status.events_received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_is_pinged_then_dropped() {
        let connector = FakeConnector::new(vec![Script::subscribed(Vec::new()).hang()]);
        let sent = Arc::clone(&connector.sent);
        let connects = Arc::clone(&connector.connects);
        let stream = client(connector, Vec::new(), MemoryNotifier::new(), StreamConfig::default());
        let status = stream.status_handle();
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(tx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(status.read().await.state, ConnectionState::Degraded);
        assert!(sent.lock().unwrap().iter().any(|m| matches!(m, ClientMessage::Ping { .. })));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(connects.load(Ordering::SeqCst) >= 2, "dead connection should be replaced");

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_ping_keeps_connection() {
        let mut script = Script::subscribed(Vec::new()).hang();
        script.answer_pings = true;
        let connector = FakeConnector::new(vec![script]);
        let connects = Arc::clone(&connector.connects);
        let stream = client(connector, Vec::new(), MemoryNotifier::new(), StreamConfig::default());
        let status = stream.status_handle();
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(tx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(315)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(status.read().await.state, ConnectionState::Subscribed);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_channel_forces_reconnect() {
        let connector = FakeConnector::new(vec![
            Script::subscribed(vec![
                event("sensor.a", "1", t(1)),
                event("sensor.a", "2", t(2)),
            ]),
            Script::subscribed(Vec::new()).hang(),
        ]);
        let connects = Arc::clone(&connector.connects);
        let history = vec![StateEvent::new("sensor.a", "2", t(2))];
        let stream = client(connector, history, MemoryNotifier::new(), StreamConfig::default());
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(tx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 2);

        // The dropped event is recovered through catch-up
        assert!(matches!(rx.recv().await, Some(StreamMessage::Live(e)) if e.state == "1"));
        assert!(matches!(rx.recv().await, Some(StreamMessage::CatchUp(e)) if e.state == "2"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_degraded_escalated_once() {
        let notifier = MemoryNotifier::new();
        let config = StreamConfig {
            degraded_after_attempts: 3,
            reconnect_max_secs: 2,
            ..Default::default()
        };
        let stream = client(FakeConnector::new(Vec::new()), Vec::new(), notifier.clone(), config);
        let status = stream.status_handle();
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(tx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let degraded: Vec<_> = notifier
            .escalations()
            .into_iter()
            .filter(|e| e.reason == EscalationReason::MonitoringDegraded)
            .collect();
        assert_eq!(degraded.len(), 1);
        let status = status.read().await;
        assert!(status.monitoring_degraded);
        assert!(status.consecutive_failures > 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_catch_up_still_streams_live_events() {
        let connector = FakeConnector::new(vec![
            Script::subscribed(vec![event("sensor.a", "on", t(10))]),
            Script::subscribed(vec![event("sensor.a", "off", t(30))]).hang(),
        ]);
        let stream = EventStreamClient::new(
            connector,
            "token",
            StreamConfig::default(),
            Arc::new(UnreachableHistory),
            Arc::new(EntityStateCache::new()),
            Arc::new(MemoryNotifier::new()),
        );
        let status = stream.status_handle();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(tx, cancel.clone()));

        assert!(matches!(rx.recv().await, Some(StreamMessage::Live(e)) if e.timestamp == t(10)));
        assert!(matches!(rx.recv().await, Some(StreamMessage::Live(e)) if e.timestamp == t(30)));

        {
            let status = status.read().await;
            // The gap stays visible for the rest of the connection
            assert_eq!(status.state, ConnectionState::Degraded);
            assert_eq!(status.catch_up_events, 0);
            assert_eq!(status.events_received, 2);
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_auth_timeouts_stop_client_and_escalate() {
        let silent = || Script {
            messages: VecDeque::from(vec![ServerMessage::AuthRequired { ha_version: None }]),
            hang: true,
            answer_pings: false,
        };
        let connector = FakeConnector::new(vec![silent(), silent(), silent()]);
        let connects = Arc::clone(&connector.connects);
        let notifier = MemoryNotifier::new();
        let config = StreamConfig {
            auth_failure_limit: 2,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(16);

        let result = client(connector, Vec::new(), notifier.clone(), config)
            .run(tx, CancellationToken::new())
            .await;

        assert!(matches!(result, Err(StreamError::AuthUnresponsive(2))), "{result:?}");
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        let auth: Vec<_> = notifier
            .escalations()
            .into_iter()
            .filter(|e| e.reason == EscalationReason::AuthenticationFailed)
            .collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].entity_id, STREAM_ENTITY);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(StreamError::AuthRejected("bad".to_string()).is_fatal());
        assert!(StreamError::AuthUnresponsive(5).is_fatal());
        assert!(!StreamError::Timeout("authentication").is_fatal());
        assert!(!StreamError::HeartbeatLost(60).is_fatal());
    }
}
