//! Schedule status streaming over a duplex socket.
//!
//! A connection walks `HandshakeReceived -> Authorized -> Streaming ->
//! Closed(reason)`. Authorization happens once, on the handshake payload.
//! While streaming, ticks run strictly one after another: the snapshot read,
//! serialization and write of tick N finish (or fail) before tick N+1 is
//! scheduled. The first failure closes the connection; there is no resume.

pub mod sink;

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::TokenGate;
use crate::schedule::{SnapshotError, SnapshotSource};
use crate::types::TenantNamespace;

pub use sink::StatusSink;

/// First message a status client sends after the upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct Handshake {
    pub tenant_namespace: String,
    pub auth_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    Unauthorized,
    SnapshotFailed,
    SerializeFailed,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    HandshakeReceived,
    Authorized,
    Streaming,
    Closed(CloseReason),
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to serialize schedule snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("status stream write failed: {0}")]
    StreamWrite(String),
}

impl BroadcastError {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            BroadcastError::Snapshot(_) => CloseReason::SnapshotFailed,
            BroadcastError::Serialize(_) => CloseReason::SerializeFailed,
            BroadcastError::StreamWrite(_) => CloseReason::WriteFailed,
        }
    }
}

/// How a connection ended and how many snapshots it delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: ConnectionState,
    pub ticks: u64,
}

impl SessionOutcome {
    fn closed(reason: CloseReason, ticks: u64) -> Self {
        Self {
            state: ConnectionState::Closed(reason),
            ticks,
        }
    }
}

#[derive(Clone)]
pub struct StatusBroadcaster {
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
}

impl StatusBroadcaster {
    pub fn new(source: Arc<dyn SnapshotSource>, interval: Duration) -> Self {
        Self {
            source,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Authorize the handshake, then stream until failure or cancellation.
    pub async fn serve<S: StatusSink>(
        &self,
        gate: &TokenGate,
        handshake: Handshake,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let mut state = ConnectionState::HandshakeReceived;

        let tenant = match TenantNamespace::parse(&handshake.tenant_namespace) {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(error = %e, "status handshake rejected");
                return SessionOutcome::closed(CloseReason::Unauthorized, 0);
            }
        };
        if let Err(e) = gate.authorize(&handshake.auth_token, &tenant) {
            warn!(tenant = %tenant, error = %e, "status handshake rejected");
            return SessionOutcome::closed(CloseReason::Unauthorized, 0);
        }
        transition(&mut state, ConnectionState::Authorized, &tenant);

        let outcome = self.stream(&tenant, sink, cancel).await;
        transition(&mut state, outcome.state, &tenant);
        outcome
    }

    /// Push one snapshot per interval to `sink`. The first tick fires one
    /// interval after the call.
    pub async fn stream<S: StatusSink>(
        &self,
        tenant: &TenantNamespace,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        info!(tenant = %tenant, interval_ms = self.interval.as_millis() as u64, "status stream started");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.tick(tenant, sink) => result,
            };

            match result {
                Ok(()) => ticks += 1,
                Err(e) => {
                    error!(tenant = %tenant, tick = ticks + 1, error = %e, "status stream closed");
                    return SessionOutcome::closed(e.close_reason(), ticks);
                }
            }
        }

        info!(tenant = %tenant, ticks, "status client disconnected");
        SessionOutcome::closed(CloseReason::ClientDisconnected, ticks)
    }

    async fn tick<S: StatusSink>(&self, tenant: &TenantNamespace, sink: &mut S) -> Result<(), BroadcastError> {
        let snapshots = self.source.snapshot(tenant).await?;
        let payload = serde_json::to_string(&snapshots)?;
        debug!(tenant = %tenant, schedules = snapshots.len(), bytes = payload.len(), "pushing schedule status");
        sink.send_text(payload).await
    }
}

fn transition(state: &mut ConnectionState, next: ConnectionState, tenant: &TenantNamespace) {
    debug!(tenant = %tenant, from = ?state, to = ?next, "status connection state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::schedule::{ScheduleRecord, ScheduledPost};
    use crate::testing::{mint_token, InMemorySchedules, TEST_AUDIENCE, TEST_SECRET};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::Value;

    const TICK: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<String>,
        attempts: usize,
        fail_on_attempt: Option<usize>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn send_text(&mut self, payload: String) -> Result<(), BroadcastError> {
            self.attempts += 1;
            if self.fail_on_attempt == Some(self.attempts) {
                return Err(BroadcastError::StreamWrite("connection reset".into()));
            }
            self.sent.push(payload);
            Ok(())
        }
    }

    fn acme() -> TenantNamespace {
        TenantNamespace::parse("acme").unwrap()
    }

    fn post(id: &str, published: bool) -> ScheduledPost {
        ScheduledPost {
            post_id: id.to_string(),
            post_message: format!("hello from {id}"),
            image_paths: vec![format!("/media/{id}.png")],
            hash_tags: vec![],
            post_status: published,
        }
    }

    /// Two due schedules with three posts each, two of them pending.
    fn two_due_schedules() -> Arc<InMemorySchedules> {
        let from = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let to = from + ChronoDuration::hours(3);
        let store = InMemorySchedules::default();
        for s in ["morning", "evening"] {
            let ids: Vec<String> = (0..3).map(|i| format!("{s}-{i}")).collect();
            store.add_schedule(ScheduleRecord::new(s, s.to_uppercase(), from, to, ids.clone(), true));
            store.add_post(s, post(&ids[0], false));
            store.add_post(s, post(&ids[1], true));
            store.add_post(s, post(&ids[2], false));
        }
        store.add_schedule(ScheduleRecord::new("later", "Not due", from, to, vec!["x".into()], false));
        Arc::new(store)
    }

    #[tokio::test(start_paused = true)]
    async fn one_tick_reports_totals_and_pending_counts() {
        let broadcaster = StatusBroadcaster::new(two_due_schedules(), TICK);
        let cancel = CancellationToken::new();
        let mut sink = RecordingSink::default();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            time::sleep(TICK + Duration::from_millis(10)).await;
            stopper.cancel();
        });
        let outcome = broadcaster.stream(&acme(), &mut sink, cancel).await;

        assert_eq!(outcome.ticks, 1);
        assert_eq!(outcome.state, ConnectionState::Closed(CloseReason::ClientDisconnected));
        let snapshots: Vec<Value> = serde_json::from_str(&sink.sent[0]).unwrap();
        assert_eq!(snapshots.len(), 2);
        for snapshot in &snapshots {
            assert_eq!(snapshot["total_post"], 3);
            assert_eq!(snapshot["post_count"], 2);
            assert_eq!(snapshot["posts"].as_array().unwrap().len(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_closes_without_further_ticks() {
        let store = two_due_schedules();
        let broadcaster = StatusBroadcaster::new(store.clone(), TICK);
        let mut sink = RecordingSink {
            fail_on_attempt: Some(3),
            ..Default::default()
        };

        let outcome = broadcaster.stream(&acme(), &mut sink, CancellationToken::new()).await;

        assert_eq!(outcome.state, ConnectionState::Closed(CloseReason::WriteFailed));
        assert_eq!(outcome.ticks, 2);
        assert_eq!(sink.attempts, 3);
        assert_eq!(store.reads(), 3);

        // nothing keeps polling after the close
        time::sleep(TICK * 4).await;
        assert_eq!(store.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_failure_closes_the_connection() {
        let store = two_due_schedules();
        store.fail_reads();
        let broadcaster = StatusBroadcaster::new(store, TICK);
        let mut sink = RecordingSink::default();

        let outcome = broadcaster.stream(&acme(), &mut sink, CancellationToken::new()).await;

        assert_eq!(outcome, SessionOutcome::closed(CloseReason::SnapshotFailed, 0));
        assert!(sink.sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_an_idle_stream() {
        let broadcaster = StatusBroadcaster::new(two_due_schedules(), TICK);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = RecordingSink::default();

        let outcome = broadcaster.stream(&acme(), &mut sink, cancel).await;

        assert_eq!(outcome, SessionOutcome::closed(CloseReason::ClientDisconnected, 0));
        assert_eq!(sink.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_handshake_never_streams() {
        let store = two_due_schedules();
        let broadcaster = StatusBroadcaster::new(store.clone(), TICK);
        let gate = TokenGate::new(TEST_SECRET, TEST_AUDIENCE);
        let token = mint_token(&[TEST_AUDIENCE, "globex"], ChronoDuration::hours(1));
        let mut sink = RecordingSink::default();

        let handshake = Handshake {
            tenant_namespace: "acme".into(),
            auth_token: token.clone(),
        };
        assert!(matches!(gate.authorize(&token, &acme()), Err(AuthError::TenantMismatch(_))));

        let outcome = broadcaster
            .serve(&gate, handshake, &mut sink, CancellationToken::new())
            .await;

        assert_eq!(outcome, SessionOutcome::closed(CloseReason::Unauthorized, 0));
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_namespace_in_handshake_is_unauthorized() {
        let broadcaster = StatusBroadcaster::new(two_due_schedules(), TICK);
        let gate = TokenGate::new(TEST_SECRET, TEST_AUDIENCE);
        let mut sink = RecordingSink::default();
        let handshake = Handshake {
            tenant_namespace: "acme; drop schema".into(),
            auth_token: mint_token(&[TEST_AUDIENCE, "acme"], ChronoDuration::hours(1)),
        };

        let outcome = broadcaster
            .serve(&gate, handshake, &mut sink, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, ConnectionState::Closed(CloseReason::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn authorized_handshake_streams_until_cancelled() {
        let broadcaster = StatusBroadcaster::new(two_due_schedules(), TICK);
        let gate = TokenGate::new(TEST_SECRET, TEST_AUDIENCE);
        let handshake = Handshake {
            tenant_namespace: "acme".into(),
            auth_token: mint_token(&[TEST_AUDIENCE, "acme"], ChronoDuration::hours(1)),
        };
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            time::sleep(TICK * 3 + Duration::from_millis(10)).await;
            stopper.cancel();
        });
        let mut sink = RecordingSink::default();

        let outcome = broadcaster.serve(&gate, handshake, &mut sink, cancel).await;

        assert_eq!(outcome, SessionOutcome::closed(CloseReason::ClientDisconnected, 3));
        assert_eq!(sink.sent.len(), 3);
    }
}
