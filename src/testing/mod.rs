//! Helpers shared by the unit tests.

use async_trait::async_trait;
use chrono::Duration;
use std::io::Cursor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::auth::{generate_jwt, Claims, RefreshClient, RefreshError};
use crate::schedule::{assemble, ScheduleRecord, ScheduleSnapshot, ScheduledPost, SnapshotError, SnapshotSource};
use crate::types::TenantNamespace;

pub const TEST_SECRET: &str = "unit-test-secret";
pub const TEST_AUDIENCE: &str = "postit-audience";

/// Sign a token for `user-1` with the given audience, expiring `ttl` from now
/// (negative for an already expired token).
pub fn mint_token(audience: &[&str], ttl: Duration) -> String {
    let claims = Claims::new("user-1", audience.iter().map(|a| a.to_string()).collect(), ttl);
    generate_jwt(&claims, TEST_SECRET).expect("sign test token")
}

/// Encode a solid-colour PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .expect("encode test png");
    buffer
}

/// Refresh client that records every call and answers with a fixed token.
pub struct RecordingRefresher {
    answer: Option<String>,
    calls: AtomicUsize,
    last_token: Mutex<Option<String>>,
    called: Notify,
}

impl RecordingRefresher {
    pub fn new(answer: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
            last_token: Mutex::new(None),
            called: Notify::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }

    pub async fn wait_for_call(&self) {
        let wait = async {
            while self.calls() == 0 {
                self.called.notified().await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(2), wait)
            .await
            .expect("refresh was never attempted");
    }
}

#[async_trait]
impl RefreshClient for RecordingRefresher {
    async fn refresh(&self, token: &str) -> Result<Option<String>, RefreshError> {
        *self.last_token.lock().unwrap() = Some(token.to_string());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_one();
        Ok(self.answer.clone())
    }
}

/// Snapshot source over in-memory schedules, applying the same due and
/// pending filters as the database reader.
#[derive(Default)]
pub struct InMemorySchedules {
    schedules: Mutex<Vec<ScheduleRecord>>,
    posts: Mutex<HashMap<String, Vec<ScheduledPost>>>,
    reads: AtomicUsize,
    failing: AtomicBool,
}

impl InMemorySchedules {
    pub fn add_schedule(&self, schedule: ScheduleRecord) {
        self.schedules.lock().unwrap().push(schedule);
    }

    pub fn add_post(&self, schedule_id: &str, post: ScheduledPost) {
        self.posts
            .lock()
            .unwrap()
            .entry(schedule_id.to_string())
            .or_default()
            .push(post);
    }

    pub fn fail_reads(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for InMemorySchedules {
    async fn snapshot(&self, _tenant: &TenantNamespace) -> Result<Vec<ScheduleSnapshot>, SnapshotError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SnapshotError::SnapshotQueryError(sqlx::Error::PoolTimedOut));
        }

        let posts = self.posts.lock().unwrap();
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_due)
            .map(|s| {
                let pending = posts
                    .get(&s.schedule_id)
                    .map(|p| p.iter().filter(|p| !p.post_status).cloned().collect())
                    .unwrap_or_default();
                assemble(s, pending, chrono::Utc::now())
            })
            .collect())
    }
}
