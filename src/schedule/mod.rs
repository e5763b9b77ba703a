//! Read side of post scheduling: due schedules and their pending posts,
//! aggregated into the snapshots pushed over the status socket.

pub mod reader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use reader::{ScheduleSnapshotReader, SnapshotError, SnapshotSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub schedule_id: String,
    pub schedule_title: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub post_ids: Vec<String>,
    /// Seconds allotted to each referenced post, see [`duration_per_post`].
    pub duration: f64,
    pub is_due: bool,
}

impl ScheduleRecord {
    pub fn new(
        schedule_id: impl Into<String>,
        schedule_title: impl Into<String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        post_ids: Vec<String>,
        is_due: bool,
    ) -> Self {
        let mut record = Self {
            schedule_id: schedule_id.into(),
            schedule_title: schedule_title.into(),
            from,
            to,
            post_ids,
            duration: 0.0,
            is_due,
        };
        record.duration = duration_per_post(&record);
        record
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub post_id: String,
    pub post_message: String,
    pub image_paths: Vec<String>,
    pub hash_tags: Vec<String>,
    pub post_status: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub schedule_id: String,
    pub schedule_title: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Number of posts the schedule references.
    pub total_post: usize,
    pub posts: Vec<ScheduledPost>,
    /// Number of referenced posts still pending. Never larger than
    /// `total_post` for consistent data, but not enforced.
    pub post_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Window length in seconds divided evenly between the referenced posts.
/// Zero when the schedule references no posts.
pub fn duration_per_post(schedule: &ScheduleRecord) -> f64 {
    if schedule.post_ids.is_empty() {
        return 0.0;
    }
    let window = (schedule.to - schedule.from).num_milliseconds() as f64 / 1000.0;
    window / schedule.post_ids.len() as f64
}

/// One snapshot from one schedule and the pending posts found for it.
pub fn assemble(schedule: &ScheduleRecord, posts: Vec<ScheduledPost>, now: DateTime<Utc>) -> ScheduleSnapshot {
    ScheduleSnapshot {
        schedule_id: schedule.schedule_id.clone(),
        schedule_title: schedule.schedule_title.clone(),
        from: schedule.from,
        to: schedule.to,
        total_post: schedule.post_ids.len(),
        post_count: posts.len(),
        posts,
        created_at: now,
        updated_at: now,
    }
}
