use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use super::{assemble, ScheduleRecord, ScheduleSnapshot, ScheduledPost};
use crate::database::DatabaseManager;
use crate::types::TenantNamespace;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("schedule snapshot query failed: {0}")]
    SnapshotQueryError(#[from] sqlx::Error),
}

/// Produces the current schedule snapshots for a tenant. Implementations
/// never retry; the broadcaster decides what a failure means.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, tenant: &TenantNamespace) -> Result<Vec<ScheduleSnapshot>, SnapshotError>;
}

/// Reads due schedules and their pending posts from the tenant's schema.
#[derive(Clone)]
pub struct ScheduleSnapshotReader {
    pool: PgPool,
}

impl ScheduleSnapshotReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn due_schedules(&self, tenant: &TenantNamespace) -> Result<Vec<ScheduleRecord>, SnapshotError> {
        let query = format!(
            r#"
            SELECT
                schedule_id::text AS schedule_id,
                schedule_title,
                schedule_from::timestamptz AS schedule_from,
                schedule_to::timestamptz AS schedule_to,
                COALESCE(post_ids::text[], '{{}}') AS post_ids
            FROM {}
            WHERE is_due = $1
            ORDER BY schedule_from, schedule_id
            "#,
            DatabaseManager::tenant_table(tenant, "schedule")
        );

        let rows = sqlx::query(&query).bind(true).fetch_all(&self.pool).await?;
        rows.iter().map(schedule_from_row).collect()
    }

    /// Posts of `schedule_id` not yet published (`post_status = false`).
    pub async fn pending_posts(
        &self,
        tenant: &TenantNamespace,
        schedule_id: &str,
    ) -> Result<Vec<ScheduledPost>, SnapshotError> {
        let query = format!(
            r#"
            SELECT
                post_id::text AS post_id,
                COALESCE(post_message, '') AS post_message,
                COALESCE(image_paths::text[], '{{}}') AS image_paths,
                COALESCE(hash_tags::text[], '{{}}') AS hash_tags,
                post_status
            FROM {}
            WHERE scheduled_post_id::text = $1 AND post_status = $2
            "#,
            DatabaseManager::tenant_table(tenant, "scheduled_post")
        );

        let rows = sqlx::query(&query)
            .bind(schedule_id)
            .bind(false)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(post_from_row).collect()
    }
}

#[async_trait]
impl SnapshotSource for ScheduleSnapshotReader {
    async fn snapshot(&self, tenant: &TenantNamespace) -> Result<Vec<ScheduleSnapshot>, SnapshotError> {
        let schedules = self.due_schedules(tenant).await?;

        let mut snapshots = Vec::with_capacity(schedules.len());
        for schedule in &schedules {
            let posts = self.pending_posts(tenant, &schedule.schedule_id).await?;
            snapshots.push(assemble(schedule, posts, Utc::now()));
        }

        debug!(tenant = %tenant, schedules = snapshots.len(), "schedule snapshot read");
        Ok(snapshots)
    }
}

fn schedule_from_row(row: &PgRow) -> Result<ScheduleRecord, SnapshotError> {
    let from: DateTime<Utc> = row.try_get("schedule_from")?;
    let to: DateTime<Utc> = row.try_get("schedule_to")?;
    Ok(ScheduleRecord::new(
        row.try_get::<String, _>("schedule_id")?,
        row.try_get::<String, _>("schedule_title")?,
        from,
        to,
        row.try_get("post_ids")?,
        true,
    ))
}

fn post_from_row(row: &PgRow) -> Result<ScheduledPost, SnapshotError> {
    Ok(ScheduledPost {
        post_id: row.try_get("post_id")?,
        post_message: row.try_get("post_message")?,
        image_paths: row.try_get("image_paths")?,
        hash_tags: row.try_get("hash_tags")?,
        post_status: row.try_get("post_status")?,
    })
}
