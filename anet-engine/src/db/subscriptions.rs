//! Subscriptions of positions to entities
//!
//! A subscription has a pending update when its `updated_at` is later than
//! the last acknowledgement (or its creation when never acknowledged).

use crate::loader::sql::{opt_ts_col, push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::entity::EntityRef;
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Subscription record
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub uuid: Uuid,
    pub subscriber_uuid: Uuid,
    pub subscribed: EntityRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Subscribed entity changed since last seen
    pub fn has_pending_update(&self) -> bool {
        self.updated_at > self.acknowledged_at.unwrap_or(self.created_at)
    }
}

fn subscription_from_row(row: &SqliteRow) -> Result<Subscription> {
    let tag: String = row.try_get("subscribed_object_type")?;
    let uuid: String = row.try_get("subscribed_object_uuid")?;
    Ok(Subscription {
        uuid: uuid_col(row, "uuid")?,
        subscriber_uuid: uuid_col(row, "subscriber_uuid")?,
        subscribed: EntityRef::from_parts(&tag, &uuid)?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
        acknowledged_at: opt_ts_col(row, "acknowledged_at")?,
    })
}

/// Subscribe a position to an entity; returns the existing subscription when
/// already subscribed
pub async fn subscribe(pool: &SqlitePool, subscriber_uuid: Uuid, subscribed: EntityRef) -> Result<Subscription> {
    let now = time::to_db(&time::now());
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO subscriptions
            (uuid, subscriber_uuid, subscribed_object_type, subscribed_object_uuid, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(subscriber_uuid.to_string())
    .bind(subscribed.kind().tag())
    .bind(subscribed.uuid().to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        r#"
        SELECT * FROM subscriptions
        WHERE subscriber_uuid = ? AND subscribed_object_type = ? AND subscribed_object_uuid = ?
        "#,
    )
    .bind(subscriber_uuid.to_string())
    .bind(subscribed.kind().tag())
    .bind(subscribed.uuid().to_string())
    .fetch_one(pool)
    .await?;

    subscription_from_row(&row)
}

/// Remove a subscription; returns whether one existed
pub async fn unsubscribe(pool: &SqlitePool, subscriber_uuid: Uuid, subscribed: EntityRef) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM subscriptions
        WHERE subscriber_uuid = ? AND subscribed_object_type = ? AND subscribed_object_uuid = ?
        "#,
    )
    .bind(subscriber_uuid.to_string())
    .bind(subscribed.kind().tag())
    .bind(subscribed.uuid().to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Subscriptions of a position with a pending update, most recent first
pub async fn pending_for_subscriber(pool: &SqlitePool, subscriber_uuid: Uuid) -> Result<Vec<Subscription>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM subscriptions
        WHERE subscriber_uuid = ? AND updated_at > COALESCE(acknowledged_at, created_at)
        ORDER BY updated_at DESC, uuid
        "#,
    )
    .bind(subscriber_uuid.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(subscription_from_row).collect()
}

/// Mark a subscription as seen up to `at`
pub async fn acknowledge(pool: &SqlitePool, subscription_uuid: Uuid, at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query("UPDATE subscriptions SET acknowledged_at = ? WHERE uuid = ?")
        .bind(time::to_db(&at))
        .bind(subscription_uuid.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Subscriptions of each subscribed entity uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionsForObject;

#[async_trait]
impl BatchLoader for SubscriptionsForObject {
    type Key = Uuid;
    type Value = Subscription;
    const NAME: &'static str = "subscriptions.for_object";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Subscription)>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM subscriptions WHERE subscribed_object_uuid IN ");
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY created_at, uuid");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| subscription_from_row(row).map(|s| (s.subscribed.uuid(), s)))
            .collect()
    }
}
