//! Positions, position associations and administered organizations
//!
//! Subscriptions and approver lists reference positions rather than people so
//! they survive personnel turnover.

use crate::loader::sql::{opt_uuid_col, push_uuid_list, uuid_col};
use crate::loader::BatchLoader;
use anet_common::enums::{Ordinal, PositionType};
use anet_common::{time, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Position record
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub uuid: Uuid,
    pub name: String,
    pub position_type: PositionType,
    pub organization_uuid: Option<Uuid>,
    pub current_person_uuid: Option<Uuid>,
}

impl Position {
    pub fn new(name: impl Into<String>, position_type: PositionType, organization_uuid: Option<Uuid>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            position_type,
            organization_uuid,
            current_person_uuid: None,
        }
    }

    /// Assign the person currently holding this position
    pub fn held_by(mut self, person_uuid: Uuid) -> Self {
        self.current_person_uuid = Some(person_uuid);
        self
    }
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        uuid: uuid_col(row, "uuid")?,
        name: row.try_get("name")?,
        position_type: PositionType::decode(row.try_get("type")?)?,
        organization_uuid: opt_uuid_col(row, "organization_uuid")?,
        current_person_uuid: opt_uuid_col(row, "current_person_uuid")?,
    })
}

/// Save position to database
pub async fn insert_position(pool: &SqlitePool, position: &Position) -> Result<()> {
    let now = time::to_db(&time::now());
    sqlx::query(
        r#"
        INSERT INTO positions (uuid, name, type, organization_uuid, current_person_uuid, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(position.uuid.to_string())
    .bind(&position.name)
    .bind(position.position_type.ordinal())
    .bind(position.organization_uuid.map(|u| u.to_string()))
    .bind(position.current_person_uuid.map(|u| u.to_string()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a two-way association between positions (stored with sorted uuids)
pub async fn associate_positions(pool: &SqlitePool, a: Uuid, b: Uuid) -> Result<()> {
    let (first, second) = if a.to_string() <= b.to_string() { (a, b) } else { (b, a) };
    let now = time::to_db(&time::now());
    sqlx::query(
        r#"
        INSERT INTO position_relationships (position_uuid_a, position_uuid_b, deleted, created_at, updated_at)
        VALUES (?, ?, 0, ?, ?)
        ON CONFLICT(position_uuid_a, position_uuid_b) DO UPDATE SET deleted = 0, updated_at = excluded.updated_at
        "#,
    )
    .bind(first.to_string())
    .bind(second.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Make a position one of an organization's administrators
pub async fn add_administrative_position(pool: &SqlitePool, organization_uuid: Uuid, position_uuid: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO organization_administrative_positions (organization_uuid, position_uuid) VALUES (?, ?)",
    )
    .bind(organization_uuid.to_string())
    .bind(position_uuid.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Positions by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionById;

#[async_trait]
impl BatchLoader for PositionById {
    type Key = Uuid;
    type Value = Position;
    const NAME: &'static str = "positions.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Position)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM positions WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| position_from_row(row).map(|p| (p.uuid, p)))
            .collect()
    }
}

/// Current position of each person
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentPositionForPerson;

#[async_trait]
impl BatchLoader for CurrentPositionForPerson {
    type Key = Uuid;
    type Value = Position;
    const NAME: &'static str = "positions.current_for_person";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Position)>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM positions WHERE current_person_uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| {
                let position = position_from_row(row)?;
                let person = uuid_col(row, "current_person_uuid")?;
                Ok((person, position))
            })
            .collect()
    }
}

/// Positions associated with each position (either side of the relationship)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssociatedPositions;

#[async_trait]
impl BatchLoader for AssociatedPositions {
    type Key = Uuid;
    type Value = Position;
    const NAME: &'static str = "positions.associated";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Position)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT positions.*,
                CASE WHEN positions.uuid = pr.position_uuid_a
                    THEN pr.position_uuid_b ELSE pr.position_uuid_a END AS batch_uuid
            FROM positions, position_relationships pr
            WHERE pr.deleted = 0 AND (
                (positions.uuid = pr.position_uuid_a AND pr.position_uuid_b IN "#,
        );
        push_uuid_list(&mut builder, keys);
        builder.push(") OR (positions.uuid = pr.position_uuid_b AND pr.position_uuid_a IN ");
        push_uuid_list(&mut builder, keys);
        builder.push("))");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "batch_uuid")?, position_from_row(row)?)))
            .collect()
    }
}

/// Organizations administered through each position
#[derive(Debug, Clone, Copy, Default)]
pub struct AdministeredOrganizations;

#[async_trait]
impl BatchLoader for AdministeredOrganizations {
    type Key = Uuid;
    type Value = Uuid;
    const NAME: &'static str = "positions.administered_organizations";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Uuid)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT position_uuid, organization_uuid FROM organization_administrative_positions WHERE position_uuid IN ",
        );
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "position_uuid")?, uuid_col(row, "organization_uuid")?)))
            .collect()
    }
}
