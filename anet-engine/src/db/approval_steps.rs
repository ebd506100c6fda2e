//! Approval steps and approvers
//!
//! Each related object (organization, task, location) owns up to two chains,
//! one per [`ApprovalStepType`]. A chain is an explicit sequence: `sequence`
//! is authoritative and `next_step_uuid` is rewritten from it on every write,
//! after which the linkage is checked to walk the whole chain exactly once.

use crate::audit;
use crate::loader::sql::{opt_uuid_col, push_uuid_list, uuid_col};
use crate::loader::BatchLoader;
use anet_common::enums::{ApprovalStepType, Ordinal};
use anet_common::{time, Error, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

/// Approval step record
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalStep {
    pub uuid: Uuid,
    pub name: String,
    pub step_type: ApprovalStepType,
    /// Organization, task or location owning the chain
    pub related_object_uuid: Uuid,
    pub next_step_uuid: Option<Uuid>,
    pub sequence: i64,
    pub restricted_approval: bool,
}

fn step_from_row(row: &SqliteRow) -> Result<ApprovalStep> {
    Ok(ApprovalStep {
        uuid: uuid_col(row, "uuid")?,
        name: row.try_get("name")?,
        step_type: ApprovalStepType::decode(row.try_get("type")?)?,
        related_object_uuid: uuid_col(row, "related_object_uuid")?,
        next_step_uuid: opt_uuid_col(row, "next_step_uuid")?,
        sequence: row.try_get::<Option<i64>, _>("sequence")?.unwrap_or_default(),
        restricted_approval: row.try_get("restricted_approval")?,
    })
}

/// Step to be written into a chain
#[derive(Debug, Clone)]
pub struct NewStep {
    pub uuid: Uuid,
    pub name: String,
    pub approvers: Vec<Uuid>,
    pub restricted_approval: bool,
}

impl NewStep {
    pub fn new(name: impl Into<String>, approvers: Vec<Uuid>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            approvers,
            restricted_approval: false,
        }
    }

    /// Only approvers within the report's organization hierarchy may act
    pub fn restricted(mut self) -> Self {
        self.restricted_approval = true;
        self
    }
}

fn validate_new_steps(steps: &[NewStep]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.name.trim().is_empty() {
            return Err(Error::InvalidInput("Approval step name must not be empty".to_string()));
        }
        if !seen.insert(step.uuid) {
            return Err(Error::InvalidInput(format!("Approval step {} appears twice in chain", step.uuid)));
        }
    }
    Ok(())
}

/// Check that following `next_step_uuid` from the head visits exactly the
/// given steps, in order, once each
pub fn check_linkage(steps: &[ApprovalStep]) -> Result<()> {
    let mut visited = HashSet::new();
    let mut cursor = steps.first().map(|s| s.uuid);
    let mut walked = Vec::with_capacity(steps.len());
    while let Some(uuid) = cursor {
        if !visited.insert(uuid) {
            return Err(Error::Internal(format!("Approval chain loops at step {}", uuid)));
        }
        let step = steps
            .iter()
            .find(|s| s.uuid == uuid)
            .ok_or_else(|| Error::Internal(format!("Approval chain links to foreign step {}", uuid)))?;
        walked.push(uuid);
        cursor = step.next_step_uuid;
    }
    if walked.len() != steps.len() || walked.iter().zip(steps).any(|(w, s)| *w != s.uuid) {
        return Err(Error::Internal("Approval chain linkage disagrees with sequence".to_string()));
    }
    Ok(())
}

async fn load_chain_in(
    conn: &mut SqliteConnection,
    related_object_uuid: Uuid,
    step_type: ApprovalStepType,
) -> Result<Vec<ApprovalStep>> {
    let rows = sqlx::query(
        "SELECT * FROM approval_steps WHERE related_object_uuid = ? AND type = ? AND sequence IS NOT NULL ORDER BY sequence",
    )
    .bind(related_object_uuid.to_string())
    .bind(step_type.ordinal())
    .fetch_all(conn)
    .await?;
    rows.iter().map(step_from_row).collect()
}

/// Rewrite sequence numbers and next links from the current order
async fn relink(
    conn: &mut SqliteConnection,
    related_object_uuid: Uuid,
    step_type: ApprovalStepType,
) -> Result<Vec<ApprovalStep>> {
    let order: Vec<Uuid> = load_chain_in(&mut *conn, related_object_uuid, step_type)
        .await?
        .into_iter()
        .map(|s| s.uuid)
        .collect();

    sqlx::query("UPDATE approval_steps SET sequence = NULL WHERE related_object_uuid = ? AND type = ?")
        .bind(related_object_uuid.to_string())
        .bind(step_type.ordinal())
        .execute(&mut *conn)
        .await?;

    let now = time::to_db(&time::now());
    for (index, uuid) in order.iter().enumerate() {
        sqlx::query("UPDATE approval_steps SET sequence = ?, next_step_uuid = ?, updated_at = ? WHERE uuid = ?")
            .bind(index as i64)
            .bind(order.get(index + 1).map(|u| u.to_string()))
            .bind(&now)
            .bind(uuid.to_string())
            .execute(&mut *conn)
            .await?;
    }

    let chain = load_chain_in(&mut *conn, related_object_uuid, step_type).await?;
    check_linkage(&chain)?;
    Ok(chain)
}

async fn insert_step(
    conn: &mut SqliteConnection,
    related_object_uuid: Uuid,
    step_type: ApprovalStepType,
    sequence: i64,
    step: &NewStep,
) -> Result<()> {
    let now = time::to_db(&time::now());
    sqlx::query(
        r#"
        INSERT INTO approval_steps (uuid, name, type, related_object_uuid, next_step_uuid, sequence,
                                    restricted_approval, created_at, updated_at)
        VALUES (?, ?, ?, ?, NULL, ?, ?, ?, ?)
        "#,
    )
    .bind(step.uuid.to_string())
    .bind(&step.name)
    .bind(step_type.ordinal())
    .bind(related_object_uuid.to_string())
    .bind(sequence)
    .bind(step.restricted_approval)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let approvers: HashSet<Uuid> = step.approvers.iter().copied().collect();
    for position_uuid in approvers {
        sqlx::query("INSERT INTO approvers (approval_step_uuid, position_uuid) VALUES (?, ?)")
            .bind(step.uuid.to_string())
            .bind(position_uuid.to_string())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn ensure_not_in_use(conn: &mut SqliteConnection, step_uuid: Uuid) -> Result<()> {
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports WHERE approval_step_uuid = ?")
        .bind(step_uuid.to_string())
        .fetch_one(conn)
        .await?;
    if in_use > 0 {
        return Err(Error::StateConflict(format!(
            "Approval step {} is the pending step of {} report(s)",
            step_uuid, in_use
        )));
    }
    Ok(())
}

async fn delete_step_in(conn: &mut SqliteConnection, step_uuid: Uuid) -> Result<()> {
    ensure_not_in_use(&mut *conn, step_uuid).await?;
    crate::db::report_actions::detach_step(&mut *conn, step_uuid).await?;
    sqlx::query("DELETE FROM approvers WHERE approval_step_uuid = ?")
        .bind(step_uuid.to_string())
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM approval_steps WHERE uuid = ?")
        .bind(step_uuid.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Replace an object's whole chain of one type
pub async fn replace_chain(
    pool: &SqlitePool,
    related_object_uuid: Uuid,
    step_type: ApprovalStepType,
    steps: &[NewStep],
) -> Result<Vec<ApprovalStep>> {
    validate_new_steps(steps)?;

    let mut tx = pool.begin().await?;
    let existing = load_chain_in(&mut tx, related_object_uuid, step_type).await?;
    for step in &existing {
        delete_step_in(&mut tx, step.uuid).await?;
    }
    for (index, step) in steps.iter().enumerate() {
        insert_step(&mut tx, related_object_uuid, step_type, index as i64, step).await?;
    }
    let chain = relink(&mut tx, related_object_uuid, step_type).await?;
    tx.commit().await?;

    audit!(
        "Replaced {} chain of {}: {} step(s)",
        step_type,
        related_object_uuid,
        chain.len()
    );
    Ok(chain)
}

/// Append a step at the end of an object's chain
pub async fn append_step(
    pool: &SqlitePool,
    related_object_uuid: Uuid,
    step_type: ApprovalStepType,
    step: &NewStep,
) -> Result<Vec<ApprovalStep>> {
    validate_new_steps(std::slice::from_ref(step))?;

    let mut tx = pool.begin().await?;
    let existing = load_chain_in(&mut tx, related_object_uuid, step_type).await?;
    if existing.iter().any(|s| s.uuid == step.uuid) {
        return Err(Error::InvalidInput(format!("Approval step {} is already in the chain", step.uuid)));
    }
    let next_sequence = existing.last().map_or(0, |s| s.sequence + 1);
    insert_step(&mut tx, related_object_uuid, step_type, next_sequence, step).await?;
    let chain = relink(&mut tx, related_object_uuid, step_type).await?;
    tx.commit().await?;

    audit!("Appended approval step {} to {} chain of {}", step.uuid, step_type, related_object_uuid);
    Ok(chain)
}

/// Remove a step, refusing while a report is pending on it
pub async fn remove_step(pool: &SqlitePool, step_uuid: Uuid) -> Result<Vec<ApprovalStep>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query("SELECT * FROM approval_steps WHERE uuid = ?")
        .bind(step_uuid.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Approval step {}", step_uuid)))?;
    let step = step_from_row(&row)?;

    delete_step_in(&mut tx, step_uuid).await?;
    let chain = relink(&mut tx, step.related_object_uuid, step.step_type).await?;
    tx.commit().await?;

    audit!("Removed approval step {} from {}", step_uuid, step.related_object_uuid);
    Ok(chain)
}

/// Steps by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct StepById;

#[async_trait]
impl BatchLoader for StepById {
    type Key = Uuid;
    type Value = ApprovalStep;
    const NAME: &'static str = "approval_steps.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, ApprovalStep)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM approval_steps WHERE sequence IS NOT NULL AND uuid IN ",
        );
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(|row| step_from_row(row).map(|s| (s.uuid, s))).collect()
    }
}

/// All ordered steps owned by each related object, both chain types
#[derive(Debug, Clone, Copy, Default)]
pub struct StepsForObject;

#[async_trait]
impl BatchLoader for StepsForObject {
    type Key = Uuid;
    type Value = ApprovalStep;
    const NAME: &'static str = "approval_steps.for_object";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, ApprovalStep)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM approval_steps WHERE sequence IS NOT NULL AND related_object_uuid IN ",
        );
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY type, sequence");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| step_from_row(row).map(|s| (s.related_object_uuid, s)))
            .collect()
    }
}

/// Approver positions of each step
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproversForStep;

#[async_trait]
impl BatchLoader for ApproversForStep {
    type Key = Uuid;
    type Value = Uuid;
    const NAME: &'static str = "approval_steps.approvers";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Uuid)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT approval_step_uuid, position_uuid FROM approvers WHERE approval_step_uuid IN ",
        );
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY position_uuid");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| Ok((uuid_col(row, "approval_step_uuid")?, uuid_col(row, "position_uuid")?)))
            .collect()
    }
}
