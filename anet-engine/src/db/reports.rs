//! Reports, report people and report state writes
//!
//! State columns are only written through [`update_state_guarded`], which
//! matches on the expected state and step so that concurrent transitions on
//! one report cannot both succeed.

use crate::loader::sql::{opt_ts_col, opt_uuid_col, push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::entity::EntityKind;
use anet_common::enums::{ApprovalStepType, Ordinal, ReportCancelledReason, ReportState};
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Report record
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub uuid: Uuid,
    pub intent: Option<String>,
    pub state: ReportState,
    /// Pending step; None means no step is pending
    pub approval_step_uuid: Option<Uuid>,
    pub engagement_date: Option<DateTime<Utc>>,
    /// Set only once published, or cancelled on the last step
    pub released_at: Option<DateTime<Utc>>,
    pub cancelled_reason: Option<ReportCancelledReason>,
    pub advisor_organization_uuid: Option<Uuid>,
    pub interlocutor_organization_uuid: Option<Uuid>,
    pub location_uuid: Option<Uuid>,
    pub event_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// New draft report
    pub fn draft(intent: impl Into<String>, engagement_date: Option<DateTime<Utc>>) -> Self {
        let now = time::now();
        Self {
            uuid: Uuid::new_v4(),
            intent: Some(intent.into()),
            state: ReportState::Draft,
            approval_step_uuid: None,
            engagement_date,
            released_at: None,
            cancelled_reason: None,
            advisor_organization_uuid: None,
            interlocutor_organization_uuid: None,
            location_uuid: None,
            event_uuid: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Engagement still lies ahead of `now`
    pub fn is_future_engagement(&self, now: DateTime<Utc>) -> bool {
        self.engagement_date.map_or(false, |date| date > now)
    }
}

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let cancelled_reason: Option<i64> = row.try_get("cancelled_reason")?;
    Ok(Report {
        uuid: uuid_col(row, "uuid")?,
        intent: row.try_get("intent")?,
        state: ReportState::decode(row.try_get("state")?)?,
        approval_step_uuid: opt_uuid_col(row, "approval_step_uuid")?,
        engagement_date: opt_ts_col(row, "engagement_date")?,
        released_at: opt_ts_col(row, "released_at")?,
        cancelled_reason: cancelled_reason.map(ReportCancelledReason::decode).transpose()?,
        advisor_organization_uuid: opt_uuid_col(row, "advisor_organization_uuid")?,
        interlocutor_organization_uuid: opt_uuid_col(row, "interlocutor_organization_uuid")?,
        location_uuid: opt_uuid_col(row, "location_uuid")?,
        event_uuid: opt_uuid_col(row, "event_uuid")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

fn opt_string(uuid: Option<Uuid>) -> Option<String> {
    uuid.map(|u| u.to_string())
}

/// Save report to database
pub async fn insert_report(pool: &SqlitePool, report: &Report) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reports (
            uuid, intent, state, approval_step_uuid, engagement_date, released_at,
            cancelled_reason, advisor_organization_uuid, interlocutor_organization_uuid,
            location_uuid, event_uuid, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(report.uuid.to_string())
    .bind(&report.intent)
    .bind(report.state.ordinal())
    .bind(opt_string(report.approval_step_uuid))
    .bind(report.engagement_date.as_ref().map(time::to_db))
    .bind(report.released_at.as_ref().map(time::to_db))
    .bind(report.cancelled_reason.map(Ordinal::ordinal))
    .bind(opt_string(report.advisor_organization_uuid))
    .bind(opt_string(report.interlocutor_organization_uuid))
    .bind(opt_string(report.location_uuid))
    .bind(opt_string(report.event_uuid))
    .bind(time::to_db(&report.created_at))
    .bind(time::to_db(&report.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Update the editable content of a report (not its lifecycle columns), only
/// if it is still in the expected state and on the expected step. Returns
/// rows updated (0 or 1).
pub async fn update_report_content(
    conn: &mut SqliteConnection,
    report: &Report,
    expected_state: ReportState,
    expected_step: Option<Uuid>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE reports SET
            intent = ?, engagement_date = ?, cancelled_reason = ?,
            advisor_organization_uuid = ?, interlocutor_organization_uuid = ?,
            location_uuid = ?, event_uuid = ?, updated_at = ?
        WHERE uuid = ? AND state = ? AND approval_step_uuid IS ?
        "#,
    )
    .bind(&report.intent)
    .bind(report.engagement_date.as_ref().map(time::to_db))
    .bind(report.cancelled_reason.map(Ordinal::ordinal))
    .bind(opt_string(report.advisor_organization_uuid))
    .bind(opt_string(report.interlocutor_organization_uuid))
    .bind(opt_string(report.location_uuid))
    .bind(opt_string(report.event_uuid))
    .bind(time::to_db(&report.updated_at))
    .bind(report.uuid.to_string())
    .bind(expected_state.ordinal())
    .bind(opt_string(expected_step))
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// New lifecycle column values
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub state: ReportState,
    pub approval_step_uuid: Option<Uuid>,
    pub released_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Write lifecycle columns only if the report is still in the expected state
/// and on the expected step. Returns rows updated (0 or 1).
pub async fn update_state_guarded(
    conn: &mut SqliteConnection,
    report_uuid: Uuid,
    expected_state: ReportState,
    expected_step: Option<Uuid>,
    update: &StateUpdate,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE reports
        SET state = ?, approval_step_uuid = ?, released_at = ?, updated_at = ?
        WHERE uuid = ? AND state = ? AND approval_step_uuid IS ?
        "#,
    )
    .bind(update.state.ordinal())
    .bind(opt_string(update.approval_step_uuid))
    .bind(update.released_at.as_ref().map(time::to_db))
    .bind(time::to_db(&update.updated_at))
    .bind(report_uuid.to_string())
    .bind(expected_state.ordinal())
    .bind(opt_string(expected_step))
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Remove a report and every row that depends on it
pub async fn delete_report_cascade(conn: &mut SqliteConnection, report_uuid: Uuid) -> Result<u64> {
    let uuid = report_uuid.to_string();
    let tag = EntityKind::Report.tag();

    for statement in [
        "DELETE FROM report_people WHERE report_uuid = ?",
        "DELETE FROM report_tasks WHERE report_uuid = ?",
        "DELETE FROM report_actions WHERE report_uuid = ?",
    ] {
        sqlx::query(statement).bind(&uuid).execute(&mut *conn).await?;
    }

    // Instant assessments exist only for their report
    sqlx::query(
        "DELETE FROM assessments WHERE uuid IN (SELECT assessment_uuid FROM assessment_related_objects \
         WHERE related_object_type = ? AND related_object_uuid = ?)",
    )
    .bind(tag)
    .bind(&uuid)
    .execute(&mut *conn)
    .await?;

    for statement in [
        "DELETE FROM note_related_objects WHERE related_object_type = ? AND related_object_uuid = ?",
        "DELETE FROM attachment_related_objects WHERE related_object_type = ? AND related_object_uuid = ?",
        "DELETE FROM authorization_group_related_objects WHERE related_object_type = ? AND related_object_uuid = ?",
        "DELETE FROM subscriptions WHERE subscribed_object_type = ? AND subscribed_object_uuid = ?",
    ] {
        sqlx::query(statement).bind(tag).bind(&uuid).execute(&mut *conn).await?;
    }

    let result = sqlx::query("DELETE FROM reports WHERE uuid = ?")
        .bind(&uuid)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Reports whose engagement date has passed while they still carry a
/// planning-approval history
pub async fn future_engagements_now_past(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Report>> {
    let rows = sqlx::query(
        r#"
        SELECT r.* FROM reports r
        LEFT JOIN approval_steps cur ON cur.uuid = r.approval_step_uuid
        WHERE r.state IN (?, ?, ?, ?)
          AND r.engagement_date IS NOT NULL
          AND r.engagement_date <= ?
          AND (
              cur.type = ?
              OR (SELECT a.planned FROM report_actions a
                  WHERE a.report_uuid = r.uuid ORDER BY a.id DESC LIMIT 1) = 1
              OR (SELECT s.type FROM report_actions a
                  JOIN approval_steps s ON s.uuid = a.approval_step_uuid
                  WHERE a.report_uuid = r.uuid ORDER BY a.id DESC LIMIT 1) = ?
          )
        ORDER BY r.engagement_date
        "#,
    )
    .bind(ReportState::Approved.ordinal())
    .bind(ReportState::Rejected.ordinal())
    .bind(ReportState::PendingApproval.ordinal())
    .bind(ReportState::Published.ordinal())
    .bind(time::to_db(&now))
    .bind(ApprovalStepType::PlanningApproval.ordinal())
    .bind(ApprovalStepType::PlanningApproval.ordinal())
    .fetch_all(pool)
    .await?;

    rows.iter().map(report_from_row).collect()
}

/// Reports by uuid
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportById;

#[async_trait]
impl BatchLoader for ReportById {
    type Key = Uuid;
    type Value = Report;
    const NAME: &'static str = "reports.by_id";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, Report)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM reports WHERE uuid IN ");
        push_uuid_list(&mut builder, keys);
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(|row| report_from_row(row).map(|r| (r.uuid, r))).collect()
    }
}

/// A person's role on a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPerson {
    pub person_uuid: Uuid,
    pub is_primary: bool,
    pub is_attendee: bool,
    pub is_author: bool,
    pub is_interlocutor: bool,
}

impl ReportPerson {
    /// Primary author who also attended
    pub fn primary_author(person_uuid: Uuid) -> Self {
        Self {
            person_uuid,
            is_primary: true,
            is_attendee: true,
            is_author: true,
            is_interlocutor: false,
        }
    }

    /// Attendee who did not author the report
    pub fn attendee(person_uuid: Uuid, is_interlocutor: bool) -> Self {
        Self {
            person_uuid,
            is_primary: false,
            is_attendee: true,
            is_author: false,
            is_interlocutor,
        }
    }
}

/// Replace the people of a report
pub async fn set_report_people(conn: &mut SqliteConnection, report_uuid: Uuid, people: &[ReportPerson]) -> Result<()> {
    sqlx::query("DELETE FROM report_people WHERE report_uuid = ?")
        .bind(report_uuid.to_string())
        .execute(&mut *conn)
        .await?;
    for person in people {
        sqlx::query(
            r#"
            INSERT INTO report_people (report_uuid, person_uuid, is_primary, is_attendee, is_author, is_interlocutor)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report_uuid.to_string())
        .bind(person.person_uuid.to_string())
        .bind(person.is_primary)
        .bind(person.is_attendee)
        .bind(person.is_author)
        .bind(person.is_interlocutor)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// People of each report (authors and attendees), primary first
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportPeople;

#[async_trait]
impl BatchLoader for ReportPeople {
    type Key = Uuid;
    type Value = ReportPerson;
    const NAME: &'static str = "reports.people";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, ReportPerson)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM report_people WHERE report_uuid IN ");
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY is_primary DESC, is_author DESC, person_uuid");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| {
                Ok((
                    uuid_col(row, "report_uuid")?,
                    ReportPerson {
                        person_uuid: uuid_col(row, "person_uuid")?,
                        is_primary: row.try_get("is_primary")?,
                        is_attendee: row.try_get("is_attendee")?,
                        is_author: row.try_get("is_author")?,
                        is_interlocutor: row.try_get("is_interlocutor")?,
                    },
                ))
            })
            .collect()
    }
}

/// Authors among a report's people, primary first
pub fn authors(people: &[ReportPerson]) -> impl Iterator<Item = Uuid> + '_ {
    people.iter().filter(|p| p.is_author).map(|p| p.person_uuid)
}
