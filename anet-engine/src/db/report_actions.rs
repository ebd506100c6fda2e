//! Report actions
//!
//! Immutable rows; the ordered actions of a report are its approval history.

use crate::loader::sql::{opt_uuid_col, push_uuid_list, ts_col, uuid_col};
use crate::loader::BatchLoader;
use anet_common::enums::{Ordinal, ReportActionType};
use anet_common::{time, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// One audit/event row of a report's history
#[derive(Debug, Clone, PartialEq)]
pub struct ReportAction {
    pub report_uuid: Uuid,
    pub approval_step_uuid: Option<Uuid>,
    pub person_uuid: Option<Uuid>,
    pub action_type: ReportActionType,
    /// Written while the report was a future engagement
    pub planned: bool,
    pub created_at: DateTime<Utc>,
}

fn action_from_row(row: &SqliteRow) -> Result<ReportAction> {
    Ok(ReportAction {
        report_uuid: uuid_col(row, "report_uuid")?,
        approval_step_uuid: opt_uuid_col(row, "approval_step_uuid")?,
        person_uuid: opt_uuid_col(row, "person_uuid")?,
        action_type: ReportActionType::decode(row.try_get("type")?)?,
        planned: row.try_get("planned")?,
        created_at: ts_col(row, "created_at")?,
    })
}

/// Append an action
pub async fn insert_action(conn: &mut SqliteConnection, action: &ReportAction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO report_actions (report_uuid, approval_step_uuid, person_uuid, type, planned, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(action.report_uuid.to_string())
    .bind(action.approval_step_uuid.map(|u| u.to_string()))
    .bind(action.person_uuid.map(|u| u.to_string()))
    .bind(action.action_type.ordinal())
    .bind(action.planned)
    .bind(time::to_db(&action.created_at))
    .execute(conn)
    .await?;

    Ok(())
}

/// Detach historical actions from a step that is being removed
pub async fn detach_step(conn: &mut SqliteConnection, step_uuid: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE report_actions SET approval_step_uuid = NULL WHERE approval_step_uuid = ?")
        .bind(step_uuid.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Actions of each report, oldest first
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionsForReport;

#[async_trait]
impl BatchLoader for ActionsForReport {
    type Key = Uuid;
    type Value = ReportAction;
    const NAME: &'static str = "report_actions.for_report";

    async fn load(&self, pool: &SqlitePool, keys: &[Uuid]) -> Result<Vec<(Uuid, ReportAction)>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM report_actions WHERE report_uuid IN ");
        push_uuid_list(&mut builder, keys);
        builder.push(" ORDER BY id");
        let rows = builder.build().fetch_all(pool).await?;
        rows.iter()
            .map(|row| action_from_row(row).map(|a| (a.report_uuid, a)))
            .collect()
    }
}

/// Planned flag of the most recent action of a given type
pub fn last_planned_flag(actions: &[ReportAction], action_type: ReportActionType) -> Option<bool> {
    actions
        .iter()
        .rev()
        .find(|a| a.action_type == action_type)
        .map(|a| a.planned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(action_type: ReportActionType, planned: bool) -> ReportAction {
        ReportAction {
            report_uuid: Uuid::nil(),
            approval_step_uuid: None,
            person_uuid: None,
            action_type,
            planned,
            created_at: time::now(),
        }
    }

    #[test]
    fn test_last_planned_flag_uses_latest_matching_action() {
        let history = vec![
            action(ReportActionType::Submit, true),
            action(ReportActionType::Approve, true),
            action(ReportActionType::Submit, false),
            action(ReportActionType::Approve, false),
        ];
        assert_eq!(last_planned_flag(&history, ReportActionType::Submit), Some(false));
        assert_eq!(last_planned_flag(&history[..2], ReportActionType::Submit), Some(true));
        assert_eq!(last_planned_flag(&[], ReportActionType::Submit), None);
    }
}
