//! Subscription propagation
//!
//! A mutation marks every subscription on the entities it touches as stale.
//! The affected entities are described as [`SubscriptionUpdateStatement`]s
//! which are merged into a single OR'd `UPDATE subscriptions` and executed on
//! the mutation's own connection, so they commit or roll back with it.
//!
//! Statements are set based: running them again for the same mutation writes
//! the same `updated_at` to the same rows.

use crate::db::reports::Report;
use anet_common::entity::{EntityKind, EntityRef};
use anet_common::{time, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const REPORT_PEOPLE: &str =
    "SELECT person_uuid FROM report_people WHERE report_uuid = ? AND (is_attendee = 1 OR is_author = 1)";
const REPORT_PEOPLE_POSITIONS: &str = "SELECT uuid FROM positions WHERE current_person_uuid IN \
     (SELECT person_uuid FROM report_people WHERE report_uuid = ? AND (is_attendee = 1 OR is_author = 1))";
const REPORT_TASKS: &str = "SELECT task_uuid FROM report_tasks WHERE report_uuid = ?";

/// Which uuids of one entity kind are affected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Uuids(Vec<Uuid>),
    /// Single-column subquery taking one uuid parameter
    Subquery { sql: &'static str, param: Uuid },
}

/// Subscriptions on `object_type` entities matched by `selector`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdateStatement {
    pub object_type: EntityKind,
    pub selector: Selector,
}

impl SubscriptionUpdateStatement {
    pub fn uuids(object_type: EntityKind, uuids: Vec<Uuid>) -> Self {
        Self {
            object_type,
            selector: Selector::Uuids(uuids),
        }
    }

    pub fn subquery(object_type: EntityKind, sql: &'static str, param: Uuid) -> Self {
        Self {
            object_type,
            selector: Selector::Subquery { sql, param },
        }
    }

    fn is_empty(&self) -> bool {
        matches!(&self.selector, Selector::Uuids(uuids) if uuids.is_empty())
    }
}

/// Statements for a report in its new state
///
/// Only published or cancelled reports are worth notifying subscribers
/// about; any other state yields no statements.
pub fn statements_for_report(report: &Report) -> Vec<SubscriptionUpdateStatement> {
    if !report.state.is_subscription_worthy() {
        return Vec::new();
    }

    let mut statements = vec![
        SubscriptionUpdateStatement::uuids(EntityKind::Report, vec![report.uuid]),
        SubscriptionUpdateStatement::subquery(EntityKind::Person, REPORT_PEOPLE, report.uuid),
        SubscriptionUpdateStatement::subquery(EntityKind::Position, REPORT_PEOPLE_POSITIONS, report.uuid),
        SubscriptionUpdateStatement::uuids(
            EntityKind::Organization,
            [report.advisor_organization_uuid, report.interlocutor_organization_uuid]
                .into_iter()
                .flatten()
                .collect(),
        ),
        SubscriptionUpdateStatement::subquery(EntityKind::Task, REPORT_TASKS, report.uuid),
    ];
    if let Some(location) = report.location_uuid {
        statements.push(SubscriptionUpdateStatement::uuids(EntityKind::Location, vec![location]));
    }
    if let Some(event) = report.event_uuid {
        statements.push(SubscriptionUpdateStatement::uuids(EntityKind::Event, vec![event]));
    }

    statements.retain(|s| !s.is_empty());
    statements
}

/// Statements for a note, assessment or attachment: one per linked kind plus
/// the item itself
pub fn statements_for_item(item: EntityRef, links: &[EntityRef]) -> Vec<SubscriptionUpdateStatement> {
    let mut by_kind: BTreeMap<EntityKind, Vec<Uuid>> = BTreeMap::new();
    for link in links {
        let uuids = by_kind.entry(link.kind()).or_default();
        if !uuids.contains(&link.uuid()) {
            uuids.push(link.uuid());
        }
    }
    let own = by_kind.entry(item.kind()).or_default();
    if !own.contains(&item.uuid()) {
        own.push(item.uuid());
    }

    by_kind
        .into_iter()
        .map(|(kind, uuids)| SubscriptionUpdateStatement::uuids(kind, uuids))
        .collect()
}

/// Build the merged stale-marking statement
pub fn build_update<'q>(
    statements: &[SubscriptionUpdateStatement],
    updated_at: DateTime<Utc>,
) -> Option<QueryBuilder<'q, Sqlite>> {
    if statements.is_empty() {
        return None;
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE subscriptions SET updated_at = ");
    builder.push_bind(time::to_db(&updated_at));
    builder.push(" WHERE ");
    for (i, statement) in statements.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push("(subscribed_object_type = ");
        builder.push_bind(statement.object_type.tag());
        builder.push(" AND subscribed_object_uuid IN ");
        match &statement.selector {
            Selector::Uuids(uuids) => crate::loader::sql::push_uuid_list(&mut builder, uuids),
            Selector::Subquery { sql, param } => {
                builder.push("(");
                // Subquery text is a compile-time constant; only its
                // parameter is bound
                let mut parts = sql.splitn(2, '?');
                builder.push(parts.next().unwrap_or_default());
                builder.push_bind(param.to_string());
                builder.push(parts.next().unwrap_or_default());
                builder.push(")");
            }
        }
        builder.push(")");
    }
    Some(builder)
}

/// Execute the merged statement; returns subscriptions marked
pub async fn mark_stale(
    conn: &mut SqliteConnection,
    statements: &[SubscriptionUpdateStatement],
    updated_at: DateTime<Utc>,
) -> Result<u64> {
    let Some(mut builder) = build_update(statements, updated_at) else {
        return Ok(0);
    };
    let result = builder.build().execute(conn).await?;
    debug!(
        "Marked {} subscriptions stale from {} statements",
        result.rows_affected(),
        statements.len()
    );
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anet_common::enums::ReportState;

    fn report(state: ReportState) -> Report {
        let mut report = Report::draft("intent", None);
        report.state = state;
        report
    }

    #[test]
    fn test_unpublished_report_yields_nothing() {
        for state in [
            ReportState::Draft,
            ReportState::PendingApproval,
            ReportState::Approved,
            ReportState::Rejected,
        ] {
            assert!(statements_for_report(&report(state)).is_empty(), "{} must not propagate", state);
        }
    }

    #[test]
    fn test_published_report_skips_missing_links() {
        let statements = statements_for_report(&report(ReportState::Published));
        let kinds: Vec<EntityKind> = statements.iter().map(|s| s.object_type).collect();
        assert_eq!(
            kinds,
            vec![EntityKind::Report, EntityKind::Person, EntityKind::Position, EntityKind::Task],
            "Organizations, location and event are absent on a bare report"
        );

        let mut full = report(ReportState::Cancelled);
        full.advisor_organization_uuid = Some(Uuid::new_v4());
        full.location_uuid = Some(Uuid::new_v4());
        full.event_uuid = Some(Uuid::new_v4());
        assert_eq!(statements_for_report(&full).len(), 7);
    }

    #[test]
    fn test_item_statements_group_by_kind() {
        let note = EntityRef::Note(Uuid::new_v4());
        let task = Uuid::new_v4();
        let links = [
            EntityRef::Task(task),
            EntityRef::Task(task),
            EntityRef::Person(Uuid::new_v4()),
        ];
        let statements = statements_for_item(note, &links);
        assert_eq!(statements.len(), 3, "Person, task and the note itself");
        let tasks = statements.iter().find(|s| s.object_type == EntityKind::Task).unwrap();
        assert_eq!(tasks.selector, Selector::Uuids(vec![task]), "Duplicate links collapse");
    }

    #[test]
    fn test_merged_update_is_one_statement() {
        let statements = vec![
            SubscriptionUpdateStatement::uuids(EntityKind::Report, vec![Uuid::new_v4()]),
            SubscriptionUpdateStatement::subquery(EntityKind::Task, REPORT_TASKS, Uuid::new_v4()),
        ];
        let builder = build_update(&statements, time::now()).unwrap();
        assert_eq!(
            builder.sql(),
            "UPDATE subscriptions SET updated_at = ? WHERE \
             (subscribed_object_type = ? AND subscribed_object_uuid IN (?)) OR \
             (subscribed_object_type = ? AND subscribed_object_uuid IN \
             (SELECT task_uuid FROM report_tasks WHERE report_uuid = ?))"
        );
        assert!(build_update(&[], time::now()).is_none());
    }
}
