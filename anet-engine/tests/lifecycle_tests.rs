//! Report lifecycle integration tests
//!
//! Each test runs against its own on-disk database.

mod common;

use anet_common::db::settings;
use anet_common::enums::{ApprovalStepType, PositionType, ReportActionType, ReportCancelledReason, ReportState};
use anet_common::Error;
use anet_engine::authz::Actor;
use anet_engine::db::approval_steps::{self, NewStep};
use anet_engine::db::report_actions::{self, ActionsForReport, ReportAction};
use anet_engine::db::reports::{self, Report, ReportPerson, StateUpdate};
use anet_engine::notify::EmailAction;
use anet_engine::{ReportEdit, ReportLifecycle};
use chrono::{Duration, Utc};
use common::TestWorld;
use uuid::Uuid;

/// Author and two approvers in one organization with a two-step report chain
struct TwoStepSetup {
    author: Uuid,
    first_approver: Uuid,
    second_approver: Uuid,
    steps: Vec<Uuid>,
}

async fn two_step_setup(world: &TestWorld, step_type: ApprovalStepType) -> TwoStepSetup {
    let org = world.organization("EF 1", None).await;
    let (author, _) = world.member("Author", Some(org), PositionType::Regular).await;
    let (first_approver, first_pos) = world.member("Approver1", Some(org), PositionType::Regular).await;
    let (second_approver, second_pos) = world.member("Approver2", Some(org), PositionType::Regular).await;
    let steps = world
        .chain(org, step_type, &[first_pos, second_pos])
        .await
        .iter()
        .map(|s| s.uuid)
        .collect();
    TwoStepSetup {
        author,
        first_approver,
        second_approver,
        steps,
    }
}

async fn actions(world: &TestWorld, report_uuid: Uuid) -> Vec<ReportAction> {
    world.ctx.resolver().load(ActionsForReport, report_uuid).await.unwrap()
}

async fn admin(world: &TestWorld) -> Actor {
    let (person, _) = world.member("Admin", None, PositionType::Administrator).await;
    world.actor(person).await
}

#[tokio::test]
async fn test_two_step_approval_walks_chain() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);

    let author = world.actor(setup.author).await;
    let outcome = lifecycle.submit(report.uuid, &author).await.unwrap();
    assert_eq!(outcome.previous_state, ReportState::Draft);
    assert_eq!(outcome.new_state, ReportState::PendingApproval);
    assert_eq!(outcome.approval_step_uuid, Some(setup.steps[0]));

    let recorded = actions(&world, report.uuid).await;
    assert_eq!(recorded.len(), 1, "submit writes exactly one action");
    assert_eq!(recorded[0].action_type, ReportActionType::Submit);
    assert!(!recorded[0].planned);

    let emails = world.drain_outbox();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].action, EmailAction::ApprovalNeeded);
    assert_eq!(emails[0].to_addresses, vec!["approver1@example.org".to_string()]);

    let first = world.actor(setup.first_approver).await;
    let outcome = lifecycle.approve(report.uuid, &first, setup.steps[0]).await.unwrap();
    assert_eq!(outcome.new_state, ReportState::PendingApproval);
    assert_eq!(outcome.approval_step_uuid, Some(setup.steps[1]));
    assert_eq!(
        world.drain_outbox()[0].to_addresses,
        vec!["approver2@example.org".to_string()]
    );

    let second = world.actor(setup.second_approver).await;
    let outcome = lifecycle.approve(report.uuid, &second, setup.steps[1]).await.unwrap();
    assert_eq!(outcome.new_state, ReportState::Approved);
    assert_eq!(outcome.approval_step_uuid, None);

    let stored = world.reload(report.uuid).await;
    assert_eq!(stored.state, ReportState::Approved);
    assert!(stored.approval_step_uuid.is_none());
    assert!(stored.released_at.is_none(), "released_at is only set on publish");

    let recorded = actions(&world, report.uuid).await;
    let types: Vec<ReportActionType> = recorded.iter().map(|a| a.action_type).collect();
    assert_eq!(
        types,
        vec![ReportActionType::Submit, ReportActionType::Approve, ReportActionType::Approve]
    );
    assert_eq!(recorded[1].approval_step_uuid, Some(setup.steps[0]));
    assert_eq!(recorded[2].approval_step_uuid, Some(setup.steps[1]));
}

#[tokio::test]
async fn test_approve_checks_step_and_approver() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);

    let author = world.actor(setup.author).await;
    lifecycle.submit(report.uuid, &author).await.unwrap();

    // Pending on the first step, not the second
    let second = world.actor(setup.second_approver).await;
    let err = lifecycle.approve(report.uuid, &second, setup.steps[1]).await.unwrap_err();
    assert!(err.is_state_conflict(), "got {:?}", err);

    let err = lifecycle.approve(report.uuid, &second, setup.steps[0]).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "non-approver got {:?}", err);

    let err = lifecycle.approve(report.uuid, &author, setup.steps[0]).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "author got {:?}", err);

    let stored = world.reload(report.uuid).await;
    assert_eq!(stored.approval_step_uuid, Some(setup.steps[0]));
    assert_eq!(actions(&world, report.uuid).await.len(), 1);
}

#[tokio::test]
async fn test_submit_preconditions() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);
    let author = world.actor(setup.author).await;

    let undated = Report::draft("No date yet", None);
    reports::insert_report(world.pool(), &undated).await.unwrap();
    reports::set_report_people(
        &mut *world.conn().await,
        undated.uuid,
        &[reports::ReportPerson::primary_author(setup.author)],
    )
    .await
    .unwrap();
    let err = lifecycle.submit(undated.uuid, &author).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {:?}", err);

    let report = world.report(setup.author, -1, None).await;
    let outsider = world.actor(setup.second_approver).await;
    let err = lifecycle.submit(report.uuid, &outsider).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "got {:?}", err);

    lifecycle.submit(report.uuid, &author).await.unwrap();
    let err = lifecycle.submit(report.uuid, &author).await.unwrap_err();
    assert!(err.is_state_conflict(), "second submit got {:?}", err);

    let err = lifecycle.submit(Uuid::new_v4(), &author).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_empty_planning_chain_auto_approves() {
    let world = TestWorld::new().await;
    let default_org = world.organization("Default", None).await;
    settings::set_default_approval_organization(world.pool(), default_org)
        .await
        .unwrap();
    let (author, _) = world.member("Author", None, PositionType::Regular).await;
    let report = world.report(author, 3, None).await;

    let lifecycle = ReportLifecycle::new(&world.ctx);
    let outcome = lifecycle.submit(report.uuid, &world.actor(author).await).await.unwrap();
    assert_eq!(outcome.new_state, ReportState::Approved);
    assert_eq!(outcome.approval_step_uuid, None);

    let recorded = actions(&world, report.uuid).await;
    let types: Vec<ReportActionType> = recorded.iter().map(|a| a.action_type).collect();
    assert_eq!(types, vec![ReportActionType::Submit, ReportActionType::Approve]);
    assert!(recorded.iter().all(|a| a.planned), "planned engagement actions carry the flag");
}

#[tokio::test]
async fn test_empty_report_chain_is_config_error_when_mandatory() {
    let world = TestWorld::new().await;
    let default_org = world.organization("Default", None).await;
    settings::set_default_approval_organization(world.pool(), default_org)
        .await
        .unwrap();
    let (author, _) = world.member("Author", None, PositionType::Regular).await;
    let report = world.report(author, -2, None).await;

    let lifecycle = ReportLifecycle::new(&world.ctx);
    let err = lifecycle
        .submit(report.uuid, &world.actor(author).await)
        .await
        .unwrap_err();
    assert!(err.is_config(), "got {:?}", err);

    let stored = world.reload(report.uuid).await;
    assert_eq!(stored.state, ReportState::Draft, "failed submit leaves the report untouched");
    assert!(actions(&world, report.uuid).await.is_empty());
}

#[tokio::test]
async fn test_missing_default_organization_is_config_error() {
    let world = TestWorld::new().await;
    let (author, _) = world.member("Author", None, PositionType::Regular).await;
    let report = world.report(author, -2, None).await;

    let err = ReportLifecycle::new(&world.ctx)
        .submit(report.uuid, &world.actor(author).await)
        .await
        .unwrap_err();
    assert!(err.is_config(), "got {:?}", err);
}

#[tokio::test]
async fn test_cancelled_report_approved_on_last_step() {
    let world = TestWorld::new().await;
    let org = world.organization("EF 2", None).await;
    let (author, _) = world.member("Author", Some(org), PositionType::Regular).await;
    let (approver, approver_pos) = world.member("Approver", Some(org), PositionType::Regular).await;
    let step = world.chain(org, ApprovalStepType::ReportApproval, &[approver_pos]).await[0].uuid;

    let mut report = Report::draft("Called off", Some(Utc::now() - Duration::days(1)));
    report.cancelled_reason = Some(ReportCancelledReason::CancelledDueToThreat);
    reports::insert_report(world.pool(), &report).await.unwrap();
    reports::set_report_people(&mut *world.conn().await, report.uuid, &[reports::ReportPerson::primary_author(author)])
        .await
        .unwrap();

    let lifecycle = ReportLifecycle::new(&world.ctx);
    lifecycle.submit(report.uuid, &world.actor(author).await).await.unwrap();
    let outcome = lifecycle
        .approve(report.uuid, &world.actor(approver).await, step)
        .await
        .unwrap();

    assert_eq!(outcome.new_state, ReportState::Cancelled);
    assert!(outcome.released_at.is_some());
    let stored = world.reload(report.uuid).await;
    assert_eq!(stored.state, ReportState::Cancelled);
    assert_eq!(stored.released_at, outcome.released_at);
}

#[tokio::test]
async fn test_publish_sets_released_at_and_emails_authors() {
    let world = TestWorld::new().await;
    let org = world.organization("EF 3", None).await;
    let (author, _) = world.member("Author", Some(org), PositionType::Regular).await;
    let (approver, approver_pos) = world.member("Approver", Some(org), PositionType::Regular).await;
    let step = world.chain(org, ApprovalStepType::ReportApproval, &[approver_pos]).await[0].uuid;
    let report = world.report(author, -1, None).await;

    let lifecycle = ReportLifecycle::new(&world.ctx);
    let author_actor = world.actor(author).await;
    lifecycle.submit(report.uuid, &author_actor).await.unwrap();
    lifecycle
        .approve(report.uuid, &world.actor(approver).await, step)
        .await
        .unwrap();
    let before = actions(&world, report.uuid).await.len();
    world.drain_outbox();

    let err = lifecycle
        .publish(report.uuid, &world.actor(approver).await)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "non-author got {:?}", err);

    let outcome = lifecycle.publish(report.uuid, &author_actor).await.unwrap();
    assert_eq!(outcome.new_state, ReportState::Published);
    let stored = world.reload(report.uuid).await;
    assert_eq!(stored.state, ReportState::Published);
    assert!(stored.released_at.is_some());

    let recorded = actions(&world, report.uuid).await;
    assert_eq!(recorded.len(), before + 1, "action history only grows");
    assert_eq!(recorded.last().map(|a| a.action_type), Some(ReportActionType::Publish));

    let emails = world.drain_outbox();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].action, EmailAction::ReportPublished);
    assert_eq!(emails[0].to_addresses, vec!["author@example.org".to_string()]);

    let err = lifecycle.publish(report.uuid, &author_actor).await.unwrap_err();
    assert!(err.is_state_conflict());
}

#[tokio::test]
async fn test_reject_records_note_and_allows_resubmit() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);
    let author = world.actor(setup.author).await;
    lifecycle.submit(report.uuid, &author).await.unwrap();
    world.drain_outbox();

    let err = lifecycle.reject(report.uuid, &author, "nope").await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "author got {:?}", err);

    let approver = world.actor(setup.first_approver).await;
    let outcome = lifecycle
        .reject(report.uuid, &approver, "Missing attendees")
        .await
        .unwrap();
    assert_eq!(outcome.new_state, ReportState::Rejected);
    assert_eq!(outcome.approval_step_uuid, None);

    let recorded = actions(&world, report.uuid).await;
    let reject = recorded.last().unwrap();
    assert_eq!(reject.action_type, ReportActionType::Reject);
    assert_eq!(reject.approval_step_uuid, Some(setup.steps[0]));

    let note_text: String = sqlx::query_scalar(
        "SELECT n.text FROM notes n JOIN note_related_objects r ON r.note_uuid = n.uuid WHERE r.related_object_uuid = ?",
    )
    .bind(report.uuid.to_string())
    .fetch_one(world.pool())
    .await
    .unwrap();
    assert_eq!(note_text, "Rejected: Missing attendees");

    let emails = world.drain_outbox();
    assert_eq!(emails[0].action, EmailAction::ReportRejected);

    let outcome = lifecycle.submit(report.uuid, &author).await.unwrap();
    assert_eq!(outcome.previous_state, ReportState::Rejected);
    assert_eq!(outcome.approval_step_uuid, Some(setup.steps[0]));
}

#[tokio::test]
async fn test_reject_approved_requires_admin() {
    let world = TestWorld::new().await;
    let org = world.organization("EF 4", None).await;
    let (author, _) = world.member("Author", Some(org), PositionType::Regular).await;
    let (approver, approver_pos) = world.member("Approver", Some(org), PositionType::Regular).await;
    let step = world.chain(org, ApprovalStepType::ReportApproval, &[approver_pos]).await[0].uuid;
    let report = world.report(author, -1, None).await;

    let lifecycle = ReportLifecycle::new(&world.ctx);
    lifecycle.submit(report.uuid, &world.actor(author).await).await.unwrap();
    let approver = world.actor(approver).await;
    lifecycle.approve(report.uuid, &approver, step).await.unwrap();

    let err = lifecycle.reject(report.uuid, &approver, "late").await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "got {:?}", err);

    let outcome = lifecycle.reject(report.uuid, &admin(&world).await, "").await.unwrap();
    assert_eq!(outcome.new_state, ReportState::Rejected);

    let notes = world
        .count(
            "SELECT COUNT(*) FROM note_related_objects WHERE related_object_uuid = ?",
            report.uuid,
        )
        .await;
    assert_eq!(notes, 0, "an empty reason records no note");
}

#[tokio::test]
async fn test_concurrent_approvals_single_winner() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);
    lifecycle
        .submit(report.uuid, &world.actor(setup.author).await)
        .await
        .unwrap();

    let admin = admin(&world).await;
    let first = ReportLifecycle::new(&world.ctx);
    let second = ReportLifecycle::new(&world.ctx);
    let (a, b) = tokio::join!(
        first.approve(report.uuid, &admin, setup.steps[0]),
        second.approve(report.uuid, &admin, setup.steps[0])
    );

    let results = [a, b];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one approval succeeds: {:?}", results);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(Error::is_state_conflict));

    let approvals = actions(&world, report.uuid)
        .await
        .iter()
        .filter(|a| a.action_type == ReportActionType::Approve)
        .count();
    assert_eq!(approvals, 1);
    assert_eq!(world.reload(report.uuid).await.approval_step_uuid, Some(setup.steps[1]));
}

#[tokio::test]
async fn test_sweep_returns_passed_planned_engagements_to_draft() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::PlanningApproval).await;
    let planned = world.report(setup.author, 2, None).await;
    let ordinary = world.report(setup.author, 2, None).await;

    let lifecycle = ReportLifecycle::new(&world.ctx);
    let outcome = lifecycle
        .submit(planned.uuid, &world.actor(setup.author).await)
        .await
        .unwrap();
    assert_eq!(outcome.approval_step_uuid, Some(setup.steps[0]), "planning chain applies");

    // Nothing has passed yet
    assert!(lifecycle.future_engagements_to_draft(Utc::now()).await.unwrap().is_empty());

    let outcomes = lifecycle
        .future_engagements_to_draft(Utc::now() + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].report_uuid, planned.uuid);
    assert_eq!(outcomes[0].previous_state, ReportState::PendingApproval);

    let stored = world.reload(planned.uuid).await;
    assert_eq!(stored.state, ReportState::Draft);
    assert!(stored.approval_step_uuid.is_none());
    assert_eq!(actions(&world, planned.uuid).await.len(), 1, "return to draft writes no action");
    assert_eq!(world.reload(ordinary.uuid).await.state, ReportState::Draft);
}

#[tokio::test]
async fn test_return_to_draft_from_draft_is_conflict() {
    let world = TestWorld::new().await;
    let (author, _) = world.member("Author", None, PositionType::Regular).await;
    let report = world.report(author, 1, None).await;
    let err = ReportLifecycle::new(&world.ctx)
        .return_to_draft(report.uuid)
        .await
        .unwrap_err();
    assert!(err.is_state_conflict());
}

#[tokio::test]
async fn test_delete_requires_admin_and_cascades() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);
    let author = world.actor(setup.author).await;
    lifecycle.submit(report.uuid, &author).await.unwrap();

    let err = lifecycle.delete(report.uuid, &author).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let admin = admin(&world).await;
    lifecycle.delete(report.uuid, &admin).await.unwrap();
    assert_eq!(
        world.count("SELECT COUNT(*) FROM report_actions WHERE report_uuid = ?", report.uuid).await,
        0
    );
    assert_eq!(
        world.count("SELECT COUNT(*) FROM report_people WHERE report_uuid = ?", report.uuid).await,
        0
    );

    let err = lifecycle.delete(report.uuid, &admin).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_restricted_step_admits_only_approvers_in_hierarchy() {
    let world = TestWorld::new().await;
    let top = world.organization("Top", None).await;
    let advisor = world.organization("Advisor", Some(top)).await;
    let outside = world.organization("Outside", None).await;
    let (author, _) = world.member("Author", Some(advisor), PositionType::Regular).await;
    let (near, near_pos) = world.member("Near", Some(top), PositionType::Regular).await;
    let (far, far_pos) = world.member("Far", Some(outside), PositionType::Regular).await;
    let steps = approval_steps::replace_chain(
        world.pool(),
        advisor,
        ApprovalStepType::ReportApproval,
        &[NewStep::new("Restricted", vec![near_pos, far_pos]).restricted()],
    )
    .await
    .unwrap();
    let report = world.report(author, -1, Some(advisor)).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);

    let outcome = lifecycle.submit(report.uuid, &world.actor(author).await).await.unwrap();
    assert_eq!(outcome.approval_step_uuid, Some(steps[0].uuid));
    let emails = world.drain_outbox();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to_addresses, vec!["near@example.org".to_string()]);

    let far = world.actor(far).await;
    let err = lifecycle.approve(report.uuid, &far, steps[0].uuid).await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "outside approver got {:?}", err);
    let err = lifecycle.reject(report.uuid, &far, "not mine").await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "outside approver got {:?}", err);
    assert_eq!(actions(&world, report.uuid).await.len(), 1);

    let outcome = lifecycle
        .approve(report.uuid, &world.actor(near).await, steps[0].uuid)
        .await
        .unwrap();
    assert_eq!(outcome.new_state, ReportState::Approved);
}

#[tokio::test]
async fn test_author_edit_returns_pending_report_to_draft() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);
    let author = world.actor(setup.author).await;
    lifecycle.submit(report.uuid, &author).await.unwrap();

    // The approver of the pending step edits in place
    let mut edit = ReportEdit::of(&world.reload(report.uuid).await);
    edit.intent = Some("Discuss training schedule".to_string());
    let outcome = lifecycle
        .edit(report.uuid, &world.actor(setup.first_approver).await, edit)
        .await
        .unwrap();
    assert_eq!(outcome.new_state, ReportState::PendingApproval);
    assert_eq!(outcome.approval_step_uuid, Some(setup.steps[0]));

    // The next approver is not on the current step
    let err = lifecycle
        .edit(
            report.uuid,
            &world.actor(setup.second_approver).await,
            ReportEdit::of(&world.reload(report.uuid).await),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "got {:?}", err);

    let mut edit = ReportEdit::of(&world.reload(report.uuid).await);
    edit.intent = Some("Discuss training budget".to_string());
    let outcome = lifecycle.edit(report.uuid, &author, edit).await.unwrap();
    assert_eq!(outcome.previous_state, ReportState::PendingApproval);
    assert_eq!(outcome.new_state, ReportState::Draft);
    assert_eq!(outcome.approval_step_uuid, None);

    let stored = world.reload(report.uuid).await;
    assert_eq!(stored.state, ReportState::Draft);
    assert!(stored.approval_step_uuid.is_none());
    assert_eq!(stored.intent.as_deref(), Some("Discuss training budget"));
    assert_eq!(actions(&world, report.uuid).await.len(), 1, "edits write no action");
}

#[tokio::test]
async fn test_edit_rules() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::ReportApproval).await;
    let report = world.report(setup.author, -1, None).await;
    let lifecycle = ReportLifecycle::new(&world.ctx);
    let author = world.actor(setup.author).await;

    let mut edit = ReportEdit::of(&report);
    edit.people = Some(vec![ReportPerson::attendee(setup.first_approver, false)]);
    let err = lifecycle.edit(report.uuid, &author, edit).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "authorless edit got {:?}", err);

    let mut edit = ReportEdit::of(&report);
    edit.tasks = Some(vec![Uuid::new_v4()]);
    let err = lifecycle.edit(report.uuid, &author, edit).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "unknown task got {:?}", err);

    let err = lifecycle
        .edit(report.uuid, &world.actor(setup.first_approver).await, ReportEdit::of(&report))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "non-author on draft got {:?}", err);

    lifecycle.submit(report.uuid, &author).await.unwrap();
    let first = world.actor(setup.first_approver).await;
    lifecycle.approve(report.uuid, &first, setup.steps[0]).await.unwrap();
    let second = world.actor(setup.second_approver).await;
    lifecycle.approve(report.uuid, &second, setup.steps[1]).await.unwrap();
    let admin = admin(&world).await;
    lifecycle.publish(report.uuid, &admin).await.unwrap();

    let published = world.reload(report.uuid).await;
    let err = lifecycle
        .edit(report.uuid, &author, ReportEdit::of(&published))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "author on published got {:?}", err);

    let outcome = lifecycle
        .edit(report.uuid, &admin, ReportEdit::of(&published))
        .await
        .unwrap();
    assert_eq!(outcome.new_state, ReportState::Published);
    assert_eq!(outcome.released_at, published.released_at);
}

#[tokio::test]
async fn test_sweep_skips_stepless_actions_when_finding_planning_history() {
    let world = TestWorld::new().await;
    let setup = two_step_setup(&world, ApprovalStepType::PlanningApproval).await;
    let report = world.report(setup.author, 1, None).await;
    let now = Utc::now();

    let mut conn = world.conn().await;
    for (step, action_type) in [
        (Some(setup.steps[0]), ReportActionType::Approve),
        (None, ReportActionType::Publish),
    ] {
        report_actions::insert_action(
            &mut conn,
            &ReportAction {
                report_uuid: report.uuid,
                approval_step_uuid: step,
                person_uuid: Some(setup.first_approver),
                action_type,
                planned: false,
                created_at: now,
            },
        )
        .await
        .unwrap();
    }
    let update = StateUpdate {
        state: ReportState::Approved,
        approval_step_uuid: None,
        released_at: None,
        updated_at: now,
    };
    let updated = reports::update_state_guarded(&mut conn, report.uuid, ReportState::Draft, None, &update)
        .await
        .unwrap();
    assert_eq!(updated, 1);
    drop(conn);

    // The latest action has no step; the latest stepped action is planning
    let found = reports::future_engagements_now_past(world.pool(), now + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(found.iter().map(|r| r.uuid).collect::<Vec<_>>(), vec![report.uuid]);
}
