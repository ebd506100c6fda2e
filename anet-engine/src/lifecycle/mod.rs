//! Report lifecycle state machine
//!
//! ```text
//! DRAFT ──submit──▶ PENDING_APPROVAL ──approve (last step)──▶ APPROVED ──publish──▶ PUBLISHED
//!   ▲                 │      │  ▲                               │
//!   │                 │      └──┘ approve (next step)           │
//!   │                 │                                         │
//!   │                 ├──approve (last step, cancelled reason)──┼──▶ CANCELLED
//!   │                 └──reject──▶ REJECTED ◀──reject (admin)───┘
//!   └──────return to draft (engagement date passed)──────────────
//! ```
//!
//! An author's edit also sends an unpublished report back to DRAFT.
//!
//! Each transition reads everything it needs through one request-scoped
//! resolver, then opens a transaction that performs a guarded state update,
//! appends the audit actions and marks subscriptions stale. A guarded update
//! that matches no row means another transition won; the transaction rolls
//! back with `StateConflict`. Emails and bus events go out only after commit.

pub mod sweep;

use crate::approval::{approvers_of, ApprovalChainResolver};
use crate::audit;
use crate::authz::Actor;
use crate::db::approval_steps::StepById;
use crate::db::notes::{self, Note};
use crate::db::report_actions::{self, ActionsForReport, ReportAction};
use crate::db::reports::{self, Report, ReportById, ReportPeople, ReportPerson, StateUpdate};
use crate::db::tasks::{self, TaskById};
use crate::loader::BatchResolver;
use crate::notify::{self, EmailAction, OutboundEmail};
use crate::propagation;
use crate::EngineContext;
use anet_common::entity::EntityRef;
use anet_common::enums::{ReportActionType, ReportCancelledReason, ReportState};
use anet_common::events::AnetEvent;
use anet_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one successful transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub report_uuid: Uuid,
    pub previous_state: ReportState,
    pub new_state: ReportState,
    /// Pending step after the transition
    pub approval_step_uuid: Option<Uuid>,
    pub released_at: Option<DateTime<Utc>>,
    /// Subscriptions marked stale by this transition
    pub subscriptions_marked: u64,
}

/// Everything a transition reads about a report before writing
struct ReportContext {
    report: Report,
    people: Vec<ReportPerson>,
    actions: Vec<ReportAction>,
}

impl ReportContext {
    fn authors(&self) -> Vec<Uuid> {
        reports::authors(&self.people).collect()
    }

    fn is_author(&self, actor: &Actor) -> bool {
        !actor.is_system && reports::authors(&self.people).any(|a| a == actor.person_uuid)
    }
}

/// A state change waiting to be committed
struct PendingTransition {
    expected_state: ReportState,
    expected_step: Option<Uuid>,
    update: StateUpdate,
    actions: Vec<ReportAction>,
    /// Note recorded alongside the transition (rejection reason)
    note: Option<Note>,
}

/// Content change to a report; lifecycle columns are not editable
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEdit {
    pub intent: Option<String>,
    pub engagement_date: Option<DateTime<Utc>>,
    pub cancelled_reason: Option<ReportCancelledReason>,
    pub advisor_organization_uuid: Option<Uuid>,
    pub interlocutor_organization_uuid: Option<Uuid>,
    pub location_uuid: Option<Uuid>,
    pub event_uuid: Option<Uuid>,
    /// Replacement people; None keeps the current ones
    pub people: Option<Vec<ReportPerson>>,
    /// Replacement tasks in order; None keeps the current ones
    pub tasks: Option<Vec<Uuid>>,
}

impl ReportEdit {
    /// An edit that changes nothing yet
    pub fn of(report: &Report) -> Self {
        Self {
            intent: report.intent.clone(),
            engagement_date: report.engagement_date,
            cancelled_reason: report.cancelled_reason,
            advisor_organization_uuid: report.advisor_organization_uuid,
            interlocutor_organization_uuid: report.interlocutor_organization_uuid,
            location_uuid: report.location_uuid,
            event_uuid: report.event_uuid,
            people: None,
            tasks: None,
        }
    }

    fn apply(&self, report: &mut Report) {
        report.intent = self.intent.clone();
        report.engagement_date = self.engagement_date;
        report.cancelled_reason = self.cancelled_reason;
        report.advisor_organization_uuid = self.advisor_organization_uuid;
        report.interlocutor_organization_uuid = self.interlocutor_organization_uuid;
        report.location_uuid = self.location_uuid;
        report.event_uuid = self.event_uuid;
    }
}

/// Lifecycle operations for one request
pub struct ReportLifecycle<'a> {
    ctx: &'a EngineContext,
    resolver: BatchResolver,
}

impl<'a> ReportLifecycle<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self {
            ctx,
            resolver: ctx.resolver(),
        }
    }

    pub fn resolver(&self) -> &BatchResolver {
        &self.resolver
    }

    async fn load(&self, report_uuid: Uuid) -> Result<ReportContext> {
        let plan = self.resolver.plan();
        let report = plan.load(ReportById, report_uuid);
        let people = plan.load(ReportPeople, report_uuid);
        let actions = plan.load(ActionsForReport, report_uuid);
        let resolved = self.resolver.execute(plan).await;

        let report = resolved
            .first(&report)?
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Report {} not found", report_uuid)))?;
        Ok(ReportContext {
            report,
            people: resolved.get(&people)?.to_vec(),
            actions: resolved.get(&actions)?.to_vec(),
        })
    }

    /// Submit a draft (or rejected) report into its approval chain
    ///
    /// An empty chain auto-approves when the dictionary makes that kind of
    /// approval optional, and is a `Config` error otherwise.
    pub async fn submit(&self, report_uuid: Uuid, actor: &Actor) -> Result<TransitionOutcome> {
        let rc = self.load(report_uuid).await?;
        let report = &rc.report;

        if !matches!(report.state, ReportState::Draft | ReportState::Rejected) {
            return Err(Error::StateConflict(format!(
                "Report {} cannot be submitted from {}",
                report_uuid, report.state
            )));
        }
        if !actor.is_privileged() && !rc.is_author(actor) {
            return Err(Error::Forbidden(format!("Only an author may submit report {}", report_uuid)));
        }
        if report.engagement_date.is_none() {
            return Err(Error::InvalidInput(format!("Report {} has no engagement date", report_uuid)));
        }

        let now = time::now();
        let planned = report.is_future_engagement(now);
        let chain = ApprovalChainResolver::new(&self.resolver, &self.ctx.dictionary)
            .resolve(report, planned)
            .await?;

        let mut actions = vec![action(report_uuid, None, actor, ReportActionType::Submit, planned, now)];
        let (state, step) = match chain.first() {
            Some(first) => (ReportState::PendingApproval, Some(first.uuid)),
            None if self.ctx.dictionary.approval_optional(planned) => {
                actions.push(action(report_uuid, None, actor, ReportActionType::Approve, planned, now));
                (ReportState::Approved, None)
            }
            None => {
                return Err(Error::Config(format!(
                    "No {} chain applies to report {} and approval is mandatory",
                    chain.step_type, report_uuid
                )))
            }
        };

        let outcome = self
            .commit(
                report,
                PendingTransition {
                    expected_state: report.state,
                    expected_step: report.approval_step_uuid,
                    update: StateUpdate {
                        state,
                        approval_step_uuid: step,
                        released_at: None,
                        updated_at: now,
                    },
                    actions,
                    note: None,
                },
            )
            .await?;

        if let Some(step) = step {
            self.notify_approvers(report, step, &rc.authors()).await;
        }
        self.ctx.events.emit_lossy(AnetEvent::ReportSubmitted {
            report_uuid,
            new_state: state,
            approval_step_uuid: step,
            timestamp: now,
        });
        audit!(
            "Report {} submitted by {} ({} steps, planned={})",
            report_uuid,
            actor.person_uuid,
            chain.len(),
            planned
        );
        Ok(outcome)
    }

    /// Approve the step a report is pending on
    ///
    /// The chain is re-resolved with the planning flag recorded at submission,
    /// so approval walks the same chain even after the engagement date passes.
    pub async fn approve(&self, report_uuid: Uuid, actor: &Actor, current_step: Uuid) -> Result<TransitionOutcome> {
        let rc = self.load(report_uuid).await?;
        let report = &rc.report;

        if report.state != ReportState::PendingApproval || report.approval_step_uuid != Some(current_step) {
            return Err(Error::StateConflict(format!(
                "Report {} is not pending on step {} (state {})",
                report_uuid, current_step, report.state
            )));
        }
        if !actor.is_privileged() {
            if rc.is_author(actor) {
                return Err(Error::Forbidden(format!(
                    "Authors cannot approve their own report {}",
                    report_uuid
                )));
            }
            self.require_step_approver(report, actor, current_step).await?;
        }

        let now = time::now();
        let planned = report_actions::last_planned_flag(&rc.actions, ReportActionType::Submit)
            .unwrap_or_else(|| report.is_future_engagement(now));
        let chain = ApprovalChainResolver::new(&self.resolver, &self.ctx.dictionary)
            .resolve(report, planned)
            .await?;
        let next = chain.next_after(current_step)?.map(|s| s.uuid);

        let (state, released_at) = match (next, report.cancelled_reason) {
            (Some(_), _) => (ReportState::PendingApproval, None),
            (None, Some(_)) => (ReportState::Cancelled, Some(now)),
            (None, None) => (ReportState::Approved, None),
        };

        let outcome = self
            .commit(
                report,
                PendingTransition {
                    expected_state: ReportState::PendingApproval,
                    expected_step: Some(current_step),
                    update: StateUpdate {
                        state,
                        approval_step_uuid: next,
                        released_at,
                        updated_at: now,
                    },
                    actions: vec![action(
                        report_uuid,
                        Some(current_step),
                        actor,
                        ReportActionType::Approve,
                        planned,
                        now,
                    )],
                    note: None,
                },
            )
            .await?;

        if let Some(next) = next {
            self.notify_approvers(report, next, &rc.authors()).await;
        }
        self.ctx.events.emit_lossy(AnetEvent::ReportApproved {
            report_uuid,
            step_uuid: current_step,
            next_step_uuid: next,
            timestamp: now,
        });
        if state == ReportState::Cancelled {
            self.ctx.events.emit_lossy(AnetEvent::ReportCancelled {
                report_uuid,
                timestamp: now,
            });
        }
        audit!(
            "Report {} step {} approved by {}, now {}",
            report_uuid,
            current_step,
            actor.person_uuid,
            state
        );
        Ok(outcome)
    }

    /// Return a report to its authors
    ///
    /// Allowed while pending by an approver of the current step, or once
    /// approved by an administrator.
    pub async fn reject(&self, report_uuid: Uuid, actor: &Actor, reason: &str) -> Result<TransitionOutcome> {
        let rc = self.load(report_uuid).await?;
        let report = &rc.report;

        match report.state {
            ReportState::PendingApproval => {
                if !actor.is_privileged() {
                    let step = report.approval_step_uuid.ok_or_else(|| {
                        Error::Internal(format!("Pending report {} has no approval step", report_uuid))
                    })?;
                    self.require_step_approver(report, actor, step).await?;
                }
            }
            ReportState::Approved => {
                if !actor.is_privileged() {
                    return Err(Error::Forbidden(format!(
                        "Only an administrator may reject approved report {}",
                        report_uuid
                    )));
                }
            }
            other => {
                return Err(Error::StateConflict(format!(
                    "Report {} cannot be rejected from {}",
                    report_uuid, other
                )))
            }
        }

        let now = time::now();
        let planned = report_actions::last_planned_flag(&rc.actions, ReportActionType::Submit).unwrap_or(false);
        let note = (!reason.trim().is_empty() && !actor.is_system).then(|| {
            let mut note = Note::new(actor.person_uuid, format!("Rejected: {}", reason.trim()));
            note.created_at = now;
            note.updated_at = now;
            note
        });

        let outcome = self
            .commit(
                report,
                PendingTransition {
                    expected_state: report.state,
                    expected_step: report.approval_step_uuid,
                    update: StateUpdate {
                        state: ReportState::Rejected,
                        approval_step_uuid: None,
                        released_at: None,
                        updated_at: now,
                    },
                    actions: vec![action(
                        report_uuid,
                        report.approval_step_uuid,
                        actor,
                        ReportActionType::Reject,
                        planned,
                        now,
                    )],
                    note,
                },
            )
            .await?;

        self.notify_authors(EmailAction::ReportRejected, report_uuid, &rc.authors())
            .await;
        self.ctx.events.emit_lossy(AnetEvent::ReportRejected {
            report_uuid,
            timestamp: now,
        });
        audit!("Report {} rejected by {}: {}", report_uuid, actor.person_uuid, reason);
        Ok(outcome)
    }

    /// Publish an approved report
    ///
    /// The PUBLISH action copies the planned flag of the last recorded action
    /// so schedulers still recognize a formerly planned engagement.
    pub async fn publish(&self, report_uuid: Uuid, actor: &Actor) -> Result<TransitionOutcome> {
        let rc = self.load(report_uuid).await?;
        let report = &rc.report;

        if report.state != ReportState::Approved {
            return Err(Error::StateConflict(format!(
                "Report {} cannot be published from {}",
                report_uuid, report.state
            )));
        }
        if !actor.is_privileged() && !rc.is_author(actor) {
            return Err(Error::Forbidden(format!("Only an author may publish report {}", report_uuid)));
        }

        let now = time::now();
        let planned = rc.actions.last().map_or(false, |a| a.planned);

        let outcome = self
            .commit(
                report,
                PendingTransition {
                    expected_state: ReportState::Approved,
                    expected_step: report.approval_step_uuid,
                    update: StateUpdate {
                        state: ReportState::Published,
                        approval_step_uuid: None,
                        released_at: Some(now),
                        updated_at: now,
                    },
                    actions: vec![action(report_uuid, None, actor, ReportActionType::Publish, planned, now)],
                    note: None,
                },
            )
            .await?;

        self.notify_authors(EmailAction::ReportPublished, report_uuid, &rc.authors())
            .await;
        self.ctx.events.emit_lossy(AnetEvent::ReportPublished {
            report_uuid,
            timestamp: now,
        });
        audit!("Report {} published by {}", report_uuid, actor.person_uuid);
        Ok(outcome)
    }

    /// Move a report whose planned engagement has passed back to draft
    ///
    /// Clears the pending step and release time and writes no action.
    pub async fn return_to_draft(&self, report_uuid: Uuid) -> Result<TransitionOutcome> {
        let rc = self.load(report_uuid).await?;
        let report = &rc.report;

        if !matches!(
            report.state,
            ReportState::Approved | ReportState::Rejected | ReportState::PendingApproval | ReportState::Published
        ) {
            return Err(Error::StateConflict(format!(
                "Report {} cannot return to draft from {}",
                report_uuid, report.state
            )));
        }

        let now = time::now();
        let outcome = self
            .commit(
                report,
                PendingTransition {
                    expected_state: report.state,
                    expected_step: report.approval_step_uuid,
                    update: StateUpdate {
                        state: ReportState::Draft,
                        approval_step_uuid: None,
                        released_at: None,
                        updated_at: now,
                    },
                    actions: Vec::new(),
                    note: None,
                },
            )
            .await?;

        self.ctx.events.emit_lossy(AnetEvent::ReportReturnedToDraft {
            report_uuid,
            previous_state: report.state,
            timestamp: now,
        });
        audit!("Report {} returned to draft from {}", report_uuid, report.state);
        Ok(outcome)
    }

    /// Edit a report's content, people and tasks
    ///
    /// Authors may edit until publication and their edit sends the report
    /// back to draft. An approver of the pending step edits without changing
    /// state. Published reports are edited by administrators only. The edit,
    /// any state change and the stale-marking commit together.
    pub async fn edit(&self, report_uuid: Uuid, actor: &Actor, edit: ReportEdit) -> Result<TransitionOutcome> {
        let rc = self.load(report_uuid).await?;
        let report = &rc.report;
        let is_author = rc.is_author(actor);

        match report.state {
            ReportState::Published => {
                if !actor.is_privileged() {
                    return Err(Error::Forbidden(format!(
                        "Only an administrator may edit published report {}",
                        report_uuid
                    )));
                }
            }
            ReportState::PendingApproval if !actor.is_privileged() && !is_author => {
                let step = report.approval_step_uuid.ok_or_else(|| {
                    Error::Internal(format!("Pending report {} has no approval step", report_uuid))
                })?;
                self.require_step_approver(report, actor, step).await?;
            }
            _ => {
                if !actor.is_privileged() && !is_author {
                    return Err(Error::Forbidden(format!("Only an author may edit report {}", report_uuid)));
                }
            }
        }
        if let Some(people) = &edit.people {
            if reports::authors(people).next().is_none() {
                return Err(Error::InvalidInput(format!("Report {} must keep an author", report_uuid)));
            }
        }
        if let Some(task_uuids) = &edit.tasks {
            let known = self.resolver.load_many(TaskById, task_uuids.clone()).await?;
            if let Some((missing, _)) = task_uuids.iter().zip(&known).find(|(_, rows)| rows.is_empty()) {
                return Err(Error::InvalidInput(format!("Task {} does not exist", missing)));
            }
        }

        let now = time::now();
        let back_to_draft = is_author && report.state != ReportState::Published;
        let mut after = report.clone();
        edit.apply(&mut after);
        after.updated_at = now;
        if back_to_draft {
            after.state = ReportState::Draft;
            after.approval_step_uuid = None;
            after.released_at = None;
        }
        let statements = propagation::statements_for_report(&after);

        let mut tx = self.ctx.pool.begin().await?;
        let updated =
            reports::update_report_content(&mut *tx, &after, report.state, report.approval_step_uuid).await?;
        if updated == 0 {
            return Err(Error::StateConflict(format!(
                "Report {} changed concurrently; expected {} on step {:?}",
                report_uuid, report.state, report.approval_step_uuid
            )));
        }
        if after.state != report.state {
            let update = StateUpdate {
                state: after.state,
                approval_step_uuid: None,
                released_at: None,
                updated_at: now,
            };
            reports::update_state_guarded(&mut *tx, report_uuid, report.state, report.approval_step_uuid, &update)
                .await?;
        }
        if let Some(people) = &edit.people {
            reports::set_report_people(&mut *tx, report_uuid, people).await?;
        }
        if let Some(task_uuids) = &edit.tasks {
            tasks::set_report_tasks(&mut *tx, report_uuid, task_uuids).await?;
        }
        let marked = propagation::mark_stale(&mut *tx, &statements, now).await?;
        tx.commit().await?;

        if marked > 0 {
            self.ctx.events.emit_lossy(AnetEvent::SubscriptionsMarkedStale {
                source: EntityRef::Report(report_uuid),
                count: marked,
                timestamp: now,
            });
        }
        self.ctx.events.emit_lossy(AnetEvent::ReportEdited {
            report_uuid,
            previous_state: report.state,
            new_state: after.state,
            timestamp: now,
        });
        audit!(
            "Report {} edited by {} ({} -> {}, {} subscriptions marked)",
            report_uuid,
            actor.person_uuid,
            report.state,
            after.state,
            marked
        );
        Ok(TransitionOutcome {
            report_uuid,
            previous_state: report.state,
            new_state: after.state,
            approval_step_uuid: after.approval_step_uuid,
            released_at: after.released_at,
            subscriptions_marked: marked,
        })
    }

    /// Remove a report and everything hanging off it
    pub async fn delete(&self, report_uuid: Uuid, actor: &Actor) -> Result<()> {
        if !actor.is_privileged() {
            return Err(Error::Forbidden(format!(
                "Only an administrator may delete report {}",
                report_uuid
            )));
        }

        let mut tx = self.ctx.pool.begin().await?;
        let deleted = reports::delete_report_cascade(&mut *tx, report_uuid).await?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Report {} not found", report_uuid)));
        }
        tx.commit().await?;

        audit!("Report {} deleted by {}", report_uuid, actor.person_uuid);
        Ok(())
    }

    /// Guarded update, actions and propagation in one transaction
    async fn commit(&self, report: &Report, pending: PendingTransition) -> Result<TransitionOutcome> {
        let mut after = report.clone();
        after.state = pending.update.state;
        after.approval_step_uuid = pending.update.approval_step_uuid;
        after.released_at = pending.update.released_at;
        after.updated_at = pending.update.updated_at;
        let statements = propagation::statements_for_report(&after);

        let mut tx = self.ctx.pool.begin().await?;
        let updated = reports::update_state_guarded(
            &mut *tx,
            report.uuid,
            pending.expected_state,
            pending.expected_step,
            &pending.update,
        )
        .await?;
        if updated == 0 {
            // Dropping the transaction rolls it back
            return Err(Error::StateConflict(format!(
                "Report {} changed concurrently; expected {} on step {:?}",
                report.uuid, pending.expected_state, pending.expected_step
            )));
        }
        for action in &pending.actions {
            report_actions::insert_action(&mut *tx, action).await?;
        }
        if let Some(note) = &pending.note {
            notes::insert_note(&mut *tx, note, &[EntityRef::Report(report.uuid)]).await?;
        }
        let marked = propagation::mark_stale(&mut *tx, &statements, after.updated_at).await?;
        tx.commit().await?;

        info!(
            "Report {}: {} -> {} (step {:?})",
            report.uuid, report.state, after.state, after.approval_step_uuid
        );
        if marked > 0 {
            self.ctx.events.emit_lossy(AnetEvent::SubscriptionsMarkedStale {
                source: EntityRef::Report(report.uuid),
                count: marked,
                timestamp: after.updated_at,
            });
        }

        Ok(TransitionOutcome {
            report_uuid: report.uuid,
            previous_state: report.state,
            new_state: after.state,
            approval_step_uuid: after.approval_step_uuid,
            released_at: after.released_at,
            subscriptions_marked: marked,
        })
    }

    /// Fail unless the actor holds a position that may approve the step
    async fn require_step_approver(&self, report: &Report, actor: &Actor, step_uuid: Uuid) -> Result<()> {
        let step = self
            .resolver
            .load(StepById, step_uuid)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("Approval step {} not found", step_uuid)))?;
        let approvers = approvers_of(&self.resolver, &step, report.advisor_organization_uuid).await?;
        if !actor.position_uuid().map_or(false, |p| approvers.contains(&p)) {
            return Err(Error::Forbidden(format!(
                "Actor {} is not an approver of step {}",
                actor.person_uuid, step_uuid
            )));
        }
        Ok(())
    }

    async fn notify_approvers(&self, report: &Report, step_uuid: Uuid, authors: &[Uuid]) {
        match notify::approver_addresses(&self.resolver, step_uuid, report.advisor_organization_uuid, authors).await {
            Ok(addresses) => self.send(EmailAction::ApprovalNeeded, report.uuid, addresses),
            Err(e) => warn!("Could not resolve approvers of step {}: {}", step_uuid, e),
        }
    }

    async fn notify_authors(&self, email_action: EmailAction, report_uuid: Uuid, authors: &[Uuid]) {
        match notify::person_addresses(&self.resolver, authors).await {
            Ok(addresses) => self.send(email_action, report_uuid, addresses),
            Err(e) => warn!("Could not resolve authors of report {}: {}", report_uuid, e),
        }
    }

    fn send(&self, action: EmailAction, report_uuid: Uuid, to_addresses: Vec<String>) {
        if to_addresses.is_empty() {
            debug!("No recipients for {:?} on report {}", action, report_uuid);
            return;
        }
        if let Err(e) = self.ctx.mailer.dispatch(OutboundEmail {
            action,
            report_uuid,
            to_addresses,
        }) {
            warn!("Failed to queue {:?} email for report {}: {}", action, report_uuid, e);
        }
    }
}

fn action(
    report_uuid: Uuid,
    approval_step_uuid: Option<Uuid>,
    actor: &Actor,
    action_type: ReportActionType,
    planned: bool,
    created_at: DateTime<Utc>,
) -> ReportAction {
    ReportAction {
        report_uuid,
        approval_step_uuid,
        person_uuid: (!actor.is_system).then_some(actor.person_uuid),
        action_type,
        planned,
        created_at,
    }
}
