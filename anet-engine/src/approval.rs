//! Approval chain resolution
//!
//! The chain a report must pass is built from, in order:
//! 1. the chain of the author's organization (walking up parent organizations
//!    until one has a chain of the requested type, then falling back to the
//!    default approval organization),
//! 2. the chains of the report's tasks, in task order,
//! 3. the chain of the report's location.
//!
//! Restricted steps left without a qualified approver for the report's
//! advisor organization are dropped.
//!
//! Resolution is read-only and deterministic for a given report, step type
//! and store contents, so Approve can re-walk exactly the chain Submit used.

use crate::db::approval_steps::{ApprovalStep, ApproversForStep, StepsForObject};
use crate::db::organizations::OrganizationById;
use crate::db::positions::{CurrentPositionForPerson, PositionById};
use crate::db::reports::{self, Report, ReportPeople};
use crate::db::tasks::{TaskById, TaskedOrganizations, TasksForReport};
use crate::loader::BatchResolver;
use anet_common::db::settings;
use anet_common::enums::ApprovalStepType;
use anet_common::{Dictionary, Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Ordered approval steps for one report
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalChain {
    /// Organization whose chain heads the list; None if no organization
    /// chain contributed
    pub organization_uuid: Option<Uuid>,
    pub step_type: ApprovalStepType,
    pub steps: Vec<ApprovalStep>,
}

impl ApprovalChain {
    pub fn first(&self) -> Option<&ApprovalStep> {
        self.steps.first()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn contains(&self, step_uuid: Uuid) -> bool {
        self.steps.iter().any(|s| s.uuid == step_uuid)
    }

    /// Step following `step_uuid`; `Ok(None)` at the end of the chain
    pub fn next_after(&self, step_uuid: Uuid) -> Result<Option<&ApprovalStep>> {
        let position = self
            .steps
            .iter()
            .position(|s| s.uuid == step_uuid)
            .ok_or_else(|| Error::NotFound(format!("Approval step {} is not part of this chain", step_uuid)))?;
        Ok(self.steps.get(position + 1))
    }

    pub fn step_uuids(&self) -> Vec<Uuid> {
        self.steps.iter().map(|s| s.uuid).collect()
    }
}

/// Resolves approval chains through a request-scoped [`BatchResolver`]
pub struct ApprovalChainResolver<'a> {
    resolver: &'a BatchResolver,
    dictionary: &'a Dictionary,
}

impl<'a> ApprovalChainResolver<'a> {
    pub fn new(resolver: &'a BatchResolver, dictionary: &'a Dictionary) -> Self {
        Self { resolver, dictionary }
    }

    /// Full chain for a report; `planned` selects the planning chain
    pub async fn resolve(&self, report: &Report, planned: bool) -> Result<ApprovalChain> {
        let step_type = ApprovalStepType::for_planned(planned);

        let plan = self.resolver.plan();
        let people = plan.load(ReportPeople, report.uuid);
        let tasks = plan.load(TasksForReport, report.uuid);
        let resolved = self.resolver.execute(plan).await;
        let author = reports::authors(resolved.get(&people)?).next();
        let task_uuids: Vec<Uuid> = resolved.get(&tasks)?.iter().map(|t| t.uuid).collect();

        let author_org = match author {
            Some(person_uuid) => self
                .resolver
                .load(CurrentPositionForPerson, person_uuid)
                .await?
                .into_iter()
                .next()
                .and_then(|p| p.organization_uuid),
            None => None,
        };

        let (organization_uuid, mut steps) = self.organization_chain(author_org, step_type).await?;

        // Task and location chains, in one round
        let plan = self.resolver.plan();
        let task_tickets = plan.load_all(StepsForObject, task_uuids);
        let location_ticket = report.location_uuid.map(|uuid| plan.load(StepsForObject, uuid));
        let resolved = self.resolver.execute(plan).await;
        for ticket in task_tickets.iter().chain(location_ticket.iter()) {
            steps.extend(of_type(resolved.get(ticket)?, step_type));
        }

        // A restricted step nobody may approve does not apply, unless the
        // report is already pending on it
        if steps.iter().any(|s| s.restricted_approval) {
            let qualified = qualified_approvers(self.resolver, &steps, report.advisor_organization_uuid).await?;
            steps.retain(|step| {
                !step.restricted_approval
                    || Some(step.uuid) == report.approval_step_uuid
                    || qualified.get(&step.uuid).map_or(false, |a| !a.is_empty())
            });
        }

        debug!(
            "Resolved {} chain of {} steps for report {}",
            step_type,
            steps.len(),
            report.uuid
        );

        Ok(ApprovalChain {
            organization_uuid,
            step_type,
            steps,
        })
    }

    /// Chain of an organization, its nearest ancestor with one, or the default
    /// approval organization
    pub async fn organization_chain(
        &self,
        start: Option<Uuid>,
        step_type: ApprovalStepType,
    ) -> Result<(Option<Uuid>, Vec<ApprovalStep>)> {
        let mut visited = HashSet::new();
        let mut cursor = start;

        while let Some(org_uuid) = cursor {
            if !visited.insert(org_uuid) {
                return Err(Error::Internal(format!("Organization hierarchy loops at {}", org_uuid)));
            }
            let plan = self.resolver.plan();
            let org = plan.load(OrganizationById, org_uuid);
            let chain = plan.load(StepsForObject, org_uuid);
            let resolved = self.resolver.execute(plan).await;

            let steps = of_type(resolved.get(&chain)?, step_type);
            if !steps.is_empty() {
                return Ok((Some(org_uuid), steps));
            }
            cursor = resolved.first(&org)?.and_then(|o| o.parent_org_uuid);
        }

        let default_org = self.default_organization().await?;
        if visited.contains(&default_org) {
            return Ok((None, Vec::new()));
        }

        let plan = self.resolver.plan();
        let org = plan.load(OrganizationById, default_org);
        let chain = plan.load(StepsForObject, default_org);
        let resolved = self.resolver.execute(plan).await;
        if resolved.first(&org)?.is_none() {
            return Err(Error::NotFound(format!(
                "Default approval organization {} does not exist",
                default_org
            )));
        }

        Ok((Some(default_org), of_type(resolved.get(&chain)?, step_type)))
    }

    /// Setting in the store wins over the dictionary
    async fn default_organization(&self) -> Result<Uuid> {
        settings::get_default_approval_organization(self.resolver.pool())
            .await?
            .or(self.dictionary.default_approval_organization)
            .ok_or_else(|| Error::Config("No default approval organization is configured".to_string()))
    }
}

fn of_type(steps: &[ApprovalStep], step_type: ApprovalStepType) -> Vec<ApprovalStep> {
    steps.iter().filter(|s| s.step_type == step_type).cloned().collect()
}

/// Each organization mapped to itself and its ancestors
///
/// Walks all hierarchies together, one round per level. Unknown
/// organizations map to an empty set.
pub async fn ancestors_of(
    resolver: &BatchResolver,
    organizations: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, HashSet<Uuid>>> {
    let mut ancestors: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    let mut frontier: Vec<(Uuid, Uuid)> = Vec::new();
    for org in organizations {
        if !ancestors.contains_key(&org) {
            ancestors.insert(org, HashSet::new());
            frontier.push((org, org));
        }
    }

    while !frontier.is_empty() {
        let plan = resolver.plan();
        let tickets = plan.load_all(OrganizationById, frontier.iter().map(|(_, cursor)| *cursor));
        let resolved = resolver.execute(plan).await;

        let mut next = Vec::new();
        for ((origin, cursor), ticket) in frontier.into_iter().zip(&tickets) {
            let Some(org) = resolved.first(ticket)? else {
                continue;
            };
            let seen = ancestors.entry(origin).or_default();
            if !seen.insert(cursor) {
                return Err(Error::Internal(format!("Organization hierarchy loops at {}", cursor)));
            }
            if let Some(parent) = org.parent_org_uuid {
                next.push((origin, parent));
            }
        }
        frontier = next;
    }

    Ok(ancestors)
}

/// Approver positions that may act on each step for a report of
/// `advisor_org`, keyed by step
///
/// Unrestricted steps keep every approver. A restricted step keeps only
/// approvers whose organization or one of its ancestors is in scope. The
/// scope is the advisor organization and its ancestors, narrowed to the
/// tasked organizations when the step belongs to a task.
pub async fn qualified_approvers(
    resolver: &BatchResolver,
    steps: &[ApprovalStep],
    advisor_org: Option<Uuid>,
) -> Result<HashMap<Uuid, Vec<Uuid>>> {
    let restricted: Vec<&ApprovalStep> = steps.iter().filter(|s| s.restricted_approval).collect();

    let plan = resolver.plan();
    let approver_tickets = plan.load_all(ApproversForStep, steps.iter().map(|s| s.uuid));
    let task_tickets: Vec<_> = restricted
        .iter()
        .map(|s| {
            (
                plan.load(TaskById, s.related_object_uuid),
                plan.load(TaskedOrganizations, s.related_object_uuid),
            )
        })
        .collect();
    let resolved = resolver.execute(plan).await;

    let mut approvers = HashMap::new();
    for (step, ticket) in steps.iter().zip(&approver_tickets) {
        approvers.insert(step.uuid, resolved.get(ticket)?.to_vec());
    }
    if restricted.is_empty() {
        return Ok(approvers);
    }

    let mut tasked: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for (step, (task, orgs)) in restricted.iter().zip(&task_tickets) {
        if resolved.first(task)?.is_some() {
            tasked.insert(step.uuid, resolved.get(orgs)?.iter().copied().collect());
        }
    }

    let positions: Vec<Uuid> = restricted
        .iter()
        .flat_map(|s| approvers.get(&s.uuid).into_iter().flatten().copied())
        .collect();
    let position_orgs: HashMap<Uuid, Uuid> = positions
        .iter()
        .zip(resolver.load_many(PositionById, positions.clone()).await?)
        .filter_map(|(uuid, rows)| rows.first().and_then(|p| p.organization_uuid).map(|org| (*uuid, org)))
        .collect();
    let ancestors = ancestors_of(resolver, advisor_org.into_iter().chain(position_orgs.values().copied())).await?;
    let advisor_scope = advisor_org
        .and_then(|org| ancestors.get(&org))
        .cloned()
        .unwrap_or_default();

    for step in restricted {
        let scope: HashSet<Uuid> = match tasked.get(&step.uuid) {
            Some(tasked) => advisor_scope.intersection(tasked).copied().collect(),
            None => advisor_scope.clone(),
        };
        let kept: Vec<Uuid> = approvers
            .get(&step.uuid)
            .into_iter()
            .flatten()
            .copied()
            .filter(|position| {
                position_orgs
                    .get(position)
                    .and_then(|org| ancestors.get(org))
                    .map_or(false, |orgs| !orgs.is_disjoint(&scope))
            })
            .collect();
        debug!(
            "Restricted step {} keeps {} approver(s) for advisor organization {:?}",
            step.uuid,
            kept.len(),
            advisor_org
        );
        approvers.insert(step.uuid, kept);
    }

    Ok(approvers)
}

/// Approver positions that may act on one step
pub async fn approvers_of(resolver: &BatchResolver, step: &ApprovalStep, advisor_org: Option<Uuid>) -> Result<Vec<Uuid>> {
    Ok(qualified_approvers(resolver, std::slice::from_ref(step), advisor_org)
        .await?
        .remove(&step.uuid)
        .unwrap_or_default())
}
