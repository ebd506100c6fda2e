//! Assessment authorization
//!
//! Checked in three stages:
//! 1. [`validate`]: the key is defined, its recurrence is known, the payload
//!    carries the same recurrence and the links have the shape the recurrence
//!    requires. Failures are `Config` errors.
//! 2. [`gather_facts_many`]: one shared resolver round (two when instant
//!    assessments need step approvers) for everything the decisions need.
//! 3. [`decide`]: pure; an implicit grant from the recurrence, else the
//!    community check against the dictionary's read/write groups.

use super::{actor_groups, plan_actor_groups, Actor, Decision, Operation};
use crate::db::approval_steps::ApproversForStep;
use crate::db::assessments::Assessment;
use crate::db::positions::{AdministeredOrganizations, AssociatedPositions, CurrentPositionForPerson};
use crate::db::report_actions::ActionsForReport;
use crate::db::reports::{self, ReportById, ReportPeople};
use crate::db::tasks::{ResponsibleTasks, TaskSearchQuery};
use crate::loader::{BatchResolver, LoadPlan, Resolved, SearchTicket, Ticket};
use anet_common::dictionary::AssessmentDefinition;
use anet_common::entity::EntityRef;
use anet_common::{Dictionary, Error, Recurrence, Result};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Link layout an assessment's recurrence requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkShape {
    /// `once`: a report plus the person or task assessed on it
    Instant { report: Uuid, subject: EntityRef },
    /// `ondemand` and periodic: one person, organization or task
    Single(EntityRef),
}

/// An assessment that passed structural validation
#[derive(Debug, Clone)]
pub struct ValidatedAssessment<'d> {
    pub recurrence: Recurrence,
    pub shape: LinkShape,
    pub definition: &'d AssessmentDefinition,
}

/// Check the structural preconditions of an assessment
pub fn validate<'d>(
    dictionary: &'d Dictionary,
    assessment: &Assessment,
    links: &[EntityRef],
) -> Result<ValidatedAssessment<'d>> {
    if assessment.assessment_key.trim().is_empty() {
        return Err(Error::Config("Assessment key must be specified".to_string()));
    }
    let definition = dictionary.assessment(&assessment.assessment_key).ok_or_else(|| {
        Error::Config(format!("Assessment key '{}' not found in dictionary", assessment.assessment_key))
    })?;
    let recurrence = Recurrence::parse(&definition.recurrence).ok_or_else(|| {
        Error::Config(format!(
            "Assessment '{}' declares unknown recurrence '{}'",
            assessment.assessment_key, definition.recurrence
        ))
    })?;
    if assessment.payload_recurrence() != Some(definition.recurrence.as_str()) {
        return Err(Error::Config(format!(
            "Assessment payload recurrence does not match '{}'",
            definition.recurrence
        )));
    }
    if links.is_empty() {
        return Err(Error::Config("Assessment must have related objects".to_string()));
    }

    let shape = match recurrence {
        Recurrence::Once => instant_shape(links)?,
        Recurrence::OnDemand | Recurrence::Periodic(_) => {
            let [link] = links else {
                return Err(Error::Config(format!(
                    "{} assessment must have exactly one related object",
                    recurrence
                )));
            };
            match link {
                EntityRef::Person(_) | EntityRef::Organization(_) | EntityRef::Task(_) => LinkShape::Single(*link),
                other => {
                    return Err(Error::Config(format!(
                        "{} assessment must link to a person, organization or task, not {}",
                        recurrence,
                        other.kind()
                    )))
                }
            }
        }
    };

    Ok(ValidatedAssessment {
        recurrence,
        shape,
        definition,
    })
}

fn instant_shape(links: &[EntityRef]) -> Result<LinkShape> {
    let [first, second] = links else {
        return Err(Error::Config("Instant assessment must have two related objects".to_string()));
    };
    let (report, subject) = match (first, second) {
        (EntityRef::Report(report), subject) | (subject, EntityRef::Report(report)) => (*report, *subject),
        _ => return Err(Error::Config("Instant assessment must link to a report".to_string())),
    };
    match subject {
        EntityRef::Person(_) | EntityRef::Task(_) => Ok(LinkShape::Instant { report, subject }),
        _ => Err(Error::Config(
            "Instant assessment must link to a report and a person or task".to_string(),
        )),
    }
}

/// Everything [`decide`] needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    /// The recurrence grants access without the community check
    pub implicit_grant: bool,
    /// Authorization groups the actor belongs to
    pub groups: HashSet<Uuid>,
}

/// Tickets one assessment registered on the shared plan
enum Pending {
    Nothing,
    Instant {
        report: Ticket<ReportById>,
        people: Ticket<ReportPeople>,
        actions: Ticket<ActionsForReport>,
    },
    Task {
        task: Uuid,
        responsible: SearchTicket<ResponsibleTasks>,
    },
    Person {
        target: Ticket<CurrentPositionForPerson>,
        associated: Ticket<AssociatedPositions>,
    },
    Organization {
        organization: Uuid,
        administered: Ticket<AdministeredOrganizations>,
    },
}

/// Outcome of the first round for one assessment
enum Grant {
    Decided(bool),
    /// Granted if the actor's position approves any of these steps
    Approvers(Vec<Uuid>),
}

fn register(plan: &LoadPlan, actor: &Actor, validated: &ValidatedAssessment<'_>) -> Pending {
    match (validated.recurrence, validated.shape, actor.position_uuid()) {
        (Recurrence::Once, LinkShape::Instant { report, .. }, _) => Pending::Instant {
            report: plan.load(ReportById, report),
            people: plan.load(ReportPeople, report),
            actions: plan.load(ActionsForReport, report),
        },
        (Recurrence::Periodic(_), LinkShape::Single(EntityRef::Task(task)), Some(position)) => Pending::Task {
            task,
            responsible: plan.search(ResponsibleTasks, position, TaskSearchQuery::active()),
        },
        (Recurrence::Periodic(_), LinkShape::Single(EntityRef::Person(person)), Some(position)) => Pending::Person {
            target: plan.load(CurrentPositionForPerson, person),
            associated: plan.load(AssociatedPositions, position),
        },
        (Recurrence::Periodic(_), LinkShape::Single(EntityRef::Organization(organization)), Some(position)) => {
            Pending::Organization {
                organization,
                administered: plan.load(AdministeredOrganizations, position),
            }
        }
        _ => Pending::Nothing,
    }
}

fn first_round(resolved: &Resolved, actor: &Actor, pending: Pending) -> Result<Grant> {
    let decided = match pending {
        Pending::Nothing => false,
        Pending::Task { task, responsible } => resolved.search(&responsible)?.iter().any(|t| t.uuid == task),
        Pending::Person { target, associated } => match resolved.first(&target)? {
            Some(target) => resolved.get(&associated)?.iter().any(|p| p.uuid == target.uuid),
            None => false,
        },
        Pending::Organization {
            organization,
            administered,
        } => resolved.get(&administered)?.contains(&organization),
        Pending::Instant { report, people, actions } => {
            let report = resolved
                .first(&report)?
                .ok_or_else(|| Error::Config("Instant assessment links to a missing report".to_string()))?;
            if reports::authors(resolved.get(&people)?).any(|author| author == actor.person_uuid) {
                true
            } else if actor.position_uuid().is_none() {
                false
            } else {
                // Current step, or every step the report has passed through
                let steps = match report.approval_step_uuid {
                    Some(step) => vec![step],
                    None => {
                        let mut steps = Vec::new();
                        for step in resolved.get(&actions)?.iter().filter_map(|a| a.approval_step_uuid) {
                            if !steps.contains(&step) {
                                steps.push(step);
                            }
                        }
                        steps
                    }
                };
                return Ok(Grant::Approvers(steps));
            }
        }
    };
    Ok(Grant::Decided(decided))
}

/// Load the facts for one actor and many assessments
///
/// Every assessment registers on one shared plan, so a listing costs one
/// bulk query per loader and search query no matter how many items it holds.
/// Instant assessments whose grant depends on step approvers share one
/// follow-up round. A failure specific to one item fails only that item.
pub async fn gather_facts_many(
    resolver: &BatchResolver,
    actor: &Actor,
    items: &[&ValidatedAssessment<'_>],
) -> Result<Vec<Result<Facts>>> {
    let plan = resolver.plan();
    let group_tickets = plan_actor_groups(&plan, actor);
    let pending: Vec<Pending> = items.iter().map(|v| register(&plan, actor, v)).collect();
    let resolved = resolver.execute(plan).await;
    let groups = actor_groups(&resolved, &group_tickets)?;
    let grants: Vec<Result<Grant>> = pending
        .into_iter()
        .map(|p| first_round(&resolved, actor, p))
        .collect();

    let plan = resolver.plan();
    let approver_tickets: Vec<Option<Vec<Ticket<ApproversForStep>>>> = grants
        .iter()
        .map(|grant| match grant {
            Ok(Grant::Approvers(steps)) => Some(plan.load_all(ApproversForStep, steps.iter().copied())),
            _ => None,
        })
        .collect();
    let second = if plan.is_empty() {
        None
    } else {
        Some(resolver.execute(plan).await)
    };

    let position = actor.position_uuid();
    let mut facts = Vec::with_capacity(items.len());
    for (grant, tickets) in grants.into_iter().zip(approver_tickets) {
        let implicit_grant = match (grant, tickets, &second) {
            (Ok(Grant::Decided(granted)), _, _) => Ok(granted),
            (Ok(Grant::Approvers(_)), Some(tickets), Some(second)) => approves_any(second, &tickets, position),
            (Ok(Grant::Approvers(_)), _, _) => Ok(false),
            (Err(e), _, _) => Err(e),
        };
        facts.push(implicit_grant.map(|implicit_grant| Facts {
            implicit_grant,
            groups: groups.clone(),
        }));
    }
    Ok(facts)
}

fn approves_any(resolved: &Resolved, tickets: &[Ticket<ApproversForStep>], position: Option<Uuid>) -> Result<bool> {
    let Some(position) = position else {
        return Ok(false);
    };
    for ticket in tickets {
        if resolved.get(ticket)?.contains(&position) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Load the facts for one actor and assessment
pub async fn gather_facts(
    resolver: &BatchResolver,
    actor: &Actor,
    validated: &ValidatedAssessment<'_>,
) -> Result<Facts> {
    gather_facts_many(resolver, actor, &[validated])
        .await?
        .pop()
        .unwrap_or_else(|| Err(Error::Internal("No facts gathered for assessment".to_string())))
}

/// Community check against the dictionary's group lists
///
/// No read list means anyone may read and write access implies read access;
/// no write list means anyone may write.
pub fn community_allows(definition: &AssessmentDefinition, groups: &HashSet<Uuid>, operation: Operation) -> bool {
    let listed = |list: &Option<Vec<Uuid>>| list.iter().flatten().any(|group| groups.contains(group));
    if operation.is_read() {
        match &definition.read {
            None => true,
            Some(_) => listed(&definition.read) || listed(&definition.write),
        }
    } else {
        match &definition.write {
            None => true,
            Some(_) => listed(&definition.write),
        }
    }
}

/// Decide from validated input and gathered facts
pub fn decide(validated: &ValidatedAssessment<'_>, facts: &Facts, operation: Operation) -> Decision {
    if facts.implicit_grant {
        return Decision::Allow;
    }
    Decision::from(community_allows(validated.definition, &facts.groups, operation))
}

/// Authorize an operation on an assessment with the given links
pub async fn authorize_assessment(
    resolver: &BatchResolver,
    dictionary: &Dictionary,
    actor: &Actor,
    assessment: &Assessment,
    links: &[EntityRef],
    operation: Operation,
) -> Result<Decision> {
    if actor.is_privileged() {
        return Ok(Decision::Allow);
    }
    let validated = validate(dictionary, assessment, links)?;
    let facts = gather_facts(resolver, actor, &validated).await?;
    let decision = decide(&validated, &facts, operation);
    debug!(
        "Assessment {} ({}) {:?} by {}: {:?}",
        assessment.uuid, validated.recurrence, operation, actor.person_uuid, decision
    );
    Ok(decision)
}

/// Authorize one operation on many assessments in shared resolver rounds
///
/// Results follow input order. Structural problems and item-specific load
/// failures come back per item.
pub async fn authorize_assessments(
    resolver: &BatchResolver,
    dictionary: &Dictionary,
    actor: &Actor,
    items: &[(&Assessment, &[EntityRef])],
    operation: Operation,
) -> Result<Vec<Result<Decision>>> {
    if actor.is_privileged() {
        return Ok(items.iter().map(|_| Ok(Decision::Allow)).collect());
    }

    let validated: Vec<Result<ValidatedAssessment<'_>>> = items
        .iter()
        .map(|(assessment, links)| validate(dictionary, assessment, links))
        .collect();
    let valid: Vec<&ValidatedAssessment<'_>> = validated.iter().filter_map(|v| v.as_ref().ok()).collect();
    let mut facts = gather_facts_many(resolver, actor, &valid).await?.into_iter();

    let mut decisions = Vec::with_capacity(items.len());
    for validated in validated {
        let decision = match validated {
            Err(e) => Err(e),
            Ok(validated) => facts
                .next()
                .unwrap_or_else(|| Err(Error::Internal("Facts out of step with assessments".to_string())))
                .map(|facts| decide(&validated, &facts, operation)),
        };
        decisions.push(decision);
    }
    debug!(
        "Authorized {:?} on {} assessments for {}",
        operation,
        decisions.len(),
        actor.person_uuid
    );
    Ok(decisions)
}
