//! Outbound email notifications
//!
//! The lifecycle hands each notification to an [`EmailDispatcher`] after its
//! transaction commits. The default dispatcher is an unbounded queue drained
//! by whatever delivers mail.

use crate::approval::approvers_of;
use crate::db::approval_steps::StepById;
use crate::db::people::PersonById;
use crate::db::positions::PositionById;
use crate::loader::BatchResolver;
use anet_common::{Error, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why an email is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailAction {
    /// Report waits on a step the recipients approve
    ApprovalNeeded,
    ReportPublished,
    ReportRejected,
}

/// One queued email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub action: EmailAction,
    pub report_uuid: Uuid,
    pub to_addresses: Vec<String>,
}

/// Sink for outbound email
pub trait EmailDispatcher: Send + Sync {
    fn dispatch(&self, email: OutboundEmail) -> Result<()>;
}

/// Queue-backed dispatcher
#[derive(Debug, Clone)]
pub struct EmailQueue {
    tx: mpsc::UnboundedSender<OutboundEmail>,
}

impl EmailQueue {
    /// Create a queue and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEmail>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EmailDispatcher for EmailQueue {
    fn dispatch(&self, email: OutboundEmail) -> Result<()> {
        self.tx
            .send(email)
            .map_err(|_| Error::Internal("Email queue receiver dropped".to_string()))
    }
}

/// Addresses of the people currently holding the positions that may approve
/// a step for a report of `advisor_org`, skipping `exclude`
pub async fn approver_addresses(
    resolver: &BatchResolver,
    step_uuid: Uuid,
    advisor_org: Option<Uuid>,
    exclude: &[Uuid],
) -> Result<Vec<String>> {
    let step = resolver
        .load(StepById, step_uuid)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("Approval step {} not found", step_uuid)))?;
    let positions = approvers_of(resolver, &step, advisor_org).await?;

    let holders: Vec<Uuid> = resolver
        .load_many(PositionById, positions)
        .await?
        .into_iter()
        .flatten()
        .filter_map(|p| p.current_person_uuid)
        .filter(|person| !exclude.contains(person))
        .collect();

    person_addresses(resolver, &holders).await
}

/// Email addresses of people, deduplicated, in input order
pub async fn person_addresses(resolver: &BatchResolver, people: &[Uuid]) -> Result<Vec<String>> {
    let mut addresses: Vec<String> = Vec::new();
    for person in resolver.load_many(PersonById, people.to_vec()).await?.into_iter().flatten() {
        if let Some(address) = person.email_address.filter(|a| !a.trim().is_empty()) {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
    }
    Ok(addresses)
}
