//! Authorization of note and assessment operations
//!
//! Denials are values ([`Decision::Deny`]); structural problems with the item
//! being authorized are `Config` errors. Mutation paths turn a denial into
//! `Forbidden`.

pub mod assessment;
pub mod note;

use crate::db::people::PersonById;
use crate::db::positions::CurrentPositionForPerson;
use crate::db::related::{GroupMembers, OwnersOf};
use crate::loader::{BatchResolver, LoadPlan, Resolved, Ticket};
use anet_common::enums::PositionType;
use anet_common::{Error, Result};
use std::collections::HashSet;
use uuid::Uuid;

/// Operation on an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn is_read(self) -> bool {
        self == Operation::Read
    }
}

/// Authorization outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    /// Turn a denial into `Forbidden`
    pub fn require(self, what: impl FnOnce() -> String) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(Error::Forbidden(what())),
        }
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Position held by the actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorPosition {
    pub uuid: Uuid,
    pub position_type: PositionType,
    pub organization_uuid: Option<Uuid>,
}

/// Who is performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub person_uuid: Uuid,
    pub position: Option<ActorPosition>,
    /// Scheduler or other internal caller
    pub is_system: bool,
}

impl Actor {
    /// Internal caller; passes every check
    pub fn system() -> Self {
        Self {
            person_uuid: Uuid::nil(),
            position: None,
            is_system: true,
        }
    }

    /// Load a person and their current position
    pub async fn load(resolver: &BatchResolver, person_uuid: Uuid) -> Result<Self> {
        let plan = resolver.plan();
        let person = plan.load(PersonById, person_uuid);
        let position = plan.load(CurrentPositionForPerson, person_uuid);
        let resolved = resolver.execute(plan).await;

        if resolved.first(&person)?.is_none() {
            return Err(Error::NotFound(format!("Person {} not found", person_uuid)));
        }
        let position = resolved.first(&position)?.map(|p| ActorPosition {
            uuid: p.uuid,
            position_type: p.position_type,
            organization_uuid: p.organization_uuid,
        });

        Ok(Self {
            person_uuid,
            position,
            is_system: false,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.position
            .map_or(false, |p| p.position_type == PositionType::Administrator)
    }

    /// Administrators and the system actor bypass item checks
    pub fn is_privileged(&self) -> bool {
        self.is_system || self.is_admin()
    }

    pub fn position_uuid(&self) -> Option<Uuid> {
        self.position.map(|p| p.uuid)
    }

    /// Uuids an authorization group may list to include this actor
    fn membership_keys(&self) -> Vec<Uuid> {
        let mut keys = vec![self.person_uuid];
        if let Some(position) = self.position {
            keys.push(position.uuid);
            keys.extend(position.organization_uuid);
        }
        keys
    }
}

/// Tickets for the authorization groups an actor belongs to
pub(crate) fn plan_actor_groups(plan: &LoadPlan, actor: &Actor) -> Vec<Ticket<OwnersOf<GroupMembers>>> {
    plan.load_all(OwnersOf::<GroupMembers>::default(), actor.membership_keys())
}

pub(crate) fn actor_groups(resolved: &Resolved, tickets: &[Ticket<OwnersOf<GroupMembers>>]) -> Result<HashSet<Uuid>> {
    let mut groups = HashSet::new();
    for ticket in tickets {
        groups.extend(resolved.get(ticket)?.iter().copied());
    }
    Ok(groups)
}
