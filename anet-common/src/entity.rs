//! Entity kinds and polymorphic related-object links
//!
//! Polymorphic links (assessment/note/attachment targets, authorization group
//! members) are stored as `(type tag, uuid)` pairs. In memory they are a closed
//! tagged union so every dispatch on the kind is an exhaustive match.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every addressable entity kind
///
/// The tag strings double as persisted `related_object_type` /
/// `subscribed_object_type` values and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Report,
    Person,
    Position,
    Organization,
    Task,
    Location,
    Event,
    Note,
    Assessment,
    Attachment,
    AuthorizationGroup,
}

impl EntityKind {
    /// All kinds, in declaration order
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Report,
        EntityKind::Person,
        EntityKind::Position,
        EntityKind::Organization,
        EntityKind::Task,
        EntityKind::Location,
        EntityKind::Event,
        EntityKind::Note,
        EntityKind::Assessment,
        EntityKind::Attachment,
        EntityKind::AuthorizationGroup,
    ];

    /// Persisted type tag
    pub fn tag(self) -> &'static str {
        match self {
            EntityKind::Report => "reports",
            EntityKind::Person => "people",
            EntityKind::Position => "positions",
            EntityKind::Organization => "organizations",
            EntityKind::Task => "tasks",
            EntityKind::Location => "locations",
            EntityKind::Event => "events",
            EntityKind::Note => "notes",
            EntityKind::Assessment => "assessments",
            EntityKind::Attachment => "attachments",
            EntityKind::AuthorizationGroup => "authorizationGroups",
        }
    }

    /// Look up a kind by its persisted tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Build a reference of this kind
    pub fn with_uuid(self, uuid: Uuid) -> EntityRef {
        match self {
            EntityKind::Report => EntityRef::Report(uuid),
            EntityKind::Person => EntityRef::Person(uuid),
            EntityKind::Position => EntityRef::Position(uuid),
            EntityKind::Organization => EntityRef::Organization(uuid),
            EntityKind::Task => EntityRef::Task(uuid),
            EntityKind::Location => EntityRef::Location(uuid),
            EntityKind::Event => EntityRef::Event(uuid),
            EntityKind::Note => EntityRef::Note(uuid),
            EntityKind::Assessment => EntityRef::Assessment(uuid),
            EntityKind::Attachment => EntityRef::Attachment(uuid),
            EntityKind::AuthorizationGroup => EntityRef::AuthorizationGroup(uuid),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s).ok_or_else(|| Error::InvalidInput(format!("Unknown entity type '{}'", s)))
    }
}

/// Typed reference to one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "uuid", rename_all = "camelCase")]
pub enum EntityRef {
    Report(Uuid),
    Person(Uuid),
    Position(Uuid),
    Organization(Uuid),
    Task(Uuid),
    Location(Uuid),
    Event(Uuid),
    Note(Uuid),
    Assessment(Uuid),
    Attachment(Uuid),
    AuthorizationGroup(Uuid),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Report(_) => EntityKind::Report,
            EntityRef::Person(_) => EntityKind::Person,
            EntityRef::Position(_) => EntityKind::Position,
            EntityRef::Organization(_) => EntityKind::Organization,
            EntityRef::Task(_) => EntityKind::Task,
            EntityRef::Location(_) => EntityKind::Location,
            EntityRef::Event(_) => EntityKind::Event,
            EntityRef::Note(_) => EntityKind::Note,
            EntityRef::Assessment(_) => EntityKind::Assessment,
            EntityRef::Attachment(_) => EntityKind::Attachment,
            EntityRef::AuthorizationGroup(_) => EntityKind::AuthorizationGroup,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match *self {
            EntityRef::Report(uuid)
            | EntityRef::Person(uuid)
            | EntityRef::Position(uuid)
            | EntityRef::Organization(uuid)
            | EntityRef::Task(uuid)
            | EntityRef::Location(uuid)
            | EntityRef::Event(uuid)
            | EntityRef::Note(uuid)
            | EntityRef::Assessment(uuid)
            | EntityRef::Attachment(uuid)
            | EntityRef::AuthorizationGroup(uuid) => uuid,
        }
    }

    /// Rebuild a reference from its persisted `(tag, uuid)` columns
    pub fn from_parts(tag: &str, uuid: &str) -> Result<Self> {
        let kind: EntityKind = tag.parse()?;
        Ok(kind.with_uuid(Uuid::parse_str(uuid)?))
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind().tag(), self.uuid())
    }
}

/// A polymorphic link from an owner (note, assessment, attachment,
/// authorization group) to any entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericRelatedObject {
    pub owner_uuid: Uuid,
    pub related: EntityRef,
}

impl GenericRelatedObject {
    pub fn new(owner_uuid: Uuid, related: EntityRef) -> Self {
        Self { owner_uuid, related }
    }
}
