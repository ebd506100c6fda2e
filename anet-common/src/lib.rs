//! # ANET Common Library
//!
//! Shared code for the ANET engagement-report engine:
//! - Error type and result alias
//! - Configuration and dictionary loading
//! - Entity kinds and polymorphic related-object links
//! - Ordinal-encoded enumerations persisted as small integers
//! - Database initialization, migrations and settings
//! - Event types and the EventBus
//! - Utility functions

pub mod config;
pub mod db;
pub mod dictionary;
pub mod entity;
pub mod enums;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;

pub use dictionary::{Dictionary, Recurrence};
pub use entity::{EntityKind, EntityRef, GenericRelatedObject};
pub use error::{Error, Result};
