//! Data access and batch loaders
//!
//! Each module owns one table family: its row type, its write operations and
//! the [`BatchLoader`](crate::loader::BatchLoader)s reading it.

pub mod approval_steps;
pub mod assessments;
pub mod attachments;
pub mod authorization_groups;
pub mod notes;
pub mod organizations;
pub mod people;
pub mod positions;
pub mod related;
pub mod report_actions;
pub mod reports;
pub mod subscriptions;
pub mod tasks;
