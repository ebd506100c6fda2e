//! Batched relational resolution
//!
//! A request-scoped [`BatchResolver`] collapses many id, foreign-key and
//! search lookups into one bulk query per distinct loader (and, for search
//! loaders, one per distinct query value). Callers register keys on a
//! [`LoadPlan`], execute it once, then read each caller's results from the
//! returned [`Resolved`] map in registration order.
//!
//! A miss is an empty list, never an error. A failing bulk query fails only
//! the tickets waiting on that loader or search partition.

mod plan;
pub mod sql;

pub use plan::{BatchResolver, LoadPlan, LoaderStats, Resolved, ResolverStats, SearchTicket, Ticket};

use anet_common::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

/// Id or foreign-key loader
///
/// `load` receives distinct keys and returns every matching row tagged with
/// the key it belongs to. An empty key slice is the sentinel execution: the
/// loader still issues its statement and the result is discarded.
#[async_trait]
pub trait BatchLoader: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Send + Sync + 'static;

    /// Loader name used in logs, statistics and errors
    const NAME: &'static str;

    async fn load(
        &self,
        pool: &SqlitePool,
        keys: &[Self::Key],
    ) -> Result<Vec<(Self::Key, Self::Value)>>;
}

/// Search loader keyed by `(owner uuid, query)`
///
/// `search` runs one query value restricted to a set of owners and tags each
/// row with the batch uuid of the owner it was found for.
#[async_trait]
pub trait SearchLoader: Send + Sync + 'static {
    type Query: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Send + Sync + 'static;

    const NAME: &'static str;

    async fn search(
        &self,
        pool: &SqlitePool,
        query: &Self::Query,
        owners: &[Uuid],
    ) -> Result<Vec<(Uuid, Self::Value)>>;
}
