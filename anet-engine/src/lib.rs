//! ANET engagement-report engine
//!
//! Report approval workflow, subscription propagation and assessment
//! authorization over a SQLite store. All reads go through a request-scoped
//! [`loader::BatchResolver`]; every write runs in one transaction together
//! with the subscription updates it causes.

pub mod approval;
pub mod audit;
pub mod authz;
pub mod db;
pub mod items;
pub mod lifecycle;
pub mod loader;
pub mod notify;
pub mod propagation;

use anet_common::events::EventBus;
use anet_common::Dictionary;
use loader::BatchResolver;
use notify::EmailDispatcher;
use sqlx::SqlitePool;
use std::sync::Arc;

pub use lifecycle::{ReportEdit, ReportLifecycle, TransitionOutcome};

/// Long-lived engine dependencies shared by every request
#[derive(Clone)]
pub struct EngineContext {
    pub pool: SqlitePool,
    pub dictionary: Arc<Dictionary>,
    pub events: Arc<EventBus>,
    pub mailer: Arc<dyn EmailDispatcher>,
}

impl EngineContext {
    pub fn new(
        pool: SqlitePool,
        dictionary: Dictionary,
        events: Arc<EventBus>,
        mailer: Arc<dyn EmailDispatcher>,
    ) -> Self {
        Self {
            pool,
            dictionary: Arc::new(dictionary),
            events,
            mailer,
        }
    }

    /// Fresh resolver for one request
    pub fn resolver(&self) -> BatchResolver {
        BatchResolver::new(self.pool.clone())
    }
}
