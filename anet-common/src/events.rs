//! Event types for the ANET event system
//!
//! Lifecycle and item events are emitted after their transaction commits.

use crate::entity::EntityRef;
use crate::enums::ReportState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// ANET event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnetEvent {
    /// Report submitted into its approval chain (or auto-approved)
    ReportSubmitted {
        report_uuid: Uuid,
        /// Resulting state (PENDING_APPROVAL or APPROVED)
        new_state: ReportState,
        /// First pending step, if any
        approval_step_uuid: Option<Uuid>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A step was approved
    ReportApproved {
        report_uuid: Uuid,
        /// Step that was approved
        step_uuid: Uuid,
        /// Next pending step; None when the chain is complete
        next_step_uuid: Option<Uuid>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Report returned to its authors
    ReportRejected {
        report_uuid: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Report published
    ReportPublished {
        report_uuid: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Last step approved on a report carrying a cancellation reason
    ReportCancelled {
        report_uuid: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Future engagement whose date passed, returned to draft
    ReportReturnedToDraft {
        report_uuid: Uuid,
        previous_state: ReportState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Report content, people or tasks edited
    ReportEdited {
        report_uuid: Uuid,
        previous_state: ReportState,
        /// DRAFT when an author's edit sent the report back
        new_state: ReportState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Subscriptions marked stale by one mutation
    SubscriptionsMarkedStale {
        /// Mutated entity
        source: EntityRef,
        /// Number of subscription rows touched
        count: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Note, assessment or attachment created, updated or deleted
    ItemChanged {
        item: EntityRef,
        deleted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Wraps a tokio broadcast channel. Slow receivers lag and lose the oldest
/// events rather than blocking emitters.
pub struct EventBus {
    tx: broadcast::Sender<AnetEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use anet_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AnetEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: AnetEvent) -> Result<usize, broadcast::error::SendError<AnetEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AnetEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
