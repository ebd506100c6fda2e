//! Future engagements whose date has passed
//!
//! Run periodically by an external scheduler. A report that was approved (or
//! is still in approval) as a planned engagement must be re-submitted as an
//! ordinary report once the engagement has happened.

use super::{ReportLifecycle, TransitionOutcome};
use crate::db::reports;
use anet_common::{Error, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

impl ReportLifecycle<'_> {
    /// Return every planned report whose engagement date is at or before
    /// `now` to draft
    ///
    /// A report changed concurrently between the scan and its update is
    /// skipped and picked up by the next run.
    pub async fn future_engagements_to_draft(&self, now: DateTime<Utc>) -> Result<Vec<TransitionOutcome>> {
        let candidates = reports::future_engagements_now_past(self.resolver().pool(), now).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        info!("{} planned engagements have passed", candidates.len());

        let mut outcomes = Vec::with_capacity(candidates.len());
        for report in candidates {
            match self.return_to_draft(report.uuid).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(Error::StateConflict(reason)) => {
                    warn!("Skipping report {}: {}", report.uuid, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }
}
