//! Ordinal-encoded enumerations
//!
//! Every enum here is persisted as a small integer equal to its position in
//! the declaration. Reordering a declaration silently corrupts historical rows,
//! so new values are only ever appended.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Conversion between an enum and its persisted ordinal
pub trait Ordinal: Sized + Copy {
    /// Persisted integer value
    fn ordinal(self) -> i64;

    /// Decode a persisted integer value
    fn from_ordinal(value: i64) -> Option<Self>;

    /// Decode a persisted integer value, failing on unknown ordinals
    fn decode(value: i64) -> Result<Self> {
        Self::from_ordinal(value).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Unknown ordinal {} for {}",
                value,
                std::any::type_name::<Self>()
            ))
        })
    }
}

macro_rules! ordinal_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl Ordinal for $name {
            fn ordinal(self) -> i64 {
                match self {
                    $( $name::$variant => $value ),+
                }
            }

            fn from_ordinal(value: i64) -> Option<Self> {
                match value {
                    $( $value => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( $name::$variant => write!(f, $label) ),+
                }
            }
        }
    };
}

ordinal_enum! {
    /// Report lifecycle state
    pub enum ReportState {
        Draft = 0 => "DRAFT",
        PendingApproval = 1 => "PENDING_APPROVAL",
        Published = 2 => "PUBLISHED",
        Rejected = 3 => "REJECTED",
        Cancelled = 4 => "CANCELLED",
        /// Legacy value kept so old rows still decode; never written
        Future = 5 => "FUTURE",
        Approved = 6 => "APPROVED",
    }
}

impl ReportState {
    /// States whose changes are propagated to subscribers
    pub fn is_subscription_worthy(self) -> bool {
        matches!(self, ReportState::Published | ReportState::Cancelled)
    }
}

ordinal_enum! {
    /// Kind of an immutable report action row
    pub enum ReportActionType {
        Approve = 0 => "APPROVE",
        Reject = 1 => "REJECT",
        Submit = 2 => "SUBMIT",
        Publish = 3 => "PUBLISH",
    }
}

ordinal_enum! {
    /// Which approval chain a step belongs to
    pub enum ApprovalStepType {
        /// Pre-approval of engagements still in the future
        PlanningApproval = 0 => "PLANNING_APPROVAL",
        ReportApproval = 1 => "REPORT_APPROVAL",
    }
}

impl ApprovalStepType {
    /// Chain type to resolve for a report
    pub fn for_planned(planned: bool) -> Self {
        if planned {
            ApprovalStepType::PlanningApproval
        } else {
            ApprovalStepType::ReportApproval
        }
    }
}

ordinal_enum! {
    /// Position privilege level
    pub enum PositionType {
        Regular = 0 => "REGULAR",
        Superuser = 1 => "SUPERUSER",
        Administrator = 2 => "ADMINISTRATOR",
    }
}

ordinal_enum! {
    /// Task status
    pub enum TaskStatus {
        Active = 0 => "ACTIVE",
        Inactive = 1 => "INACTIVE",
    }
}

ordinal_enum! {
    /// Reason an engagement was cancelled
    pub enum ReportCancelledReason {
        CancelledByAdvisor = 0 => "CANCELLED_BY_ADVISOR",
        CancelledByInterlocutor = 1 => "CANCELLED_BY_INTERLOCUTOR",
        CancelledDueToTransportation = 2 => "CANCELLED_DUE_TO_TRANSPORTATION",
        CancelledDueToForceProtection = 3 => "CANCELLED_DUE_TO_FORCE_PROTECTION",
        CancelledDueToRoutes = 4 => "CANCELLED_DUE_TO_ROUTES",
        CancelledDueToThreat = 5 => "CANCELLED_DUE_TO_THREAT",
        NoReasonGiven = 6 => "NO_REASON_GIVEN",
        CancelledDueToAvailabilityOfInterpreters = 7 => "CANCELLED_DUE_TO_AVAILABILITY_OF_INTERPRETERS",
        CancelledDueToNetworkIssues = 8 => "CANCELLED_DUE_TO_NETWORK_ISSUES",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_state_ordinals_are_stable() {
        assert_eq!(ReportState::Draft.ordinal(), 0);
        assert_eq!(ReportState::PendingApproval.ordinal(), 1);
        assert_eq!(ReportState::Published.ordinal(), 2);
        assert_eq!(ReportState::Rejected.ordinal(), 3);
        assert_eq!(ReportState::Cancelled.ordinal(), 4);
        assert_eq!(ReportState::Future.ordinal(), 5);
        assert_eq!(ReportState::Approved.ordinal(), 6);
    }

    #[test]
    fn test_action_type_ordinals_are_stable() {
        assert_eq!(ReportActionType::Approve.ordinal(), 0);
        assert_eq!(ReportActionType::Reject.ordinal(), 1);
        assert_eq!(ReportActionType::Submit.ordinal(), 2);
        assert_eq!(ReportActionType::Publish.ordinal(), 3);
    }

    #[test]
    fn test_decode_round_trips_and_rejects_unknown() {
        for value in 0..=8 {
            let reason = ReportCancelledReason::decode(value).unwrap();
            assert_eq!(reason.ordinal(), value);
        }
        assert!(ReportCancelledReason::decode(9).is_err());
        assert!(ReportState::decode(-1).is_err());
    }

    #[test]
    fn test_only_published_and_cancelled_propagate() {
        assert!(ReportState::Published.is_subscription_worthy());
        assert!(ReportState::Cancelled.is_subscription_worthy());
        assert!(!ReportState::Draft.is_subscription_worthy());
        assert!(!ReportState::PendingApproval.is_subscription_worthy());
        assert!(!ReportState::Approved.is_subscription_worthy());
    }

    #[test]
    fn test_display_uses_screaming_names() {
        assert_eq!(ReportState::PendingApproval.to_string(), "PENDING_APPROVAL");
        assert_eq!(ApprovalStepType::for_planned(true).to_string(), "PLANNING_APPROVAL");
    }
}
