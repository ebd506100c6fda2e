//! Audit trail
//!
//! Audit records are ordinary tracing events under a dedicated target so a
//! subscriber can route them to their own sink, e.g.
//! `RUST_LOG=info,anet_audit=info`.

/// Tracing target of audit records
pub const AUDIT_TARGET: &str = "anet_audit";

/// Emit an audit record
#[macro_export]
macro_rules! audit {
    ($($arg:tt)+) => {
        ::tracing::info!(target: $crate::audit::AUDIT_TARGET, $($arg)+)
    };
}
