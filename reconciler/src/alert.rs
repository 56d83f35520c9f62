//! Observability hook (SPEC_FULL supplement #3): spec §4.7/§7 mention "an
//! alerting hook" reached after 5 failed retries, without specifying what
//! it is. Kept as a trait so an operator can wire in a real paging system
//! without the Reconciler depending on one - the default implementation
//! just logs, matching how `shared`/`server` treat `log::error!` as the
//! terminal sink for unrecoverable conditions.

use wgmesh_types::NetworkId;

/// What kind of unrecoverable condition triggered the alert. A single
/// variant today - §7 names exactly one terminal condition (Store retries
/// exhausted) - but kept as an enum so a future failure mode doesn't need
/// a breaking trait change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    /// Five consecutive transient Store failures while reconciling a
    /// network; the affected artifacts are left stale in the Agent Hub
    /// queue pending the next reconnect or operator intervention.
    StoreRetriesExhausted,
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, network_id: NetworkId, kind: AlertKind, message: &str);
}

/// Default sink: `log::error!`, the terminal destination for any
/// unrecoverable condition in every `innernet` crate absent a real paging
/// integration.
#[derive(Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn alert(&self, network_id: NetworkId, kind: AlertKind, message: &str) {
        log::error!("alert[{kind:?}] network={network_id}: {message}");
    }
}
