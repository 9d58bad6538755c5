//! Guest to authenticated merge outcome and policy hook.

use std::sync::Arc;

use cart_sync_core::{Cart, LineItem, UserId};
use tracing::{info, warn};

use crate::gateway::GatewayError;

/// Outcome of one merge run.
#[derive(Debug, Clone)]
pub struct MergeReport {
    /// Account the guest lines were merged into.
    pub user_id: UserId,
    /// Guest lines the backend accepted.
    pub replayed: Vec<LineItem>,
    /// Guest lines the backend refused or never answered for. They are gone.
    pub dropped: Vec<LineItem>,
    /// Remote cart fetched after the replay, `None` if that fetch failed.
    pub cart: Option<Cart>,
}

impl MergeReport {
    pub(crate) const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            replayed: Vec::new(),
            dropped: Vec::new(),
            cart: None,
        }
    }

    /// Whether every guest line made it to the remote cart.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.dropped.is_empty()
    }

    /// Whether there was nothing to merge.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.replayed.is_empty() && self.dropped.is_empty()
    }
}

/// Policy hook invoked while merging.
///
/// Both methods have logging defaults. Implementations run on the
/// coordinator task and must not block.
pub trait MergeLineHook: Send + Sync {
    /// A guest line could not be replayed and has been discarded.
    fn on_merge_line_dropped(&self, line: &LineItem, error: &GatewayError) {
        warn!(
            product_id = %line.product_id,
            quantity = line.quantity,
            error = %error,
            "Dropped guest line during merge"
        );
    }

    /// The merge finished, successfully or not.
    fn on_merge_complete(&self, report: &MergeReport) {
        info!(
            user_id = %report.user_id,
            replayed = report.replayed.len(),
            dropped = report.dropped.len(),
            "Guest cart merge complete"
        );
    }
}

/// Hook that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMergeHook;

impl MergeLineHook for LoggingMergeHook {}

impl<H: MergeLineHook + ?Sized> MergeLineHook for Arc<H> {
    fn on_merge_line_dropped(&self, line: &LineItem, error: &GatewayError) {
        (**self).on_merge_line_dropped(line, error);
    }

    fn on_merge_complete(&self, report: &MergeReport) {
        (**self).on_merge_complete(report);
    }
}
