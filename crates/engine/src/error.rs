//! Caller-facing error type with Sentry integration.
//!
//! Expected conditions (empty cart, absent key) are never errors. A
//! [`CartError`] means either the remote authority refused or failed the
//! operation, the input was invalid, or the engine was misused.

use cart_sync_core::UserId;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Error returned by the cart coordinator.
#[derive(Debug, Clone, Error)]
pub enum CartError {
    /// Remote operation failed; the cart is unchanged.
    #[error("Cart backend error: {0}")]
    Gateway(#[from] GatewayError),

    /// Called before any authentication signal was established.
    #[error("No authentication signal has been established")]
    AuthUnresolved,

    /// Quantity to add must be at least one.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// Product reference is empty.
    #[error("Invalid product reference")]
    InvalidProduct,

    /// The user signed in, out or switched accounts after the request was
    /// issued. The request was not applied to either cart.
    #[error("Authentication changed before the request ran")]
    ScopeChanged,

    /// The coordinator task has stopped.
    #[error("Cart coordinator has shut down")]
    Shutdown,
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

/// Telemetry severity of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Worth retrying later.
    Transient,
    /// Will fail again unchanged.
    Permanent,
    /// Programming error in the caller.
    Misuse,
}

impl CartError {
    /// Classify for logging. Callers treat all variants alike.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Gateway(err) if err.is_transient() => Severity::Transient,
            Self::Gateway(_)
            | Self::InvalidQuantity(_)
            | Self::InvalidProduct
            | Self::ScopeChanged => Severity::Permanent,
            Self::AuthUnresolved | Self::Shutdown => Severity::Misuse,
        }
    }

    /// Whether the caller should offer a retry affordance.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(err) if err.retryable)
    }

    /// Log and capture to Sentry when the error is worth reporting.
    ///
    /// Transient gateway failures are logged as warnings only; permanent
    /// failures and misuse are captured.
    pub fn report(&self) {
        match self.severity() {
            Severity::Transient => {
                tracing::warn!(error = %self, "Transient cart backend failure");
            }
            Severity::Permanent | Severity::Misuse => {
                if matches!(self, Self::InvalidQuantity(_) | Self::InvalidProduct) {
                    tracing::debug!(error = %self, "Rejected invalid cart input");
                    return;
                }
                if matches!(self, Self::ScopeChanged) {
                    tracing::info!("Dropped request issued before an authentication change");
                    return;
                }
                let event_id = sentry::capture_error(self);
                tracing::error!(
                    error = %self,
                    sentry_event_id = %event_id,
                    "Cart operation failed"
                );
            }
        }
    }
}

/// Set the Sentry user context from a user ID.
///
/// Called when the coordinator switches to a remote authority.
pub fn set_sentry_user(user_id: &UserId) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Called on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for cart state changes.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// operations leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
