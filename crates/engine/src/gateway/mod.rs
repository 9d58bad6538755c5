//! Remote cart gateway.
//!
//! # Architecture
//!
//! - [`CartGateway`] is the transport seam: every operation answers with the
//!   post-operation [`Cart`] snapshot or a [`GatewayError`]
//! - [`HttpCartGateway`] speaks the backend's REST cart contract via `reqwest`
//! - The gateway never retries; retry policy belongs to the caller
//!
//! Every call acts on behalf of a [`RemoteIdentity`], so an operation without a
//! credential cannot be expressed.

mod http;
mod wire;

use std::future::Future;

use cart_sync_core::{Cart, CartOwner, Credential, LineId, ProductId, UserId, Variant};
use thiserror::Error;

pub use http::HttpCartGateway;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// The authenticated identity a remote call acts for.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    /// Owner of the remote cart.
    pub user_id: UserId,
    /// Bearer credential.
    pub credential: Credential,
}

impl RemoteIdentity {
    /// Bundle a user id and credential.
    #[must_use]
    pub const fn new(user_id: UserId, credential: Credential) -> Self {
        Self {
            user_id,
            credential,
        }
    }

    /// Cart owner scope for snapshots fetched with this identity.
    #[must_use]
    pub fn owner(&self) -> CartOwner {
        CartOwner::User(self.user_id.clone())
    }

    /// Wrap lines as a snapshot owned by this identity.
    #[must_use]
    pub fn snapshot(&self, lines: Vec<cart_sync_core::LineItem>) -> Cart {
        Cart::new(self.owner(), lines)
    }
}

/// Why a gateway call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Connection could not be established or was dropped.
    Network,
    /// The request did not complete in time.
    Timeout,
    /// Backend asked us to slow down.
    RateLimited {
        /// Seconds from `Retry-After`.
        retry_after_secs: u64,
    },
    /// Non-2xx HTTP status.
    Status(u16),
    /// Backend answered 2xx but reported `success: false`.
    Rejected,
    /// Response body could not be understood.
    Malformed,
}

impl GatewayErrorKind {
    /// Whether repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        match self {
            Self::Network | Self::Timeout | Self::RateLimited { .. } => true,
            Self::Status(code) => code >= 500 || code == 408,
            Self::Rejected | Self::Malformed => false,
        }
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => f.write_str("network error"),
            Self::Timeout => f.write_str("request timed out"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs} seconds")
            }
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Rejected => f.write_str("rejected by backend"),
            Self::Malformed => f.write_str("malformed response"),
        }
    }
}

/// A failed gateway operation.
///
/// Network, status and decoding failures all collapse into this one type;
/// `retryable` is informational and never drives automatic retries.
#[derive(Debug, Clone, Error)]
#[error("{reason}: {detail}")]
pub struct GatewayError {
    /// Failure category.
    pub reason: GatewayErrorKind,
    /// Whether the same call may succeed later.
    pub retryable: bool,
    /// Human-readable detail (never contains the credential).
    pub detail: String,
}

impl GatewayError {
    /// Build an error, deriving `retryable` from the kind.
    #[must_use]
    pub fn new(reason: GatewayErrorKind, detail: impl Into<String>) -> Self {
        Self {
            reason,
            retryable: reason.is_retryable(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a malformed-body error.
    #[must_use]
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Malformed, detail)
    }

    /// Transient failures (network, timeout, 5xx, rate limit).
    ///
    /// Used for telemetry only; callers see transient and permanent failures
    /// the same way.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.retryable
    }

    /// Whether this is a `404 Not Found`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.reason, GatewayErrorKind::Status(404))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            GatewayErrorKind::Timeout
        } else if err.is_decode() {
            GatewayErrorKind::Malformed
        } else if let Some(status) = err.status() {
            GatewayErrorKind::Status(status.as_u16())
        } else {
            GatewayErrorKind::Network
        };
        // Strip the URL: it is useful in logs but noisy for callers.
        Self::new(reason, err.without_url().to_string())
    }
}

/// Asynchronous transport to the backend's cart resource.
///
/// Implementations must be cheap to share: the coordinator holds one for its
/// whole lifetime and calls it from its own task.
pub trait CartGateway: Send + Sync + 'static {
    /// Retrieve the authoritative remote cart.
    fn fetch(&self, identity: &RemoteIdentity) -> impl Future<Output = GatewayResult<Cart>> + Send;

    /// Add `quantity` units; the backend merges by merge key.
    fn add(
        &self,
        identity: &RemoteIdentity,
        product_id: &ProductId,
        quantity: u32,
        variant: &Variant,
    ) -> impl Future<Output = GatewayResult<Cart>> + Send;

    /// Replace a line's quantity. `quantity` is always at least one.
    fn set_quantity(
        &self,
        identity: &RemoteIdentity,
        line_id: &LineId,
        quantity: u32,
    ) -> impl Future<Output = GatewayResult<Cart>> + Send;

    /// Remove a line.
    fn remove(
        &self,
        identity: &RemoteIdentity,
        line_id: &LineId,
    ) -> impl Future<Output = GatewayResult<Cart>> + Send;

    /// Remove every line for the identity.
    fn clear(&self, identity: &RemoteIdentity) -> impl Future<Output = GatewayResult<Cart>> + Send;

    /// Update a line's quantity, translating `quantity <= 0` into [`remove`].
    ///
    /// Quantities above `u32::MAX` are clamped, as the local store does.
    ///
    /// [`remove`]: CartGateway::remove
    fn update_quantity(
        &self,
        identity: &RemoteIdentity,
        line_id: &LineId,
        quantity: i64,
    ) -> impl Future<Output = GatewayResult<Cart>> + Send {
        async move {
            if quantity <= 0 {
                return self.remove(identity, line_id).await;
            }
            let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
            self.set_quantity(identity, line_id, quantity).await
        }
    }
}
