//! Authentication signal consumed by the cart coordinator.

use super::cart::CartOwner;
use super::credential::Credential;
use super::id::UserId;

/// The binary "authenticated / anonymous" signal plus, when authenticated,
/// the identity and bearer credential to act on its behalf.
#[derive(Debug, Clone)]
pub enum AuthSignal {
    /// No credential present: the device-local guest cart is authoritative.
    Anonymous,
    /// Signed in: the remote cart for `user_id` is authoritative.
    Authenticated {
        /// Owner of the remote cart.
        user_id: UserId,
        /// Bearer credential for the backend.
        credential: Credential,
    },
}

impl AuthSignal {
    /// Signed-in signal.
    #[must_use]
    pub fn authenticated(user_id: impl Into<UserId>, credential: Credential) -> Self {
        Self::Authenticated {
            user_id: user_id.into(),
            credential,
        }
    }

    /// Whether a credential is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// Authenticated user id, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { user_id, .. } => Some(user_id),
        }
    }

    /// Cart owner scope this signal selects.
    ///
    /// A blank credential cannot reach the backend, so it selects the device.
    #[must_use]
    pub fn owner(&self) -> CartOwner {
        match self {
            Self::Authenticated { user_id, credential } if !credential.is_blank() => {
                CartOwner::User(user_id.clone())
            }
            _ => CartOwner::Device,
        }
    }
}
