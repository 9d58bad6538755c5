//! Integration tests for the cart synchronization engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cart-sync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_properties` - Coordinator behaviour driven through [`ScriptedGateway`]
//! - `http_gateway` - The REST client against [`MockBackend`]
//!
//! Neither needs network access beyond the loopback interface.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod scripted;

use std::sync::Arc;

use cart_sync::store::MemoryPersistence;
use cart_sync::{
    AuthPublisher, CartCoordinator, CartGateway, CoordinatorOptions, LocalCartStore, auth_channel,
};

pub use backend::{Fault, MockBackend};
pub use scripted::{Call, ScriptedGateway};

/// A coordinator wired to a gateway, with the auth publisher and the guest
/// cart's backing storage exposed for inspection.
pub struct Harness {
    pub cart: CartCoordinator,
    pub auth: AuthPublisher,
    pub guest_storage: Arc<MemoryPersistence>,
}

impl Harness {
    /// Start a coordinator with default options.
    pub fn start<G: CartGateway>(gateway: G) -> Self {
        Self::start_with(gateway, CoordinatorOptions::default())
    }

    /// Start a coordinator with custom options.
    pub fn start_with<G: CartGateway>(gateway: G, options: CoordinatorOptions) -> Self {
        let guest_storage = Arc::new(MemoryPersistence::new());
        let (auth, subscription) = auth_channel();
        let cart = CartCoordinator::spawn(
            LocalCartStore::open(Arc::clone(&guest_storage)),
            gateway,
            subscription,
            options,
        );
        Self {
            cart,
            auth,
            guest_storage,
        }
    }

    /// Guest cart as persisted, read through a fresh store.
    #[must_use]
    pub fn persisted_guest_cart(&self) -> LocalCartStore {
        LocalCartStore::open(Arc::clone(&self.guest_storage))
    }
}
