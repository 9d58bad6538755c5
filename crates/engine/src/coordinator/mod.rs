//! Cart coordinator.
//!
//! # Architecture
//!
//! - [`CartCoordinator`] is a cheap handle; every call enqueues a command and
//!   returns a [`CartReply`] immediately
//! - A single task owns the [`LocalCartStore`], the gateway and the authority
//!   state, and processes commands in issue order
//! - The authority follows the [`AuthSubscription`]: `Guest` routes to the
//!   local store, `Authenticated` to the gateway, and `Merging` covers the
//!   one-time replay of the guest cart at sign-in
//! - Each call is stamped with the cart owner current when it was issued; a
//!   call whose owner is no longer current when it reaches the front of the
//!   queue fails with [`CartError::ScopeChanged`] instead of touching another
//!   owner's cart
//! - Confirmed snapshots are published on a `watch` channel for observers
//!
//! # Example
//!
//! ```rust,no_run
//! use cart_sync::{CartCoordinator, CoordinatorOptions, HttpCartGateway, LocalCartStore, auth_channel};
//! use cart_sync_core::{Credential, Price, Variant};
//! # async fn demo(gateway: HttpCartGateway) -> cart_sync::Result<()> {
//! let (auth, subscription) = auth_channel();
//! let cart = CartCoordinator::spawn(
//!     LocalCartStore::in_memory(),
//!     gateway,
//!     subscription,
//!     CoordinatorOptions::default(),
//! );
//!
//! auth.sign_out();
//! cart.add_item("latte", 2, Variant::none().with_size("Medium"), Price::from_cents(450, Default::default()))
//!     .await?;
//!
//! // The guest line is replayed into the account's cart.
//! auth.sign_in("user-1", Credential::new("token"));
//! let merged = cart.get_cart().await?;
//! # Ok(())
//! # }
//! ```

mod actor;
mod command;
mod merge;
mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use cart_sync_core::{AuthSignal, Cart, LineKey, Price, ProductId, Variant};
use tokio::sync::{mpsc, watch};

use crate::auth::AuthSubscription;
use crate::config::EngineConfig;
use crate::error::CartError;
use crate::gateway::CartGateway;
use crate::store::LocalCartStore;

use actor::CoordinatorActor;
use command::{Command, Request};
use snapshot::SnapshotCache;

pub use command::CartReply;
pub use merge::{LoggingMergeHook, MergeLineHook, MergeReport};

const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(30);

/// Which store is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// No credential; the local store is authoritative.
    Guest,
    /// Replaying the guest cart into the remote cart. Calls queue until done.
    Merging,
    /// The remote cart is authoritative.
    Authenticated,
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guest => f.write_str("guest"),
            Self::Merging => f.write_str("merging"),
            Self::Authenticated => f.write_str("authenticated"),
        }
    }
}

/// A confirmed cart and the authority that confirmed it.
#[derive(Debug, Clone)]
pub struct CartView {
    pub authority: Authority,
    pub cart: Cart,
}

/// Coordinator tuning.
#[derive(Clone)]
pub struct CoordinatorOptions {
    /// How long a confirmed remote snapshot answers `get_cart`.
    pub snapshot_ttl: Duration,
    /// Merge policy hook.
    pub merge_hook: Arc<dyn MergeLineHook>,
}

impl CoordinatorOptions {
    /// Options from engine configuration with the logging merge hook.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            snapshot_ttl: config.snapshot_ttl,
            ..Self::default()
        }
    }

    /// Replace the merge hook.
    #[must_use]
    pub fn with_merge_hook(mut self, hook: impl MergeLineHook + 'static) -> Self {
        self.merge_hook = Arc::new(hook);
        self
    }

    /// Replace the snapshot time-to-live.
    #[must_use]
    pub const fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            snapshot_ttl: DEFAULT_SNAPSHOT_TTL,
            merge_hook: Arc::new(LoggingMergeHook),
        }
    }
}

impl std::fmt::Debug for CoordinatorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorOptions")
            .field("snapshot_ttl", &self.snapshot_ttl)
            .finish_non_exhaustive()
    }
}

/// Uniform cart API over the local and remote authorities.
///
/// Cloning shares the same coordinator task. The task stops after
/// [`shutdown`](Self::shutdown) or once every handle is dropped.
#[derive(Clone)]
pub struct CartCoordinator {
    commands: mpsc::UnboundedSender<Request>,
    auth: AuthSubscription,
    authority: watch::Receiver<Option<Authority>>,
    views: watch::Receiver<Option<CartView>>,
    merges: watch::Receiver<Option<MergeReport>>,
}

impl CartCoordinator {
    /// Start the coordinator task on the current Tokio runtime.
    pub fn spawn<G: CartGateway>(
        store: LocalCartStore,
        gateway: G,
        auth: AuthSubscription,
        options: CoordinatorOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (authority_tx, authority_rx) = watch::channel(None);
        let (views_tx, views_rx) = watch::channel(None);
        let (merges_tx, merges_rx) = watch::channel(None);

        let actor = CoordinatorActor {
            store,
            gateway,
            hook: options.merge_hook,
            snapshots: SnapshotCache::new(options.snapshot_ttl),
            auth: auth.clone(),
            authority: authority_tx,
            views: views_tx,
            merges: merges_tx,
        };
        tokio::spawn(actor.run(commands_rx));

        Self {
            commands: commands_tx,
            auth,
            authority: authority_rx,
            views: views_rx,
            merges: merges_rx,
        }
    }

    fn send(&self, build: impl FnOnce(command::Outcome) -> Command) -> CartReply {
        let (outcome, reply) = CartReply::channel();
        let issued_for = self.auth.borrow().as_ref().map(AuthSignal::owner);
        // A closed queue drops the outcome, which resolves the reply to
        // `Shutdown`.
        let _ = self.commands.send(Request {
            issued_for,
            command: build(outcome),
        });
        reply
    }

    /// The current cart.
    ///
    /// Authenticated reads may be answered from the latest confirmed snapshot.
    pub fn get_cart(&self) -> CartReply {
        self.send(|outcome| Command::Get { outcome })
    }

    /// The current cart, always asking the backend when authenticated.
    pub fn refresh_cart(&self) -> CartReply {
        self.send(|outcome| Command::Refresh { outcome })
    }

    /// Add units of a product, incrementing any line with the same merge key.
    ///
    /// `unit_price` is recorded for guest lines; the backend prices remote
    /// lines itself.
    pub fn add_item(
        &self,
        product_id: impl Into<ProductId>,
        quantity: i64,
        variant: Variant,
        unit_price: Price,
    ) -> CartReply {
        let product_id = product_id.into();
        if product_id.as_str().trim().is_empty() {
            return CartReply::ready(Err(CartError::InvalidProduct));
        }
        let Some(quantity) = u32::try_from(quantity).ok().filter(|q| *q >= 1) else {
            return CartReply::ready(Err(CartError::InvalidQuantity(quantity)));
        };

        self.send(|outcome| Command::Add {
            product_id,
            quantity,
            variant,
            unit_price,
            outcome,
        })
    }

    /// Replace a line's quantity; `quantity <= 0` removes it.
    ///
    /// A quantity above `u32::MAX` fails with [`CartError::InvalidQuantity`].
    pub fn set_item_quantity(&self, key: impl Into<LineKey>, quantity: i64) -> CartReply {
        if quantity > i64::from(u32::MAX) {
            return CartReply::ready(Err(CartError::InvalidQuantity(quantity)));
        }
        let key = key.into();
        self.send(|outcome| Command::SetQuantity {
            key,
            quantity,
            outcome,
        })
    }

    /// Remove a line. Removing an absent line returns the cart unchanged.
    pub fn remove_item(&self, key: impl Into<LineKey>) -> CartReply {
        let key = key.into();
        self.send(|outcome| Command::Remove { key, outcome })
    }

    /// Remove every line.
    pub fn clear_cart(&self) -> CartReply {
        self.send(|outcome| Command::Clear { outcome })
    }

    /// Observe every confirmed cart.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<CartView>> {
        self.views.clone()
    }

    /// Observe merge outcomes.
    #[must_use]
    pub fn merge_reports(&self) -> watch::Receiver<Option<MergeReport>> {
        self.merges.clone()
    }

    /// Current authority, `None` before the first authentication signal.
    #[must_use]
    pub fn authority(&self) -> Option<Authority> {
        *self.authority.borrow()
    }

    /// Observe authority transitions.
    #[must_use]
    pub fn authority_changes(&self) -> watch::Receiver<Option<Authority>> {
        self.authority.clone()
    }

    /// Stop the coordinator once every command queued so far is processed.
    pub fn shutdown(&self) -> CartReply<()> {
        let (outcome, reply) = CartReply::channel();
        let _ = self.commands.send(Request {
            issued_for: None,
            command: Command::Shutdown { outcome },
        });
        reply
    }
}

impl std::fmt::Debug for CartCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartCoordinator")
            .field("authority", &self.authority())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
