//! The coordinator task.
//!
//! One task owns the local store, the gateway handle and the authority
//! state. Commands are processed strictly one at a time, so every gateway
//! call for a scope completes before the next command for that scope starts.
//! A merge runs inline, so commands issued meanwhile wait in the queue.
//!
//! Authentication changes are applied before the next queued command, and a
//! command only runs against the owner it was issued for.

use std::sync::Arc;

use cart_sync_core::{
    AuthSignal, Cart, CartOwner, LineId, LineItem, LineKey, Price, ProductId, Variant,
};
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;

use super::command::{Command, Outcome, Request};
use super::merge::{MergeLineHook, MergeReport};
use super::snapshot::SnapshotCache;
use super::{Authority, CartView};
use crate::auth::AuthSubscription;
use crate::error::{self, CartError, Result};
use crate::gateway::{CartGateway, RemoteIdentity};
use crate::store::LocalCartStore;

/// Which authority commands are routed to.
enum Scope {
    /// No authentication signal yet.
    Unresolved,
    Guest,
    Authenticated(RemoteIdentity),
}

/// How a caller key maps onto the remote cart.
enum Target {
    Line(LineId),
    /// No remote line matches; the cart is returned unchanged.
    Absent(Cart),
}

pub struct CoordinatorActor<G> {
    pub store: LocalCartStore,
    pub gateway: G,
    pub hook: Arc<dyn MergeLineHook>,
    pub snapshots: SnapshotCache,
    pub auth: AuthSubscription,
    pub authority: watch::Sender<Option<Authority>>,
    pub views: watch::Sender<Option<CartView>>,
    pub merges: watch::Sender<Option<MergeReport>>,
}

enum Event {
    AuthChanged,
    AuthClosed,
    Command(Option<Request>),
}

impl<G: CartGateway> CoordinatorActor<G> {
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<Request>) {
        let mut state = ActorState {
            actor: self,
            scope: Scope::Unresolved,
        };
        state.apply_auth().await;

        let mut auth_open = true;
        loop {
            let event = tokio::select! {
                biased;
                changed = state.actor.auth.changed(), if auth_open => {
                    if changed.is_ok() { Event::AuthChanged } else { Event::AuthClosed }
                }
                command = commands.recv() => Event::Command(command),
            };

            match event {
                Event::AuthChanged => state.apply_auth().await,
                Event::AuthClosed => {
                    // Keep routing with the last signal.
                    debug!("Authentication publisher dropped");
                    auth_open = false;
                }
                Event::Command(Some(Request {
                    command: Command::Shutdown { outcome },
                    ..
                })) => {
                    commands.close();
                    while let Ok(request) = commands.try_recv() {
                        state.dispatch(request).await;
                    }
                    info!("Cart coordinator stopped");
                    let _ = outcome.send(Ok(()));
                    return;
                }
                Event::Command(Some(request)) => state.dispatch(request).await,
                Event::Command(None) => {
                    debug!("All coordinator handles dropped");
                    return;
                }
            }
        }
    }
}

struct ActorState<G> {
    actor: CoordinatorActor<G>,
    scope: Scope,
}

impl<G: CartGateway> ActorState<G> {
    // =========================================================================
    // Authority transitions
    // =========================================================================

    async fn apply_auth(&mut self) {
        let Some(signal) = self.actor.auth.borrow_and_update().clone() else {
            return;
        };

        let signal = match signal {
            AuthSignal::Authenticated { user_id, credential } if credential.is_blank() => {
                warn!(user_id = %user_id, "Authenticated signal without credential, staying anonymous");
                AuthSignal::Anonymous
            }
            other => other,
        };

        match signal {
            AuthSignal::Anonymous => match self.scope {
                Scope::Unresolved => {
                    info!("Starting in guest mode");
                    self.scope = Scope::Guest;
                    self.actor.authority.send_replace(Some(Authority::Guest));
                    self.publish(Authority::Guest, self.actor.store.snapshot());
                }
                Scope::Guest => {}
                Scope::Authenticated(_) => self.enter_guest().await,
            },
            AuthSignal::Authenticated { user_id, credential } => {
                if let Scope::Authenticated(current) = &mut self.scope {
                    if current.user_id == user_id {
                        debug!(user_id = %user_id, "Credential refreshed");
                        current.credential = credential;
                        return;
                    }
                    info!(user_id = %user_id, "Switching user, signing previous user out first");
                    self.enter_guest().await;
                }
                self.sign_in(RemoteIdentity::new(user_id, credential)).await;
            }
        }
    }

    async fn enter_guest(&mut self) {
        if let Scope::Authenticated(identity) = &self.scope {
            info!(user_id = %identity.user_id, "Signed out, returning to guest mode");
            self.actor.snapshots.invalidate(&identity.user_id).await;
            error::add_breadcrumb("cart", "Signed out", None);
            error::clear_sentry_user();
        }
        // A signed-out session starts with an empty guest cart.
        self.actor.store.clear();
        self.scope = Scope::Guest;
        self.actor.authority.send_replace(Some(Authority::Guest));
        self.publish(Authority::Guest, self.actor.store.snapshot());
    }

    /// Guest to authenticated transition.
    ///
    /// Replays every guest line, clears the guest cart whatever happened, then
    /// fetches the remote cart. The coordinator ends up authenticated even if
    /// every step failed.
    #[instrument(skip_all, fields(user_id = %identity.user_id))]
    async fn sign_in(&mut self, identity: RemoteIdentity) {
        self.actor.authority.send_replace(Some(Authority::Merging));
        error::set_sentry_user(&identity.user_id);
        error::add_breadcrumb(
            "cart.merge",
            "Merge started",
            Some(&[("user_id", identity.user_id.as_str())]),
        );

        let mut report = MergeReport::new(identity.user_id.clone());
        let lines = self.actor.store.lines_for_sync();
        if lines.is_empty() {
            debug!("Guest cart empty, nothing to merge");
        } else {
            info!(lines = lines.len(), "Replaying guest cart");
            for line in lines {
                self.replay(&identity, line, &mut report).await;
            }
        }
        self.actor.store.clear();

        match self.actor.gateway.fetch(&identity).await {
            Ok(cart) => {
                self.actor.snapshots.store(&cart).await;
                report.cart = Some(cart);
            }
            Err(e) => {
                warn!(error = %e, "Fetch after merge failed");
                CartError::from(e).report();
            }
        }

        self.scope = Scope::Authenticated(identity);
        self.actor.authority.send_replace(Some(Authority::Authenticated));
        if let Some(cart) = &report.cart {
            self.publish(Authority::Authenticated, cart.clone());
        }

        error::add_breadcrumb("cart.merge", "Merge complete", None);
        self.actor.hook.on_merge_complete(&report);
        self.actor.merges.send_replace(Some(report));
    }

    async fn replay(&self, identity: &RemoteIdentity, line: LineItem, report: &mut MergeReport) {
        let result = self
            .actor
            .gateway
            .add(identity, &line.product_id, line.quantity, &line.variant)
            .await;
        match result {
            Ok(_) => report.replayed.push(line),
            Err(e) => {
                self.actor.hook.on_merge_line_dropped(&line, &e);
                report.dropped.push(line);
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn dispatch(&mut self, request: Request) {
        let span = info_span!(
            "cart_command",
            op = request.command.name(),
            op_id = %Uuid::new_v4()
        );
        self.handle(request).instrument(span).await;
    }

    async fn handle(&mut self, request: Request) {
        let Request {
            issued_for,
            command,
        } = request;
        let issued_for = issued_for.as_ref();

        match command {
            Command::Get { outcome } => {
                let result = self.get_cart(issued_for).await;
                respond(outcome, result);
            }
            Command::Refresh { outcome } => {
                let result = self.refresh_cart(issued_for).await;
                respond(outcome, result);
            }
            Command::Add {
                product_id,
                quantity,
                variant,
                unit_price,
                outcome,
            } => {
                let result = self
                    .add_item(issued_for, product_id, quantity, variant, unit_price)
                    .await;
                respond(outcome, result);
            }
            Command::SetQuantity {
                key,
                quantity,
                outcome,
            } => {
                let result = self.set_item_quantity(issued_for, &key, quantity).await;
                respond(outcome, result);
            }
            Command::Remove { key, outcome } => {
                let result = self.remove_item(issued_for, &key).await;
                respond(outcome, result);
            }
            Command::Clear { outcome } => {
                let result = self.clear_cart(issued_for).await;
                respond(outcome, result);
            }
            Command::Shutdown { outcome } => {
                // Already draining.
                let _ = outcome.send(Ok(()));
            }
        }
    }

    fn owner(&self) -> Option<CartOwner> {
        match &self.scope {
            Scope::Unresolved => None,
            Scope::Guest => Some(CartOwner::Device),
            Scope::Authenticated(identity) => Some(identity.owner()),
        }
    }

    /// Remote identity to route to, `None` for the guest cart.
    ///
    /// Fails when the command was issued before any signal, or for an owner
    /// whose scope has since ended.
    fn identity(&self, issued_for: Option<&CartOwner>) -> Result<Option<RemoteIdentity>> {
        let (Some(issued_for), Some(current)) = (issued_for, self.owner()) else {
            return Err(CartError::AuthUnresolved);
        };
        if *issued_for != current {
            debug!(issued_for = %issued_for, current = %current, "Request outlived its scope");
            return Err(CartError::ScopeChanged);
        }
        match &self.scope {
            Scope::Authenticated(identity) => Ok(Some(identity.clone())),
            Scope::Unresolved | Scope::Guest => Ok(None),
        }
    }

    async fn get_cart(&mut self, issued_for: Option<&CartOwner>) -> Result<Cart> {
        let Some(identity) = self.identity(issued_for)? else {
            return Ok(self.actor.store.snapshot());
        };
        self.remote_snapshot(&identity).await
    }

    async fn refresh_cart(&mut self, issued_for: Option<&CartOwner>) -> Result<Cart> {
        let Some(identity) = self.identity(issued_for)? else {
            return Ok(self.actor.store.snapshot());
        };
        let cart = self.actor.gateway.fetch(&identity).await?;
        Ok(self.confirm(cart).await)
    }

    async fn add_item(
        &mut self,
        issued_for: Option<&CartOwner>,
        product_id: ProductId,
        quantity: u32,
        variant: Variant,
        unit_price: Price,
    ) -> Result<Cart> {
        let Some(identity) = self.identity(issued_for)? else {
            self.actor.store.upsert(product_id, quantity, variant, unit_price);
            return Ok(self.guest_changed());
        };
        let cart = self
            .actor
            .gateway
            .add(&identity, &product_id, quantity, &variant)
            .await?;
        Ok(self.confirm(cart).await)
    }

    async fn set_item_quantity(
        &mut self,
        issued_for: Option<&CartOwner>,
        key: &LineKey,
        quantity: i64,
    ) -> Result<Cart> {
        let Some(identity) = self.identity(issued_for)? else {
            self.actor.store.set_quantity(key, quantity);
            return Ok(self.guest_changed());
        };
        let line_id = match self.resolve(&identity, key).await? {
            Target::Line(line_id) => line_id,
            Target::Absent(cart) => return Ok(cart),
        };
        match self
            .actor
            .gateway
            .update_quantity(&identity, &line_id, quantity)
            .await
        {
            Ok(cart) => Ok(self.confirm(cart).await),
            Err(e) if e.is_not_found() => {
                debug!(line_id = %line_id, "Line absent on backend, returning current cart");
                self.refresh_cart(issued_for).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_item(&mut self, issued_for: Option<&CartOwner>, key: &LineKey) -> Result<Cart> {
        let Some(identity) = self.identity(issued_for)? else {
            self.actor.store.remove(key);
            return Ok(self.guest_changed());
        };
        let line_id = match self.resolve(&identity, key).await? {
            Target::Line(line_id) => line_id,
            Target::Absent(cart) => return Ok(cart),
        };
        let cart = self.actor.gateway.remove(&identity, &line_id).await?;
        Ok(self.confirm(cart).await)
    }

    async fn clear_cart(&mut self, issued_for: Option<&CartOwner>) -> Result<Cart> {
        let Some(identity) = self.identity(issued_for)? else {
            self.actor.store.clear();
            return Ok(self.guest_changed());
        };
        let cart = self.actor.gateway.clear(&identity).await?;
        Ok(self.confirm(cart).await)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Cached snapshot if still fresh, otherwise a fetch.
    async fn remote_snapshot(&self, identity: &RemoteIdentity) -> Result<Cart> {
        if let Some(cart) = self.actor.snapshots.get(&identity.user_id).await {
            debug!("Serving cached remote snapshot");
            return Ok(cart);
        }
        let cart = self.actor.gateway.fetch(identity).await?;
        Ok(self.confirm(cart).await)
    }

    /// Map a caller key to a remote line.
    ///
    /// Structural keys (handed out for lines added before their server id was
    /// known) are matched by merge key against the current remote snapshot.
    async fn resolve(&self, identity: &RemoteIdentity, key: &LineKey) -> Result<Target> {
        if !key.is_structural() {
            return Ok(Target::Line(key.to_line_id()));
        }
        let cart = self.remote_snapshot(identity).await?;
        let line_id = cart
            .lines
            .iter()
            .find(|l| &LineKey::structural(&l.merge_key()) == key)
            .and_then(|l| l.line_id.clone());
        Ok(line_id.map_or(Target::Absent(cart), Target::Line))
    }

    /// Record a gateway response as the confirmed remote cart.
    async fn confirm(&self, cart: Cart) -> Cart {
        self.actor.snapshots.store(&cart).await;
        self.publish(Authority::Authenticated, cart.clone());
        cart
    }

    fn guest_changed(&self) -> Cart {
        let cart = self.actor.store.snapshot();
        self.publish(Authority::Guest, cart.clone());
        cart
    }

    fn publish(&self, authority: Authority, cart: Cart) {
        self.actor
            .views
            .send_replace(Some(CartView { authority, cart }));
    }
}

/// Deliver a result, reporting failures first. A caller that stopped waiting
/// is not an error.
fn respond(outcome: Outcome, result: Result<Cart>) {
    if let Err(e) = &result {
        e.report();
    }
    let _ = outcome.send(result);
}
