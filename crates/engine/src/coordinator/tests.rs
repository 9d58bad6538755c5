#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cart_sync_core::{Credential, CurrencyCode, LineId, LineItem, MergeKey, UserId};

use super::*;
use crate::auth::{AuthPublisher, auth_channel};
use crate::gateway::{GatewayError, GatewayErrorKind, GatewayResult, RemoteIdentity};

#[derive(Default)]
struct Backend {
    carts: Vec<(UserId, Vec<LineItem>)>,
    next_id: u32,
    adds: Vec<(ProductId, u32)>,
    fetches: u32,
    failing: HashSet<String>,
}

/// Backend that merges by merge key like the real one.
#[derive(Clone, Default)]
struct MemoryGateway {
    backend: Arc<Mutex<Backend>>,
}

impl MemoryGateway {
    fn fail_product(&self, product: &str) {
        self.backend.lock().unwrap().failing.insert(product.to_owned());
    }

    fn lines(&self, user: &str) -> Vec<LineItem> {
        let backend = self.backend.lock().unwrap();
        backend
            .carts
            .iter()
            .find(|(u, _)| u.as_str() == user)
            .map(|(_, lines)| lines.clone())
            .unwrap_or_default()
    }

    fn adds(&self) -> Vec<(ProductId, u32)> {
        self.backend.lock().unwrap().adds.clone()
    }

    fn fetches(&self) -> u32 {
        self.backend.lock().unwrap().fetches
    }

    fn with_cart<T>(&self, identity: &RemoteIdentity, f: impl FnOnce(&mut Vec<LineItem>, &mut u32) -> T) -> T {
        let mut backend = self.backend.lock().unwrap();
        let Backend { carts, next_id, .. } = &mut *backend;
        if !carts.iter().any(|(u, _)| u == &identity.user_id) {
            carts.push((identity.user_id.clone(), Vec::new()));
        }
        let (_, lines) = carts
            .iter_mut()
            .find(|(u, _)| u == &identity.user_id)
            .unwrap();
        f(lines, next_id)
    }
}

impl CartGateway for MemoryGateway {
    async fn fetch(&self, identity: &RemoteIdentity) -> GatewayResult<Cart> {
        self.backend.lock().unwrap().fetches += 1;
        Ok(identity.snapshot(self.with_cart(identity, |lines, _| lines.clone())))
    }

    async fn add(
        &self,
        identity: &RemoteIdentity,
        product_id: &ProductId,
        quantity: u32,
        variant: &Variant,
    ) -> GatewayResult<Cart> {
        {
            let mut backend = self.backend.lock().unwrap();
            if backend.failing.contains(product_id.as_str()) {
                return Err(GatewayError::new(GatewayErrorKind::Status(503), "unavailable"));
            }
            backend.adds.push((product_id.clone(), quantity));
        }
        let key = MergeKey::new(product_id, variant);
        let lines = self.with_cart(identity, |lines, next_id| {
            if let Some(line) = lines.iter_mut().find(|l| l.merge_key() == key) {
                line.quantity += quantity;
            } else {
                *next_id += 1;
                lines.push(
                    LineItem::new(
                        product_id.clone(),
                        quantity,
                        variant.clone(),
                        Price::from_cents(450, CurrencyCode::USD),
                    )
                    .with_line_id(LineId::new(format!("srv-{next_id}"))),
                );
            }
            lines.clone()
        });
        Ok(identity.snapshot(lines))
    }

    async fn set_quantity(
        &self,
        identity: &RemoteIdentity,
        line_id: &LineId,
        quantity: u32,
    ) -> GatewayResult<Cart> {
        let found = self.with_cart(identity, |lines, _| {
            lines
                .iter_mut()
                .find(|l| l.line_id.as_ref() == Some(line_id))
                .map(|l| l.quantity = quantity)
                .is_some()
        });
        if !found {
            return Err(GatewayError::new(GatewayErrorKind::Status(404), "not found"));
        }
        self.fetch(identity).await
    }

    async fn remove(&self, identity: &RemoteIdentity, line_id: &LineId) -> GatewayResult<Cart> {
        self.with_cart(identity, |lines, _| {
            lines.retain(|l| l.line_id.as_ref() != Some(line_id));
        });
        self.fetch(identity).await
    }

    async fn clear(&self, identity: &RemoteIdentity) -> GatewayResult<Cart> {
        self.with_cart(identity, |lines, _| lines.clear());
        self.fetch(identity).await
    }
}

#[derive(Default)]
struct RecordingHook {
    dropped: Mutex<Vec<ProductId>>,
    completed: Mutex<u32>,
}

impl MergeLineHook for RecordingHook {
    fn on_merge_line_dropped(&self, line: &LineItem, _error: &GatewayError) {
        self.dropped.lock().unwrap().push(line.product_id.clone());
    }

    fn on_merge_complete(&self, _report: &MergeReport) {
        *self.completed.lock().unwrap() += 1;
    }
}

fn price() -> Price {
    Price::from_cents(450, CurrencyCode::USD)
}

fn medium() -> Variant {
    Variant::none().with_size("Medium")
}

fn start(gateway: &MemoryGateway) -> (CartCoordinator, AuthPublisher) {
    start_with(gateway, CoordinatorOptions::default())
}

fn start_with(gateway: &MemoryGateway, options: CoordinatorOptions) -> (CartCoordinator, AuthPublisher) {
    let (auth, subscription) = auth_channel();
    let coordinator = CartCoordinator::spawn(
        LocalCartStore::in_memory(),
        gateway.clone(),
        subscription,
        options,
    );
    (coordinator, auth)
}

#[tokio::test]
async fn test_calls_before_signal_fail() {
    let (cart, _auth) = start(&MemoryGateway::default());
    assert!(matches!(cart.get_cart().await, Err(CartError::AuthUnresolved)));
    assert!(matches!(
        cart.add_item("latte", 1, medium(), price()).await,
        Err(CartError::AuthUnresolved)
    ));
    assert_eq!(cart.authority(), None);
}

#[tokio::test]
async fn test_guest_add_merges_by_key() {
    let (cart, auth) = start(&MemoryGateway::default());
    auth.sign_out();

    cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let snapshot = cart.add_item("latte", 2, medium(), price()).await.unwrap();

    assert_eq!(snapshot.owner, cart_sync_core::CartOwner::Device);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.lines[0].quantity, 3);
    assert_eq!(cart.authority(), Some(Authority::Guest));
}

#[tokio::test]
async fn test_invalid_input_rejected() {
    let (cart, auth) = start(&MemoryGateway::default());
    auth.sign_out();

    assert!(matches!(
        cart.add_item("latte", 0, medium(), price()).await,
        Err(CartError::InvalidQuantity(0))
    ));
    assert!(matches!(
        cart.add_item("latte", -1, medium(), price()).await,
        Err(CartError::InvalidQuantity(-1))
    ));
    assert!(matches!(
        cart.add_item(" ", 1, medium(), price()).await,
        Err(CartError::InvalidProduct)
    ));

    let added = cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let key = added.lines[0].key();
    let too_many = i64::from(u32::MAX) + 1;
    assert!(matches!(
        cart.set_item_quantity(key.clone(), too_many).await,
        Err(CartError::InvalidQuantity(q)) if q == too_many
    ));
    assert_eq!(cart.get_cart().await.unwrap().lines[0].quantity, 1);

    cart.remove_item(key).await.unwrap();
    assert!(cart.get_cart().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latte_merge() {
    let gateway = MemoryGateway::default();
    let (cart, auth) = start(&gateway);
    auth.sign_out();

    cart.add_item("latte", 1, medium(), price()).await.unwrap();
    cart.add_item("latte", 2, medium(), price()).await.unwrap();

    auth.sign_in("u1", Credential::new("token"));
    let merged = cart.get_cart().await.unwrap();

    assert_eq!(gateway.adds(), vec![(ProductId::new("latte"), 3)]);
    assert_eq!(merged.owner, cart_sync_core::CartOwner::User(UserId::new("u1")));
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.lines[0].quantity, 3);
    assert_eq!(cart.authority(), Some(Authority::Authenticated));

    let report = cart.merge_reports().borrow().clone().unwrap();
    assert_eq!(report.replayed.len(), 1);
    assert!(report.is_lossless());

    // Guest cart was consumed.
    auth.sign_out();
    assert!(cart.get_cart().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_merge_failure_is_contained() {
    let gateway = MemoryGateway::default();
    gateway.fail_product("scone");
    let hook = Arc::new(RecordingHook::default());
    let (cart, auth) = start_with(
        &gateway,
        CoordinatorOptions::default().with_merge_hook(Arc::clone(&hook)),
    );
    auth.sign_out();

    cart.add_item("latte", 1, medium(), price()).await.unwrap();
    cart.add_item("scone", 1, Variant::none(), price()).await.unwrap();
    cart.add_item("mocha", 2, Variant::none(), price()).await.unwrap();

    auth.sign_in("u1", Credential::new("token"));
    let merged = cart.get_cart().await.unwrap();

    assert_eq!(cart.authority(), Some(Authority::Authenticated));
    assert_eq!(merged.len(), 2);
    assert_eq!(*hook.dropped.lock().unwrap(), vec![ProductId::new("scone")]);
    assert_eq!(*hook.completed.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_failed_mutation_keeps_snapshot() {
    let gateway = MemoryGateway::default();
    let (cart, auth) = start(&gateway);
    auth.sign_in("u1", Credential::new("token"));

    let before = cart.add_item("latte", 1, medium(), price()).await.unwrap();
    gateway.fail_product("latte");

    let err = cart.add_item("latte", 1, medium(), price()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(cart.get_cart().await.unwrap().lines, before.lines);
}

#[tokio::test]
async fn test_cached_reads_and_refresh() {
    let gateway = MemoryGateway::default();
    let (cart, auth) = start(&gateway);
    auth.sign_in("u1", Credential::new("token"));

    cart.get_cart().await.unwrap();
    let fetches = gateway.fetches();
    cart.get_cart().await.unwrap();
    assert_eq!(gateway.fetches(), fetches);

    cart.refresh_cart().await.unwrap();
    assert_eq!(gateway.fetches(), fetches + 1);
}

#[tokio::test]
async fn test_remote_quantity_and_removal_by_structural_key() {
    let gateway = MemoryGateway::default();
    let (cart, auth) = start(&gateway);
    auth.sign_in("u1", Credential::new("token"));

    let key = LineKey::structural(&MergeKey::new(&ProductId::new("latte"), &medium()));
    cart.add_item("latte", 1, medium(), price());
    let updated = cart.set_item_quantity(key.clone(), 4).await.unwrap();
    assert_eq!(updated.lines[0].quantity, 4);

    let removed = cart.set_item_quantity(key.clone(), 0).await.unwrap();
    assert!(removed.is_empty());

    // Absent keys are not errors.
    assert!(cart.remove_item(key).await.unwrap().is_empty());
    assert!(cart.remove_item("srv-missing").await.unwrap().is_empty());
    assert!(cart.set_item_quantity("srv-missing", 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_out_returns_to_empty_guest_cart() {
    let gateway = MemoryGateway::default();
    let (cart, auth) = start(&gateway);
    auth.sign_in("u1", Credential::new("token"));
    cart.add_item("latte", 1, medium(), price()).await.unwrap();

    auth.sign_out();
    let guest = cart.get_cart().await.unwrap();
    assert!(guest.is_empty());
    assert_eq!(guest.owner, cart_sync_core::CartOwner::Device);
    assert_eq!(gateway.lines("u1").len(), 1);
}

#[tokio::test]
async fn test_blank_credential_stays_guest() {
    let (cart, auth) = start(&MemoryGateway::default());
    auth.sign_in("u1", Credential::new(""));
    cart.get_cart().await.unwrap();
    assert_eq!(cart.authority(), Some(Authority::Guest));
}

#[tokio::test]
async fn test_shutdown_drains_then_stops() {
    let (cart, auth) = start(&MemoryGateway::default());
    auth.sign_out();

    let pending = cart.add_item("latte", 1, medium(), price());
    cart.shutdown().await.unwrap();
    assert_eq!(pending.await.unwrap().item_count(), 1);

    assert!(matches!(cart.get_cart().await, Err(CartError::Shutdown)));
}
