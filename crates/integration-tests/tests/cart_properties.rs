//! Coordinator behaviour across guest mode, sign-in merge and the remote cart.
//!
//! These tests drive the public coordinator API against an in-memory gateway
//! with scripted failures and latency.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cart_sync::store::FilePersistence;
use cart_sync::{
    Authority, CartCoordinator, CartError, CoordinatorOptions, GatewayError, GatewayErrorKind,
    LocalCartStore, MergeLineHook, MergeReport, auth_channel,
};
use cart_sync_core::{
    CartOwner, Credential, CurrencyCode, LineItem, LineKey, MergeKey, Price, ProductId, UserId,
    Variant,
};
use cart_sync_integration_tests::{Call, Harness, ScriptedGateway};

fn price() -> Price {
    Price::from_cents(450, CurrencyCode::USD)
}

fn medium() -> Variant {
    Variant::none().with_size("Medium")
}

fn token() -> Credential {
    Credential::new("bearer-token")
}

fn structural(product: &str, variant: &Variant) -> LineKey {
    LineKey::structural(&MergeKey::new(&ProductId::new(product), variant))
}

async fn wait_for_authority(harness: &Harness, authority: Authority) {
    let mut changes = harness.cart.authority_changes();
    tokio::time::timeout(
        Duration::from_secs(2),
        changes.wait_for(|a| *a == Some(authority)),
    )
    .await
    .unwrap()
    .unwrap();
}

#[derive(Default)]
struct RecordingHook {
    dropped: Mutex<Vec<LineItem>>,
    reports: Mutex<Vec<MergeReport>>,
}

impl MergeLineHook for RecordingHook {
    fn on_merge_line_dropped(&self, line: &LineItem, _error: &GatewayError) {
        self.dropped.lock().unwrap().push(line.clone());
    }

    fn on_merge_complete(&self, report: &MergeReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

// =============================================================================
// Merge-key idempotence
// =============================================================================

#[tokio::test]
async fn test_guest_adds_merge_by_key() {
    let h = Harness::start(ScriptedGateway::new());
    h.auth.sign_out();

    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let cart = h.cart.add_item("latte", 2, medium(), price()).await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.lines[0].quantity, 3);

    // A different attribute is a different entry.
    let cart = h
        .cart
        .add_item("latte", 1, medium().with_temperature("Iced"), price())
        .await
        .unwrap();
    assert_eq!(cart.len(), 2);
    assert_eq!(h.persisted_guest_cart().count(), 4);
}

#[tokio::test]
async fn test_remote_adds_merge_by_key() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_in("u1", token());

    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let cart = h.cart.add_item("latte", 1, medium(), price()).await.unwrap();

    assert_eq!(cart.len(), 1);
    assert_eq!(cart.lines[0].quantity, 2);
    assert_eq!(gateway.lines("u1").len(), 1);
}

// =============================================================================
// Quantity updates and removal
// =============================================================================

#[tokio::test]
async fn test_non_positive_quantity_removes_line() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();

    let key = structural("latte", &medium());
    h.cart.add_item("latte", 2, medium(), price()).await.unwrap();
    assert!(h.cart.set_item_quantity(key.clone(), 0).await.unwrap().is_empty());

    h.auth.sign_in("u1", token());
    h.cart.add_item("mocha", 2, Variant::none(), price()).await.unwrap();
    let cart = h
        .cart
        .set_item_quantity(structural("mocha", &Variant::none()), -1)
        .await
        .unwrap();
    assert!(cart.is_empty());
    assert!(gateway.lines("u1").is_empty());
}

#[tokio::test]
async fn test_removal_is_idempotent() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();

    let key = structural("latte", &medium());
    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let first = h.cart.remove_item(key.clone()).await.unwrap();
    let second = h.cart.remove_item(key).await.unwrap();
    assert_eq!(first.lines, second.lines);

    h.auth.sign_in("u1", token());
    let cart = h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let line_key = cart.lines[0].key();
    let first = h.cart.remove_item(line_key.clone()).await.unwrap();
    let second = h.cart.remove_item(line_key).await.unwrap();
    assert_eq!(first.lines, second.lines);
    assert!(second.is_empty());
}

// =============================================================================
// Merge protocol
// =============================================================================

#[tokio::test]
async fn test_latte_example() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();

    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let guest = h.cart.add_item("latte", 2, medium(), price()).await.unwrap();
    assert_eq!(guest.len(), 1);
    assert_eq!(guest.lines[0].quantity, 3);

    h.auth.sign_in("u1", token());
    let cart = h.cart.get_cart().await.unwrap();

    assert_eq!(gateway.adds(), vec![(ProductId::new("latte"), 3)]);
    assert_eq!(gateway.quantity_of("u1", "latte", &medium()), 3);
    assert!(!h.persisted_guest_cart().has_items());
    assert_eq!(cart.owner, CartOwner::User(UserId::new("u1")));
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.lines[0].quantity, 3);
    assert_eq!(cart.lines[0].variant, medium());
}

#[tokio::test]
async fn test_merge_adds_to_existing_remote_quantity() {
    let gateway = ScriptedGateway::new();
    gateway.seed("u1", "latte", 2, medium());
    gateway.seed("u1", "croissant", 1, Variant::none());
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();

    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    h.cart.add_item("scone", 1, Variant::none(), price()).await.unwrap();

    h.auth.sign_in("u1", token());
    let cart = h.cart.get_cart().await.unwrap();

    assert_eq!(cart.quantity_of(&MergeKey::new(&ProductId::new("latte"), &medium())), 3);
    assert_eq!(cart.quantity_of(&MergeKey::new(&ProductId::new("scone"), &Variant::none())), 1);
    assert_eq!(
        cart.quantity_of(&MergeKey::new(&ProductId::new("croissant"), &Variant::none())),
        1
    );
    assert!(!h.persisted_guest_cart().has_items());
}

#[tokio::test]
async fn test_partial_merge_failure_is_contained() {
    let gateway = ScriptedGateway::new();
    gateway.fail_adds_for("scone", GatewayErrorKind::Status(422));
    let hook = Arc::new(RecordingHook::default());
    let h = Harness::start_with(
        gateway.clone(),
        CoordinatorOptions::default().with_merge_hook(Arc::clone(&hook)),
    );
    h.auth.sign_out();

    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    h.cart.add_item("scone", 1, Variant::none(), price()).await.unwrap();
    h.cart.add_item("mocha", 1, Variant::none(), price()).await.unwrap();

    h.auth.sign_in("u1", token());
    let cart = h.cart.get_cart().await.unwrap();

    assert_eq!(h.cart.authority(), Some(Authority::Authenticated));
    assert_eq!(cart.len(), 2);
    assert!(!h.persisted_guest_cart().has_items());

    let dropped = hook.dropped.lock().unwrap();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].product_id.as_str(), "scone");

    let reports = hook.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].replayed.len(), 2);
    assert!(!reports[0].is_lossless());
}

#[tokio::test]
async fn test_every_merge_line_failing_still_authenticates() {
    let gateway = ScriptedGateway::new();
    gateway.fail_adds_for("latte", GatewayErrorKind::Timeout);
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();
    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();

    h.auth.sign_in("u1", token());
    assert!(h.cart.get_cart().await.unwrap().is_empty());
    assert_eq!(h.cart.authority(), Some(Authority::Authenticated));
    assert!(!h.persisted_guest_cart().has_items());
}

#[tokio::test]
async fn test_failed_final_fetch_still_authenticates() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();
    h.cart.get_cart().await.unwrap();

    // The merge of an empty guest cart makes exactly one call: the fetch.
    gateway.fail_next(GatewayErrorKind::Status(503));
    h.auth.sign_in("u1", token());
    let cart = h.cart.get_cart().await.unwrap();

    assert_eq!(h.cart.authority(), Some(Authority::Authenticated));
    assert!(cart.is_empty());
    let fetches = gateway
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Fetch(_)))
        .count();
    assert_eq!(fetches, 1);
}

#[tokio::test]
async fn test_first_signal_authenticated_merges_leftover_guest_cart() {
    let gateway = ScriptedGateway::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guest_cart.json");
    {
        let mut store = LocalCartStore::open(FilePersistence::new(&path));
        store.upsert(ProductId::new("latte"), 2, medium(), price());
    }

    let (auth, subscription) = auth_channel();
    auth.sign_in("u1", token());
    let cart = CartCoordinator::spawn(
        LocalCartStore::open(FilePersistence::new(&path)),
        gateway.clone(),
        subscription,
        CoordinatorOptions::default(),
    );

    let merged = cart.get_cart().await.unwrap();
    assert_eq!(merged.item_count(), 2);
    assert_eq!(gateway.quantity_of("u1", "latte", &medium()), 2);
    assert!(!LocalCartStore::open(FilePersistence::new(&path)).has_items());
}

#[tokio::test]
async fn test_credential_refresh_does_not_merge_again() {
    let hook = Arc::new(RecordingHook::default());
    let h = Harness::start_with(
        ScriptedGateway::new(),
        CoordinatorOptions::default().with_merge_hook(Arc::clone(&hook)),
    );
    h.auth.sign_in("u1", Credential::new("t1"));
    h.cart.get_cart().await.unwrap();
    h.auth.sign_in("u1", Credential::new("t2"));
    h.cart.get_cart().await.unwrap();

    assert_eq!(hook.reports.lock().unwrap().len(), 1);
}

// =============================================================================
// Scope isolation
// =============================================================================

#[tokio::test]
async fn test_no_cross_scope_leakage() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());

    h.auth.sign_in("alice", token());
    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();

    h.auth.sign_out();
    let guest = h.cart.get_cart().await.unwrap();
    assert!(guest.is_empty());
    assert_eq!(guest.owner, CartOwner::Device);

    h.cart.add_item("scone", 1, Variant::none(), price()).await.unwrap();
    h.auth.sign_in("bob", token());
    let bob = h.cart.get_cart().await.unwrap();

    assert_eq!(bob.owner, CartOwner::User(UserId::new("bob")));
    assert_eq!(bob.len(), 1);
    assert_eq!(bob.lines[0].product_id.as_str(), "scone");
    assert_eq!(gateway.lines("alice").len(), 1);
    assert_eq!(gateway.lines("alice")[0].product_id.as_str(), "latte");
}

#[tokio::test]
async fn test_direct_user_switch_acts_as_sign_out_then_sign_in() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());

    h.auth.sign_in("alice", token());
    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();

    h.auth.sign_in("bob", token());
    let bob = h.cart.get_cart().await.unwrap();

    assert_eq!(bob.owner, CartOwner::User(UserId::new("bob")));
    assert!(bob.is_empty());
    assert_eq!(gateway.lines("alice").len(), 1);
}

#[tokio::test]
async fn test_commands_queued_before_user_switch_stay_with_their_owner() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_in("alice", token());
    h.cart.get_cart().await.unwrap();

    // Alice's first add is slow, so her second one is still queued when
    // the account changes.
    gateway.delay_next([Duration::from_millis(100)]);
    let latte = h.cart.add_item("latte", 1, medium(), price());
    let scone = h.cart.add_item("scone", 1, Variant::none(), price());
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.auth.sign_in("bob", token());
    let mocha = h.cart.add_item("mocha", 1, Variant::none(), price());

    let latte = latte.await.unwrap();
    assert_eq!(latte.owner, CartOwner::User(UserId::new("alice")));
    assert!(matches!(scone.await, Err(CartError::ScopeChanged)));

    let mocha = mocha.await.unwrap();
    assert_eq!(mocha.owner, CartOwner::User(UserId::new("bob")));

    let alice: Vec<_> = gateway.lines("alice").into_iter().map(|l| l.product_id).collect();
    let bob: Vec<_> = gateway.lines("bob").into_iter().map(|l| l.product_id).collect();
    assert_eq!(alice, vec![ProductId::new("latte")]);
    assert_eq!(bob, vec![ProductId::new("mocha")]);
}

#[tokio::test]
async fn test_guest_command_queued_across_account_switch_reaches_no_cart() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_in("alice", token());
    h.cart.get_cart().await.unwrap();

    gateway.delay_next([Duration::from_millis(100)]);
    let latte = h.cart.add_item("latte", 1, medium(), price());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Both signals land while the coordinator is busy, so it only ever sees
    // the switch to bob.
    h.auth.sign_out();
    let scone = h.cart.add_item("scone", 1, Variant::none(), price());
    h.auth.sign_in("bob", token());

    latte.await.unwrap();
    assert!(matches!(scone.await, Err(CartError::ScopeChanged)));

    let bob = h.cart.get_cart().await.unwrap();
    assert_eq!(bob.owner, CartOwner::User(UserId::new("bob")));
    assert!(bob.is_empty());
    assert!(!h.persisted_guest_cart().has_items());
    assert_eq!(gateway.quantity_of("alice", "scone", &Variant::none()), 0);
}

// =============================================================================
// Ordering and queueing
// =============================================================================

#[tokio::test]
async fn test_rapid_add_then_remove_leaves_no_line() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_in("u1", token());
    h.cart.get_cart().await.unwrap();

    // The add is slow and the remove instant; the remove must still land last.
    gateway.delay_next([Duration::from_millis(80)]);
    let add = h.cart.add_item("latte", 1, medium(), price());
    let remove = h.cart.remove_item(structural("latte", &medium()));

    let after_remove = remove.await.unwrap();
    let after_add = add.await.unwrap();

    assert_eq!(after_add.len(), 1);
    assert!(after_remove.is_empty());
    assert!(gateway.lines("u1").is_empty());

    let calls = gateway.calls();
    let add_at = calls.iter().position(|c| matches!(c, Call::Add { .. })).unwrap();
    let remove_at = calls.iter().position(|c| matches!(c, Call::Remove { .. })).unwrap();
    assert!(add_at < remove_at);
}

#[tokio::test]
async fn test_mutations_during_merge_are_queued() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();
    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    h.cart.add_item("scone", 1, Variant::none(), price()).await.unwrap();

    gateway.delay_next([Duration::from_millis(60), Duration::from_millis(60)]);
    h.auth.sign_in("u1", token());
    wait_for_authority(&h, Authority::Merging).await;

    let cart = h
        .cart
        .add_item("mocha", 1, Variant::none(), price())
        .await
        .unwrap();
    assert_eq!(cart.len(), 3);

    let calls = gateway.calls();
    let fetch_at = calls.iter().position(|c| matches!(c, Call::Fetch(_))).unwrap();
    let mocha_at = calls
        .iter()
        .position(|c| matches!(c, Call::Add { product_id, .. } if product_id.as_str() == "mocha"))
        .unwrap();
    assert!(fetch_at < mocha_at);
}

#[tokio::test]
async fn test_sign_out_during_merge_completes_then_returns_to_guest() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_out();
    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();

    gateway.delay_next([Duration::from_millis(60)]);
    h.auth.sign_in("u1", token());
    wait_for_authority(&h, Authority::Merging).await;
    h.auth.sign_out();

    let cart = h.cart.get_cart().await.unwrap();
    assert_eq!(cart.owner, CartOwner::Device);
    assert!(cart.is_empty());
    assert_eq!(h.cart.authority(), Some(Authority::Guest));
    assert_eq!(gateway.quantity_of("u1", "latte", &medium()), 1);

    let report = h.cart.merge_reports().borrow().clone().unwrap();
    assert_eq!(report.replayed.len(), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_quantities_at_the_limit_keep_totals_exact() {
    let h = Harness::start(ScriptedGateway::new());
    h.auth.sign_out();
    let max = i64::from(u32::MAX);

    h.cart.add_item("latte", max, medium(), price()).await.unwrap();
    let cart = h
        .cart
        .add_item("scone", max, Variant::none(), price())
        .await
        .unwrap();
    assert_eq!(cart.item_count(), 2 * u64::from(u32::MAX));

    let cart = h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let latte = MergeKey::new(&ProductId::new("latte"), &medium());
    assert_eq!(cart.quantity_of(&latte), u32::MAX);

    assert!(matches!(
        h.cart.add_item("latte", max + 1, medium(), price()).await,
        Err(CartError::InvalidQuantity(_))
    ));
    assert!(matches!(
        h.cart.set_item_quantity(structural("latte", &medium()), max + 1).await,
        Err(CartError::InvalidQuantity(_))
    ));
    assert_eq!(h.persisted_guest_cart().count(), 2 * u64::from(u32::MAX));
}

#[tokio::test]
async fn test_failed_mutation_leaves_cart_unchanged() {
    let gateway = ScriptedGateway::new();
    let h = Harness::start(gateway.clone());
    h.auth.sign_in("u1", token());
    let before = h.cart.add_item("latte", 1, medium(), price()).await.unwrap();

    gateway.fail_next(GatewayErrorKind::Timeout);
    let err = h
        .cart
        .add_item("scone", 1, Variant::none(), price())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.cart.get_cart().await.unwrap().lines, before.lines);

    gateway.fail_next(GatewayErrorKind::Status(400));
    let err = h.cart.clear_cart().await.unwrap_err();
    assert!(matches!(err, CartError::Gateway(_)));
    assert!(!err.is_retryable());
    assert_eq!(gateway.lines("u1").len(), 1);
}

#[tokio::test]
async fn test_calls_before_auth_signal_are_misuse() {
    let h = Harness::start(ScriptedGateway::new());
    assert!(matches!(h.cart.get_cart().await, Err(CartError::AuthUnresolved)));
    assert!(matches!(h.cart.clear_cart().await, Err(CartError::AuthUnresolved)));

    h.auth.sign_out();
    assert!(h.cart.get_cart().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_observers_see_confirmed_carts() {
    let h = Harness::start(ScriptedGateway::new());
    let views = h.cart.subscribe();
    h.auth.sign_out();

    h.cart.add_item("latte", 1, medium(), price()).await.unwrap();
    let view = views.borrow().clone().unwrap();
    assert_eq!(view.authority, Authority::Guest);
    assert_eq!(view.cart.item_count(), 1);

    h.auth.sign_in("u1", token());
    h.cart.get_cart().await.unwrap();
    let view = views.borrow().clone().unwrap();
    assert_eq!(view.authority, Authority::Authenticated);
    assert_eq!(view.cart.owner, CartOwner::User(UserId::new("u1")));
}
