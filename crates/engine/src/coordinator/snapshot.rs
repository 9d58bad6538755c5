//! Cache of confirmed remote snapshots.

use std::time::Duration;

use cart_sync_core::{Cart, CartOwner, UserId};
use moka::future::Cache;

/// Users whose snapshots may be held at once. Only one is ever active; the
/// headroom covers entries awaiting invalidation.
const MAX_CACHED_USERS: u64 = 8;

/// Latest confirmed remote cart per user.
///
/// Only gateway responses are ever stored, so a cached entry is always a
/// snapshot the backend confirmed.
#[derive(Clone)]
pub struct SnapshotCache {
    cache: Cache<UserId, Cart>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_USERS)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub async fn get(&self, user_id: &UserId) -> Option<Cart> {
        self.cache.get(user_id).await
    }

    /// Record a confirmed snapshot under its owner. Guest carts are ignored.
    pub async fn store(&self, cart: &Cart) {
        if let CartOwner::User(user_id) = &cart.owner {
            self.cache.insert(user_id.clone(), cart.clone()).await;
        }
    }

    pub async fn invalidate(&self, user_id: &UserId) {
        self.cache.invalidate(user_id).await;
    }
}
