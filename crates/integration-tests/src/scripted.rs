//! In-memory gateway with failure injection and per-call latency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cart_sync::{CartGateway, GatewayError, GatewayErrorKind, RemoteIdentity};
use cart_sync::gateway::GatewayResult;
use cart_sync_core::{Cart, CurrencyCode, LineId, LineItem, MergeKey, Price, ProductId, UserId, Variant};

/// A call the gateway received, recorded when it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch(UserId),
    Add {
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    },
    SetQuantity {
        user_id: UserId,
        line_id: LineId,
        quantity: u32,
    },
    Remove {
        user_id: UserId,
        line_id: LineId,
    },
    Clear(UserId),
}

#[derive(Default)]
struct Script {
    carts: HashMap<UserId, Vec<LineItem>>,
    next_id: u64,
    failing_products: HashMap<ProductId, GatewayErrorKind>,
    fail_next: VecDeque<GatewayErrorKind>,
    latencies: VecDeque<Duration>,
    calls: Vec<Call>,
}

/// Gateway backed by per-user carts in memory.
///
/// Adds merge by merge key, like the real backend. Every line is priced at
/// $4.50.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a line into a user's remote cart directly.
    pub fn seed(&self, user_id: &str, product_id: &str, quantity: u32, variant: Variant) {
        let mut script = self.script();
        let line = script.new_line(ProductId::new(product_id), quantity, variant);
        script
            .carts
            .entry(UserId::new(user_id))
            .or_default()
            .push(line);
    }

    /// Every add of `product_id` fails with `kind`.
    pub fn fail_adds_for(&self, product_id: &str, kind: GatewayErrorKind) {
        self.script()
            .failing_products
            .insert(ProductId::new(product_id), kind);
    }

    /// The next call, whatever it is, fails with `kind`.
    pub fn fail_next(&self, kind: GatewayErrorKind) {
        self.script().fail_next.push_back(kind);
    }

    /// The next calls take these durations, in order, before completing.
    pub fn delay_next(&self, latencies: impl IntoIterator<Item = Duration>) {
        self.script().latencies.extend(latencies);
    }

    /// Lines in a user's remote cart.
    #[must_use]
    pub fn lines(&self, user_id: &str) -> Vec<LineItem> {
        self.script()
            .carts
            .get(&UserId::new(user_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Quantity a user's remote cart holds for an entry.
    #[must_use]
    pub fn quantity_of(&self, user_id: &str, product_id: &str, variant: &Variant) -> u32 {
        let key = MergeKey::new(&ProductId::new(product_id), variant);
        self.lines(user_id)
            .iter()
            .find(|l| l.merge_key() == key)
            .map_or(0, |l| l.quantity)
    }

    /// Completed calls in completion order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    /// Completed adds as `(product, quantity)`.
    #[must_use]
    pub fn adds(&self) -> Vec<(ProductId, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Add {
                    product_id,
                    quantity,
                    ..
                } => Some((product_id, quantity)),
                _ => None,
            })
            .collect()
    }

    /// Wait out the scripted latency, then take any injected failure.
    async fn begin(&self) -> GatewayResult<()> {
        let latency = self.script().latencies.pop_front();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.script().fail_next.pop_front() {
            Some(kind) => Err(GatewayError::new(kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn finish(&self, identity: &RemoteIdentity, call: Call) -> Cart {
        let mut script = self.script();
        script.calls.push(call);
        let lines = script
            .carts
            .get(&identity.user_id)
            .cloned()
            .unwrap_or_default();
        identity.snapshot(lines)
    }
}

impl Script {
    fn new_line(&mut self, product_id: ProductId, quantity: u32, variant: Variant) -> LineItem {
        self.next_id += 1;
        LineItem::new(
            product_id,
            quantity,
            variant,
            Price::from_cents(450, CurrencyCode::USD),
        )
        .with_line_id(LineId::new(format!("line-{}", self.next_id)))
    }

    fn cart(&mut self, user_id: &UserId) -> &mut Vec<LineItem> {
        self.carts.entry(user_id.clone()).or_default()
    }
}

impl CartGateway for ScriptedGateway {
    async fn fetch(&self, identity: &RemoteIdentity) -> GatewayResult<Cart> {
        self.begin().await?;
        Ok(self.finish(identity, Call::Fetch(identity.user_id.clone())))
    }

    async fn add(
        &self,
        identity: &RemoteIdentity,
        product_id: &ProductId,
        quantity: u32,
        variant: &Variant,
    ) -> GatewayResult<Cart> {
        self.begin().await?;
        {
            let mut script = self.script();
            if let Some(kind) = script.failing_products.get(product_id).copied() {
                return Err(GatewayError::new(kind, format!("cannot add {product_id}")));
            }
            let key = MergeKey::new(product_id, variant);
            let existing = script
                .cart(&identity.user_id)
                .iter_mut()
                .find(|l| l.merge_key() == key)
                .map(|l| l.quantity += quantity)
                .is_some();
            if !existing {
                let line = script.new_line(product_id.clone(), quantity, variant.clone());
                script.cart(&identity.user_id).push(line);
            }
        }
        Ok(self.finish(
            identity,
            Call::Add {
                user_id: identity.user_id.clone(),
                product_id: product_id.clone(),
                quantity,
            },
        ))
    }

    async fn set_quantity(
        &self,
        identity: &RemoteIdentity,
        line_id: &LineId,
        quantity: u32,
    ) -> GatewayResult<Cart> {
        self.begin().await?;
        let found = self
            .script()
            .cart(&identity.user_id)
            .iter_mut()
            .find(|l| l.line_id.as_ref() == Some(line_id))
            .map(|l| l.quantity = quantity)
            .is_some();
        if !found {
            return Err(GatewayError::new(
                GatewayErrorKind::Status(404),
                format!("line {line_id} not found"),
            ));
        }
        Ok(self.finish(
            identity,
            Call::SetQuantity {
                user_id: identity.user_id.clone(),
                line_id: line_id.clone(),
                quantity,
            },
        ))
    }

    async fn remove(&self, identity: &RemoteIdentity, line_id: &LineId) -> GatewayResult<Cart> {
        self.begin().await?;
        self.script()
            .cart(&identity.user_id)
            .retain(|l| l.line_id.as_ref() != Some(line_id));
        Ok(self.finish(
            identity,
            Call::Remove {
                user_id: identity.user_id.clone(),
                line_id: line_id.clone(),
            },
        ))
    }

    async fn clear(&self, identity: &RemoteIdentity) -> GatewayResult<Cart> {
        self.begin().await?;
        self.script().cart(&identity.user_id).clear();
        Ok(self.finish(identity, Call::Clear(identity.user_id.clone())))
    }
}
