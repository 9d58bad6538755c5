//! Messages from coordinator handles to the coordinator task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use cart_sync_core::{Cart, CartOwner, LineKey, Price, ProductId, Variant};
use tokio::sync::oneshot;

use crate::error::{CartError, Result};

pub type Outcome<T = Cart> = oneshot::Sender<Result<T>>;

/// One queued caller request.
#[derive(Debug)]
pub enum Command {
    Get {
        outcome: Outcome,
    },
    Refresh {
        outcome: Outcome,
    },
    Add {
        product_id: ProductId,
        quantity: u32,
        variant: Variant,
        unit_price: Price,
        outcome: Outcome,
    },
    SetQuantity {
        key: LineKey,
        quantity: i64,
        outcome: Outcome,
    },
    Remove {
        key: LineKey,
        outcome: Outcome,
    },
    Clear {
        outcome: Outcome,
    },
    Shutdown {
        outcome: Outcome<()>,
    },
}

/// A command and the cart owner in effect when the caller issued it.
///
/// `issued_for` is `None` when no authentication signal had been published.
#[derive(Debug)]
pub struct Request {
    pub issued_for: Option<CartOwner>,
    pub command: Command,
}

impl Command {
    /// Operation name for spans.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get_cart",
            Self::Refresh { .. } => "refresh_cart",
            Self::Add { .. } => "add_item",
            Self::SetQuantity { .. } => "set_item_quantity",
            Self::Remove { .. } => "remove_item",
            Self::Clear { .. } => "clear_cart",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

/// Eventual result of a coordinator call.
///
/// The request is queued when the call returns; awaiting the reply is
/// optional. Resolves to [`CartError::Shutdown`] if the coordinator task
/// stopped before answering.
#[derive(Debug)]
pub struct CartReply<T = Cart> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CartReply<T> {
    pub(crate) fn channel() -> (Outcome<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A reply that is already resolved.
    pub(crate) fn ready(result: Result<T>) -> Self {
        let (tx, reply) = Self::channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(result);
        reply
    }
}

impl<T> Future for CartReply<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CartError::Shutdown)))
    }
}
