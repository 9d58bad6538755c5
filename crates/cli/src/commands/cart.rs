//! Cart commands against whichever authority the session resolved to.

use cart_sync_core::{CurrencyCode, LineKey, Price, Variant};
use rust_decimal::Decimal;

use super::{CliError, Session, print_cart};

/// Build a variant from optional command-line attributes.
pub fn variant(
    size: Option<String>,
    temperature: Option<String>,
    customizations: Option<String>,
) -> Variant {
    Variant {
        size,
        temperature,
        customizations,
    }
}

pub async fn show(session: &Session, refresh: bool) -> Result<(), CliError> {
    let cart = if refresh {
        session.cart.refresh_cart().await?
    } else {
        session.cart.get_cart().await?
    };
    print_cart(&cart)
}

pub async fn add(
    session: &Session,
    product: String,
    quantity: i64,
    variant: Variant,
    price: Decimal,
) -> Result<(), CliError> {
    let unit_price = Price::new(price, CurrencyCode::default());
    let cart = session
        .cart
        .add_item(product, quantity, variant, unit_price)
        .await?;
    tracing::info!(lines = cart.len(), items = cart.item_count(), "Item added");
    print_cart(&cart)
}

pub async fn set(session: &Session, key: String, quantity: i64) -> Result<(), CliError> {
    let cart = session
        .cart
        .set_item_quantity(LineKey::new(key), quantity)
        .await?;
    print_cart(&cart)
}

pub async fn remove(session: &Session, key: String) -> Result<(), CliError> {
    let cart = session.cart.remove_item(LineKey::new(key)).await?;
    print_cart(&cart)
}

pub async fn clear(session: &Session) -> Result<(), CliError> {
    let cart = session.cart.clear_cart().await?;
    tracing::info!(owner = %cart.owner, "Cart cleared");
    print_cart(&cart)
}
