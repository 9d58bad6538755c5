//! Core types for the cart engine.
//!
//! This module provides type-safe wrappers for cart domain concepts.

pub mod auth;
pub mod cart;
pub mod credential;
pub mod id;
pub mod line_item;
pub mod price;

pub use auth::AuthSignal;
pub use cart::{Cart, CartOwner};
pub use credential::Credential;
pub use id::*;
pub use line_item::{LineItem, LineItemError, LineKey, MergeKey, Variant};
pub use price::{CurrencyCode, Price};
