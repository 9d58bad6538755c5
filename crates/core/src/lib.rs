//! Cart Sync Core - Shared cart types.
//!
//! This crate provides the value types shared by the cart engine, its CLI and
//! its tests:
//! - `cart-sync` - Local store, remote gateway and coordinator
//! - `cart-sync-cli` - Command-line access to a device cart
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no persistence, no HTTP
//! clients. Everything here is plain data plus the merge-key equality rule.
//!
//! # Modules
//!
//! - [`types`] - Ids, prices, line items, cart snapshots and the auth signal

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
