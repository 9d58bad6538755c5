//! Cart consistency and synchronization engine.
//!
//! Keeps a shopping cart consistent across two authorities: an on-device
//! guest cart used while no credential is present, and the backend's cart
//! once the user signs in. At sign-in the guest cart is merged into the
//! remote cart exactly once.
//!
//! # Modules
//!
//! - [`store`] - Durable guest cart
//! - [`gateway`] - Remote cart transport (trait + REST client)
//! - [`coordinator`] - Authority switching, merge protocol, caller API
//! - [`auth`] - Authentication signal channel
//! - [`config`], [`error`], [`telemetry`] - Ambient plumbing

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod store;
pub mod telemetry;

pub use auth::{AuthPublisher, AuthSubscription, auth_channel};
pub use config::{ConfigError, EngineConfig, GatewayConfig};
pub use coordinator::{
    Authority, CartCoordinator, CartReply, CartView, CoordinatorOptions, LoggingMergeHook,
    MergeLineHook, MergeReport,
};
pub use error::{CartError, Result};
pub use gateway::{CartGateway, GatewayError, GatewayErrorKind, HttpCartGateway, RemoteIdentity};
pub use store::LocalCartStore;
