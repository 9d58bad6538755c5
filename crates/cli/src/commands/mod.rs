//! Command implementations.

pub mod cart;
pub mod sync;

use std::io::Write;

use cart_sync::{
    CartCoordinator, CartError, CoordinatorOptions, EngineConfig, GatewayError, HttpCartGateway,
    LocalCartStore, auth_channel,
};
use cart_sync_core::{Cart, Credential};
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// `--user` and `--token` must be given together.
    #[error("Both --user and --token (or CART_USER_ID and CART_TOKEN) are required")]
    MissingCredential,

    /// The HTTP client could not be built.
    #[error("Gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),

    /// The cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Writing output failed.
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running coordinator bound to one identity for the command's lifetime.
pub struct Session {
    pub cart: CartCoordinator,
    pub authenticated: bool,
}

impl Session {
    /// Open the guest cart and start a coordinator for the given identity.
    pub fn start(
        config: &EngineConfig,
        user: Option<String>,
        token: Option<String>,
    ) -> Result<Self, CliError> {
        let gateway = HttpCartGateway::new(&config.gateway)?;
        let store = LocalCartStore::open_file(&config.store_path);

        let (auth, subscription) = auth_channel();
        let authenticated = match (user, token) {
            (Some(user), Some(token)) => {
                auth.sign_in(user, Credential::new(token));
                true
            }
            (None, None) => {
                auth.sign_out();
                false
            }
            _ => return Err(CliError::MissingCredential),
        };

        let cart = CartCoordinator::spawn(
            store,
            gateway,
            subscription,
            CoordinatorOptions::from_config(config),
        );
        Ok(Self {
            cart,
            authenticated,
        })
    }

    /// Let queued work finish and stop the coordinator.
    pub async fn finish(self) {
        if let Err(e) = self.cart.shutdown().await {
            tracing::debug!(error = %e, "Coordinator already stopped");
        }
    }
}

/// Render a cart as a table.
pub fn render_cart(out: &mut impl Write, cart: &Cart) -> std::io::Result<()> {
    writeln!(out, "Cart for {}", cart.owner)?;
    if cart.is_empty() {
        return writeln!(out, "  (empty)");
    }

    writeln!(
        out,
        "  {:<36} {:<16} {:<24} {:>4} {:>10} {:>10}",
        "KEY", "PRODUCT", "VARIANT", "QTY", "UNIT", "TOTAL"
    )?;
    for line in &cart.lines {
        let variant = [
            line.variant.size.as_deref(),
            line.variant.temperature.as_deref(),
            line.variant.customizations.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

        writeln!(
            out,
            "  {:<36} {:<16} {:<24} {:>4} {:>10} {:>10}",
            line.key().as_str(),
            line.product_id.as_str(),
            variant,
            line.quantity,
            line.unit_price.to_string(),
            line.line_total().to_string(),
        )?;
    }
    writeln!(
        out,
        "  {} item(s), subtotal {}",
        cart.item_count(),
        cart.subtotal()
    )
}

/// Render a cart to stdout.
pub fn print_cart(cart: &Cart) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render_cart(&mut out, cart)?;
    Ok(())
}
