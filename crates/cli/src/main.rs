//! Cart CLI - Operate the cart engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Guest cart (no credential)
//! cart-cli add latte --qty 2 --price 4.50 --size Medium
//! cart-cli show
//! cart-cli set 'local:5:latte6:Medium0:0:' 3
//! cart-cli remove 'local:5:latte6:Medium0:0:'
//!
//! # Merge the guest cart into an account and show the result
//! cart-cli sync --user user-1 --token "$TOKEN"
//!
//! # Remote cart
//! CART_USER_ID=user-1 CART_TOKEN=... cart-cli show
//! ```
//!
//! Supplying a credential signs in, which merges any guest cart first.
//!
//! # Environment Variables
//!
//! See `cart_sync::config` for engine settings. `CART_USER_ID` and
//! `CART_TOKEN` stand in for `--user` and `--token`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use cart_sync::{EngineConfig, telemetry};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

mod commands;

#[derive(Parser)]
#[command(name = "cart-cli")]
#[command(author, version, about = "Guest and account cart tools")]
struct Cli {
    /// Account to act for; omit to use the guest cart
    #[arg(long, global = true, env = "CART_USER_ID")]
    user: Option<String>,

    /// Bearer credential for the account
    #[arg(long, global = true, env = "CART_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current cart
    Show {
        /// Bypass the cached remote snapshot
        #[arg(long)]
        refresh: bool,
    },
    /// Add units of a product
    Add {
        /// Product id
        product: String,

        /// Units to add
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        qty: i64,

        /// Unit price recorded on guest lines
        #[arg(short, long, default_value = "0")]
        price: Decimal,

        #[arg(long)]
        size: Option<String>,

        #[arg(long)]
        temperature: Option<String>,

        #[arg(long)]
        customizations: Option<String>,
    },
    /// Set a line's quantity (0 or less removes it)
    Set {
        /// Line key as printed by `show`
        key: String,

        #[arg(allow_negative_numbers = true)]
        qty: i64,
    },
    /// Remove a line
    Remove {
        /// Line key as printed by `show`
        key: String,
    },
    /// Remove every line
    Clear,
    /// Merge the guest cart into an account
    Sync,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_minimal();
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _sentry_guard = telemetry::init(&config);

    match run(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: &EngineConfig) -> Result<(), commands::CliError> {
    let session = commands::Session::start(config, cli.user, cli.token)?;

    let result = match cli.command {
        Commands::Show { refresh } => commands::cart::show(&session, refresh).await,
        Commands::Add {
            product,
            qty,
            price,
            size,
            temperature,
            customizations,
        } => {
            let variant = commands::cart::variant(size, temperature, customizations);
            commands::cart::add(&session, product, qty, variant, price).await
        }
        Commands::Set { key, qty } => commands::cart::set(&session, key, qty).await,
        Commands::Remove { key } => commands::cart::remove(&session, key).await,
        Commands::Clear => commands::cart::clear(&session).await,
        Commands::Sync => commands::sync::run(&session).await,
    };

    session.finish().await;
    result
}
