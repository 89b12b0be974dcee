//! Dispatch gateway binary.
//!
//! # Usage
//!
//! ```bash
//! # Credentials come from the environment: "token:driver" pairs.
//! DISPATCH_AUTH_TOKENS="tok-1:driver-1,tok-2:driver-2" \
//!     dispatch-gateway --bind 0.0.0.0:8080
//! ```
//!
//! Drivers connect with `ws://host:8080/?token=tok-1`; dashboards connect
//! with `ws://host:8080/?dashboard=true`.

use std::sync::Arc;

use clap::Parser;
use dispatch_core::{
    services::{MemoryProfileStore, MemoryTripService, StaticTokenVerifier},
    Coordinator,
};
use dispatch_gateway::{Gateway, GatewayConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Real-time driver presence and trip-dispatch gateway
#[derive(Parser, Debug)]
#[command(name = "dispatch-gateway")]
#[command(about = "WebSocket gateway for driver presence and trip dispatch")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("dispatch gateway starting");

    let pairs = token_pairs_from_env();
    if pairs.is_empty() {
        tracing::warn!("DISPATCH_AUTH_TOKENS is empty - no driver can authenticate");
    }

    let store = MemoryProfileStore::new();
    for (_, driver_id) in &pairs {
        store.seed_driver(driver_id.clone());
    }
    let auth = StaticTokenVerifier::new(pairs);
    let trips = MemoryTripService::new();

    let coordinator =
        Arc::new(Coordinator::new(Arc::new(store), Arc::new(trips), Arc::new(auth)));

    let gateway = Gateway::bind(GatewayConfig { bind_address: args.bind }, coordinator).await?;
    tracing::info!("gateway listening on {}", gateway.local_addr()?);

    gateway.run().await?;

    Ok(())
}

/// Parse `DISPATCH_AUTH_TOKENS` ("token:driver,token:driver") into pairs.
fn token_pairs_from_env() -> Vec<(String, String)> {
    std::env::var("DISPATCH_AUTH_TOKENS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|entry| {
            let (token, driver) = entry.trim().split_once(':')?;
            if token.is_empty() || driver.is_empty() {
                return None;
            }
            Some((token.to_string(), driver.to_string()))
        })
        .collect()
}
