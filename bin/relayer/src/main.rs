//! Nomad Development Relayer
//!
//! Serves the append-log relayer endpoints from memory, for running the CLI
//! against a local log.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (localhost:8888)
//! nomad-relayer
//!
//! # Run on custom address
//! nomad-relayer --bind 0.0.0.0:9000
//!
//! # Enable debug logging
//! RUST_LOG=debug nomad-relayer
//! ```

use nomad::relayer::MemoryRelayer;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nomad_relayer=info,nomad=info,tower_http=debug".into()),
        )
        .init();

    // Parse command line args
    let bind_addr = std::env::args()
        .nth(1)
        .filter(|arg| arg == "--bind")
        .and_then(|_| std::env::args().nth(2))
        .unwrap_or_else(|| "127.0.0.1:8888".to_string());

    let app = nomad_relayer::router(Arc::new(MemoryRelayer::new()));

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Nomad development relayer running on http://{}", bind_addr);
    info!("  GET  /blob/:name/info");
    info!("  POST /relayer/precommit");
    info!("  POST /relayer/commit");
    info!("  GET  /relayer/records/:refhash");
    info!("  POST /relayer/identities");

    axum::serve(listener, app).await?;
    Ok(())
}
