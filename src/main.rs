//! Tiered Trader - Regime-aware tiered position lifecycle engine
//!
//! Entry point: parses the command line and hands off to the CLI adapter.

use anyhow::Result;

use tiered_trader::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (overrides such as TIERED_LOG_LEVEL go here)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
