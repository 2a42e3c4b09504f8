//! Lootbox cycle runner
//!
//! Registers the configured payer if needed, then runs one request →
//! fulfillment → mint cycle and reports the outcome. Configuration comes
//! from the environment (see [`lootbox_client::config`]).

use anyhow::Result;
use lootbox_client::{LootboxClient, LootboxConfig, RpcLedger};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,solana_client=warn,solana_rpc_client=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = LootboxConfig::from_env()?;

    info!(
        program = %config.lootbox_program_id,
        payer = %config.payer_pubkey(),
        queue = %config.oracle_queue,
        "Starting lootbox client"
    );
    info!(rpc = %config.rpc_url, ws = %config.ws_url, "Endpoints configured");

    let ledger = RpcLedger::new(&config.rpc_url, &config.ws_url);
    let timeout = config.callback_timeout;
    let client = LootboxClient::new(ledger, config);
    let user_state = client.config().user_state();

    if client.is_registered().await? {
        info!(user_state = %user_state, "User already registered");
    } else {
        let registration = client.register_user().await?;
        info!(
            user_state = %registration.user_state,
            vrf = %registration.vrf.address,
            permission = %registration.permission.address,
            "Registration complete"
        );
    }

    let outcome = tokio::select! {
        outcome = client.run_cycle(&user_state, timeout) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, request may still be outstanding");
            return Ok(());
        }
    };

    let metrics = client.metrics().to_json();
    match outcome {
        Ok(outcome) => {
            info!(outcome = %serde_json::to_string(&outcome)?, metrics = %metrics, "Cycle complete");
            Ok(())
        }
        Err(e) => {
            warn!(metrics = %metrics, "Cycle failed");
            Err(e)
        }
    }
}
