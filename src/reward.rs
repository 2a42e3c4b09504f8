//! Reward minting once randomness has been delivered.

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::{info, instrument};

use crate::accounts::UserState;
use crate::config::LootboxConfig;
use crate::error::LootboxError;
use crate::instructions;
use crate::ledger::{send_with_retries, LedgerClient};

/// Read and decode a user state record.
pub async fn fetch_user_state<L: LedgerClient>(ledger: &L, address: &Pubkey) -> Result<UserState> {
    let data = ledger
        .fetch_account(address)
        .await
        .with_context(|| format!("failed to load user state {address}"))?;
    UserState::from_bytes(&data).ok_or_else(|| {
        LootboxError::Decode {
            account: *address,
            reason: "not a valid UserState".into(),
        }
        .into()
    })
}

/// Mint the reward selected by the last fulfillment.
///
/// The user state is always re-read here so the destination reflects the
/// callback's write, never a snapshot taken before the wait.
#[instrument(skip_all, fields(user_state = %user_state))]
pub async fn mint_reward<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
    user_state: &Pubkey,
) -> Result<Signature> {
    let state = fetch_user_state(ledger, user_state).await?;
    if !state.has_reward_destination() {
        return Err(LootboxError::StaleState {
            account: *user_state,
        })
        .context("mint_reward called before fulfillment completed");
    }

    let ix = instructions::mint_reward(
        &config.lootbox_program_id,
        user_state,
        &state.mint,
        &state.token_account,
        &config.payer_pubkey(),
    );
    let sig = send_with_retries(ledger, &config.submit, &[ix], &[config.payer.as_ref()])
        .await
        .with_context(|| format!("mint_reward rejected for {user_state}"))?
        .signature;

    info!(
        mint = %state.mint,
        token_account = %state.token_account,
        signature = %sig,
        explorer = %config.explorer_url(&sig.to_string()),
        "Reward minted"
    );
    Ok(sig)
}
