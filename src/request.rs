//! Randomness request submission.
//!
//! Submission is fire-and-forget: it returns once the ledger accepts the
//! request instruction. The oracle's fulfillment arrives later as an update
//! to the user state and is observed by [`crate::waiter`].

use anyhow::{Context, Result};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::{info, instrument};

use crate::config::LootboxConfig;
use crate::instructions::{self, RequestRandomnessAccounts};
use crate::ledger::{send_with_retries, LedgerClient};
use crate::pda;
use crate::registration::load_program_state;
use crate::switchboard::{PermissionRecord, QueueState, VrfRecord};

/// The accounts an accepted request referenced and the blockhash it was
/// signed against.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub accounts: RequestRandomnessAccounts,
    /// Anti-replay token the batch is signed against.
    pub recent_blockhash: Hash,
}

/// Proof that the ledger accepted a request.
#[derive(Debug, Clone)]
pub struct SubmissionHandle {
    pub signature: Signature,
    pub context: RequestContext,
}

/// Resolve every account the request references.
pub async fn resolve_request_accounts<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
    user_state: &Pubkey,
    vrf: &VrfRecord,
    queue: &QueueState,
    permission: &PermissionRecord,
    stake_token_account: &Pubkey,
) -> Result<RequestRandomnessAccounts> {
    let (program_state, payer_wallet) = match config.payer_token_wallet {
        Some(wallet) => (pda::program_state_address(&config.switchboard_program_id).0, wallet),
        None => {
            let state = load_program_state(ledger, &config.switchboard_program_id).await?;
            let wallet = pda::associated_token_address(&config.payer_pubkey(), &state.token_mint);
            (state.address, wallet)
        }
    };

    Ok(RequestRandomnessAccounts {
        state: *user_state,
        vrf: vrf.address,
        oracle_queue: queue.address,
        queue_authority: queue.authority,
        data_buffer: queue.data_buffer,
        permission: permission.address,
        escrow: vrf.escrow,
        program_state,
        switchboard_program: config.switchboard_program_id,
        payer_wallet,
        payer: config.payer_pubkey(),
        stake_mint: config.stake_mint,
        stake_token_account: *stake_token_account,
    })
}

/// Build and submit `request_randomness` for `user_state`.
///
/// A stale blockhash is refreshed and the submission retried with backoff;
/// every other rejection, including one for an already outstanding request,
/// is returned as the ledger reported it.
#[instrument(skip_all, fields(user_state = %user_state, vrf = %vrf.address))]
pub async fn submit_request<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
    user_state: &Pubkey,
    vrf: &VrfRecord,
    queue: &QueueState,
    permission: &PermissionRecord,
    stake_token_account: &Pubkey,
) -> Result<SubmissionHandle> {
    let accounts = resolve_request_accounts(
        ledger,
        config,
        user_state,
        vrf,
        queue,
        permission,
        stake_token_account,
    )
    .await?;

    let ix = instructions::request_randomness(&config.lootbox_program_id, &accounts);
    let submitted = send_with_retries(ledger, &config.submit, &[ix], &[config.payer.as_ref()])
        .await
        .with_context(|| format!("request_randomness rejected for {user_state}"))?;

    info!(
        signature = %submitted.signature,
        explorer = %config.explorer_url(&submitted.signature.to_string()),
        "Randomness requested"
    );
    Ok(SubmissionHandle {
        signature: submitted.signature,
        context: RequestContext {
            accounts,
            recent_blockhash: submitted.recent_blockhash,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LootboxError;
    use crate::registration::register_user;
    use crate::testing::Fixture;

    #[tokio::test(start_paused = true)]
    async fn request_without_permission_record_is_rejected() {
        let fixture = Fixture::new(false, false);
        let registration = register_user(&fixture.ledger, &fixture.config).await.unwrap();

        let missing = PermissionRecord {
            address: Pubkey::new_unique(),
            ..registration.permission.clone()
        };
        let err = submit_request(
            &fixture.ledger,
            &fixture.config,
            &registration.user_state,
            &registration.vrf,
            &registration.queue,
            &missing,
            &fixture.config.stake_token_account(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            LootboxError::classify(&err),
            Some(LootboxError::SubmissionRejected { .. })
        ));
        assert!(!fixture.ledger.user_state(&registration.user_state).redeemable);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_payer_wallet_skips_program_state_lookup() {
        let mut fixture = Fixture::new(false, false);
        let wallet = Pubkey::new_unique();
        fixture.config.payer_token_wallet = Some(wallet);
        let registration = register_user(&fixture.ledger, &fixture.config).await.unwrap();

        let accounts = resolve_request_accounts(
            &fixture.ledger,
            &fixture.config,
            &registration.user_state,
            &registration.vrf,
            &registration.queue,
            &registration.permission,
            &fixture.config.stake_token_account(),
        )
        .await
        .unwrap();
        assert_eq!(accounts.payer_wallet, wallet);
        assert_eq!(
            accounts.program_state,
            pda::program_state_address(&fixture.config.switchboard_program_id).0
        );
    }
}
