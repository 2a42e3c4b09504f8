//! The request → fulfillment → mint cycle for one payer.

use anyhow::{Context, Result};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::accounts::{Lootbox, UserState};
use crate::config::LootboxConfig;
use crate::error::LootboxError;
use crate::instructions;
use crate::ledger::{send_with_retries, LedgerClient};
use crate::metrics::CycleMetrics;
use crate::pda;
use crate::registration::{
    self, account_exists, load_permission_record, load_vrf_record, resolve_queue_state,
    Registration,
};
use crate::request::{submit_request, SubmissionHandle};
use crate::reward;
use crate::waiter::await_callback;

/// Result of one full cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub request_signature: String,
    pub result: u128,
    pub reward_signature: String,
    pub fulfillment_latency_ms: u64,
}

/// Lootbox operations bound to a ledger and a configuration.
pub struct LootboxClient<L> {
    ledger: L,
    config: LootboxConfig,
    metrics: Arc<CycleMetrics>,
}

impl<L: LedgerClient> LootboxClient<L> {
    pub fn new(ledger: L, config: LootboxConfig) -> Self {
        Self {
            ledger,
            config,
            metrics: Arc::new(CycleMetrics::new()),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &LootboxConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<CycleMetrics> {
        self.metrics.clone()
    }

    /// Create the program-wide lootbox record listing the three reward mints.
    #[instrument(skip_all)]
    pub async fn init_lootbox(&self, mints: [Pubkey; 3]) -> Result<Signature> {
        let (lootbox, _) = pda::lootbox_address(&self.config.lootbox_program_id);
        if account_exists(&self.ledger, &lootbox).await? {
            return Err(LootboxError::Allocation { account: lootbox })
                .context("lootbox is already initialized");
        }

        let ix = instructions::init_lootbox(
            &self.config.lootbox_program_id,
            &self.config.payer_pubkey(),
            mints,
        );
        let sig = send_with_retries(
            &self.ledger,
            &self.config.submit,
            &[ix],
            &[self.config.payer.as_ref()],
        )
        .await
        .context("failed to initialize lootbox")?
        .signature;

        info!(lootbox = %lootbox, signature = %sig, "Lootbox initialized");
        Ok(sig)
    }

    pub async fn fetch_lootbox(&self) -> Result<Lootbox> {
        let (address, _) = pda::lootbox_address(&self.config.lootbox_program_id);
        let data = self
            .ledger
            .fetch_account(&address)
            .await
            .with_context(|| format!("failed to load lootbox {address}"))?;
        Lootbox::from_bytes(&data).ok_or_else(|| {
            LootboxError::Decode {
                account: address,
                reason: "not a valid Lootbox".into(),
            }
            .into()
        })
    }

    pub async fn register_user(&self) -> Result<Registration> {
        registration::register_user(&self.ledger, &self.config).await
    }

    /// Whether the payer's user state already exists.
    pub async fn is_registered(&self) -> Result<bool> {
        account_exists(&self.ledger, &self.config.user_state()).await
    }

    pub async fn fetch_user_state(&self, user_state: &Pubkey) -> Result<UserState> {
        reward::fetch_user_state(&self.ledger, user_state).await
    }

    /// Submit a randomness request for `user_state`.
    ///
    /// The VRF record, queue and permission are re-read from the ledger so the
    /// request reflects current state rather than what registration saw.
    pub async fn request_randomness(&self, user_state: &Pubkey) -> Result<SubmissionHandle> {
        let state = self.fetch_user_state(user_state).await?;
        let vrf = load_vrf_record(&self.ledger, &state.vrf).await?;
        let queue = resolve_queue_state(&self.ledger, &vrf.oracle_queue).await?;
        let permission = load_permission_record(
            &self.ledger,
            &self.config.switchboard_program_id,
            &queue,
            &vrf.address,
        )
        .await?;

        match submit_request(
            &self.ledger,
            &self.config,
            user_state,
            &vrf,
            &queue,
            &permission,
            &self.config.stake_token_account(),
        )
        .await
        {
            Ok(handle) => {
                self.metrics.record_request();
                Ok(handle)
            }
            Err(e) => {
                self.metrics.record_rejection();
                Err(e)
            }
        }
    }

    /// Wait for the fulfillment callback on `user_state`.
    pub async fn await_fulfillment(&self, user_state: &Pubkey, timeout: Duration) -> Result<u128> {
        let started = Instant::now();
        match await_callback(&self.ledger, user_state, timeout).await {
            Ok(result) => {
                self.metrics
                    .record_fulfillment(started.elapsed().as_millis() as u64);
                Ok(result)
            }
            Err(e) => {
                if matches!(LootboxError::classify(&e), Some(LootboxError::Timeout { .. })) {
                    self.metrics.record_timeout();
                }
                Err(e)
            }
        }
    }

    pub async fn mint_reward(&self, user_state: &Pubkey) -> Result<Signature> {
        let sig = reward::mint_reward(&self.ledger, &self.config, user_state).await?;
        self.metrics.record_mint();
        Ok(sig)
    }

    /// Request, wait for the callback, then mint the selected reward.
    ///
    /// A timeout aborts the cycle without minting; the request stays
    /// outstanding on-ledger.
    #[instrument(skip_all, fields(user_state = %user_state))]
    pub async fn run_cycle(&self, user_state: &Pubkey, timeout: Duration) -> Result<CycleOutcome> {
        let handle = self.request_randomness(user_state).await?;
        let started = Instant::now();
        let result = self.await_fulfillment(user_state, timeout).await?;
        let fulfillment_latency_ms = started.elapsed().as_millis() as u64;
        let reward_signature = self.mint_reward(user_state).await?;

        Ok(CycleOutcome {
            request_signature: handle.signature.to_string(),
            result,
            reward_signature: reward_signature.to_string(),
            fulfillment_latency_ms,
        })
    }
}
