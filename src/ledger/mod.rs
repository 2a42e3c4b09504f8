//! Ledger access seam.
//!
//! [`LedgerClient`] is the narrow interface the orchestration layer consumes:
//! submit a signed batch, read an account, watch an account for changes.
//! [`rpc::RpcLedger`] implements it over JSON-RPC and PubSub.

pub mod rpc;

use anyhow::{Context, Result};
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::LootboxError;
use crate::instructions::set_compute_unit_price;

/// Upper bound for the backoff between stale-blockhash retries.
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Minimal ledger surface used by the lootbox cycle.
pub trait LedgerClient: Send + Sync {
    /// Fetch a fresh anti-replay token.
    fn latest_blockhash(&self) -> impl Future<Output = Result<Hash>> + Send;

    /// Sign `instructions` with `signers` (the first pays fees) and submit.
    ///
    /// Returns once the ledger has confirmed the batch. A refusal surfaces
    /// as [`LootboxError::SubmissionRejected`] carrying the ledger's reason.
    fn submit(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
        recent_blockhash: Hash,
    ) -> impl Future<Output = Result<Signature>> + Send;

    /// Fetch raw account data. Missing accounts are [`LootboxError::NotFound`].
    fn fetch_account(&self, address: &Pubkey) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Lamports needed to keep an account of `len` bytes rent exempt.
    fn rent_exempt_minimum(&self, len: usize) -> impl Future<Output = Result<u64>> + Send;

    /// Open a change subscription on `address`.
    fn subscribe(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<AccountSubscription>> + Send;

    /// Tear down a subscription.
    fn unsubscribe(&self, subscription: AccountSubscription) {
        subscription.close();
    }
}

/// Exclusive handle on one account-change subscription.
///
/// The release hook runs exactly once: on [`close`](Self::close) or, if the
/// handle is dropped first, on drop.
pub struct AccountSubscription {
    address: Pubkey,
    updates: mpsc::UnboundedReceiver<Vec<u8>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl AccountSubscription {
    pub fn new(
        address: Pubkey,
        updates: mpsc::UnboundedReceiver<Vec<u8>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            address,
            updates,
            release: Some(Box::new(release)),
        }
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    /// Next raw account snapshot, or `None` once the stream has ended.
    pub async fn next_update(&mut self) -> Option<Vec<u8>> {
        self.updates.recv().await
    }

    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            debug!(account = %self.address, "Releasing account subscription");
            release();
        }
    }
}

impl Drop for AccountSubscription {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Submission tuning shared by every batch this client sends.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Attempts per batch when the anti-replay token has expired.
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    /// Prefix batches with a compute-unit price when non-zero.
    pub priority_fee_micro_lamports: u64,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay: Duration::from_millis(500),
            priority_fee_micro_lamports: 0,
        }
    }
}

/// Prefix `instructions` with the priority-fee instruction when configured.
pub fn with_priority_fee(instructions: &[Instruction], options: &SubmitOptions) -> Vec<Instruction> {
    let mut batch = Vec::with_capacity(instructions.len() + 1);
    if options.priority_fee_micro_lamports > 0 {
        batch.push(set_compute_unit_price(options.priority_fee_micro_lamports));
    }
    batch.extend_from_slice(instructions);
    batch
}

/// An accepted batch and the anti-replay token it was signed against.
#[derive(Debug, Clone, Copy)]
pub struct Submitted {
    pub signature: Signature,
    pub recent_blockhash: Hash,
}

/// Submit a batch, refreshing the blockhash with exponential backoff while
/// the ledger reports it stale. Any other rejection is returned verbatim.
pub async fn send_with_retries<L: LedgerClient>(
    ledger: &L,
    options: &SubmitOptions,
    instructions: &[Instruction],
    signers: &[&Keypair],
) -> Result<Submitted> {
    let batch = with_priority_fee(instructions, options);
    let mut retry_delay = options.initial_retry_delay;
    let attempts = options.max_retries.max(1);

    for attempt in 0..attempts {
        let recent_blockhash = ledger
            .latest_blockhash()
            .await
            .context("failed to fetch latest blockhash")?;

        match ledger.submit(&batch, signers, recent_blockhash).await {
            Ok(signature) => {
                return Ok(Submitted {
                    signature,
                    recent_blockhash,
                });
            }
            Err(e) if is_stale_blockhash(&e) && attempt + 1 < attempts => {
                warn!(
                    attempt = attempt + 1,
                    delay = ?retry_delay,
                    "BlockhashNotFound, retrying"
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay = retry_delay.saturating_mul(2).min(MAX_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }

    anyhow::bail!("max retries ({attempts}) exceeded")
}

pub(crate) fn is_stale_blockhash(err: &anyhow::Error) -> bool {
    LootboxError::classify(err).is_some_and(LootboxError::is_stale_blockhash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn release_runs_once_on_close() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (_tx, rx) = mpsc::unbounded_channel();
        let sub = AccountSubscription::new(Pubkey::new_unique(), rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_runs_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (_tx, rx) = mpsc::unbounded_channel();
        {
            let _sub = AccountSubscription::new(Pubkey::new_unique(), rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn priority_fee_prefix_only_when_configured() {
        let ix = crate::instructions::set_compute_unit_price(1);
        let none = with_priority_fee(std::slice::from_ref(&ix), &SubmitOptions::default());
        assert_eq!(none.len(), 1);

        let options = SubmitOptions {
            priority_fee_micro_lamports: 10,
            ..Default::default()
        };
        let some = with_priority_fee(std::slice::from_ref(&ix), &options);
        assert_eq!(some.len(), 2);
    }
}
