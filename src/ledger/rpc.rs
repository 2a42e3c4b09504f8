//! [`LedgerClient`] over Solana JSON-RPC (HTTP) and PubSub (WebSocket).

use anyhow::{anyhow, Context, Result};
use futures_util::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcAccountInfoConfig;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{AccountSubscription, LedgerClient};
use crate::error::LootboxError;

/// Ledger access through a cluster's RPC and WebSocket endpoints.
#[derive(Clone)]
pub struct RpcLedger {
    rpc: Arc<RpcClient>,
    ws_url: String,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(rpc_url: &str, ws_url: &str) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            rpc: Arc::new(RpcClient::new_with_commitment(rpc_url.to_string(), commitment)),
            ws_url: ws_url.to_string(),
            commitment,
        }
    }
}

impl LedgerClient for RpcLedger {
    async fn latest_blockhash(&self) -> Result<Hash> {
        self.rpc
            .get_latest_blockhash()
            .await
            .context("get_latest_blockhash failed")
    }

    async fn submit(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
        recent_blockhash: Hash,
    ) -> Result<Signature> {
        let payer = signers
            .first()
            .ok_or_else(|| anyhow!("at least one signer is required"))?
            .pubkey();
        let tx = Transaction::new_signed_with_payer(
            instructions,
            Some(&payer),
            signers,
            recent_blockhash,
        );

        self.rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| {
                LootboxError::SubmissionRejected {
                    reason: e.to_string(),
                }
                .into()
            })
    }

    async fn fetch_account(&self, address: &Pubkey) -> Result<Vec<u8>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await
            .with_context(|| format!("get_account failed for {address}"))?;

        match response.value {
            Some(account) => Ok(account.data),
            None => Err(LootboxError::NotFound { account: *address }.into()),
        }
    }

    async fn rent_exempt_minimum(&self, len: usize) -> Result<u64> {
        self.rpc
            .get_minimum_balance_for_rent_exemption(len)
            .await
            .context("get_minimum_balance_for_rent_exemption failed")
    }

    /// Spawn a task that owns the WebSocket connection and forwards decoded
    /// account snapshots. Releasing the handle signals the task, which then
    /// unsubscribes and shuts the connection down.
    async fn subscribe(&self, address: &Pubkey) -> Result<AccountSubscription> {
        let address = *address;
        let ws_url = self.ws_url.clone();
        let commitment = self.commitment;

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (release_tx, mut release_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        tokio::spawn(async move {
            let pubsub = match PubsubClient::new(&ws_url).await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!(e).context("failed to connect to WebSocket")));
                    return;
                }
            };

            let config = RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(commitment),
                ..Default::default()
            };

            let (mut stream, unsubscribe) = match pubsub.account_subscribe(&address, Some(config)).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!(e).context("account_subscribe failed")));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            info!(account = %address, "Account subscription opened");

            loop {
                tokio::select! {
                    _ = &mut release_rx => break,
                    update = stream.next() => match update {
                        Some(response) => {
                            let Some(data) = response.value.data.decode() else {
                                debug!(account = %address, "Failed to decode account notification, skipping");
                                continue;
                            };
                            if updates_tx.send(data).is_err() {
                                break;
                            }
                        }
                        None => {
                            warn!(account = %address, "Account notification stream ended");
                            break;
                        }
                    },
                }
            }

            drop(stream);
            unsubscribe().await;
            if let Err(e) = pubsub.shutdown().await {
                error!(error = %e, "Failed to shut down WebSocket");
            }
            info!(account = %address, "Account subscription closed");
        });

        ready_rx
            .await
            .context("subscription task exited before reporting readiness")??;

        Ok(AccountSubscription::new(address, updates_rx, move || {
            let _ = release_tx.send(());
        }))
    }
}
