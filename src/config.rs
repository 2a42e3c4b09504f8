//! Client configuration, passed explicitly into every operation.
//!
//! Required: `LOOTBOX_PROGRAM_ID`, `ORACLE_QUEUE`, `STAKE_MINT`
//! Optional: `RPC_URL`, `WS_URL`, `PAYER_KEYPAIR_PATH`, `SWITCHBOARD_PROGRAM_ID`,
//!           `PAYER_TOKEN_WALLET`, `STAKE_TOKEN_ACCOUNT`, `CLUSTER`,
//!           `CALLBACK_TIMEOUT_MS`, `MAX_RETRIES`, `INITIAL_RETRY_DELAY_MS`,
//!           `PRIORITY_FEE_MICRO_LAMPORTS`

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::SubmitOptions;
use crate::pda;
use crate::switchboard::SWITCHBOARD_V2_PROGRAM_ID;

/// Everything the lootbox cycle needs to know about its environment.
#[derive(Clone)]
pub struct LootboxConfig {
    /// Solana JSON-RPC endpoint (HTTP).
    pub rpc_url: String,
    /// Solana PubSub endpoint (WebSocket) for account subscriptions.
    pub ws_url: String,
    /// Wallet that pays fees, owns the user state and burns stake.
    pub payer: Arc<Keypair>,
    /// The deployed lootbox program.
    pub lootbox_program_id: Pubkey,
    /// The oracle network program.
    pub switchboard_program_id: Pubkey,
    /// Oracle queue serving VRF requests.
    pub oracle_queue: Pubkey,
    /// Token wallet funding oracle fees; derived from the oracle mint when unset.
    pub payer_token_wallet: Option<Pubkey>,
    /// Mint whose tokens are burned per request.
    pub stake_mint: Pubkey,
    /// Token account burned from; the payer's associated account when unset.
    pub stake_token_account: Option<Pubkey>,
    /// Cluster name for explorer URLs.
    pub cluster: String,
    /// Default bound on the wait for the fulfillment callback.
    pub callback_timeout: Duration,
    pub submit: SubmitOptions,
}

impl LootboxConfig {
    /// Configuration with local endpoints and default tuning.
    pub fn new(
        payer: Arc<Keypair>,
        lootbox_program_id: Pubkey,
        oracle_queue: Pubkey,
        stake_mint: Pubkey,
    ) -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".into(),
            ws_url: "ws://127.0.0.1:8900".into(),
            payer,
            lootbox_program_id,
            switchboard_program_id: SWITCHBOARD_V2_PROGRAM_ID,
            oracle_queue,
            payer_token_wallet: None,
            stake_mint,
            stake_token_account: None,
            cluster: "devnet".into(),
            callback_timeout: Duration::from_secs(20),
            submit: SubmitOptions::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let keypair_path = std::env::var("PAYER_KEYPAIR_PATH")
            .unwrap_or_else(|_| "~/.config/solana/id.json".into());
        let keypair_path = shellexpand::tilde(&keypair_path).to_string();
        let payer = read_keypair_file(&keypair_path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("failed to read keypair from {keypair_path}"))?;

        let lootbox_program_id = required_pubkey("LOOTBOX_PROGRAM_ID")?;
        let oracle_queue = required_pubkey("ORACLE_QUEUE")?;
        let stake_mint = required_pubkey("STAKE_MINT")?;

        let mut config = Self::new(Arc::new(payer), lootbox_program_id, oracle_queue, stake_mint);

        if let Ok(rpc_url) = std::env::var("RPC_URL") {
            config.rpc_url = rpc_url;
        }
        if let Ok(ws_url) = std::env::var("WS_URL") {
            config.ws_url = ws_url;
        }
        if let Ok(cluster) = std::env::var("CLUSTER") {
            config.cluster = cluster;
        }
        if let Some(id) = optional_pubkey("SWITCHBOARD_PROGRAM_ID")? {
            config.switchboard_program_id = id;
        }
        config.payer_token_wallet = optional_pubkey("PAYER_TOKEN_WALLET")?;
        config.stake_token_account = optional_pubkey("STAKE_TOKEN_ACCOUNT")?;

        if let Some(ms) = parsed_var("CALLBACK_TIMEOUT_MS") {
            config.callback_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parsed_var("MAX_RETRIES") {
            config.submit.max_retries = retries;
        }
        if let Some(ms) = parsed_var("INITIAL_RETRY_DELAY_MS") {
            config.submit.initial_retry_delay = Duration::from_millis(ms);
        }
        if let Some(fee) = parsed_var("PRIORITY_FEE_MICRO_LAMPORTS") {
            config.submit.priority_fee_micro_lamports = fee;
        }

        Ok(config)
    }

    pub fn payer_pubkey(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// The payer's user state address.
    pub fn user_state(&self) -> Pubkey {
        pda::user_state_address(&self.lootbox_program_id, &self.payer_pubkey()).0
    }

    /// Token account stake is burned from.
    pub fn stake_token_account(&self) -> Pubkey {
        self.stake_token_account.unwrap_or_else(|| {
            pda::associated_token_address(&self.payer_pubkey(), &self.stake_mint)
        })
    }

    /// Return the Solana explorer URL for a given transaction signature.
    pub fn explorer_url(&self, signature: &str) -> String {
        match self.cluster.as_str() {
            "mainnet-beta" => format!("https://explorer.solana.com/tx/{signature}"),
            cluster => format!("https://explorer.solana.com/tx/{signature}?cluster={cluster}"),
        }
    }
}

fn required_pubkey(name: &str) -> Result<Pubkey> {
    let value = std::env::var(name).with_context(|| format!("{name} env var must be set"))?;
    Pubkey::from_str(&value).with_context(|| format!("invalid {name}: {value}"))
}

fn optional_pubkey(name: &str) -> Result<Option<Pubkey>> {
    match std::env::var(name) {
        Ok(value) => Pubkey::from_str(&value)
            .map(Some)
            .with_context(|| format!("invalid {name}: {value}")),
        Err(_) => Ok(None),
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LootboxConfig {
        LootboxConfig::new(
            Arc::new(Keypair::new()),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        )
    }

    #[test]
    fn explorer_url_includes_cluster_off_mainnet() {
        let mut config = config();
        assert_eq!(
            config.explorer_url("sig"),
            "https://explorer.solana.com/tx/sig?cluster=devnet"
        );
        config.cluster = "mainnet-beta".into();
        assert_eq!(config.explorer_url("sig"), "https://explorer.solana.com/tx/sig");
    }

    #[test]
    fn stake_account_defaults_to_associated_account() {
        let mut config = config();
        let expected = pda::associated_token_address(&config.payer_pubkey(), &config.stake_mint);
        assert_eq!(config.stake_token_account(), expected);

        let explicit = Pubkey::new_unique();
        config.stake_token_account = Some(explicit);
        assert_eq!(config.stake_token_account(), explicit);
    }
}
