//! Failure taxonomy for the lootbox randomness cycle.
//!
//! Operations return [`anyhow::Result`]; the typed [`LootboxError`] is the
//! root cause and callers classify it with `downcast_ref::<LootboxError>()`.
//! Context layers added along the way name the step and account involved.

use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::time::Duration;

/// Classified failures surfaced by the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LootboxError {
    /// Address derivation input is invalid (too many seeds or a seed too long).
    InvalidSeed { reason: String },
    /// The account to be created already exists; reuse it instead.
    Allocation { account: Pubkey },
    /// The signer offered for a queue-authority action is not the queue authority.
    AuthorityMismatch { expected: Pubkey, provided: Pubkey },
    /// The ledger refused the instruction batch.
    SubmissionRejected { reason: String },
    /// No qualifying update arrived before the deadline. The request may
    /// still resolve on-ledger afterwards.
    Timeout { account: Pubkey, waited: Duration },
    /// The user state has no reward destination yet.
    StaleState { account: Pubkey },
    /// The account does not exist on the ledger.
    NotFound { account: Pubkey },
    /// The account exists but its data does not match the expected layout.
    Decode { account: Pubkey, reason: String },
    /// The notification stream ended before a result was observed.
    SubscriptionClosed { account: Pubkey },
}

impl LootboxError {
    /// Whether this rejection was caused by an expired anti-replay token,
    /// which a fresh blockhash fixes.
    pub fn is_stale_blockhash(&self) -> bool {
        matches!(self, Self::SubmissionRejected { reason } if reason.contains("BlockhashNotFound"))
    }

    /// Find the typed cause inside an `anyhow` chain.
    pub fn classify(err: &anyhow::Error) -> Option<&LootboxError> {
        err.downcast_ref::<LootboxError>()
    }
}

impl fmt::Display for LootboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSeed { reason } => write!(f, "invalid derivation seeds: {reason}"),
            Self::Allocation { account } => write!(f, "account {account} already exists"),
            Self::AuthorityMismatch { expected, provided } => write!(
                f,
                "queue requires PERMIT_VRF_REQUESTS and wrong queue authority provided \
                 (expected {expected}, got {provided})"
            ),
            Self::SubmissionRejected { reason } => write!(f, "submission rejected: {reason}"),
            Self::Timeout { account, waited } => write!(
                f,
                "timed out after {waited:?} waiting for randomness callback on {account}"
            ),
            Self::StaleState { account } => write!(
                f,
                "user state {account} has no reward destination; fulfillment has not completed"
            ),
            Self::NotFound { account } => write!(f, "account {account} not found"),
            Self::Decode { account, reason } => {
                write!(f, "failed to decode account {account}: {reason}")
            }
            Self::SubscriptionClosed { account } => {
                write!(f, "change subscription for {account} closed unexpectedly")
            }
        }
    }
}

impl std::error::Error for LootboxError {}
