//! Bounded wait for the oracle's fulfillment callback.
//!
//! One subscription per wait, raced against a timer. Whichever side wins,
//! the subscription is released exactly once before the wait returns; if the
//! wait itself is dropped mid-flight the handle releases on drop.

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::accounts::UserState;
use crate::error::LootboxError;
use crate::ledger::{AccountSubscription, LedgerClient};

/// Wait until `user_state`'s result becomes positive, for at most `timeout`.
///
/// A [`LootboxError::Timeout`] only means nothing was observed in time; the
/// request stays outstanding on-ledger and may still be fulfilled later.
#[instrument(skip_all, fields(user_state = %user_state, timeout = ?timeout))]
pub async fn await_callback<L: LedgerClient>(
    ledger: &L,
    user_state: &Pubkey,
    timeout: Duration,
) -> Result<u128> {
    let mut subscription = ledger
        .subscribe(user_state)
        .await
        .with_context(|| format!("failed to subscribe to {user_state}"))?;

    let outcome = tokio::select! {
        result = wait_for_result(ledger, &mut subscription) => result,
        _ = tokio::time::sleep(timeout) => Err(LootboxError::Timeout {
            account: *user_state,
            waited: timeout,
        }
        .into()),
    };
    ledger.unsubscribe(subscription);

    match &outcome {
        Ok(result) => info!(result, "Randomness callback observed"),
        Err(e) => warn!(error = %e, "Stopped waiting for randomness callback"),
    }
    outcome
}

/// Catch up on the current state, then follow notifications.
///
/// A callback that landed before the subscription went live produces no
/// notification, so the state is read once after subscribing. Only an
/// unredeemed result counts there; a redeemed one belongs to an earlier cycle.
async fn wait_for_result<L: LedgerClient>(
    ledger: &L,
    subscription: &mut AccountSubscription,
) -> Result<u128> {
    let account = *subscription.address();
    let data = ledger
        .fetch_account(&account)
        .await
        .with_context(|| format!("failed to read {account} after subscribing"))?;
    match UserState::from_bytes(&data) {
        Some(state) if state.result > 0 && state.redeemable => {
            debug!("Result already written before subscription");
            return Ok(state.result);
        }
        _ => {}
    }

    while let Some(data) = subscription.next_update().await {
        match UserState::from_bytes(&data) {
            Some(state) if state.result > 0 => return Ok(state.result),
            Some(_) => debug!("User state updated, result still unset"),
            None => debug!(len = data.len(), "Skipping undecodable notification"),
        }
    }
    Err(LootboxError::SubscriptionClosed { account }.into())
}
