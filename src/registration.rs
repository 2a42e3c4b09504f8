//! Oracle-side registration for a lootbox user.
//!
//! A randomness request can only be authorized once three records exist: a
//! VRF record whose authority is the user state and whose callback routes
//! into `consume_randomness`, a permission record binding it to the queue,
//! and the user state itself pointing back at the VRF record.

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tracing::{debug, info, instrument};

use crate::config::LootboxConfig;
use crate::error::LootboxError;
use crate::instructions;
use crate::ledger::{send_with_retries, LedgerClient};
use crate::pda;
use crate::switchboard::{
    self, CallbackSpec, PermissionRecord, ProgramState, QueueState, VrfInitAccounts, VrfRecord,
    VRF_ACCOUNT_SIZE,
};

/// Addresses produced by a completed registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user_state: Pubkey,
    pub vrf: VrfRecord,
    pub permission: PermissionRecord,
    pub queue: QueueState,
}

/// Whether `address` is allocated on the ledger.
pub async fn account_exists<L: LedgerClient>(ledger: &L, address: &Pubkey) -> Result<bool> {
    match ledger.fetch_account(address).await {
        Ok(_) => Ok(true),
        Err(e) if matches!(LootboxError::classify(&e), Some(LootboxError::NotFound { .. })) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn decoded<T>(account: &Pubkey, value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| {
        LootboxError::Decode {
            account: *account,
            reason: format!("not a valid {name}"),
        }
        .into()
    })
}

/// Read-only snapshot of an oracle queue.
pub async fn resolve_queue_state<L: LedgerClient>(ledger: &L, queue: &Pubkey) -> Result<QueueState> {
    let data = ledger
        .fetch_account(queue)
        .await
        .with_context(|| format!("failed to load oracle queue {queue}"))?;
    decoded(queue, QueueState::from_bytes(*queue, &data), QueueState::NAME)
}

pub async fn load_vrf_record<L: LedgerClient>(ledger: &L, address: &Pubkey) -> Result<VrfRecord> {
    let data = ledger
        .fetch_account(address)
        .await
        .with_context(|| format!("failed to load VRF record {address}"))?;
    decoded(address, VrfRecord::from_bytes(*address, &data), VrfRecord::NAME)
}

pub async fn load_program_state<L: LedgerClient>(
    ledger: &L,
    switchboard_program: &Pubkey,
) -> Result<ProgramState> {
    let (address, bump) = pda::program_state_address(switchboard_program);
    let data = ledger
        .fetch_account(&address)
        .await
        .with_context(|| format!("failed to load oracle program state {address}"))?;
    decoded(
        &address,
        ProgramState::from_bytes(address, bump, &data),
        ProgramState::NAME,
    )
}

/// Permission record address for `vrf` on `queue`, with its bump.
pub fn permission_address_for(
    switchboard_program: &Pubkey,
    queue: &QueueState,
    vrf: &Pubkey,
) -> (Pubkey, u8) {
    pda::permission_address(switchboard_program, &queue.authority, &queue.address, vrf)
}

/// Permission record as `permission_init` creates it, before any bit is set.
fn fresh_permission(
    switchboard_program: &Pubkey,
    queue: &QueueState,
    vrf: &Pubkey,
) -> PermissionRecord {
    let (address, bump) = permission_address_for(switchboard_program, queue, vrf);
    PermissionRecord {
        address,
        bump,
        authority: queue.authority,
        permissions: 0,
        granter: queue.address,
        grantee: *vrf,
    }
}

pub async fn load_permission_record<L: LedgerClient>(
    ledger: &L,
    switchboard_program: &Pubkey,
    queue: &QueueState,
    vrf: &Pubkey,
) -> Result<PermissionRecord> {
    let (address, bump) = permission_address_for(switchboard_program, queue, vrf);
    let data = ledger
        .fetch_account(&address)
        .await
        .with_context(|| format!("failed to load permission record {address}"))?;
    decoded(
        &address,
        PermissionRecord::from_bytes(address, bump, &data),
        PermissionRecord::NAME,
    )
}

/// Allocate and initialize a VRF record owned by `owner_state`.
///
/// The record is created at `vrf_keypair`'s address with an escrow token
/// account for the oracle fee mint. Fails with [`LootboxError::Allocation`]
/// if the address is already in use.
#[instrument(skip_all, fields(owner_state = %owner_state, queue = %queue.address))]
pub async fn create_vrf_record<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
    owner_state: &Pubkey,
    queue: &QueueState,
    callback: &CallbackSpec,
    vrf_keypair: &Keypair,
) -> Result<VrfRecord> {
    let vrf = vrf_keypair.pubkey();
    if account_exists(ledger, &vrf).await? {
        return Err(LootboxError::Allocation { account: vrf }.into());
    }

    let sb_program = &config.switchboard_program_id;
    let program_state = load_program_state(ledger, sb_program).await?;
    let payer = config.payer_pubkey();
    let escrow = pda::associated_token_address(&vrf, &program_state.token_mint);
    let lamports = ledger
        .rent_exempt_minimum(VRF_ACCOUNT_SIZE)
        .await
        .context("failed to price VRF record rent")?;

    let init = switchboard::vrf_init(
        sb_program,
        &VrfInitAccounts {
            vrf,
            authority: *owner_state,
            oracle_queue: queue.address,
            escrow,
            program_state: program_state.address,
        },
        callback,
        program_state.bump,
    )?;
    let batch = [
        instructions::create_associated_token_account(&payer, &vrf, &program_state.token_mint),
        instructions::create_account(&payer, &vrf, lamports, VRF_ACCOUNT_SIZE as u64, sb_program),
        init,
    ];

    let sig = send_with_retries(ledger, &config.submit, &batch, &[config.payer.as_ref(), vrf_keypair])
        .await
        .with_context(|| format!("failed to create VRF record {vrf}"))?
        .signature;

    let record = load_vrf_record(ledger, &vrf).await?;
    if record.authority != *owner_state {
        return Err(LootboxError::AuthorityMismatch {
            expected: *owner_state,
            provided: record.authority,
        })
        .with_context(|| format!("VRF record {vrf} was initialized with the wrong authority"));
    }

    info!(
        vrf = %vrf,
        escrow = %record.escrow,
        signature = %sig,
        explorer = %config.explorer_url(&sig.to_string()),
        "Created VRF record"
    );
    Ok(record)
}

/// Allocate the permission record binding `vrf` to `queue`.
///
/// The record is created on permissionless queues too: `request_randomness`
/// loads it as a typed account either way. Only granting the VRF bit is
/// skipped there (see [`ensure_vrf_permitted`]).
#[instrument(skip_all, fields(queue = %queue.address, vrf = %vrf.address))]
pub async fn create_permission_record<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
    queue: &QueueState,
    vrf: &VrfRecord,
) -> Result<PermissionRecord> {
    let sb_program = &config.switchboard_program_id;
    let record = fresh_permission(sb_program, queue, &vrf.address);
    let address = record.address;

    if account_exists(ledger, &address).await? {
        return Err(LootboxError::Allocation { account: address }.into());
    }

    let ix = switchboard::permission_init(
        sb_program,
        &address,
        &queue.authority,
        &queue.address,
        &vrf.address,
        &config.payer_pubkey(),
    );
    let sig = send_with_retries(ledger, &config.submit, &[ix], &[config.payer.as_ref()])
        .await
        .with_context(|| format!("failed to create permission record {address}"))?
        .signature;

    info!(permission = %address, signature = %sig, "Created permission record");
    Ok(record)
}

/// Make sure the queue will accept VRF requests from `permission`'s grantee.
///
/// Returns whether a permission instruction was submitted. On queues that
/// require permissioning, `authority` must be the queue authority; anything
/// else is a misconfiguration surfaced as [`LootboxError::AuthorityMismatch`].
#[instrument(skip_all, fields(queue = %queue.address, permission = %permission.address))]
pub async fn ensure_vrf_permitted<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
    queue: &QueueState,
    authority: &Keypair,
    permission: &PermissionRecord,
) -> Result<bool> {
    if !queue.requires_permission() {
        debug!("Queue allows permissionless VRF");
        return Ok(false);
    }

    let provided = authority.pubkey();
    if provided != queue.authority {
        return Err(LootboxError::AuthorityMismatch {
            expected: queue.authority,
            provided,
        })
        .with_context(|| format!("cannot enable VRF requests on queue {}", queue.address));
    }

    let ix = switchboard::permission_set_vrf(
        &config.switchboard_program_id,
        &permission.address,
        &provided,
        true,
    )?;
    let signers: Vec<&Keypair> = if provided == config.payer_pubkey() {
        vec![config.payer.as_ref()]
    } else {
        vec![config.payer.as_ref(), authority]
    };
    let sig = send_with_retries(ledger, &config.submit, &[ix], &signers)
        .await
        .with_context(|| format!("failed to enable VRF permission {}", permission.address))?
        .signature;

    info!(signature = %sig, "Set VRF permissions");
    Ok(true)
}

/// Register the configured payer: VRF record, permission, then user state.
#[instrument(skip_all, fields(payer = %config.payer_pubkey()))]
pub async fn register_user<L: LedgerClient>(
    ledger: &L,
    config: &LootboxConfig,
) -> Result<Registration> {
    let program_id = &config.lootbox_program_id;
    let payer = config.payer_pubkey();
    let user_state = config.user_state();
    if account_exists(ledger, &user_state).await? {
        return Err(LootboxError::Allocation {
            account: user_state,
        })
        .context("user is already registered");
    }

    let queue = resolve_queue_state(ledger, &config.oracle_queue).await?;
    info!(
        queue = %queue.address,
        unpermissioned_vrf_enabled = queue.unpermissioned_vrf_enabled,
        "Loaded oracle queue"
    );
    if queue.requires_permission() && queue.authority != payer {
        return Err(LootboxError::AuthorityMismatch {
            expected: queue.authority,
            provided: payer,
        })
        .with_context(|| {
            format!(
                "payer cannot enable VRF requests on queue {}, nothing was allocated",
                queue.address
            )
        });
    }

    let vrf_keypair = Keypair::new();
    let callback = instructions::consume_randomness_callback(
        program_id,
        &user_state,
        &vrf_keypair.pubkey(),
        &payer,
    );
    let vrf = create_vrf_record(ledger, config, &user_state, &queue, &callback, &vrf_keypair).await?;
    let permission = create_permission_record(ledger, config, &queue, &vrf).await?;
    ensure_vrf_permitted(ledger, config, &queue, config.payer.as_ref(), &permission).await?;

    let (_, switchboard_state_bump) = pda::program_state_address(&config.switchboard_program_id);
    let ix = instructions::init_user(
        program_id,
        &user_state,
        &vrf.address,
        &payer,
        switchboard_state_bump,
        permission.bump,
    );
    let sig = send_with_retries(ledger, &config.submit, &[ix], &[config.payer.as_ref()])
        .await
        .with_context(|| format!("failed to initialize user state {user_state}"))?
        .signature;

    info!(
        user_state = %user_state,
        vrf = %vrf.address,
        signature = %sig,
        explorer = %config.explorer_url(&sig.to_string()),
        "Registered user"
    );

    Ok(Registration {
        user_state,
        vrf,
        permission,
        queue,
    })
}
