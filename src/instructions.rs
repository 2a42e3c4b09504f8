//! Instruction builders for the lootbox program and the native programs it
//! leans on.
//!
//! The account order of every builder is a wire contract with the deployed
//! program; a mismatch is rejected at submission.

use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::pda;
use crate::switchboard::CallbackSpec;

pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::from_str_const("11111111111111111111111111111111");
pub const TOKEN_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");
pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("ComputeBudget111111111111111111111111111111");
pub const RENT_SYSVAR_ID: Pubkey =
    Pubkey::from_str_const("SysvarRent111111111111111111111111111111111");
pub const RECENT_BLOCKHASHES_SYSVAR_ID: Pubkey =
    Pubkey::from_str_const("SysvarRecentB1ockHashes11111111111111111111");

/// Compute the Anchor instruction discriminator: `sha256("global:<name>")[..8]`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("global:{name}"));
    let hash = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// Accounts referenced by `request_randomness`, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRandomnessAccounts {
    pub state: Pubkey,
    pub vrf: Pubkey,
    pub oracle_queue: Pubkey,
    pub queue_authority: Pubkey,
    pub data_buffer: Pubkey,
    pub permission: Pubkey,
    pub escrow: Pubkey,
    pub program_state: Pubkey,
    pub switchboard_program: Pubkey,
    pub payer_wallet: Pubkey,
    pub payer: Pubkey,
    pub stake_mint: Pubkey,
    pub stake_token_account: Pubkey,
}

/// Build `init_lootbox`, which records the three reward mints.
pub fn init_lootbox(
    program_id: &Pubkey,
    payer: &Pubkey,
    mints: [Pubkey; 3],
) -> Instruction {
    let (lootbox, _) = pda::lootbox_address(program_id);
    let (mint_auth, _) = pda::mint_authority_address(program_id);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(lootbox, false),
            AccountMeta::new_readonly(mints[0], false),
            AccountMeta::new_readonly(mints[1], false),
            AccountMeta::new_readonly(mints[2], false),
            AccountMeta::new_readonly(mint_auth, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data: instruction_discriminator("init_lootbox").to_vec(),
    }
}

/// Build `init_user`, which creates the payer's user state bound to `vrf`.
///
/// The bumps are cached on-ledger so `request_randomness` can sign for the
/// oracle program-state and permission records without re-deriving them.
pub fn init_user(
    program_id: &Pubkey,
    state: &Pubkey,
    vrf: &Pubkey,
    payer: &Pubkey,
    switchboard_state_bump: u8,
    vrf_permission_bump: u8,
) -> Instruction {
    let mut data = Vec::with_capacity(8 + 2);
    data.extend_from_slice(&instruction_discriminator("init_user"));
    data.push(switchboard_state_bump);
    data.push(vrf_permission_bump);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*state, false),
            AccountMeta::new_readonly(*vrf, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data,
    }
}

/// Build `request_randomness`.
pub fn request_randomness(program_id: &Pubkey, accounts: &RequestRandomnessAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.state, false),
            AccountMeta::new(accounts.vrf, false),
            AccountMeta::new(accounts.oracle_queue, false),
            AccountMeta::new(accounts.queue_authority, false),
            AccountMeta::new(accounts.data_buffer, false),
            AccountMeta::new(accounts.permission, false),
            AccountMeta::new(accounts.escrow, false),
            AccountMeta::new(accounts.program_state, false),
            AccountMeta::new_readonly(accounts.switchboard_program, false),
            AccountMeta::new(accounts.payer_wallet, false),
            AccountMeta::new_readonly(accounts.payer, true),
            AccountMeta::new_readonly(RECENT_BLOCKHASHES_SYSVAR_ID, false),
            AccountMeta::new(accounts.stake_mint, false),
            AccountMeta::new(accounts.stake_token_account, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: instruction_discriminator("request_randomness").to_vec(),
    }
}

/// Describe the `consume_randomness` call the oracle performs on fulfillment.
///
/// This is stored in the VRF record and executed by the oracle network, not
/// by this process.
pub fn consume_randomness_callback(
    program_id: &Pubkey,
    state: &Pubkey,
    vrf: &Pubkey,
    payer: &Pubkey,
) -> CallbackSpec {
    let (lootbox, _) = pda::lootbox_address(program_id);
    CallbackSpec {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*state, false),
            AccountMeta::new_readonly(*vrf, false),
            AccountMeta::new_readonly(lootbox, false),
            AccountMeta::new_readonly(*payer, false),
        ],
        ix_data: instruction_discriminator("consume_randomness").to_vec(),
    }
}

/// Build `mint_reward` for the destination recorded in the user state.
pub fn mint_reward(
    program_id: &Pubkey,
    state: &Pubkey,
    mint: &Pubkey,
    token_account: &Pubkey,
    payer: &Pubkey,
) -> Instruction {
    let (mint_authority, _) = pda::mint_authority_address(program_id);

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*state, false),
            AccountMeta::new(*mint, false),
            AccountMeta::new(*token_account, false),
            AccountMeta::new_readonly(mint_authority, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(ASSOCIATED_TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(RENT_SYSVAR_ID, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new(*payer, true),
        ],
        data: instruction_discriminator("mint_reward").to_vec(),
    }
}

/// Build a `SetComputeUnitPrice` instruction.
pub fn set_compute_unit_price(micro_lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(3u8);
    data.extend_from_slice(&micro_lamports.to_le_bytes());
    Instruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: vec![],
        data,
    }
}

/// Build a system `CreateAccount` instruction.
pub fn create_account(
    payer: &Pubkey,
    new_account: &Pubkey,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Instruction {
    let mut data = Vec::with_capacity(4 + 8 + 8 + 32);
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    data.extend_from_slice(&space.to_le_bytes());
    data.extend_from_slice(owner.as_ref());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(*new_account, true),
        ],
        data,
    }
}

/// Build an associated-token-account `Create` instruction.
pub fn create_associated_token_account(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    let address = pda::associated_token_address(owner, mint);
    Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(address, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: vec![0],
    }
}
