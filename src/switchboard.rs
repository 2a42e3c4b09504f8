//! Oracle network surface: Switchboard v2 account views and the handful of
//! instructions needed to register a VRF consumer.
//!
//! Only the fields this client reads are decoded. Offsets below include the
//! 8-byte Anchor discriminator.

use anyhow::{Context, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::accounts::account_discriminator;
use crate::instructions::{instruction_discriminator, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID};

/// Switchboard v2 program on devnet and mainnet.
pub const SWITCHBOARD_V2_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("SW1TCH7qEPTdLsDHRgPuMQjbQxKdH2aBStViMFnt64f");

/// Allocated size of a `VrfAccountData` record.
pub const VRF_ACCOUNT_SIZE: usize = 29_058;

/// Permission bit that lets a grantee request randomness from a queue.
pub const PERMIT_VRF_REQUESTS: u32 = SwitchboardPermission::PermitVrfRequests.bit();

/// Maximum accounts and payload bytes a stored callback can carry.
const CALLBACK_MAX_ACCOUNTS: usize = 32;
const CALLBACK_MAX_IX_DATA: usize = 1024;
const ACCOUNT_META_ZC_LEN: usize = 34;

/// Instruction the oracle executes on fulfillment, carried as data.
///
/// The oracle invokes `program_id` with exactly `accounts` and `ix_data`; no
/// code from this process runs at fulfillment time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSpec {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub ix_data: Vec<u8>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct AccountMetaWire {
    pubkey: [u8; 32],
    is_signer: bool,
    is_writable: bool,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct CallbackWire {
    program_id: [u8; 32],
    accounts: Vec<AccountMetaWire>,
    ix_data: Vec<u8>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct VrfInitParams {
    callback: CallbackWire,
    state_bump: u8,
}

/// Permissions a queue authority can grant.
///
/// The discriminant is both the borsh tag `permission_set` expects and the
/// bit index in `PermissionAccountData::permissions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum SwitchboardPermission {
    PermitOracleHeartbeat = 0,
    PermitOracleQueueUsage = 1,
    PermitVrfRequests = 2,
}

impl SwitchboardPermission {
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(BorshSerialize)]
struct PermissionSetParams {
    permission: SwitchboardPermission,
    enable: bool,
}

impl From<&CallbackSpec> for CallbackWire {
    fn from(spec: &CallbackSpec) -> Self {
        Self {
            program_id: spec.program_id.to_bytes(),
            accounts: spec
                .accounts
                .iter()
                .map(|meta| AccountMetaWire {
                    pubkey: meta.pubkey.to_bytes(),
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
                .collect(),
            ix_data: spec.ix_data.clone(),
        }
    }
}

impl From<CallbackWire> for CallbackSpec {
    fn from(wire: CallbackWire) -> Self {
        Self {
            program_id: Pubkey::new_from_array(wire.program_id),
            accounts: wire
                .accounts
                .into_iter()
                .map(|meta| AccountMeta {
                    pubkey: Pubkey::new_from_array(meta.pubkey),
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
                .collect(),
            ix_data: wire.ix_data,
        }
    }
}

impl CallbackSpec {
    /// Check the descriptor fits the fixed-size slot in the VRF record.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.accounts.len() <= CALLBACK_MAX_ACCOUNTS,
            "callback lists {} accounts, at most {CALLBACK_MAX_ACCOUNTS} allowed",
            self.accounts.len()
        );
        anyhow::ensure!(
            self.ix_data.len() <= CALLBACK_MAX_IX_DATA,
            "callback payload is {} bytes, at most {CALLBACK_MAX_IX_DATA} allowed",
            self.ix_data.len()
        );
        Ok(())
    }
}

/// Oracle-side record holding the callback contract and escrow reference.
///
/// ```text
/// [0..8]       discriminator
/// [8]          status       (u8)
/// [9..25]      counter      (u128)
/// [25..57]     authority    (Pubkey)
/// [57..89]     oracle_queue (Pubkey)
/// [89..121]    escrow       (Pubkey)
/// [121..153]   callback.program_id
/// [153..1241]  callback.accounts    ([AccountMetaZC; 32], 34 bytes each)
/// [1241..1245] callback.accounts_len (u32)
/// [1245..2269] callback.ix_data     ([u8; 1024])
/// [2269..2273] callback.ix_data_len (u32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrfRecord {
    pub address: Pubkey,
    pub status: u8,
    pub counter: u128,
    /// Must equal the user state this record serves.
    pub authority: Pubkey,
    pub oracle_queue: Pubkey,
    pub escrow: Pubkey,
    pub callback: CallbackSpec,
}

impl VrfRecord {
    pub const NAME: &'static str = "VrfAccountData";
    pub const MIN_LEN: usize = 2273;

    pub fn from_bytes(address: Pubkey, data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN || data[..8] != account_discriminator(Self::NAME) {
            return None;
        }

        let accounts_len = u32::from_le_bytes(data[1241..1245].try_into().ok()?) as usize;
        let ix_data_len = u32::from_le_bytes(data[2269..2273].try_into().ok()?) as usize;
        if accounts_len > CALLBACK_MAX_ACCOUNTS || ix_data_len > CALLBACK_MAX_IX_DATA {
            return None;
        }

        let accounts = (0..accounts_len)
            .map(|i| {
                let start = 153 + i * ACCOUNT_META_ZC_LEN;
                let pubkey = Pubkey::try_from(&data[start..start + 32]).ok()?;
                Some(AccountMeta {
                    pubkey,
                    is_signer: data[start + 32] != 0,
                    is_writable: data[start + 33] != 0,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            address,
            status: data[8],
            counter: u128::from_le_bytes(data[9..25].try_into().ok()?),
            authority: Pubkey::try_from(&data[25..57]).ok()?,
            oracle_queue: Pubkey::try_from(&data[57..89]).ok()?,
            escrow: Pubkey::try_from(&data[89..121]).ok()?,
            callback: CallbackSpec {
                program_id: Pubkey::try_from(&data[121..153]).ok()?,
                accounts,
                ix_data: data[1245..1245 + ix_data_len].to_vec(),
            },
        })
    }

    /// Serialize the decoded prefix into a record of `VRF_ACCOUNT_SIZE` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; VRF_ACCOUNT_SIZE];
        buf[..8].copy_from_slice(&account_discriminator(Self::NAME));
        buf[8] = self.status;
        buf[9..25].copy_from_slice(&self.counter.to_le_bytes());
        buf[25..57].copy_from_slice(self.authority.as_ref());
        buf[57..89].copy_from_slice(self.oracle_queue.as_ref());
        buf[89..121].copy_from_slice(self.escrow.as_ref());
        buf[121..153].copy_from_slice(self.callback.program_id.as_ref());
        for (i, meta) in self.callback.accounts.iter().take(CALLBACK_MAX_ACCOUNTS).enumerate() {
            let start = 153 + i * ACCOUNT_META_ZC_LEN;
            buf[start..start + 32].copy_from_slice(meta.pubkey.as_ref());
            buf[start + 32] = meta.is_signer as u8;
            buf[start + 33] = meta.is_writable as u8;
        }
        let accounts_len = self.callback.accounts.len().min(CALLBACK_MAX_ACCOUNTS) as u32;
        buf[1241..1245].copy_from_slice(&accounts_len.to_le_bytes());
        let ix_data_len = self.callback.ix_data.len().min(CALLBACK_MAX_IX_DATA);
        buf[1245..1245 + ix_data_len].copy_from_slice(&self.callback.ix_data[..ix_data_len]);
        buf[2269..2273].copy_from_slice(&(ix_data_len as u32).to_le_bytes());
        buf
    }
}

/// Snapshot of an oracle queue's operating parameters.
///
/// ```text
/// [104..136]   authority                  (Pubkey)
/// [210]        unpermissioned_vrf_enabled (bool)
/// [1237..1269] data_buffer                (Pubkey)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub address: Pubkey,
    pub authority: Pubkey,
    pub data_buffer: Pubkey,
    pub unpermissioned_vrf_enabled: bool,
}

impl QueueState {
    pub const NAME: &'static str = "OracleQueueAccountData";
    pub const MIN_LEN: usize = 1269;

    pub fn from_bytes(address: Pubkey, data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN || data[..8] != account_discriminator(Self::NAME) {
            return None;
        }
        Some(Self {
            address,
            authority: Pubkey::try_from(&data[104..136]).ok()?,
            unpermissioned_vrf_enabled: data[210] != 0,
            data_buffer: Pubkey::try_from(&data[1237..1269]).ok()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::MIN_LEN];
        buf[..8].copy_from_slice(&account_discriminator(Self::NAME));
        buf[104..136].copy_from_slice(self.authority.as_ref());
        buf[210] = self.unpermissioned_vrf_enabled as u8;
        buf[1237..1269].copy_from_slice(self.data_buffer.as_ref());
        buf
    }

    /// Whether VRF requests on this queue need an enabled permission record.
    pub fn requires_permission(&self) -> bool {
        !self.unpermissioned_vrf_enabled
    }
}

/// Authorization of a grantee against a queue.
///
/// ```text
/// [8..40]   authority   (Pubkey)
/// [40..44]  permissions (u32 bitset)
/// [44..76]  granter     (Pubkey)
/// [76..108] grantee     (Pubkey)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    pub address: Pubkey,
    pub bump: u8,
    pub authority: Pubkey,
    pub permissions: u32,
    pub granter: Pubkey,
    pub grantee: Pubkey,
}

impl PermissionRecord {
    pub const NAME: &'static str = "PermissionAccountData";
    pub const MIN_LEN: usize = 108;

    pub fn from_bytes(address: Pubkey, bump: u8, data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN || data[..8] != account_discriminator(Self::NAME) {
            return None;
        }
        Some(Self {
            address,
            bump,
            authority: Pubkey::try_from(&data[8..40]).ok()?,
            permissions: u32::from_le_bytes(data[40..44].try_into().ok()?),
            granter: Pubkey::try_from(&data[44..76]).ok()?,
            grantee: Pubkey::try_from(&data[76..108]).ok()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::MIN_LEN];
        buf[..8].copy_from_slice(&account_discriminator(Self::NAME));
        buf[8..40].copy_from_slice(self.authority.as_ref());
        buf[40..44].copy_from_slice(&self.permissions.to_le_bytes());
        buf[44..76].copy_from_slice(self.granter.as_ref());
        buf[76..108].copy_from_slice(self.grantee.as_ref());
        buf
    }

    pub fn vrf_requests_enabled(&self) -> bool {
        self.permissions & PERMIT_VRF_REQUESTS != 0
    }
}

/// The oracle program's global state.
///
/// ```text
/// [8..40]  authority  (Pubkey)
/// [40..72] token_mint (Pubkey)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramState {
    pub address: Pubkey,
    pub bump: u8,
    pub authority: Pubkey,
    /// Mint escrow and payer wallets are denominated in.
    pub token_mint: Pubkey,
}

impl ProgramState {
    pub const NAME: &'static str = "SbState";
    pub const MIN_LEN: usize = 72;

    pub fn from_bytes(address: Pubkey, bump: u8, data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN || data[..8] != account_discriminator(Self::NAME) {
            return None;
        }
        Some(Self {
            address,
            bump,
            authority: Pubkey::try_from(&data[8..40]).ok()?,
            token_mint: Pubkey::try_from(&data[40..72]).ok()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::MIN_LEN];
        buf[..8].copy_from_slice(&account_discriminator(Self::NAME));
        buf[8..40].copy_from_slice(self.authority.as_ref());
        buf[40..72].copy_from_slice(self.token_mint.as_ref());
        buf
    }
}

/// Accounts for `vrf_init`, in wire order.
#[derive(Debug, Clone)]
pub struct VrfInitAccounts {
    pub vrf: Pubkey,
    pub authority: Pubkey,
    pub oracle_queue: Pubkey,
    pub escrow: Pubkey,
    pub program_state: Pubkey,
}

/// Build `vrf_init`, storing `callback` in the new record.
pub fn vrf_init(
    switchboard_program: &Pubkey,
    accounts: &VrfInitAccounts,
    callback: &CallbackSpec,
    state_bump: u8,
) -> Result<Instruction> {
    callback.validate()?;
    let params = VrfInitParams {
        callback: CallbackWire::from(callback),
        state_bump,
    };
    let mut data = instruction_discriminator("vrf_init").to_vec();
    params
        .serialize(&mut data)
        .context("failed to encode vrf_init params")?;

    Ok(Instruction {
        program_id: *switchboard_program,
        accounts: vec![
            AccountMeta::new(accounts.vrf, false),
            AccountMeta::new_readonly(accounts.authority, false),
            AccountMeta::new_readonly(accounts.oracle_queue, false),
            AccountMeta::new(accounts.escrow, false),
            AccountMeta::new_readonly(accounts.program_state, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data,
    })
}

/// Recover the callback and state bump from `vrf_init` instruction data.
pub fn decode_vrf_init(data: &[u8]) -> Option<(CallbackSpec, u8)> {
    let body = data.strip_prefix(&instruction_discriminator("vrf_init"))?;
    let params = VrfInitParams::try_from_slice(body).ok()?;
    Some((params.callback.into(), params.state_bump))
}

/// Build `permission_init` for the PDA permission record at `permission`.
pub fn permission_init(
    switchboard_program: &Pubkey,
    permission: &Pubkey,
    authority: &Pubkey,
    granter: &Pubkey,
    grantee: &Pubkey,
    payer: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *switchboard_program,
        accounts: vec![
            AccountMeta::new(*permission, false),
            AccountMeta::new_readonly(*authority, false),
            AccountMeta::new_readonly(*granter, false),
            AccountMeta::new_readonly(*grantee, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data: instruction_discriminator("permission_init").to_vec(),
    }
}

/// Build `permission_set` toggling the VRF-request bit.
pub fn permission_set_vrf(
    switchboard_program: &Pubkey,
    permission: &Pubkey,
    authority: &Pubkey,
    enable: bool,
) -> Result<Instruction> {
    let params = PermissionSetParams {
        permission: SwitchboardPermission::PermitVrfRequests,
        enable,
    };
    let mut data = instruction_discriminator("permission_set").to_vec();
    params
        .serialize(&mut data)
        .context("failed to encode permission_set params")?;

    Ok(Instruction {
        program_id: *switchboard_program,
        accounts: vec![
            AccountMeta::new(*permission, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data,
    })
}
