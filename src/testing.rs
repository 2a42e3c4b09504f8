//! In-memory ledger for exercising the lootbox cycle without a cluster.
//!
//! Applies the account effects of the lootbox and oracle instructions this
//! crate submits, records every batch, and lets tests inject account
//! updates the way the oracle's callback would.

use anyhow::Result;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::accounts::{Lootbox, UserState};
use crate::config::LootboxConfig;
use crate::error::LootboxError;
use crate::instructions::{
    instruction_discriminator, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID,
};
use crate::ledger::{AccountSubscription, LedgerClient, SubmitOptions};
use crate::pda;
use crate::switchboard::{
    decode_vrf_init, PermissionRecord, ProgramState, QueueState, VrfRecord, PERMIT_VRF_REQUESTS,
    SWITCHBOARD_V2_PROGRAM_ID,
};

struct Subscriber {
    address: Pubkey,
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Pubkey, Vec<u8>>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription: u64,
    opened: usize,
    submissions: Vec<Vec<Instruction>>,
    rejections: VecDeque<String>,
    counter: u8,
    minted: Vec<(Pubkey, Pubkey)>,
}

impl Inner {
    fn notify(&mut self, address: &Pubkey, data: &[u8]) {
        for subscriber in self.subscribers.values() {
            if subscriber.address == *address {
                if let Some(sender) = &subscriber.sender {
                    let _ = sender.send(data.to_vec());
                }
            }
        }
    }

    fn write(&mut self, address: Pubkey, data: Vec<u8>) {
        self.notify(&address, &data);
        self.accounts.insert(address, data);
    }
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLedger {
    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.inner.lock().unwrap().write(address, data);
    }

    pub fn account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().accounts.get(address).cloned()
    }

    pub fn user_state(&self, address: &Pubkey) -> UserState {
        UserState::from_bytes(&self.account(address).unwrap()).unwrap()
    }

    /// Deliver a notification without changing stored state.
    pub fn notify_raw(&self, address: &Pubkey, data: Vec<u8>) {
        self.inner.lock().unwrap().notify(address, &data);
    }

    /// Write what the oracle's `consume_randomness` callback would.
    pub fn fulfill(&self, user_state: &Pubkey, result: u128, mint: Pubkey, token_account: Pubkey) {
        let mut state = self.user_state(user_state);
        state.result = result;
        state.result_buffer = [result as u8; 32];
        state.mint = mint;
        state.token_account = token_account;
        self.set_account(*user_state, state.to_bytes());
    }

    /// End every notification stream on `address`, as a dropped socket would.
    pub fn drop_subscribers(&self, address: &Pubkey) {
        let mut inner = self.inner.lock().unwrap();
        for subscriber in inner.subscribers.values_mut() {
            if subscriber.address == *address {
                subscriber.sender = None;
            }
        }
    }

    pub fn reject_next(&self, reason: &str) {
        self.inner.lock().unwrap().rejections.push_back(reason.into());
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    pub fn opened_subscriptions(&self) -> usize {
        self.inner.lock().unwrap().opened
    }

    pub fn submissions(&self) -> Vec<Vec<Instruction>> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn minted(&self) -> Vec<(Pubkey, Pubkey)> {
        self.inner.lock().unwrap().minted.clone()
    }

    fn apply(
        accounts: &mut HashMap<Pubkey, Vec<u8>>,
        minted: &mut Vec<(Pubkey, Pubkey)>,
        ix: &Instruction,
    ) -> std::result::Result<(), String> {
        let key = |i: usize| ix.accounts[i].pubkey;
        let disc = |name: &str| ix.data.starts_with(&instruction_discriminator(name));

        if ix.program_id == SYSTEM_PROGRAM_ID {
            let space = u64::from_le_bytes(ix.data[12..20].try_into().unwrap()) as usize;
            if accounts.contains_key(&key(1)) {
                return Err(format!("account {} already in use", key(1)));
            }
            accounts.insert(key(1), vec![0; space]);
        } else if ix.program_id == ASSOCIATED_TOKEN_PROGRAM_ID {
            accounts.insert(key(1), vec![0; 165]);
        } else if ix.program_id == SWITCHBOARD_V2_PROGRAM_ID {
            if disc("vrf_init") {
                let (callback, _) = decode_vrf_init(&ix.data).ok_or("bad vrf_init data")?;
                let record = VrfRecord {
                    address: key(0),
                    status: 0,
                    counter: 0,
                    authority: key(1),
                    oracle_queue: key(2),
                    escrow: key(3),
                    callback,
                };
                accounts.insert(key(0), record.to_bytes());
            } else if disc("permission_init") {
                if accounts.contains_key(&key(0)) {
                    return Err(format!("account {} already in use", key(0)));
                }
                let record = PermissionRecord {
                    address: key(0),
                    bump: 0,
                    authority: key(1),
                    permissions: 0,
                    granter: key(2),
                    grantee: key(3),
                };
                accounts.insert(key(0), record.to_bytes());
            } else if disc("permission_set") {
                let data = accounts.get(&key(0)).ok_or("permission record missing")?;
                let mut record =
                    PermissionRecord::from_bytes(key(0), 0, data).ok_or("bad permission record")?;
                if record.authority != key(1) {
                    return Err("permission authority mismatch".into());
                }
                if ix.data[9] != 0 {
                    record.permissions |= PERMIT_VRF_REQUESTS;
                } else {
                    record.permissions &= !PERMIT_VRF_REQUESTS;
                }
                accounts.insert(key(0), record.to_bytes());
            }
        } else if disc("init_lootbox") {
            if accounts.contains_key(&key(0)) {
                return Err(format!("account {} already in use", key(0)));
            }
            let lootbox = Lootbox {
                mint_one: key(1),
                mint_two: key(2),
                mint_three: key(3),
            };
            accounts.insert(key(0), lootbox.to_bytes());
        } else if disc("init_user") {
            if accounts.contains_key(&key(0)) {
                return Err(format!("account {} already in use", key(0)));
            }
            let vrf = accounts.get(&key(1)).ok_or("vrf record missing")?;
            let vrf = VrfRecord::from_bytes(key(1), vrf).ok_or("bad vrf record")?;
            if vrf.authority != key(0) {
                return Err("InvalidVrfAuthorityError".into());
            }
            let (_, bump) = pda::user_state_address(&ix.program_id, &key(2));
            let state = UserState {
                bump,
                switchboard_state_bump: ix.data[8],
                vrf_permission_bump: ix.data[9],
                vrf: key(1),
                ..Default::default()
            };
            accounts.insert(key(0), state.to_bytes());
        } else if disc("request_randomness") {
            let data = accounts.get(&key(0)).ok_or("user state missing")?;
            let mut state = UserState::from_bytes(data).ok_or("bad user state")?;
            if state.vrf != key(1) {
                return Err("InvalidVrfAccount".into());
            }
            let permission = accounts
                .get(&key(5))
                .ok_or("AccountNotInitialized: permission")?;
            PermissionRecord::from_bytes(key(5), 0, permission)
                .ok_or("AccountDiscriminatorMismatch: permission")?;
            state.result = 0;
            state.redeemable = true;
            accounts.insert(key(0), state.to_bytes());
        } else if disc("mint_reward") {
            let data = accounts.get(&key(0)).ok_or("user state missing")?;
            let mut state = UserState::from_bytes(data).ok_or("bad user state")?;
            if !state.redeemable {
                return Err("AlreadyRedeemed".into());
            }
            state.redeemable = false;
            accounts.insert(key(0), state.to_bytes());
            minted.push((key(1), key(2)));
        }
        Ok(())
    }
}

impl LedgerClient for MemoryLedger {
    async fn latest_blockhash(&self) -> Result<Hash> {
        let mut inner = self.inner.lock().unwrap();
        inner.counter = inner.counter.wrapping_add(1);
        Ok(Hash::new_from_array([inner.counter; 32]))
    }

    async fn submit(
        &self,
        instructions: &[Instruction],
        signers: &[&Keypair],
        _recent_blockhash: Hash,
    ) -> Result<Signature> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = inner.rejections.pop_front() {
            return Err(LootboxError::SubmissionRejected { reason }.into());
        }

        for ix in instructions {
            for meta in ix.accounts.iter().filter(|m| m.is_signer) {
                if !signers.iter().any(|s| s.pubkey() == meta.pubkey) {
                    return Err(LootboxError::SubmissionRejected {
                        reason: format!("missing signature for {}", meta.pubkey),
                    }
                    .into());
                }
            }
        }

        let mut staged = inner.accounts.clone();
        let mut minted = Vec::new();
        for ix in instructions {
            Self::apply(&mut staged, &mut minted, ix)
                .map_err(|reason| LootboxError::SubmissionRejected { reason })?;
        }

        let changed: Vec<(Pubkey, Vec<u8>)> = staged
            .iter()
            .filter(|(k, v)| inner.accounts.get(*k) != Some(*v))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (address, data) in changed {
            inner.write(address, data);
        }
        inner.minted.extend(minted);
        inner.submissions.push(instructions.to_vec());
        inner.counter = inner.counter.wrapping_add(1);
        Ok(Signature::from([inner.counter; 64]))
    }

    async fn fetch_account(&self, address: &Pubkey) -> Result<Vec<u8>> {
        self.account(address)
            .ok_or_else(|| LootboxError::NotFound { account: *address }.into())
    }

    async fn rent_exempt_minimum(&self, len: usize) -> Result<u64> {
        Ok(len as u64 * 6_960)
    }

    async fn subscribe(&self, address: &Pubkey) -> Result<AccountSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.opened += 1;
        inner.subscribers.insert(
            id,
            Subscriber {
                address: *address,
                sender: Some(sender),
            },
        );

        let shared = self.inner.clone();
        Ok(AccountSubscription::new(*address, receiver, move || {
            shared.lock().unwrap().subscribers.remove(&id);
        }))
    }
}

/// A ledger seeded with an oracle queue and program state, plus a matching
/// client configuration.
pub struct Fixture {
    pub ledger: MemoryLedger,
    pub config: LootboxConfig,
    pub queue: QueueState,
    pub mints: [Pubkey; 3],
}

impl Fixture {
    /// `permissioned` queues need an enabled permission record; the payer is
    /// the queue authority unless `foreign_authority` is set.
    pub fn new(permissioned: bool, foreign_authority: bool) -> Self {
        let ledger = MemoryLedger::default();
        let payer = Arc::new(Keypair::new());
        let queue = QueueState {
            address: Pubkey::new_unique(),
            authority: if foreign_authority {
                Pubkey::new_unique()
            } else {
                payer.pubkey()
            },
            data_buffer: Pubkey::new_unique(),
            unpermissioned_vrf_enabled: !permissioned,
        };
        ledger.set_account(queue.address, queue.to_bytes());

        let (state_address, bump) = pda::program_state_address(&SWITCHBOARD_V2_PROGRAM_ID);
        let program_state = ProgramState {
            address: state_address,
            bump,
            authority: Pubkey::new_unique(),
            token_mint: Pubkey::new_unique(),
        };
        ledger.set_account(state_address, program_state.to_bytes());

        let mut config = LootboxConfig::new(
            payer,
            Pubkey::new_unique(),
            queue.address,
            Pubkey::new_unique(),
        );
        config.callback_timeout = Duration::from_secs(20);
        config.submit = SubmitOptions {
            initial_retry_delay: Duration::from_millis(10),
            ..Default::default()
        };

        let mints = [Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique()];
        Self {
            ledger,
            config,
            queue,
            mints,
        }
    }

    /// Mint and token account the oracle callback selects for `result`.
    pub fn reward_for(&self, result: u128) -> (Pubkey, Pubkey) {
        let mint = self.mints[(result as usize).saturating_sub(1) * 3 / 100];
        let token_account = pda::associated_token_address(&self.config.payer_pubkey(), &mint);
        (mint, token_account)
    }
}
