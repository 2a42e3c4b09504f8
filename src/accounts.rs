//! Typed views over the lootbox program's accounts.

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

/// Compute the Anchor account discriminator: `sha256("account:<Name>")[..8]`.
pub fn account_discriminator(account_name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("account:{account_name}"));
    let hash = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// Per-payer record tracking one randomness lifecycle.
///
/// Zero-copy and packed on-ledger, so fields sit at fixed offsets:
///
/// ```text
/// [0..8]     discriminator
/// [8]        bump
/// [9]        switchboard_state_bump
/// [10]       vrf_permission_bump
/// [11..43]   result_buffer ([u8; 32])
/// [43..59]   result        (u128)
/// [59..91]   vrf           (Pubkey)
/// [91..123]  mint          (Pubkey)
/// [123..155] token_account (Pubkey)
/// [155]      redeemable    (bool)
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    pub bump: u8,
    pub switchboard_state_bump: u8,
    pub vrf_permission_bump: u8,
    pub result_buffer: [u8; 32],
    /// Zero until the oracle callback writes a value in `1..=100`.
    pub result: u128,
    pub vrf: Pubkey,
    /// Reward mint chosen by the callback; default until first fulfillment.
    pub mint: Pubkey,
    pub token_account: Pubkey,
    pub redeemable: bool,
}

impl UserState {
    pub const NAME: &'static str = "UserState";
    pub const LEN: usize = 156;

    /// Parse from raw account data, discriminator included.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN || data[..8] != account_discriminator(Self::NAME) {
            return None;
        }
        let mut result_buffer = [0u8; 32];
        result_buffer.copy_from_slice(&data[11..43]);
        Some(Self {
            bump: data[8],
            switchboard_state_bump: data[9],
            vrf_permission_bump: data[10],
            result_buffer,
            result: u128::from_le_bytes(data[43..59].try_into().ok()?),
            vrf: Pubkey::try_from(&data[59..91]).ok()?,
            mint: Pubkey::try_from(&data[91..123]).ok()?,
            token_account: Pubkey::try_from(&data[123..155]).ok()?,
            redeemable: data[155] != 0,
        })
    }

    /// Serialize to the on-ledger layout, discriminator included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&account_discriminator(Self::NAME));
        buf.push(self.bump);
        buf.push(self.switchboard_state_bump);
        buf.push(self.vrf_permission_bump);
        buf.extend_from_slice(&self.result_buffer);
        buf.extend_from_slice(&self.result.to_le_bytes());
        buf.extend_from_slice(self.vrf.as_ref());
        buf.extend_from_slice(self.mint.as_ref());
        buf.extend_from_slice(self.token_account.as_ref());
        buf.push(self.redeemable as u8);
        buf
    }

    /// Whether the reward destination has been written by a fulfillment.
    pub fn has_reward_destination(&self) -> bool {
        self.mint != Pubkey::default() && self.token_account != Pubkey::default()
    }
}

/// Singleton record naming the three reward mints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lootbox {
    pub mint_one: Pubkey,
    pub mint_two: Pubkey,
    pub mint_three: Pubkey,
}

impl Lootbox {
    pub const NAME: &'static str = "Lootbox";
    pub const LEN: usize = 8 + 32 * 3;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN || data[..8] != account_discriminator(Self::NAME) {
            return None;
        }
        Some(Self {
            mint_one: Pubkey::try_from(&data[8..40]).ok()?,
            mint_two: Pubkey::try_from(&data[40..72]).ok()?,
            mint_three: Pubkey::try_from(&data[72..104]).ok()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&account_discriminator(Self::NAME));
        buf.extend_from_slice(self.mint_one.as_ref());
        buf.extend_from_slice(self.mint_two.as_ref());
        buf.extend_from_slice(self.mint_three.as_ref());
        buf
    }

    pub fn mints(&self) -> [Pubkey; 3] {
        [self.mint_one, self.mint_two, self.mint_three]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_state_layout_offsets() {
        let state = UserState {
            bump: 255,
            result: 42,
            vrf: Pubkey::new_unique(),
            redeemable: true,
            ..Default::default()
        };
        let bytes = state.to_bytes();
        assert_eq!(bytes.len(), UserState::LEN);
        assert_eq!(u128::from_le_bytes(bytes[43..59].try_into().unwrap()), 42);
        assert_eq!(&bytes[59..91], state.vrf.as_ref());
        assert_eq!(UserState::from_bytes(&bytes), Some(state));
    }

    #[test]
    fn user_state_rejects_foreign_discriminator() {
        let mut bytes = UserState::default().to_bytes();
        bytes[..8].copy_from_slice(&account_discriminator("Lootbox"));
        assert!(UserState::from_bytes(&bytes).is_none());
    }

    #[test]
    fn user_state_rejects_truncated_data() {
        let bytes = UserState::default().to_bytes();
        assert!(UserState::from_bytes(&bytes[..100]).is_none());
    }

    #[test]
    fn fresh_user_state_has_no_destination() {
        assert!(!UserState::default().has_reward_destination());
    }
}
