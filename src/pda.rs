//! Deterministic program-derived addresses.
//!
//! Every account this client touches is either a caller-supplied key or an
//! off-curve address derived from fixed seeds. Derivation is pure; the same
//! seeds and program always yield the same `(address, bump)`.

use solana_sdk::pubkey::Pubkey;

use crate::error::LootboxError;
use crate::instructions::{ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID};

/// Maximum length of a single seed.
pub const MAX_SEED_LEN: usize = 32;

/// Maximum number of caller seeds. The ledger allows 16 in total and the
/// bump occupies the last slot.
pub const MAX_SEEDS: usize = 15;

pub const LOOTBOX_SEED: &[u8] = b"LOOTBOX";
pub const MINT_AUTH_SEED: &[u8] = b"MINT_AUTH";
pub const PROGRAM_STATE_SEED: &[u8] = b"STATE";
pub const PERMISSION_SEED: &[u8] = b"PermissionAccountData";

/// Derive an off-curve address and its bump from `seeds` under `program_id`.
pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> Result<(Pubkey, u8), LootboxError> {
    if seeds.len() > MAX_SEEDS {
        return Err(LootboxError::InvalidSeed {
            reason: format!("{} seeds given, at most {MAX_SEEDS} allowed", seeds.len()),
        });
    }
    if let Some((index, seed)) = seeds
        .iter()
        .enumerate()
        .find(|(_, seed)| seed.len() > MAX_SEED_LEN)
    {
        return Err(LootboxError::InvalidSeed {
            reason: format!(
                "seed {index} is {} bytes, at most {MAX_SEED_LEN} allowed",
                seed.len()
            ),
        });
    }

    Pubkey::try_find_program_address(seeds, program_id).ok_or_else(|| LootboxError::InvalidSeed {
        reason: "no viable bump seed".into(),
    })
}

/// Per-payer user state record: `[payer]` under the lootbox program.
pub fn user_state_address(lootbox_program: &Pubkey, payer: &Pubkey) -> (Pubkey, u8) {
    derive_fixed(&[payer.as_ref()], lootbox_program)
}

/// Singleton lootbox record holding the three reward mints.
pub fn lootbox_address(lootbox_program: &Pubkey) -> (Pubkey, u8) {
    derive_fixed(&[LOOTBOX_SEED], lootbox_program)
}

/// Signing PDA that owns the reward mints.
pub fn mint_authority_address(lootbox_program: &Pubkey) -> (Pubkey, u8) {
    derive_fixed(&[MINT_AUTH_SEED], lootbox_program)
}

/// Oracle program's global state record.
pub fn program_state_address(switchboard_program: &Pubkey) -> (Pubkey, u8) {
    derive_fixed(&[PROGRAM_STATE_SEED], switchboard_program)
}

/// Permission record binding `grantee` to the queue `granter` under `authority`.
pub fn permission_address(
    switchboard_program: &Pubkey,
    authority: &Pubkey,
    granter: &Pubkey,
    grantee: &Pubkey,
) -> (Pubkey, u8) {
    derive_fixed(
        &[
            PERMISSION_SEED,
            authority.as_ref(),
            granter.as_ref(),
            grantee.as_ref(),
        ],
        switchboard_program,
    )
}

/// Associated token account of `owner` for `mint`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    derive_fixed(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

/// Derivation over seeds whose shape is fixed at compile time.
fn derive_fixed(seeds: &[&[u8]], program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(seeds, program_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let program = Pubkey::new_unique();
        let payer = Pubkey::new_unique();

        let a = derive(&[payer.as_ref()], &program).unwrap();
        let b = derive(&[payer.as_ref()], &program).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, user_state_address(&program, &payer));
    }

    #[test]
    fn derived_addresses_are_off_curve() {
        let program = Pubkey::new_unique();
        let (address, _) = lootbox_address(&program);
        assert!(!address.is_on_curve());
    }

    #[test]
    fn different_programs_yield_different_addresses() {
        let payer = Pubkey::new_unique();
        let (a, _) = user_state_address(&Pubkey::new_unique(), &payer);
        let (b, _) = user_state_address(&Pubkey::new_unique(), &payer);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_oversized_seed() {
        let program = Pubkey::new_unique();
        let long = [7u8; MAX_SEED_LEN + 1];
        let err = derive(&[&long], &program).unwrap_err();
        assert!(matches!(err, LootboxError::InvalidSeed { .. }));
    }

    #[test]
    fn rejects_too_many_seeds() {
        let program = Pubkey::new_unique();
        let seed: &[u8] = b"s";
        let seeds = vec![seed; MAX_SEEDS + 1];
        let err = derive(&seeds, &program).unwrap_err();
        assert!(matches!(err, LootboxError::InvalidSeed { .. }));
    }

    #[test]
    fn accepts_maximum_seed_shape() {
        let program = Pubkey::new_unique();
        let seed = [1u8; MAX_SEED_LEN];
        let seeds = vec![&seed[..]; MAX_SEEDS];
        assert!(derive(&seeds, &program).is_ok());
    }
}
