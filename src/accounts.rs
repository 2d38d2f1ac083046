//! Account state seen by settlement.
//!
//! Balances, relayer fee rates and owners, user nonces and token decimals
//! live in the chain's global account state. The matching core only needs
//! the [`AccountState`] capability; [`MemoryAccounts`] is the in-process
//! implementation used by the demo binary and the tests.
//!
//! Snapshots here and snapshots of the versioned order state are always
//! taken and reverted together.

use std::collections::BTreeMap;

use primitive_types::{H160, U256};
use tracing::trace;

use crate::error::{BookError, Result};

/// Capability the settlement step needs from the account state.
pub trait AccountState {
    fn balance(&self, user: H160, token: H160) -> U256;

    fn add_balance(&mut self, user: H160, token: H160, amount: U256) -> Result<()>;

    /// Fails with [`BookError::InsufficientBalance`] rather than going negative.
    fn sub_balance(&mut self, user: H160, token: H160, amount: U256) -> Result<()>;

    /// Fee rate in units of the base fee (10 000 = 100%)
    fn relayer_fee_rate(&self, exchange: H160) -> U256;

    /// Address credited with the relayer's trading fees
    fn relayer_owner(&self, exchange: H160) -> H160;

    /// True if the relayer's deposit covers `fee`
    fn check_relayer_fee(&self, exchange: H160, fee: U256) -> bool;

    /// Charge the per-trade relayer fee against the deposit.
    fn sub_relayer_fee(&mut self, exchange: H160, fee: U256) -> Result<()>;

    /// Next expected nonce of a user
    fn nonce(&self, user: H160) -> u64;

    fn set_nonce(&mut self, user: H160, nonce: u64);

    /// Decimals of a token (10^decimals units per token)
    fn token_decimals(&self, token: H160) -> u32;

    fn snapshot(&mut self) -> usize;

    fn revert_to_snapshot(&mut self, id: usize) -> Result<()>;
}

/// Relayer registration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Relayer {
    pub owner: H160,
    pub fee_rate: U256,
    pub deposit: U256,
}

#[derive(Debug, Clone)]
enum AccountChange {
    Balance { user: H160, token: H160, prev: U256 },
    Deposit { exchange: H160, prev: U256 },
    Nonce { user: H160, prev: u64 },
}

/// In-memory account state with journaled snapshots.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccounts {
    balances: BTreeMap<(H160, H160), U256>,
    relayers: BTreeMap<H160, Relayer>,
    nonces: BTreeMap<H160, u64>,
    decimals: BTreeMap<H160, u32>,
    default_decimals: u32,
    journal: Vec<AccountChange>,
    revisions: Vec<(usize, usize)>,
    next_revision: usize,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self {
            default_decimals: crate::types::units::DEFAULT_DECIMALS,
            ..Self::default()
        }
    }

    /// Set a balance directly (genesis / test setup, not journaled)
    pub fn set_balance(&mut self, user: H160, token: H160, amount: U256) {
        self.balances.insert((user, token), amount);
    }

    pub fn register_relayer(&mut self, exchange: H160, relayer: Relayer) {
        self.relayers.insert(exchange, relayer);
    }

    pub fn set_token_decimals(&mut self, token: H160, decimals: u32) {
        self.decimals.insert(token, decimals);
    }

    pub fn relayer(&self, exchange: H160) -> Option<&Relayer> {
        self.relayers.get(&exchange)
    }

    /// Sum of all balances of one token
    pub fn total_supply(&self, token: H160) -> U256 {
        self.balances
            .iter()
            .filter(|((_, t), _)| *t == token)
            .fold(U256::zero(), |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

impl AccountState for MemoryAccounts {
    fn balance(&self, user: H160, token: H160) -> U256 {
        self.balances.get(&(user, token)).copied().unwrap_or_default()
    }

    fn add_balance(&mut self, user: H160, token: H160, amount: U256) -> Result<()> {
        let prev = self.balance(user, token);
        let next = prev
            .checked_add(amount)
            .ok_or(BookError::Overflow("account balance"))?;
        self.journal.push(AccountChange::Balance { user, token, prev });
        self.balances.insert((user, token), next);
        Ok(())
    }

    fn sub_balance(&mut self, user: H160, token: H160, amount: U256) -> Result<()> {
        let prev = self.balance(user, token);
        let next = prev
            .checked_sub(amount)
            .ok_or_else(|| BookError::InsufficientBalance(format!("{user:?} token {token:?}")))?;
        self.journal.push(AccountChange::Balance { user, token, prev });
        self.balances.insert((user, token), next);
        Ok(())
    }

    fn relayer_fee_rate(&self, exchange: H160) -> U256 {
        self.relayers
            .get(&exchange)
            .map(|r| r.fee_rate)
            .unwrap_or_default()
    }

    fn relayer_owner(&self, exchange: H160) -> H160 {
        self.relayers
            .get(&exchange)
            .map(|r| r.owner)
            .unwrap_or(exchange)
    }

    fn check_relayer_fee(&self, exchange: H160, fee: U256) -> bool {
        self.relayers
            .get(&exchange)
            .map_or(false, |r| r.deposit >= fee)
    }

    fn sub_relayer_fee(&mut self, exchange: H160, fee: U256) -> Result<()> {
        let relayer = self
            .relayers
            .get_mut(&exchange)
            .ok_or_else(|| BookError::InsufficientBalance(format!("relayer {exchange:?} not registered")))?;
        let prev = relayer.deposit;
        relayer.deposit = prev
            .checked_sub(fee)
            .ok_or_else(|| BookError::InsufficientBalance(format!("relayer {exchange:?} deposit")))?;
        self.journal.push(AccountChange::Deposit { exchange, prev });
        Ok(())
    }

    fn nonce(&self, user: H160) -> u64 {
        self.nonces.get(&user).copied().unwrap_or_default()
    }

    fn set_nonce(&mut self, user: H160, nonce: u64) {
        let prev = self.nonce(user);
        self.journal.push(AccountChange::Nonce { user, prev });
        self.nonces.insert(user, nonce);
    }

    fn token_decimals(&self, token: H160) -> u32 {
        self.decimals
            .get(&token)
            .copied()
            .unwrap_or(self.default_decimals)
    }

    fn snapshot(&mut self) -> usize {
        let id = self.next_revision;
        self.next_revision += 1;
        self.revisions.push((id, self.journal.len()));
        id
    }

    fn revert_to_snapshot(&mut self, id: usize) -> Result<()> {
        let idx = self
            .revisions
            .binary_search_by_key(&id, |(rev, _)| *rev)
            .map_err(|_| BookError::RevisionNotFound(id))?;
        let length = self.revisions[idx].1;
        while self.journal.len() > length {
            match self.journal.pop() {
                Some(AccountChange::Balance { user, token, prev }) => {
                    self.balances.insert((user, token), prev);
                }
                Some(AccountChange::Deposit { exchange, prev }) => {
                    if let Some(relayer) = self.relayers.get_mut(&exchange) {
                        relayer.deposit = prev;
                    }
                }
                Some(AccountChange::Nonce { user, prev }) => {
                    self.nonces.insert(user, prev);
                }
                None => break,
            }
        }
        self.revisions.truncate(idx);
        trace!(revision = id, "account state reverted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> H160 {
        H160::repeat_byte(byte)
    }

    #[test]
    fn test_balances() {
        let mut accounts = MemoryAccounts::new();
        accounts.set_balance(addr(1), addr(9), U256::from(100u64));

        accounts.sub_balance(addr(1), addr(9), U256::from(40u64)).unwrap();
        accounts.add_balance(addr(2), addr(9), U256::from(40u64)).unwrap();

        assert_eq!(accounts.balance(addr(1), addr(9)), U256::from(60u64));
        assert_eq!(accounts.balance(addr(2), addr(9)), U256::from(40u64));
        assert_eq!(accounts.total_supply(addr(9)), U256::from(100u64));
    }

    #[test]
    fn test_sub_balance_insufficient() {
        let mut accounts = MemoryAccounts::new();
        let err = accounts.sub_balance(addr(1), addr(9), U256::one()).unwrap_err();
        assert!(matches!(err, BookError::InsufficientBalance(_)));
        assert_eq!(accounts.balance(addr(1), addr(9)), U256::zero());
    }

    #[test]
    fn test_relayer_fee() {
        let mut accounts = MemoryAccounts::new();
        accounts.register_relayer(
            addr(5),
            Relayer {
                owner: addr(6),
                fee_rate: U256::from(10u64),
                deposit: U256::from(3u64),
            },
        );

        assert!(accounts.check_relayer_fee(addr(5), U256::from(3u64)));
        assert!(!accounts.check_relayer_fee(addr(5), U256::from(4u64)));
        assert!(!accounts.check_relayer_fee(addr(7), U256::zero()));
        assert_eq!(accounts.relayer_owner(addr(5)), addr(6));
        assert_eq!(accounts.relayer_fee_rate(addr(5)), U256::from(10u64));

        accounts.sub_relayer_fee(addr(5), U256::from(2u64)).unwrap();
        assert!(accounts.sub_relayer_fee(addr(5), U256::from(2u64)).is_err());
    }

    #[test]
    fn test_snapshot_revert() {
        let mut accounts = MemoryAccounts::new();
        accounts.set_balance(addr(1), addr(9), U256::from(100u64));

        let snap = accounts.snapshot();
        accounts.sub_balance(addr(1), addr(9), U256::from(30u64)).unwrap();
        accounts.set_nonce(addr(1), 5);
        let inner = accounts.snapshot();
        accounts.add_balance(addr(1), addr(9), U256::from(1u64)).unwrap();

        accounts.revert_to_snapshot(snap).unwrap();
        assert_eq!(accounts.balance(addr(1), addr(9)), U256::from(100u64));
        assert_eq!(accounts.nonce(addr(1)), 0);

        // Later snapshot invalidated
        assert!(matches!(
            accounts.revert_to_snapshot(inner),
            Err(BookError::RevisionNotFound(_))
        ));
    }

    #[test]
    fn test_default_decimals() {
        let mut accounts = MemoryAccounts::new();
        assert_eq!(accounts.token_decimals(addr(1)), 18);
        accounts.set_token_decimals(addr(1), 6);
        assert_eq!(accounts.token_decimals(addr(1)), 6);
    }
}
