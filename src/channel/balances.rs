//! Per-participant balances of a single asset.

use crate::types::U256;
use thiserror::Error;

use super::PartIdx;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transfer amount must be positive")]
    InvalidAmount,
    #[error("participant {idx} cannot pay {amount}, only has {balance}")]
    InsufficientFunds {
        idx: PartIdx,
        balance: U256,
        amount: U256,
    },
    #[error("participant index {0} out of range")]
    IndexOutOfRange(PartIdx),
    #[error("transfer from participant {0} to itself")]
    SelfTransfer(PartIdx),
    #[error("balance overflow")]
    Overflow,
}

/// Balances of one asset, indexed by participant.
///
/// Unsigned, so entries can never go negative. Transfers return a new vector
/// and leave `self` untouched if they fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balances(pub Vec<U256>);

impl Balances {
    pub fn new(balances: Vec<U256>) -> Self {
        Balances(balances)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: PartIdx) -> Option<U256> {
        self.0.get(idx).copied()
    }

    /// Sum of all entries, `None` if it does not fit into 256 bits.
    pub fn total(&self) -> Option<U256> {
        self.0
            .iter()
            .try_fold(U256::zero(), |acc, b| acc.checked_add(*b))
    }

    pub fn transfer(
        &self,
        from: PartIdx,
        to: PartIdx,
        amount: U256,
    ) -> Result<Balances, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let balance = self.get(from).ok_or(LedgerError::IndexOutOfRange(from))?;
        let receiver = self.get(to).ok_or(LedgerError::IndexOutOfRange(to))?;
        if from == to {
            return Err(LedgerError::SelfTransfer(from));
        }

        let mut next = self.clone();
        next.0[from] = balance
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                idx: from,
                balance,
                amount,
            })?;
        next.0[to] = receiver.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(next)
    }
}

impl From<Vec<U256>> for Balances {
    fn from(value: Vec<U256>) -> Self {
        Balances(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bals(values: &[u64]) -> Balances {
        Balances(values.iter().map(|v| U256::from(*v)).collect())
    }

    #[test]
    fn payment_moves_funds_and_conserves_total() {
        let before = bals(&[100, 50]);
        let after = before.transfer(0, 1, 30.into()).unwrap();
        assert_eq!(after, bals(&[70, 80]));
        assert_eq!(before.total(), after.total());
        assert_eq!(before, bals(&[100, 50]));
    }

    #[test]
    fn overdraw_fails_and_leaves_balances() {
        let before = bals(&[10, 50]);
        let err = before.transfer(0, 1, 20.into()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                idx: 0,
                balance: 10.into(),
                amount: 20.into()
            }
        );
        assert_eq!(before, bals(&[10, 50]));
    }

    #[test]
    fn whole_balance_can_be_sent() {
        let after = bals(&[10, 0]).transfer(0, 1, 10.into()).unwrap();
        assert_eq!(after, bals(&[0, 10]));
    }

    #[test]
    fn invalid_transfers() {
        let b = bals(&[10, 10]);
        assert_eq!(b.transfer(0, 1, U256::zero()), Err(LedgerError::InvalidAmount));
        assert_eq!(b.transfer(0, 2, 1.into()), Err(LedgerError::IndexOutOfRange(2)));
        assert_eq!(b.transfer(1, 1, 1.into()), Err(LedgerError::SelfTransfer(1)));
    }

    #[test]
    fn values_beyond_machine_words_are_exact() {
        let big = U256::MAX - U256::from(5);
        let b = Balances(vec![big, 5.into()]);
        let after = b.transfer(0, 1, U256::from(u128::MAX)).unwrap();
        assert_eq!(after.0[0], big - U256::from(u128::MAX));
        assert_eq!(after.0[1], U256::from(u128::MAX) + 5);
        assert_eq!(after.total(), Some(U256::MAX));

        let overflowing = Balances(vec![U256::MAX, 1.into()]);
        assert_eq!(overflowing.total(), None);
        assert_eq!(overflowing.transfer(1, 0, 1.into()), Err(LedgerError::Overflow));
    }
}
