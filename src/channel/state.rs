//! Channel parameters and versioned channel states.

use super::{balances::Balances, LedgerError, PartIdx};
use crate::types::{Address, Asset, Hash, U256};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("state is already final")]
    AlreadyFinal,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Parameters for this channel, fixed once the channel exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    /// Seconds a registered non-final state can be disputed.
    pub challenge_duration: u64,
    pub nonce: U256,
    pub participants: Vec<Address>,
    /// Always zero: only plain payment channels are supported.
    pub app: Address,
}

impl Params {
    /// Derive the channel id.
    ///
    /// Every field is written as a 32 byte word (the participant count before
    /// the participants), so two parameter sets can only collide if all
    /// fields are equal, which the random nonce prevents.
    pub fn channel_id(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(U256::from(self.challenge_duration).to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(U256::from(self.participants.len()).to_be_bytes());
        for p in &self.participants {
            hasher.update(p.to_word());
        }
        hasher.update(self.app.to_word());
        Hash(hasher.finalize().into())
    }

    pub fn num_parts(&self) -> usize {
        self.participants.len()
    }

    pub fn part_idx(&self, addr: &Address) -> Option<PartIdx> {
        self.participants.iter().position(|p| p == addr)
    }
}

/// Stores the complete state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    id: Hash,
    version: u64,
    pub asset: Asset,
    balances: Balances,
    is_final: bool,
}

impl State {
    /// The initial state (version 0) of the channel described by `params`.
    pub fn new(params: &Params, asset: Asset, balances: Balances) -> Self {
        State {
            id: params.channel_id(),
            version: 0,
            asset,
            balances,
            is_final: false,
        }
    }

    /// Reassemble a state received from a peer or loaded from storage.
    /// Nothing about it is trusted: channels check it before using it.
    pub(crate) fn from_parts(
        id: Hash,
        version: u64,
        asset: Asset,
        balances: Balances,
        is_final: bool,
    ) -> Self {
        State {
            id,
            version,
            asset,
            balances,
            is_final,
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Create the successor of this state: a copy with the version increased
    /// by one and `transform` applied to it.
    ///
    /// Id and version are private, so `transform` can only change balances
    /// and finality. `self` is never modified.
    pub fn clone_with<F>(&self, transform: F) -> Result<State, StateError>
    where
        F: FnOnce(&mut State) -> Result<(), StateError>,
    {
        if self.is_final {
            return Err(StateError::AlreadyFinal);
        }
        let mut next = State {
            version: self.version + 1,
            ..self.clone()
        };
        transform(&mut next)?;
        Ok(next)
    }

    /// Move `amount` from participant `from` to `to`.
    pub fn transfer(&mut self, from: PartIdx, to: PartIdx, amount: U256) -> Result<(), StateError> {
        if self.is_final {
            return Err(StateError::AlreadyFinal);
        }
        self.balances = self.balances.transfer(from, to, amount)?;
        Ok(())
    }

    pub fn mark_final(&mut self) -> Result<(), StateError> {
        if self.is_final {
            return Err(StateError::AlreadyFinal);
        }
        self.is_final = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(nonce: u64) -> Params {
        Params {
            challenge_duration: 60,
            nonce: nonce.into(),
            participants: vec![Address([1; 20]), Address([2; 20])],
            app: Address::default(),
        }
    }

    fn state() -> State {
        State::new(
            &params(1),
            Asset::default(),
            Balances(vec![100.into(), 50.into()]),
        )
    }

    #[test]
    fn channel_id_depends_on_nonce() {
        assert_eq!(params(1).channel_id(), params(1).channel_id());
        assert_ne!(params(1).channel_id(), params(2).channel_id());
        let mut swapped = params(1);
        swapped.participants.reverse();
        assert_ne!(swapped.channel_id(), params(1).channel_id());
    }

    #[test]
    fn clone_with_bumps_version_and_keeps_original() {
        let s0 = state();
        let s1 = s0.clone_with(|s| s.transfer(0, 1, 30.into())).unwrap();
        assert_eq!(s1.version(), s0.version() + 1);
        assert_eq!(s1.channel_id(), s0.channel_id());
        assert_eq!(s1.balances(), &Balances(vec![70.into(), 80.into()]));
        assert_eq!(s0.balances(), &Balances(vec![100.into(), 50.into()]));
    }

    #[test]
    fn failed_transform_yields_nothing() {
        let s0 = state();
        let err = s0.clone_with(|s| s.transfer(0, 1, 500.into())).unwrap_err();
        assert!(matches!(
            err,
            StateError::Ledger(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(s0.version(), 0);
    }

    #[test]
    fn final_state_is_terminal() {
        let fin = state().clone_with(State::mark_final).unwrap();
        assert!(fin.is_final());
        assert_eq!(fin.version(), 1);
        assert_eq!(
            fin.clone_with(State::mark_final),
            Err(StateError::AlreadyFinal)
        );
        assert_eq!(
            fin.clone_with(|s| s.transfer(0, 1, 1.into())),
            Err(StateError::AlreadyFinal)
        );

        let mut marked = state();
        marked.mark_final().unwrap();
        assert_eq!(marked.mark_final(), Err(StateError::AlreadyFinal));
    }
}
