use crate::error::{ResourceError, ValidationError};
use crate::types::{Address, Amount};
use std::collections::{BTreeMap, HashMap};

/// Withdrawable balance per address.
///
/// Balances are only changed through a [`StagedLedger`]: an operation stages
/// every credit and debit it needs, and the result is applied in one go once
/// nothing can fail anymore.
#[derive(Debug, Clone, Default)]
pub struct EscrowLedger {
    balances: HashMap<Address, Amount>,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_balances(balances: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        Self {
            balances: balances.into_iter().collect(),
        }
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.balances.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    /// Sum of all balances
    pub fn total(&self) -> Result<Amount, ValidationError> {
        self.balances
            .values()
            .try_fold(0u128, |acc, amount| acc.checked_add(*amount))
            .ok_or(ValidationError::AmountOverflow)
    }

    pub fn stage(&self) -> StagedLedger<'_> {
        StagedLedger {
            base: self,
            pending: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, changes: LedgerChanges) {
        for (address, amount) in changes.balances {
            self.balances.insert(address, amount);
        }
    }
}

/// Pending credits and debits on top of an [`EscrowLedger`]
#[derive(Debug)]
pub struct StagedLedger<'a> {
    base: &'a EscrowLedger,
    pending: BTreeMap<Address, Amount>,
}

impl StagedLedger<'_> {
    pub fn balance(&self, address: &Address) -> Amount {
        self.pending
            .get(address)
            .copied()
            .unwrap_or_else(|| self.base.balance(address))
    }

    pub fn credit(&mut self, address: Address, amount: Amount) -> Result<Amount, ValidationError> {
        let updated = self
            .balance(&address)
            .checked_add(amount)
            .ok_or(ValidationError::AmountOverflow)?;
        self.pending.insert(address, updated);
        Ok(updated)
    }

    pub fn debit(&mut self, address: Address, amount: Amount) -> Result<Amount, ResourceError> {
        let available = self.balance(&address);
        let updated = available
            .checked_sub(amount)
            .ok_or(ResourceError::InsufficientBalance {
                need: amount,
                available,
            })?;
        self.pending.insert(address, updated);
        Ok(updated)
    }

    pub fn into_changes(self) -> LedgerChanges {
        LedgerChanges {
            balances: self.pending,
        }
    }
}

/// New absolute balances produced by a staged ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    balances: BTreeMap<Address, Amount>,
}

impl LedgerChanges {
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }
}

/// Value that entered and left the escrow over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub deposits: Amount,
    pub withdrawals: Amount,
}

impl Totals {
    pub fn deposited(self, amount: Amount) -> Result<Self, ValidationError> {
        Ok(Self {
            deposits: self
                .deposits
                .checked_add(amount)
                .ok_or(ValidationError::AmountOverflow)?,
            ..self
        })
    }

    pub fn withdrawn(self, amount: Amount) -> Result<Self, ValidationError> {
        Ok(Self {
            withdrawals: self
                .withdrawals
                .checked_add(amount)
                .ok_or(ValidationError::AmountOverflow)?,
            ..self
        })
    }

    /// Undo of [`withdrawn`](Self::withdrawn) for a transfer that failed
    pub fn withdrawal_reverted(self, amount: Amount) -> Result<Self, ValidationError> {
        Ok(Self {
            withdrawals: self
                .withdrawals
                .checked_sub(amount)
                .ok_or(ValidationError::AmountOverflow)?,
            ..self
        })
    }

    /// What should currently be held: deposits minus withdrawals
    pub fn net(&self) -> Result<Amount, ValidationError> {
        self.deposits
            .checked_sub(self.withdrawals)
            .ok_or(ValidationError::AmountOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn test_staged_changes_apply_atomically() {
        let mut ledger = EscrowLedger::from_balances([(addr(1), 100)]);

        let mut staged = ledger.stage();
        staged.credit(addr(1), 50).unwrap();
        staged.debit(addr(1), 120).unwrap();
        staged.credit(addr(2), 7).unwrap();
        assert_eq!(staged.balance(&addr(1)), 30);
        let changes = staged.into_changes();

        // nothing visible until applied
        assert_eq!(ledger.balance(&addr(1)), 100);
        assert!(!ledger.contains(&addr(2)));

        ledger.apply(changes);
        assert_eq!(ledger.balance(&addr(1)), 30);
        assert_eq!(ledger.balance(&addr(2)), 7);
        assert_eq!(ledger.total().unwrap(), 37);
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let ledger = EscrowLedger::from_balances([(addr(1), 10)]);
        let mut staged = ledger.stage();

        let err = staged.debit(addr(1), 11).unwrap_err();
        assert_eq!(
            err,
            ResourceError::InsufficientBalance {
                need: 11,
                available: 10
            }
        );
        assert_eq!(staged.balance(&addr(1)), 10);
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let ledger = EscrowLedger::from_balances([(addr(1), Amount::MAX)]);
        let mut staged = ledger.stage();

        assert_eq!(staged.credit(addr(1), 1), Err(ValidationError::AmountOverflow));
        assert_eq!(staged.balance(&addr(1)), Amount::MAX);
    }
}
