//! Points ledger.
//!
//! Every user carries a [`Balance`]: points they can spend (`available`) and
//! points escrowed against an accepted swap (`held`). Neither bucket can go
//! negative; every operation either applies fully or returns an error and
//! leaves the balance untouched.

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient points: {needed} required, {available} available")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("Held points {held} cannot cover {needed}")]
    InsufficientHeld { needed: u64, held: u64 },
    #[error("Points balance overflow")]
    Overflow,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    #[n(0)]
    available: u64,
    #[n(1)]
    held: u64,
}

impl Balance {
    pub fn new(available: u64) -> Self {
        Self { available, held: 0 }
    }
    pub fn available(&self) -> u64 {
        self.available
    }
    pub fn held(&self) -> u64 {
        self.held
    }
    pub fn total(&self) -> u64 {
        self.available.saturating_add(self.held)
    }
    pub fn covers(&self, amount: u64) -> bool {
        self.available >= amount
    }

    /// Unconditional add.
    pub fn credit(&mut self, amount: u64) -> Result<(), LedgerError> {
        self.available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    pub fn debit(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.available < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        Ok(())
    }

    /// Move points from available into escrow.
    pub fn hold(&mut self, amount: u64) -> Result<(), LedgerError> {
        let held = self.held.checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.debit(amount)?;
        self.held = held;
        Ok(())
    }

    /// Return escrowed points to the available bucket.
    pub fn release(&mut self, amount: u64) -> Result<(), LedgerError> {
        let available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.take_held(amount)?;
        self.available = available;
        Ok(())
    }

    /// Remove escrowed points for good; the caller credits them elsewhere.
    pub fn spend_held(&mut self, amount: u64) -> Result<(), LedgerError> {
        self.take_held(amount)
    }

    /// Admin correction: add a signed delta to the available points, clamping at zero.
    /// Returns the previous available balance.
    pub fn adjust(&mut self, delta: i64) -> u64 {
        let previous = self.available;
        self.available = if delta.is_negative() {
            previous.saturating_sub(delta.unsigned_abs())
        } else {
            previous.saturating_add(delta.unsigned_abs())
        };
        previous
    }

    fn take_held(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.held < amount {
            return Err(LedgerError::InsufficientHeld {
                needed: amount,
                held: self.held,
            });
        }
        self.held -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_refuses_to_overdraw() {
        let mut balance = Balance::new(50);
        let err = balance.debit(80).unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                needed: 80,
                available: 50
            }
        );
        assert_eq!(balance.available(), 50);
    }

    #[test]
    fn hold_then_spend_moves_points_out() {
        let mut balance = Balance::new(100);
        balance.hold(80).unwrap();
        assert_eq!((balance.available(), balance.held()), (20, 80));

        balance.spend_held(80).unwrap();
        assert_eq!((balance.available(), balance.held()), (20, 0));
    }

    #[test]
    fn release_restores_available() {
        let mut balance = Balance::new(100);
        balance.hold(30).unwrap();
        balance.release(30).unwrap();
        assert_eq!(balance, Balance::new(100));
        assert!(balance.release(1).is_err());
    }

    #[test]
    fn credit_overflow_is_an_error() {
        let mut balance = Balance::new(u64::MAX);
        assert_eq!(balance.credit(1), Err(LedgerError::Overflow));
        assert_eq!(balance.available(), u64::MAX);
    }

    #[test]
    fn adjust_clamps_at_zero() {
        let mut balance = Balance::new(10);
        assert_eq!(balance.adjust(-25), 10);
        assert_eq!(balance.available(), 0);
        balance.adjust(40);
        assert_eq!(balance.available(), 40);
    }
}
