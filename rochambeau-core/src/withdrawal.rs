use crate::engine::EngineCore;
use crate::error::{GameError, Result};
use crate::types::{Address, Amount};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Moves funds on the surrounding ledger
#[async_trait]
pub trait FundsTransfer: Send + Sync {
    async fn transfer(&self, to: Address, amount: Amount) -> Result<()>;
}

/// In-process ledger that records payouts instead of sending them
#[derive(Debug, Default)]
pub struct RecordingTransfer {
    payouts: Mutex<Vec<(Address, Amount)>>,
    failing: AtomicBool,
}

impl RecordingTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every transfer is refused
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn payouts(&self) -> Vec<(Address, Amount)> {
        self.payouts.lock().clone()
    }

    pub fn total_paid(&self) -> Amount {
        self.payouts.lock().iter().map(|(_, amount)| *amount).sum()
    }
}

#[async_trait]
impl FundsTransfer for RecordingTransfer {
    async fn transfer(&self, to: Address, amount: Amount) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GameError::transfer(format!("payout of {} to {} refused", amount, to)));
        }
        self.payouts.lock().push((to, amount));
        Ok(())
    }
}

/// Only exit for escrowed funds.
///
/// The balance is debited and persisted, and the engine lock released, before
/// the external transfer starts. A withdrawal re-entering from inside the
/// transfer therefore sees the reduced balance.
#[derive(Clone)]
pub struct WithdrawalGateway {
    core: Arc<EngineCore>,
    transfer: Arc<dyn FundsTransfer>,
}

impl WithdrawalGateway {
    pub(crate) fn new(core: Arc<EngineCore>, transfer: Arc<dyn FundsTransfer>) -> Self {
        Self { core, transfer }
    }

    pub async fn withdraw(&self, caller: Address, amount: Amount) -> Result<()> {
        if let Err(e) = self.core.reserve_withdrawal(caller, amount).await {
            tracing::warn!("Rejected withdrawal of {} by {}: {}", amount, caller, e);
            return Err(e);
        }

        if let Err(e) = self.transfer.transfer(caller, amount).await {
            tracing::warn!(
                "Transfer of {} to {} failed, restoring balance: {}",
                amount,
                caller,
                e
            );
            if let Err(release_err) = self.core.release_withdrawal(caller, amount).await {
                tracing::error!(
                    "Could not restore {} to {} after failed transfer ({}): {}",
                    amount,
                    caller,
                    e,
                    release_err
                );
                return Err(GameError::transfer(format!(
                    "{}; restoring the balance also failed: {}",
                    e, release_err
                )));
            }
            return Err(e);
        }

        self.core.confirm_withdrawal(caller, amount).await?;

        tracing::info!("Withdrew {} to {}", amount, caller);
        Ok(())
    }
}
