use crate::api::{PoolBalancesResponse, Tokens, UserPubKey};
use crate::error::TruesightError;
use crate::ledger::{Account, LedgerError, TokenLedger};
use anyhow::anyhow;
use log::{debug, error};
use std::sync::Arc;

/// Where a settled stake ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payout {
    ReturnedToUser,
    ForfeitedToPrizePool,
}

/// The only component allowed to move funds in or out of the two pools.
pub struct Escrow {
    ledger: Arc<dyn TokenLedger + Send + Sync>,
}
impl Escrow {
    pub fn new(ledger: Arc<dyn TokenLedger + Send + Sync>) -> Self {
        Self { ledger }
    }
    pub async fn balance(&self, user: &UserPubKey) -> Result<Tokens, TruesightError> {
        self.ledger
            .balance(Account::User(*user))
            .await
            .map_err(|e| anyhow!(e).context("couldn't read balance").into())
    }
    pub async fn pool_balances(&self) -> Result<PoolBalancesResponse, TruesightError> {
        let read = |e: LedgerError| TruesightError::from(anyhow!(e).context("couldn't read pools"));
        Ok(PoolBalancesResponse {
            staking_pool: self.ledger.balance(Account::StakingPool).await.map_err(read)?,
            prize_pool: self.ledger.balance(Account::PrizePool).await.map_err(read)?,
        })
    }
    /// Read-only version of the check `debit_to_stake` performs.
    pub async fn ensure_spendable(
        &self,
        user: &UserPubKey,
        amount: Tokens,
    ) -> Result<(), TruesightError> {
        let available = self.balance(user).await?;
        if amount == 0 || available < amount {
            return Err(TruesightError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        Ok(())
    }
    pub async fn debit_to_stake(
        &self,
        user: &UserPubKey,
        amount: Tokens,
    ) -> Result<(), TruesightError> {
        if amount == 0 {
            return Err(TruesightError::InsufficientBalance {
                requested: 0,
                available: self.balance(user).await?,
            });
        }
        self.ledger
            .transfer(Account::User(*user), Account::StakingPool, amount)
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientBalance {
                    requested,
                    available,
                    ..
                } => TruesightError::InsufficientBalance {
                    requested,
                    available,
                },
                e => anyhow!(e).context("couldn't stake bid").into(),
            })?;
        debug!("Staked {} for user {}", amount, user);
        Ok(())
    }
    /// Moves a stake out of the staking pool: back to the user on a win, into
    /// the prize pool otherwise.
    pub async fn settle(
        &self,
        amount: Tokens,
        winner_is_user: bool,
        user: &UserPubKey,
    ) -> Result<Payout, TruesightError> {
        let (to, payout) = if winner_is_user {
            (Account::User(*user), Payout::ReturnedToUser)
        } else {
            (Account::PrizePool, Payout::ForfeitedToPrizePool)
        };
        self.ledger
            .transfer(Account::StakingPool, to, amount)
            .await
            .map_err(|e| {
                error!("Settling {} for user {} failed: {}", amount, user, e);
                anyhow!(e).context("couldn't settle stake")
            })?;
        debug!("Settled {} from StakingPool to {}", amount, to);
        Ok(payout)
    }
    /// Undoes `debit_to_stake` for a creation that didn't go through.
    pub async fn refund_stake(
        &self,
        user: &UserPubKey,
        amount: Tokens,
    ) -> Result<(), TruesightError> {
        self.ledger
            .transfer(Account::StakingPool, Account::User(*user), amount)
            .await
            .map_err(|e| {
                error!("Refunding {} to user {} failed: {}", amount, user, e);
                anyhow!(e).context("couldn't refund stake")
            })?;
        debug!("Refunded {} to user {}", amount, user);
        Ok(())
    }
}
