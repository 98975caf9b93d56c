use crate::api::*;
use crate::clock::Clock;
use crate::db::DB;
use crate::error::TruesightError;
use crate::escrow::Escrow;
use crate::oracle::{PriceReader, PriceReading};
use crate::price::compare_prices;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, trace};
use secp256k1::ecdsa::Signature;
use secp256k1::hashes::sha256::Hash;
use secp256k1::rand::distributions::Alphanumeric;
use secp256k1::rand::Rng;
use secp256k1::{rand, Message};
use std::cmp::Ordering;
use std::sync::Arc;

/// Sessions older than this have to log in again.
const SESSION_LIFETIME_DAYS: i64 = 7;

/// A prediction as it is handed to the store, before it has an id.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub owner: UserPubKey,
    pub asset_symbol: AssetSymbol,
    pub feed_id: FeedId,
    pub direction: Direction,
    pub bid_amount: Tokens,
    pub entry: PriceReading,
    pub created_at: DateTime<Utc>,
    pub expiry_at: DateTime<Utc>,
}
#[derive(Debug, Clone)]
pub struct Settlement {
    pub price: Price,
    pub validated_at: DateTime<Utc>,
    pub is_correct: bool,
}

/// Whether `direction` called the move from `entry` to `exit` right. A tie is a miss.
pub fn is_correct(direction: Direction, entry: &Price, exit: &Price) -> Result<bool, TruesightError> {
    let ordering = compare_prices(exit, entry)?;
    Ok(match direction {
        Direction::Up => ordering == Ordering::Greater,
        Direction::Down => ordering == Ordering::Less,
    })
}

pub struct Truesight {
    db: Arc<Box<dyn DB + Send + Sync>>,
    escrow: Escrow,
    prices: PriceReader,
    clock: Arc<dyn Clock + Send + Sync>,
    min_holdout_sec: i64,
    test: bool,
}

impl Truesight {
    pub fn new(
        db: Box<dyn DB + Send + Sync>,
        escrow: Escrow,
        prices: PriceReader,
        clock: Arc<dyn Clock + Send + Sync>,
        min_holdout_sec: i64,
        test: bool,
    ) -> Result<Self> {
        if min_holdout_sec <= 0 {
            bail!(
                "The minimum holdout period has to be positive, got {}s",
                min_holdout_sec
            );
        }
        Ok(Self {
            db: Arc::new(db),
            escrow,
            prices,
            clock,
            min_holdout_sec,
            test,
        })
    }
    pub async fn create_prediction(
        &self,
        direction: Direction,
        holdout_period_sec: i64,
        bid_amount: Tokens,
        asset: AssetSymbol,
        access: AccessRequest,
    ) -> Result<RowId, TruesightError> {
        let user = self.check_access(access).await?;
        if holdout_period_sec < self.min_holdout_sec {
            return Err(TruesightError::InsufficientHoldoutPeriod {
                requested: holdout_period_sec,
                minimum: self.min_holdout_sec,
            });
        }
        let holdout = std::time::Duration::from_secs(holdout_period_sec.unsigned_abs());
        let holdout = Duration::from_std(holdout)
            .map_err(|_| anyhow!("Holdout period of {}s is out of range", holdout_period_sec))?;
        self.escrow.ensure_spendable(&user, bid_amount).await?;

        let feed = self.prices.feed_for(&asset)?.clone();
        let entry = self.prices.read(&asset, &feed).await?;
        let created_at = self.clock.now();
        let expiry_at = created_at
            .checked_add_signed(holdout)
            .ok_or(anyhow!("Holdout period of {}s is out of range", holdout_period_sec))?;

        self.escrow.debit_to_stake(&user, bid_amount).await?;
        let prediction = NewPrediction {
            owner: user,
            asset_symbol: asset,
            feed_id: feed,
            direction,
            bid_amount,
            entry,
            created_at,
            expiry_at,
        };
        trace!("Persisting {:?}", prediction);
        let id = match self.db.add_prediction(prediction).await {
            Ok(id) => id,
            Err(e) => {
                error!("Couldn't persist prediction of user {}: {:#}", user, e);
                if let Err(refund) = self.escrow.refund_stake(&user, bid_amount).await {
                    error!(
                        "Couldn't refund {} to user {}, the stake stays in the staking pool: {:#}",
                        bid_amount, user, refund
                    );
                    return Err(e
                        .context(format!(
                            "Couldn't save prediction and refunding the stake failed: {:#}",
                            refund
                        ))
                        .into());
                }
                return Err(e.context("Couldn't save prediction").into());
            }
        };
        info!(
            "User {} bet {} on {} going {} until {}",
            user, bid_amount, id, direction, expiry_at
        );
        Ok(id)
    }
    /// Settles a prediction whose holdout period is over.
    ///
    /// Before `expiry_at` this changes nothing and hands back the pending record.
    pub async fn validate_prediction(
        &self,
        prediction: RowId,
    ) -> Result<PredictionRecord, TruesightError> {
        let record = self.get_prediction(prediction).await?;
        if !record.is_pending() {
            return Err(TruesightError::AlreadySettled(prediction));
        }
        let now = self.clock.now();
        if now < record.expiry_at {
            trace!(
                "Prediction {} still held until {}, now is {}",
                prediction,
                record.expiry_at,
                now
            );
            return Ok(record);
        }
        let exit = self
            .prices
            .read(&record.asset_symbol, &record.feed_id)
            .await?;
        let settlement = Settlement {
            price: exit.price(),
            validated_at: now,
            is_correct: is_correct(record.direction, &record.entry(), &exit.price())?,
        };
        if !self.db.settle_prediction(prediction, &settlement).await? {
            debug!("Prediction {} was settled concurrently", prediction);
            return Err(TruesightError::AlreadySettled(prediction));
        }
        let payout = match self
            .escrow
            .settle(record.bid_amount, settlement.is_correct, &record.owner)
            .await
        {
            Ok(payout) => payout,
            Err(e) => {
                error!("Paying out prediction {} failed: {:#}", prediction, e);
                if let Err(revert) = self.db.revert_settlement(prediction).await {
                    error!(
                        "Couldn't revert settlement of prediction {}, it stays settled with its stake in the staking pool: {:#}",
                        prediction, revert
                    );
                    return Err(anyhow::Error::new(e)
                        .context(format!(
                            "Couldn't revert settlement after failed payout: {:#}",
                            revert
                        ))
                        .into());
                }
                return Err(e);
            }
        };
        info!(
            "Settled prediction {}: {} -> {}, stake {:?}",
            prediction,
            record.entry(),
            settlement.price,
            payout
        );
        self.get_prediction(prediction).await
    }
    pub async fn get_prediction(
        &self,
        prediction: RowId,
    ) -> Result<PredictionRecord, TruesightError> {
        self.db
            .get_prediction(prediction)
            .await?
            .ok_or(TruesightError::PredictionNotFound(prediction))
    }
    pub async fn get_user_predictions(
        &self,
        user: &UserPubKey,
    ) -> Result<Vec<PredictionRecord>, TruesightError> {
        Ok(self.db.get_user_predictions(user).await?)
    }
    pub async fn get_balance(&self, user: &UserPubKey) -> Result<Tokens, TruesightError> {
        self.escrow.balance(user).await
    }
    pub async fn get_pool_balances(&self) -> Result<PoolBalancesResponse, TruesightError> {
        self.escrow.pool_balances().await
    }

    pub async fn create_login_challenge(&self, user: UserPubKey) -> Result<String> {
        let challenge: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        trace!("Generated login challenge {}", challenge);
        self.db.create_session(user, challenge.clone()).await?;
        Ok(challenge)
    }
    pub async fn try_login(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<(), TruesightError> {
        sig.verify(
            &Message::from_hashed_data::<Hash>(challenge.as_bytes()),
            &user,
        )
        .map_err(|e| TruesightError::AccessDenied(format!("invalid signature: {}", e)))?;
        self.db
            .update_access_token(user, sig, challenge)
            .await
            .map_err(|e| TruesightError::AccessDenied(format!("{:#}", e)))?;
        Ok(())
    }
    /// Returns the user the access token belongs to.
    pub async fn check_access(&self, access: AccessRequest) -> Result<UserPubKey, TruesightError> {
        if self.test {
            return Ok(access.user);
        }
        let (db_sig, last_access) = self
            .db
            .get_last_access(access.user, access.challenge)
            .await
            .map_err(|e| TruesightError::AccessDenied(format!("{:#}", e)))?;
        if access.sig != db_sig {
            debug!(
                "User {} tried to access with invalid access token",
                access.user
            );
            return Err(TruesightError::AccessDenied(format!(
                "Access token for user {} is invalid",
                access.user
            )));
        }
        if last_access < Utc::now() - Duration::days(SESSION_LIFETIME_DAYS) {
            debug!(
                "User {} tried to access after more than {} days",
                access.user, SESSION_LIFETIME_DAYS
            );
            return Err(TruesightError::AccessDenied(format!(
                "Last access was more than {} days ago",
                SESSION_LIFETIME_DAYS
            )));
        }
        Ok(access.user)
    }
}
