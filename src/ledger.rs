use crate::api::{Tokens, UserPubKey};
use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::Sqlite;
use sqlx::{query, Executor, Row, SqlitePool};
#[cfg(test)]
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(test)]
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Account {
    User(UserPubKey),
    StakingPool,
    PrizePool,
}
impl Display for Account {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user) => write!(f, "User({})", user),
            Self::StakingPool => write!(f, "StakingPool"),
            Self::PrizePool => write!(f, "PrizePool"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{account} holds {available} but {requested} were requested")]
    InsufficientBalance {
        account: Account,
        requested: Tokens,
        available: Tokens,
    },
    #[error("crediting {amount} to {account} would overflow its balance")]
    Overflow { account: Account, amount: Tokens },
    #[error("ledger storage failed: {0}")]
    Storage(String),
}

/// The token transfer primitive. A transfer either moves the whole amount or nothing.
#[async_trait]
pub trait TokenLedger {
    async fn transfer(&self, from: Account, to: Account, amount: Tokens)
        -> Result<(), LedgerError>;
    async fn balance(&self, account: Account) -> Result<Tokens, LedgerError>;
}

/// In-process ledger. Wallets sit behind a mutex, the two pools are atomic counters.
///
/// Nothing survives the process, so it only backs tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryLedger {
    wallets: Mutex<HashMap<UserPubKey, Tokens>>,
    staking_pool: AtomicU64,
    prize_pool: AtomicU64,
}
#[cfg(test)]
impl MemoryLedger {
    /// Creates tokens out of thin air.
    pub fn mint(&self, user: UserPubKey, amount: Tokens) {
        let mut wallets = self.wallets.lock().unwrap();
        let balance = wallets.entry(user).or_default();
        *balance = balance.saturating_add(amount);
    }
    fn pool(&self, account: Account) -> Option<&AtomicU64> {
        match account {
            Account::StakingPool => Some(&self.staking_pool),
            Account::PrizePool => Some(&self.prize_pool),
            Account::User(_) => None,
        }
    }
    fn withdraw(&self, account: Account, amount: Tokens) -> Result<(), LedgerError> {
        let insufficient = |available| LedgerError::InsufficientBalance {
            account,
            requested: amount,
            available,
        };
        match account {
            Account::User(user) => {
                let mut wallets = self.wallets.lock().unwrap();
                let balance = wallets.entry(user).or_default();
                *balance = balance.checked_sub(amount).ok_or(insufficient(*balance))?;
                Ok(())
            }
            pool => {
                let counter = self.pool(pool).ok_or(insufficient(0))?;
                counter
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |balance| {
                        balance.checked_sub(amount)
                    })
                    .map(|_| ())
                    .map_err(insufficient)
            }
        }
    }
    fn deposit(&self, account: Account, amount: Tokens) -> Result<(), LedgerError> {
        let overflow = LedgerError::Overflow { account, amount };
        match account {
            Account::User(user) => {
                let mut wallets = self.wallets.lock().unwrap();
                let balance = wallets.entry(user).or_default();
                *balance = balance.checked_add(amount).ok_or(overflow)?;
                Ok(())
            }
            pool => {
                let counter = self.pool(pool).ok_or(overflow.clone())?;
                counter
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |balance| {
                        balance.checked_add(amount)
                    })
                    .map(|_| ())
                    .map_err(|_| overflow)
            }
        }
    }
}
#[cfg(test)]
#[async_trait]
impl TokenLedger for MemoryLedger {
    async fn transfer(
        &self,
        from: Account,
        to: Account,
        amount: Tokens,
    ) -> Result<(), LedgerError> {
        self.withdraw(from, amount)?;
        if let Err(e) = self.deposit(to, amount) {
            // Put the tokens back where they came from, the withdrawal just succeeded
            self.deposit(from, amount)?;
            return Err(e);
        }
        Ok(())
    }
    async fn balance(&self, account: Account) -> Result<Tokens, LedgerError> {
        Ok(match account {
            Account::User(user) => self
                .wallets
                .lock()
                .unwrap()
                .get(&user)
                .copied()
                .unwrap_or_default(),
            Account::StakingPool => self.staking_pool.load(Ordering::SeqCst),
            Account::PrizePool => self.prize_pool.load(Ordering::SeqCst),
        })
    }
}

/// Ledger stored next to the prediction records, so stakes and pools survive restarts.
///
/// Balances are kept as non-negative `INTEGER`s, which caps any single balance at `i64::MAX`.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    connection: SqlitePool,
}
impl SqliteLedger {
    pub async fn new(connection: SqlitePool) -> anyhow::Result<Self> {
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS wallets (\
                pubkey TEXT NOT NULL,\
                balance INTEGER NOT NULL CHECK (balance >= 0),\
                PRIMARY KEY (pubkey)\
                )",
            )
            .await
            .context("couldn't create wallets table")?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS pools (\
                name TEXT NOT NULL,\
                balance INTEGER NOT NULL CHECK (balance >= 0),\
                PRIMARY KEY (name)\
                )",
            )
            .await
            .context("couldn't create pools table")?;
        connection
            .execute(
                "INSERT OR IGNORE INTO pools (name, balance) \
                VALUES ('StakingPool', 0), ('PrizePool', 0)",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS genesis (\
                pubkey TEXT NOT NULL,\
                amount INTEGER NOT NULL,\
                PRIMARY KEY (pubkey)\
                )",
            )
            .await
            .context("couldn't create genesis table")?;
        Ok(Self { connection })
    }
    /// Credits a configured starting balance, once per user for the lifetime of the database.
    ///
    /// Returns false if the user already received it on an earlier boot.
    pub async fn mint_genesis(&self, user: UserPubKey, amount: Tokens) -> anyhow::Result<bool> {
        let units = i64::try_from(amount)?;
        let mut tx = self.connection.begin().await?;
        let inserted = query("INSERT OR IGNORE INTO genesis (pubkey, amount) VALUES (?, ?)")
            .bind(user.to_string())
            .bind(units)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if !inserted {
            return Ok(false);
        }
        let credited = query(DEPOSIT_USER)
            .bind(user.to_string())
            .bind(units)
            .bind(i64::MAX - units)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if !credited {
            anyhow::bail!("Genesis balance of {} would overflow the wallet of {}", amount, user);
        }
        tx.commit().await?;
        Ok(true)
    }
}

const BALANCE_USER: &str = "SELECT balance FROM wallets WHERE pubkey = ?";
const BALANCE_POOL: &str = "SELECT balance FROM pools WHERE name = ?";
const WITHDRAW_USER: &str =
    "UPDATE wallets SET balance = balance - ? WHERE pubkey = ? AND balance >= ?";
const WITHDRAW_POOL: &str = "UPDATE pools SET balance = balance - ? WHERE name = ? AND balance >= ?";
const DEPOSIT_USER: &str = "INSERT INTO wallets (pubkey, balance) VALUES (?, ?) \
    ON CONFLICT (pubkey) DO UPDATE SET balance = balance + excluded.balance \
    WHERE balance <= ?";
const DEPOSIT_POOL: &str = "UPDATE pools SET balance = balance + ? WHERE name = ? AND balance <= ?";

fn account_key(account: &Account) -> String {
    match account {
        Account::User(user) => user.to_string(),
        pool => pool.to_string(),
    }
}
fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}
async fn read_balance<'e, E>(executor: E, account: Account) -> Result<Tokens, LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = match account {
        Account::User(_) => BALANCE_USER,
        _ => BALANCE_POOL,
    };
    let row = query(sql)
        .bind(account_key(&account))
        .fetch_optional(executor)
        .await
        .map_err(storage)?;
    let balance: i64 = row.map(|row| row.get("balance")).unwrap_or_default();
    Tokens::try_from(balance)
        .map_err(|_| LedgerError::Storage(format!("{} holds negative balance {}", account, balance)))
}

#[async_trait]
impl TokenLedger for SqliteLedger {
    async fn transfer(
        &self,
        from: Account,
        to: Account,
        amount: Tokens,
    ) -> Result<(), LedgerError> {
        let units = i64::try_from(amount).map_err(|_| LedgerError::Overflow {
            account: to,
            amount,
        })?;
        // Dropping the transaction without commit rolls it back
        let mut tx = self.connection.begin().await.map_err(storage)?;
        let withdraw = match from {
            Account::User(_) => WITHDRAW_USER,
            _ => WITHDRAW_POOL,
        };
        let withdrawn = query(withdraw)
            .bind(units)
            .bind(account_key(&from))
            .bind(units)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected();
        if withdrawn != 1 {
            let available = read_balance(&mut *tx, from).await?;
            return Err(LedgerError::InsufficientBalance {
                account: from,
                requested: amount,
                available,
            });
        }
        let deposited = match to {
            Account::User(_) => query(DEPOSIT_USER).bind(account_key(&to)).bind(units),
            _ => query(DEPOSIT_POOL).bind(units).bind(account_key(&to)),
        }
        .bind(i64::MAX - units)
        .execute(&mut *tx)
        .await
        .map_err(storage)?
        .rows_affected();
        if deposited != 1 {
            return Err(LedgerError::Overflow {
                account: to,
                amount,
            });
        }
        tx.commit().await.map_err(storage)?;
        debug!("Moved {} from {} to {}", amount, from, to);
        Ok(())
    }
    async fn balance(&self, account: Account) -> Result<Tokens, LedgerError> {
        read_balance(&self.connection, account).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::SQLite;
    use secp256k1::{generate_keypair, rand};
    use std::sync::Arc;

    async fn sqlite_ledger() -> SqliteLedger {
        let db = SQLite::new(None).await.unwrap();
        SqliteLedger::new(db.connection()).await.unwrap()
    }

    #[tokio::test]
    async fn transfers_move_whole_amounts() {
        let ledger = MemoryLedger::default();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        ledger.mint(user, 100);
        ledger
            .transfer(Account::User(user), Account::StakingPool, 70)
            .await
            .unwrap();
        assert_eq!(ledger.balance(Account::User(user)).await.unwrap(), 30);
        assert_eq!(ledger.balance(Account::StakingPool).await.unwrap(), 70);

        let result = ledger
            .transfer(Account::User(user), Account::StakingPool, 31)
            .await;
        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                account: Account::User(user),
                requested: 31,
                available: 30,
            })
        );
        assert_eq!(ledger.balance(Account::User(user)).await.unwrap(), 30);
        assert_eq!(ledger.balance(Account::StakingPool).await.unwrap(), 70);
    }
    #[tokio::test]
    async fn pools_cannot_go_negative() {
        let ledger = MemoryLedger::default();
        let result = ledger
            .transfer(Account::StakingPool, Account::PrizePool, 1)
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { available: 0, .. })
        ));
        assert_eq!(ledger.balance(Account::PrizePool).await.unwrap(), 0);
    }
    #[tokio::test]
    async fn concurrent_transfers_conserve_supply() {
        let ledger = Arc::new(MemoryLedger::default());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        ledger.mint(user, 1000);
        ledger
            .transfer(Account::User(user), Account::StakingPool, 1000)
            .await
            .unwrap();
        let mut handles = vec![];
        for i in 0..100 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let to = if i % 2 == 0 {
                    Account::PrizePool
                } else {
                    Account::User(user)
                };
                ledger.transfer(Account::StakingPool, to, 10).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ledger.balance(Account::StakingPool).await.unwrap(), 0);
        assert_eq!(ledger.balance(Account::PrizePool).await.unwrap(), 500);
        assert_eq!(ledger.balance(Account::User(user)).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn sqlite_transfers_move_whole_amounts() {
        let ledger = sqlite_ledger().await;
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        assert!(ledger.mint_genesis(user, 100).await.unwrap());
        ledger
            .transfer(Account::User(user), Account::StakingPool, 70)
            .await
            .unwrap();
        let result = ledger
            .transfer(Account::User(user), Account::StakingPool, 31)
            .await;
        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                account: Account::User(user),
                requested: 31,
                available: 30,
            })
        );
        ledger
            .transfer(Account::StakingPool, Account::PrizePool, 20)
            .await
            .unwrap();
        ledger
            .transfer(Account::StakingPool, Account::User(user), 50)
            .await
            .unwrap();
        assert_eq!(ledger.balance(Account::User(user)).await.unwrap(), 80);
        assert_eq!(ledger.balance(Account::StakingPool).await.unwrap(), 0);
        assert_eq!(ledger.balance(Account::PrizePool).await.unwrap(), 20);

        let result = ledger
            .transfer(Account::StakingPool, Account::PrizePool, 1)
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { available: 0, .. })
        ));
    }
    #[tokio::test]
    async fn sqlite_overflow_moves_nothing() {
        let ledger = sqlite_ledger().await;
        let (_, rich) = generate_keypair(&mut rand::thread_rng());
        let (_, other) = generate_keypair(&mut rand::thread_rng());
        let max = i64::MAX as Tokens;
        ledger.mint_genesis(rich, max).await.unwrap();
        ledger.mint_genesis(other, 1).await.unwrap();
        let result = ledger
            .transfer(Account::User(other), Account::User(rich), 1)
            .await;
        assert!(matches!(result, Err(LedgerError::Overflow { .. })));
        assert_eq!(ledger.balance(Account::User(other)).await.unwrap(), 1);
        assert_eq!(ledger.balance(Account::User(rich)).await.unwrap(), max);

        let result = ledger
            .transfer(Account::User(rich), Account::StakingPool, max + 1)
            .await;
        assert!(matches!(result, Err(LedgerError::Overflow { .. })));
    }
    #[tokio::test]
    async fn genesis_is_minted_once() {
        let ledger = sqlite_ledger().await;
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        assert!(ledger.mint_genesis(user, 100).await.unwrap());
        ledger
            .transfer(Account::User(user), Account::StakingPool, 100)
            .await
            .unwrap();
        assert!(!ledger.mint_genesis(user, 100).await.unwrap());
        assert_eq!(ledger.balance(Account::User(user)).await.unwrap(), 0);
        assert_eq!(ledger.balance(Account::StakingPool).await.unwrap(), 100);
    }
    #[tokio::test]
    async fn sqlite_balances_survive_reopening() {
        let path = std::env::temp_dir().join("truesight-ledger-reopen.db");
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
        let url = format!("sqlite://{}", path.display());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        {
            let db = SQLite::new(Some(url.clone())).await.unwrap();
            let ledger = SqliteLedger::new(db.connection()).await.unwrap();
            ledger.mint_genesis(user, 100).await.unwrap();
            ledger
                .transfer(Account::User(user), Account::StakingPool, 7)
                .await
                .unwrap();
            db.connection().close().await;
        }
        let db = SQLite::new(Some(url)).await.unwrap();
        let ledger = SqliteLedger::new(db.connection()).await.unwrap();
        assert!(!ledger.mint_genesis(user, 100).await.unwrap());
        assert_eq!(ledger.balance(Account::User(user)).await.unwrap(), 93);
        assert_eq!(ledger.balance(Account::StakingPool).await.unwrap(), 7);
    }
}
