use crate::api::*;
use crate::truesight::{NewPrediction, Settlement};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secp256k1::ecdsa::Signature;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, SqlitePool};
use std::str::FromStr;

/// Record store. Records are only ever inserted and settled, never deleted.
#[async_trait]
pub trait DB {
    async fn add_prediction(&self, prediction: NewPrediction) -> Result<RowId>;
    async fn get_prediction(&self, prediction: RowId) -> Result<Option<PredictionRecord>>;
    /// Moves a pending prediction to `Settled`. Returns false if it wasn't pending anymore.
    async fn settle_prediction(&self, prediction: RowId, settlement: &Settlement) -> Result<bool>;
    async fn revert_settlement(&self, prediction: RowId) -> Result<()>;
    async fn get_user_predictions(&self, user: &UserPubKey) -> Result<Vec<PredictionRecord>>;

    async fn create_session(&self, user: UserPubKey, challenge: String) -> Result<()>;
    async fn update_access_token(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()>;
    async fn get_last_access(
        &self,
        user: UserPubKey,
        challenge: String,
    ) -> Result<(Signature, DateTime<Utc>)>;
}
pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Result<Self> {
        let connection = match db_conn {
            Some(url) => {
                let options = SqliteConnectOptions::from_str(url.as_str())?.create_if_missing(true);
                SqlitePoolOptions::new().connect_with(options).await?
            }
            // Every connection to :memory: is its own database, so keep exactly one alive
            None => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect("sqlite::memory:")
                    .await?
            }
        };
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS predictions (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                owner TEXT NOT NULL,\
                asset TEXT NOT NULL,\
                feed_id TEXT NOT NULL,\
                direction TEXT NOT NULL,\
                bid_amount INTEGER NOT NULL CHECK (bid_amount > 0),\
                entry_price INTEGER NOT NULL,\
                entry_expo INTEGER NOT NULL,\
                entry_conf INTEGER NOT NULL,\
                created_at INTEGER NOT NULL,\
                expiry_at INTEGER NOT NULL,\
                validation_price INTEGER,\
                validation_expo INTEGER,\
                validated_at INTEGER,\
                is_correct INTEGER NOT NULL DEFAULT 0,\
                state TEXT NOT NULL DEFAULT 'Pending',\
                CHECK (expiry_at > created_at)\
                )",
            )
            .await
            .context("couldn't create predictions table")?;
        connection
            .execute("CREATE INDEX IF NOT EXISTS predictions_owner ON predictions (owner)")
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS sessions (\
                challenge TEXT NOT NULL,\
                pubkey TEXT NOT NULL,\
                access_token TEXT,\
                last_access INTEGER,\
                PRIMARY KEY (challenge)\
                )",
            )
            .await
            .context("couldn't create sessions table")?;
        Ok(Self { connection })
    }
    /// Shares the pool, so the ledger lives in the same database as the records.
    pub fn connection(&self) -> SqlitePool {
        self.connection.clone()
    }
}
#[async_trait]
impl DB for SQLite {
    async fn add_prediction(&self, prediction: NewPrediction) -> Result<RowId> {
        let id = self
            .connection
            .execute(
                query(
                    "INSERT INTO predictions (\
                    owner,\
                    asset,\
                    feed_id,\
                    direction,\
                    bid_amount,\
                    entry_price,\
                    entry_expo,\
                    entry_conf,\
                    created_at,\
                    expiry_at)\
                    VALUES (?,?,?,?,?,?,?,?,?,?)",
                )
                .bind(prediction.owner.to_string())
                .bind(prediction.asset_symbol)
                .bind(prediction.feed_id)
                .bind(prediction.direction.to_string())
                .bind(i64::try_from(prediction.bid_amount)?)
                .bind(prediction.entry.price)
                .bind(prediction.entry.exponent)
                .bind(i64::try_from(prediction.entry.confidence)?)
                .bind(prediction.created_at.timestamp())
                .bind(prediction.expiry_at.timestamp()),
            )
            .await
            .context("couldn't insert prediction")?
            .last_insert_rowid();
        Ok(id)
    }
    async fn get_prediction(&self, prediction: RowId) -> Result<Option<PredictionRecord>> {
        let row = self
            .connection
            .fetch_optional(query("SELECT * FROM predictions WHERE id = ?").bind(prediction))
            .await
            .with_context(|| format!("couldn't get prediction {}", prediction))?;
        row.as_ref().map(record_from_row).transpose()
    }
    async fn settle_prediction(&self, prediction: RowId, settlement: &Settlement) -> Result<bool> {
        let result = self
            .connection
            .execute(
                query(
                    "UPDATE predictions SET \
                    validation_price = ?, \
                    validation_expo = ?, \
                    validated_at = ?, \
                    is_correct = ?, \
                    state = 'Settled' \
                    WHERE id = ? AND state = 'Pending'",
                )
                .bind(settlement.price.mantissa)
                .bind(settlement.price.exponent)
                .bind(settlement.validated_at.timestamp())
                .bind(settlement.is_correct)
                .bind(prediction),
            )
            .await
            .with_context(|| format!("couldn't settle prediction {}", prediction))?;
        Ok(result.rows_affected() == 1)
    }
    async fn revert_settlement(&self, prediction: RowId) -> Result<()> {
        self.connection
            .execute(
                query(
                    "UPDATE predictions SET \
                    validation_price = NULL, \
                    validation_expo = NULL, \
                    validated_at = NULL, \
                    is_correct = 0, \
                    state = 'Pending' \
                    WHERE id = ? AND state = 'Settled'",
                )
                .bind(prediction),
            )
            .await
            .with_context(|| format!("couldn't revert settlement of prediction {}", prediction))?;
        Ok(())
    }
    async fn get_user_predictions(&self, user: &UserPubKey) -> Result<Vec<PredictionRecord>> {
        let rows = self
            .connection
            .fetch_all(
                query("SELECT * FROM predictions WHERE owner = ? ORDER BY id")
                    .bind(user.to_string()),
            )
            .await
            .with_context(|| format!("couldn't get predictions of user {}", user))?;
        rows.iter().map(record_from_row).collect()
    }
    async fn create_session(&self, user: UserPubKey, challenge: String) -> Result<()> {
        let stmt = query(
            "INSERT INTO sessions \
            (pubkey, challenge) VALUES (?,?)",
        );
        self.connection
            .execute(stmt.bind(user.to_string()).bind(challenge))
            .await?;
        Ok(())
    }
    async fn update_access_token(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()> {
        let stmt = query(
            "UPDATE sessions SET \
            access_token = ?, \
            last_access = ? \
            WHERE pubkey = ? AND challenge = ?",
        );
        let result = self
            .connection
            .execute(
                stmt.bind(sig.to_string())
                    .bind(Utc::now().timestamp())
                    .bind(user.to_string())
                    .bind(challenge),
            )
            .await?;
        if result.rows_affected() != 1 {
            return Err(anyhow!("No login challenge was issued to user {}", user));
        }
        Ok(())
    }
    async fn get_last_access(
        &self,
        user: UserPubKey,
        challenge: String,
    ) -> Result<(Signature, DateTime<Utc>)> {
        let stmt = query(
            "SELECT access_token, last_access \
            FROM sessions \
            WHERE pubkey = ? AND challenge = ?",
        );
        let row = self
            .connection
            .fetch_one(stmt.bind(user.to_string()).bind(challenge))
            .await?;
        let token: Option<String> = row.get("access_token");
        let last_access: Option<i64> = row.get("last_access");
        match (token, last_access) {
            (Some(token), Some(last_access)) => Ok((
                Signature::from_str(token.as_str())?,
                from_timestamp(last_access)?,
            )),
            _ => Err(anyhow!("User {} never logged in with this challenge", user)),
        }
    }
}

fn from_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(anyhow!("invalid timestamp {} in db", secs))
}
fn record_from_row(row: &SqliteRow) -> Result<PredictionRecord> {
    let owner: String = row.get("owner");
    let direction: String = row.get("direction");
    let state: String = row.get("state");
    let validated_at: Option<i64> = row.get("validated_at");
    Ok(PredictionRecord {
        id: row.get("id"),
        owner: UserPubKey::from_str(owner.as_str())?,
        asset_symbol: row.get("asset"),
        feed_id: row.get("feed_id"),
        direction: Direction::from_str(direction.as_str())?,
        bid_amount: u64::try_from(row.get::<i64, _>("bid_amount"))?,
        entry_price: row.get("entry_price"),
        entry_exponent: row.get("entry_expo"),
        entry_confidence: u64::try_from(row.get::<i64, _>("entry_conf"))?,
        created_at: from_timestamp(row.get("created_at"))?,
        expiry_at: from_timestamp(row.get("expiry_at"))?,
        validation_price: row.get("validation_price"),
        validation_exponent: row.get("validation_expo"),
        validated_at: validated_at.map(from_timestamp).transpose()?,
        is_correct: row.get("is_correct"),
        state: PredictionState::from_str(state.as_str())?,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;
    use secp256k1::{generate_keypair, rand};

    fn new_prediction(owner: UserPubKey, now: DateTime<Utc>) -> NewPrediction {
        NewPrediction {
            owner,
            asset_symbol: "Equity.US.TSLA/USD".to_string(),
            feed_id: "0xfeed".to_string(),
            direction: Direction::Up,
            bid_amount: 7,
            entry: crate::oracle::PriceReading {
                feed_id: "0xfeed".to_string(),
                price: 150000,
                exponent: -2,
                confidence: 3,
                published_at: now,
            },
            created_at: now,
            expiry_at: now + Duration::seconds(100),
        }
    }

    #[tokio::test]
    async fn store_and_load_prediction() {
        let db = SQLite::new(None).await.unwrap();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let id = db.add_prediction(new_prediction(user, now)).await.unwrap();
        let record = db.get_prediction(id).await.unwrap().unwrap();
        assert_eq!(
            record,
            PredictionRecord {
                id,
                owner: user,
                asset_symbol: "Equity.US.TSLA/USD".to_string(),
                feed_id: "0xfeed".to_string(),
                direction: Direction::Up,
                bid_amount: 7,
                entry_price: 150000,
                entry_exponent: -2,
                entry_confidence: 3,
                created_at: now,
                expiry_at: now + Duration::seconds(100),
                validation_price: None,
                validation_exponent: None,
                validated_at: None,
                is_correct: false,
                state: PredictionState::Pending,
            }
        );
        assert!(db.get_prediction(id + 1).await.unwrap().is_none());
    }
    #[tokio::test]
    async fn ids_are_not_reused() {
        let db = SQLite::new(None).await.unwrap();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = db.add_prediction(new_prediction(user, now)).await.unwrap();
        let second = db.add_prediction(new_prediction(user, now)).await.unwrap();
        assert!(second > first);
        let all = db.get_user_predictions(&user).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, second]);
    }
    #[tokio::test]
    async fn settles_exactly_once() {
        let db = SQLite::new(None).await.unwrap();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let id = db.add_prediction(new_prediction(user, now)).await.unwrap();
        let settlement = Settlement {
            price: Price::new(15005, -1),
            validated_at: now + Duration::seconds(100),
            is_correct: true,
        };
        assert!(db.settle_prediction(id, &settlement).await.unwrap());
        let other = Settlement {
            price: Price::new(1, 0),
            validated_at: now + Duration::seconds(200),
            is_correct: false,
        };
        assert!(!db.settle_prediction(id, &other).await.unwrap());

        let record = db.get_prediction(id).await.unwrap().unwrap();
        assert_eq!(record.state, PredictionState::Settled);
        assert_eq!(record.validation(), Some(Price::new(15005, -1)));
        assert_eq!(record.validated_at, Some(now + Duration::seconds(100)));
        assert!(record.is_correct);
    }
    #[tokio::test]
    async fn reverted_settlement_is_pending_again() {
        let db = SQLite::new(None).await.unwrap();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let id = db.add_prediction(new_prediction(user, now)).await.unwrap();
        let settlement = Settlement {
            price: Price::new(15005, -1),
            validated_at: now + Duration::seconds(100),
            is_correct: true,
        };
        assert!(db.settle_prediction(id, &settlement).await.unwrap());
        db.revert_settlement(id).await.unwrap();
        let record = db.get_prediction(id).await.unwrap().unwrap();
        assert!(record.is_pending());
        assert_eq!(record.validated_at, None);
        assert!(!record.is_correct);
    }
    #[tokio::test]
    async fn sessions_need_a_challenge() {
        let db = SQLite::new(None).await.unwrap();
        let (secret, user) = generate_keypair(&mut rand::thread_rng());
        let message = secp256k1::Message::from_hashed_data::<secp256k1::hashes::sha256::Hash>(
            "challenge".as_bytes(),
        );
        let sig = secret.sign_ecdsa(message);
        assert!(db
            .update_access_token(user, sig, "challenge".to_string())
            .await
            .is_err());
        db.create_session(user, "challenge".to_string()).await.unwrap();
        assert!(db
            .get_last_access(user, "challenge".to_string())
            .await
            .is_err());
        db.update_access_token(user, sig, "challenge".to_string())
            .await
            .unwrap();
        let (token, _) = db
            .get_last_access(user, "challenge".to_string())
            .await
            .unwrap();
        assert_eq!(token, sig);
    }
}
