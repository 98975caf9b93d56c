use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest token unit. One whole token is `10^TOKEN_DECIMALS` of these.
pub type Tokens = u64;
pub type UserPubKey = secp256k1::PublicKey;
pub type RowId = i64;
pub type FeedId = String;
pub type AssetSymbol = String;

pub const TOKEN_DECIMALS: u32 = 9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PredictionState {
    Pending,
    Settled,
}

/// A raw oracle price: the real value is `mantissa * 10^exponent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Price {
    pub mantissa: i64,
    pub exponent: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredictionRecord {
    pub id: RowId,
    pub owner: UserPubKey,
    pub asset_symbol: AssetSymbol,
    pub feed_id: FeedId,
    pub direction: Direction,
    pub bid_amount: Tokens,
    pub entry_price: i64,
    pub entry_exponent: i32,
    pub entry_confidence: u64,
    pub created_at: DateTime<Utc>,
    pub expiry_at: DateTime<Utc>,
    pub validation_price: Option<i64>,
    pub validation_exponent: Option<i32>,
    pub validated_at: Option<DateTime<Utc>>,
    pub is_correct: bool,
    pub state: PredictionState,
}
impl PredictionRecord {
    pub fn entry(&self) -> Price {
        Price {
            mantissa: self.entry_price,
            exponent: self.entry_exponent,
        }
    }
    pub fn validation(&self) -> Option<Price> {
        match (self.validation_price, self.validation_exponent) {
            (Some(mantissa), Some(exponent)) => Some(Price { mantissa, exponent }),
            _ => None,
        }
    }
    pub fn is_pending(&self) -> bool {
        self.state == PredictionState::Pending
    }
}
