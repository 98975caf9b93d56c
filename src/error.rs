use crate::api::{ErrorResponse, RowId, Tokens};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TruesightError {
    #[error("Insufficient TSD balance: requested {requested} but only {available} available")]
    InsufficientBalance { requested: Tokens, available: Tokens },
    #[error("Insufficient holdout period: {requested}s is below the minimum of {minimum}s")]
    InsufficientHoldoutPeriod { requested: i64, minimum: i64 },
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("Price scaling overflowed while comparing {0}")]
    PriceOverflow(String),
    #[error("Prediction {0} has already been settled")]
    AlreadySettled(RowId),
    #[error("Prediction {0} doesn't exist")]
    PredictionNotFound(RowId),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TruesightError {
    pub fn code(&self) -> u32 {
        match self {
            Self::InsufficientBalance { .. } => 6000,
            Self::InsufficientHoldoutPeriod { .. } => 6001,
            Self::OracleUnavailable(_) => 6002,
            Self::PriceOverflow(_) => 6003,
            Self::AlreadySettled(_) => 6004,
            Self::PredictionNotFound(_) => 6005,
            Self::AccessDenied(_) => 6006,
            Self::Internal(_) => 6100,
        }
    }
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InsufficientBalance { .. } | Self::InsufficientHoldoutPeriod { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PriceOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AlreadySettled(_) => StatusCode::CONFLICT,
            Self::PredictionNotFound(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: format!("{:#}", self),
        }
    }
}
