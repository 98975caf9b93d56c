use serde::{Deserialize, Serialize};

use super::*;

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Copy)]
pub struct PoolBalancesResponse {
    pub staking_pool: Tokens,
    pub prize_pool: Tokens,
}
/// Body of every non-2xx response. `code` is stable across releases.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}
