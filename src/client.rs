use anyhow::Result;
use reqwest::StatusCode;
use secp256k1::ecdsa::Signature;

use crate::api::*;

pub struct Client {
    url: String,
    client: reqwest::Client,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    pub async fn get_login_challenge(&self, user: UserPubKey) -> Result<String> {
        let response = self
            .client
            .post(self.url.clone() + "/get_login_challenge")
            .json(&user)
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.text().await?)
    }
    pub async fn try_login(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()> {
        let request = LoginRequest {
            user,
            challenge,
            sig,
        };
        let response = self
            .client
            .post(self.url.clone() + "/try_login")
            .json(&request)
            .send()
            .await?;
        bail_if_err(response, StatusCode::OK).await?;
        Ok(())
    }
    pub async fn create_prediction(
        &self,
        request: CreatePredictionRequest,
        access: AccessRequest,
    ) -> Result<RowId> {
        let request = PostRequest {
            data: request,
            access,
        };
        let response = self
            .client
            .post(self.url.clone() + "/create_prediction")
            .json(&request)
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::CREATED).await?;
        Ok(response.json::<RowId>().await?)
    }
    pub async fn validate_prediction(&self, prediction: RowId) -> Result<PredictionRecord> {
        let response = self
            .client
            .post(self.url.clone() + "/validate_prediction")
            .json(&PredictionRequest { prediction })
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<PredictionRecord>().await?)
    }
    pub async fn get_prediction(&self, prediction: RowId) -> Result<PredictionRecord> {
        let response = self
            .client
            .post(self.url.clone() + "/get_prediction")
            .json(&PredictionRequest { prediction })
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<PredictionRecord>().await?)
    }
    pub async fn get_user_predictions(&self, user: UserPubKey) -> Result<Vec<PredictionRecord>> {
        let response = self
            .client
            .post(self.url.clone() + "/get_user_predictions")
            .json(&user)
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<Vec<PredictionRecord>>().await?)
    }
    pub async fn get_balance(&self, user: UserPubKey) -> Result<Tokens> {
        let response = self
            .client
            .post(self.url.clone() + "/get_balance")
            .json(&user)
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<Tokens>().await?)
    }
    pub async fn get_pool_balances(&self) -> Result<PoolBalancesResponse> {
        let response = self
            .client
            .get(self.url.clone() + "/get_pool_balances")
            .send()
            .await?;
        let response = bail_if_err(response, StatusCode::OK).await?;
        Ok(response.json::<PoolBalancesResponse>().await?)
    }
}
