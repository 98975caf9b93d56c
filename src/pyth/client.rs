use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use log::trace;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::api::FeedId;
use crate::oracle::PriceReading;

/// Client for the Pyth Hermes price service.
#[derive(Debug, Clone)]
pub struct HermesClient {
    client: Client,
    pub url: String,
}

impl HermesClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { client, url }
    }
    pub async fn latest_price(&self, feed: &FeedId) -> Result<PriceReading> {
        let response = self
            .client
            .get(self.url.clone() + "/v2/updates/price/latest")
            .query(&[("ids[]", feed.as_str()), ("parsed", "true")])
            .send()
            .await
            .with_context(|| format!("couldn't reach Hermes at {}", self.url))?;
        let response = crate::api::bail_if_err(response, StatusCode::OK).await?;
        let json = response.json::<LatestPriceResponse>().await?;
        trace!("Hermes answered {:?}", json);
        json.into_reading()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestPriceResponse {
    parsed: Vec<ParsedPriceUpdate>,
}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParsedPriceUpdate {
    id: String,
    price: HermesPrice,
}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HermesPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}
impl LatestPriceResponse {
    fn into_reading(self) -> Result<PriceReading> {
        let update = self
            .parsed
            .into_iter()
            .next()
            .ok_or(anyhow!("Hermes returned no parsed price"))?;
        let price = update
            .price
            .price
            .parse::<i64>()
            .with_context(|| format!("invalid price {:?}", update.price.price))?;
        let confidence = update
            .price
            .conf
            .parse::<u64>()
            .with_context(|| format!("invalid confidence {:?}", update.price.conf))?;
        let published_at = Utc
            .timestamp_opt(update.price.publish_time, 0)
            .single()
            .ok_or(anyhow!("invalid publish time {}", update.price.publish_time))?;
        Ok(PriceReading {
            feed_id: update.id,
            price,
            exponent: update.price.expo,
            confidence,
            published_at,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use axum::{routing::get, Router};

    const BODY: &str = r#"{
        "binary": {"encoding": "hex", "data": []},
        "parsed": [{
            "id": "16dad506d7db8da01c87581c87ca897a012a153557d4d578c3b9c9e1bc0632f1",
            "price": {"price": "17412345", "conf": "10350", "expo": -5, "publish_time": 1700000000},
            "ema_price": {"price": "17400000", "conf": "11000", "expo": -5, "publish_time": 1700000000},
            "metadata": {"slot": 1, "proof_available_time": 1700000001, "prev_publish_time": 1699999999}
        }]
    }"#;

    #[test]
    fn parses_latest_price() {
        let json: LatestPriceResponse = serde_json::from_str(BODY).unwrap();
        let reading = json.into_reading().unwrap();
        assert_eq!(reading.price, 17412345);
        assert_eq!(reading.exponent, -5);
        assert_eq!(reading.confidence, 10350);
        assert_eq!(reading.published_at.timestamp(), 1700000000);
        assert_eq!(
            reading.feed_id,
            "16dad506d7db8da01c87581c87ca897a012a153557d4d578c3b9c9e1bc0632f1"
        );
    }
    #[test]
    fn refuses_empty_and_malformed_updates() {
        let json: LatestPriceResponse = serde_json::from_str(r#"{"parsed": []}"#).unwrap();
        assert!(json.into_reading().is_err());
        let body = BODY.replace("\"17412345\"", "\"not a number\"");
        let json: LatestPriceResponse = serde_json::from_str(&body).unwrap();
        assert!(json.into_reading().is_err());
    }
    #[tokio::test]
    async fn fetches_from_hermes() {
        let app = Router::new().route("/v2/updates/price/latest", get(|| async { BODY }));
        let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(app.into_make_service());
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(server);

        let client = HermesClient::new(url);
        let reading = client
            .latest_price(&"0x16dad506d7db8da01c87581c87ca897a012a153557d4d578c3b9c9e1bc0632f1".to_string())
            .await
            .unwrap();
        assert_eq!(reading.price, 17412345);
    }
    #[tokio::test]
    async fn reports_http_errors() {
        let app = Router::new().route(
            "/v2/updates/price/latest",
            get(|| async { (StatusCode::NOT_FOUND, "Price ids not found") }),
        );
        let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(app.into_make_service());
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(server);

        let client = HermesClient::new(url);
        let error = client.latest_price(&"0xbeef".to_string()).await.unwrap_err();
        assert!(format!("{:#}", error).contains("Price ids not found"));
    }
}
