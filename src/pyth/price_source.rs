use crate::{
    api::FeedId,
    oracle::{PriceReading, PriceSource},
};
use anyhow::Result;

use super::client::HermesClient;

pub struct HermesPriceSource {
    client: HermesClient,
}
impl HermesPriceSource {
    pub fn new(url: String) -> Self {
        Self {
            client: HermesClient::new(url),
        }
    }
}
#[async_trait::async_trait]
impl PriceSource for HermesPriceSource {
    async fn read_price(&self, feed: &FeedId) -> Result<PriceReading> {
        self.client.latest_price(feed).await
    }
}
