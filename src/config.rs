use crate::api::{AssetSymbol, FeedId, Tokens, UserPubKey};
use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use log::LevelFilter;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_CONFIG_FILE: &str = "truesight.toml";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedSetting {
    pub asset: AssetSymbol,
    pub feed_id: FeedId,
}
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GenesisBalance {
    pub user: String,
    pub amount: Tokens,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub port: u16,
    /// SQLite url, in-memory database if unset.
    pub db: Option<String>,
    /// Skips access checks.
    pub test: bool,
    pub log_level: String,
    pub min_holdout_sec: i64,
    pub max_price_staleness_sec: i64,
    /// Pyth Hermes endpoint. Without one prices only come from the test source.
    pub hermes_url: Option<String>,
    #[serde(default)]
    pub feeds: Vec<FeedSetting>,
    #[serde(default)]
    pub genesis_balances: Vec<GenesisBalance>,
}

impl Settings {
    /// Defaults, overridden by the config file (if it exists), overridden by `TRUESIGHT__*` variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path.unwrap_or(DEFAULT_CONFIG_FILE);
        let settings = Config::builder()
            .set_default("port", 8081)?
            .set_default("test", false)?
            .set_default("log_level", "debug")?
            .set_default("min_holdout_sec", 5)?
            .set_default("max_price_staleness_sec", 60)?
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("TRUESIGHT").separator("__"))
            .build()
            .with_context(|| format!("couldn't read configuration from {}", path))?;
        Ok(settings.try_deserialize()?)
    }
    pub fn feed_map(&self) -> HashMap<AssetSymbol, FeedId> {
        self.feeds
            .iter()
            .map(|feed| (feed.asset.clone(), feed.feed_id.clone()))
            .collect()
    }
    pub fn genesis(&self) -> Result<Vec<(UserPubKey, Tokens)>> {
        self.genesis_balances
            .iter()
            .map(|balance| {
                let user = UserPubKey::from_str(balance.user.as_str())
                    .with_context(|| format!("invalid genesis user {}", balance.user))?;
                Ok((user, balance.amount))
            })
            .collect()
    }
    pub fn log_level(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(self.log_level.as_str())
            .map_err(|_| anyhow!("invalid log level {}", self.log_level))
    }
}
