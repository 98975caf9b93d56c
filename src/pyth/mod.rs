mod client;
mod price_source;

pub use client::HermesClient;
pub use price_source::HermesPriceSource;
