use std::collections::HashMap;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MarketConfig;
use crate::models::{CryptoPrice, Dominance, DominanceSource, FearGreed};

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("market request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("response from {endpoint} is missing {field}")]
    MissingField {
        endpoint: String,
        field: &'static str,
    },

    #[error("dominance {0} is outside 0-100")]
    OutOfRange(f64),
}

#[derive(Debug, Deserialize)]
struct CoinMarket {
    id: String,
    symbol: String,
    name: String,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    #[serde(default)]
    image: String,
}

impl From<CoinMarket> for CryptoPrice {
    fn from(coin: CoinMarket) -> Self {
        CryptoPrice {
            id: coin.id,
            symbol: coin.symbol.to_uppercase(),
            name: coin.name,
            current_price: coin.current_price,
            price_change_percentage_24h: coin.price_change_percentage_24h,
            market_cap: coin.market_cap,
            total_volume: coin.total_volume,
            image: coin.image,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoinGeckoGlobal {
    data: Option<CoinGeckoGlobalData>,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoGlobalData {
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketCapGlobal {
    data: Option<CoinMarketCapGlobalData>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketCapGlobalData {
    bitcoin_dominance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    #[serde(default)]
    data: Vec<FearGreedEntry>,
}

#[derive(Debug, Deserialize)]
struct FearGreedEntry {
    value: String,
    value_classification: String,
    #[serde(default)]
    timestamp: String,
}

/// Client for the three market-data upstreams
pub struct MarketClient {
    client: Client,
    config: MarketConfig,
}

impl MarketClient {
    pub fn new(config: MarketConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    pub async fn fetch_prices(&self) -> Result<Vec<CryptoPrice>, MarketError> {
        let endpoint = format!("{}/coins/markets", self.config.coingecko_url);
        let ids = self.config.coin_ids.join(",");

        info!("Fetching prices for {}", ids);
        let request = self.client.get(&endpoint).query(&[
            ("vs_currency", "usd"),
            ("ids", ids.as_str()),
            ("per_page", "10"),
            ("page", "1"),
            ("sparkline", "false"),
        ]);
        let coins: Vec<CoinMarket> = self.get_json(&endpoint, request).await?;

        let prices: Vec<CryptoPrice> = coins.into_iter().map(CryptoPrice::from).collect();
        info!("Fetched prices for {} coins", prices.len());
        Ok(prices)
    }

    /// Bitcoin dominance from the first source that answers. Never fails: when
    /// both upstreams are down the configured placeholder is returned, tagged
    /// as such.
    pub async fn fetch_dominance(&self) -> Dominance {
        match self.dominance_from_coingecko().await {
            Ok(value) => {
                info!("Bitcoin dominance from CoinGecko: {:.2}%", value);
                return Dominance {
                    value,
                    source: DominanceSource::CoinGecko,
                };
            }
            Err(e) => warn!("CoinGecko dominance failed, trying CoinMarketCap: {}", e),
        }

        match self.dominance_from_coinmarketcap().await {
            Ok(value) => {
                info!("Bitcoin dominance from CoinMarketCap: {:.2}%", value);
                Dominance {
                    value,
                    source: DominanceSource::CoinMarketCap,
                }
            }
            Err(e) => {
                warn!(
                    "All dominance sources failed ({}), using default {:.2}%",
                    e, self.config.fallback_dominance
                );
                Dominance {
                    value: self.config.fallback_dominance,
                    source: DominanceSource::Default,
                }
            }
        }
    }

    pub async fn dominance_from_coingecko(&self) -> Result<f64, MarketError> {
        let endpoint = format!("{}/global", self.config.coingecko_url);
        let request = self.client.get(&endpoint);
        let global: CoinGeckoGlobal = self.get_json(&endpoint, request).await?;

        let value = global
            .data
            .and_then(|d| d.market_cap_percentage.get("btc").copied())
            .ok_or(MarketError::MissingField {
                endpoint,
                field: "data.market_cap_percentage.btc",
            })?;
        check_percentage(value)
    }

    pub async fn dominance_from_coinmarketcap(&self) -> Result<f64, MarketError> {
        let endpoint = format!("{}/global/", self.config.coinmarketcap_url);
        let request = self
            .client
            .get(&endpoint)
            .header("X-CMC_PRO_API_KEY", &self.config.coinmarketcap_api_key);
        let global: CoinMarketCapGlobal = self.get_json(&endpoint, request).await?;

        let value = global
            .data
            .and_then(|d| d.bitcoin_dominance)
            .ok_or(MarketError::MissingField {
                endpoint,
                field: "data.bitcoin_dominance",
            })?;
        check_percentage(value)
    }

    pub async fn fetch_fear_greed(&self) -> Result<FearGreed, MarketError> {
        let endpoint = self.config.fear_greed_url.clone();
        let request = self.client.get(&endpoint);
        let response: FearGreedResponse = self.get_json(&endpoint, request).await?;

        let entry = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::MissingField {
                endpoint: endpoint.clone(),
                field: "data[0]",
            })?;

        let value = entry
            .value
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|v| *v <= 100)
            .ok_or_else(|| MarketError::Decode {
                endpoint,
                message: format!("fear & greed value {:?} is not 0-100", entry.value),
            })?;

        info!(
            "Fear & Greed index: {} ({})",
            value, entry.value_classification
        );
        Ok(FearGreed {
            value,
            classification: entry.value_classification,
            timestamp: entry.timestamp,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, MarketError> {
        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;

        serde_json::from_slice(&body).map_err(|e| MarketError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

fn check_percentage(value: f64) -> Result<f64, MarketError> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(MarketError::OutOfRange(value))
    }
}
