use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content category, derived from article text on every parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bitcoin,
    Ethereum,
    Defi,
    Nft,
    Regulation,
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSource {
    pub name: String,
}

/// A normalized news item.
///
/// `id` is unique within one aggregation pass only. It is positional
/// (source index + item index), so the same story can carry a different id
/// after the next refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    #[serde(rename = "urlToImage")]
    pub image_url: String,
    pub published_at: DateTime<Utc>,
    pub source: ArticleSource,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoPrice {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreed {
    pub value: u8,
    pub classification: String,
    pub timestamp: String,
}

/// Where a dominance reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DominanceSource {
    CoinGecko,
    CoinMarketCap,
    /// Configured placeholder, not a measurement
    Default,
}

impl DominanceSource {
    pub fn is_measured(&self) -> bool {
        !matches!(self, DominanceSource::Default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dominance {
    /// Bitcoin share of total market cap, 0-100
    pub value: f64,
    pub source: DominanceSource,
}
