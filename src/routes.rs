use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::cache::{CacheError, CacheRead, CacheSlot, SlotStatus};
use crate::config::{Config, ServerConfig};
use crate::fetcher::Fetcher;
use crate::market::MarketClient;
use crate::models::{Article, CryptoPrice, Dominance, DominanceSource, FearGreed};
use crate::parser::{self, PayloadShape};
use crate::registry::SourceRegistry;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 12;

pub struct AppState {
    pub aggregator: Aggregator,
    pub market: MarketClient,
    pub news: CacheSlot<Vec<Article>>,
    pub prices: CacheSlot<Vec<CryptoPrice>>,
    pub dominance: CacheSlot<Dominance>,
    pub fear_greed: CacheSlot<FearGreed>,
    pub environment: String,
}

impl AppState {
    pub fn new(config: Config, environment: impl Into<String>) -> anyhow::Result<Self> {
        let registry = Arc::new(SourceRegistry::from_config(&config.feeds));
        let fetcher = Fetcher::new(&config.fetch, config.feed_proxy.clone())?;
        let aggregator = Aggregator::new(fetcher, registry, &config.fetch);
        let market = MarketClient::new(config.market.clone())?;

        let news_ttl = config.cache.news_ttl();
        let market_ttl = config.cache.market_ttl();

        Ok(Self {
            aggregator,
            market,
            news: CacheSlot::new("news", news_ttl),
            prices: CacheSlot::new("prices", market_ttl),
            dominance: CacheSlot::new("dominance", market_ttl),
            fear_greed: CacheSlot::new("fear & greed", market_ttl),
            environment: environment.into(),
        })
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.aggregator.registry()
    }

    /// One aggregation pass over the priority subset or every source
    async fn load_news(&self, fast: bool) -> anyhow::Result<Vec<Article>> {
        let sources = if fast {
            self.registry().priority()
        } else {
            self.registry().all()
        };
        info!(
            "Fetching fresh news from {} sources (fast: {})",
            sources.len(),
            fast
        );

        let report = self.aggregator.aggregate(&sources).await;
        Ok(report.into_articles()?)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/news", get(news))
        .route("/api/news/fast", get(news_fast))
        .route("/api/rss/:feed_index", get(rss_feed))
        .route("/api/crypto-prices", get(crypto_prices))
        .route("/api/bitcoin-dominance", get(bitcoin_dominance))
        .route("/api/fear-greed", get(fear_greed))
        .route("/api/cache-status", get(cache_status))
        .route("/health", get(health))
        .with_state(state)
}

/// Production pins the configured origin and allows credentials; anywhere
/// else the request origin is echoed back.
pub fn cors_layer(server: &ServerConfig) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if server.is_production() {
        let origin = HeaderValue::from_str(&server.cors_origin)?;
        Ok(layer.allow_origin(origin).allow_credentials(true))
    } else {
        Ok(layer.allow_origin(AllowOrigin::mirror_request()))
    }
}

// Error type
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        error!("{}", err);
        let message = match &err {
            CacheError::Unavailable { slot, .. } => format!("Failed to fetch {} data", slot),
        };
        AppError::internal(message)
    }
}

/// Cache fields shared by every data response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the served value was generated, epoch ms
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<u64>,
}

impl<T> From<&CacheRead<T>> for CacheMeta {
    fn from(read: &CacheRead<T>) -> Self {
        CacheMeta {
            cached: read.cached,
            stale: read.stale.then_some(true),
            error: read.error.clone(),
            timestamp: read.generated_at.timestamp_millis(),
            // a fresh refresh or a failed one reports no age
            cache_age: (read.cached && read.error.is_none()).then(|| millis(read.age)),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// Pagination
#[derive(Debug, Default, Deserialize)]
pub struct NewsQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub fast: Option<String>,
}

fn positive_or(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

impl NewsQuery {
    pub fn page(&self) -> usize {
        positive_or(self.page.as_deref(), DEFAULT_PAGE)
    }

    pub fn limit(&self) -> usize {
        positive_or(self.limit.as_deref(), DEFAULT_LIMIT)
    }

    pub fn is_fast(&self) -> bool {
        self.fast.as_deref() == Some("true")
    }
}

/// Slice of `items` for a 1-based page. Pages past the end are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, limit: usize) -> Vec<T> {
    let offset = page.saturating_sub(1).saturating_mul(limit);
    items.iter().skip(offset).take(limit).cloned().collect()
}

pub fn total_pages(total: usize, limit: usize) -> usize {
    total.div_ceil(limit.max(1))
}

// Response bodies
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsPage {
    pub articles: Vec<Article>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    #[serde(flatten)]
    pub meta: CacheMeta,
}

#[derive(Debug, Serialize)]
pub struct FastNews {
    pub articles: Vec<Article>,
    pub total: usize,
    #[serde(flatten)]
    pub meta: CacheMeta,
}

#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub prices: Vec<CryptoPrice>,
    #[serde(flatten)]
    pub meta: CacheMeta,
}

#[derive(Debug, Serialize)]
pub struct DominanceResponse {
    pub dominance: f64,
    pub source: DominanceSource,
    #[serde(flatten)]
    pub meta: CacheMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FearGreedResponse {
    pub fear_greed: FearGreed,
    #[serde(flatten)]
    pub meta: CacheMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDiagnostic {
    pub feed_index: usize,
    pub url: String,
    pub source_name: String,
    pub shape: &'static str,
    pub title: Option<String>,
    pub article_count: usize,
    pub articles: Vec<Article>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReport {
    pub has_data: bool,
    pub is_refreshing: bool,
    pub last_update: Option<i64>,
    pub cache_age: Option<u64>,
    pub cache_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DominanceSource>,
}

impl From<SlotStatus> for SlotReport {
    fn from(status: SlotStatus) -> Self {
        SlotReport {
            has_data: status.has_data,
            is_refreshing: status.is_refreshing,
            last_update: status.last_update.map(|t| t.timestamp_millis()),
            cache_age: status.age.map(millis),
            cache_duration: millis(status.ttl),
            article_count: None,
            source: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub news: SlotReport,
    pub prices: SlotReport,
    pub dominance: SlotReport,
    pub fear_greed: SlotReport,
}

// Route handlers
pub async fn news(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewsQuery>,
) -> Result<Json<NewsPage>, AppError> {
    let fast = query.is_fast();
    let read = state.news.read(|| state.load_news(fast)).await?;

    let (page, limit) = (query.page(), query.limit());
    let total = read.value.len();

    Ok(Json(NewsPage {
        articles: paginate(&read.value, page, limit),
        total,
        page,
        limit,
        total_pages: total_pages(total, limit),
        meta: CacheMeta::from(&read),
    }))
}

pub async fn news_fast(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewsQuery>,
) -> Result<Json<FastNews>, AppError> {
    let read = state.news.read(|| state.load_news(true)).await?;

    Ok(Json(FastNews {
        articles: paginate(&read.value, DEFAULT_PAGE, query.limit()),
        total: read.value.len(),
        meta: CacheMeta::from(&read),
    }))
}

/// Fetch and parse one feed directly, bypassing the cache
pub async fn rss_feed(
    State(state): State<Arc<AppState>>,
    Path(feed_index): Path<String>,
) -> Result<Json<FeedDiagnostic>, AppError> {
    let index = feed_index
        .parse::<usize>()
        .map_err(|_| AppError::bad_request("Invalid feed index"))?;
    let source = state
        .registry()
        .get(index)
        .ok_or_else(|| AppError::bad_request("Invalid feed index"))?;

    let payload = state
        .aggregator
        .fetcher()
        .fetch_feed(&source.url)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    let parsed = parser::try_parse(&payload, index, state.registry())
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(Json(FeedDiagnostic {
        feed_index: index,
        url: source.url.clone(),
        source_name: source.name.clone(),
        shape: match parsed.shape {
            PayloadShape::Xml => "xml",
            PayloadShape::Json => "json",
        },
        title: parsed.title,
        article_count: parsed.articles.len(),
        articles: parsed.articles,
    }))
}

pub async fn crypto_prices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PricesResponse>, AppError> {
    let read = state
        .prices
        .read(|| async { Ok(state.market.fetch_prices().await?) })
        .await?;

    Ok(Json(PricesResponse {
        prices: read.value.to_vec(),
        meta: CacheMeta::from(&read),
    }))
}

pub async fn bitcoin_dominance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DominanceResponse>, AppError> {
    let read = state
        .dominance
        .read(|| async { Ok(state.market.fetch_dominance().await) })
        .await?;

    Ok(Json(DominanceResponse {
        dominance: read.value.value,
        source: read.value.source,
        meta: CacheMeta::from(&read),
    }))
}

pub async fn fear_greed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FearGreedResponse>, AppError> {
    let read = state
        .fear_greed
        .read(|| async { Ok(state.market.fetch_fear_greed().await?) })
        .await?;

    Ok(Json(FearGreedResponse {
        fear_greed: FearGreed::clone(&read.value),
        meta: CacheMeta::from(&read),
    }))
}

pub async fn cache_status(State(state): State<Arc<AppState>>) -> Json<CacheStatus> {
    let mut news = SlotReport::from(state.news.status().await);
    news.article_count = Some(state.news.peek().await.map_or(0, |a| a.len()));

    let mut dominance = SlotReport::from(state.dominance.status().await);
    dominance.source = state.dominance.peek().await.map(|d| d.source);

    Json(CacheStatus {
        news,
        prices: state.prices.status().await.into(),
        dominance,
        fear_greed: state.fear_greed.status().await.into(),
    })
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "environment": state.environment,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
