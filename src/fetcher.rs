use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{FeedProxyConfig, FetchConfig};

/// Why a single feed request produced nothing.
///
/// These are values handed back to the aggregator, never propagated past it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Unparsed response body plus its declared content type
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl RawPayload {
    pub fn new(body: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.map(|s| s.to_string()),
        }
    }
}

pub struct Fetcher {
    client: Client,
    timeout: Duration,
    proxy: Option<FeedProxyConfig>,
}

impl Fetcher {
    pub fn new(config: &FetchConfig, proxy: Option<FeedProxyConfig>) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(&config.user_agent).build()?;

        Ok(Self {
            client,
            timeout: config.timeout(),
            proxy,
        })
    }

    /// Fetch a feed with the configured timeout, through the JSON proxy if one is set.
    pub async fn fetch_feed(&self, feed_url: &str) -> Result<RawPayload, FetchError> {
        match &self.proxy {
            Some(proxy) => self.fetch_via_proxy(proxy, feed_url).await,
            None => self.fetch(feed_url, self.timeout).await,
        }
    }

    /// One GET, no retry. The timeout covers the whole exchange and drops the
    /// connection when it fires.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<RawPayload, FetchError> {
        debug!("Fetching {}", url);
        let request = self.client.get(url).timeout(timeout);
        self.execute(url, request).await
    }

    async fn fetch_via_proxy(
        &self,
        proxy: &FeedProxyConfig,
        feed_url: &str,
    ) -> Result<RawPayload, FetchError> {
        debug!("Fetching {} via {}", feed_url, proxy.url);
        let count = proxy.count.to_string();
        let request = self
            .client
            .get(&proxy.url)
            .query(&[
                ("rss_url", feed_url),
                ("api_key", proxy.api_key.as_str()),
                ("count", count.as_str()),
            ])
            .timeout(self.timeout);
        self.execute(feed_url, request).await
    }

    async fn execute(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<RawPayload, FetchError> {
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    source: e,
                }
            }
        })?;

        info!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(RawPayload {
            body: bytes.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PayloadShape;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(proxy: Option<FeedProxyConfig>) -> Fetcher {
        let config = FetchConfig {
            timeout_ms: 200,
            ..FetchConfig::default()
        };
        Fetcher::new(&config, proxy).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_keeps_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<rss></rss>", "application/rss+xml"),
            )
            .mount(&server)
            .await;

        let payload = fetcher(None)
            .fetch_feed(&format!("{}/rss", server.uri()))
            .await
            .unwrap();

        assert_eq!(payload.body, b"<rss></rss>");
        assert_eq!(payload.content_type.as_deref(), Some("application/rss+xml"));
    }

    #[tokio::test]
    async fn test_json_content_type_decides_shape() {
        let server = MockServer::start().await;
        // a JSON string body has no leading brace to sniff
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(r#""moved""#, "application/json"))
            .mount(&server)
            .await;

        let payload = fetcher(None)
            .fetch_feed(&format!("{}/feed", server.uri()))
            .await
            .unwrap();

        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
        assert_eq!(PayloadShape::detect(&payload), PayloadShape::Json);
        assert_eq!(
            PayloadShape::detect(&RawPayload::new(payload.body.clone(), None)),
            PayloadShape::Xml
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(None)
            .fetch_feed(&format!("{}/rss", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_slow_feed_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss></rss>")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = fetcher(None)
            .fetch_feed(&format!("{}/rss", server.uri()))
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "expected timeout, got {err}");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // port 9 (discard) is almost never listening
        let err = fetcher(None)
            .fetch_feed("http://127.0.0.1:9/rss")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Network { .. } | FetchError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_proxy_request_carries_feed_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/api.json"))
            .and(query_param("rss_url", "https://decrypt.co/feed"))
            .and(query_param("api_key", "k"))
            .and(query_param("count", "15"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"status":"ok","items":[]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let proxy = FeedProxyConfig {
            url: format!("{}/v1/api.json", server.uri()),
            api_key: "k".to_string(),
            count: 15,
        };

        let payload = fetcher(Some(proxy))
            .fetch_feed("https://decrypt.co/feed")
            .await
            .unwrap();

        assert!(payload.body.starts_with(b"{"));
    }
}
