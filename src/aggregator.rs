use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tracing::{error, info};

use crate::config::FetchConfig;
use crate::fetcher::{FetchError, Fetcher};
use crate::models::Article;
use crate::parser;
use crate::registry::{Source, SourceRegistry};

/// Result of one feed's fetch+parse
#[derive(Debug)]
pub struct FeedOutcome {
    pub index: usize,
    pub result: Result<Vec<Article>, FetchError>,
}

impl FeedOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("all {attempted} feeds failed")]
    AllFeedsFailed { attempted: usize },
}

/// One aggregation pass: merged, sorted and truncated articles plus tallies
#[derive(Debug, Default)]
pub struct AggregateReport {
    pub articles: Vec<Article>,
    pub succeeded: usize,
    pub failed: usize,
}

impl AggregateReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    /// The pass counts as a failed refresh only when feeds were attempted
    /// and none of them answered.
    pub fn into_articles(self) -> Result<Vec<Article>, NewsError> {
        if self.attempted() > 0 && self.succeeded == 0 {
            return Err(NewsError::AllFeedsFailed {
                attempted: self.attempted(),
            });
        }
        Ok(self.articles)
    }
}

pub struct Aggregator {
    fetcher: Fetcher,
    registry: Arc<SourceRegistry>,
    max_concurrent: usize,
    batch_pause: Duration,
    max_articles: usize,
}

impl Aggregator {
    pub fn new(fetcher: Fetcher, registry: Arc<SourceRegistry>, config: &FetchConfig) -> Self {
        Self {
            fetcher,
            registry,
            max_concurrent: config.concurrency(),
            batch_pause: config.batch_pause(),
            max_articles: config.max_articles,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch and parse every source, then merge newest-first.
    ///
    /// Sources beyond `max_concurrent` are processed in sequential batches with
    /// a short pause between them. A failing source only contributes nothing.
    pub async fn aggregate(&self, sources: &[&Source]) -> AggregateReport {
        info!("Starting feed fetch for {} feeds", sources.len());

        let mut report = AggregateReport::default();
        let batches: Vec<&[&Source]> = sources.chunks(self.max_concurrent).collect();
        let batch_count = batches.len();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            if batch_count > 1 {
                info!(
                    "Processing batch {}/{} ({} feeds)",
                    batch_index + 1,
                    batch_count,
                    batch.len()
                );
            }

            let outcomes = join_all(batch.iter().map(|source| self.fetch_source(source))).await;

            for outcome in outcomes {
                match outcome.result {
                    Ok(articles) => {
                        info!(
                            "Processed {} articles from feed {}",
                            articles.len(),
                            outcome.index
                        );
                        report.succeeded += 1;
                        report.articles.extend(articles);
                    }
                    Err(_) => report.failed += 1,
                }
            }

            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        info!(
            "Feed summary: {} successful, {} failed, {} total articles",
            report.succeeded,
            report.failed,
            report.articles.len()
        );

        sort_and_truncate(&mut report.articles, self.max_articles);
        report
    }

    /// Fetch and parse a single source. Errors are returned as values.
    pub async fn fetch_source(&self, source: &Source) -> FeedOutcome {
        info!("Fetching feed {}: {}", source.index, source.url);

        let result = match self.fetcher.fetch_feed(&source.url).await {
            Ok(payload) => Ok(parser::parse(&payload, source.index, &self.registry)),
            Err(e) => {
                error!("Failed to fetch feed {}: {}", source.index, e);
                Err(e)
            }
        };

        FeedOutcome {
            index: source.index,
            result,
        }
    }
}

/// Newest first; ties keep their input order.
pub fn sort_and_truncate(articles: &mut Vec<Article>, max: usize) {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles.truncate(max);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::models::{ArticleSource, Category};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss_with_items(count: usize, base_hour: u32) -> String {
        let items: String = (0..count)
            .map(|i| {
                let published = Utc.with_ymd_and_hms(2024, 12, 9, base_hour, i as u32, 0).unwrap();
                format!(
                    "<item><title>Story {i}</title><link>https://news.example.com/{base_hour}/{i}</link>\
                     <pubDate>{}</pubDate></item>",
                    published.to_rfc2822()
                )
            })
            .collect();

        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
               <link>https://news.example.com</link><description>d</description>{items}</channel></rss>"#
        )
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String, delay: Option<Duration>) {
        let mut response = ResponseTemplate::new(200)
            .set_body_raw(body, "application/rss+xml");
        if let Some(delay) = delay {
            response = response.set_delay(delay);
        }
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn aggregator(server: &MockServer, routes: &[&str], config: FetchConfig) -> Aggregator {
        let feeds: Vec<FeedConfig> = routes
            .iter()
            .enumerate()
            .map(|(i, route)| FeedConfig {
                name: format!("Feed {}", i),
                url: format!("{}{}", server.uri(), route),
                priority: i == 0,
                image: None,
            })
            .collect();
        let registry = Arc::new(SourceRegistry::from_config(&feeds));
        let fetcher = Fetcher::new(&config, None).unwrap();
        Aggregator::new(fetcher, registry, &config)
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            timeout_ms: 300,
            batch_pause_ms: 1,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_timed_out_source_contributes_nothing() {
        let server = MockServer::start().await;
        mount_feed(&server, "/one", rss_with_items(5, 8), None).await;
        mount_feed(
            &server,
            "/two",
            rss_with_items(4, 9),
            Some(Duration::from_secs(3)),
        )
        .await;
        mount_feed(&server, "/three", rss_with_items(7, 10), None).await;

        let aggregator = aggregator(&server, &["/one", "/two", "/three"], fast_config());
        let sources = aggregator.registry().all();
        let report = aggregator.aggregate(&sources).await;

        assert_eq!(report.articles.len(), 12);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(report.articles.iter().all(|a| !a.id.starts_with("rss-1-")));
        assert!(report
            .articles
            .windows(2)
            .all(|w| w[0].published_at >= w[1].published_at));
        // newest feed (hour 10) comes first
        assert!(report.articles[0].id.starts_with("rss-2-"));
    }

    #[tokio::test]
    async fn test_batches_cover_every_source() {
        let server = MockServer::start().await;
        let routes = ["/a", "/b", "/c", "/d", "/e"];
        for (i, route) in routes.iter().enumerate() {
            mount_feed(&server, route, rss_with_items(2, i as u32), None).await;
        }

        let config = FetchConfig {
            max_concurrent: 2,
            ..fast_config()
        };
        let aggregator = aggregator(&server, &routes, config);
        let sources = aggregator.registry().all();
        let report = aggregator.aggregate(&sources).await;

        assert_eq!(report.succeeded, 5);
        assert_eq!(report.articles.len(), 10);
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_truncates_to_max_articles() {
        let server = MockServer::start().await;
        mount_feed(&server, "/big", rss_with_items(30, 5), None).await;

        let config = FetchConfig {
            max_articles: 10,
            ..fast_config()
        };
        let aggregator = aggregator(&server, &["/big"], config);
        let sources = aggregator.registry().all();
        let report = aggregator.aggregate(&sources).await;

        assert_eq!(report.articles.len(), 10);
        // the 10 newest survive: minutes 29 down to 20
        assert_eq!(report.articles[0].id, "rss-0-29");
        assert_eq!(report.articles[9].id, "rss-0-20");
    }

    #[tokio::test]
    async fn test_every_source_failing_still_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let aggregator = aggregator(&server, &["/x", "/y"], fast_config());
        let sources = aggregator.registry().all();
        let report = aggregator.aggregate(&sources).await;

        assert!(report.articles.is_empty());
        assert_eq!(report.failed, 2);
        assert!(matches!(
            report.into_articles(),
            Err(NewsError::AllFeedsFailed { attempted: 2 })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_feed_counts_as_success_with_no_articles() {
        let server = MockServer::start().await;
        mount_feed(&server, "/junk", "not xml at all".to_string(), None).await;

        let aggregator = aggregator(&server, &["/junk"], fast_config());
        let outcome = aggregator.fetch_source(aggregator.registry().get(0).unwrap()).await;

        assert!(outcome.is_success());
        assert!(outcome.result.unwrap().is_empty());
    }

    #[test]
    fn test_empty_pass_is_not_a_failure() {
        let report = AggregateReport::default();
        assert!(report.into_articles().unwrap().is_empty());
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let article = |id: &str, published_at| Article {
            id: id.to_string(),
            title: String::new(),
            description: String::new(),
            url: String::new(),
            image_url: String::new(),
            published_at,
            source: ArticleSource {
                name: "x".to_string(),
            },
            category: Category::General,
        };

        let mut articles = vec![
            article("a", at),
            article("b", at + ChronoDuration::hours(1)),
            article("c", at),
        ];
        sort_and_truncate(&mut articles, 200);

        let ids: Vec<&str> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
