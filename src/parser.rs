use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use feed_rs::model::Entry;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::categorize::categorize;
use crate::fetcher::RawPayload;
use crate::models::{Article, ArticleSource};
use crate::registry::{SourceInfo, SourceRegistry};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").expect("entity pattern is valid")
});

static IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("img pattern is valid")
});

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid feed XML: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),

    #[error("invalid feed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feed conversion service reported an error: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Xml,
    Json,
}

impl PayloadShape {
    pub fn detect(payload: &RawPayload) -> Self {
        if payload
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json"))
        {
            return PayloadShape::Json;
        }

        match payload.body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') | Some(b'[') => PayloadShape::Json,
            _ => PayloadShape::Xml,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub shape: PayloadShape,
    pub title: Option<String>,
    pub articles: Vec<Article>,
}

/// Item list as produced by feed-to-JSON conversion services
#[derive(Debug, Deserialize)]
struct JsonItem {
    title: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    link: Option<String>,
    thumbnail: Option<String>,
    description: Option<String>,
    content: Option<String>,
}

/// Parse a feed into articles. Malformed payloads yield an empty list.
pub fn parse(payload: &RawPayload, source_index: usize, registry: &SourceRegistry) -> Vec<Article> {
    match try_parse(payload, source_index, registry) {
        Ok(parsed) => {
            debug!(
                "Parsed {} items from feed {}",
                parsed.articles.len(),
                source_index
            );
            parsed.articles
        }
        Err(e) => {
            warn!("Error processing feed {}: {}", source_index, e);
            Vec::new()
        }
    }
}

pub fn try_parse(
    payload: &RawPayload,
    source_index: usize,
    registry: &SourceRegistry,
) -> Result<ParsedFeed, ParseError> {
    let source = registry.lookup(source_index);
    match PayloadShape::detect(payload) {
        PayloadShape::Xml => parse_xml(&payload.body, source_index, &source),
        PayloadShape::Json => parse_json(&payload.body, source_index, &source),
    }
}

fn parse_xml(
    body: &[u8],
    source_index: usize,
    source: &SourceInfo<'_>,
) -> Result<ParsedFeed, ParseError> {
    let feed = feed_rs::parser::parse(body)?;

    let articles = feed
        .entries
        .iter()
        .enumerate()
        .map(|(item_index, entry)| xml_entry_to_article(entry, source_index, item_index, source))
        .collect();

    Ok(ParsedFeed {
        shape: PayloadShape::Xml,
        title: feed.title.map(|t| t.content),
        articles,
    })
}

fn xml_entry_to_article(
    entry: &Entry,
    source_index: usize,
    item_index: usize,
    source: &SourceInfo<'_>,
) -> Article {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.as_str())
        .unwrap_or_default();

    let description = entry
        .summary
        .as_ref()
        .map(|s| s.content.as_str())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()))
        .unwrap_or_default();

    let url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let image_url = media_thumbnail(entry)
        .or_else(|| extract_image_from_html(description))
        .unwrap_or_else(|| source.image.to_string());

    let published_at = entry
        .published
        .or(entry.updated)
        .unwrap_or_else(Utc::now);

    Article {
        id: format!("rss-{}-{}", source_index, item_index),
        title: clean_text(title),
        description: clean_text(description),
        url,
        image_url,
        published_at,
        source: ArticleSource {
            name: source.name.to_string(),
        },
        category: categorize(title, description),
    }
}

/// Explicit thumbnail: media:thumbnail, then image media:content
fn media_thumbnail(entry: &Entry) -> Option<String> {
    let thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .find(|uri| !uri.is_empty());

    thumbnail.or_else(|| {
        entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .filter(|c| {
                let by_type = c
                    .content_type
                    .as_ref()
                    .is_some_and(|ct| ct.ty().as_str() == "image");
                let by_extension = c.url.as_ref().is_some_and(|u| {
                    let path = u.path().to_lowercase();
                    [".jpg", ".jpeg", ".png", ".webp", ".gif"]
                        .iter()
                        .any(|ext| path.ends_with(ext))
                });
                by_type || by_extension
            })
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
    })
}

fn parse_json(
    body: &[u8],
    source_index: usize,
    source: &SourceInfo<'_>,
) -> Result<ParsedFeed, ParseError> {
    let value: Value = serde_json::from_slice(body)?;

    let (title, items) = match value {
        Value::Array(items) => (None, Value::Array(items)),
        Value::Object(mut map) => {
            if map.get("status").and_then(Value::as_str) == Some("error") {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(ParseError::Upstream(message));
            }
            let title = map
                .get("feed")
                .and_then(|f| f.get("title"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            (title, map.remove("items").unwrap_or(Value::Array(Vec::new())))
        }
        _ => (None, Value::Array(Vec::new())),
    };

    let items: Vec<JsonItem> = serde_json::from_value(items)?;

    let articles = items
        .iter()
        .enumerate()
        .map(|(item_index, item)| json_item_to_article(item, source_index, item_index, source))
        .collect();

    Ok(ParsedFeed {
        shape: PayloadShape::Json,
        title,
        articles,
    })
}

fn json_item_to_article(
    item: &JsonItem,
    source_index: usize,
    item_index: usize,
    source: &SourceInfo<'_>,
) -> Article {
    let title = item.title.as_deref().unwrap_or_default();
    let description = item
        .description
        .as_deref()
        .or(item.content.as_deref())
        .unwrap_or_default();

    let image_url = item
        .thumbnail
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(|t| t.to_string())
        .or_else(|| extract_image_from_html(description))
        .unwrap_or_else(|| source.image.to_string());

    let published_at = item
        .pub_date
        .as_deref()
        .and_then(parse_date)
        .unwrap_or_else(Utc::now);

    Article {
        id: format!("rss-json-{}-{}", source_index, item_index),
        title: clean_text(title),
        description: clean_text(description),
        url: item.link.clone().unwrap_or_default(),
        image_url,
        published_at,
        source: ArticleSource {
            name: source.name.to_string(),
        },
        category: categorize(title, description),
    }
}

/// Strip markup tags and entity references, then trim.
pub fn clean_text(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, "");
    ENTITY_RE.replace_all(&without_tags, "").trim().to_string()
}

/// First `<img src="...">` in an HTML fragment
pub fn extract_image_from_html(html: &str) -> Option<String> {
    IMG_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// RFC 3339, RFC 2822, or `YYYY-MM-DD HH:MM:SS` taken as UTC
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
