//! Ordered list of configured news feeds.
//!
//! A feed's position in the list is its index: the index is baked into
//! article ids and is the only key used to look up a feed's display name
//! and fallback image.

use crate::config::FeedConfig;

/// Display name for indices with no configured feed
pub const FALLBACK_SOURCE_NAME: &str = "Crypto News";

/// Generic images handed out by index when a feed has none configured
pub const DEFAULT_IMAGES: &[&str] = &[
    "https://images.unsplash.com/photo-1518186285589-2f7649de83e0?w=400",
    "https://images.unsplash.com/photo-1639762681485-074b7f938ba0?w=400",
    "https://images.unsplash.com/photo-1551288049-bebda4e38f71?w=400",
    "https://images.unsplash.com/photo-1620321023374-d1a68fbc720d?w=400",
    "https://images.unsplash.com/photo-1554224155-6726b3ff858f?w=400",
    "https://images.unsplash.com/photo-1558618666-fcd25c85cd64?w=400",
    "https://images.unsplash.com/photo-1518709268805-4e9042af2176?w=400",
    "https://images.unsplash.com/photo-1551288049-bebda4e38f71?w=400",
    "https://images.unsplash.com/photo-1639762681485-074b7f938ba0?w=400",
];

pub fn default_image(index: usize) -> &'static str {
    DEFAULT_IMAGES[index % DEFAULT_IMAGES.len()]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub index: usize,
    pub name: String,
    pub url: String,
    pub image: String,
    pub priority: bool,
}

/// Metadata resolved for an index, present or not
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo<'a> {
    pub name: &'a str,
    pub image: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn from_config(feeds: &[FeedConfig]) -> Self {
        let sources = feeds
            .iter()
            .enumerate()
            .map(|(index, feed)| Source {
                index,
                name: feed.name.clone(),
                url: feed.url.clone(),
                image: feed
                    .image
                    .clone()
                    .unwrap_or_else(|| default_image(index).to_string()),
                priority: feed.priority,
            })
            .collect();

        Self { sources }
    }

    pub fn get(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    pub fn all(&self) -> Vec<&Source> {
        self.sources.iter().collect()
    }

    /// The low-latency subset, in registry order
    pub fn priority(&self) -> Vec<&Source> {
        self.sources.iter().filter(|s| s.priority).collect()
    }

    /// Never fails: unknown indices get the generic name and a rotating image.
    pub fn lookup(&self, index: usize) -> SourceInfo<'_> {
        match self.sources.get(index) {
            Some(source) => SourceInfo {
                name: &source.name,
                image: &source.image,
            },
            None => SourceInfo {
                name: FALLBACK_SOURCE_NAME,
                image: default_image(index),
            },
        }
    }
}
