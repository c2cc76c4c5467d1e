//! Crypto Pulse - a crypto news and market data aggregator
//!
//! This crate fetches articles from many RSS sources and a handful of market
//! data APIs, caches each result with a single-flight TTL cache and serves
//! everything as JSON for a dashboard.

pub mod aggregator;
pub mod cache;
pub mod categorize;
pub mod config;
pub mod fetcher;
pub mod market;
pub mod models;
pub mod parser;
pub mod registry;
pub mod routes;
