//! TTL cache slots with single-flight refresh.
//!
//! Each slot holds one value. A read serves the value while it is fresh,
//! serves it marked stale while another caller is refreshing, and otherwise
//! refreshes inline. The refresh lock is held for the whole refresh and is
//! released on every exit path, including the caller's future being dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no {slot} data available: {message}")]
    Unavailable { slot: &'static str, message: String },
}

struct Entry<T> {
    value: Arc<T>,
    generated_at: DateTime<Utc>,
    stored_at: Instant,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            generated_at: self.generated_at,
            stored_at: self.stored_at,
        }
    }
}

impl<T> Entry<T> {
    fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// What a read produced and how it was produced
#[derive(Debug)]
pub struct CacheRead<T> {
    pub value: Arc<T>,
    /// Served from the slot rather than from a refresh this request ran
    pub cached: bool,
    /// Older than the TTL
    pub stale: bool,
    /// Refresh failure that forced a stale serve
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub age: Duration,
}

impl<T> CacheRead<T> {
    fn from_entry(entry: Entry<T>, stale: bool, error: Option<String>) -> Self {
        let age = entry.age();
        Self {
            value: entry.value,
            cached: true,
            stale,
            error,
            generated_at: entry.generated_at,
            age,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotStatus {
    pub has_data: bool,
    pub is_refreshing: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub age: Option<Duration>,
    pub ttl: Duration,
}

pub struct CacheSlot<T> {
    name: &'static str,
    ttl: Duration,
    entry: RwLock<Option<Entry<T>>>,
    refresh_lock: Mutex<()>,
}

impl<T> CacheSlot<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_lock.try_lock().is_err()
    }

    /// Current value, fresh or not
    pub async fn peek(&self) -> Option<Arc<T>> {
        self.entry.read().await.as_ref().map(|e| Arc::clone(&e.value))
    }

    pub async fn status(&self) -> SlotStatus {
        let entry = self.snapshot().await;
        SlotStatus {
            has_data: entry.is_some(),
            is_refreshing: self.is_refreshing(),
            last_update: entry.as_ref().map(|e| e.generated_at),
            age: entry.as_ref().map(|e| e.age()),
            ttl: self.ttl,
        }
    }

    /// Serve according to the slot's state, running `refresh` only when the
    /// value is missing or expired and nobody else is refreshing it.
    pub async fn read<F, Fut>(&self, refresh: F) -> Result<CacheRead<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let snapshot = self.snapshot().await;
        if let Some(entry) = &snapshot {
            if entry.age() < self.ttl {
                debug!("Serving cached {} data", self.name);
                return Ok(CacheRead::from_entry(entry.clone(), false, None));
            }
        }

        let guard = match self.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => match snapshot {
                Some(entry) => {
                    info!("{} refresh in progress, serving stale data", self.name);
                    return Ok(CacheRead::from_entry(entry, true, None));
                }
                // nothing to serve yet: wait for the in-flight refresh
                None => self.refresh_lock.lock().await,
            },
        };

        // another caller may have finished a refresh while we were deciding
        if let Some(entry) = self.snapshot().await {
            if entry.age() < self.ttl {
                return Ok(CacheRead::from_entry(entry, false, None));
            }
        }

        self.refresh_locked(guard, refresh).await
    }

    /// Refresh now, waiting for any in-flight refresh to finish first.
    pub async fn refresh<F, Fut>(&self, refresh: F) -> Result<CacheRead<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let guard = self.refresh_lock.lock().await;
        self.refresh_locked(guard, refresh).await
    }

    async fn refresh_locked<F, Fut>(
        &self,
        guard: MutexGuard<'_, ()>,
        refresh: F,
    ) -> Result<CacheRead<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        info!("Refreshing {} data", self.name);

        match refresh().await {
            Ok(value) => {
                let entry = Entry {
                    value: Arc::new(value),
                    generated_at: Utc::now(),
                    stored_at: Instant::now(),
                };
                *self.entry.write().await = Some(entry.clone());
                drop(guard);

                info!("Refreshed {} data", self.name);
                Ok(CacheRead {
                    value: entry.value,
                    cached: false,
                    stale: false,
                    error: None,
                    generated_at: entry.generated_at,
                    age: Duration::ZERO,
                })
            }
            Err(e) => {
                drop(guard);
                let message = format!("{:#}", e);
                match self.snapshot().await {
                    Some(entry) => {
                        warn!(
                            "Refreshing {} failed, serving stale data: {}",
                            self.name, message
                        );
                        Ok(CacheRead::from_entry(entry, true, Some(message)))
                    }
                    None => {
                        warn!("Refreshing {} failed with nothing cached: {}", self.name, message);
                        Err(CacheError::Unavailable {
                            slot: self.name,
                            message,
                        })
                    }
                }
            }
        }
    }

    async fn snapshot(&self) -> Option<Entry<T>> {
        self.entry.read().await.clone()
    }
}
