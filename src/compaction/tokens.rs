//! Token accounting with a bounded, TTL-checked LRU cache.
//!
//! Measurement prefers an injected [`PreciseCounter`]; when it is absent, errors, or
//! exceeds the configured timeout, the counter falls back to the local cl100k
//! tokenizer and scales the result by [`ESTIMATE_ADJUSTMENT`].

use super::measure::PreciseCounter;
use crate::store::SessionArtifacts;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::{debug, warn};

/// Factor applied to raw offline estimates.
pub const ESTIMATE_ADJUSTMENT: f64 = 0.92;

/// Confidence reported for offline estimates.
pub const ESTIMATE_PRECISION: f64 = 0.88;

/// Characters per token when the tokenizer itself is unavailable.
const CHARS_PER_TOKEN: usize = 4;

static ENCODER: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!(error = %e, "cl100k tokenizer unavailable, using character heuristic");
        None
    }
});

/// Where a measurement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementSource {
    Measured,
    Estimated,
    Cached,
}

impl std::fmt::Display for MeasurementSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementSource::Measured => write!(f, "measured"),
            MeasurementSource::Estimated => write!(f, "estimated"),
            MeasurementSource::Cached => write!(f, "cached"),
        }
    }
}

/// Token count of a text blob plus how much to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMeasurement {
    pub count: usize,
    pub source: MeasurementSource,
    pub precision: f64,
    pub measured_at: DateTime<Utc>,
    pub from_cache: bool,
}

/// Cache sizing for a [`TokenCounter`].
#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub capacity: usize,
    pub ttl: Duration,
    /// Upper bound on a single precise measurement before falling back.
    pub precise_timeout: std::time::Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::hours(1),
            precise_timeout: std::time::Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    count: usize,
    inserted_at: DateTime<Utc>,
}

/// Memoizing token counter owned by one caller.
pub struct TokenCounter {
    cache: LruCache<String, CacheEntry>,
    ttl: Duration,
    precise_timeout: std::time::Duration,
    precise: Option<Arc<dyn PreciseCounter>>,
    hits: u64,
    misses: u64,
}

impl TokenCounter {
    pub fn new(config: CounterConfig, precise: Option<Arc<dyn PreciseCounter>>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            ttl: config.ttl,
            precise_timeout: config.precise_timeout,
            precise,
            hits: 0,
            misses: 0,
        }
    }

    /// A counter with default sizing and no precise collaborator.
    pub fn offline() -> Self {
        Self::new(CounterConfig::default(), None)
    }

    pub async fn measure(&mut self, text: &str) -> TokenMeasurement {
        self.measure_at(text, Utc::now()).await
    }

    /// Measure `text`, treating `now` as the current time for cache expiry.
    pub async fn measure_at(&mut self, text: &str, now: DateTime<Utc>) -> TokenMeasurement {
        let key = content_hash(text);

        if let Some(hit) = self.lookup(&key, now) {
            self.hits += 1;
            return hit;
        }
        self.misses += 1;

        let measurement = match self.precise_count(text).await {
            Some(count) => TokenMeasurement {
                count,
                source: MeasurementSource::Measured,
                precision: 1.0,
                measured_at: now,
                from_cache: false,
            },
            None => TokenMeasurement {
                count: estimate_tokens(text),
                source: MeasurementSource::Estimated,
                precision: ESTIMATE_PRECISION,
                measured_at: now,
                from_cache: false,
            },
        };

        self.cache.put(
            key,
            CacheEntry {
                count: measurement.count,
                inserted_at: now,
            },
        );
        measurement
    }

    fn lookup(&mut self, key: &str, now: DateTime<Utc>) -> Option<TokenMeasurement> {
        let entry = *self.cache.get(key)?;
        if now - entry.inserted_at > self.ttl {
            self.cache.pop(key);
            debug!(key = &key[..12], "token cache entry expired");
            return None;
        }

        Some(TokenMeasurement {
            count: entry.count,
            source: MeasurementSource::Cached,
            precision: 1.0,
            measured_at: now,
            from_cache: true,
        })
    }

    async fn precise_count(&self, text: &str) -> Option<usize> {
        // Zero is exact; no need to ask the service.
        if text.is_empty() {
            return Some(0);
        }

        let precise = self.precise.as_ref()?;
        match tokio::time::timeout(self.precise_timeout, precise.count_tokens(text)).await {
            Ok(Ok(count)) => Some(count),
            Ok(Err(e)) => {
                debug!(error = %e, "precise token count failed, estimating");
                None
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.precise_timeout.as_millis() as u64,
                    "precise token count timed out, estimating"
                );
                None
            }
        }
    }

    /// Session total: the sum of per-artifact counts, so artifact labels and joins never
    /// count toward the budget.
    pub async fn measure_artifacts(&mut self, session: &SessionArtifacts) -> usize {
        let mut total = 0;
        for artifact in &session.artifacts {
            total += self.measure(&artifact.text).await.count;
        }
        total
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn has_precise(&self) -> bool {
        self.precise.is_some()
    }
}

/// Hex SHA-256 of the text, used as the cache key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Raw token count from the local tokenizer, before adjustment.
pub fn raw_token_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(CHARS_PER_TOKEN),
    }
}

/// Offline estimate with the adjustment factor applied.
pub fn estimate_tokens(text: &str) -> usize {
    (raw_token_count(text) as f64 * ESTIMATE_ADJUSTMENT).round() as usize
}
