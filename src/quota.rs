//! Credit gating for run admission
//!
//! Every run costs one credit. Credits are tracked per conversation owner key
//! with a token bucket: a key can spend up to `points` credits at once, and
//! credits flow back at `points / window` per second.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  submit(run) ──► admit(key)                                      │
//! │                    │                                             │
//! │                    ├── credit available ──► consume 1, RUN       │
//! │                    │                                             │
//! │                    └── bucket empty ──► QuotaDenied(retry_after) │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Denial happens before a run exists, so it never produces a recorded
//! outcome. [`CreditLimiter`] keeps buckets in memory; [`FileCreditStore`]
//! keeps them in a JSON file so separate processes share one budget.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Returned when a key has no credits left
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Quota exceeded for {key}. Retry after {retry_after:?}")]
pub struct QuotaDenied {
    pub key: String,
    /// How long until one credit is available again
    pub retry_after: Duration,
}

/// Error type for quota admission
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error(transparent)]
    Exceeded(#[from] QuotaDenied),

    #[error("Quota store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Quota store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Admission check performed before a run starts
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn admit(&self, key: &str) -> Result<(), QuotaError>;
}

/// Gate that admits everything
pub struct Unmetered;

#[async_trait]
impl QuotaGate for Unmetered {
    async fn admit(&self, _key: &str) -> Result<(), QuotaError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Token bucket
// ═══════════════════════════════════════════════════════════════════════════
// EXAMPLE:
//   let limiter = CreditLimiter::new(5, Duration::from_secs(30 * 24 * 3600));
//   → 5 runs immediately, then one more every 6 days
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Bucket {
    /// Current credits (scaled by SCALE for fractional refills)
    tokens_scaled: u64,
    last_refill: DateTime<Utc>,
}

// We store credits * 1000 to handle fractional refills without floats
const SCALE: u64 = 1000;

#[derive(Debug, Clone, Copy)]
struct CreditPolicy {
    /// Maximum credits per key (burst capacity)
    capacity: u64,
    /// Credits added per second
    refill_rate: f64,
}

impl CreditPolicy {
    fn new(points: u64, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let refill_rate = if secs > 0.0 { points as f64 / secs } else { 0.0 };
        Self {
            capacity: points,
            refill_rate,
        }
    }

    fn max_scaled(&self) -> u64 {
        self.capacity.saturating_mul(SCALE)
    }

    fn full_bucket(&self, now: DateTime<Utc>) -> Bucket {
        Bucket {
            tokens_scaled: self.max_scaled(),
            last_refill: now,
        }
    }

    /// Refill, then take one credit or explain when one will be available
    fn take(&self, key: &str, bucket: &mut Bucket, now: DateTime<Utc>) -> Result<(), QuotaDenied> {
        self.refill(bucket, now);

        if bucket.tokens_scaled < SCALE {
            return Err(QuotaDenied {
                key: key.to_string(),
                retry_after: self.retry_after(bucket.tokens_scaled),
            });
        }

        bucket.tokens_scaled -= SCALE;
        Ok(())
    }

    // tokens_to_add = elapsed_seconds * refill_rate
    fn refill(&self, bucket: &mut Bucket, now: DateTime<Utc>) {
        // A clock that moved backwards adds nothing
        let elapsed = (now - bucket.last_refill).to_std().unwrap_or(Duration::ZERO);
        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate * SCALE as f64) as u64;

        if tokens_to_add > 0 {
            bucket.last_refill = now;
            bucket.tokens_scaled = std::cmp::min(bucket.tokens_scaled.saturating_add(tokens_to_add), self.max_scaled());
        }
    }

    fn retry_after(&self, tokens_scaled: u64) -> Duration {
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        let missing = (SCALE - tokens_scaled.min(SCALE)) as f64 / SCALE as f64;
        Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CreditLimiter (in memory, per process)
// ═══════════════════════════════════════════════════════════════════════════

pub struct CreditLimiter {
    policy: CreditPolicy,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl CreditLimiter {
    /// `points` credits per `window`, all available up front
    pub fn new(points: u64, window: Duration) -> Self {
        Self {
            policy: CreditPolicy::new(points, window),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Free tier defaults: 5 runs per 30 days
    pub fn with_defaults() -> Self {
        Self::new(5, Duration::from_secs(30 * 24 * 60 * 60))
    }

    /// Try to consume one credit for `key`
    pub fn try_consume(&self, key: &str) -> Result<(), QuotaDenied> {
        self.try_consume_at(key, Utc::now())
    }

    fn try_consume_at(&self, key: &str, now: DateTime<Utc>) -> Result<(), QuotaDenied> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| self.policy.full_bucket(now));
        self.policy.take(key, bucket, now)
    }

    /// Credits currently available for `key` (whole credits only)
    pub fn remaining(&self, key: &str) -> u64 {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        match buckets.get_mut(key) {
            Some(bucket) => {
                self.policy.refill(bucket, Utc::now());
                bucket.tokens_scaled / SCALE
            }
            None => self.policy.capacity,
        }
    }
}

#[async_trait]
impl QuotaGate for CreditLimiter {
    async fn admit(&self, key: &str) -> Result<(), QuotaError> {
        Ok(self.try_consume(key)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FileCreditStore (JSON file, shared across processes)
// ═══════════════════════════════════════════════════════════════════════════

/// Token buckets persisted to one JSON file
///
/// The file is re-read on every admission and replaced through a temp file,
/// so each CLI invocation sees the credits spent by earlier ones.
pub struct FileCreditStore {
    policy: CreditPolicy,
    path: PathBuf,
    guard: tokio::sync::Mutex<()>,
}

impl FileCreditStore {
    pub fn new(path: impl Into<PathBuf>, points: u64, window: Duration) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            policy: CreditPolicy::new(points, window),
            path,
            guard: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Bucket>, QuotaError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, buckets: &BTreeMap<String, Bucket>) -> Result<(), QuotaError> {
        let json = serde_json::to_string_pretty(buckets)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaGate for FileCreditStore {
    async fn admit(&self, key: &str) -> Result<(), QuotaError> {
        let _guard = self.guard.lock().await;
        let now = Utc::now();

        let mut buckets = self.load().await?;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| self.policy.full_bucket(now));
        self.policy.take(key, bucket, now)?;

        debug!(key, remaining = bucket.tokens_scaled / SCALE, "Credit consumed");
        self.save(&buckets).await
    }
}
