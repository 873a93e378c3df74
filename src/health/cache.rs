use super::models::{HealthError, ProbeIdentity};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let by = Duration::from_std(by).unwrap_or(Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub healthy: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Slot {
    /// Bumped every time a verdict is stored
    generation: AtomicU64,
    entry: Mutex<Option<CacheEntry>>,
}

/// Time-bounded memoization of probe verdicts, one slot per [`ProbeIdentity`].
///
/// Each slot is guarded by its own async mutex which stays held for the whole
/// refresh, so concurrent callers on an expired slot wait for the single
/// in-flight probe and then reuse its verdict, even when a zero TTL has already
/// expired it. Slots never contend with each other.
pub struct ResultCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: [Slot; 4],
}

impl ResultCache {
    pub fn new(ttl_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);

        Self {
            ttl,
            clock,
            slots: Default::default(),
        }
    }

    pub fn with_system_clock(ttl_seconds: u64) -> Self {
        Self::new(ttl_seconds, Arc::new(SystemClock))
    }

    /// Returns the live verdict for `identity`, or runs `refresh` and stores
    /// its verdict until `now + ttl`.
    ///
    /// An error from `refresh` is returned as is and leaves the slot untouched.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        identity: ProbeIdentity,
        refresh: F,
    ) -> Result<bool, HealthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, HealthError>>,
    {
        let slot = &self.slots[identity.index()];
        let seen = slot.generation.load(Ordering::Acquire);
        let mut entry = slot.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            // stored while we waited for the lock: that was our in-flight probe
            let joined = slot.generation.load(Ordering::Acquire) != seen;
            if joined || cached.is_live(self.clock.now()) {
                return Ok(cached.healthy);
            }
        }

        tracing::debug!(
            cache_key = identity.cache_key(),
            "Probing {} health state - cache empty or expired",
            identity
        );

        let healthy = refresh().await?;
        let created_at = self.clock.now();
        *entry = Some(CacheEntry {
            healthy,
            created_at,
            expires_at: created_at
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        slot.generation.fetch_add(1, Ordering::Release);

        Ok(healthy)
    }

    /// Current entry for `identity`, expired or not.
    pub async fn entry(&self, identity: ProbeIdentity) -> Option<CacheEntry> {
        *self.slots[identity.index()].entry.lock().await
    }
}
