//! Time-boxed capability cache with single-flight refresh

use super::CapabilitySnapshot;
use super::probe::CapabilityDetector;
use chrono::{DateTime, TimeDelta, Utc};
use mims_async_utils::SingleFlight;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Time source for snapshot freshness
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Slot {
    snapshot: Arc<CapabilitySnapshot>,
    stored_at: DateTime<Utc>,
}

struct CacheInner {
    detector: Arc<dyn CapabilityDetector>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    slot: RwLock<Option<Slot>>,
}

impl CacheInner {
    fn fresh(&self) -> Option<Arc<CapabilitySnapshot>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        let slot = slot.as_ref()?;
        let age = self.clock.now() - slot.stored_at;
        (age < self.ttl).then(|| Arc::clone(&slot.snapshot))
    }

    fn cached(&self) -> Option<Arc<CapabilitySnapshot>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| Arc::clone(&slot.snapshot))
    }

    fn store(&self, snapshot: CapabilitySnapshot) -> Arc<CapabilitySnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Slot {
            snapshot: Arc::clone(&snapshot),
            stored_at: self.clock.now(),
        });
        snapshot
    }

    fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Caches the latest capability snapshot for a fixed TTL.
///
/// Concurrent refreshes collapse into one probe and every waiter receives the
/// same snapshot. A snapshot describing a failed probe is cached like any
/// other, so an unreachable backend is not hammered on every request.
pub struct CapabilityCache {
    inner: Arc<CacheInner>,
    flight: SingleFlight<Arc<CapabilitySnapshot>>,
}

impl CapabilityCache {
    pub fn new(detector: Arc<dyn CapabilityDetector>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                detector,
                clock,
                ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
                slot: RwLock::new(None),
            }),
            flight: SingleFlight::new(),
        }
    }

    /// Last stored snapshot regardless of age. No I/O.
    pub fn get_cached(&self) -> Option<Arc<CapabilitySnapshot>> {
        self.inner.cached()
    }

    /// Stored snapshot if still inside the TTL. No I/O.
    pub fn get_fresh(&self) -> Option<Arc<CapabilitySnapshot>> {
        self.inner.fresh()
    }

    /// Fresh snapshot, probing only when the slot is empty or expired
    pub async fn get(&self) -> Arc<CapabilitySnapshot> {
        if let Some(snapshot) = self.inner.fresh() {
            return snapshot;
        }
        self.probe(false).await
    }

    /// Discard the stored snapshot and probe again
    pub async fn refresh(&self) -> Arc<CapabilitySnapshot> {
        self.inner.clear();
        self.probe(true).await
    }

    /// First probe. Equivalent to `get` but logged as startup detection.
    pub async fn initialize(&self) -> Arc<CapabilitySnapshot> {
        let snapshot = self.get().await;
        tracing::info!(
            mode = %snapshot.deployment_mode(),
            probe_error = snapshot.probe_error.as_deref().unwrap_or(""),
            "Capability cache initialized"
        );
        snapshot
    }

    pub fn invalidate(&self) {
        self.inner.clear();
        tracing::debug!("Capability cache invalidated");
    }

    pub fn ttl(&self) -> TimeDelta {
        self.inner.ttl
    }

    async fn probe(&self, forced: bool) -> Arc<CapabilitySnapshot> {
        let inner = Arc::clone(&self.inner);
        self.flight
            .run(move || async move {
                // A flight that finished just before this one started may
                // already have stored a usable snapshot.
                if !forced && let Some(snapshot) = inner.fresh() {
                    return snapshot;
                }
                tracing::debug!(forced, "Probing backend capabilities");
                let snapshot = inner.detector.detect().await;
                inner.store(snapshot)
            })
            .await
    }
}
