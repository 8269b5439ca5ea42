//! TTL-bound, write-through cache of resolved images.
//!
//! The cache holds one snapshot: a nested map
//! `product -> region -> version -> variant -> record` plus a single expiry
//! timestamp. The TTL governs the whole snapshot; once it has passed the
//! snapshot is discarded as a unit and rebuilt from the lookup service.
//!
//! Slots are first-write-wins: a populated `(product, region, version,
//! variant)` slot is never overwritten, so a later malformed parse cannot
//! clobber a good record. Version sub-keys are canonical `major.minor.patch`
//! strings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use amisync_common::config::CacheSettings;
use amisync_common::error::Result;
use amisync_common::store::JsonStore;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactRecord, Variant};
use crate::version;

/// `variant -> record`
pub type VariantSlots = BTreeMap<String, ArtifactRecord>;
/// `version -> variant -> record`
pub type VersionSlots = BTreeMap<String, VariantSlots>;
/// `region -> version -> variant -> record`
pub type RegionSlots = BTreeMap<String, VersionSlots>;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Persisted form of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Absolute expiry of the whole snapshot, in epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds", alias = "ttl")]
    pub expires_at: DateTime<Utc>,
    /// `product -> region -> version -> variant -> record`
    #[serde(default)]
    pub content: BTreeMap<String, RegionSlots>,
}

impl CacheSnapshot {
    /// An empty snapshot expiring at `expires_at`.
    #[must_use]
    pub const fn empty(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at,
            content: BTreeMap::new(),
        }
    }

    /// An empty snapshot that is already expired.
    #[must_use]
    pub const fn expired() -> Self {
        Self::empty(DateTime::UNIX_EPOCH)
    }

    /// Whether the snapshot is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    fn slot(
        &self,
        product: &str,
        region: &str,
        version: &str,
        variant: Variant,
    ) -> Option<&ArtifactRecord> {
        self.content
            .get(product)?
            .get(region)?
            .get(version)?
            .get(variant.as_str())
    }

    // First record that could not have been produced by a parse.
    fn first_unusable(&self) -> Option<(&str, &str, &str, &str)> {
        self.content.iter().find_map(|(product, regions)| {
            regions.iter().find_map(|(region, versions)| {
                versions.iter().find_map(|(version, variants)| {
                    variants
                        .iter()
                        .find(|(_, record)| !is_usable(record))
                        .map(|(variant, _)| {
                            (product.as_str(), region.as_str(), version.as_str(), variant.as_str())
                        })
                })
            })
        })
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.content
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct CacheState {
    // Set once the persisted snapshot has been consulted.
    loaded: bool,
    snapshot: Option<CacheSnapshot>,
    // Bumped each time a snapshot is encoded for persistence.
    generation: u64,
}

/// Two-tier image cache: an in-memory snapshot, optionally backed by a
/// persisted one.
///
/// Constructed once per run and shared by reference. The in-memory snapshot
/// is guarded by a mutex so concurrent resolutions can back-fill it.
#[derive(Debug)]
pub struct ImageCache {
    store: Arc<dyn JsonStore>,
    path: PathBuf,
    persist: bool,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    // Generation of the last snapshot written to the store.
    written: Mutex<u64>,
}

impl ImageCache {
    /// Creates a cache persisting through `store` as configured by `settings`.
    #[must_use]
    pub fn new(store: Arc<dyn JsonStore>, settings: &CacheSettings) -> Self {
        Self {
            store,
            path: settings.path.clone(),
            persist: settings.enabled,
            ttl: settings.ttl,
            clock: Arc::new(SystemClock),
            state: Mutex::new(CacheState::default()),
            written: Mutex::new(0),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether snapshots are persisted to the store.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.persist
    }

    /// Location of the persisted snapshot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the persisted snapshot into memory.
    ///
    /// Returns `None`, and clears the in-memory snapshot, when the persisted
    /// one is absent, unreadable, malformed, holds an invalid record, or is
    /// expired. Does nothing when persistence is disabled.
    pub fn load(&self) -> Option<CacheSnapshot> {
        if !self.persist {
            tracing::debug!("image cache persistence disabled, not loading");
            return None;
        }
        let snapshot = self.read_persisted();
        let mut state = self.lock();
        state.loaded = true;
        state.snapshot.clone_from(&snapshot);
        snapshot
    }

    fn read_persisted(&self) -> Option<CacheSnapshot> {
        let document = match self.store.read(&self.path) {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "no persisted image cache");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "image cache unreadable, ignoring it"
                );
                return None;
            }
        };
        let snapshot: CacheSnapshot = match serde_json::from_value(document) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "image cache malformed, ignoring it"
                );
                return None;
            }
        };
        if let Some((product, region, version, variant)) = snapshot.first_unusable() {
            tracing::warn!(
                path = %self.path.display(),
                product,
                region,
                version,
                variant,
                "image cache holds an invalid record, ignoring it"
            );
            return None;
        }
        if snapshot.is_expired_at(self.clock.now()) {
            tracing::debug!(
                path = %self.path.display(),
                expires_at = %snapshot.expires_at,
                "image cache expired"
            );
            return None;
        }
        tracing::debug!(
            path = %self.path.display(),
            records = snapshot.len(),
            "image cache loaded"
        );
        Some(snapshot)
    }

    fn ensure_loaded(&self, state: &mut CacheState) {
        if !state.loaded {
            state.loaded = true;
            if self.persist {
                state.snapshot = self.read_persisted();
            }
        }
    }

    /// Looks up the record for `(product, region, version, variant)`.
    ///
    /// The persisted snapshot is consulted on the first call of a run.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::InvalidVersion` if `version` cannot be coerced.
    pub fn get(
        &self,
        product: &str,
        region: &str,
        version: &str,
        variant: Variant,
    ) -> Result<Option<ArtifactRecord>> {
        let key = version::canonical(version)?;
        let mut state = self.lock();
        self.ensure_loaded(&mut state);
        Ok(state
            .snapshot
            .as_ref()
            .and_then(|s| s.slot(product, region, &key, variant))
            .filter(|record| is_usable(record))
            .cloned())
    }

    /// Inserts `record` into its slot unless the slot is already populated.
    ///
    /// When persistence is enabled the expiry is pushed to `now + ttl` and the
    /// whole snapshot is written to the store. A failed write is logged and
    /// does not fail the insertion.
    ///
    /// Returns whether the record was inserted. Malformed records and records
    /// whose version cannot be coerced are never inserted.
    pub fn put(&self, product: &str, region: &str, record: ArtifactRecord) -> bool {
        let (Some(variant), Some(raw_version), Some(_)) =
            (record.variant, record.version.as_deref(), record.raw.as_ref())
        else {
            tracing::debug!(product, region, "not caching malformed image record");
            return false;
        };
        let key = match version::canonical(raw_version) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(product, region, error = %e, "not caching image record");
                return false;
            }
        };

        let now = self.clock.now();
        let expiry = expiry_after(now, self.ttl);
        let mut state = self.lock();
        self.ensure_loaded(&mut state);
        let snapshot = state
            .snapshot
            .get_or_insert_with(|| CacheSnapshot::empty(expiry));

        let slots = snapshot
            .content
            .entry(product.to_owned())
            .or_default()
            .entry(region.to_owned())
            .or_default()
            .entry(key)
            .or_default();
        let inserted = if slots.contains_key(variant.as_str()) {
            false
        } else {
            let _ = slots.insert(variant.as_str().to_owned(), record);
            true
        };

        if !self.persist {
            return inserted;
        }
        snapshot.expires_at = expiry;
        let encoded = serde_json::to_value(&*snapshot);
        state.generation += 1;
        let generation = state.generation;
        drop(state);

        match encoded {
            Ok(document) => self.persist_snapshot(generation, &document),
            Err(e) => tracing::warn!(error = %e, "failed to encode image cache"),
        }
        inserted
    }

    // Writes `document` unless a newer snapshot has already been written.
    fn persist_snapshot(&self, generation: u64, document: &serde_json::Value) {
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *written >= generation {
            return;
        }
        match self.store.write(&self.path, document) {
            Ok(()) => *written = generation,
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to persist image cache"
            ),
        }
    }

    /// Writes an empty, already-expired snapshot to the store and drops the
    /// in-memory one, forcing repopulation from the lookup service.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn reset(&self) -> Result<()> {
        let document = serde_json::to_value(CacheSnapshot::expired())?;
        self.store.write(&self.path, &document)?;
        let mut state = self.lock();
        state.loaded = true;
        state.snapshot = None;
        tracing::info!(path = %self.path.display(), "image cache reset");
        Ok(())
    }

    /// Time left before the snapshot expires; zero when persistence is
    /// disabled or nothing is cached.
    pub fn remaining_ttl(&self) -> Duration {
        if !self.persist {
            return Duration::ZERO;
        }
        let state = self.lock();
        state
            .snapshot
            .as_ref()
            .and_then(|s| (s.expires_at - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

fn is_usable(record: &ArtifactRecord) -> bool {
    !record.is_malformed() && record.raw.is_some()
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
