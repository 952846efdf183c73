//! Process-wide store of compiled artifacts, keyed by (code identity, level).
//! Failed compilations are cached too and never retried at the same level.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::artifact::{CompiledArtifact, compile};
use super::error::CompileError;
use super::options::OptLevel;
use crate::code::{CodeId, CodeUnit};

pub const DEFAULT_CAPACITY: usize = 4096;

type CacheKey = (CodeId, OptLevel);
type Slot = Arc<OnceLock<Result<Arc<CompiledArtifact>, CompileError>>>;

static GLOBAL: Lazy<Arc<ArtifactCache>> = Lazy::new(|| Arc::new(ArtifactCache::new(DEFAULT_CAPACITY)));

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Compiled,
}

pub struct ArtifactCache {
    capacity: usize,
    entries: DashMap<CacheKey, Slot>,
    /// Insertion order for FIFO eviction.
    order: Mutex<VecDeque<CacheKey>>,
}

impl ArtifactCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// The cache shared by every VM created with [`crate::vm::Vm::new`].
    pub fn global() -> Arc<ArtifactCache> {
        GLOBAL.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A finished compilation for the key, successful or not.
    pub fn get(&self, id: CodeId, level: OptLevel) -> Option<Result<Arc<CompiledArtifact>, CompileError>> {
        let slot = self.entries.get(&(id, level))?.value().clone();
        slot.get().cloned()
    }

    pub fn contains(&self, id: CodeId, level: OptLevel) -> bool {
        self.entries.contains_key(&(id, level))
    }

    /// Returns the artifact for `code` at `level`, compiling it on first use.
    pub fn get_or_compile(
        self: &Arc<Self>,
        code: &CodeUnit,
        level: OptLevel,
    ) -> (Result<Arc<CompiledArtifact>, CompileError>, Lookup) {
        let key = (code.id(), level);
        let slot = self.slot(key);
        let mut lookup = Lookup::Hit;
        let result = slot.get_or_init(|| {
            lookup = Lookup::Compiled;
            code.register_cache(self);
            compile(code, level).map(Arc::new)
        });
        (result.clone(), lookup)
    }

    fn slot(&self, key: CacheKey) -> Slot {
        if let Some(existing) = self.entries.get(&key) {
            return existing.value().clone();
        }
        let mut inserted = false;
        let slot = self
            .entries
            .entry(key)
            .or_insert_with(|| {
                inserted = true;
                Arc::new(OnceLock::new())
            })
            .value()
            .clone();
        if inserted {
            self.record_insert(key);
        }
        slot
    }

    fn record_insert(&self, key: CacheKey) {
        let mut order = match self.order.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        order.push_back(key);
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.entries.remove(&evicted);
                tracing::trace!(code = %evicted.0, level = %evicted.1, "evicted artifact");
            }
        }
    }

    /// Drops every artifact compiled from the unit `id`.
    pub fn invalidate(&self, id: CodeId) {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.0 != id);
        if self.entries.len() != before {
            let mut order = match self.order.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            order.retain(|key| key.0 != id);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        let mut order = match self.order.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        order.clear();
    }
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .finish()
    }
}
