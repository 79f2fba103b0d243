use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use kls_core::{Location, Position};
use url::Url;

use crate::queries::{CompletionItem, Hover};

/// Default per-operation cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Cache key: reads require an exact match, so any position or version drift
/// is a miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub uri: Url,
    pub line: u32,
    pub character: u32,
    pub file_version: i32,
}

impl CacheKey {
    pub fn new(uri: Url, position: Position, file_version: i32) -> Self {
        Self {
            uri,
            line: position.line,
            character: position.character,
            file_version,
        }
    }
}

struct CacheInner<T> {
    map: HashMap<CacheKey, T>,
    order: VecDeque<CacheKey>,
}

/// One LRU response cache for a single LSP operation kind.
pub struct LspResponseCache<T> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<CacheInner<T>>,
}

impl<T: Clone> LspResponseCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let mut inner = self.lock();
        let value = inner.map.get(key)?.clone();
        // Mark most-recent.
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.clone());
        Some(value)
    }

    pub fn put(&self, key: CacheKey, value: T) {
        let mut inner = self.lock();
        if inner.map.insert(key.clone(), value).is_none() {
            inner.order.push_back(key.clone());
        } else if let Some(pos) = inner.order.iter().position(|k| *k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key);
        }

        while inner.map.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&oldest);
        }
    }

    pub fn invalidate_file(&self, uri: &Url) {
        let mut inner = self.lock();
        inner.map.retain(|key, _| key.uri != *uri);
        inner.order.retain(|key| key.uri != *uri);
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target = "kls.cache", cache = self.name, "cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// The four per-operation caches.
///
/// Definition/hover/completion entries are file-scoped and evicted per URI;
/// reference results span files, so any edit clears that cache entirely.
pub struct LspCacheManager {
    pub definition: LspResponseCache<Vec<Location>>,
    pub hover: LspResponseCache<Option<Hover>>,
    pub completion: LspResponseCache<Vec<CompletionItem>>,
    pub references: LspResponseCache<Vec<Location>>,
}

impl LspCacheManager {
    pub fn new() -> Self {
        Self {
            definition: LspResponseCache::new("definition"),
            hover: LspResponseCache::new("hover"),
            completion: LspResponseCache::new("completion"),
            references: LspResponseCache::new("references"),
        }
    }

    pub fn invalidate_file(&self, uri: &Url) {
        self.definition.invalidate_file(uri);
        self.hover.invalidate_file(uri);
        self.completion.invalidate_file(uri);
        self.references.clear();
    }

    pub fn clear_all(&self) {
        self.definition.clear();
        self.hover.clear();
        self.completion.clear();
        self.references.clear();
    }
}

impl Default for LspCacheManager {
    fn default() -> Self {
        Self::new()
    }
}
