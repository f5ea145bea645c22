use crate::stream::Stream;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-wide table of active streams. Reads dominate writes; writers are
/// registry insertion at end of build, eviction, and shutdown clear. The
/// registry never touches the filesystem — evicted streams are handed back
/// so the service can delete their artifacts.
pub struct StreamRegistry {
    max_streams: usize,
    inner: RwLock<HashMap<String, Arc<Stream>>>,
}

impl StreamRegistry {
    pub fn new(max_streams: usize) -> Self {
        Self {
            max_streams: max_streams.max(1),
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Stream>>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Stream>>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a freshly built stream. When the table grows past the hard
    /// cap, the oldest streams by creation time are evicted and returned.
    pub fn insert(&self, stream: Arc<Stream>) -> Vec<Arc<Stream>> {
        let mut map = self.write_map();
        map.insert(stream.id.clone(), stream);

        let mut evicted = Vec::new();
        while map.len() > self.max_streams {
            let oldest = map
                .values()
                .min_by_key(|s| s.created_at)
                .map(|s| s.id.clone());
            match oldest {
                Some(id) => {
                    if let Some(stream) = map.remove(&id) {
                        evicted.push(stream);
                    }
                }
                None => break,
            }
        }
        evicted
    }

    pub fn get(&self, id: &str) -> Option<Arc<Stream>> {
        self.read_map().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Stream>> {
        self.write_map().remove(id)
    }

    /// Evict and return every stream created before `cutoff`.
    pub fn evict_created_before(&self, cutoff: DateTime<Utc>) -> Vec<Arc<Stream>> {
        let mut map = self.write_map();
        let stale: Vec<String> = map
            .values()
            .filter(|s| s.created_at < cutoff)
            .map(|s| s.id.clone())
            .collect();
        stale.into_iter().filter_map(|id| map.remove(&id)).collect()
    }

    pub fn clear(&self) -> Vec<Arc<Stream>> {
        self.write_map().drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read_map().keys().cloned().collect()
    }
}
