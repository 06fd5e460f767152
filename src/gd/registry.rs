//! Stream id to stream set map.
//!
//! Lookups share a read lock; creation takes the write lock and looks again,
//! so two messages for the same new id cannot build two sets. No lock here is
//! held while stream logic runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::StreamId;

use super::stream::Stream;
use super::stream_set::StreamSet;

struct Sets<S> {
    by_id: HashMap<StreamId, Arc<StreamSet<S>>>,
    /// Placeholder built before any real id is known.
    shell: Option<Arc<StreamSet<S>>>,
}

pub struct StreamSetRegistry<S> {
    sets: RwLock<Sets<S>>,
}

impl<S: Stream> Default for StreamSetRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stream> StreamSetRegistry<S> {
    pub fn new() -> Self {
        Self {
            sets: RwLock::new(Sets {
                by_id: HashMap::new(),
                shell: None,
            }),
        }
    }

    /// A registry whose first created set reuses a placeholder keyed by the
    /// nil id, so wiring done against the placeholder survives.
    pub fn with_shell() -> Self {
        Self {
            sets: RwLock::new(Sets {
                by_id: HashMap::new(),
                shell: Some(Arc::new(StreamSet::new(StreamId::nil()))),
            }),
        }
    }

    /// The placeholder, while it has not been claimed by a real id.
    pub fn shell(&self) -> Option<Arc<StreamSet<S>>> {
        self.sets.read().shell.clone()
    }

    pub fn get(&self, stream_id: StreamId) -> Option<Arc<StreamSet<S>>> {
        self.sets.read().by_id.get(&stream_id).cloned()
    }

    pub fn get_or_create(&self, stream_id: StreamId) -> Arc<StreamSet<S>> {
        if let Some(set) = self.get(stream_id) {
            return set;
        }
        let mut sets = self.sets.write();
        if let Some(set) = sets.by_id.get(&stream_id) {
            return set.clone();
        }
        let set = match sets.shell.take() {
            Some(shell) => {
                shell.rekey(stream_id);
                tracing::debug!(stream_id = %stream_id, "shell stream set claimed");
                shell
            }
            None => {
                tracing::debug!(stream_id = %stream_id, "stream set created");
                Arc::new(StreamSet::new(stream_id))
            }
        };
        sets.by_id.insert(stream_id, set.clone());
        set
    }

    pub fn get_or_maybe_create(&self, stream_id: StreamId, create: bool) -> Option<Arc<StreamSet<S>>> {
        if create {
            Some(self.get_or_create(stream_id))
        } else {
            self.get(stream_id)
        }
    }

    /// Install a set rebuilt elsewhere, replacing any set under its id.
    pub fn insert(&self, set: Arc<StreamSet<S>>) {
        self.sets.write().by_id.insert(set.stream_id(), set);
    }

    pub fn remove(&self, stream_id: StreamId) -> Option<Arc<StreamSet<S>>> {
        self.sets.write().by_id.remove(&stream_id)
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.sets.read().by_id.contains_key(&stream_id)
    }

    /// Snapshot, ordered by id.
    pub fn sets(&self) -> Vec<Arc<StreamSet<S>>> {
        let mut sets: Vec<_> = self.sets.read().by_id.values().cloned().collect();
        sets.sort_by_key(|s| s.stream_id());
        sets
    }

    pub fn len(&self) -> usize {
        self.sets.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use crate::gd::source::SourceStream;

    #[test]
    fn concurrent_creation_yields_one_set() {
        let registry: Arc<StreamSetRegistry<SourceStream>> = Arc::new(StreamSetRegistry::new());
        let id = StreamId::random();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create(id))
            })
            .collect();
        let sets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn shell_is_rekeyed_in_place() {
        let registry: StreamSetRegistry<SourceStream> = StreamSetRegistry::with_shell();
        let shell = registry.shell().unwrap();
        assert!(shell.stream_id().is_nil());
        assert!(registry.is_empty());

        let id = StreamId::random();
        let set = registry.get_or_create(id);
        assert!(Arc::ptr_eq(&shell, &set));
        assert_eq!(shell.stream_id(), id);
        assert!(registry.shell().is_none());

        let other = registry.get_or_create(StreamId::random());
        assert!(!Arc::ptr_eq(&other, &set));
    }

    #[test]
    fn lookup_without_create() {
        let registry: StreamSetRegistry<SourceStream> = StreamSetRegistry::new();
        let id = StreamId::random();
        assert!(registry.get_or_maybe_create(id, false).is_none());
        assert!(registry.get_or_maybe_create(id, true).is_some());
        assert!(registry.remove(id).is_some());
        assert!(!registry.contains(id));
    }
}
