use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{EngineResult, OperationalError};
use crate::terms::{Term, Triple, TriplePattern};

/// Lazy sequence of stored triples matching a lookup.
pub type TripleIter = Box<dyn Iterator<Item = Triple> + Send>;

/// The fact base the rules reason over.
///
/// Non-ground positions in a lookup pattern act as wildcards. Iterators must
/// not borrow the store, so that a caller can hold one across a suspension.
pub trait TripleStore: Send + Sync {
    fn find(&self, pattern: &TriplePattern) -> EngineResult<TripleIter>;

    fn contains(&self, triple: &Triple) -> EngineResult<bool>;

    /// Incremented by every change to the stored triples.
    fn version(&self) -> u64;
}

#[derive(Default)]
struct GraphInner {
    by_predicate: HashMap<Term, Arc<Vec<Triple>>>,
    index: HashSet<Triple>,
    version: u64,
}

/// In-memory triple store.
///
/// Triples are bucketed by predicate. Lookups take a reference-counted
/// snapshot of the bucket, so updates made while an iterator is open copy the
/// bucket instead of disturbing the iterator.
#[derive(Default)]
pub struct MemoryGraph {
    inner: RwLock<GraphInner>,
}

fn lock_error() -> OperationalError {
    OperationalError::InvalidState("triple store lock poisoned".to_string())
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_triples<I: IntoIterator<Item = Triple>>(triples: I) -> EngineResult<Self> {
        let graph = Self::new();
        for triple in triples {
            graph.add(triple)?;
        }
        Ok(graph)
    }

    /// Add a triple; returns false if it was already present.
    pub fn add(&self, triple: Triple) -> EngineResult<bool> {
        let mut inner = self.inner.write().map_err(|_| lock_error())?;
        if !inner.index.insert(triple.clone()) {
            return Ok(false);
        }
        let bucket = inner
            .by_predicate
            .entry(triple.predicate.clone())
            .or_default();
        Arc::make_mut(bucket).push(triple);
        inner.version += 1;
        Ok(true)
    }

    /// Remove a triple; returns false if it was not present.
    pub fn delete(&self, triple: &Triple) -> EngineResult<bool> {
        let mut inner = self.inner.write().map_err(|_| lock_error())?;
        if !inner.index.remove(triple) {
            return Ok(false);
        }
        if let Some(bucket) = inner.by_predicate.get_mut(&triple.predicate) {
            Arc::make_mut(bucket).retain(|t| t != triple);
        }
        inner.version += 1;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TripleStore for MemoryGraph {
    fn find(&self, pattern: &TriplePattern) -> EngineResult<TripleIter> {
        let inner = self.inner.read().map_err(|_| lock_error())?;
        let pattern = pattern.lookup_key();
        let buckets: Vec<Arc<Vec<Triple>>> = if pattern.predicate.is_ground() {
            inner
                .by_predicate
                .get(&pattern.predicate)
                .cloned()
                .into_iter()
                .collect()
        } else {
            inner.by_predicate.values().cloned().collect()
        };
        Ok(Box::new(buckets.into_iter().flat_map(move |bucket| {
            let pattern = pattern.clone();
            (0..bucket.len()).filter_map(move |i| {
                let triple = &bucket[i];
                if pattern.admits(triple) {
                    Some(triple.clone())
                } else {
                    None
                }
            })
        })))
    }

    fn contains(&self, triple: &Triple) -> EngineResult<bool> {
        if !triple.is_ground() {
            return Ok(self.find(triple)?.next().is_some());
        }
        let inner = self.inner.read().map_err(|_| lock_error())?;
        Ok(inner.index.contains(triple))
    }

    fn version(&self) -> u64 {
        self.inner.read().map(|inner| inner.version).unwrap_or(0)
    }
}
