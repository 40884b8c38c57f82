use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared source of query ids.
#[derive(Clone, Debug)]
pub struct Counter {
    next: Arc<AtomicU64>,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Counter {
    /// Return a monotonically increasing integer ID.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[test]
fn test_ids_are_unique_across_clones() {
    let counter = Counter::default();
    let other = counter.clone();

    assert_eq!(1, counter.next());
    assert_eq!(2, other.next());
    assert_eq!(3, counter.next());
}
