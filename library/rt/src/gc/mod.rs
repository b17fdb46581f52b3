mod collector;

pub use self::collector::SemispaceCollector;

use subpython_alloc::MemoryError;

use crate::error::Exception;
use crate::heap::Heap;
use crate::refs::Reference;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GcError {
    /// The target semispace could not hold every live value.
    ///
    /// Both halves of the pool are the same size, so this indicates a corrupted heap.
    #[error("ran out of space while evacuating live values: {0}")]
    ToSpaceExhausted(#[source] MemoryError),
}

impl From<GcError> for Exception {
    fn from(err: GcError) -> Self {
        Exception::internal(err.to_string())
    }
}

/// Provides the roots of a collection
pub trait RootSet {
    /// Invokes `callback` once for each named root, returning the number of roots visited
    fn for_each_root(&self, callback: &mut dyn FnMut(&str, Reference)) -> usize;
}

/// A fixed set of unnamed roots
impl RootSet for Vec<Reference> {
    fn for_each_root(&self, callback: &mut dyn FnMut(&str, Reference)) -> usize {
        for root in self.iter().copied() {
            callback("", root);
        }
        self.len()
    }
}

/// The outcome of a single collection
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Collection {
    pub roots: usize,
    /// The number of values copied into the new semispace
    pub survivors: usize,
    pub used_before: usize,
    pub used_after: usize,
}
impl Collection {
    #[inline]
    pub fn reclaimed(&self) -> usize {
        self.used_before.saturating_sub(self.used_after)
    }
}

/// Totals over every collection a heap has gone through
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub copied_bytes: usize,
    pub reclaimed_bytes: usize,
}

pub trait GarbageCollector {
    /// Runs a full collection using the given roots
    fn garbage_collect(&mut self, roots: &dyn RootSet) -> Result<Collection, GcError>;
}

impl Heap {
    /// Collects every value not reachable from `roots`, see [`SemispaceCollector`]
    pub fn collect(&mut self, roots: &dyn RootSet) -> Result<Collection, GcError> {
        SemispaceCollector::new(self).garbage_collect(roots)
    }
}
