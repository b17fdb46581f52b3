use core::mem;

use log::{debug, info, trace};
use smallvec::SmallVec;

use subpython_alloc::pool::{raw, SIZE_OFFSET};

use crate::heap::{Heap, REFCOUNT_OFFSET};
use crate::refs::Reference;
use crate::term;

use super::*;

/// A stop-and-copy collector over the two halves of a heap's pool.
///
/// A collection re-initializes the inactive half as one free block, makes it
/// the active half, and copies every value reachable from the roots into it.
/// References are repointed in place as their values move, so handles held by
/// the evaluator stay valid. Afterwards any reference still pointing into the
/// old half denotes garbage and is cleared.
///
/// Reference counts are recomputed along the way: the first time a value is
/// reached its count becomes one, and every later encounter, whether from
/// another root or from a container, adds one. Survivors therefore end up
/// with a count equal to the number of edges found to them, and unreachable
/// cycles are dropped no matter what their stale counts said.
pub struct SemispaceCollector<'h> {
    heap: &'h mut Heap,
    survivors: usize,
    copied: usize,
}
impl<'h> SemispaceCollector<'h> {
    pub fn new(heap: &'h mut Heap) -> Self {
        Self {
            heap,
            survivors: 0,
            copied: 0,
        }
    }

    /// Moves `root` and everything reachable from it into the active half.
    ///
    /// Values are visited depth-first in the order their containers list them,
    /// using an explicit stack rather than recursion.
    fn evacuate(&mut self, root: Reference) -> Result<(), GcError> {
        let mut pending: SmallVec<[Reference; 16]> = SmallVec::new();
        pending.push(root);

        while let Some(reference) = pending.pop() {
            if !reference.is_live() {
                continue;
            }

            let heap = &mut *self.heap;
            let old = match heap.refs.get(reference) {
                Some(addr) => addr,
                None => panic!("{:?} is reachable but has been released", reference),
            };
            if heap.allocator.contains(old) {
                heap.incref(reference);
                continue;
            }

            let size = heap.allocator.block(old).size();
            raw::store_usize(heap.allocator.memory_mut(), old + REFCOUNT_OFFSET, 1);
            let new = heap
                .allocator
                .alloc(size)
                .map_err(GcError::ToSpaceExhausted)?;
            let allocated = heap.allocator.block(new).size();

            let memory = heap.allocator.memory_mut();
            memory.copy_within(old..(old + size), new);
            // The copied header carries the old footprint
            raw::store_usize(memory, new + SIZE_OFFSET, allocated);
            heap.refs.set(reference, new);
            trace!(target: "gc", "moved {} ({} bytes) from {:#x} to {:#x}", reference, allocated, old, new);

            self.survivors += 1;
            self.copied += allocated;

            let ty = heap.type_at(new);
            if ty.is_container() {
                let children = term::children(heap.memory(), new, ty);
                pending.extend(children.into_iter().rev());
            }
        }

        Ok(())
    }
}
impl GarbageCollector for SemispaceCollector<'_> {
    fn garbage_collect(&mut self, roots: &dyn RootSet) -> Result<Collection, GcError> {
        info!(target: "gc", "collecting garbage");
        let used_before = self.heap.used();

        let heap = &mut *self.heap;
        heap.allocator.init(heap.to_space.clone());
        mem::swap(&mut heap.from_space, &mut heap.to_space);
        trace!(target: "gc", "evacuating into {:#x}..{:#x}", heap.from_space.start, heap.from_space.end);

        let mut result = Ok(());
        let count = roots.for_each_root(&mut |name, root| {
            if result.is_ok() {
                trace!(target: "gc", "visiting root '{}' ({})", name, root);
                result = self.evacuate(root);
            }
        });
        result?;

        // Anything left behind in the old half is unreachable
        let heap = &mut *self.heap;
        let allocator = &heap.allocator;
        let swept = heap.refs.retain(|addr| allocator.contains(addr));

        let collection = Collection {
            roots: count,
            survivors: self.survivors,
            used_before,
            used_after: heap.used(),
        };
        debug!(
            target: "gc",
            "visited {} roots, {} values survived, {} references swept",
            count,
            self.survivors,
            swept
        );

        heap.stats.collections += 1;
        heap.stats.copied_bytes += self.copied;
        heap.stats.reclaimed_bytes += collection.reclaimed();
        info!(target: "gc", "reclaimed {} bytes of garbage", collection.reclaimed());

        Ok(collection)
    }
}
