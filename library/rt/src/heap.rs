use core::ops::Range;

use log::trace;
use smallvec::SmallVec;

use subpython_alloc::pool::{raw, Block, AUX_OFFSET, HEADER_SIZE, LINK_OFFSET, TAG_OFFSET};
use subpython_alloc::{is_aligned, BlockAllocator, MemoryError, MIN_ALIGN};

use crate::config::{ConfigError, HeapConfig};
use crate::gc::GcStats;
use crate::refs::{Reference, ReferenceTable};
use crate::term::{self, *};

/// Allocated blocks keep their reference count in the allocator's link word
pub const REFCOUNT_OFFSET: usize = LINK_OFFSET;

/// The memory pool, the reference table, and the bookkeeping that ties them together.
///
/// The pool is split into two equal halves. Values are only ever allocated in
/// the active half (`from_space`); the other half is the evacuation target of
/// the next collection.
pub struct Heap {
    pub(crate) allocator: BlockAllocator,
    pub(crate) refs: ReferenceTable,
    pub(crate) from_space: Range<usize>,
    pub(crate) to_space: Range<usize>,
    pub(crate) stats: GcStats,
    config: HeapConfig,
}
impl Heap {
    pub fn new(config: HeapConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let pool_size = config.aligned_pool_size();
        let half = config.half_size();
        let memory = vec![0u8; pool_size].into_boxed_slice();
        let mut allocator = BlockAllocator::new(memory, config.poison);
        allocator.init(0..half);

        Ok(Self {
            allocator,
            refs: ReferenceTable::new(config.initial_refs),
            from_space: 0..half,
            to_space: half..(2 * half),
            stats: GcStats::default(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates a value of `size` bytes with the given type and assigns it a reference.
    ///
    /// The value starts out with a reference count of one, owned by the caller.
    /// Its payload is left uninitialized (stamped with the poison pattern when
    /// that is enabled). On failure the reference table is left untouched.
    pub fn make_ref(&mut self, ty: ValueType, size: usize) -> Result<Reference, MemoryError> {
        debug_assert_ne!(ty, ValueType::Free);
        let addr = self.allocator.alloc(size)?;
        assert!(self.allocator.block(addr).is_free());

        let memory = self.allocator.memory_mut();
        raw::store_u32(memory, addr + TAG_OFFSET, ty.tag());
        raw::store_u32(memory, addr + AUX_OFFSET, 0);
        raw::store_usize(memory, addr + REFCOUNT_OFFSET, 1);
        self.allocator.write_pattern(addr);

        Ok(self.refs.assign(addr))
    }

    /// Resolves a reference to the current address of its value.
    ///
    /// # Panics
    ///
    /// Panics if `reference` does not denote a live value.
    pub fn deref(&self, reference: Reference) -> usize {
        assert!(
            reference.is_live() && reference.index() < self.refs.len(),
            "invalid reference {:?}",
            reference
        );
        let addr = match self.refs.get(reference) {
            Some(addr) => addr,
            None => panic!("{:?} refers to a released value", reference),
        };
        assert!(addr < self.allocator.memory().len(), "{:?} points outside of the pool", reference);
        assert!(is_aligned(addr, MIN_ALIGN));
        addr
    }

    /// The type of the value `reference` denotes
    #[inline]
    pub fn type_of(&self, reference: Reference) -> ValueType {
        self.type_at(self.deref(reference))
    }

    pub(crate) fn type_at(&self, addr: usize) -> ValueType {
        let tag = self.block(addr).tag();
        match ValueType::from_tag(tag) {
            Some(ty) => ty,
            None => panic!("unknown type tag {} at {:#x}, the pool is probably corrupt", tag, addr),
        }
    }

    pub fn refcount(&self, reference: Reference) -> usize {
        raw::load_usize(self.memory(), self.deref(reference) + REFCOUNT_OFFSET)
    }

    #[inline]
    fn set_refcount(&mut self, addr: usize, count: usize) {
        raw::store_usize(self.allocator.memory_mut(), addr + REFCOUNT_OFFSET, count);
    }

    pub fn incref(&mut self, reference: Reference) {
        let addr = self.deref(reference);
        let count = raw::load_usize(self.memory(), addr + REFCOUNT_OFFSET);
        self.set_refcount(addr, count + 1);
    }

    /// Releases one reference to a value.
    ///
    /// A count which is already zero is left alone. When the count drops to
    /// zero the value is freed, and the references it holds are released in
    /// turn: a list releases its array, a dict its value and key arrays, and
    /// an array each of its live elements. Children are released before their
    /// parent's block goes back to the allocator.
    pub fn decref(&mut self, reference: Reference) {
        enum Step {
            Release(Reference),
            Free(Reference),
        }

        let mut pending: SmallVec<[Step; 8]> = SmallVec::new();
        pending.push(Step::Release(reference));
        while let Some(step) = pending.pop() {
            match step {
                Step::Release(reference) => {
                    let addr = self.deref(reference);
                    let count = raw::load_usize(self.memory(), addr + REFCOUNT_OFFSET);
                    if count == 0 {
                        continue;
                    }
                    self.set_refcount(addr, count - 1);
                    if count > 1 {
                        continue;
                    }

                    pending.push(Step::Free(reference));
                    let ty = self.type_at(addr);
                    if ty.is_container() {
                        let children = term::children(self.memory(), addr, ty);
                        pending.extend(children.into_iter().rev().map(Step::Release));
                    }
                }
                Step::Free(reference) => {
                    let addr = self.deref(reference);
                    self.refs.clear(reference);
                    self.allocator.free(addr);
                }
            }
        }
    }

    /// Finds the reference to the value at `addr`.
    ///
    /// This is a linear scan of the reference table, intended for debugging.
    ///
    /// # Panics
    ///
    /// Panics if no reference points at `addr`.
    pub fn get_ref(&self, addr: usize) -> Reference {
        match self.refs.find(addr) {
            Some(reference) => reference,
            None => panic!("value at {:#x} has no reference", addr),
        }
    }

    /// The number of bytes allocated in the active half of the pool
    #[inline]
    pub fn used(&self) -> usize {
        self.allocator.used()
    }

    /// The number of values with a reference
    #[inline]
    pub fn refs_used(&self) -> usize {
        self.refs.used()
    }

    /// Statistics accumulated over every collection of this heap
    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Returns true if `addr` lies in the active half of the pool
    #[inline]
    pub fn in_active_space(&self, addr: usize) -> bool {
        self.allocator.contains(addr)
    }

    #[inline]
    pub fn from_space(&self) -> Range<usize> {
        self.from_space.clone()
    }

    #[inline]
    pub(crate) fn memory(&self) -> &[u8] {
        self.allocator.memory()
    }

    #[inline]
    pub(crate) fn memory_mut(&mut self) -> &mut [u8] {
        self.allocator.memory_mut()
    }

    #[inline]
    pub(crate) fn block(&self, addr: usize) -> Block<'_> {
        self.allocator.block(addr)
    }

    /// Tears the heap down, releasing the pool and the reference table
    pub fn close(self) {
        trace!(
            target: "alloc",
            "closing heap with {} bytes in use by {} values",
            self.used(),
            self.refs_used()
        );
    }

    pub fn make_none(&mut self) -> Result<Reference, MemoryError> {
        self.make_ref(ValueType::None, HEADER_SIZE)
    }

    pub fn make_bool(&mut self, value: bool) -> Result<Reference, MemoryError> {
        let reference = self.make_ref(ValueType::Bool, HEADER_SIZE)?;
        let addr = self.deref(reference);
        raw::store_u32(self.memory_mut(), addr + AUX_OFFSET, value as u32);
        Ok(reference)
    }

    pub fn make_int(&mut self, value: i64) -> Result<Reference, MemoryError> {
        let reference = self.make_ref(ValueType::Integer, INTEGER_SIZE)?;
        let addr = self.deref(reference);
        raw::store_i64(self.memory_mut(), addr + INTEGER_VALUE_OFFSET, value);
        Ok(reference)
    }

    /// Allocates a string holding `value`, which must not contain a NUL byte
    pub fn make_str<S: AsRef<[u8]>>(&mut self, value: S) -> Result<Reference, MemoryError> {
        let bytes = value.as_ref();
        debug_assert!(!bytes.contains(&0));
        let reference = self.make_ref(ValueType::String, string_size(bytes.len()))?;
        let start = self.deref(reference) + STRING_VALUE_OFFSET;
        let memory = self.memory_mut();
        memory[start..(start + bytes.len())].copy_from_slice(bytes);
        memory[start + bytes.len()] = 0;
        Ok(reference)
    }

    /// Allocates the concatenation of two string values
    pub fn make_str_concat(&mut self, left: Reference, right: Reference) -> Result<Reference, MemoryError> {
        let left_len = self.str_bytes(left).len();
        let right_len = self.str_bytes(right).len();
        let reference = self.make_ref(ValueType::String, string_size(left_len + right_len))?;

        let start = self.deref(reference) + STRING_VALUE_OFFSET;
        let left_start = self.deref(left) + STRING_VALUE_OFFSET;
        let right_start = self.deref(right) + STRING_VALUE_OFFSET;
        let memory = self.memory_mut();
        memory.copy_within(left_start..(left_start + left_len), start);
        memory.copy_within(right_start..(right_start + right_len), start + left_len);
        memory[start + left_len + right_len] = 0;
        Ok(reference)
    }

    pub(crate) fn str_bytes(&self, reference: Reference) -> &[u8] {
        match self.value(reference) {
            Value::String(bytes) => bytes,
            other => panic!("expected a string, got {:?}", other.value_type()),
        }
    }

    /// Allocates a reference array with every slot empty
    pub fn make_refarray(&mut self, capacity: usize) -> Result<Reference, MemoryError> {
        let reference = self.make_ref(ValueType::RefArray, refarray_size(capacity))?;
        let addr = self.deref(reference);
        let memory = self.memory_mut();
        raw::store_usize(memory, addr + REFARRAY_CAPACITY_OFFSET, capacity);
        for index in 0..capacity {
            raw::store_i32(
                memory,
                addr + REFARRAY_ELEMENTS_OFFSET + index * 4,
                Reference::NULL.as_raw(),
            );
        }
        Ok(reference)
    }

    /// Allocates an empty list backed by `values`, which it takes ownership of
    pub fn make_list(&mut self, values: Reference) -> Result<Reference, MemoryError> {
        assert_eq!(self.type_of(values), ValueType::RefArray);
        let reference = self.make_ref(ValueType::List, LIST_SIZE)?;
        self.store_field(reference, LIST_SIZE_OFFSET, 0);
        self.store_ref_field(reference, LIST_VALUES_OFFSET, values);
        Ok(reference)
    }

    /// Allocates an empty dict backed by `keys` and `values`, which it takes ownership of
    pub fn make_dict(&mut self, keys: Reference, values: Reference) -> Result<Reference, MemoryError> {
        assert_eq!(self.type_of(keys), ValueType::RefArray);
        assert_eq!(self.type_of(values), ValueType::RefArray);
        assert_eq!(self.array_capacity(keys), self.array_capacity(values));
        let reference = self.make_ref(ValueType::Dict, DICT_SIZE)?;
        self.store_field(reference, DICT_SIZE_OFFSET, 0);
        self.store_field(reference, DICT_OCCUPIED_OFFSET, 0);
        self.store_ref_field(reference, DICT_KEYS_OFFSET, keys);
        self.store_ref_field(reference, DICT_VALUES_OFFSET, values);
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use subpython_alloc::pool::FREE_PATTERN;

    use super::*;

    fn heap(size: usize) -> Heap {
        Heap::new(HeapConfig::new(size).with_poison(true)).unwrap()
    }

    #[test]
    fn make_ref_initializes_the_header() {
        let mut heap = heap(1024);
        for (ty, size) in [
            (ValueType::None, HEADER_SIZE),
            (ValueType::Integer, INTEGER_SIZE),
            (ValueType::String, string_size(3)),
            (ValueType::List, LIST_SIZE),
            (ValueType::RefArray, refarray_size(5)),
        ] {
            let reference = heap.make_ref(ty, size).unwrap();
            let addr = heap.deref(reference);
            assert_eq!(heap.type_of(reference), ty);
            assert_eq!(heap.refcount(reference), 1);
            assert!(heap.block(addr).size() >= size);
            assert!(heap.in_active_space(addr));
        }
        assert_eq!(heap.refs_used(), 5);
    }

    #[test]
    fn fresh_payloads_are_poisoned() {
        let mut heap = heap(1024);
        let reference = heap.make_ref(ValueType::Integer, INTEGER_SIZE).unwrap();
        let addr = heap.deref(reference);
        assert!(heap.block(addr).payload().iter().all(|b| *b == FREE_PATTERN));
    }

    #[test]
    fn scalar_constructors() {
        let mut heap = heap(1024);
        let none = heap.make_none().unwrap();
        let yes = heap.make_bool(true).unwrap();
        let no = heap.make_bool(false).unwrap();
        let int = heap.make_int(-42).unwrap();
        let hello = heap.make_str("hello").unwrap();
        let world = heap.make_str(", world").unwrap();
        let both = heap.make_str_concat(hello, world).unwrap();

        assert!(matches!(heap.value(none), Value::None));
        assert!(matches!(heap.value(yes), Value::Bool(true)));
        assert!(matches!(heap.value(no), Value::Bool(false)));
        assert!(matches!(heap.value(int), Value::Integer(-42)));
        assert_eq!(heap.str_bytes(both), b"hello, world");
        assert_eq!(heap.block(heap.deref(hello)).size(), 32);
        assert_eq!(heap.block(heap.deref(both)).size(), 40);
    }

    #[test]
    fn incref_then_decref_keeps_the_value() {
        let mut heap = heap(1024);
        let reference = heap.make_int(7).unwrap();
        heap.incref(reference);
        heap.decref(reference);
        assert_eq!(heap.refcount(reference), 1);
        assert!(matches!(heap.value(reference), Value::Integer(7)));

        let used = heap.used();
        heap.decref(reference);
        assert_eq!(heap.refs_used(), 0);
        assert_eq!(heap.used(), used - INTEGER_SIZE);
    }

    #[test]
    fn a_reused_reference_denotes_the_new_value() {
        let mut heap = heap(1024);
        let a = heap.make_int(1).unwrap();
        heap.decref(a);
        let b = heap.make_str("b").unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.type_of(b), ValueType::String);
    }

    #[test]
    #[should_panic(expected = "released value")]
    fn deref_of_a_released_reference_panics() {
        let mut heap = heap(1024);
        let a = heap.make_int(1).unwrap();
        let _b = heap.make_int(2).unwrap();
        heap.decref(a);
        heap.deref(a);
    }

    #[test]
    #[should_panic(expected = "invalid reference")]
    fn deref_of_null_panics() {
        let heap = heap(1024);
        heap.deref(Reference::NULL);
    }

    #[test]
    fn decref_tears_down_composites() {
        let mut heap = heap(2048);
        let baseline = heap.used();

        let array = heap.make_refarray(4).unwrap();
        let list = heap.make_list(array).unwrap();
        for i in 0..4 {
            let element = heap.make_int(i).unwrap();
            heap.array_set(array, i as usize, element);
        }
        heap.store_field(list, LIST_SIZE_OFFSET, 4);
        assert_eq!(heap.refs_used(), 6);

        heap.decref(list);
        assert_eq!(heap.used(), baseline);
        assert_eq!(heap.refs_used(), 0);
    }

    #[test]
    fn decref_frees_children_before_parents() {
        let mut heap = heap(2048);
        let array = heap.make_refarray(1).unwrap();
        let list = heap.make_list(array).unwrap();
        let element = heap.make_int(1).unwrap();
        heap.array_set(array, 0, element);
        heap.store_field(list, LIST_SIZE_OFFSET, 1);

        let list_addr = heap.deref(list);
        let array_addr = heap.deref(array);
        let element_addr = heap.deref(element);
        heap.decref(list);

        let freed = heap
            .allocator
            .free_blocks()
            .map(|block| block.addr())
            .take(3)
            .collect::<Vec<_>>();
        assert_eq!(freed, vec![list_addr, array_addr, element_addr]);
    }

    #[test]
    fn decref_at_zero_is_ignored() {
        let mut heap = heap(1024);
        let reference = heap.make_int(3).unwrap();
        let addr = heap.deref(reference);
        heap.set_refcount(addr, 0);
        heap.decref(reference);
        assert_eq!(heap.refs_used(), 1);
    }

    #[test]
    fn allocation_failure_leaves_the_table_alone() {
        let mut heap = heap(128);
        let _a = heap.make_int(1).unwrap();
        let err = heap.make_str("this string does not fit in the pool").unwrap_err();
        assert_eq!(
            err,
            MemoryError {
                requested: 64,
                used: 32
            }
        );
        assert_eq!(heap.refs_used(), 1);
    }

    #[test]
    fn get_ref_finds_the_owner() {
        let mut heap = heap(1024);
        let _a = heap.make_int(1).unwrap();
        let b = heap.make_int(2).unwrap();
        assert_eq!(heap.get_ref(heap.deref(b)), b);
    }
}
