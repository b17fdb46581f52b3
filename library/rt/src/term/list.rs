use core::cmp::Ordering;
use core::fmt;

use subpython_alloc::MemoryError;

use crate::error::{Exception, RtResult};
use crate::heap::Heap;
use crate::refs::Reference;

use super::ops::ValueOps;
use super::{Value, LIST_SIZE_OFFSET, LIST_VALUES_OFFSET};

impl Heap {
    /// The logical size of `list` and the reference array backing it
    fn list_parts(&self, list: Reference) -> (usize, Reference) {
        match self.value(list) {
            Value::List { size, values } => (size, values),
            other => panic!("expected a list, got {:?}", other.value_type()),
        }
    }

    /// Gets the element of `list` at `index`, without taking a reference to it
    pub fn list_get(&self, list: Reference, index: usize) -> Reference {
        let (size, values) = self.list_parts(list);
        assert!(index < size, "list index {} out of bounds for size {}", index, size);
        self.array_get(values, index)
    }

    /// Builds a list holding `elements`, taking a new reference to each.
    ///
    /// The backing array is sized to fit exactly.
    pub fn new_list(&mut self, elements: &[Reference]) -> Result<Reference, MemoryError> {
        let values = self.make_refarray(elements.len())?;
        let list = match self.make_list(values) {
            Ok(list) => list,
            Err(err) => {
                self.decref(values);
                return Err(err);
            }
        };
        for (index, element) in elements.iter().copied().enumerate() {
            self.incref(element);
            self.array_set(values, index, element);
        }
        self.store_field(list, LIST_SIZE_OFFSET, elements.len());
        Ok(list)
    }

    /// Appends `value` to `list`, taking a new reference to it.
    ///
    /// When the backing array is full it is replaced by one of twice the
    /// capacity. Elements move to the new array without touching their counts.
    pub fn list_push(&mut self, list: Reference, value: Reference) -> Result<(), MemoryError> {
        let (size, mut values) = self.list_parts(list);
        let capacity = self.array_capacity(values);
        if size == capacity {
            let grown = self.make_refarray((capacity * 2).max(1))?;
            for index in 0..size {
                let element = self.array_get(values, index);
                self.array_set(grown, index, element);
                self.array_set(values, index, Reference::NULL);
            }
            self.decref(values);
            self.store_ref_field(list, LIST_VALUES_OFFSET, grown);
            values = grown;
        }

        self.incref(value);
        self.array_set(values, size, value);
        self.store_field(list, LIST_SIZE_OFFSET, size + 1);
        Ok(())
    }

    /// Resolves a subscript to an index into `list`, counting negative indices from the end
    fn list_index(&self, list: Reference, subscript: Reference) -> RtResult<usize> {
        let index = match self.value(subscript) {
            Value::Integer(index) => index,
            _ => return Err(Exception::type_error("list indices must be integers")),
        };
        let (size, _) = self.list_parts(list);
        let index = if index < 0 {
            index.wrapping_add(size as i64)
        } else {
            index
        };
        if index < 0 || index as usize >= size {
            return Err(Exception::index_error("list index out of bounds"));
        }
        Ok(index as usize)
    }
}

pub struct ListOps;
impl ValueOps for ListOps {
    fn truthy(&self, heap: &Heap, value: Reference) -> bool {
        heap.list_parts(value).0 > 0
    }

    fn len(&self, heap: &Heap, value: Reference) -> Option<usize> {
        Some(heap.list_parts(value).0)
    }

    /// Lexicographic, with the shorter list ordering first when one is a prefix of the other
    fn compare(&self, heap: &Heap, left: Reference, right: Reference) -> Option<RtResult<Ordering>> {
        let (lsize, lvalues) = heap.list_parts(left);
        let (rsize, rvalues) = heap.list_parts(right);
        for index in 0..lsize.min(rsize) {
            match heap.compare(heap.array_get(lvalues, index), heap.array_get(rvalues, index)) {
                Ok(Ordering::Equal) => continue,
                result => return Some(result),
            }
        }
        Some(Ok(lsize.cmp(&rsize)))
    }

    fn equals(&self, heap: &Heap, left: Reference, right: Reference) -> bool {
        let (lsize, lvalues) = heap.list_parts(left);
        let (rsize, rvalues) = heap.list_parts(right);
        lsize == rsize
            && (0..lsize).all(|index| {
                heap.ref_eq(heap.array_get(lvalues, index), heap.array_get(rvalues, index))
            })
    }

    fn subscr_get(&self, heap: &mut Heap, value: Reference, subscript: Reference) -> Option<RtResult<Reference>> {
        Some(heap.list_index(value, subscript).map(|index| {
            let element = heap.list_get(value, index);
            heap.incref(element);
            element
        }))
    }

    fn subscr_set(
        &self,
        heap: &mut Heap,
        value: Reference,
        subscript: Reference,
        item: Reference,
    ) -> Option<RtResult<()>> {
        Some(heap.list_index(value, subscript).map(|index| {
            let (_, values) = heap.list_parts(value);
            let replaced = heap.array_get(values, index);
            heap.incref(item);
            heap.array_set(values, index, item);
            heap.decref(replaced);
        }))
    }

    fn subscr_del(&self, heap: &mut Heap, value: Reference, subscript: Reference) -> Option<RtResult<()>> {
        Some(heap.list_index(value, subscript).map(|index| {
            let (size, values) = heap.list_parts(value);
            let removed = heap.array_get(values, index);
            for i in index..(size - 1) {
                let next = heap.array_get(values, i + 1);
                heap.array_set(values, i, next);
            }
            heap.array_set(values, size - 1, Reference::NULL);
            heap.store_field(value, LIST_SIZE_OFFSET, size - 1);
            heap.decref(removed);
        }))
    }

    fn print(&self, heap: &Heap, value: Reference, f: &mut fmt::Formatter<'_>, depth: usize, _repr: bool) -> fmt::Result {
        let (size, values) = heap.list_parts(value);
        f.write_str("[")?;
        for index in 0..size {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", heap.display_nested(heap.array_get(values, index), depth, true))?;
        }
        f.write_str("]")
    }
}
