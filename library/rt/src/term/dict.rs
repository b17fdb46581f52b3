use core::fmt;

use log::trace;

use crate::error::{Exception, RtResult};
use crate::heap::Heap;
use crate::refs::Reference;

use super::ops::ValueOps;
use super::{Value, DICT_KEYS_OFFSET, DICT_OCCUPIED_OFFSET, DICT_SIZE_OFFSET, DICT_VALUES_OFFSET};

/// The decoded header fields of a dict
#[derive(Debug, Copy, Clone)]
struct DictParts {
    size: usize,
    occupied: usize,
    keys: Reference,
    values: Reference,
}

/// Probes the key array `keys` for `subscript`, starting at `hash % capacity`
/// and wrapping around.
///
/// The probe stops at an empty slot, at a slot holding a key equal to
/// `subscript`, or, unless `skip_tombstones` is set, at a tombstone. Every slot
/// is visited at most once; `None` means the table had no such slot.
pub fn keys_find(
    heap: &Heap,
    keys: Reference,
    hash: u64,
    subscript: Reference,
    skip_tombstones: bool,
) -> Option<usize> {
    let array = heap.ref_array(keys);
    let capacity = array.capacity();
    if capacity == 0 {
        return None;
    }

    let start = (hash % capacity as u64) as usize;
    (0..capacity)
        .map(|probe| (start + probe) % capacity)
        .find(|slot| {
            let key = array.get(*slot);
            if key.is_tombstone() {
                !skip_tombstones
            } else {
                key.is_null() || heap.ref_eq(subscript, key)
            }
        })
}

/// Returns true if both dicts hold the same keys mapped to equal values, in any slot order
pub fn dict_eq(heap: &Heap, left: Reference, right: Reference) -> bool {
    let l = heap.dict_parts(left);
    let r = heap.dict_parts(right);
    if l.size != r.size {
        return false;
    }

    heap.ref_array(l.keys)
        .iter()
        .enumerate()
        .filter(|(_, key)| key.is_live())
        .all(|(slot, key)| {
            let found = heap
                .ref_hash(key)
                .ok()
                .and_then(|hash| keys_find(heap, r.keys, hash, key, true))
                .filter(|rslot| heap.array_get(r.keys, *rslot).is_live());
            match found {
                Some(rslot) => heap.ref_eq(
                    heap.array_get(l.values, slot),
                    heap.array_get(r.values, rslot),
                ),
                None => false,
            }
        })
}

impl Heap {
    fn dict_parts(&self, dict: Reference) -> DictParts {
        match self.value(dict) {
            Value::Dict {
                size,
                occupied,
                keys,
                values,
            } => DictParts {
                size,
                occupied,
                keys,
                values,
            },
            other => panic!("expected a dict, got {:?}", other.value_type()),
        }
    }

    /// Builds a dict from `pairs`, taking a new reference to every key and value.
    ///
    /// The table starts out with room for twice as many entries as given, but
    /// never fewer slots than the configured minimum. Later pairs overwrite
    /// earlier ones with an equal key.
    pub fn new_dict(&mut self, pairs: &[(Reference, Reference)]) -> RtResult<Reference> {
        let capacity = (pairs.len() * 2).max(self.config().dict_min_capacity);
        let keys = self.make_refarray(capacity)?;
        let values = match self.make_refarray(capacity) {
            Ok(values) => values,
            Err(err) => {
                self.decref(keys);
                return Err(err.into());
            }
        };
        let dict = match self.make_dict(keys, values) {
            Ok(dict) => dict,
            Err(err) => {
                self.decref(keys);
                self.decref(values);
                return Err(err.into());
            }
        };

        for (key, value) in pairs.iter().copied() {
            if let Err(err) = self.dict_set(dict, key, value) {
                self.decref(dict);
                return Err(err);
            }
        }
        Ok(dict)
    }

    /// Looks up `key`, returning a new reference to its value
    pub fn dict_get(&mut self, dict: Reference, key: Reference) -> RtResult<Reference> {
        let hash = self.ref_hash(key)?;
        let parts = self.dict_parts(dict);
        match self.dict_lookup(parts.keys, hash, key) {
            Some(slot) => {
                let value = self.array_get(parts.values, slot);
                self.incref(value);
                Ok(value)
            }
            None => Err(Exception::key_error("no value found for key in dictionary")),
        }
    }

    /// Maps `key` to `value`, taking a reference to each when a new entry is made.
    ///
    /// If the entry was added but growing the table afterwards ran out of
    /// memory, the entry stays and the `MemoryError` is returned.
    pub fn dict_set(&mut self, dict: Reference, key: Reference, value: Reference) -> RtResult<()> {
        let hash = self.ref_hash(key)?;
        let parts = self.dict_parts(dict);

        if let Some(slot) = self.dict_lookup(parts.keys, hash, key) {
            let replaced = self.array_get(parts.values, slot);
            self.incref(value);
            self.array_set(parts.values, slot, value);
            self.decref(replaced);
            return Ok(());
        }

        let (parts, slot) = loop {
            let parts = self.dict_parts(dict);
            match keys_find(self, parts.keys, hash, key, false) {
                Some(slot) => break (parts, slot),
                None => self.dict_upsize(dict)?,
            }
        };

        let fresh = self.array_get(parts.keys, slot).is_null();
        self.incref(key);
        self.incref(value);
        self.array_set(parts.keys, slot, key);
        self.array_set(parts.values, slot, value);
        self.store_field(dict, DICT_SIZE_OFFSET, parts.size + 1);
        let occupied = parts.occupied + fresh as usize;
        self.store_field(dict, DICT_OCCUPIED_OFFSET, occupied);

        if occupied * 2 >= self.array_capacity(parts.keys) {
            self.dict_upsize(dict)?;
        }
        Ok(())
    }

    /// Removes the entry for `key`, leaving a tombstone in its slot
    pub fn dict_del(&mut self, dict: Reference, key: Reference) -> RtResult<()> {
        let hash = self.ref_hash(key)?;
        let parts = self.dict_parts(dict);
        let slot = self
            .dict_lookup(parts.keys, hash, key)
            .ok_or_else(|| Exception::key_error("can't delete nonexistant key in dictionary"))?;

        let removed_key = self.array_get(parts.keys, slot);
        let removed_value = self.array_get(parts.values, slot);
        self.array_set(parts.keys, slot, Reference::TOMBSTONE);
        self.array_set(parts.values, slot, Reference::NULL);
        self.store_field(dict, DICT_SIZE_OFFSET, parts.size - 1);
        self.decref(removed_key);
        self.decref(removed_value);
        Ok(())
    }

    /// The slot holding a key equal to `key`, if any
    fn dict_lookup(&self, keys: Reference, hash: u64, key: Reference) -> Option<usize> {
        keys_find(self, keys, hash, key, true).filter(|slot| self.array_get(keys, *slot).is_live())
    }

    /// Rehashes every entry into tables of twice the capacity, dropping tombstones.
    ///
    /// Entries move without their counts changing; the old arrays are emptied
    /// before being released.
    fn dict_upsize(&mut self, dict: Reference) -> RtResult<()> {
        let parts = self.dict_parts(dict);
        let capacity = self.array_capacity(parts.keys);
        let new_capacity = (capacity * 2).max(self.config().dict_min_capacity);

        let entries = (0..capacity)
            .filter(|slot| self.array_get(parts.keys, *slot).is_live())
            .map(|slot| {
                let key = self.array_get(parts.keys, slot);
                self.ref_hash(key).map(|hash| (slot, key, hash))
            })
            .collect::<RtResult<Vec<_>>>()?;

        let keys = self.make_refarray(new_capacity)?;
        let values = match self.make_refarray(new_capacity) {
            Ok(values) => values,
            Err(err) => {
                self.decref(keys);
                return Err(err.into());
            }
        };

        for (slot, key, hash) in entries {
            let target = match keys_find(self, keys, hash, key, false) {
                Some(target) => target,
                None => unreachable!("resized dict table has no free slot"),
            };
            let value = self.array_get(parts.values, slot);
            self.array_set(keys, target, key);
            self.array_set(values, target, value);
            self.array_set(parts.keys, slot, Reference::NULL);
            self.array_set(parts.values, slot, Reference::NULL);
        }

        self.decref(parts.keys);
        self.decref(parts.values);
        self.store_ref_field(dict, DICT_KEYS_OFFSET, keys);
        self.store_ref_field(dict, DICT_VALUES_OFFSET, values);
        self.store_field(dict, DICT_OCCUPIED_OFFSET, parts.size);
        trace!(target: "term", "resized dict {} from {} to {} slots", dict, capacity, new_capacity);
        Ok(())
    }
}

pub struct DictOps;
impl ValueOps for DictOps {
    fn truthy(&self, heap: &Heap, value: Reference) -> bool {
        heap.dict_parts(value).size > 0
    }

    fn len(&self, heap: &Heap, value: Reference) -> Option<usize> {
        Some(heap.dict_parts(value).size)
    }

    fn equals(&self, heap: &Heap, left: Reference, right: Reference) -> bool {
        dict_eq(heap, left, right)
    }

    fn subscr_get(&self, heap: &mut Heap, value: Reference, subscript: Reference) -> Option<RtResult<Reference>> {
        Some(heap.dict_get(value, subscript))
    }

    fn subscr_set(
        &self,
        heap: &mut Heap,
        value: Reference,
        subscript: Reference,
        item: Reference,
    ) -> Option<RtResult<()>> {
        Some(heap.dict_set(value, subscript, item))
    }

    fn subscr_del(&self, heap: &mut Heap, value: Reference, subscript: Reference) -> Option<RtResult<()>> {
        Some(heap.dict_del(value, subscript))
    }

    fn print(&self, heap: &Heap, value: Reference, f: &mut fmt::Formatter<'_>, depth: usize, _repr: bool) -> fmt::Result {
        let parts = heap.dict_parts(value);
        let keys = heap.ref_array(parts.keys);
        f.write_str("{")?;
        let mut first = true;
        for (slot, key) in keys.iter().enumerate().filter(|(_, key)| key.is_live()) {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(
                f,
                "{}: {}",
                heap.display_nested(key, depth, true),
                heap.display_nested(heap.array_get(parts.values, slot), depth, true)
            )?;
        }
        f.write_str("}")
    }
}
