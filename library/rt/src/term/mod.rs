//! Layout of the values stored in the pool.
//!
//! Every value starts with the allocator's block header (tag, aux word, size
//! and reference count), followed by a payload that depends on its type:
//!
//! | type     | payload                                              |
//! |----------|------------------------------------------------------|
//! | None     | -                                                    |
//! | Bool     | - (the truth value lives in the aux word)            |
//! | Integer  | `i64`                                                |
//! | String   | NUL-terminated bytes                                 |
//! | List     | `u64` size, `i32` reference to a RefArray            |
//! | Dict     | `u64` size, `u64` occupied, `i32` keys, `i32` values |
//! | RefArray | `u64` capacity, `capacity` x `i32` references        |
mod dict;
mod list;
pub mod ops;

use core::fmt;

use smallvec::SmallVec;
use static_assertions::{const_assert, const_assert_eq};

use subpython_alloc::pool::{raw, FREE_TAG, HEADER_SIZE};
use subpython_alloc::{align_up, MIN_ALIGN};

use crate::heap::Heap;
use crate::refs::Reference;

pub use self::dict::{dict_eq, keys_find};
pub use self::ops::{BinaryOp, CompareOp, UnaryOp, ValueOps};

pub const INTEGER_VALUE_OFFSET: usize = HEADER_SIZE;
pub const INTEGER_SIZE: usize = HEADER_SIZE + 8;

pub const STRING_VALUE_OFFSET: usize = HEADER_SIZE;

pub const LIST_SIZE_OFFSET: usize = HEADER_SIZE;
pub const LIST_VALUES_OFFSET: usize = HEADER_SIZE + 8;
pub const LIST_SIZE: usize = align_up(LIST_VALUES_OFFSET + 4, MIN_ALIGN);

pub const DICT_SIZE_OFFSET: usize = HEADER_SIZE;
pub const DICT_OCCUPIED_OFFSET: usize = HEADER_SIZE + 8;
pub const DICT_KEYS_OFFSET: usize = HEADER_SIZE + 16;
pub const DICT_VALUES_OFFSET: usize = HEADER_SIZE + 20;
pub const DICT_SIZE: usize = align_up(DICT_VALUES_OFFSET + 4, MIN_ALIGN);

pub const REFARRAY_CAPACITY_OFFSET: usize = HEADER_SIZE;
pub const REFARRAY_ELEMENTS_OFFSET: usize = HEADER_SIZE + 8;

const_assert_eq!(INTEGER_SIZE, 32);
const_assert_eq!(LIST_SIZE, 40);
const_assert_eq!(DICT_SIZE, 48);
const_assert!(REFARRAY_ELEMENTS_OFFSET % 4 == 0);

/// The requested size of a string value holding `len` bytes
#[inline]
pub const fn string_size(len: usize) -> usize {
    STRING_VALUE_OFFSET + len + 1
}

/// The requested size of a reference array with room for `capacity` references
#[inline]
pub const fn refarray_size(capacity: usize) -> usize {
    REFARRAY_ELEMENTS_OFFSET + capacity * 4
}

/// The type tag stored in the header of every block in the pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ValueType {
    None = 0,
    Bool = 1,
    Integer = 2,
    String = 3,
    List = 4,
    Dict = 5,
    /// Backing storage for lists and dicts, never visible to user code
    RefArray = 7,
    /// A block on the allocator's free list
    Free = 8,
}
const_assert_eq!(ValueType::Free as u32, FREE_TAG);
impl ValueType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Bool),
            2 => Some(Self::Integer),
            3 => Some(Self::String),
            4 => Some(Self::List),
            5 => Some(Self::Dict),
            7 => Some(Self::RefArray),
            8 => Some(Self::Free),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// The name of this type as seen by user code
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool => "bool",
            Self::Integer => "int",
            Self::String => "str",
            Self::List => "list",
            Self::Dict => "dict",
            Self::RefArray | Self::Free => "<unknown>",
        }
    }

    /// The name used for this type in heap dumps
    pub fn dump_name(self) -> &'static str {
        match self {
            Self::None => "VAL_NONE",
            Self::Bool => "VAL_BOOL",
            Self::Integer => "VAL_INTEGER",
            Self::String => "VAL_STRING",
            Self::List => "VAL_LIST",
            Self::Dict => "VAL_DICT",
            Self::RefArray => "VAL_REF_ARRAY",
            Self::Free => "VAL_FREE",
        }
    }

    /// Returns true for types which hold references to other values
    #[inline]
    pub fn is_container(self) -> bool {
        matches!(self, Self::List | Self::Dict | Self::RefArray)
    }
}
impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded, borrowed view of a value in the pool
#[derive(Copy, Clone)]
pub enum Value<'a> {
    None,
    Bool(bool),
    Integer(i64),
    /// The bytes of the string, without the terminator
    String(&'a [u8]),
    List {
        size: usize,
        values: Reference,
    },
    Dict {
        size: usize,
        occupied: usize,
        keys: Reference,
        values: Reference,
    },
    RefArray(RefArray<'a>),
}
impl<'a> Value<'a> {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::None => ValueType::None,
            Self::Bool(_) => ValueType::Bool,
            Self::Integer(_) => ValueType::Integer,
            Self::String(_) => ValueType::String,
            Self::List { .. } => ValueType::List,
            Self::Dict { .. } => ValueType::Dict,
            Self::RefArray(_) => ValueType::RefArray,
        }
    }
}
impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Integer(i) => f.debug_tuple("Integer").field(i).finish(),
            Self::String(s) => f
                .debug_tuple("String")
                .field(&String::from_utf8_lossy(s))
                .finish(),
            Self::List { size, values } => f
                .debug_struct("List")
                .field("size", size)
                .field("values", values)
                .finish(),
            Self::Dict {
                size,
                occupied,
                keys,
                values,
            } => f
                .debug_struct("Dict")
                .field("size", size)
                .field("occupied", occupied)
                .field("keys", keys)
                .field("values", values)
                .finish(),
            Self::RefArray(array) => f.debug_list().entries(array.iter()).finish(),
        }
    }
}

/// A view of the elements of a reference array
#[derive(Copy, Clone)]
pub struct RefArray<'a> {
    memory: &'a [u8],
    addr: usize,
    capacity: usize,
}
impl<'a> RefArray<'a> {
    pub(crate) fn new(memory: &'a [u8], addr: usize) -> Self {
        let capacity = raw::load_usize(memory, addr + REFARRAY_CAPACITY_OFFSET);
        Self {
            memory,
            addr,
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn get(&self, index: usize) -> Reference {
        assert!(
            index < self.capacity,
            "index {} out of bounds for ref array of capacity {}",
            index,
            self.capacity
        );
        Reference::from_raw(raw::load_i32(self.memory, element_addr(self.addr, index)))
    }

    /// Iterates over every slot, empty or not
    pub fn iter(&self) -> impl Iterator<Item = Reference> + 'a {
        let this = *self;
        (0..this.capacity).map(move |index| this.get(index))
    }
}

#[inline(always)]
fn element_addr(array: usize, index: usize) -> usize {
    array + REFARRAY_ELEMENTS_OFFSET + index * 4
}

/// Accessors for the payload fields shared by the container types
impl Heap {
    /// Decodes the value `reference` denotes
    pub fn value(&self, reference: Reference) -> Value<'_> {
        let addr = self.deref(reference);
        let memory = self.memory();
        match self.type_at(addr) {
            ValueType::None => Value::None,
            ValueType::Bool => Value::Bool(self.block(addr).aux() != 0),
            ValueType::Integer => Value::Integer(raw::load_i64(memory, addr + INTEGER_VALUE_OFFSET)),
            ValueType::String => {
                let payload = &memory[(addr + STRING_VALUE_OFFSET)..self.block(addr).end()];
                let len = payload
                    .iter()
                    .position(|b| *b == 0)
                    .unwrap_or(payload.len());
                Value::String(&payload[..len])
            }
            ValueType::List => Value::List {
                size: raw::load_usize(memory, addr + LIST_SIZE_OFFSET),
                values: Reference::from_raw(raw::load_i32(memory, addr + LIST_VALUES_OFFSET)),
            },
            ValueType::Dict => Value::Dict {
                size: raw::load_usize(memory, addr + DICT_SIZE_OFFSET),
                occupied: raw::load_usize(memory, addr + DICT_OCCUPIED_OFFSET),
                keys: Reference::from_raw(raw::load_i32(memory, addr + DICT_KEYS_OFFSET)),
                values: Reference::from_raw(raw::load_i32(memory, addr + DICT_VALUES_OFFSET)),
            },
            ValueType::RefArray => Value::RefArray(RefArray::new(memory, addr)),
            ValueType::Free => panic!("{:?} points at a free block", reference),
        }
    }

    /// Gets a view of the reference array `array`
    pub fn ref_array(&self, array: Reference) -> RefArray<'_> {
        let addr = self.deref(array);
        assert_eq!(self.type_at(addr), ValueType::RefArray);
        RefArray::new(self.memory(), addr)
    }

    #[inline]
    pub(crate) fn array_get(&self, array: Reference, index: usize) -> Reference {
        self.ref_array(array).get(index)
    }

    pub(crate) fn array_set(&mut self, array: Reference, index: usize, value: Reference) {
        let addr = self.deref(array);
        let capacity = self.ref_array(array).capacity();
        assert!(index < capacity);
        raw::store_i32(self.memory_mut(), element_addr(addr, index), value.as_raw());
    }

    #[inline]
    pub(crate) fn array_capacity(&self, array: Reference) -> usize {
        self.ref_array(array).capacity()
    }

    pub(crate) fn load_field(&self, reference: Reference, offset: usize) -> usize {
        raw::load_usize(self.memory(), self.deref(reference) + offset)
    }

    pub(crate) fn store_field(&mut self, reference: Reference, offset: usize, value: usize) {
        let addr = self.deref(reference);
        raw::store_usize(self.memory_mut(), addr + offset, value);
    }

    pub(crate) fn load_ref_field(&self, reference: Reference, offset: usize) -> Reference {
        Reference::from_raw(raw::load_i32(self.memory(), self.deref(reference) + offset))
    }

    pub(crate) fn store_ref_field(&mut self, reference: Reference, offset: usize, value: Reference) {
        let addr = self.deref(reference);
        raw::store_i32(self.memory_mut(), addr + offset, value.as_raw());
    }
}

/// The live outgoing references of the container at `addr`, in traversal order.
///
/// Lists yield their reference array, dicts their value array then their key
/// array, and reference arrays every element which is neither empty nor a
/// tombstone.
pub(crate) fn children(memory: &[u8], addr: usize, ty: ValueType) -> SmallVec<[Reference; 8]> {
    let load = |offset: usize| Reference::from_raw(raw::load_i32(memory, addr + offset));
    let mut children = SmallVec::new();
    match ty {
        ValueType::List => children.push(load(LIST_VALUES_OFFSET)),
        ValueType::Dict => {
            children.push(load(DICT_VALUES_OFFSET));
            children.push(load(DICT_KEYS_OFFSET));
        }
        ValueType::RefArray => {
            children.extend(RefArray::new(memory, addr).iter().filter(|r| r.is_live()));
        }
        _ => (),
    }
    children
}
