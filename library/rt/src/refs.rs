use core::fmt;

use log::trace;

/// An opaque handle to a value in a [`Heap`](crate::Heap).
///
/// A reference is an index into the reference table rather than an address,
/// so it stays valid while the value it denotes is moved by the collector.
/// Two negative values are reserved, see [`Reference::NULL`] and
/// [`Reference::TOMBSTONE`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Reference(i32);
impl Reference {
    /// The absence of a value
    pub const NULL: Self = Self(-1);
    /// Marks a deleted slot in a dict's key table
    pub const TOMBSTONE: Self = Self(-2);

    #[inline(always)]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    #[inline(always)]
    pub const fn is_tombstone(self) -> bool {
        self.0 == Self::TOMBSTONE.0
    }

    /// Returns true if this is neither of the reserved references
    #[inline(always)]
    pub const fn is_live(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        assert!(self.is_live(), "{:?} does not index the reference table", self);
        self.0 as usize
    }
}
impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NULL => f.write_str("Reference::NULL"),
            Self::TOMBSTONE => f.write_str("Reference::TOMBSTONE"),
            Self(raw) => write!(f, "Reference({})", raw),
        }
    }
}
impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps references to the current pool address of the value they denote.
///
/// Cleared slots are reused, lowest index first, before the table grows.
/// Growth is geometric, starting from the configured initial capacity.
pub struct ReferenceTable {
    slots: Vec<Option<usize>>,
    initial_capacity: usize,
}
impl ReferenceTable {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            initial_capacity: initial_capacity.max(1),
        }
    }

    /// Assigns a reference to the value at `addr`
    pub fn assign(&mut self, addr: usize) -> Reference {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            self.slots[index] = Some(addr);
            return Self::reference_for(index);
        }

        if self.slots.len() == self.slots.capacity() {
            let capacity = match self.slots.capacity() {
                0 => self.initial_capacity,
                n => n * 2,
            };
            trace!(target: "refs", "growing reference table to {} slots", capacity);
            self.slots.reserve_exact(capacity - self.slots.len());
        }

        let index = self.slots.len();
        self.slots.push(Some(addr));
        Self::reference_for(index)
    }

    fn reference_for(index: usize) -> Reference {
        assert!(index <= i32::MAX as usize, "reference table overflow");
        Reference::from_raw(index as i32)
    }

    /// Gets the address of the value `reference` denotes, if the slot is in use
    #[inline]
    pub fn get(&self, reference: Reference) -> Option<usize> {
        if !reference.is_live() {
            return None;
        }
        self.slots.get(reference.index()).copied().flatten()
    }

    /// Repoints an occupied slot at a new address
    #[inline]
    pub fn set(&mut self, reference: Reference, addr: usize) {
        let slot = &mut self.slots[reference.index()];
        assert!(slot.is_some(), "cannot repoint unused {:?}", reference);
        *slot = Some(addr);
    }

    #[inline]
    pub fn clear(&mut self, reference: Reference) {
        self.slots[reference.index()] = None;
    }

    /// Reverse lookup of the reference pointing at `addr`
    pub fn find(&self, addr: usize) -> Option<Reference> {
        self.slots
            .iter()
            .position(|slot| *slot == Some(addr))
            .map(Self::reference_for)
    }

    /// Clears every occupied slot whose address fails `keep`, returning how many were cleared
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(usize) -> bool,
    {
        let mut cleared = 0;
        for slot in self.slots.iter_mut() {
            if let Some(addr) = *slot {
                if !keep(addr) {
                    *slot = None;
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// The number of slots in use
    pub fn used(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// The number of slots, used or not
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Iterates over the occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (Reference, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|addr| (Self::reference_for(index), addr)))
    }
}
