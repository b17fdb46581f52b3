use std::io;

use log::trace;

use crate::error::{Exception, RtResult};
use crate::gc::RootSet;
use crate::heap::Heap;
use crate::refs::Reference;

/// The global variable bindings of a program, in the order they were first made.
///
/// Each binding owns one reference to its value. The bindings are the only
/// roots of a collection.
#[derive(Debug, Default)]
pub struct Globals {
    bindings: Vec<(String, Reference)>,
}
impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Reference)> + '_ {
        self.bindings.iter().map(|(name, value)| (name.as_str(), *value))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|(n, _)| n == name)
    }

    /// The value bound to `name`, without taking a reference to it
    pub fn peek(&self, name: &str) -> Option<Reference> {
        self.position(name).map(|index| self.bindings[index].1)
    }

    /// Looks up `name`, returning a new reference to its value
    pub fn get(&self, heap: &mut Heap, name: &str) -> RtResult<Reference> {
        match self.peek(name) {
            Some(value) => {
                heap.incref(value);
                Ok(value)
            }
            None => Err(not_defined(name)),
        }
    }

    /// Binds `name` to `value`, taking a reference to it and releasing the one
    /// held by any previous binding
    pub fn set(&mut self, heap: &mut Heap, name: &str, value: Reference) {
        heap.incref(value);
        match self.position(name) {
            Some(index) => {
                let replaced = core::mem::replace(&mut self.bindings[index].1, value);
                heap.decref(replaced);
            }
            None => {
                trace!(target: "globals", "binding new global '{}' to {}", name, value);
                self.bindings.push((name.to_owned(), value));
            }
        }
    }

    /// Removes the binding for `name`, releasing its value
    pub fn delete(&mut self, heap: &mut Heap, name: &str) -> RtResult<()> {
        let index = self.position(name).ok_or_else(|| not_defined(name))?;
        let (_, value) = self.bindings.remove(index);
        heap.decref(value);
        Ok(())
    }

    /// Removes every binding, releasing each value
    pub fn clear(&mut self, heap: &mut Heap) {
        for (_, value) in self.bindings.drain(..) {
            heap.decref(value);
        }
    }

    /// Writes a header line followed by one line per binding
    pub fn print<W: io::Write + ?Sized>(&self, heap: &Heap, out: &mut W) -> io::Result<()> {
        writeln!(out, "{} Globals:", self.len())?;
        for (name, value) in self.iter() {
            writeln!(out, "{} = ref {}; value {}", name, value, heap.repr(value))?;
        }
        Ok(())
    }
}

impl RootSet for Globals {
    fn for_each_root(&self, callback: &mut dyn FnMut(&str, Reference)) -> usize {
        for (name, value) in self.iter() {
            callback(name, value);
        }
        self.len()
    }
}

fn not_defined(name: &str) -> Exception {
    Exception::name_error(format!("name '{}' is not defined", name))
}
