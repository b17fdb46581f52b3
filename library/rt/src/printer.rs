use core::fmt;
use std::io;

use subpython_alloc::pool::Block;

use crate::heap::Heap;
use crate::refs::Reference;
use crate::term::{ops, Value, ValueType};

/// Formats a value the way `print` and the REPL show it.
///
/// Containers print their elements in repr form. Nesting is limited to
/// `depth` levels; anything deeper prints as `...`, which also keeps cyclic
/// values from printing forever.
pub struct ValueDisplay<'h> {
    heap: &'h Heap,
    value: Reference,
    depth: usize,
    repr: bool,
}
impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth == 0 {
            return f.write_str("...");
        }
        let ty = self.heap.type_of(self.value);
        ops::ops_for(ty).print(self.heap, self.value, f, self.depth - 1, self.repr)
    }
}

impl Heap {
    /// Displays `value` as `print` would, quoting nothing
    pub fn display(&self, value: Reference) -> ValueDisplay<'_> {
        self.display_nested(value, self.config().max_print_depth, false)
    }

    /// Displays `value` with strings quoted
    pub fn repr(&self, value: Reference) -> ValueDisplay<'_> {
        self.display_nested(value, self.config().max_print_depth, true)
    }

    /// Displays `value` with `depth` levels of nesting left
    pub fn display_nested(&self, value: Reference, depth: usize, repr: bool) -> ValueDisplay<'_> {
        ValueDisplay {
            heap: self,
            value,
            depth,
            repr,
        }
    }

    /// Writes one line per block of the active semispace, in address order.
    ///
    /// Free blocks show their size; values also show their reference, count,
    /// type and a shallow rendering of their contents.
    pub fn dump<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for block in self.allocator.blocks() {
            if block.is_free() {
                writeln!(out, "Free  {:#010x}; size {}", block.addr(), block.size())?;
                continue;
            }
            self.dump_value(out, &block)?;
        }
        Ok(())
    }

    fn dump_value<W: io::Write + ?Sized>(&self, out: &mut W, block: &Block<'_>) -> io::Result<()> {
        let reference = self.refs.find(block.addr()).unwrap_or(Reference::NULL);
        write!(
            out,
            "Value {:#010x}; size {}; ref {}; refcnt: {}; ",
            block.addr(),
            block.size(),
            reference,
            block.link()
        )?;

        let ty = match ValueType::from_tag(block.tag()) {
            Some(ty) if reference.is_live() => ty,
            _ => return writeln!(out, "type = UNKNOWN; the memory pool is probably corrupt"),
        };
        write!(out, "type = {}; ", ty.dump_name())?;
        match self.value(reference) {
            Value::List { values, .. } => writeln!(out, "values = {}", values),
            Value::Dict { keys, values, .. } => writeln!(out, "keys = {}; values = {}", keys, values),
            Value::RefArray(array) => {
                write!(out, "values = [")?;
                for (index, element) in array.iter().enumerate() {
                    if index > 0 {
                        write!(out, ", ")?;
                    }
                    write!(out, "{}", element)?;
                }
                writeln!(out, "]")
            }
            _ => writeln!(out, "value = {}", self.display_nested(reference, 1, true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::config::HeapConfig;

    use super::*;

    fn heap(size: usize) -> Heap {
        Heap::new(HeapConfig::new(size).with_poison(true)).unwrap()
    }

    #[test]
    fn scalars() {
        let mut heap = heap(1024);
        let none = heap.make_none().unwrap();
        let yes = heap.make_bool(true).unwrap();
        let int = heap.make_int(-12).unwrap();
        let text = heap.make_str("hi there").unwrap();

        assert_eq!(heap.display(none).to_string(), "None");
        assert_eq!(heap.display(yes).to_string(), "True");
        assert_eq!(heap.display(int).to_string(), "-12");
        assert_eq!(heap.display(text).to_string(), "hi there");
        assert_eq!(heap.repr(text).to_string(), "\"hi there\"");
    }

    #[test]
    fn containers_show_their_elements_in_repr_form() {
        let mut heap = heap(4096);
        let one = heap.make_int(1).unwrap();
        let text = heap.make_str("a").unwrap();
        let none = heap.make_none().unwrap();
        let inner = heap.new_list(&[none]).unwrap();
        let list = heap.new_list(&[one, text, inner]).unwrap();
        assert_eq!(heap.display(list).to_string(), "[1, \"a\", [None]]");

        let dict = heap.new_dict(&[(text, one), (one, list)]).unwrap();
        assert_eq!(
            heap.display(dict).to_string(),
            "{1: [1, \"a\", [None]], \"a\": 1}"
        );

        let empty = heap.new_list(&[]).unwrap();
        let empty_dict = heap.new_dict(&[]).unwrap();
        assert_eq!(heap.display(empty).to_string(), "[]");
        assert_eq!(heap.display(empty_dict).to_string(), "{}");
    }

    #[test]
    fn nesting_is_cut_off() {
        let mut heap = heap(4096);
        let one = heap.make_int(1).unwrap();
        let mut list = heap.new_list(&[one]).unwrap();
        for _ in 0..4 {
            list = heap.new_list(&[list]).unwrap();
        }
        assert_eq!(heap.display(list).to_string(), "[[[[...]]]]");
        assert_eq!(heap.display_nested(list, 6, false).to_string(), "[[[[[1]]]]]");
        assert_eq!(heap.display_nested(list, 0, false).to_string(), "...");
    }

    #[test]
    fn cycles_terminate() {
        let mut heap = heap(4096);
        let list = heap.new_list(&[]).unwrap();
        heap.list_push(list, list).unwrap();
        assert_eq!(heap.display(list).to_string(), "[[[[...]]]]");
    }

    #[test]
    fn dump_walks_the_active_half() {
        let mut heap = heap(1024);
        let int = heap.make_int(5).unwrap();
        let text = heap.make_str("hi").unwrap();
        let _list = heap.new_list(&[int]).unwrap();
        let yes = heap.make_bool(true).unwrap();
        heap.decref(text);
        heap.decref(yes);

        let mut out = Vec::new();
        heap.dump(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Value 0x00000000; size 32; ref 0; refcnt: 2; type = VAL_INTEGER; value = 5\n\
             Free  0x00000020; size 32\n\
             Value 0x00000040; size 40; ref 2; refcnt: 1; type = VAL_REF_ARRAY; values = [0]\n\
             Value 0x00000068; size 40; ref 3; refcnt: 1; type = VAL_LIST; values = 2\n\
             Free  0x00000090; size 24\n\
             Free  0x000000a8; size 344\n"
        );
    }

    #[test]
    fn dump_shows_dict_arrays() {
        let mut heap = heap(1024);
        let dict = heap.new_dict(&[]).unwrap();
        let keys = heap.ref_array(match heap.value(dict) {
            Value::Dict { keys, .. } => keys,
            other => panic!("expected a dict, got {:?}", other),
        });
        assert_eq!(keys.capacity(), 16);

        let mut out = Vec::new();
        heap.dump(&mut out).unwrap();
        let dump = String::from_utf8(out).unwrap();
        let lines = dump.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[2],
            "Value 0x000000c0; size 48; ref 2; refcnt: 1; type = VAL_DICT; keys = 0; values = 1"
        );
        assert!(lines[0].ends_with(
            "type = VAL_REF_ARRAY; values = [-1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1]"
        ));
    }
}
