use std::io::{self, Write};

use log::{debug, info};

use crate::config::HeapConfig;
use crate::error::{Exception, Exceptions, InitError, RtResult};
use crate::gc::Collection;
use crate::globals::Globals;
use crate::heap::Heap;
use crate::refs::Reference;
use crate::term::{BinaryOp, CompareOp, UnaryOp};

const SINGLETONS: [&str; 3] = ["None", "True", "False"];

/// The state an evaluator runs against: a heap, its global bindings, the
/// `None`/`True`/`False` singletons and the exception channel.
///
/// Operations which can fail on behalf of user code report the failure
/// through [`Exceptions`] and return [`Reference::NULL`], so an evaluator
/// checks [`Exceptions::occurred`] after each step. Every non-null reference
/// returned is a new reference owned by the caller, to be handed back with
/// [`Runtime::release`].
pub struct Runtime {
    heap: Heap,
    globals: Globals,
    exceptions: Exceptions,
    none: Reference,
    true_ref: Reference,
    false_ref: Reference,
}
impl Runtime {
    /// Creates the heap and binds the singletons.
    ///
    /// The singletons are owned by their global bindings alone, which cannot
    /// be removed or rebound, so they survive every collection.
    pub fn new(config: HeapConfig) -> Result<Self, InitError> {
        let mut heap = Heap::new(config)?;
        let none = heap.make_none()?;
        let true_ref = heap.make_bool(true)?;
        let false_ref = heap.make_bool(false)?;

        let mut globals = Globals::new();
        for (name, value) in SINGLETONS.iter().zip([none, true_ref, false_ref]) {
            globals.set(&mut heap, name, value);
            heap.decref(value);
        }
        debug!(target: "runtime", "initialized runtime with {} byte pool", heap.config().pool_size);

        Ok(Self {
            heap,
            globals,
            exceptions: Exceptions::default(),
            none,
            true_ref,
            false_ref,
        })
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[inline]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    #[inline]
    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    #[inline]
    pub fn exceptions(&self) -> &Exceptions {
        &self.exceptions
    }

    #[inline]
    pub fn exceptions_mut(&mut self) -> &mut Exceptions {
        &mut self.exceptions
    }

    /// Routes a failure into the exception channel
    fn raise<T>(&mut self, result: RtResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(exception) => {
                self.exceptions.set(exception);
                None
            }
        }
    }

    fn raise_ref(&mut self, result: RtResult<Reference>) -> Reference {
        self.raise(result).unwrap_or(Reference::NULL)
    }

    /// A new reference to `None`
    pub fn none(&mut self) -> Reference {
        self.heap.incref(self.none);
        self.none
    }

    /// A new reference to `True` or `False`
    pub fn bool_ref(&mut self, value: bool) -> Reference {
        let reference = if value { self.true_ref } else { self.false_ref };
        self.heap.incref(reference);
        reference
    }

    pub fn int(&mut self, value: i64) -> Reference {
        let result = self.heap.make_int(value).map_err(Exception::from);
        self.raise_ref(result)
    }

    pub fn string(&mut self, value: &str) -> Reference {
        let result = self.heap.make_str(value).map_err(Exception::from);
        self.raise_ref(result)
    }

    /// Builds a list literal; the list takes its own reference to each element
    pub fn list(&mut self, elements: &[Reference]) -> Reference {
        let result = self.heap.new_list(elements).map_err(Exception::from);
        self.raise_ref(result)
    }

    /// Builds a dict literal; the dict takes its own reference to each key and value
    pub fn dict(&mut self, pairs: &[(Reference, Reference)]) -> Reference {
        let result = self.heap.new_dict(pairs);
        self.raise_ref(result)
    }

    /// Releases a reference returned by this runtime; `NULL` is ignored
    pub fn release(&mut self, value: Reference) {
        if value.is_live() {
            self.heap.decref(value);
        }
    }

    /// Binds `name` to `value`, consuming the caller's reference
    pub fn assign(&mut self, name: &str, value: Reference) {
        if SINGLETONS.contains(&name) {
            self.heap.decref(value);
            self.exceptions
                .set(Exception::syntax_error(format!("cannot assign to {}", name)));
            return;
        }
        self.globals.set(&mut self.heap, name, value);
        self.heap.decref(value);
    }

    /// Looks up a global, returning a new reference to its value
    pub fn lookup(&mut self, name: &str) -> Reference {
        let result = self.globals.get(&mut self.heap, name);
        self.raise_ref(result)
    }

    /// Removes a global binding
    pub fn unbind(&mut self, name: &str) {
        let result = if SINGLETONS.contains(&name) {
            Err(Exception::syntax_error(format!("cannot delete {}", name)))
        } else {
            self.globals.delete(&mut self.heap, name)
        };
        self.raise(result);
    }

    pub fn truthy(&self, value: Reference) -> bool {
        self.heap.ref_bool(value)
    }

    pub fn unary(&mut self, op: UnaryOp, value: Reference) -> Reference {
        let result = self.heap.ref_unary(op, value);
        self.raise_ref(result)
    }

    pub fn binary(&mut self, op: BinaryOp, left: Reference, right: Reference) -> Reference {
        let result = self.heap.ref_binary(op, left, right);
        self.raise_ref(result)
    }

    /// Evaluates a comparison, returning `True` or `False`
    pub fn compare(&mut self, op: CompareOp, left: Reference, right: Reference) -> Reference {
        let result = self.heap.ref_compare(op, left, right);
        match self.raise(result) {
            Some(value) => self.bool_ref(value),
            None => Reference::NULL,
        }
    }

    pub fn subscr_get(&mut self, value: Reference, subscript: Reference) -> Reference {
        let result = self.heap.ref_subscr_get(value, subscript);
        self.raise_ref(result)
    }

    pub fn subscr_set(&mut self, value: Reference, subscript: Reference, item: Reference) {
        let result = self.heap.ref_subscr_set(value, subscript, item);
        self.raise(result);
    }

    pub fn subscr_del(&mut self, value: Reference, subscript: Reference) {
        let result = self.heap.ref_subscr_del(value, subscript);
        self.raise(result);
    }

    /// Collects everything not reachable from the globals
    pub fn collect(&mut self) -> RtResult<Collection> {
        let collection = self.heap.collect(&self.globals)?;
        info!(
            target: "gc",
            "{} bytes in use after collection; {} refs in use",
            self.heap.used(),
            self.heap.refs_used()
        );
        Ok(collection)
    }

    /// Calls the builtin `name`, writing any output to stdout
    pub fn call(&mut self, name: &str, args: &[Reference]) -> Reference {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.call_with_output(name, args, &mut out)
    }

    /// Calls the builtin `name`, writing any output to `out`.
    ///
    /// The arguments are borrowed; the result is a new reference.
    pub fn call_with_output(&mut self, name: &str, args: &[Reference], out: &mut dyn Write) -> Reference {
        let result = self.builtin(name, args, out);
        self.raise_ref(result)
    }

    fn builtin(&mut self, name: &str, args: &[Reference], out: &mut dyn Write) -> RtResult<Reference> {
        match name {
            "mem" => {
                no_arguments(name, args)?;
                writeln!(
                    out,
                    "{} bytes in use; {} refs in use",
                    self.heap.used(),
                    self.heap.refs_used()
                )?;
                Ok(self.none())
            }
            "gc" => {
                no_arguments(name, args)?;
                self.collect()?;
                Ok(self.none())
            }
            "len" => {
                let value = one_argument(name, args)?;
                let len = self.heap.ref_len(value)?;
                Ok(self.heap.make_int(len as i64)?)
            }
            "bool" => {
                let value = one_argument(name, args)?;
                let truth = self.heap.ref_bool(value);
                Ok(self.bool_ref(truth))
            }
            "print" => {
                for (index, value) in args.iter().copied().enumerate() {
                    if index > 0 {
                        write!(out, " ")?;
                    }
                    write!(out, "{}", self.heap.display(value))?;
                }
                writeln!(out)?;
                Ok(self.none())
            }
            _ => Err(Exception::name_error(format!("no such function '{}'", name))),
        }
    }

    /// Writes every global binding with its reference and value
    pub fn print_globals<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        self.globals.print(&self.heap, out)
    }

    /// Writes the bindings followed by the contents of the pool
    pub fn dump<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        self.print_globals(out)?;
        writeln!(out, "\nMemory Contents:")?;
        self.heap.dump(out)
    }

    /// Drops every binding and tears down the heap
    pub fn close(mut self) {
        self.globals.clear(&mut self.heap);
        self.heap.close();
    }
}

fn no_arguments(name: &str, args: &[Reference]) -> RtResult<()> {
    if args.is_empty() {
        return Ok(());
    }
    Err(Exception::type_error(format!(
        "{}() takes 0 positional arguments but {} were given",
        name,
        args.len()
    )))
}

fn one_argument(name: &str, args: &[Reference]) -> RtResult<Reference> {
    match args {
        [value] => Ok(*value),
        _ => Err(Exception::type_error(format!(
            "{}() takes 1 positional argument but {} were given",
            name,
            args.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::config::ConfigError;
    use crate::error::ExceptionKind;
    use crate::term::Value;

    use super::*;

    fn runtime(pool_size: usize) -> Runtime {
        let _ = env_logger::builder().is_test(true).try_init();
        Runtime::new(HeapConfig::new(pool_size).with_poison(true)).unwrap()
    }

    /// The output of `mem()`
    fn mem(rt: &mut Runtime) -> String {
        let mut out = Vec::new();
        let result = rt.call_with_output("mem", &[], &mut out);
        rt.release(result);
        String::from_utf8(out).unwrap()
    }

    fn gc(rt: &mut Runtime) {
        let result = rt.call_with_output("gc", &[], &mut io::sink());
        assert!(!rt.exceptions().occurred());
        rt.release(result);
    }

    fn int_global(rt: &mut Runtime, name: &str, value: i64) {
        let int = rt.int(value);
        rt.assign(name, int);
    }

    fn take_exception(rt: &mut Runtime) -> Exception {
        match rt.exceptions_mut().take() {
            Some(exception) => exception,
            None => panic!("expected an exception to be raised"),
        }
    }

    #[test]
    fn singletons_are_bound_as_globals() {
        let mut rt = runtime(1024);
        assert_eq!(mem(&mut rt), "72 bytes in use; 3 refs in use\n");
        assert_eq!(rt.globals().len(), 3);

        let none = rt.lookup("None");
        assert!(matches!(rt.heap().value(none), Value::None));
        assert_eq!(rt.heap().refcount(none), 2);
        rt.release(none);

        let mut out = Vec::new();
        rt.print_globals(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "3 Globals:\nNone = ref 0; value None\nTrue = ref 1; value True\nFalse = ref 2; value False\n"
        );
    }

    #[test]
    fn singletons_cannot_be_unbound() {
        let mut rt = runtime(1024);
        rt.unbind("None");
        let exception = take_exception(&mut rt);
        assert_eq!(exception.kind, ExceptionKind::SyntaxError);
        assert_eq!(exception.message, "cannot delete None");

        let value = rt.int(1);
        rt.assign("True", value);
        assert_eq!(take_exception(&mut rt).message, "cannot assign to True");
        assert_eq!(mem(&mut rt), "72 bytes in use; 3 refs in use\n");
    }

    #[test]
    fn bad_configurations_are_rejected() {
        let err = Runtime::new(HeapConfig::new(16)).err().unwrap();
        assert_eq!(err, InitError::Config(ConfigError::PoolTooSmall { pool_size: 16 }));

        let err = Runtime::new(HeapConfig::new(96)).err().unwrap();
        assert!(matches!(err, InitError::Memory(_)));
    }

    #[test]
    fn self_referencing_list() {
        let mut rt = runtime(10000);
        int_global(&mut rt, "a", 5);
        assert_eq!(mem(&mut rt), "104 bytes in use; 4 refs in use\n");

        // a = [1]
        let one = rt.int(1);
        let list = rt.list(&[one]);
        rt.release(one);
        rt.assign("a", list);
        assert_eq!(mem(&mut rt), "184 bytes in use; 6 refs in use\n");

        // a[0] = a
        let a = rt.lookup("a");
        let zero = rt.int(0);
        rt.subscr_set(a, zero, a);
        rt.release(zero);
        rt.release(a);
        assert_eq!(mem(&mut rt), "152 bytes in use; 5 refs in use\n");

        gc(&mut rt);
        assert_eq!(mem(&mut rt), "152 bytes in use; 5 refs in use\n");
        let list = rt.globals().peek("a").unwrap();
        assert_eq!(rt.heap().refcount(list), 2);

        rt.unbind("a");
        assert_eq!(mem(&mut rt), "152 bytes in use; 5 refs in use\n");
        gc(&mut rt);
        assert_eq!(mem(&mut rt), "72 bytes in use; 3 refs in use\n");
    }

    #[test]
    fn cyclic_garbage_is_only_reclaimed_by_collection() {
        let mut rt = runtime(10000);
        int_global(&mut rt, "non_garbage", 123);

        // garbage = [0, non_garbage]
        let zero = rt.int(0);
        let non_garbage = rt.lookup("non_garbage");
        let list = rt.list(&[zero, non_garbage]);
        rt.release(zero);
        rt.release(non_garbage);
        rt.assign("garbage", list);

        // garbage[0] = garbage
        let garbage = rt.lookup("garbage");
        let index = rt.int(0);
        rt.subscr_set(garbage, index, garbage);
        rt.release(index);
        rt.release(garbage);
        assert_eq!(mem(&mut rt), "184 bytes in use; 6 refs in use\n");

        rt.unbind("garbage");
        assert_eq!(mem(&mut rt), "184 bytes in use; 6 refs in use\n");
        gc(&mut rt);
        assert_eq!(mem(&mut rt), "104 bytes in use; 4 refs in use\n");
        let non_garbage = rt.globals().peek("non_garbage").unwrap();
        assert_eq!(rt.heap().refcount(non_garbage), 1);

        rt.unbind("non_garbage");
        assert_eq!(mem(&mut rt), "72 bytes in use; 3 refs in use\n");
    }

    #[test]
    fn freed_blocks_are_reused_whole() {
        let mut rt = runtime(432);
        let s = rt.string("abcdefgh");
        rt.assign("s", s);
        int_global(&mut rt, "t", 10);
        assert_eq!(mem(&mut rt), "144 bytes in use; 5 refs in use\n");

        rt.unbind("s");
        assert_eq!(mem(&mut rt), "104 bytes in use; 4 refs in use\n");
        // The 40 byte hole is the best fit, and too small to split
        int_global(&mut rt, "r", 99999);
        assert_eq!(mem(&mut rt), "144 bytes in use; 5 refs in use\n");
    }

    #[test]
    fn collection_compacts_holes() {
        let mut rt = runtime(432);
        let s = rt.string("abcdefgh");
        rt.assign("s", s);
        int_global(&mut rt, "t", 10);
        rt.unbind("s");

        gc(&mut rt);
        int_global(&mut rt, "r", 99999);
        assert_eq!(mem(&mut rt), "136 bytes in use; 5 refs in use\n");
    }

    #[test]
    fn fragmentation_is_fixed_by_collection() {
        let mut rt = runtime(432);
        int_global(&mut rt, "x", 1);
        let x = rt.lookup("x");
        let list = rt.list(&[x]);
        rt.release(x);
        rt.assign("l", list);
        rt.unbind("x");

        // del l[0]
        let l = rt.lookup("l");
        let zero = rt.int(0);
        rt.subscr_del(l, zero);
        rt.release(zero);
        rt.release(l);
        assert!(!rt.exceptions().occurred());
        assert_eq!(mem(&mut rt), "152 bytes in use; 5 refs in use\n");

        let text = rt.string("this is a pretty long string");
        assert_eq!(text, Reference::NULL);
        let exception = take_exception(&mut rt);
        assert_eq!(exception.kind, ExceptionKind::MemoryError);
        assert_eq!(
            exception.message,
            "cannot service request of size 56 with 152 bytes allocated"
        );

        gc(&mut rt);
        let text = rt.string("this is a pretty long string");
        assert!(text.is_live());
        rt.assign("text", text);
        // The 8 bytes left over stay with the string
        assert_eq!(mem(&mut rt), "216 bytes in use; 6 refs in use\n");
    }

    #[test]
    fn builtins() {
        let mut rt = runtime(4096);
        let text = rt.string("four");
        let number = rt.int(0);

        let len = rt.call_with_output("len", &[text], &mut io::sink());
        assert!(matches!(rt.heap().value(len), Value::Integer(4)));
        let truth = rt.call_with_output("bool", &[number], &mut io::sink());
        assert!(matches!(rt.heap().value(truth), Value::Bool(false)));

        let list = rt.list(&[text, number]);
        let mut out = Vec::new();
        let none = rt.call_with_output("print", &[text, number, list], &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "four 0 [\"four\", 0]\n");
        assert!(matches!(rt.heap().value(none), Value::None));

        for value in [len, truth, list, none, text, number] {
            rt.release(value);
        }
        assert_eq!(rt.heap().refs_used(), 3);
    }

    #[test]
    fn builtin_errors() {
        let mut rt = runtime(4096);
        let number = rt.int(1);

        let cases = [
            ("gc", vec![number], "gc() takes 0 positional arguments but 1 were given"),
            ("mem", vec![number, number], "mem() takes 0 positional arguments but 2 were given"),
            ("len", vec![], "len() takes 1 positional argument but 0 were given"),
            ("bool", vec![number, number], "bool() takes 1 positional argument but 2 were given"),
            ("len", vec![number], "object of type 'int' has no len()"),
        ];
        for (name, args, message) in cases {
            let result = rt.call_with_output(name, &args, &mut io::sink());
            assert_eq!(result, Reference::NULL);
            let exception = take_exception(&mut rt);
            assert_eq!(exception.kind, ExceptionKind::TypeError);
            assert_eq!(exception.message, message);
        }

        let result = rt.call_with_output("input", &[], &mut io::sink());
        assert_eq!(result, Reference::NULL);
        let exception = take_exception(&mut rt);
        assert_eq!(exception.kind, ExceptionKind::NameError);
        assert_eq!(exception.message, "no such function 'input'");
    }

    #[test]
    fn failed_operations_return_null() {
        let mut rt = runtime(4096);
        let number = rt.int(1);
        let text = rt.string("1");

        assert_eq!(rt.binary(BinaryOp::Add, number, text), Reference::NULL);
        assert_eq!(take_exception(&mut rt).kind, ExceptionKind::TypeError);
        assert_eq!(rt.lookup("missing"), Reference::NULL);
        assert_eq!(take_exception(&mut rt).kind, ExceptionKind::NameError);

        let less = rt.compare(CompareOp::Less, number, number);
        assert!(!rt.truthy(less));
        let negated = rt.unary(UnaryOp::Negate, number);
        assert!(matches!(rt.heap().value(negated), Value::Integer(-1)));
        assert!(!rt.exceptions().occurred());
    }

    #[test]
    fn dict_subscripts() {
        let mut rt = runtime(4096);
        let key = rt.string("k");
        let value = rt.int(1);
        let dict = rt.dict(&[(key, value)]);
        rt.release(value);
        rt.assign("d", dict);

        let fetched = rt.subscr_get(dict, key);
        assert!(matches!(rt.heap().value(fetched), Value::Integer(1)));
        rt.release(fetched);

        rt.subscr_del(dict, key);
        assert!(!rt.exceptions().occurred());
        let missing = rt.subscr_get(dict, key);
        assert_eq!(missing, Reference::NULL);
        assert_eq!(take_exception(&mut rt).kind, ExceptionKind::KeyError);

        let mut out = Vec::new();
        let none = rt.call_with_output("print", &[dict], &mut out);
        rt.release(none);
        assert_eq!(String::from_utf8(out).unwrap(), "{}\n");
        rt.release(key);
    }

    #[test]
    fn dump_includes_the_globals() {
        let rt = runtime(1024);
        let mut out = Vec::new();
        rt.dump(&mut out).unwrap();
        let dump = String::from_utf8(out).unwrap();
        assert!(dump.starts_with("3 Globals:\n"));
        assert!(dump.contains(
            "\nMemory Contents:\nValue 0x00000000; size 24; ref 0; refcnt: 1; type = VAL_NONE; value = None\n"
        ));
        assert!(dump.ends_with("Free  0x00000048; size 440\n"));
        rt.close();
    }
}
