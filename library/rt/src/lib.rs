//! The Subpython runtime memory core.
//!
//! Every runtime value lives inside a single fixed-size pool managed by a
//! [`Heap`]. Values are never addressed directly; the evaluator holds opaque
//! [`Reference`]s which are resolved through a reference table, so that the
//! copying collector can relocate values underneath them.
//!
//! Reclamation is two-tiered:
//!
//! * reference counting frees a value the moment its last owner releases it;
//! * a semispace collector, invoked on demand, evacuates everything reachable
//!   from the [`RootSet`](gc::RootSet) into the other half of the pool, which
//!   reclaims cycles and compacts the heap as a side effect.
//!
//! [`Runtime`] bundles a heap with its global bindings, the `None`/`True`/`False`
//! singletons and the exception channel, and is what an evaluator embeds.
pub mod config;
pub mod error;
pub mod gc;
pub mod globals;
pub mod heap;
pub mod printer;
pub mod refs;
pub mod runtime;
pub mod term;

pub use self::config::{ConfigError, HeapConfig};
pub use self::error::{Exception, ExceptionKind, Exceptions, InitError, RtResult};
pub use self::gc::{Collection, GcError, RootSet};
pub use self::globals::Globals;
pub use self::heap::Heap;
pub use self::printer::ValueDisplay;
pub use self::refs::Reference;
pub use self::runtime::Runtime;
pub use self::term::{Value, ValueType};

pub use subpython_alloc::MemoryError;
