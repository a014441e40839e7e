//! Tiro runtime: managed heap, tracing collector, coroutine interpreter.
//!
//! The [`Context`] is the entry point. A typical embedding loads compiled
//! modules, fetches an exported function and runs it:
//!
//! ```no_run
//! use tiro_runtime::{Context, Scope, TypedValue};
//!
//! let mut ctx = Context::new();
//! ctx.load_std_module().unwrap();
//! # let compiled: tiro_core::CompiledModule = unimplemented!();
//! let scope = Scope::new(&mut ctx);
//! let module = scope.local(ctx.load_module(&compiled).unwrap());
//! let entry = scope.local(module.get().exported_member(ctx.get_symbol("main")).unwrap());
//! let result = ctx.run(entry.handle()).unwrap();
//! ```
//!
//! Key design points:
//! - Values are tagged machine words (null / embedded small integer / heap
//!   pointer); objects never move, and a simple mark-and-sweep collector
//!   reclaims them based on allocation thresholds.
//! - Every value that lives across an allocation must be rooted through the
//!   handle system ([`Scope`]/[`Local`], [`Global`]) — any allocation is a
//!   potential collection.
//! - Execution is single-threaded and cooperative; coroutines only suspend
//!   at async native calls, and cross-thread completions post onto the
//!   context's event loop.

pub mod context;
pub mod error;
pub mod eventloop;
pub mod handles;
pub mod hash;
pub mod heap;
pub mod interpreter;
pub mod load;
pub mod math;
pub mod module_builder;
pub mod objects;
pub mod stdlib;
pub mod types;
pub mod value;

pub use context::{Context, ContextConfig};
pub use error::{ErrorKind, RuntimeError};
pub use handles::{Global, Handle, Local, Scope};
pub use heap::collector::GcTrigger;
pub use module_builder::ModuleBuilder;
pub use value::{equal, format_value, hash as value_hash, TypedValue, Value, ValueType};

pub use objects::arrays::Array;
pub use objects::buffers::Buffer;
pub use objects::classes::{DynamicObject, Method};
pub use objects::coroutines::{Coroutine, CoroutineStack, CoroutineState, FrameKind};
pub use objects::functions::{BoundMethod, Code, Environment, Function, FunctionTemplate};
pub use objects::hash_tables::{HashTable, HashTableIterator};
pub use objects::modules::Module;
pub use objects::native::{
    AsyncResumer, NativeAsyncFrame, NativeAsyncFunction, NativeFrame, NativeFunction,
    NativeObject, NativePointer,
};
pub use objects::primitives::{Boolean, Float, Integer, SmallInt, Undefined};
pub use objects::strings::{StringBuilder, Symbol, TiroString};
pub use objects::tuples::Tuple;
