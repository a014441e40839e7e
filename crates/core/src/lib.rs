//! Tiro compiled module format.
//!
//! This crate is the contract between compiler back ends and the runtime:
//! the opcode set with its operand encodings, the in-memory model of a
//! compiled module (members, functions, exports), a builder for producing
//! modules programmatically, and the pinned big-endian wire format.
//!
//! The runtime consumes [`CompiledModule`] values; how they were produced
//! (a compiler, the builder, or [`decode_module`]) is irrelevant to it.

pub mod format;
pub mod module;
pub mod opcode;
pub mod writer;

pub use format::{decode_module, encode_module};
pub use module::{
    CompiledFunction, CompiledModule, FunctionId, FunctionKind, MemberId, ModuleError,
    ModuleMember, MAX_MODULE_MEMBERS,
};
pub use opcode::Opcode;
pub use writer::{BytecodeWriter, CompiledModuleBuilder, FunctionBuilder, Label};
