//! # cilantro-mir
//!
//! The medium-level IR the JIT emits into. This crate carries the
//! construction API the translator consumes (modules, functions, prototypes,
//! instruction building, bss, import/export), a deterministic text form, the
//! module linker, and a reference evaluator that executes linked modules.
//!
//! The native code generator proper is an external collaborator: it consumes
//! the same linked form this crate hands to the evaluator.

mod error;
mod insn;
mod interp;
mod link;
mod module;
mod text;

pub use error::MirError;
pub use insn::{Insn, InsnCode, Label, MemOp, MirType, Op, Reg};
pub use interp::{Machine, Value};
pub use link::{
    ExecFunc, FUNC_ADDR_BASE, GlobalLinker, HOST_ADDR_BASE, HostFn, LinkedProgram,
};
pub use module::{Func, Item, ItemRef, MirVar, Module, Proto, RegClass};
