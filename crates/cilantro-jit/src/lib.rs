//! # cilantro-jit
//!
//! The CIL-to-MIR JIT. Per method, a verifying single-pass translator walks
//! the IL while simulating the evaluation stack, resolves implicit numeric
//! and reference conversions, threads exception-handling control flow, and
//! lowers object-model operations against the runtime's object layout. Per
//! assembly, the driver pre-declares prototypes and externs, drives the
//! per-method translation, links the module, and publishes vtables.
//!
//! Every function compiles to the two-slot return convention: the first
//! result is the in-flight exception (null on normal return), the second the
//! actual return value.

mod disasm;
mod driver;
mod error;
mod runtime;
mod stack;
pub mod thread;
mod translate;

pub use disasm::disassemble;
pub use driver::JitDriver;
pub use error::JitError;
pub use runtime::{BumpHeap, Runtime, TYPE_HANDLE_BASE, handle_type, type_handle};

/// Object header and vtable layout shared between the translator and the
/// runtime helpers.
pub mod object {
    pub use cilantro_types::layout::{
        ARRAY_LENGTH_OFFSET, FAT_POINTER_SIZE, OBJECT_HEADER_SIZE, POINTER_SIZE,
        VTABLE_FUNCTIONS_OFFSET, VTABLE_TYPE_OFFSET,
    };
}
