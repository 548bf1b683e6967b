//! The cilantro managed-runtime core: CLI metadata materialization and a
//! verifying CIL-to-MIR JIT.
//!
//! This crate re-exports the workspace pieces and carries the demo assembly
//! the driver binary loads next to the bootstrap corlib.

pub use cilantro_jit as jit;
pub use cilantro_metadata as metadata;
pub use cilantro_mir as mir;
pub use cilantro_types as types;

pub mod demo;
