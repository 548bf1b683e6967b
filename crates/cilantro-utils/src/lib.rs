//! Shared building blocks for the cilantro runtime crates.
//!
//! Low-level crates depend on this instead of each other: the sync facade
//! keeps single-threaded and multi-threaded builds source-compatible, and the
//! index newtypes give the arena-based type universe stable, typed handles.

mod newtypes;
pub mod sync;

pub use newtypes::{AssemblyId, FieldId, MethodId, TypeId};
