//! # cilantro-types
//!
//! The in-memory type universe. Raw metadata records go in, a coherent graph
//! of types, methods, and fields comes out: two-phase setup/fill
//! materialization, field layout, vtable construction, generic instantiation,
//! and the pure type-relation functions the verifier is built on.
//!
//! Types live in an arena keyed by stable handles ([`cilantro_utils::TypeId`]
//! and friends); ownership runs from assemblies to their members, never
//! between types, because the graph is cyclic.

pub mod bootstrap;
mod dump;
mod error;
mod generics;
pub mod layout;
mod loader;
mod members;
mod relations;
mod ty;
mod universe;

pub use error::TypeLoadError;
pub use members::{
    ClauseKind, ExceptionClause, Field, FieldFlags, LocalVariable, MemberAccess, MemberRef, Method,
    MethodBody, MethodCodeType, MethodFlags, MethodImplFlags, Param,
};
pub use ty::{InterfaceImpl, StackType, Type, TypeFlags, TypeVisibility};
pub use universe::{Assembly, Universe, WellKnown};

pub use cilantro_utils::{AssemblyId, FieldId, MethodId, TypeId};
