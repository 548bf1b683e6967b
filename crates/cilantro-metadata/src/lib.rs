//! # cilantro-metadata
//!
//! The metadata boundary of the runtime: the raw table records an external
//! PE reader produces, the CLI signature blob decoder/encoder, method bodies
//! with their exception-handling clauses, and the CIL instruction decoder.
//!
//! Nothing in this crate resolves names or builds types; that is the
//! materializer's job in `cilantro-types`. Records are plain data and the
//! decoders never mutate their input.

mod body;
mod error;
mod opcode;
mod signature;
mod tables;
mod token;

pub use body::{EhClauseRecord, EhKind, MethodBodyRecord};
pub use error::MetadataError;
pub use opcode::{CilOp, ControlFlow, InsnDecoder, OpCode, Operand, OperandKind};
pub use signature::{
    FieldSig, LocalsSig, MethodSig, TypeSig, encode_field_sig, encode_locals_sig,
    encode_method_sig, encode_type_spec, parse_field_sig, parse_locals_sig, parse_method_sig,
    parse_type_spec,
};
pub use tables::{
    AssemblyRecords, AssemblyRefRow, AssemblyRow, ClassLayoutRow, FieldLayoutRow, FieldRow,
    GenericParamRow, InterfaceImplRow, MemberRefRow, MethodDefRow, MethodImplRow, ModuleRow,
    NestedClassRow, ParamRow, TypeDefRow, TypeRefRow, TypeSpecRow,
};
pub use token::{Token, table};
