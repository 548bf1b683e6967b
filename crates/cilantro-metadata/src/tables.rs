//! Raw metadata table rows.
//!
//! These are the records the external PE/metadata reader hands the runtime:
//! strings already fetched from the heaps, signatures as owned blobs, tokens
//! still raw. Row layouts follow the physical tables (ECMA-335 II.22), with
//! list columns expressed as explicit start/count ranges into the sibling
//! table (1-based, like the tokens that address them).

use crate::{MethodBodyRecord, Token};

#[derive(Debug, Clone, Default)]
pub struct ModuleRow {
    pub name: String,
    pub mvid: [u8; 16],
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyRow {
    pub name: String,
    pub culture: String,
    pub major_version: u16,
    pub minor_version: u16,
    pub build_number: u16,
    pub revision_number: u16,
    pub flags: u32,
}

#[derive(Debug, Clone)]
pub struct AssemblyRefRow {
    pub name: String,
    pub major_version: u16,
    pub minor_version: u16,
    pub build_number: u16,
    pub revision_number: u16,
    pub flags: u32,
}

#[derive(Debug, Clone)]
pub struct TypeDefRow {
    pub flags: u32,
    pub name: String,
    pub namespace: String,
    pub extends: Token,
    pub field_start: u32,
    pub field_count: u32,
    pub method_start: u32,
    pub method_count: u32,
}

#[derive(Debug, Clone)]
pub struct TypeRefRow {
    pub resolution_scope: Token,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct TypeSpecRow {
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FieldRow {
    pub flags: u16,
    pub name: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MethodDefRow {
    pub impl_flags: u16,
    pub flags: u16,
    pub name: String,
    pub signature: Vec<u8>,
    pub param_start: u32,
    pub param_count: u32,
    pub body: Option<MethodBodyRecord>,
}

#[derive(Debug, Clone)]
pub struct ParamRow {
    pub flags: u16,
    pub sequence: u16,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MemberRefRow {
    pub class: Token,
    pub name: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InterfaceImplRow {
    pub class: Token,
    pub interface: Token,
}

#[derive(Debug, Clone)]
pub struct ClassLayoutRow {
    pub packing_size: u16,
    pub class_size: u32,
    pub parent: Token,
}

#[derive(Debug, Clone)]
pub struct FieldLayoutRow {
    pub offset: u32,
    pub field: Token,
}

#[derive(Debug, Clone)]
pub struct NestedClassRow {
    pub nested: Token,
    pub enclosing: Token,
}

#[derive(Debug, Clone)]
pub struct GenericParamRow {
    pub number: u16,
    pub flags: u16,
    pub owner: Token,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MethodImplRow {
    pub class: Token,
    pub method_body: Token,
    pub method_declaration: Token,
}

/// Everything the reader decoded for one assembly image.
#[derive(Debug, Clone, Default)]
pub struct AssemblyRecords {
    pub module: ModuleRow,
    pub assembly: AssemblyRow,
    pub assembly_refs: Vec<AssemblyRefRow>,
    pub type_defs: Vec<TypeDefRow>,
    pub type_refs: Vec<TypeRefRow>,
    pub type_specs: Vec<TypeSpecRow>,
    pub fields: Vec<FieldRow>,
    pub methods: Vec<MethodDefRow>,
    pub params: Vec<ParamRow>,
    pub member_refs: Vec<MemberRefRow>,
    pub interface_impls: Vec<InterfaceImplRow>,
    pub class_layouts: Vec<ClassLayoutRow>,
    pub field_layouts: Vec<FieldLayoutRow>,
    pub nested_classes: Vec<NestedClassRow>,
    pub generic_params: Vec<GenericParamRow>,
    pub method_impls: Vec<MethodImplRow>,
    /// User-string heap entries keyed by the token index (table 0x70).
    pub user_strings: Vec<(u32, String)>,
}
