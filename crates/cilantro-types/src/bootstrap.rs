//! The in-memory bootstrap corlib.
//!
//! The PE reader is an external collaborator, so the runtime carries a small
//! record builder that produces the corlib the well-known set resolves
//! against: `System.Object`, `ValueType`, `Enum`, the primitives, `Array`,
//! `String`, `Exception`, and the runtime exception types with trivial
//! constructors. The same builder is what the tests assemble fixture
//! assemblies with.

use cilantro_metadata::{
    AssemblyRecords, AssemblyRow, FieldRow, MethodBodyRecord, MethodDefRow, ModuleRow, Token,
    TypeDefRow, TypeSig, encode_field_sig, encode_method_sig, table,
};
use cilantro_metadata::{FieldSig, MethodSig};

/// Incrementally assembles an [`AssemblyRecords`] bundle with correct
/// member-list ranges.
pub struct RecordsBuilder {
    records: AssemblyRecords,
}

impl RecordsBuilder {
    pub fn new(assembly_name: &str, module_name: &str) -> Self {
        Self {
            records: AssemblyRecords {
                module: ModuleRow {
                    name: module_name.to_string(),
                    mvid: [0; 16],
                },
                assembly: AssemblyRow {
                    name: assembly_name.to_string(),
                    major_version: 1,
                    ..AssemblyRow::default()
                },
                ..AssemblyRecords::default()
            },
        }
    }

    /// Add a type with its members; returns the TypeDef token.
    pub fn add_type(
        &mut self,
        namespace: &str,
        name: &str,
        flags: u32,
        extends: Token,
        fields: Vec<FieldRow>,
        methods: Vec<MethodDefRow>,
    ) -> Token {
        let field_start = self.records.fields.len() as u32 + 1;
        let method_start = self.records.methods.len() as u32 + 1;
        let row = TypeDefRow {
            flags,
            name: name.to_string(),
            namespace: namespace.to_string(),
            extends,
            field_start,
            field_count: fields.len() as u32,
            method_start,
            method_count: methods.len() as u32,
        };
        self.records.fields.extend(fields);
        self.records.methods.extend(methods);
        self.records.type_defs.push(row);
        Token::new(table::TYPE_DEF, self.records.type_defs.len() as u32)
    }

    pub fn add_user_string(&mut self, index: u32, value: &str) {
        self.records.user_strings.push((index, value.to_string()));
    }

    pub fn records_mut(&mut self) -> &mut AssemblyRecords {
        &mut self.records
    }

    pub fn finish(self) -> AssemblyRecords {
        self.records
    }
}

/// Encoded `instance void ()` signature.
pub fn ctor_sig() -> Vec<u8> {
    encode_method_sig(&MethodSig {
        has_this: true,
        explicit_this: false,
        vararg: false,
        generic_params: 0,
        return_type: None,
        params: vec![],
    })
}

pub fn static_sig(return_type: Option<TypeSig>, params: Vec<TypeSig>) -> Vec<u8> {
    encode_method_sig(&MethodSig {
        has_this: false,
        explicit_this: false,
        vararg: false,
        generic_params: 0,
        return_type,
        params,
    })
}

pub fn instance_sig(return_type: Option<TypeSig>, params: Vec<TypeSig>) -> Vec<u8> {
    encode_method_sig(&MethodSig {
        has_this: true,
        explicit_this: false,
        vararg: false,
        generic_params: 0,
        return_type,
        params,
    })
}

pub fn field_sig(ty: TypeSig) -> Vec<u8> {
    encode_field_sig(&FieldSig(ty))
}

/// A method row with an IL body and default ranges.
pub fn method(name: &str, flags: u16, signature: Vec<u8>, il: Vec<u8>) -> MethodDefRow {
    MethodDefRow {
        impl_flags: 0,
        flags,
        name: name.to_string(),
        signature,
        param_start: 1,
        param_count: 0,
        body: Some(MethodBodyRecord::new(il)),
    }
}

pub mod flags {
    /// public | hidebysig
    pub const PUBLIC_METHOD: u16 = 0x0086;
    /// public | hidebysig | static
    pub const PUBLIC_STATIC_METHOD: u16 = 0x0096;
    /// public | hidebysig | specialname | rtspecialname
    pub const CTOR: u16 = 0x1886;
    /// public | hidebysig | virtual
    pub const PUBLIC_VIRTUAL_METHOD: u16 = 0x00c6;
    /// public | hidebysig | virtual | newslot
    pub const PUBLIC_NEW_VIRTUAL_METHOD: u16 = 0x01c6;
    /// public | hidebysig | virtual | newslot | abstract
    pub const ABSTRACT_VIRTUAL_METHOD: u16 = 0x05c6;

    pub const PUBLIC_CLASS: u32 = 0x0000_0001;
    pub const PUBLIC_SEALED_CLASS: u32 = 0x0000_0101;
    pub const PUBLIC_INTERFACE: u32 = 0x0000_00a1;
    pub const PUBLIC_ABSTRACT_CLASS: u32 = 0x0000_0081;

    pub const PRIVATE_FIELD: u16 = 0x0001;
    pub const PUBLIC_FIELD: u16 = 0x0006;
    pub const PUBLIC_STATIC_FIELD: u16 = 0x0016;
}

fn value_type(b: &mut RecordsBuilder, name: &str, extends: Token) -> Token {
    b.add_type(
        "System",
        name,
        flags::PUBLIC_SEALED_CLASS,
        extends,
        vec![],
        vec![],
    )
}

fn exception_type(b: &mut RecordsBuilder, name: &str, extends: Token) -> Token {
    b.add_type(
        "System",
        name,
        flags::PUBLIC_CLASS,
        extends,
        vec![],
        // ret
        vec![method(".ctor", flags::CTOR, ctor_sig(), vec![0x2a])],
    )
}

/// Build the bootstrap corlib records.
pub fn corlib() -> AssemblyRecords {
    let mut b = RecordsBuilder::new("Corelib", "Corelib.dll");

    let object = b.add_type(
        "System",
        "Object",
        flags::PUBLIC_CLASS,
        Token::NULL,
        vec![],
        vec![method(".ctor", flags::CTOR, ctor_sig(), vec![0x2a])],
    );
    let value_type_tok = b.add_type(
        "System",
        "ValueType",
        flags::PUBLIC_ABSTRACT_CLASS,
        object,
        vec![],
        vec![],
    );
    b.add_type(
        "System",
        "Enum",
        flags::PUBLIC_ABSTRACT_CLASS,
        value_type_tok,
        vec![],
        vec![],
    );
    b.add_type(
        "System",
        "Array",
        flags::PUBLIC_ABSTRACT_CLASS,
        object,
        vec![FieldRow {
            flags: flags::PRIVATE_FIELD,
            name: "length".to_string(),
            signature: field_sig(TypeSig::I4),
        }],
        vec![],
    );
    b.add_type(
        "System",
        "String",
        flags::PUBLIC_SEALED_CLASS,
        object,
        vec![FieldRow {
            flags: flags::PRIVATE_FIELD,
            name: "length".to_string(),
            signature: field_sig(TypeSig::I4),
        }],
        vec![],
    );

    for name in [
        "Boolean", "Char", "SByte", "Byte", "Int16", "UInt16", "Int32", "UInt32", "Int64",
        "UInt64", "Single", "Double", "IntPtr", "UIntPtr",
    ] {
        value_type(&mut b, name, value_type_tok);
    }

    let exception = exception_type(&mut b, "Exception", object);
    let arithmetic = exception_type(&mut b, "ArithmeticException", exception);
    exception_type(&mut b, "DivideByZeroException", arithmetic);
    exception_type(&mut b, "OverflowException", arithmetic);
    exception_type(&mut b, "ExecutionEngineException", exception);
    exception_type(&mut b, "IndexOutOfRangeException", exception);
    exception_type(&mut b, "NullReferenceException", exception);
    exception_type(&mut b, "InvalidCastException", exception);
    exception_type(&mut b, "OutOfMemoryException", exception);

    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Universe;

    #[test]
    fn corlib_loads_and_resolves_well_known() {
        let universe = Universe::new();
        universe.load_assembly(corlib()).unwrap();
        let wk = universe.well_known();
        assert_eq!(universe.type_name(wk.object), "Object");
        assert!(universe.is_value_type(wk.int32));
        assert!(!universe.is_value_type(wk.string));
    }

    #[test]
    fn primitive_layouts_are_fixed() {
        let universe = Universe::new();
        universe.load_assembly(corlib()).unwrap();
        let wk = universe.well_known();
        assert_eq!(universe.stack_size(wk.int32), 4);
        assert_eq!(universe.stack_size(wk.int64), 8);
        assert_eq!(universe.stack_size(wk.boolean), 1);
        assert_eq!(universe.stack_size(wk.char), 2);
        assert_eq!(universe.stack_size(wk.intptr), 8);
        assert_eq!(universe.stack_size(wk.double), 8);
    }

    #[test]
    fn array_layout_puts_length_after_header() {
        let universe = Universe::new();
        universe.load_assembly(corlib()).unwrap();
        let wk = universe.well_known();
        // header (8) + i32 length, rounded to pointer alignment
        assert_eq!(universe.managed_size(wk.array), 16);
        let length_field = universe.with_type(wk.array, |t| t.fields[0]);
        assert_eq!(universe.field_offset(length_field), 8);
    }

    #[test]
    fn exception_hierarchy_reaches_exception() {
        let universe = Universe::new();
        universe.load_assembly(corlib()).unwrap();
        let wk = universe.well_known();
        assert!(universe.compatible_with(wk.divide_by_zero_exception, wk.arithmetic_exception));
        assert!(universe.compatible_with(wk.divide_by_zero_exception, wk.exception));
        assert!(!universe.compatible_with(wk.exception, wk.divide_by_zero_exception));
        assert!(universe.default_ctor(wk.out_of_memory_exception).is_some());
    }
}
