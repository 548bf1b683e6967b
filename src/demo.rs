//! A small hand-assembled demo assembly for the driver: `Demo.Program`
//! with a `Main` that sums the integers below ten in a loop, exercising
//! locals, a backward branch, and the two-slot return.

use cilantro_metadata::{
    AssemblyRecords, LocalsSig, MethodDefRow, Token, TypeRefRow, TypeSig, encode_locals_sig,
    table,
};
use cilantro_types::bootstrap::{self, RecordsBuilder, flags};

pub const ASSEMBLY_NAME: &str = "Demo";
pub const PROGRAM_NAMESPACE: &str = "Demo";
pub const PROGRAM_TYPE: &str = "Program";
pub const MAIN_METHOD: &str = "Main";

pub fn records() -> AssemblyRecords {
    let mut b = RecordsBuilder::new(ASSEMBLY_NAME, "Demo.dll");

    // System.Object comes from the corlib
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".to_string(),
        namespace: "System".to_string(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    // int Main():
    //   sum = 0; for (i = 0; i < 10; i++) sum += i; return sum;
    let il = vec![
        0x16, // ldc.i4.0
        0x0a, // stloc.0
        0x16, // ldc.i4.0
        0x0b, // stloc.1
        0x2b, 0x08, // br.s IL_000e
        0x06, // ldloc.0
        0x07, // ldloc.1
        0x58, // add
        0x0a, // stloc.0
        0x07, // ldloc.1
        0x17, // ldc.i4.1
        0x58, // add
        0x0b, // stloc.1
        0x07, // ldloc.1
        0x1f, 0x0a, // ldc.i4.s 10
        0x32, 0xf3, // blt.s IL_0006
        0x2a, // ret
    ];

    let mut main = bootstrap::method(
        MAIN_METHOD,
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    if let Some(body) = &mut main.body {
        body.locals_signature = Some(encode_locals_sig(&LocalsSig(vec![
            TypeSig::I4,
            TypeSig::I4,
        ])));
        body.max_stack = 4;
    }

    let methods: Vec<MethodDefRow> = vec![main];
    b.add_type(
        PROGRAM_NAMESPACE,
        PROGRAM_TYPE,
        flags::PUBLIC_CLASS,
        object,
        vec![],
        methods,
    );

    b.finish()
}
