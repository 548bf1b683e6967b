//! Whole-pipeline integration: records in, linked code out, results checked
//! through the evaluator.

use cilantro::demo;
use cilantro_jit::{JitDriver, Runtime};
use cilantro_metadata::{InterfaceImplRow, MethodDefRow, Token, TypeRefRow, TypeSig, table};
use cilantro_mir::{GlobalLinker, Value};
use cilantro_types::bootstrap::{self, RecordsBuilder, flags};
use cilantro_types::{AssemblyId, Universe};
use std::sync::Arc;

struct Session {
    universe: Arc<Universe>,
    driver_parts: (GlobalLinker, Arc<Runtime>),
    assembly: AssemblyId,
}

fn load_and_jit(records: cilantro_metadata::AssemblyRecords) -> Session {
    let universe = Arc::new(Universe::new());
    universe.load_assembly(bootstrap::corlib()).unwrap();
    let assembly = universe.load_assembly(records).unwrap();

    let linker = GlobalLinker::new();
    let runtime = Runtime::new(universe.clone());
    runtime.install(&linker);
    {
        let driver = JitDriver::new(&universe, &linker, &runtime);
        driver.jit_assembly(AssemblyId(0)).unwrap();
        driver.jit_assembly(assembly).unwrap();
    }
    Session {
        universe,
        driver_parts: (linker, runtime),
        assembly,
    }
}

fn call(session: &Session, namespace: &str, ty: &str, method: &str) -> (i64, Option<Value>) {
    let (linker, runtime) = (&session.driver_parts.0, &session.driver_parts.1);
    let driver = JitDriver::new(&session.universe, linker, runtime);
    let program = linker.link().unwrap();
    let tid = session
        .universe
        .find_type(session.assembly, namespace, ty)
        .unwrap();
    let mid = session
        .universe
        .with_type(tid, |t| t.methods.clone())
        .into_iter()
        .find(|&m| session.universe.method_name(m) == method)
        .unwrap();
    let (exception, value) = driver.call_method(&program, mid, &[]).unwrap();
    (exception.as_i64(), value)
}

#[test]
fn demo_assembly_sums_a_loop() {
    let session = load_and_jit(demo::records());
    let (exception, value) = call(&session, "Demo", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(45));
}

#[test]
fn virtual_dispatch_picks_the_override() {
    let mut b = RecordsBuilder::new("Virt", "Virt.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    let base = b.add_type(
        "Tests",
        "Base",
        flags::PUBLIC_CLASS,
        object,
        vec![],
        vec![
            bootstrap::method(".ctor", flags::CTOR, bootstrap::ctor_sig(), vec![0x2a]),
            bootstrap::method(
                "M",
                flags::PUBLIC_NEW_VIRTUAL_METHOD,
                bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
                vec![0x17, 0x2a], // return 1
            ),
        ],
    );
    b.add_type(
        "Tests",
        "Derived",
        flags::PUBLIC_CLASS,
        base,
        vec![],
        vec![
            bootstrap::method(".ctor", flags::CTOR, bootstrap::ctor_sig(), vec![0x2a]),
            bootstrap::method(
                "M",
                flags::PUBLIC_VIRTUAL_METHOD,
                bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
                vec![0x18, 0x2a], // return 2
            ),
        ],
    );

    // static int Main() { return new Derived().M(); }
    let mut il = vec![0x73];
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 3).as_raw().to_le_bytes());
    il.push(0x6f);
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 2).as_raw().to_le_bytes());
    il.push(0x2a);
    let main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    b.add_type("Tests", "Program", flags::PUBLIC_CLASS, object, vec![], vec![main]);

    let session = load_and_jit(b.finish());
    let (exception, value) = call(&session, "Tests", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(2));
}

#[test]
fn interface_dispatch_through_a_fat_pointer() {
    let mut b = RecordsBuilder::new("Iface", "Iface.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    let iface = b.add_type(
        "Tests",
        "IGreet",
        flags::PUBLIC_INTERFACE,
        Token::NULL,
        vec![],
        vec![MethodDefRow {
            impl_flags: 0,
            flags: flags::ABSTRACT_VIRTUAL_METHOD,
            name: "Greet".into(),
            signature: bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
            param_start: 1,
            param_count: 0,
            body: None,
        }],
    );
    let class = b.add_type(
        "Tests",
        "Greeter",
        flags::PUBLIC_CLASS,
        object,
        vec![],
        vec![
            bootstrap::method(".ctor", flags::CTOR, bootstrap::ctor_sig(), vec![0x2a]),
            bootstrap::method(
                "Greet",
                flags::PUBLIC_NEW_VIRTUAL_METHOD,
                bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
                vec![0x1f, 0x2a, 0x2a], // return 42
            ),
        ],
    );
    b.records_mut().interface_impls.push(InterfaceImplRow {
        class,
        interface: iface,
    });

    // static int Main() { return new Greeter().Greet() via IGreet; }
    // newobj Greeter::.ctor; callvirt IGreet::Greet; ret
    let mut il = vec![0x73];
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 2).as_raw().to_le_bytes());
    il.push(0x6f);
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 1).as_raw().to_le_bytes());
    il.push(0x2a);
    let main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    b.add_type("Tests", "Program", flags::PUBLIC_CLASS, object, vec![], vec![main]);

    let session = load_and_jit(b.finish());
    let (exception, value) = call(&session, "Tests", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(42));
}

#[test]
fn starg_rebinds_an_interface_argument() {
    let mut b = RecordsBuilder::new("Rebind", "Rebind.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    let iface = b.add_type(
        "Tests",
        "IGreet",
        flags::PUBLIC_INTERFACE,
        Token::NULL,
        vec![],
        vec![MethodDefRow {
            impl_flags: 0,
            flags: flags::ABSTRACT_VIRTUAL_METHOD,
            name: "Greet".into(),
            signature: bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
            param_start: 1,
            param_count: 0,
            body: None,
        }],
    );
    let greeter = |b: &mut RecordsBuilder, name: &str, result: u8| {
        let class = b.add_type(
            "Tests",
            name,
            flags::PUBLIC_CLASS,
            object,
            vec![],
            vec![
                bootstrap::method(".ctor", flags::CTOR, bootstrap::ctor_sig(), vec![0x2a]),
                bootstrap::method(
                    "Greet",
                    flags::PUBLIC_NEW_VIRTUAL_METHOD,
                    bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
                    vec![0x1f, result, 0x2a],
                ),
            ],
        );
        b.records_mut().interface_impls.push(InterfaceImplRow {
            class,
            interface: iface,
        });
    };
    greeter(&mut b, "Greeter", 1);
    greeter(&mut b, "Greeter2", 2);

    // static int Helper(IGreet g) { g = new Greeter2(); return g.Greet(); }
    let mut il = vec![0x73];
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 4).as_raw().to_le_bytes());
    il.extend_from_slice(&[0x10, 0x00]); // starg.s 0
    il.push(0x02); // ldarg.0
    il.push(0x6f); // callvirt IGreet::Greet
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 1).as_raw().to_le_bytes());
    il.push(0x2a);
    let helper = bootstrap::method(
        "Helper",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![TypeSig::Class(iface)]),
        il,
    );

    // static int Main() { return Helper(new Greeter()); }
    let mut il = vec![0x73];
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 2).as_raw().to_le_bytes());
    il.push(0x28); // call Helper
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 6).as_raw().to_le_bytes());
    il.push(0x2a);
    let main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    b.add_type(
        "Tests",
        "Program",
        flags::PUBLIC_CLASS,
        object,
        vec![],
        vec![helper, main],
    );

    // the rebound argument must carry Greeter2's fat pointer, not a single
    // word of it
    let session = load_and_jit(b.finish());
    let (exception, value) = call(&session, "Tests", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(2));
}

#[test]
fn static_fields_round_trip() {
    let mut b = RecordsBuilder::new("Statics", "Statics.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    // static int Main() { counter = 11; return counter + 1; }
    let mut il = vec![0x1f, 0x0b, 0x80];
    il.extend_from_slice(&Token::new(table::FIELD, 1).as_raw().to_le_bytes());
    il.push(0x7e);
    il.extend_from_slice(&Token::new(table::FIELD, 1).as_raw().to_le_bytes());
    il.extend_from_slice(&[0x17, 0x58, 0x2a]);
    let main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    b.add_type(
        "Tests",
        "Program",
        flags::PUBLIC_CLASS,
        object,
        vec![cilantro_metadata::FieldRow {
            flags: flags::PUBLIC_STATIC_FIELD,
            name: "counter".into(),
            signature: bootstrap::field_sig(TypeSig::I4),
        }],
        vec![main],
    );

    let session = load_and_jit(b.finish());
    let (exception, value) = call(&session, "Tests", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(12));
}

#[test]
fn instance_fields_store_and_load() {
    let mut b = RecordsBuilder::new("Fields", "Fields.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    // static int Main() { var h = new Holder(); h.x = 9; return h.x; }
    // locals: [0] Holder
    let mut il = vec![0x73];
    il.extend_from_slice(&Token::new(table::METHOD_DEF, 1).as_raw().to_le_bytes());
    il.push(0x0a); // stloc.0
    il.push(0x06); // ldloc.0
    il.extend_from_slice(&[0x1f, 0x09]); // ldc.i4.s 9
    il.push(0x7d); // stfld
    il.extend_from_slice(&Token::new(table::FIELD, 1).as_raw().to_le_bytes());
    il.push(0x06); // ldloc.0
    il.push(0x7b); // ldfld
    il.extend_from_slice(&Token::new(table::FIELD, 1).as_raw().to_le_bytes());
    il.push(0x2a);

    let mut main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    if let Some(body) = &mut main.body {
        body.locals_signature = Some(cilantro_metadata::encode_locals_sig(
            &cilantro_metadata::LocalsSig(vec![TypeSig::Class(Token::new(table::TYPE_DEF, 1))]),
        ));
    }

    b.add_type(
        "Tests",
        "Holder",
        flags::PUBLIC_CLASS,
        object,
        vec![cilantro_metadata::FieldRow {
            flags: flags::PUBLIC_FIELD,
            name: "x".into(),
            signature: bootstrap::field_sig(TypeSig::I4),
        }],
        vec![bootstrap::method(
            ".ctor",
            flags::CTOR,
            bootstrap::ctor_sig(),
            vec![0x2a],
        )],
    );
    b.add_type("Tests", "Program", flags::PUBLIC_CLASS, object, vec![], vec![main]);

    let session = load_and_jit(b.finish());
    let (exception, value) = call(&session, "Tests", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(9));
}

#[test]
fn array_elements_round_trip() {
    let mut b = RecordsBuilder::new("Arrays", "Arrays.dll");
    b.records_mut().type_refs.extend([
        TypeRefRow {
            resolution_scope: Token::NULL,
            name: "Object".into(),
            namespace: "System".into(),
        },
        TypeRefRow {
            resolution_scope: Token::NULL,
            name: "Int32".into(),
            namespace: "System".into(),
        },
    ]);
    let object = Token::new(table::TYPE_REF, 1);
    let int32 = Token::new(table::TYPE_REF, 2);

    // static int Main() { var a = new int[3]; a[1] = 21; return a[1] * 2; }
    let mut il = vec![0x19, 0x8d]; // ldc.i4.3 newarr
    il.extend_from_slice(&int32.as_raw().to_le_bytes());
    il.push(0x0a); // stloc.0
    il.push(0x06); // ldloc.0
    il.push(0x17); // ldc.i4.1
    il.extend_from_slice(&[0x1f, 0x15]); // ldc.i4.s 21
    il.push(0x9e); // stelem.i4
    il.push(0x06); // ldloc.0
    il.push(0x17); // ldc.i4.1
    il.push(0x94); // ldelem.i4
    il.push(0x18); // ldc.i4.2
    il.push(0x5a); // mul
    il.push(0x2a); // ret

    let mut main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    if let Some(body) = &mut main.body {
        body.locals_signature = Some(cilantro_metadata::encode_locals_sig(
            &cilantro_metadata::LocalsSig(vec![TypeSig::SzArray(Box::new(TypeSig::I4))]),
        ));
    }
    b.add_type("Tests", "Program", flags::PUBLIC_CLASS, object, vec![], vec![main]);

    let session = load_and_jit(b.finish());
    let (exception, value) = call(&session, "Tests", "Program", "Main");
    assert_eq!(exception, 0);
    assert_eq!(value.map(|v| v.as_i64()), Some(42));
}

#[test]
fn out_of_range_index_raises() {
    let mut b = RecordsBuilder::new("Bounds", "Bounds.dll");
    b.records_mut().type_refs.extend([
        TypeRefRow {
            resolution_scope: Token::NULL,
            name: "Object".into(),
            namespace: "System".into(),
        },
        TypeRefRow {
            resolution_scope: Token::NULL,
            name: "Int32".into(),
            namespace: "System".into(),
        },
    ]);
    let object = Token::new(table::TYPE_REF, 1);
    let int32 = Token::new(table::TYPE_REF, 2);

    // static int Main() { var a = new int[1]; return a[5]; }
    let mut il = vec![0x17, 0x8d];
    il.extend_from_slice(&int32.as_raw().to_le_bytes());
    il.extend_from_slice(&[0x1b, 0x94, 0x2a]); // ldc.i4.5 ldelem.i4 ret
    let main = bootstrap::method(
        "Main",
        flags::PUBLIC_STATIC_METHOD,
        bootstrap::static_sig(Some(TypeSig::I4), vec![]),
        il,
    );
    b.add_type("Tests", "Program", flags::PUBLIC_CLASS, object, vec![], vec![main]);

    let session = load_and_jit(b.finish());
    let (exception, _) = call(&session, "Tests", "Program", "Main");
    assert_ne!(exception, 0);
    let wk = *session.universe.well_known();
    assert_eq!(
        session.driver_parts.1.object_type(exception as usize),
        Some(wk.index_out_of_range_exception)
    );
}
