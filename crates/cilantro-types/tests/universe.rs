//! Universe-level properties: relation laws, derivative uniqueness, vtable
//! and interface construction, accessibility, and generic instantiation.

use cilantro_metadata::{
    FieldRow, Token, TypeRefRow, TypeSig, encode_type_spec, table,
};
use cilantro_types::bootstrap::{self, RecordsBuilder, flags};
use cilantro_types::{StackType, TypeId, Universe};
use std::sync::Arc;

fn corlib_universe() -> Universe {
    let universe = Universe::new();
    universe.load_assembly(bootstrap::corlib()).unwrap();
    universe
}

fn sample_types(u: &Universe) -> Vec<TypeId> {
    let wk = *u.well_known();
    vec![
        wk.object,
        wk.string,
        wk.int32,
        wk.uint32,
        wk.int64,
        wk.boolean,
        wk.char,
        wk.intptr,
        wk.double,
        wk.exception,
        wk.arithmetic_exception,
        wk.divide_by_zero_exception,
        u.array_type_of(wk.int32),
        u.array_type_of(wk.string),
        u.byref_type_of(wk.int32).unwrap(),
    ]
}

#[test]
fn verifier_assignability_is_reflexive() {
    let u = corlib_universe();
    for t in sample_types(&u) {
        assert!(
            u.verifier_assignable_to(Some(t), Some(t)),
            "{} not assignable to itself",
            u.type_name(t)
        );
    }
}

#[test]
fn verifier_assignability_is_transitive() {
    let u = corlib_universe();
    let types = sample_types(&u);
    for &a in &types {
        for &b in &types {
            for &c in &types {
                if u.verifier_assignable_to(Some(a), Some(b))
                    && u.verifier_assignable_to(Some(b), Some(c))
                {
                    assert!(
                        u.verifier_assignable_to(Some(a), Some(c)),
                        "{} -> {} -> {} breaks transitivity",
                        u.type_name(a),
                        u.type_name(b),
                        u.type_name(c)
                    );
                }
            }
        }
    }
}

#[test]
fn null_is_assignable_to_object_refs_only() {
    let u = corlib_universe();
    let wk = *u.well_known();
    assert!(u.verifier_assignable_to(None, Some(wk.object)));
    assert!(u.verifier_assignable_to(None, Some(wk.string)));
    assert!(!u.verifier_assignable_to(None, Some(wk.int32)));
    assert!(!u.verifier_assignable_to(Some(wk.object), None));
}

#[test]
fn reduced_and_verification_types_collapse() {
    let u = corlib_universe();
    let wk = *u.well_known();
    assert_eq!(u.reduced_type(wk.byte), wk.sbyte);
    assert_eq!(u.reduced_type(wk.uint64), wk.int64);
    assert_eq!(u.verification_type(wk.boolean), wk.sbyte);
    assert_eq!(u.verification_type(wk.char), wk.int16);
    assert_eq!(u.intermediate_type(wk.int16), wk.int32);
    assert_eq!(u.intermediate_type(wk.boolean), wk.int32);
    assert_eq!(u.intermediate_type(wk.int64), wk.int64);
    assert_eq!(u.intermediate_type(wk.uintptr), wk.intptr);
}

#[test]
fn byref_verification_type_rebuilds_over_referent() {
    let u = corlib_universe();
    let wk = *u.well_known();
    let byref_bool = u.byref_type_of(wk.boolean).unwrap();
    let byref_sbyte = u.byref_type_of(wk.sbyte).unwrap();
    assert_eq!(u.verification_type(byref_bool), byref_sbyte);
}

#[test]
fn derivatives_are_unique() {
    let u = corlib_universe();
    let wk = *u.well_known();
    assert_eq!(u.array_type_of(wk.int32), u.array_type_of(wk.int32));
    assert_eq!(
        u.byref_type_of(wk.int32).unwrap(),
        u.byref_type_of(wk.int32).unwrap()
    );
    assert_ne!(u.array_type_of(wk.int32), u.array_type_of(wk.int64));
    // nesting byrefs is rejected
    let byref = u.byref_type_of(wk.int32).unwrap();
    assert!(u.byref_type_of(byref).is_err());
}

#[test]
fn derivatives_are_unique_across_threads() {
    let u = Arc::new(corlib_universe());
    let wk = *u.well_known();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let u = u.clone();
            std::thread::spawn(move || u.array_type_of(wk.string))
        })
        .collect();
    let results: Vec<TypeId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn array_covariance_follows_element_compatibility() {
    let u = corlib_universe();
    let wk = *u.well_known();
    let strings = u.array_type_of(wk.string);
    let objects = u.array_type_of(wk.object);
    assert!(u.compatible_with(strings, objects));
    assert!(!u.compatible_with(objects, strings));
    // value-type elements only via verification-type equality
    let ints = u.array_type_of(wk.int32);
    let uints = u.array_type_of(wk.uint32);
    assert!(u.compatible_with(ints, uints));
    let longs = u.array_type_of(wk.int64);
    assert!(!u.compatible_with(ints, longs));
}

fn interface_fixture() -> (Universe, TypeId, TypeId) {
    let mut b = RecordsBuilder::new("Ifaces", "Ifaces.dll");
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
        vec![cilantro_metadata::MethodDefRow {
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
            bootstrap::method(
                "Greet",
                flags::PUBLIC_NEW_VIRTUAL_METHOD,
                bootstrap::instance_sig(Some(TypeSig::I4), vec![]),
                vec![0x17, 0x2a], // ldc.i4.1 ret
            ),
            bootstrap::method(
                "Other",
                flags::PUBLIC_NEW_VIRTUAL_METHOD,
                bootstrap::instance_sig(None, vec![]),
                vec![0x2a],
            ),
        ],
    );
    b.records_mut()
        .interface_impls
        .push(cilantro_metadata::InterfaceImplRow {
            class,
            interface: iface,
        });

    let u = corlib_universe();
    let asm = u.load_assembly(b.finish()).unwrap();
    let iface = u.find_type(asm, "Tests", "IGreet").unwrap();
    let class = u.find_type(asm, "Tests", "Greeter").unwrap();
    (u, iface, class)
}

#[test]
fn interface_impl_reserves_a_vtable_run() {
    let (u, iface, class) = interface_fixture();
    assert!(u.is_interface(iface));

    let impl_ = u.interface_impl(class, iface).expect("interface mapped");
    // two own virtuals first, then the interface run
    assert_eq!(impl_.vtable_offset, 2);

    let greet = u
        .with_type(iface, |t| t.methods.clone())
        .into_iter()
        .find(|&m| u.method_name(m) == "Greet")
        .unwrap();
    let implementing = u.interface_method_impl(class, greet).unwrap();
    assert_eq!(u.method_name(implementing), "Greet");
    assert_eq!(u.method_declaring(implementing), class);

    // the interface slot holds the same method as the class's own slot
    let virtuals = u.virtual_methods(class);
    assert_eq!(virtuals.len(), 3);
    assert_eq!(virtuals[impl_.vtable_offset as usize], implementing);
}

#[test]
fn interface_values_are_fat_pointers() {
    let (u, iface, _) = interface_fixture();
    assert_eq!(u.stack_size(iface), 16);
    assert_eq!(u.stack_type(iface), StackType::Object);
}

#[test]
fn accessibility_rules() {
    let u = corlib_universe();
    let wk = *u.well_known();
    // the array length field is private to Array
    let length_field = u.with_type(wk.array, |t| t.fields[0]);
    assert!(u.check_field_accessibility(wk.array, length_field));
    assert!(!u.check_field_accessibility(wk.string, length_field));
    // public ctors are accessible from anywhere
    let ctor = u.default_ctor(wk.exception).unwrap();
    assert!(u.check_method_accessibility(wk.string, ctor));
    assert!(u.check_type_visibility(wk.string, wk.exception));
}

#[test]
fn generic_instantiation_is_cached_and_substituted() {
    let mut b = RecordsBuilder::new("Generics", "Generics.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);

    let cell = b.add_type(
        "Tests",
        "Cell`1",
        flags::PUBLIC_CLASS,
        object,
        vec![FieldRow {
            flags: flags::PUBLIC_FIELD,
            name: "value".into(),
            signature: bootstrap::field_sig(TypeSig::Var(0)),
        }],
        vec![],
    );
    b.records_mut()
        .generic_params
        .push(cilantro_metadata::GenericParamRow {
            number: 0,
            flags: 0,
            owner: cell,
            name: "T".into(),
        });

    let u = corlib_universe();
    let asm = u.load_assembly(b.finish()).unwrap();
    let cell = u.find_type(asm, "Tests", "Cell`1").unwrap();
    let wk = *u.well_known();

    let of_int = u.make_generic(cell, &[wk.int32]).unwrap();
    let of_int_again = u.make_generic(cell, &[wk.int32]).unwrap();
    let of_string = u.make_generic(cell, &[wk.string]).unwrap();
    assert_eq!(of_int, of_int_again);
    assert_ne!(of_int, of_string);

    // the field type substitutes and the layout follows
    let int_field = u.with_type(of_int, |t| t.fields[0]);
    assert_eq!(u.field_type(int_field), wk.int32);
    let string_field = u.with_type(of_string, |t| t.fields[0]);
    assert_eq!(u.field_type(string_field), wk.string);
    // header + value, with pointer rounding for the int case
    assert_eq!(u.managed_size(of_int), 16);
    assert_eq!(u.managed_size(of_string), 16);
    assert_eq!(u.managed_pointer_offsets(of_string), vec![8]);
    assert!(u.managed_pointer_offsets(of_int).is_empty());
}

#[test]
fn type_spec_resolution_builds_instances() {
    let mut b = RecordsBuilder::new("Specs", "Specs.dll");
    b.records_mut().type_refs.push(TypeRefRow {
        resolution_scope: Token::NULL,
        name: "Object".into(),
        namespace: "System".into(),
    });
    let object = Token::new(table::TYPE_REF, 1);
    let list = b.add_type(
        "Tests",
        "List`1",
        flags::PUBLIC_CLASS,
        object,
        vec![],
        vec![],
    );
    b.records_mut()
        .generic_params
        .push(cilantro_metadata::GenericParamRow {
            number: 0,
            flags: 0,
            owner: list,
            name: "T".into(),
        });
    b.records_mut()
        .type_specs
        .push(cilantro_metadata::TypeSpecRow {
            signature: encode_type_spec(&TypeSig::GenericInst {
                value_type: false,
                definition: list,
                args: vec![TypeSig::I4],
            }),
        });

    let u = corlib_universe();
    let asm = u.load_assembly(b.finish()).unwrap();
    let resolved = u
        .resolve_type_token(asm, Token::new(table::TYPE_SPEC, 1), &[], &[])
        .unwrap()
        .unwrap();
    assert!(u.type_name(resolved).starts_with("List`1<"));
    let list_def = u.find_type(asm, "Tests", "List`1").unwrap();
    assert_eq!(u.with_type(resolved, |t| t.generic_definition), Some(list_def));
}

#[test]
fn explicit_layout_rejects_ref_overlap() {
    let mut b = RecordsBuilder::new("Overlap", "Overlap.dll");
    b.records_mut().type_refs.extend([
        TypeRefRow {
            resolution_scope: Token::NULL,
            name: "Object".into(),
            namespace: "System".into(),
        },
        TypeRefRow {
            resolution_scope: Token::NULL,
            name: "ValueType".into(),
            namespace: "System".into(),
        },
    ]);
    let value_type = Token::new(table::TYPE_REF, 2);

    let overlap = b.add_type(
        "Tests",
        "Evil",
        flags::PUBLIC_SEALED_CLASS | 0x10, // explicit layout
        value_type,
        vec![
            FieldRow {
                flags: flags::PUBLIC_FIELD,
                name: "o".into(),
                signature: bootstrap::field_sig(TypeSig::Object),
            },
            FieldRow {
                flags: flags::PUBLIC_FIELD,
                name: "i".into(),
                signature: bootstrap::field_sig(TypeSig::I8),
            },
        ],
        vec![],
    );
    b.records_mut()
        .field_layouts
        .extend([
            cilantro_metadata::FieldLayoutRow {
                offset: 0,
                field: Token::new(table::FIELD, 1),
            },
            cilantro_metadata::FieldLayoutRow {
                offset: 0,
                field: Token::new(table::FIELD, 2),
            },
        ]);
    let _ = overlap;

    let u = corlib_universe();
    assert!(u.load_assembly(b.finish()).is_err());
}
