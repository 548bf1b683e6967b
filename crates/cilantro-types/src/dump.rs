//! Human-readable assembly listing.

use crate::{MemberAccess, TypeVisibility, Universe};
use cilantro_utils::AssemblyId;
use std::fmt::Write;

fn access_str(access: MemberAccess) -> &'static str {
    match access {
        MemberAccess::CompilerControlled => "compilercontrolled",
        MemberAccess::Private => "private",
        MemberAccess::FamilyAndAssembly => "private protected",
        MemberAccess::Assembly => "internal",
        MemberAccess::Family => "protected",
        MemberAccess::FamilyOrAssembly => "protected internal",
        MemberAccess::Public => "public",
    }
}

fn visibility_str(v: TypeVisibility) -> &'static str {
    match v {
        TypeVisibility::NotPublic => "private",
        TypeVisibility::Public => "public",
        TypeVisibility::NestedPublic => "nested public",
        TypeVisibility::NestedPrivate => "nested private",
        TypeVisibility::NestedFamily => "protected",
        TypeVisibility::NestedAssembly => "internal",
        TypeVisibility::NestedFamilyAndAssembly => "private protected",
        TypeVisibility::NestedFamilyOrAssembly => "protected internal",
    }
}

impl Universe {
    /// Write a listing of every type in the assembly: kind, bases, fields
    /// with offsets, methods with vtable slots.
    pub fn dump_assembly(&self, assembly: AssemblyId, out: &mut String) {
        let name = self.with_assembly(assembly, |a| a.module_name.clone());
        let _ = writeln!(out, "Assembly `{name}`:");
        for ty in self.with_assembly(assembly, |a| a.defined_types.clone()) {
            let (visibility, is_interface) =
                self.with_type(ty, |t| (t.flags.visibility(), t.is_interface()));
            let kind = if is_interface { "interface" } else { "class" };
            let _ = write!(
                out,
                "    {} {} {}",
                visibility_str(visibility),
                kind,
                self.full_type_name(ty)
            );
            if let Some(base) = self.base_type(ty) {
                let _ = write!(out, " : {}", self.full_type_name(base));
            }
            let _ = writeln!(out);

            for fid in self.with_type(ty, |t| t.fields.clone()) {
                let (fname, access, is_static, offset) = self.with_field(fid, |f| {
                    (f.name.clone(), f.access, f.is_static(), f.offset)
                });
                let fty = self.field_type(fid);
                let _ = writeln!(
                    out,
                    "        {}{} {} {}; // offset 0x{:02x}",
                    access_str(access),
                    if is_static { " static" } else { "" },
                    self.full_type_name(fty),
                    fname,
                    offset
                );
            }

            for mid in self.with_type(ty, |t| t.methods.clone()) {
                let (mname, access, is_static, is_virtual, is_abstract, slot) =
                    self.with_method(mid, |m| {
                        (
                            m.name.clone(),
                            m.access,
                            m.is_static(),
                            m.is_virtual(),
                            m.is_abstract(),
                            m.vtable_offset,
                        )
                    });
                let mut decl = String::new();
                let _ = write!(decl, "{}", access_str(access));
                if is_static {
                    decl.push_str(" static");
                }
                if is_abstract {
                    decl.push_str(" abstract");
                }
                if is_virtual {
                    let _ = write!(decl, " virtual[{}]", slot.unwrap_or(0));
                }
                let ret = match self.method_return_type(mid) {
                    None => "void".to_string(),
                    Some(r) => self.full_type_name(r),
                };
                let _ = writeln!(out, "        {decl} {ret} {mname}");
            }
        }
    }
}
