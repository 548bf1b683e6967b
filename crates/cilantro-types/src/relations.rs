//! The pure type-relation functions the verifier is built on
//! (ECMA-335 I.8.7, specialized the way the runtime actually needs them).
//!
//! `None` stands for the null type, which only participates where the rules
//! say it does (null is assignable to any object reference).

use crate::{MemberAccess, TypeVisibility, Universe};
use cilantro_utils::{FieldId, MethodId, TypeId};

impl Universe {
    pub fn is_enum(&self, id: TypeId) -> bool {
        let wk = self.well_known();
        self.base_type(id) == Some(wk.enum_type) && id != wk.enum_type
    }

    /// An object reference: not a value type, not a byref, not a generic
    /// parameter.
    pub fn is_object_ref(&self, id: Option<TypeId>) -> bool {
        match id {
            None => false,
            Some(id) => self.with_type(id, |t| {
                !t.is_value_type && !t.is_byref && t.generic_param_position.is_none()
            }),
        }
    }

    /// The element type for enums, the type itself otherwise.
    pub fn underlying_type(&self, id: TypeId) -> TypeId {
        if self.is_enum(id) {
            self.element_type(id).unwrap_or(id)
        } else {
            id
        }
    }

    /// Underlying type with unsigned integers collapsed onto the signed
    /// form of the same width.
    pub fn reduced_type(&self, id: TypeId) -> TypeId {
        let wk = self.well_known();
        let t = self.underlying_type(id);
        if t == wk.byte {
            wk.sbyte
        } else if t == wk.uint16 {
            wk.int16
        } else if t == wk.uint32 {
            wk.int32
        } else if t == wk.uint64 {
            wk.int64
        } else if t == wk.uintptr {
            wk.intptr
        } else {
            t
        }
    }

    /// Reduced type with Boolean folded to SByte, Char to Int16, and byrefs
    /// rebuilt over the verification type of their referent.
    pub fn verification_type(&self, id: TypeId) -> TypeId {
        let wk = self.well_known();
        let t = self.reduced_type(id);
        if t == wk.boolean {
            wk.sbyte
        } else if t == wk.char {
            wk.int16
        } else if self.is_byref(t) {
            let referent = self
                .element_type(t)
                .expect("byref type without a referent");
            let v = self.verification_type(referent);
            self.byref_type_of(v)
                .expect("verification type of a byref referent is never a byref")
        } else {
            t
        }
    }

    /// Verification type with small ints promoted to Int32, the way they
    /// live on the evaluation stack.
    pub fn intermediate_type(&self, id: TypeId) -> TypeId {
        let wk = self.well_known();
        let t = self.verification_type(id);
        if t == wk.sbyte || t == wk.int16 {
            wk.int32
        } else {
            t
        }
    }

    pub fn array_element_compatible_with(&self, t: TypeId, u: TypeId) -> bool {
        let v = self.underlying_type(t);
        let w = self.underlying_type(u);
        if self.compatible_with(v, w) {
            return true;
        }
        // I.8.7.1 asks for reduced-type here, but that would make Boolean
        // and SByte distinct while real code relies on them matching
        self.verification_type(v) == self.verification_type(w)
    }

    pub fn pointer_element_compatible_with(&self, t: TypeId, u: TypeId) -> bool {
        self.verification_type(t) == self.verification_type(u)
    }

    fn direct_base_class(&self, t: TypeId) -> Option<TypeId> {
        let wk = self.well_known();
        if self.is_array(t) {
            Some(wk.array)
        } else if self.is_object_ref(Some(t)) || self.is_interface(t) {
            Some(wk.object)
        } else if self.is_value_type(t) {
            Some(wk.value_type)
        } else {
            None
        }
    }

    fn interface_directly_implemented_by(&self, i: TypeId, t: TypeId) -> bool {
        self.is_interface(i) && self.interface_impl(t, i).is_some()
    }

    pub fn compatible_with(&self, t: TypeId, u: TypeId) -> bool {
        if t == u {
            return true;
        }

        if self.is_object_ref(Some(t)) {
            if Some(u) == self.direct_base_class(t) {
                return true;
            }
            if self.interface_directly_implemented_by(u, t) {
                return true;
            }
        }

        if !self.is_value_type(t) {
            let mut base = self.base_type(t);
            while let Some(b) = base {
                if b == u {
                    return true;
                }
                base = self.base_type(b);
            }
        }

        if self.is_array(t) && self.is_array(u) {
            let te = self.element_type(t).expect("array without element type");
            let ue = self.element_type(u).expect("array without element type");
            if self.array_element_compatible_with(te, ue) {
                return true;
            }
        }

        if self.is_byref(t) && self.is_byref(u) && self.pointer_element_compatible_with(t, u) {
            return true;
        }

        false
    }

    fn assignable_to(&self, t: Option<TypeId>, u: Option<TypeId>) -> bool {
        if t == u {
            return true;
        }
        match (t, u) {
            (Some(t), Some(u)) => {
                if self.intermediate_type(t) == self.intermediate_type(u) {
                    return true;
                }
                self.compatible_with(t, u)
            }
            // null is assignable to any object reference
            (None, u) => self.is_object_ref(u),
            (Some(_), None) => false,
        }
    }

    pub fn verifier_assignable_to(&self, q: Option<TypeId>, r: Option<TypeId>) -> bool {
        let t = q.map(|t| self.verification_type(t));
        let u = r.map(|u| self.verification_type(u));
        if t == u {
            return true;
        }
        self.assignable_to(t, u)
    }

    // ---- accessibility ---------------------------------------------------

    fn is_same_family(&self, mut from: Option<TypeId>, to: TypeId) -> bool {
        while let Some(f) = from {
            if f == to {
                return true;
            }
            from = self.base_type(f);
        }
        false
    }

    pub fn check_type_visibility(&self, from: TypeId, to: TypeId) -> bool {
        let visibility = self.with_type(to, |t| t.flags.visibility());
        let same_assembly = self.with_type(from, |t| t.assembly)
            == self.with_type(to, |t| t.assembly);

        match visibility {
            TypeVisibility::Public => return true,
            TypeVisibility::NotPublic => return same_assembly,
            _ => {}
        }

        // nested visibilities mirror the member rules against the declaring
        // type
        let Some(declaring) = self.with_type(to, |t| t.declaring) else {
            return false;
        };
        let family = self.is_same_family(Some(from), declaring);
        let assembly =
            self.with_type(from, |t| t.assembly) == self.with_type(declaring, |t| t.assembly);

        match visibility {
            TypeVisibility::NestedPrivate => from == declaring,
            TypeVisibility::NestedFamily => family,
            TypeVisibility::NestedAssembly => assembly,
            TypeVisibility::NestedFamilyAndAssembly => family && assembly,
            TypeVisibility::NestedFamilyOrAssembly => family || assembly,
            TypeVisibility::NestedPublic => true,
            TypeVisibility::Public | TypeVisibility::NotPublic => unreachable!(),
        }
    }

    fn check_member_access(
        &self,
        from: TypeId,
        declaring: TypeId,
        access: MemberAccess,
    ) -> bool {
        if !self.check_type_visibility(from, declaring) {
            return false;
        }
        let family = self.is_same_family(Some(from), declaring);
        let assembly =
            self.with_type(from, |t| t.assembly) == self.with_type(declaring, |t| t.assembly);
        match access {
            MemberAccess::CompilerControlled => false,
            MemberAccess::Private => from == declaring,
            MemberAccess::Family => family,
            MemberAccess::Assembly => assembly,
            MemberAccess::FamilyAndAssembly => family && assembly,
            MemberAccess::FamilyOrAssembly => family || assembly,
            MemberAccess::Public => true,
        }
    }

    pub fn check_field_accessibility(&self, from: TypeId, to: FieldId) -> bool {
        let (declaring, access) = self.with_field(to, |f| (f.declaring, f.access));
        self.check_member_access(from, declaring, access)
    }

    pub fn check_method_accessibility(&self, from: TypeId, to: MethodId) -> bool {
        let (declaring, access) = self.with_method(to, |m| (m.declaring, m.access));
        self.check_member_access(from, declaring, access)
    }
}
