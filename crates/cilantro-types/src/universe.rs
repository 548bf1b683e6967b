use crate::{
    Field, InterfaceImpl, MemberRef, Method, MethodBody, Param, StackType, Type, TypeLoadError,
    layout,
};
use cilantro_metadata::{Token, table};
use cilantro_utils::{
    AssemblyId, FieldId, MethodId, TypeId,
    sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use rustc_hash::FxHashMap;
use std::fmt::Write as _;

/// A loaded assembly and its member tables, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub name: String,
    pub module_name: String,
    pub mvid: [u8; 16],
    pub major_version: u16,
    pub defined_types: Vec<TypeId>,
    pub imported_types: Vec<TypeId>,
    pub defined_methods: Vec<MethodId>,
    pub defined_fields: Vec<FieldId>,
    pub imported_members: Vec<MemberRef>,
    pub type_specs: Vec<Vec<u8>>,
    pub user_strings: FxHashMap<u32, String>,
}

/// The corlib types the runtime itself needs, resolved by name when the
/// first assembly is set up.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    pub object: TypeId,
    pub value_type: TypeId,
    pub enum_type: TypeId,
    pub array: TypeId,
    pub string: TypeId,
    pub boolean: TypeId,
    pub char: TypeId,
    pub sbyte: TypeId,
    pub byte: TypeId,
    pub int16: TypeId,
    pub uint16: TypeId,
    pub int32: TypeId,
    pub uint32: TypeId,
    pub int64: TypeId,
    pub uint64: TypeId,
    pub intptr: TypeId,
    pub uintptr: TypeId,
    pub single: TypeId,
    pub double: TypeId,
    pub exception: TypeId,
    pub arithmetic_exception: TypeId,
    pub divide_by_zero_exception: TypeId,
    pub execution_engine_exception: TypeId,
    pub index_out_of_range_exception: TypeId,
    pub null_reference_exception: TypeId,
    pub invalid_cast_exception: TypeId,
    pub out_of_memory_exception: TypeId,
    pub overflow_exception: TypeId,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub types: Vec<Type>,
    pub methods: Vec<Method>,
    pub fields: Vec<Field>,
    pub assemblies: Vec<Assembly>,
}

/// The arena holding every loaded assembly's type graph.
///
/// All mutation happens under the write lock; readers performing
/// double-checked lookups (derivative caches, generic instantiations) observe
/// fully-initialized nodes because publication goes through the same lock.
#[derive(Default)]
pub struct Universe {
    pub(crate) inner: RwLock<Inner>,
    pub(crate) well_known: OnceLock<WellKnown>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write()
    }

    /// The corlib well-known set. Panics when no assembly has been loaded.
    pub fn well_known(&self) -> &WellKnown {
        self.well_known
            .get()
            .unwrap_or_else(|| panic!("universe has no bootstrap assembly loaded"))
    }

    pub fn with_type<R>(&self, id: TypeId, f: impl FnOnce(&Type) -> R) -> R {
        f(&self.read().types[id.as_usize()])
    }

    pub fn with_method<R>(&self, id: MethodId, f: impl FnOnce(&Method) -> R) -> R {
        f(&self.read().methods[id.as_usize()])
    }

    pub fn with_field<R>(&self, id: FieldId, f: impl FnOnce(&Field) -> R) -> R {
        f(&self.read().fields[id.as_usize()])
    }

    pub fn with_assembly<R>(&self, id: AssemblyId, f: impl FnOnce(&Assembly) -> R) -> R {
        f(&self.read().assemblies[id.as_usize()])
    }

    // ---- type accessors -------------------------------------------------

    pub fn type_name(&self, id: TypeId) -> String {
        self.with_type(id, |t| t.name.clone())
    }

    pub fn stack_type(&self, id: TypeId) -> StackType {
        self.with_type(id, |t| t.stack_type)
    }

    pub fn stack_size(&self, id: TypeId) -> usize {
        self.with_type(id, |t| t.stack_size)
    }

    pub fn stack_align(&self, id: TypeId) -> usize {
        self.with_type(id, |t| t.stack_align)
    }

    pub fn managed_size(&self, id: TypeId) -> usize {
        self.with_type(id, |t| t.managed_size)
    }

    pub fn managed_pointer_offsets(&self, id: TypeId) -> Vec<usize> {
        self.with_type(id, |t| t.managed_pointer_offsets.clone())
    }

    pub fn is_interface(&self, id: TypeId) -> bool {
        self.with_type(id, |t| t.is_interface())
    }

    pub fn is_abstract(&self, id: TypeId) -> bool {
        self.with_type(id, |t| t.is_abstract())
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        self.with_type(id, |t| t.is_array)
    }

    pub fn is_byref(&self, id: TypeId) -> bool {
        self.with_type(id, |t| t.is_byref)
    }

    pub fn is_value_type(&self, id: TypeId) -> bool {
        self.with_type(id, |t| t.is_value_type)
    }

    pub fn base_type(&self, id: TypeId) -> Option<TypeId> {
        self.with_type(id, |t| t.base)
    }

    pub fn element_type(&self, id: TypeId) -> Option<TypeId> {
        self.with_type(id, |t| t.element)
    }

    pub fn type_vtable(&self, id: TypeId) -> Option<usize> {
        self.with_type(id, |t| t.vtable)
    }

    pub fn virtual_methods(&self, id: TypeId) -> Vec<MethodId> {
        self.with_type(id, |t| t.virtual_methods.clone())
    }

    pub fn interface_impls(&self, id: TypeId) -> Vec<InterfaceImpl> {
        self.with_type(id, |t| t.interfaces.clone())
    }

    /// Publish the vtable block address for a type.
    pub fn set_type_vtable(&self, id: TypeId, address: usize) {
        self.write().types[id.as_usize()].vtable = Some(address);
    }

    /// The interface-impl record for `interface` on `ty`, if implemented.
    pub fn interface_impl(&self, ty: TypeId, interface: TypeId) -> Option<InterfaceImpl> {
        self.with_type(ty, |t| {
            t.interfaces.iter().copied().find(|i| i.interface == interface)
        })
    }

    /// Map an interface method to the implementing method on `ty` via the
    /// interface-impl vtable offset.
    pub fn interface_method_impl(&self, ty: TypeId, method: MethodId) -> Option<MethodId> {
        let (iface, slot) = self.with_method(method, |m| (m.declaring, m.vtable_offset));
        let slot = slot?;
        let impl_ = self.interface_impl(ty, iface)?;
        self.with_type(ty, |t| {
            t.virtual_methods
                .get((impl_.vtable_offset + slot) as usize)
                .copied()
        })
    }

    /// Full display name: `[Assembly-vN]Namespace.Name`, nested types joined
    /// with `+`, generic parameters printed bare.
    pub fn full_type_name(&self, id: TypeId) -> String {
        let g = self.read();
        let mut out = String::new();
        write_full_type_name(&g, id, &mut out);
        out
    }

    /// The symbol a method's JIT artifact is published under:
    /// `[Assembly-vN]Ns.Type::Name(paramtypes)`.
    pub fn method_symbol(&self, id: MethodId) -> String {
        let g = self.read();
        let m = &g.methods[id.as_usize()];
        let mut out = String::new();
        write_full_type_name(&g, m.declaring, &mut out);
        out.push_str("::");
        out.push_str(&m.name);
        out.push('(');
        for (i, p) in m.params.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_full_type_name(&g, p.ty, &mut out);
        }
        out.push(')');
        out
    }

    /// The symbol a static field's storage is published under.
    pub fn field_symbol(&self, id: FieldId) -> String {
        let g = self.read();
        let f = &g.fields[id.as_usize()];
        let mut out = String::new();
        write_full_type_name(&g, f.declaring, &mut out);
        out.push_str("::");
        out.push_str(&f.name);
        out
    }

    pub fn find_type(&self, assembly: AssemblyId, namespace: &str, name: &str) -> Option<TypeId> {
        let g = self.read();
        g.assemblies[assembly.as_usize()]
            .defined_types
            .iter()
            .copied()
            .find(|&id| {
                let t = &g.types[id.as_usize()];
                t.namespace == namespace && t.name == name
            })
    }

    /// Parameterless instance constructor, used by the JIT's throw-new path.
    pub fn default_ctor(&self, ty: TypeId) -> Option<MethodId> {
        let g = self.read();
        g.types[ty.as_usize()]
            .methods
            .iter()
            .copied()
            .find(|&mid| {
                let m = &g.methods[mid.as_usize()];
                m.is_rt_special_name()
                    && m.name == ".ctor"
                    && !m.is_static()
                    && m.params.is_empty()
                    && m.return_type.is_none()
            })
    }

    // ---- method and field accessors -------------------------------------

    pub fn method_name(&self, id: MethodId) -> String {
        self.with_method(id, |m| m.name.clone())
    }

    pub fn method_declaring(&self, id: MethodId) -> TypeId {
        self.with_method(id, |m| m.declaring)
    }

    pub fn method_return_type(&self, id: MethodId) -> Option<TypeId> {
        self.with_method(id, |m| m.return_type)
    }

    pub fn method_params(&self, id: MethodId) -> Vec<Param> {
        self.with_method(id, |m| m.params.clone())
    }

    pub fn method_vtable_offset(&self, id: MethodId) -> Option<u32> {
        self.with_method(id, |m| m.vtable_offset)
    }

    pub fn method_body(&self, id: MethodId) -> Option<Arc<MethodBody>> {
        self.with_method(id, |m| m.body.clone())
    }

    pub fn field_type(&self, id: FieldId) -> TypeId {
        self.with_field(id, |f| {
            f.ty.unwrap_or_else(|| panic!("field {} is not filled", f.name))
        })
    }

    pub fn field_offset(&self, id: FieldId) -> usize {
        self.with_field(id, |f| f.offset)
    }

    pub fn field_declaring(&self, id: FieldId) -> TypeId {
        self.with_field(id, |f| f.declaring)
    }

    // ---- token resolution -----------------------------------------------

    /// Resolve a type token against an assembly. A null token yields `None`.
    pub fn resolve_type_token(
        &self,
        assembly: AssemblyId,
        token: Token,
        type_args: &[TypeId],
        method_args: &[TypeId],
    ) -> Result<Option<TypeId>, TypeLoadError> {
        if token.is_null() {
            return Ok(None);
        }
        match token.table {
            table::TYPE_DEF => {
                let id = self
                    .with_assembly(assembly, |a| a.defined_types.get(token.row()).copied())
                    .ok_or(cilantro_metadata::MetadataError::TokenNotFound(token))?;
                Ok(Some(id))
            }
            table::TYPE_REF => {
                let id = self
                    .with_assembly(assembly, |a| a.imported_types.get(token.row()).copied())
                    .ok_or(cilantro_metadata::MetadataError::TokenNotFound(token))?;
                Ok(Some(id))
            }
            table::TYPE_SPEC => {
                let blob = self
                    .with_assembly(assembly, |a| a.type_specs.get(token.row()).cloned())
                    .ok_or(cilantro_metadata::MetadataError::TokenNotFound(token))?;
                let sig = cilantro_metadata::parse_type_spec(&blob)?;
                Ok(Some(self.resolve_sig_type(
                    assembly,
                    &sig,
                    type_args,
                    method_args,
                )?))
            }
            _ => Err(TypeLoadError::check("invalid table for a type token")),
        }
    }

    pub fn resolve_method_token(
        &self,
        assembly: AssemblyId,
        token: Token,
    ) -> Result<MethodId, TypeLoadError> {
        match token.table {
            table::METHOD_DEF => self
                .with_assembly(assembly, |a| a.defined_methods.get(token.row()).copied())
                .ok_or_else(|| TypeLoadError::not_found(format!("method token {token}"))),
            table::MEMBER_REF => {
                match self.with_assembly(assembly, |a| a.imported_members.get(token.row()).copied())
                {
                    Some(MemberRef::Method(m)) => Ok(m),
                    Some(MemberRef::Field(_)) => {
                        Err(TypeLoadError::check("member ref is not a method"))
                    }
                    None => Err(TypeLoadError::not_found(format!("method token {token}"))),
                }
            }
            _ => Err(TypeLoadError::check("invalid table for a method token")),
        }
    }

    pub fn resolve_field_token(
        &self,
        assembly: AssemblyId,
        token: Token,
    ) -> Result<FieldId, TypeLoadError> {
        match token.table {
            table::FIELD => self
                .with_assembly(assembly, |a| a.defined_fields.get(token.row()).copied())
                .ok_or_else(|| TypeLoadError::not_found(format!("field token {token}"))),
            table::MEMBER_REF => {
                match self.with_assembly(assembly, |a| a.imported_members.get(token.row()).copied())
                {
                    Some(MemberRef::Field(f)) => Ok(f),
                    Some(MemberRef::Method(_)) => {
                        Err(TypeLoadError::check("member ref is not a field"))
                    }
                    None => Err(TypeLoadError::not_found(format!("field token {token}"))),
                }
            }
            _ => Err(TypeLoadError::check("invalid table for a field token")),
        }
    }

    pub fn user_string(&self, assembly: AssemblyId, token: Token) -> Result<String, TypeLoadError> {
        if token.table != table::USER_STRING {
            return Err(TypeLoadError::check("invalid table for a string token"));
        }
        self.with_assembly(assembly, |a| a.user_strings.get(&token.index).cloned())
            .ok_or_else(|| TypeLoadError::not_found(format!("string token {token}")))
    }

    // ---- lazy derivatives ------------------------------------------------

    /// `T[]`, created once per element type under the arena lock.
    pub fn array_type_of(&self, element: TypeId) -> TypeId {
        if let Some(existing) = self.with_type(element, |t| t.array_type) {
            return existing;
        }

        let mut g = self.write();
        if let Some(existing) = g.types[element.as_usize()].array_type {
            return existing;
        }

        let wk = *self.well_known();
        let (assembly, namespace, name) = {
            let t = &g.types[element.as_usize()];
            (t.assembly, t.namespace.clone(), format!("{}[]", t.name))
        };
        let array_base = &g.types[wk.array.as_usize()];
        let mut ty = Type::stub(assembly, namespace, name, array_base.flags);
        ty.base = Some(wk.array);
        ty.is_array = true;
        ty.is_filled = true;
        ty.element = Some(element);
        ty.stack_type = StackType::Object;
        ty.stack_size = array_base.stack_size;
        ty.stack_align = array_base.stack_align;
        ty.managed_size = array_base.managed_size;
        ty.managed_align = array_base.managed_align;
        // no managed pointer offsets: the collector walks array contents on
        // its own

        let id = TypeId::new(g.types.len());
        g.types.push(ty);
        g.types[element.as_usize()].array_type = Some(id);
        id
    }

    /// `T&`, created once per referent. Nesting byrefs is invalid.
    pub fn byref_type_of(&self, referent: TypeId) -> Result<TypeId, TypeLoadError> {
        if let Some(existing) = self.with_type(referent, |t| t.byref_type) {
            return Ok(existing);
        }

        let mut g = self.write();
        if let Some(existing) = g.types[referent.as_usize()].byref_type {
            return Ok(existing);
        }
        if g.types[referent.as_usize()].is_byref {
            return Err(TypeLoadError::check("byref of a byref type"));
        }

        let (assembly, namespace, name, stack_size, stack_align) = {
            let t = &g.types[referent.as_usize()];
            (
                t.assembly,
                t.namespace.clone(),
                format!("{}&", t.name),
                t.stack_size,
                t.stack_align,
            )
        };
        let mut ty = Type::stub(assembly, namespace, name, crate::TypeFlags::empty());
        ty.is_byref = true;
        ty.is_filled = true;
        ty.base = Some(referent);
        ty.element = Some(referent);
        ty.stack_type = StackType::Ref;
        ty.stack_size = layout::POINTER_SIZE;
        ty.stack_align = layout::POINTER_SIZE;
        ty.managed_size = stack_size;
        ty.managed_align = stack_align;

        let id = TypeId::new(g.types.len());
        g.types.push(ty);
        g.types[referent.as_usize()].byref_type = Some(id);
        Ok(id)
    }
}

pub(crate) fn write_full_type_name(g: &Inner, id: TypeId, out: &mut String) {
    let t = &g.types[id.as_usize()];
    if t.generic_param_position.is_some() {
        out.push_str(&t.name);
        return;
    }
    let asm = &g.assemblies[t.assembly.as_usize()];
    let _ = write!(out, "[{}-v{}]", asm.name, asm.major_version);
    write_type_name(g, id, out);
}

pub(crate) fn write_type_name(g: &Inner, id: TypeId, out: &mut String) {
    let t = &g.types[id.as_usize()];
    if let Some(declaring) = t.declaring {
        write_type_name(g, declaring, out);
        out.push('+');
    } else if !t.namespace.is_empty() {
        out.push_str(&t.namespace);
        out.push('.');
    }
    out.push_str(&t.name);
}
