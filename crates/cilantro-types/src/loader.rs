//! The two-phase type materializer.
//!
//! The type graph is cyclic, so loading is split: the **setup pass** creates
//! stub types and members with names, flags, and token ranges only, and the
//! **fill pass** decodes signatures, computes layout and vtables, and freezes
//! each type. Between the two, an unfilled type is usable for identity
//! comparison and nothing else.

use crate::{
    ClauseKind, ExceptionClause, Field, FieldFlags, LocalVariable, MemberAccess, MemberRef, Method,
    MethodBody, MethodFlags, MethodImplFlags, Param, StackType, Type, TypeFlags, TypeLoadError,
    layout,
    universe::{Assembly, Universe, WellKnown},
};
use cilantro_metadata::{
    AssemblyRecords, EhKind, MethodSig, TypeSig, parse_field_sig, parse_locals_sig,
    parse_method_sig, table,
};
use cilantro_utils::{
    AssemblyId, FieldId, MethodId, TypeId,
    sync::Arc,
};
use tracing::debug;

impl Universe {
    /// Load an assembly's records: setup every type and member, then fill
    /// the whole graph. The first assembly loaded is the bootstrap corlib
    /// and must define the well-known `System` types.
    pub fn load_assembly(&self, records: AssemblyRecords) -> Result<AssemblyId, TypeLoadError> {
        let assembly = self.setup_assembly(records)?;
        let types = self.with_assembly(assembly, |a| a.defined_types.clone());
        for ty in types {
            self.fill_type(ty)?;
        }
        debug!(assembly = %self.with_assembly(assembly, |a| a.name.clone()), "assembly loaded");
        Ok(assembly)
    }

    // ---- setup pass ------------------------------------------------------

    fn setup_assembly(&self, records: AssemblyRecords) -> Result<AssemblyId, TypeLoadError> {
        let mut g = self.write();
        let assembly_id = AssemblyId::new(g.assemblies.len());

        let mut assembly = Assembly {
            name: records.assembly.name.clone(),
            module_name: records.module.name.clone(),
            mvid: records.module.mvid,
            major_version: records.assembly.major_version,
            type_specs: records.type_specs.iter().map(|s| s.signature.clone()).collect(),
            user_strings: records.user_strings.iter().cloned().collect(),
            ..Assembly::default()
        };

        // types first, so member rows can point back at them
        for row in &records.type_defs {
            let id = TypeId::new(g.types.len());
            let mut ty = Type::stub(
                assembly_id,
                row.namespace.clone(),
                row.name.clone(),
                TypeFlags::from_bits_retain(row.flags),
            );
            ty.extends_token = row.extends;
            ty.field_range = (row.field_start, row.field_count);
            ty.method_range = (row.method_start, row.method_count);
            g.types.push(ty);
            assembly.defined_types.push(id);
        }

        for row in &records.fields {
            let id = FieldId::new(g.fields.len());
            g.fields.push(Field {
                assembly: assembly_id,
                declaring: TypeId::new(0), // fixed up below
                name: row.name.clone(),
                flags: FieldFlags::from_bits_retain(row.flags),
                access: MemberAccess::from_bits(row.flags),
                ty: None,
                offset: 0,
                signature: row.signature.clone(),
            });
            assembly.defined_fields.push(id);
        }

        for row in &records.methods {
            let id = MethodId::new(g.methods.len());
            let param_names = records
                .params
                .iter()
                .skip(row.param_start.saturating_sub(1) as usize)
                .take(row.param_count as usize)
                .map(|p| p.name.clone())
                .collect();
            g.methods.push(Method {
                assembly: assembly_id,
                declaring: TypeId::new(0), // fixed up below
                name: row.name.clone(),
                flags: MethodFlags::from_bits_retain(row.flags),
                access: MemberAccess::from_bits(row.flags),
                impl_flags: MethodImplFlags::from_bits_retain(row.impl_flags),
                return_type: None,
                params: Vec::new(),
                vtable_offset: None,
                body: None,
                signature: row.signature.clone(),
                body_record: row.body.clone(),
                param_names,
            });
            assembly.defined_methods.push(id);
        }

        // attach members to their declaring types
        for (ti, _) in records.type_defs.iter().enumerate() {
            let tid = assembly.defined_types[ti];
            let (fstart, fcount) = g.types[tid.as_usize()].field_range;
            let (mstart, mcount) = g.types[tid.as_usize()].method_range;
            for i in 0..fcount {
                let row = (fstart + i).saturating_sub(1) as usize;
                let fid = *assembly.defined_fields.get(row).ok_or_else(|| {
                    TypeLoadError::check("field list range outside the field table")
                })?;
                g.fields[fid.as_usize()].declaring = tid;
                g.types[tid.as_usize()].fields.push(fid);
            }
            for i in 0..mcount {
                let row = (mstart + i).saturating_sub(1) as usize;
                let mid = *assembly.defined_methods.get(row).ok_or_else(|| {
                    TypeLoadError::check("method list range outside the method table")
                })?;
                g.methods[mid.as_usize()].declaring = tid;
                g.types[tid.as_usize()].methods.push(mid);
            }
        }

        for row in &records.nested_classes {
            let nested = assembly
                .defined_types
                .get(row.nested.row())
                .copied()
                .ok_or_else(|| TypeLoadError::check("nested class token out of range"))?;
            let enclosing = assembly
                .defined_types
                .get(row.enclosing.row())
                .copied()
                .ok_or_else(|| TypeLoadError::check("enclosing class token out of range"))?;
            g.types[nested.as_usize()].declaring = Some(enclosing);
        }

        for row in &records.class_layouts {
            if row.parent.table == table::TYPE_DEF {
                if let Some(&tid) = assembly.defined_types.get(row.parent.row()) {
                    g.types[tid.as_usize()].class_layout =
                        Some((row.packing_size, row.class_size));
                }
            }
        }

        for row in &records.field_layouts {
            if row.field.table == table::FIELD {
                if let Some(&fid) = assembly.defined_fields.get(row.field.row()) {
                    g.fields[fid.as_usize()].offset = row.offset as usize;
                }
            }
        }

        for row in &records.interface_impls {
            if row.class.table == table::TYPE_DEF {
                if let Some(&tid) = assembly.defined_types.get(row.class.row()) {
                    g.types[tid.as_usize()].interface_tokens.push(row.interface);
                }
            }
        }

        for row in &records.method_impls {
            if row.class.table == table::TYPE_DEF {
                if let Some(&tid) = assembly.defined_types.get(row.class.row()) {
                    g.types[tid.as_usize()]
                        .method_impl_tokens
                        .push((row.method_body, row.method_declaration));
                }
            }
        }

        // generic parameter placeholders
        for row in &records.generic_params {
            if row.owner.table == table::TYPE_DEF {
                let owner = assembly
                    .defined_types
                    .get(row.owner.row())
                    .copied()
                    .ok_or_else(|| TypeLoadError::check("generic param owner out of range"))?;
                let id = TypeId::new(g.types.len());
                let mut ty = Type::stub(
                    assembly_id,
                    String::new(),
                    row.name.clone(),
                    TypeFlags::empty(),
                );
                ty.generic_param_position = Some(row.number as u32);
                ty.is_filled = true;
                ty.stack_type = StackType::Object;
                ty.stack_size = layout::POINTER_SIZE;
                ty.stack_align = layout::POINTER_SIZE;
                g.types.push(ty);
                let args = &mut g.types[owner.as_usize()].generic_args;
                if args.len() <= row.number as usize {
                    args.resize(row.number as usize + 1, id);
                }
                args[row.number as usize] = id;
            }
        }

        // imported types resolve by name against already-loaded assemblies
        for row in &records.type_refs {
            let found = g
                .assemblies
                .iter()
                .flat_map(|a| a.defined_types.iter())
                .copied()
                .find(|&tid| {
                    let t = &g.types[tid.as_usize()];
                    t.namespace == row.namespace && t.name == row.name && t.declaring.is_none()
                })
                .ok_or_else(|| {
                    TypeLoadError::not_found(format!("type ref {}.{}", row.namespace, row.name))
                })?;
            assembly.imported_types.push(found);
        }

        // extends links (TypeSpec bases wait for the fill pass)
        for (ti, row) in records.type_defs.iter().enumerate() {
            let tid = assembly.defined_types[ti];
            let base = match row.extends.table {
                _ if row.extends.is_null() => None,
                table::TYPE_DEF => Some(
                    assembly
                        .defined_types
                        .get(row.extends.row())
                        .copied()
                        .ok_or_else(|| TypeLoadError::check("extends token out of range"))?,
                ),
                table::TYPE_REF => Some(
                    assembly
                        .imported_types
                        .get(row.extends.row())
                        .copied()
                        .ok_or_else(|| TypeLoadError::check("extends token out of range"))?,
                ),
                table::TYPE_SPEC => None,
                _ => return Err(TypeLoadError::check("invalid extends token table")),
            };
            g.types[tid.as_usize()].base = base;
        }

        // imported members: match by name and parameter count on the
        // resolved parent type
        for row in &records.member_refs {
            let parent = match row.class.table {
                table::TYPE_DEF => assembly.defined_types.get(row.class.row()).copied(),
                table::TYPE_REF => assembly.imported_types.get(row.class.row()).copied(),
                _ => None,
            }
            .ok_or_else(|| {
                TypeLoadError::not_found(format!("member ref parent for {}", row.name))
            })?;

            let member = if row.signature.first() == Some(&0x06) {
                let fid = g.types[parent.as_usize()]
                    .fields
                    .iter()
                    .copied()
                    .find(|&fid| g.fields[fid.as_usize()].name == row.name)
                    .ok_or_else(|| {
                        TypeLoadError::not_found(format!("imported field {}", row.name))
                    })?;
                MemberRef::Field(fid)
            } else {
                let sig = parse_method_sig(&row.signature)?;
                let mid = g.types[parent.as_usize()]
                    .methods
                    .iter()
                    .copied()
                    .find(|&mid| {
                        let m = &g.methods[mid.as_usize()];
                        m.name == row.name
                            && method_sig_matches(&m.signature, &sig, m.params.len())
                    })
                    .ok_or_else(|| {
                        TypeLoadError::not_found(format!("imported method {}", row.name))
                    })?;
                MemberRef::Method(mid)
            };
            assembly.imported_members.push(member);
        }

        g.assemblies.push(assembly);
        drop(g);

        // the first assembly is the corlib: resolve the well-known set now
        // so the fill pass can classify primitives
        if assembly_id.as_usize() == 0 {
            let wk = self.resolve_well_known(assembly_id)?;
            let _ = self.well_known.set(wk);
        }

        Ok(assembly_id)
    }

    fn resolve_well_known(&self, corlib: AssemblyId) -> Result<WellKnown, TypeLoadError> {
        let find = |name: &str| {
            self.find_type(corlib, "System", name)
                .ok_or_else(|| TypeLoadError::not_found(format!("System.{name} in the corlib")))
        };
        Ok(WellKnown {
            object: find("Object")?,
            value_type: find("ValueType")?,
            enum_type: find("Enum")?,
            array: find("Array")?,
            string: find("String")?,
            boolean: find("Boolean")?,
            char: find("Char")?,
            sbyte: find("SByte")?,
            byte: find("Byte")?,
            int16: find("Int16")?,
            uint16: find("UInt16")?,
            int32: find("Int32")?,
            uint32: find("UInt32")?,
            int64: find("Int64")?,
            uint64: find("UInt64")?,
            intptr: find("IntPtr")?,
            uintptr: find("UIntPtr")?,
            single: find("Single")?,
            double: find("Double")?,
            exception: find("Exception")?,
            arithmetic_exception: find("ArithmeticException")?,
            divide_by_zero_exception: find("DivideByZeroException")?,
            execution_engine_exception: find("ExecutionEngineException")?,
            index_out_of_range_exception: find("IndexOutOfRangeException")?,
            null_reference_exception: find("NullReferenceException")?,
            invalid_cast_exception: find("InvalidCastException")?,
            out_of_memory_exception: find("OutOfMemoryException")?,
            overflow_exception: find("OverflowException")?,
        })
    }

    // ---- fill pass -------------------------------------------------------

    /// Fill a type: resolve its base, member signatures, layout, vtable, and
    /// interface map, then freeze it.
    pub fn fill_type(&self, id: TypeId) -> Result<(), TypeLoadError> {
        {
            let mut g = self.write();
            let t = &mut g.types[id.as_usize()];
            if t.is_filled {
                return Ok(());
            }
            if t.is_filling {
                return Err(TypeLoadError::check(format!(
                    "cyclic layout through {}",
                    t.name
                )));
            }
            t.is_filling = true;
        }

        let result = self.fill_type_inner(id);

        let mut g = self.write();
        let t = &mut g.types[id.as_usize()];
        t.is_filling = false;
        if result.is_ok() {
            t.is_filled = true;
        }
        result
    }

    fn fill_type_inner(&self, id: TypeId) -> Result<(), TypeLoadError> {
        let wk = *self.well_known();
        let assembly = self.with_type(id, |t| t.assembly);
        let type_args = self.with_type(id, |t| t.generic_args.clone());

        // base link, possibly through a TypeSpec for generic bases
        let (mut base, extends_token) = self.with_type(id, |t| (t.base, t.extends_token));
        if base.is_none() && extends_token.table == table::TYPE_SPEC && !extends_token.is_null() {
            base = self.resolve_type_token(assembly, extends_token, &type_args, &[])?;
            self.write().types[id.as_usize()].base = base;
        }
        if let Some(b) = base {
            self.fill_type(b)?;
        }

        let is_value_type = (base == Some(wk.value_type) || base == Some(wk.enum_type))
            && id != wk.enum_type;
        self.write().types[id.as_usize()].is_value_type = is_value_type;

        // field types
        let field_ids = self.with_type(id, |t| t.fields.clone());
        for fid in &field_ids {
            let (blob, resolved) = self.with_field(*fid, |f| (f.signature.clone(), f.ty));
            if resolved.is_some() {
                continue; // generic instantiations arrive pre-resolved
            }
            let sig = parse_field_sig(&blob)?;
            let fty = self.resolve_sig_type(assembly, &sig.0, &type_args, &[])?;
            self.write().fields[fid.as_usize()].ty = Some(fty);
        }

        // enums record their underlying primitive as the element type
        if base == Some(wk.enum_type) {
            let element = field_ids
                .iter()
                .find_map(|&fid| {
                    self.with_field(fid, |f| if f.is_static() { None } else { f.ty })
                })
                .unwrap_or(wk.int32);
            self.write().types[id.as_usize()].element = Some(element);
        }

        // method signatures and bodies
        let method_ids = self.with_type(id, |t| t.methods.clone());
        for mid in &method_ids {
            self.fill_method(assembly, *mid, &type_args)?;
        }

        // value-type instance fields must be laid out before this type can be
        for fid in &field_ids {
            let (is_static, fty) = self.with_field(*fid, |f| (f.is_static(), f.ty));
            if is_static {
                continue;
            }
            let fty = fty.ok_or_else(|| TypeLoadError::check("field type not resolved"))?;
            if self.with_type(fty, |t| t.is_value_type || self.primitive_candidate(&wk, fty)) {
                self.fill_type(fty)?;
            }
        }

        {
            let mut g = self.write();
            layout::compute_type_layout(&mut g, &wk, id)?;
        }

        self.build_vtable(id, assembly, &type_args)?;
        Ok(())
    }

    /// True when `fty` is one of the primitive types, which are value types
    /// by decree even before their own fill runs.
    fn primitive_candidate(&self, wk: &WellKnown, fty: TypeId) -> bool {
        layout::primitive_layout(wk, fty).is_some()
    }

    fn fill_method(
        &self,
        assembly: AssemblyId,
        mid: MethodId,
        type_args: &[TypeId],
    ) -> Result<(), TypeLoadError> {
        let (blob, already, names) = self.with_method(mid, |m| {
            (
                m.signature.clone(),
                !m.params.is_empty() || m.return_type.is_some(),
                m.param_names.clone(),
            )
        });
        if already || blob.is_empty() {
            return self.fill_method_body(assembly, mid, type_args);
        }

        let sig = parse_method_sig(&blob)?;
        let return_type = match &sig.return_type {
            None => None,
            Some(t) => Some(self.resolve_sig_type(assembly, t, type_args, &[])?),
        };
        let mut params = Vec::with_capacity(sig.params.len());
        for (i, p) in sig.params.iter().enumerate() {
            let ty = self.resolve_sig_type(assembly, p, type_args, &[])?;
            let name = names.get(i).cloned().unwrap_or_else(|| format!("arg{i}"));
            params.push(Param { name, ty });
        }

        {
            let mut g = self.write();
            let m = &mut g.methods[mid.as_usize()];
            m.return_type = return_type;
            m.params = params;
        }

        self.fill_method_body(assembly, mid, type_args)
    }

    fn fill_method_body(
        &self,
        assembly: AssemblyId,
        mid: MethodId,
        type_args: &[TypeId],
    ) -> Result<(), TypeLoadError> {
        let record = {
            let mut g = self.write();
            g.methods[mid.as_usize()].body_record.take()
        };
        let Some(record) = record else {
            return Ok(());
        };

        let mut locals = Vec::new();
        if let Some(blob) = &record.locals_signature {
            let sig = parse_locals_sig(blob)?;
            for (index, t) in sig.0.iter().enumerate() {
                locals.push(LocalVariable {
                    index: index as u32,
                    ty: self.resolve_sig_type(assembly, t, type_args, &[])?,
                });
            }
        }

        let mut clauses = Vec::with_capacity(record.exception_clauses.len());
        for c in &record.exception_clauses {
            let kind = match c.kind {
                EhKind::Exception => {
                    let catch = self
                        .resolve_type_token(assembly, c.class_token, type_args, &[])?
                        .ok_or_else(|| TypeLoadError::check("catch clause without a type"))?;
                    ClauseKind::Catch(catch)
                }
                EhKind::Filter => ClauseKind::Filter {
                    offset: c.filter_offset,
                },
                EhKind::Finally => ClauseKind::Finally,
                EhKind::Fault => ClauseKind::Fault,
            };
            clauses.push(ExceptionClause {
                kind,
                try_offset: c.try_offset,
                try_length: c.try_length,
                handler_offset: c.handler_offset,
                handler_length: c.handler_length,
            });
        }

        let body = MethodBody {
            max_stack: record.max_stack as u32,
            init_locals: record.init_locals,
            il: record.il,
            locals,
            clauses,
        };
        self.write().methods[mid.as_usize()].body = Some(Arc::new(body));
        Ok(())
    }

    fn build_vtable(
        &self,
        id: TypeId,
        assembly: AssemblyId,
        type_args: &[TypeId],
    ) -> Result<(), TypeLoadError> {
        let is_interface = self.is_interface(id);
        let base = self.base_type(id);

        let mut vtable: Vec<MethodId> = if is_interface {
            Vec::new()
        } else {
            base.map(|b| self.virtual_methods(b)).unwrap_or_default()
        };

        // own virtuals: overrides replace inherited slots, new slots append
        let method_ids = self.with_type(id, |t| t.methods.clone());
        for &mid in &method_ids {
            let (is_virtual, new_slot, name, params) = self.with_method(mid, |m| {
                (
                    m.is_virtual(),
                    m.flags.contains(MethodFlags::NEW_SLOT),
                    m.name.clone(),
                    m.params.clone(),
                )
            });
            if !is_virtual {
                continue;
            }
            let slot = if new_slot || is_interface {
                None
            } else {
                vtable.iter().position(|&existing| {
                    self.with_method(existing, |e| {
                        e.name == name && params_match(&e.params, &params)
                    })
                })
            };
            let offset = match slot {
                Some(s) => {
                    vtable[s] = mid;
                    s as u32
                }
                None => {
                    vtable.push(mid);
                    (vtable.len() - 1) as u32
                }
            };
            self.write().methods[mid.as_usize()].vtable_offset = Some(offset);
        }

        // explicit overrides from the MethodImpl table
        let method_impls = self.with_type(id, |t| t.method_impl_tokens.clone());
        let mut explicit: Vec<(MethodId, MethodId)> = Vec::new();
        for (body_tok, decl_tok) in method_impls {
            let body = self.resolve_method_token(assembly, body_tok)?;
            let decl = self.resolve_method_token(assembly, decl_tok)?;
            explicit.push((decl, body));
        }

        // one slot run per implemented interface
        let iface_tokens = self.with_type(id, |t| t.interface_tokens.clone());
        let mut impls = Vec::with_capacity(iface_tokens.len());
        for token in iface_tokens {
            let iface = self
                .resolve_type_token(assembly, token, type_args, &[])?
                .ok_or_else(|| TypeLoadError::check("null interface-impl token"))?;
            self.fill_type(iface)?;
            let offset = vtable.len() as u32;
            for im in self.virtual_methods(iface) {
                let implementing = explicit
                    .iter()
                    .find(|(decl, _)| *decl == im)
                    .map(|(_, body)| *body)
                    .or_else(|| self.find_implementation(id, im, &vtable));
                match implementing {
                    Some(m) => vtable.push(m),
                    None if self.is_abstract(id) || is_interface => vtable.push(im),
                    None => {
                        return Err(TypeLoadError::not_found(format!(
                            "implementation of {} on {}",
                            self.method_name(im),
                            self.type_name(id)
                        )));
                    }
                }
            }
            impls.push(crate::InterfaceImpl {
                interface: iface,
                vtable_offset: offset,
            });
        }

        let mut g = self.write();
        let t = &mut g.types[id.as_usize()];
        t.virtual_methods = vtable;
        t.interfaces = impls;
        Ok(())
    }

    /// Find the most-derived method implementing the interface method `im`:
    /// own methods first, then inherited virtual slots.
    fn find_implementation(
        &self,
        id: TypeId,
        im: MethodId,
        inherited: &[MethodId],
    ) -> Option<MethodId> {
        let (name, params) = self.with_method(im, |m| (m.name.clone(), m.params.clone()));
        let own = self.with_type(id, |t| t.methods.clone());
        own.iter()
            .copied()
            .find(|&mid| {
                self.with_method(mid, |m| {
                    m.is_virtual() && m.name == name && params_match(&m.params, &params)
                })
            })
            .or_else(|| {
                inherited.iter().copied().find(|&mid| {
                    self.with_method(mid, |m| m.name == name && params_match(&m.params, &params))
                })
            })
    }

    // ---- signature resolution --------------------------------------------

    /// Materialize a parsed signature type into a type handle.
    pub fn resolve_sig_type(
        &self,
        assembly: AssemblyId,
        sig: &TypeSig,
        type_args: &[TypeId],
        method_args: &[TypeId],
    ) -> Result<TypeId, TypeLoadError> {
        let wk = *self.well_known();
        Ok(match sig {
            TypeSig::Boolean => wk.boolean,
            TypeSig::Char => wk.char,
            TypeSig::I1 => wk.sbyte,
            TypeSig::U1 => wk.byte,
            TypeSig::I2 => wk.int16,
            TypeSig::U2 => wk.uint16,
            TypeSig::I4 => wk.int32,
            TypeSig::U4 => wk.uint32,
            TypeSig::I8 => wk.int64,
            TypeSig::U8 => wk.uint64,
            TypeSig::R4 => wk.single,
            TypeSig::R8 => wk.double,
            TypeSig::I => wk.intptr,
            TypeSig::U => wk.uintptr,
            TypeSig::String => wk.string,
            TypeSig::Object => wk.object,
            // unmanaged pointers are tracked as native ints
            TypeSig::Ptr(_) => wk.intptr,
            TypeSig::Class(t) | TypeSig::ValueType(t) => self
                .resolve_type_token(assembly, *t, type_args, method_args)?
                .ok_or_else(|| TypeLoadError::check("null token in signature"))?,
            TypeSig::SzArray(inner) => {
                let element = self.resolve_sig_type(assembly, inner, type_args, method_args)?;
                self.array_type_of(element)
            }
            TypeSig::ByRef(inner) => {
                let referent = self.resolve_sig_type(assembly, inner, type_args, method_args)?;
                self.byref_type_of(referent)?
            }
            TypeSig::Var(n) => *type_args.get(*n as usize).ok_or_else(|| {
                TypeLoadError::check(format!("generic parameter {n} out of scope"))
            })?,
            TypeSig::MVar(n) => *method_args.get(*n as usize).ok_or_else(|| {
                TypeLoadError::check(format!("generic method parameter {n} out of scope"))
            })?,
            TypeSig::GenericInst {
                definition, args, ..
            } => {
                let def = self
                    .resolve_type_token(assembly, *definition, type_args, method_args)?
                    .ok_or_else(|| TypeLoadError::check("null generic definition token"))?;
                let mut resolved = Vec::with_capacity(args.len());
                for a in args {
                    resolved.push(self.resolve_sig_type(assembly, a, type_args, method_args)?);
                }
                self.make_generic(def, &resolved)?
            }
            TypeSig::Array { .. } => {
                return Err(TypeLoadError::check(
                    "multi-dimensional arrays are not supported",
                ));
            }
        })
    }
}

/// Structural parameter-list match used for override and member-ref
/// resolution.
fn params_match(a: &[Param], b: &[Param]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ty == y.ty)
}

/// Member-ref matching happens before fill, so compare the raw blob's shape
/// against the parsed reference signature.
fn method_sig_matches(blob: &[u8], reference: &MethodSig, resolved_params: usize) -> bool {
    if blob.is_empty() {
        // a generic instantiation's method: compare resolved arity
        return reference.params.len() == resolved_params;
    }
    match parse_method_sig(blob) {
        Ok(own) => {
            own.params.len() == reference.params.len() && own.has_this == reference.has_this
        }
        Err(_) => false,
    }
}
