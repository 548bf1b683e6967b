//! Lazy type-level generic instantiation.
//!
//! Instantiations hang off their definition in an intrusive chain. Creation
//! is double-checked under the arena's write lock, and the bare instance is
//! chained *before* its members are expanded so that self-referential
//! generic types resolve to the in-progress instance instead of recursing.
//! Until its fill completes, an instance is usable for identity comparison
//! only, like any other unfilled type.

use crate::{
    ClauseKind, ExceptionClause, Field, Method, MethodBody, Param, Type, TypeLoadError, Universe,
};
use cilantro_utils::{
    FieldId, MethodId, TypeId,
    sync::Arc,
};

impl Universe {
    /// Instantiate a generic definition with concrete (or placeholder)
    /// arguments. Requests with identical arguments return the same type.
    pub fn make_generic(&self, def: TypeId, args: &[TypeId]) -> Result<TypeId, TypeLoadError> {
        let param_count = self.with_type(def, |t| {
            if t.is_generic_definition() {
                Some(t.generic_args.len())
            } else {
                None
            }
        });
        let Some(param_count) = param_count else {
            return Err(TypeLoadError::check("not a generic definition"));
        };
        if param_count != args.len() {
            return Err(TypeLoadError::check("generic argument count mismatch"));
        }

        // the definition's members must be resolved before they can be
        // expanded; a definition currently mid-fill resolves its own
        // instantiations against the stub chained in below
        let (filled, filling) = self.with_type(def, |t| (t.is_filled, t.is_filling));
        if !filled && !filling {
            self.fill_type(def)?;
        }

        if let Some(existing) = self.find_instance(def, args) {
            return Ok(existing);
        }

        let name = self.instance_name(def, args);
        let instance = {
            let mut g = self.write();
            // double-check under the write lock
            let mut cursor = g.types[def.as_usize()].next_generic_instance;
            while let Some(inst) = cursor {
                if g.types[inst.as_usize()].generic_args == args {
                    return Ok(inst);
                }
                cursor = g.types[inst.as_usize()].next_generic_instance;
            }

            let d = &g.types[def.as_usize()];
            let mut ty = Type::stub(d.assembly, d.namespace.clone(), name, d.flags);
            ty.declaring = d.declaring;
            ty.generic_definition = Some(def);
            ty.generic_args = args.to_vec();
            ty.class_layout = d.class_layout;
            ty.interface_tokens = d.interface_tokens.clone();
            ty.method_impl_tokens = d.method_impl_tokens.clone();
            let id = TypeId::new(g.types.len());
            g.types.push(ty);

            // chain in only when the instantiation is fully concrete
            let real_instance = args.iter().all(|&a| {
                g.types[a.as_usize()].generic_param_position.is_none()
            });
            if real_instance {
                let head = g.types[def.as_usize()].next_generic_instance;
                g.types[id.as_usize()].next_generic_instance = head;
                g.types[def.as_usize()].next_generic_instance = Some(id);
            }
            id
        };

        self.expand_members(def, instance, args)?;
        self.fill_type(instance)?;
        Ok(instance)
    }

    fn find_instance(&self, def: TypeId, args: &[TypeId]) -> Option<TypeId> {
        let g = self.read();
        let mut cursor = g.types[def.as_usize()].next_generic_instance;
        while let Some(inst) = cursor {
            if g.types[inst.as_usize()].generic_args == args {
                return Some(inst);
            }
            cursor = g.types[inst.as_usize()].next_generic_instance;
        }
        None
    }

    fn instance_name(&self, def: TypeId, args: &[TypeId]) -> String {
        let mut name = self.type_name(def);
        name.push('<');
        for (i, &a) in args.iter().enumerate() {
            if i > 0 {
                name.push(',');
            }
            name.push_str(&self.full_type_name(a));
        }
        name.push('>');
        name
    }

    fn expand_members(
        &self,
        def: TypeId,
        instance: TypeId,
        args: &[TypeId],
    ) -> Result<(), TypeLoadError> {
        let base = match self.base_type(def) {
            Some(b) => Some(self.expand_type_ref(b, args)?),
            None => None,
        };

        let def_fields = self.with_type(def, |t| t.fields.clone());
        let mut new_fields = Vec::with_capacity(def_fields.len());
        for fid in def_fields {
            let mut field: Field = self.with_field(fid, |f| f.clone());
            let fty = field
                .ty
                .ok_or_else(|| TypeLoadError::check("expanding an unfilled definition"))?;
            field.ty = Some(self.expand_type_ref(fty, args)?);
            field.declaring = instance;
            field.signature = Vec::new();
            let mut g = self.write();
            let id = FieldId::new(g.fields.len());
            g.fields.push(field);
            new_fields.push(id);
        }

        let def_methods = self.with_type(def, |t| t.methods.clone());
        let mut new_methods = Vec::with_capacity(def_methods.len());
        for mid in def_methods {
            let mut method: Method = self.with_method(mid, |m| m.clone());
            method.declaring = instance;
            method.signature = Vec::new();
            method.vtable_offset = None;
            method.return_type = match method.return_type {
                Some(t) => Some(self.expand_type_ref(t, args)?),
                None => None,
            };
            let mut params = Vec::with_capacity(method.params.len());
            for p in &method.params {
                params.push(Param {
                    name: p.name.clone(),
                    ty: self.expand_type_ref(p.ty, args)?,
                });
            }
            method.params = params;
            if let Some(body) = &method.body {
                method.body = Some(Arc::new(self.expand_body(body, args)?));
            }
            let mut g = self.write();
            let id = MethodId::new(g.methods.len());
            g.methods.push(method);
            new_methods.push(id);
        }

        let mut g = self.write();
        let t = &mut g.types[instance.as_usize()];
        t.base = base;
        t.fields = new_fields;
        t.methods = new_methods;
        Ok(())
    }

    fn expand_body(&self, body: &MethodBody, args: &[TypeId]) -> Result<MethodBody, TypeLoadError> {
        let mut locals = Vec::with_capacity(body.locals.len());
        for l in &body.locals {
            locals.push(crate::LocalVariable {
                index: l.index,
                ty: self.expand_type_ref(l.ty, args)?,
            });
        }
        let mut clauses = Vec::with_capacity(body.clauses.len());
        for c in &body.clauses {
            let kind = match c.kind {
                ClauseKind::Catch(t) => ClauseKind::Catch(self.expand_type_ref(t, args)?),
                other => other,
            };
            clauses.push(ExceptionClause { kind, ..*c });
        }
        Ok(MethodBody {
            max_stack: body.max_stack,
            init_locals: body.init_locals,
            il: body.il.clone(),
            locals,
            clauses,
        })
    }

    /// Substitute generic placeholders in a materialized type reference.
    pub fn expand_type_ref(&self, ty: TypeId, args: &[TypeId]) -> Result<TypeId, TypeLoadError> {
        if let Some(pos) = self.with_type(ty, |t| t.generic_param_position) {
            return args.get(pos as usize).copied().ok_or_else(|| {
                TypeLoadError::check(format!("generic parameter {pos} out of scope"))
            });
        }
        if self.is_array(ty) {
            let element = self.element_type(ty).expect("array without element type");
            let expanded = self.expand_type_ref(element, args)?;
            return Ok(self.array_type_of(expanded));
        }
        if self.is_byref(ty) {
            let referent = self.element_type(ty).expect("byref without a referent");
            let expanded = self.expand_type_ref(referent, args)?;
            return self.byref_type_of(expanded);
        }
        let (definition, own_args) =
            self.with_type(ty, |t| (t.generic_definition, t.generic_args.clone()));
        if let Some(def) = definition {
            let mut expanded = Vec::with_capacity(own_args.len());
            let mut changed = false;
            for a in own_args {
                let e = self.expand_type_ref(a, args)?;
                changed |= e != a;
                expanded.push(e);
            }
            if changed {
                return self.make_generic(def, &expanded);
            }
        }
        Ok(ty)
    }
}
