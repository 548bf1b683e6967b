//! The per-assembly JIT pipeline.
//!
//! One module per assembly: the runtime helper prototypes, one import per
//! referenced type, string and static-field externs, one prototype and
//! forward per method, then the per-method translation. The finished module
//! transfers into the global link context under its lock, and linking
//! publishes every concrete type's vtable and registers static GC roots.

use crate::{
    JitError, Runtime,
    error::jit_check,
    runtime::type_handle,
    translate::{MethodCompiler, mir_type_of},
};
use cilantro_mir::{
    GlobalLinker, ItemRef, LinkedProgram, Machine, MirType, MirVar, Module, Value,
};
use cilantro_types::{MemberRef, MethodCodeType, StackType, Universe};
use cilantro_utils::{AssemblyId, FieldId, MethodId, TypeId, sync::Arc};
use rustc_hash::FxHashMap;
use tracing::{debug, info_span};

pub(crate) struct FuncEntry {
    pub proto: ItemRef,
    pub forward: Option<ItemRef>,
}

/// Runtime helper call targets: (prototype, import) pairs.
pub(crate) struct RuntimeItems {
    pub gc_new: (ItemRef, ItemRef),
    pub gc_update: (ItemRef, ItemRef),
    pub gc_update_ref: (ItemRef, ItemRef),
    pub managed_memcpy: (ItemRef, ItemRef),
    pub managed_ref_memcpy: (ItemRef, ItemRef),
    pub memcpy: (ItemRef, ItemRef),
    pub memset: (ItemRef, ItemRef),
    pub is_instance: (ItemRef, ItemRef),
    pub dynamic_cast: (ItemRef, ItemRef),
    pub get_array_type: (ItemRef, ItemRef),
}

/// Everything the per-method translator resolves against.
pub(crate) struct AssemblyItems {
    pub functions: FxHashMap<MethodId, FuncEntry>,
    pub types: FxHashMap<TypeId, ItemRef>,
    pub statics: FxHashMap<FieldId, ItemRef>,
    /// user-string token index -> import item
    pub strings: FxHashMap<u32, ItemRef>,
    pub runtime: RuntimeItems,
}

pub struct JitDriver<'a> {
    universe: &'a Arc<Universe>,
    linker: &'a GlobalLinker,
    runtime: &'a Arc<Runtime>,
}

impl<'a> JitDriver<'a> {
    pub fn new(
        universe: &'a Arc<Universe>,
        linker: &'a GlobalLinker,
        runtime: &'a Arc<Runtime>,
    ) -> Self {
        Self {
            universe,
            linker,
            runtime,
        }
    }

    /// JIT one loaded assembly and relink. Returns the fresh link snapshot.
    pub fn jit_assembly(&self, assembly: AssemblyId) -> Result<Arc<LinkedProgram>, JitError> {
        let u = self.universe.as_ref();
        let module_name = u.with_assembly(assembly, |a| a.module_name.clone());
        let _span = info_span!("jit_assembly", module = %module_name).entered();

        let mut module = Module::new(module_name);
        let items = self.declare_items(assembly, &mut module)?;

        for ty in u.with_assembly(assembly, |a| a.defined_types.clone()) {
            for method in u.with_type(ty, |t| t.methods.clone()) {
                self.jit_method(method, &items, &mut module)?;
            }
        }

        // the string objects and type handles the module imports must exist
        // before the link resolves them
        self.register_externs(assembly)?;
        self.linker.load_module(module);
        let program = self.linker.link()?;

        self.publish_vtables(assembly, &program)?;
        self.register_static_roots(assembly)?;
        debug!("assembly jitted and linked");
        Ok(program)
    }

    /// Translate an assembly into a module and render its text, without
    /// touching the link context. Translation is deterministic: equal
    /// metadata and bodies produce equal text.
    pub fn module_text(&self, assembly: AssemblyId) -> Result<String, JitError> {
        let u = self.universe.as_ref();
        let module_name = u.with_assembly(assembly, |a| a.module_name.clone());
        let mut module = Module::new(module_name);
        let items = self.declare_items(assembly, &mut module)?;
        for ty in u.with_assembly(assembly, |a| a.defined_types.clone()) {
            for method in u.with_type(ty, |t| t.methods.clone()) {
                self.jit_method(method, &items, &mut module)?;
            }
        }
        Ok(format!("{module}"))
    }

    /// Run a static method through the evaluator. Returns the two-slot
    /// result: (exception, value).
    pub fn call_method(
        &self,
        program: &Arc<LinkedProgram>,
        method: MethodId,
        args: &[Value],
    ) -> Result<(Value, Option<Value>), JitError> {
        let machine = Machine::new(program.clone());
        let symbol = self.universe.method_symbol(method);
        let mut results = machine.call_name(&symbol, args)?;
        let exception = *results
            .first()
            .ok_or_else(|| JitError::check("function returned no exception slot"))?;
        let value = results.drain(..).nth(1);
        Ok((exception, value))
    }

    fn jit_method(
        &self,
        method: MethodId,
        items: &AssemblyItems,
        module: &mut Module,
    ) -> Result<(), JitError> {
        let u = self.universe.as_ref();
        let (is_abstract, is_unmanaged, is_internal, code_type, has_body) =
            u.with_method(method, |m| {
                (
                    m.is_abstract(),
                    m.is_unmanaged(),
                    m.is_internal_call(),
                    m.impl_flags.code_type(),
                    m.body.is_some(),
                )
            });

        if is_abstract {
            return Ok(());
        }
        jit_check!(!is_unmanaged, "unmanaged methods cannot be translated");
        match code_type {
            MethodCodeType::Il => {}
            MethodCodeType::Native | MethodCodeType::Runtime => {
                return Err(JitError::check("native and runtime methods have no IL"));
            }
        }
        if is_internal {
            // internal calls resolve to runtime-provided externs
            jit_check!(!has_body, "internal-call methods must not carry a body");
            return Ok(());
        }

        let symbol = u.method_symbol(method);
        let _span = info_span!("jit_method", method = %symbol).entered();
        let (res, args) = method_signature(u, method);
        let nres = res.len();
        let func = module.new_func(symbol, res, args);
        MethodCompiler::run(u, items, module, func, method, nres)
    }

    // ---- declarations ----------------------------------------------------

    fn declare_items(
        &self,
        assembly: AssemblyId,
        module: &mut Module,
    ) -> Result<AssemblyItems, JitError> {
        let u = self.universe.as_ref();
        let runtime = declare_runtime_items(module);
        let mut items = AssemblyItems {
            functions: FxHashMap::default(),
            types: FxHashMap::default(),
            statics: FxHashMap::default(),
            strings: FxHashMap::default(),
            runtime,
        };

        let defined = u.with_assembly(assembly, |a| a.defined_types.clone());
        let imported = u.with_assembly(assembly, |a| a.imported_types.clone());
        for ty in defined.iter().chain(imported.iter()).copied() {
            self.import_type(&mut items, module, ty, false)?;
        }

        // the runtime may throw these anywhere; import them (with their
        // constructors) when this assembly does not define them
        let wk = *u.well_known();
        for exception in [
            wk.arithmetic_exception,
            wk.divide_by_zero_exception,
            wk.execution_engine_exception,
            wk.index_out_of_range_exception,
            wk.null_reference_exception,
            wk.invalid_cast_exception,
            wk.out_of_memory_exception,
            wk.overflow_exception,
        ] {
            if u.with_type(exception, |t| t.assembly) != assembly {
                self.import_type(&mut items, module, exception, true)?;
            }
        }

        // strings
        for (index, _) in u.with_assembly(assembly, |a| {
            a.user_strings.iter().map(|(k, v)| (*k, v.clone())).collect::<Vec<_>>()
        }) {
            let item = module.new_import(string_symbol(assembly, index));
            items.strings.insert(index, item);
        }

        // static fields: zero-initialized storage here, imports elsewhere
        for field in u.with_assembly(assembly, |a| a.defined_fields.clone()) {
            if !u.with_field(field, |f| f.is_static()) {
                continue;
            }
            let symbol = u.field_symbol(field);
            let size = u.stack_size(u.field_type(field));
            let item = module.new_bss(symbol.clone(), size);
            module.new_export(symbol);
            items.statics.insert(field, item);
        }

        // methods defined here export; imported members import
        for method in u.with_assembly(assembly, |a| a.defined_methods.clone()) {
            self.prepare_method_signature(&mut items, module, method, false)?;
        }
        for member in u.with_assembly(assembly, |a| a.imported_members.clone()) {
            match member {
                MemberRef::Method(method) => {
                    self.prepare_method_signature(&mut items, module, method, true)?;
                }
                MemberRef::Field(field) => {
                    if u.with_field(field, |f| f.is_static()) {
                        let item = module.new_import(u.field_symbol(field));
                        items.statics.insert(field, item);
                    }
                }
            }
        }

        Ok(items)
    }

    fn import_type(
        &self,
        items: &mut AssemblyItems,
        module: &mut Module,
        ty: TypeId,
        with_methods: bool,
    ) -> Result<(), JitError> {
        let u = self.universe.as_ref();
        if !items.types.contains_key(&ty) {
            let item = module.new_import(u.full_type_name(ty));
            items.types.insert(ty, item);
        }

        if with_methods {
            for method in u.with_type(ty, |t| t.methods.clone()) {
                self.prepare_method_signature(items, module, method, true)?;
            }
        }
        Ok(())
    }

    /// Declare one method's prototype and its forward/import, exporting
    /// definitions owned by this module.
    fn prepare_method_signature(
        &self,
        items: &mut AssemblyItems,
        module: &mut Module,
        method: MethodId,
        external: bool,
    ) -> Result<(), JitError> {
        let u = self.universe.as_ref();
        if items.functions.contains_key(&method) {
            return Ok(());
        }

        let symbol = u.method_symbol(method);
        let (res, args) = method_signature(u, method);
        let proto = module.new_proto(format!("{symbol}$proto"), res, args);

        let (is_abstract, is_external_body) = u.with_method(method, |m| {
            (
                m.is_abstract(),
                m.is_unmanaged() || m.is_internal_call(),
            )
        });
        let forward = if is_abstract {
            None
        } else if external || is_external_body {
            Some(module.new_import(symbol))
        } else {
            let forward = module.new_forward(symbol.clone());
            module.new_export(symbol);
            Some(forward)
        };

        items.functions.insert(method, FuncEntry { proto, forward });
        Ok(())
    }

    // ---- link-time state -------------------------------------------------

    fn register_externs(&self, assembly: AssemblyId) -> Result<(), JitError> {
        let u = self.universe.as_ref();
        for ty in u.with_assembly(assembly, |a| a.defined_types.clone()) {
            self.linker
                .load_external(&u.full_type_name(ty), type_handle(ty));
        }
        for (index, value) in u.with_assembly(assembly, |a| {
            a.user_strings.iter().map(|(k, v)| (*k, v.clone())).collect::<Vec<_>>()
        }) {
            let addr = self.runtime.alloc_string(&value);
            self.linker
                .load_external(&string_symbol(assembly, index), addr as u64);
        }
        Ok(())
    }

    /// Fill every concrete type's vtable with the linked function
    /// addresses.
    fn publish_vtables(
        &self,
        assembly: AssemblyId,
        program: &Arc<LinkedProgram>,
    ) -> Result<(), JitError> {
        let u = self.universe.as_ref();
        for ty in u.with_assembly(assembly, |a| a.defined_types.clone()) {
            if u.is_abstract(ty) || u.is_interface(ty) {
                continue;
            }
            let virtuals = u.virtual_methods(ty);
            if virtuals.is_empty() {
                continue;
            }
            let mut functions = Vec::with_capacity(virtuals.len());
            for method in virtuals {
                let symbol = u.method_symbol(method);
                let addr = program
                    .resolve(&symbol)
                    .ok_or_else(|| JitError::NotFound(format!("vtable slot {symbol}")))?;
                functions.push(addr);
            }
            self.runtime.publish_vtable(ty, &functions);
        }
        Ok(())
    }

    /// Statics holding object references (directly or inside a value type)
    /// become GC roots.
    fn register_static_roots(&self, assembly: AssemblyId) -> Result<(), JitError> {
        let u = self.universe.as_ref();
        for field in u.with_assembly(assembly, |a| a.defined_fields.clone()) {
            if !u.with_field(field, |f| f.is_static()) {
                continue;
            }
            let symbol = u.field_symbol(field);
            let Some(addr) = self.linker.resolve(&symbol) else {
                continue;
            };
            let addr = addr as usize;
            let field_type = u.field_type(field);
            match u.stack_type(field_type) {
                StackType::Object if u.is_interface(field_type) => {
                    self.runtime.gc_add_root(addr + crate::object::POINTER_SIZE);
                }
                StackType::Object => self.runtime.gc_add_root(addr),
                StackType::ValueType => {
                    for offset in u.managed_pointer_offsets(field_type) {
                        self.runtime.gc_add_root(addr + offset);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn string_symbol(assembly: AssemblyId, index: u32) -> String {
    format!("string${}${index}", assembly.0)
}

/// Declare the runtime helper prototypes and imports every module carries.
fn declare_runtime_items(module: &mut Module) -> RuntimeItems {
    let mut pair = |name: &str, res: Vec<MirType>, args: Vec<(&str, MirType)>| {
        let proto = module.new_proto(
            format!("{name}$proto"),
            res,
            args.into_iter()
                .map(|(n, t)| MirVar::new(n, t))
                .collect(),
        );
        let func = module.new_import(name);
        (proto, func)
    };

    RuntimeItems {
        gc_new: pair(
            "gc_new",
            vec![MirType::P],
            vec![("type", MirType::P), ("size", MirType::U64)],
        ),
        get_array_type: pair("get_array_type", vec![MirType::P], vec![("type", MirType::P)]),
        gc_update: pair(
            "gc_update",
            vec![],
            vec![("o", MirType::P), ("idx", MirType::U64), ("new", MirType::P)],
        ),
        gc_update_ref: pair(
            "gc_update_ref",
            vec![],
            vec![("o", MirType::P), ("new", MirType::P)],
        ),
        managed_memcpy: pair(
            "managed_memcpy",
            vec![],
            vec![
                ("this", MirType::P),
                ("struct_type", MirType::P),
                ("offset", MirType::I32),
                ("from", MirType::P),
            ],
        ),
        managed_ref_memcpy: pair(
            "managed_ref_memcpy",
            vec![],
            vec![
                ("this", MirType::P),
                ("struct_type", MirType::P),
                ("from", MirType::P),
            ],
        ),
        memcpy: pair(
            "memcpy",
            vec![],
            vec![("dest", MirType::P), ("src", MirType::P), ("count", MirType::U64)],
        ),
        memset: pair(
            "memset",
            vec![],
            vec![("dest", MirType::P), ("c", MirType::I32), ("count", MirType::U64)],
        ),
        dynamic_cast: pair(
            "dynamic_cast_obj_to_interface",
            vec![MirType::I8],
            vec![
                ("dest", MirType::P),
                ("source", MirType::P),
                ("targetInterface", MirType::P),
            ],
        ),
        is_instance: pair(
            "isinstance",
            vec![MirType::I8],
            vec![("object", MirType::P), ("type", MirType::P)],
        ),
    }
}

/// The MIR signature of a method under the two-slot return convention.
pub(crate) fn method_signature(u: &Universe, method: MethodId) -> (Vec<MirType>, Vec<MirVar>) {
    let mut res = vec![MirType::P];
    let mut args = Vec::new();

    if let Some(ret) = u.method_return_type(method) {
        let mir = mir_type_of(u, ret);
        if mir.is_block() {
            // large value returns go through a caller-provided block
            args.push(MirVar::new("return_block", MirType::P));
        } else {
            res.push(mir);
        }
    }

    if !u.with_method(method, |m| m.is_static()) {
        let declaring = u.method_declaring(method);
        let mir = mir_type_of(u, declaring);
        let ty = if mir.is_block() { MirType::P } else { mir };
        args.push(MirVar::new("this", ty));
    }

    for (i, p) in u.method_params(method).into_iter().enumerate() {
        args.push(MirVar::new(format!("arg{i}"), mir_type_of(u, p.ty)));
    }

    (res, args)
}
