//! The global link context.
//!
//! Modules are built in a local context by the JIT, then transferred here
//! whole and linked under one process-wide lock: function symbols get stable
//! addresses in a reserved range, bss storage is allocated and pinned,
//! imports resolve against exports and host-registered externals. The linked
//! snapshot is immutable and shared with the evaluator (and, out of process
//! scope here, the native code generator).

use crate::{
    Insn, InsnCode, Item, MemOp, MirError, MirType, Module, Op, Proto,
    interp::Value,
    module::RegClass,
};
use cilantro_utils::sync::{Arc, Mutex};
use rustc_hash::FxHashMap;

/// Function handles live in this reserved address range.
pub const FUNC_ADDR_BASE: u64 = 0x7f00_0000_0000_0000;
/// Host-function handles live in this reserved address range.
pub const HOST_ADDR_BASE: u64 = 0x7e00_0000_0000_0000;

/// A host function callable from linked code.
pub type HostFn = Arc<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LOp {
    Reg(u32),
    Int(i64),
    Float(f32),
    Double(f64),
    Label(u32),
    /// A resolved reference: function handle, data address, or extern value.
    Value(u64),
    Proto(u32),
    Mem(LMem),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LMem {
    pub ty: MirType,
    pub disp: i64,
    pub base: Option<u32>,
    pub index: Option<u32>,
    pub scale: u16,
}

#[derive(Debug, Clone)]
pub(crate) struct LInsn {
    pub code: InsnCode,
    pub ops: Vec<LOp>,
}

/// A lowered, executable function.
#[derive(Debug)]
pub struct ExecFunc {
    pub name: String,
    pub res: Vec<MirType>,
    pub args: Vec<MirType>,
    pub(crate) regs: Vec<RegClass>,
    pub(crate) insns: Vec<LInsn>,
    /// Label id -> instruction index.
    pub(crate) labels: Vec<usize>,
}

/// An immutable link snapshot.
pub struct LinkedProgram {
    pub(crate) protos: Vec<Proto>,
    pub(crate) funcs: Vec<Arc<ExecFunc>>,
    pub(crate) hosts: Vec<HostFn>,
    symbols: FxHashMap<String, u64>,
}

impl LinkedProgram {
    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    pub fn func_by_addr(&self, addr: u64) -> Option<&Arc<ExecFunc>> {
        if addr < FUNC_ADDR_BASE {
            return None;
        }
        self.funcs.get((addr - FUNC_ADDR_BASE) as usize)
    }
}

#[derive(Default)]
struct LinkInner {
    pending: Vec<Module>,
    funcs: Vec<Arc<ExecFunc>>,
    protos: Vec<Proto>,
    hosts: Vec<HostFn>,
    symbols: FxHashMap<String, u64>,
    /// Pinned zero-initialized storage, alive for the process lifetime.
    bss: Vec<Box<[u8]>>,
}

/// The mutex-guarded link context shared by every assembly JIT.
#[derive(Default)]
pub struct GlobalLinker {
    inner: Mutex<LinkInner>,
}

impl GlobalLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external data value (a type handle, a preallocated
    /// object, ...) under a symbol name.
    pub fn load_external(&self, name: &str, value: u64) {
        self.inner.lock().symbols.insert(name.to_string(), value);
    }

    /// Register a host function under a symbol name.
    pub fn load_host(&self, name: &str, f: HostFn) {
        let mut g = self.inner.lock();
        let idx = g.hosts.len();
        g.hosts.push(f);
        g.symbols
            .insert(name.to_string(), HOST_ADDR_BASE + idx as u64);
    }

    /// Transfer a finished module into the link context.
    pub fn load_module(&self, module: Module) {
        self.inner.lock().pending.push(module);
    }

    /// Link every pending module and return the new snapshot.
    pub fn link(&self) -> Result<Arc<LinkedProgram>, MirError> {
        let mut g = self.inner.lock();
        let pending = std::mem::take(&mut g.pending);
        tracing::debug!(modules = pending.len(), "linking");

        // first pass: assign addresses to every definition, in order across
        // the pending modules
        let mut next_func = g.funcs.len();
        for module in &pending {
            for item in &module.items {
                match item {
                    Item::Func(f) => {
                        g.symbols
                            .insert(f.name.clone(), FUNC_ADDR_BASE + next_func as u64);
                        next_func += 1;
                    }
                    Item::Bss { name, size } => {
                        let storage = vec![0u8; (*size).max(1)].into_boxed_slice();
                        let addr = storage.as_ptr() as u64;
                        g.bss.push(storage);
                        g.symbols.insert(name.clone(), addr);
                    }
                    _ => {}
                }
            }
        }

        // second pass: lower function bodies with refs resolved
        for module in &pending {
            let mut resolved: Vec<Option<LOp>> = Vec::with_capacity(module.items.len());
            for item in &module.items {
                let entry = match item {
                    Item::Proto(p) => {
                        g.protos.push(p.clone());
                        Some(LOp::Proto((g.protos.len() - 1) as u32))
                    }
                    Item::Import(name) | Item::Forward(name) | Item::Export(name) => {
                        let value = g
                            .symbols
                            .get(name)
                            .copied()
                            .ok_or_else(|| MirError::UnresolvedSymbol(name.clone()))?;
                        Some(LOp::Value(value))
                    }
                    Item::Bss { name, .. } | Item::Func(crate::Func { name, .. }) => {
                        let value = g
                            .symbols
                            .get(name)
                            .copied()
                            .ok_or_else(|| MirError::UnresolvedSymbol(name.clone()))?;
                        Some(LOp::Value(value))
                    }
                };
                resolved.push(entry);
            }

            for item in &module.items {
                if let Item::Func(f) = item {
                    let exec = lower_func(f, &resolved)?;
                    g.funcs.push(Arc::new(exec));
                }
            }
        }

        let program = Arc::new(LinkedProgram {
            protos: g.protos.clone(),
            funcs: g.funcs.clone(),
            hosts: g.hosts.clone(),
            symbols: g.symbols.clone(),
        });
        Ok(program)
    }

    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.inner.lock().symbols.get(name).copied()
    }
}

fn lower_func(f: &crate::Func, resolved: &[Option<LOp>]) -> Result<ExecFunc, MirError> {
    let mut labels = vec![usize::MAX; f.label_count() as usize];
    let mut insns = Vec::with_capacity(f.insns.len());
    for insn in &f.insns {
        if insn.code == InsnCode::LabelDef {
            if let Some(Op::Label(l)) = insn.ops.first() {
                labels[l.0 as usize] = insns.len();
            }
        }
        insns.push(lower_insn(insn, resolved)?);
    }
    Ok(ExecFunc {
        name: f.name.clone(),
        res: f.res.clone(),
        args: f.args.iter().map(|a| a.ty).collect(),
        regs: f.regs.iter().map(|(_, c)| *c).collect(),
        insns,
        labels,
    })
}

fn lower_insn(insn: &Insn, resolved: &[Option<LOp>]) -> Result<LInsn, MirError> {
    let mut ops = Vec::with_capacity(insn.ops.len());
    for op in &insn.ops {
        ops.push(match op {
            Op::Reg(r) => LOp::Reg(r.0),
            Op::Int(v) => LOp::Int(*v),
            Op::Float(v) => LOp::Float(*v),
            Op::Double(v) => LOp::Double(*v),
            Op::Label(l) => LOp::Label(l.0),
            Op::Ref(item) => resolved
                .get(item.0)
                .and_then(|r| *r)
                .ok_or(MirError::BadOperand("dangling item reference"))?,
            Op::Mem(MemOp {
                ty,
                disp,
                base,
                index,
                scale,
            }) => LOp::Mem(LMem {
                ty: *ty,
                disp: *disp,
                base: base.map(|r| r.0),
                index: index.map(|r| r.0),
                scale: *scale,
            }),
        });
    }
    Ok(LInsn {
        code: insn.code,
        ops,
    })
}
