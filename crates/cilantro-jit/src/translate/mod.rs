//! The per-method CIL-to-MIR translator.
//!
//! A single pass over the IL simulates the evaluation stack while emitting
//! MIR. At every branch target a snapshot of the stack is recorded; control
//! paths that meet are merged by widening forward snapshots and demanding an
//! exact match on backward edges, with register unification moves emitted on
//! every non-defining edge so the value locations agree along all paths.

mod arith;
mod arrays;
mod calls;
mod consts;
mod fields;
mod flow;
mod objects;
mod vars;

use crate::{
    driver::AssemblyItems,
    error::{JitError, jit_bail, jit_check},
    object::POINTER_SIZE,
    stack::{EvalStack, Snapshot, StackEntry, merge},
};
use cilantro_metadata::{ControlFlow, InsnDecoder, OpCode, Operand};
use cilantro_mir::{
    Insn, InsnCode, ItemRef, Label, MemOp, MirType, Module, Op, Reg, RegClass,
};
use cilantro_types::{ClauseKind, MethodBody, StackType, Universe, WellKnown};
use cilantro_utils::{AssemblyId, FieldId, MethodId, TypeId, sync::Arc};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

/// Per-clause labels: the handler entry, and the finally chain link filled
/// in by `leave`.
pub(crate) struct ClauseLabel {
    pub label: Label,
    pub endfinally: Option<Label>,
    pub last_in_chain: bool,
}

/// Where a local lives: a scalar register, or a stack slot whose address is
/// held in the register (value types, and locals whose address is taken).
#[derive(Clone, Copy)]
pub(crate) enum LocalStorage {
    Reg(Reg),
    Slot(Reg),
}

pub(crate) struct LocalSlot {
    pub storage: LocalStorage,
    pub ty: TypeId,
}

pub(crate) struct ArgSlot {
    pub ty: TypeId,
    pub reg: Reg,
    /// Shadow stack slot, present when the argument's address is taken.
    pub slot: Option<Reg>,
}

pub(crate) struct MethodCompiler<'a> {
    pub u: &'a Universe,
    pub items: &'a AssemblyItems,
    pub module: &'a mut Module,
    pub func: ItemRef,
    pub method: MethodId,
    pub assembly: AssemblyId,
    pub declaring: TypeId,
    pub body: Arc<MethodBody>,
    pub name_gen: u32,
    pub stack: EvalStack,
    pub snapshots: FxHashMap<u32, Snapshot>,
    pub clause_labels: Vec<ClauseLabel>,
    pub exception_reg: Reg,
    pub return_block_reg: Option<Reg>,
    /// Result slot count of this function (1 or 2).
    pub nres: usize,
    pub locals: Vec<LocalSlot>,
    pub args: Vec<ArgSlot>,
}

impl<'a> MethodCompiler<'a> {
    pub fn run(
        u: &'a Universe,
        items: &'a AssemblyItems,
        module: &'a mut Module,
        func: ItemRef,
        method: MethodId,
        nres: usize,
    ) -> Result<(), JitError> {
        let declaring = u.method_declaring(method);
        let assembly = u.with_method(method, |m| m.assembly);
        let body = u
            .method_body(method)
            .ok_or_else(|| JitError::check("translating a method without a body"))?;

        let exception_reg = module.func_mut(func).new_reg("exception", RegClass::I64);
        let return_block_reg = module.func(func).arg_reg("return_block");

        let mut compiler = MethodCompiler {
            u,
            items,
            module,
            func,
            method,
            assembly,
            declaring,
            body,
            name_gen: 0,
            stack: EvalStack::new(),
            snapshots: FxHashMap::default(),
            clause_labels: Vec::new(),
            exception_reg,
            return_block_reg,
            nres,
            locals: Vec::new(),
            args: Vec::new(),
        };
        compiler.prologue()?;
        compiler.translate()
    }

    // ---- small accessors -------------------------------------------------

    pub fn wk(&self) -> WellKnown {
        *self.u.well_known()
    }

    pub fn emit(&mut self, code: InsnCode, ops: Vec<Op>) {
        self.module.func_mut(self.func).append(Insn::new(code, ops));
    }

    pub fn prepend(&mut self, code: InsnCode, ops: Vec<Op>) {
        self.module
            .func_mut(self.func)
            .prepend(Insn::new(code, ops));
    }

    pub fn new_label(&mut self) -> Label {
        self.module.func_mut(self.func).new_label()
    }

    pub fn place_label(&mut self, label: Label) {
        self.module.func_mut(self.func).append(Insn::label(label));
    }

    pub fn stack_type_of(&self, ty: Option<TypeId>) -> StackType {
        match ty {
            Some(t) => self.u.stack_type(t),
            None => StackType::Object,
        }
    }

    pub fn is_interface_opt(&self, ty: Option<TypeId>) -> bool {
        ty.is_some_and(|t| self.u.is_interface(t))
    }

    /// The memory-operand type for a value of `ty`.
    pub fn mir_type(&self, ty: TypeId) -> MirType {
        mir_type_of(self.u, ty)
    }

    /// Allocate a fresh register for a value of the given tracked type.
    /// Value-type-classified values get stack backing storage and the
    /// register holds its address.
    pub fn new_reg(&mut self, ty: Option<TypeId>) -> Reg {
        self.name_gen += 1;
        let name = format!("s{}", self.name_gen);
        let wk = self.wk();

        let (class, block_size) = match ty {
            None => (RegClass::I64, None),
            Some(t) => match self.u.stack_type(t) {
                StackType::Float => {
                    if self.u.underlying_type(t) == wk.single {
                        (RegClass::F, None)
                    } else {
                        (RegClass::D, None)
                    }
                }
                StackType::ValueType => (RegClass::I64, Some(self.u.stack_size(t))),
                _ if self.u.is_interface(t) => (RegClass::I64, Some(self.u.stack_size(t))),
                _ => (RegClass::I64, None),
            },
        };

        let reg = self.module.func_mut(self.func).new_reg(name, class);
        if let Some(size) = block_size {
            // backing storage must exist on every path into the function
            self.prepend(
                InsnCode::Alloca,
                vec![Op::Reg(reg), Op::Int(size as i64)],
            );
        }
        reg
    }

    pub fn push(&mut self, ty: Option<TypeId>) -> Result<Reg, JitError> {
        jit_check!(
            self.stack.entries.len() < self.body.max_stack as usize,
            "evaluation stack exceeds the declared max stack"
        );
        let reg = self.new_reg(ty);
        self.stack.entries.push(StackEntry { ty, reg });
        Ok(reg)
    }

    pub fn pop(&mut self) -> Result<StackEntry, JitError> {
        self.stack
            .entries
            .pop()
            .ok_or_else(|| JitError::check("evaluation stack underflow"))
    }

    /// The plain move code for a value of this type.
    pub fn mov_code(&self, ty: Option<TypeId>) -> InsnCode {
        let wk = self.wk();
        match ty {
            Some(t) if self.u.underlying_type(t) == wk.single => InsnCode::FMov,
            Some(t) if self.u.underlying_type(t) == wk.double => InsnCode::DMov,
            _ => InsnCode::Mov,
        }
    }

    /// A move that also performs the implicit float widening or narrowing
    /// between the source and destination types.
    pub fn cast_code(&self, src: Option<TypeId>, dest: Option<TypeId>) -> InsnCode {
        let wk = self.wk();
        let src = src.map(|t| self.u.underlying_type(t));
        let dest = dest.map(|t| self.u.underlying_type(t));
        if src == Some(wk.single) {
            if dest == Some(wk.double) {
                InsnCode::F2D
            } else {
                InsnCode::FMov
            }
        } else if src == Some(wk.double) {
            if dest == Some(wk.single) {
                InsnCode::D2F
            } else {
                InsnCode::DMov
            }
        } else {
            InsnCode::Mov
        }
    }

    /// Inline copy for short block values, a `memcpy` call otherwise.
    pub fn emit_memcpy(&mut self, dest: Reg, src: Reg, count: usize) {
        if count <= 32 && count % 8 == 0 {
            for off in (0..count).step_by(8) {
                self.emit(
                    InsnCode::Mov,
                    vec![
                        Op::Mem(MemOp::base(MirType::I64, off as i64, dest)),
                        Op::Mem(MemOp::base(MirType::I64, off as i64, src)),
                    ],
                );
            }
        } else {
            let (proto, func) = self.items.runtime.memcpy;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(dest),
                    Op::Reg(src),
                    Op::Int(count as i64),
                ],
            );
        }
    }

    pub fn emit_zerofill(&mut self, dest: Reg, count: usize) {
        if count <= 32 && count % 8 == 0 {
            for off in (0..count).step_by(8) {
                self.emit(
                    InsnCode::Mov,
                    vec![
                        Op::Mem(MemOp::base(MirType::I64, off as i64, dest)),
                        Op::Int(0),
                    ],
                );
            }
        } else {
            let (proto, func) = self.items.runtime.memset;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(dest),
                    Op::Int(0),
                    Op::Int(count as i64),
                ],
            );
        }
    }

    pub fn type_item(&self, ty: TypeId) -> Result<ItemRef, JitError> {
        self.items
            .types
            .get(&ty)
            .copied()
            .ok_or_else(|| JitError::NotFound(format!("type item for {}", self.u.type_name(ty))))
    }

    // ---- prologue --------------------------------------------------------

    fn prologue(&mut self) -> Result<(), JitError> {
        let wk = self.wk();

        // no exception is in flight on entry
        let exception_reg = self.exception_reg;
        self.emit(InsnCode::Mov, vec![Op::Reg(exception_reg), Op::Int(0)]);

        // arguments: `this` first for instance methods, value types take it
        // by reference
        let is_static = self.u.with_method(self.method, |m| m.is_static());
        if !is_static {
            let this_ty = if self.u.is_value_type(self.declaring) {
                self.u.byref_type_of(self.declaring)?
            } else {
                self.declaring
            };
            let reg = self
                .module
                .func(self.func)
                .arg_reg("this")
                .ok_or_else(|| JitError::check("instance method without a this argument"))?;
            self.args.push(ArgSlot {
                ty: this_ty,
                reg,
                slot: None,
            });
        }
        for (i, p) in self.u.method_params(self.method).into_iter().enumerate() {
            let reg = self
                .module
                .func(self.func)
                .arg_reg(&format!("arg{i}"))
                .ok_or_else(|| JitError::check("argument register missing"))?;
            self.args.push(ArgSlot {
                ty: p.ty,
                reg,
                slot: None,
            });
        }

        // one decode pass to find address-taken locals and arguments
        let (addressed_locals, addressed_args) = self.scan_addressed()?;

        for &index in &addressed_args {
            let Some(arg) = self.args.get(index as usize) else {
                jit_bail!("ldarga of an argument out of range");
            };
            let (ty, reg) = (arg.ty, arg.reg);
            if matches!(self.u.stack_type(ty), StackType::ValueType) {
                // block arguments already live in addressable memory
                continue;
            }
            let size = self.u.stack_size(ty);
            self.name_gen += 1;
            let name = format!("s{}", self.name_gen);
            let slot = self.module.func_mut(self.func).new_reg(name, RegClass::I64);
            self.prepend(InsnCode::Alloca, vec![Op::Reg(slot), Op::Int(size as i64)]);
            let code = self.cast_code(Some(ty), Some(ty));
            self.emit(
                code,
                vec![Op::Mem(MemOp::base(self.mir_type(ty), 0, slot)), Op::Reg(reg)],
            );
            self.args[index as usize].slot = Some(slot);
        }

        // locals: value types and address-taken locals get slots, the rest
        // live in registers; everything is zero-initialized
        let body = self.body.clone();
        if !body.locals.is_empty() {
            jit_check!(
                body.init_locals,
                "methods without the init-locals bit are rejected"
            );
        }
        for local in &body.locals {
            let ty = local.ty;
            let stack_type = self.u.stack_type(ty);
            let needs_slot = matches!(stack_type, StackType::ValueType)
                || self.u.is_interface(ty)
                || addressed_locals.contains(&local.index);
            let storage = if needs_slot {
                let size = self.u.stack_size(ty);
                self.name_gen += 1;
                let name = format!("s{}", self.name_gen);
                let slot = self.module.func_mut(self.func).new_reg(name, RegClass::I64);
                self.prepend(InsnCode::Alloca, vec![Op::Reg(slot), Op::Int(size as i64)]);
                self.emit_zerofill(slot, size);
                LocalStorage::Slot(slot)
            } else {
                let reg = self.new_reg(Some(ty));
                let zero = match self.u.underlying_type(ty) {
                    t if t == wk.single => Insn::new(
                        InsnCode::FMov,
                        vec![Op::Reg(reg), Op::Float(0.0)],
                    ),
                    t if t == wk.double => Insn::new(
                        InsnCode::DMov,
                        vec![Op::Reg(reg), Op::Double(0.0)],
                    ),
                    _ => Insn::new(InsnCode::Mov, vec![Op::Reg(reg), Op::Int(0)]),
                };
                self.module.func_mut(self.func).append(zero);
                LocalStorage::Reg(reg)
            };
            self.locals.push(LocalSlot { storage, ty });
        }

        // handler entries get their labels and stack snapshots up front
        for clause in body.clauses.iter() {
            let label = self.new_label();
            let mut stack = EvalStack::new();
            match clause.kind {
                ClauseKind::Catch(catch_type) => {
                    let reg = self.new_reg(Some(catch_type));
                    stack.entries.push(StackEntry {
                        ty: Some(catch_type),
                        reg,
                    });
                }
                ClauseKind::Filter { .. } => {
                    jit_bail!("filter clauses are not supported");
                }
                ClauseKind::Finally | ClauseKind::Fault => {}
            }
            self.snapshots
                .insert(clause.handler_offset, Snapshot { label, stack });
            self.clause_labels.push(ClauseLabel {
                label,
                endfinally: None,
                last_in_chain: false,
            });
        }
        debug_assert_eq!(self.clause_labels.len(), body.clauses.len());

        Ok(())
    }

    fn scan_addressed(&self) -> Result<(FxHashSet<u32>, FxHashSet<u32>), JitError> {
        let mut locals = FxHashSet::default();
        let mut args = FxHashSet::default();
        let mut decoder = InsnDecoder::new(&self.body.il);
        while let Some(op) = decoder.next()? {
            match (op.opcode, &op.operand) {
                (OpCode::LdlocaS | OpCode::Ldloca, Operand::Var(v)) => {
                    locals.insert(*v as u32);
                }
                (OpCode::LdargaS | OpCode::Ldarga, Operand::Var(v)) => {
                    args.insert(*v as u32);
                }
                _ => {}
            }
        }
        Ok((locals, args))
    }

    // ---- merge points ----------------------------------------------------

    /// Emit the register-unification moves that make the current stack's
    /// values land in the snapshot's registers.
    fn emit_merge_moves(&mut self, snapshot: &EvalStack) {
        let pairs: Vec<(StackEntry, StackEntry)> = self
            .stack
            .entries
            .iter()
            .copied()
            .zip(snapshot.entries.iter().copied())
            .filter(|(cur, snap)| cur.reg != snap.reg)
            .collect();
        for (cur, snap) in pairs {
            let code = self.mov_code(cur.ty);
            self.emit(code, vec![Op::Reg(snap.reg), Op::Reg(cur.reg)]);
        }
    }

    /// Resolve a branch target to its label, recording or merging the stack
    /// snapshot. Forward targets may widen; backward targets must match.
    pub fn resolve_branch(&mut self, il_offset: u32, il_target: u32) -> Result<Label, JitError> {
        if il_target >= il_offset {
            match self.snapshots.get_mut(&il_target) {
                None => {
                    let label = self.new_label();
                    let stack = self.stack.snapshot();
                    self.snapshots.insert(il_target, Snapshot { label, stack });
                    Ok(label)
                }
                Some(snapshot) => {
                    let mut snap_stack = snapshot.stack.clone();
                    let label = snapshot.label;
                    merge(self.u, &self.stack, &mut snap_stack, true)?;
                    if let Some(s) = self.snapshots.get_mut(&il_target) {
                        s.stack = snap_stack.clone();
                    }
                    self.emit_merge_moves(&snap_stack);
                    Ok(label)
                }
            }
        } else {
            let Some(snapshot) = self.snapshots.get(&il_target) else {
                jit_bail!("backward branch into unscanned code");
            };
            let mut snap_stack = snapshot.stack.clone();
            let label = snapshot.label;
            merge(self.u, &self.stack, &mut snap_stack, false)?;
            self.emit_merge_moves(&snap_stack);
            Ok(label)
        }
    }

    /// A branch may not enter or leave a protected region except through
    /// the documented edges; validate, then resolve.
    pub fn branch_point(&mut self, il_offset: u32, il_target: u32) -> Result<Label, JitError> {
        let body = self.body.clone();
        for clause in &body.clauses {
            let offset_in_try = clause.try_contains(il_offset);
            let target_in_try = clause.try_contains(il_target);
            if offset_in_try {
                jit_check!(target_in_try, "branch exits a protected region");
                break;
            }
            jit_check!(!target_in_try, "branch enters a protected region");

            let offset_in_handler = clause.handler_contains(il_offset);
            let target_in_handler = clause.handler_contains(il_target);
            if offset_in_handler {
                jit_check!(target_in_handler, "branch exits a handler region");
                break;
            }
            jit_check!(!target_in_handler, "branch enters a handler region");
        }
        self.resolve_branch(il_offset, il_target)
    }

    // ---- the main loop ---------------------------------------------------

    fn translate(&mut self) -> Result<(), JitError> {
        let body = self.body.clone();
        let mut decoder = InsnDecoder::new(&body.il);
        let mut last_cf: Option<ControlFlow> = None;

        while let Some(op) = decoder.next()? {
            let il_offset = op.offset;

            // after an unconditional transfer the stack starts over: empty,
            // or whatever a recorded edge already established
            if matches!(last_cf, Some(ControlFlow::Branch | ControlFlow::Throw)) {
                match self.snapshots.get(&il_offset) {
                    None => self.stack.entries.clear(),
                    Some(snapshot) => self.stack = snapshot.stack.clone(),
                }
            }

            let label = match self.snapshots.get(&il_offset) {
                Some(snapshot) => {
                    let mut snap_stack = snapshot.stack.clone();
                    let label = snapshot.label;
                    merge(self.u, &self.stack, &mut snap_stack, true)?;
                    self.emit_merge_moves(&snap_stack);
                    if let Some(s) = self.snapshots.get_mut(&il_offset) {
                        s.stack = snap_stack.clone();
                    }
                    self.stack = snap_stack;
                    label
                }
                None => {
                    let label = self.new_label();
                    let stack = self.stack.snapshot();
                    self.snapshots.insert(il_offset, Snapshot { label, stack });
                    label
                }
            };
            self.place_label(label);

            // falling into a handler entry, a handler end, or a try end is
            // not a documented control edge
            for clause in &body.clauses {
                if clause.handler_offset == il_offset
                    || clause.handler_offset + clause.handler_length == il_offset
                    || clause.try_offset + clause.try_length == il_offset
                {
                    jit_check!(
                        matches!(
                            last_cf,
                            Some(
                                ControlFlow::Branch
                                    | ControlFlow::Throw
                                    | ControlFlow::Return
                            )
                        ),
                        "control falls across a protected-region boundary at {il_offset}"
                    );
                }
            }

            trace!(offset = il_offset, opcode = op.opcode.name(), "translate");
            last_cf = Some(op.opcode.control_flow());
            self.translate_op(il_offset, op.opcode, op.operand)?;
        }

        jit_check!(
            matches!(
                last_cf,
                Some(ControlFlow::Branch | ControlFlow::Throw | ControlFlow::Return)
            ),
            "method body falls off the end"
        );
        Ok(())
    }

    fn translate_op(
        &mut self,
        il_offset: u32,
        opcode: OpCode,
        operand: Operand,
    ) -> Result<(), JitError> {
        use OpCode::*;

        let int_operand = |operand: &Operand| match operand {
            Operand::Int32(v) => *v,
            Operand::Var(v) => *v as i32,
            _ => 0,
        };
        let token_operand = |operand: &Operand| match operand {
            Operand::Token(t) => *t,
            _ => cilantro_metadata::Token::NULL,
        };
        let target_operand = |operand: &Operand| match operand {
            Operand::Target(t) => *t,
            _ => 0,
        };

        // inline member operands resolve and get their accessibility checks
        // here, once
        let field_operand = |c: &Self| -> Result<FieldId, JitError> {
            let field = c.u.resolve_field_token(c.assembly, token_operand(&operand))?;
            jit_check!(
                c.u.check_field_accessibility(c.declaring, field),
                "field is not accessible from here"
            );
            Ok(field)
        };
        let method_operand = |c: &Self| -> Result<MethodId, JitError> {
            let method = c
                .u
                .resolve_method_token(c.assembly, token_operand(&operand))?;
            jit_check!(
                c.u.check_method_accessibility(c.declaring, method),
                "method is not accessible from here"
            );
            Ok(method)
        };
        let type_operand = |c: &Self| -> Result<TypeId, JitError> {
            let type_args = c.u.with_type(c.declaring, |t| t.generic_args.clone());
            let ty = c
                .u
                .resolve_type_token(c.assembly, token_operand(&operand), &type_args, &[])?
                .ok_or_else(|| JitError::check("null type token"))?;
            jit_check!(
                c.u.check_type_visibility(c.declaring, ty),
                "type is not visible from here"
            );
            Ok(ty)
        };

        match opcode {
            Nop | Break => {}

            // arithmetic
            Add => self.binary_numeric(il_offset, InsnCode::Add, false)?,
            Sub => self.binary_numeric(il_offset, InsnCode::Sub, false)?,
            Mul => self.binary_numeric(il_offset, InsnCode::Mul, false)?,
            Div => self.binary_numeric(il_offset, InsnCode::Div, false)?,
            DivUn => self.binary_numeric(il_offset, InsnCode::UDiv, true)?,
            Rem => self.binary_numeric(il_offset, InsnCode::Mod, false)?,
            RemUn => self.binary_numeric(il_offset, InsnCode::UMod, true)?,
            And => self.binary_numeric(il_offset, InsnCode::And, true)?,
            Or => self.binary_numeric(il_offset, InsnCode::Or, true)?,
            Xor => self.binary_numeric(il_offset, InsnCode::Xor, true)?,
            Shl => self.shift(InsnCode::LSh)?,
            Shr => self.shift(InsnCode::RSh)?,
            ShrUn => self.shift(InsnCode::URSh)?,
            Neg => self.unary_neg()?,
            Not => self.unary_not()?,

            ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvR4 | ConvR8 | ConvU1 | ConvU2 | ConvU4
            | ConvU8 | ConvI | ConvU | ConvRUn => self.convert(opcode)?,

            Ceq => self.compare(InsnCode::Eq)?,
            Cgt => self.compare(InsnCode::Gt)?,
            CgtUn => self.compare(InsnCode::UGt)?,
            Clt => self.compare(InsnCode::Lt)?,
            CltUn => self.compare(InsnCode::ULt)?,

            // constants and plain stack shuffles
            LdcI4M1 => self.ldc_i4(-1)?,
            LdcI40 | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45 | LdcI46 | LdcI47 | LdcI48 => {
                self.ldc_i4(opcode as i32 - LdcI40 as i32)?
            }
            LdcI4S | LdcI4 => self.ldc_i4(int_operand(&operand))?,
            LdcI8 => match &operand {
                Operand::Int64(v) => self.ldc_i8(*v)?,
                _ => jit_bail!("ldc.i8 without an int64 operand"),
            },
            LdcR4 => match &operand {
                Operand::Float32(v) => self.ldc_r4(*v)?,
                _ => jit_bail!("ldc.r4 without a float operand"),
            },
            LdcR8 => match &operand {
                Operand::Float64(v) => self.ldc_r8(*v)?,
                _ => jit_bail!("ldc.r8 without a double operand"),
            },
            Ldnull => self.ldnull()?,
            Ldstr => self.ldstr(token_operand(&operand))?,
            Dup => self.dup()?,
            Pop => {
                self.pop()?;
            }

            // locals and arguments
            Stloc0 | Stloc1 | Stloc2 | Stloc3 => self.stloc(opcode as u32 - Stloc0 as u32)?,
            StlocS | Stloc => self.stloc(int_operand(&operand) as u32)?,
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 => self.ldloc(opcode as u32 - Ldloc0 as u32)?,
            LdlocS | Ldloc => self.ldloc(int_operand(&operand) as u32)?,
            LdlocaS | Ldloca => self.ldloca(int_operand(&operand) as u32)?,
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 => self.ldarg(opcode as u32 - Ldarg0 as u32)?,
            LdargS | Ldarg => self.ldarg(int_operand(&operand) as u32)?,
            StargS | Starg => self.starg(int_operand(&operand) as u32)?,
            LdargaS | Ldarga => self.ldarga(int_operand(&operand) as u32)?,

            // fields
            Stsfld => {
                let field = field_operand(self)?;
                self.stsfld(field)?;
            }
            Ldsfld => {
                let field = field_operand(self)?;
                self.ldsfld(field)?;
            }
            Stfld => {
                let field = field_operand(self)?;
                self.stfld(il_offset, field)?;
            }
            Ldfld => {
                let field = field_operand(self)?;
                self.ldfld(il_offset, field)?;
            }
            Ldflda => {
                let field = field_operand(self)?;
                self.ldflda(il_offset, field)?;
            }

            // calls
            Call | Callvirt | Newobj => {
                let callee = method_operand(self)?;
                self.call(il_offset, opcode, callee)?;
            }
            Ret => self.ret()?,

            // object model
            Initobj => {
                let ty = type_operand(self)?;
                self.initobj(ty)?;
            }
            Box => {
                let ty = type_operand(self)?;
                self.box_value(il_offset, ty)?;
            }
            Isinst | Castclass | UnboxAny => {
                let ty = type_operand(self)?;
                self.cast_class(il_offset, opcode, ty)?;
            }

            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI
            | LdindR4 | LdindR8 | LdindRef => self.ldind(il_offset, opcode)?,
            StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindI | StindRef => {
                self.stind(il_offset, opcode)?
            }

            // arrays
            Newarr => {
                let ty = type_operand(self)?;
                self.newarr(il_offset, ty)?;
            }
            Ldlen => self.ldlen(il_offset)?,
            StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemI
            | StelemRef => self.stelem(il_offset, self.stelem_operand_type(opcode))?,
            Stelem => {
                let ty = type_operand(self)?;
                self.stelem(il_offset, Some(ty))?;
            }
            LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8
            | LdelemI | LdelemR4 | LdelemR8 | LdelemRef => {
                self.ldelem(il_offset, self.ldelem_operand_type(opcode))?
            }
            Ldelem => {
                let ty = type_operand(self)?;
                self.ldelem(il_offset, Some(ty))?;
            }
            Ldelema => {
                let ty = type_operand(self)?;
                self.ldelema(il_offset, ty)?;
            }

            // branches
            Br | BrS => {
                let label = self.branch_point(il_offset, target_operand(&operand))?;
                self.emit(InsnCode::Jmp, vec![Op::Label(label)]);
            }
            Brfalse | BrfalseS => self.branch_truthiness(il_offset, target_operand(&operand), false)?,
            Brtrue | BrtrueS => self.branch_truthiness(il_offset, target_operand(&operand), true)?,
            Beq | BeqS => self.compare_branch(InsnCode::Beq, il_offset, target_operand(&operand))?,
            Bge | BgeS => self.compare_branch(InsnCode::Bge, il_offset, target_operand(&operand))?,
            Bgt | BgtS => self.compare_branch(InsnCode::Bgt, il_offset, target_operand(&operand))?,
            Ble | BleS => self.compare_branch(InsnCode::Ble, il_offset, target_operand(&operand))?,
            Blt | BltS => self.compare_branch(InsnCode::Blt, il_offset, target_operand(&operand))?,
            BneUn | BneUnS => self.compare_branch(InsnCode::Bne, il_offset, target_operand(&operand))?,
            BgeUn | BgeUnS => self.compare_branch(InsnCode::UBge, il_offset, target_operand(&operand))?,
            BgtUn | BgtUnS => self.compare_branch(InsnCode::UBgt, il_offset, target_operand(&operand))?,
            BleUn | BleUnS => self.compare_branch(InsnCode::UBle, il_offset, target_operand(&operand))?,
            BltUn | BltUnS => self.compare_branch(InsnCode::UBlt, il_offset, target_operand(&operand))?,
            Switch => match &operand {
                Operand::Switch(targets) => {
                    let targets = targets.clone();
                    self.switch(il_offset, &targets)?
                }
                _ => jit_bail!("switch without a jump table"),
            },

            // exception control flow
            Throw => self.throw_op(il_offset)?,
            Leave | LeaveS => self.leave(il_offset, target_operand(&operand))?,
            Endfinally => self.endfinally(il_offset)?,

            other => jit_bail!("unsupported opcode {}", other.name()),
        }
        Ok(())
    }

    fn stelem_operand_type(&self, opcode: OpCode) -> Option<TypeId> {
        let wk = self.wk();
        match opcode {
            OpCode::StelemI1 => Some(wk.sbyte),
            OpCode::StelemI2 => Some(wk.int16),
            OpCode::StelemI4 => Some(wk.int32),
            OpCode::StelemI8 => Some(wk.int64),
            OpCode::StelemR4 => Some(wk.single),
            OpCode::StelemR8 => Some(wk.double),
            OpCode::StelemI => Some(wk.intptr),
            _ => None,
        }
    }

    fn ldelem_operand_type(&self, opcode: OpCode) -> Option<TypeId> {
        let wk = self.wk();
        match opcode {
            OpCode::LdelemI1 => Some(wk.sbyte),
            OpCode::LdelemU1 => Some(wk.byte),
            OpCode::LdelemI2 => Some(wk.int16),
            OpCode::LdelemU2 => Some(wk.uint16),
            OpCode::LdelemI4 => Some(wk.int32),
            OpCode::LdelemU4 => Some(wk.uint32),
            OpCode::LdelemI8 => Some(wk.int64),
            OpCode::LdelemI => Some(wk.intptr),
            OpCode::LdelemR4 => Some(wk.single),
            OpCode::LdelemR8 => Some(wk.double),
            _ => None,
        }
    }

    /// Load-size extension code for reading a possibly-small value into a
    /// stack register.
    pub fn load_extend_code(&self, field_type: TypeId) -> InsnCode {
        let wk = self.wk();
        let t = self.u.underlying_type(field_type);
        if t == wk.sbyte || t == wk.boolean {
            InsnCode::Ext8
        } else if t == wk.byte {
            InsnCode::UExt8
        } else if t == wk.int16 {
            InsnCode::Ext16
        } else if t == wk.uint16 || t == wk.char {
            InsnCode::UExt16
        } else if t == wk.single {
            InsnCode::FMov
        } else if t == wk.double {
            InsnCode::DMov
        } else {
            InsnCode::Mov
        }
    }

    /// Sign-extend an Int32-classified index register to native width.
    pub fn extend_index(&mut self, reg: Reg) {
        self.emit(InsnCode::Ext32, vec![Op::Reg(reg), Op::Reg(reg)]);
    }

    pub fn pointer_size(&self) -> usize {
        POINTER_SIZE
    }
}

/// The MIR-level type a value of `ty` moves around as.
pub(crate) fn mir_type_of(u: &Universe, ty: TypeId) -> MirType {
    let wk = *u.well_known();
    let t = u.underlying_type(ty);
    if t == wk.byte {
        MirType::U8
    } else if t == wk.sbyte || t == wk.boolean {
        MirType::I8
    } else if t == wk.uint16 || t == wk.char {
        MirType::U16
    } else if t == wk.int16 {
        MirType::I16
    } else if t == wk.uint32 {
        MirType::U32
    } else if t == wk.int32 {
        MirType::I32
    } else if t == wk.uint64 || t == wk.uintptr {
        MirType::U64
    } else if t == wk.int64 || t == wk.intptr {
        MirType::I64
    } else if t == wk.single {
        MirType::F
    } else if t == wk.double {
        MirType::D
    } else if u.is_value_type(t) || u.is_interface(t) {
        MirType::Blk(u.stack_size(t))
    } else {
        MirType::P
    }
}
