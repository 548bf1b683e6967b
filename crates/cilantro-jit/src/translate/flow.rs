//! Branches, switch, and exception control flow.
//!
//! Every function returns two slots: the in-flight exception and the value.
//! A throw site searches the enclosing protected regions statically; when
//! no clause can take the exception, the function returns with the
//! exception register set and the value slot zeroed. `leave` chains the
//! enclosing finally handlers innermost-first; `endfinally` dispatches
//! through the link recorded on its clause, and the last handler in a chain
//! re-checks the exception register to keep propagating an unwind.

use super::MethodCompiler;
use crate::{
    error::{JitError, jit_bail, jit_check},
    object::{ARRAY_LENGTH_OFFSET, POINTER_SIZE},
};
use cilantro_mir::{InsnCode, MemOp, MirType, Op, Reg};
use cilantro_types::{ClauseKind, StackType};
use cilantro_utils::TypeId;

impl MethodCompiler<'_> {
    pub(super) fn branch_truthiness(
        &mut self,
        il_offset: u32,
        il_target: u32,
        branch_if_true: bool,
    ) -> Result<(), JitError> {
        let value = self.pop()?;
        let label = self.branch_point(il_offset, il_target)?;

        let code = if branch_if_true {
            InsnCode::Bt
        } else {
            InsnCode::Bf
        };

        match self.stack_type_of(value.ty) {
            StackType::Int32 => {
                self.emit(code.int32(), vec![Op::Label(label), Op::Reg(value.reg)]);
            }
            StackType::Int64 | StackType::IntPtr | StackType::Ref => {
                self.emit(code, vec![Op::Label(label), Op::Reg(value.reg)]);
            }
            StackType::Object => {
                let reg = if self.is_interface_opt(value.ty) {
                    // an interface is null when its object half is null
                    let wk = self.wk();
                    let obj = self.new_reg(Some(wk.object));
                    self.emit(
                        InsnCode::Mov,
                        vec![
                            Op::Reg(obj),
                            Op::Mem(MemOp::base(MirType::P, POINTER_SIZE as i64, value.reg)),
                        ],
                    );
                    obj
                } else {
                    value.reg
                };
                self.emit(code, vec![Op::Label(label), Op::Reg(reg)]);
            }
            StackType::ValueType | StackType::Float => {
                jit_bail!("truth test on a non-integer stack entry")
            }
        }
        Ok(())
    }

    pub(super) fn switch(&mut self, il_offset: u32, targets: &[u32]) -> Result<(), JitError> {
        let value = self.pop()?;
        jit_check!(
            matches!(
                self.stack_type_of(value.ty),
                StackType::Int32 | StackType::IntPtr
            ),
            "switch selector must be an integer"
        );

        let mut ops = Vec::with_capacity(targets.len() + 1);
        ops.push(Op::Reg(value.reg));
        for &target in targets {
            let label = self.branch_point(il_offset, target)?;
            ops.push(Op::Label(label));
        }

        // out-of-range selectors (including negatives, compared unsigned)
        // fall through to the default path
        let not_taken = self.new_label();
        self.emit(
            InsnCode::UBge,
            vec![
                Op::Label(not_taken),
                Op::Reg(value.reg),
                Op::Int(targets.len() as i64),
            ],
        );
        self.emit(InsnCode::Switch, ops);
        self.place_label(not_taken);
        Ok(())
    }

    // ---- allocation and runtime throws -----------------------------------

    /// Allocate an object of `ty` with the given size operand, leaving the
    /// pointer in `result`. Every allocation is followed by an
    /// out-of-memory check, except when allocating OutOfMemoryException
    /// itself.
    pub(crate) fn alloc_object(
        &mut self,
        il_offset: u32,
        result: Reg,
        ty: TypeId,
        size: Op,
    ) -> Result<(), JitError> {
        let wk = self.wk();

        let type_op = if self.u.is_array(ty) {
            let element = self
                .u
                .element_type(ty)
                .ok_or_else(|| JitError::check("array type without an element"))?;
            let element_item = self.type_item(element)?;
            let (proto, func) = self.items.runtime.get_array_type;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(result),
                    Op::Ref(element_item),
                ],
            );
            Op::Reg(result)
        } else {
            Op::Ref(self.type_item(ty)?)
        };

        let (proto, func) = self.items.runtime.gc_new;
        self.emit(
            InsnCode::Call,
            vec![Op::Ref(proto), Op::Ref(func), Op::Reg(result), type_op, size],
        );

        if ty != wk.out_of_memory_exception {
            // a null result means the allocation failed
            let ok = self.new_label();
            self.emit(InsnCode::Bt, vec![Op::Label(ok), Op::Reg(result)]);
            self.throw_new(il_offset, wk.out_of_memory_exception)?;
            self.place_label(ok);
        }
        Ok(())
    }

    /// Construct and raise a runtime exception of `ty` through its
    /// parameterless constructor.
    pub(crate) fn throw_new(&mut self, il_offset: u32, ty: TypeId) -> Result<(), JitError> {
        let ctor = self
            .u
            .default_ctor(ty)
            .ok_or_else(|| JitError::NotFound(format!(
                "default constructor of {}",
                self.u.type_name(ty)
            )))?;
        let entry = self
            .items
            .functions
            .get(&ctor)
            .ok_or_else(|| JitError::NotFound("constructor prototype".into()))?;
        let (ctor_proto, ctor_func) = (entry.proto, entry.forward.ok_or_else(|| {
            JitError::check("constructor has no callable definition")
        })?);

        let exception_obj = self.new_reg(Some(ty));
        let size = self.u.managed_size(ty);
        self.alloc_object(il_offset, exception_obj, ty, Op::Int(size as i64))?;

        let exception_reg = self.exception_reg;
        self.emit(
            InsnCode::Call,
            vec![
                Op::Ref(ctor_proto),
                Op::Ref(ctor_func),
                Op::Reg(exception_reg),
                Op::Reg(exception_obj),
            ],
        );

        // the constructor itself may have thrown
        let no_exception = self.new_label();
        self.emit(
            InsnCode::Bf,
            vec![Op::Label(no_exception), Op::Reg(exception_reg)],
        );
        self.throw(il_offset, None)?;
        self.place_label(no_exception);

        self.emit(
            InsnCode::Mov,
            vec![Op::Reg(exception_reg), Op::Reg(exception_obj)],
        );
        self.throw(il_offset, Some(ty))
    }

    /// Static handler search for the exception currently in the exception
    /// register. `exc_type` is the thrown type when known at compile time.
    pub(crate) fn throw(
        &mut self,
        il_offset: u32,
        exc_type: Option<TypeId>,
    ) -> Result<(), JitError> {
        let body = self.body.clone();
        let mut temp_reg: Option<Reg> = None;
        let mut handled = false;

        for (index, clause) in body.clauses.iter().enumerate() {
            if !clause.try_contains(il_offset) {
                continue;
            }
            match clause.kind {
                ClauseKind::Finally | ClauseKind::Fault => {
                    self.jump_to_clause(index)?;
                    handled = true;
                    break;
                }
                ClauseKind::Catch(catch_type) => {
                    if let Some(thrown) = exc_type {
                        // resolved at compile time against the catch chain
                        let mut cursor = Some(thrown);
                        while let Some(t) = cursor {
                            if t == catch_type {
                                break;
                            }
                            cursor = self.u.base_type(t);
                        }
                        if cursor.is_some() {
                            self.jump_to_clause(index)?;
                            handled = true;
                            break;
                        }
                    } else {
                        // dynamic-type throw: instance-of call per candidate
                        let tmp = match temp_reg {
                            Some(r) => r,
                            None => {
                                let wk = self.wk();
                                let r = self.new_reg(Some(wk.boolean));
                                temp_reg = Some(r);
                                r
                            }
                        };
                        let type_item = self.type_item(catch_type)?;
                        let skip = self.new_label();
                        let (proto, func) = self.items.runtime.is_instance;
                        let exception_reg = self.exception_reg;
                        self.emit(
                            InsnCode::Call,
                            vec![
                                Op::Ref(proto),
                                Op::Ref(func),
                                Op::Reg(tmp),
                                Op::Reg(exception_reg),
                                Op::Ref(type_item),
                            ],
                        );
                        self.emit(InsnCode::Bf, vec![Op::Label(skip), Op::Reg(tmp)]);
                        self.jump_to_clause(index)?;
                        self.place_label(skip);
                    }
                }
                ClauseKind::Filter { .. } => jit_bail!("filter clauses are not supported"),
            }
        }

        if !handled {
            // no enclosing clause: propagate to the caller
            let exception_reg = self.exception_reg;
            if self.nres == 2 {
                self.emit(InsnCode::Ret, vec![Op::Reg(exception_reg), Op::Int(0)]);
            } else {
                self.emit(InsnCode::Ret, vec![Op::Reg(exception_reg)]);
            }
        }
        Ok(())
    }

    /// Jump into a handler. Catch handlers receive the exception in their
    /// snapshot's single stack slot.
    fn jump_to_clause(&mut self, index: usize) -> Result<(), JitError> {
        let body = self.body.clone();
        let clause = &body.clauses[index];
        let label = self.clause_labels[index].label;

        if let ClauseKind::Catch(catch_type) = clause.kind {
            let snapshot = self
                .snapshots
                .get(&clause.handler_offset)
                .ok_or_else(|| JitError::check("handler entry without a stack snapshot"))?;
            jit_check!(
                snapshot.stack.entries.len() == 1,
                "catch handler entry stack must hold exactly the exception"
            );
            jit_check!(
                snapshot.stack.entries[0].ty == Some(catch_type),
                "catch handler entry stack holds the wrong type"
            );
            let dest = snapshot.stack.entries[0].reg;
            let exception_reg = self.exception_reg;
            self.emit(InsnCode::Mov, vec![Op::Reg(dest), Op::Reg(exception_reg)]);
        }

        self.emit(InsnCode::Jmp, vec![Op::Label(label)]);
        Ok(())
    }

    pub(super) fn throw_op(&mut self, il_offset: u32) -> Result<(), JitError> {
        let value = self.pop()?;
        jit_check!(
            value.ty.is_none() || self.u.is_object_ref(value.ty),
            "throw of a non-object value"
        );
        self.stack.entries.clear();

        self.null_check(il_offset, value.reg, value.ty)?;
        let exception_reg = self.exception_reg;
        self.emit(
            InsnCode::Mov,
            vec![Op::Reg(exception_reg), Op::Reg(value.reg)],
        );
        self.throw(il_offset, value.ty)
    }

    /// `leave target`: chain every enclosing finally between here and the
    /// target so the innermost runs first and the last one jumps to the
    /// target. Entering the chain from inside a handler clears the
    /// exception register, so finally bodies observe a clean state.
    pub(super) fn leave(&mut self, il_offset: u32, il_target: u32) -> Result<(), JitError> {
        // leave empties the evaluation stack
        self.stack.entries.clear();
        let target_label = self.resolve_branch(il_offset, il_target)?;

        let body = self.body.clone();
        let mut in_protected_block = false;
        let mut last_clause: Option<usize> = None;

        for (index, clause) in body.clauses.iter().enumerate() {
            if clause.handler_contains(il_offset) {
                // the exception, if any, has been dealt with by this handler
                in_protected_block = true;
                let exception_reg = self.exception_reg;
                self.emit(InsnCode::Mov, vec![Op::Reg(exception_reg), Op::Int(0)]);
            }

            if !clause.try_contains(il_offset) {
                continue;
            }
            in_protected_block = true;

            if !matches!(clause.kind, ClauseKind::Finally) {
                continue;
            }
            // leaving this try runs its finally; link it into the chain
            let finally_label = self.clause_labels[index].label;
            self.clause_labels[index].endfinally = Some(target_label);
            self.clause_labels[index].last_in_chain = true;

            match last_clause {
                None => {
                    self.emit(InsnCode::Jmp, vec![Op::Label(finally_label)]);
                }
                Some(prev) => {
                    self.clause_labels[prev].endfinally = Some(finally_label);
                    self.clause_labels[prev].last_in_chain = false;
                }
            }
            last_clause = Some(index);
        }

        jit_check!(in_protected_block, "leave outside any protected region");

        if last_clause.is_none() {
            self.emit(InsnCode::Jmp, vec![Op::Label(target_label)]);
        }
        Ok(())
    }

    /// `endfinally`: jump to the destination `leave` recorded on this
    /// clause. The last clause in a chain first re-checks the exception
    /// register and propagates to the caller if an unwind is in flight.
    pub(super) fn endfinally(&mut self, il_offset: u32) -> Result<(), JitError> {
        self.stack.entries.clear();
        let body = self.body.clone();

        for (index, clause) in body.clauses.iter().enumerate() {
            if !clause.handler_contains(il_offset) {
                continue;
            }
            jit_check!(
                matches!(clause.kind, ClauseKind::Finally),
                "endfinally outside a finally handler"
            );
            let Some(endfinally_label) = self.clause_labels[index].endfinally else {
                jit_bail!("endfinally with no recorded continuation");
            };

            if self.clause_labels[index].last_in_chain {
                let skip = self.new_label();
                let exception_reg = self.exception_reg;
                self.emit(InsnCode::Bf, vec![Op::Label(skip), Op::Reg(exception_reg)]);
                if self.nres == 2 {
                    self.emit(InsnCode::Ret, vec![Op::Reg(exception_reg), Op::Int(0)]);
                } else {
                    self.emit(InsnCode::Ret, vec![Op::Reg(exception_reg)]);
                }
                self.place_label(skip);
            }

            self.emit(InsnCode::Jmp, vec![Op::Label(endfinally_label)]);
            return Ok(());
        }
        jit_bail!("endfinally outside any handler region")
    }

    // ---- runtime checks --------------------------------------------------

    /// Null-check an object reference, raising NullReferenceException.
    pub(crate) fn null_check(
        &mut self,
        il_offset: u32,
        reg: Reg,
        ty: Option<TypeId>,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let Some(ty) = ty else {
            // the null type: always throws
            return self.throw_new(il_offset, wk.null_reference_exception);
        };
        jit_check!(
            self.u.is_object_ref(Some(ty)),
            "null check of a non-object value"
        );

        let checked = if self.u.is_interface(ty) {
            let obj = self.new_reg(Some(wk.object));
            self.emit(
                InsnCode::Mov,
                vec![
                    Op::Reg(obj),
                    Op::Mem(MemOp::base(MirType::P, POINTER_SIZE as i64, reg)),
                ],
            );
            obj
        } else {
            reg
        };

        let not_null = self.new_label();
        self.emit(InsnCode::Bt, vec![Op::Label(not_null), Op::Reg(checked)]);
        self.throw_new(il_offset, wk.null_reference_exception)?;
        self.place_label(not_null);
        Ok(())
    }

    /// Bounds-check an array index, raising IndexOutOfRangeException.
    pub(crate) fn oob_check(
        &mut self,
        il_offset: u32,
        array_reg: Reg,
        index_reg: Reg,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let not_oob = self.new_label();
        self.emit(
            InsnCode::UBlt,
            vec![
                Op::Label(not_oob),
                Op::Reg(index_reg),
                Op::Mem(MemOp::base(
                    MirType::I32,
                    ARRAY_LENGTH_OFFSET as i64,
                    array_reg,
                )),
            ],
        );
        self.throw_new(il_offset, wk.index_out_of_range_exception)?;
        self.place_label(not_oob);
        Ok(())
    }
}
