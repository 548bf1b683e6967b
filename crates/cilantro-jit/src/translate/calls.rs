//! Calls, virtual dispatch, object construction, and return.
//!
//! `newobj` is handled with the calls because it is one: the receiver is
//! freshly allocated instead of popped. Virtual dispatch goes through the
//! object's vtable; an interface receiver is a fat pointer whose first half
//! already addresses the interface's slot run.

use super::MethodCompiler;
use crate::{
    error::{JitError, jit_bail, jit_check},
    object::{POINTER_SIZE, VTABLE_FUNCTIONS_OFFSET},
};
use cilantro_metadata::OpCode;
use cilantro_mir::{InsnCode, MemOp, MirType, Op, Reg};
use cilantro_types::StackType;
use cilantro_utils::{MethodId, TypeId};

impl MethodCompiler<'_> {
    pub(super) fn call(
        &mut self,
        il_offset: u32,
        opcode: OpCode,
        callee: MethodId,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let (callee_static, callee_virtual, callee_abstract, callee_rt_special, callee_inline) =
            self.u.with_method(callee, |m| {
                (
                    m.is_static(),
                    m.is_virtual(),
                    m.is_abstract(),
                    m.is_rt_special_name(),
                    m.is_aggressive_inlining(),
                )
            });
        let callee_name = self.u.method_name(callee);
        let callee_declaring = self.u.method_declaring(callee);
        let params = self.u.method_params(callee);
        let return_type = self.u.method_return_type(callee);

        match opcode {
            OpCode::Newobj => {
                jit_check!(
                    callee_rt_special && callee_name == ".ctor",
                    "newobj must call a constructor"
                );
            }
            OpCode::Callvirt => {
                jit_check!(!callee_static, "callvirt of a static method");
            }
            _ => {
                jit_check!(!callee_abstract, "call of an abstract method");
            }
        }

        // arguments come off the stack last-first, with the implicit
        // conversions the signature demands
        let mut arg_ops: Vec<Op> = vec![Op::Int(0); params.len()];
        for i in (0..params.len()).rev() {
            let sig_ty = params[i].ty;
            let arg = self.pop()?;
            let mut arg_reg = arg.reg;
            let mut arg_ty = arg.ty;

            if arg_ty == Some(wk.int32) {
                if sig_ty == wk.sbyte
                    || sig_ty == wk.byte
                    || sig_ty == wk.boolean
                    || sig_ty == wk.int16
                    || sig_ty == wk.uint16
                {
                    // the narrowing happens in the move into the argument
                    arg_ty = Some(sig_ty);
                } else if sig_ty == wk.intptr {
                    self.emit(InsnCode::Ext32, vec![Op::Reg(arg_reg), Op::Reg(arg_reg)]);
                    arg_ty = Some(sig_ty);
                } else if sig_ty == wk.uintptr {
                    self.emit(InsnCode::UExt32, vec![Op::Reg(arg_reg), Op::Reg(arg_reg)]);
                    arg_ty = Some(sig_ty);
                }
            } else if arg_ty == Some(wk.intptr) {
                if self.is_integer_type(sig_ty) {
                    arg_ty = Some(sig_ty);
                }
            } else if arg_ty == Some(wk.single) {
                if sig_ty == wk.double {
                    let wide = self.new_reg(Some(wk.double));
                    self.emit(InsnCode::F2D, vec![Op::Reg(wide), Op::Reg(arg_reg)]);
                    arg_reg = wide;
                    arg_ty = Some(sig_ty);
                }
            } else if arg_ty == Some(wk.double) {
                if sig_ty == wk.single {
                    let narrow = self.new_reg(Some(wk.single));
                    self.emit(InsnCode::D2F, vec![Op::Reg(narrow), Op::Reg(arg_reg)]);
                    arg_reg = narrow;
                    arg_ty = Some(sig_ty);
                }
            }

            // object into an interface parameter materializes a fat pointer
            if self.u.is_interface(sig_ty) && !self.is_interface_opt(arg_ty) && arg_ty.is_some() {
                let fat = self.new_reg(Some(sig_ty));
                self.cast_obj_to_interface(fat, arg_reg, arg_ty, sig_ty, false)?;
                arg_reg = fat;
                arg_ty = Some(sig_ty);
            }

            jit_check!(
                self.u.verifier_assignable_to(arg_ty, Some(sig_ty)),
                "argument is not assignable to its parameter"
            );
            arg_ops[i] = Op::Reg(arg_reg);
        }

        // the receiver
        let mut this_entry: Option<(Option<TypeId>, Reg)> = None;
        let mut newobj_number_reg: Option<Reg> = None;
        let mut newobj_this_reg: Option<Reg> = None;
        if !callee_static {
            if opcode == OpCode::Newobj {
                let this_type = callee_declaring;
                jit_check!(
                    !self.u.is_abstract(this_type),
                    "newobj of an abstract type"
                );
                jit_check!(
                    !self.u.is_interface(this_type),
                    "newobj of an interface type"
                );

                let mut this_reg = self.push(Some(this_type))?;
                if self.u.is_value_type(this_type) {
                    if self.u.stack_type(this_type) != StackType::ValueType {
                        // a primitive-classified struct: construct into a
                        // temporary slot, copy back after the constructor
                        newobj_number_reg = Some(this_reg);
                        let slot = self.new_reg(Some(wk.intptr));
                        self.prepend(
                            InsnCode::Alloca,
                            vec![
                                Op::Reg(slot),
                                Op::Int(self.u.stack_size(this_type) as i64),
                            ],
                        );
                        this_reg = slot;
                    }
                    self.emit_zerofill(this_reg, self.u.stack_size(this_type));
                } else {
                    let size = self.u.managed_size(this_type);
                    self.alloc_object(il_offset, this_reg, this_type, Op::Int(size as i64))?;
                }
                newobj_this_reg = Some(this_reg);
                this_entry = Some((Some(this_type), this_reg));
            } else {
                let this = self.pop()?;
                let mut expected = callee_declaring;
                if self.u.is_value_type(expected) {
                    expected = self.u.byref_type_of(expected)?;
                }
                jit_check!(
                    self.u.verifier_assignable_to(this.ty, Some(expected)),
                    "receiver is not assignable to the declaring type"
                );
                self.null_check(il_offset, this.reg, this.ty)?;
                this_entry = Some((this.ty, this.reg));
            }
        }

        let entry = self
            .items
            .functions
            .get(&callee)
            .ok_or_else(|| JitError::NotFound("callee prototype".into()))?;
        let (proto, forward) = (entry.proto, entry.forward);

        // callee operand: vtable dispatch or the direct forward
        let callee_op = if opcode == OpCode::Callvirt && callee_virtual {
            let (this_ty, this_reg) = this_entry
                .ok_or_else(|| JitError::check("virtual call without a receiver"))?;
            let slot_ptr = self.new_reg(Some(wk.intptr));
            // the first word is the vtable pointer for objects and the slot
            // run pointer for interface fat pointers
            self.emit(
                InsnCode::Mov,
                vec![
                    Op::Reg(slot_ptr),
                    Op::Mem(MemOp::base(MirType::P, 0, this_reg)),
                ],
            );

            let (offset, vtable_index) = if self.is_interface_opt(this_ty) {
                // the true object pointer is the second half
                self.emit(
                    InsnCode::Mov,
                    vec![
                        Op::Reg(this_reg),
                        Op::Mem(MemOp::base(MirType::P, POINTER_SIZE as i64, this_reg)),
                    ],
                );
                let index = self
                    .u
                    .method_vtable_offset(callee)
                    .ok_or_else(|| JitError::check("virtual method without a slot"))?;
                (0usize, index)
            } else {
                let receiver_ty = this_ty
                    .ok_or_else(|| JitError::check("virtual call on the null type"))?;
                let index = if self.u.is_interface(callee_declaring) {
                    let implementing = self
                        .u
                        .interface_method_impl(receiver_ty, callee)
                        .ok_or_else(|| {
                            JitError::check("receiver does not implement the interface")
                        })?;
                    self.u
                        .method_vtable_offset(implementing)
                        .ok_or_else(|| JitError::check("implementation without a slot"))?
                } else {
                    self.u
                        .method_vtable_offset(callee)
                        .ok_or_else(|| JitError::check("virtual method without a slot"))?
                };
                (VTABLE_FUNCTIONS_OFFSET, index)
            };

            self.emit(
                InsnCode::Mov,
                vec![
                    Op::Reg(slot_ptr),
                    Op::Mem(MemOp::base(
                        MirType::P,
                        (offset + vtable_index as usize * POINTER_SIZE) as i64,
                        slot_ptr,
                    )),
                ],
            );
            Op::Reg(slot_ptr)
        } else {
            Op::Ref(forward.ok_or_else(|| JitError::check("call target has no definition"))?)
        };

        // results: the exception slot always, the value slot when the
        // callee returns one
        let ret_reg = match return_type {
            Some(ret) => Some(self.push(Some(self.u.intermediate_type(ret)))?),
            None => None,
        };

        let mut ops = Vec::with_capacity(4 + arg_ops.len());
        ops.push(Op::Ref(proto));
        ops.push(callee_op);
        let exception_reg = self.exception_reg;
        ops.push(Op::Reg(exception_reg));
        if let Some(ret) = ret_reg {
            ops.push(Op::Reg(ret));
        }
        if let Some((_, this_reg)) = this_entry {
            ops.push(Op::Reg(this_reg));
        }
        ops.extend(arg_ops);

        let code = if callee_inline {
            InsnCode::Inline
        } else {
            InsnCode::Call
        };
        self.emit(code, ops);

        // every call is followed by the exception-register dispatch
        let no_exception = self.new_label();
        self.emit(
            InsnCode::Bf,
            vec![Op::Label(no_exception), Op::Reg(exception_reg)],
        );
        self.throw(il_offset, None)?;
        self.place_label(no_exception);

        // a primitive-classified struct constructor built into a slot; copy
        // the payload back onto the evaluation stack
        if let (Some(number), Some(slot)) = (newobj_number_reg, newobj_this_reg) {
            let this_type = callee_declaring;
            let code = self.mov_code(Some(this_type));
            self.emit(
                code,
                vec![
                    Op::Reg(number),
                    Op::Mem(MemOp::base(self.mir_type(this_type), 0, slot)),
                ],
            );
        }
        Ok(())
    }

    fn is_integer_type(&self, ty: TypeId) -> bool {
        let wk = self.wk();
        ty == wk.boolean
            || ty == wk.char
            || ty == wk.sbyte
            || ty == wk.byte
            || ty == wk.int16
            || ty == wk.uint16
            || ty == wk.int32
            || ty == wk.uint32
            || ty == wk.int64
            || ty == wk.uint64
            || ty == wk.intptr
            || ty == wk.uintptr
    }

    pub(super) fn ret(&mut self) -> Result<(), JitError> {
        let return_type = self.u.method_return_type(self.method);
        let Some(return_type) = return_type else {
            jit_check!(
                self.stack.entries.is_empty(),
                "returning from a void method with values on the stack"
            );
            self.emit(InsnCode::Ret, vec![Op::Int(0)]);
            return Ok(());
        };

        let method_ret = self.u.underlying_type(return_type);
        let value = self.pop()?;
        jit_check!(
            self.stack.entries.is_empty(),
            "values left on the stack at return"
        );
        jit_check!(
            self.u.verifier_assignable_to(value.ty, Some(return_type)),
            "returned value is not assignable to the return type"
        );

        match self.stack_type_of(value.ty) {
            StackType::Object => {
                let ret_is_interface = self.u.is_interface(method_ret);
                let value_is_interface = self.is_interface_opt(value.ty);
                match (value_is_interface, ret_is_interface) {
                    (true, true) => self.ret_block(value.reg, method_ret),
                    (false, true) => {
                        let block = self.return_block_reg.ok_or_else(|| {
                            JitError::check("interface return without a return block")
                        })?;
                        self.cast_obj_to_interface(
                            block, value.reg, value.ty, method_ret, false,
                        )?;
                        self.emit(InsnCode::Ret, vec![Op::Int(0)]);
                        Ok(())
                    }
                    (true, false) => {
                        self.emit(
                            InsnCode::Ret,
                            vec![
                                Op::Int(0),
                                Op::Mem(MemOp::base(
                                    MirType::P,
                                    POINTER_SIZE as i64,
                                    value.reg,
                                )),
                            ],
                        );
                        Ok(())
                    }
                    (false, false) => {
                        self.emit(InsnCode::Ret, vec![Op::Int(0), Op::Reg(value.reg)]);
                        Ok(())
                    }
                }
            }
            StackType::ValueType => self.ret_block(value.reg, method_ret),
            StackType::Ref => jit_bail!("cannot return a byref"),
            _ => {
                self.emit(InsnCode::Ret, vec![Op::Int(0), Op::Reg(value.reg)]);
                Ok(())
            }
        }
    }

    /// Large value returns copy into the caller-provided return block.
    fn ret_block(&mut self, src: Reg, ret_type: TypeId) -> Result<(), JitError> {
        let block = self
            .return_block_reg
            .ok_or_else(|| JitError::check("block return without a return block"))?;
        self.emit_memcpy(block, src, self.u.stack_size(ret_type));
        self.emit(InsnCode::Ret, vec![Op::Int(0)]);
        Ok(())
    }
}
