//! Box, unbox, casts, indirect loads and stores, and the interface
//! fat-pointer materialization.

use super::MethodCompiler;
use crate::{
    error::{JitError, jit_bail, jit_check},
    object::{POINTER_SIZE, VTABLE_FUNCTIONS_OFFSET},
};
use cilantro_metadata::OpCode;
use cilantro_mir::{InsnCode, MemOp, MirType, Op, Reg};
use cilantro_types::StackType;
use cilantro_utils::TypeId;

impl MethodCompiler<'_> {
    /// Populate an interface fat pointer at `dest` from the object in
    /// `from`, using the statically-known interface offset. With `barrier`
    /// set, the object half goes through the byref write barrier because
    /// `dest` may point into the heap.
    pub(crate) fn cast_obj_to_interface(
        &mut self,
        dest: Reg,
        from: Reg,
        from_ty: Option<TypeId>,
        to_ty: TypeId,
        barrier: bool,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let from_ty =
            from_ty.ok_or_else(|| JitError::check("interface cast of the null type"))?;
        let Some(impl_) = self.u.interface_impl(from_ty, to_ty) else {
            jit_bail!(
                "{} does not implement {}",
                self.u.type_name(from_ty),
                self.u.type_name(to_ty)
            );
        };

        // first half: the interface's slot run inside the object's vtable
        let vtable = self.new_reg(Some(wk.intptr));
        self.emit(
            InsnCode::Mov,
            vec![Op::Reg(vtable), Op::Mem(MemOp::base(MirType::P, 0, from))],
        );
        self.emit(
            InsnCode::Add,
            vec![
                Op::Reg(vtable),
                Op::Reg(vtable),
                Op::Int(
                    (VTABLE_FUNCTIONS_OFFSET + impl_.vtable_offset as usize * POINTER_SIZE) as i64,
                ),
            ],
        );
        self.emit(
            InsnCode::Mov,
            vec![Op::Mem(MemOp::base(MirType::P, 0, dest)), Op::Reg(vtable)],
        );

        // second half: the object pointer
        if barrier {
            let slot = self.new_reg(Some(wk.intptr));
            self.emit(
                InsnCode::Add,
                vec![Op::Reg(slot), Op::Reg(dest), Op::Int(POINTER_SIZE as i64)],
            );
            let (proto, func) = self.items.runtime.gc_update_ref;
            self.emit(
                InsnCode::Call,
                vec![Op::Ref(proto), Op::Ref(func), Op::Reg(slot), Op::Reg(from)],
            );
        } else {
            self.emit(
                InsnCode::Mov,
                vec![
                    Op::Mem(MemOp::base(MirType::P, POINTER_SIZE as i64, dest)),
                    Op::Reg(from),
                ],
            );
        }
        Ok(())
    }

    pub(super) fn initobj(&mut self, ty: TypeId) -> Result<(), JitError> {
        let dest = self.pop()?;
        jit_check!(
            self.stack_type_of(dest.ty) == StackType::Ref,
            "initobj needs an address"
        );
        let referent = dest.ty.and_then(|t| self.u.element_type(t));
        jit_check!(
            referent.is_some_and(|t| self.u.stack_type(t) == StackType::ValueType),
            "initobj through a byref to a non-value-type"
        );
        jit_check!(
            self.u.verifier_assignable_to(Some(ty), referent),
            "initobj type does not match the target"
        );
        self.emit_zerofill(dest.reg, self.u.stack_size(ty));
        Ok(())
    }

    pub(super) fn box_value(&mut self, il_offset: u32, ty: TypeId) -> Result<(), JitError> {
        let wk = self.wk();
        let value = self.pop()?;
        jit_check!(
            self.u.verifier_assignable_to(value.ty, Some(ty)),
            "boxed value is not assignable to the boxed type"
        );

        let obj = self.push(Some(wk.object))?;
        let header = self.u.managed_size(wk.object);

        if self.u.is_value_type(ty) {
            let payload = self.u.managed_size(ty);
            self.alloc_object(il_offset, obj, ty, Op::Int((header + payload) as i64))?;
        }

        match self.u.stack_type(ty) {
            StackType::Object => {
                // boxing a reference type is the identity
                self.emit(InsnCode::Mov, vec![Op::Reg(obj), Op::Reg(value.reg)]);
            }
            StackType::ValueType => {
                if self.u.managed_pointer_offsets(ty).is_empty() {
                    let dest = self.new_reg(Some(wk.intptr));
                    self.emit(
                        InsnCode::Add,
                        vec![Op::Reg(dest), Op::Reg(obj), Op::Int(header as i64)],
                    );
                    self.emit_memcpy(dest, value.reg, self.u.managed_size(ty));
                } else {
                    let type_item = self.type_item(ty)?;
                    let (proto, func) = self.items.runtime.managed_memcpy;
                    self.emit(
                        InsnCode::Call,
                        vec![
                            Op::Ref(proto),
                            Op::Ref(func),
                            Op::Reg(obj),
                            Op::Ref(type_item),
                            Op::Int(header as i64),
                            Op::Reg(value.reg),
                        ],
                    );
                }
            }
            StackType::Ref => jit_bail!("cannot box a byref"),
            _ => {
                let code = self.mov_code(Some(ty));
                self.emit(
                    code,
                    vec![
                        Op::Mem(MemOp::base(self.mir_type(ty), header as i64, obj)),
                        Op::Reg(value.reg),
                    ],
                );
            }
        }
        Ok(())
    }

    /// `isinst`, `castclass`, and `unbox.any` share the dynamic-cast
    /// skeleton; they differ in the failure path and the payload
    /// extraction.
    pub(super) fn cast_class(
        &mut self,
        il_offset: u32,
        opcode: OpCode,
        operand_type: TypeId,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let obj = self.pop()?;

        if matches!(opcode, OpCode::Isinst | OpCode::Castclass) {
            jit_check!(
                self.u.stack_type(operand_type) == StackType::Object,
                "cast target must be a reference type"
            );
            jit_check!(
                self.u.verifier_assignable_to(Some(operand_type), obj.ty),
                "cast could never succeed"
            );
        }
        jit_check!(
            self.stack_type_of(obj.ty) == StackType::Object,
            "cast of a non-object stack entry"
        );

        let result = self.push(Some(operand_type))?;
        let cast_ok = self.new_reg(Some(wk.boolean));
        let type_item = self.type_item(operand_type)?;
        let success = self.new_label();

        // unwrap an interface down to its object half before checking
        if self.is_interface_opt(obj.ty) {
            self.emit(
                InsnCode::Mov,
                vec![
                    Op::Reg(obj.reg),
                    Op::Mem(MemOp::base(MirType::P, POINTER_SIZE as i64, obj.reg)),
                ],
            );
        }

        if self.u.is_interface(operand_type) {
            let (proto, func) = self.items.runtime.dynamic_cast;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(cast_ok),
                    Op::Reg(result),
                    Op::Reg(obj.reg),
                    Op::Ref(type_item),
                ],
            );
        } else {
            let (proto, func) = self.items.runtime.is_instance;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(cast_ok),
                    Op::Reg(obj.reg),
                    Op::Ref(type_item),
                ],
            );
        }

        self.emit(InsnCode::Bt, vec![Op::Label(success), Op::Reg(cast_ok)]);

        match opcode {
            OpCode::Isinst => {
                // a failed isinst yields null; the interface cast already
                // zeroed the fat pointer
                if !self.u.is_interface(operand_type) {
                    self.emit(InsnCode::Mov, vec![Op::Reg(obj.reg), Op::Int(0)]);
                }
            }
            _ => {
                self.throw_new(il_offset, wk.invalid_cast_exception)?;
            }
        }

        self.place_label(success);

        match self.u.stack_type(operand_type) {
            StackType::Object => {
                if !self.u.is_interface(operand_type) {
                    self.emit(InsnCode::Mov, vec![Op::Reg(result), Op::Reg(obj.reg)]);
                }
            }
            StackType::ValueType => {
                // unbox: copy the payload out
                let header = self.u.managed_size(wk.object);
                self.emit(
                    InsnCode::Add,
                    vec![Op::Reg(obj.reg), Op::Reg(obj.reg), Op::Int(header as i64)],
                );
                self.emit_memcpy(result, obj.reg, self.u.managed_size(operand_type));
            }
            StackType::Ref => jit_bail!("cast to a byref type"),
            _ => {
                let header = self.u.managed_size(wk.object);
                let code = self.mov_code(Some(operand_type));
                self.emit(
                    code,
                    vec![
                        Op::Reg(result),
                        Op::Mem(MemOp::base(
                            self.mir_type(operand_type),
                            header as i64,
                            obj.reg,
                        )),
                    ],
                );
            }
        }
        Ok(())
    }

    fn ldind_type(&self, opcode: OpCode, addr_ty: Option<TypeId>) -> Option<TypeId> {
        let wk = self.wk();
        match opcode {
            OpCode::LdindI1 => Some(wk.sbyte),
            OpCode::LdindU1 => Some(wk.byte),
            OpCode::LdindI2 => Some(wk.int16),
            OpCode::LdindU2 => Some(wk.uint16),
            OpCode::LdindI4 => Some(wk.int32),
            OpCode::LdindU4 => Some(wk.uint32),
            OpCode::LdindI8 => Some(wk.int64),
            OpCode::LdindI => Some(wk.intptr),
            OpCode::LdindR4 => Some(wk.single),
            OpCode::LdindR8 => Some(wk.double),
            OpCode::LdindRef => addr_ty
                .and_then(|t| self.u.element_type(t))
                .or(Some(wk.object)),
            _ => None,
        }
    }

    pub(super) fn ldind(&mut self, _il_offset: u32, opcode: OpCode) -> Result<(), JitError> {
        let addr = self.pop()?;
        jit_check!(
            matches!(
                self.stack_type_of(addr.ty),
                StackType::Ref | StackType::IntPtr
            ),
            "indirect load needs an address"
        );
        let Some(target) = self.ldind_type(opcode, addr.ty) else {
            jit_bail!("not an indirect load opcode");
        };
        if opcode == OpCode::LdindRef {
            jit_check!(
                self.u.is_object_ref(Some(target)),
                "ldind.ref through a non-reference address"
            );
        }

        let value = self.push(Some(self.u.intermediate_type(target)))?;
        let code = self.load_extend_code(target);
        self.emit(
            code,
            vec![
                Op::Reg(value),
                Op::Mem(MemOp::base(self.mir_type(target), 0, addr.reg)),
            ],
        );
        Ok(())
    }

    fn stind_type(&self, opcode: OpCode) -> Option<TypeId> {
        let wk = self.wk();
        match opcode {
            OpCode::StindI1 => Some(wk.sbyte),
            OpCode::StindI2 => Some(wk.int16),
            OpCode::StindI4 => Some(wk.int32),
            OpCode::StindI8 => Some(wk.int64),
            OpCode::StindR4 => Some(wk.single),
            OpCode::StindR8 => Some(wk.double),
            OpCode::StindI => Some(wk.intptr),
            _ => None,
        }
    }

    pub(super) fn stind(&mut self, _il_offset: u32, opcode: OpCode) -> Result<(), JitError> {
        let value = self.pop()?;
        let addr = self.pop()?;
        jit_check!(
            matches!(
                self.stack_type_of(addr.ty),
                StackType::Ref | StackType::IntPtr
            ),
            "indirect store needs an address"
        );

        if opcode == OpCode::StindRef {
            jit_check!(
                self.stack_type_of(value.ty) == StackType::Object,
                "stind.ref of a non-object value"
            );
            // the address may point into the heap, so the barrier decides
            let (proto, func) = self.items.runtime.gc_update_ref;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(addr.reg),
                    Op::Reg(value.reg),
                ],
            );
            return Ok(());
        }

        let Some(target) = self.stind_type(opcode) else {
            jit_bail!("not an indirect store opcode");
        };
        let code = self.cast_code(value.ty, Some(target));
        self.emit(
            code,
            vec![
                Op::Mem(MemOp::base(self.mir_type(target), 0, addr.reg)),
                Op::Reg(value.reg),
            ],
        );
        Ok(())
    }
}
