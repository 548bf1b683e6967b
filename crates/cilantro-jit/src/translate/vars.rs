//! Local-variable and argument access.
//!
//! Primitive locals live in scalar registers unless their address is taken;
//! value types (and interfaces, being fat pointers) always get stack slots.
//! `ldloca`/`ldarga` targets are found in a pre-scan and promoted to memory
//! in the prologue, so by the time these handlers run every addressable
//! variable is slot-backed.

use super::{LocalSlot, LocalStorage, MethodCompiler};
use crate::error::{JitError, jit_bail, jit_check};
use cilantro_mir::{InsnCode, MemOp, Op, Reg};
use cilantro_types::StackType;
use cilantro_utils::TypeId;

impl MethodCompiler<'_> {
    fn local(&self, index: u32) -> Result<(LocalStorage, TypeId), JitError> {
        match self.locals.get(index as usize) {
            Some(LocalSlot { storage, ty }) => Ok((*storage, *ty)),
            None => jit_bail!("local index {index} out of range"),
        }
    }

    pub(super) fn stloc(&mut self, index: u32) -> Result<(), JitError> {
        let value = self.pop()?;
        let (storage, local_ty) = self.local(index)?;
        let variable_type = self.u.intermediate_type(local_ty);

        jit_check!(
            self.u.verifier_assignable_to(value.ty, Some(variable_type)),
            "stloc value is not assignable to the local"
        );

        match self.stack_type_of(value.ty) {
            StackType::Object => {
                let target_is_interface = self.u.is_interface(variable_type);
                let value_is_interface = self.is_interface_opt(value.ty);
                match (value_is_interface, target_is_interface) {
                    (true, true) => self.store_block(storage, value.reg, variable_type)?,
                    (false, true) => {
                        let LocalStorage::Slot(slot) = storage else {
                            jit_bail!("interface local without a slot");
                        };
                        self.cast_obj_to_interface(
                            slot,
                            value.reg,
                            value.ty,
                            variable_type,
                            false,
                        )?;
                    }
                    (true, false) => {
                        // interface -> object: the object half of the fat
                        // pointer
                        let ptr_size = self.pointer_size() as i64;
                        let object = Op::Mem(MemOp::base(
                            cilantro_mir::MirType::P,
                            ptr_size,
                            value.reg,
                        ));
                        self.store_scalar_op(storage, local_ty, object, InsnCode::Mov)?;
                    }
                    (false, false) => {
                        let code = self.cast_code(value.ty, Some(variable_type));
                        self.store_scalar_op(storage, local_ty, Op::Reg(value.reg), code)?;
                    }
                }
            }
            StackType::ValueType => {
                self.store_block(storage, value.reg, variable_type)?;
            }
            _ => {
                let code = self.cast_code(value.ty, Some(variable_type));
                self.store_scalar_op(storage, local_ty, Op::Reg(value.reg), code)?;
            }
        }
        Ok(())
    }

    fn store_block(
        &mut self,
        storage: LocalStorage,
        src: Reg,
        ty: TypeId,
    ) -> Result<(), JitError> {
        let LocalStorage::Slot(slot) = storage else {
            jit_bail!("block value stored into a scalar local");
        };
        self.emit_memcpy(slot, src, self.u.stack_size(ty));
        Ok(())
    }

    fn store_scalar_op(
        &mut self,
        storage: LocalStorage,
        local_ty: TypeId,
        src: Op,
        code: InsnCode,
    ) -> Result<(), JitError> {
        match storage {
            LocalStorage::Reg(reg) => self.emit(code, vec![Op::Reg(reg), src]),
            LocalStorage::Slot(slot) => {
                let mem = MemOp::base(self.mir_type(local_ty), 0, slot);
                self.emit(code, vec![Op::Mem(mem), src]);
            }
        }
        Ok(())
    }

    pub(super) fn ldloc(&mut self, index: u32) -> Result<(), JitError> {
        let (storage, local_ty) = self.local(index)?;
        let value_type = self.u.intermediate_type(local_ty);
        let value = self.push(Some(value_type))?;

        match self.u.stack_type(value_type) {
            StackType::ValueType => {
                let LocalStorage::Slot(slot) = storage else {
                    jit_bail!("value-type local without a slot");
                };
                self.emit_memcpy(value, slot, self.u.stack_size(value_type));
            }
            StackType::Object if self.u.is_interface(value_type) => {
                let LocalStorage::Slot(slot) = storage else {
                    jit_bail!("interface local without a slot");
                };
                self.emit_memcpy(value, slot, self.u.stack_size(value_type));
            }
            _ => match storage {
                LocalStorage::Reg(reg) => {
                    let code = self.mov_code(Some(value_type));
                    self.emit(code, vec![Op::Reg(value), Op::Reg(reg)]);
                }
                LocalStorage::Slot(slot) => {
                    let code = self.load_extend_code(local_ty);
                    let mem = MemOp::base(self.mir_type(local_ty), 0, slot);
                    self.emit(code, vec![Op::Reg(value), Op::Mem(mem)]);
                }
            },
        }
        Ok(())
    }

    pub(super) fn ldloca(&mut self, index: u32) -> Result<(), JitError> {
        let (storage, local_ty) = self.local(index)?;
        let byref = self
            .u
            .byref_type_of(self.u.verification_type(local_ty))?;
        let value = self.push(Some(byref))?;

        match storage {
            LocalStorage::Slot(slot) => {
                self.emit(InsnCode::Mov, vec![Op::Reg(value), Op::Reg(slot)]);
                Ok(())
            }
            // the pre-scan promoted every ldloca target to memory
            LocalStorage::Reg(_) => jit_bail!("ldloca of a register-only local"),
        }
    }

    pub(super) fn ldarg(&mut self, index: u32) -> Result<(), JitError> {
        let Some(arg) = self.args.get(index as usize) else {
            jit_bail!("argument index {index} out of range");
        };
        let (arg_ty, arg_reg, shadow) = (arg.ty, arg.reg, arg.slot);
        let stack_ty = self.u.intermediate_type(arg_ty);
        let value = self.push(Some(stack_ty))?;

        match self.u.stack_type(stack_ty) {
            StackType::ValueType => {
                self.emit_memcpy(value, arg_reg, self.u.stack_size(stack_ty));
            }
            StackType::Object if self.u.is_interface(stack_ty) => {
                self.emit_memcpy(value, arg_reg, self.u.stack_size(stack_ty));
            }
            _ => match shadow {
                Some(slot) => {
                    let code = self.load_extend_code(arg_ty);
                    let mem = MemOp::base(self.mir_type(arg_ty), 0, slot);
                    self.emit(code, vec![Op::Reg(value), Op::Mem(mem)]);
                }
                None => {
                    let code = self.mov_code(Some(stack_ty));
                    self.emit(code, vec![Op::Reg(value), Op::Reg(arg_reg)]);
                }
            },
        }
        Ok(())
    }

    pub(super) fn starg(&mut self, index: u32) -> Result<(), JitError> {
        let value = self.pop()?;
        let Some(arg) = self.args.get(index as usize) else {
            jit_bail!("argument index {index} out of range");
        };
        let (arg_ty, arg_reg, shadow) = (arg.ty, arg.reg, arg.slot);

        jit_check!(
            self.u
                .verifier_assignable_to(value.ty, Some(self.u.intermediate_type(arg_ty))),
            "starg value is not assignable to the argument"
        );

        match self.u.stack_type(arg_ty) {
            StackType::ValueType => {
                self.emit_memcpy(arg_reg, value.reg, self.u.stack_size(arg_ty));
            }
            StackType::Object if self.u.is_interface(arg_ty) => {
                // the argument is a fat pointer living behind arg_reg
                if self.is_interface_opt(value.ty) {
                    self.emit_memcpy(arg_reg, value.reg, self.u.stack_size(arg_ty));
                } else {
                    self.cast_obj_to_interface(arg_reg, value.reg, value.ty, arg_ty, false)?;
                }
            }
            StackType::Object if self.is_interface_opt(value.ty) => {
                // interface -> object: the object half lands in the argument
                let half = Op::Mem(MemOp::base(
                    cilantro_mir::MirType::P,
                    self.pointer_size() as i64,
                    value.reg,
                ));
                match shadow {
                    Some(slot) => {
                        let mem = MemOp::base(self.mir_type(arg_ty), 0, slot);
                        self.emit(InsnCode::Mov, vec![Op::Mem(mem), half]);
                    }
                    None => {
                        self.emit(InsnCode::Mov, vec![Op::Reg(arg_reg), half]);
                    }
                }
            }
            _ => match shadow {
                Some(slot) => {
                    let code = self.cast_code(value.ty, Some(arg_ty));
                    let mem = MemOp::base(self.mir_type(arg_ty), 0, slot);
                    self.emit(code, vec![Op::Mem(mem), Op::Reg(value.reg)]);
                }
                None => {
                    let code = self.cast_code(value.ty, Some(arg_ty));
                    self.emit(code, vec![Op::Reg(arg_reg), Op::Reg(value.reg)]);
                }
            },
        }
        Ok(())
    }

    pub(super) fn ldarga(&mut self, index: u32) -> Result<(), JitError> {
        let Some(arg) = self.args.get(index as usize) else {
            jit_bail!("argument index {index} out of range");
        };
        let (arg_ty, arg_reg, shadow) = (arg.ty, arg.reg, arg.slot);
        let byref = self.u.byref_type_of(self.u.verification_type(arg_ty))?;
        let value = self.push(Some(byref))?;

        if matches!(self.u.stack_type(arg_ty), StackType::ValueType) {
            // block arguments already live in memory
            self.emit(InsnCode::Mov, vec![Op::Reg(value), Op::Reg(arg_reg)]);
            return Ok(());
        }
        match shadow {
            Some(slot) => {
                self.emit(InsnCode::Mov, vec![Op::Reg(value), Op::Reg(slot)]);
                Ok(())
            }
            None => jit_bail!("ldarga of an argument without a shadow slot"),
        }
    }
}
