//! Array allocation and element access.
//!
//! Arrays are header + int32 length + elements starting at the base array
//! type's managed size. Element addresses are `base + header + i * size`
//! with the index sign-extended to native width; every access is preceded
//! by a null check and an unsigned bounds check.

use super::MethodCompiler;
use crate::error::{JitError, jit_bail, jit_check};
use cilantro_mir::{InsnCode, MemOp, MirType, Op};
use cilantro_types::StackType;
use cilantro_utils::TypeId;

impl MethodCompiler<'_> {
    pub(super) fn newarr(&mut self, il_offset: u32, element_type: TypeId) -> Result<(), JitError> {
        let wk = self.wk();
        let count = self.pop()?;
        jit_check!(
            count.ty == Some(wk.int32),
            "newarr length must be an int32"
        );

        let array_type = self.u.array_type_of(element_type);
        let array = self.push(Some(array_type))?;

        // size = count * element_size + header
        let size = self.new_reg(Some(wk.int64));
        self.emit(
            InsnCode::Mul,
            vec![
                Op::Reg(size),
                Op::Reg(count.reg),
                Op::Int(self.u.stack_size(element_type) as i64),
            ],
        );
        self.emit(
            InsnCode::Add,
            vec![
                Op::Reg(size),
                Op::Reg(size),
                Op::Int(self.u.managed_size(wk.array) as i64),
            ],
        );

        self.alloc_object(il_offset, array, array_type, Op::Reg(size))?;

        self.emit(
            InsnCode::Mov,
            vec![
                Op::Mem(MemOp::base(
                    MirType::I32,
                    crate::object::ARRAY_LENGTH_OFFSET as i64,
                    array,
                )),
                Op::Reg(count.reg),
            ],
        );
        Ok(())
    }

    pub(super) fn ldlen(&mut self, il_offset: u32) -> Result<(), JitError> {
        let wk = self.wk();
        let array = self.pop()?;
        jit_check!(
            array.ty.is_some_and(|t| self.u.is_array(t)),
            "ldlen of a non-array"
        );

        self.null_check(il_offset, array.reg, array.ty)?;

        let length = self.push(Some(wk.intptr))?;
        self.emit(
            InsnCode::Mov,
            vec![
                Op::Reg(length),
                Op::Mem(MemOp::base(
                    MirType::I32,
                    crate::object::ARRAY_LENGTH_OFFSET as i64,
                    array.reg,
                )),
            ],
        );
        Ok(())
    }

    pub(super) fn stelem(
        &mut self,
        il_offset: u32,
        operand_type: Option<TypeId>,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let value = self.pop()?;
        let index = self.pop()?;
        let array = self.pop()?;

        let Some(array_ty) = array.ty.filter(|&t| self.u.is_array(t)) else {
            jit_bail!("stelem on a non-array");
        };
        let element_type = self
            .u
            .element_type(array_ty)
            .ok_or_else(|| JitError::check("array without an element type"))?;
        // stelem.ref takes its element type from the array itself
        let operand_type = operand_type.unwrap_or(element_type);

        if let Some(value_ty) = value.ty {
            jit_check!(
                self.u.array_element_compatible_with(
                    value_ty,
                    self.u.intermediate_type(operand_type)
                ),
                "stored value is incompatible with the element type"
            );
        }
        jit_check!(
            self.u
                .array_element_compatible_with(operand_type, element_type),
            "operand type is incompatible with the array element type"
        );

        match self.stack_type_of(index.ty) {
            StackType::Int32 => self.extend_index(index.reg),
            StackType::IntPtr => {}
            _ => jit_bail!("array index must be an integer"),
        }

        self.null_check(il_offset, array.reg, array.ty)?;
        self.oob_check(il_offset, array.reg, index.reg)?;

        let elem_size = self.u.stack_size(operand_type) as i64;
        let header = self.u.managed_size(wk.array) as i64;

        match self.stack_type_of(value.ty) {
            StackType::Object => {
                if self.u.is_interface(operand_type) {
                    jit_check!(
                        !self.is_interface_opt(value.ty),
                        "interface array elements are stored as fat pointers"
                    );
                    // element address, then a barriered fat-pointer store
                    self.emit(
                        InsnCode::Mul,
                        vec![Op::Reg(index.reg), Op::Reg(index.reg), Op::Int(elem_size)],
                    );
                    self.emit(
                        InsnCode::Add,
                        vec![Op::Reg(index.reg), Op::Reg(index.reg), Op::Int(header)],
                    );
                    self.emit(
                        InsnCode::Add,
                        vec![Op::Reg(index.reg), Op::Reg(index.reg), Op::Reg(array.reg)],
                    );
                    self.cast_obj_to_interface(
                        index.reg, value.reg, value.ty, operand_type, true,
                    )?;
                } else {
                    let value_reg = value.reg;
                    if self.is_interface_opt(value.ty) {
                        self.emit(
                            InsnCode::Mov,
                            vec![
                                Op::Reg(value_reg),
                                Op::Mem(MemOp::base(
                                    MirType::P,
                                    self.pointer_size() as i64,
                                    value_reg,
                                )),
                            ],
                        );
                    }
                    // byte offset of the slot, then the object write barrier
                    self.emit(
                        InsnCode::Mul,
                        vec![Op::Reg(index.reg), Op::Reg(index.reg), Op::Int(elem_size)],
                    );
                    self.emit(
                        InsnCode::Add,
                        vec![Op::Reg(index.reg), Op::Reg(index.reg), Op::Int(header)],
                    );
                    let (proto, func) = self.items.runtime.gc_update;
                    self.emit(
                        InsnCode::Call,
                        vec![
                            Op::Ref(proto),
                            Op::Ref(func),
                            Op::Reg(array.reg),
                            Op::Reg(index.reg),
                            Op::Reg(value_reg),
                        ],
                    );
                }
            }
            StackType::ValueType => {
                jit_bail!("value-type array elements are not supported")
            }
            StackType::Ref => jit_bail!("cannot store a byref into an array"),
            _ => {
                let code = self.cast_code(value.ty, Some(operand_type));
                self.emit(
                    code,
                    vec![
                        Op::Mem(MemOp::indexed(
                            self.mir_type(operand_type),
                            header,
                            array.reg,
                            index.reg,
                            elem_size as u16,
                        )),
                        Op::Reg(value.reg),
                    ],
                );
            }
        }
        Ok(())
    }

    pub(super) fn ldelem(
        &mut self,
        il_offset: u32,
        operand_type: Option<TypeId>,
    ) -> Result<(), JitError> {
        let wk = self.wk();
        let index = self.pop()?;
        let array = self.pop()?;

        let Some(array_ty) = array.ty.filter(|&t| self.u.is_array(t)) else {
            jit_bail!("ldelem on a non-array");
        };
        let element_type = self
            .u
            .element_type(array_ty)
            .ok_or_else(|| JitError::check("array without an element type"))?;

        let operand_type = match operand_type {
            Some(t) => {
                jit_check!(
                    self.u.array_element_compatible_with(element_type, t),
                    "element type is incompatible with the load type"
                );
                t
            }
            None => element_type,
        };

        match self.stack_type_of(index.ty) {
            StackType::Int32 => self.extend_index(index.reg),
            StackType::IntPtr => {}
            _ => jit_bail!("array index must be an integer"),
        }

        self.null_check(il_offset, array.reg, array.ty)?;
        self.oob_check(il_offset, array.reg, index.reg)?;

        let value = self.push(Some(self.u.intermediate_type(operand_type)))?;
        let elem_size = self.u.stack_size(operand_type);
        let header = self.u.managed_size(wk.array) as i64;

        match self.u.stack_type(operand_type) {
            StackType::ValueType => {
                jit_bail!("value-type array elements are not supported")
            }
            StackType::Object if self.u.is_interface(operand_type) => {
                jit_bail!("interface array elements are not supported")
            }
            StackType::Ref => jit_bail!("arrays cannot hold byrefs"),
            _ => {
                let code = self.load_extend_code(operand_type);
                self.emit(
                    code,
                    vec![
                        Op::Reg(value),
                        Op::Mem(MemOp::indexed(
                            self.mir_type(operand_type),
                            header,
                            array.reg,
                            index.reg,
                            elem_size as u16,
                        )),
                    ],
                );
            }
        }
        Ok(())
    }

    pub(super) fn ldelema(&mut self, il_offset: u32, operand_type: TypeId) -> Result<(), JitError> {
        let wk = self.wk();
        let index = self.pop()?;
        let array = self.pop()?;

        let Some(array_ty) = array.ty.filter(|&t| self.u.is_array(t)) else {
            jit_bail!("ldelema on a non-array");
        };
        let element_type = self
            .u
            .element_type(array_ty)
            .ok_or_else(|| JitError::check("array without an element type"))?;
        jit_check!(
            self.u
                .array_element_compatible_with(element_type, operand_type),
            "element type is incompatible with the address type"
        );

        match self.stack_type_of(index.ty) {
            StackType::Int32 => self.extend_index(index.reg),
            StackType::IntPtr => {}
            _ => jit_bail!("array index must be an integer"),
        }

        self.null_check(il_offset, array.reg, array.ty)?;
        self.oob_check(il_offset, array.reg, index.reg)?;

        let byref = self
            .u
            .byref_type_of(self.u.intermediate_type(operand_type))?;
        let value = self.push(Some(byref))?;

        self.emit(
            InsnCode::Mul,
            vec![
                Op::Reg(value),
                Op::Reg(index.reg),
                Op::Int(self.u.stack_size(operand_type) as i64),
            ],
        );
        self.emit(
            InsnCode::Add,
            vec![
                Op::Reg(value),
                Op::Reg(value),
                Op::Int(self.u.managed_size(wk.array) as i64),
            ],
        );
        self.emit(
            InsnCode::Add,
            vec![Op::Reg(value), Op::Reg(value), Op::Reg(array.reg)],
        );
        Ok(())
    }
}
