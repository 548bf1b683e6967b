//! Field access: instance fields against the object layout, static fields
//! against their linked storage, with the write-barrier selection the
//! collector ABI requires.

use super::MethodCompiler;
use crate::error::{JitError, jit_bail, jit_check};
use cilantro_mir::{InsnCode, MemOp, MirType, Op, Reg};
use cilantro_types::StackType;
use cilantro_utils::{FieldId, TypeId};

impl MethodCompiler<'_> {
    fn static_field_reg(&mut self, field: FieldId) -> Result<Reg, JitError> {
        let wk = self.wk();
        let item = self
            .items
            .statics
            .get(&field)
            .copied()
            .ok_or_else(|| JitError::NotFound("static field storage".into()))?;
        let reg = self.new_reg(Some(wk.intptr));
        self.emit(InsnCode::Mov, vec![Op::Reg(reg), Op::Ref(item)]);
        Ok(reg)
    }

    /// Init-only static fields may only be written by runtime-special-name
    /// methods (constructors).
    fn check_init_only(&self, field: FieldId) -> Result<(), JitError> {
        let init_only = self.u.with_field(field, |f| f.is_init_only());
        if init_only {
            let allowed = self.u.with_method(self.method, |m| m.is_rt_special_name());
            jit_check!(allowed, "init-only field written outside a constructor");
        }
        Ok(())
    }

    /// The field must be declared somewhere on the value's type chain. The
    /// null type passes; its access throws unconditionally at runtime.
    fn check_field_on_chain(&self, obj_ty: Option<TypeId>, field: FieldId) -> Result<(), JitError> {
        let Some(start) = obj_ty else {
            return Ok(());
        };
        let declaring = self.u.field_declaring(field);
        let mut cursor = Some(start);
        while let Some(t) = cursor {
            if t == declaring {
                return Ok(());
            }
            cursor = self.u.base_type(t);
        }
        jit_bail!("field is not part of the accessed object")
    }

    pub(super) fn stsfld(&mut self, field: FieldId) -> Result<(), JitError> {
        let value = self.pop()?;
        let field_ty = self.u.field_type(field);
        let field_type = self.u.underlying_type(field_ty);

        jit_check!(
            self.u.with_field(field, |f| f.is_static()),
            "stsfld of an instance field"
        );
        self.check_init_only(field)?;
        jit_check!(
            self.u.verifier_assignable_to(value.ty, Some(field_ty)),
            "stsfld value is not assignable to the field"
        );

        let field_reg = self.static_field_reg(field)?;
        let field_op = Op::Mem(MemOp::base(self.mir_type(field_type), 0, field_reg));

        match self.stack_type_of(value.ty) {
            StackType::Object => {
                let target_is_interface = self.u.is_interface(field_type);
                let value_is_interface = self.is_interface_opt(value.ty);
                match (value_is_interface, target_is_interface) {
                    (true, true) => {
                        self.emit_memcpy(field_reg, value.reg, self.u.stack_size(field_type));
                    }
                    (false, true) => {
                        self.cast_obj_to_interface(
                            field_reg, value.reg, value.ty, field_type, false,
                        )?;
                    }
                    (true, false) => {
                        let half = Op::Mem(MemOp::base(
                            MirType::P,
                            self.pointer_size() as i64,
                            value.reg,
                        ));
                        self.emit(InsnCode::Mov, vec![field_op, half]);
                    }
                    (false, false) => {
                        let code = self.cast_code(value.ty, Some(field_type));
                        self.emit(code, vec![field_op, Op::Reg(value.reg)]);
                    }
                }
            }
            StackType::ValueType => {
                let size = value.ty.map(|t| self.u.stack_size(t)).unwrap_or(0);
                self.emit_memcpy(field_reg, value.reg, size);
            }
            StackType::Ref => jit_bail!("a static field cannot hold a byref"),
            _ => {
                let code = self.cast_code(value.ty, Some(field_type));
                self.emit(code, vec![field_op, Op::Reg(value.reg)]);
            }
        }
        Ok(())
    }

    pub(super) fn ldsfld(&mut self, field: FieldId) -> Result<(), JitError> {
        jit_check!(
            self.u.with_field(field, |f| f.is_static()),
            "ldsfld of an instance field"
        );
        let field_ty = self.u.field_type(field);
        let field_stack_type = self.u.intermediate_type(field_ty);
        let field_type = self.u.underlying_type(field_ty);

        let value = self.push(Some(field_stack_type))?;
        let field_reg = self.static_field_reg(field)?;

        match self.u.stack_type(field_type) {
            StackType::ValueType => {
                self.emit_memcpy(value, field_reg, self.u.stack_size(field_type));
            }
            StackType::Object if self.u.is_interface(field_type) => {
                self.emit_memcpy(value, field_reg, self.u.stack_size(field_type));
            }
            StackType::Ref => jit_bail!("a static field cannot hold a byref"),
            _ => {
                let code = self.load_extend_code(field_type);
                let field_op = Op::Mem(MemOp::base(self.mir_type(field_type), 0, field_reg));
                self.emit(code, vec![Op::Reg(value), field_op]);
            }
        }
        Ok(())
    }

    pub(super) fn stfld(&mut self, il_offset: u32, field: FieldId) -> Result<(), JitError> {
        let value = self.pop()?;
        let obj = self.pop()?;

        match self.stack_type_of(obj.ty) {
            StackType::Ref => {
                // a byref target must refer to a value type; the barrier has
                // to consult the heap index
                let referent = obj.ty.and_then(|t| self.u.element_type(t));
                jit_check!(
                    referent.is_some_and(|t| self.u.is_value_type(t)),
                    "stfld through a byref to a non-value-type"
                );
            }
            StackType::Object => {}
            _ => jit_bail!("stfld on a non-object stack entry"),
        }

        self.check_field_on_chain(obj.ty, field)?;
        jit_check!(
            !self.u.with_field(field, |f| f.is_static()),
            "stfld of a static field"
        );
        self.check_init_only(field)?;

        let field_ty = self.u.field_type(field);
        let field_type = self.u.underlying_type(field_ty);
        let offset = self.u.field_offset(field) as i64;
        let obj_is_object = self.stack_type_of(obj.ty) == StackType::Object;

        if obj_is_object {
            self.null_check(il_offset, obj.reg, obj.ty)?;
        }
        jit_check!(
            self.u.verifier_assignable_to(value.ty, Some(field_ty)),
            "stfld value is not assignable to the field"
        );

        match self.stack_type_of(value.ty) {
            StackType::Object => {
                let target_is_interface = self.u.is_interface(field_type);
                let value_is_interface = self.is_interface_opt(value.ty);
                if target_is_interface {
                    if value_is_interface {
                        // interface -> interface: block copy into the field
                        self.store_struct_field(obj.reg, obj_is_object, offset, field_type, value.reg)?;
                    } else {
                        let wk = self.wk();
                        let dest = self.new_reg(Some(wk.intptr));
                        self.emit(
                            InsnCode::Add,
                            vec![Op::Reg(dest), Op::Reg(obj.reg), Op::Int(offset)],
                        );
                        self.cast_obj_to_interface(
                            dest,
                            value.reg,
                            value.ty,
                            field_type,
                            true,
                        )?;
                    }
                } else {
                    let value_reg = value.reg;
                    if value_is_interface {
                        // the object half of the fat pointer is what lands in
                        // the field
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
                    if obj_is_object {
                        // write barrier on a heap object's slot
                        let (proto, func) = self.items.runtime.gc_update;
                        self.emit(
                            InsnCode::Call,
                            vec![
                                Op::Ref(proto),
                                Op::Ref(func),
                                Op::Reg(obj.reg),
                                Op::Int(offset),
                                Op::Reg(value_reg),
                            ],
                        );
                    } else {
                        // byref target: the barrier locates the owning object
                        self.emit(
                            InsnCode::Add,
                            vec![Op::Reg(obj.reg), Op::Reg(obj.reg), Op::Int(offset)],
                        );
                        let (proto, func) = self.items.runtime.gc_update_ref;
                        self.emit(
                            InsnCode::Call,
                            vec![
                                Op::Ref(proto),
                                Op::Ref(func),
                                Op::Reg(obj.reg),
                                Op::Reg(value_reg),
                            ],
                        );
                    }
                }
            }

            StackType::ValueType => {
                self.store_struct_field(obj.reg, obj_is_object, offset, field_type, value.reg)?;
            }

            StackType::Ref => jit_bail!("a field cannot hold a byref"),

            _ => {
                let code = self.cast_code(value.ty, Some(field_type));
                self.emit(
                    code,
                    vec![
                        Op::Mem(MemOp::base(self.mir_type(field_ty), offset, obj.reg)),
                        Op::Reg(value.reg),
                    ],
                );
            }
        }
        Ok(())
    }

    /// Store a value-type (or fat-pointer) field: a plain copy when the
    /// payload has no managed pointers, the barrier-aware copy otherwise.
    fn store_struct_field(
        &mut self,
        obj_reg: Reg,
        obj_is_object: bool,
        offset: i64,
        field_type: TypeId,
        value_reg: Reg,
    ) -> Result<(), JitError> {
        let size = self.u.stack_size(field_type);
        if self.u.managed_pointer_offsets(field_type).is_empty() {
            let wk = self.wk();
            let dest = self.new_reg(Some(wk.intptr));
            self.emit(
                InsnCode::Add,
                vec![Op::Reg(dest), Op::Reg(obj_reg), Op::Int(offset)],
            );
            self.emit_memcpy(dest, value_reg, size);
            return Ok(());
        }

        let type_item = self.type_item(field_type)?;
        if obj_is_object {
            let (proto, func) = self.items.runtime.managed_memcpy;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(obj_reg),
                    Op::Ref(type_item),
                    Op::Int(offset),
                    Op::Reg(value_reg),
                ],
            );
        } else {
            let wk = self.wk();
            let dest = self.new_reg(Some(wk.intptr));
            self.emit(
                InsnCode::Add,
                vec![Op::Reg(dest), Op::Reg(obj_reg), Op::Int(offset)],
            );
            let (proto, func) = self.items.runtime.managed_ref_memcpy;
            self.emit(
                InsnCode::Call,
                vec![
                    Op::Ref(proto),
                    Op::Ref(func),
                    Op::Reg(dest),
                    Op::Ref(type_item),
                    Op::Reg(value_reg),
                ],
            );
        }
        Ok(())
    }

    pub(super) fn ldfld(&mut self, il_offset: u32, field: FieldId) -> Result<(), JitError> {
        let obj = self.pop()?;

        match self.stack_type_of(obj.ty) {
            StackType::Ref => {
                let referent = obj.ty.and_then(|t| self.u.element_type(t));
                jit_check!(
                    referent
                        .is_some_and(|t| self.u.stack_type(t) == StackType::ValueType),
                    "ldfld through a byref to a non-value-type"
                );
            }
            StackType::Object | StackType::ValueType => {}
            _ => jit_bail!("ldfld on a non-object stack entry"),
        }

        self.check_field_on_chain(obj.ty, field)?;
        jit_check!(
            !self.u.with_field(field, |f| f.is_static()),
            "ldfld of a static field"
        );
        if let Some(obj_ty) = obj.ty {
            jit_check!(
                self.u.compatible_with(obj_ty, self.u.field_declaring(field)),
                "ldfld receiver is incompatible with the field's declaring type"
            );
        }

        let field_ty = self.u.field_type(field);
        let field_stack_type = self.u.intermediate_type(field_ty);
        let field_type = self.u.underlying_type(field_ty);
        let offset = self.u.field_offset(field) as i64;

        let value = self.push(Some(field_stack_type))?;

        if self.stack_type_of(obj.ty) == StackType::Object {
            self.null_check(il_offset, obj.reg, obj.ty)?;
        }

        match self.u.stack_type(field_type) {
            StackType::ValueType => {
                self.emit(
                    InsnCode::Add,
                    vec![Op::Reg(obj.reg), Op::Reg(obj.reg), Op::Int(offset)],
                );
                self.emit_memcpy(value, obj.reg, self.u.stack_size(field_type));
            }
            StackType::Object if self.u.is_interface(field_type) => {
                self.emit(
                    InsnCode::Add,
                    vec![Op::Reg(obj.reg), Op::Reg(obj.reg), Op::Int(offset)],
                );
                self.emit_memcpy(value, obj.reg, self.u.stack_size(field_type));
            }
            StackType::Ref => jit_bail!("a field cannot hold a byref"),
            _ => {
                let code = self.load_extend_code(field_type);
                self.emit(
                    code,
                    vec![
                        Op::Reg(value),
                        Op::Mem(MemOp::base(self.mir_type(field_ty), offset, obj.reg)),
                    ],
                );
            }
        }
        Ok(())
    }

    pub(super) fn ldflda(&mut self, il_offset: u32, field: FieldId) -> Result<(), JitError> {
        let obj = self.pop()?;
        jit_check!(
            matches!(
                self.stack_type_of(obj.ty),
                StackType::Object | StackType::Ref
            ),
            "ldflda on a non-addressable stack entry"
        );

        self.check_field_on_chain(obj.ty, field)?;
        jit_check!(
            !self.u.with_field(field, |f| f.is_static()),
            "ldflda of a static field"
        );
        if let Some(obj_ty) = obj.ty {
            jit_check!(
                self.u.compatible_with(obj_ty, self.u.field_declaring(field)),
                "ldflda receiver is incompatible with the field's declaring type"
            );
        }

        let field_ty = self.u.field_type(field);
        let byref = self.u.byref_type_of(self.u.verification_type(field_ty))?;
        let offset = self.u.field_offset(field) as i64;
        let value = self.push(Some(byref))?;

        if self.stack_type_of(obj.ty) == StackType::Object {
            self.null_check(il_offset, obj.reg, obj.ty)?;
        }

        self.emit(
            InsnCode::Add,
            vec![Op::Reg(value), Op::Reg(obj.reg), Op::Int(offset)],
        );
        Ok(())
    }
}
