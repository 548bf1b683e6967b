//! Arithmetic, comparisons, and conversions: the implicit-conversion matrix
//! over the abstract stack classifications.

use super::MethodCompiler;
use crate::error::{JitError, jit_bail, jit_check};
use cilantro_metadata::OpCode;
use cilantro_mir::{InsnCode, Label, Op, Reg};
use cilantro_types::StackType;
use cilantro_utils::TypeId;

impl MethodCompiler<'_> {
    /// Binary numeric operation with the stack-type conversion matrix:
    /// Int32 pairs stay Int32, an Int32 beside an IntPtr widens, Int64 only
    /// pairs with itself, Single widens to Double when mixed. Division and
    /// modulo get a divide-by-zero guard on the denominator.
    pub(super) fn binary_numeric(
        &mut self,
        il_offset: u32,
        code: InsnCode,
        integer_only: bool,
    ) -> Result<(), JitError> {
        let value2 = self.pop()?;
        let value1 = self.pop()?;

        if matches!(
            code,
            InsnCode::Div | InsnCode::UDiv | InsnCode::Mod | InsnCode::UMod
        ) {
            // the denominator must be nonzero at runtime
            let ok = self.new_label();
            self.emit(InsnCode::Bt, vec![Op::Label(ok), Op::Reg(value2.reg)]);
            let wk = self.wk();
            self.throw_new(il_offset, wk.divide_by_zero_exception)?;
            self.place_label(ok);
        }

        let wk = self.wk();
        let mut value1_reg = value1.reg;
        let mut value2_reg = value2.reg;
        let code = match self.stack_type_of(value1.ty) {
            StackType::Int32 => match self.stack_type_of(value2.ty) {
                StackType::Int32 => {
                    self.push(Some(wk.int32))?;
                    code.int32()
                }
                StackType::IntPtr => {
                    self.push(Some(wk.intptr))?;
                    self.emit(
                        InsnCode::Ext32,
                        vec![Op::Reg(value1.reg), Op::Reg(value1.reg)],
                    );
                    code
                }
                _ => jit_bail!("int32 operand paired with a non-integer"),
            },
            StackType::Int64 => {
                jit_check!(
                    self.stack_type_of(value2.ty) == StackType::Int64,
                    "int64 operands only pair with int64"
                );
                self.push(Some(wk.int64))?;
                code
            }
            StackType::IntPtr => {
                match self.stack_type_of(value2.ty) {
                    StackType::Int32 => {
                        self.emit(
                            InsnCode::Ext32,
                            vec![Op::Reg(value2.reg), Op::Reg(value2.reg)],
                        );
                    }
                    StackType::IntPtr => {}
                    _ => jit_bail!("native int operand paired with a non-integer"),
                }
                self.push(Some(wk.intptr))?;
                code
            }
            StackType::Float => {
                jit_check!(!integer_only, "integer-only operation on floats");
                jit_check!(
                    self.stack_type_of(value2.ty) == StackType::Float,
                    "float operand paired with a non-float"
                );
                let v1_single = value1.ty == Some(wk.single);
                let v2_single = value2.ty == Some(wk.single);
                if v1_single && v2_single {
                    self.push(Some(wk.single))?;
                    code.float()
                } else {
                    // the single side widens to double
                    if v1_single {
                        let wide = self.new_reg(Some(wk.double));
                        self.emit(InsnCode::F2D, vec![Op::Reg(wide), Op::Reg(value1.reg)]);
                        value1_reg = wide;
                    }
                    if v2_single {
                        let wide = self.new_reg(Some(wk.double));
                        self.emit(InsnCode::F2D, vec![Op::Reg(wide), Op::Reg(value2.reg)]);
                        value2_reg = wide;
                    }
                    self.push(Some(wk.double))?;
                    code.double()
                }
            }
            StackType::ValueType | StackType::Object | StackType::Ref => {
                jit_bail!("arithmetic on a non-numeric stack entry")
            }
        };

        let result = self.stack.entries.last().map(|e| e.reg).unwrap_or(value1_reg);
        self.emit(
            code,
            vec![Op::Reg(result), Op::Reg(value1_reg), Op::Reg(value2_reg)],
        );
        Ok(())
    }

    /// Shifts: the shifted value keeps its classification, the count must
    /// be Int32 or IntPtr.
    pub(super) fn shift(&mut self, code: InsnCode) -> Result<(), JitError> {
        let count = self.pop()?;
        let value = self.pop()?;

        jit_check!(
            matches!(
                self.stack_type_of(count.ty),
                StackType::Int32 | StackType::IntPtr
            ),
            "shift count must be an integer"
        );

        let code = match self.stack_type_of(value.ty) {
            StackType::Int32 => code.int32(),
            StackType::Int64 | StackType::IntPtr => code,
            _ => jit_bail!("shift of a non-integer stack entry"),
        };

        let result = self.push(value.ty)?;
        self.emit(
            code,
            vec![Op::Reg(result), Op::Reg(value.reg), Op::Reg(count.reg)],
        );
        Ok(())
    }

    pub(super) fn unary_neg(&mut self) -> Result<(), JitError> {
        let wk = self.wk();
        let value = self.pop()?;
        let result = self.push(value.ty)?;
        let code = match self.stack_type_of(value.ty) {
            StackType::Int32 => InsnCode::NegS,
            StackType::Int64 | StackType::IntPtr => InsnCode::Neg,
            StackType::Float => {
                if value.ty == Some(wk.single) {
                    InsnCode::FNeg
                } else {
                    InsnCode::DNeg
                }
            }
            _ => jit_bail!("neg of a non-numeric stack entry"),
        };
        self.emit(code, vec![Op::Reg(result), Op::Reg(value.reg)]);
        Ok(())
    }

    pub(super) fn unary_not(&mut self) -> Result<(), JitError> {
        let value = self.pop()?;
        let result = self.push(value.ty)?;
        let code = match self.stack_type_of(value.ty) {
            StackType::Int32 => InsnCode::XorS,
            StackType::Int64 | StackType::IntPtr => InsnCode::Xor,
            _ => jit_bail!("not of a non-integer stack entry"),
        };
        // ~value == value ^ -1
        self.emit(
            code,
            vec![Op::Reg(result), Op::Reg(value.reg), Op::Int(-1)],
        );
        Ok(())
    }

    /// The conv.* family. Narrowing from a float source goes through a
    /// native-width float-to-int first, because that is the only form the
    /// target instruction set offers.
    pub(super) fn convert(&mut self, opcode: OpCode) -> Result<(), JitError> {
        let wk = self.wk();
        let value = self.pop()?;

        let result_type: TypeId = match opcode {
            OpCode::ConvI1
            | OpCode::ConvU1
            | OpCode::ConvI2
            | OpCode::ConvU2
            | OpCode::ConvI4
            | OpCode::ConvU4 => wk.int32,
            OpCode::ConvI8 | OpCode::ConvU8 => wk.int64,
            OpCode::ConvI | OpCode::ConvU => wk.intptr,
            OpCode::ConvR4 => wk.single,
            OpCode::ConvR8 | OpCode::ConvRUn => wk.double,
            _ => jit_bail!("not a conversion opcode"),
        };
        let result = self.push(Some(result_type))?;

        let mut src = value.reg;
        let code = match self.stack_type_of(value.ty) {
            StackType::Int32 => match opcode {
                OpCode::ConvI1 => InsnCode::Ext8,
                OpCode::ConvU1 => InsnCode::UExt8,
                OpCode::ConvI2 => InsnCode::Ext16,
                OpCode::ConvU2 => InsnCode::UExt16,
                OpCode::ConvI4 | OpCode::ConvU4 => InsnCode::Mov,
                OpCode::ConvI8 | OpCode::ConvI => InsnCode::Ext32,
                OpCode::ConvU8 | OpCode::ConvU => InsnCode::UExt32,
                OpCode::ConvR4 => InsnCode::I2F,
                OpCode::ConvR8 => InsnCode::I2D,
                OpCode::ConvRUn => {
                    // the source is an unsigned 32-bit value; zero-extend
                    // before the int-to-double
                    let tmp = self.new_reg(Some(wk.int64));
                    self.emit(InsnCode::UExt32, vec![Op::Reg(tmp), Op::Reg(src)]);
                    src = tmp;
                    InsnCode::I2D
                }
                _ => jit_bail!("not a conversion opcode"),
            },
            StackType::Int64 | StackType::IntPtr => match opcode {
                OpCode::ConvI1 => InsnCode::Ext8,
                OpCode::ConvU1 => InsnCode::UExt8,
                OpCode::ConvI2 => InsnCode::Ext16,
                OpCode::ConvU2 => InsnCode::UExt16,
                OpCode::ConvI4 => InsnCode::Ext32,
                OpCode::ConvU4 => InsnCode::UExt32,
                OpCode::ConvI8 | OpCode::ConvU8 | OpCode::ConvI | OpCode::ConvU => InsnCode::Mov,
                OpCode::ConvR4 => InsnCode::I2F,
                OpCode::ConvR8 => InsnCode::I2D,
                // the full unsigned 64-bit range needs the unsigned form
                OpCode::ConvRUn => InsnCode::UI2D,
                _ => jit_bail!("not a conversion opcode"),
            },
            StackType::Float => {
                let from_single = value.ty == Some(wk.single);
                if self.u.stack_type(result_type) == StackType::Int32 {
                    // two steps: float to native int, then narrow
                    self.emit(
                        if from_single {
                            InsnCode::F2I
                        } else {
                            InsnCode::D2I
                        },
                        vec![Op::Reg(result), Op::Reg(src)],
                    );
                    src = result;
                }
                match opcode {
                    OpCode::ConvI1 => InsnCode::Ext8,
                    OpCode::ConvU1 => InsnCode::UExt8,
                    OpCode::ConvI2 => InsnCode::Ext16,
                    OpCode::ConvU2 => InsnCode::UExt16,
                    OpCode::ConvI4 => InsnCode::Ext32,
                    OpCode::ConvU4 => InsnCode::UExt32,
                    OpCode::ConvI8 | OpCode::ConvU8 | OpCode::ConvI | OpCode::ConvU => {
                        if from_single {
                            InsnCode::F2I
                        } else {
                            InsnCode::D2I
                        }
                    }
                    OpCode::ConvR4 => {
                        if from_single {
                            InsnCode::FMov
                        } else {
                            InsnCode::D2F
                        }
                    }
                    OpCode::ConvR8 => {
                        if from_single {
                            InsnCode::F2D
                        } else {
                            InsnCode::DMov
                        }
                    }
                    OpCode::ConvRUn => jit_bail!("conv.r.un takes an integer source"),
                    _ => jit_bail!("not a conversion opcode"),
                }
            }
            _ => jit_bail!("conversion of a non-numeric stack entry"),
        };

        self.emit(code, vec![Op::Reg(result), Op::Reg(src)]);
        Ok(())
    }

    /// Shared operand agreement for compares and compare-branches. Returns
    /// the adjusted code plus the operand registers after any widening.
    fn comparison_operands(
        &mut self,
        code: InsnCode,
        value1: crate::stack::StackEntry,
        value2: crate::stack::StackEntry,
    ) -> Result<(InsnCode, Reg, Reg), JitError> {
        let wk = self.wk();
        let mut value1_reg = value1.reg;
        let mut value2_reg = value2.reg;
        let code = match self.stack_type_of(value1.ty) {
            StackType::Int32 => match self.stack_type_of(value2.ty) {
                StackType::Int32 => code.int32(),
                StackType::IntPtr => {
                    self.emit(
                        InsnCode::Ext32,
                        vec![Op::Reg(value1.reg), Op::Reg(value1.reg)],
                    );
                    code
                }
                _ => jit_bail!("int32 compared against a non-integer"),
            },
            StackType::Int64 => {
                jit_check!(
                    self.stack_type_of(value2.ty) == StackType::Int64,
                    "int64 compared against a non-int64"
                );
                code
            }
            StackType::IntPtr => {
                match self.stack_type_of(value2.ty) {
                    StackType::Int32 => {
                        self.emit(
                            InsnCode::Ext32,
                            vec![Op::Reg(value2.reg), Op::Reg(value2.reg)],
                        );
                    }
                    StackType::IntPtr => {}
                    _ => jit_bail!("native int compared against a non-integer"),
                }
                code
            }
            StackType::Float => {
                jit_check!(
                    self.stack_type_of(value2.ty) == StackType::Float,
                    "float compared against a non-float"
                );
                let v1_single = value1.ty == Some(wk.single);
                let v2_single = value2.ty == Some(wk.single);
                if v1_single && v2_single {
                    code.float()
                } else {
                    if v1_single {
                        let wide = self.new_reg(Some(wk.double));
                        self.emit(InsnCode::F2D, vec![Op::Reg(wide), Op::Reg(value1.reg)]);
                        value1_reg = wide;
                    }
                    if v2_single {
                        let wide = self.new_reg(Some(wk.double));
                        self.emit(InsnCode::F2D, vec![Op::Reg(wide), Op::Reg(value2.reg)]);
                        value2_reg = wide;
                    }
                    code.double()
                }
            }
            StackType::Object => {
                jit_check!(
                    self.stack_type_of(value2.ty) == StackType::Object,
                    "object compared against a non-object"
                );
                jit_check!(
                    matches!(code, InsnCode::Eq | InsnCode::Beq | InsnCode::Bne),
                    "only equality is defined on object references"
                );
                jit_check!(
                    !self.is_interface_opt(value1.ty) && !self.is_interface_opt(value2.ty),
                    "interface values do not compare as single words"
                );
                code
            }
            StackType::Ref => {
                jit_check!(
                    self.stack_type_of(value2.ty) == StackType::Ref,
                    "byref compared against a non-byref"
                );
                code
            }
            StackType::ValueType => jit_bail!("comparison of value-type stack entries"),
        };
        Ok((code, value1_reg, value2_reg))
    }

    pub(super) fn compare(&mut self, code: InsnCode) -> Result<(), JitError> {
        let wk = self.wk();
        let value2 = self.pop()?;
        let value1 = self.pop()?;
        let (code, v1, v2) = self.comparison_operands(code, value1, value2)?;
        let result = self.push(Some(wk.int32))?;
        self.emit(code, vec![Op::Reg(result), Op::Reg(v1), Op::Reg(v2)]);
        Ok(())
    }

    pub(super) fn compare_branch(
        &mut self,
        code: InsnCode,
        il_offset: u32,
        il_target: u32,
    ) -> Result<(), JitError> {
        let value2 = self.pop()?;
        let value1 = self.pop()?;
        let label: Label = self.branch_point(il_offset, il_target)?;
        let (code, v1, v2) = self.comparison_operands(code, value1, value2)?;
        self.emit(code, vec![Op::Label(label), Op::Reg(v1), Op::Reg(v2)]);
        Ok(())
    }
}
