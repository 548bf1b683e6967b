//! Constants and plain stack shuffles.

use super::MethodCompiler;
use crate::error::JitError;
use cilantro_metadata::Token;
use cilantro_mir::{InsnCode, Op};
use cilantro_types::StackType;

impl MethodCompiler<'_> {
    pub(super) fn ldc_i4(&mut self, value: i32) -> Result<(), JitError> {
        let wk = self.wk();
        let reg = self.push(Some(wk.int32))?;
        self.emit(InsnCode::Mov, vec![Op::Reg(reg), Op::Int(value as i64)]);
        Ok(())
    }

    pub(super) fn ldc_i8(&mut self, value: i64) -> Result<(), JitError> {
        let wk = self.wk();
        let reg = self.push(Some(wk.int64))?;
        self.emit(InsnCode::Mov, vec![Op::Reg(reg), Op::Int(value)]);
        Ok(())
    }

    pub(super) fn ldc_r4(&mut self, value: f32) -> Result<(), JitError> {
        let wk = self.wk();
        let reg = self.push(Some(wk.single))?;
        self.emit(InsnCode::FMov, vec![Op::Reg(reg), Op::Float(value)]);
        Ok(())
    }

    pub(super) fn ldc_r8(&mut self, value: f64) -> Result<(), JitError> {
        let wk = self.wk();
        let reg = self.push(Some(wk.double))?;
        self.emit(InsnCode::DMov, vec![Op::Reg(reg), Op::Double(value)]);
        Ok(())
    }

    pub(super) fn ldnull(&mut self) -> Result<(), JitError> {
        let reg = self.push(None)?;
        self.emit(InsnCode::Mov, vec![Op::Reg(reg), Op::Int(0)]);
        Ok(())
    }

    pub(super) fn ldstr(&mut self, token: Token) -> Result<(), JitError> {
        let wk = self.wk();
        // validates the token resolves to an actual string
        let _ = self.u.user_string(self.assembly, token)?;
        let item = self
            .items
            .strings
            .get(&token.index)
            .copied()
            .ok_or_else(|| JitError::NotFound(format!("string item for token {token}")))?;
        let reg = self.push(Some(wk.string))?;
        self.emit(InsnCode::Mov, vec![Op::Reg(reg), Op::Ref(item)]);
        Ok(())
    }

    pub(super) fn dup(&mut self) -> Result<(), JitError> {
        let top = self.pop()?;
        let first = self.push(top.ty)?;
        let second = self.push(top.ty)?;

        match self.stack_type_of(top.ty) {
            StackType::ValueType => {
                // the first copy can share the buffer, the second gets its own
                self.emit(InsnCode::Mov, vec![Op::Reg(first), Op::Reg(top.reg)]);
                let size = top.ty.map(|t| self.u.stack_size(t)).unwrap_or(0);
                self.emit_memcpy(second, first, size);
            }
            StackType::Object if self.is_interface_opt(top.ty) => {
                self.emit(InsnCode::Mov, vec![Op::Reg(first), Op::Reg(top.reg)]);
                let size = top.ty.map(|t| self.u.stack_size(t)).unwrap_or(0);
                self.emit_memcpy(second, first, size);
            }
            _ => {
                let code = self.mov_code(top.ty);
                self.emit(code, vec![Op::Reg(first), Op::Reg(top.reg)]);
                self.emit(code, vec![Op::Reg(second), Op::Reg(top.reg)]);
            }
        }
        Ok(())
    }
}
