//! The CIL opcode table and the streaming instruction decoder.
//!
//! Opcodes are keyed by a 16-bit value: the high byte is the prefix byte and
//! the low byte the byte after it. Unprefixed opcodes use the reserved high
//! byte [`UNPREFIXED`]. Branch operands are decoded to absolute IL offsets
//! (relative to the instruction following the operand bytes, per III.1.7.2).

use crate::{MetadataError, Token};

/// Reserved high byte for single-byte opcodes.
pub const UNPREFIXED: u8 = 0xff;
/// The one real prefix byte in use.
pub const PREFIX1: u8 = 0xfe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    InlineBrTarget,
    ShortInlineBrTarget,
    InlineField,
    InlineMethod,
    InlineType,
    InlineTok,
    InlineString,
    InlineSig,
    InlineI,
    ShortInlineI,
    InlineI8,
    InlineR,
    ShortInlineR,
    InlineVar,
    ShortInlineVar,
    InlineSwitch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Next,
    Branch,
    CondBranch,
    Call,
    Return,
    Throw,
    Meta,
    Break,
}

macro_rules! opcodes {
    ($(($variant:ident, $name:literal, $key:literal, $operand:ident, $flow:ident),)*) => {
        /// Every CIL opcode the runtime decodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum OpCode {
            $($variant,)*
        }

        impl OpCode {
            pub fn from_u16(value: u16) -> Option<OpCode> {
                match value {
                    $($key => Some(OpCode::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(OpCode::$variant => OperandKind::$operand,)*
                }
            }

            pub fn control_flow(self) -> ControlFlow {
                match self {
                    $(OpCode::$variant => ControlFlow::$flow,)*
                }
            }
        }
    };
}

opcodes! {
    (Nop, "nop", 0xff00, None, Next),
    (Break, "break", 0xff01, None, Break),
    (Ldarg0, "ldarg.0", 0xff02, None, Next),
    (Ldarg1, "ldarg.1", 0xff03, None, Next),
    (Ldarg2, "ldarg.2", 0xff04, None, Next),
    (Ldarg3, "ldarg.3", 0xff05, None, Next),
    (Ldloc0, "ldloc.0", 0xff06, None, Next),
    (Ldloc1, "ldloc.1", 0xff07, None, Next),
    (Ldloc2, "ldloc.2", 0xff08, None, Next),
    (Ldloc3, "ldloc.3", 0xff09, None, Next),
    (Stloc0, "stloc.0", 0xff0a, None, Next),
    (Stloc1, "stloc.1", 0xff0b, None, Next),
    (Stloc2, "stloc.2", 0xff0c, None, Next),
    (Stloc3, "stloc.3", 0xff0d, None, Next),
    (LdargS, "ldarg.s", 0xff0e, ShortInlineVar, Next),
    (LdargaS, "ldarga.s", 0xff0f, ShortInlineVar, Next),
    (StargS, "starg.s", 0xff10, ShortInlineVar, Next),
    (LdlocS, "ldloc.s", 0xff11, ShortInlineVar, Next),
    (LdlocaS, "ldloca.s", 0xff12, ShortInlineVar, Next),
    (StlocS, "stloc.s", 0xff13, ShortInlineVar, Next),
    (Ldnull, "ldnull", 0xff14, None, Next),
    (LdcI4M1, "ldc.i4.m1", 0xff15, None, Next),
    (LdcI40, "ldc.i4.0", 0xff16, None, Next),
    (LdcI41, "ldc.i4.1", 0xff17, None, Next),
    (LdcI42, "ldc.i4.2", 0xff18, None, Next),
    (LdcI43, "ldc.i4.3", 0xff19, None, Next),
    (LdcI44, "ldc.i4.4", 0xff1a, None, Next),
    (LdcI45, "ldc.i4.5", 0xff1b, None, Next),
    (LdcI46, "ldc.i4.6", 0xff1c, None, Next),
    (LdcI47, "ldc.i4.7", 0xff1d, None, Next),
    (LdcI48, "ldc.i4.8", 0xff1e, None, Next),
    (LdcI4S, "ldc.i4.s", 0xff1f, ShortInlineI, Next),
    (LdcI4, "ldc.i4", 0xff20, InlineI, Next),
    (LdcI8, "ldc.i8", 0xff21, InlineI8, Next),
    (LdcR4, "ldc.r4", 0xff22, ShortInlineR, Next),
    (LdcR8, "ldc.r8", 0xff23, InlineR, Next),
    (Dup, "dup", 0xff25, None, Next),
    (Pop, "pop", 0xff26, None, Next),
    (Call, "call", 0xff28, InlineMethod, Call),
    (Calli, "calli", 0xff29, InlineSig, Call),
    (Ret, "ret", 0xff2a, None, Return),
    (BrS, "br.s", 0xff2b, ShortInlineBrTarget, Branch),
    (BrfalseS, "brfalse.s", 0xff2c, ShortInlineBrTarget, CondBranch),
    (BrtrueS, "brtrue.s", 0xff2d, ShortInlineBrTarget, CondBranch),
    (BeqS, "beq.s", 0xff2e, ShortInlineBrTarget, CondBranch),
    (BgeS, "bge.s", 0xff2f, ShortInlineBrTarget, CondBranch),
    (BgtS, "bgt.s", 0xff30, ShortInlineBrTarget, CondBranch),
    (BleS, "ble.s", 0xff31, ShortInlineBrTarget, CondBranch),
    (BltS, "blt.s", 0xff32, ShortInlineBrTarget, CondBranch),
    (BneUnS, "bne.un.s", 0xff33, ShortInlineBrTarget, CondBranch),
    (BgeUnS, "bge.un.s", 0xff34, ShortInlineBrTarget, CondBranch),
    (BgtUnS, "bgt.un.s", 0xff35, ShortInlineBrTarget, CondBranch),
    (BleUnS, "ble.un.s", 0xff36, ShortInlineBrTarget, CondBranch),
    (BltUnS, "blt.un.s", 0xff37, ShortInlineBrTarget, CondBranch),
    (Br, "br", 0xff38, InlineBrTarget, Branch),
    (Brfalse, "brfalse", 0xff39, InlineBrTarget, CondBranch),
    (Brtrue, "brtrue", 0xff3a, InlineBrTarget, CondBranch),
    (Beq, "beq", 0xff3b, InlineBrTarget, CondBranch),
    (Bge, "bge", 0xff3c, InlineBrTarget, CondBranch),
    (Bgt, "bgt", 0xff3d, InlineBrTarget, CondBranch),
    (Ble, "ble", 0xff3e, InlineBrTarget, CondBranch),
    (Blt, "blt", 0xff3f, InlineBrTarget, CondBranch),
    (BneUn, "bne.un", 0xff40, InlineBrTarget, CondBranch),
    (BgeUn, "bge.un", 0xff41, InlineBrTarget, CondBranch),
    (BgtUn, "bgt.un", 0xff42, InlineBrTarget, CondBranch),
    (BleUn, "ble.un", 0xff43, InlineBrTarget, CondBranch),
    (BltUn, "blt.un", 0xff44, InlineBrTarget, CondBranch),
    (Switch, "switch", 0xff45, InlineSwitch, CondBranch),
    (LdindI1, "ldind.i1", 0xff46, None, Next),
    (LdindU1, "ldind.u1", 0xff47, None, Next),
    (LdindI2, "ldind.i2", 0xff48, None, Next),
    (LdindU2, "ldind.u2", 0xff49, None, Next),
    (LdindI4, "ldind.i4", 0xff4a, None, Next),
    (LdindU4, "ldind.u4", 0xff4b, None, Next),
    (LdindI8, "ldind.i8", 0xff4c, None, Next),
    (LdindI, "ldind.i", 0xff4d, None, Next),
    (LdindR4, "ldind.r4", 0xff4e, None, Next),
    (LdindR8, "ldind.r8", 0xff4f, None, Next),
    (LdindRef, "ldind.ref", 0xff50, None, Next),
    (StindRef, "stind.ref", 0xff51, None, Next),
    (StindI1, "stind.i1", 0xff52, None, Next),
    (StindI2, "stind.i2", 0xff53, None, Next),
    (StindI4, "stind.i4", 0xff54, None, Next),
    (StindI8, "stind.i8", 0xff55, None, Next),
    (StindR4, "stind.r4", 0xff56, None, Next),
    (StindR8, "stind.r8", 0xff57, None, Next),
    (Add, "add", 0xff58, None, Next),
    (Sub, "sub", 0xff59, None, Next),
    (Mul, "mul", 0xff5a, None, Next),
    (Div, "div", 0xff5b, None, Next),
    (DivUn, "div.un", 0xff5c, None, Next),
    (Rem, "rem", 0xff5d, None, Next),
    (RemUn, "rem.un", 0xff5e, None, Next),
    (And, "and", 0xff5f, None, Next),
    (Or, "or", 0xff60, None, Next),
    (Xor, "xor", 0xff61, None, Next),
    (Shl, "shl", 0xff62, None, Next),
    (Shr, "shr", 0xff63, None, Next),
    (ShrUn, "shr.un", 0xff64, None, Next),
    (Neg, "neg", 0xff65, None, Next),
    (Not, "not", 0xff66, None, Next),
    (ConvI1, "conv.i1", 0xff67, None, Next),
    (ConvI2, "conv.i2", 0xff68, None, Next),
    (ConvI4, "conv.i4", 0xff69, None, Next),
    (ConvI8, "conv.i8", 0xff6a, None, Next),
    (ConvR4, "conv.r4", 0xff6b, None, Next),
    (ConvR8, "conv.r8", 0xff6c, None, Next),
    (ConvU4, "conv.u4", 0xff6d, None, Next),
    (ConvU8, "conv.u8", 0xff6e, None, Next),
    (Callvirt, "callvirt", 0xff6f, InlineMethod, Call),
    (Cpobj, "cpobj", 0xff70, InlineType, Next),
    (Ldobj, "ldobj", 0xff71, InlineType, Next),
    (Ldstr, "ldstr", 0xff72, InlineString, Next),
    (Newobj, "newobj", 0xff73, InlineMethod, Call),
    (Castclass, "castclass", 0xff74, InlineType, Next),
    (Isinst, "isinst", 0xff75, InlineType, Next),
    (ConvRUn, "conv.r.un", 0xff76, None, Next),
    (Unbox, "unbox", 0xff79, InlineType, Next),
    (Throw, "throw", 0xff7a, None, Throw),
    (Ldfld, "ldfld", 0xff7b, InlineField, Next),
    (Ldflda, "ldflda", 0xff7c, InlineField, Next),
    (Stfld, "stfld", 0xff7d, InlineField, Next),
    (Ldsfld, "ldsfld", 0xff7e, InlineField, Next),
    (Ldsflda, "ldsflda", 0xff7f, InlineField, Next),
    (Stsfld, "stsfld", 0xff80, InlineField, Next),
    (Stobj, "stobj", 0xff81, InlineType, Next),
    (Box, "box", 0xff8c, InlineType, Next),
    (Newarr, "newarr", 0xff8d, InlineType, Next),
    (Ldlen, "ldlen", 0xff8e, None, Next),
    (Ldelema, "ldelema", 0xff8f, InlineType, Next),
    (LdelemI1, "ldelem.i1", 0xff90, None, Next),
    (LdelemU1, "ldelem.u1", 0xff91, None, Next),
    (LdelemI2, "ldelem.i2", 0xff92, None, Next),
    (LdelemU2, "ldelem.u2", 0xff93, None, Next),
    (LdelemI4, "ldelem.i4", 0xff94, None, Next),
    (LdelemU4, "ldelem.u4", 0xff95, None, Next),
    (LdelemI8, "ldelem.i8", 0xff96, None, Next),
    (LdelemI, "ldelem.i", 0xff97, None, Next),
    (LdelemR4, "ldelem.r4", 0xff98, None, Next),
    (LdelemR8, "ldelem.r8", 0xff99, None, Next),
    (LdelemRef, "ldelem.ref", 0xff9a, None, Next),
    (StelemI, "stelem.i", 0xff9b, None, Next),
    (StelemI1, "stelem.i1", 0xff9c, None, Next),
    (StelemI2, "stelem.i2", 0xff9d, None, Next),
    (StelemI4, "stelem.i4", 0xff9e, None, Next),
    (StelemI8, "stelem.i8", 0xff9f, None, Next),
    (StelemR4, "stelem.r4", 0xffa0, None, Next),
    (StelemR8, "stelem.r8", 0xffa1, None, Next),
    (StelemRef, "stelem.ref", 0xffa2, None, Next),
    (Ldelem, "ldelem", 0xffa3, InlineType, Next),
    (Stelem, "stelem", 0xffa4, InlineType, Next),
    (UnboxAny, "unbox.any", 0xffa5, InlineType, Next),
    (ConvU2, "conv.u2", 0xffd1, None, Next),
    (ConvU1, "conv.u1", 0xffd2, None, Next),
    (ConvI, "conv.i", 0xffd3, None, Next),
    (Endfinally, "endfinally", 0xffdc, None, Return),
    (Leave, "leave", 0xffdd, InlineBrTarget, Branch),
    (LeaveS, "leave.s", 0xffde, ShortInlineBrTarget, Branch),
    (StindI, "stind.i", 0xffdf, None, Next),
    (ConvU, "conv.u", 0xffe0, None, Next),
    (Ceq, "ceq", 0xfe01, None, Next),
    (Cgt, "cgt", 0xfe02, None, Next),
    (CgtUn, "cgt.un", 0xfe03, None, Next),
    (Clt, "clt", 0xfe04, None, Next),
    (CltUn, "clt.un", 0xfe05, None, Next),
    (Ldftn, "ldftn", 0xfe06, InlineMethod, Next),
    (Ldvirtftn, "ldvirtftn", 0xfe07, InlineMethod, Next),
    (Ldarg, "ldarg", 0xfe09, InlineVar, Next),
    (Ldarga, "ldarga", 0xfe0a, InlineVar, Next),
    (Starg, "starg", 0xfe0b, InlineVar, Next),
    (Ldloc, "ldloc", 0xfe0c, InlineVar, Next),
    (Ldloca, "ldloca", 0xfe0d, InlineVar, Next),
    (Stloc, "stloc", 0xfe0e, InlineVar, Next),
    (Endfilter, "endfilter", 0xfe11, None, Return),
    (Unaligned, "unaligned.", 0xfe12, ShortInlineI, Meta),
    (Volatile, "volatile.", 0xfe13, None, Meta),
    (Tail, "tail.", 0xfe14, None, Meta),
    (Initobj, "initobj", 0xfe15, InlineType, Next),
    (Constrained, "constrained.", 0xfe16, InlineType, Meta),
    (Rethrow, "rethrow", 0xfe1a, None, Throw),
    (Sizeof, "sizeof", 0xfe1c, InlineType, Next),
    (Readonly, "readonly.", 0xfe1e, None, Meta),
}

/// A decoded operand. Branch targets and switch entries are absolute IL
/// offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Token(Token),
    Target(u32),
    Var(u16),
    Switch(Vec<u32>),
}

/// One decoded instruction: its starting IL offset, the opcode, and the
/// decoded operand.
#[derive(Debug, Clone)]
pub struct CilOp {
    pub offset: u32,
    pub opcode: OpCode,
    pub operand: Operand,
}

/// Streaming decoder over a method's IL bytes.
pub struct InsnDecoder<'a> {
    il: &'a [u8],
    pos: usize,
}

impl<'a> InsnDecoder<'a> {
    pub fn new(il: &'a [u8]) -> Self {
        Self { il, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.il.len()
    }

    fn read_u8(&mut self) -> Result<u8, MetadataError> {
        let b = *self
            .il
            .get(self.pos)
            .ok_or(MetadataError::TruncatedInstruction(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], MetadataError> {
        let end = self.pos + N;
        let slice = self
            .il
            .get(self.pos..end)
            .ok_or(MetadataError::TruncatedInstruction(self.pos))?;
        self.pos = end;
        Ok(slice.try_into().unwrap())
    }

    fn read_i32(&mut self) -> Result<i32, MetadataError> {
        Ok(i32::from_le_bytes(self.read_bytes()?))
    }

    /// Decode the next instruction, or `None` at end of stream.
    pub fn next(&mut self) -> Result<Option<CilOp>, MetadataError> {
        if self.is_done() {
            return Ok(None);
        }
        let offset = self.pos as u32;

        let first = self.read_u8()?;
        let mut key = ((UNPREFIXED as u16) << 8) | first as u16;
        if first == PREFIX1 {
            let second = self.read_u8()?;
            key = ((PREFIX1 as u16) << 8) | second as u16;
        }
        let opcode =
            OpCode::from_u16(key).ok_or(MetadataError::InvalidOpcode(key, offset as usize))?;

        let operand = match opcode.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::InlineI => Operand::Int32(self.read_i32()?),
            OperandKind::ShortInlineI => Operand::Int32(self.read_u8()? as i8 as i32),
            OperandKind::InlineI8 => Operand::Int64(i64::from_le_bytes(self.read_bytes()?)),
            OperandKind::InlineR => Operand::Float64(f64::from_le_bytes(self.read_bytes()?)),
            OperandKind::ShortInlineR => Operand::Float32(f32::from_le_bytes(self.read_bytes()?)),
            OperandKind::InlineVar => Operand::Var(u16::from_le_bytes(self.read_bytes()?)),
            OperandKind::ShortInlineVar => Operand::Var(self.read_u8()? as u16),
            OperandKind::InlineBrTarget => {
                let rel = self.read_i32()?;
                Operand::Target(absolute_target(self.pos, rel, offset)?)
            }
            OperandKind::ShortInlineBrTarget => {
                let rel = self.read_u8()? as i8 as i32;
                Operand::Target(absolute_target(self.pos, rel, offset)?)
            }
            OperandKind::InlineField
            | OperandKind::InlineMethod
            | OperandKind::InlineType
            | OperandKind::InlineTok
            | OperandKind::InlineString
            | OperandKind::InlineSig => {
                Operand::Token(Token::from_raw(u32::from_le_bytes(self.read_bytes()?)))
            }
            OperandKind::InlineSwitch => {
                let count = u32::from_le_bytes(self.read_bytes()?);
                let mut rels = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    rels.push(self.read_i32()?);
                }
                // targets are relative to the end of the whole switch
                let base = self.pos;
                let targets = rels
                    .into_iter()
                    .map(|rel| absolute_target(base, rel, offset))
                    .collect::<Result<Vec<_>, _>>()?;
                Operand::Switch(targets)
            }
        };

        Ok(Some(CilOp {
            offset,
            opcode,
            operand,
        }))
    }
}

fn absolute_target(next_ip: usize, rel: i32, at: u32) -> Result<u32, MetadataError> {
    let target = next_ip as i64 + rel as i64;
    if target < 0 {
        return Err(MetadataError::InvalidOpcode(0, at as usize));
    }
    Ok(target as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(il: &[u8]) -> Vec<CilOp> {
        let mut d = InsnDecoder::new(il);
        let mut out = Vec::new();
        while let Some(op) = d.next().unwrap() {
            out.push(op);
        }
        out
    }

    #[test]
    fn simple_sequence() {
        // ldc.i4.2 ldc.i4.3 add ret
        let ops = decode_all(&[0x18, 0x19, 0x58, 0x2a]);
        let codes: Vec<_> = ops.iter().map(|o| o.opcode).collect();
        assert_eq!(
            codes,
            vec![OpCode::LdcI42, OpCode::LdcI43, OpCode::Add, OpCode::Ret]
        );
        assert_eq!(ops[2].offset, 2);
    }

    #[test]
    fn prefixed_opcode() {
        // ceq is fe 01
        let ops = decode_all(&[0x16, 0x16, 0xfe, 0x01, 0x2a]);
        assert_eq!(ops[2].opcode, OpCode::Ceq);
        assert_eq!(ops[2].offset, 2);
        assert_eq!(ops[3].offset, 4);
    }

    #[test]
    fn short_branch_target_is_absolute() {
        // br.s +2 over two nops, then a nop and ret at the target
        let ops = decode_all(&[0x2b, 0x02, 0x00, 0x00, 0x2a]);
        assert_eq!(ops[0].opcode, OpCode::BrS);
        assert_eq!(ops[0].operand, Operand::Target(4));
    }

    #[test]
    fn ldc_i4_s_sign_extends() {
        let ops = decode_all(&[0x1f, 0xff, 0x2a]);
        assert_eq!(ops[0].operand, Operand::Int32(-1));
    }

    #[test]
    fn switch_targets() {
        // switch with 2 entries, both relative to the end of the table
        let mut il = vec![0x45, 0x02, 0x00, 0x00, 0x00];
        il.extend_from_slice(&2i32.to_le_bytes());
        il.extend_from_slice(&(-13i32).to_le_bytes());
        il.push(0x2a); // ret at 13
        il.push(0x00);
        il.push(0x00); // filler so target 15 exists
        let ops = decode_all(&il);
        assert_eq!(ops[0].operand, Operand::Switch(vec![15, 0]));
    }

    #[test]
    fn invalid_opcode_errors() {
        let mut d = InsnDecoder::new(&[0xc0]);
        assert!(matches!(d.next(), Err(MetadataError::InvalidOpcode(_, 0))));
    }
}
