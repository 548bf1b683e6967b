//! The reference evaluator.
//!
//! Executes linked functions directly: integer registers are 64-bit, float
//! and double registers carry their own classes, alloca storage lives on the
//! evaluator frame, and memory operands dereference real addresses (alloca
//! buffers, bss storage, heap objects handed in by the runtime's
//! allocator). Function "addresses" are handles in a reserved range, so
//! indirect calls through vtable slots dispatch here exactly like direct
//! ones.
//!
//! This is the executor the driver and the end-to-end tests run linked
//! modules on; a native code generator consuming the same linked form is the
//! production back end.

use crate::{
    InsnCode, MirError, MirType,
    link::{ExecFunc, FUNC_ADDR_BASE, HOST_ADDR_BASE, LInsn, LMem, LOp, LinkedProgram},
    module::RegClass,
};
use cilantro_utils::sync::Arc;

const MAX_CALL_DEPTH: usize = 1024;

/// A register or result value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I(i64),
    F(f32),
    D(f64),
}

impl Value {
    pub fn as_i64(self) -> i64 {
        match self {
            Value::I(v) => v,
            Value::F(v) => v as i64,
            Value::D(v) => v as i64,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Value::I(v) => v as f32,
            Value::F(v) => v,
            Value::D(v) => v as f32,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Value::I(v) => v as f64,
            Value::F(v) => v as f64,
            Value::D(v) => v,
        }
    }
}

/// Evaluator over one linked snapshot.
pub struct Machine {
    program: Arc<LinkedProgram>,
}

struct Frame<'a> {
    func: &'a ExecFunc,
    regs: Vec<Value>,
    /// Keeps alloca (and block-argument copy) storage alive for the frame.
    allocas: Vec<Box<[u8]>>,
}

impl Machine {
    pub fn new(program: Arc<LinkedProgram>) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Arc<LinkedProgram> {
        &self.program
    }

    /// Call an exported function by symbol name.
    pub fn call_name(&self, name: &str, args: &[Value]) -> Result<Vec<Value>, MirError> {
        let addr = self
            .program
            .resolve(name)
            .ok_or_else(|| MirError::UnresolvedSymbol(name.to_string()))?;
        self.call_addr(addr, args, 0)
    }

    fn call_addr(&self, addr: u64, args: &[Value], depth: usize) -> Result<Vec<Value>, MirError> {
        if depth > MAX_CALL_DEPTH {
            return Err(MirError::CallDepthExceeded);
        }
        if addr >= FUNC_ADDR_BASE {
            let func = self
                .program
                .func_by_addr(addr)
                .ok_or(MirError::UnknownFunction(addr))?
                .clone();
            self.exec(&func, args, depth)
        } else if addr >= HOST_ADDR_BASE {
            let idx = (addr - HOST_ADDR_BASE) as usize;
            let host = self
                .program
                .hosts
                .get(idx)
                .ok_or(MirError::UnknownFunction(addr))?;
            Ok(host(args))
        } else {
            Err(MirError::UnknownFunction(addr))
        }
    }

    fn exec(&self, func: &ExecFunc, args: &[Value], depth: usize) -> Result<Vec<Value>, MirError> {
        let mut frame = Frame {
            func,
            regs: func
                .regs
                .iter()
                .map(|c| match c {
                    RegClass::I64 => Value::I(0),
                    RegClass::F => Value::F(0.0),
                    RegClass::D => Value::D(0.0),
                })
                .collect(),
            allocas: Vec::new(),
        };
        for (i, arg) in args.iter().enumerate().take(func.args.len()) {
            frame.regs[i] = *arg;
        }

        let mut pc = 0usize;
        loop {
            let insn = frame
                .func
                .insns
                .get(pc)
                .ok_or(MirError::BadOperand("execution fell off the function"))?;
            pc += 1;
            match self.step(&mut frame, insn, depth)? {
                Step::Next => {}
                Step::Jump(label) => {
                    let target = frame.func.labels[label as usize];
                    if target == usize::MAX {
                        return Err(MirError::UnplacedLabel(label));
                    }
                    pc = target;
                }
                Step::Return(values) => return Ok(values),
            }
        }
    }

    fn step(&self, frame: &mut Frame, insn: &LInsn, depth: usize) -> Result<Step, MirError> {
        use InsnCode::*;
        let code = insn.code;
        match code {
            LabelDef => Ok(Step::Next),

            Mov | FMov | DMov | Ext8 | UExt8 | Ext16 | UExt16 | Ext32 | UExt32 | I2F | I2D
            | UI2D | F2I | D2I | F2D | D2F | Neg | NegS | FNeg | DNeg => {
                let src = read_op(frame, &insn.ops[1])?;
                let value = match code {
                    Mov => Value::I(src.as_i64()),
                    FMov => Value::F(src.as_f32()),
                    DMov => Value::D(src.as_f64()),
                    Ext8 => Value::I(src.as_i64() as i8 as i64),
                    UExt8 => Value::I(src.as_i64() as u8 as i64),
                    Ext16 => Value::I(src.as_i64() as i16 as i64),
                    UExt16 => Value::I(src.as_i64() as u16 as i64),
                    Ext32 => Value::I(src.as_i64() as i32 as i64),
                    UExt32 => Value::I(src.as_i64() as u32 as i64),
                    I2F => Value::F(src.as_i64() as f32),
                    I2D => Value::D(src.as_i64() as f64),
                    UI2D => Value::D(src.as_i64() as u64 as f64),
                    F2I => Value::I(float_to_i64(src.as_f32() as f64)),
                    D2I => Value::I(float_to_i64(src.as_f64())),
                    F2D => Value::D(src.as_f32() as f64),
                    D2F => Value::F(src.as_f64() as f32),
                    Neg => Value::I(src.as_i64().wrapping_neg()),
                    NegS => Value::I((src.as_i64() as i32).wrapping_neg() as i64),
                    FNeg => Value::F(-src.as_f32()),
                    DNeg => Value::D(-src.as_f64()),
                    _ => unreachable!(),
                };
                write_op(frame, &insn.ops[0], value)?;
                Ok(Step::Next)
            }

            Add | AddS | Sub | SubS | Mul | MulS | Div | DivS | UDiv | UDivS | Mod | ModS
            | UMod | UModS | And | AndS | Or | OrS | Xor | XorS | LSh | LShS | RSh | RShS
            | URSh | URShS => {
                let a = read_op(frame, &insn.ops[1])?.as_i64();
                let b = read_op(frame, &insn.ops[2])?.as_i64();
                let value = int_binop(code, a, b)?;
                write_op(frame, &insn.ops[0], Value::I(value))?;
                Ok(Step::Next)
            }

            FAdd | FSub | FMul | FDiv => {
                let a = read_op(frame, &insn.ops[1])?.as_f32();
                let b = read_op(frame, &insn.ops[2])?.as_f32();
                let value = match code {
                    FAdd => a + b,
                    FSub => a - b,
                    FMul => a * b,
                    FDiv => a / b,
                    _ => unreachable!(),
                };
                write_op(frame, &insn.ops[0], Value::F(value))?;
                Ok(Step::Next)
            }

            DAdd | DSub | DMul | DDiv => {
                let a = read_op(frame, &insn.ops[1])?.as_f64();
                let b = read_op(frame, &insn.ops[2])?.as_f64();
                let value = match code {
                    DAdd => a + b,
                    DSub => a - b,
                    DMul => a * b,
                    DDiv => a / b,
                    _ => unreachable!(),
                };
                write_op(frame, &insn.ops[0], Value::D(value))?;
                Ok(Step::Next)
            }

            Eq | EqS | Ne | NeS | Lt | LtS | ULt | ULtS | Le | LeS | ULe | ULeS | Gt | GtS
            | UGt | UGtS | Ge | GeS | UGe | UGeS => {
                let a = read_op(frame, &insn.ops[1])?.as_i64();
                let b = read_op(frame, &insn.ops[2])?.as_i64();
                let value = int_compare(code, a, b);
                write_op(frame, &insn.ops[0], Value::I(value as i64))?;
                Ok(Step::Next)
            }

            FEq | FNe | FLt | FLe | FGt | FGe => {
                let a = read_op(frame, &insn.ops[1])?.as_f32() as f64;
                let b = read_op(frame, &insn.ops[2])?.as_f32() as f64;
                let value = float_compare(code, a, b);
                write_op(frame, &insn.ops[0], Value::I(value as i64))?;
                Ok(Step::Next)
            }

            DEq | DNe | DLt | DLe | DGt | DGe => {
                let a = read_op(frame, &insn.ops[1])?.as_f64();
                let b = read_op(frame, &insn.ops[2])?.as_f64();
                let value = float_compare(code, a, b);
                write_op(frame, &insn.ops[0], Value::I(value as i64))?;
                Ok(Step::Next)
            }

            Jmp => match insn.ops[0] {
                LOp::Label(l) => Ok(Step::Jump(l)),
                _ => Err(MirError::BadOperand("jmp target is not a label")),
            },

            Bt | BtS | Bf | BfS => {
                let label = label_op(&insn.ops[0])?;
                let v = read_op(frame, &insn.ops[1])?.as_i64();
                let v = if matches!(code, BtS | BfS) {
                    (v as i32) as i64
                } else {
                    v
                };
                let taken = match code {
                    Bt | BtS => v != 0,
                    _ => v == 0,
                };
                Ok(if taken { Step::Jump(label) } else { Step::Next })
            }

            Beq | BeqS | Bne | BneS | Blt | BltS | UBlt | UBltS | Ble | BleS | UBle | UBleS
            | Bgt | BgtS | UBgt | UBgtS | Bge | BgeS | UBge | UBgeS => {
                let label = label_op(&insn.ops[0])?;
                let a = read_op(frame, &insn.ops[1])?.as_i64();
                let b = read_op(frame, &insn.ops[2])?.as_i64();
                let taken = int_branch(code, a, b);
                Ok(if taken { Step::Jump(label) } else { Step::Next })
            }

            FBeq | FBne | FBlt | FBle | FBgt | FBge => {
                let label = label_op(&insn.ops[0])?;
                let a = read_op(frame, &insn.ops[1])?.as_f32() as f64;
                let b = read_op(frame, &insn.ops[2])?.as_f32() as f64;
                Ok(if float_branch(code, a, b) {
                    Step::Jump(label)
                } else {
                    Step::Next
                })
            }

            DBeq | DBne | DBlt | DBle | DBgt | DBge => {
                let label = label_op(&insn.ops[0])?;
                let a = read_op(frame, &insn.ops[1])?.as_f64();
                let b = read_op(frame, &insn.ops[2])?.as_f64();
                Ok(if float_branch(code, a, b) {
                    Step::Jump(label)
                } else {
                    Step::Next
                })
            }

            Switch => {
                let sel = read_op(frame, &insn.ops[0])?.as_i64();
                let target = insn
                    .ops
                    .get(1 + sel as usize)
                    .ok_or(MirError::BadOperand("switch selector out of range"))?;
                Ok(Step::Jump(label_op(target)?))
            }

            Alloca => {
                let size = read_op(frame, &insn.ops[1])?.as_i64().max(1) as usize;
                let storage = vec![0u8; size].into_boxed_slice();
                let addr = storage.as_ptr() as i64;
                frame.allocas.push(storage);
                write_op(frame, &insn.ops[0], Value::I(addr))?;
                Ok(Step::Next)
            }

            Call | Inline => {
                let proto_idx = match insn.ops[0] {
                    LOp::Proto(p) => p as usize,
                    _ => return Err(MirError::BadOperand("call without a prototype")),
                };
                let proto = &self.program.protos[proto_idx];
                let nres = proto.res.len();
                let callee = read_op(frame, &insn.ops[1])?.as_i64() as u64;

                let mut args = Vec::with_capacity(insn.ops.len() - 2 - nres);
                for (i, op) in insn.ops[2 + nres..].iter().enumerate() {
                    let value = read_op(frame, op)?;
                    // block arguments are copied; the callee gets its own
                    let value = match proto.args.get(i).map(|a| a.ty) {
                        Some(MirType::Blk(size)) => {
                            let src = value.as_i64() as u64;
                            let mut copy = vec![0u8; size.max(1)].into_boxed_slice();
                            unsafe {
                                std::ptr::copy_nonoverlapping(
                                    src as *const u8,
                                    copy.as_mut_ptr(),
                                    size,
                                );
                            }
                            let addr = copy.as_ptr() as i64;
                            frame.allocas.push(copy);
                            Value::I(addr)
                        }
                        _ => value,
                    };
                    args.push(value);
                }

                let results = self.call_addr(callee, &args, depth + 1)?;
                for (i, result) in results.iter().enumerate().take(nres) {
                    write_op(frame, &insn.ops[2 + i], *result)?;
                }
                Ok(Step::Next)
            }

            Ret => {
                let mut values = Vec::with_capacity(insn.ops.len());
                for op in &insn.ops {
                    values.push(read_op(frame, op)?);
                }
                Ok(Step::Return(values))
            }

            _ => Err(MirError::Unsupported(code.mnemonic())),
        }
    }
}

enum Step {
    Next,
    Jump(u32),
    Return(Vec<Value>),
}

fn label_op(op: &LOp) -> Result<u32, MirError> {
    match op {
        LOp::Label(l) => Ok(*l),
        _ => Err(MirError::BadOperand("branch target is not a label")),
    }
}

fn read_op(frame: &Frame, op: &LOp) -> Result<Value, MirError> {
    Ok(match op {
        LOp::Reg(r) => frame.regs[*r as usize],
        LOp::Int(v) => Value::I(*v),
        LOp::Float(v) => Value::F(*v),
        LOp::Double(v) => Value::D(*v),
        LOp::Value(v) => Value::I(*v as i64),
        LOp::Mem(m) => read_mem(frame, m)?,
        LOp::Label(_) => return Err(MirError::BadOperand("label used as a value")),
        LOp::Proto(_) => return Err(MirError::BadOperand("prototype used as a value")),
    })
}

fn write_op(frame: &mut Frame, op: &LOp, value: Value) -> Result<(), MirError> {
    match op {
        LOp::Reg(r) => {
            let class = frame.func.regs[*r as usize];
            frame.regs[*r as usize] = match class {
                RegClass::I64 => Value::I(value.as_i64()),
                RegClass::F => Value::F(value.as_f32()),
                RegClass::D => Value::D(value.as_f64()),
            };
            Ok(())
        }
        LOp::Mem(m) => write_mem(frame, m, value),
        _ => Err(MirError::BadOperand("store into a non-lvalue operand")),
    }
}

fn mem_address(frame: &Frame, m: &LMem) -> i64 {
    let mut addr = m.disp;
    if let Some(base) = m.base {
        addr = addr.wrapping_add(frame.regs[base as usize].as_i64());
    }
    if let Some(index) = m.index {
        addr = addr
            .wrapping_add(frame.regs[index as usize].as_i64().wrapping_mul(m.scale as i64));
    }
    addr
}

fn read_mem(frame: &Frame, m: &LMem) -> Result<Value, MirError> {
    let addr = mem_address(frame, m) as u64 as usize;
    // Safety: addresses originate from alloca frames, pinned bss, and the
    // runtime allocator; the translator's null and bounds checks run before
    // any dereference in well-formed programs.
    unsafe {
        Ok(match m.ty {
            MirType::I8 => Value::I((addr as *const i8).read_unaligned() as i64),
            MirType::U8 => Value::I((addr as *const u8).read_unaligned() as i64),
            MirType::I16 => Value::I((addr as *const i16).read_unaligned() as i64),
            MirType::U16 => Value::I((addr as *const u16).read_unaligned() as i64),
            MirType::I32 => Value::I((addr as *const i32).read_unaligned() as i64),
            MirType::U32 => Value::I((addr as *const u32).read_unaligned() as i64),
            MirType::I64 | MirType::U64 | MirType::P => {
                Value::I((addr as *const i64).read_unaligned())
            }
            MirType::F => Value::F((addr as *const f32).read_unaligned()),
            MirType::D => Value::D((addr as *const f64).read_unaligned()),
            MirType::Blk(_) => return Err(MirError::BadOperand("block memory operand")),
        })
    }
}

fn write_mem(frame: &Frame, m: &LMem, value: Value) -> Result<(), MirError> {
    let addr = mem_address(frame, m) as u64 as usize;
    // Safety: see read_mem.
    unsafe {
        match m.ty {
            MirType::I8 | MirType::U8 => (addr as *mut u8).write_unaligned(value.as_i64() as u8),
            MirType::I16 | MirType::U16 => {
                (addr as *mut u16).write_unaligned(value.as_i64() as u16)
            }
            MirType::I32 | MirType::U32 => {
                (addr as *mut u32).write_unaligned(value.as_i64() as u32)
            }
            MirType::I64 | MirType::U64 | MirType::P => {
                (addr as *mut i64).write_unaligned(value.as_i64())
            }
            MirType::F => (addr as *mut f32).write_unaligned(value.as_f32()),
            MirType::D => (addr as *mut f64).write_unaligned(value.as_f64()),
            MirType::Blk(_) => return Err(MirError::BadOperand("block memory operand")),
        }
    }
    Ok(())
}

/// Saturating float-to-integer conversion at native width.
fn float_to_i64(v: f64) -> i64 {
    if v.is_nan() { 0 } else { v as i64 }
}

fn int_binop(code: InsnCode, a: i64, b: i64) -> Result<i64, MirError> {
    use InsnCode::*;
    let a32 = a as i32;
    let b32 = b as i32;
    Ok(match code {
        Add => a.wrapping_add(b),
        AddS => a32.wrapping_add(b32) as i64,
        Sub => a.wrapping_sub(b),
        SubS => a32.wrapping_sub(b32) as i64,
        Mul => a.wrapping_mul(b),
        MulS => a32.wrapping_mul(b32) as i64,
        Div => a
            .checked_div(b)
            .ok_or(MirError::BadOperand("integer division fault"))?,
        DivS => a32
            .checked_div(b32)
            .ok_or(MirError::BadOperand("integer division fault"))?
            as i64,
        UDiv => ((a as u64).checked_div(b as u64))
            .ok_or(MirError::BadOperand("integer division fault"))? as i64,
        UDivS => ((a32 as u32).checked_div(b32 as u32))
            .ok_or(MirError::BadOperand("integer division fault"))? as i64,
        Mod => a
            .checked_rem(b)
            .ok_or(MirError::BadOperand("integer division fault"))?,
        ModS => a32
            .checked_rem(b32)
            .ok_or(MirError::BadOperand("integer division fault"))?
            as i64,
        UMod => ((a as u64).checked_rem(b as u64))
            .ok_or(MirError::BadOperand("integer division fault"))? as i64,
        UModS => ((a32 as u32).checked_rem(b32 as u32))
            .ok_or(MirError::BadOperand("integer division fault"))? as i64,
        And => a & b,
        AndS => (a32 & b32) as i64,
        Or => a | b,
        OrS => (a32 | b32) as i64,
        Xor => a ^ b,
        XorS => (a32 ^ b32) as i64,
        LSh => a.wrapping_shl(b as u32),
        LShS => a32.wrapping_shl(b32 as u32) as i64,
        RSh => a.wrapping_shr(b as u32),
        RShS => a32.wrapping_shr(b32 as u32) as i64,
        URSh => ((a as u64).wrapping_shr(b as u32)) as i64,
        URShS => ((a32 as u32).wrapping_shr(b32 as u32)) as i64,
        _ => unreachable!(),
    })
}

fn int_compare(code: InsnCode, a: i64, b: i64) -> bool {
    use InsnCode::*;
    let (a32, b32) = (a as i32, b as i32);
    match code {
        Eq => a == b,
        EqS => a32 == b32,
        Ne => a != b,
        NeS => a32 != b32,
        Lt => a < b,
        LtS => a32 < b32,
        ULt => (a as u64) < (b as u64),
        ULtS => (a32 as u32) < (b32 as u32),
        Le => a <= b,
        LeS => a32 <= b32,
        ULe => (a as u64) <= (b as u64),
        ULeS => (a32 as u32) <= (b32 as u32),
        Gt => a > b,
        GtS => a32 > b32,
        UGt => (a as u64) > (b as u64),
        UGtS => (a32 as u32) > (b32 as u32),
        Ge => a >= b,
        GeS => a32 >= b32,
        UGe => (a as u64) >= (b as u64),
        UGeS => (a32 as u32) >= (b32 as u32),
        _ => unreachable!(),
    }
}

fn float_compare(code: InsnCode, a: f64, b: f64) -> bool {
    use InsnCode::*;
    match code {
        FEq | DEq => a == b,
        FNe | DNe => a != b,
        FLt | DLt => a < b,
        FLe | DLe => a <= b,
        FGt | DGt => a > b,
        FGe | DGe => a >= b,
        _ => unreachable!(),
    }
}

fn int_branch(code: InsnCode, a: i64, b: i64) -> bool {
    use InsnCode::*;
    match code {
        Beq => int_compare(Eq, a, b),
        BeqS => int_compare(EqS, a, b),
        Bne => int_compare(Ne, a, b),
        BneS => int_compare(NeS, a, b),
        Blt => int_compare(Lt, a, b),
        BltS => int_compare(LtS, a, b),
        UBlt => int_compare(ULt, a, b),
        UBltS => int_compare(ULtS, a, b),
        Ble => int_compare(Le, a, b),
        BleS => int_compare(LeS, a, b),
        UBle => int_compare(ULe, a, b),
        UBleS => int_compare(ULeS, a, b),
        Bgt => int_compare(Gt, a, b),
        BgtS => int_compare(GtS, a, b),
        UBgt => int_compare(UGt, a, b),
        UBgtS => int_compare(UGtS, a, b),
        Bge => int_compare(Ge, a, b),
        BgeS => int_compare(GeS, a, b),
        UBge => int_compare(UGe, a, b),
        UBgeS => int_compare(UGeS, a, b),
        _ => unreachable!(),
    }
}

fn float_branch(code: InsnCode, a: f64, b: f64) -> bool {
    use InsnCode::*;
    match code {
        FBeq | DBeq => a == b,
        FBne | DBne => a != b,
        FBlt | DBlt => a < b,
        FBle | DBle => a <= b,
        FBgt | DBgt => a > b,
        FBge | DBge => a >= b,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GlobalLinker, Insn, InsnCode, MirVar, Module, Op, RegClass};

    #[test]
    fn add_function_runs() {
        let mut module = Module::new("m");
        let f = module.new_func(
            "add",
            vec![MirType::I64],
            vec![MirVar::new("a", MirType::I64), MirVar::new("b", MirType::I64)],
        );
        {
            let func = module.func_mut(f);
            let a = func.arg_reg("a").unwrap();
            let b = func.arg_reg("b").unwrap();
            let r = func.new_reg("r", RegClass::I64);
            func.append(Insn::new(
                InsnCode::Add,
                vec![Op::Reg(r), Op::Reg(a), Op::Reg(b)],
            ));
            func.append(Insn::new(InsnCode::Ret, vec![Op::Reg(r)]));
        }
        let linker = GlobalLinker::new();
        linker.load_module(module);
        let program = linker.link().unwrap();
        let machine = Machine::new(program);
        let out = machine.call_name("add", &[Value::I(2), Value::I(40)]).unwrap();
        assert_eq!(out, vec![Value::I(42)]);
    }

    #[test]
    fn branches_and_labels() {
        let mut module = Module::new("m");
        let f = module.new_func("abs", vec![MirType::I64], vec![MirVar::new("v", MirType::I64)]);
        {
            let func = module.func_mut(f);
            let v = func.arg_reg("v").unwrap();
            let done = func.new_label();
            func.append(Insn::new(
                InsnCode::Bge,
                vec![Op::Label(done), Op::Reg(v), Op::Int(0)],
            ));
            func.append(Insn::new(InsnCode::Neg, vec![Op::Reg(v), Op::Reg(v)]));
            func.append(Insn::label(done));
            func.append(Insn::new(InsnCode::Ret, vec![Op::Reg(v)]));
        }
        let linker = GlobalLinker::new();
        linker.load_module(module);
        let machine = Machine::new(linker.link().unwrap());
        assert_eq!(machine.call_name("abs", &[Value::I(-7)]).unwrap(), vec![Value::I(7)]);
        assert_eq!(machine.call_name("abs", &[Value::I(3)]).unwrap(), vec![Value::I(3)]);
    }

    #[test]
    fn alloca_and_memory_ops() {
        let mut module = Module::new("m");
        let f = module.new_func("slot", vec![MirType::I64], vec![]);
        {
            let func = module.func_mut(f);
            let p = func.new_reg("p", RegClass::I64);
            let r = func.new_reg("r", RegClass::I64);
            func.append(Insn::new(InsnCode::Alloca, vec![Op::Reg(p), Op::Int(8)]));
            func.append(Insn::new(
                InsnCode::Mov,
                vec![Op::Mem(crate::MemOp::base(MirType::I64, 0, p)), Op::Int(99)],
            ));
            func.append(Insn::new(
                InsnCode::Mov,
                vec![Op::Reg(r), Op::Mem(crate::MemOp::base(MirType::I64, 0, p))],
            ));
            func.append(Insn::new(InsnCode::Ret, vec![Op::Reg(r)]));
        }
        let linker = GlobalLinker::new();
        linker.load_module(module);
        let machine = Machine::new(linker.link().unwrap());
        assert_eq!(machine.call_name("slot", &[]).unwrap(), vec![Value::I(99)]);
    }

    #[test]
    fn host_functions_are_callable() {
        let mut module = Module::new("m");
        let proto = module.new_proto(
            "double$proto",
            vec![MirType::I64],
            vec![MirVar::new("v", MirType::I64)],
        );
        let import = module.new_import("host_double");
        let f = module.new_func("call_host", vec![MirType::I64], vec![]);
        {
            let func = module.func_mut(f);
            let r = func.new_reg("r", RegClass::I64);
            func.append(Insn::new(
                InsnCode::Call,
                vec![Op::Ref(proto), Op::Ref(import), Op::Reg(r), Op::Int(21)],
            ));
            func.append(Insn::new(InsnCode::Ret, vec![Op::Reg(r)]));
        }
        let linker = GlobalLinker::new();
        linker.load_host(
            "host_double",
            Arc::new(|args: &[Value]| vec![Value::I(args[0].as_i64() * 2)]),
        );
        linker.load_module(module);
        let machine = Machine::new(linker.link().unwrap());
        assert_eq!(machine.call_name("call_host", &[]).unwrap(), vec![Value::I(42)]);
    }

    #[test]
    fn text_output_is_deterministic() {
        let build = || {
            let mut module = Module::new("m");
            let f = module.new_func("f", vec![MirType::I64], vec![]);
            let func = module.func_mut(f);
            let r = func.new_reg("s1", RegClass::I64);
            func.append(Insn::new(InsnCode::Mov, vec![Op::Reg(r), Op::Int(5)]));
            func.append(Insn::new(InsnCode::Ret, vec![Op::Reg(r)]));
            format!("{module}")
        };
        assert_eq!(build(), build());
    }
}
