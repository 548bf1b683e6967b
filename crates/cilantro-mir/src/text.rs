//! Deterministic textual form of modules.
//!
//! The output depends only on module structure and the names the builder
//! chose, so translating the same method twice prints the same text.

use crate::{Func, Insn, Item, MemOp, MirType, Module, Op};
use std::fmt::{self, Display, Formatter};

impl Display for MirType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MirType::I8 => write!(f, "i8"),
            MirType::U8 => write!(f, "u8"),
            MirType::I16 => write!(f, "i16"),
            MirType::U16 => write!(f, "u16"),
            MirType::I32 => write!(f, "i32"),
            MirType::U32 => write!(f, "u32"),
            MirType::I64 => write!(f, "i64"),
            MirType::U64 => write!(f, "u64"),
            MirType::F => write!(f, "f"),
            MirType::D => write!(f, "d"),
            MirType::P => write!(f, "p"),
            MirType::Blk(size) => write!(f, "blk:{size}"),
        }
    }
}

struct OpDisplay<'a> {
    op: &'a Op,
    func: &'a Func,
    module: &'a Module,
}

impl Display for OpDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Reg(r) => write!(f, "{}", self.func.regs[r.0 as usize].0),
            Op::Int(v) => write!(f, "{v}"),
            Op::Float(v) => write!(f, "{v:?}f"),
            Op::Double(v) => write!(f, "{v:?}d"),
            Op::Label(l) => write!(f, "L{}", l.0),
            Op::Ref(item) => write!(f, "&{}", self.module.items[item.0].name()),
            Op::Mem(MemOp {
                ty,
                disp,
                base,
                index,
                scale,
            }) => {
                write!(f, "{ty}:{disp}(")?;
                if let Some(b) = base {
                    write!(f, "{}", self.func.regs[b.0 as usize].0)?;
                }
                if let Some(i) = index {
                    write!(f, ",{},{}", self.func.regs[i.0 as usize].0, scale)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_insn(
    f: &mut Formatter<'_>,
    insn: &Insn,
    func: &Func,
    module: &Module,
) -> fmt::Result {
    if let crate::InsnCode::LabelDef = insn.code {
        if let Some(Op::Label(l)) = insn.ops.first() {
            return writeln!(f, "  L{}:", l.0);
        }
    }
    write!(f, "    {}", insn.code.mnemonic())?;
    for (i, op) in insn.ops.iter().enumerate() {
        if i == 0 {
            write!(f, " ")?;
        } else {
            write!(f, ", ")?;
        }
        write!(f, "{}", OpDisplay { op, func, module })?;
    }
    writeln!(f)
}

impl Module {
    fn fmt_func(&self, f: &mut Formatter<'_>, func: &Func) -> fmt::Result {
        write!(f, "{}: func", func.name)?;
        for r in &func.res {
            write!(f, " {r}")?;
        }
        for a in &func.args {
            write!(f, ", {}:{}", a.ty, a.name)?;
        }
        writeln!(f)?;
        for insn in &func.insns {
            write_insn(f, insn, func, self)?;
        }
        writeln!(f, "endfunc")
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for item in &self.items {
            match item {
                Item::Proto(p) => {
                    write!(f, "{}: proto", p.name)?;
                    for r in &p.res {
                        write!(f, " {r}")?;
                    }
                    for a in &p.args {
                        write!(f, ", {}:{}", a.ty, a.name)?;
                    }
                    writeln!(f)?;
                }
                Item::Import(n) => writeln!(f, "import {n}")?,
                Item::Export(n) => writeln!(f, "export {n}")?,
                Item::Forward(n) => writeln!(f, "forward {n}")?,
                Item::Bss { name, size } => writeln!(f, "{name}: bss {size}")?,
                Item::Func(func) => self.fmt_func(f, func)?,
            }
        }
        writeln!(f, "endmodule")
    }
}
