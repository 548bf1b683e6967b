//! Modules, functions, and prototypes.

use crate::{Insn, Label, MirType, Reg};

/// Index of an item inside its module, usable as a `Ref` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef(pub usize);

/// A named, typed variable in a prototype or function signature. Block
/// types carry their byte size.
#[derive(Debug, Clone, PartialEq)]
pub struct MirVar {
    pub name: String,
    pub ty: MirType,
}

impl MirVar {
    pub fn new(name: impl Into<String>, ty: MirType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A call prototype: result types and argument variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Proto {
    pub name: String,
    pub res: Vec<MirType>,
    pub args: Vec<MirVar>,
}

/// Register storage class. MIR registers are 64-bit integer, float, or
/// double; block values live behind an integer register holding an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    I64,
    F,
    D,
}

impl RegClass {
    pub fn for_type(ty: MirType) -> RegClass {
        match ty {
            MirType::F => RegClass::F,
            MirType::D => RegClass::D,
            _ => RegClass::I64,
        }
    }
}

/// A function under construction: signature, registers, instruction stream.
#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub res: Vec<MirType>,
    pub args: Vec<MirVar>,
    /// All registers, argument registers first.
    pub regs: Vec<(String, RegClass)>,
    pub insns: Vec<Insn>,
    label_count: u32,
}

impl Func {
    fn new(name: String, res: Vec<MirType>, args: Vec<MirVar>) -> Self {
        let regs = args
            .iter()
            .map(|a| (a.name.clone(), RegClass::for_type(a.ty)))
            .collect();
        Self {
            name,
            res,
            args,
            regs,
            insns: Vec::new(),
            label_count: 0,
        }
    }

    /// Create a named register of the given class.
    pub fn new_reg(&mut self, name: impl Into<String>, class: RegClass) -> Reg {
        let reg = Reg(self.regs.len() as u32);
        self.regs.push((name.into(), class));
        reg
    }

    /// Look up an argument register by name.
    pub fn arg_reg(&self, name: &str) -> Option<Reg> {
        self.args
            .iter()
            .position(|a| a.name == name)
            .map(|i| Reg(i as u32))
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.label_count);
        self.label_count += 1;
        label
    }

    pub fn label_count(&self) -> u32 {
        self.label_count
    }

    pub fn append(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    /// Insert at the top of the function; used for allocas so backing
    /// storage exists on every path.
    pub fn prepend(&mut self, insn: Insn) {
        self.insns.insert(0, insn);
    }

    pub fn reg_class(&self, reg: Reg) -> RegClass {
        self.regs[reg.0 as usize].1
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Proto(Proto),
    Import(String),
    Export(String),
    Forward(String),
    Bss { name: String, size: usize },
    Func(Func),
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Proto(p) => &p.name,
            Item::Import(n) | Item::Export(n) | Item::Forward(n) => n,
            Item::Bss { name, .. } => name,
            Item::Func(f) => &f.name,
        }
    }
}

/// One translation module: an ordered list of items built by the JIT and
/// handed to the linker whole.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub items: Vec<Item>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, item: Item) -> ItemRef {
        self.items.push(item);
        ItemRef(self.items.len() - 1)
    }

    pub fn new_proto(
        &mut self,
        name: impl Into<String>,
        res: Vec<MirType>,
        args: Vec<MirVar>,
    ) -> ItemRef {
        self.push(Item::Proto(Proto {
            name: name.into(),
            res,
            args,
        }))
    }

    pub fn new_import(&mut self, name: impl Into<String>) -> ItemRef {
        self.push(Item::Import(name.into()))
    }

    pub fn new_export(&mut self, name: impl Into<String>) -> ItemRef {
        self.push(Item::Export(name.into()))
    }

    pub fn new_forward(&mut self, name: impl Into<String>) -> ItemRef {
        self.push(Item::Forward(name.into()))
    }

    pub fn new_bss(&mut self, name: impl Into<String>, size: usize) -> ItemRef {
        self.push(Item::Bss {
            name: name.into(),
            size,
        })
    }

    pub fn new_func(
        &mut self,
        name: impl Into<String>,
        res: Vec<MirType>,
        args: Vec<MirVar>,
    ) -> ItemRef {
        self.push(Item::Func(Func::new(name.into(), res, args)))
    }

    pub fn func_mut(&mut self, item: ItemRef) -> &mut Func {
        match &mut self.items[item.0] {
            Item::Func(f) => f,
            _ => panic!("item is not a function"),
        }
    }

    pub fn func(&self, item: ItemRef) -> &Func {
        match &self.items[item.0] {
            Item::Func(f) => f,
            _ => panic!("item is not a function"),
        }
    }
}
