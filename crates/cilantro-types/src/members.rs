use bitflags::bitflags;
use cilantro_metadata::MethodBodyRecord;
use cilantro_utils::{AssemblyId, FieldId, MethodId, TypeId, sync::Arc};

/// Member accessibility, from the low three attribute bits shared by fields
/// and methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    CompilerControlled,
    Private,
    FamilyAndAssembly,
    Assembly,
    Family,
    FamilyOrAssembly,
    Public,
}

impl MemberAccess {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            0 => MemberAccess::CompilerControlled,
            1 => MemberAccess::Private,
            2 => MemberAccess::FamilyAndAssembly,
            3 => MemberAccess::Assembly,
            4 => MemberAccess::Family,
            5 => MemberAccess::FamilyOrAssembly,
            _ => MemberAccess::Public,
        }
    }
}

bitflags! {
    /// MethodDef attribute bits (II.23.1.10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u16 {
        const STATIC = 0x0010;
        const FINAL = 0x0020;
        const VIRTUAL = 0x0040;
        const HIDE_BY_SIG = 0x0080;
        const NEW_SLOT = 0x0100;
        const ABSTRACT = 0x0400;
        const SPECIAL_NAME = 0x0800;
        const PINVOKE = 0x2000;
        const RT_SPECIAL_NAME = 0x1000;
        const _ = !0;
    }
}

bitflags! {
    /// MethodImpl attribute bits (II.23.1.11).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodImplFlags: u16 {
        const CODE_TYPE_MASK = 0x0003;
        const UNMANAGED = 0x0004;
        const AGGRESSIVE_INLINING = 0x0100;
        const INTERNAL_CALL = 0x1000;
        const _ = !0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodCodeType {
    Il,
    Native,
    Runtime,
}

impl MethodImplFlags {
    pub fn code_type(self) -> MethodCodeType {
        match (self & MethodImplFlags::CODE_TYPE_MASK).bits() {
            0 => MethodCodeType::Il,
            1 => MethodCodeType::Native,
            _ => MethodCodeType::Runtime,
        }
    }
}

bitflags! {
    /// Field attribute bits (II.23.1.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u16 {
        const STATIC = 0x0010;
        const INIT_ONLY = 0x0020;
        const LITERAL = 0x0040;
        const SPECIAL_NAME = 0x0200;
        const RT_SPECIAL_NAME = 0x0400;
        const _ = !0;
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, Copy)]
pub struct LocalVariable {
    pub index: u32,
    pub ty: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Catch(TypeId),
    Filter { offset: u32 },
    Finally,
    Fault,
}

/// A resolved exception-handling clause.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionClause {
    pub kind: ClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl ExceptionClause {
    pub fn try_contains(&self, offset: u32) -> bool {
        self.try_offset <= offset && offset < self.try_offset + self.try_length
    }

    pub fn handler_contains(&self, offset: u32) -> bool {
        self.handler_offset <= offset && offset < self.handler_offset + self.handler_length
    }
}

/// A resolved method body.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub max_stack: u32,
    pub init_locals: bool,
    pub il: Vec<u8>,
    pub locals: Vec<LocalVariable>,
    pub clauses: Vec<ExceptionClause>,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub assembly: AssemblyId,
    pub declaring: TypeId,
    pub name: String,
    pub flags: MethodFlags,
    pub access: MemberAccess,
    pub impl_flags: MethodImplFlags,
    pub return_type: Option<TypeId>,
    pub params: Vec<Param>,
    pub vtable_offset: Option<u32>,
    pub body: Option<Arc<MethodBody>>,

    // Setup-pass leftovers.
    pub signature: Vec<u8>,
    pub body_record: Option<MethodBodyRecord>,
    pub param_names: Vec<String>,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    pub fn is_final(&self) -> bool {
        self.flags.contains(MethodFlags::FINAL)
    }

    pub fn is_rt_special_name(&self) -> bool {
        self.flags.contains(MethodFlags::RT_SPECIAL_NAME)
    }

    pub fn is_internal_call(&self) -> bool {
        self.impl_flags.contains(MethodImplFlags::INTERNAL_CALL)
    }

    pub fn is_unmanaged(&self) -> bool {
        self.impl_flags.contains(MethodImplFlags::UNMANAGED)
    }

    pub fn is_aggressive_inlining(&self) -> bool {
        self.impl_flags.contains(MethodImplFlags::AGGRESSIVE_INLINING)
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub assembly: AssemblyId,
    pub declaring: TypeId,
    pub name: String,
    pub flags: FieldFlags,
    pub access: MemberAccess,
    /// Resolved in the fill pass.
    pub ty: Option<TypeId>,
    /// Byte offset inside the declaring type's layout (instance fields).
    pub offset: usize,

    pub signature: Vec<u8>,
}

impl Field {
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    pub fn is_init_only(&self) -> bool {
        self.flags.contains(FieldFlags::INIT_ONLY)
    }
}

/// An imported member reference, resolved at setup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRef {
    Method(MethodId),
    Field(FieldId),
}
