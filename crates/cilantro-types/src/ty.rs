use bitflags::bitflags;
use cilantro_metadata::Token;
use cilantro_utils::{AssemblyId, FieldId, MethodId, TypeId};

bitflags! {
    /// TypeDef attribute bits (ECMA-335 II.23.1.15). Only the bits the
    /// runtime consults are named.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        const VISIBILITY_MASK = 0x0000_0007;
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        const EXPLICIT_LAYOUT = 0x0000_0010;
        const INTERFACE = 0x0000_0020;
        const ABSTRACT = 0x0000_0080;
        const SEALED = 0x0000_0100;
        const SPECIAL_NAME = 0x0000_0400;
        const RT_SPECIAL_NAME = 0x0000_0800;
        const BEFORE_FIELD_INIT = 0x0010_0000;
        const _ = !0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeVisibility {
    NotPublic,
    Public,
    NestedPublic,
    NestedPrivate,
    NestedFamily,
    NestedAssembly,
    NestedFamilyAndAssembly,
    NestedFamilyOrAssembly,
}

impl TypeFlags {
    pub fn visibility(self) -> TypeVisibility {
        match (self & TypeFlags::VISIBILITY_MASK).bits() {
            0 => TypeVisibility::NotPublic,
            1 => TypeVisibility::Public,
            2 => TypeVisibility::NestedPublic,
            3 => TypeVisibility::NestedPrivate,
            4 => TypeVisibility::NestedFamily,
            5 => TypeVisibility::NestedAssembly,
            6 => TypeVisibility::NestedFamilyAndAssembly,
            _ => TypeVisibility::NestedFamilyOrAssembly,
        }
    }
}

/// The abstract-stack classification of a value of some type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackType {
    Int32,
    Int64,
    IntPtr,
    Float,
    Object,
    Ref,
    ValueType,
}

/// One implemented interface and the offset of its slot run inside the
/// implementing type's vtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceImpl {
    pub interface: TypeId,
    pub vtable_offset: u32,
}

/// A type node in the universe arena.
///
/// Created in the setup pass with identity only; the fill pass decodes member
/// signatures, computes layout and the vtable, and finally freezes the node
/// by setting `is_filled`. Layout fields must not change afterwards.
#[derive(Debug, Clone)]
pub struct Type {
    pub assembly: AssemblyId,
    pub namespace: String,
    pub name: String,
    pub flags: TypeFlags,

    pub base: Option<TypeId>,
    pub declaring: Option<TypeId>,
    /// Array element type or byref referent.
    pub element: Option<TypeId>,

    pub is_array: bool,
    pub is_byref: bool,
    pub is_value_type: bool,

    /// Set on generic parameter placeholder types.
    pub generic_param_position: Option<u32>,
    /// For an instantiation, the open definition it came from.
    pub generic_definition: Option<TypeId>,
    /// Parameters (on a definition) or arguments (on an instantiation).
    pub generic_args: Vec<TypeId>,
    /// Intrusive chain of instantiations hanging off a definition.
    pub next_generic_instance: Option<TypeId>,

    /// Lazily created derivatives, unique per base type.
    pub array_type: Option<TypeId>,
    pub byref_type: Option<TypeId>,

    pub interfaces: Vec<InterfaceImpl>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    /// Flat vtable slot assignment: inherited and own virtuals first, then
    /// one run per implemented interface.
    pub virtual_methods: Vec<MethodId>,

    // Setup-pass leftovers consumed by the fill pass.
    pub extends_token: Token,
    pub field_range: (u32, u32),
    pub method_range: (u32, u32),
    /// Explicit class layout (packing size, class size) when present.
    pub class_layout: Option<(u16, u32)>,
    /// InterfaceImpl rows naming this type, in declaration order.
    pub interface_tokens: Vec<Token>,
    /// MethodImpl rows naming this type: (body, declaration).
    pub method_impl_tokens: Vec<(Token, Token)>,

    // Layout, frozen once `is_filled` is set.
    pub stack_type: StackType,
    pub stack_size: usize,
    pub stack_align: usize,
    pub managed_size: usize,
    pub managed_align: usize,
    /// Sorted byte offsets of object references within the layout.
    pub managed_pointer_offsets: Vec<usize>,

    pub is_filled: bool,
    pub is_filling: bool,

    /// Address of the published vtable block, set by the JIT driver after
    /// linking.
    pub vtable: Option<usize>,
}

impl Type {
    pub fn stub(assembly: AssemblyId, namespace: String, name: String, flags: TypeFlags) -> Self {
        Self {
            assembly,
            namespace,
            name,
            flags,
            base: None,
            declaring: None,
            element: None,
            is_array: false,
            is_byref: false,
            is_value_type: false,
            generic_param_position: None,
            generic_definition: None,
            generic_args: Vec::new(),
            next_generic_instance: None,
            array_type: None,
            byref_type: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            virtual_methods: Vec::new(),
            extends_token: Token::NULL,
            field_range: (0, 0),
            method_range: (0, 0),
            class_layout: None,
            interface_tokens: Vec::new(),
            method_impl_tokens: Vec::new(),
            stack_type: StackType::Object,
            stack_size: 0,
            stack_align: 1,
            managed_size: 0,
            managed_align: 1,
            is_filled: false,
            is_filling: false,
            managed_pointer_offsets: Vec::new(),
            vtable: None,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    pub fn is_generic_definition(&self) -> bool {
        self.generic_definition.is_none() && !self.generic_args.is_empty()
    }
}
