use std::fmt::{self, Display, Formatter};

macro_rules! arena_index {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                debug_assert!(index <= u32::MAX as usize);
                Self(index as u32)
            }

            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for usize {
            fn from(id: $name) -> usize {
                id.as_usize()
            }
        }
    };
}

arena_index! {
    /// Handle of a type node inside the universe arena.
    TypeId
}

arena_index! {
    /// Handle of a method inside the universe arena.
    MethodId
}

arena_index! {
    /// Handle of a field inside the universe arena.
    FieldId
}

arena_index! {
    /// Handle of a loaded assembly.
    AssemblyId
}
