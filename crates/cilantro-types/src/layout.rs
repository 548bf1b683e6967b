//! Size, alignment, and field placement rules.
//!
//! 64-bit target: pointers are 8 bytes. Value types lay their fields out
//! directly; reference types put a vtable-pointer header at offset 0 and the
//! instance fields after it. The collected `managed_pointer_offsets` list is
//! what drives barrier-aware struct copies.

use crate::{StackType, TypeLoadError, universe::Inner};
use cilantro_utils::TypeId;

pub const POINTER_SIZE: usize = 8;
/// Object header: a single vtable pointer.
pub const OBJECT_HEADER_SIZE: usize = POINTER_SIZE;
/// Offset of the owning-type word inside a vtable block.
pub const VTABLE_TYPE_OFFSET: usize = 0;
/// Offset of the virtual-function array inside a vtable block.
pub const VTABLE_FUNCTIONS_OFFSET: usize = POINTER_SIZE;
/// Offset of an array's length field inside the object.
pub const ARRAY_LENGTH_OFFSET: usize = OBJECT_HEADER_SIZE;
/// An interface value on the stack is two words: vtable slice + object.
pub const FAT_POINTER_SIZE: usize = 2 * POINTER_SIZE;

pub const fn align_up(value: usize, align: usize) -> usize {
    let misalignment = value % align;
    if misalignment == 0 {
        value
    } else {
        value + align - misalignment
    }
}

/// Fixed layouts of the primitive value types. Returns `None` for anything
/// that is not a primitive.
pub(crate) fn primitive_layout(
    wk: &crate::WellKnown,
    id: TypeId,
) -> Option<(usize, usize, StackType)> {
    Some(if id == wk.boolean || id == wk.byte || id == wk.sbyte {
        (1, 1, StackType::Int32)
    } else if id == wk.char || id == wk.int16 || id == wk.uint16 {
        (2, 2, StackType::Int32)
    } else if id == wk.int32 || id == wk.uint32 {
        (4, 4, StackType::Int32)
    } else if id == wk.int64 || id == wk.uint64 {
        (8, 8, StackType::Int64)
    } else if id == wk.intptr || id == wk.uintptr {
        (POINTER_SIZE, POINTER_SIZE, StackType::IntPtr)
    } else if id == wk.single {
        (4, 4, StackType::Float)
    } else if id == wk.double {
        (8, 8, StackType::Float)
    } else {
        return None;
    })
}

/// Compute and freeze the layout of `id`. Fields must already have resolved
/// types, and all field types must themselves be filled.
pub(crate) fn compute_type_layout(
    g: &mut Inner,
    wk: &crate::WellKnown,
    id: TypeId,
) -> Result<(), TypeLoadError> {
    // primitives have architecture-fixed layouts
    if let Some((size, align, stack_type)) = primitive_layout(wk, id) {
        let t = &mut g.types[id.as_usize()];
        t.stack_size = size;
        t.stack_align = align;
        t.managed_size = size;
        t.managed_align = align;
        t.stack_type = stack_type;
        return Ok(());
    }

    let (is_value_type, is_interface, class_layout) = {
        let t = &g.types[id.as_usize()];
        (t.is_value_type, t.is_interface(), t.class_layout)
    };

    if is_interface {
        // a stack-level interface value is a fat pointer
        let t = &mut g.types[id.as_usize()];
        t.stack_type = StackType::Object;
        t.stack_size = FAT_POINTER_SIZE;
        t.stack_align = POINTER_SIZE;
        t.managed_size = FAT_POINTER_SIZE;
        t.managed_align = POINTER_SIZE;
        return Ok(());
    }

    let explicit = g.types[id.as_usize()]
        .flags
        .contains(crate::TypeFlags::EXPLICIT_LAYOUT);
    if explicit && !is_value_type {
        return Err(TypeLoadError::check(
            "explicit layout is only supported on value types",
        ));
    }

    // field offsets are object-absolute: value types start at zero,
    // reference types after the header (and their base's fields)
    let (end, fields_align, ptr_offsets) = if explicit {
        explicit_fields_layout(g, id, class_layout)?
    } else {
        auto_fields_layout(g, id, class_layout.map(|(p, _)| p as usize))?
    };

    if is_value_type {
        let size = align_up(end.max(1), fields_align);
        let t = &mut g.types[id.as_usize()];
        t.stack_type = StackType::ValueType;
        t.stack_size = size;
        t.stack_align = fields_align;
        t.managed_size = size;
        t.managed_align = fields_align;
        t.managed_pointer_offsets = ptr_offsets;
    } else {
        // reference type: one pointer on the stack, header plus fields on
        // the heap
        let align = fields_align.max(POINTER_SIZE);
        let size = align_up(end.max(OBJECT_HEADER_SIZE), align);
        let t = &mut g.types[id.as_usize()];
        t.stack_type = StackType::Object;
        t.stack_size = POINTER_SIZE;
        t.stack_align = POINTER_SIZE;
        t.managed_size = size;
        t.managed_align = align;
        t.managed_pointer_offsets = ptr_offsets;
    }
    Ok(())
}

/// How a field contributes to its owner's layout.
struct FieldSlot {
    size: usize,
    align: usize,
    /// Object-reference offsets inside the slot.
    ptr_offsets: Vec<usize>,
    is_ref: bool,
}

/// Size and alignment of a field of type `fty`, by kind. Reference-typed
/// fields are a pointer regardless of whether the target type is filled yet,
/// which is what makes mutually-recursive class graphs layout-able.
fn field_slot(g: &Inner, fty: TypeId) -> Result<FieldSlot, TypeLoadError> {
    let ft = &g.types[fty.as_usize()];
    if ft.is_interface() {
        // fat pointer: the object half is the managed reference
        return Ok(FieldSlot {
            size: FAT_POINTER_SIZE,
            align: POINTER_SIZE,
            ptr_offsets: vec![POINTER_SIZE],
            is_ref: true,
        });
    }
    if ft.is_byref {
        return Err(TypeLoadError::check("a field cannot be a byref type"));
    }
    if ft.is_value_type {
        if !ft.is_filled {
            return Err(TypeLoadError::check(
                "value-type field used before its layout is computed",
            ));
        }
        return Ok(FieldSlot {
            size: ft.stack_size,
            align: ft.stack_align,
            ptr_offsets: ft.managed_pointer_offsets.clone(),
            is_ref: false,
        });
    }
    // classes, arrays, strings, generic parameters: one pointer
    Ok(FieldSlot {
        size: POINTER_SIZE,
        align: POINTER_SIZE,
        ptr_offsets: vec![0],
        is_ref: true,
    })
}

/// Place instance fields at the next aligned offset each, inherited fields
/// first. Offsets are object-absolute; for reference types placement starts
/// after the header and the base type's fields. Returns (end offset, align,
/// managed pointer offsets).
fn auto_fields_layout(
    g: &mut Inner,
    id: TypeId,
    packing: Option<usize>,
) -> Result<(usize, usize, Vec<usize>), TypeLoadError> {
    let is_value_type = g.types[id.as_usize()].is_value_type;
    let base = g.types[id.as_usize()].base;
    let (mut offset, mut align, mut ptr_offsets) = if is_value_type {
        (0, 1, Vec::new())
    } else {
        match base {
            Some(b) => {
                let bt = &g.types[b.as_usize()];
                (
                    bt.managed_size.max(OBJECT_HEADER_SIZE),
                    bt.managed_align.max(POINTER_SIZE),
                    bt.managed_pointer_offsets.clone(),
                )
            }
            None => (OBJECT_HEADER_SIZE, POINTER_SIZE, Vec::new()),
        }
    };

    let field_ids = g.types[id.as_usize()].fields.clone();
    for fid in field_ids {
        let (is_static, fty) = {
            let f = &g.fields[fid.as_usize()];
            (f.is_static(), f.ty)
        };
        if is_static {
            continue;
        }
        let fty = fty.ok_or_else(|| TypeLoadError::check("field type not resolved"))?;
        let mut slot = field_slot(g, fty)?;
        if let Some(pack) = packing {
            if pack > 0 {
                slot.align = slot.align.min(pack);
            }
        }

        offset = align_up(offset, slot.align);
        ptr_offsets.extend(slot.ptr_offsets.iter().map(|p| offset + p));
        g.fields[fid.as_usize()].offset = offset;
        offset += slot.size;
        align = align.max(slot.align);
    }

    ptr_offsets.sort_unstable();
    Ok((offset, align, ptr_offsets))
}

/// Explicit layout: offsets come from the FieldLayout table (already stored
/// on the fields). Validated so that no object-reference field overlaps a
/// plain-data field.
fn explicit_fields_layout(
    g: &mut Inner,
    id: TypeId,
    class_layout: Option<(u16, u32)>,
) -> Result<(usize, usize, Vec<usize>), TypeLoadError> {
    let field_ids = g.types[id.as_usize()].fields.clone();
    let mut size = 0usize;
    let mut align = 1usize;
    let mut ptr_offsets = Vec::new();
    let mut data_ranges: Vec<(usize, usize, bool)> = Vec::new();

    for fid in field_ids {
        let (is_static, fty, offset) = {
            let f = &g.fields[fid.as_usize()];
            (f.is_static(), f.ty, f.offset)
        };
        if is_static {
            continue;
        }
        let fty = fty.ok_or_else(|| TypeLoadError::check("field type not resolved"))?;
        let slot = field_slot(g, fty)?;
        if offset % slot.align != 0 {
            return Err(TypeLoadError::check("misaligned explicit field offset"));
        }
        let holds_refs = slot.is_ref || !slot.ptr_offsets.is_empty();
        ptr_offsets.extend(slot.ptr_offsets.iter().map(|p| offset + p));
        data_ranges.push((offset, offset + slot.size, holds_refs));
        size = size.max(offset + slot.size);
        align = align.max(slot.align);
    }

    // a managed-pointer slot must never alias unmanaged data
    for (i, &(s1, e1, r1)) in data_ranges.iter().enumerate() {
        for &(s2, e2, r2) in &data_ranges[i + 1..] {
            if s1 < e2 && s2 < e1 && r1 != r2 {
                return Err(TypeLoadError::check(
                    "explicit layout overlaps a managed pointer with plain data",
                ));
            }
        }
    }

    if let Some((_, declared_size)) = class_layout {
        size = size.max(declared_size as usize);
    }

    ptr_offsets.sort_unstable();
    ptr_offsets.dedup();
    Ok((size, align, ptr_offsets))
}
