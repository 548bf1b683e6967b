//! Runtime services JITted code calls back into.
//!
//! The collector itself is an external collaborator; only its ABI crosses
//! the boundary (`gc_new`, the write barriers, root registration, and the
//! heap index lookup). [`BumpHeap`] is the never-collecting allocator that
//! implements the ABI for the driver and the tests. The rest of this module
//! is runtime proper: the instance-of check, the interface fat-pointer cast,
//! barrier-aware struct copies, vtable blocks, and string objects.

use crate::object::{
    ARRAY_LENGTH_OFFSET, OBJECT_HEADER_SIZE, POINTER_SIZE, VTABLE_FUNCTIONS_OFFSET,
};
use cilantro_mir::{GlobalLinker, Value};
use cilantro_types::Universe;
use cilantro_utils::{
    TypeId,
    sync::{Arc, Mutex},
};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Type handles passed through MIR live in this reserved range.
pub const TYPE_HANDLE_BASE: u64 = 0x7d00_0000_0000_0000;

pub fn type_handle(ty: TypeId) -> u64 {
    TYPE_HANDLE_BASE + ty.0 as u64
}

pub fn handle_type(handle: u64) -> Option<TypeId> {
    if handle >= TYPE_HANDLE_BASE {
        Some(TypeId((handle - TYPE_HANDLE_BASE) as u32))
    } else {
        None
    }
}

/// A never-collecting allocator behind the GC ABI. Every allocation is its
/// own pinned block; a range index backs `heap_find_fast`.
#[derive(Default)]
pub struct BumpHeap {
    inner: Mutex<HeapInner>,
}

#[derive(Default)]
struct HeapInner {
    blocks: Vec<Box<[u8]>>,
    /// start address -> size, for containing-object lookups.
    ranges: BTreeMap<usize, usize>,
}

impl BumpHeap {
    pub fn alloc(&self, size: usize) -> usize {
        let block = vec![0u8; size.max(1)].into_boxed_slice();
        let addr = block.as_ptr() as usize;
        let mut g = self.inner.lock();
        g.ranges.insert(addr, size.max(1));
        g.blocks.push(block);
        addr
    }

    /// The containing allocation's base address, or zero.
    pub fn find_fast(&self, addr: usize) -> usize {
        let g = self.inner.lock();
        match g.ranges.range(..=addr).next_back() {
            Some((&start, &size)) if addr < start + size => start,
            _ => 0,
        }
    }
}

struct VtableBlock {
    storage: Box<[u64]>,
}

impl VtableBlock {
    fn addr(&self) -> usize {
        self.storage.as_ptr() as usize
    }
}

/// Shared runtime state: the universe, the allocator, published vtables,
/// registered GC roots.
pub struct Runtime {
    pub universe: Arc<Universe>,
    heap: BumpHeap,
    vtables: Mutex<FxHashMap<TypeId, VtableBlock>>,
    roots: Mutex<Vec<usize>>,
}

impl Runtime {
    pub fn new(universe: Arc<Universe>) -> Arc<Self> {
        Arc::new(Self {
            universe,
            heap: BumpHeap::default(),
            vtables: Mutex::new(FxHashMap::default()),
            roots: Mutex::new(Vec::new()),
        })
    }

    pub fn heap(&self) -> &BumpHeap {
        &self.heap
    }

    /// The vtable block address for a type, creating an empty block on
    /// demand (arrays and strings get theirs this way).
    pub fn vtable_addr(&self, ty: TypeId) -> usize {
        if let Some(addr) = self.universe.type_vtable(ty) {
            return addr;
        }
        let mut g = self.vtables.lock();
        if let Some(block) = g.get(&ty) {
            return block.addr();
        }
        let slots = self.universe.virtual_methods(ty).len();
        let mut storage = vec![0u64; 1 + slots].into_boxed_slice();
        storage[0] = type_handle(ty);
        let block = VtableBlock { storage };
        let addr = block.addr();
        g.insert(ty, block);
        drop(g);
        self.universe.set_type_vtable(ty, addr);
        addr
    }

    /// Publish a filled vtable: the owning-type word followed by the
    /// virtual-function addresses.
    pub fn publish_vtable(&self, ty: TypeId, functions: &[u64]) -> usize {
        let mut storage = vec![0u64; 1 + functions.len()].into_boxed_slice();
        storage[0] = type_handle(ty);
        storage[1..].copy_from_slice(functions);
        let block = VtableBlock { storage };
        let addr = block.addr();
        self.vtables.lock().insert(ty, block);
        self.universe.set_type_vtable(ty, addr);
        addr
    }

    pub fn gc_add_root(&self, addr: usize) {
        self.roots.lock().push(addr);
    }

    pub fn root_count(&self) -> usize {
        self.roots.lock().len()
    }

    /// Allocate a string object: header, int32 length, UTF-16 payload.
    pub fn alloc_string(&self, value: &str) -> usize {
        let wk = self.universe.well_known();
        let units: Vec<u16> = value.encode_utf16().collect();
        let size = OBJECT_HEADER_SIZE + 4 + units.len() * 2;
        let addr = self.heap.alloc(size);
        let vtable = self.vtable_addr(wk.string);
        unsafe {
            (addr as *mut u64).write(vtable as u64);
            ((addr + ARRAY_LENGTH_OFFSET) as *mut u32).write(units.len() as u32);
            let chars = (addr + ARRAY_LENGTH_OFFSET + 4) as *mut u16;
            for (i, u) in units.iter().enumerate() {
                chars.add(i).write(*u);
            }
        }
        addr
    }

    /// The runtime type of a heap object, read back through its header.
    pub fn object_type(&self, obj: usize) -> Option<TypeId> {
        if obj == 0 {
            return None;
        }
        let vtable = unsafe { (obj as *const u64).read() };
        if vtable == 0 {
            return None;
        }
        let handle = unsafe { (vtable as usize as *const u64).read() };
        handle_type(handle)
    }

    // ---- the helpers JITted code calls ----------------------------------

    fn gc_new(&self, handle: u64, size: usize) -> u64 {
        let Some(ty) = handle_type(handle) else {
            return 0;
        };
        let addr = self.heap.alloc(size);
        let vtable = self.vtable_addr(ty);
        unsafe { (addr as *mut u64).write(vtable as u64) };
        addr as u64
    }

    fn is_instance(&self, obj: u64, handle: u64) -> bool {
        if obj == 0 {
            return true;
        }
        let (Some(actual), Some(wanted)) = (self.object_type(obj as usize), handle_type(handle))
        else {
            return false;
        };
        self.universe
            .verifier_assignable_to(Some(actual), Some(wanted))
    }

    /// Populate an interface fat pointer from an object. Returns false (and
    /// zeroes the destination) when the object's type does not implement the
    /// interface.
    fn dynamic_cast_obj_to_interface(&self, dest: u64, source: u64, handle: u64) -> bool {
        let dest = dest as usize as *mut u64;
        let (Some(actual), Some(iface)) = (self.object_type(source as usize), handle_type(handle))
        else {
            unsafe {
                dest.write(0);
                dest.add(1).write(0);
            }
            return false;
        };
        match self.universe.interface_impl(actual, iface) {
            Some(impl_) => {
                let vtable = self.vtable_addr(actual);
                let slice = vtable
                    + VTABLE_FUNCTIONS_OFFSET
                    + impl_.vtable_offset as usize * POINTER_SIZE;
                unsafe {
                    dest.write(slice as u64);
                    dest.add(1).write(source);
                }
                true
            }
            None => {
                unsafe {
                    dest.write(0);
                    dest.add(1).write(0);
                }
                false
            }
        }
    }

    /// Copy a value type into a heap object, issuing a write barrier for
    /// every managed-pointer slot and plain copies in between.
    fn managed_memcpy(&self, this: u64, handle: u64, offset: i64, from: u64) {
        let Some(ty) = handle_type(handle) else {
            return;
        };
        let size = self.universe.stack_size(ty);
        let offsets = self.universe.managed_pointer_offsets(ty);
        let base = (this as usize + offset as usize) as *mut u8;
        let src = from as usize as *const u8;

        let mut last = 0usize;
        for current in offsets {
            if last != current {
                unsafe {
                    std::ptr::copy_nonoverlapping(src.add(last), base.add(last), current - last)
                };
            }
            // the reference slot goes through the barrier
            let value = unsafe { (src.add(current) as *const u64).read_unaligned() };
            self.gc_update(this, (offset as usize + current) as u64, value);
            last = current + POINTER_SIZE;
        }
        if last != size {
            unsafe { std::ptr::copy_nonoverlapping(src.add(last), base.add(last), size - last) };
        }
    }

    /// Like `managed_memcpy`, but through a byref that may or may not point
    /// into the heap.
    fn managed_ref_memcpy(&self, base: u64, handle: u64, from: u64) {
        let this = self.heap.find_fast(base as usize);
        if this != 0 {
            self.managed_memcpy(this as u64, handle, (base as usize - this) as i64, from);
        } else if let Some(ty) = handle_type(handle) {
            let size = self.universe.stack_size(ty);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    from as usize as *const u8,
                    base as usize as *mut u8,
                    size,
                );
            }
        }
    }

    fn gc_update(&self, obj: u64, offset: u64, value: u64) {
        // write barrier: the bump heap has no remembered set, so this is a
        // plain store
        unsafe { ((obj as usize + offset as usize) as *mut u64).write_unaligned(value) };
    }

    fn gc_update_ref(&self, addr: u64, value: u64) {
        unsafe { (addr as usize as *mut u64).write_unaligned(value) };
    }

    /// Register every runtime helper with the link context. Called once,
    /// before the first assembly is linked.
    pub fn install(self: &Arc<Self>, linker: &GlobalLinker) {
        let rt = self.clone();
        linker.load_host(
            "gc_new",
            Arc::new(move |args: &[Value]| {
                let ptr = rt.gc_new(args[0].as_i64() as u64, args[1].as_i64() as usize);
                vec![Value::I(ptr as i64)]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "gc_update",
            Arc::new(move |args: &[Value]| {
                rt.gc_update(
                    args[0].as_i64() as u64,
                    args[1].as_i64() as u64,
                    args[2].as_i64() as u64,
                );
                vec![]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "gc_update_ref",
            Arc::new(move |args: &[Value]| {
                rt.gc_update_ref(args[0].as_i64() as u64, args[1].as_i64() as u64);
                vec![]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "isinstance",
            Arc::new(move |args: &[Value]| {
                let ok = rt.is_instance(args[0].as_i64() as u64, args[1].as_i64() as u64);
                vec![Value::I(ok as i64)]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "dynamic_cast_obj_to_interface",
            Arc::new(move |args: &[Value]| {
                let ok = rt.dynamic_cast_obj_to_interface(
                    args[0].as_i64() as u64,
                    args[1].as_i64() as u64,
                    args[2].as_i64() as u64,
                );
                vec![Value::I(ok as i64)]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "get_array_type",
            Arc::new(move |args: &[Value]| {
                let handle = args[0].as_i64() as u64;
                let out = match handle_type(handle) {
                    Some(ty) => type_handle(rt.universe.array_type_of(ty)),
                    None => 0,
                };
                vec![Value::I(out as i64)]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "managed_memcpy",
            Arc::new(move |args: &[Value]| {
                rt.managed_memcpy(
                    args[0].as_i64() as u64,
                    args[1].as_i64() as u64,
                    args[2].as_i64(),
                    args[3].as_i64() as u64,
                );
                vec![]
            }),
        );

        let rt = self.clone();
        linker.load_host(
            "managed_ref_memcpy",
            Arc::new(move |args: &[Value]| {
                rt.managed_ref_memcpy(
                    args[0].as_i64() as u64,
                    args[1].as_i64() as u64,
                    args[2].as_i64() as u64,
                );
                vec![]
            }),
        );

        linker.load_host(
            "memcpy",
            Arc::new(|args: &[Value]| {
                unsafe {
                    std::ptr::copy(
                        args[1].as_i64() as usize as *const u8,
                        args[0].as_i64() as usize as *mut u8,
                        args[2].as_i64() as usize,
                    );
                }
                vec![]
            }),
        );

        linker.load_host(
            "memset",
            Arc::new(|args: &[Value]| {
                unsafe {
                    std::ptr::write_bytes(
                        args[0].as_i64() as usize as *mut u8,
                        args[1].as_i64() as u8,
                        args[2].as_i64() as usize,
                    );
                }
                vec![]
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_find_fast_locates_containing_block() {
        let heap = BumpHeap::default();
        let a = heap.alloc(32);
        let b = heap.alloc(16);
        assert_eq!(heap.find_fast(a), a);
        assert_eq!(heap.find_fast(a + 31), a);
        assert_eq!(heap.find_fast(b + 8), b);
        assert_eq!(heap.find_fast(0x10), 0);
    }

    #[test]
    fn type_handles_round_trip() {
        let ty = TypeId(7);
        assert_eq!(handle_type(type_handle(ty)), Some(ty));
        assert_eq!(handle_type(12345), None);
    }
}
