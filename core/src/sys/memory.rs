use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use crate::runtime::array::Span;
use crate::runtime::memory::{self as rt, Allocator};

use super::array::SpanSpanU8;
use super::error::{write_value, Error};
use super::handles::{MemoryAllocatorKind, MemoryAllocatorRefMut};
use super::layout::{cast, cast_mut, destroy, place, shadow};

/// Storage for a bump allocator over caller memory. Trivially destructible.
#[repr(C)]
pub struct MemoryAllocator {
    _blob_1: [MaybeUninit<usize>; 4],
    _blob_2: [MaybeUninit<u32>; 2],
}

/// Storage for a heap-backed allocator.
#[repr(C)]
pub struct MallocMemoryAllocator {
    _blob: [MaybeUninit<usize>; 3],
}

/// Storage for the planned-memory allocator.
#[repr(C)]
pub struct HierarchicalAllocator {
    _blob: [MaybeUninit<usize>; 2],
}

/// Storage for the allocator bundle handed to `load_method`. Trivially destructible.
#[repr(C)]
pub struct MemoryManager {
    _blob: [MaybeUninit<usize>; 5],
}

shadow! {
    MemoryAllocator => rt::MemoryAllocator,
    MallocMemoryAllocator => rt::MallocMemoryAllocator,
    HierarchicalAllocator => rt::HierarchicalAllocator,
    MemoryManager => rt::MemoryManager,
}

/// Places an allocator over `size` bytes at `base`. The bytes stay owned by the caller.
#[no_mangle]
pub unsafe extern "C" fn executorch_MemoryAllocator_new(out: *mut MemoryAllocator, size: u32, base: *mut u8) {
    place(out, rt::MemoryAllocator::new(size, base));
}

/// Returns null when the arena is exhausted or `alignment` is not a power of two.
#[no_mangle]
pub unsafe extern "C" fn executorch_MemoryAllocator_allocate(
    this: *mut MemoryAllocator,
    size: usize,
    alignment: usize,
) -> *mut c_void {
    cast_mut(this)
        .allocate(size, alignment)
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MemoryAllocator_as_memory_allocator(
    this: *mut MemoryAllocator,
) -> MemoryAllocatorRefMut {
    MemoryAllocatorRefMut {
        ptr: this.cast(),
        kind: MemoryAllocatorKind::Arena as u32,
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MallocMemoryAllocator_new(out: *mut MallocMemoryAllocator) {
    place(out, rt::MallocMemoryAllocator::new());
}

/// Frees every block handed out by the allocator.
#[no_mangle]
pub unsafe extern "C" fn executorch_MallocMemoryAllocator_destructor(this: *mut MallocMemoryAllocator) {
    destroy(this);
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MallocMemoryAllocator_as_memory_allocator(
    this: *mut MallocMemoryAllocator,
) -> MemoryAllocatorRefMut {
    MemoryAllocatorRefMut {
        ptr: this.cast(),
        kind: MemoryAllocatorKind::Malloc as u32,
    }
}

/// The list of buffers is copied; the buffers are borrowed.
#[no_mangle]
pub unsafe extern "C" fn executorch_HierarchicalAllocator_new(out: *mut HierarchicalAllocator, buffers: SpanSpanU8) {
    let buffers: Vec<Span<u8>> = buffers.as_slice().iter().map(|&b| b.into()).collect();
    place(out, rt::HierarchicalAllocator::new(&buffers));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_HierarchicalAllocator_destructor(this: *mut HierarchicalAllocator) {
    destroy(this);
}

#[no_mangle]
pub unsafe extern "C" fn executorch_HierarchicalAllocator_get_offset_address(
    this: *const HierarchicalAllocator,
    memory_id: u32,
    offset: usize,
    size: usize,
    out: *mut *mut u8,
) -> Error {
    write_value(out, cast(this).get_offset_address(memory_id, offset, size))
}

/// Bundles the allocators a method loads into. Nothing is copied; every
/// allocator must outlive the manager and any method loaded with it.
///
/// `planned_memory` and `temp_allocator` may be null. A null method allocator
/// is an invalid argument.
#[no_mangle]
pub unsafe extern "C" fn executorch_MemoryManager_new(
    out: *mut MemoryManager,
    method_allocator: MemoryAllocatorRefMut,
    planned_memory: *mut HierarchicalAllocator,
    temp_allocator: MemoryAllocatorRefMut,
) -> Error {
    let Ok(Some(method_allocator)) = method_allocator.resolve() else {
        return Error::InvalidArgument;
    };
    let temp_allocator = match temp_allocator.resolve() {
        Ok(temp_allocator) => temp_allocator,
        Err(e) => return e.into(),
    };
    let planned_memory = NonNull::new(planned_memory.cast::<rt::HierarchicalAllocator>());
    place(out, rt::MemoryManager::new(method_allocator, planned_memory, temp_allocator));
    Error::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::array::SpanU8;

    #[test]
    fn test_arena_allocate_until_exhausted() {
        let mut buffer = [0u8; 64];
        let mut slot = MaybeUninit::<MemoryAllocator>::uninit();
        unsafe {
            executorch_MemoryAllocator_new(slot.as_mut_ptr(), buffer.len() as u32, buffer.as_mut_ptr());
            let first = executorch_MemoryAllocator_allocate(slot.as_mut_ptr(), 40, 8);
            assert!(!first.is_null());
            let second = executorch_MemoryAllocator_allocate(slot.as_mut_ptr(), 40, 8);
            assert!(second.is_null());
        }
    }

    #[test]
    fn test_offset_address_bounds() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 8];
        let mut spans = [
            SpanU8 {
                data: a.as_mut_ptr(),
                len: a.len(),
            },
            SpanU8 {
                data: b.as_mut_ptr(),
                len: b.len(),
            },
        ];
        let mut slot = MaybeUninit::<HierarchicalAllocator>::uninit();
        let mut address = ptr::null_mut();
        unsafe {
            executorch_HierarchicalAllocator_new(
                slot.as_mut_ptr(),
                SpanSpanU8 {
                    data: spans.as_mut_ptr(),
                    len: spans.len(),
                },
            );
            let status = executorch_HierarchicalAllocator_get_offset_address(slot.as_ptr(), 1, 4, 4, &mut address);
            assert_eq!(status, Error::Ok);
            assert_eq!(address, b.as_mut_ptr().add(4));
            let status = executorch_HierarchicalAllocator_get_offset_address(slot.as_ptr(), 1, 4, 5, &mut address);
            assert_eq!(status, Error::InvalidArgument);
            let status = executorch_HierarchicalAllocator_get_offset_address(slot.as_ptr(), 2, 0, 0, &mut address);
            assert_eq!(status, Error::InvalidArgument);
            executorch_HierarchicalAllocator_destructor(slot.as_mut_ptr());
        }
    }

    #[test]
    fn test_memory_manager_requires_method_allocator() {
        let mut slot = MaybeUninit::<MemoryManager>::uninit();
        let status = unsafe {
            executorch_MemoryManager_new(
                slot.as_mut_ptr(),
                MemoryAllocatorRefMut::null(),
                ptr::null_mut(),
                MemoryAllocatorRefMut::null(),
            )
        };
        assert_eq!(status, Error::InvalidArgument);
    }
}
