//! Memory handed to a method at load time.
//!
//! A [`MemoryManager`] bundles a method allocator (value table, tensor
//! metadata), optional planned memory (tensor data laid out ahead of time) and
//! an optional temp allocator (kernel scratch space). Nothing is freed
//! individually; memory lives as long as its allocator.

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::error::{check, ErrorCode, ExecutorchError, Result};
use crate::sys;
use crate::util::{boxed, Slot};

/// An allocator a [`MemoryManager`] can draw from.
pub trait AsMemoryAllocator {
    #[doc(hidden)]
    fn memory_allocator_handle(&mut self) -> sys::MemoryAllocatorRefMut;
}

/// Bump allocator over a caller-provided buffer.
pub struct MemoryAllocator<'a> {
    inner: Box<sys::MemoryAllocator>,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> MemoryAllocator<'a> {
    /// Only the first `u32::MAX` bytes of `buffer` are used.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let size = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let base = buffer.as_mut_ptr();
        // SAFETY: the buffer is borrowed for the allocator's lifetime.
        let inner = unsafe { boxed(|out| sys::executorch_MemoryAllocator_new(out, size, base)) };
        Self {
            inner,
            _buffer: PhantomData,
        }
    }

    /// `None` when the buffer is exhausted or `alignment` is not a power of two.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let ptr = unsafe { sys::executorch_MemoryAllocator_allocate(&mut *self.inner, size, alignment) };
        NonNull::new(ptr.cast())
    }
}

impl AsMemoryAllocator for MemoryAllocator<'_> {
    fn memory_allocator_handle(&mut self) -> sys::MemoryAllocatorRefMut {
        unsafe { sys::executorch_MemoryAllocator_as_memory_allocator(&mut *self.inner) }
    }
}

/// Heap-backed allocator without an upper bound. Everything it handed out is
/// freed when it is dropped.
pub struct MallocMemoryAllocator {
    inner: Slot<sys::MallocMemoryAllocator>,
}

impl MallocMemoryAllocator {
    pub fn new() -> Self {
        Self {
            inner: unsafe { Slot::new(|out| sys::executorch_MallocMemoryAllocator_new(out)) },
        }
    }
}

impl Default for MallocMemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AsMemoryAllocator for MallocMemoryAllocator {
    fn memory_allocator_handle(&mut self) -> sys::MemoryAllocatorRefMut {
        unsafe { sys::executorch_MallocMemoryAllocator_as_memory_allocator(self.inner.as_mut_ptr()) }
    }
}

/// Memory-planned buffers, addressed by buffer id and offset.
pub struct HierarchicalAllocator<'a> {
    inner: Slot<sys::HierarchicalAllocator>,
    _buffers: PhantomData<&'a mut [u8]>,
}

impl<'a> HierarchicalAllocator<'a> {
    /// Buffer `i` serves planned buffer id `i`.
    pub fn new(buffers: Vec<&'a mut [u8]>) -> Self {
        let mut spans: Vec<sys::SpanU8> = buffers
            .into_iter()
            .map(|b| sys::SpanU8 {
                data: b.as_mut_ptr(),
                len: b.len(),
            })
            .collect();
        let list = sys::SpanSpanU8 {
            data: spans.as_mut_ptr(),
            len: spans.len(),
        };
        // The allocator copies the list of spans, not the buffers.
        let inner = unsafe { Slot::new(|out| sys::executorch_HierarchicalAllocator_new(out, list)) };
        Self {
            inner,
            _buffers: PhantomData,
        }
    }

    /// Address of `size` bytes at `offset` in buffer `memory_id`.
    pub fn get_offset_address(&self, memory_id: u32, offset: usize, size: usize) -> Result<NonNull<u8>> {
        let mut address = ptr::null_mut();
        check(unsafe {
            sys::executorch_HierarchicalAllocator_get_offset_address(
                self.inner.as_ptr(),
                memory_id,
                offset,
                size,
                &mut address,
            )
        })?;
        NonNull::new(address).ok_or(ExecutorchError::Runtime(ErrorCode::InvalidArgument))
    }
}

/// The allocators one method loads into. Everything stays borrowed for `'a`.
pub struct MemoryManager<'a> {
    inner: Box<sys::MemoryManager>,
    _allocators: PhantomData<&'a mut ()>,
}

impl<'a> MemoryManager<'a> {
    pub fn new(
        method_allocator: &'a mut dyn AsMemoryAllocator,
        planned_memory: Option<&'a mut HierarchicalAllocator<'_>>,
        temp_allocator: Option<&'a mut dyn AsMemoryAllocator>,
    ) -> Self {
        let method_allocator = method_allocator.memory_allocator_handle();
        let planned_memory = planned_memory.map_or(ptr::null_mut(), |p| p.inner.as_mut_ptr());
        let temp_allocator = temp_allocator.map_or(sys::MemoryAllocatorRefMut::null(), |t| t.memory_allocator_handle());
        // SAFETY: the method allocator handle is never null, so construction cannot fail.
        let inner = unsafe {
            boxed(|out| {
                sys::executorch_MemoryManager_new(out, method_allocator, planned_memory, temp_allocator);
            })
        };
        Self {
            inner,
            _allocators: PhantomData,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut sys::MemoryManager {
        &mut *self.inner
    }
}

/// Zeroed heap buffer with a fixed alignment, for planned memory and arenas.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBuffer {
    pub const DEFAULT_ALIGNMENT: usize = 16;

    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, Self::DEFAULT_ALIGNMENT)
    }

    pub fn with_alignment(size: usize, alignment: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), alignment)
            .map_err(|e| ExecutorchError::config(format!("bad buffer layout: {}", e)))?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or(ExecutorchError::Runtime(ErrorCode::MemoryAllocationFailed))?;
        Ok(Self { ptr, len: size, layout })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_exhaustion() {
        let mut buffer = AlignedBuffer::new(32).unwrap();
        let mut allocator = MemoryAllocator::new(buffer.as_mut_slice());
        assert!(allocator.allocate(16, 8).is_some());
        assert!(allocator.allocate(16, 8).is_some());
        assert!(allocator.allocate(1, 1).is_none());
        assert!(allocator.allocate(1, 3).is_none());
    }

    #[test]
    fn test_hierarchical_offsets() {
        let mut a = AlignedBuffer::new(64).unwrap();
        let base = a.as_mut_slice().as_mut_ptr();
        let planned = HierarchicalAllocator::new(vec![a.as_mut_slice()]);
        let address = planned.get_offset_address(0, 16, 48).unwrap();
        assert_eq!(address.as_ptr(), base.wrapping_add(16));
        let err = planned.get_offset_address(0, 16, 49).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    }

    #[test]
    fn test_aligned_buffer() {
        let mut buffer = AlignedBuffer::with_alignment(10, 64).unwrap();
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.as_mut_slice().as_ptr() as usize % 64, 0);
        assert!(buffer.as_mut_slice().iter().all(|&b| b == 0));
    }
}
