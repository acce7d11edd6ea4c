//! Allocators handed to a method at load time.

use std::ffi::c_void;
use std::ptr::NonNull;

use super::array::Span;
use super::pal::{self, et_log};
use super::{Error, Result};

/// Source of method memory. Nothing is returned individually; [`Allocator::reset`]
/// releases every outstanding allocation at once.
pub trait Allocator {
    fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>>;

    fn reset(&mut self);
}

pub const DEFAULT_ALIGNMENT: usize = 16;

/// Typed convenience over [`Allocator::allocate`].
pub fn allocate_array<T>(allocator: &mut dyn Allocator, len: usize) -> Result<NonNull<T>> {
    let size = std::mem::size_of::<T>()
        .checked_mul(len)
        .ok_or(Error::MemoryAllocationFailed)?;
    allocator
        .allocate(size, std::mem::align_of::<T>())
        .map(NonNull::cast)
        .ok_or(Error::MemoryAllocationFailed)
}

/// Bump allocator over a caller-provided buffer.
#[repr(C)]
#[derive(Debug)]
pub struct MemoryAllocator {
    begin: *mut u8,
    end: *mut u8,
    cur: *mut u8,
    /// Most bytes ever in use at once.
    high_water: usize,
    size: u32,
    allocation_count: u32,
}

impl MemoryAllocator {
    /// # Safety
    ///
    /// `base` must be valid for writes of `size` bytes for the allocator's lifetime.
    pub unsafe fn new(size: u32, base: *mut u8) -> Self {
        let size = if base.is_null() { 0 } else { size };
        Self {
            begin: base,
            end: base.wrapping_add(size as usize),
            cur: base,
            high_water: 0,
            size,
            allocation_count: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn used(&self) -> usize {
        self.cur as usize - self.begin as usize
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn allocation_count(&self) -> u32 {
        self.allocation_count
    }
}

impl Allocator for MemoryAllocator {
    fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            et_log!(Error, "alignment {} is not a power of two", alignment);
            return None;
        }
        let start = (self.cur as usize).checked_add(alignment - 1)? & !(alignment - 1);
        let end = start.checked_add(size)?;
        if self.begin.is_null() || end > self.end as usize {
            et_log!(
                Error,
                "memory allocation failed: {}B requested (adjusted for alignment), {}B available",
                end - self.cur as usize,
                self.end as usize - self.cur as usize
            );
            return None;
        }
        let offset = start - self.begin as usize;
        let result = self.begin.wrapping_add(offset);
        self.cur = self.begin.wrapping_add(end - self.begin as usize);
        self.high_water = self.high_water.max(self.used());
        self.allocation_count += 1;
        NonNull::new(result)
    }

    fn reset(&mut self) {
        self.cur = self.begin;
    }
}

/// Heap-backed allocator with no upper bound. Blocks come from the platform
/// `allocate` entry and live until reset or drop.
#[repr(C)]
#[derive(Debug, Default)]
pub struct MallocMemoryAllocator {
    blocks: Vec<*mut c_void>,
}

impl MallocMemoryAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Allocator for MallocMemoryAllocator {
    fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            et_log!(Error, "alignment {} is not a power of two", alignment);
            return None;
        }
        let Some((block, raw)) = pal::allocate_aligned(size, alignment) else {
            et_log!(Error, "could not allocate {} bytes", size);
            return None;
        };
        self.blocks.push(raw);
        Some(block)
    }

    fn reset(&mut self) {
        for raw in self.blocks.drain(..) {
            pal::free(raw);
        }
    }
}

impl Drop for MallocMemoryAllocator {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Set of memory-planned buffers, addressed by buffer id and offset.
#[repr(C)]
#[derive(Debug)]
pub struct HierarchicalAllocator {
    buffers: Box<[Span<u8>]>,
}

impl HierarchicalAllocator {
    /// Copies the buffer list; the buffers themselves stay borrowed.
    pub fn new(buffers: &[Span<u8>]) -> Self {
        Self {
            buffers: buffers.into(),
        }
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Address of `size` bytes at `offset` inside buffer `memory_id`.
    pub fn get_offset_address(&self, memory_id: u32, offset: usize, size: usize) -> Result<*mut u8> {
        let Some(buffer) = self.buffers.get(memory_id as usize) else {
            et_log!(
                Error,
                "id {} >= {} planned buffers",
                memory_id,
                self.buffers.len()
            );
            return Err(Error::InvalidArgument);
        };
        let in_bounds = offset
            .checked_add(size)
            .is_some_and(|end| end <= buffer.len);
        if !in_bounds {
            et_log!(
                Error,
                "offset {} + size {} > size {} of buffer {}",
                offset,
                size,
                buffer.len,
                memory_id
            );
            return Err(Error::InvalidArgument);
        }
        Ok(buffer.data.wrapping_add(offset))
    }
}

/// Allocators a method draws from.
///
/// The method allocator holds the value table and tensor metadata, the planned
/// memory holds tensor data laid out ahead of time, and the optional temp
/// allocator serves kernel scratch space and is reset after every instruction.
#[repr(C)]
#[derive(Debug)]
pub struct MemoryManager {
    method_allocator: NonNull<dyn Allocator>,
    planned_memory: Option<NonNull<HierarchicalAllocator>>,
    temp_allocator: Option<NonNull<dyn Allocator>>,
}

impl MemoryManager {
    pub fn new(
        method_allocator: NonNull<dyn Allocator>,
        planned_memory: Option<NonNull<HierarchicalAllocator>>,
        temp_allocator: Option<NonNull<dyn Allocator>>,
    ) -> Self {
        Self {
            method_allocator,
            planned_memory,
            temp_allocator,
        }
    }

    pub fn method_allocator(&self) -> NonNull<dyn Allocator> {
        self.method_allocator
    }

    pub fn planned_memory(&self) -> Option<NonNull<HierarchicalAllocator>> {
        self.planned_memory
    }

    pub fn temp_allocator(&self) -> Option<NonNull<dyn Allocator>> {
        self.temp_allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_allocation_respects_alignment_and_bounds() {
        let mut buffer = [0u8; 64];
        let mut allocator = unsafe { MemoryAllocator::new(64, buffer.as_mut_ptr()) };

        let a = allocator.allocate(3, 1).unwrap();
        let b = allocator.allocate(8, 8).unwrap();
        assert_eq!(b.as_ptr() as usize % 8, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 3);
        assert_eq!(allocator.allocation_count(), 2);

        assert!(allocator.allocate(128, 1).is_none());
        assert!(allocator.allocate(4, 3).is_none());

        allocator.reset();
        assert_eq!(allocator.used(), 0);
        assert!(allocator.high_water() >= 11);
    }

    #[test]
    fn test_malloc_allocator_frees_on_reset() {
        let mut allocator = MallocMemoryAllocator::new();
        let block = allocator.allocate(100, 64).unwrap();
        assert_eq!(block.as_ptr() as usize % 64, 0);
        assert_eq!(allocator.num_blocks(), 1);
        allocator.reset();
        assert_eq!(allocator.num_blocks(), 0);
    }

    #[test]
    fn test_hierarchical_offsets() {
        let mut first = [0u8; 16];
        let mut second = [0u8; 32];
        let spans = [Span::from_slice(&mut first), Span::from_slice(&mut second)];
        let planned = HierarchicalAllocator::new(&spans);

        let ptr = planned.get_offset_address(1, 8, 24).unwrap();
        assert_eq!(ptr, second.as_mut_ptr().wrapping_add(8));
        assert_eq!(planned.get_offset_address(1, 8, 25), Err(Error::InvalidArgument));
        assert_eq!(planned.get_offset_address(2, 0, 1), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_allocate_array() {
        let mut allocator = MallocMemoryAllocator::new();
        let values = allocate_array::<u64>(&mut allocator, 4).unwrap();
        assert_eq!(values.as_ptr() as usize % 8, 0);
    }
}
