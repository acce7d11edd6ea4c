//! Borrowed contiguous views used throughout the runtime.

use std::ptr::NonNull;
use std::slice;

/// Read-only (pointer, length) view over memory owned by someone else.
#[repr(C)]
#[derive(Debug)]
pub struct ArrayRef<T> {
    pub data: *const T,
    pub len: usize,
}

impl<T> Clone for ArrayRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ArrayRef<T> {}

impl<T> ArrayRef<T> {
    pub fn empty() -> Self {
        Self {
            data: NonNull::dangling().as_ptr(),
            len: 0,
        }
    }

    pub fn from_slice(values: &[T]) -> Self {
        Self {
            data: values.as_ptr(),
            len: values.len(),
        }
    }

    /// # Safety
    ///
    /// `data` must point to `len` initialized elements that outlive `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        raw_slice(self.data, self.len)
    }
}

/// Mutable (pointer, length) view over memory owned by someone else.
#[repr(C)]
#[derive(Debug)]
pub struct Span<T> {
    pub data: *mut T,
    pub len: usize,
}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Span<T> {}

impl<T> Span<T> {
    pub fn from_slice(values: &mut [T]) -> Self {
        Self {
            data: values.as_mut_ptr(),
            len: values.len(),
        }
    }
}

/// Builds a slice from a raw pair, tolerating a null or dangling pointer when
/// `len` is zero.
///
/// # Safety
///
/// When `len > 0`, `data` must point to `len` initialized elements valid for `'a`.
pub unsafe fn raw_slice<'a, T>(data: *const T, len: usize) -> &'a [T] {
    if len == 0 || data.is_null() {
        &[]
    } else {
        slice::from_raw_parts(data, len)
    }
}
