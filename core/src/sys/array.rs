//! Named array views and host-owned vectors.
//!
//! The C ABI has no generics, so every element type gets its own view. Views
//! borrow; `Vec*` types own their buffer and come with a destructor.

use std::ffi::c_char;
use std::mem::ManuallyDrop;

use crate::runtime::array::{ArrayRef, Span};
use crate::runtime::evalue::EValue;

use super::evalue::EValueStorage;
use super::handles::EValueRef;
use super::layout::shadow;
use super::tensor::{OptionalTensorStorage, TensorStorage};

macro_rules! array_views {
    ($($(#[$doc:meta])* $name:ident($kind:ident) => $elem:ty;)*) => {
        $(
            $(#[$doc])*
            #[repr(C)]
            #[derive(Debug, Clone, Copy)]
            pub struct $name {
                pub data: array_views!(@ptr $kind $elem),
                pub len: usize,
            }

            impl $name {
                /// # Safety
                ///
                /// The view must point to `len` live elements that outlive `'a`.
                pub unsafe fn as_slice<'a>(&self) -> &'a [$elem] {
                    crate::runtime::array::raw_slice(self.data, self.len)
                }
            }
        )*
    };
    (@ptr view $elem:ty) => { *const $elem };
    (@ptr span $elem:ty) => { *mut $elem };
}

array_views! {
    /// Characters of a string, not NUL terminated.
    ArrayRefChar(view) => c_char;
    ArrayRefBool(view) => bool;
    ArrayRefU8(view) => u8;
    ArrayRefI32(view) => i32;
    ArrayRefI64(view) => i64;
    ArrayRefF64(view) => f64;
    ArrayRefUsize(view) => usize;
    ArrayRefTensor(view) => TensorStorage;
    ArrayRefOptionalTensor(view) => OptionalTensorStorage;
    /// Pointers to values, as consumed by boxed lists and `Module_execute`.
    ArrayRefEValuePtr(view) => EValueRef;
    SpanU8(span) => u8;
    SpanI64(span) => i64;
    SpanTensor(span) => TensorStorage;
    SpanOptionalTensor(span) => OptionalTensorStorage;
    /// Buffers of a hierarchical allocator.
    SpanSpanU8(span) => SpanU8;
}

shadow! {
    ArrayRefChar => ArrayRef<c_char>,
    ArrayRefBool => ArrayRef<bool>,
    ArrayRefU8 => ArrayRef<u8>,
    ArrayRefI32 => ArrayRef<i32>,
    ArrayRefI64 => ArrayRef<i64>,
    ArrayRefF64 => ArrayRef<f64>,
    ArrayRefEValuePtr => ArrayRef<*const EValue>,
    SpanU8 => Span<u8>,
}

macro_rules! convert {
    ($($name:ident <=> $runtime:ty;)*) => {
        $(
            impl From<$runtime> for $name {
                fn from(value: $runtime) -> Self {
                    Self { data: value.data.cast(), len: value.len }
                }
            }

            impl From<$name> for $runtime {
                fn from(value: $name) -> Self {
                    Self { data: value.data.cast(), len: value.len }
                }
            }
        )*
    };
}

convert! {
    ArrayRefChar <=> ArrayRef<c_char>;
    ArrayRefBool <=> ArrayRef<bool>;
    ArrayRefU8 <=> ArrayRef<u8>;
    ArrayRefI32 <=> ArrayRef<i32>;
    ArrayRefI64 <=> ArrayRef<i64>;
    ArrayRefF64 <=> ArrayRef<f64>;
    ArrayRefTensor <=> ArrayRef<crate::runtime::tensor::Tensor>;
    ArrayRefOptionalTensor <=> ArrayRef<crate::runtime::tensor::OptionalTensor>;
    ArrayRefEValuePtr <=> ArrayRef<*const EValue>;
    SpanU8 <=> Span<u8>;
    SpanI64 <=> Span<i64>;
    SpanTensor <=> Span<crate::runtime::tensor::Tensor>;
    SpanOptionalTensor <=> Span<crate::runtime::tensor::OptionalTensor>;
}

macro_rules! host_vecs {
    ($($(#[$doc:meta])* $name:ident => $elem:ty;)*) => {
        $(
            $(#[$doc])*
            #[repr(C)]
            #[derive(Debug)]
            pub struct $name {
                pub data: *mut $elem,
                pub len: usize,
                pub cap: usize,
            }

            impl $name {
                pub(crate) fn from_vec(vec: Vec<$elem>) -> Self {
                    let mut vec = ManuallyDrop::new(vec);
                    Self {
                        data: vec.as_mut_ptr(),
                        len: vec.len(),
                        cap: vec.capacity(),
                    }
                }

                /// # Safety
                ///
                /// `self` must come from [`Self::from_vec`] and not have been released.
                unsafe fn into_vec(&mut self) -> Vec<$elem> {
                    let vec = Vec::from_raw_parts(self.data, self.len, self.cap);
                    self.data = std::ptr::NonNull::dangling().as_ptr();
                    self.len = 0;
                    self.cap = 0;
                    vec
                }

                /// # Safety
                ///
                /// The vector must be live.
                pub unsafe fn as_slice<'a>(&self) -> &'a [$elem] {
                    crate::runtime::array::raw_slice(self.data, self.len)
                }
            }
        )*
    };
}

host_vecs! {
    /// Characters of a string, not NUL terminated.
    VecChar => c_char;
    VecVecChar => VecChar;
}

/// Values moved out of the runtime, released by `executorch_VecEValue_destructor`.
#[repr(C)]
#[derive(Debug)]
pub struct VecEValue {
    pub data: *mut EValueStorage,
    pub len: usize,
    pub cap: usize,
}

impl VecChar {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.iter().map(|&b| b as c_char).collect())
    }
}

impl VecEValue {
    pub(crate) fn from_values(values: Vec<EValue>) -> Self {
        let mut values = ManuallyDrop::new(values);
        Self {
            data: values.as_mut_ptr().cast(),
            len: values.len(),
            cap: values.capacity(),
        }
    }

    /// # Safety
    ///
    /// The vector must be live.
    pub unsafe fn as_slice<'a>(&self) -> &'a [EValueStorage] {
        crate::runtime::array::raw_slice(self.data, self.len)
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_VecChar_destructor(vec: *mut VecChar) {
    drop((*vec).into_vec());
}

#[no_mangle]
pub unsafe extern "C" fn executorch_VecVecChar_destructor(vec: *mut VecVecChar) {
    for mut inner in (*vec).into_vec() {
        executorch_VecChar_destructor(&mut inner);
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_VecEValue_destructor(vec: *mut VecEValue) {
    let vec = &mut *vec;
    let values = Vec::from_raw_parts(vec.data.cast::<EValue>(), vec.len, vec.cap);
    vec.data = std::ptr::NonNull::dangling().as_ptr();
    vec.len = 0;
    vec.cap = 0;
    drop(values);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_vec_char_round_trip() {
        let mut names = VecVecChar::from_vec(vec![VecChar::from_bytes(b"forward"), VecChar::from_bytes(b"")]);
        let slices = unsafe { names.as_slice() };
        assert_eq!(slices.len(), 2);
        let first: Vec<u8> = unsafe { slices[0].as_slice() }.iter().map(|&c| c as u8).collect();
        assert_eq!(first, b"forward");
        unsafe { executorch_VecVecChar_destructor(&mut names) };
        assert_eq!(names.len, 0);
    }

    #[test]
    fn test_views_convert_both_ways() {
        let values = [1.5f64, -2.25];
        let view: ArrayRefF64 = ArrayRef::from_slice(&values).into();
        assert_eq!(unsafe { view.as_slice() }, &values);
        let back: ArrayRef<f64> = view.into();
        assert_eq!(back.len, 2);
    }
}
