//! Tagged values exchanged with a method.
//!
//! An [`EValue`] is a tag plus an untagged payload. List payloads of ints,
//! tensors and optional tensors use the boxed list indirection: the list keeps
//! pointers to the values it was built from and materializes them into a flat
//! scratch array each time it is read.

use std::ffi::c_char;
use std::ptr;

use serde::{Deserialize, Serialize};

use super::array::{ArrayRef, Span};
use super::pal::et_check;
use super::tensor::{OptionalTensor, Tensor};

/// Discriminant of an [`EValue`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    None = 0,
    Tensor = 1,
    String = 2,
    Double = 3,
    Int = 4,
    Bool = 5,
    ListBool = 6,
    ListDouble = 7,
    ListInt = 8,
    ListTensor = 9,
    ListScalar = 10,
    ListOptionalTensor = 11,
}

/// Element of a boxed list: how one wrapped value turns into its unwrapped form.
pub trait BoxedElement: Copy {
    /// # Safety
    ///
    /// `value` must be null or point to a live [`EValue`].
    unsafe fn unwrap_value(value: *const EValue) -> Self;
}

impl BoxedElement for i64 {
    unsafe fn unwrap_value(value: *const EValue) -> Self {
        et_check!(!value.is_null(), "null element in an int list");
        (*value).to_i64()
    }
}

impl BoxedElement for Tensor {
    unsafe fn unwrap_value(value: *const EValue) -> Self {
        et_check!(!value.is_null(), "null element in a tensor list");
        *(*value).to_tensor()
    }
}

impl BoxedElement for OptionalTensor {
    unsafe fn unwrap_value(value: *const EValue) -> Self {
        match value.as_ref() {
            None => OptionalTensor::none(),
            Some(value) if value.tag == Tag::None => OptionalTensor::none(),
            Some(value) => OptionalTensor::some(*value.to_tensor()),
        }
    }
}

/// List whose elements live in other values.
#[repr(C)]
#[derive(Debug)]
pub struct BoxedEvalueList<T> {
    wrapped_vals: ArrayRef<*const EValue>,
    unwrapped_vals: *mut T,
}

impl<T> Clone for BoxedEvalueList<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for BoxedEvalueList<T> {}

impl<T: BoxedElement> BoxedEvalueList<T> {
    /// Pairs the wrapped values with the scratch array they unwrap into.
    ///
    /// Aborts when the two arrays differ in length.
    ///
    /// # Safety
    ///
    /// Both arrays must outlive the list and every value built from it.
    pub unsafe fn new(wrapped_vals: ArrayRef<*const EValue>, unwrapped_vals: Span<T>) -> Self {
        et_check!(
            wrapped_vals.len == unwrapped_vals.len,
            "boxed list has {} wrapped values but {} unwrapped slots",
            wrapped_vals.len,
            unwrapped_vals.len
        );
        Self {
            wrapped_vals,
            unwrapped_vals: unwrapped_vals.data,
        }
    }

    pub fn len(&self) -> usize {
        self.wrapped_vals.len
    }

    pub fn is_empty(&self) -> bool {
        self.wrapped_vals.len == 0
    }

    pub fn wrapped_vals(&self) -> ArrayRef<*const EValue> {
        self.wrapped_vals
    }

    /// Refreshes the scratch array from the wrapped values and returns it.
    ///
    /// Copies of the list share the scratch array and every call rewrites it,
    /// so the result is only ever handed out as a raw view. No reference into
    /// the scratch array may be held across calls.
    pub fn get(&self) -> ArrayRef<T> {
        unsafe {
            for (i, &value) in self.wrapped_vals.as_slice().iter().enumerate() {
                ptr::write(self.unwrapped_vals.add(i), T::unwrap_value(value));
            }
        }
        ArrayRef {
            data: self.unwrapped_vals,
            len: self.wrapped_vals.len,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
union Payload {
    as_int: i64,
    as_double: f64,
    as_bool: bool,
    as_string: ArrayRef<c_char>,
    as_tensor: Tensor,
    as_bool_list: ArrayRef<bool>,
    as_double_list: ArrayRef<f64>,
    as_int_list: BoxedEvalueList<i64>,
    as_tensor_list: BoxedEvalueList<Tensor>,
    as_optional_tensor_list: BoxedEvalueList<OptionalTensor>,
}

/// A value a method consumes or produces.
///
/// Every payload borrows its storage, so copies are shallow. Moving a value
/// out with [`EValue::take`] leaves `None` behind.
#[repr(C)]
pub struct EValue {
    payload: Payload,
    tag: Tag,
}

impl Clone for EValue {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload,
            tag: self.tag,
        }
    }
}

impl Default for EValue {
    fn default() -> Self {
        Self::none()
    }
}

impl EValue {
    pub fn none() -> Self {
        Self {
            payload: Payload { as_int: 0 },
            tag: Tag::None,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        Self {
            payload: Payload { as_int: value },
            tag: Tag::Int,
        }
    }

    pub fn from_f64(value: f64) -> Self {
        Self {
            payload: Payload { as_double: value },
            tag: Tag::Double,
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            payload: Payload { as_bool: value },
            tag: Tag::Bool,
        }
    }

    pub fn from_string(value: ArrayRef<c_char>) -> Self {
        Self {
            payload: Payload { as_string: value },
            tag: Tag::String,
        }
    }

    pub fn from_tensor(value: Tensor) -> Self {
        Self {
            payload: Payload { as_tensor: value },
            tag: Tag::Tensor,
        }
    }

    pub fn from_bool_list(value: ArrayRef<bool>) -> Self {
        Self {
            payload: Payload {
                as_bool_list: value,
            },
            tag: Tag::ListBool,
        }
    }

    pub fn from_f64_list(value: ArrayRef<f64>) -> Self {
        Self {
            payload: Payload {
                as_double_list: value,
            },
            tag: Tag::ListDouble,
        }
    }

    pub fn from_i64_list(value: BoxedEvalueList<i64>) -> Self {
        Self {
            payload: Payload { as_int_list: value },
            tag: Tag::ListInt,
        }
    }

    pub fn from_tensor_list(value: BoxedEvalueList<Tensor>) -> Self {
        Self {
            payload: Payload {
                as_tensor_list: value,
            },
            tag: Tag::ListTensor,
        }
    }

    pub fn from_optional_tensor_list(value: BoxedEvalueList<OptionalTensor>) -> Self {
        Self {
            payload: Payload {
                as_optional_tensor_list: value,
            },
            tag: Tag::ListOptionalTensor,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_tensor(&self) -> bool {
        self.tag == Tag::Tensor
    }

    /// Moves the value out, leaving `None` in its place.
    pub fn take(&mut self) -> EValue {
        std::mem::take(self)
    }

    fn expect_tag(&self, tag: Tag) {
        et_check!(
            self.tag == tag,
            "EValue holds {:?}, accessed as {:?}",
            self.tag,
            tag
        );
    }

    pub fn to_i64(&self) -> i64 {
        self.expect_tag(Tag::Int);
        unsafe { self.payload.as_int }
    }

    pub fn to_f64(&self) -> f64 {
        self.expect_tag(Tag::Double);
        unsafe { self.payload.as_double }
    }

    pub fn to_bool(&self) -> bool {
        self.expect_tag(Tag::Bool);
        unsafe { self.payload.as_bool }
    }

    pub fn to_string(&self) -> ArrayRef<c_char> {
        self.expect_tag(Tag::String);
        unsafe { self.payload.as_string }
    }

    /// Reference to the tensor stored inline in the payload.
    pub fn to_tensor(&self) -> &Tensor {
        self.expect_tag(Tag::Tensor);
        unsafe { &self.payload.as_tensor }
    }

    /// Tensor payload, or `None` for any other tag.
    pub fn try_to_tensor(&self) -> Option<Tensor> {
        self.is_tensor().then(|| unsafe { self.payload.as_tensor })
    }

    pub fn to_bool_list(&self) -> ArrayRef<bool> {
        self.expect_tag(Tag::ListBool);
        unsafe { self.payload.as_bool_list }
    }

    pub fn to_f64_list(&self) -> ArrayRef<f64> {
        self.expect_tag(Tag::ListDouble);
        unsafe { self.payload.as_double_list }
    }

    pub fn to_i64_list(&self) -> ArrayRef<i64> {
        self.expect_tag(Tag::ListInt);
        unsafe { self.payload.as_int_list }.get()
    }

    pub fn to_tensor_list(&self) -> ArrayRef<Tensor> {
        self.expect_tag(Tag::ListTensor);
        unsafe { self.payload.as_tensor_list }.get()
    }

    pub fn to_optional_tensor_list(&self) -> ArrayRef<OptionalTensor> {
        self.expect_tag(Tag::ListOptionalTensor);
        unsafe { self.payload.as_optional_tensor_list }.get()
    }
}

impl std::fmt::Debug for EValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("EValue");
        s.field("tag", &self.tag);
        match self.tag {
            Tag::Int => s.field("value", &self.to_i64()),
            Tag::Double => s.field("value", &self.to_f64()),
            Tag::Bool => s.field("value", &self.to_bool()),
            Tag::Tensor => s.field("value", self.to_tensor()),
            _ => &mut s,
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(EValue::from_i64(42).to_i64(), 42);
        assert_eq!(EValue::from_f64(-2.25).to_f64(), -2.25);
        assert!(EValue::from_bool(true).to_bool());
        assert_eq!(EValue::none().tag(), Tag::None);
    }

    #[test]
    fn test_take_leaves_none() {
        let mut value = EValue::from_i64(7);
        let moved = value.take();
        assert_eq!(moved.to_i64(), 7);
        assert_eq!(value.tag(), Tag::None);
    }

    #[test]
    fn test_boxed_int_list_reads_through_wrapped_values() {
        let mut items = [EValue::from_i64(1), EValue::from_i64(2)];
        // Every access to the items after this goes through `base`.
        let base = items.as_mut_ptr();
        let wrapped = [base as *const EValue, unsafe { base.add(1) } as *const EValue];
        let mut scratch = [0i64; 2];
        let list = unsafe {
            BoxedEvalueList::new(ArrayRef::from_slice(&wrapped), Span::from_slice(&mut scratch))
        };
        let value = EValue::from_i64_list(list);
        let first: Vec<i64> = unsafe { value.to_i64_list().as_slice() }.to_vec();
        assert_eq!(first, [1, 2]);

        unsafe { *base.add(1) = EValue::from_i64(5) };
        let second: Vec<i64> = unsafe { value.to_i64_list().as_slice() }.to_vec();
        assert_eq!(second, [1, 5]);
    }

    #[test]
    fn test_optional_tensor_list_maps_null_and_none() {
        let none = EValue::none();
        let wrapped = [std::ptr::null(), &none as *const EValue];
        let mut scratch = [OptionalTensor::none(); 2];
        let list = unsafe {
            BoxedEvalueList::new(ArrayRef::from_slice(&wrapped), Span::from_slice(&mut scratch))
        };
        let value = EValue::from_optional_tensor_list(list);
        let items = unsafe { value.to_optional_tensor_list().as_slice() };
        assert!(items.iter().all(|t| t.get().is_none()));
    }
}
