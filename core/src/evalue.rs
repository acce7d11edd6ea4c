//! Tagged values passed to and read back from methods.

use std::ffi::c_char;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;

use crate::sys::{self, Tag};
use crate::tensor::{Tensor, TensorView};
use crate::util::Slot;

/// An owned value. Lists and strings borrow their contents for `'a`.
pub struct EValue<'a> {
    inner: Slot<sys::EValueStorage>,
    _data: PhantomData<&'a ()>,
}

impl<'a> EValue<'a> {
    /// # Safety
    ///
    /// `init` must construct a value whose borrows outlive `'a`.
    unsafe fn build(init: impl FnOnce(sys::EValueRefMut)) -> Self {
        Self {
            inner: Slot::new(|out| init(sys::EValueRefMut::from_ptr(out))),
            _data: PhantomData,
        }
    }

    pub fn none() -> Self {
        unsafe { Self::build(|out| sys::executorch_EValue_new_none(out)) }
    }

    pub fn from_i64(value: i64) -> Self {
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_i64(out, value)) }
    }

    pub fn from_f64(value: f64) -> Self {
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_f64(out, value)) }
    }

    pub fn from_bool(value: bool) -> Self {
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_bool(out, value)) }
    }

    pub fn from_f64_list(values: &'a [f64]) -> Self {
        let list = sys::ArrayRefF64 {
            data: values.as_ptr(),
            len: values.len(),
        };
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_f64_list(out, list)) }
    }

    pub fn from_bool_list(values: &'a [bool]) -> Self {
        let list = sys::ArrayRefBool {
            data: values.as_ptr(),
            len: values.len(),
        };
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_bool_list(out, list)) }
    }

    /// The string is borrowed, not copied.
    pub fn from_string(value: &'a str) -> Self {
        let chars = sys::ArrayRefChar {
            data: value.as_ptr().cast::<c_char>(),
            len: value.len(),
        };
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_string(out, chars)) }
    }

    /// Shares the tensor's data; the handle itself is copied.
    pub fn from_tensor(tensor: &Tensor<'a>) -> Self {
        let handle = tensor.handle();
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_tensor(out, handle)) }
    }

    pub fn from_i64_list(list: &'a BoxedI64List<'a>) -> Self {
        let raw = list.raw;
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_i64_list(out, raw)) }
    }

    pub fn from_tensor_list(list: &'a BoxedTensorList<'a>) -> Self {
        let raw = list.raw;
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_tensor_list(out, raw)) }
    }

    pub fn from_optional_tensor_list(list: &'a BoxedOptionalTensorList<'a>) -> Self {
        let raw = list.raw;
        unsafe { Self::build(|out| sys::executorch_EValue_new_from_optional_tensor_list(out, raw)) }
    }

    /// Moves the value out, leaving `None` behind.
    pub fn take(&mut self) -> Self {
        let src = sys::EValueRefMut::from_ptr(self.inner.as_mut_ptr());
        unsafe { Self::build(|out| sys::executorch_EValue_move(src, out)) }
    }

    pub fn tag(&self) -> Tag {
        self.view().tag()
    }

    pub fn view(&self) -> EValueView<'_> {
        EValueView {
            handle: self.handle(),
            _value: PhantomData,
        }
    }

    pub(crate) fn handle(&self) -> sys::EValueRef {
        sys::EValueRef::from_ref(unsafe { &*self.inner.as_ptr() })
    }
}

impl Clone for EValue<'_> {
    fn clone(&self) -> Self {
        let src = self.handle();
        unsafe { Self::build(|out| sys::executorch_EValue_copy(src, out)) }
    }
}

impl Default for EValue<'_> {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for EValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.view().value().fmt(f)
    }
}

/// A value owned by someone else: a method, an output list, an [`EValue`].
#[derive(Clone, Copy)]
pub struct EValueView<'a> {
    handle: sys::EValueRef,
    _value: PhantomData<&'a ()>,
}

impl<'a> EValueView<'a> {
    /// # Safety
    ///
    /// `handle` must point to a live value that outlives `'a`.
    pub(crate) unsafe fn from_handle(handle: sys::EValueRef) -> Self {
        Self {
            handle,
            _value: PhantomData,
        }
    }

    pub fn tag(&self) -> Tag {
        unsafe { sys::executorch_EValue_tag(self.handle) }
    }

    /// The payload, dispatched on the tag.
    pub fn value(&self) -> Value<'a> {
        let handle = self.handle;
        unsafe {
            match self.tag() {
                Tag::None => Value::None,
                Tag::Int => Value::Int(sys::executorch_EValue_as_i64(handle)),
                Tag::Double => Value::Double(sys::executorch_EValue_as_f64(handle)),
                Tag::Bool => Value::Bool(sys::executorch_EValue_as_bool(handle)),
                Tag::String => {
                    let chars = sys::executorch_EValue_as_string(handle).as_slice();
                    Value::String(std::slice::from_raw_parts(chars.as_ptr().cast::<u8>(), chars.len()))
                }
                Tag::Tensor => Value::Tensor(TensorView::from_handle(sys::executorch_EValue_as_tensor(handle))),
                Tag::ListInt => Value::ListInt(sys::executorch_EValue_as_i64_list(handle).as_slice().to_vec()),
                Tag::ListDouble => Value::ListDouble(sys::executorch_EValue_as_f64_list(handle).as_slice()),
                Tag::ListBool => Value::ListBool(sys::executorch_EValue_as_bool_list(handle).as_slice()),
                // Elements are addressed through the raw view: the next read of
                // the list rewrites its scratch array.
                Tag::ListTensor => {
                    let list = sys::executorch_EValue_as_tensor_list(handle);
                    Value::ListTensor(
                        (0..list.len)
                            .map(|i| TensorView::from_handle(sys::TensorRef { ptr: list.data.add(i).cast() }))
                            .collect(),
                    )
                }
                Tag::ListOptionalTensor => {
                    let list = sys::executorch_EValue_as_optional_tensor_list(handle);
                    Value::ListOptionalTensor(
                        (0..list.len)
                            .map(|i| {
                                let item = sys::OptionalTensorRef { ptr: list.data.add(i).cast() };
                                let tensor = sys::executorch_OptionalTensor_get(item);
                                (!tensor.is_null()).then(|| TensorView::from_handle(tensor))
                            })
                            .collect(),
                    )
                }
                Tag::ListScalar => Value::ListScalar,
            }
        }
    }

    /// The integer, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value() {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    /// The tensor, if this is a `Tensor`.
    pub fn as_tensor(&self) -> Option<TensorView<'a>> {
        match self.value() {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Debug for EValueView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// Payload of a value.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    None,
    Tensor(TensorView<'a>),
    /// Raw bytes; not necessarily UTF-8.
    String(&'a [u8]),
    Double(f64),
    Int(i64),
    Bool(bool),
    ListBool(&'a [bool]),
    ListDouble(&'a [f64]),
    /// Copied out, since each read refreshes the list from its elements.
    ListInt(Vec<i64>),
    ListTensor(Vec<TensorView<'a>>),
    /// Only the tag is readable.
    ListScalar,
    ListOptionalTensor(Vec<Option<TensorView<'a>>>),
}

macro_rules! boxed_lists {
    ($($(#[$doc:meta])* $name:ident($raw:ident, $span:ident) => $elem:ty;)*) => {
        $(
            $(#[$doc])*
            pub struct $name<'a> {
                raw: sys::$raw,
                _wrapped: Vec<sys::EValueRef>,
                _unwrapped: Vec<MaybeUninit<$elem>>,
                _values: PhantomData<&'a EValue<'a>>,
            }

            impl<'a> $name<'a> {
                fn from_handles(wrapped: Vec<sys::EValueRef>) -> Self {
                    let mut unwrapped = Vec::with_capacity(wrapped.len());
                    unwrapped.resize_with(wrapped.len(), MaybeUninit::uninit);
                    let raw = sys::$raw {
                        wrapped_vals: sys::ArrayRefEValuePtr {
                            data: wrapped.as_ptr(),
                            len: wrapped.len(),
                        },
                        unwrapped_vals: sys::$span {
                            data: unwrapped.as_mut_ptr().cast(),
                            len: unwrapped.len(),
                        },
                    };
                    Self {
                        raw,
                        _wrapped: wrapped,
                        _unwrapped: unwrapped,
                        _values: PhantomData,
                    }
                }

                pub fn len(&self) -> usize {
                    self.raw.wrapped_vals.len
                }

                pub fn is_empty(&self) -> bool {
                    self.len() == 0
                }
            }
        )*
    };
}

boxed_lists! {
    /// Int list over values that may change between executions.
    BoxedI64List(BoxedEvalueListI64, SpanI64) => i64;
    /// Tensor list over tensor values.
    BoxedTensorList(BoxedEvalueListTensor, SpanTensor) => sys::TensorStorage;
    /// Tensor list with holes.
    BoxedOptionalTensorList(BoxedEvalueListOptionalTensor, SpanOptionalTensor) => sys::OptionalTensorStorage;
}

impl<'a> BoxedI64List<'a> {
    /// Each value must hold an `Int` whenever the list is read.
    pub fn new(values: &[&'a EValue<'a>]) -> Self {
        Self::from_handles(values.iter().map(|v| v.handle()).collect())
    }
}

impl<'a> BoxedTensorList<'a> {
    /// Each value must hold a `Tensor` whenever the list is read.
    pub fn new(values: &[&'a EValue<'a>]) -> Self {
        Self::from_handles(values.iter().map(|v| v.handle()).collect())
    }
}

impl<'a> BoxedOptionalTensorList<'a> {
    /// `None` entries and `None` values both read as absent.
    pub fn new(values: &[Option<&'a EValue<'a>>]) -> Self {
        Self::from_handles(
            values
                .iter()
                .map(|v| v.map_or(sys::EValueRef::null(), |v| v.handle()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorImpl;

    #[test]
    fn test_scalars() {
        assert!(matches!(EValue::none().view().value(), Value::None));
        assert_eq!(EValue::from_i64(-7).view().as_i64(), Some(-7));
        assert!(matches!(EValue::from_f64(2.5).view().value(), Value::Double(v) if (v - 2.5).abs() < f64::EPSILON));
        assert!(matches!(EValue::from_bool(true).view().value(), Value::Bool(true)));
        assert_eq!(EValue::from_bool(true).view().as_i64(), None);
    }

    #[test]
    fn test_borrowed_payloads() {
        let doubles = [1.0, 2.0];
        let flags = [true, false, true];
        match EValue::from_f64_list(&doubles).view().value() {
            Value::ListDouble(values) => assert_eq!(values, &doubles),
            other => panic!("unexpected {:?}", other),
        }
        match EValue::from_bool_list(&flags).view().value() {
            Value::ListBool(values) => assert_eq!(values, &flags),
            other => panic!("unexpected {:?}", other),
        }
        match EValue::from_string("relu").view().value() {
            Value::String(bytes) => assert_eq!(bytes, b"relu"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_int_list_follows_values() {
        let a = EValue::from_i64(1);
        let b = EValue::from_i64(2);
        let list = BoxedI64List::new(&[&a, &b]);
        let value = EValue::from_i64_list(&list);
        match value.view().value() {
            Value::ListInt(ints) => assert_eq!(ints, &[1, 2]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_clone_and_take() {
        let mut data = [1f32, 2.0];
        let mut tensor_impl = TensorImpl::from_slice(&[2], &mut data).unwrap();
        let tensor = Tensor::new(&mut tensor_impl);
        let mut value = EValue::from_tensor(&tensor);
        let copy = value.clone();
        let moved = value.take();
        assert_eq!(value.tag(), Tag::None);
        assert_eq!(copy.tag(), Tag::Tensor);
        let view = moved.view().as_tensor().unwrap();
        assert_eq!(view.as_slice::<f32>().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_optional_tensor_list() {
        let mut data = [3i64];
        let mut tensor_impl = TensorImpl::from_slice(&[1], &mut data).unwrap();
        let tensor = Tensor::new(&mut tensor_impl);
        let present = EValue::from_tensor(&tensor);
        let absent = EValue::none();
        let list = BoxedOptionalTensorList::new(&[Some(&present), None, Some(&absent)]);
        let value = EValue::from_optional_tensor_list(&list);
        match value.view().value() {
            Value::ListOptionalTensor(tensors) => {
                assert_eq!(tensors.len(), 3);
                assert_eq!(tensors[0].unwrap().as_slice::<i64>().unwrap(), &[3]);
                assert!(tensors[1].is_none());
                assert!(tensors[2].is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
