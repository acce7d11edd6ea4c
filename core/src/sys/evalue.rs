use std::mem::MaybeUninit;

use crate::runtime::evalue::{self as rt, BoxedEvalueList, Tag};
use crate::runtime::tensor::{OptionalTensor, Tensor};

use super::array::{
    ArrayRefBool, ArrayRefChar, ArrayRefEValuePtr, ArrayRefF64, ArrayRefI64, ArrayRefOptionalTensor,
    ArrayRefTensor, SpanI64, SpanOptionalTensor, SpanTensor,
};
use super::handles::{EValueRef, EValueRefMut, TensorRef};
use super::layout::{destroy, place, shadow};

/// Storage for a tagged value.
#[repr(C)]
pub struct EValueStorage {
    _blob: [MaybeUninit<usize>; 4],
}

shadow! {
    EValueStorage => rt::EValue,
}

macro_rules! boxed_lists {
    ($($(#[$doc:meta])* $name:ident($span:ty) => $elem:ty;)*) => {
        $(
            $(#[$doc])*
            ///
            /// Both arrays must have the same length and outlive every value
            /// built from the list.
            #[repr(C)]
            #[derive(Debug, Clone, Copy)]
            pub struct $name {
                pub wrapped_vals: ArrayRefEValuePtr,
                pub unwrapped_vals: $span,
            }

            impl $name {
                /// Aborts when the two arrays differ in length.
                unsafe fn into_runtime(self) -> BoxedEvalueList<$elem> {
                    BoxedEvalueList::new(self.wrapped_vals.into(), self.unwrapped_vals.into())
                }
            }
        )*
    };
}

boxed_lists! {
    /// Int list: pointers to `Int` values plus scratch space for the integers.
    BoxedEvalueListI64(SpanI64) => i64;
    /// Tensor list: pointers to `Tensor` values plus scratch space for the tensors.
    BoxedEvalueListTensor(SpanTensor) => Tensor;
    /// Optional tensor list; null pointers and `None` values read as absent.
    BoxedEvalueListOptionalTensor(SpanOptionalTensor) => OptionalTensor;
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_none(this: EValueRefMut) {
    place(this.storage(), rt::EValue::none());
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_i64(this: EValueRefMut, value: i64) {
    place(this.storage(), rt::EValue::from_i64(value));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_i64_list(this: EValueRefMut, value: BoxedEvalueListI64) {
    place(this.storage(), rt::EValue::from_i64_list(value.into_runtime()));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_f64(this: EValueRefMut, value: f64) {
    place(this.storage(), rt::EValue::from_f64(value));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_f64_list(this: EValueRefMut, value: ArrayRefF64) {
    place(this.storage(), rt::EValue::from_f64_list(value.into()));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_bool(this: EValueRefMut, value: bool) {
    place(this.storage(), rt::EValue::from_bool(value));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_bool_list(this: EValueRefMut, value: ArrayRefBool) {
    place(this.storage(), rt::EValue::from_bool_list(value.into()));
}

/// The characters are borrowed, not copied.
#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_string(this: EValueRefMut, value: ArrayRefChar) {
    place(this.storage(), rt::EValue::from_string(value.into()));
}

/// Copies the tensor handle; the tensor's storage stays shared.
#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_tensor(this: EValueRefMut, value: TensorRef) {
    place(this.storage(), rt::EValue::from_tensor(*value.get()));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_tensor_list(this: EValueRefMut, value: BoxedEvalueListTensor) {
    place(this.storage(), rt::EValue::from_tensor_list(value.into_runtime()));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_new_from_optional_tensor_list(
    this: EValueRefMut,
    value: BoxedEvalueListOptionalTensor,
) {
    place(this.storage(), rt::EValue::from_optional_tensor_list(value.into_runtime()));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_tag(this: EValueRef) -> Tag {
    this.get().tag()
}

// The accessors below abort when the tag does not match.

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_i64(this: EValueRef) -> i64 {
    this.get().to_i64()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_i64_list(this: EValueRef) -> ArrayRefI64 {
    this.get().to_i64_list().into()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_f64(this: EValueRef) -> f64 {
    this.get().to_f64()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_f64_list(this: EValueRef) -> ArrayRefF64 {
    this.get().to_f64_list().into()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_bool(this: EValueRef) -> bool {
    this.get().to_bool()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_bool_list(this: EValueRef) -> ArrayRefBool {
    this.get().to_bool_list().into()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_string(this: EValueRef) -> ArrayRefChar {
    this.get().to_string().into()
}

/// Handle to the tensor stored inside the value; valid while the value is.
#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_tensor(this: EValueRef) -> TensorRef {
    TensorRef::from_target(this.get().to_tensor())
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_tensor_list(this: EValueRef) -> ArrayRefTensor {
    this.get().to_tensor_list().into()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_as_optional_tensor_list(this: EValueRef) -> ArrayRefOptionalTensor {
    this.get().to_optional_tensor_list().into()
}

/// Constructs `dst` as a copy of `src`. Payloads are borrowed, so the copy is shallow.
#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_copy(src: EValueRef, dst: EValueRefMut) {
    place(dst.storage(), src.get().clone());
}

/// Constructs `dst` from `src`, leaving `None` in `src`.
#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_move(src: EValueRefMut, dst: EValueRefMut) {
    place(dst.storage(), src.get().take());
}

#[no_mangle]
pub unsafe extern "C" fn executorch_EValue_destructor(this: EValueRefMut) {
    destroy(this.storage());
}
