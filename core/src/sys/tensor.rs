use std::ffi::c_void;
use std::mem::MaybeUninit;

use crate::runtime::dim_order;
use crate::runtime::tensor as rt;
use crate::runtime::tensor::{ScalarType, TensorShapeDynamism};

use super::array::{ArrayRefI32, ArrayRefU8, ArrayRefUsize};
use super::error::{status, Error};
use super::handles::{OptionalTensorRef, TensorRef, TensorRefMut};
use super::layout::{destroy, place, raw_enum, shadow};

/// Storage for a tensor handle.
#[repr(C)]
pub struct TensorStorage {
    _blob: [MaybeUninit<usize>; 1],
}

/// Storage for a tensor shape and layout description.
#[repr(C)]
pub struct TensorImpl {
    _blob: [MaybeUninit<usize>; 8],
}

/// Storage for an optional tensor: a one byte flag, then the tensor.
#[repr(C)]
pub struct OptionalTensorStorage {
    _blob_1: [MaybeUninit<u8>; 1],
    _blob_2: [MaybeUninit<usize>; 1],
}

shadow! {
    TensorStorage => rt::Tensor,
    TensorImpl => rt::TensorImpl,
    OptionalTensorStorage => rt::OptionalTensor,
}

/// Describes a tensor over borrowed arrays. Nothing is copied.
///
/// `scalar_type` and `dynamism` carry [`ScalarType`] and
/// [`TensorShapeDynamism`] discriminants; anything else leaves `out` untouched
/// and is an invalid argument.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn executorch_TensorImpl_new(
    out: *mut TensorImpl,
    scalar_type: u32,
    dim: usize,
    sizes: *mut i32,
    data: *mut c_void,
    dim_order: *mut u8,
    strides: *mut i32,
    dynamism: u32,
) -> Error {
    let (scalar_type, dynamism) = match (ScalarType::try_from(scalar_type), TensorShapeDynamism::try_from(dynamism)) {
        (Ok(scalar_type), Ok(dynamism)) => (scalar_type, dynamism),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    let tensor_impl = rt::TensorImpl::new(scalar_type, dim, sizes, data, dim_order, strides, dynamism);
    place(out, tensor_impl);
    Error::Ok
}

raw_enum! {
    ScalarType {
        Byte, Char, Short, Int, Long, Half, Float, Double, ComplexHalf, ComplexFloat,
        ComplexDouble, Bool, QInt8, QUInt8, QInt32, BFloat16, QUInt4x2, QUInt2x4, Bits1x8,
        Bits2x4, Bits4x2, Bits8, Bits16, Float8E5m2, Float8E4m3fn, Float8E5m2fnuz,
        Float8E4m3fnuz, UInt16, UInt32, UInt64,
    }
    TensorShapeDynamism { Static, DynamicBound, DynamicUnbound }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_TensorImpl_destructor(this: *mut TensorImpl) {
    destroy(this);
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_new(out: TensorRefMut, tensor_impl: *mut TensorImpl) {
    place(out.storage(), rt::Tensor::new(tensor_impl.cast()));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_destructor(this: TensorRefMut) {
    destroy(this.storage());
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_nbytes(this: TensorRef) -> usize {
    this.get().nbytes()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_size(this: TensorRef, dim: usize) -> usize {
    this.get().size(dim)
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_dim(this: TensorRef) -> usize {
    this.get().dim()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_numel(this: TensorRef) -> usize {
    this.get().numel()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_scalar_type(this: TensorRef) -> ScalarType {
    this.get().scalar_type()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_element_size(this: TensorRef) -> usize {
    this.get().element_size()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_sizes(this: TensorRef) -> ArrayRefI32 {
    let sizes = this.get().sizes();
    ArrayRefI32 {
        data: sizes.as_ptr(),
        len: sizes.len(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_dim_order(this: TensorRef) -> ArrayRefU8 {
    let dim_order = this.get().dim_order();
    ArrayRefU8 {
        data: dim_order.as_ptr(),
        len: dim_order.len(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_strides(this: TensorRef) -> ArrayRefI32 {
    let strides = this.get().strides();
    ArrayRefI32 {
        data: strides.as_ptr(),
        len: strides.len(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_const_data_ptr(this: TensorRef) -> *const c_void {
    this.get().const_data_ptr()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_mutable_data_ptr(this: TensorRef) -> *mut c_void {
    this.get().mutable_data_ptr()
}

/// Flat element offset of `coordinate`, or -1 when the coordinate has the wrong
/// rank, is out of bounds, or the tensor is not in contiguous dim order.
#[no_mangle]
pub unsafe extern "C" fn executorch_Tensor_coordinate_to_index(
    this: TensorRef,
    coordinate: ArrayRefUsize,
) -> i64 {
    let tensor = this.get();
    let coordinate = coordinate.as_slice();
    if coordinate.len() != tensor.dim() {
        return -1;
    }
    let order = tensor.dim_order();
    if !order.is_empty() && !dim_order::is_contiguous_dim_order(order) {
        return -1;
    }
    let mut index = 0i64;
    for ((&c, &size), &stride) in coordinate.iter().zip(tensor.sizes()).zip(tensor.strides()) {
        if c >= size.max(0) as usize {
            return -1;
        }
        index += c as i64 * stride as i64;
    }
    index
}

/// The contained tensor, or a null handle.
#[no_mangle]
pub unsafe extern "C" fn executorch_OptionalTensor_get(this: OptionalTensorRef) -> TensorRef {
    match this.get().get() {
        Some(tensor) => TensorRef::from_target(tensor),
        None => TensorRef::null(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_is_contiguous_dim_order(dim_order: *const u8, dim: usize) -> bool {
    dim_order::is_contiguous_dim_order(crate::runtime::array::raw_slice(dim_order, dim))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_is_channels_last_dim_order(dim_order: *const u8, dim: usize) -> bool {
    dim_order::is_channels_last_dim_order(crate::runtime::array::raw_slice(dim_order, dim))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_dim_order_to_stride(
    sizes: *const i32,
    dim_order: *const u8,
    dim: usize,
    strides_out: *mut i32,
) -> Error {
    let sizes = crate::runtime::array::raw_slice(sizes, dim);
    let order = crate::runtime::array::raw_slice(dim_order, dim);
    let mut strides = vec![0i32; dim];
    let result = dim_order::dim_order_to_stride(sizes, order, &mut strides);
    if result.is_ok() && dim > 0 {
        std::ptr::copy_nonoverlapping(strides.as_ptr(), strides_out, dim);
    }
    status(result)
}

/// Writes the dim order implied by `strides`; ties keep dimension order.
#[no_mangle]
pub unsafe extern "C" fn executorch_stride_to_dim_order(strides: *const i32, dim: usize, dim_order_out: *mut u8) -> Error {
    let strides = crate::runtime::array::raw_slice(strides, dim);
    let mut order = vec![0u8; dim];
    let result = dim_order::stride_to_dim_order(strides, &mut order);
    if result.is_ok() && dim > 0 {
        std::ptr::copy_nonoverlapping(order.as_ptr(), dim_order_out, dim);
    }
    status(result)
}

#[no_mangle]
pub unsafe extern "C" fn executorch_validate_tensor_layout(
    sizes: ArrayRefI32,
    dim_order: ArrayRefU8,
    strides: ArrayRefI32,
) -> Error {
    status(dim_order::validate_tensor_layout(
        sizes.as_slice(),
        dim_order.as_slice(),
        strides.as_slice(),
    ))
}
