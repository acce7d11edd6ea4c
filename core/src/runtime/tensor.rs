//! Tensors: a shared `TensorImpl` describing shape and storage, and the thin
//! `Tensor` handle that points at it.

use std::ffi::c_void;

use serde::{Deserialize, Serialize};

use super::array::raw_slice;
use super::dim_order::{dim_order_to_stride, MAX_DIM};
use super::{Error, Result};

/// Element type of a tensor.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Byte = 0,
    Char = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Half = 5,
    Float = 6,
    Double = 7,
    ComplexHalf = 8,
    ComplexFloat = 9,
    ComplexDouble = 10,
    Bool = 11,
    QInt8 = 12,
    QUInt8 = 13,
    QInt32 = 14,
    BFloat16 = 15,
    QUInt4x2 = 16,
    QUInt2x4 = 17,
    Bits1x8 = 18,
    Bits2x4 = 19,
    Bits4x2 = 20,
    Bits8 = 21,
    Bits16 = 22,
    #[serde(rename = "Float8_e5m2")]
    Float8E5m2 = 23,
    #[serde(rename = "Float8_e4m3fn")]
    Float8E4m3fn = 24,
    #[serde(rename = "Float8_e5m2fnuz")]
    Float8E5m2fnuz = 25,
    #[serde(rename = "Float8_e4m3fnuz")]
    Float8E4m3fnuz = 26,
    UInt16 = 27,
    UInt32 = 28,
    UInt64 = 29,
}

impl ScalarType {
    /// Size in bytes of one element.
    pub fn element_size(self) -> usize {
        use ScalarType::*;
        match self {
            Byte | Char | Bool | QInt8 | QUInt8 | QUInt4x2 | QUInt2x4 | Bits1x8 | Bits2x4
            | Bits4x2 | Bits8 | Float8E5m2 | Float8E4m3fn | Float8E5m2fnuz | Float8E4m3fnuz => 1,
            Short | Half | BFloat16 | Bits16 | UInt16 => 2,
            Int | Float | QInt32 | ComplexHalf | UInt32 => 4,
            Long | Double | ComplexFloat | UInt64 => 8,
            ComplexDouble => 16,
        }
    }
}

/// Whether, and how far, a tensor's shape may change after construction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorShapeDynamism {
    #[default]
    Static = 0,
    DynamicBound = 1,
    DynamicUnbound = 2,
}

/// Shape, layout and storage description of a tensor.
///
/// None of the pointers are owned. Whoever builds the impl keeps the arrays
/// and the data alive for as long as the impl is used.
#[repr(C)]
#[derive(Debug)]
pub struct TensorImpl {
    sizes: *mut i32,
    dim_order: *mut u8,
    strides: *mut i32,
    data: *mut c_void,
    dim: usize,
    numel: usize,
    /// Bytes available behind `data` when the impl was created.
    capacity: usize,
    scalar_type: ScalarType,
    shape_dynamism: TensorShapeDynamism,
}

impl TensorImpl {
    /// # Safety
    ///
    /// `sizes`, `dim_order` and `strides` must each point to `dim` elements, and
    /// `data` to at least `numel * element_size` bytes (or be null), all
    /// outliving the impl.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        scalar_type: ScalarType,
        dim: usize,
        sizes: *mut i32,
        data: *mut c_void,
        dim_order: *mut u8,
        strides: *mut i32,
        shape_dynamism: TensorShapeDynamism,
    ) -> Self {
        // Saturates when the shape overflows.
        let numel = numel_of(raw_slice(sizes, dim)).unwrap_or(usize::MAX);
        Self {
            sizes,
            dim_order,
            strides,
            data,
            dim,
            numel,
            capacity: numel.saturating_mul(scalar_type.element_size()),
            scalar_type,
            shape_dynamism,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn numel(&self) -> usize {
        self.numel
    }

    pub fn nbytes(&self) -> usize {
        self.numel.saturating_mul(self.scalar_type.element_size())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn shape_dynamism(&self) -> TensorShapeDynamism {
        self.shape_dynamism
    }

    pub fn sizes(&self) -> &[i32] {
        unsafe { raw_slice(self.sizes, self.dim) }
    }

    pub fn dim_order(&self) -> &[u8] {
        unsafe { raw_slice(self.dim_order, self.dim) }
    }

    pub fn strides(&self) -> &[i32] {
        unsafe { raw_slice(self.strides, self.dim) }
    }

    pub fn data(&self) -> *mut c_void {
        self.data
    }

    /// Points the impl at new storage without touching its shape.
    ///
    /// # Safety
    ///
    /// `data` must hold at least `nbytes()` bytes for as long as the impl is used.
    pub unsafe fn set_data(&mut self, data: *mut c_void) {
        self.data = data;
    }

    /// Changes the shape in place, keeping the rank and the dim order.
    pub fn resize(&mut self, new_sizes: &[i32]) -> Result<()> {
        if new_sizes.len() != self.dim || self.dim > MAX_DIM {
            return Err(Error::InvalidArgument);
        }
        if new_sizes == self.sizes() {
            return Ok(());
        }
        if new_sizes.iter().any(|&s| s < 0) {
            return Err(Error::InvalidArgument);
        }
        let Some(numel) = numel_of(new_sizes) else {
            return Err(Error::InvalidArgument);
        };
        let nbytes = numel.checked_mul(self.scalar_type.element_size()).ok_or(Error::InvalidArgument)?;
        match self.shape_dynamism {
            TensorShapeDynamism::Static => return Err(Error::NotSupported),
            TensorShapeDynamism::DynamicBound => {
                if nbytes > self.capacity {
                    return Err(Error::InvalidArgument);
                }
            }
            TensorShapeDynamism::DynamicUnbound => {
                // No reallocation hook, so unbounded tensors still cannot outgrow their storage.
                if nbytes > self.capacity {
                    return Err(Error::NotSupported);
                }
            }
        }
        let mut strides = [0i32; MAX_DIM];
        dim_order_to_stride(new_sizes, self.dim_order(), &mut strides[..self.dim])?;
        unsafe {
            std::ptr::copy_nonoverlapping(new_sizes.as_ptr(), self.sizes, self.dim);
            std::ptr::copy_nonoverlapping(strides.as_ptr(), self.strides, self.dim);
        }
        self.numel = numel;
        Ok(())
    }
}

fn numel_of(sizes: &[i32]) -> Option<usize> {
    sizes.iter().try_fold(1usize, |acc, &s| acc.checked_mul(s.max(0) as usize))
}

/// Handle to a [`TensorImpl`].
///
/// A `Tensor` is only ever created over a live impl and never outlives it; the
/// accessors rely on that.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Tensor {
    impl_: *mut TensorImpl,
}

impl Tensor {
    /// # Safety
    ///
    /// `impl_` must stay valid for every use of the returned tensor.
    pub unsafe fn new(impl_: *mut TensorImpl) -> Self {
        Self { impl_ }
    }

    pub fn unsafe_get_tensor_impl(&self) -> *mut TensorImpl {
        self.impl_
    }

    pub fn inner(&self) -> &TensorImpl {
        unsafe { &*self.impl_ }
    }

    /// # Safety
    ///
    /// No other reference to the impl may be live while the result is.
    pub unsafe fn inner_mut<'a>(self) -> &'a mut TensorImpl {
        &mut *self.impl_
    }

    pub fn nbytes(&self) -> usize {
        self.inner().nbytes()
    }

    pub fn size(&self, dim: usize) -> usize {
        self.inner().sizes().get(dim).map_or(0, |&s| s.max(0) as usize)
    }

    pub fn dim(&self) -> usize {
        self.inner().dim()
    }

    pub fn numel(&self) -> usize {
        self.inner().numel()
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.inner().scalar_type()
    }

    pub fn element_size(&self) -> usize {
        self.scalar_type().element_size()
    }

    pub fn sizes(&self) -> &[i32] {
        self.inner().sizes()
    }

    pub fn dim_order(&self) -> &[u8] {
        self.inner().dim_order()
    }

    pub fn strides(&self) -> &[i32] {
        self.inner().strides()
    }

    pub fn const_data_ptr(&self) -> *const c_void {
        self.inner().data()
    }

    pub fn mutable_data_ptr(&self) -> *mut c_void {
        self.inner().data()
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
union OptionalStorage {
    empty: u8,
    value: Tensor,
}

/// Either nothing or a [`Tensor`], laid out as a one byte flag followed by the payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OptionalTensor {
    present: bool,
    storage: OptionalStorage,
}

impl OptionalTensor {
    pub fn none() -> Self {
        Self {
            present: false,
            storage: OptionalStorage { empty: 0 },
        }
    }

    pub fn some(tensor: Tensor) -> Self {
        Self {
            present: true,
            storage: OptionalStorage { value: tensor },
        }
    }

    pub fn get(&self) -> Option<&Tensor> {
        if self.present {
            Some(unsafe { &self.storage.value })
        } else {
            None
        }
    }
}

impl std::fmt::Debug for OptionalTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OptionalTensor").field(&self.get()).finish()
    }
}
