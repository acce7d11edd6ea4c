//! Tensors over caller-owned data.
//!
//! A [`TensorImpl`] describes shape, layout and element type of a buffer it
//! borrows; a [`Tensor`] is the handle methods consume. Tensors read back from a
//! method come as a [`TensorView`], borrowed from whatever holds them.

use std::ffi::c_void;
use std::marker::PhantomData;

use ndarray::{ArrayViewD, IntoDimension, IxDyn, ShapeBuilder};

use crate::error::{check, ExecutorchError, Result};
use crate::scalar::Scalar;
use crate::sys::{self, ScalarType, TensorShapeDynamism};
use crate::util::Slot;

/// Shape and layout of a borrowed buffer.
pub struct TensorImpl<'a> {
    inner: Slot<sys::TensorImpl>,
    // Read and resized in place by the executor through `inner`.
    _sizes: Vec<i32>,
    _dim_order: Vec<u8>,
    _strides: Vec<i32>,
    _data: PhantomData<&'a mut [u8]>,
}

impl<'a> TensorImpl<'a> {
    /// A contiguous, static-shape tensor over `data`.
    pub fn from_slice<T: Scalar>(sizes: &[usize], data: &'a mut [T]) -> Result<Self> {
        let dim_order: Vec<u8> = (0..sizes.len() as u8).collect();
        Self::from_slice_with_layout(sizes, &dim_order, TensorShapeDynamism::Static, data)
    }

    /// A tensor over `data` laid out in `dim_order`.
    pub fn from_slice_with_layout<T: Scalar>(
        sizes: &[usize],
        dim_order: &[u8],
        dynamism: TensorShapeDynamism,
        data: &'a mut [T],
    ) -> Result<Self> {
        let sizes = sizes
            .iter()
            .map(|&s| i32::try_from(s).map_err(|_| ExecutorchError::tensor(format!("size {} overflows i32", s))))
            .collect::<Result<Vec<_>>>()?;
        if dim_order.len() != sizes.len() {
            return Err(ExecutorchError::tensor(format!(
                "dim order has {} entries for {} dimensions",
                dim_order.len(),
                sizes.len()
            )));
        }
        let numel = sizes
            .iter()
            .try_fold(1usize, |acc, &s| acc.checked_mul(s as usize))
            .ok_or_else(|| ExecutorchError::tensor(format!("shape {:?} overflows usize", sizes)))?;
        if numel != data.len() {
            return Err(ExecutorchError::tensor(format!(
                "shape {:?} holds {} elements but the buffer has {}",
                sizes,
                numel,
                data.len()
            )));
        }
        let mut strides = vec![0i32; sizes.len()];
        check(unsafe {
            sys::executorch_dim_order_to_stride(sizes.as_ptr(), dim_order.as_ptr(), sizes.len(), strides.as_mut_ptr())
        })?;
        // SAFETY: the arrays move into the impl below, and `data` holds
        // `numel` elements of `T` borrowed for `'a`.
        unsafe {
            Self::from_parts(
                T::SCALAR_TYPE,
                sizes,
                dim_order.to_vec(),
                strides,
                data.as_mut_ptr().cast(),
                dynamism,
            )
        }
    }

    /// A tensor over raw memory with explicit strides.
    ///
    /// # Safety
    ///
    /// `data` must be null or hold the bytes the layout addresses, valid for `'a`.
    pub unsafe fn from_raw_parts(
        scalar_type: ScalarType,
        sizes: &[i32],
        dim_order: &[u8],
        strides: &[i32],
        data: *mut c_void,
        dynamism: TensorShapeDynamism,
    ) -> Result<Self> {
        check(sys::executorch_validate_tensor_layout(
            sizes.into_ref(),
            dim_order.into_ref(),
            strides.into_ref(),
        ))
        .map_err(|_| {
            ExecutorchError::tensor(format!(
                "sizes {:?}, dim order {:?} and strides {:?} do not agree",
                sizes, dim_order, strides
            ))
        })?;
        Self::from_parts(
            scalar_type,
            sizes.to_vec(),
            dim_order.to_vec(),
            strides.to_vec(),
            data,
            dynamism,
        )
    }

    unsafe fn from_parts(
        scalar_type: ScalarType,
        mut sizes: Vec<i32>,
        mut dim_order: Vec<u8>,
        mut strides: Vec<i32>,
        data: *mut c_void,
        dynamism: TensorShapeDynamism,
    ) -> Result<Self> {
        let dim = sizes.len();
        let (sizes_ptr, dim_order_ptr, strides_ptr) = (sizes.as_mut_ptr(), dim_order.as_mut_ptr(), strides.as_mut_ptr());
        let inner = Slot::try_new(|out| {
            sys::executorch_TensorImpl_new(
                out,
                scalar_type as u32,
                dim,
                sizes_ptr,
                data,
                dim_order_ptr,
                strides_ptr,
                dynamism as u32,
            )
        })?;
        Ok(Self {
            inner,
            _sizes: sizes,
            _dim_order: dim_order,
            _strides: strides,
            _data: PhantomData,
        })
    }
}

trait IntoRef<T> {
    fn into_ref(self) -> T;
}

impl IntoRef<sys::ArrayRefI32> for &[i32] {
    fn into_ref(self) -> sys::ArrayRefI32 {
        sys::ArrayRefI32 {
            data: self.as_ptr(),
            len: self.len(),
        }
    }
}

impl IntoRef<sys::ArrayRefU8> for &[u8] {
    fn into_ref(self) -> sys::ArrayRefU8 {
        sys::ArrayRefU8 {
            data: self.as_ptr(),
            len: self.len(),
        }
    }
}

/// Handle to a [`TensorImpl`], as stored in values.
pub struct Tensor<'a> {
    inner: Slot<sys::TensorStorage>,
    _impl: PhantomData<&'a mut ()>,
}

impl<'a> Tensor<'a> {
    pub fn new(tensor_impl: &'a mut TensorImpl<'_>) -> Self {
        let impl_ptr = tensor_impl.inner.as_mut_ptr();
        let inner = unsafe {
            Slot::new(|out| sys::executorch_Tensor_new(sys::TensorRefMut::from_ptr(out), impl_ptr))
        };
        Self {
            inner,
            _impl: PhantomData,
        }
    }

    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            handle: sys::TensorRef::from_ref(unsafe { &*self.inner.as_ptr() }),
            _tensor: PhantomData,
        }
    }

    pub(crate) fn handle(&self) -> sys::TensorRef {
        self.view().handle
    }
}

/// Read-only view of a tensor someone else owns.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    handle: sys::TensorRef,
    _tensor: PhantomData<&'a ()>,
}

impl<'a> TensorView<'a> {
    /// # Safety
    ///
    /// `handle` must point to a live tensor that outlives `'a`.
    pub(crate) unsafe fn from_handle(handle: sys::TensorRef) -> Self {
        Self {
            handle,
            _tensor: PhantomData,
        }
    }

    pub fn dim(&self) -> usize {
        unsafe { sys::executorch_Tensor_dim(self.handle) }
    }

    pub fn numel(&self) -> usize {
        unsafe { sys::executorch_Tensor_numel(self.handle) }
    }

    pub fn nbytes(&self) -> usize {
        unsafe { sys::executorch_Tensor_nbytes(self.handle) }
    }

    /// Size of dimension `dim`.
    pub fn size(&self, dim: usize) -> usize {
        unsafe { sys::executorch_Tensor_size(self.handle, dim) }
    }

    pub fn sizes(&self) -> &'a [i32] {
        unsafe { sys::executorch_Tensor_sizes(self.handle).as_slice() }
    }

    pub fn dim_order(&self) -> &'a [u8] {
        unsafe { sys::executorch_Tensor_dim_order(self.handle).as_slice() }
    }

    pub fn strides(&self) -> &'a [i32] {
        unsafe { sys::executorch_Tensor_strides(self.handle).as_slice() }
    }

    pub fn scalar_type(&self) -> ScalarType {
        unsafe { sys::executorch_Tensor_scalar_type(self.handle) }
    }

    pub fn element_size(&self) -> usize {
        unsafe { sys::executorch_Tensor_element_size(self.handle) }
    }

    pub fn as_ptr(&self) -> *const c_void {
        unsafe { sys::executorch_Tensor_const_data_ptr(self.handle) }
    }

    /// Flat element offset of `coordinate`, or `None` when it has the wrong
    /// rank, is out of bounds, or the tensor is not in contiguous dim order.
    pub fn coordinate_to_index(&self, coordinate: &[usize]) -> Option<usize> {
        let coordinate = sys::ArrayRefUsize {
            data: coordinate.as_ptr(),
            len: coordinate.len(),
        };
        let index = unsafe { sys::executorch_Tensor_coordinate_to_index(self.handle, coordinate) };
        usize::try_from(index).ok()
    }

    /// The elements in storage order.
    pub fn as_slice<T: Scalar>(&self) -> Result<&'a [T]> {
        if self.scalar_type() != T::SCALAR_TYPE {
            return Err(ExecutorchError::tensor(format!(
                "tensor holds {:?}, not {:?}",
                self.scalar_type(),
                T::SCALAR_TYPE
            )));
        }
        let data = self.as_ptr().cast::<T>();
        if self.numel() == 0 {
            return Ok(&[]);
        }
        if data.is_null() {
            return Err(ExecutorchError::tensor("tensor has no data"));
        }
        Ok(unsafe { std::slice::from_raw_parts(data, self.numel()) })
    }

    /// The tensor as an `ndarray` view honoring its strides.
    pub fn as_array<T: Scalar>(&self) -> Result<ArrayViewD<'a, T>> {
        let data = self.as_slice::<T>()?;
        let shape: Vec<usize> = self.sizes().iter().map(|&s| s as usize).collect();
        let strides: Vec<usize> = self.strides().iter().map(|&s| s as usize).collect();
        let shape = shape.into_dimension().strides(IxDyn(&strides));
        ArrayViewD::from_shape(shape, data).map_err(|e| ExecutorchError::tensor(e.to_string()))
    }
}

impl std::fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorView")
            .field("scalar_type", &self.scalar_type())
            .field("sizes", &self.sizes())
            .field("strides", &self.strides())
            .finish()
    }
}
