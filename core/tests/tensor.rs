use std::mem::MaybeUninit;

use anyhow::Result;
use executorch_bridge::sys::{self, ScalarType, TensorShapeDynamism};
use executorch_bridge::{ExecutorchError, Tensor, TensorImpl};

#[test]
fn contiguous_coordinate_to_index() -> Result<()> {
    let mut data = [0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
    let mut tensor_impl = TensorImpl::from_slice(&[2, 3], &mut data)?;
    let tensor = Tensor::new(&mut tensor_impl);
    let view = tensor.view();
    assert_eq!(view.strides(), &[3, 1]);
    assert_eq!(view.coordinate_to_index(&[1, 2]), Some(5));
    assert_eq!(view.coordinate_to_index(&[0, 0]), Some(0));
    assert_eq!(view.coordinate_to_index(&[2, 0]), None);
    assert_eq!(view.coordinate_to_index(&[1, 2, 0]), None);
    assert_eq!(view.as_array::<f32>()?[[1, 0]], 3.0);
    Ok(())
}

#[test]
fn sys_coordinate_to_index_sentinel() {
    let mut sizes = [2i32, 3];
    let mut dim_order = [0u8, 1];
    let mut strides = [3i32, 1];
    let mut data = [0f32; 6];
    let mut tensor_impl = MaybeUninit::<sys::TensorImpl>::uninit();
    let mut tensor = MaybeUninit::<sys::TensorStorage>::uninit();
    unsafe {
        let status = sys::executorch_TensorImpl_new(
            tensor_impl.as_mut_ptr(),
            ScalarType::Float as u32,
            2,
            sizes.as_mut_ptr(),
            data.as_mut_ptr().cast(),
            dim_order.as_mut_ptr(),
            strides.as_mut_ptr(),
            TensorShapeDynamism::Static as u32,
        );
        assert_eq!(status, sys::Error::Ok);
        let handle = sys::TensorRefMut::from_ptr(tensor.as_mut_ptr());
        sys::executorch_Tensor_new(handle, tensor_impl.as_mut_ptr());
        let tensor_ref = handle.as_ref();

        let index = |coordinate: &[usize]| {
            sys::executorch_Tensor_coordinate_to_index(
                tensor_ref,
                sys::ArrayRefUsize {
                    data: coordinate.as_ptr(),
                    len: coordinate.len(),
                },
            )
        };
        assert_eq!(index(&[1, 2]), 5);
        assert_eq!(index(&[2, 0]), -1);
        assert_eq!(index(&[1]), -1);
        assert_eq!(sys::executorch_Tensor_nbytes(tensor_ref), 24);
        assert_eq!(sys::executorch_Tensor_size(tensor_ref, 1), 3);

        sys::executorch_Tensor_destructor(handle);
        sys::executorch_TensorImpl_destructor(tensor_impl.as_mut_ptr());
    }
}

#[test]
fn non_contiguous_dim_order_has_no_flat_index() -> Result<()> {
    let mut data = [0u8; 8];
    let mut tensor_impl = TensorImpl::from_slice_with_layout(&[1, 2, 2, 2], &[0, 2, 3, 1], TensorShapeDynamism::Static, &mut data)?;
    let tensor = Tensor::new(&mut tensor_impl);
    let view = tensor.view();
    assert_eq!(view.dim_order(), &[0, 2, 3, 1]);
    assert_eq!(view.coordinate_to_index(&[0, 0, 0, 0]), None);
    Ok(())
}

#[test]
fn dim_order_utilities() {
    let contiguous = [0u8, 1, 2, 3];
    let channels_last = [0u8, 2, 3, 1];
    unsafe {
        assert!(sys::executorch_is_contiguous_dim_order(contiguous.as_ptr(), 4));
        assert!(!sys::executorch_is_channels_last_dim_order(contiguous.as_ptr(), 4));
        assert!(sys::executorch_is_channels_last_dim_order(channels_last.as_ptr(), 4));
        assert!(!sys::executorch_is_contiguous_dim_order(channels_last.as_ptr(), 4));

        let sizes = [2i32, 3, 4, 5];
        let mut strides = [0i32; 4];
        let status = sys::executorch_dim_order_to_stride(sizes.as_ptr(), channels_last.as_ptr(), 4, strides.as_mut_ptr());
        assert_eq!(status, sys::Error::Ok);
        assert_eq!(strides, [60, 1, 15, 3]);

        let mut order = [0u8; 4];
        let status = sys::executorch_stride_to_dim_order(strides.as_ptr(), 4, order.as_mut_ptr());
        assert_eq!(status, sys::Error::Ok);
        assert_eq!(order, channels_last);

        // Ties keep dimension order.
        let tied = [1i32, 1, 1];
        let mut order = [0u8; 3];
        assert_eq!(sys::executorch_stride_to_dim_order(tied.as_ptr(), 3, order.as_mut_ptr()), sys::Error::Ok);
        assert_eq!(order, [0, 1, 2]);
    }
}

#[test]
fn raw_parts_must_agree() -> Result<()> {
    let mut data = [1.0f64, 2.0, 3.0, 4.0];
    let ptr = data.as_mut_ptr().cast();
    let mut transposed =
        unsafe { TensorImpl::from_raw_parts(ScalarType::Double, &[2, 2], &[1, 0], &[1, 2], ptr, TensorShapeDynamism::Static)? };
    let tensor = Tensor::new(&mut transposed);
    let array = tensor.view().as_array::<f64>()?;
    assert_eq!(array[[0, 1]], 3.0);
    assert_eq!(array[[1, 0]], 2.0);
    drop(tensor);

    let result = unsafe { TensorImpl::from_raw_parts(ScalarType::Double, &[2, 2], &[0, 1], &[1, 2], ptr, TensorShapeDynamism::Static) };
    assert!(matches!(result, Err(ExecutorchError::Tensor(_))));
    Ok(())
}

#[test]
fn view_type_must_match() -> Result<()> {
    let mut data = [1i64, 2];
    let mut tensor_impl = TensorImpl::from_slice(&[2], &mut data)?;
    let tensor = Tensor::new(&mut tensor_impl);
    let view = tensor.view();
    assert_eq!(view.scalar_type(), ScalarType::Long);
    assert_eq!(view.element_size(), 8);
    assert!(view.as_slice::<f64>().is_err());
    assert_eq!(view.as_slice::<i64>()?, &[1, 2]);
    Ok(())
}

#[test]
fn overflowing_shapes_are_rejected() {
    let mut empty: [f32; 0] = [];
    let result = TensorImpl::from_slice(&[i32::MAX as usize; 3], &mut empty);
    assert!(matches!(result, Err(ExecutorchError::Tensor(_))));
    let result = TensorImpl::from_slice(&[2, 65536, 65536], &mut empty);
    assert!(result.is_err());

    let sizes = [2i32, 65536, 65536];
    let order = [0u8, 1, 2];
    let mut strides = [7i32; 3];
    unsafe {
        let status = sys::executorch_dim_order_to_stride(sizes.as_ptr(), order.as_ptr(), 3, strides.as_mut_ptr());
        assert_eq!(status, sys::Error::InvalidArgument);
    }
    assert_eq!(strides, [7, 7, 7]);

    let result = unsafe {
        TensorImpl::from_raw_parts(
            ScalarType::Float,
            &sizes,
            &order,
            &[0, 65536, 1],
            std::ptr::null_mut(),
            TensorShapeDynamism::Static,
        )
    };
    assert!(matches!(result, Err(ExecutorchError::Tensor(_))));
}
