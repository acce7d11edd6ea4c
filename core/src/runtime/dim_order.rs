//! Dim order helpers.
//!
//! A dim order lists the dimensions of a tensor from outermost to innermost in
//! memory, so `[0, 1, 2, 3]` is a contiguous NCHW layout and `[0, 2, 3, 1]` is
//! channels-last.

use super::{Error, Result};

/// Highest rank a tensor may have.
pub const MAX_DIM: usize = 16;

/// True when `dim_order` is a permutation of `0..dim_order.len()`.
pub fn is_valid_dim_order(dim_order: &[u8]) -> bool {
    if dim_order.len() > MAX_DIM {
        return false;
    }
    let mut seen = [false; MAX_DIM];
    for &d in dim_order {
        let d = d as usize;
        if d >= dim_order.len() || seen[d] {
            return false;
        }
        seen[d] = true;
    }
    true
}

pub fn is_contiguous_dim_order(dim_order: &[u8]) -> bool {
    dim_order.iter().enumerate().all(|(i, &d)| d as usize == i)
}

/// Channels-last is only defined for 4-d (NHWC) and 5-d (NDHWC) tensors.
pub fn is_channels_last_dim_order(dim_order: &[u8]) -> bool {
    match dim_order.len() {
        4 => dim_order == [0, 2, 3, 1],
        5 => dim_order == [0, 2, 3, 4, 1],
        _ => false,
    }
}

/// Computes the strides that a dense tensor with `sizes` laid out in
/// `dim_order` has. Zero-sized dimensions count as size one so every stride
/// stays non-zero. Fails with `InvalidArgument` when a stride does not fit in
/// an `i32`.
pub fn dim_order_to_stride(sizes: &[i32], dim_order: &[u8], strides: &mut [i32]) -> Result<()> {
    if sizes.len() != dim_order.len() || sizes.len() != strides.len() {
        return Err(Error::InvalidArgument);
    }
    if !is_valid_dim_order(dim_order) {
        return Err(Error::InvalidArgument);
    }
    let Some((&innermost, rest)) = dim_order.split_last() else {
        return Ok(());
    };
    strides[innermost as usize] = 1;
    let mut previous = innermost as usize;
    for &d in rest.iter().rev() {
        let d = d as usize;
        strides[d] = strides[previous]
            .checked_mul(sizes[previous].max(1))
            .ok_or(Error::InvalidArgument)?;
        previous = d;
    }
    Ok(())
}

/// Recovers the dim order from `strides`: dimensions sorted by decreasing
/// stride, ties kept in index order.
pub fn stride_to_dim_order(strides: &[i32], dim_order: &mut [u8]) -> Result<()> {
    if strides.len() != dim_order.len() || strides.len() > MAX_DIM {
        return Err(Error::InvalidArgument);
    }
    for (i, d) in dim_order.iter_mut().enumerate() {
        *d = i as u8;
    }
    dim_order.sort_by(|&a, &b| strides[b as usize].cmp(&strides[a as usize]));
    Ok(())
}

/// Checks that `sizes`, `dim_order` and `strides` describe the same dense layout.
///
/// Strides of dimensions with at most one element are not compared since they
/// never take part in an offset computation.
pub fn validate_tensor_layout(sizes: &[i32], dim_order: &[u8], strides: &[i32]) -> Result<()> {
    if sizes.len() != dim_order.len() || sizes.len() != strides.len() {
        return Err(Error::InvalidArgument);
    }
    if sizes.iter().any(|&s| s < 0) {
        return Err(Error::InvalidArgument);
    }
    let mut expected = [0i32; MAX_DIM];
    let expected = &mut expected[..sizes.len().min(MAX_DIM)];
    dim_order_to_stride(sizes, dim_order, expected)?;
    let mismatch = sizes
        .iter()
        .zip(strides)
        .zip(expected.iter())
        .any(|((&size, &stride), &want)| size > 1 && stride != want);
    if mismatch {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}
