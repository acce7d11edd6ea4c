//! Kernel registry.
//!
//! Argument conventions (value indices, outputs last):
//!
//! | Operator               | Arguments              |
//! |------------------------|------------------------|
//! | `aten::copy.out`       | `src, out`             |
//! | `aten::add.out`        | `self, other, out`     |
//! | `aten::sub.out`        | `self, other, out`     |
//! | `aten::mul.out`        | `self, other, out`     |
//! | `aten::mul.Scalar_out` | `self, scalar, out`    |
//!
//! Every kernel supports Float, Double, Int and Long tensors of one shape with
//! a contiguous dim order. The output is resized to the input shape when its
//! dynamism allows it.

use super::dim_order::is_contiguous_dim_order;
use super::evalue::{EValue, Tag};
use super::pal::et_log;
use super::tensor::{ScalarType, Tensor};
use super::{Error, Result};

/// Kernel entry point: the value table of the method and the instruction's arguments.
pub type OpFunction = fn(&mut [EValue], &[usize]) -> Result<()>;

/// Looks up a kernel by operator name.
pub fn lookup(name: &str) -> Option<OpFunction> {
    let op: OpFunction = match name {
        "aten::copy.out" => copy_out,
        "aten::add.out" => add_out,
        "aten::sub.out" => sub_out,
        "aten::mul.out" => mul_out,
        "aten::mul.Scalar_out" => mul_scalar_out,
        _ => return None,
    };
    Some(op)
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
}

trait Element: Copy {
    fn apply(op: BinaryOp, a: Self, b: Self) -> Self;

    fn from_scalar(value: &EValue) -> Option<Self>;
}

macro_rules! float_element {
    ($t:ty) => {
        impl Element for $t {
            fn apply(op: BinaryOp, a: Self, b: Self) -> Self {
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                }
            }

            fn from_scalar(value: &EValue) -> Option<Self> {
                match value.tag() {
                    Tag::Double => Some(value.to_f64() as $t),
                    Tag::Int => Some(value.to_i64() as $t),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! int_element {
    ($t:ty) => {
        impl Element for $t {
            fn apply(op: BinaryOp, a: Self, b: Self) -> Self {
                match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                }
            }

            fn from_scalar(value: &EValue) -> Option<Self> {
                match value.tag() {
                    Tag::Int => Some(value.to_i64() as $t),
                    Tag::Double => Some(value.to_f64() as $t),
                    _ => None,
                }
            }
        }
    };
}

float_element!(f32);
float_element!(f64);
int_element!(i32);
int_element!(i64);

fn arg<'v>(values: &'v [EValue], args: &[usize], i: usize) -> Result<&'v EValue> {
    args.get(i)
        .and_then(|&index| values.get(index))
        .ok_or(Error::InvalidProgram)
}

fn tensor_arg(values: &[EValue], args: &[usize], i: usize) -> Result<Tensor> {
    arg(values, args, i)?.try_to_tensor().ok_or_else(|| {
        et_log!(Error, "argument {} is not a tensor", i);
        Error::InvalidType
    })
}

/// Checks that `input` can be read element by element and shapes `out` like it.
fn prepare_out(input: &Tensor, out: &Tensor) -> Result<()> {
    if input.scalar_type() != out.scalar_type() {
        et_log!(
            Error,
            "dtype mismatch: {:?} vs {:?}",
            input.scalar_type(),
            out.scalar_type()
        );
        return Err(Error::InvalidArgument);
    }
    if !is_contiguous_dim_order(input.dim_order()) || !is_contiguous_dim_order(out.dim_order()) {
        et_log!(Error, "only contiguous tensors are supported");
        return Err(Error::NotSupported);
    }
    if input.sizes() != out.sizes() {
        let sizes = input.sizes().to_vec();
        unsafe { out.inner_mut() }.resize(&sizes).map_err(|e| {
            et_log!(Error, "cannot resize output to {:?}", sizes);
            e
        })?;
    }
    for tensor in [input, out] {
        if tensor.numel() > 0 && tensor.const_data_ptr().is_null() {
            et_log!(Error, "tensor has no data");
            return Err(Error::InvalidState);
        }
    }
    Ok(())
}

/// # Safety
///
/// Both tensors hold `out.numel()` elements of `T`.
unsafe fn map<T: Copy>(input: &Tensor, out: &Tensor, f: impl Fn(T) -> T) {
    let src = input.const_data_ptr() as *const T;
    let dst = out.mutable_data_ptr() as *mut T;
    for i in 0..out.numel() {
        dst.add(i).write_unaligned(f(src.add(i).read_unaligned()));
    }
}

/// # Safety
///
/// All three tensors hold `out.numel()` elements of `T`.
unsafe fn zip<T: Element>(a: &Tensor, b: &Tensor, out: &Tensor, op: BinaryOp) {
    let lhs = a.const_data_ptr() as *const T;
    let rhs = b.const_data_ptr() as *const T;
    let dst = out.mutable_data_ptr() as *mut T;
    for i in 0..out.numel() {
        let value = T::apply(op, lhs.add(i).read_unaligned(), rhs.add(i).read_unaligned());
        dst.add(i).write_unaligned(value);
    }
}

fn copy_out(values: &mut [EValue], args: &[usize]) -> Result<()> {
    let src = tensor_arg(values, args, 0)?;
    let out = tensor_arg(values, args, 1)?;
    prepare_out(&src, &out)?;
    if src.const_data_ptr() != out.const_data_ptr() && src.nbytes() > 0 {
        unsafe {
            std::ptr::copy(
                src.const_data_ptr() as *const u8,
                out.mutable_data_ptr() as *mut u8,
                src.nbytes(),
            )
        };
    }
    Ok(())
}

fn binary_out(values: &mut [EValue], args: &[usize], op: BinaryOp) -> Result<()> {
    let a = tensor_arg(values, args, 0)?;
    let b = tensor_arg(values, args, 1)?;
    let out = tensor_arg(values, args, 2)?;
    if a.sizes() != b.sizes() || a.scalar_type() != b.scalar_type() {
        et_log!(
            Error,
            "{:?} operands differ: {:?} {:?} vs {:?} {:?}",
            op,
            a.scalar_type(),
            a.sizes(),
            b.scalar_type(),
            b.sizes()
        );
        return Err(Error::InvalidArgument);
    }
    prepare_out(&a, &out)?;
    prepare_out(&b, &out)?;
    unsafe {
        match out.scalar_type() {
            ScalarType::Float => zip::<f32>(&a, &b, &out, op),
            ScalarType::Double => zip::<f64>(&a, &b, &out, op),
            ScalarType::Int => zip::<i32>(&a, &b, &out, op),
            ScalarType::Long => zip::<i64>(&a, &b, &out, op),
            other => return Err(unsupported(other)),
        }
    }
    Ok(())
}

fn add_out(values: &mut [EValue], args: &[usize]) -> Result<()> {
    binary_out(values, args, BinaryOp::Add)
}

fn sub_out(values: &mut [EValue], args: &[usize]) -> Result<()> {
    binary_out(values, args, BinaryOp::Sub)
}

fn mul_out(values: &mut [EValue], args: &[usize]) -> Result<()> {
    binary_out(values, args, BinaryOp::Mul)
}

fn mul_scalar_out(values: &mut [EValue], args: &[usize]) -> Result<()> {
    let a = tensor_arg(values, args, 0)?;
    let scalar = arg(values, args, 1)?.clone();
    let out = tensor_arg(values, args, 2)?;
    prepare_out(&a, &out)?;

    fn scaled<T: Element>(a: &Tensor, out: &Tensor, scalar: &EValue) -> Result<()> {
        let factor = T::from_scalar(scalar).ok_or(Error::InvalidType)?;
        unsafe { map::<T>(a, out, |x| T::apply(BinaryOp::Mul, x, factor)) };
        Ok(())
    }
    match out.scalar_type() {
        ScalarType::Float => scaled::<f32>(&a, &out, &scalar),
        ScalarType::Double => scaled::<f64>(&a, &out, &scalar),
        ScalarType::Int => scaled::<i32>(&a, &out, &scalar),
        ScalarType::Long => scaled::<i64>(&a, &out, &scalar),
        other => Err(unsupported(other)),
    }
}

fn unsupported(scalar_type: ScalarType) -> Error {
    et_log!(Error, "unsupported dtype {:?}", scalar_type);
    Error::NotSupported
}
