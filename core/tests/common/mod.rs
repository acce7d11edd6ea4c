//! Programs shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use executorch_bridge::format::{MethodBuilder, ProgramBuilder, TensorDef, ValueDef};
use executorch_bridge::sys::ScalarType;

/// `forward(x: f32[2], n: int) -> (x + [10, 20], [x, y])`, everything planned.
pub fn add_constant_program() -> Result<Vec<u8>> {
    let mut builder = ProgramBuilder::new();
    let constant = builder.constant(&[10.0f32, 20.0]);
    let mut method = MethodBuilder::new("forward");
    let buffer = method.planned_buffer(16);
    let x = method.tensor(TensorDef::new(ScalarType::Float, &[2]).named("x").planned(buffer, 0));
    let c = method.tensor(TensorDef::new(ScalarType::Float, &[2]).with_data(constant));
    let y = method.tensor(TensorDef::new(ScalarType::Float, &[2]).named("y").planned(buffer, 8));
    let n = method.value(ValueDef::Int(0));
    let list = method.value(ValueDef::TensorList(vec![x, y]));
    method
        .input(x)
        .input(n)
        .output(y)
        .output(list)
        .instruction("aten::add.out", &[x, c, y]);
    builder.add_method(method.build());
    Ok(builder.build()?)
}

/// `scale(x: f32[2, 3]) -> x * 2.0`. The input is not planned, so it aliases
/// the caller's buffer.
pub fn scale_program() -> Result<Vec<u8>> {
    let mut builder = ProgramBuilder::new();
    let mut method = MethodBuilder::new("scale");
    let buffer = method.planned_buffer(24);
    let x = method.tensor(TensorDef::new(ScalarType::Float, &[2, 3]));
    let factor = method.value(ValueDef::Double(2.0));
    let y = method.tensor(TensorDef::new(ScalarType::Float, &[2, 3]).planned(buffer, 0));
    method
        .input(x)
        .output(y)
        .instruction("aten::mul.Scalar_out", &[x, factor, y]);
    method.backend("XnnpackBackend");
    builder.add_method(method.build());
    Ok(builder.build()?)
}

/// Two methods: `forward` copies an i64[3] input, `broken` calls an unknown operator.
pub fn two_method_program() -> Result<Vec<u8>> {
    let mut builder = ProgramBuilder::new();

    let mut forward = MethodBuilder::new("forward");
    let buffer = forward.planned_buffer(48);
    let x = forward.tensor(TensorDef::new(ScalarType::Long, &[3]).planned(buffer, 0));
    let y = forward.tensor(TensorDef::new(ScalarType::Long, &[3]).planned(buffer, 24));
    forward.input(x).output(y).instruction("aten::copy.out", &[x, y]);
    builder.add_method(forward.build());

    let mut broken = MethodBuilder::new("broken");
    let a = broken.tensor(TensorDef::new(ScalarType::Float, &[1]));
    broken.input(a).output(a).instruction("aten::conv2d.out", &[a, a]);
    builder.add_method(broken.build());

    Ok(builder.build()?)
}

/// Shapes that overflow: `big` has strides past `i32`, `endless` has more
/// elements than `usize` can count.
pub fn oversized_program() -> Result<Vec<u8>> {
    let mut builder = ProgramBuilder::new();

    let mut big = MethodBuilder::new("big");
    let x = big.tensor(TensorDef::new(ScalarType::Float, &[2, 65536, 65536]));
    big.input(x).output(x).instruction("aten::copy.out", &[x, x]);
    builder.add_method(big.build());

    let mut endless = MethodBuilder::new("endless");
    let x = endless.tensor(TensorDef::new(ScalarType::Double, &[i32::MAX; 3]));
    endless.input(x).output(x).instruction("aten::copy.out", &[x, x]);
    builder.add_method(endless.build());

    Ok(builder.build()?)
}
