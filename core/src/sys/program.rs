use std::ffi::c_char;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::runtime;
use crate::runtime::evalue::Tag;
use crate::runtime::format::ProgramHeaderStatus;
use crate::runtime::method as rt_method;
use crate::runtime::program::{self as rt, ProgramVerification};
use crate::runtime::tensor::ScalarType;

use super::array::{ArrayRefChar, ArrayRefI32, ArrayRefU8};
use super::error::{status, write_result, write_value, Error};
use super::handles::{str_arg, DataLoaderRef, EValueRef, EventTracerRefMut};
use super::layout::{cast, cast_mut, destroy, raw_enum, shadow, wrap};
use super::memory::MemoryManager;

/// Storage for a loaded program.
#[repr(C)]
pub struct Program {
    _blob: [MaybeUninit<usize>; 5],
}

/// Storage for a method bound to its memory.
#[repr(C)]
pub struct Method {
    _blob: [MaybeUninit<usize>; 11],
}

/// Description of one method. Copyable; valid while its program lives.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MethodMeta {
    _blob: [MaybeUninit<usize>; 1],
}

/// Shape and type of one tensor slot. Copyable; valid while its program lives.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TensorInfo {
    _blob: [MaybeUninit<usize>; 8],
}

shadow! {
    Program => rt::Program,
    Method => rt_method::Method,
    MethodMeta => rt::MethodMeta,
    TensorInfo => rt::TensorInfo,
}

/// Inspects the first `size` bytes of a serialized program.
#[no_mangle]
pub unsafe extern "C" fn executorch_Program_check_header(data: *const u8, size: usize) -> ProgramHeaderStatus {
    rt::Program::check_header(runtime::array::raw_slice(data, size))
}

/// Parses a program out of `loader`.
///
/// The loader must outlive the program. A null loader is an invalid argument,
/// bytes without a compatible header an invalid program.
#[no_mangle]
pub unsafe extern "C" fn executorch_Program_load(
    loader: DataLoaderRef,
    verification: u32,
    out: *mut Program,
) -> Error {
    let verification = match ProgramVerification::try_from(verification) {
        Ok(verification) => verification,
        Err(e) => return e,
    };
    let Ok(Some(loader)) = loader.resolve() else {
        return Error::InvalidArgument;
    };
    write_result(out, rt::Program::load(loader, verification))
}

raw_enum! {
    ProgramVerification { Minimal, InternalConsistency }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Program_destructor(this: *mut Program) {
    destroy(this);
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Program_num_methods(this: *const Program) -> usize {
    cast(this).num_methods()
}

/// Writes a pointer to the NUL-terminated name of method `index`, owned by the program.
#[no_mangle]
pub unsafe extern "C" fn executorch_Program_get_method_name(
    this: *const Program,
    index: usize,
    out: *mut *const c_char,
) -> Error {
    write_value(out, cast(this).get_method_name(index).map(|name| name.as_ptr()))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Program_method_meta(
    this: *const Program,
    method_name: *const c_char,
    out: *mut MethodMeta,
) -> Error {
    let meta = str_arg(method_name).and_then(|name| cast(this).method_meta(name));
    write_result(out, meta)
}

/// Instantiates `method_name` in the memory of `memory_manager`.
///
/// The program, the memory manager with its allocators, and the event tracer
/// must all outlive the method. The event tracer may be null.
#[no_mangle]
pub unsafe extern "C" fn executorch_Program_load_method(
    this: *const Program,
    method_name: *const c_char,
    memory_manager: *mut MemoryManager,
    event_tracer: EventTracerRefMut,
    out: *mut Method,
) -> Error {
    let Some(memory_manager) = NonNull::new(memory_manager.cast::<runtime::memory::MemoryManager>()) else {
        return Error::InvalidArgument;
    };
    let method = str_arg(method_name).and_then(|name| {
        let event_tracer = event_tracer.resolve()?;
        cast(this).load_method(name, memory_manager, event_tracer)
    });
    write_result(out, method)
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Method_destructor(this: *mut Method) {
    destroy(this);
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Method_inputs_size(this: *const Method) -> usize {
    cast(this).inputs_size()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Method_outputs_size(this: *const Method) -> usize {
    cast(this).outputs_size()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Method_method_meta(this: *const Method) -> MethodMeta {
    wrap(cast(this).method_meta())
}

/// Binds `input` to input slot `index`.
///
/// Planned input tensors are copied into method memory; others alias the
/// caller's data, which must then outlive the next `execute`.
#[no_mangle]
pub unsafe extern "C" fn executorch_Method_set_input(this: *mut Method, input: EValueRef, index: usize) -> Error {
    if input.is_null() {
        return Error::InvalidArgument;
    }
    status(cast_mut(this).set_input(input.get(), index))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Method_get_input(this: *const Method, index: usize, out: *mut EValueRef) -> Error {
    write_value(out, cast(this).get_input(index).map(EValueRef::from_target))
}

/// Runs every instruction. All inputs must have been set.
#[no_mangle]
pub unsafe extern "C" fn executorch_Method_execute(this: *mut Method) -> Error {
    status(cast_mut(this).execute())
}

/// Writes a handle to output `index`, owned by the method and valid until it
/// is destroyed. Only valid after a successful `execute`.
#[no_mangle]
pub unsafe extern "C" fn executorch_Method_get_output(this: *const Method, index: usize, out: *mut EValueRef) -> Error {
    write_value(out, cast(this).get_output(index).map(EValueRef::from_target))
}

/// NUL-terminated method name, owned by the program.
#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_name(this: *const MethodMeta) -> *const c_char {
    cast(this).name().as_ptr()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_num_inputs(this: *const MethodMeta) -> usize {
    cast(this).num_inputs()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_num_outputs(this: *const MethodMeta) -> usize {
    cast(this).num_outputs()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_num_memory_planned_buffers(this: *const MethodMeta) -> usize {
    cast(this).num_memory_planned_buffers()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_num_instructions(this: *const MethodMeta) -> usize {
    cast(this).num_instructions()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_input_tag(this: *const MethodMeta, index: usize, out: *mut Tag) -> Error {
    write_value(out, cast(this).input_tag(index))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_output_tag(this: *const MethodMeta, index: usize, out: *mut Tag) -> Error {
    write_value(out, cast(this).output_tag(index))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_input_tensor_meta(
    this: *const MethodMeta,
    index: usize,
    out: *mut TensorInfo,
) -> Error {
    write_result(out, cast(this).input_tensor_meta(index))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_output_tensor_meta(
    this: *const MethodMeta,
    index: usize,
    out: *mut TensorInfo,
) -> Error {
    write_result(out, cast(this).output_tensor_meta(index))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_memory_planned_buffer_size(
    this: *const MethodMeta,
    index: usize,
    out: *mut usize,
) -> Error {
    write_value(out, cast(this).memory_planned_buffer_size(index))
}

/// False for a null or non UTF-8 name.
#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_uses_backend(this: *const MethodMeta, backend_name: *const c_char) -> bool {
    str_arg(backend_name).is_ok_and(|name| cast(this).uses_backend(name))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_num_backends(this: *const MethodMeta) -> usize {
    cast(this).num_backends()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_MethodMeta_get_backend_name(
    this: *const MethodMeta,
    index: usize,
    out: *mut *const c_char,
) -> Error {
    write_value(out, cast(this).get_backend_name(index).map(|name| name.as_ptr()))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_TensorInfo_sizes(this: *const TensorInfo) -> ArrayRefI32 {
    cast(this).sizes().into()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_TensorInfo_dim_order(this: *const TensorInfo) -> ArrayRefU8 {
    cast(this).dim_order().into()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_TensorInfo_scalar_type(this: *const TensorInfo) -> ScalarType {
    cast(this).scalar_type()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_TensorInfo_nbytes(this: *const TensorInfo) -> usize {
    cast(this).nbytes()
}

#[no_mangle]
pub unsafe extern "C" fn executorch_TensorInfo_is_memory_planned(this: *const TensorInfo) -> bool {
    cast(this).is_memory_planned()
}

/// Tensor name, not NUL terminated. Empty when the program does not name it.
#[no_mangle]
pub unsafe extern "C" fn executorch_TensorInfo_name(this: *const TensorInfo) -> ArrayRefChar {
    cast(this).name().into()
}
