use std::ffi::c_char;
use std::mem::MaybeUninit;

use crate::runtime::evalue::EValue;
use crate::runtime::module::{self as rt, LoadMode};
use crate::runtime::program::ProgramVerification;
use crate::runtime::{Error as RuntimeError, Result as RuntimeResult};

use super::array::{ArrayRefEValuePtr, VecChar, VecEValue, VecVecChar};
use super::error::{status, write_result, write_value, Error};
use super::handles::{str_arg, EventTracerRefMut};
use super::layout::{cast, cast_mut, destroy, place, raw_enum, shadow};
use super::program::MethodMeta;

/// Storage for a module: a program file plus the memory of every method loaded from it.
#[repr(C)]
pub struct Module {
    _blob: [MaybeUninit<usize>; 11],
}

shadow! {
    Module => rt::Module,
}

/// Creates a module over `file_path`. Nothing is read until first use.
///
/// The event tracer may be null; otherwise it must outlive the module.
#[no_mangle]
pub unsafe extern "C" fn executorch_Module_new(
    out: *mut Module,
    file_path: *const c_char,
    load_mode: u32,
    event_tracer: EventTracerRefMut,
) -> Error {
    let load_mode = match LoadMode::try_from(load_mode) {
        Ok(load_mode) => load_mode,
        Err(e) => return e,
    };
    let module = str_arg(file_path)
        .and_then(|path| Ok(rt::Module::new(path, load_mode, event_tracer.resolve()?)));
    match module {
        Ok(module) => {
            place(out, module);
            Error::Ok
        }
        Err(e) => e.into(),
    }
}

raw_enum! {
    LoadMode { File, Mmap, MmapUseMlock, MmapUseMlockIgnoreErrors }
}

/// Releases the methods, then the program, then the loader.
#[no_mangle]
pub unsafe extern "C" fn executorch_Module_destructor(this: *mut Module) {
    destroy(this);
}

/// Loads the program. Does nothing when it is already loaded.
#[no_mangle]
pub unsafe extern "C" fn executorch_Module_load(this: *mut Module, verification: u32) -> Error {
    match ProgramVerification::try_from(verification) {
        Ok(verification) => status(cast_mut(this).load(verification)),
        Err(e) => e,
    }
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Module_is_loaded(this: *const Module) -> bool {
    cast(this).is_loaded()
}

/// Writes the name of every method, loading the program first if needed.
/// Release the names with `executorch_VecVecChar_destructor`.
#[no_mangle]
pub unsafe extern "C" fn executorch_Module_method_names(this: *mut Module, out: *mut VecVecChar) -> Error {
    let names = cast_mut(this).method_names().map(|names| {
        VecVecChar::from_vec(
            names
                .iter()
                .map(|name| VecChar::from_bytes(name.as_bytes()))
                .collect(),
        )
    });
    write_value(out, names)
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Module_load_method(this: *mut Module, method_name: *const c_char) -> Error {
    status(str_arg(method_name).and_then(|name| cast_mut(this).load_method(name)))
}

/// False for a null or non UTF-8 name.
#[no_mangle]
pub unsafe extern "C" fn executorch_Module_is_method_loaded(this: *const Module, method_name: *const c_char) -> bool {
    str_arg(method_name).is_ok_and(|name| cast(this).is_method_loaded(name))
}

#[no_mangle]
pub unsafe extern "C" fn executorch_Module_method_meta(
    this: *mut Module,
    method_name: *const c_char,
    out: *mut MethodMeta,
) -> Error {
    let meta = str_arg(method_name).and_then(|name| cast_mut(this).method_meta(name));
    write_result(out, meta)
}

/// Runs `method_name` on `inputs`, loading the program and method as needed.
///
/// The outputs are moved into `out`, to be released with
/// `executorch_VecEValue_destructor`. Tensors among them point into method
/// memory and stay valid until the method runs again or the module is destroyed.
#[no_mangle]
pub unsafe extern "C" fn executorch_Module_execute(
    this: *mut Module,
    method_name: *const c_char,
    inputs: ArrayRefEValuePtr,
    out: *mut VecEValue,
) -> Error {
    let outputs = str_arg(method_name).and_then(|name| {
        let inputs = collect_inputs(inputs)?;
        cast_mut(this).execute(name, &inputs)
    });
    write_value(out, outputs.map(VecEValue::from_values))
}

unsafe fn collect_inputs(inputs: ArrayRefEValuePtr) -> RuntimeResult<Vec<EValue>> {
    inputs
        .as_slice()
        .iter()
        .map(|input| {
            if input.is_null() {
                Err(RuntimeError::InvalidArgument)
            } else {
                Ok(input.get().clone())
            }
        })
        .collect()
}
