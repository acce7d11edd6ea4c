//! Precondition violations abort the process, so each case re-runs this test
//! binary in a child process and checks that it did not exit cleanly.

use std::env;
use std::mem::MaybeUninit;
use std::process::Command;

use anyhow::{Context, Result};
use executorch_bridge::sys;

const CHILD_ENV: &str = "EXECUTORCH_BRIDGE_FATAL_CASE";

fn run_in_child(test_name: &str) -> Result<std::process::ExitStatus> {
    let exe = env::current_exe().context("current test binary")?;
    let status = Command::new(exe)
        .args(["--exact", test_name, "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, test_name)
        .status()
        .context("spawning child test process")?;
    Ok(status)
}

fn is_child(test_name: &str) -> bool {
    env::var(CHILD_ENV).is_ok_and(|case| case == test_name)
}

#[test]
fn boxed_list_length_mismatch_aborts() -> Result<()> {
    const NAME: &str = "boxed_list_length_mismatch_aborts";
    if !is_child(NAME) {
        let status = run_in_child(NAME)?;
        assert!(!status.success(), "child exited cleanly: {:?}", status);
        return Ok(());
    }

    let mut values: [MaybeUninit<sys::EValueStorage>; 3] = std::array::from_fn(|_| MaybeUninit::uninit());
    let mut wrapped = Vec::new();
    for (i, slot) in values.iter_mut().enumerate() {
        let handle = sys::EValueRefMut::from_ptr(slot.as_mut_ptr());
        unsafe { sys::executorch_EValue_new_from_i64(handle, i as i64) };
        wrapped.push(handle.as_ref());
    }
    let mut unwrapped = [0i64; 2];
    let list = sys::BoxedEvalueListI64 {
        wrapped_vals: sys::ArrayRefEValuePtr {
            data: wrapped.as_ptr(),
            len: wrapped.len(),
        },
        unwrapped_vals: sys::SpanI64 {
            data: unwrapped.as_mut_ptr(),
            len: unwrapped.len(),
        },
    };
    let mut storage = MaybeUninit::<sys::EValueStorage>::uninit();
    unsafe {
        sys::executorch_EValue_new_from_i64_list(sys::EValueRefMut::from_ptr(storage.as_mut_ptr()), list);
    }
    // Only reached if the length check did not fire.
    Ok(())
}

#[test]
fn null_element_in_int_list_aborts() -> Result<()> {
    const NAME: &str = "null_element_in_int_list_aborts";
    if !is_child(NAME) {
        let status = run_in_child(NAME)?;
        assert!(!status.success(), "child exited cleanly: {:?}", status);
        return Ok(());
    }

    let wrapped = [sys::EValueRef::null()];
    let mut unwrapped = [0i64; 1];
    let list = sys::BoxedEvalueListI64 {
        wrapped_vals: sys::ArrayRefEValuePtr {
            data: wrapped.as_ptr(),
            len: wrapped.len(),
        },
        unwrapped_vals: sys::SpanI64 {
            data: unwrapped.as_mut_ptr(),
            len: unwrapped.len(),
        },
    };
    let mut storage = MaybeUninit::<sys::EValueStorage>::uninit();
    let handle = sys::EValueRefMut::from_ptr(storage.as_mut_ptr());
    unsafe {
        sys::executorch_EValue_new_from_i64_list(handle, list);
        // Reading the list unwraps every element.
        sys::executorch_EValue_as_i64_list(handle.as_ref());
    }
    Ok(())
}
