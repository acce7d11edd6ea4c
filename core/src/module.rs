//! One-stop facade over a program file.
//!
//! A [`Module`] owns the loader, the program and the memory of every method it
//! loads, and loads each of them the first time it is needed.

use std::ffi::CString;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{check, ExecutorchError, Result};
use crate::evalue::{EValue, EValueView};
use crate::event_tracer::ETDumpGen;
use crate::program::{name_arg, MethodMeta};
use crate::sys::{self, ModuleLoadMode, ProgramVerification};
use crate::util::{try_out, Slot};

/// A program file plus everything needed to run its methods.
pub struct Module<'a> {
    inner: Slot<sys::Module>,
    _event_tracer: PhantomData<&'a mut ETDumpGen>,
}

impl<'a> Module<'a> {
    /// Creates a module over `path`. The file is not opened until first use.
    pub fn new(path: impl AsRef<Path>, load_mode: ModuleLoadMode, event_tracer: Option<&'a mut ETDumpGen>) -> Result<Self> {
        let path = path.as_ref();
        let c_path = path
            .to_str()
            .ok_or_else(|| ExecutorchError::config(format!("path is not UTF-8: {}", path.display())))
            .and_then(|p| CString::new(p).map_err(|_| ExecutorchError::config("path contains a NUL byte")))?;
        let event_tracer = event_tracer.map_or(sys::EventTracerRefMut::null(), |t| t.event_tracer_handle());
        let inner =
            unsafe { Slot::try_new(|out| sys::executorch_Module_new(out, c_path.as_ptr(), load_mode as u32, event_tracer))? };
        debug!(path = %path.display(), ?load_mode, "Module created");
        Ok(Self {
            inner,
            _event_tracer: PhantomData,
        })
    }

    /// Loads the program unless it already is.
    pub fn load(&mut self, verification: ProgramVerification) -> Result<()> {
        check(unsafe { sys::executorch_Module_load(self.inner.as_mut_ptr(), verification as u32) })
    }

    pub fn is_loaded(&self) -> bool {
        unsafe { sys::executorch_Module_is_loaded(self.inner.as_ptr()) }
    }

    pub fn method_names(&mut self) -> Result<Vec<String>> {
        let mut names = unsafe { try_out(|out| sys::executorch_Module_method_names(self.inner.as_mut_ptr(), out))? };
        let collected = unsafe {
            names
                .as_slice()
                .iter()
                .map(|name| {
                    let bytes = std::slice::from_raw_parts(name.as_slice().as_ptr().cast::<u8>(), name.len);
                    String::from_utf8_lossy(bytes).into_owned()
                })
                .collect()
        };
        unsafe { sys::executorch_VecVecChar_destructor(&mut names) };
        Ok(collected)
    }

    pub fn load_method(&mut self, name: &str) -> Result<()> {
        let c_name = name_arg(name)?;
        check(unsafe { sys::executorch_Module_load_method(self.inner.as_mut_ptr(), c_name.as_ptr()) })?;
        info!(method = name, "Method ready");
        Ok(())
    }

    pub fn is_method_loaded(&self, name: &str) -> bool {
        match CString::new(name) {
            Ok(name) => unsafe { sys::executorch_Module_is_method_loaded(self.inner.as_ptr(), name.as_ptr()) },
            Err(_) => false,
        }
    }

    pub fn method_meta(&mut self, name: &str) -> Result<MethodMeta<'_>> {
        let c_name = name_arg(name)?;
        let raw =
            unsafe { try_out(|out| sys::executorch_Module_method_meta(self.inner.as_mut_ptr(), c_name.as_ptr(), out))? };
        Ok(unsafe { MethodMeta::from_raw(raw) })
    }

    /// Runs `name` on `inputs`, loading the program and the method first if needed.
    ///
    /// Every input of the method must be given. Outputs may alias input data,
    /// so they keep the inputs borrowed as well as the module.
    pub fn execute<'m, 'i: 'm>(&'m mut self, name: &str, inputs: &[&EValue<'i>]) -> Result<Outputs<'m>> {
        let c_name = name_arg(name)?;
        let handles: Vec<sys::EValueRef> = inputs.iter().map(|input| input.handle()).collect();
        let inputs = sys::ArrayRefEValuePtr {
            data: handles.as_ptr(),
            len: handles.len(),
        };
        let raw = unsafe {
            try_out(|out| sys::executorch_Module_execute(self.inner.as_mut_ptr(), c_name.as_ptr(), inputs, out))?
        };
        Ok(Outputs {
            raw: MaybeUninit::new(raw),
            _module: PhantomData,
        })
    }

    /// Runs `forward`.
    pub fn forward<'m, 'i: 'm>(&'m mut self, inputs: &[&EValue<'i>]) -> Result<Outputs<'m>> {
        self.execute("forward", inputs)
    }
}

/// Values returned by [`Module::execute`]. Tensors among them point into method
/// memory or into the inputs, so both stay borrowed.
pub struct Outputs<'m> {
    raw: MaybeUninit<sys::VecEValue>,
    _module: PhantomData<&'m mut ()>,
}

impl Outputs<'_> {
    fn values(&self) -> &[sys::EValueStorage] {
        unsafe { self.raw.assume_init_ref().as_slice() }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<EValueView<'_>> {
        let value = self.values().get(index)?;
        Some(unsafe { EValueView::from_handle(sys::EValueRef::from_ref(value)) })
    }

    pub fn iter(&self) -> impl Iterator<Item = EValueView<'_>> {
        self.values()
            .iter()
            .map(|value| unsafe { EValueView::from_handle(sys::EValueRef::from_ref(value)) })
    }
}

impl Drop for Outputs<'_> {
    fn drop(&mut self) {
        unsafe { sys::executorch_VecEValue_destructor(self.raw.as_mut_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_missing_file_fails_on_load() {
        let mut module = Module::new("/no/such/model.pte", ModuleLoadMode::File, None).unwrap();
        assert!(!module.is_loaded());
        let err = module.load(ProgramVerification::Minimal).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
        assert!(!module.is_method_loaded("forward"));
    }
}
