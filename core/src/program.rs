//! Programs, their methods, and method metadata.

use std::ffi::{c_char, CStr, CString};
use std::marker::PhantomData;
use std::ptr;

use tracing::debug;

use crate::data_loader::DataLoader;
use crate::error::{check, ErrorCode, ExecutorchError, Result};
use crate::evalue::{EValue, EValueView};
use crate::event_tracer::ETDumpGen;
use crate::memory::MemoryManager;
use crate::sys::{self, ProgramHeaderStatus, ProgramVerification, ScalarType, Tag};
use crate::util::{try_out, Slot};

pub(crate) fn name_arg(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| ExecutorchError::Runtime(ErrorCode::InvalidArgument))
}

/// # Safety
///
/// `ptr` must be null or a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    CStr::from_ptr(ptr).to_str().unwrap_or("")
}

/// A deserialized program. Methods are loaded out of it on demand.
pub struct Program<'a> {
    inner: Slot<sys::Program>,
    _loader: PhantomData<&'a ()>,
}

impl<'a> Program<'a> {
    /// Whether `data` starts with a program header this runtime can read.
    pub fn check_header(data: &[u8]) -> ProgramHeaderStatus {
        unsafe { sys::executorch_Program_check_header(data.as_ptr(), data.len()) }
    }

    pub fn load(loader: &'a dyn DataLoader, verification: ProgramVerification) -> Result<Self> {
        let handle = loader.data_loader_handle();
        let inner = unsafe { Slot::try_new(|out| sys::executorch_Program_load(handle, verification as u32, out))? };
        let program = Self {
            inner,
            _loader: PhantomData,
        };
        debug!(methods = program.num_methods(), ?verification, "Program loaded");
        Ok(program)
    }

    pub fn num_methods(&self) -> usize {
        unsafe { sys::executorch_Program_num_methods(self.inner.as_ptr()) }
    }

    pub fn get_method_name(&self, index: usize) -> Result<&str> {
        let name = unsafe {
            try_out(|out| sys::executorch_Program_get_method_name(self.inner.as_ptr(), index, out))?
        };
        Ok(unsafe { c_str(name) })
    }

    /// Names of all methods, in program order.
    pub fn method_names(&self) -> Result<Vec<&str>> {
        (0..self.num_methods()).map(|i| self.get_method_name(i)).collect()
    }

    pub fn method_meta(&self, name: &str) -> Result<MethodMeta<'_>> {
        let name = name_arg(name)?;
        let raw = unsafe {
            try_out(|out| sys::executorch_Program_method_meta(self.inner.as_ptr(), name.as_ptr(), out))?
        };
        Ok(unsafe { MethodMeta::from_raw(raw) })
    }

    /// Loads method `name` into the memory of `memory_manager`.
    pub fn load_method<'b>(
        &'b self,
        name: &str,
        memory_manager: &'b mut MemoryManager<'_>,
        event_tracer: Option<&'b mut ETDumpGen>,
    ) -> Result<Method<'b>> {
        let c_name = name_arg(name)?;
        let memory_manager = memory_manager.as_mut_ptr();
        let event_tracer = event_tracer.map_or(sys::EventTracerRefMut::null(), |t| t.event_tracer_handle());
        let inner = unsafe {
            Slot::try_new(|out| {
                sys::executorch_Program_load_method(self.inner.as_ptr(), c_name.as_ptr(), memory_manager, event_tracer, out)
            })?
        };
        debug!(method = name, "Method loaded");
        Ok(Method {
            inner,
            _program: PhantomData,
        })
    }
}

/// A method ready to run. Inputs bound with [`Method::set_input`] must live as
/// long as the method.
pub struct Method<'a> {
    inner: Slot<sys::Method>,
    _program: PhantomData<&'a ()>,
}

impl<'a> Method<'a> {
    pub fn inputs_size(&self) -> usize {
        unsafe { sys::executorch_Method_inputs_size(self.inner.as_ptr()) }
    }

    pub fn outputs_size(&self) -> usize {
        unsafe { sys::executorch_Method_outputs_size(self.inner.as_ptr()) }
    }

    pub fn method_meta(&self) -> MethodMeta<'a> {
        unsafe { MethodMeta::from_raw(sys::executorch_Method_method_meta(self.inner.as_ptr())) }
    }

    /// Binds input `index`. Planned tensors are copied; anything else is aliased.
    pub fn set_input(&mut self, input: &EValue<'a>, index: usize) -> Result<()> {
        check(unsafe { sys::executorch_Method_set_input(self.inner.as_mut_ptr(), input.handle(), index) })
    }

    pub fn get_input(&self, index: usize) -> Result<EValueView<'_>> {
        let handle = unsafe { try_out(|out| sys::executorch_Method_get_input(self.inner.as_ptr(), index, out))? };
        Ok(unsafe { EValueView::from_handle(handle) })
    }

    pub fn execute(&mut self) -> Result<()> {
        check(unsafe { sys::executorch_Method_execute(self.inner.as_mut_ptr()) })
    }

    /// Output `index` of the last successful [`Method::execute`].
    pub fn get_output(&self, index: usize) -> Result<EValueView<'_>> {
        let handle = unsafe { try_out(|out| sys::executorch_Method_get_output(self.inner.as_ptr(), index, out))? };
        Ok(unsafe { EValueView::from_handle(handle) })
    }
}

/// Metadata of a method, available without loading it.
#[derive(Clone, Copy)]
pub struct MethodMeta<'a> {
    raw: sys::MethodMeta,
    _program: PhantomData<&'a ()>,
}

impl<'a> MethodMeta<'a> {
    /// # Safety
    ///
    /// `raw` must come from a program that outlives `'a`.
    pub(crate) unsafe fn from_raw(raw: sys::MethodMeta) -> Self {
        Self {
            raw,
            _program: PhantomData,
        }
    }

    pub fn name(&self) -> &'a str {
        unsafe { c_str(sys::executorch_MethodMeta_name(&self.raw)) }
    }

    pub fn num_inputs(&self) -> usize {
        unsafe { sys::executorch_MethodMeta_num_inputs(&self.raw) }
    }

    pub fn num_outputs(&self) -> usize {
        unsafe { sys::executorch_MethodMeta_num_outputs(&self.raw) }
    }

    pub fn num_memory_planned_buffers(&self) -> usize {
        unsafe { sys::executorch_MethodMeta_num_memory_planned_buffers(&self.raw) }
    }

    pub fn num_instructions(&self) -> usize {
        unsafe { sys::executorch_MethodMeta_num_instructions(&self.raw) }
    }

    pub fn input_tag(&self, index: usize) -> Result<Tag> {
        unsafe { try_out(|out| sys::executorch_MethodMeta_input_tag(&self.raw, index, out)) }
    }

    pub fn output_tag(&self, index: usize) -> Result<Tag> {
        unsafe { try_out(|out| sys::executorch_MethodMeta_output_tag(&self.raw, index, out)) }
    }

    pub fn input_tensor_meta(&self, index: usize) -> Result<TensorInfo<'a>> {
        let raw = unsafe { try_out(|out| sys::executorch_MethodMeta_input_tensor_meta(&self.raw, index, out))? };
        Ok(TensorInfo {
            raw,
            _program: PhantomData,
        })
    }

    pub fn output_tensor_meta(&self, index: usize) -> Result<TensorInfo<'a>> {
        let raw = unsafe { try_out(|out| sys::executorch_MethodMeta_output_tensor_meta(&self.raw, index, out))? };
        Ok(TensorInfo {
            raw,
            _program: PhantomData,
        })
    }

    /// Size in bytes of planned buffer `index`.
    pub fn memory_planned_buffer_size(&self, index: usize) -> Result<usize> {
        unsafe { try_out(|out| sys::executorch_MethodMeta_memory_planned_buffer_size(&self.raw, index, out)) }
    }

    pub fn uses_backend(&self, backend_name: &str) -> bool {
        match CString::new(backend_name) {
            Ok(name) => unsafe { sys::executorch_MethodMeta_uses_backend(&self.raw, name.as_ptr()) },
            Err(_) => false,
        }
    }

    pub fn num_backends(&self) -> usize {
        unsafe { sys::executorch_MethodMeta_num_backends(&self.raw) }
    }

    pub fn get_backend_name(&self, index: usize) -> Result<&'a str> {
        let mut name = ptr::null();
        check(unsafe { sys::executorch_MethodMeta_get_backend_name(&self.raw, index, &mut name) })?;
        Ok(unsafe { c_str(name) })
    }
}

impl std::fmt::Debug for MethodMeta<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodMeta")
            .field("name", &self.name())
            .field("num_inputs", &self.num_inputs())
            .field("num_outputs", &self.num_outputs())
            .finish()
    }
}

/// Shape, layout and type of a method input or output.
#[derive(Clone, Copy)]
pub struct TensorInfo<'a> {
    raw: sys::TensorInfo,
    _program: PhantomData<&'a ()>,
}

impl<'a> TensorInfo<'a> {
    pub fn sizes(&self) -> &'a [i32] {
        unsafe { sys::executorch_TensorInfo_sizes(&self.raw).as_slice() }
    }

    pub fn dim_order(&self) -> &'a [u8] {
        unsafe { sys::executorch_TensorInfo_dim_order(&self.raw).as_slice() }
    }

    pub fn scalar_type(&self) -> ScalarType {
        unsafe { sys::executorch_TensorInfo_scalar_type(&self.raw) }
    }

    pub fn nbytes(&self) -> usize {
        unsafe { sys::executorch_TensorInfo_nbytes(&self.raw) }
    }

    pub fn is_memory_planned(&self) -> bool {
        unsafe { sys::executorch_TensorInfo_is_memory_planned(&self.raw) }
    }

    /// Empty when the tensor is unnamed or its name is not UTF-8.
    pub fn name(&self) -> &'a str {
        let chars = unsafe { sys::executorch_TensorInfo_name(&self.raw).as_slice() };
        let bytes = unsafe { std::slice::from_raw_parts(chars.as_ptr().cast::<u8>(), chars.len()) };
        std::str::from_utf8(bytes).unwrap_or("")
    }
}

impl std::fmt::Debug for TensorInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorInfo")
            .field("name", &self.name())
            .field("scalar_type", &self.scalar_type())
            .field("sizes", &self.sizes())
            .field("dim_order", &self.dim_order())
            .field("nbytes", &self.nbytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::BufferDataLoader;

    #[test]
    fn test_check_header_on_garbage() {
        assert_eq!(Program::check_header(b"not a program at all"), ProgramHeaderStatus::NotPresent);
        assert_eq!(Program::check_header(&[]), ProgramHeaderStatus::ShortData);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let bytes = vec![0u8; 64];
        let loader = BufferDataLoader::new(&bytes);
        let err = Program::load(&loader, ProgramVerification::Minimal).err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::InvalidProgram));
    }

    #[test]
    fn test_name_with_nul() {
        let err = name_arg("for\0ward").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    }
}
