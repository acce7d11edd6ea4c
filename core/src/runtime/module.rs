//! Convenience facade that owns a loader, a program and per-method memory.

use std::ffi::CString;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use super::array::Span;
use super::data_loader::{DataLoader, FileDataLoader, MlockConfig};
use super::evalue::EValue;
use super::event_tracer::EventTracer;
use super::memory::{Allocator, HierarchicalAllocator, MallocMemoryAllocator, MemoryManager, DEFAULT_ALIGNMENT};
use super::method::Method;
use super::pal::et_log;
use super::program::{MethodMeta, Program, ProgramVerification};
use super::{Error, Result};

/// How a [`Module`] reads its program file.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Read ranges into heap buffers.
    File = 0,
    /// Map ranges without locking them.
    #[default]
    Mmap = 1,
    /// Map and lock ranges, failing when locking fails.
    MmapUseMlock = 2,
    /// Map and lock ranges, ignoring locking failures.
    MmapUseMlockIgnoreErrors = 3,
}

struct LoadedMethod {
    // Declared first so it is dropped before the memory it points into.
    method: Method,
    name: CString,
    _memory_manager: Box<MemoryManager>,
    _planned_memory: Box<HierarchicalAllocator>,
    _planned_buffers: Box<MallocMemoryAllocator>,
    _method_allocator: Box<MallocMemoryAllocator>,
}

/// Program file plus everything needed to run its methods.
///
/// Fields drop in declaration order: methods, then the program, then the loader.
#[repr(C)]
pub struct Module {
    methods: Vec<LoadedMethod>,
    program: Option<Box<Program>>,
    loader: Option<Box<dyn DataLoader>>,
    event_tracer: Option<NonNull<dyn EventTracer>>,
    file_path: Box<str>,
    load_mode: LoadMode,
}

impl Module {
    /// Nothing is read until the first call that needs the program.
    ///
    /// # Safety
    ///
    /// `event_tracer` must outlive the module.
    pub unsafe fn new(
        file_path: &str,
        load_mode: LoadMode,
        event_tracer: Option<NonNull<dyn EventTracer>>,
    ) -> Self {
        Self {
            methods: Vec::new(),
            program: None,
            loader: None,
            event_tracer,
            file_path: file_path.into(),
            load_mode,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.program.is_some()
    }

    pub fn load_mode(&self) -> LoadMode {
        self.load_mode
    }

    fn open_loader(&self) -> Result<Box<dyn DataLoader>> {
        let mlock = match self.load_mode {
            LoadMode::File => {
                return Ok(Box::new(FileDataLoader::from(&self.file_path, DEFAULT_ALIGNMENT)?));
            }
            LoadMode::Mmap => MlockConfig::NoMlock,
            LoadMode::MmapUseMlock => MlockConfig::UseMlock,
            LoadMode::MmapUseMlockIgnoreErrors => MlockConfig::UseMlockIgnoreErrors,
        };
        #[cfg(unix)]
        {
            Ok(Box::new(super::data_loader::MmapDataLoader::from(&self.file_path, mlock)?))
        }
        #[cfg(not(unix))]
        {
            et_log!(Error, "{:?} is unavailable, reading {} instead", mlock, self.file_path);
            Ok(Box::new(FileDataLoader::from(&self.file_path, DEFAULT_ALIGNMENT)?))
        }
    }

    /// Opens the file and parses the program. A loaded module is left as is.
    pub fn load(&mut self, verification: ProgramVerification) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let loader = self.open_loader()?;
        let handle: NonNull<dyn DataLoader> = NonNull::from(&*loader);
        let program = unsafe { Program::load(handle, verification)? };
        self.loader = Some(loader);
        self.program = Some(Box::new(program));
        Ok(())
    }

    fn program(&mut self) -> Result<&Program> {
        self.load(ProgramVerification::Minimal)?;
        self.program.as_deref().ok_or(Error::InvalidState)
    }

    pub fn method_names(&mut self) -> Result<Vec<CString>> {
        let program = self.program()?;
        (0..program.num_methods())
            .map(|i| program.get_method_name(i).map(CString::from))
            .collect()
    }

    pub fn method_meta(&mut self, name: &str) -> Result<MethodMeta> {
        self.program()?.method_meta(name)
    }

    pub fn is_method_loaded(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name.as_bytes() == name.as_bytes())
    }

    /// Loads `name` with heap-backed method memory and planned buffers sized
    /// from its metadata. Loading a loaded method does nothing.
    pub fn load_method(&mut self, name: &str) -> Result<()> {
        if self.is_method_loaded(name) {
            return Ok(());
        }
        let event_tracer = self.event_tracer;
        let program = self.program()?;
        let meta = program.method_meta(name)?;

        let mut planned_buffers = Box::new(MallocMemoryAllocator::new());
        let mut spans = Vec::with_capacity(meta.num_memory_planned_buffers());
        for id in 0..meta.num_memory_planned_buffers() {
            let size = meta.memory_planned_buffer_size(id)?;
            let data = planned_buffers
                .allocate(size, DEFAULT_ALIGNMENT)
                .ok_or(Error::MemoryAllocationFailed)?;
            spans.push(Span {
                data: data.as_ptr(),
                len: size,
            });
        }
        let mut planned_memory = Box::new(HierarchicalAllocator::new(&spans));
        let mut method_allocator = Box::new(MallocMemoryAllocator::new());
        let allocator: NonNull<MallocMemoryAllocator> = NonNull::from(&mut *method_allocator);
        let mut memory_manager = Box::new(MemoryManager::new(
            allocator,
            Some(NonNull::from(&mut *planned_memory)),
            None,
        ));
        let method = unsafe {
            program.load_method(name, NonNull::from(&mut *memory_manager), event_tracer)?
        };
        et_log!(Info, "module loaded method '{}'", name);
        self.methods.push(LoadedMethod {
            method,
            name: CString::new(name).map_err(|_| Error::InvalidArgument)?,
            _memory_manager: memory_manager,
            _planned_memory: planned_memory,
            _planned_buffers: planned_buffers,
            _method_allocator: method_allocator,
        });
        Ok(())
    }

    /// Runs `name` on `inputs` and returns its outputs.
    ///
    /// The outputs borrow method memory: they stay valid until the method runs
    /// again or the module is dropped.
    pub fn execute(&mut self, name: &str, inputs: &[EValue]) -> Result<Vec<EValue>> {
        self.load_method(name)?;
        let index = self.find(name).ok_or(Error::InvalidState)?;
        let method = &mut self.methods[index].method;
        if inputs.len() != method.inputs_size() {
            et_log!(
                Error,
                "method '{}' takes {} inputs, got {}",
                name,
                method.inputs_size(),
                inputs.len()
            );
            return Err(Error::InvalidArgument);
        }
        for (i, input) in inputs.iter().enumerate() {
            method.set_input(input, i)?;
        }
        method.execute()?;
        (0..method.outputs_size())
            .map(|i| method.get_output(i).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::format::{MethodBuilder, ProgramBuilder, TensorDef};
    use crate::runtime::tensor::{ScalarType, Tensor, TensorImpl, TensorShapeDynamism};

    fn write_program(dir: &tempfile::TempDir) -> String {
        let mut method = MethodBuilder::new("double");
        let buffer = method.planned_buffer(32);
        let x = method.tensor(TensorDef::new(ScalarType::Long, &[2]).planned(buffer, 0));
        let y = method.tensor(TensorDef::new(ScalarType::Long, &[2]).planned(buffer, 16));
        method.input(x).output(y).instruction("aten::add.out", &[x, x, y]);
        let mut builder = ProgramBuilder::new();
        builder.add_method(method.build());
        let path = dir.path().join("double.pte");
        std::fs::write(&path, builder.build().unwrap()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_lazy_load_and_execute() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(&dir);
        let mut module = unsafe { Module::new(&path, LoadMode::File, None) };
        assert!(!module.is_loaded());
        assert_eq!(module.method_names().unwrap(), vec![CString::from(c"double")]);
        assert!(module.is_loaded());
        assert!(!module.is_method_loaded("double"));

        let mut sizes = [2i32];
        let mut dim_order = [0u8];
        let mut strides = [1i32];
        let mut data = [3i64, -4];
        let mut input_impl = unsafe {
            TensorImpl::new(
                ScalarType::Long,
                1,
                sizes.as_mut_ptr(),
                data.as_mut_ptr().cast(),
                dim_order.as_mut_ptr(),
                strides.as_mut_ptr(),
                TensorShapeDynamism::Static,
            )
        };
        let input = EValue::from_tensor(unsafe { Tensor::new(&mut input_impl) });
        let outputs = module.execute("double", &[input]).unwrap();
        assert!(module.is_method_loaded("double"));
        let out = outputs[0].to_tensor();
        let values = unsafe { std::slice::from_raw_parts(out.const_data_ptr() as *const i64, 2) };
        assert_eq!(values, &[6, -8]);
        drop(outputs);

        assert!(matches!(module.execute("double", &[]), Err(Error::InvalidArgument)));
        let twice = [EValue::from_i64(1), EValue::from_i64(2)];
        assert!(matches!(module.execute("double", &twice), Err(Error::InvalidArgument)));
    }

    #[test]
    fn test_missing_file_and_method() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pte");
        let mut module = unsafe { Module::new(&missing.to_string_lossy(), LoadMode::File, None) };
        assert_eq!(module.load(ProgramVerification::Minimal), Err(Error::NotFound));

        let path = write_program(&dir);
        let mut module = unsafe { Module::new(&path, LoadMode::File, None) };
        assert!(matches!(module.method_meta("forward"), Err(Error::InvalidArgument)));
        assert_eq!(module.load_method("forward"), Err(Error::InvalidArgument));
    }
}
