//! Loaded programs and their method metadata.

use std::ffi::{c_char, CStr, CString};
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use super::array::ArrayRef;
use super::data_loader::{DataLoader, FreeableBuffer};
use super::evalue::Tag;
use super::event_tracer::EventTracer;
use super::format::{self, MethodPlan, ProgramHeaderStatus, ProgramTable, TensorDef, ValueDef};
use super::memory::MemoryManager;
use super::method::Method;
use super::pal::et_log;
use super::tensor::ScalarType;
use super::{Error, Result};

/// How much checking [`Program::load`] does beyond parsing.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramVerification {
    /// Header and table structure only.
    #[default]
    Minimal = 0,
    /// Also every index, tensor layout and memory range of every method.
    InternalConsistency = 1,
}

/// One method of a loaded program, with NUL-terminated copies of its names.
#[derive(Debug)]
pub(crate) struct LoadedPlan {
    pub(crate) name: CString,
    pub(crate) plan: MethodPlan,
    backend_names: Vec<CString>,
}

#[derive(Debug)]
struct LoadedTable {
    plans: Vec<LoadedPlan>,
}

/// A deserialized program.
///
/// Keeps the loader-supplied constant segment alive. The loader must outlive
/// the program.
#[repr(C)]
pub struct Program {
    segment_data: FreeableBuffer,
    table: Box<LoadedTable>,
}

impl Program {
    pub fn check_header(data: &[u8]) -> ProgramHeaderStatus {
        format::check_header(data)
    }

    /// # Safety
    ///
    /// `loader` must stay valid for the lifetime of the program.
    pub unsafe fn load(loader: NonNull<dyn DataLoader>, verification: ProgramVerification) -> Result<Self> {
        let source = loader.as_ref();
        let size = source.size()?;
        let header = source.load(0, format::HEADER_LEN.min(size))?;
        let status = format::check_header(header.as_slice());
        if status != ProgramHeaderStatus::CompatibleVersion {
            et_log!(Error, "program header: {:?}", status);
            return Err(Error::InvalidProgram);
        }
        let table_len = format::table_len(header.as_slice());
        if format::HEADER_LEN + table_len > size {
            et_log!(
                Error,
                "method table of {} bytes does not fit a {} byte program",
                table_len,
                size
            );
            return Err(Error::InvalidProgram);
        }
        let program_data = source.load(format::HEADER_LEN, table_len)?;
        let table: ProgramTable = serde_json::from_slice(program_data.as_slice()).map_err(|e| {
            et_log!(Error, "malformed method table: {}", e);
            Error::InvalidProgram
        })?;
        let segment_start = format::segment_offset(table_len).min(size);
        let segment_data = source.load(segment_start, size - segment_start)?;

        let mut plans = Vec::with_capacity(table.methods.len());
        for mut plan in table.methods {
            plan.normalize();
            if verification == ProgramVerification::InternalConsistency {
                plan.validate(segment_data.size())?;
            }
            plans.push(LoadedPlan::new(plan)?);
        }
        et_log!(Debug, "loaded program with {} methods", plans.len());

        Ok(Self {
            segment_data,
            table: Box::new(LoadedTable { plans }),
        })
    }

    pub fn num_methods(&self) -> usize {
        self.table.plans.len()
    }

    pub fn get_method_name(&self, index: usize) -> Result<&CStr> {
        match self.table.plans.get(index) {
            Some(plan) => Ok(&plan.name),
            None => {
                et_log!(
                    Error,
                    "method index {} >= {} methods",
                    index,
                    self.table.plans.len()
                );
                Err(Error::InvalidArgument)
            }
        }
    }

    fn find(&self, name: &str) -> Result<&LoadedPlan> {
        self.table
            .plans
            .iter()
            .find(|p| p.plan.name == name)
            .ok_or_else(|| {
                et_log!(Error, "no method named '{}'", name);
                Error::InvalidArgument
            })
    }

    pub fn method_meta(&self, name: &str) -> Result<MethodMeta> {
        self.find(name).map(MethodMeta::new)
    }

    /// Instantiates a method over the given memory.
    ///
    /// # Safety
    ///
    /// The program, `memory_manager`, its allocators and `event_tracer` must
    /// all outlive the method.
    pub unsafe fn load_method(
        &self,
        name: &str,
        memory_manager: NonNull<MemoryManager>,
        event_tracer: Option<NonNull<dyn EventTracer>>,
    ) -> Result<Method> {
        let plan = self.find(name)?;
        Method::load(self, NonNull::from(plan), memory_manager, event_tracer)
    }

    /// Bytes of the constant segment.
    pub(crate) fn segment(&self) -> &[u8] {
        self.segment_data.as_slice()
    }
}

impl LoadedPlan {
    fn new(plan: MethodPlan) -> Result<Self> {
        let c_string = |s: &str| {
            CString::new(s).map_err(|_| {
                et_log!(Error, "name '{}' contains a NUL byte", s.escape_debug());
                Error::InvalidProgram
            })
        };
        Ok(Self {
            name: c_string(&plan.name)?,
            backend_names: plan
                .backends
                .iter()
                .map(|b| c_string(b))
                .collect::<Result<_>>()?,
            plan,
        })
    }
}

/// Read-only description of one method.
///
/// Points into its program and is valid only while the program lives.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MethodMeta {
    plan: NonNull<LoadedPlan>,
}

impl MethodMeta {
    pub(crate) fn new(plan: &LoadedPlan) -> Self {
        Self {
            plan: NonNull::from(plan),
        }
    }

    fn loaded(&self) -> &LoadedPlan {
        unsafe { self.plan.as_ref() }
    }

    fn plan(&self) -> &MethodPlan {
        &self.loaded().plan
    }

    pub fn name(&self) -> &CStr {
        &self.loaded().name
    }

    pub fn num_inputs(&self) -> usize {
        self.plan().inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.plan().outputs.len()
    }

    pub fn num_memory_planned_buffers(&self) -> usize {
        self.plan().memory_planned_buffers.len()
    }

    pub fn num_instructions(&self) -> usize {
        self.plan().instructions.len()
    }

    fn slot(&self, kind: &str, indices: &[usize], index: usize) -> Result<&ValueDef> {
        indices
            .get(index)
            .and_then(|&value| self.plan().values.get(value))
            .ok_or_else(|| {
                et_log!(
                    Error,
                    "{} index {} >= {} {}s",
                    kind,
                    index,
                    indices.len(),
                    kind
                );
                Error::InvalidArgument
            })
    }

    pub fn input_tag(&self, index: usize) -> Result<Tag> {
        self.slot("input", &self.plan().inputs, index).map(ValueDef::tag)
    }

    pub fn output_tag(&self, index: usize) -> Result<Tag> {
        self.slot("output", &self.plan().outputs, index).map(ValueDef::tag)
    }

    fn tensor_meta(&self, kind: &str, indices: &[usize], index: usize) -> Result<TensorInfo> {
        match self.slot(kind, indices, index)? {
            ValueDef::Tensor(tensor) => TensorInfo::new(tensor),
            other => {
                et_log!(
                    Error,
                    "{} {} is a {:?}, not a tensor",
                    kind,
                    index,
                    other.tag()
                );
                Err(Error::InvalidArgument)
            }
        }
    }

    pub fn input_tensor_meta(&self, index: usize) -> Result<TensorInfo> {
        self.tensor_meta("input", &self.plan().inputs, index)
    }

    pub fn output_tensor_meta(&self, index: usize) -> Result<TensorInfo> {
        self.tensor_meta("output", &self.plan().outputs, index)
    }

    pub fn memory_planned_buffer_size(&self, index: usize) -> Result<usize> {
        let buffers = &self.plan().memory_planned_buffers;
        match buffers.get(index) {
            Some(&size) => Ok(size as usize),
            None => {
                et_log!(
                    Error,
                    "planned buffer {} >= {} buffers",
                    index,
                    buffers.len()
                );
                Err(Error::InvalidArgument)
            }
        }
    }

    pub fn uses_backend(&self, backend: &str) -> bool {
        self.plan().backends.iter().any(|b| b == backend)
    }

    pub fn num_backends(&self) -> usize {
        self.plan().backends.len()
    }

    pub fn get_backend_name(&self, index: usize) -> Result<&CStr> {
        let names = &self.loaded().backend_names;
        match names.get(index) {
            Some(name) => Ok(name),
            None => {
                et_log!(Error, "backend {} >= {} backends", index, names.len());
                Err(Error::InvalidArgument)
            }
        }
    }
}

/// Shape and type of one tensor slot, borrowed from the program.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TensorInfo {
    sizes: ArrayRef<i32>,
    dim_order: ArrayRef<u8>,
    name: ArrayRef<c_char>,
    nbytes: usize,
    scalar_type: ScalarType,
    is_memory_planned: bool,
}

impl TensorInfo {
    fn new(tensor: &TensorDef) -> Result<Self> {
        let Some(nbytes) = tensor.nbytes() else {
            et_log!(Error, "tensor '{}' with sizes {:?} overflows", tensor.name, tensor.sizes);
            return Err(Error::InvalidProgram);
        };
        let name = tensor.name.as_bytes();
        Ok(Self {
            sizes: ArrayRef::from_slice(&tensor.sizes),
            dim_order: ArrayRef::from_slice(&tensor.dim_order),
            name: ArrayRef {
                data: name.as_ptr().cast(),
                len: name.len(),
            },
            nbytes,
            scalar_type: tensor.scalar_type,
            is_memory_planned: tensor.is_memory_planned(),
        })
    }

    pub fn sizes(&self) -> ArrayRef<i32> {
        self.sizes
    }

    pub fn dim_order(&self) -> ArrayRef<u8> {
        self.dim_order
    }

    /// Tensor name, not NUL terminated.
    pub fn name(&self) -> ArrayRef<c_char> {
        self.name
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn is_memory_planned(&self) -> bool {
        self.is_memory_planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::data_loader::BufferDataLoader;
    use crate::runtime::format::{MethodBuilder, ProgramBuilder};

    fn program_bytes() -> Vec<u8> {
        let mut builder = ProgramBuilder::new();
        let mut method = MethodBuilder::new("forward");
        let buffer = method.planned_buffer(48);
        let x = method.tensor(
            TensorDef::new(ScalarType::Float, &[2, 3])
                .named("x")
                .planned(buffer, 0),
        );
        let y = method.tensor(TensorDef::new(ScalarType::Float, &[2, 3]).planned(buffer, 24));
        let n = method.value(ValueDef::Int(3));
        method
            .input(x)
            .input(n)
            .output(y)
            .instruction("aten::copy.out", &[x, y])
            .backend("XnnpackBackend");
        builder.add_method(method.build());
        builder.build().unwrap()
    }

    fn load(bytes: &[u8], verification: ProgramVerification) -> Result<(Box<BufferDataLoader>, Program)> {
        let loader = Box::new(unsafe { BufferDataLoader::new(bytes.as_ptr(), bytes.len()) });
        let handle: NonNull<BufferDataLoader> = NonNull::from(&*loader);
        let program = unsafe { Program::load(handle, verification)? };
        Ok((loader, program))
    }

    #[test]
    fn test_load_and_inspect() {
        let bytes = program_bytes();
        assert_eq!(
            Program::check_header(&bytes),
            ProgramHeaderStatus::CompatibleVersion
        );
        let (_loader, program) = load(&bytes, ProgramVerification::InternalConsistency).unwrap();
        assert_eq!(program.num_methods(), 1);
        assert_eq!(program.get_method_name(0).unwrap(), c"forward");
        assert_eq!(program.get_method_name(1), Err(Error::InvalidArgument));

        let meta = program.method_meta("forward").unwrap();
        assert_eq!(meta.name(), c"forward");
        assert_eq!(meta.num_inputs(), 2);
        assert_eq!(meta.num_outputs(), 1);
        assert_eq!(meta.num_instructions(), 1);
        assert_eq!(meta.input_tag(1), Ok(Tag::Int));
        assert_eq!(meta.input_tag(2), Err(Error::InvalidArgument));
        assert_eq!(meta.memory_planned_buffer_size(0), Ok(48));
        assert!(meta.uses_backend("XnnpackBackend"));
        assert_eq!(meta.get_backend_name(0).unwrap(), c"XnnpackBackend");

        let info = meta.input_tensor_meta(0).unwrap();
        assert_eq!(unsafe { info.sizes().as_slice() }, &[2, 3]);
        assert_eq!(unsafe { info.dim_order().as_slice() }, &[0, 1]);
        assert_eq!(info.nbytes(), 24);
        assert!(info.is_memory_planned());
        assert_eq!(info.name().len, 1);
        assert!(meta.input_tensor_meta(1).is_err());
    }

    #[test]
    fn test_unknown_method() {
        let bytes = program_bytes();
        let (_loader, program) = load(&bytes, ProgramVerification::Minimal).unwrap();
        assert!(matches!(
            program.method_meta("backward"),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn test_rejects_bad_headers() {
        let mut bytes = program_bytes();
        bytes[4] = b'X';
        assert!(matches!(
            load(&bytes, ProgramVerification::Minimal),
            Err(Error::InvalidProgram)
        ));
        assert!(matches!(
            load(&bytes[..4], ProgramVerification::Minimal),
            Err(Error::InvalidProgram)
        ));
    }

    #[test]
    fn test_truncated_table() {
        let bytes = program_bytes();
        assert!(matches!(
            load(&bytes[..20], ProgramVerification::Minimal),
            Err(Error::InvalidProgram)
        ));
    }
}
