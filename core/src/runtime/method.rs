//! Executable instantiation of one method of a program.

use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::slice;

use super::array::{ArrayRef, Span};
use super::evalue::{BoxedEvalueList, BoxedElement, EValue, Tag};
use super::event_tracer::EventTracer;
use super::format::{MethodPlan, TensorData, TensorDef, ValueDef};
use super::memory::{allocate_array, Allocator, MemoryManager};
use super::ops::{self, OpFunction};
use super::pal::et_log;
use super::program::{LoadedPlan, MethodMeta, Program};
use super::tensor::{OptionalTensor, Tensor, TensorImpl, TensorShapeDynamism};
use super::{Error, Result};

/// A method bound to its memory, ready to take inputs and run.
///
/// Everything the method owns lives in the method allocator of its memory
/// manager; dropping the method releases nothing.
#[repr(C)]
pub struct Method {
    memory_manager: NonNull<MemoryManager>,
    event_tracer: Option<NonNull<dyn EventTracer>>,
    plan: NonNull<LoadedPlan>,
    values: NonNull<EValue>,
    n_value: usize,
    kernels: NonNull<OpFunction>,
    n_kernel: usize,
    input_set: NonNull<bool>,
    n_input: usize,
    executions: usize,
}

impl Method {
    /// # Safety
    ///
    /// See [`Program::load_method`].
    pub(crate) unsafe fn load(
        program: &Program,
        plan: NonNull<LoadedPlan>,
        memory_manager: NonNull<MemoryManager>,
        event_tracer: Option<NonNull<dyn EventTracer>>,
    ) -> Result<Self> {
        let method_plan = &plan.as_ref().plan;
        method_plan.validate(program.segment().len())?;

        let manager = memory_manager.as_ref();
        let allocator = &mut *manager.method_allocator().as_ptr();
        let n_value = method_plan.values.len();
        let values = allocate_array::<EValue>(allocator, n_value)?;
        for (index, def) in method_plan.values.iter().enumerate() {
            let value = init_value(def, program, manager, allocator, values)
                .inspect_err(|e| et_log!(Error, "value {} of '{}': {:?}", index, method_plan.name, e))?;
            ptr::write(values.as_ptr().add(index), value);
        }

        let n_kernel = method_plan.instructions.len();
        let kernels = allocate_array::<OpFunction>(allocator, n_kernel)?;
        for (index, instruction) in method_plan.instructions.iter().enumerate() {
            let Some(kernel) = ops::lookup(&instruction.op) else {
                et_log!(
                    Error,
                    "missing operator '{}' for instruction {} of '{}'",
                    instruction.op,
                    index,
                    method_plan.name
                );
                return Err(Error::OperatorMissing);
            };
            ptr::write(kernels.as_ptr().add(index), kernel);
        }

        let n_input = method_plan.inputs.len();
        let input_set = allocate_array::<bool>(allocator, n_input)?;
        ptr::write_bytes(input_set.as_ptr(), 0, n_input);

        et_log!(
            Debug,
            "loaded method '{}': {} values, {} instructions",
            method_plan.name,
            n_value,
            n_kernel
        );
        Ok(Self {
            memory_manager,
            event_tracer,
            plan,
            values,
            n_value,
            kernels,
            n_kernel,
            input_set,
            n_input,
            executions: 0,
        })
    }

    fn plan(&self) -> &MethodPlan {
        unsafe { &self.plan.as_ref().plan }
    }

    fn values(&self) -> &[EValue] {
        unsafe { slice::from_raw_parts(self.values.as_ptr(), self.n_value) }
    }

    fn values_mut(&mut self) -> &mut [EValue] {
        unsafe { slice::from_raw_parts_mut(self.values.as_ptr(), self.n_value) }
    }

    fn input_set(&mut self) -> &mut [bool] {
        unsafe { slice::from_raw_parts_mut(self.input_set.as_ptr(), self.n_input) }
    }

    pub fn inputs_size(&self) -> usize {
        self.n_input
    }

    pub fn outputs_size(&self) -> usize {
        self.plan().outputs.len()
    }

    pub fn method_meta(&self) -> MethodMeta {
        MethodMeta::new(unsafe { self.plan.as_ref() })
    }

    /// Binds `value` to input `index`.
    ///
    /// Memory-planned tensors receive a copy of the data, the others alias it,
    /// so an aliased input must stay alive until the method stops using it.
    pub fn set_input(&mut self, value: &EValue, index: usize) -> Result<()> {
        if index >= self.n_input {
            et_log!(Error, "input index {} >= {} inputs", index, self.n_input);
            return Err(Error::InvalidArgument);
        }
        let slot = self.plan().inputs[index];
        let expected = self.values()[slot].tag();
        if value.tag() != expected {
            et_log!(
                Error,
                "input {} expects {:?}, got {:?}",
                index,
                expected,
                value.tag()
            );
            return Err(Error::InvalidArgument);
        }
        match expected {
            Tag::Tensor => {
                let ValueDef::Tensor(def) = &self.plan().values[slot] else {
                    return Err(Error::Internal);
                };
                let planned = def.is_memory_planned();
                let target = *self.values()[slot].to_tensor();
                copy_tensor_input(index, value.to_tensor(), target, planned)?;
            }
            Tag::None | Tag::Int | Tag::Double | Tag::Bool | Tag::String => {
                self.values_mut()[slot] = value.clone();
            }
            list => {
                et_log!(Error, "input {}: {:?} inputs are not supported", index, list);
                return Err(Error::NotSupported);
            }
        }
        self.input_set()[index] = true;
        Ok(())
    }

    pub fn get_input(&self, index: usize) -> Result<&EValue> {
        match self.plan().inputs.get(index) {
            Some(&slot) => Ok(&self.values()[slot]),
            None => {
                et_log!(Error, "input index {} >= {} inputs", index, self.n_input);
                Err(Error::InvalidArgument)
            }
        }
    }

    /// Output `index` of the last run. Borrowed from the method.
    pub fn get_output(&self, index: usize) -> Result<&EValue> {
        let outputs = &self.plan().outputs;
        let Some(&slot) = outputs.get(index) else {
            et_log!(Error, "output index {} >= {} outputs", index, outputs.len());
            return Err(Error::InvalidArgument);
        };
        if self.executions == 0 {
            et_log!(Error, "outputs read before the method ran");
            return Err(Error::InvalidState);
        }
        Ok(&self.values()[slot])
    }

    /// Runs every instruction in order.
    pub fn execute(&mut self) -> Result<()> {
        if let Some(missing) = self.input_set().iter().position(|set| !set) {
            et_log!(
                Error,
                "input {} of '{}' is not set",
                missing,
                self.plan().name
            );
            return Err(Error::InvalidState);
        }
        let plan = unsafe { &self.plan.as_ref().plan };
        let kernels = unsafe { slice::from_raw_parts(self.kernels.as_ptr(), self.n_kernel) };
        let temp_allocator = unsafe { self.memory_manager.as_ref() }.temp_allocator();
        for (index, (instruction, kernel)) in plan.instructions.iter().zip(kernels).enumerate() {
            let entry = self
                .event_tracer
                .map(|mut tracer| unsafe { tracer.as_mut() }.start_profiling(&instruction.op, index));
            let result = kernel(self.values_mut(), &instruction.args);
            if let (Some(mut tracer), Some(entry)) = (self.event_tracer, entry) {
                unsafe { tracer.as_mut() }.end_profiling(entry);
            }
            if let Some(temp) = temp_allocator {
                unsafe { (*temp.as_ptr()).reset() };
            }
            result.inspect_err(|e| {
                et_log!(
                    Error,
                    "instruction {} ({}) of '{}' failed: {:?}",
                    index,
                    instruction.op,
                    plan.name,
                    e
                )
            })?;
        }
        self.executions += 1;
        Ok(())
    }

    /// Number of completed runs.
    pub fn executions(&self) -> usize {
        self.executions
    }
}

fn copy_tensor_input(index: usize, source: &Tensor, target: Tensor, planned: bool) -> Result<()> {
    let mismatch = |what: &str| {
        et_log!(Error, "input {}: {} mismatch", index, what);
        Err(Error::InvalidArgument)
    };
    if source.scalar_type() != target.scalar_type() {
        return mismatch("dtype");
    }
    if source.dim() != target.dim() {
        return mismatch("rank");
    }
    if source.dim_order() != target.dim_order() {
        return mismatch("dim order");
    }
    let target_impl = unsafe { target.inner_mut() };
    if source.sizes() != target_impl.sizes() {
        if target_impl.shape_dynamism() == TensorShapeDynamism::Static {
            return mismatch("shape");
        }
        target_impl.resize(source.sizes())?;
    }
    if planned {
        let (src, dst) = (source.const_data_ptr(), target_impl.data());
        if src != dst as *const c_void && source.nbytes() > 0 {
            unsafe { ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, source.nbytes()) };
        }
    } else {
        unsafe { target_impl.set_data(source.mutable_data_ptr()) };
    }
    Ok(())
}

/// Builds the initial content of one value slot.
unsafe fn init_value(
    def: &ValueDef,
    program: &Program,
    manager: &MemoryManager,
    allocator: &mut dyn Allocator,
    values: NonNull<EValue>,
) -> Result<EValue> {
    let value = match def {
        ValueDef::None => EValue::none(),
        ValueDef::Int(v) => EValue::from_i64(*v),
        ValueDef::Double(v) => EValue::from_f64(*v),
        ValueDef::Bool(v) => EValue::from_bool(*v),
        ValueDef::String(s) => EValue::from_string(ArrayRef {
            data: s.as_ptr().cast(),
            len: s.len(),
        }),
        ValueDef::Tensor(tensor) => {
            EValue::from_tensor(init_tensor(tensor, program, manager, allocator)?)
        }
        ValueDef::BoolList(items) => EValue::from_bool_list(ArrayRef::from_slice(items)),
        ValueDef::DoubleList(items) => EValue::from_f64_list(ArrayRef::from_slice(items)),
        ValueDef::IntList(items) => {
            let indices: Vec<_> = items.iter().map(|&i| Some(i)).collect();
            EValue::from_i64_list(boxed_list::<i64>(&indices, allocator, values)?)
        }
        ValueDef::TensorList(items) => {
            let indices: Vec<_> = items.iter().map(|&i| Some(i)).collect();
            EValue::from_tensor_list(boxed_list::<Tensor>(&indices, allocator, values)?)
        }
        ValueDef::OptionalTensorList(items) => EValue::from_optional_tensor_list(
            boxed_list::<OptionalTensor>(items, allocator, values)?,
        ),
    };
    Ok(value)
}

unsafe fn init_tensor(
    def: &TensorDef,
    program: &Program,
    manager: &MemoryManager,
    allocator: &mut dyn Allocator,
) -> Result<Tensor> {
    let dim = def.sizes.len();
    let sizes = allocate_array::<i32>(allocator, dim)?;
    let dim_order = allocate_array::<u8>(allocator, dim)?;
    let strides = allocate_array::<i32>(allocator, dim)?;
    ptr::copy_nonoverlapping(def.sizes.as_ptr(), sizes.as_ptr(), dim);
    ptr::copy_nonoverlapping(def.dim_order.as_ptr(), dim_order.as_ptr(), dim);
    super::dim_order::dim_order_to_stride(
        &def.sizes,
        &def.dim_order,
        slice::from_raw_parts_mut(strides.as_ptr(), dim),
    )?;

    let data: *mut c_void = match def.data {
        TensorData::Constant { offset, .. } => program.segment().as_ptr().add(offset) as *mut c_void,
        TensorData::Planned { buffer, offset } => {
            let Some(planned) = manager.planned_memory() else {
                et_log!(Error, "memory-planned tensor but no planned memory was provided");
                return Err(Error::InvalidState);
            };
            let nbytes = def.nbytes().ok_or(Error::InvalidProgram)?;
            planned.as_ref().get_offset_address(buffer, offset, nbytes)?.cast()
        }
        TensorData::Unallocated => ptr::null_mut(),
    };

    let tensor_impl = allocate_array::<TensorImpl>(allocator, 1)?;
    ptr::write(
        tensor_impl.as_ptr(),
        TensorImpl::new(
            def.scalar_type,
            dim,
            sizes.as_ptr(),
            data,
            dim_order.as_ptr(),
            strides.as_ptr(),
            def.dynamism,
        ),
    );
    Ok(Tensor::new(tensor_impl.as_ptr()))
}

/// Boxes the listed values. A missing index becomes a null wrapped pointer.
unsafe fn boxed_list<T: BoxedElement>(
    indices: &[Option<usize>],
    allocator: &mut dyn Allocator,
    values: NonNull<EValue>,
) -> Result<BoxedEvalueList<T>> {
    let len = indices.len();
    let wrapped = allocate_array::<*const EValue>(allocator, len)?;
    let unwrapped = allocate_array::<T>(allocator, len)?;
    for (i, index) in indices.iter().enumerate() {
        let ptr = match index {
            Some(index) => values.as_ptr().add(*index) as *const EValue,
            None => ptr::null(),
        };
        ptr::write(wrapped.as_ptr().add(i), ptr);
    }
    Ok(BoxedEvalueList::new(
        ArrayRef {
            data: wrapped.as_ptr(),
            len,
        },
        Span {
            data: unwrapped.as_ptr(),
            len,
        },
    ))
}
