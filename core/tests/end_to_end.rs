mod common;

use anyhow::{Context, Result};
use approx::assert_abs_diff_eq;
use executorch_bridge::memory::{AlignedBuffer, HierarchicalAllocator, MallocMemoryAllocator, MemoryAllocator, MemoryManager};
use executorch_bridge::sys::{ProgramHeaderStatus, ProgramVerification, ScalarType, Tag};
use executorch_bridge::{BufferDataLoader, ETDumpGen, EValue, ErrorCode, Program, Tensor, TensorImpl, Value};

fn planned_buffers(program: &Program<'_>, method: &str) -> Result<Vec<AlignedBuffer>> {
    let meta = program.method_meta(method)?;
    let mut buffers = Vec::new();
    for i in 0..meta.num_memory_planned_buffers() {
        buffers.push(AlignedBuffer::new(meta.memory_planned_buffer_size(i)?)?);
    }
    Ok(buffers)
}

#[test]
fn add_constant_with_planned_memory() -> Result<()> {
    let bytes = common::add_constant_program()?;
    assert_eq!(Program::check_header(&bytes), ProgramHeaderStatus::CompatibleVersion);

    let mut data = [1.5f32, 2.5];
    let mut input_impl = TensorImpl::from_slice(&[2], &mut data)?;
    let input_tensor = Tensor::new(&mut input_impl);
    let x = EValue::from_tensor(&input_tensor);

    let loader = BufferDataLoader::new(&bytes);
    let program = Program::load(&loader, ProgramVerification::InternalConsistency)?;
    assert_eq!(program.num_methods(), 1);
    assert_eq!(program.get_method_name(0)?, "forward");
    assert_eq!(program.get_method_name(1).unwrap_err().code(), Some(ErrorCode::InvalidArgument));

    let mut buffers = planned_buffers(&program, "forward")?;
    let mut planned = HierarchicalAllocator::new(buffers.iter_mut().map(AlignedBuffer::as_mut_slice).collect());
    let mut method_allocator = MallocMemoryAllocator::new();
    let mut memory_manager = MemoryManager::new(&mut method_allocator, Some(&mut planned), None);
    let mut method = program.load_method("forward", &mut memory_manager, None)?;
    assert_eq!(method.inputs_size(), 2);
    assert_eq!(method.outputs_size(), 2);

    assert_eq!(method.get_output(0).unwrap_err().code(), Some(ErrorCode::InvalidState));
    assert_eq!(method.execute().unwrap_err().code(), Some(ErrorCode::InvalidState));

    method.set_input(&x, 0)?;
    assert_eq!(
        method.set_input(&EValue::from_f64(1.0), 1).unwrap_err().code(),
        Some(ErrorCode::InvalidArgument)
    );
    method.set_input(&EValue::from_i64(7), 1)?;
    assert_eq!(method.get_input(1)?.as_i64(), Some(7));
    method.execute()?;

    let output = method.get_output(0)?.as_tensor().context("output 0 is not a tensor")?;
    assert_eq!(output.scalar_type(), ScalarType::Float);
    let values = output.as_slice::<f32>()?;
    assert_abs_diff_eq!(values[0], 11.5, epsilon = 1e-6);
    assert_abs_diff_eq!(values[1], 22.5, epsilon = 1e-6);

    match method.get_output(1)?.value() {
        Value::ListTensor(tensors) => {
            assert_eq!(tensors.len(), 2);
            assert_abs_diff_eq!(tensors[0].as_slice::<f32>()?[1], 2.5, epsilon = 1e-6);
        }
        other => panic!("expected a tensor list, got {:?}", other),
    }
    assert_eq!(method.get_output(2).unwrap_err().code(), Some(ErrorCode::InvalidArgument));
    Ok(())
}

#[test]
fn unplanned_input_aliases_caller_data() -> Result<()> {
    let bytes = common::scale_program()?;
    let mut data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut input_impl = TensorImpl::from_slice(&[2, 3], &mut data)?;
    let input_tensor = Tensor::new(&mut input_impl);
    let x = EValue::from_tensor(&input_tensor);

    let loader = BufferDataLoader::new(&bytes);
    let program = Program::load(&loader, ProgramVerification::Minimal)?;
    let meta = program.method_meta("scale")?;
    assert_eq!(meta.name(), "scale");
    assert_eq!(meta.num_inputs(), 1);
    assert_eq!(meta.input_tag(0)?, Tag::Tensor);
    let info = meta.input_tensor_meta(0)?;
    assert_eq!(info.sizes(), &[2, 3]);
    assert!(!info.is_memory_planned());
    assert!(meta.output_tensor_meta(0)?.is_memory_planned());
    assert!(meta.uses_backend("XnnpackBackend"));
    assert!(!meta.uses_backend("CoreMLBackend"));
    assert_eq!(meta.get_backend_name(0)?, "XnnpackBackend");

    let mut buffers = planned_buffers(&program, "scale")?;
    let mut planned = HierarchicalAllocator::new(buffers.iter_mut().map(AlignedBuffer::as_mut_slice).collect());
    let mut arena = AlignedBuffer::new(64 * 1024)?;
    let mut method_allocator = MemoryAllocator::new(arena.as_mut_slice());
    let mut memory_manager = MemoryManager::new(&mut method_allocator, Some(&mut planned), None);
    let mut method = program.load_method("scale", &mut memory_manager, None)?;

    method.set_input(&x, 0)?;
    let input = method.get_input(0)?.as_tensor().context("input is not a tensor")?;
    assert_eq!(input.as_ptr(), input_tensor.view().as_ptr());
    method.execute()?;

    let output = method.get_output(0)?.as_tensor().context("output is not a tensor")?;
    let array = output.as_array::<f32>()?;
    assert_eq!(array.shape(), &[2, 3]);
    assert_abs_diff_eq!(array[[1, 2]], 12.0, epsilon = 1e-6);
    assert_abs_diff_eq!(array[[0, 0]], 2.0, epsilon = 1e-6);
    Ok(())
}

#[test]
fn load_method_failures() -> Result<()> {
    let bytes = common::two_method_program()?;
    let loader = BufferDataLoader::new(&bytes);
    let program = Program::load(&loader, ProgramVerification::Minimal)?;
    assert_eq!(program.method_names()?, vec!["forward", "broken"]);

    let mut method_allocator = MallocMemoryAllocator::new();
    let mut memory_manager = MemoryManager::new(&mut method_allocator, None, None);
    let err = program.load_method("missing", &mut memory_manager, None).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    let err = program.load_method("broken", &mut memory_manager, None).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::OperatorMissing));
    // `forward` has planned tensors but no planned memory was given.
    let err = program.load_method("forward", &mut memory_manager, None).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidState));
    assert_eq!(program.method_meta("missing").unwrap_err().code(), Some(ErrorCode::InvalidArgument));
    Ok(())
}

#[test]
fn overflowing_shapes_fail_to_load() -> Result<()> {
    let bytes = common::oversized_program()?;
    let loader = BufferDataLoader::new(&bytes);
    let err = Program::load(&loader, ProgramVerification::InternalConsistency)
        .err()
        .context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidProgram));

    let program = Program::load(&loader, ProgramVerification::Minimal)?;
    let mut method_allocator = MallocMemoryAllocator::new();
    let mut memory_manager = MemoryManager::new(&mut method_allocator, None, None);
    let err = program.load_method("big", &mut memory_manager, None).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidProgram));
    let err = program.load_method("endless", &mut memory_manager, None).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidProgram));

    assert_eq!(program.method_meta("big")?.input_tensor_meta(0)?.nbytes(), 1usize << 35);
    let err = program.method_meta("endless")?.input_tensor_meta(0).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidProgram));
    Ok(())
}

#[test]
fn method_allocator_exhaustion() -> Result<()> {
    let bytes = common::two_method_program()?;
    let loader = BufferDataLoader::new(&bytes);
    let program = Program::load(&loader, ProgramVerification::Minimal)?;

    let mut buffers = planned_buffers(&program, "forward")?;
    let mut planned = HierarchicalAllocator::new(buffers.iter_mut().map(AlignedBuffer::as_mut_slice).collect());
    let mut arena = AlignedBuffer::new(16)?;
    let mut method_allocator = MemoryAllocator::new(arena.as_mut_slice());
    let mut memory_manager = MemoryManager::new(&mut method_allocator, Some(&mut planned), None);
    let err = program.load_method("forward", &mut memory_manager, None).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::MemoryAllocationFailed));
    Ok(())
}

#[test]
fn event_tracer_records_instructions() -> Result<()> {
    let bytes = common::two_method_program()?;
    let mut data = [4i64, 5, 6];
    let mut input_impl = TensorImpl::from_slice(&[3], &mut data)?;
    let input_tensor = Tensor::new(&mut input_impl);
    let x = EValue::from_tensor(&input_tensor);

    let loader = BufferDataLoader::new(&bytes);
    let program = Program::load(&loader, ProgramVerification::Minimal)?;
    let mut buffers = planned_buffers(&program, "forward")?;
    let mut planned = HierarchicalAllocator::new(buffers.iter_mut().map(AlignedBuffer::as_mut_slice).collect());
    let mut method_allocator = MallocMemoryAllocator::new();
    let mut memory_manager = MemoryManager::new(&mut method_allocator, Some(&mut planned), None);
    let mut tracer = ETDumpGen::new();
    {
        let mut method = program.load_method("forward", &mut memory_manager, Some(&mut tracer))?;
        method.set_input(&x, 0)?;
        method.execute()?;
        method.execute()?;
        let output = method.get_output(0)?.as_tensor().context("output is not a tensor")?;
        assert_eq!(output.as_slice::<i64>()?, &[4, 5, 6]);
    }

    let dump: serde_json::Value = serde_json::from_slice(tracer.get_etdump_data())?;
    let events = dump["events"].as_array().context("dump has no events")?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["name"], "aten::copy.out");
    assert_eq!(events[1]["instruction_id"], 0);
    assert!(events[0]["end_ticks"].as_u64() >= events[0]["start_ticks"].as_u64());
    Ok(())
}

#[test]
fn identity_round_trip() -> Result<()> {
    let bytes = common::two_method_program()?;
    assert_eq!(Program::check_header(&bytes), ProgramHeaderStatus::CompatibleVersion);
    let mut data = [-1i64, 0, 1];
    let mut input_impl = TensorImpl::from_slice(&[3], &mut data)?;
    let input_tensor = Tensor::new(&mut input_impl);
    let x = EValue::from_tensor(&input_tensor);

    let loader = BufferDataLoader::new(&bytes);
    let program = Program::load(&loader, ProgramVerification::Minimal)?;
    let mut buffers = planned_buffers(&program, "forward")?;
    let mut planned = HierarchicalAllocator::new(buffers.iter_mut().map(AlignedBuffer::as_mut_slice).collect());
    let mut method_allocator = MallocMemoryAllocator::new();
    let mut memory_manager = MemoryManager::new(&mut method_allocator, Some(&mut planned), None);
    let mut method = program.load_method("forward", &mut memory_manager, None)?;
    method.set_input(&x, 0)?;
    method.execute()?;

    let input = input_tensor.view();
    let output = method.get_output(0)?.as_tensor().context("output is not a tensor")?;
    assert_eq!(output.sizes(), input.sizes());
    assert_eq!(output.scalar_type(), input.scalar_type());
    assert_eq!(output.as_slice::<i64>()?, input.as_slice::<i64>()?);
    Ok(())
}

#[test]
fn missing_header_is_rejected() -> Result<()> {
    let bytes = b"this is not a serialized program".to_vec();
    assert_eq!(Program::check_header(&bytes), ProgramHeaderStatus::NotPresent);
    let loader = BufferDataLoader::new(&bytes);
    let err = Program::load(&loader, ProgramVerification::Minimal).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidProgram));

    let mut incompatible = common::two_method_program()?;
    incompatible[6..8].copy_from_slice(b"99");
    assert_eq!(Program::check_header(&incompatible), ProgramHeaderStatus::IncompatibleVersion);
    assert_eq!(Program::check_header(&incompatible[..4]), ProgramHeaderStatus::ShortData);
    Ok(())
}
