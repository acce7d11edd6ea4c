mod common;

use std::io::Write;

use anyhow::{Context, Result};
use approx::assert_abs_diff_eq;
use executorch_bridge::sys::{ModuleLoadMode, ProgramVerification};
use executorch_bridge::{ETDumpGen, EValue, ErrorCode, Module, Tensor, TensorImpl};

fn write_program(bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

#[test]
fn module_runs_forward() -> Result<()> {
    let file = write_program(&common::add_constant_program()?)?;
    let mut module = Module::new(file.path(), ModuleLoadMode::File, None)?;
    assert!(!module.is_loaded());
    assert_eq!(module.method_names()?, vec!["forward".to_string()]);
    assert!(module.is_loaded());
    assert!(!module.is_method_loaded("forward"));

    let meta = module.method_meta("forward")?;
    assert_eq!(meta.num_inputs(), 2);
    assert_eq!(meta.input_tensor_meta(0)?.name(), "x");

    let mut data = [0.25f32, -1.0];
    let mut input_impl = TensorImpl::from_slice(&[2], &mut data)?;
    let input_tensor = Tensor::new(&mut input_impl);
    let x = EValue::from_tensor(&input_tensor);
    let n = EValue::from_i64(1);

    let outputs = module.forward(&[&x, &n])?;
    assert_eq!(outputs.len(), 2);
    let y = outputs.get(0).and_then(|v| v.as_tensor()).context("first output is not a tensor")?;
    let values = y.as_slice::<f32>()?;
    assert_abs_diff_eq!(values[0], 10.25, epsilon = 1e-6);
    assert_abs_diff_eq!(values[1], 19.0, epsilon = 1e-6);
    assert!(outputs.get(2).is_none());
    drop(outputs);
    assert!(module.is_method_loaded("forward"));

    let err = module.execute("missing", &[]).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    Ok(())
}

#[cfg(unix)]
#[test]
fn module_mmap_with_event_tracer() -> Result<()> {
    let file = write_program(&common::two_method_program()?)?;
    let mut data = [9i64, 8, 7];
    let mut input_impl = TensorImpl::from_slice(&[3], &mut data)?;
    let input_tensor = Tensor::new(&mut input_impl);
    let x = EValue::from_tensor(&input_tensor);

    let mut tracer = ETDumpGen::new();
    {
        let mut module = Module::new(file.path(), ModuleLoadMode::Mmap, Some(&mut tracer))?;
        module.load(ProgramVerification::InternalConsistency)?;
        module.load_method("forward")?;
        let err = module.load_method("broken").err().context("expected an error")?;
        assert_eq!(err.code(), Some(ErrorCode::OperatorMissing));

        let outputs = module.execute("forward", &[&x])?;
        let copied = outputs.iter().next().and_then(|v| v.as_tensor()).context("no tensor output")?;
        assert_eq!(copied.as_slice::<i64>()?, &[9, 8, 7]);
    }
    let dump: serde_json::Value = serde_json::from_slice(tracer.get_etdump_data())?;
    assert_eq!(dump["events"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn module_rejects_wrong_input_count() -> Result<()> {
    let file = write_program(&common::scale_program()?)?;
    let mut module = Module::new(file.path(), ModuleLoadMode::File, None)?;
    let err = module.execute("scale", &[]).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));

    let extra = EValue::from_i64(3);
    let err = module.execute("scale", &[&extra, &extra]).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    Ok(())
}

#[test]
fn earlier_inputs_are_not_reused() -> Result<()> {
    let file = write_program(&common::scale_program()?)?;
    let mut module = Module::new(file.path(), ModuleLoadMode::File, None)?;
    {
        let mut data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut input_impl = TensorImpl::from_slice(&[2, 3], &mut data)?;
        let input_tensor = Tensor::new(&mut input_impl);
        let x = EValue::from_tensor(&input_tensor);
        let outputs = module.execute("scale", &[&x])?;
        let y = outputs.get(0).and_then(|v| v.as_tensor()).context("output is not a tensor")?;
        assert_abs_diff_eq!(y.as_slice::<f32>()?[5], 12.0, epsilon = 1e-6);
    }
    // The first input's buffer is gone; a call without inputs must not reach it.
    let err = module.execute("scale", &[]).err().context("expected an error")?;
    assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    assert!(module.is_method_loaded("scale"));
    Ok(())
}
