//! CLI entry point for executorch-bridge.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use executorch_bridge::cli::{Cli, Commands};
use executorch_bridge::config::Config;
use executorch_bridge::memory::{AlignedBuffer, AsMemoryAllocator, HierarchicalAllocator, MemoryAllocator, MemoryManager};
use executorch_bridge::sys::{ModuleLoadMode, ProgramHeaderStatus, ProgramVerification, ScalarType, Tag};
use executorch_bridge::{
    platform, DataLoader, EValue, EValueView, ETDumpGen, FileDataLoader, MethodMeta, Program, Tensor, TensorImpl,
    TensorView, Value,
};

/// Input file: `{"inputs": [{"tensor": {...}}, {"int": 3}, ...]}`.
#[derive(Debug, Deserialize)]
struct InputFile {
    inputs: Vec<InputSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InputSpec {
    Tensor(TensorSpec),
    Int(i64),
    Double(f64),
    Bool(bool),
}

#[derive(Debug, Deserialize)]
struct TensorSpec {
    dtype: ScalarType,
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Owned element storage for one input tensor.
enum TensorBuffer {
    Byte(Vec<u8>),
    Char(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl TensorBuffer {
    fn from_spec(spec: &TensorSpec) -> Result<Self> {
        let data = &spec.data;
        Ok(match spec.dtype {
            ScalarType::Byte => Self::Byte(data.iter().map(|&v| v as u8).collect()),
            ScalarType::Char => Self::Char(data.iter().map(|&v| v as i8).collect()),
            ScalarType::Short => Self::Short(data.iter().map(|&v| v as i16).collect()),
            ScalarType::Int => Self::Int(data.iter().map(|&v| v as i32).collect()),
            ScalarType::Long => Self::Long(data.iter().map(|&v| v as i64).collect()),
            ScalarType::Float => Self::Float(data.iter().map(|&v| v as f32).collect()),
            ScalarType::Double => Self::Double(data.clone()),
            other => bail!("Unsupported input dtype: {:?}", other),
        })
    }

    fn tensor_impl(&mut self, shape: &[usize]) -> executorch_bridge::Result<TensorImpl<'_>> {
        match self {
            Self::Byte(v) => TensorImpl::from_slice(shape, v),
            Self::Char(v) => TensorImpl::from_slice(shape, v),
            Self::Short(v) => TensorImpl::from_slice(shape, v),
            Self::Int(v) => TensorImpl::from_slice(shape, v),
            Self::Long(v) => TensorImpl::from_slice(shape, v),
            Self::Float(v) => TensorImpl::from_slice(shape, v),
            Self::Double(v) => TensorImpl::from_slice(shape, v),
        }
    }
}

fn open_loader(path: &Path, mode: ModuleLoadMode) -> executorch_bridge::Result<Box<dyn DataLoader>> {
    #[cfg(unix)]
    {
        use executorch_bridge::sys::MmapDataLoaderMlockConfig as Mlock;
        use executorch_bridge::MmapDataLoader;

        let mlock = match mode {
            ModuleLoadMode::File => return Ok(Box::new(FileDataLoader::from_path(path, None)?)),
            ModuleLoadMode::Mmap => Mlock::NoMlock,
            ModuleLoadMode::MmapUseMlock => Mlock::UseMlock,
            ModuleLoadMode::MmapUseMlockIgnoreErrors => Mlock::UseMlockIgnoreErrors,
        };
        Ok(Box::new(MmapDataLoader::from_path(path, mlock)?))
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
        Ok(Box::new(FileDataLoader::from_path(path, None)?))
    }
}

fn tensor_to_json(tensor: TensorView<'_>) -> Result<Json> {
    let data: Vec<Json> = match tensor.scalar_type() {
        ScalarType::Byte => tensor.as_array::<u8>()?.iter().map(|&v| json!(v)).collect(),
        ScalarType::Char => tensor.as_array::<i8>()?.iter().map(|&v| json!(v)).collect(),
        ScalarType::Short => tensor.as_array::<i16>()?.iter().map(|&v| json!(v)).collect(),
        ScalarType::Int => tensor.as_array::<i32>()?.iter().map(|&v| json!(v)).collect(),
        ScalarType::Long => tensor.as_array::<i64>()?.iter().map(|&v| json!(v)).collect(),
        ScalarType::Float => tensor.as_array::<f32>()?.iter().map(|&v| json!(v)).collect(),
        ScalarType::Double => tensor.as_array::<f64>()?.iter().map(|&v| json!(v)).collect(),
        other => bail!("Unsupported output dtype: {:?}", other),
    };
    Ok(json!({
        "dtype": tensor.scalar_type(),
        "shape": tensor.sizes(),
        "data": data,
    }))
}

fn value_to_json(value: EValueView<'_>) -> Result<Json> {
    Ok(match value.value() {
        Value::None => Json::Null,
        Value::Int(v) => json!({ "int": v }),
        Value::Double(v) => json!({ "double": v }),
        Value::Bool(v) => json!({ "bool": v }),
        Value::String(bytes) => json!({ "string": String::from_utf8_lossy(bytes) }),
        Value::Tensor(t) => json!({ "tensor": tensor_to_json(t)? }),
        Value::ListInt(v) => json!({ "int_list": v }),
        Value::ListDouble(v) => json!({ "double_list": v }),
        Value::ListBool(v) => json!({ "bool_list": v }),
        Value::ListTensor(ts) => json!({
            "tensor_list": ts.into_iter().map(tensor_to_json).collect::<Result<Vec<_>>>()?
        }),
        Value::ListOptionalTensor(ts) => json!({
            "optional_tensor_list": ts
                .into_iter()
                .map(|t| t.map_or(Ok(Json::Null), tensor_to_json))
                .collect::<Result<Vec<_>>>()?
        }),
        Value::ListScalar => json!({ "scalar_list": null }),
    })
}

fn method_to_json(meta: &MethodMeta<'_>) -> Result<Json> {
    let tensor_meta = |tag: Tag, info: Option<executorch_bridge::TensorInfo<'_>>| match info {
        Some(info) => json!({
            "tag": tag,
            "name": info.name(),
            "dtype": info.scalar_type(),
            "sizes": info.sizes(),
            "dim_order": info.dim_order(),
            "nbytes": info.nbytes(),
            "memory_planned": info.is_memory_planned(),
        }),
        None => json!({ "tag": tag }),
    };
    let mut inputs = Vec::new();
    for i in 0..meta.num_inputs() {
        let tag = meta.input_tag(i)?;
        let info = (tag == Tag::Tensor).then(|| meta.input_tensor_meta(i)).transpose()?;
        inputs.push(tensor_meta(tag, info));
    }
    let mut outputs = Vec::new();
    for i in 0..meta.num_outputs() {
        let tag = meta.output_tag(i)?;
        let info = (tag == Tag::Tensor).then(|| meta.output_tensor_meta(i)).transpose()?;
        outputs.push(tensor_meta(tag, info));
    }
    let planned = (0..meta.num_memory_planned_buffers())
        .map(|i| meta.memory_planned_buffer_size(i))
        .collect::<executorch_bridge::Result<Vec<_>>>()?;
    let backends = (0..meta.num_backends())
        .map(|i| meta.get_backend_name(i))
        .collect::<executorch_bridge::Result<Vec<_>>>()?;
    Ok(json!({
        "name": meta.name(),
        "instructions": meta.num_instructions(),
        "inputs": inputs,
        "outputs": outputs,
        "memory_planned_buffers": planned,
        "backends": backends,
    }))
}

fn print_json(value: &Json, format: &str) -> Result<()> {
    if format == "pretty" {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = match &cli.command {
        Commands::Run { config, .. } => config.clone(),
        _ => None,
    };
    let config = match config_path {
        Some(path) => {
            Config::from_yaml_file(&path).with_context(|| format!("Failed to load config: {}", path.display()))?
        }
        None => Config::default(),
    };

    // Initialize logging
    let level: Level = match &cli.log_level {
        Some(level) => level.parse().with_context(|| format!("Unknown log level: {}", level))?,
        None => config.logging.tracing_level()?,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();
    platform::init();

    match cli.command {
        Commands::Check { program } => {
            let bytes = fs::read(&program).with_context(|| format!("Failed to read program: {}", program.display()))?;
            let status = Program::check_header(&bytes);
            println!("{}: {:?}", program.display(), status);
            if status != ProgramHeaderStatus::CompatibleVersion {
                std::process::exit(1);
            }
        }

        Commands::Info { program, format } => {
            let loader = FileDataLoader::from_path(&program, None)?;
            let loaded = Program::load(&loader, ProgramVerification::InternalConsistency)?;
            info!("Loaded {} ({} bytes)", program.display(), loader.size()?);
            let methods = loaded
                .method_names()?
                .into_iter()
                .map(|name| -> Result<Json> { method_to_json(&loaded.method_meta(name)?) })
                .collect::<Result<Vec<_>>>()?;
            print_json(&json!({ "program": program, "methods": methods }), &format)?;
        }

        Commands::Run {
            program,
            method,
            input,
            format,
            etdump,
            ..
        } => {
            let program_path = program
                .or_else(|| config.program.path.clone())
                .context("No program given (use --program or program.path in the config)")?;

            // Inputs first: the method borrows them until it is dropped.
            info!("Loading input: {}", input.display());
            let input_file: InputFile = serde_json::from_str(
                &fs::read_to_string(&input).with_context(|| format!("Failed to read input: {}", input.display()))?,
            )
            .context("Input must be {\"inputs\": [...]}")?;
            let mut buffers = input_file
                .inputs
                .iter()
                .map(|spec| match spec {
                    InputSpec::Tensor(t) => TensorBuffer::from_spec(t).map(|b| Some((b, t.shape.clone()))),
                    _ => Ok(None),
                })
                .collect::<Result<Vec<_>>>()?;
            let mut impls = buffers
                .iter_mut()
                .map(|b| b.as_mut().map(|(buffer, shape)| buffer.tensor_impl(shape)).transpose())
                .collect::<executorch_bridge::Result<Vec<_>>>()?;
            let tensors: Vec<Option<Tensor>> = impls.iter_mut().map(|i| i.as_mut().map(Tensor::new)).collect();
            let values: Vec<EValue> = input_file
                .inputs
                .iter()
                .zip(&tensors)
                .map(|(spec, tensor)| match (spec, tensor) {
                    (_, Some(tensor)) => EValue::from_tensor(tensor),
                    (InputSpec::Int(v), None) => EValue::from_i64(*v),
                    (InputSpec::Double(v), None) => EValue::from_f64(*v),
                    (InputSpec::Bool(v), None) => EValue::from_bool(*v),
                    (InputSpec::Tensor(_), None) => EValue::none(),
                })
                .collect();

            info!("Loading program: {}", program_path.display());
            let loader = open_loader(&program_path, config.program.load_mode)?;
            let loaded = Program::load(loader.as_ref(), config.program.verification)?;
            let meta = loaded.method_meta(&method)?;

            let mut planned_buffers = (0..meta.num_memory_planned_buffers())
                .map(|i| -> Result<AlignedBuffer> { Ok(AlignedBuffer::new(meta.memory_planned_buffer_size(i)?)?) })
                .collect::<Result<Vec<_>>>()?;
            let mut planned = HierarchicalAllocator::new(planned_buffers.iter_mut().map(|b| b.as_mut_slice()).collect());
            let mut method_arena = AlignedBuffer::new(config.memory.method_allocator_bytes)?;
            let mut method_allocator = MemoryAllocator::new(method_arena.as_mut_slice());
            let mut temp_arena = match config.memory.temp_allocator_bytes {
                0 => None,
                n => Some(AlignedBuffer::new(n)?),
            };
            let mut temp_allocator = temp_arena.as_mut().map(|b| MemoryAllocator::new(b.as_mut_slice()));
            let mut memory_manager = MemoryManager::new(
                &mut method_allocator,
                Some(&mut planned),
                temp_allocator.as_mut().map(|t| t as &mut dyn AsMemoryAllocator),
            );
            let mut tracer = etdump.as_ref().map(|_| ETDumpGen::new());

            let mut loaded_method = loaded.load_method(&method, &mut memory_manager, tracer.as_mut())?;
            if values.len() != loaded_method.inputs_size() {
                bail!(
                    "Method '{}' takes {} inputs, got {}",
                    method,
                    loaded_method.inputs_size(),
                    values.len()
                );
            }
            for (i, value) in values.iter().enumerate() {
                loaded_method
                    .set_input(value, i)
                    .with_context(|| format!("Failed to set input {}", i))?;
            }

            info!("Running method '{}'...", method);
            let start = Instant::now();
            loaded_method.execute()?;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            info!("Execution complete: {} outputs in {:.2}ms", loaded_method.outputs_size(), latency_ms);

            let outputs = (0..loaded_method.outputs_size())
                .map(|i| -> Result<Json> { value_to_json(loaded_method.get_output(i)?) })
                .collect::<Result<Vec<_>>>()?;
            print_json(
                &json!({
                    "method": method,
                    "num_outputs": outputs.len(),
                    "latency_ms": latency_ms,
                    "outputs": outputs,
                }),
                &format,
            )?;

            drop(loaded_method);
            if let (Some(path), Some(tracer)) = (etdump, tracer.as_mut()) {
                fs::write(&path, tracer.get_etdump_data())
                    .with_context(|| format!("Failed to write etdump: {}", path.display()))?;
                info!("Wrote etdump: {}", path.display());
            }
        }
    }

    Ok(())
}
