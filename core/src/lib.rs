//! executorch-bridge: a C ABI over an embedded model executor, with safe Rust wrappers.
//!
//! The executor (program format, methods, tagged values, tensors, allocators,
//! data loaders, event tracer and platform layer) is private. Two surfaces
//! expose it:
//!
//! - [`sys`]: `#[repr(C)]` storage blobs whose layout is checked against the
//!   executor types at compile time, plus `extern "C"` functions that construct
//!   into host-owned storage, operate on it, and destroy it. This is what a
//!   non-Rust host links against (the crate is also built as a `staticlib`).
//! - The safe API ([`Program`], [`Method`], [`EValue`], [`Tensor`],
//!   [`MemoryManager`](memory::MemoryManager), [`Module`] and friends), built
//!   only on top of [`sys`]. Every object is dropped exactly once and every
//!   borrow the C surface merely documents is a lifetime.
//!
//! # Features
//!
//! - **data-loader** (default): file and mmap backed data loaders
//! - **module** (default): the [`Module`] facade, which owns a loader, a
//!   program and the memory of every method it loads
//!
//! # Example
//!
//! ```ignore
//! use executorch_bridge::memory::{MallocMemoryAllocator, MemoryManager};
//! use executorch_bridge::sys::ProgramVerification;
//! use executorch_bridge::{EValue, FileDataLoader, Program, Tensor, TensorImpl};
//!
//! let mut data = [1.0f32, 2.0, 3.0];
//! let mut tensor_impl = TensorImpl::from_slice(&[3], &mut data)?;
//! let tensor = Tensor::new(&mut tensor_impl);
//! let input = EValue::from_tensor(&tensor);
//!
//! let loader = FileDataLoader::from_path("model.pte", None)?;
//! let program = Program::load(&loader, ProgramVerification::Minimal)?;
//! let mut allocator = MallocMemoryAllocator::new();
//! let mut memory_manager = MemoryManager::new(&mut allocator, None, None);
//! let mut method = program.load_method("forward", &mut memory_manager, None)?;
//! method.set_input(&input, 0)?;
//! method.execute()?;
//! println!("{:?}", method.get_output(0)?);
//! ```

#[cfg(not(target_pointer_width = "64"))]
compile_error!("executorch-bridge only supports 64-bit targets");

mod runtime;
pub mod sys;

pub mod cli;
#[cfg(feature = "module")]
pub mod config;
pub mod data_loader;
pub mod error;
pub mod evalue;
pub mod event_tracer;
pub mod memory;
#[cfg(feature = "module")]
pub mod module;
pub mod platform;
pub mod program;
pub mod scalar;
pub mod tensor;
mod util;

pub use runtime::format;

// Re-export commonly used types
pub use data_loader::{BufferDataLoader, DataLoader};
#[cfg(feature = "data-loader")]
pub use data_loader::FileDataLoader;
#[cfg(all(feature = "data-loader", unix))]
pub use data_loader::MmapDataLoader;
pub use error::{ErrorCategory, ErrorCode, ExecutorchError, Result};
pub use evalue::{BoxedI64List, BoxedOptionalTensorList, BoxedTensorList, EValue, EValueView, Value};
pub use event_tracer::ETDumpGen;
#[cfg(feature = "module")]
pub use module::{Module, Outputs};
pub use program::{Method, MethodMeta, Program, TensorInfo};
pub use scalar::Scalar;
pub use tensor::{Tensor, TensorImpl, TensorView};
