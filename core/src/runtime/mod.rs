//! Embedded executor runtime.
//!
//! This is the object model the [`sys`](crate::sys) layer projects across the C
//! ABI: program deserialization, method instantiation and execution, tagged
//! values, tensors, data loaders, allocators and the platform abstraction layer.
//! Nothing outside `sys` names these types; a host only ever sees the shadow
//! blobs and handles declared there.

pub(crate) mod array;
pub(crate) mod data_loader;
pub(crate) mod dim_order;
pub(crate) mod error;
pub(crate) mod evalue;
pub(crate) mod event_tracer;
pub mod format;
pub(crate) mod memory;
pub(crate) mod method;
#[cfg(feature = "module")]
pub(crate) mod module;
pub(crate) mod ops;
pub(crate) mod pal;
pub(crate) mod program;
pub(crate) mod tensor;

pub(crate) use error::{Error, Result};
