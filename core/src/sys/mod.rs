//! C ABI of the executor.
//!
//! Every runtime object a host may hold by value has a shadow struct here: an
//! opaque blob of `MaybeUninit` words whose size and alignment are checked at
//! compile time against the runtime type it stands in for. The host owns the
//! storage; `*_new` functions construct into it and `*_destructor` functions
//! end its lifetime, exactly once. Types without a destructor function are
//! trivially destructible.
//!
//! Fallible functions return an [`Error`] and write their result through an
//! output pointer, which is left untouched on failure. Borrowed data crosses
//! as `ArrayRef*`/`Span*` views; data handed to the host as `Vec*` comes with a
//! destructor of its own.

#![allow(non_snake_case, clippy::missing_safety_doc)]

mod array;
mod data_loader;
mod error;
mod evalue;
mod event_tracer;
mod handles;
pub(crate) mod layout;
mod memory;
#[cfg(feature = "module")]
mod module;
mod pal;
mod program;
mod tensor;

pub use array::*;
pub use data_loader::*;
pub use error::Error;
pub use evalue::*;
pub use event_tracer::*;
pub use handles::*;
pub use layout::assert_equal_layout;
pub use memory::*;
#[cfg(feature = "module")]
pub use module::*;
pub use pal::*;
pub use program::*;
pub use tensor::*;

pub use crate::runtime::data_loader::MlockConfig as MmapDataLoaderMlockConfig;
pub use crate::runtime::evalue::Tag;
pub use crate::runtime::format::ProgramHeaderStatus;
#[cfg(feature = "module")]
pub use crate::runtime::module::LoadMode as ModuleLoadMode;
pub use crate::runtime::pal::{LogLevel, PalImpl, TickRatio, Timestamp};
pub use crate::runtime::program::ProgramVerification;
pub use crate::runtime::tensor::{ScalarType, TensorShapeDynamism};
