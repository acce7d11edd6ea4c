use crate::runtime;

use super::layout::{place, Shadow};

/// Status code returned by every fallible function.
///
/// On anything but [`Error::Ok`] the output parameter is left untouched.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    Ok = 0x00,
    Internal = 0x01,
    InvalidState = 0x02,
    EndOfMethod = 0x03,
    NotSupported = 0x10,
    NotImplemented = 0x11,
    InvalidArgument = 0x12,
    InvalidType = 0x13,
    OperatorMissing = 0x14,
    NotFound = 0x20,
    MemoryAllocationFailed = 0x21,
    AccessFailed = 0x22,
    InvalidProgram = 0x23,
    InvalidExternalData = 0x24,
    OutOfResources = 0x25,
    DelegateInvalidCompatibility = 0x30,
    DelegateMemoryAllocationFailed = 0x31,
    DelegateInvalidHandle = 0x32,
}

impl From<runtime::Error> for Error {
    fn from(error: runtime::Error) -> Self {
        use runtime::Error as E;
        match error {
            E::Internal => Self::Internal,
            E::InvalidState => Self::InvalidState,
            E::EndOfMethod => Self::EndOfMethod,
            E::NotSupported => Self::NotSupported,
            E::NotImplemented => Self::NotImplemented,
            E::InvalidArgument => Self::InvalidArgument,
            E::InvalidType => Self::InvalidType,
            E::OperatorMissing => Self::OperatorMissing,
            E::NotFound => Self::NotFound,
            E::MemoryAllocationFailed => Self::MemoryAllocationFailed,
            E::AccessFailed => Self::AccessFailed,
            E::InvalidProgram => Self::InvalidProgram,
            E::InvalidExternalData => Self::InvalidExternalData,
            E::OutOfResources => Self::OutOfResources,
            E::DelegateInvalidCompatibility => Self::DelegateInvalidCompatibility,
            E::DelegateMemoryAllocationFailed => Self::DelegateMemoryAllocationFailed,
            E::DelegateInvalidHandle => Self::DelegateInvalidHandle,
        }
    }
}

pub(crate) fn status(result: runtime::Result<()>) -> Error {
    match result {
        Ok(()) => Error::Ok,
        Err(e) => e.into(),
    }
}

/// Writes a plain value to `out` on success.
///
/// # Safety
///
/// `out` must be valid for writes.
pub(crate) unsafe fn write_value<T>(out: *mut T, result: runtime::Result<T>) -> Error {
    match result {
        Ok(value) => {
            out.write(value);
            Error::Ok
        }
        Err(e) => e.into(),
    }
}

/// Constructs the runtime object in the shadow storage `out` on success.
///
/// # Safety
///
/// `out` must be valid for writes and must not hold a live object.
pub(crate) unsafe fn write_result<S: Shadow>(out: *mut S, result: runtime::Result<S::Target>) -> Error {
    match result {
        Ok(value) => {
            place(out, value);
            Error::Ok
        }
        Err(e) => e.into(),
    }
}
