//! Error codes reported by the runtime.

/// Failure kinds of the runtime.
///
/// The discriminants are the status codes the C surface reports, so a value can
/// be forwarded unchanged after unwrapping a [`Result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Error {
    /// An internal error occurred.
    Internal = 0x01,
    /// The executor is in an invalid state for the requested operation.
    InvalidState = 0x02,
    /// There are no more steps of execution to run.
    EndOfMethod = 0x03,

    /// Operation is not supported in the current context.
    NotSupported = 0x10,
    /// Operation is not yet implemented.
    NotImplemented = 0x11,
    /// User provided an invalid argument.
    InvalidArgument = 0x12,
    /// Object is an invalid type for the operation.
    InvalidType = 0x13,
    /// Operator(s) missing in the operator registry.
    OperatorMissing = 0x14,

    /// Requested resource could not be found.
    NotFound = 0x20,
    /// Could not allocate the requested memory.
    MemoryAllocationFailed = 0x21,
    /// Could not access a resource.
    AccessFailed = 0x22,
    /// Error caused by the contents of a program.
    InvalidProgram = 0x23,
    /// Error caused by the contents of external data.
    InvalidExternalData = 0x24,
    /// Does not have enough resources to perform the requested operation.
    OutOfResources = 0x25,

    /// Init stage: backend received an incompatible delegate version.
    DelegateInvalidCompatibility = 0x30,
    /// Init stage: backend failed to allocate memory.
    DelegateMemoryAllocationFailed = 0x31,
    /// Execute stage: the handle is invalid.
    DelegateInvalidHandle = 0x32,
}

/// Value-or-error result of every fallible runtime operation.
pub type Result<T> = core::result::Result<T, Error>;
