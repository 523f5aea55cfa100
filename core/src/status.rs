//! gRPC status codes and the status value carried through call terminations.

use std::fmt;

/// Canonical gRPC status codes.
///
/// The numeric values are fixed by the gRPC protocol; [`Code::name`] returns
/// the canonical upper-snake-case spelling used in logs and metric
/// attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Invalid argument was provided.
    InvalidArgument = 3,
    /// Deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Caller lacks permission for the operation.
    PermissionDenied = 7,
    /// A resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// Missing or invalid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Canonical upper-snake-case name of this code.
    ///
    /// This is the textual form recorded under the `grpc.status` metric
    /// attribute, so the exact spelling is load-bearing.
    pub fn name(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Whether this code denotes success.
    pub fn is_ok(self) -> bool {
        self == Code::Ok
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `(code, description)` pair describing how an operation terminated.
///
/// Returned from picks and carried through call and stream terminations.
/// Usable directly as an error type.
#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    /// Create a status with a code and a description.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// The OK status.
    pub fn ok() -> Self {
        Code::Ok.into()
    }

    /// The status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The description, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether this status denotes success.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// A `CANCELLED` status with a description.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// A `DEADLINE_EXCEEDED` status with a description.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// A `NOT_FOUND` status with a description.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// A `PERMISSION_DENIED` status with a description.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// An `INTERNAL` status with a description.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// An `UNAVAILABLE` status with a description.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl From<Code> for Status {
    fn from(code: Code) -> Self {
        Self {
            code,
            message: None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}
