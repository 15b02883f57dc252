//! Error types for the syscall bridge
//!
//! Guest-visible failures are plain negative integers; everything here is
//! the host-side view, used to decide between "answer the guest" and
//! "tear the process down".

use std::fmt;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while hosting a guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Syscall number absent from the syscall table
    UnknownSyscall { nr: u32 },

    /// Syscall is known but the requested variant cannot be emulated
    Unsupported {
        syscall: &'static str,
        reason: String,
    },

    /// Import slot invoked with more raw arguments than the ABI allows
    InvalidArity { nr: u32, arity: usize },

    /// Memory access out of bounds
    MemoryAccessOutOfBounds {
        address: u32,
        size: u32,
        memory_size: u32,
    },

    /// Linear memory refused to grow
    OutOfMemory { requested_pages: u32, current_len: u32 },

    /// Guest called `exit`/`exit_group`; unwinds the guest stack
    Exited { code: i32 },

    /// Module binary is malformed or invalid
    InvalidModule { reason: String },

    /// Required export is missing
    MissingExport { name: &'static str },

    /// Module instantiation failed
    InstantiationFailed { reason: String },

    /// Guest trapped or threw while running
    Aborted { reason: String },

    /// Argument string could not be tokenized
    InvalidArgs { reason: String },

    /// Run configuration is invalid
    Config { reason: String },
}

impl BridgeError {
    /// The value a guest sees when this error happens inside a syscall,
    /// or `None` when the error must terminate the run.
    pub fn guest_result(&self) -> Option<i32> {
        match self {
            Self::UnknownSyscall { .. } | Self::MemoryAccessOutOfBounds { .. } => Some(-1),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSyscall { nr } => {
                write!(f, "unknown syscall number {}", nr)
            }
            Self::Unsupported { syscall, reason } => {
                write!(f, "unsupported {}: {}", syscall, reason)
            }
            Self::InvalidArity { nr, arity } => {
                write!(f, "syscall {} invoked with {} arguments (max 7)", nr, arity)
            }
            Self::MemoryAccessOutOfBounds {
                address,
                size,
                memory_size,
            } => {
                write!(
                    f,
                    "memory access out of bounds: address {} + size {} > memory size {}",
                    address, size, memory_size
                )
            }
            Self::OutOfMemory {
                requested_pages,
                current_len,
            } => {
                write!(
                    f,
                    "out of memory: cannot grow {} bytes by {} pages",
                    current_len, requested_pages
                )
            }
            Self::Exited { code } => {
                write!(f, "process exited with code {}", code)
            }
            Self::InvalidModule { reason } => {
                write!(f, "invalid WASM module: {}", reason)
            }
            Self::MissingExport { name } => {
                write!(f, "missing required export: '{}'", name)
            }
            Self::InstantiationFailed { reason } => {
                write!(f, "module instantiation failed: {}", reason)
            }
            Self::Aborted { reason } => {
                write!(f, "guest aborted: {}", reason)
            }
            Self::InvalidArgs { reason } => {
                write!(f, "invalid arguments: {}", reason)
            }
            Self::Config { reason } => {
                write!(f, "invalid configuration: {}", reason)
            }
        }
    }
}

impl std::error::Error for BridgeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::UnknownSyscall { nr: 4242 };
        assert_eq!(err.to_string(), "unknown syscall number 4242");

        let err = BridgeError::MissingExport { name: "main" };
        assert_eq!(err.to_string(), "missing required export: 'main'");

        let err = BridgeError::MemoryAccessOutOfBounds {
            address: 1000,
            size: 100,
            memory_size: 1024,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_guest_result() {
        assert_eq!(BridgeError::UnknownSyscall { nr: 1 }.guest_result(), Some(-1));
        assert_eq!(
            BridgeError::Unsupported {
                syscall: "mmap",
                reason: "file-backed".to_string(),
            }
            .guest_result(),
            None
        );
        assert_eq!(BridgeError::Exited { code: 0 }.guest_result(), None);
    }
}
