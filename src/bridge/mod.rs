//! Syscall bridge
//!
//! Hosts a statically linked WASM guest that was compiled against a POSIX
//! libc whose syscalls are left as imports. The bridge owns the guest's
//! linear memory, answers its syscalls against a host I/O provider, and
//! bootstraps `main(argc, argv)`.
//!
//! # ABI
//!
//! ## Guest exports
//!
//! | Export   | Type                             | Description                     |
//! |----------|----------------------------------|---------------------------------|
//! | `main`   | `(argc: i32, argv: i32) -> i32`  | Entry point, returns exit code  |
//! | `malloc` | `(size: i32) -> i32`             | Optional; used to place argv    |
//!
//! ## Imports (`env` namespace)
//!
//! ```text
//! memory                          linear memory, created by the bridge
//! __syscall0(nr) .. __syscall7(nr, a0, .., a6) -> i32
//!                                 fixed-arity syscall slots
//! __syscall(nr, args_ptr) -> i32  packed: seven i32 words at args_ptr
//! print(ptr)                      print a NUL-terminated string
//! trace(on)                       toggle syscall tracing
//! _start()                        no-op
//! __adddf3, __fixdfsi, ...        soft-float intrinsics
//! ```
//!
//! Syscall numbers use the asm-generic table (`write` = 64, `mmap` = 222).
//! A syscall the bridge does not emulate returns `-1` and is logged.
//!
//! ## Memory layout
//!
//! ```text
//! 0 ............ heap_start ........................ len
//! | data + stack |  bump heap (argv, guest brk) -> | mmap pages ->
//! ```
//!
//! The stack grows down from `heap_start`; the heap grows up from it.
//! `brk` and `mmap` only ever grow memory, nothing is reclaimed.
//!
//! ## Argument passing
//!
//! `argv[0]` is the program name, the rest is the shell-tokenized argument
//! string. Each string is NUL-terminated; `argv` points at an array of
//! `argc` 32-bit offsets.

pub mod abi;
pub mod arena;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod module;
pub mod runtime;
pub mod softfloat;
pub mod syscalls;
pub mod table;
pub mod trace;

#[cfg(target_arch = "wasm32")]
pub mod executor;

pub use arena::{Arena, LinearMemory, PAGE_SIZE, VecMemory};
pub use bootstrap::{ArgvSink, ArgvTable, argv_for, exit_code_for, place_argv, split_args};
pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use dispatch::SyscallArgs;
pub use error::{BridgeError, BridgeResult};
pub use host::{HostCall, HostIo, MemoryHost};
pub use module::ModuleInfo;
pub use runtime::Bridge;
pub use table::Syscall;
pub use trace::{TraceCategory, TraceEvent, Tracer};
