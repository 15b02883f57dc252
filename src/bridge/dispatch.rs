//! Syscall dispatch
//!
//! Every import slot (`__syscall0`..`__syscall7` and the packed
//! `__syscall`) funnels into [`Bridge::dispatch`]. Dispatch decodes the
//! number, runs the semantic implementation and turns recoverable errors
//! into the `-1` the guest expects.

use super::abi::{MAX_SYSCALL_ARGS, read_i32_array};
use super::arena::LinearMemory;
use super::error::{BridgeError, BridgeResult};
use super::host::HostIo;
use super::runtime::Bridge;
use super::table::Syscall;
use super::trace::TraceCategory;

/// Raw syscall arguments, zero-padded to the ABI maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyscallArgs {
    words: [i32; MAX_SYSCALL_ARGS],
    arity: usize,
}

impl SyscallArgs {
    /// Returns `None` when more than [`MAX_SYSCALL_ARGS`] words are given
    pub fn new(raw: &[i32]) -> Option<Self> {
        if raw.len() > MAX_SYSCALL_ARGS {
            return None;
        }
        let mut words = [0; MAX_SYSCALL_ARGS];
        words[..raw.len()].copy_from_slice(raw);
        Some(Self {
            words,
            arity: raw.len(),
        })
    }

    /// Argument `i` as a signed word; missing arguments read as 0
    pub fn get(&self, i: usize) -> i32 {
        self.words.get(i).copied().unwrap_or(0)
    }

    /// Argument `i` reinterpreted as a guest pointer
    pub fn ptr(&self, i: usize) -> u32 {
        self.get(i) as u32
    }

    /// Number of arguments the guest actually passed
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.words[..self.arity]
    }
}

impl<M: LinearMemory, H: HostIo> Bridge<M, H> {
    /// Handle one syscall from a `__syscallN` slot.
    ///
    /// `Ok` carries the value returned to the guest. `Err` is fatal: the
    /// guest must be unwound (exit, unsupported mmap, memory exhaustion).
    pub fn dispatch(&mut self, nr: u32, raw: &[i32]) -> BridgeResult<i32> {
        let args = SyscallArgs::new(raw).ok_or(BridgeError::InvalidArity {
            nr,
            arity: raw.len(),
        })?;
        let syscall = Syscall::from_nr(nr);

        if self.tracer.is_enabled() {
            self.trace(
                TraceCategory::Syscall,
                &syscall.to_string(),
                Some(format!("{:?}", args.as_slice())),
            );
        }

        let result = match self.execute(syscall, &args) {
            Ok(value) => value,
            Err(err) => match err.guest_result() {
                Some(value) => {
                    self.trace(
                        TraceCategory::Anomaly,
                        &syscall.to_string(),
                        Some(format!("{} args={:?}", err, args.as_slice())),
                    );
                    value
                }
                None => return Err(err),
            },
        };

        self.tracer.count_syscall(syscall.name(), result);
        Ok(result)
    }

    /// Handle the packed `__syscall(nr, args_ptr)` slot: seven argument
    /// words are read from the arena at `args_ptr`.
    pub fn dispatch_packed(&mut self, nr: u32, args_ptr: u32) -> BridgeResult<i32> {
        match read_i32_array(self.arena.memory(), args_ptr, MAX_SYSCALL_ARGS) {
            Ok(words) => self.dispatch(nr, &words),
            Err(err) => {
                self.trace(
                    TraceCategory::Anomaly,
                    "__syscall",
                    Some(format!("nr={} {}", nr, err)),
                );
                Ok(err.guest_result().unwrap_or(-1))
            }
        }
    }
}
