//! Bridge execution context
//!
//! One [`Bridge`] per guest process. It owns the arena, the host provider
//! and the tracer; syscall semantics, dispatch and bootstrap are all
//! methods on it, so every log line goes through the same trace flag.

use super::abi::read_cstring;
use super::arena::{Arena, LinearMemory, VecMemory};
use super::config::BridgeConfig;
use super::error::BridgeResult;
use super::host::HostIo;
use super::trace::{TraceCategory, Tracer};

/// Execution context for one guest process
pub struct Bridge<M, H> {
    pub(crate) arena: Arena<M>,
    pub(crate) host: H,
    pub(crate) tracer: Tracer,
    exit_code: Option<i32>,
}

impl<M: LinearMemory, H: HostIo> Bridge<M, H> {
    /// Create a bridge over an existing arena
    pub fn new(arena: Arena<M>, host: H, trace: bool) -> Self {
        Self {
            arena,
            host,
            tracer: Tracer::new(trace),
            exit_code: None,
        }
    }

    /// Create a bridge over `memory` with the layout from `config`
    pub fn with_config(memory: M, host: H, config: &BridgeConfig) -> Self {
        Self::new(Arena::new(memory, config.heap_start), host, config.trace)
    }

    pub fn arena(&self) -> &Arena<M> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena<M> {
        &mut self.arena
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Take the host provider back, dropping the arena
    pub fn into_host(self) -> H {
        self.host
    }

    /// The `trace(on)` control call
    pub fn set_trace(&mut self, on: bool) {
        self.tracer.set_enabled(on);
        self.host
            .log(&format!("trace {}", if on { "enabled" } else { "disabled" }));
    }

    pub fn is_tracing(&self) -> bool {
        self.tracer.is_enabled()
    }

    /// Exit code recorded by an `exit`/`exit_group` syscall
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub(crate) fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    /// Record an event and forward it to the host log when it was kept
    pub(crate) fn trace(&mut self, category: TraceCategory, name: &str, detail: Option<String>) {
        if let Some(event) = self.tracer.record(category, name, detail) {
            self.host.log(&event.to_string());
        }
    }

    /// The guest's `print(ptr)` import: print a NUL-terminated string
    pub fn print_guest(&mut self, ptr: u32) -> BridgeResult<()> {
        let bytes = read_cstring(self.arena.memory(), ptr)?;
        self.host.print(&String::from_utf8_lossy(&bytes));
        Ok(())
    }
}

impl<H: HostIo> Bridge<VecMemory, H> {
    /// Native bridge with a `Vec`-backed memory sized from `config`
    pub fn in_memory(host: H, config: &BridgeConfig) -> Self {
        Self::with_config(VecMemory::new(config.initial_pages), host, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::arena::PAGE_SIZE;
    use crate::bridge::host::MemoryHost;

    fn bridge() -> Bridge<VecMemory, MemoryHost> {
        Bridge::in_memory(MemoryHost::new(), &BridgeConfig::default())
    }

    #[test]
    fn test_in_memory_layout() {
        let bridge = bridge();
        assert_eq!(bridge.arena().len(), 2 * PAGE_SIZE as usize);
        assert_eq!(bridge.arena().heap_start(), 100_000);
        assert!(!bridge.is_tracing());
        assert_eq!(bridge.exit_code(), None);
    }

    #[test]
    fn test_print_guest() {
        let mut bridge = bridge();
        bridge.arena_mut().memory_mut().write(500, b"hi there\0").unwrap();
        bridge.print_guest(500).unwrap();
        assert_eq!(bridge.host().printed(), &["hi there".to_string()]);
    }

    #[test]
    fn test_trace_toggle_gates_logging() {
        let mut bridge = bridge();
        bridge.trace(TraceCategory::Syscall, "read", None);
        assert!(bridge.host().logs().is_empty());

        bridge.set_trace(true);
        bridge.trace(TraceCategory::Syscall, "read", None);
        assert_eq!(
            bridge.host().logs(),
            &["trace enabled".to_string(), "[SYSCALL] read".to_string()]
        );
    }
}
