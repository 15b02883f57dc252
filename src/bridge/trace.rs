//! Trace control
//!
//! The trace flag lives in the bridge context, not in a global: every
//! component that logs goes through the [`Tracer`] owned by the bridge, and
//! the guest flips it with the `trace(on)` import.
//!
//! Design:
//! - Routine events (syscall entry, memory growth) are kept only while
//!   tracing is on
//! - Anomalies (unknown syscalls, unsupported variants) are always kept,
//!   so they stay distinguishable from supported calls in the log
//! - Ring buffer for recent events (bounded memory)

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Maximum number of events to keep in the trace buffer
pub const TRACE_BUFFER_SIZE: usize = 1000;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCategory {
    /// Syscall entry/exit
    Syscall,
    /// Arena growth and allocation
    Memory,
    /// Bootstrap, entry and exit
    Process,
    /// Unknown or unsupported requests
    Anomaly,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::Syscall => write!(f, "SYSCALL"),
            TraceCategory::Memory => write!(f, "MEMORY"),
            TraceCategory::Process => write!(f, "PROCESS"),
            TraceCategory::Anomaly => write!(f, "ANOMALY"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Position in the event stream
    pub seq: u64,
    pub category: TraceCategory,
    pub name: String,
    pub detail: Option<String>,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "[{}] {} {}", self.category, self.name, detail),
            None => write!(f, "[{}] {}", self.category, self.name),
        }
    }
}

/// Per-syscall call/error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallCounters {
    pub count: u64,
    pub errors: u64,
}

/// Event recorder gated by the trace flag
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    next_seq: u64,
    events: VecDeque<TraceEvent>,
    syscalls: BTreeMap<&'static str, SyscallCounters>,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_seq: 0,
            events: VecDeque::with_capacity(64),
            syscalls: BTreeMap::new(),
        }
    }

    /// Check if tracing is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the trace flag
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn should_trace(&self, category: TraceCategory) -> bool {
        self.enabled || category == TraceCategory::Anomaly
    }

    /// Record an event.
    ///
    /// Returns the event when it was kept, so the caller can forward it to
    /// the host log.
    pub fn record(
        &mut self,
        category: TraceCategory,
        name: impl Into<String>,
        detail: Option<String>,
    ) -> Option<&TraceEvent> {
        if !self.should_trace(category) {
            return None;
        }

        if self.events.len() >= TRACE_BUFFER_SIZE {
            self.events.pop_front();
        }
        self.events.push_back(TraceEvent {
            seq: self.next_seq,
            category,
            name: name.into(),
            detail,
        });
        self.next_seq += 1;
        self.events.back()
    }

    /// Count a completed syscall. Counted whether or not tracing is on.
    pub fn count_syscall(&mut self, name: &'static str, result: i32) {
        let counters = self.syscalls.entry(name).or_default();
        counters.count += 1;
        if result < 0 {
            counters.errors += 1;
        }
    }

    /// Counters for one syscall name
    pub fn syscall_counters(&self, name: &str) -> SyscallCounters {
        self.syscalls.get(name).copied().unwrap_or_default()
    }

    /// Get recent events
    pub fn events(&self) -> &VecDeque<TraceEvent> {
        &self.events
    }

    /// Get events of a specific category
    pub fn events_by_category(&self, category: TraceCategory) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Clear the event buffer
    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tracer_keeps_only_anomalies() {
        let mut tracer = Tracer::new(false);
        assert!(tracer.record(TraceCategory::Syscall, "read", None).is_none());
        assert!(
            tracer
                .record(TraceCategory::Anomaly, "unknown syscall", Some("nr=9999".into()))
                .is_some()
        );
        assert_eq!(tracer.events().len(), 1);
        assert_eq!(tracer.events_by_category(TraceCategory::Anomaly).len(), 1);
    }

    #[test]
    fn test_toggle() {
        let mut tracer = Tracer::default();
        tracer.set_enabled(true);
        assert!(tracer.is_enabled());
        tracer.record(TraceCategory::Memory, "grow", Some("1 page".into()));
        tracer.set_enabled(false);
        tracer.record(TraceCategory::Memory, "grow", Some("1 page".into()));
        assert_eq!(tracer.events().len(), 1);
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let mut tracer = Tracer::new(true);
        for i in 0..TRACE_BUFFER_SIZE + 10 {
            tracer.record(TraceCategory::Syscall, format!("call{}", i), None);
        }
        assert_eq!(tracer.events().len(), TRACE_BUFFER_SIZE);
        assert_eq!(tracer.events().front().map(|e| e.seq), Some(10));
    }

    #[test]
    fn test_event_display() {
        let mut tracer = Tracer::new(true);
        let line = tracer
            .record(TraceCategory::Syscall, "write", Some("fd=1".into()))
            .map(|e| e.to_string());
        assert_eq!(line.as_deref(), Some("[SYSCALL] write fd=1"));
    }

    #[test]
    fn test_syscall_counters() {
        let mut tracer = Tracer::new(false);
        tracer.count_syscall("read", 5);
        tracer.count_syscall("read", -1);
        let counters = tracer.syscall_counters("read");
        assert_eq!(counters.count, 2);
        assert_eq!(counters.errors, 1);
        assert_eq!(tracer.syscall_counters("write"), SyscallCounters::default());
    }
}
