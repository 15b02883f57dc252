//! Run configuration
//!
//! Everything a run needs besides the module bytes: the process name, the raw
//! argument string, the initial trace state and the arena geometry. Built in
//! code with [`BridgeConfigBuilder`] or parsed from JSON by the browser
//! runner.

use super::arena::{DEFAULT_HEAP_START, DEFAULT_INITIAL_PAGES, PAGE_SIZE};
use super::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// Default `argv[0]`
pub const DEFAULT_PROGRAM: &str = "wasm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Process name, becomes `argv[0]`
    pub program: String,
    /// Argument string, shell-tokenized into `argv[1..]`
    pub args: String,
    /// Initial trace flag
    pub trace: bool,
    /// Pages the linear memory is created with
    pub initial_pages: u32,
    /// Stack/heap boundary
    pub heap_start: u32,
}

impl BridgeConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| BridgeError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the arena geometry
    pub fn validate(&self) -> BridgeResult<()> {
        if self.initial_pages == 0 {
            return Err(BridgeError::Config {
                reason: "initial_pages must be at least 1".to_string(),
            });
        }
        let initial_len = self.initial_pages as u64 * PAGE_SIZE as u64;
        if self.heap_start as u64 >= initial_len {
            return Err(BridgeError::Config {
                reason: format!(
                    "heap_start {} lies outside the initial {} bytes of memory",
                    self.heap_start, initial_len
                ),
            });
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: String::new(),
            trace: false,
            initial_pages: DEFAULT_INITIAL_PAGES,
            heap_start: DEFAULT_HEAP_START,
        }
    }
}

/// Builder for configuring a run
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
        }
    }

    /// Set the process name
    pub fn program(mut self, program: &str) -> Self {
        self.config.program = program.to_string();
        self
    }

    /// Set the raw argument string
    pub fn args(mut self, args: &str) -> Self {
        self.config.args = args.to_string();
        self
    }

    /// Start with tracing on or off
    pub fn trace(mut self, on: bool) -> Self {
        self.config.trace = on;
        self
    }

    pub fn initial_pages(mut self, pages: u32) -> Self {
        self.config.initial_pages = pages;
        self
    }

    pub fn heap_start(mut self, offset: u32) -> Self {
        self.config.heap_start = offset;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> BridgeResult<BridgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for BridgeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.program, "wasm");
        assert_eq!(config.heap_start, 100_000);
        assert_eq!(config.initial_pages, 2);
        assert!(!config.trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfigBuilder::new()
            .program("prog")
            .args("a b")
            .trace(true)
            .build()
            .unwrap();
        assert_eq!(config.program, "prog");
        assert_eq!(config.args, "a b");
        assert!(config.trace);
    }

    #[test]
    fn test_from_json_partial() {
        let config = BridgeConfig::from_json(r#"{"program": "cat", "args": "/etc/motd"}"#).unwrap();
        assert_eq!(config.program, "cat");
        assert_eq!(config.args, "/etc/motd");
        assert_eq!(config.initial_pages, 2);
    }

    #[test]
    fn test_from_json_rejects_bad_geometry() {
        let err = BridgeConfig::from_json(r#"{"initial_pages": 1, "heap_start": 70000}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(BridgeConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builder_rejects_zero_pages() {
        assert!(BridgeConfigBuilder::new().initial_pages(0).build().is_err());
    }
}
