//! sysbridge - run statically linked C programs compiled to WASM
//!
//! The guest is built against a libc whose syscalls are left as imports.
//! This crate answers them: it owns the guest's memory, emulates the small
//! set of Linux syscalls a single-threaded program needs, and forwards file
//! and console I/O to a host provider.
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): guests run through the WebAssembly
//!   API, host I/O goes to the page's `wlibc` object
//! - Native: the same bridge over a `Vec`-backed memory and the in-memory
//!   host, for tests and tooling

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[doc(hidden)]
pub fn log(s: &str) {
    web_sys::console::log_1(&s.into());
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}

pub mod bridge;

/// Initialize panic hook for better error messages in browser console
#[cfg(target_arch = "wasm32")]
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    init_panic_hook();
}

/// Run a guest module and return its exit code.
///
/// `args` is a single string, split like a shell command line.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub async fn run(bundle: Vec<u8>, program: String, args: String, trace: bool) -> i32 {
    let config = match bridge::BridgeConfigBuilder::new()
        .program(&program)
        .args(&args)
        .trace(trace)
        .build()
    {
        Ok(config) => config,
        Err(err) => {
            console_log!("sysbridge: {}", err);
            return 1;
        }
    };
    bridge::executor::run_bundle(&bundle, &config).await
}

/// Run a guest module with a JSON configuration (see [`bridge::BridgeConfig`])
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(js_name = runWithConfig)]
pub async fn run_with_config(bundle: Vec<u8>, config_json: String) -> i32 {
    match bridge::BridgeConfig::from_json(&config_json) {
        Ok(config) => bridge::executor::run_bundle(&bundle, &config).await,
        Err(err) => {
            console_log!("sysbridge: {}", err);
            1
        }
    }
}
