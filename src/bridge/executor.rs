//! Browser executor
//!
//! Runs a guest with the browser's WebAssembly API:
//! 1. Inspect the module and check every import resolves
//! 2. Create the linear memory the guest imports
//! 3. Build the `env` import object (syscall slots, print, trace, intrinsics)
//! 4. Instantiate, place argv, call `main(argc, argv)`
//! 5. Hand the exit code to the host
//!
//! Import closures share one [`GuestState`] through `Rc<RefCell<..>>`. No
//! borrow is held while control is inside the guest: the guest's `malloc`
//! and `main` both issue syscalls that borrow the state again.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{ArrayBuffer, Function, Object, Reflect, Uint8Array, WebAssembly};
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::WasmClosure;
use wasm_bindgen::prelude::*;

use super::abi::{IMPORT_NAMESPACE, exports, imports};
use super::arena::{LinearMemory, PAGE_SIZE, check_bounds};
use super::bootstrap::{ArgvSink, argv_for, exit_code_for, place_argv};
use super::config::BridgeConfig;
use super::error::{BridgeError, BridgeResult};
use super::host::HostIo;
use super::module::ModuleInfo;
use super::runtime::Bridge;
use super::softfloat::{INTRINSICS, Intrinsic};

/// Browsers refuse to grow a memory past 2 GiB
const MAX_PAGES: u32 = 32768;

/// Linear memory owned by the browser.
///
/// The backing `ArrayBuffer` is replaced every time the memory grows, so
/// every access takes a fresh view.
pub struct JsMemory {
    memory: WebAssembly::Memory,
}

impl JsMemory {
    pub fn new(pages: u32) -> BridgeResult<Self> {
        let descriptor = Object::new();
        Reflect::set(&descriptor, &JsValue::from_str("initial"), &JsValue::from(pages)).map_err(|_| {
            BridgeError::InstantiationFailed {
                reason: "failed to build memory descriptor".to_string(),
            }
        })?;
        let memory = WebAssembly::Memory::new(&descriptor).map_err(|e| {
            BridgeError::InstantiationFailed {
                reason: describe(&e, "memory creation failed"),
            }
        })?;
        Ok(Self { memory })
    }

    pub fn raw(&self) -> &WebAssembly::Memory {
        &self.memory
    }

    fn view(&self) -> Uint8Array {
        Uint8Array::new(&self.memory.buffer())
    }
}

impl LinearMemory for JsMemory {
    fn len(&self) -> usize {
        let buffer: ArrayBuffer = self.memory.buffer().unchecked_into();
        buffer.byte_length() as usize
    }

    fn grow(&mut self, pages: u32) -> BridgeResult<usize> {
        let len = self.len();
        let current = (len / PAGE_SIZE as usize) as u32;
        if current.saturating_add(pages) > MAX_PAGES {
            return Err(BridgeError::OutOfMemory {
                requested_pages: pages,
                current_len: len as u32,
            });
        }
        self.memory.grow(pages);
        Ok(len)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> BridgeResult<()> {
        check_bounds(self.len(), offset, buf.len())?;
        self.view()
            .subarray(offset, offset + buf.len() as u32)
            .copy_to(buf);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> BridgeResult<()> {
        check_bounds(self.len(), offset, data.len())?;
        self.view()
            .subarray(offset, offset + data.len() as u32)
            .copy_from(data);
        Ok(())
    }
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = wlibc, js_name = open)]
    fn wlibc_open(path: &str) -> i32;

    #[wasm_bindgen(js_namespace = wlibc, js_name = read)]
    fn wlibc_read(fd: i32, max_len: u32) -> JsValue;

    #[wasm_bindgen(js_namespace = wlibc, js_name = write)]
    fn wlibc_write(fd: i32, data: &ArrayBuffer) -> i32;

    #[wasm_bindgen(js_namespace = wlibc, js_name = close)]
    fn wlibc_close(fd: i32) -> i32;

    #[wasm_bindgen(js_namespace = wlibc, js_name = exit)]
    fn wlibc_exit(code: i32);

    #[wasm_bindgen(js_namespace = wlibc, js_name = print)]
    fn wlibc_print(text: &str);

    #[wasm_bindgen(js_namespace = wlibc, js_name = log)]
    fn wlibc_log(text: &str);
}

/// Host provider backed by the page's global `wlibc` object
#[derive(Debug, Default, Clone, Copy)]
pub struct WlibcHost;

impl HostIo for WlibcHost {
    fn open(&mut self, path: &str) -> i32 {
        wlibc_open(path)
    }

    /// `wlibc.read` answers with bytes, or a negative number on failure
    fn read(&mut self, fd: i32, max_len: usize) -> Result<Vec<u8>, i32> {
        let value = wlibc_read(fd, max_len as u32);
        if let Some(code) = value.as_f64() {
            return Err(code as i32);
        }
        if value.is_null() || value.is_undefined() {
            return Ok(Vec::new());
        }
        Ok(Uint8Array::new(&value).to_vec())
    }

    fn write(&mut self, fd: i32, data: &[u8]) -> i32 {
        wlibc_write(fd, &Uint8Array::from(data).buffer())
    }

    fn close(&mut self, fd: i32) -> i32 {
        wlibc_close(fd)
    }

    fn exit(&mut self, code: i32) {
        wlibc_exit(code)
    }

    fn print(&mut self, text: &str) {
        wlibc_print(text)
    }

    fn log(&mut self, text: &str) {
        wlibc_log(text)
    }
}

pub type GuestBridge = Bridge<JsMemory, WlibcHost>;

/// State shared by the import closures
pub struct GuestState {
    pub bridge: GuestBridge,
    /// Fatal error raised inside an import; the guest is unwound by a JS
    /// exception and this is what gets reported
    pub fault: Option<BridgeError>,
}

pub type SharedState = Rc<RefCell<GuestState>>;

fn describe(value: &JsValue, fallback: &str) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|e| String::from(e.message()))
        })
        .unwrap_or_else(|| fallback.to_string())
}

fn import_error(name: &str) -> BridgeError {
    BridgeError::InstantiationFailed {
        reason: format!("failed to set {} import", name),
    }
}

/// Resolve an import result to the value handed back to the guest.
///
/// A fatal error is parked in `fault` and the guest unwound with a JS
/// exception. Callers must not hold a borrow of `state` here.
fn settle(state: &SharedState, result: BridgeResult<i32>) -> i32 {
    match result {
        Ok(value) => value,
        Err(err) => {
            let message = err.to_string();
            state.borrow_mut().fault = Some(err);
            wasm_bindgen::throw_str(&message)
        }
    }
}

fn install<F: ?Sized + WasmClosure>(env: &Object, name: &str, closure: Closure<F>) -> BridgeResult<()> {
    Reflect::set(env, &JsValue::from_str(name), closure.as_ref()).map_err(|_| import_error(name))?;
    closure.forget();
    Ok(())
}

macro_rules! word {
    ($arg:ident) => {
        i32
    };
}

/// `__syscallN(nr, a0, .., aN-1)`
macro_rules! install_syscall_slot {
    ($env:expr, $state:expr, $arity:expr $(, $arg:ident)*) => {{
        let state = Rc::clone($state);
        let closure = Closure::wrap(Box::new(move |nr: i32 $(, $arg: i32)*| -> i32 {
            let result = state.borrow_mut().bridge.dispatch(nr as u32, &[$($arg),*]);
            settle(&state, result)
        }) as Box<dyn Fn(i32 $(, word!($arg))*) -> i32>);
        install($env, &imports::syscall_slot($arity), closure)
    }};
}

fn create_imports(state: &SharedState) -> BridgeResult<Object> {
    let import_object = Object::new();
    let env = Object::new();

    let memory = state.borrow().bridge.arena().memory().raw().clone();
    Reflect::set(&env, &JsValue::from_str(imports::MEMORY), &memory)
        .map_err(|_| import_error(imports::MEMORY))?;

    install_syscall_slot!(&env, state, 0)?;
    install_syscall_slot!(&env, state, 1, a0)?;
    install_syscall_slot!(&env, state, 2, a0, a1)?;
    install_syscall_slot!(&env, state, 3, a0, a1, a2)?;
    install_syscall_slot!(&env, state, 4, a0, a1, a2, a3)?;
    install_syscall_slot!(&env, state, 5, a0, a1, a2, a3, a4)?;
    install_syscall_slot!(&env, state, 6, a0, a1, a2, a3, a4, a5)?;
    install_syscall_slot!(&env, state, 7, a0, a1, a2, a3, a4, a5, a6)?;

    let packed = Rc::clone(state);
    install(
        &env,
        imports::SYSCALL_PACKED,
        Closure::wrap(Box::new(move |nr: i32, args_ptr: i32| -> i32 {
            let result = packed
                .borrow_mut()
                .bridge
                .dispatch_packed(nr as u32, args_ptr as u32);
            settle(&packed, result)
        }) as Box<dyn Fn(i32, i32) -> i32>),
    )?;

    let print = Rc::clone(state);
    install(
        &env,
        imports::PRINT,
        Closure::wrap(Box::new(move |ptr: i32| {
            let result = print.borrow_mut().bridge.print_guest(ptr as u32);
            if let Err(err) = result {
                print
                    .borrow_mut()
                    .bridge
                    .host_mut()
                    .log(&format!("print: {}", err));
            }
        }) as Box<dyn Fn(i32)>),
    )?;

    let trace = Rc::clone(state);
    install(
        &env,
        imports::TRACE,
        Closure::wrap(Box::new(move |on: i32| {
            trace.borrow_mut().bridge.set_trace(on != 0);
        }) as Box<dyn Fn(i32)>),
    )?;

    install(
        &env,
        imports::START,
        Closure::wrap(Box::new(|| {}) as Box<dyn Fn()>),
    )?;

    for (name, intrinsic) in INTRINSICS {
        match *intrinsic {
            Intrinsic::Binary(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(f64, f64) -> f64>))?
            }
            Intrinsic::Unary(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(f64) -> f64>))?
            }
            Intrinsic::Compare(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(f64, f64) -> i32>))?
            }
            Intrinsic::ToI32(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(f64) -> i32>))?
            }
            Intrinsic::ToI64(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(f64) -> i64>))?
            }
            Intrinsic::FromI32(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(i32) -> f64>))?
            }
            Intrinsic::FromI64(op) => {
                install(&env, name, Closure::wrap(Box::new(op) as Box<dyn Fn(i64) -> f64>))?
            }
        }
    }

    Reflect::set(&import_object, &JsValue::from_str(IMPORT_NAMESPACE), &env)
        .map_err(|_| import_error(IMPORT_NAMESPACE))?;
    Ok(import_object)
}

/// Places argv with the guest's exported `malloc`
struct GuestMalloc<'a> {
    malloc: &'a Function,
    state: &'a SharedState,
}

impl ArgvSink for GuestMalloc<'_> {
    fn allocate(&mut self, size: u32) -> BridgeResult<u32> {
        let ptr = self
            .malloc
            .call1(&JsValue::NULL, &JsValue::from(size))
            .map_err(|e| BridgeError::Aborted {
                reason: describe(&e, "malloc failed"),
            })?;
        match ptr.as_f64() {
            Some(ptr) if ptr != 0.0 => Ok(ptr as u32),
            _ => Err(BridgeError::Aborted {
                reason: format!("malloc({}) returned null", size),
            }),
        }
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> BridgeResult<()> {
        self.state
            .borrow_mut()
            .bridge
            .arena_mut()
            .memory_mut()
            .write(offset, bytes)
    }
}

async fn compile(bundle: &[u8]) -> BridgeResult<WebAssembly::Module> {
    let array = Uint8Array::from(bundle);
    let result = wasm_bindgen_futures::JsFuture::from(WebAssembly::compile(&array.buffer()))
        .await
        .map_err(|e| BridgeError::InstantiationFailed {
            reason: describe(&e, "compilation failed"),
        })?;

    result
        .dyn_into::<WebAssembly::Module>()
        .map_err(|_| BridgeError::InstantiationFailed {
            reason: "failed to cast to Module".to_string(),
        })
}

async fn instantiate(module: &WebAssembly::Module, imports: &Object) -> BridgeResult<WebAssembly::Instance> {
    let promise = WebAssembly::instantiate_module(module, imports);
    let result = wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(|e| BridgeError::InstantiationFailed {
            reason: describe(&e, "instantiation failed"),
        })?;

    result
        .dyn_into::<WebAssembly::Instance>()
        .map_err(|_| BridgeError::InstantiationFailed {
            reason: "failed to cast to Instance".to_string(),
        })
}

fn export_function(exports: &Object, name: &'static str) -> Option<Function> {
    Reflect::get(exports, &JsValue::from_str(name))
        .ok()
        .and_then(|f| f.dyn_into::<Function>().ok())
}

async fn execute(state: &SharedState, bundle: &[u8], config: &BridgeConfig) -> BridgeResult<i32> {
    let module = compile(bundle).await?;
    let import_object = create_imports(state)?;
    let instance = instantiate(&module, &import_object).await?;
    let guest_exports = instance.exports();

    let main = export_function(&guest_exports, exports::MAIN)
        .ok_or(BridgeError::MissingExport { name: exports::MAIN })?;

    let argv = argv_for(&config.program, &config.args)?;
    let table = match export_function(&guest_exports, exports::MALLOC) {
        Some(malloc) => place_argv(
            &mut GuestMalloc {
                malloc: &malloc,
                state,
            },
            &argv,
        )?,
        None => place_argv(state.borrow_mut().bridge.arena_mut(), &argv)?,
    };

    let result = main.call2(
        &JsValue::NULL,
        &JsValue::from(table.argc()),
        &JsValue::from(table.pointer_table),
    );

    let mut guest = state.borrow_mut();
    if let Some(fault) = guest.fault.take() {
        return Err(fault);
    }
    match result {
        Ok(value) => Ok(value.as_f64().unwrap_or(0.0) as i32),
        Err(e) => match guest.bridge.exit_code() {
            Some(code) => Err(BridgeError::Exited { code }),
            None => Err(BridgeError::Aborted {
                reason: describe(&e, "guest trapped"),
            }),
        },
    }
}

/// Run `bundle` to completion and return its exit code.
///
/// The code is also reported through `wlibc.exit`; any failure is logged
/// and reported as exit code 1.
pub async fn run_bundle(bundle: &[u8], config: &BridgeConfig) -> i32 {
    let info = match ModuleInfo::parse(bundle).and_then(|info| {
        let missing = info.missing_imports();
        if missing.is_empty() {
            Ok(info)
        } else {
            Err(BridgeError::InstantiationFailed {
                reason: format!("unresolved imports: {}", missing.join(", ")),
            })
        }
    }) {
        Ok(info) => info,
        Err(err) => return fail(err),
    };

    let pages = config
        .initial_pages
        .max(info.memory_min_pages().unwrap_or(0));
    let memory = match JsMemory::new(pages) {
        Ok(memory) => memory,
        Err(err) => return fail(err),
    };

    let state = Rc::new(RefCell::new(GuestState {
        bridge: Bridge::with_config(memory, WlibcHost, config),
        fault: None,
    }));

    let result = execute(&state, bundle, config).await;

    let mut guest = state.borrow_mut();
    let host = guest.bridge.host_mut();
    let code = exit_code_for(result, &mut *host);
    host.exit(code);
    code
}

fn fail(err: BridgeError) -> i32 {
    let mut host = WlibcHost;
    let code = exit_code_for(Err(err), &mut host);
    host.exit(code);
    code
}
