//! Host I/O provider
//!
//! The bridge never implements storage or transport; it relays to a
//! [`HostIo`] implementation. In the browser that is the `wlibc` object the
//! embedder installs, natively it is usually [`MemoryHost`].

use super::abi::fd;
use slab::Slab;
use std::collections::HashMap;
use std::time::Duration;

/// Host-side primitives the syscall semantics are built on
pub trait HostIo {
    /// Open `path`, returning a file descriptor or a negative error
    fn open(&mut self, path: &str) -> i32;

    /// Read up to `max_len` bytes. An empty vector signals end of input,
    /// `Err` carries a negative error code.
    fn read(&mut self, fd: i32, max_len: usize) -> Result<Vec<u8>, i32>;

    /// Write `data`, returning the number of bytes accepted or a negative error
    fn write(&mut self, fd: i32, data: &[u8]) -> i32;

    /// Close `fd`, returning the provider's status
    fn close(&mut self, fd: i32) -> i32;

    /// Terminate the process with `code`
    fn exit(&mut self, code: i32);

    /// Guest-requested diagnostic output
    fn print(&mut self, text: &str);

    /// Bridge diagnostic output
    fn log(&mut self, text: &str);

    /// Wall-clock time since the Unix epoch
    fn now(&self) -> Duration {
        wall_clock()
    }
}

/// Wall-clock time since the Unix epoch
#[cfg(target_arch = "wasm32")]
pub fn wall_clock() -> Duration {
    Duration::from_secs_f64(js_sys::Date::now().max(0.0) / 1000.0)
}

/// Wall-clock time since the Unix epoch
#[cfg(not(target_arch = "wasm32"))]
pub fn wall_clock() -> Duration {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
}

/// One call observed by [`MemoryHost`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Open { path: String },
    Read { fd: i32, max_len: usize },
    Write { fd: i32, data: Vec<u8> },
    Close { fd: i32 },
    Exit { code: i32 },
    Print { text: String },
    Log { text: String },
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    position: usize,
}

/// First descriptor handed out for opened files
const FIRST_FILE_FD: i32 = 3;

/// In-memory host provider.
///
/// Serves preloaded files and stdin, captures stdout/stderr and
/// diagnostics, and keeps a journal of every call in arrival order.
#[derive(Debug, Default)]
pub struct MemoryHost {
    files: HashMap<String, Vec<u8>>,
    handles: Slab<OpenFile>,
    stdin: Vec<u8>,
    stdin_pos: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    printed: Vec<String>,
    logs: Vec<String>,
    exit_code: Option<i32>,
    clock: Option<Duration>,
    journal: Vec<HostCall>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set stdin data
    pub fn with_stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = data.into();
        self
    }

    /// Preload a file
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Pin the wall clock to a fixed instant
    pub fn with_clock(mut self, since_epoch: Duration) -> Self {
        self.clock = Some(since_epoch);
        self
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Get stdout as string (lossy UTF-8)
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lines passed to `print`
    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    /// Lines passed to `log`
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Every call received, oldest first
    pub fn journal(&self) -> &[HostCall] {
        &self.journal
    }

    /// Current contents of a file
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|f| f.as_slice())
    }

    /// Number of files currently open
    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    fn handle_key(fd: i32) -> Option<usize> {
        fd.checked_sub(FIRST_FILE_FD)
            .filter(|k| *k >= 0)
            .map(|k| k as usize)
    }
}

impl HostIo for MemoryHost {
    fn open(&mut self, path: &str) -> i32 {
        self.journal.push(HostCall::Open {
            path: path.to_string(),
        });
        if !self.files.contains_key(path) {
            return -1;
        }
        let key = self.handles.insert(OpenFile {
            path: path.to_string(),
            position: 0,
        });
        key as i32 + FIRST_FILE_FD
    }

    fn read(&mut self, fd_num: i32, max_len: usize) -> Result<Vec<u8>, i32> {
        self.journal.push(HostCall::Read {
            fd: fd_num,
            max_len,
        });
        if fd_num == fd::STDIN {
            let end = (self.stdin_pos + max_len).min(self.stdin.len());
            let data = self.stdin[self.stdin_pos..end].to_vec();
            self.stdin_pos = end;
            return Ok(data);
        }

        let key = Self::handle_key(fd_num).ok_or(-1)?;
        let handle = self.handles.get_mut(key).ok_or(-1)?;
        let contents = self.files.get(&handle.path).ok_or(-1)?;
        let start = handle.position.min(contents.len());
        let end = (start + max_len).min(contents.len());
        handle.position = end;
        Ok(contents[start..end].to_vec())
    }

    fn write(&mut self, fd_num: i32, data: &[u8]) -> i32 {
        self.journal.push(HostCall::Write {
            fd: fd_num,
            data: data.to_vec(),
        });
        match fd_num {
            fd::STDOUT => {
                self.stdout.extend_from_slice(data);
                data.len() as i32
            }
            fd::STDERR => {
                self.stderr.extend_from_slice(data);
                data.len() as i32
            }
            fd::STDIN => -1,
            other => {
                let Some(handle) = Self::handle_key(other).and_then(|k| self.handles.get_mut(k))
                else {
                    return -1;
                };
                let Some(contents) = self.files.get_mut(&handle.path) else {
                    return -1;
                };
                let end = handle.position + data.len();
                if contents.len() < end {
                    contents.resize(end, 0);
                }
                contents[handle.position..end].copy_from_slice(data);
                handle.position = end;
                data.len() as i32
            }
        }
    }

    fn close(&mut self, fd_num: i32) -> i32 {
        self.journal.push(HostCall::Close { fd: fd_num });
        match Self::handle_key(fd_num) {
            Some(key) if self.handles.contains(key) => {
                self.handles.remove(key);
                0
            }
            _ => -1,
        }
    }

    fn exit(&mut self, code: i32) {
        self.journal.push(HostCall::Exit { code });
        self.exit_code = Some(code);
    }

    fn print(&mut self, text: &str) {
        self.journal.push(HostCall::Print {
            text: text.to_string(),
        });
        self.printed.push(text.to_string());
    }

    fn log(&mut self, text: &str) {
        self.journal.push(HostCall::Log {
            text: text.to_string(),
        });
        self.logs.push(text.to_string());
    }

    fn now(&self) -> Duration {
        self.clock.unwrap_or_else(wall_clock)
    }
}
