//! Guest ABI types, constants and marshaling
//!
//! Pure conversions between arena offsets and structured values. Nothing in
//! here knows which syscall is running; it only knows byte layouts. All
//! multi-byte values are little-endian, matching wasm32.

use super::arena::{LinearMemory, check_bounds};
use super::error::{BridgeError, BridgeResult};
use bytemuck::{Pod, Zeroable};

/// Import module namespace
pub const IMPORT_NAMESPACE: &str = "env";

/// Maximum number of raw words a syscall import slot carries
pub const MAX_SYSCALL_ARGS: usize = 7;

/// Value returned to the guest for any failed syscall
pub const SYSCALL_ERROR: i32 = -1;

/// Export names looked up on the guest instance
pub mod exports {
    /// Entry point: `main(argc: i32, argv: i32) -> i32`
    pub const MAIN: &str = "main";
    /// Optional guest allocator: `malloc(size: i32) -> i32`
    pub const MALLOC: &str = "malloc";
}

/// Import names the bridge provides in the `env` namespace
pub mod imports {
    /// The bridge-owned linear memory
    pub const MEMORY: &str = "memory";
    /// `__syscall(nr, args_ptr)`: all arguments packed in guest memory
    pub const SYSCALL_PACKED: &str = "__syscall";
    /// `print(str_ptr)`: NUL-terminated diagnostic string
    pub const PRINT: &str = "print";
    /// `trace(on)`: toggles diagnostic tracing
    pub const TRACE: &str = "trace";
    /// Empty start function some toolchains import
    pub const START: &str = "_start";

    /// Name of the fixed-arity syscall slot, `__syscall0` .. `__syscall7`
    pub fn syscall_slot(arity: usize) -> String {
        format!("__syscall{}", arity)
    }
}

/// Standard file descriptors
pub mod fd {
    pub const STDIN: i32 = 0;
    pub const STDOUT: i32 = 1;
    pub const STDERR: i32 = 2;
}

/// `ioctl` request: get terminal window size
pub const TIOCGWINSZ: i32 = 0x5413;

/// `openat` dirfd meaning "relative to the working directory"
pub const AT_FDCWD: i32 = -100;

/// `mmap` flags
pub mod mmap_flags {
    pub const MAP_SHARED: i32 = 0x01;
    pub const MAP_PRIVATE: i32 = 0x02;
    pub const MAP_FIXED: i32 = 0x10;
    pub const MAP_ANONYMOUS: i32 = 0x20;
}

/// `mmap` protection bits
pub mod prot {
    pub const PROT_NONE: i32 = 0;
    pub const PROT_READ: i32 = 1;
    pub const PROT_WRITE: i32 = 2;
    pub const PROT_EXEC: i32 = 4;
}

/// One scatter/gather segment: `struct iovec { void *base; size_t len; }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct IoVec {
    pub base: u32,
    pub len: u32,
}

impl IoVec {
    pub const SIZE: usize = 8;

    fn from_le(raw: IoVec) -> Self {
        Self {
            base: u32::from_le(raw.base),
            len: u32::from_le(raw.len),
        }
    }
}

/// `struct winsize`, as filled in by `TIOCGWINSZ`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Winsize {
    /// Rows, in characters
    pub ws_row: u16,
    /// Columns, in characters
    pub ws_col: u16,
    /// Horizontal size, pixels
    pub ws_xpixel: u16,
    /// Vertical size, pixels
    pub ws_ypixel: u16,
}

impl Winsize {
    pub const SIZE: usize = 8;

    /// Serialize to bytes (little-endian)
    pub fn to_bytes(&self) -> [u8; 8] {
        bytemuck::cast(Winsize {
            ws_row: self.ws_row.to_le(),
            ws_col: self.ws_col.to_le(),
            ws_xpixel: self.ws_xpixel.to_le(),
            ws_ypixel: self.ws_ypixel.to_le(),
        })
    }
}

impl Default for Winsize {
    /// The synthetic terminal every guest sees
    fn default() -> Self {
        Self {
            ws_row: 30,
            ws_col: 60,
            ws_xpixel: 1000,
            ws_ypixel: 1000,
        }
    }
}

/// `struct timespec` as the time32 `clock_gettime` fills it on an ILP32
/// target: `{ long tv_sec; long tv_nsec; }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Timespec {
    pub tv_sec: i32,
    pub tv_nsec: i32,
}

impl Timespec {
    pub const SIZE: usize = 8;

    pub fn new(tv_sec: i32, tv_nsec: i32) -> Self {
        Self { tv_sec, tv_nsec }
    }

    /// Serialize to bytes (little-endian)
    pub fn to_bytes(&self) -> [u8; 8] {
        bytemuck::cast(Timespec {
            tv_sec: self.tv_sec.to_le(),
            tv_nsec: self.tv_nsec.to_le(),
        })
    }
}

/// Read a NUL-terminated string starting at `offset`, terminator excluded.
///
/// The scan is bounded by the end of memory; a string that runs off the
/// end is reported as an out-of-bounds access.
pub fn read_cstring<M: LinearMemory + ?Sized>(mem: &M, offset: u32) -> BridgeResult<Vec<u8>> {
    const CHUNK: usize = 256;

    let len = mem.len();
    let mut bytes = Vec::new();
    let mut cursor = offset as usize;
    loop {
        if cursor >= len {
            return Err(BridgeError::MemoryAccessOutOfBounds {
                address: offset,
                size: (bytes.len() + 1) as u32,
                memory_size: len as u32,
            });
        }
        let take = CHUNK.min(len - cursor);
        let mut chunk = [0u8; CHUNK];
        mem.read(cursor as u32, &mut chunk[..take])?;
        match chunk[..take].iter().position(|&b| b == 0) {
            Some(nul) => {
                bytes.extend_from_slice(&chunk[..nul]);
                return Ok(bytes);
            }
            None => {
                bytes.extend_from_slice(&chunk[..take]);
                cursor += take;
            }
        }
    }
}

/// Copy `len` bytes out of memory
pub fn read_bytes<M: LinearMemory + ?Sized>(mem: &M, offset: u32, len: u32) -> BridgeResult<Vec<u8>> {
    check_bounds(mem.len(), offset, len as usize)?;
    let mut buf = vec![0u8; len as usize];
    mem.read(offset, &mut buf)?;
    Ok(buf)
}

/// Byte size of a `count`-element guest array, checked against memory
/// before anything is allocated for it
fn array_size<M: LinearMemory + ?Sized>(
    mem: &M,
    offset: u32,
    count: usize,
    elem_size: usize,
) -> BridgeResult<usize> {
    let size = count
        .checked_mul(elem_size)
        .ok_or(BridgeError::MemoryAccessOutOfBounds {
            address: offset,
            size: u32::MAX,
            memory_size: mem.len() as u32,
        })?;
    check_bounds(mem.len(), offset, size)?;
    Ok(size)
}

/// Reinterpret `count` consecutive little-endian words as `i32`s
pub fn read_i32_array<M: LinearMemory + ?Sized>(
    mem: &M,
    offset: u32,
    count: usize,
) -> BridgeResult<Vec<i32>> {
    let mut raw = vec![0u8; array_size(mem, offset, count, 4)?];
    mem.read(offset, &mut raw)?;
    Ok(raw
        .chunks_exact(4)
        .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect())
}

/// Read `count` `(base, len)` pairs, as passed to `readv`/`writev`
pub fn read_iovec_array<M: LinearMemory + ?Sized>(
    mem: &M,
    offset: u32,
    count: usize,
) -> BridgeResult<Vec<IoVec>> {
    let mut raw = vec![0u8; array_size(mem, offset, count, IoVec::SIZE)?];
    mem.read(offset, &mut raw)?;
    Ok(raw
        .chunks_exact(IoVec::SIZE)
        .map(|entry| IoVec::from_le(bytemuck::pod_read_unaligned(entry)))
        .collect())
}

/// Copy `bytes` into memory at `offset`
pub fn write_bytes<M: LinearMemory + ?Sized>(mem: &mut M, offset: u32, bytes: &[u8]) -> BridgeResult<()> {
    mem.write(offset, bytes)
}

/// Write `words` as a flat little-endian `u32` array
pub fn write_u32_array<M: LinearMemory + ?Sized>(
    mem: &mut M,
    offset: u32,
    words: &[u32],
) -> BridgeResult<()> {
    let raw: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    mem.write(offset, &raw)
}
