//! Guest linear-memory arena
//!
//! The arena owns the guest's growable byte buffer. Layout:
//!
//! ```text
//! 0                stack_top == heap_start            len()
//! |<-- stack grows down --|-- heap grows up (bump) -->|
//! ```
//!
//! Guest pointers are plain offsets into this buffer. The buffer may be
//! reallocated on growth, so every access goes through [`LinearMemory`]
//! and nothing holds on to a slice across a grow.

use super::error::{BridgeError, BridgeResult};

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: u32 = 65536;

/// Default start of the heap region
pub const DEFAULT_HEAP_START: u32 = 100_000;

/// Default number of pages the memory is created with
pub const DEFAULT_INITIAL_PAGES: u32 = 2;

/// A growable, byte-addressed linear memory.
///
/// Implemented natively by [`VecMemory`] and in the browser by a
/// `WebAssembly.Memory` wrapper. Implementations must re-derive their
/// backing view on every call.
pub trait LinearMemory {
    /// Current size in bytes
    fn len(&self) -> usize;

    /// Grow by `pages` whole pages, returning the previous size in bytes
    fn grow(&mut self, pages: u32) -> BridgeResult<usize>;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    fn read(&self, offset: u32, buf: &mut [u8]) -> BridgeResult<()>;

    /// Copy `data` into memory starting at `offset`
    fn write(&mut self, offset: u32, data: &[u8]) -> BridgeResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a single byte
    fn read_u8(&self, offset: u32) -> BridgeResult<u8> {
        let mut byte = [0u8; 1];
        self.read(offset, &mut byte)?;
        Ok(byte[0])
    }
}

/// Check that `offset..offset + size` lies inside a memory of `len` bytes
pub fn check_bounds(len: usize, offset: u32, size: usize) -> BridgeResult<()> {
    match (offset as usize).checked_add(size) {
        Some(end) if end <= len => Ok(()),
        _ => Err(BridgeError::MemoryAccessOutOfBounds {
            address: offset,
            size: size as u32,
            memory_size: len as u32,
        }),
    }
}

/// Linear memory backed by a `Vec<u8>`
#[derive(Debug, Clone)]
pub struct VecMemory {
    data: Vec<u8>,
    max_pages: Option<u32>,
}

impl VecMemory {
    /// Create memory with the given number of zeroed pages
    pub fn new(pages: u32) -> Self {
        Self {
            data: vec![0; pages as usize * PAGE_SIZE as usize],
            max_pages: None,
        }
    }

    /// Cap growth at `max_pages` total pages
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Number of whole pages currently allocated
    pub fn pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE as usize) as u32
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl LinearMemory for VecMemory {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn grow(&mut self, pages: u32) -> BridgeResult<usize> {
        let previous = self.data.len();
        let wanted = self.pages().checked_add(pages);
        let fits = match (wanted, self.max_pages) {
            (None, _) => false,
            (Some(total), Some(max)) => total <= max,
            (Some(total), None) => total <= u32::MAX / PAGE_SIZE + 1,
        };
        if !fits {
            return Err(BridgeError::OutOfMemory {
                requested_pages: pages,
                current_len: previous as u32,
            });
        }

        self.data
            .resize(previous + pages as usize * PAGE_SIZE as usize, 0);
        Ok(previous)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> BridgeResult<()> {
        check_bounds(self.data.len(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> BridgeResult<()> {
        check_bounds(self.data.len(), offset, data.len())?;
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// The guest arena: memory plus the heap bump cursor
#[derive(Debug)]
pub struct Arena<M> {
    memory: M,
    stack_top: u32,
    heap_start: u32,
    cursor: u32,
}

impl<M: LinearMemory> Arena<M> {
    /// Wrap `memory`, placing the stack/heap boundary at `heap_start`
    pub fn new(memory: M, heap_start: u32) -> Self {
        Self {
            memory,
            stack_top: heap_start,
            heap_start,
            cursor: heap_start,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Current arena length in bytes
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Top of the downward-growing stack region
    pub fn stack_top(&self) -> u32 {
        self.stack_top
    }

    /// First byte of the heap region
    pub fn heap_start(&self) -> u32 {
        self.heap_start
    }

    /// Next offset the bump allocator will hand out
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Grow so that at least `target_len` bytes are addressable.
    ///
    /// No-op when the arena is already long enough.
    pub fn grow_to(&mut self, target_len: usize) -> BridgeResult<()> {
        let len = self.memory.len();
        if target_len <= len {
            return Ok(());
        }
        let pages = (target_len - len).div_ceil(PAGE_SIZE as usize);
        let pages = u32::try_from(pages).map_err(|_| BridgeError::OutOfMemory {
            requested_pages: u32::MAX,
            current_len: len as u32,
        })?;
        self.memory.grow(pages)?;
        Ok(())
    }

    /// Grow by whole pages, returning the previous length
    pub fn grow_pages(&mut self, pages: u32) -> BridgeResult<usize> {
        self.memory.grow(pages)
    }

    /// Bump-allocate `size` bytes.
    ///
    /// Does not check the result against the arena length; callers that
    /// need the range addressable use [`Arena::allocate_backed`]. Returns
    /// `None`, leaving the cursor alone, if the range would pass `u32::MAX`.
    pub fn allocate(&mut self, size: u32) -> Option<u32> {
        let offset = self.cursor;
        self.cursor = self.cursor.checked_add(size)?;
        Some(offset)
    }

    /// Bump-allocate `size` bytes and grow the arena to cover them
    pub fn allocate_backed(&mut self, size: u32) -> BridgeResult<u32> {
        let offset = self.allocate(size).ok_or(BridgeError::OutOfMemory {
            requested_pages: size.div_ceil(PAGE_SIZE),
            current_len: self.memory.len() as u32,
        })?;
        self.grow_to(offset as usize + size as usize)?;
        Ok(offset)
    }
}
