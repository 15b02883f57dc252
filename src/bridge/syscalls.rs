//! Syscall semantics
//!
//! One method per emulated syscall. Arguments arrive as the raw words the
//! guest passed; decoding pointers into strings, iovecs or structs is done
//! here because only the syscall knows what its arguments mean.

use super::abi::{
    self, IoVec, TIOCGWINSZ, Timespec, Winsize, mmap_flags::MAP_ANONYMOUS, read_bytes,
    read_cstring, read_iovec_array, write_bytes,
};
use super::arena::{LinearMemory, PAGE_SIZE, check_bounds};
use super::dispatch::SyscallArgs;
use super::error::{BridgeError, BridgeResult};
use super::host::HostIo;
use super::runtime::Bridge;
use super::table::Syscall;
use super::trace::TraceCategory;

/// Thread id reported to the guest; there is only ever one thread
pub const MAIN_TID: i32 = 1;

impl<M: LinearMemory, H: HostIo> Bridge<M, H> {
    /// Run the semantic implementation for `syscall`
    pub(crate) fn execute(&mut self, syscall: Syscall, args: &SyscallArgs) -> BridgeResult<i32> {
        match syscall {
            Syscall::Openat => self.sys_openat(args.get(0), args.ptr(1), args.get(2), args.get(3)),
            Syscall::Read => self.sys_read(args.get(0), args.ptr(1), args.get(2)),
            Syscall::Write => self.sys_write(args.get(0), args.ptr(1), args.get(2)),
            Syscall::Writev => self.sys_writev(args.get(0), args.ptr(1), args.get(2)),
            Syscall::Readv => self.sys_readv(args.get(0), args.ptr(1), args.get(2)),
            Syscall::Close => Ok(self.sys_close(args.get(0))),
            Syscall::Brk => self.sys_brk(args.ptr(0)),
            Syscall::Mmap => self.sys_mmap(
                args.ptr(0),
                args.get(1),
                args.get(2),
                args.get(3),
                args.get(4),
                args.get(5),
            ),
            Syscall::Munmap => Ok(0),
            Syscall::Ioctl => self.sys_ioctl(args.get(0), args.get(1), args.ptr(2)),
            Syscall::ClockGettime => self.sys_clock_gettime(args.get(0), args.ptr(1)),
            Syscall::RtSigprocmask | Syscall::RtSigaction => Ok(0),
            Syscall::Clone => Ok(self.sys_clone()),
            Syscall::Gettid | Syscall::SetTidAddress => Ok(MAIN_TID),
            Syscall::Exit | Syscall::ExitGroup => Err(self.sys_exit(args.get(0))),
            Syscall::Unsupported { nr, .. } => Err(BridgeError::UnknownSyscall { nr }),
        }
    }

    /// `openat(dirfd, path, flags, mode)`; the directory fd is ignored.
    ///
    /// Paths that are not valid UTF-8 never reach the host.
    pub fn sys_openat(&mut self, _dirfd: i32, path_ptr: u32, flags: i32, mode: i32) -> BridgeResult<i32> {
        let path = match String::from_utf8(read_cstring(self.arena.memory(), path_ptr)?) {
            Ok(path) => path,
            Err(err) => {
                self.trace(
                    TraceCategory::Anomaly,
                    "non-UTF-8 path",
                    Some(format!("{:?}", String::from_utf8_lossy(err.as_bytes()))),
                );
                return Ok(abi::SYSCALL_ERROR);
            }
        };
        let fd = self.host.open(&path);
        self.trace(
            TraceCategory::Syscall,
            "openat",
            Some(format!("path={:?} flags={:#o} mode={:#o} -> {}", path, flags, mode, fd)),
        );
        Ok(fd)
    }

    /// `read(fd, buf, count)`: copies what the host returns into `buf`
    pub fn sys_read(&mut self, fd: i32, buf_ptr: u32, count: i32) -> BridgeResult<i32> {
        let count = count.max(0) as usize;
        check_bounds(self.arena.len(), buf_ptr, count)?;

        match self.host.read(fd, count) {
            Ok(mut data) => {
                data.truncate(count);
                write_bytes(self.arena.memory_mut(), buf_ptr, &data)?;
                Ok(data.len() as i32)
            }
            Err(code) => Ok(code),
        }
    }

    /// `write(fd, buf, len)`
    pub fn sys_write(&mut self, fd: i32, buf_ptr: u32, len: i32) -> BridgeResult<i32> {
        let data = read_bytes(self.arena.memory(), buf_ptr, len.max(0) as u32)?;
        Ok(self.host.write(fd, &data))
    }

    /// `writev(fd, iov, iovcnt)`: one host write per segment, in order.
    ///
    /// Once any bytes have been written, a later failure ends the call with
    /// the partial total.
    pub fn sys_writev(&mut self, fd: i32, iov_ptr: u32, iov_count: i32) -> BridgeResult<i32> {
        let iovs = self.iovecs(iov_ptr, iov_count)?;
        let mut total: i32 = 0;
        for iov in iovs {
            let data = match read_bytes(self.arena.memory(), iov.base, iov.len) {
                Ok(data) => data,
                Err(err) => return self.partial(total, err),
            };
            let written = self.host.write(fd, &data);
            if written < 0 {
                return Ok(if total == 0 { written } else { total });
            }
            total = total.saturating_add(written);
            if (written as u32) < iov.len {
                break;
            }
        }
        Ok(total)
    }

    /// `readv(fd, iov, iovcnt)`: stops at the first short read, and like
    /// `writev` reports a partial total over a later failure
    pub fn sys_readv(&mut self, fd: i32, iov_ptr: u32, iov_count: i32) -> BridgeResult<i32> {
        let iovs = self.iovecs(iov_ptr, iov_count)?;
        let mut total: i32 = 0;
        for iov in iovs {
            if let Err(err) = check_bounds(self.arena.len(), iov.base, iov.len as usize) {
                return self.partial(total, err);
            }
            let mut data = match self.host.read(fd, iov.len as usize) {
                Ok(data) => data,
                Err(code) => return Ok(if total == 0 { code } else { total }),
            };
            data.truncate(iov.len as usize);
            write_bytes(self.arena.memory_mut(), iov.base, &data)?;
            total = total.saturating_add(data.len() as i32);
            if data.len() < iov.len as usize {
                break;
            }
        }
        Ok(total)
    }

    fn partial(&mut self, total: i32, err: BridgeError) -> BridgeResult<i32> {
        if total == 0 {
            return Err(err);
        }
        self.trace(
            TraceCategory::Anomaly,
            "vectored I/O cut short",
            Some(format!("{} after {} bytes", err, total)),
        );
        Ok(total)
    }

    fn iovecs(&self, iov_ptr: u32, iov_count: i32) -> BridgeResult<Vec<IoVec>> {
        read_iovec_array(self.arena.memory(), iov_ptr, iov_count.max(0) as usize)
    }

    /// `close(fd)`
    pub fn sys_close(&mut self, fd: i32) -> i32 {
        self.host.close(fd)
    }

    /// `brk(addr)`: grows the arena to cover `addr`, always reports 0
    pub fn sys_brk(&mut self, addr: u32) -> BridgeResult<i32> {
        let before = self.arena.len();
        self.arena.grow_to(addr as usize)?;
        let after = self.arena.len();
        if after != before {
            self.trace(
                TraceCategory::Memory,
                "brk",
                Some(format!("addr={} grew {} -> {}", addr, before, after)),
            );
        }
        Ok(0)
    }

    /// `mmap(addr, len, prot, flags, fd, offset)`.
    ///
    /// Only anonymous mappings at a kernel-chosen address, at most one page
    /// long, are emulated: each one grows the arena by exactly one page and
    /// returns the old end of memory.
    pub fn sys_mmap(
        &mut self,
        addr: u32,
        len: i32,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i32,
    ) -> BridgeResult<i32> {
        let call = format!(
            "addr={:#x} len={} prot={:#x} flags={:#x} fd={} offset={}",
            addr, len, prot, flags, fd, offset
        );
        let file_backed = flags & MAP_ANONYMOUS == 0 && fd >= 0;

        let reason = if addr != 0 {
            Some("fixed address mappings")
        } else if file_backed {
            Some("file-backed mappings")
        } else if len > PAGE_SIZE as i32 {
            Some("mappings larger than one page")
        } else {
            None
        };
        if let Some(reason) = reason {
            self.trace(TraceCategory::Anomaly, "unsupported mmap", Some(call.clone()));
            return Err(BridgeError::Unsupported {
                syscall: "mmap",
                reason: format!("{} ({})", reason, call),
            });
        }

        if len <= 0 {
            self.trace(TraceCategory::Anomaly, "empty mmap", Some(call));
            return Ok(abi::SYSCALL_ERROR);
        }

        let base = self.arena.grow_pages(1)?;
        self.trace(
            TraceCategory::Memory,
            "mmap",
            Some(format!("{} -> {:#x}", call, base)),
        );
        Ok(base as i32)
    }

    /// `ioctl(fd, request, arg)`: only `TIOCGWINSZ` does anything
    pub fn sys_ioctl(&mut self, fd: i32, request: i32, arg_ptr: u32) -> BridgeResult<i32> {
        if request == TIOCGWINSZ {
            write_bytes(self.arena.memory_mut(), arg_ptr, &Winsize::default().to_bytes())?;
            self.trace(
                TraceCategory::Syscall,
                "ioctl",
                Some(format!("fd={} TIOCGWINSZ -> {:#x}", fd, arg_ptr)),
            );
        } else {
            self.trace(
                TraceCategory::Anomaly,
                "unsupported ioctl",
                Some(format!("fd={} request={:#x}", fd, request)),
            );
        }
        Ok(0)
    }

    /// `clock_gettime(clock_id, tp)`: every clock reads wall time, written
    /// as a 32-bit `timespec`
    pub fn sys_clock_gettime(&mut self, _clock_id: i32, tp_ptr: u32) -> BridgeResult<i32> {
        let now = self.host.now();
        let ts = Timespec::new(now.as_secs() as i32, now.subsec_nanos() as i32);
        write_bytes(self.arena.memory_mut(), tp_ptr, &ts.to_bytes())?;
        Ok(0)
    }

    /// `clone(...)`: thread and process creation is not available
    pub fn sys_clone(&mut self) -> i32 {
        self.trace(TraceCategory::Process, "clone refused", None);
        abi::SYSCALL_ERROR
    }

    /// `exit(code)` / `exit_group(code)`: records the code and returns the
    /// error that unwinds the guest
    pub fn sys_exit(&mut self, code: i32) -> BridgeError {
        self.record_exit(code);
        self.trace(TraceCategory::Process, "exit", Some(format!("code={}", code)));
        BridgeError::Exited { code }
    }
}
