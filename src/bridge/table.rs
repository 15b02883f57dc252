//! Syscall table
//!
//! Static mapping from syscall numbers to names, using the asm-generic
//! numbering the guest's libc is built against. The table is data only;
//! [`Syscall`] is the decoded form the dispatcher matches on.

use std::fmt;

/// Immutable (number, name) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallDescriptor {
    pub nr: u32,
    pub name: &'static str,
}

const fn desc(nr: u32, name: &'static str) -> SyscallDescriptor {
    SyscallDescriptor { nr, name }
}

/// Syscall numbers the bridge implements
pub mod nr {
    pub const IOCTL: u32 = 29;
    pub const OPENAT: u32 = 56;
    pub const CLOSE: u32 = 57;
    pub const READ: u32 = 63;
    pub const WRITE: u32 = 64;
    pub const READV: u32 = 65;
    pub const WRITEV: u32 = 66;
    pub const EXIT: u32 = 93;
    pub const EXIT_GROUP: u32 = 94;
    pub const SET_TID_ADDRESS: u32 = 96;
    pub const CLOCK_GETTIME: u32 = 113;
    pub const RT_SIGACTION: u32 = 134;
    pub const RT_SIGPROCMASK: u32 = 135;
    pub const GETTID: u32 = 178;
    pub const BRK: u32 = 214;
    pub const MUNMAP: u32 = 215;
    pub const CLONE: u32 = 220;
    pub const MMAP: u32 = 222;
}

/// Known syscalls, sorted by number
pub static SYSCALL_TABLE: &[SyscallDescriptor] = &[
    desc(17, "getcwd"),
    desc(23, "dup"),
    desc(24, "dup3"),
    desc(25, "fcntl"),
    desc(nr::IOCTL, "ioctl"),
    desc(34, "mkdirat"),
    desc(35, "unlinkat"),
    desc(37, "linkat"),
    desc(38, "renameat"),
    desc(46, "ftruncate"),
    desc(48, "faccessat"),
    desc(49, "chdir"),
    desc(nr::OPENAT, "openat"),
    desc(nr::CLOSE, "close"),
    desc(59, "pipe2"),
    desc(61, "getdents64"),
    desc(62, "lseek"),
    desc(nr::READ, "read"),
    desc(nr::WRITE, "write"),
    desc(nr::READV, "readv"),
    desc(nr::WRITEV, "writev"),
    desc(67, "pread64"),
    desc(68, "pwrite64"),
    desc(72, "pselect6"),
    desc(73, "ppoll"),
    desc(78, "readlinkat"),
    desc(79, "newfstatat"),
    desc(80, "fstat"),
    desc(82, "fsync"),
    desc(nr::EXIT, "exit"),
    desc(nr::EXIT_GROUP, "exit_group"),
    desc(nr::SET_TID_ADDRESS, "set_tid_address"),
    desc(98, "futex"),
    desc(99, "set_robust_list"),
    desc(101, "nanosleep"),
    desc(nr::CLOCK_GETTIME, "clock_gettime"),
    desc(114, "clock_getres"),
    desc(115, "clock_nanosleep"),
    desc(124, "sched_yield"),
    desc(129, "kill"),
    desc(130, "tkill"),
    desc(131, "tgkill"),
    desc(nr::RT_SIGACTION, "rt_sigaction"),
    desc(nr::RT_SIGPROCMASK, "rt_sigprocmask"),
    desc(139, "rt_sigreturn"),
    desc(153, "times"),
    desc(160, "uname"),
    desc(163, "getrlimit"),
    desc(165, "getrusage"),
    desc(166, "umask"),
    desc(169, "gettimeofday"),
    desc(172, "getpid"),
    desc(173, "getppid"),
    desc(174, "getuid"),
    desc(175, "geteuid"),
    desc(176, "getgid"),
    desc(177, "getegid"),
    desc(nr::GETTID, "gettid"),
    desc(198, "socket"),
    desc(nr::BRK, "brk"),
    desc(nr::MUNMAP, "munmap"),
    desc(216, "mremap"),
    desc(nr::CLONE, "clone"),
    desc(221, "execve"),
    desc(nr::MMAP, "mmap"),
    desc(226, "mprotect"),
    desc(233, "madvise"),
    desc(260, "wait4"),
    desc(261, "prlimit64"),
    desc(278, "getrandom"),
    desc(291, "statx"),
];

/// Look up the descriptor for a syscall number
pub fn lookup(nr: u32) -> Option<&'static SyscallDescriptor> {
    SYSCALL_TABLE
        .binary_search_by_key(&nr, |d| d.nr)
        .ok()
        .map(|i| &SYSCALL_TABLE[i])
}

/// A decoded syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Openat,
    Read,
    Write,
    Writev,
    Readv,
    Close,
    Brk,
    Mmap,
    Munmap,
    Ioctl,
    ClockGettime,
    RtSigprocmask,
    RtSigaction,
    Clone,
    Gettid,
    SetTidAddress,
    Exit,
    ExitGroup,
    /// Not emulated. `name` is set when the number is in the table.
    Unsupported {
        nr: u32,
        name: Option<&'static str>,
    },
}

impl Syscall {
    /// Decode a raw syscall number
    pub fn from_nr(number: u32) -> Self {
        match number {
            nr::OPENAT => Self::Openat,
            nr::READ => Self::Read,
            nr::WRITE => Self::Write,
            nr::WRITEV => Self::Writev,
            nr::READV => Self::Readv,
            nr::CLOSE => Self::Close,
            nr::BRK => Self::Brk,
            nr::MMAP => Self::Mmap,
            nr::MUNMAP => Self::Munmap,
            nr::IOCTL => Self::Ioctl,
            nr::CLOCK_GETTIME => Self::ClockGettime,
            nr::RT_SIGPROCMASK => Self::RtSigprocmask,
            nr::RT_SIGACTION => Self::RtSigaction,
            nr::CLONE => Self::Clone,
            nr::GETTID => Self::Gettid,
            nr::SET_TID_ADDRESS => Self::SetTidAddress,
            nr::EXIT => Self::Exit,
            nr::EXIT_GROUP => Self::ExitGroup,
            other => Self::Unsupported {
                nr: other,
                name: lookup(other).map(|d| d.name),
            },
        }
    }

    /// The raw syscall number
    pub fn nr(&self) -> u32 {
        match self {
            Self::Openat => nr::OPENAT,
            Self::Read => nr::READ,
            Self::Write => nr::WRITE,
            Self::Writev => nr::WRITEV,
            Self::Readv => nr::READV,
            Self::Close => nr::CLOSE,
            Self::Brk => nr::BRK,
            Self::Mmap => nr::MMAP,
            Self::Munmap => nr::MUNMAP,
            Self::Ioctl => nr::IOCTL,
            Self::ClockGettime => nr::CLOCK_GETTIME,
            Self::RtSigprocmask => nr::RT_SIGPROCMASK,
            Self::RtSigaction => nr::RT_SIGACTION,
            Self::Clone => nr::CLONE,
            Self::Gettid => nr::GETTID,
            Self::SetTidAddress => nr::SET_TID_ADDRESS,
            Self::Exit => nr::EXIT,
            Self::ExitGroup => nr::EXIT_GROUP,
            Self::Unsupported { nr, .. } => *nr,
        }
    }

    /// Canonical name, or `"unknown"` for numbers outside the table
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unsupported { name, .. } => name.unwrap_or("unknown"),
            other => lookup(other.nr()).map(|d| d.name).unwrap_or("unknown"),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.nr())
    }
}
