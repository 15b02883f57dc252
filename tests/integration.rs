//! Integration tests for the syscall bridge
//!
//! Each test drives a native bridge with a scripted guest: a closure that
//! stands in for `main(argc, argv)` and issues syscalls exactly the way a
//! compiled guest would, through the numbered import slots.

use sysbridge::bridge::abi::{read_cstring, read_i32_array, write_u32_array};
use sysbridge::bridge::table::nr;
use sysbridge::bridge::{
    Bridge, BridgeConfig, BridgeConfigBuilder, BridgeError, BridgeResult, HostCall, LinearMemory,
    MemoryHost, PAGE_SIZE, VecMemory,
};

type TestBridge = Bridge<VecMemory, MemoryHost>;

/// Guest data segment; below the heap so it never collides with argv
const DATA: u32 = 1024;

fn config(program: &str, args: &str) -> BridgeConfig {
    BridgeConfigBuilder::new()
        .program(program)
        .args(args)
        .build()
        .unwrap()
}

/// Run a scripted guest, returning the bridge and the exit code
fn run_guest<F>(host: MemoryHost, config: &BridgeConfig, guest: F) -> (TestBridge, i32)
where
    F: FnOnce(&mut TestBridge, i32, u32) -> BridgeResult<i32>,
{
    let mut bridge = Bridge::in_memory(host, config);
    let code = bridge.run_entry(config, guest);
    (bridge, code)
}

/// Store bytes in the guest data segment
fn store(bridge: &mut TestBridge, offset: u32, bytes: &[u8]) {
    bridge.arena_mut().memory_mut().write(offset, bytes).unwrap();
}

fn argv_strings(bridge: &TestBridge, argc: i32, argv: u32) -> Vec<String> {
    let memory = bridge.arena().memory();
    read_i32_array(memory, argv, argc as usize)
        .unwrap()
        .into_iter()
        .map(|p| String::from_utf8(read_cstring(memory, p as u32).unwrap()).unwrap())
        .collect()
}

// ============================================================================
// Bootstrap
// ============================================================================

#[test]
fn test_hello_world() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("hello", ""), |b, _, _| {
        store(b, DATA, b"hello, world\n");
        b.dispatch(nr::WRITE, &[1, DATA as i32, 13])?;
        Ok(0)
    });

    assert_eq!(code, 0);
    assert_eq!(bridge.host().stdout_str(), "hello, world\n");
    assert_eq!(bridge.host().exit_code(), Some(0));
}

#[test]
fn test_guest_sees_argv() {
    let (bridge, code) = run_guest(
        MemoryHost::new(),
        &config("prog", "a 'b c' \"d\\\"e\""),
        |b, argc, argv| {
            assert_eq!(argv_strings(b, argc, argv), vec!["prog", "a", "b c", "d\"e"]);
            Ok(argc)
        },
    );

    assert_eq!(code, 4);
    assert_eq!(bridge.host().exit_code(), Some(4));
}

#[test]
fn test_argv_lives_in_heap() {
    let cfg = config("prog", "x");
    let (bridge, _) = run_guest(MemoryHost::new(), &cfg, |b, _, argv| {
        assert!(argv >= b.arena().heap_start());
        assert_eq!(b.arena().stack_top(), cfg.heap_start);
        Ok(0)
    });
    assert!(bridge.arena().cursor() > cfg.heap_start);
}

#[test]
fn test_config_from_json() {
    let cfg = BridgeConfig::from_json(r#"{"program": "echo", "args": "one two", "trace": true}"#)
        .unwrap();
    let (bridge, code) = run_guest(MemoryHost::new(), &cfg, |b, argc, argv| {
        assert_eq!(argv_strings(b, argc, argv), vec!["echo", "one", "two"]);
        Ok(0)
    });
    assert_eq!(code, 0);
    assert!(bridge.is_tracing());
    assert!(bridge.host().logs().iter().any(|l| l.starts_with("[PROCESS] argv")));
}

// ============================================================================
// File I/O
// ============================================================================

#[test]
fn test_cat_file() {
    let host = MemoryHost::new().with_file("/etc/motd", "welcome\nto the bridge\n");
    let (bridge, code) = run_guest(host, &config("cat", "/etc/motd"), |b, argc, argv| {
        let path = read_i32_array(b.arena().memory(), argv, argc as usize)?[1];
        let fd = b.dispatch(nr::OPENAT, &[-100, path, 0, 0])?;
        assert!(fd >= 3);

        let buf = DATA as i32;
        loop {
            let n = b.dispatch(nr::READ, &[fd, buf, 8])?;
            if n <= 0 {
                break;
            }
            b.dispatch(nr::WRITE, &[1, buf, n])?;
        }
        Ok(b.dispatch(nr::CLOSE, &[fd])?)
    });

    assert_eq!(code, 0);
    assert_eq!(bridge.host().stdout_str(), "welcome\nto the bridge\n");
}

#[test]
fn test_open_missing_file() {
    let (_, code) = run_guest(MemoryHost::new(), &config("cat", "/nope"), |b, argc, argv| {
        let path = read_i32_array(b.arena().memory(), argv, argc as usize)?[1];
        let fd = b.dispatch(nr::OPENAT, &[-100, path, 0, 0])?;
        Ok(if fd < 0 { 2 } else { 0 })
    });
    assert_eq!(code, 2);
}

#[test]
fn test_write_to_file() {
    let host = MemoryHost::new().with_file("/tmp/out", "");
    let (bridge, _) = run_guest(host, &config("tee", ""), |b, _, _| {
        store(b, DATA, b"/tmp/out\0");
        let fd = b.dispatch(nr::OPENAT, &[-100, DATA as i32, 0o1, 0o644])?;
        store(b, DATA + 64, b"saved");
        assert_eq!(b.dispatch(nr::WRITE, &[fd, DATA as i32 + 64, 5])?, 5);
        b.dispatch(nr::CLOSE, &[fd])
    });
    assert_eq!(bridge.host().file("/tmp/out"), Some(&b"saved"[..]));
}

#[test]
fn test_writev_with_empty_segment() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("printf", ""), |b, _, _| {
        store(b, DATA, b"foo");
        store(b, DATA + 16, b"bar!!");
        let iov = DATA + 64;
        write_u32_array(
            b.arena_mut().memory_mut(),
            iov,
            &[DATA, 3, DATA + 8, 0, DATA + 16, 5],
        )?;
        b.dispatch(nr::WRITEV, &[1, iov as i32, 3])
    });

    assert_eq!(code, 8);
    assert_eq!(bridge.host().stdout_str(), "foobar!!");
}

#[test]
fn test_writev_stops_at_unmapped_segment() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("printf", ""), |b, _, _| {
        store(b, DATA, b"abc");
        let end = b.arena().len() as u32;
        let iov = DATA + 64;
        write_u32_array(b.arena_mut().memory_mut(), iov, &[DATA, 3, end, 4])?;
        b.dispatch(nr::WRITEV, &[1, iov as i32, 2])
    });

    assert_eq!(code, 3);
    assert_eq!(bridge.host().stdout_str(), "abc");
}

#[test]
fn test_readv_scatter() {
    let host = MemoryHost::new().with_stdin("0123456789");
    let (bridge, code) = run_guest(host, &config("head", ""), |b, _, _| {
        let iov = DATA + 256;
        write_u32_array(b.arena_mut().memory_mut(), iov, &[DATA, 4, DATA + 32, 4])?;
        b.dispatch(nr::READV, &[0, iov as i32, 2])
    });

    assert_eq!(code, 8);
    let memory = bridge.arena().memory().as_slice();
    assert_eq!(&memory[DATA as usize..DATA as usize + 4], b"0123");
    assert_eq!(&memory[DATA as usize + 32..DATA as usize + 36], b"4567");
}

#[test]
fn test_packed_syscall_slot() {
    let (bridge, _) = run_guest(MemoryHost::new(), &config("packed", ""), |b, _, _| {
        store(b, DATA, b"via pointer\n");
        let args = DATA + 64;
        write_u32_array(b.arena_mut().memory_mut(), args, &[2, DATA, 12, 0, 0, 0, 0])?;
        b.dispatch_packed(nr::WRITE, args)
    });
    assert_eq!(bridge.host().stderr(), b"via pointer\n");
}

#[test]
fn test_host_sees_calls_in_order() {
    let host = MemoryHost::new().with_file("/a", "A");
    let (bridge, _) = run_guest(host, &config("order", ""), |b, _, _| {
        store(b, DATA, b"/a\0x");
        let fd = b.dispatch(nr::OPENAT, &[-100, DATA as i32, 0, 0])?;
        b.dispatch(nr::WRITE, &[1, DATA as i32 + 3, 1])?;
        b.dispatch(nr::CLOSE, &[fd])?;
        Ok(0)
    });

    let calls: Vec<&HostCall> = bridge
        .host()
        .journal()
        .iter()
        .filter(|c| !matches!(c, HostCall::Log { .. }))
        .collect();
    assert_eq!(
        calls,
        vec![
            &HostCall::Open {
                path: "/a".to_string()
            },
            &HostCall::Write {
                fd: 1,
                data: b"x".to_vec()
            },
            &HostCall::Close { fd: 3 },
            &HostCall::Exit { code: 0 },
        ]
    );
}

// ============================================================================
// Memory
// ============================================================================

#[test]
fn test_brk_then_use_memory() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("alloc", ""), |b, _, _| {
        let top = 5 * PAGE_SIZE as i32;
        assert_eq!(b.dispatch(nr::BRK, &[top])?, 0);
        store(b, top as u32 - 4, b"end!");
        Ok(0)
    });
    assert_eq!(code, 0);
    assert_eq!(bridge.arena().len(), 5 * PAGE_SIZE as usize);
}

#[test]
fn test_anonymous_mmap() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("mmap", ""), |b, _, _| {
        let before = b.arena().len() as i32;
        let page = b.dispatch(nr::MMAP, &[0, 4096, 3, 0x22, -1, 0])?;
        assert_eq!(page, before);
        store(b, page as u32 + 4095, b"!");
        assert_eq!(b.dispatch(nr::MUNMAP, &[page, 4096])?, 0);
        Ok(0)
    });
    assert_eq!(code, 0);
    assert_eq!(bridge.arena().len(), 3 * PAGE_SIZE as usize);
}

#[test]
fn test_file_mmap_aborts_guest() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("mmap", ""), |b, _, _| {
        b.dispatch(nr::MMAP, &[0, 4096, 1, 0x02, 3, 0])?;
        panic!("guest resumed after unsupported mmap");
    });
    assert_eq!(code, 1);
    assert_eq!(bridge.host().exit_code(), Some(1));
    let logs = bridge.host().logs();
    assert!(logs.iter().any(|l| l.contains("unsupported mmap")));
    assert!(logs.iter().any(|l| l.starts_with("process aborted")));
}

// ============================================================================
// Process and terminal
// ============================================================================

#[test]
fn test_terminal_size() {
    let (bridge, _) = run_guest(MemoryHost::new(), &config("tput", ""), |b, _, _| {
        b.dispatch(nr::IOCTL, &[1, 0x5413, DATA as i32])
    });
    let raw = &bridge.arena().memory().as_slice()[DATA as usize..DATA as usize + 8];
    assert_eq!(raw, &[30, 0, 60, 0, 0xE8, 0x03, 0xE8, 0x03]);
}

#[test]
fn test_threads_refused() {
    let (_, code) = run_guest(MemoryHost::new(), &config("threads", ""), |b, _, _| {
        assert_eq!(b.dispatch(nr::CLONE, &[0x11, 0, 0, 0, 0])?, -1);
        assert_eq!(b.dispatch(nr::GETTID, &[])?, 1);
        assert_eq!(b.dispatch(nr::SET_TID_ADDRESS, &[DATA as i32])?, 1);
        assert_eq!(b.dispatch(nr::RT_SIGPROCMASK, &[0, 0, 0, 8])?, 0);
        assert_eq!(b.dispatch(nr::RT_SIGACTION, &[2, 0, 0, 8])?, 0);
        Ok(0)
    });
    assert_eq!(code, 0);
}

#[test]
fn test_clock() {
    let host = MemoryHost::new().with_clock(std::time::Duration::from_millis(1_500));
    let (bridge, _) = run_guest(host, &config("date", ""), |b, _, _| {
        store(b, DATA + 8, &[0xAA; 4]);
        b.dispatch(nr::CLOCK_GETTIME, &[0, DATA as i32])
    });
    let words = read_i32_array(bridge.arena().memory(), DATA, 3).unwrap();
    assert_eq!(words, vec![1, 500_000_000, i32::from_le_bytes([0xAA; 4])]);
}

#[test]
fn test_exit_group_unwinds() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("exit", ""), |b, _, _| {
        b.dispatch(nr::EXIT_GROUP, &[42])?;
        panic!("guest resumed after exit_group");
    });
    assert_eq!(code, 42);
    assert_eq!(bridge.exit_code(), Some(42));
    assert_eq!(bridge.host().exit_code(), Some(42));
    assert!(bridge.host().logs().is_empty());
}

#[test]
fn test_unknown_syscall_keeps_running() {
    let (bridge, code) = run_guest(MemoryHost::new(), &config("odd", ""), |b, _, _| {
        let len = b.arena().len();
        assert_eq!(b.dispatch(4242, &[1, 2, 3])?, -1);
        assert_eq!(b.arena().len(), len);
        Ok(7)
    });
    assert_eq!(code, 7);
    assert_eq!(bridge.host().logs().len(), 1);
    assert!(bridge.host().logs()[0].contains("unknown(4242)"));
}

#[test]
fn test_too_many_arguments_is_fatal() {
    let (_, code) = run_guest(MemoryHost::new(), &config("wide", ""), |b, _, _| {
        match b.dispatch(nr::WRITE, &[0; 8]) {
            Err(err @ BridgeError::InvalidArity { .. }) => Err(err),
            other => panic!("unexpected {:?}", other),
        }
    });
    assert_eq!(code, 1);
}

#[test]
fn test_trace_toggle_from_guest() {
    let (bridge, _) = run_guest(MemoryHost::new(), &config("trace", ""), |b, _, _| {
        b.set_trace(true);
        b.dispatch(nr::GETTID, &[])?;
        b.set_trace(false);
        b.dispatch(nr::GETTID, &[])?;
        Ok(0)
    });
    let logs = bridge.host().logs();
    assert_eq!(logs[0], "trace enabled");
    assert_eq!(logs[1], "[SYSCALL] gettid(178) []");
    assert_eq!(logs[2], "trace disabled");
    assert_eq!(logs.len(), 3);
    assert_eq!(bridge.tracer().syscall_counters("gettid").count, 2);
}

#[test]
fn test_print_import() {
    let (bridge, _) = run_guest(MemoryHost::new(), &config("print", ""), |b, _, _| {
        store(b, DATA, b"diagnostic line\0");
        b.print_guest(DATA)?;
        Ok(0)
    });
    assert_eq!(bridge.host().printed(), &["diagnostic line".to_string()]);
}
