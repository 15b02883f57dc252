//! Process bootstrap
//!
//! Turns a program name and an argument string into a C `argv` inside the
//! guest's memory, runs the entry point and maps how it ended to an exit
//! code.

use std::iter::Peekable;
use std::str::Chars;

use super::arena::{Arena, LinearMemory};
use super::config::BridgeConfig;
use super::error::{BridgeError, BridgeResult};
use super::host::HostIo;
use super::runtime::Bridge;
use super::trace::TraceCategory;

/// Argument tokenizer error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    /// Unterminated quoted string
    UnterminatedQuote(char),
    /// Backslash at the very end of the input
    TrailingEscape,
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnterminatedQuote(c) => write!(f, "unterminated {} quote", c),
            Self::TrailingEscape => write!(f, "trailing backslash"),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<ArgsError> for BridgeError {
    fn from(err: ArgsError) -> Self {
        BridgeError::InvalidArgs {
            reason: err.to_string(),
        }
    }
}

struct ArgLexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> ArgLexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn next_word(&mut self) -> Result<Option<String>, ArgsError> {
        self.skip_whitespace();
        if self.chars.peek().is_none() {
            return Ok(None);
        }

        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                break;
            }
            self.chars.next();
            match c {
                // Quotes can appear mid-word: foo"bar"baz
                '"' | '\'' => word.push_str(&self.read_quoted_content(c)?),
                '\\' => word.push(self.chars.next().ok_or(ArgsError::TrailingEscape)?),
                _ => word.push(c),
            }
        }
        Ok(Some(word))
    }

    fn read_quoted_content(&mut self, quote: char) -> Result<String, ArgsError> {
        let mut content = String::new();

        loop {
            match self.chars.next() {
                Some(c) if c == quote => break,
                Some('\\') if quote == '"' => match self.chars.next() {
                    Some(escaped) => content.push(escaped),
                    None => return Err(ArgsError::UnterminatedQuote(quote)),
                },
                Some(c) => content.push(c),
                None => return Err(ArgsError::UnterminatedQuote(quote)),
            }
        }

        Ok(content)
    }
}

/// Split an argument string into words.
///
/// Whitespace separates words. Single quotes are literal, double quotes
/// honor backslash escapes, and an empty quoted string is still a word.
pub fn split_args(input: &str) -> Result<Vec<String>, ArgsError> {
    let mut lexer = ArgLexer::new(input);
    let mut words = Vec::new();
    while let Some(word) = lexer.next_word()? {
        words.push(word);
    }
    Ok(words)
}

/// Full argument vector: the program name followed by the split arguments
pub fn argv_for(program: &str, args: &str) -> Result<Vec<String>, ArgsError> {
    let mut argv = vec![program.to_string()];
    argv.extend(split_args(args)?);
    Ok(argv)
}

/// Where argument strings and the pointer table get allocated
pub trait ArgvSink {
    /// Reserve `size` addressable bytes, returning their offset
    fn allocate(&mut self, size: u32) -> BridgeResult<u32>;

    /// Copy `bytes` into guest memory
    fn write(&mut self, offset: u32, bytes: &[u8]) -> BridgeResult<()>;
}

impl<M: LinearMemory> ArgvSink for Arena<M> {
    fn allocate(&mut self, size: u32) -> BridgeResult<u32> {
        self.allocate_backed(size)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> BridgeResult<()> {
        self.memory_mut().write(offset, bytes)
    }
}

/// Result of placing an argument vector in guest memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgvTable {
    /// Offset of each NUL-terminated argument string, in argv order
    pub strings: Vec<u32>,
    /// Offset of the `char *argv[]` array
    pub pointer_table: u32,
}

impl ArgvTable {
    pub fn argc(&self) -> i32 {
        self.strings.len() as i32
    }
}

/// Copy `argv` into guest memory: each string with a NUL terminator, then
/// the table of 32-bit pointers to them.
pub fn place_argv<S: ArgvSink + ?Sized>(sink: &mut S, argv: &[String]) -> BridgeResult<ArgvTable> {
    let mut strings = Vec::with_capacity(argv.len());
    for arg in argv {
        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);

        let offset = sink.allocate(bytes.len() as u32)?;
        sink.write(offset, &bytes)?;
        strings.push(offset);
    }

    let table: Vec<u8> = strings.iter().flat_map(|p| p.to_le_bytes()).collect();
    let pointer_table = sink.allocate(table.len() as u32)?;
    sink.write(pointer_table, &table)?;

    Ok(ArgvTable {
        strings,
        pointer_table,
    })
}

/// Map how the entry point ended to a process exit code.
///
/// Errors other than an explicit exit are reported through the host log.
pub fn exit_code_for<H: HostIo + ?Sized>(result: BridgeResult<i32>, host: &mut H) -> i32 {
    match result {
        Ok(code) => code,
        Err(BridgeError::Exited { code }) => code,
        Err(err) => {
            host.log(&format!("process aborted: {}", err));
            1
        }
    }
}

impl<M: LinearMemory, H: HostIo> Bridge<M, H> {
    /// Place the argument vector described by `config` in the arena
    pub fn bootstrap(&mut self, config: &BridgeConfig) -> BridgeResult<ArgvTable> {
        let argv = argv_for(&config.program, &config.args)?;
        let table = place_argv(&mut self.arena, &argv)?;
        self.trace(
            TraceCategory::Process,
            "argv",
            Some(format!("{:?} at {:#x}", argv, table.pointer_table)),
        );
        Ok(table)
    }

    /// Bootstrap, call `entry(bridge, argc, argv)`, and report the exit
    /// code to the host.
    pub fn run_entry<F>(&mut self, config: &BridgeConfig, entry: F) -> i32
    where
        F: FnOnce(&mut Self, i32, u32) -> BridgeResult<i32>,
    {
        let result = self
            .bootstrap(config)
            .and_then(|table| entry(self, table.argc(), table.pointer_table));
        let code = exit_code_for(result, &mut self.host);
        self.trace(TraceCategory::Process, "exit", Some(format!("code={}", code)));
        self.host.exit(code);
        code
    }
}
