//! Module inspection
//!
//! A light pass over the binary before instantiation: enough to check the
//! guest links against this bridge and to report what it is missing in
//! plain words rather than as an opaque `LinkError`.

use super::abi::{IMPORT_NAMESPACE, MAX_SYSCALL_ARGS, exports, imports};
use super::error::{BridgeError, BridgeResult};
use super::softfloat;

/// WASM magic number: \0asm
const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// WASM version 1
const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

const SECTION_IMPORT: u8 = 2;
const SECTION_EXPORT: u8 = 7;

/// External kind byte of an import or export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

impl ExternKind {
    fn from_byte(byte: u8) -> BridgeResult<Self> {
        match byte {
            0 => Ok(Self::Func),
            1 => Ok(Self::Table),
            2 => Ok(Self::Memory),
            3 => Ok(Self::Global),
            4 => Ok(Self::Tag),
            other => Err(invalid(format!("unknown external kind {:#x}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ExternKind,
    /// Minimum page count, for memory imports
    pub min_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
}

/// What a guest module imports and exports
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleInfo {
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
}

fn invalid(reason: impl Into<String>) -> BridgeError {
    BridgeError::InvalidModule {
        reason: reason.into(),
    }
}

/// Byte cursor over a section payload
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn byte(&mut self) -> BridgeResult<u8> {
        let byte = *self
            .data
            .get(self.offset)
            .ok_or_else(|| invalid("unexpected end of section"))?;
        self.offset += 1;
        Ok(byte)
    }

    /// Unsigned LEB128, at most 5 bytes
    fn leb128(&mut self) -> BridgeResult<u32> {
        let mut result = 0u32;
        let mut shift = 0;

        for _ in 0..5 {
            let byte = self.byte()?;
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(invalid("invalid LEB128"))
    }

    fn bytes(&mut self, len: usize) -> BridgeResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| invalid("length extends past section"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn name(&mut self) -> BridgeResult<String> {
        let len = self.leb128()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }

    /// Table and memory limits, returning the minimum
    fn limits(&mut self) -> BridgeResult<u32> {
        let flags = self.byte()?;
        let min = self.leb128()?;
        if flags & 0x01 != 0 {
            self.leb128()?;
        }
        Ok(min)
    }
}

impl ModuleInfo {
    /// Parse the import and export sections of a module binary.
    ///
    /// Fails with `MissingExport` when there is no `main` function.
    pub fn parse(bytes: &[u8]) -> BridgeResult<Self> {
        if bytes.len() < 8 {
            return Err(invalid("module too small"));
        }
        if bytes[0..4] != WASM_MAGIC {
            return Err(invalid("invalid magic number"));
        }
        if bytes[4..8] != WASM_VERSION {
            return Err(invalid("unsupported WASM version"));
        }

        let mut info = ModuleInfo::default();
        let mut module = Reader::new(&bytes[8..]);
        while !module.is_empty() {
            let section_id = module.byte()?;
            let size = module.leb128()? as usize;
            let mut section = Reader::new(
                module
                    .bytes(size)
                    .map_err(|_| invalid("section extends past end of module"))?,
            );
            match section_id {
                SECTION_IMPORT => info.imports = parse_imports(&mut section)?,
                SECTION_EXPORT => info.exports = parse_exports(&mut section)?,
                _ => {}
            }
        }

        if !info.exports_func(exports::MAIN) {
            return Err(BridgeError::MissingExport {
                name: exports::MAIN,
            });
        }
        Ok(info)
    }

    fn exports_func(&self, name: &str) -> bool {
        self.exports
            .iter()
            .any(|e| e.name == name && e.kind == ExternKind::Func)
    }

    /// Whether argv should be placed with the guest's own allocator
    pub fn has_malloc(&self) -> bool {
        self.exports_func(exports::MALLOC)
    }

    /// Minimum page count of the imported memory, if any
    pub fn memory_min_pages(&self) -> Option<u32> {
        self.imports
            .iter()
            .find(|i| i.kind == ExternKind::Memory)
            .and_then(|i| i.min_pages)
    }

    /// Imports the bridge cannot satisfy, as `module.name`
    pub fn missing_imports(&self) -> Vec<String> {
        self.imports
            .iter()
            .filter(|i| !provides(i))
            .map(|i| format!("{}.{}", i.module, i.name))
            .collect()
    }
}

/// Whether the bridge's import object has an entry for `import`
pub fn provides(import: &Import) -> bool {
    if import.module != IMPORT_NAMESPACE {
        return false;
    }
    match import.kind {
        ExternKind::Memory => import.name == imports::MEMORY,
        ExternKind::Func => {
            let name = import.name.as_str();
            name == imports::SYSCALL_PACKED
                || name == imports::PRINT
                || name == imports::TRACE
                || name == imports::START
                || (0..=MAX_SYSCALL_ARGS).any(|n| imports::syscall_slot(n) == name)
                || softfloat::lookup(name).is_some()
        }
        _ => false,
    }
}

fn parse_imports(section: &mut Reader<'_>) -> BridgeResult<Vec<Import>> {
    let count = section.leb128()?;
    let mut imports = Vec::with_capacity(count.min(1024) as usize);

    for _ in 0..count {
        let module = section.name()?;
        let name = section.name()?;
        let kind = ExternKind::from_byte(section.byte()?)?;
        let mut min_pages = None;
        match kind {
            ExternKind::Func => {
                section.leb128()?;
            }
            ExternKind::Table => {
                section.byte()?;
                section.limits()?;
            }
            ExternKind::Memory => min_pages = Some(section.limits()?),
            ExternKind::Global => {
                section.byte()?;
                section.byte()?;
            }
            ExternKind::Tag => {
                section.byte()?;
                section.leb128()?;
            }
        }
        imports.push(Import {
            module,
            name,
            kind,
            min_pages,
        });
    }

    Ok(imports)
}

fn parse_exports(section: &mut Reader<'_>) -> BridgeResult<Vec<Export>> {
    let count = section.leb128()?;
    let mut exports = Vec::with_capacity(count.min(1024) as usize);

    for _ in 0..count {
        let name = section.name()?;
        let kind = ExternKind::from_byte(section.byte()?)?;
        section.leb128()?;
        exports.push(Export { name, kind });
    }

    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to build WASM module binaries
    struct WasmBuilder {
        bytes: Vec<u8>,
    }

    impl WasmBuilder {
        fn new() -> Self {
            Self {
                bytes: vec![
                    0x00, 0x61, 0x73, 0x6D, // magic: \0asm
                    0x01, 0x00, 0x00, 0x00, // version: 1
                ],
            }
        }

        fn push_leb128(bytes: &mut Vec<u8>, mut value: u32) {
            loop {
                let byte = (value & 0x7F) as u8;
                value >>= 7;
                if value == 0 {
                    bytes.push(byte);
                    break;
                } else {
                    bytes.push(byte | 0x80);
                }
            }
        }

        fn push_name(bytes: &mut Vec<u8>, name: &str) {
            Self::push_leb128(bytes, name.len() as u32);
            bytes.extend_from_slice(name.as_bytes());
        }

        fn section(mut self, id: u8, content: &[u8]) -> Self {
            self.bytes.push(id);
            Self::push_leb128(&mut self.bytes, content.len() as u32);
            self.bytes.extend_from_slice(content);
            self
        }

        /// Import section: `env.memory` (min pages) plus the named functions
        fn imports(self, memory_pages: u32, funcs: &[&str]) -> Self {
            let mut content = Vec::new();
            Self::push_leb128(&mut content, funcs.len() as u32 + 1);

            Self::push_name(&mut content, "env");
            Self::push_name(&mut content, "memory");
            content.push(0x02); // memory
            content.push(0x00); // no max
            Self::push_leb128(&mut content, memory_pages);

            for func in funcs {
                Self::push_name(&mut content, "env");
                Self::push_name(&mut content, func);
                content.push(0x00); // func
                content.push(0x00); // type 0
            }
            self.section(0x02, &content)
        }

        /// Export section with the named functions
        fn exports(self, funcs: &[&str]) -> Self {
            let mut content = Vec::new();
            Self::push_leb128(&mut content, funcs.len() as u32);
            for (index, func) in funcs.iter().enumerate() {
                Self::push_name(&mut content, func);
                content.push(0x00);
                Self::push_leb128(&mut content, index as u32);
            }
            self.section(0x07, &content)
        }

        fn build(self) -> Vec<u8> {
            self.bytes
        }
    }

    #[test]
    fn test_parse_guest() {
        let bytes = WasmBuilder::new()
            .section(0x01, &[0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F])
            .imports(3, &["__syscall3", "__syscall", "print", "__adddf3"])
            .exports(&["main", "malloc"])
            .build();

        let info = ModuleInfo::parse(&bytes).unwrap();
        assert_eq!(info.imports.len(), 5);
        assert_eq!(info.memory_min_pages(), Some(3));
        assert!(info.has_malloc());
        assert!(info.missing_imports().is_empty());
    }

    #[test]
    fn test_missing_imports() {
        let bytes = WasmBuilder::new()
            .imports(1, &["__syscall1", "__addtf3", "dlopen"])
            .exports(&["main"])
            .build();

        let info = ModuleInfo::parse(&bytes).unwrap();
        assert!(!info.has_malloc());
        assert_eq!(info.missing_imports(), vec!["env.__addtf3", "env.dlopen"]);
    }

    #[test]
    fn test_missing_main() {
        let bytes = WasmBuilder::new().exports(&["malloc"]).build();
        assert_eq!(
            ModuleInfo::parse(&bytes),
            Err(BridgeError::MissingExport { name: "main" })
        );
    }

    #[test]
    fn test_bad_header() {
        assert!(matches!(
            ModuleInfo::parse(&[0x00, 0x61]),
            Err(BridgeError::InvalidModule { .. })
        ));
        assert!(matches!(
            ModuleInfo::parse(&[0x7F, 0x45, 0x4C, 0x46, 1, 0, 0, 0]),
            Err(BridgeError::InvalidModule { .. })
        ));
        assert!(matches!(
            ModuleInfo::parse(&[0x00, 0x61, 0x73, 0x6D, 2, 0, 0, 0]),
            Err(BridgeError::InvalidModule { .. })
        ));
    }

    #[test]
    fn test_truncated_section() {
        let mut bytes = WasmBuilder::new().exports(&["main"]).build();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            ModuleInfo::parse(&bytes),
            Err(BridgeError::InvalidModule { .. })
        ));
    }

    #[test]
    fn test_foreign_namespace() {
        let import = Import {
            module: "wasi_snapshot_preview1".to_string(),
            name: "fd_write".to_string(),
            kind: ExternKind::Func,
            min_pages: None,
        };
        assert!(!provides(&import));
    }
}
