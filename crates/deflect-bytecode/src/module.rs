//! Bytecode module format
//!
//! A [`Module`] is the in-memory form of a compiled program module: a string
//! constant pool, a method table of [`MethodIdentity`] values referenced by
//! call instructions, and function bodies with their exception regions.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::identity::MethodIdentity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic number for deflect bytecode modules: "DFLC"
pub const MAGIC: [u8; 4] = *b"DFLC";

/// Current bytecode version
pub const VERSION: u32 = 1;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected DFLC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// A compiled module
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic number (must be "DFLC")
    pub magic: [u8; 4],
    /// Bytecode version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// String constant pool
    pub strings: Vec<String>,
    /// Method table; call instructions reference entries by index
    pub methods: Vec<MethodIdentity>,
    /// Function definitions
    pub functions: Vec<Function>,
    /// Module metadata
    pub metadata: Metadata,
}

/// Module flags
pub mod flags {
    /// Module has been run through the instrumenter at least once
    pub const INSTRUMENTED: u32 = 1 << 0;
}

/// An exception-handling region inside a function body
///
/// Offsets are byte offsets into the function's code and must land on
/// instruction boundaries. `try` and `handler` ranges are half-open. When a
/// value is thrown at an offset inside `[try_start, try_end)`, control
/// transfers to `handler_start` with the thrown value pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    /// Start of the protected range (inclusive)
    pub try_start: u32,
    /// End of the protected range (exclusive)
    pub try_end: u32,
    /// Start of the handler (inclusive)
    pub handler_start: u32,
    /// End of the handler (exclusive)
    pub handler_end: u32,
}

impl ExceptionRegion {
    /// Whether the given code offset lies inside the protected range
    pub fn covers(&self, offset: u32) -> bool {
        offset >= self.try_start && offset < self.try_end
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.try_start);
        writer.emit_u32(self.try_end);
        writer.emit_u32(self.handler_start);
        writer.emit_u32(self.handler_end);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            try_start: reader.read_u32()?,
            try_end: reader.read_u32()?,
            handler_start: reader.read_u32()?,
            handler_end: reader.read_u32()?,
        })
    }
}

/// Function definition
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name; members use the `"Declaring.member"` form
    pub name: String,
    /// Number of parameters (occupying the first local slots)
    pub param_count: usize,
    /// Number of local variables, including parameters
    pub local_count: usize,
    /// Bytecode instructions
    pub code: Vec<u8>,
    /// Exception-handling regions, innermost first
    pub exception_regions: Vec<ExceptionRegion>,
}

impl Function {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u32(self.param_count as u32);
        writer.emit_u32(self.local_count as u32);

        writer.emit_u32(self.code.len() as u32);
        writer.buffer.extend_from_slice(&self.code);

        writer.emit_u32(self.exception_regions.len() as u32);
        for region in &self.exception_regions {
            region.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let param_count = reader.read_u32()? as usize;
        let local_count = reader.read_u32()? as usize;

        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;

        let region_count = reader.read_u32()? as usize;
        let mut exception_regions = Vec::with_capacity(region_count);
        for _ in 0..region_count {
            exception_regions.push(ExceptionRegion::decode(reader)?);
        }

        Ok(Self {
            name,
            param_count,
            local_count,
            code,
            exception_regions,
        })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Module name
    pub name: String,
    /// Source file path
    pub source_file: Option<String>,
}

impl Metadata {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        match &self.source_file {
            Some(path) => {
                writer.emit_u8(1);
                writer.emit_string(path);
            }
            None => {
                writer.emit_u8(0);
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let has_source = reader.read_u8()? != 0;
        let source_file = if has_source {
            Some(reader.read_string()?)
        } else {
            None
        };
        Ok(Self { name, source_file })
    }
}

impl Module {
    /// Create a new empty module
    pub fn new(name: String) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            strings: Vec::new(),
            methods: Vec::new(),
            functions: Vec::new(),
            metadata: Metadata {
                name,
                source_file: None,
            },
        }
    }

    /// Validate module structure
    pub fn validate(&self) -> Result<(), String> {
        if self.magic != MAGIC {
            return Err("Invalid magic number".to_string());
        }
        if self.version != VERSION {
            return Err(format!("Unsupported version: {}", self.version));
        }
        Ok(())
    }

    /// Add a string to the constant pool, returning its index.
    /// Existing entries are reused.
    pub fn add_string(&mut self, value: impl Into<String>) -> u32 {
        let value = value.into();
        if let Some(idx) = self.strings.iter().position(|s| *s == value) {
            return idx as u32;
        }
        self.strings.push(value);
        (self.strings.len() - 1) as u32
    }

    /// Get a string from the constant pool
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    /// Add a method identity to the method table, returning its index.
    /// Structurally equal identities are reused.
    pub fn add_method(&mut self, identity: MethodIdentity) -> u32 {
        if let Some(idx) = self.methods.iter().position(|m| *m == identity) {
            return idx as u32;
        }
        self.methods.push(identity);
        (self.methods.len() - 1) as u32
    }

    /// Get a method identity from the method table
    pub fn get_method(&self, index: u32) -> Option<&MethodIdentity> {
        self.methods.get(index as usize)
    }

    /// Encode the module to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - String pool
    /// - Method table
    /// - Function table
    /// - Metadata
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        let header_start = writer.offset();
        writer.buffer.extend_from_slice(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0); // Placeholder for checksum

        writer.emit_u32(self.strings.len() as u32);
        for string in &self.strings {
            writer.emit_string(string);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            func.encode(&mut writer);
        }

        self.metadata.encode(&mut writer);

        // CRC32 of everything after the header
        let payload = &writer.buffer[header_start + 16..];
        let checksum = crc32fast::hash(payload);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&magic_bytes);
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let payload = &data[16..];
        let calculated_checksum = crc32fast::hash(payload);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let string_count = reader.read_u32()? as usize;
        let mut strings = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            strings.push(reader.read_string()?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MethodIdentity::decode(&mut reader)?);
        }

        let func_count = reader.read_u32()? as usize;
        let mut functions = Vec::with_capacity(func_count);
        for _ in 0..func_count {
            functions.push(Function::decode(&mut reader)?);
        }

        let metadata = Metadata::decode(&mut reader)?;

        Ok(Self {
            magic,
            version,
            flags,
            strings,
            methods,
            functions,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;
    use crate::identity::TypeSig;

    #[test]
    fn test_module_creation() {
        let module = Module::new("test".to_string());
        assert_eq!(module.magic, MAGIC);
        assert_eq!(module.version, VERSION);
        assert_eq!(module.flags, 0);
        assert!(module.validate().is_ok());
    }

    #[test]
    fn test_empty_module_roundtrip() {
        let module = Module::new("test_module".to_string());
        let bytes = module.encode();

        let decoded = Module::decode(&bytes).unwrap();
        assert_eq!(decoded.magic, MAGIC);
        assert_eq!(decoded.metadata.name, "test_module");
        assert!(decoded.methods.is_empty());
        assert!(decoded.functions.is_empty());
    }

    #[test]
    fn test_method_table_dedup() {
        let mut module = Module::new("test".to_string());
        let id = MethodIdentity::static_method("Console", "write_line", vec![], TypeSig::Void);
        let a = module.add_method(id.clone());
        let b = module.add_method(id);
        assert_eq!(a, b);
        assert_eq!(module.methods.len(), 1);
    }

    #[test]
    fn test_string_pool_dedup() {
        let mut module = Module::new("test".to_string());
        let a = module.add_string("hello");
        let b = module.add_string("hello");
        let c = module.add_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.get_string(a), Some("hello"));
        assert_eq!(module.get_string(c), Some("world"));
    }

    #[test]
    fn test_module_with_function_roundtrip() {
        let mut module = Module::new("test".to_string());

        let target = module.add_method(MethodIdentity::static_method(
            "Console",
            "write_line",
            vec![TypeSig::Str],
            TypeSig::Void,
        ));
        let msg = module.add_string("hi");

        let mut writer = BytecodeWriter::new();
        writer.emit_const_str(msg);
        writer.emit_call(target, 1);
        writer.emit_return_void();

        module.functions.push(Function {
            name: "Sample.do_something".to_string(),
            param_count: 0,
            local_count: 0,
            code: writer.into_bytes(),
            exception_regions: Vec::new(),
        });

        let bytes = module.encode();
        let decoded = Module::decode(&bytes).unwrap();

        assert_eq!(decoded.functions.len(), 1);
        assert_eq!(decoded.functions[0].name, "Sample.do_something");
        assert_eq!(decoded.methods.len(), 1);
        assert_eq!(decoded.methods[0].member_name, "write_line");
        assert_eq!(decoded.functions[0].code, module.functions[0].code);
    }

    #[test]
    fn test_exception_regions_roundtrip() {
        let mut module = Module::new("test".to_string());

        let mut writer = BytecodeWriter::new();
        writer.emit_const_null(); // 0
        writer.emit_throw(); // 1
        writer.emit_pop(); // 2 (handler: discard thrown value)
        writer.emit_return_void(); // 3

        module.functions.push(Function {
            name: "guarded".to_string(),
            param_count: 0,
            local_count: 0,
            code: writer.into_bytes(),
            exception_regions: vec![ExceptionRegion {
                try_start: 0,
                try_end: 2,
                handler_start: 2,
                handler_end: 4,
            }],
        });

        let bytes = module.encode();
        let decoded = Module::decode(&bytes).unwrap();

        assert_eq!(decoded.functions[0].exception_regions.len(), 1);
        let region = decoded.functions[0].exception_regions[0];
        assert!(region.covers(1));
        assert!(!region.covers(2));
    }

    #[test]
    fn test_checksum_validation() {
        let mut module = Module::new("test".to_string());
        module.add_string("payload");
        let mut bytes = module.encode();

        // Corrupt a byte after the header
        bytes[20] ^= 0xFF;
        let result = Module::decode(&bytes);
        assert!(matches!(result, Err(ModuleError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_invalid_magic_number() {
        let mut bytes = vec![b'X', b'X', b'X', b'X'];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let result = Module::decode(&bytes);
        assert!(matches!(result, Err(ModuleError::InvalidMagic(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DFLC");
        bytes.extend_from_slice(&999u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let result = Module::decode(&bytes);
        assert!(matches!(result, Err(ModuleError::UnsupportedVersion(999))));
    }
}
