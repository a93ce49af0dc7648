//! Bytecode encoding and decoding utilities

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid tag byte in a structured record (type signature, member kind)
    #[error("Invalid tag {0:#04x} at offset {1}")]
    InvalidTag(u8, usize),
}

/// Bytecode writer for encoding instructions
///
/// Provides methods for emitting opcodes and their operands into a binary buffer.
pub struct BytecodeWriter {
    /// Internal buffer containing the bytecode
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    // ===== Opcode Emission =====

    /// Emit an opcode without operands
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit NOP instruction
    pub fn emit_nop(&mut self) {
        self.emit_opcode(Opcode::Nop);
    }

    /// Emit POP instruction
    pub fn emit_pop(&mut self) {
        self.emit_opcode(Opcode::Pop);
    }

    /// Emit DUP instruction
    pub fn emit_dup(&mut self) {
        self.emit_opcode(Opcode::Dup);
    }

    /// Emit CONST_NULL instruction
    pub fn emit_const_null(&mut self) {
        self.emit_opcode(Opcode::ConstNull);
    }

    /// Emit CONST_TRUE instruction
    pub fn emit_const_true(&mut self) {
        self.emit_opcode(Opcode::ConstTrue);
    }

    /// Emit CONST_FALSE instruction
    pub fn emit_const_false(&mut self) {
        self.emit_opcode(Opcode::ConstFalse);
    }

    /// Emit CONST_I32 instruction with value
    pub fn emit_const_i32(&mut self, value: i32) {
        self.emit_opcode(Opcode::ConstI32);
        self.emit_i32(value);
    }

    /// Emit CONST_I64 instruction with value
    pub fn emit_const_i64(&mut self, value: i64) {
        self.emit_opcode(Opcode::ConstI64);
        self.emit_i64(value);
    }

    /// Emit CONST_F64 instruction with value
    pub fn emit_const_f64(&mut self, value: f64) {
        self.emit_opcode(Opcode::ConstF64);
        self.emit_f64(value);
    }

    /// Emit CONST_STR instruction with constant pool index
    pub fn emit_const_str(&mut self, index: u32) {
        self.emit_opcode(Opcode::ConstStr);
        self.emit_u32(index);
    }

    /// Emit LOAD_LOCAL instruction
    pub fn emit_load_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::LoadLocal);
        self.emit_u16(index);
    }

    /// Emit STORE_LOCAL instruction
    pub fn emit_store_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::StoreLocal);
        self.emit_u16(index);
    }

    /// Emit IADD instruction
    pub fn emit_iadd(&mut self) {
        self.emit_opcode(Opcode::Iadd);
    }

    /// Emit ISUB instruction
    pub fn emit_isub(&mut self) {
        self.emit_opcode(Opcode::Isub);
    }

    /// Emit IEQ instruction
    pub fn emit_ieq(&mut self) {
        self.emit_opcode(Opcode::Ieq);
    }

    /// Emit ILT instruction
    pub fn emit_ilt(&mut self) {
        self.emit_opcode(Opcode::Ilt);
    }

    /// Emit JMP instruction
    pub fn emit_jmp(&mut self, offset: i32) {
        self.emit_opcode(Opcode::Jmp);
        self.emit_i32(offset);
    }

    /// Emit JMP_IF_FALSE instruction
    pub fn emit_jmp_if_false(&mut self, offset: i32) {
        self.emit_opcode(Opcode::JmpIfFalse);
        self.emit_i32(offset);
    }

    /// Emit CALL instruction
    pub fn emit_call(&mut self, method_index: u32, arg_count: u16) {
        self.emit_opcode(Opcode::Call);
        self.emit_u32(method_index);
        self.emit_u16(arg_count);
    }

    /// Emit CALL_VIRTUAL instruction
    pub fn emit_call_virtual(&mut self, method_index: u32, arg_count: u16) {
        self.emit_opcode(Opcode::CallVirtual);
        self.emit_u32(method_index);
        self.emit_u16(arg_count);
    }

    /// Emit RETURN instruction
    pub fn emit_return(&mut self) {
        self.emit_opcode(Opcode::Return);
    }

    /// Emit RETURN_VOID instruction
    pub fn emit_return_void(&mut self) {
        self.emit_opcode(Opcode::ReturnVoid);
    }

    /// Emit NEW_OBJECT instruction
    pub fn emit_new_object(&mut self, method_index: u32, arg_count: u16) {
        self.emit_opcode(Opcode::NewObject);
        self.emit_u32(method_index);
        self.emit_u16(arg_count);
    }

    /// Emit GET_PROPERTY instruction
    pub fn emit_get_property(&mut self, method_index: u32) {
        self.emit_opcode(Opcode::GetProperty);
        self.emit_u32(method_index);
    }

    /// Emit SET_PROPERTY instruction
    pub fn emit_set_property(&mut self, method_index: u32) {
        self.emit_opcode(Opcode::SetProperty);
        self.emit_u32(method_index);
    }

    /// Emit INTERCEPT_CALL hook instruction
    pub fn emit_intercept_call(&mut self, method_index: u32, arg_count: u16) {
        self.emit_opcode(Opcode::InterceptCall);
        self.emit_u32(method_index);
        self.emit_u16(arg_count);
    }

    /// Emit THROW instruction
    pub fn emit_throw(&mut self) {
        self.emit_opcode(Opcode::Throw);
    }

    // ===== Patching (for forward jumps) =====

    /// Patch a previously emitted i32 value at the given offset
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }

    /// Patch a previously emitted u32 value at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }

    /// Reserve space for an i32 value (returns offset for later patching)
    pub fn reserve_i32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_i32(0);
        offset
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader for decoding instructions
///
/// Provides methods for reading opcodes and their operands from a binary buffer.
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.position >= self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(i32::from_le_bytes(bytes))
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(i64::from_le_bytes(bytes))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(f64::from_le_bytes(bytes))
    }

    /// Read a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        if self.position + len > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(self.position - len))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = self.buffer[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.position + N > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_emission() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u16(0x1234);
        writer.emit_u32(0xABCD_EF01);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], 0x42);
        assert_eq!(bytes[1], 0x34); // Little-endian
        assert_eq!(bytes[2], 0x12);
        assert_eq!(bytes[3], 0x01);
        assert_eq!(bytes[4], 0xEF);
        assert_eq!(bytes[5], 0xCD);
        assert_eq!(bytes[6], 0xAB);
    }

    #[test]
    fn test_call_emission() {
        let mut writer = BytecodeWriter::new();
        writer.emit_call(123, 4);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], Opcode::Call.to_u8());
        let method_index = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        assert_eq!(method_index, 123);
        let arg_count = u16::from_le_bytes([bytes[5], bytes[6]]);
        assert_eq!(arg_count, 4);
    }

    #[test]
    fn test_hook_emission_matches_call_shape() {
        let mut writer = BytecodeWriter::new();
        writer.emit_intercept_call(7, 2);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], Opcode::InterceptCall.to_u8());
        assert_eq!(bytes.len(), 1 + Opcode::InterceptCall.operand_size());
    }

    #[test]
    fn test_jump_patching() {
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::JmpIfFalse);
        let patch_offset = writer.reserve_i32();
        writer.emit_const_i32(42);

        let jump_target = writer.offset();
        let jump_offset = jump_target as i32 - (patch_offset as i32 + 4);
        writer.patch_i32(patch_offset, jump_offset);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], Opcode::JmpIfFalse.to_u8());
        let patched = i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        assert_eq!(patched, jump_offset);
    }

    #[test]
    fn test_reader_primitives() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u16(0x1234);
        writer.emit_i32(-42);
        writer.emit_i64(-1_000_000_000_000);
        writer.emit_f64(3.5);

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);

        assert_eq!(reader.read_u8().unwrap(), 0x42);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), -42);
        assert_eq!(reader.read_i64().unwrap(), -1_000_000_000_000);
        assert_eq!(reader.read_f64().unwrap(), 3.5);
    }

    #[test]
    fn test_reader_bounds_checking() {
        let bytes = vec![0x01, 0x02];
        let mut reader = BytecodeReader::new(&bytes);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u8().unwrap(), 0x02);
        assert!(reader.read_u8().is_err());
        assert!(matches!(
            BytecodeReader::new(&[0x01]).read_u32(),
            Err(DecodeError::UnexpectedEnd(_))
        ));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut writer = BytecodeWriter::new();
        writer.emit_string("hello");

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);
        assert_eq!(reader.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_reader_opcode() {
        let mut writer = BytecodeWriter::new();
        writer.emit_nop();
        writer.emit_call(0, 0);

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);

        assert_eq!(reader.read_opcode().unwrap(), Opcode::Nop);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Call);
    }

    #[test]
    fn test_reader_invalid_opcode() {
        let bytes = vec![0xFF];
        let mut reader = BytecodeReader::new(&bytes);

        assert!(matches!(
            reader.read_opcode(),
            Err(DecodeError::InvalidOpcode(0xFF, 0))
        ));
    }

    #[test]
    fn test_position_tracking() {
        let mut writer = BytecodeWriter::new();
        writer.emit_nop();
        writer.emit_const_i32(42);
        writer.emit_call(0, 0);
        assert_eq!(writer.offset(), 1 + 5 + 7);

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);
        reader.read_opcode().unwrap();
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.remaining(), bytes.len() - 1);
    }
}
