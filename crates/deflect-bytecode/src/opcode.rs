//! Bytecode opcodes for deflect modules
//!
//! Defines the instruction set the rewriting engine operates on. The set is
//! deliberately small: enough stack, local, and control-flow surface to host
//! realistic method bodies, plus the call family the instrumenter targets and
//! the `InterceptCall` hook it emits.

/// Bytecode opcode enumeration
///
/// All opcodes are single-byte instructions. Some opcodes take additional
/// operands that follow the opcode byte in the bytecode stream.
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack manipulation & constants
/// - 0x10-0x1F: Local variables
/// - 0x20-0x2F: Integer arithmetic
/// - 0x50-0x5F: Integer comparison
/// - 0x90-0x9F: Control flow
/// - 0xA0-0xAF: Call family & the interception hook
/// - 0xE0-0xEF: Error handling
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,

    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit integer constant (operand: i64)
    ConstI64 = 0x08,
    /// Push 64-bit float constant (operand: f64)
    ConstF64 = 0x09,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x0A,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,

    // ===== Integer Arithmetic (0x20-0x2F) =====
    /// Integer addition: pop b, pop a, push a + b
    Iadd = 0x20,
    /// Integer subtraction: pop b, pop a, push a - b
    Isub = 0x21,

    // ===== Integer Comparison (0x50-0x5F) =====
    /// Integer equality: pop b, pop a, push a == b
    Ieq = 0x50,
    /// Integer less than: pop b, pop a, push a < b
    Ilt = 0x52,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 offset)
    Jmp = 0x90,
    /// Jump if false: pop a, if !a jump (operand: i32 offset)
    JmpIfFalse = 0x91,

    // ===== Call Family & Hook (0xA0-0xAF) =====
    /// Call static or free function (operands: u32 methodIndex, u16 argCount)
    Call = 0xA0,
    /// Call instance method, receiver beneath the arguments
    /// (operands: u32 methodIndex, u16 argCount)
    CallVirtual = 0xA1,
    /// Return from function (pop return value)
    Return = 0xA2,
    /// Return from void function
    ReturnVoid = 0xA3,
    /// Construct object via constructor call, pushes the new instance
    /// (operands: u32 methodIndex, u16 argCount)
    NewObject = 0xA4,
    /// Property getter call: pop receiver, push value (operand: u32 methodIndex)
    GetProperty = 0xA6,
    /// Property setter call: pop value, pop receiver (operand: u32 methodIndex)
    SetProperty = 0xA7,
    /// Dispatch hook inserted by instrumentation in place of a call-family
    /// instruction (operands: u32 methodIndex, u16 argCount). The method
    /// index is the identity token naming the original target.
    InterceptCall = 0xAF,

    // ===== Error Handling (0xE0-0xEF) =====
    /// Throw exception: pop error value
    Throw = 0xE3,
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x08 => Some(Self::ConstI64),
            0x09 => Some(Self::ConstF64),
            0x0A => Some(Self::ConstStr),

            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),

            0x20 => Some(Self::Iadd),
            0x21 => Some(Self::Isub),

            0x50 => Some(Self::Ieq),
            0x52 => Some(Self::Ilt),

            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfFalse),

            0xA0 => Some(Self::Call),
            0xA1 => Some(Self::CallVirtual),
            0xA2 => Some(Self::Return),
            0xA3 => Some(Self::ReturnVoid),
            0xA4 => Some(Self::NewObject),
            0xA6 => Some(Self::GetProperty),
            0xA7 => Some(Self::SetProperty),
            0xAF => Some(Self::InterceptCall),

            0xE3 => Some(Self::Throw),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstI32 => "CONST_I32",
            Self::ConstI64 => "CONST_I64",
            Self::ConstF64 => "CONST_F64",
            Self::ConstStr => "CONST_STR",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::Iadd => "IADD",
            Self::Isub => "ISUB",
            Self::Ieq => "IEQ",
            Self::Ilt => "ILT",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::Call => "CALL",
            Self::CallVirtual => "CALL_VIRTUAL",
            Self::Return => "RETURN",
            Self::ReturnVoid => "RETURN_VOID",
            Self::NewObject => "NEW_OBJECT",
            Self::GetProperty => "GET_PROPERTY",
            Self::SetProperty => "SET_PROPERTY",
            Self::InterceptCall => "INTERCEPT_CALL",
            Self::Throw => "THROW",
        }
    }

    /// Size in bytes of the operands following this opcode
    pub fn operand_size(self) -> usize {
        match self {
            Self::Nop
            | Self::Pop
            | Self::Dup
            | Self::ConstNull
            | Self::ConstTrue
            | Self::ConstFalse
            | Self::Iadd
            | Self::Isub
            | Self::Ieq
            | Self::Ilt
            | Self::Return
            | Self::ReturnVoid
            | Self::Throw => 0,

            // 2-byte operands (u16)
            Self::LoadLocal | Self::StoreLocal => 2,

            // 4-byte operands (i32 or u32)
            Self::ConstI32 | Self::ConstStr | Self::Jmp | Self::JmpIfFalse => 4,
            Self::GetProperty | Self::SetProperty => 4,

            // 6-byte operands (u32 + u16)
            Self::Call | Self::CallVirtual | Self::NewObject | Self::InterceptCall => 6,

            // 8-byte operands
            Self::ConstI64 | Self::ConstF64 => 8,
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::JmpIfFalse)
    }

    /// Check if this opcode is a call-family instruction, i.e. one the
    /// instrumenter may redirect. The hook itself is excluded so an already
    /// rewritten site is never wrapped a second time.
    pub fn is_call_family(self) -> bool {
        matches!(
            self,
            Self::Call
                | Self::CallVirtual
                | Self::NewObject
                | Self::GetProperty
                | Self::SetProperty
        )
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Check if this opcode terminates a basic block
    pub fn is_terminator(self) -> bool {
        self.is_jump() || self.is_return() || matches!(self, Self::Throw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            Opcode::Nop,
            Opcode::Pop,
            Opcode::Dup,
            Opcode::ConstNull,
            Opcode::ConstTrue,
            Opcode::ConstFalse,
            Opcode::ConstI32,
            Opcode::ConstI64,
            Opcode::ConstF64,
            Opcode::ConstStr,
            Opcode::LoadLocal,
            Opcode::StoreLocal,
            Opcode::Iadd,
            Opcode::Isub,
            Opcode::Ieq,
            Opcode::Ilt,
            Opcode::Jmp,
            Opcode::JmpIfFalse,
            Opcode::Call,
            Opcode::CallVirtual,
            Opcode::Return,
            Opcode::ReturnVoid,
            Opcode::NewObject,
            Opcode::GetProperty,
            Opcode::SetProperty,
            Opcode::InterceptCall,
            Opcode::Throw,
        ];

        for opcode in &opcodes {
            let byte = opcode.to_u8();
            let decoded = Opcode::from_u8(byte);
            assert_eq!(decoded, Some(*opcode), "Failed roundtrip for {:?}", opcode);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0xFD), None);
        assert_eq!(Opcode::from_u8(0xFE), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
        assert_eq!(Opcode::from_u8(0x03), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Nop.name(), "NOP");
        assert_eq!(Opcode::Call.name(), "CALL");
        assert_eq!(Opcode::NewObject.name(), "NEW_OBJECT");
        assert_eq!(Opcode::InterceptCall.name(), "INTERCEPT_CALL");
    }

    #[test]
    fn test_call_family_detection() {
        assert!(Opcode::Call.is_call_family());
        assert!(Opcode::CallVirtual.is_call_family());
        assert!(Opcode::NewObject.is_call_family());
        assert!(Opcode::GetProperty.is_call_family());
        assert!(Opcode::SetProperty.is_call_family());
        // The hook is not a rewrite target
        assert!(!Opcode::InterceptCall.is_call_family());
        assert!(!Opcode::Return.is_call_family());
    }

    #[test]
    fn test_jump_detection() {
        assert!(Opcode::Jmp.is_jump());
        assert!(Opcode::JmpIfFalse.is_jump());
        assert!(!Opcode::Call.is_jump());
    }

    #[test]
    fn test_terminator_detection() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(Opcode::Jmp.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(!Opcode::Call.is_terminator());
        assert!(!Opcode::InterceptCall.is_terminator());
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(Opcode::Nop.operand_size(), 0);
        assert_eq!(Opcode::LoadLocal.operand_size(), 2);
        assert_eq!(Opcode::ConstI32.operand_size(), 4);
        assert_eq!(Opcode::GetProperty.operand_size(), 4);
        assert_eq!(Opcode::Call.operand_size(), 6);
        assert_eq!(Opcode::InterceptCall.operand_size(), 6);
        assert_eq!(Opcode::ConstF64.operand_size(), 8);
    }

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::Nop as u8, 0x00);
        assert_eq!(Opcode::LoadLocal as u8, 0x10);
        assert_eq!(Opcode::Call as u8, 0xA0);
        assert_eq!(Opcode::InterceptCall as u8, 0xAF);
        assert_eq!(Opcode::Throw as u8, 0xE3);
    }
}
