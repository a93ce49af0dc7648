//! Bytecode verification
//!
//! Structural checks an instrumented module must still pass: decodable
//! instruction streams, jump targets on instruction boundaries, balanced
//! stacks, in-range method/constant/local references, and well-formed
//! exception regions. The stack effect of the call family and the hook is
//! computed from the method table, not guessed, so a rewrite that unbalanced
//! the stack is caught here.

use crate::module::{Function, Module};
use crate::opcode::Opcode;
use std::collections::HashSet;

/// Bytecode verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Invalid opcode
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// Offending byte
        opcode: u8,
        /// Byte offset in the function body
        offset: usize,
    },

    /// Truncated operand
    #[error("Truncated operand at offset {0}")]
    TruncatedOperand(usize),

    /// Stack underflow
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// Stack overflow
    #[error("Stack overflow at offset {0} (depth: {1})")]
    StackOverflow(usize, i32),

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Absolute target offset
        target: i64,
        /// Offset of the jump instruction
        offset: usize,
    },

    /// Invalid method table reference
    #[error("Invalid method table reference: index {index} at offset {offset}")]
    InvalidMethodRef {
        /// Method table index
        index: u32,
        /// Offset of the referencing instruction
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {index} at offset {offset}")]
    InvalidConstantRef {
        /// Constant pool index
        index: u32,
        /// Offset of the referencing instruction
        offset: usize,
    },

    /// Invalid local variable reference
    #[error("Invalid local variable reference: index {index} (max {max}) at offset {offset}")]
    InvalidLocalRef {
        /// Local slot index
        index: usize,
        /// Number of declared locals
        max: usize,
        /// Offset of the referencing instruction
        offset: usize,
    },

    /// Malformed exception region
    #[error("Invalid exception region in '{function}': {reason}")]
    InvalidExceptionRegion {
        /// Function owning the region
        function: String,
        /// What is wrong with it
        reason: String,
    },

    /// Execution falls off end
    #[error("Execution falls off end of function at offset {0}")]
    FallOffEnd(usize),

    /// Module validation error
    #[error("Module validation error: {0}")]
    ModuleValidation(String),
}

/// Verify a module's bytecode
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    module
        .validate()
        .map_err(VerifyError::ModuleValidation)?;

    for function in &module.functions {
        verify_function(function, module)?;
    }

    Ok(())
}

/// Verify a single function's bytecode
fn verify_function(function: &Function, module: &Module) -> Result<(), VerifyError> {
    // Empty functions are allowed
    if function.code.is_empty() {
        return Ok(());
    }

    let instructions = parse_instructions(&function.code)?;

    let mut boundaries: HashSet<usize> = instructions.iter().map(|i| i.offset).collect();
    boundaries.insert(function.code.len());

    verify_jump_targets(&instructions, &boundaries)?;
    verify_stack_depth(&instructions, function, module)?;
    verify_refs(&instructions, function, module)?;
    verify_exception_regions(function, &boundaries)?;

    // Execution must not run off the end of the body
    if let Some(last_instr) = instructions.last() {
        if !last_instr.opcode.is_terminator() {
            return Err(VerifyError::FallOffEnd(last_instr.offset));
        }
    }

    Ok(())
}

/// Parsed instruction
#[derive(Debug, Clone)]
struct Instruction {
    offset: usize,
    opcode: Opcode,
    operands: Vec<u8>,
}

/// Parse all instructions from bytecode
fn parse_instructions(code: &[u8]) -> Result<Vec<Instruction>, VerifyError> {
    let mut instructions = Vec::new();
    let mut position = 0usize;

    while position < code.len() {
        let offset = position;
        let byte = code[position];
        position += 1;

        let opcode = Opcode::from_u8(byte).ok_or(VerifyError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;

        let operand_size = opcode.operand_size();
        if position + operand_size > code.len() {
            return Err(VerifyError::TruncatedOperand(offset));
        }
        let operands = code[position..position + operand_size].to_vec();
        position += operand_size;

        instructions.push(Instruction {
            offset,
            opcode,
            operands,
        });
    }

    Ok(instructions)
}

fn operand_u32(instr: &Instruction) -> u32 {
    u32::from_le_bytes([
        instr.operands[0],
        instr.operands[1],
        instr.operands[2],
        instr.operands[3],
    ])
}

fn verify_jump_targets(
    instructions: &[Instruction],
    boundaries: &HashSet<usize>,
) -> Result<(), VerifyError> {
    for instr in instructions {
        if !instr.opcode.is_jump() {
            continue;
        }
        let rel = i32::from_le_bytes([
            instr.operands[0],
            instr.operands[1],
            instr.operands[2],
            instr.operands[3],
        ]);
        let operand_end = instr.offset as i64 + 1 + 4;
        let target = operand_end + rel as i64;
        let valid = usize::try_from(target)
            .map(|t| boundaries.contains(&t))
            .unwrap_or(false);
        if !valid {
            return Err(VerifyError::InvalidJumpTarget {
                target,
                offset: instr.offset,
            });
        }
    }
    Ok(())
}

/// Verify stack depth consistency using a linear pass
///
/// An exception handler is entered with the thrown value as the only stack
/// entry, so depth is reseeded to 1 at every handler start.
fn verify_stack_depth(
    instructions: &[Instruction],
    function: &Function,
    module: &Module,
) -> Result<(), VerifyError> {
    let mut stack_depth = 0i32;
    const MAX_STACK_DEPTH: i32 = 1024;

    for instr in instructions {
        let handler_entry = function
            .exception_regions
            .iter()
            .any(|region| region.handler_start as usize == instr.offset);
        if handler_entry {
            stack_depth = 1;
        }

        let (pops, pushes) = stack_effect(instr, module)?;

        if stack_depth < pops {
            return Err(VerifyError::StackUnderflow(instr.offset));
        }

        stack_depth -= pops;
        stack_depth += pushes;

        if stack_depth > MAX_STACK_DEPTH {
            return Err(VerifyError::StackOverflow(instr.offset, stack_depth));
        }
    }

    Ok(())
}

/// Stack effect (pops, pushes) of one instruction.
///
/// Call-family and hook effects come from the target identity in the method
/// table: argument count from the operand, receiver from the member kind,
/// result from the return shape.
fn stack_effect(instr: &Instruction, module: &Module) -> Result<(i32, i32), VerifyError> {
    let effect = match instr.opcode {
        Opcode::Nop => (0, 0),
        Opcode::Pop => (1, 0),
        Opcode::Dup => (1, 2),
        Opcode::ConstNull
        | Opcode::ConstTrue
        | Opcode::ConstFalse
        | Opcode::ConstI32
        | Opcode::ConstI64
        | Opcode::ConstF64
        | Opcode::ConstStr => (0, 1),
        Opcode::LoadLocal => (0, 1),
        Opcode::StoreLocal => (1, 0),
        Opcode::Iadd | Opcode::Isub | Opcode::Ieq | Opcode::Ilt => (2, 1),
        Opcode::Jmp => (0, 0),
        Opcode::JmpIfFalse => (1, 0),
        Opcode::Return => (1, 0),
        Opcode::ReturnVoid => (0, 0),
        Opcode::Throw => (1, 0),

        Opcode::Call | Opcode::CallVirtual | Opcode::NewObject | Opcode::InterceptCall => {
            let method_index = operand_u32(instr);
            let identity =
                module
                    .get_method(method_index)
                    .ok_or(VerifyError::InvalidMethodRef {
                        index: method_index,
                        offset: instr.offset,
                    })?;
            let arg_count =
                u16::from_le_bytes([instr.operands[4], instr.operands[5]]) as i32;

            let receiver = match instr.opcode {
                Opcode::CallVirtual => 1,
                Opcode::InterceptCall => {
                    if identity.kind.has_receiver() {
                        1
                    } else {
                        0
                    }
                }
                _ => 0,
            };
            let pushes = if identity.pushes_result() { 1 } else { 0 };
            (arg_count + receiver, pushes)
        }

        Opcode::GetProperty => (1, 1),
        Opcode::SetProperty => (2, 0),
    };
    Ok(effect)
}

/// Verify method table, constant pool, and local variable references
fn verify_refs(
    instructions: &[Instruction],
    function: &Function,
    module: &Module,
) -> Result<(), VerifyError> {
    let max_locals = function.local_count;

    for instr in instructions {
        match instr.opcode {
            Opcode::Call
            | Opcode::CallVirtual
            | Opcode::NewObject
            | Opcode::GetProperty
            | Opcode::SetProperty
            | Opcode::InterceptCall => {
                let index = operand_u32(instr);
                if module.get_method(index).is_none() {
                    return Err(VerifyError::InvalidMethodRef {
                        index,
                        offset: instr.offset,
                    });
                }
            }
            Opcode::ConstStr => {
                let index = operand_u32(instr);
                if module.get_string(index).is_none() {
                    return Err(VerifyError::InvalidConstantRef {
                        index,
                        offset: instr.offset,
                    });
                }
            }
            Opcode::LoadLocal | Opcode::StoreLocal => {
                let index =
                    u16::from_le_bytes([instr.operands[0], instr.operands[1]]) as usize;
                if index >= max_locals {
                    return Err(VerifyError::InvalidLocalRef {
                        index,
                        max: max_locals,
                        offset: instr.offset,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Verify exception regions are ordered and land on instruction boundaries
fn verify_exception_regions(
    function: &Function,
    boundaries: &HashSet<usize>,
) -> Result<(), VerifyError> {
    for region in &function.exception_regions {
        if region.try_start >= region.try_end {
            return Err(VerifyError::InvalidExceptionRegion {
                function: function.name.clone(),
                reason: format!("empty try range {}..{}", region.try_start, region.try_end),
            });
        }
        if region.handler_start >= region.handler_end {
            return Err(VerifyError::InvalidExceptionRegion {
                function: function.name.clone(),
                reason: format!(
                    "empty handler range {}..{}",
                    region.handler_start, region.handler_end
                ),
            });
        }
        // A handler covered by its own try range would re-enter itself on
        // any throw inside the handler.
        if region.handler_start < region.try_end && region.try_start < region.handler_end {
            return Err(VerifyError::InvalidExceptionRegion {
                function: function.name.clone(),
                reason: format!(
                    "handler range {}..{} overlaps try range {}..{}",
                    region.handler_start, region.handler_end, region.try_start, region.try_end
                ),
            });
        }
        for offset in [
            region.try_start,
            region.try_end,
            region.handler_start,
            region.handler_end,
        ] {
            if !boundaries.contains(&(offset as usize)) {
                return Err(VerifyError::InvalidExceptionRegion {
                    function: function.name.clone(),
                    reason: format!("offset {} is not an instruction boundary", offset),
                });
            }
        }
    }
    Ok(())
}
