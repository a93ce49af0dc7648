//! Call-site instrumentation
//!
//! Walks every function body in a module, finds call-family instructions
//! whose resolved target identity satisfies a [`CallSelector`], and rewrites
//! each one into an [`Opcode::InterceptCall`] hook carrying the target's
//! method-table token. Arguments and receiver stay on the stack in their
//! original evaluation order; the hook's stack effect matches the original
//! call's, so instrumented bodies still verify.
//!
//! Rewrites can change instruction sizes (property accessors widen by two
//! bytes), so the pass relocates every relative jump and every exception
//! region through an old-offset to new-offset map.

use crate::encoder::BytecodeWriter;
use crate::module::{flags, ExceptionRegion, Function, Module};
use crate::opcode::Opcode;
use crate::selector::CallSelector;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Instrumentation errors
///
/// All failures abort the whole pass; the input module is never modified.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// A method body could not be safely decoded or re-encoded.
    /// Fatal for the requested pass and not retryable.
    #[error("Unsupported body format in '{function}' at offset {offset}: {reason}")]
    UnsupportedBodyFormat {
        /// Function whose body failed to decode
        function: String,
        /// Byte offset of the offending position
        offset: usize,
        /// What made the body undecodable
        reason: String,
    },
}

/// Result of an instrumentation pass
#[derive(Debug)]
pub struct InstrumentedModule {
    /// The rewritten module
    pub module: Module,
    /// Number of call sites redirected through the hook
    pub rewritten_sites: usize,
}

/// A decoded instruction, instrumentation-time only
#[derive(Debug, Clone)]
struct Instruction {
    offset: usize,
    opcode: Opcode,
    operands: Vec<u8>,
}

impl Instruction {
    fn size(&self) -> usize {
        1 + self.operands.len()
    }

    fn operand_u32(&self) -> u32 {
        u32::from_le_bytes([
            self.operands[0],
            self.operands[1],
            self.operands[2],
            self.operands[3],
        ])
    }

    fn operand_u16_at_4(&self) -> u16 {
        u16::from_le_bytes([self.operands[4], self.operands[5]])
    }

    fn jump_rel(&self) -> i32 {
        i32::from_le_bytes([
            self.operands[0],
            self.operands[1],
            self.operands[2],
            self.operands[3],
        ])
    }
}

/// Instrument a module: every call-family instruction whose target identity
/// satisfies `selector` is rewritten to route through the dispatch hook.
///
/// Already-rewritten hook sites are left alone, so re-instrumenting with the
/// same selector is a no-op. On any decode failure the input module is left
/// untouched and the whole pass fails.
pub fn instrument(
    module: &Module,
    selector: &CallSelector,
) -> Result<InstrumentedModule, InstrumentError> {
    let mut rewritten = module.clone();
    let mut total_sites = 0;

    for function in &mut rewritten.functions {
        total_sites += rewrite_body(function, &module.methods, selector)?;
    }

    if total_sites > 0 {
        rewritten.flags |= flags::INSTRUMENTED;
    }

    Ok(InstrumentedModule {
        module: rewritten,
        rewritten_sites: total_sites,
    })
}

/// Rewrite one function body in place; returns the number of redirected sites.
fn rewrite_body(
    function: &mut Function,
    methods: &[crate::identity::MethodIdentity],
    selector: &CallSelector,
) -> Result<usize, InstrumentError> {
    if function.code.is_empty() {
        return Ok(0);
    }

    let instructions = parse_instructions(&function.name, &function.code)?;

    // Decide the replacement opcode and hook operands for each instruction.
    let mut rewrites: Vec<Option<(u32, u16)>> = Vec::with_capacity(instructions.len());
    let mut site_count = 0;
    for instr in &instructions {
        if !instr.opcode.is_call_family() {
            rewrites.push(None);
            continue;
        }

        let method_index = instr.operand_u32();
        let identity = methods.get(method_index as usize).ok_or_else(|| {
            InstrumentError::UnsupportedBodyFormat {
                function: function.name.clone(),
                offset: instr.offset,
                reason: format!("method index {} out of range", method_index),
            }
        })?;

        if !selector.matches(identity) {
            rewrites.push(None);
            continue;
        }

        // Argument count as the hook sees it. The receiver is not part of
        // the count; the identity's kind tells the dispatcher whether one
        // sits beneath the arguments.
        let arg_count = match instr.opcode {
            Opcode::Call | Opcode::CallVirtual | Opcode::NewObject => instr.operand_u16_at_4(),
            Opcode::GetProperty => 0,
            Opcode::SetProperty => 1,
            _ => unreachable!("is_call_family covers exactly the call opcodes"),
        };

        rewrites.push(Some((method_index, arg_count)));
        site_count += 1;
    }

    if site_count == 0 {
        return Ok(0);
    }

    // First pass: compute the new offset of every instruction boundary.
    let mut offset_map: FxHashMap<usize, usize> = FxHashMap::default();
    let mut new_offset = 0usize;
    for (instr, rewrite) in instructions.iter().zip(&rewrites) {
        offset_map.insert(instr.offset, new_offset);
        new_offset += match rewrite {
            Some(_) => 1 + Opcode::InterceptCall.operand_size(),
            None => instr.size(),
        };
    }
    // End-of-code is a valid boundary for exclusive region ends.
    offset_map.insert(function.code.len(), new_offset);

    // Second pass: re-emit with relocated jump targets.
    let mut writer = BytecodeWriter::with_capacity(new_offset);
    for (instr, rewrite) in instructions.iter().zip(&rewrites) {
        if let Some((method_index, arg_count)) = rewrite {
            writer.emit_intercept_call(*method_index, *arg_count);
            continue;
        }

        if instr.opcode.is_jump() {
            let operand_end = instr.offset + instr.size();
            let old_target = operand_end as i64 + instr.jump_rel() as i64;
            let old_target = usize::try_from(old_target).ok();
            let new_target = old_target.and_then(|t| offset_map.get(&t)).copied().ok_or_else(
                || InstrumentError::UnsupportedBodyFormat {
                    function: function.name.clone(),
                    offset: instr.offset,
                    reason: "jump target not on an instruction boundary".to_string(),
                },
            )?;

            let new_operand_end = offset_map[&instr.offset] + instr.size();
            let new_rel = new_target as i64 - new_operand_end as i64;
            writer.emit_opcode(instr.opcode);
            writer.emit_i32(new_rel as i32);
            continue;
        }

        writer.emit_opcode(instr.opcode);
        writer.buffer.extend_from_slice(&instr.operands);
    }

    // Relocate exception regions; every boundary must survive as a boundary.
    let mut new_regions = Vec::with_capacity(function.exception_regions.len());
    for region in &function.exception_regions {
        let relocate = |offset: u32| -> Result<u32, InstrumentError> {
            offset_map.get(&(offset as usize)).map(|o| *o as u32).ok_or_else(|| {
                InstrumentError::UnsupportedBodyFormat {
                    function: function.name.clone(),
                    offset: offset as usize,
                    reason: "exception region boundary not on an instruction boundary".to_string(),
                }
            })
        };
        new_regions.push(ExceptionRegion {
            try_start: relocate(region.try_start)?,
            try_end: relocate(region.try_end)?,
            handler_start: relocate(region.handler_start)?,
            handler_end: relocate(region.handler_end)?,
        });
    }

    function.code = writer.into_bytes();
    function.exception_regions = new_regions;
    Ok(site_count)
}

/// Decode a body into its linear instruction sequence
fn parse_instructions(
    function_name: &str,
    code: &[u8],
) -> Result<Vec<Instruction>, InstrumentError> {
    let mut instructions = Vec::new();
    let mut position = 0usize;

    while position < code.len() {
        let offset = position;
        let byte = code[position];
        position += 1;

        let opcode =
            Opcode::from_u8(byte).ok_or_else(|| InstrumentError::UnsupportedBodyFormat {
                function: function_name.to_string(),
                offset,
                reason: format!("invalid opcode {:#04x}", byte),
            })?;

        let operand_size = opcode.operand_size();
        if position + operand_size > code.len() {
            return Err(InstrumentError::UnsupportedBodyFormat {
                function: function_name.to_string(),
                offset,
                reason: "truncated operand".to_string(),
            });
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
