//! Module interpreter
//!
//! A small stack interpreter for module functions, enough to execute
//! instrumented code end to end. Uninstrumented call-family instructions
//! resolve within the module: plain and virtual calls look up the function
//! named `"Declaring.member"`, constructor calls build a bare instance, and
//! property instructions read or write instance fields by member name.
//! `InterceptCall` sites land in the [`RuntimeDispatcher`].
//!
//! `Throw` unwinds to the innermost exception region covering the throwing
//! instruction, clearing the operand stack and pushing the thrown value at
//! the handler. A thrown value that escapes every region in every frame
//! surfaces as [`RuntimeError::UncaughtException`].

use crate::dispatch::RuntimeDispatcher;
use crate::error::RuntimeError;
use crate::registry::InterceptionRegistry;
use crate::value::{Instance, Value};
use deflect_bytecode::{Function, Module, Opcode};
use rustc_hash::FxHashMap;

/// Executes functions of one module against one registry
pub struct Interpreter<'r> {
    module: &'r Module,
    dispatcher: RuntimeDispatcher<'r>,
    functions: FxHashMap<&'r str, usize>,
}

impl<'r> Interpreter<'r> {
    /// Create an interpreter for a module, dispatching intercepted calls
    /// through the given registry
    pub fn new(module: &'r Module, registry: &'r InterceptionRegistry) -> Self {
        let functions = module
            .functions
            .iter()
            .enumerate()
            .map(|(index, function)| (function.name.as_str(), index))
            .collect();
        Self {
            module,
            dispatcher: RuntimeDispatcher::new(registry),
            functions,
        }
    }

    /// Call a function by name. Arguments fill the leading local slots; the
    /// result is the returned value, [`Value::Null`] for void functions.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let index = *self
            .functions
            .get(name)
            .ok_or_else(|| RuntimeError::UnresolvedCall {
                name: name.to_string(),
            })?;
        let function = &self.module.functions[index];

        if args.len() != function.param_count {
            return Err(RuntimeError::ArityMismatch {
                function: function.name.clone(),
                expected: function.param_count,
                got: args.len(),
            });
        }

        let mut locals = vec![Value::Null; function.local_count.max(args.len())];
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = arg;
        }
        self.execute(function, locals)
    }

    fn execute(&self, function: &Function, mut locals: Vec<Value>) -> Result<Value, RuntimeError> {
        let code = &function.code;
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        while pc < code.len() {
            let offset = pc;
            let opcode = Opcode::from_u8(code[pc]).ok_or(RuntimeError::MalformedBytecode {
                function: function.name.clone(),
                offset,
            })?;
            pc += 1;

            let operand_end = offset + 1 + opcode.operand_size();
            if operand_end > code.len() {
                return Err(RuntimeError::MalformedBytecode {
                    function: function.name.clone(),
                    offset,
                });
            }

            match opcode {
                Opcode::Nop => {}
                Opcode::Pop => {
                    self.pop(function, offset, &mut stack)?;
                }
                Opcode::Dup => {
                    let top = self.pop(function, offset, &mut stack)?;
                    stack.push(top.clone());
                    stack.push(top);
                }

                Opcode::ConstNull => stack.push(Value::Null),
                Opcode::ConstTrue => stack.push(Value::Bool(true)),
                Opcode::ConstFalse => stack.push(Value::Bool(false)),
                Opcode::ConstI32 => {
                    stack.push(Value::I32(read_i32(code, pc)));
                    pc += 4;
                }
                Opcode::ConstI64 => {
                    stack.push(Value::I64(read_i64(code, pc)));
                    pc += 8;
                }
                Opcode::ConstF64 => {
                    stack.push(Value::F64(read_f64(code, pc)));
                    pc += 8;
                }
                Opcode::ConstStr => {
                    let index = read_u32(code, pc);
                    pc += 4;
                    let value = self
                        .module
                        .get_string(index)
                        .ok_or(RuntimeError::InvalidConstant(index))?;
                    stack.push(Value::Str(value.to_string()));
                }

                Opcode::LoadLocal => {
                    let index = read_u16(code, pc) as usize;
                    pc += 2;
                    let value =
                        locals
                            .get(index)
                            .cloned()
                            .ok_or_else(|| RuntimeError::InvalidLocal {
                                function: function.name.clone(),
                                index,
                            })?;
                    stack.push(value);
                }
                Opcode::StoreLocal => {
                    let index = read_u16(code, pc) as usize;
                    pc += 2;
                    let value = self.pop(function, offset, &mut stack)?;
                    let slot =
                        locals
                            .get_mut(index)
                            .ok_or_else(|| RuntimeError::InvalidLocal {
                                function: function.name.clone(),
                                index,
                            })?;
                    *slot = value;
                }

                Opcode::Iadd | Opcode::Isub | Opcode::Ieq | Opcode::Ilt => {
                    let b = self.pop_i32(function, offset, &mut stack)?;
                    let a = self.pop_i32(function, offset, &mut stack)?;
                    stack.push(match opcode {
                        Opcode::Iadd => Value::I32(a.wrapping_add(b)),
                        Opcode::Isub => Value::I32(a.wrapping_sub(b)),
                        Opcode::Ieq => Value::Bool(a == b),
                        Opcode::Ilt => Value::Bool(a < b),
                        _ => unreachable!(),
                    });
                }

                Opcode::Jmp => {
                    let rel = read_i32(code, pc);
                    pc = jump_target(function, offset, operand_end, rel)?;
                }
                Opcode::JmpIfFalse => {
                    let rel = read_i32(code, pc);
                    pc += 4;
                    let condition = match self.pop(function, offset, &mut stack)? {
                        Value::Bool(b) => b,
                        other => {
                            return Err(RuntimeError::TypeMismatch {
                                function: function.name.clone(),
                                offset,
                                expected: "bool",
                                got: other.type_name(),
                            })
                        }
                    };
                    if !condition {
                        pc = jump_target(function, offset, operand_end, rel)?;
                    }
                }

                Opcode::Call | Opcode::CallVirtual => {
                    let identity = self.method_at(code, pc)?;
                    let arg_count = read_u16(code, pc + 4) as usize;
                    pc += 6;

                    let mut args = self.pop_args(function, offset, &mut stack, arg_count)?;
                    if opcode == Opcode::CallVirtual {
                        let receiver = self.pop(function, offset, &mut stack)?;
                        args.insert(0, receiver);
                    }

                    let callee = identity.display_name();
                    let pushes = identity.pushes_result();
                    match self.call(&callee, args) {
                        Ok(result) => {
                            if pushes {
                                stack.push(result);
                            }
                        }
                        Err(RuntimeError::UncaughtException(value)) => {
                            self.unwind(function, offset, value, &mut stack, &mut pc)?;
                        }
                        Err(other) => return Err(other),
                    }
                }

                Opcode::NewObject => {
                    let identity = self.method_at(code, pc)?;
                    let arg_count = read_u16(code, pc + 4) as usize;
                    pc += 6;

                    // Bare construction: arguments are evaluated and dropped.
                    self.pop_args(function, offset, &mut stack, arg_count)?;
                    stack.push(Value::Object(Instance::new(identity.declaring_type.clone())));
                }

                Opcode::GetProperty => {
                    let identity = self.method_at(code, pc)?;
                    pc += 4;
                    let receiver = self.pop_object(function, offset, &mut stack)?;
                    stack.push(receiver.get_field(&identity.member_name));
                }
                Opcode::SetProperty => {
                    let identity = self.method_at(code, pc)?;
                    pc += 4;
                    let value = self.pop(function, offset, &mut stack)?;
                    let receiver = self.pop_object(function, offset, &mut stack)?;
                    receiver.set_field(identity.member_name.clone(), value);
                }

                Opcode::InterceptCall => {
                    let identity = self.method_at(code, pc)?;
                    let arg_count = read_u16(code, pc + 4) as usize;
                    pc += 6;

                    let args = self.pop_args(function, offset, &mut stack, arg_count)?;
                    let receiver = if identity.kind.has_receiver() {
                        Some(self.pop(function, offset, &mut stack)?)
                    } else {
                        None
                    };

                    match self.dispatcher.dispatch(identity, receiver, args) {
                        Ok(result) => {
                            if identity.pushes_result() {
                                stack.push(result);
                            }
                        }
                        Err(RuntimeError::UncaughtException(value)) => {
                            self.unwind(function, offset, value, &mut stack, &mut pc)?;
                        }
                        Err(other) => return Err(other),
                    }
                }

                Opcode::Return => {
                    return self.pop(function, offset, &mut stack);
                }
                Opcode::ReturnVoid => {
                    return Ok(Value::Null);
                }
                Opcode::Throw => {
                    let value = self.pop(function, offset, &mut stack)?;
                    self.unwind(function, offset, value, &mut stack, &mut pc)?;
                }
            }
        }

        Err(RuntimeError::MalformedBytecode {
            function: function.name.clone(),
            offset: code.len(),
        })
    }

    /// Transfer control to the innermost exception region covering `offset`,
    /// or surface the thrown value if none does. The handler starts with the
    /// thrown value as the only stack entry.
    fn unwind(
        &self,
        function: &Function,
        offset: usize,
        value: Value,
        stack: &mut Vec<Value>,
        pc: &mut usize,
    ) -> Result<(), RuntimeError> {
        let region = function
            .exception_regions
            .iter()
            .find(|region| region.covers(offset as u32));
        match region {
            Some(region) => {
                stack.clear();
                stack.push(value);
                *pc = region.handler_start as usize;
                Ok(())
            }
            None => Err(RuntimeError::UncaughtException(value)),
        }
    }

    fn method_at(
        &self,
        code: &[u8],
        pc: usize,
    ) -> Result<&'r deflect_bytecode::MethodIdentity, RuntimeError> {
        let index = read_u32(code, pc);
        self.module
            .get_method(index)
            .ok_or(RuntimeError::InvalidMethodRef(index))
    }

    fn pop(
        &self,
        function: &Function,
        offset: usize,
        stack: &mut Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        stack.pop().ok_or_else(|| RuntimeError::StackUnderflow {
            function: function.name.clone(),
            offset,
        })
    }

    fn pop_i32(
        &self,
        function: &Function,
        offset: usize,
        stack: &mut Vec<Value>,
    ) -> Result<i32, RuntimeError> {
        match self.pop(function, offset, stack)? {
            Value::I32(v) => Ok(v),
            other => Err(RuntimeError::TypeMismatch {
                function: function.name.clone(),
                offset,
                expected: "i32",
                got: other.type_name(),
            }),
        }
    }

    fn pop_object(
        &self,
        function: &Function,
        offset: usize,
        stack: &mut Vec<Value>,
    ) -> Result<std::sync::Arc<Instance>, RuntimeError> {
        match self.pop(function, offset, stack)? {
            Value::Object(instance) => Ok(instance),
            other => Err(RuntimeError::TypeMismatch {
                function: function.name.clone(),
                offset,
                expected: "object",
                got: other.type_name(),
            }),
        }
    }

    /// Pop `count` argument values, restoring declaration order
    fn pop_args(
        &self,
        function: &Function,
        offset: usize,
        stack: &mut Vec<Value>,
        count: usize,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.pop(function, offset, stack)?);
        }
        args.reverse();
        Ok(args)
    }
}

fn jump_target(
    function: &Function,
    offset: usize,
    operand_end: usize,
    rel: i32,
) -> Result<usize, RuntimeError> {
    let target = operand_end as i64 + rel as i64;
    usize::try_from(target)
        .ok()
        .filter(|t| *t <= function.code.len())
        .ok_or(RuntimeError::MalformedBytecode {
            function: function.name.clone(),
            offset,
        })
}

fn read_u16(code: &[u8], pc: usize) -> u16 {
    u16::from_le_bytes([code[pc], code[pc + 1]])
}

fn read_u32(code: &[u8], pc: usize) -> u32 {
    u32::from_le_bytes([code[pc], code[pc + 1], code[pc + 2], code[pc + 3]])
}

fn read_i32(code: &[u8], pc: usize) -> i32 {
    i32::from_le_bytes([code[pc], code[pc + 1], code[pc + 2], code[pc + 3]])
}

fn read_i64(code: &[u8], pc: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&code[pc..pc + 8]);
    i64::from_le_bytes(bytes)
}

fn read_f64(code: &[u8], pc: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&code[pc..pc + 8]);
    f64::from_le_bytes(bytes)
}
