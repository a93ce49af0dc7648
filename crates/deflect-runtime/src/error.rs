//! Runtime error taxonomy

use crate::value::Value;
use thiserror::Error;

/// Errors raised while registering providers, dispatching intercepted calls,
/// or executing module functions
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An intercepted call reached the dispatcher with no matching provider
    #[error("No interception provider matches '{target}'")]
    UnhandledInterceptedCall {
        /// Display name of the intercepted target
        target: String,
    },

    /// A typed handler's shape cannot serve the selected target
    #[error("Incompatible handler signature for '{target}': {reason}")]
    IncompatibleSignature {
        /// Display name of the selected target, or the selector's description
        target: String,
        /// Why the shapes cannot be reconciled
        reason: String,
    },

    /// Argument values arriving at dispatch do not fit the resolved
    /// handler's declared slots; the call site produced values inconsistent
    /// with the target identity
    #[error("Arguments for '{target}' do not fit the handler's declared slots")]
    ArgumentShapeMismatch {
        /// Display name of the intercepted target
        target: String,
    },

    /// A handler produced a value the call site cannot accept
    #[error("Handler for '{target}' returned {got}, call site expects {expected}")]
    ReturnShapeMismatch {
        /// Display name of the intercepted target
        target: String,
        /// Shape the call site expects
        expected: String,
        /// Shape the handler produced
        got: String,
    },

    /// A handler failed; the message is the handler's own
    #[error("Handler error: {0}")]
    Handler(String),

    /// A call target has no function in the executing module
    #[error("Unresolved call target '{name}'")]
    UnresolvedCall {
        /// `"Declaring.member"` name that failed to resolve
        name: String,
    },

    /// A function was called with the wrong number of values
    #[error("Function '{function}' takes {expected} arguments, got {got}")]
    ArityMismatch {
        /// Callee name
        function: String,
        /// Declared parameter count
        expected: usize,
        /// Values supplied
        got: usize,
    },

    /// A thrown value escaped every exception region
    #[error("Uncaught exception: {0:?}")]
    UncaughtException(Value),

    /// Operand stack underflow during execution
    #[error("Stack underflow in '{function}' at offset {offset}")]
    StackUnderflow {
        /// Executing function
        function: String,
        /// Byte offset of the failing instruction
        offset: usize,
    },

    /// Out-of-range local variable access
    #[error("Invalid local slot {index} in '{function}'")]
    InvalidLocal {
        /// Executing function
        function: String,
        /// Slot index
        index: usize,
    },

    /// Out-of-range constant pool access
    #[error("Invalid constant pool index {0}")]
    InvalidConstant(u32),

    /// Out-of-range method table access
    #[error("Invalid method table index {0}")]
    InvalidMethodRef(u32),

    /// A value had the wrong type for the executing instruction
    #[error("Type mismatch in '{function}' at offset {offset}: expected {expected}, got {got}")]
    TypeMismatch {
        /// Executing function
        function: String,
        /// Byte offset of the failing instruction
        offset: usize,
        /// Expected value shape
        expected: &'static str,
        /// Actual value shape
        got: &'static str,
    },

    /// Undecodable instruction stream reached the interpreter
    #[error("Malformed bytecode in '{function}' at offset {offset}")]
    MalformedBytecode {
        /// Executing function
        function: String,
        /// Byte offset of the failing instruction
        offset: usize,
    },
}
