//! Deflect Bytecode Definitions
//!
//! This crate provides the bytecode instruction set, module format, method
//! identities, and the call-site instrumentation pass that redirects selected
//! calls through the interception hook.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod opcode;
pub mod module;
pub mod identity;
pub mod selector;
pub mod instrument;
pub mod verify;
pub mod encoder;

pub use opcode::Opcode;
pub use module::{flags, ExceptionRegion, Function, Metadata, Module, ModuleError};
pub use identity::{MemberKind, MethodIdentity, TypeSig};
pub use selector::{CallSelector, IdentityPredicate};
pub use instrument::{instrument, InstrumentError, InstrumentedModule};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use verify::{verify_module, VerifyError};
