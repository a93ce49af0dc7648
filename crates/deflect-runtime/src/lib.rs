//! Deflect Runtime
//!
//! The execution half of call interception: the process-wide
//! [`InterceptionRegistry`] of replacement handlers, the signature matcher
//! that grades handler shapes against call targets, the
//! [`RuntimeDispatcher`] that instrumented call sites land in, and a small
//! interpreter that executes module functions so rewritten code can actually
//! run.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod value;
pub mod signature;
pub mod registry;
pub mod dispatch;
pub mod interpreter;
pub mod error;

pub use value::{Instance, Value};
pub use signature::{compatible, expected_params, HandlerSignature, MatchQuality};
pub use registry::{Handler, HandlerFn, InterceptionRegistry, Invocation, RegistrationHandle};
pub use dispatch::RuntimeDispatcher;
pub use interpreter::Interpreter;
pub use error::RuntimeError;
