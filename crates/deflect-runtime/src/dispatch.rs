//! Runtime dispatch
//!
//! The hook half of interception: an instrumented call site lands in
//! [`RuntimeDispatcher::dispatch`] with the target identity, the receiver (if
//! any), and the argument values. The dispatcher resolves a provider, widens
//! arguments into a typed handler's declared slots, invokes, and coerces the
//! handler's result to the shape the call site expects. Handler failures are
//! never wrapped; they propagate to the caller unchanged.

use crate::error::RuntimeError;
use crate::registry::{Handler, InterceptionRegistry, Invocation};
use crate::signature::marshal_args;
use crate::value::Value;
use deflect_bytecode::{MemberKind, MethodIdentity};

/// Inline dispatcher for intercepted calls
pub struct RuntimeDispatcher<'r> {
    registry: &'r InterceptionRegistry,
}

impl<'r> RuntimeDispatcher<'r> {
    /// Create a dispatcher over a registry
    pub fn new(registry: &'r InterceptionRegistry) -> Self {
        Self { registry }
    }

    /// Dispatch one intercepted call.
    ///
    /// Fails with [`RuntimeError::UnhandledInterceptedCall`] when no
    /// registered provider matches: the module was instrumented for a call
    /// nobody registered for, which is a test-authoring bug, not a fallback
    /// path.
    pub fn dispatch(
        &self,
        target: &MethodIdentity,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let handler = self.registry.resolve(target).ok_or_else(|| {
            RuntimeError::UnhandledInterceptedCall {
                target: target.display_name(),
            }
        })?;

        let invocation = self.marshal(&handler, target, receiver, args)?;
        let result = handler.invoke(&invocation)?;
        coerce_return(target, result)
    }

    /// Widen receiver and arguments into a typed handler's declared slots.
    /// Raw handlers receive the values as the call site produced them.
    fn marshal(
        &self,
        handler: &Handler,
        target: &MethodIdentity,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Invocation, RuntimeError> {
        let signature = match handler.signature() {
            None => {
                return Ok(Invocation {
                    target: target.clone(),
                    receiver,
                    args,
                })
            }
            Some(signature) => signature,
        };

        let mut full = Vec::with_capacity(args.len() + 1);
        if let Some(receiver) = &receiver {
            full.push(receiver.clone());
        }
        full.extend(args.iter().cloned());

        let mut widened = marshal_args(&full, signature).ok_or_else(|| {
            RuntimeError::ArgumentShapeMismatch {
                target: target.display_name(),
            }
        })?;

        let receiver = if receiver.is_some() {
            Some(widened.remove(0))
        } else {
            None
        };
        Ok(Invocation {
            target: target.clone(),
            receiver,
            args: widened,
        })
    }
}

/// Coerce a handler's result to the call site's expected shape: nothing for
/// void calls, a value widened to the declared return type otherwise, and a
/// constructed instance (never null) for constructor calls.
fn coerce_return(target: &MethodIdentity, result: Value) -> Result<Value, RuntimeError> {
    if !target.pushes_result() {
        return Ok(Value::Null);
    }

    if target.kind == MemberKind::Constructor && result == Value::Null {
        return Err(RuntimeError::ReturnShapeMismatch {
            target: target.display_name(),
            expected: "constructed instance".to_string(),
            got: "null".to_string(),
        });
    }

    result
        .widen_to(&target.return_type)
        .ok_or_else(|| RuntimeError::ReturnShapeMismatch {
            target: target.display_name(),
            expected: format!("{:?}", target.return_type),
            got: result.type_name().to_string(),
        })
}
