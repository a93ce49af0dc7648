//! Handler signature matching
//!
//! [`compatible`] grades a handler's declared shape against a call target's
//! [`MethodIdentity`]. Matching is a pure function of its two inputs.
//!
//! A handler for an instance member takes the receiver as its first
//! parameter; static and constructor handlers take only the declared
//! parameters. Conversions allowed below exact: numeric widening of a value
//! parameter (I32 -> I64 -> F64), the receiver accepted at the universal
//! object base, and a property accessor matched against a plain
//! value-producing or value-consuming handler.

use crate::value::Value;
use deflect_bytecode::{MemberKind, MethodIdentity, TypeSig};

/// Declared shape of a typed handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSignature {
    /// Parameter types, receiver first for instance members
    pub param_types: Vec<TypeSig>,
    /// Return type
    pub return_type: TypeSig,
}

impl HandlerSignature {
    /// Create a handler signature
    pub fn new(param_types: Vec<TypeSig>, return_type: TypeSig) -> Self {
        Self {
            param_types,
            return_type,
        }
    }
}

/// How well a handler shape serves a call target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchQuality {
    /// Arity or a non-convertible type differs; the handler cannot serve
    Incompatible,
    /// Serves after receiver-base substitution or numeric widening
    CompatibleWithConversion,
    /// Identical parameter and return types
    Exact,
}

/// The parameter list a handler for `target` is expected to declare:
/// receiver first for instance members, then the declared parameters.
pub fn expected_params(target: &MethodIdentity) -> Vec<TypeSig> {
    let mut params = Vec::with_capacity(target.param_types.len() + 1);
    if target.kind.has_receiver() {
        params.push(TypeSig::Object(target.declaring_type.clone()));
    }
    params.extend(target.param_types.iter().cloned());
    params
}

/// Grade `signature` against `target`
pub fn compatible(signature: &HandlerSignature, target: &MethodIdentity) -> MatchQuality {
    let expected = expected_params(target);

    if signature.param_types.len() != expected.len() {
        return MatchQuality::Incompatible;
    }

    let mut quality = MatchQuality::Exact;
    for (declared, expected) in signature.param_types.iter().zip(&expected) {
        match param_match(declared, expected) {
            MatchQuality::Incompatible => return MatchQuality::Incompatible,
            MatchQuality::CompatibleWithConversion => {
                quality = MatchQuality::CompatibleWithConversion;
            }
            MatchQuality::Exact => {}
        }
    }

    match return_match(&signature.return_type, target) {
        MatchQuality::Incompatible => MatchQuality::Incompatible,
        MatchQuality::CompatibleWithConversion => MatchQuality::CompatibleWithConversion,
        MatchQuality::Exact => quality,
    }
}

/// Whether the handler parameter `declared` can receive a value of the call's
/// `expected` type. Widening goes from the call's type into the handler's:
/// the handler may declare a wider slot than the call supplies.
fn param_match(declared: &TypeSig, expected: &TypeSig) -> MatchQuality {
    if declared == expected {
        return MatchQuality::Exact;
    }
    let convertible = match (expected, declared) {
        (TypeSig::I32, TypeSig::I64)
        | (TypeSig::I32, TypeSig::F64)
        | (TypeSig::I64, TypeSig::F64) => true,
        // Receiver/base substitution: any object value fits an Object slot
        (TypeSig::Object(_), TypeSig::Object(base)) => base == "Object",
        _ => false,
    };
    if convertible {
        MatchQuality::CompatibleWithConversion
    } else {
        MatchQuality::Incompatible
    }
}

/// Whether the handler's return type satisfies the call site. The handler's
/// value may widen into the call's expected slot. A void target tolerates a
/// value-returning handler (the value is discarded), which is the plain
/// value-consuming handler shape for property setters.
fn return_match(declared: &TypeSig, target: &MethodIdentity) -> MatchQuality {
    let expected = &target.return_type;
    if declared == expected {
        return MatchQuality::Exact;
    }
    if *expected == TypeSig::Void {
        return MatchQuality::CompatibleWithConversion;
    }
    if *declared == TypeSig::Void {
        // The original call's result is observably used; nothing to supply.
        return MatchQuality::Incompatible;
    }
    let convertible = match (declared, expected) {
        (TypeSig::I32, TypeSig::I64)
        | (TypeSig::I32, TypeSig::F64)
        | (TypeSig::I64, TypeSig::F64) => true,
        (TypeSig::Object(_), TypeSig::Object(base)) => {
            base == "Object" || target.kind == MemberKind::Constructor
        }
        _ => false,
    };
    if convertible {
        MatchQuality::CompatibleWithConversion
    } else {
        MatchQuality::Incompatible
    }
}

/// Widen `args` into the slots a typed handler declares. Fails when a value
/// does not fit its declared slot, which only happens if dispatch marshalled
/// arguments inconsistent with the identity the registration was checked
/// against.
pub fn marshal_args(args: &[Value], signature: &HandlerSignature) -> Option<Vec<Value>> {
    if args.len() != signature.param_types.len() {
        return None;
    }
    args.iter()
        .zip(&signature.param_types)
        .map(|(arg, declared)| arg.widen_to(declared))
        .collect()
}
