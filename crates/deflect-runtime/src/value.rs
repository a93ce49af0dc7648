//! Runtime values
//!
//! [`Value`] is the interpreter's value representation and the currency
//! handlers receive and return. Objects are shared [`Instance`] references;
//! object equality is pointer identity, never structural.

use deflect_bytecode::TypeSig;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// A runtime value
#[derive(Debug, Clone)]
pub enum Value {
    /// Null reference
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 64-bit float
    F64(f64),
    /// String
    Str(String),
    /// Object reference
    Object(Arc<Instance>),
}

/// A heap object: class name plus named fields
pub struct Instance {
    /// Class name
    pub class: String,
    fields: Mutex<FxHashMap<String, Value>>,
}

impl Instance {
    /// Create a bare instance of the named class with no fields set
    pub fn new(class: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            class: class.into(),
            fields: Mutex::new(FxHashMap::default()),
        })
    }

    /// Read a field; unset fields read as [`Value::Null`]
    pub fn get_field(&self, name: &str) -> Value {
        self.fields.lock().get(name).cloned().unwrap_or(Value::Null)
    }

    /// Write a field
    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.fields.lock().insert(name.into(), value);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({})", self.class)
    }
}

impl Value {
    /// Short name of this value's shape, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Str(_) => "str",
            Value::Object(_) => "object",
        }
    }

    /// The type signature this value inhabits
    pub fn type_sig(&self) -> TypeSig {
        match self {
            Value::Null => TypeSig::object_base(),
            Value::Bool(_) => TypeSig::Bool,
            Value::I32(_) => TypeSig::I32,
            Value::I64(_) => TypeSig::I64,
            Value::F64(_) => TypeSig::F64,
            Value::Str(_) => TypeSig::Str,
            Value::Object(instance) => TypeSig::Object(instance.class.clone()),
        }
    }

    /// Widen this value to the expected signature, if a lossless conversion
    /// exists: numeric widening I32 -> I64 -> F64, any object (or null) to the
    /// universal object base.
    pub fn widen_to(&self, expected: &TypeSig) -> Option<Value> {
        match (self, expected) {
            (Value::Bool(_), TypeSig::Bool)
            | (Value::I32(_), TypeSig::I32)
            | (Value::I64(_), TypeSig::I64)
            | (Value::F64(_), TypeSig::F64)
            | (Value::Str(_), TypeSig::Str) => Some(self.clone()),

            (Value::I32(v), TypeSig::I64) => Some(Value::I64(*v as i64)),
            (Value::I32(v), TypeSig::F64) => Some(Value::F64(*v as f64)),
            (Value::I64(v), TypeSig::F64) => Some(Value::F64(*v as f64)),

            (Value::Null, TypeSig::Object(_)) | (Value::Null, TypeSig::Str) => Some(Value::Null),
            (Value::Object(instance), TypeSig::Object(class)) => {
                if instance.class == *class || class == "Object" {
                    Some(self.clone())
                } else {
                    None
                }
            }

            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_equality_is_pointer_identity() {
        let a = Instance::new("Config");
        let b = Instance::new("Config");

        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn test_fields_default_to_null() {
        let instance = Instance::new("Config");
        assert_eq!(instance.get_field("value"), Value::Null);

        instance.set_field("value", Value::I32(42));
        assert_eq!(instance.get_field("value"), Value::I32(42));
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::I32(7).widen_to(&TypeSig::I64), Some(Value::I64(7)));
        assert_eq!(Value::I32(7).widen_to(&TypeSig::F64), Some(Value::F64(7.0)));
        assert_eq!(Value::I64(7).widen_to(&TypeSig::F64), Some(Value::F64(7.0)));
        // Narrowing never converts
        assert_eq!(Value::I64(7).widen_to(&TypeSig::I32), None);
        assert_eq!(Value::F64(7.0).widen_to(&TypeSig::I64), None);
    }

    #[test]
    fn test_object_widening_to_base() {
        let instance = Instance::new("List");
        let value = Value::Object(instance);

        assert!(value.widen_to(&TypeSig::object_base()).is_some());
        assert!(value
            .widen_to(&TypeSig::Object("List".to_string()))
            .is_some());
        assert!(value.widen_to(&TypeSig::Object("Map".to_string())).is_none());
        assert!(value.widen_to(&TypeSig::Str).is_none());
    }

    #[test]
    fn test_null_inhabits_reference_types() {
        assert!(Value::Null.widen_to(&TypeSig::Object("List".to_string())).is_some());
        assert!(Value::Null.widen_to(&TypeSig::Str).is_some());
        assert!(Value::Null.widen_to(&TypeSig::I32).is_none());
    }
}
