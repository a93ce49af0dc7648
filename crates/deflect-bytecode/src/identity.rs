//! Structural identity of callable members
//!
//! A [`MethodIdentity`] names a callable member by its declaring type, member
//! name, parameter and return shape, and member kind. Identities are the
//! tokens call instructions carry in the module's method table, the keys the
//! interception registry resolves against, and the values selectors match.
//! Equality is structural over all fields.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use serde::{Deserialize, Serialize};

/// Type signature of a parameter or return slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSig {
    /// No value (return slots only)
    Void,
    /// Boolean
    Bool,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 64-bit float
    F64,
    /// String
    Str,
    /// Object reference, named by its class. The class name `"Object"` is
    /// the universal base every object reference converts to.
    Object(String),
}

impl TypeSig {
    /// The universal object base type
    pub fn object_base() -> Self {
        TypeSig::Object("Object".to_string())
    }

    /// Check whether this is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeSig::I32 | TypeSig::I64 | TypeSig::F64)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            TypeSig::Void => writer.emit_u8(0),
            TypeSig::Bool => writer.emit_u8(1),
            TypeSig::I32 => writer.emit_u8(2),
            TypeSig::I64 => writer.emit_u8(3),
            TypeSig::F64 => writer.emit_u8(4),
            TypeSig::Str => writer.emit_u8(5),
            TypeSig::Object(name) => {
                writer.emit_u8(6);
                writer.emit_string(name);
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            0 => TypeSig::Void,
            1 => TypeSig::Bool,
            2 => TypeSig::I32,
            3 => TypeSig::I64,
            4 => TypeSig::F64,
            5 => TypeSig::Str,
            6 => TypeSig::Object(reader.read_string()?),
            other => return Err(DecodeError::InvalidTag(other, reader.position() - 1)),
        })
    }
}

/// Kind of callable member an identity names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// Constructor call; "returns" the newly constructed instance
    Constructor,
    /// Instance method with an implicit receiver
    InstanceMethod,
    /// Static or free function
    StaticMethod,
    /// Property getter (implicit receiver, no explicit parameters)
    PropertyGetter,
    /// Property setter (implicit receiver, one value parameter)
    PropertySetter,
}

impl MemberKind {
    /// Whether a call of this kind carries an implicit receiver on the stack
    pub fn has_receiver(self) -> bool {
        matches!(
            self,
            MemberKind::InstanceMethod | MemberKind::PropertyGetter | MemberKind::PropertySetter
        )
    }

    fn to_u8(self) -> u8 {
        match self {
            MemberKind::Constructor => 0,
            MemberKind::InstanceMethod => 1,
            MemberKind::StaticMethod => 2,
            MemberKind::PropertyGetter => 3,
            MemberKind::PropertySetter => 4,
        }
    }

    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MemberKind::Constructor),
            1 => Some(MemberKind::InstanceMethod),
            2 => Some(MemberKind::StaticMethod),
            3 => Some(MemberKind::PropertyGetter),
            4 => Some(MemberKind::PropertySetter),
            _ => None,
        }
    }
}

/// Structural descriptor uniquely naming a callable member
///
/// Immutable once constructed. `param_types` excludes the implicit receiver;
/// the receiver-prefix convention for handler matching lives in the signature
/// matcher. For generic targets, `type_args` holds the closed instantiation
/// captured at the call site, never the open definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodIdentity {
    /// Declaring type name
    pub declaring_type: String,
    /// Member name; constructors use `"new"`
    pub member_name: String,
    /// Parameter types in declaration order, excluding the receiver
    pub param_types: Vec<TypeSig>,
    /// Return type; `Void` for void calls, the constructed type for constructors
    pub return_type: TypeSig,
    /// Member kind
    pub kind: MemberKind,
    /// Closed generic type arguments, empty for non-generic targets
    pub type_args: Vec<TypeSig>,
}

impl MethodIdentity {
    /// Identity of a static or free function
    pub fn static_method(
        declaring_type: impl Into<String>,
        member_name: impl Into<String>,
        param_types: Vec<TypeSig>,
        return_type: TypeSig,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            member_name: member_name.into(),
            param_types,
            return_type,
            kind: MemberKind::StaticMethod,
            type_args: Vec::new(),
        }
    }

    /// Identity of an instance method
    pub fn instance_method(
        declaring_type: impl Into<String>,
        member_name: impl Into<String>,
        param_types: Vec<TypeSig>,
        return_type: TypeSig,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            member_name: member_name.into(),
            param_types,
            return_type,
            kind: MemberKind::InstanceMethod,
            type_args: Vec::new(),
        }
    }

    /// Identity of a constructor; the return type is the constructed type
    pub fn constructor(declaring_type: impl Into<String>, param_types: Vec<TypeSig>) -> Self {
        let declaring_type = declaring_type.into();
        Self {
            member_name: "new".to_string(),
            param_types,
            return_type: TypeSig::Object(declaring_type.clone()),
            kind: MemberKind::Constructor,
            type_args: Vec::new(),
            declaring_type,
        }
    }

    /// Identity of a property getter
    pub fn property_getter(
        declaring_type: impl Into<String>,
        member_name: impl Into<String>,
        value_type: TypeSig,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            member_name: member_name.into(),
            param_types: Vec::new(),
            return_type: value_type,
            kind: MemberKind::PropertyGetter,
            type_args: Vec::new(),
        }
    }

    /// Identity of a property setter
    pub fn property_setter(
        declaring_type: impl Into<String>,
        member_name: impl Into<String>,
        value_type: TypeSig,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            member_name: member_name.into(),
            param_types: vec![value_type],
            return_type: TypeSig::Void,
            kind: MemberKind::PropertySetter,
            type_args: Vec::new(),
        }
    }

    /// Attach closed generic type arguments to this identity
    pub fn with_type_args(mut self, type_args: Vec<TypeSig>) -> Self {
        self.type_args = type_args;
        self
    }

    /// `"Declaring.member"` display form used in diagnostics
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.member_name)
    }

    /// Whether this call pushes a value after completion: a constructor
    /// pushes the constructed instance, a non-void call its result.
    pub fn pushes_result(&self) -> bool {
        self.kind == MemberKind::Constructor || self.return_type != TypeSig::Void
    }

    /// Encode identity into the module's method table
    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.declaring_type);
        writer.emit_string(&self.member_name);
        writer.emit_u8(self.kind.to_u8());
        writer.emit_u32(self.param_types.len() as u32);
        for param in &self.param_types {
            param.encode(writer);
        }
        self.return_type.encode(writer);
        writer.emit_u32(self.type_args.len() as u32);
        for arg in &self.type_args {
            arg.encode(writer);
        }
    }

    /// Decode identity from the module's method table
    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let declaring_type = reader.read_string()?;
        let member_name = reader.read_string()?;
        let kind_byte = reader.read_u8()?;
        let kind = MemberKind::from_u8(kind_byte)
            .ok_or(DecodeError::InvalidTag(kind_byte, reader.position() - 1))?;

        let param_count = reader.read_u32()? as usize;
        let mut param_types = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            param_types.push(TypeSig::decode(reader)?);
        }

        let return_type = TypeSig::decode(reader)?;

        let type_arg_count = reader.read_u32()? as usize;
        let mut type_args = Vec::with_capacity(type_arg_count);
        for _ in 0..type_arg_count {
            type_args.push(TypeSig::decode(reader)?);
        }

        Ok(Self {
            declaring_type,
            member_name,
            param_types,
            return_type,
            kind,
            type_args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = MethodIdentity::static_method(
            "Console",
            "write_line",
            vec![TypeSig::Str],
            TypeSig::Void,
        );
        let b = MethodIdentity::static_method(
            "Console",
            "write_line",
            vec![TypeSig::Str],
            TypeSig::Void,
        );
        assert_eq!(a, b);

        let c = MethodIdentity::static_method(
            "Console",
            "write_line",
            vec![TypeSig::I32],
            TypeSig::Void,
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_constructor_returns_constructed_type() {
        let ctor = MethodIdentity::constructor("List", vec![]);
        assert_eq!(ctor.kind, MemberKind::Constructor);
        assert_eq!(ctor.member_name, "new");
        assert_eq!(ctor.return_type, TypeSig::Object("List".to_string()));
        assert!(ctor.pushes_result());
    }

    #[test]
    fn test_property_shapes() {
        let getter = MethodIdentity::property_getter("Config", "value", TypeSig::I32);
        assert!(getter.param_types.is_empty());
        assert_eq!(getter.return_type, TypeSig::I32);
        assert!(getter.kind.has_receiver());

        let setter = MethodIdentity::property_setter("Config", "value", TypeSig::I32);
        assert_eq!(setter.param_types, vec![TypeSig::I32]);
        assert_eq!(setter.return_type, TypeSig::Void);
        assert!(!setter.pushes_result());
    }

    #[test]
    fn test_closed_type_args_distinguish_identities() {
        let open = MethodIdentity::constructor("List", vec![]);
        let of_i32 = MethodIdentity::constructor("List", vec![]).with_type_args(vec![TypeSig::I32]);
        let of_str = MethodIdentity::constructor("List", vec![]).with_type_args(vec![TypeSig::Str]);
        assert_ne!(open, of_i32);
        assert_ne!(of_i32, of_str);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let identity = MethodIdentity::instance_method(
            "Repository",
            "find",
            vec![TypeSig::I64, TypeSig::Str],
            TypeSig::Object("Entity".to_string()),
        )
        .with_type_args(vec![TypeSig::Object("Entity".to_string())]);

        let mut writer = BytecodeWriter::new();
        identity.encode(&mut writer);

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        let decoded = MethodIdentity::decode(&mut reader).unwrap();

        assert_eq!(decoded, identity);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_invalid_member_kind_byte_is_a_tag_error() {
        let mut writer = BytecodeWriter::new();
        writer.emit_string("Console");
        writer.emit_string("write_line");
        writer.emit_u8(9); // no such member kind

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            MethodIdentity::decode(&mut reader),
            Err(DecodeError::InvalidTag(9, _))
        ));
    }

    #[test]
    fn test_invalid_type_tag_is_a_tag_error() {
        let mut writer = BytecodeWriter::new();
        writer.emit_string("Math");
        writer.emit_string("abs");
        writer.emit_u8(2); // static method
        writer.emit_u32(1); // one parameter
        writer.emit_u8(0xEE); // no such type signature tag

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            MethodIdentity::decode(&mut reader),
            Err(DecodeError::InvalidTag(0xEE, _))
        ));
    }

    #[test]
    fn test_receiver_kinds() {
        assert!(MemberKind::InstanceMethod.has_receiver());
        assert!(MemberKind::PropertyGetter.has_receiver());
        assert!(MemberKind::PropertySetter.has_receiver());
        assert!(!MemberKind::StaticMethod.has_receiver());
        assert!(!MemberKind::Constructor.has_receiver());
    }

    #[test]
    fn test_display_name() {
        let id = MethodIdentity::static_method("Console", "write_line", vec![], TypeSig::Void);
        assert_eq!(id.display_name(), "Console.write_line");
    }
}
