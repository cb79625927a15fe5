//! Static types ("egress types") and assignability rules.

use std::fmt;
use std::sync::Arc;

/// Statically known (or dynamically observed) type of a value or expression.
///
/// `Any` is the generic fallback used whenever a type cannot be determined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Any,
    Void,
    Null,
    Bool,
    Int,
    Float,
    Char,
    Str,
    List,
    Array,
    Map,
    Function,
    /// Instance of a host class, by class name.
    Object(Arc<str>),
    /// A class reference (the value of an imported class name).
    Class(Arc<str>),
}

/// How well a value of one type fits a parameter or slot of another.
///
/// Ordered so that a higher variant is a better match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Conformance {
    None = 0,
    /// Needs a numeric (possibly lossy) conversion, e.g. `double` into `int`.
    Numeric = 1,
    /// Lossless widening, e.g. `int` into `double`, anything into `Object`.
    Widening = 2,
    Exact = 3,
}

impl Conformance {
    pub fn score(self) -> u32 {
        self as u32
    }

    pub fn accepts(self) -> bool {
        self != Conformance::None
    }
}

impl Type {
    pub fn object(name: &str) -> Self {
        Type::Object(Arc::from(name))
    }

    /// Maps a declaration keyword or well-known type name to a type.
    ///
    /// Host class names are not known here; callers consult the class library
    /// when this returns `None`.
    pub fn from_name(name: &str) -> Option<Type> {
        let ty = match name {
            "int" | "long" | "short" | "byte" | "Integer" | "Long" | "Short" | "Byte" => Type::Int,
            "double" | "float" | "Double" | "Float" | "Number" => Type::Float,
            "boolean" | "Boolean" => Type::Bool,
            "char" | "Character" => Type::Char,
            "String" | "CharSequence" => Type::Str,
            "List" | "ArrayList" | "Collection" => Type::List,
            "Map" | "HashMap" | "LinkedHashMap" => Type::Map,
            "Object" | "var" => Type::Any,
            "void" => Type::Void,
            _ => return None,
        };
        Some(ty)
    }

    /// Whether values of this type are references that may be `null`.
    pub fn is_nullable(&self) -> bool {
        !matches!(
            self,
            Type::Bool | Type::Int | Type::Float | Type::Char | Type::Void
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    pub fn is_known(&self) -> bool {
        *self != Type::Any
    }

    /// How well a value of type `from` fits a slot of type `self`.
    pub fn conformance(&self, from: &Type) -> Conformance {
        if self == from {
            return Conformance::Exact;
        }
        match (self, from) {
            (Type::Any, _) => Conformance::Widening,
            (to, Type::Null) if to.is_nullable() => Conformance::Widening,
            (Type::Float, Type::Int) => Conformance::Widening,
            (Type::Str, Type::Char) => Conformance::Widening,
            (Type::Int, Type::Char) => Conformance::Numeric,
            (Type::Int, Type::Float) => Conformance::Numeric,
            // Statically unknown values may turn out to fit at run time.
            (_, Type::Any) => Conformance::Numeric,
            _ => Conformance::None,
        }
    }

    /// Numeric promotion of two operand types.
    pub fn promote(&self, other: &Type) -> Type {
        match (self, other) {
            (Type::Int, Type::Int) => Type::Int,
            (Type::Int | Type::Float, Type::Int | Type::Float) => Type::Float,
            _ => Type::Any,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("Object"),
            Type::Void => f.write_str("void"),
            Type::Null => f.write_str("null"),
            Type::Bool => f.write_str("boolean"),
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("double"),
            Type::Char => f.write_str("char"),
            Type::Str => f.write_str("String"),
            Type::List => f.write_str("List"),
            Type::Array => f.write_str("Array"),
            Type::Map => f.write_str("Map"),
            Type::Function => f.write_str("Function"),
            Type::Object(name) => f.write_str(name),
            Type::Class(name) => write!(f, "Class<{}>", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conformance_order() {
        assert_eq!(Type::Int.conformance(&Type::Int), Conformance::Exact);
        assert_eq!(Type::Float.conformance(&Type::Int), Conformance::Widening);
        assert_eq!(Type::Int.conformance(&Type::Float), Conformance::Numeric);
        assert_eq!(Type::Any.conformance(&Type::Str), Conformance::Widening);
        assert_eq!(Type::Str.conformance(&Type::Null), Conformance::Widening);
        assert_eq!(Type::Int.conformance(&Type::Null), Conformance::None);
        assert_eq!(Type::Str.conformance(&Type::Int), Conformance::None);
        assert!(Conformance::Exact > Conformance::Widening);
        assert!(Conformance::Widening > Conformance::Numeric);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Type::from_name("int"), Some(Type::Int));
        assert_eq!(Type::from_name("String"), Some(Type::Str));
        assert_eq!(Type::from_name("var"), Some(Type::Any));
        assert_eq!(Type::from_name("Person"), None);
    }

    #[test]
    fn test_promote() {
        assert_eq!(Type::Int.promote(&Type::Int), Type::Int);
        assert_eq!(Type::Int.promote(&Type::Float), Type::Float);
        assert_eq!(Type::Str.promote(&Type::Int), Type::Any);
    }
}
