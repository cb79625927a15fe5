//! Conversion boundary used for typed slots, typed parameters and field writes.

use crate::error::EvalErrorKind;
use crate::types::Type;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Converts values between types.
pub trait Converter: Send + Sync {
    /// Whether a value of static type `from` can be converted to `to`.
    fn can_convert(&self, to: &Type, from: &Type) -> bool;

    fn convert(&self, value: &Value, to: &Type) -> Result<Value, EvalErrorKind>;
}

/// Default converter: built-in numeric, string, char and boolean
/// conversions, plus converters registered per target type.
///
/// A registered converter is tried before the built-in rules for its target.
#[derive(Clone, Default)]
pub struct ConversionRegistry {
    custom: HashMap<Type, Arc<dyn Converter>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        ConversionRegistry::default()
    }

    pub fn register(&mut self, to: Type, converter: Arc<dyn Converter>) {
        self.custom.insert(to, converter);
    }
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<String> = self.custom.keys().map(Type::to_string).collect();
        f.debug_struct("ConversionRegistry")
            .field("custom", &targets)
            .finish()
    }
}

impl Converter for ConversionRegistry {
    fn can_convert(&self, to: &Type, from: &Type) -> bool {
        if let Some(custom) = self.custom.get(to) {
            if custom.can_convert(to, from) {
                return true;
            }
        }
        builtin_can_convert(to, from)
    }

    fn convert(&self, value: &Value, to: &Type) -> Result<Value, EvalErrorKind> {
        if let Some(custom) = self.custom.get(to) {
            if custom.can_convert(to, &value.type_of()) {
                return custom.convert(value, to);
            }
        }
        builtin_convert(value, to)
    }
}

pub fn builtin_can_convert(to: &Type, from: &Type) -> bool {
    if to == from || *to == Type::Any || *from == Type::Any {
        return true;
    }
    match (to, from) {
        (to, Type::Null) => to.is_nullable(),
        (Type::Str, _) => true,
        (Type::Int, Type::Float | Type::Char | Type::Str | Type::Bool) => true,
        (Type::Float, Type::Int | Type::Str) => true,
        (Type::Char, Type::Int | Type::Str) => true,
        (Type::Bool, Type::Str | Type::Int) => true,
        (Type::List, Type::Array) | (Type::Array, Type::List) => true,
        (Type::Function, Type::Function) => true,
        _ => false,
    }
}

/// Built-in conversion rules.
pub fn builtin_convert(value: &Value, to: &Type) -> Result<Value, EvalErrorKind> {
    let fail = || EvalErrorKind::coercion(format!("{} ({})", value, value.type_of()), to);
    if *to == Type::Any {
        return Ok(value.clone());
    }
    if value.is_null() {
        return if to.is_nullable() { Ok(Value::Null) } else { Err(fail()) };
    }
    let out = match (to, value) {
        (Type::Int, Value::Int(_)) => value.clone(),
        (Type::Int, Value::Float(f)) if f.is_finite() => Value::Int(f.trunc() as i64),
        (Type::Int, Value::Char(c)) => Value::Int(*c as i64),
        (Type::Int, Value::Bool(b)) => Value::Int(*b as i64),
        (Type::Int, Value::Str(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::Int(f.trunc() as i64),
                    _ => return Err(fail()),
                },
            }
        }
        (Type::Float, Value::Float(_)) => value.clone(),
        (Type::Float, Value::Int(i)) => Value::Float(*i as f64),
        (Type::Float, Value::Str(s)) => {
            Value::Float(s.trim().parse::<f64>().map_err(|_| fail())?)
        }
        (Type::Str, Value::Str(_)) => value.clone(),
        (Type::Str, other) => Value::from(other.to_string()),
        (Type::Char, Value::Char(_)) => value.clone(),
        (Type::Char, Value::Str(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                _ => return Err(fail()),
            }
        }
        (Type::Char, Value::Int(i)) => u32::try_from(*i)
            .ok()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(fail)?,
        (Type::Bool, Value::Bool(_)) => value.clone(),
        (Type::Bool, Value::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(fail()),
        },
        (Type::Bool, Value::Int(i)) => Value::Bool(*i != 0),
        (Type::List, Value::List(_)) => value.clone(),
        (Type::List, Value::Array(a)) => Value::list(a.read().to_vec()),
        (Type::Array, Value::Array(_)) => value.clone(),
        (Type::Array, Value::List(l)) => Value::array(l.read().clone()),
        (Type::Map, Value::Map(_)) => value.clone(),
        (Type::Function, Value::Function(_) | Value::Native(_)) => value.clone(),
        (Type::Object(name), Value::Object(o)) if o.class().name() == &**name => value.clone(),
        (Type::Class(name), Value::Class(c)) if c.name() == &**name => value.clone(),
        _ => return Err(fail()),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Celsius;

    impl Converter for Celsius {
        fn can_convert(&self, to: &Type, from: &Type) -> bool {
            *to == Type::Float && *from == Type::Str
        }

        fn convert(&self, value: &Value, _to: &Type) -> Result<Value, EvalErrorKind> {
            let text = value.to_string();
            let digits = text.trim_end_matches("C");
            digits
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| EvalErrorKind::coercion(&text, "double"))
        }
    }

    #[test]
    fn test_builtin_numeric_conversions() {
        assert_eq!(builtin_convert(&Value::Float(3.9), &Type::Int), Ok(Value::Int(3)));
        assert_eq!(builtin_convert(&Value::from(" 42 "), &Type::Int), Ok(Value::Int(42)));
        assert_eq!(builtin_convert(&Value::Int(2), &Type::Float), Ok(Value::Float(2.0)));
        assert_eq!(builtin_convert(&Value::Int(65), &Type::Char), Ok(Value::Char('A')));
        assert_eq!(builtin_convert(&Value::Int(7), &Type::Str), Ok(Value::from("7")));
    }

    #[test]
    fn test_builtin_failures() {
        assert!(matches!(
            builtin_convert(&Value::from("abc"), &Type::Int),
            Err(EvalErrorKind::TypeCoercionFailure { .. })
        ));
        assert!(builtin_convert(&Value::Null, &Type::Int).is_err());
        assert_eq!(builtin_convert(&Value::Null, &Type::Str), Ok(Value::Null));
        assert!(builtin_convert(&Value::from("ab"), &Type::Char).is_err());
    }

    #[test]
    fn test_custom_converter_takes_precedence() {
        let mut registry = ConversionRegistry::new();
        registry.register(Type::Float, Arc::new(Celsius));
        assert_eq!(
            registry.convert(&Value::from("21.5C"), &Type::Float),
            Ok(Value::Float(21.5))
        );
        // Other sources still use the built-in rules.
        assert_eq!(
            registry.convert(&Value::Int(3), &Type::Float),
            Ok(Value::Float(3.0))
        );
        assert!(registry.can_convert(&Type::Float, &Type::Str));
        assert!(!registry.can_convert(&Type::Map, &Type::Int));
    }
}
