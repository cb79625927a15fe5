//! Runtime values.

use crate::ast::Function;
use crate::class::{ClassDef, Instance, NativeFunction};
use crate::types::Type;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub type ListRef = Arc<RwLock<Vec<Value>>>;
pub type ArrayRef = Arc<RwLock<Box<[Value]>>>;
pub type MapRef = Arc<RwLock<IndexMap<String, Value>>>;

/// A value flowing through an evaluation.
///
/// Lists, arrays, maps and objects have reference semantics: cloning a
/// `Value` shares the underlying container.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    /// Result of a construct that produced nothing, e.g. an `if` without a
    /// taken branch.
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(Arc<str>),
    List(ListRef),
    Array(ArrayRef),
    Map(MapRef),
    Object(Arc<Instance>),
    Function(Arc<Function>),
    Native(Arc<NativeFunction>),
    Class(Arc<ClassDef>),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items.into_boxed_slice())))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn empty_map() -> Self {
        Value::map(IndexMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers and floats as `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Instance>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Runtime type of the value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Void => Type::Void,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Char(_) => Type::Char,
            Value::Str(_) => Type::Str,
            Value::List(_) => Type::List,
            Value::Array(_) => Type::Array,
            Value::Map(_) => Type::Map,
            Value::Object(o) => Type::Object(o.class().name_arc()),
            Value::Function(_) | Value::Native(_) => Type::Function,
            Value::Class(c) => Type::Class(c.name_arc()),
        }
    }

    /// Number of elements of a list, array, map or string.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(l.read().len()),
            Value::Array(a) => Some(a.read().len()),
            Value::Map(m) => Some(m.read().len()),
            Value::Str(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    /// Matches the `empty` literal: null, void, `""`, empty containers, zero
    /// and `false`.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Value::Null | Value::Void => true,
            Value::Bool(b) => !*b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::List(_) | Value::Array(_) | Value::Map(_) => self.len() == Some(0),
            _ => false,
        }
    }

    /// Equality as seen by `==`: numbers compare across int/float, a char
    /// equals a one-char string, containers compare element-wise, objects and
    /// functions by identity.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Void, Value::Void) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float() == other.as_float()
            }
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Char(c), Value::Str(s)) | (Value::Str(s), Value::Char(c)) => {
                let mut chars = s.chars();
                chars.next() == Some(*c) && chars.next().is_none()
            }
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || slices_eq(&a.read(), &b.read())
            }
            (Value::Array(a), Value::Array(b)) => {
                Arc::ptr_eq(a, b) || slices_eq(&a.read(), &b.read())
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.loose_eq(w)).unwrap_or(false))
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a.name() == b.name(),
            _ => false,
        }
    }

    /// Ordering for relational operators; `None` when the operands are not
    /// comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&other.as_float()?)
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Int(b)) => Some((*a as i64).cmp(b)),
            (Value::Int(a), Value::Char(b)) => Some(a.cmp(&(*b as i64))),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Copies containers recursively so the result shares no storage with `self`.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(l) => Value::list(l.read().iter().map(Value::deep_clone).collect()),
            Value::Array(a) => Value::array(a.read().iter().map(Value::deep_clone).collect()),
            Value::Map(m) => Value::map(
                m.read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Converts to a JSON document. Functions and classes become their
    /// display strings; non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null | Value::Void => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Char(c) => Json::String(c.to_string()),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(l) => Json::Array(l.read().iter().map(Value::to_json).collect()),
            Value::Array(a) => Json::Array(a.read().iter().map(Value::to_json).collect()),
            Value::Map(m) => Json::Object(
                m.read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Object(o) => Json::Object(
                o.class()
                    .fields()
                    .iter()
                    .map(|f| (f.name.clone(), o.get(f.index).to_json()))
                    .collect(),
            ),
            other => Json::String(other.to_string()),
        }
    }
}

fn slices_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
}

/// Key under which a value indexes a map.
pub fn map_key(key: &Value) -> String {
    match key {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<Arc<ClassDef>> for Value {
    fn from(class: Arc<ClassDef>) -> Self {
        Value::Class(class)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::list(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Void => f.write_str("Void"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({:?})", x),
            Value::Char(c) => write!(f, "Char({:?})", c),
            Value::Str(s) => write!(f, "Str({:?})", s),
            other => write!(f, "{}({})", other.type_of(), other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Void => f.write_str("void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => f.write_str(s),
            Value::List(l) => write_seq(f, &l.read()),
            Value::Array(a) => {
                f.write_str("{")?;
                write_items(f, &a.read())?;
                f.write_str("}")
            }
            Value::Map(m) => {
                f.write_str("[")?;
                let m = m.read();
                if m.is_empty() {
                    f.write_str(":")?;
                }
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: ", k)?;
                    write_nested(f, v)?;
                }
                f.write_str("]")
            }
            Value::Object(o) => {
                write!(f, "{}{{", o.class().name())?;
                for (i, field) in o.class().fields().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", field.name)?;
                    write_nested(f, &o.get(field.index))?;
                }
                f.write_str("}")
            }
            Value::Function(func) => write!(f, "def {}({})", func.name, func.param_names().join(", ")),
            Value::Native(n) => write!(f, "native {}", n.name),
            Value::Class(c) => write!(f, "class {}", c.name()),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    f.write_str("[")?;
    write_items(f, items)?;
    f.write_str("]")
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_nested(f, item)?;
    }
    Ok(())
}

fn write_nested(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
    match v {
        Value::Str(s) => write!(f, "{:?}", s),
        Value::Char(c) => write!(f, "{:?}", c),
        other => write!(f, "{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loose_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Char('a'), Value::from("a"));
        assert_ne!(Value::Char('a'), Value::from("ab"));
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::from("x")]),
            Value::list(vec![Value::Float(1.0), Value::from("x")])
        );
        assert_ne!(Value::Null, Value::Void);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from("b").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_empty_values() {
        assert!(Value::Null.is_empty_value());
        assert!(Value::from("").is_empty_value());
        assert!(Value::list(vec![]).is_empty_value());
        assert!(Value::Int(0).is_empty_value());
        assert!(!Value::from(" ").is_empty_value());
        assert!(!Value::list(vec![Value::Null]).is_empty_value());
    }

    #[test]
    fn test_json_round_trip() {
        let doc = json!({"name": "Ada", "tags": ["a", "b"], "age": 36, "score": 1.5, "x": null});
        let value = Value::from(doc.clone());
        assert_eq!(value.to_json(), doc);
        match &value {
            Value::Map(m) => assert_eq!(m.read().get("age"), Some(&Value::Int(36))),
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        let v = Value::list(vec![Value::Int(1), Value::from("a"), Value::Float(2.0)]);
        assert_eq!(v.to_string(), "[1, \"a\", 2.0]");
        assert_eq!(Value::empty_map().to_string(), "[:]");
        assert_eq!(Value::array(vec![Value::Int(1)]).to_string(), "{1}");
    }

    #[test]
    fn test_deep_clone_detaches() {
        let inner = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![inner.clone()]);
        let copy = outer.deep_clone();
        if let Value::List(l) = &inner {
            l.write().push(Value::Int(2));
        }
        assert_eq!(copy, Value::list(vec![Value::list(vec![Value::Int(1)])]));
    }
}
