//! Single-step member semantics shared by every accessor strategy.
//!
//! Safe chains call these on every evaluation. Specialized units call them
//! for the steps they could not pre-resolve, and fall back to them on a
//! guard miss, so errors are always raised from here.

use super::coerce_args;
use crate::builtins::class_of;
use crate::class::resolve_overload;
use crate::convert::Converter;
use crate::error::EvalErrorKind;
use crate::runtime::Frame;
use crate::types::Type;
use crate::value::{map_key, Value};

/// Where the first segment of a path found its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSource {
    Scope,
    This,
    Context,
    Class,
}

/// Resolves the root name of a path: scope chain, then a property of
/// `this`, then a property of the context object, then a library class.
pub(crate) fn resolve_root(name: &str, f: &Frame<'_>) -> Result<(Value, RootSource), EvalErrorKind> {
    if let Some(slot) = f.scope.resolve(name) {
        return Ok((slot.get(), RootSource::Scope));
    }
    if let Some(value) = lookup_member(f.this_ref, name)? {
        return Ok((value, RootSource::This));
    }
    if let Some(value) = lookup_member(f.ctx, name)? {
        return Ok((value, RootSource::Context));
    }
    if let Some(class) = f.runtime.classes.get(name) {
        return Ok((Value::Class(class.clone()), RootSource::Class));
    }
    Err(EvalErrorKind::UnresolvableProperty(name.to_string()))
}

/// A property of a context-like value, `None` when it has no such member.
fn lookup_member(value: &Value, name: &str) -> Result<Option<Value>, EvalErrorKind> {
    match value {
        Value::Map(map) => Ok(map.read().get(name).cloned()),
        Value::Object(obj) => {
            if let Some(v) = obj.get_field(name) {
                return Ok(Some(v));
            }
            match obj.class().getter(name) {
                Some(getter) => getter.invoke(value, &[]).map(Some),
                None => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn has_writable(value: &Value, name: &str) -> bool {
    match value {
        Value::Map(map) => map.read().contains_key(name),
        Value::Object(obj) => {
            obj.class().field(name).is_some() || obj.class().setter(name).is_some()
        }
        _ => false,
    }
}

/// Writes `name` on `this` or the context object if either already has it.
/// With `insert`, a name neither has is added to a context map.
pub(crate) fn write_ctx(
    name: &str,
    value: &Value,
    insert: bool,
    f: &Frame<'_>,
) -> Result<Option<Value>, EvalErrorKind> {
    for receiver in [f.this_ref, f.ctx] {
        if has_writable(receiver, name) {
            return write_property(receiver, name, value.clone(), f.converter()).map(Some);
        }
    }
    if let (true, Value::Map(map)) = (insert, f.ctx) {
        map.write().insert(name.to_string(), value.clone());
        return Ok(Some(value.clone()));
    }
    Ok(None)
}

pub(crate) fn read_property(
    receiver: &Value,
    name: &str,
    null_safe: bool,
) -> Result<Value, EvalErrorKind> {
    match receiver {
        Value::Null if null_safe => Ok(Value::Null),
        Value::Null => Err(EvalErrorKind::NullReference(name.to_string())),
        Value::Map(map) => Ok(map.read().get(name).cloned().unwrap_or_default()),
        Value::Object(obj) => {
            if let Some(v) = obj.get_field(name) {
                return Ok(v);
            }
            match obj.class().getter(name) {
                Some(getter) => getter.invoke(receiver, &[]),
                None => Err(unresolvable(receiver, name)),
            }
        }
        Value::Class(class) => class
            .static_value(name)
            .cloned()
            .ok_or_else(|| unresolvable(receiver, name)),
        Value::Array(items) if name == "length" || name == "size" => {
            Ok(Value::from(items.read().len()))
        }
        other => match class_of(other).as_ref().and_then(|c| c.getter(name)) {
            Some(getter) => getter.invoke(other, &[]),
            None => Err(unresolvable(other, name)),
        },
    }
}

fn unresolvable(receiver: &Value, name: &str) -> EvalErrorKind {
    EvalErrorKind::UnresolvableProperty(format!("{}.{}", receiver.type_of(), name))
}

fn index_of(index: &Value) -> Result<i64, EvalErrorKind> {
    match index {
        Value::Int(i) => Ok(*i),
        Value::Char(c) => Ok(*c as i64),
        other => Err(EvalErrorKind::coercion(other.type_of(), Type::Int)),
    }
}

/// Position `index` in a sequence of `len` items.
pub(crate) fn checked(index: i64, len: usize) -> Result<usize, EvalErrorKind> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(EvalErrorKind::IndexOutOfBounds { index, len })
}

pub(crate) fn read_index(receiver: &Value, index: &Value, null_safe: bool) -> Result<Value, EvalErrorKind> {
    match receiver {
        Value::Null if null_safe => Ok(Value::Null),
        Value::Null => Err(EvalErrorKind::NullReference(format!("[{}]", index))),
        Value::List(items) => {
            let items = items.read();
            Ok(items[checked(index_of(index)?, items.len())?].clone())
        }
        Value::Array(items) => {
            let items = items.read();
            Ok(items[checked(index_of(index)?, items.len())?].clone())
        }
        Value::Map(map) => Ok(map.read().get(&map_key(index)).cloned().unwrap_or_default()),
        Value::Str(s) => {
            let i = index_of(index)?;
            let len = s.chars().count();
            let at = checked(i, len)?;
            Ok(s.chars().nth(at).map(Value::Char).unwrap_or_default())
        }
        other => Err(EvalErrorKind::invalid_op("[]", other.type_of(), index.type_of())),
    }
}

/// Invokes `name` on `receiver` with overload resolution on the runtime
/// argument types. A class receiver resolves among static methods.
pub(crate) fn call_method(
    receiver: &Value,
    name: &str,
    args: &[Value],
    null_safe: bool,
    converter: &dyn Converter,
) -> Result<Value, EvalErrorKind> {
    if receiver.is_null() {
        return if null_safe {
            Ok(Value::Null)
        } else {
            Err(EvalErrorKind::NullReference(format!("{}()", name)))
        };
    }
    let types: Vec<Type> = args.iter().map(Value::type_of).collect();
    if let Value::Class(class) = receiver {
        let resolved = resolve_overload(class.methods_named(name, args.len(), true), &types)
            .ok_or_else(|| no_method(receiver, name, &types))?;
        let args = coerce_args(args, &resolved.member.params, &resolved.conformance, converter)?;
        return resolved.member.invoke(&Value::Null, &args);
    }
    if let Some(class) = class_of(receiver) {
        if let Some(resolved) = resolve_overload(class.methods_named(name, args.len(), false), &types) {
            let args = coerce_args(args, &resolved.member.params, &resolved.conformance, converter)?;
            return resolved.member.invoke(receiver, &args);
        }
    }
    match (name, args) {
        ("toString", []) => Ok(Value::from(receiver.to_string())),
        ("equals", [other]) => Ok(Value::Bool(receiver.loose_eq(other))),
        _ => Err(no_method(receiver, name, &types)),
    }
}

fn no_method(receiver: &Value, name: &str, types: &[Type]) -> EvalErrorKind {
    EvalErrorKind::invocation(
        format!("{}.{}", receiver.type_of(), name),
        format!("no overload accepts ({})", super::type_list(types)),
    )
}

pub(crate) fn write_property(
    target: &Value,
    name: &str,
    value: Value,
    converter: &dyn Converter,
) -> Result<Value, EvalErrorKind> {
    match target {
        Value::Null => Err(EvalErrorKind::NullReference(name.to_string())),
        Value::Map(map) => {
            map.write().insert(name.to_string(), value.clone());
            Ok(value)
        }
        Value::Object(obj) => {
            if let Some(field) = obj.class().field(name) {
                let value = converter.convert(&value, &field.ty)?;
                obj.set(field.index, value.clone());
                return Ok(value);
            }
            match obj.class().setter(name) {
                Some(setter) => {
                    let value = converter.convert(&value, &setter.params[0])?;
                    setter.invoke(target, std::slice::from_ref(&value))?;
                    Ok(value)
                }
                None => Err(EvalErrorKind::NotAssignable(format!("{}.{}", target.type_of(), name))),
            }
        }
        other => Err(EvalErrorKind::NotAssignable(format!("{}.{}", other.type_of(), name))),
    }
}

pub(crate) fn write_index(target: &Value, index: &Value, value: Value) -> Result<Value, EvalErrorKind> {
    match target {
        Value::Null => Err(EvalErrorKind::NullReference(format!("[{}]", index))),
        Value::List(items) => {
            let mut items = items.write();
            let at = checked(index_of(index)?, items.len())?;
            items[at] = value.clone();
            Ok(value)
        }
        Value::Array(items) => {
            let mut items = items.write();
            let at = checked(index_of(index)?, items.len())?;
            items[at] = value.clone();
            Ok(value)
        }
        Value::Map(map) => {
            map.write().insert(map_key(index), value.clone());
            Ok(value)
        }
        other => Err(EvalErrorKind::NotAssignable(format!("{}[{}]", other.type_of(), index))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassDef;
    use crate::convert::ConversionRegistry;
    use std::sync::Arc;

    fn person() -> Value {
        let class = ClassDef::builder("Person")
            .field("name", Type::Str)
            .field("age", Type::Int)
            .method("isAdult", vec![], Type::Bool, |this, _| {
                let age = this.as_object().and_then(|o| o.get_field("age"));
                Ok(Value::Bool(matches!(age, Some(Value::Int(a)) if a >= 18)))
            })
            .build();
        Value::Object(Arc::new(class.instantiate()))
    }

    #[test]
    fn test_property_reads() {
        let map = Value::from_pairs([("a", Value::Int(1))]);
        assert_eq!(read_property(&map, "a", false), Ok(Value::Int(1)));
        assert_eq!(read_property(&map, "missing", false), Ok(Value::Null));
        assert_eq!(read_property(&Value::Null, "a", true), Ok(Value::Null));
        assert!(matches!(
            read_property(&Value::Null, "a", false),
            Err(EvalErrorKind::NullReference(_))
        ));
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(read_property(&list, "size", false), Ok(Value::Int(2)));
        assert_eq!(read_property(&list, "empty", false), Ok(Value::Bool(false)));
        assert_eq!(read_property(&Value::from("abc"), "length", false), Ok(Value::Int(3)));
    }

    #[test]
    fn test_object_fields_and_getters() {
        let p = person();
        let conv = ConversionRegistry::new();
        assert_eq!(write_property(&p, "age", Value::from("42"), &conv), Ok(Value::Int(42)));
        assert_eq!(read_property(&p, "age", false), Ok(Value::Int(42)));
        assert_eq!(read_property(&p, "adult", false), Ok(Value::Bool(true)));
        assert!(matches!(
            write_property(&p, "adult", Value::Bool(false), &conv),
            Err(EvalErrorKind::NotAssignable(_))
        ));
    }

    #[test]
    fn test_indexing() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(read_index(&list, &Value::Int(1), false), Ok(Value::Int(20)));
        assert_eq!(
            read_index(&list, &Value::Int(2), false),
            Err(EvalErrorKind::IndexOutOfBounds { index: 2, len: 2 })
        );
        assert_eq!(read_index(&Value::from("hey"), &Value::Int(1), false), Ok(Value::Char('e')));
        let map = Value::empty_map();
        write_index(&map, &Value::Int(7), Value::from("x")).unwrap();
        assert_eq!(read_index(&map, &Value::from("7"), false), Ok(Value::from("x")));
    }

    #[test]
    fn test_method_calls() {
        let conv = ConversionRegistry::new();
        let s = Value::from("hello");
        assert_eq!(
            call_method(&s, "substring", &[Value::Int(1), Value::Int(3)], false, &conv),
            Ok(Value::from("el"))
        );
        assert_eq!(call_method(&Value::Int(5), "toString", &[], false, &conv), Ok(Value::from("5")));
        assert!(matches!(
            call_method(&s, "nope", &[], false, &conv),
            Err(EvalErrorKind::InvocationFailure { .. })
        ));
        assert_eq!(call_method(&Value::Null, "size", &[], true, &conv), Ok(Value::Null));
    }
}
