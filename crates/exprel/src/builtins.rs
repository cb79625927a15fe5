//! Built-in classes: members of strings, lists, maps and arrays, plus the
//! always-importable `Math`, `Integer`, `Double`, `Boolean` and `Character`.

use crate::class::ClassDef;
use crate::error::EvalErrorKind;
use crate::types::Type;
use crate::value::{map_key, Value};
use regex::Regex;
use std::sync::{Arc, OnceLock};

type Res = Result<Value, EvalErrorKind>;

struct Builtins {
    string: Arc<ClassDef>,
    list: Arc<ClassDef>,
    map: Arc<ClassDef>,
    array: Arc<ClassDef>,
    statics: Vec<Arc<ClassDef>>,
}

fn builtins() -> &'static Builtins {
    static BUILTINS: OnceLock<Builtins> = OnceLock::new();
    BUILTINS.get_or_init(|| Builtins {
        string: string_class(),
        list: list_class(),
        map: map_class(),
        array: array_class(),
        statics: vec![
            math_class(),
            integer_class(),
            double_class(),
            boolean_class(),
            character_class(),
        ],
    })
}

/// The class whose members a value exposes, if any.
pub fn class_of(value: &Value) -> Option<Arc<ClassDef>> {
    let b = builtins();
    match value {
        Value::Str(_) => Some(Arc::clone(&b.string)),
        Value::List(_) => Some(Arc::clone(&b.list)),
        Value::Map(_) => Some(Arc::clone(&b.map)),
        Value::Array(_) => Some(Arc::clone(&b.array)),
        Value::Object(o) => Some(Arc::clone(o.class())),
        _ => None,
    }
}

/// The class exposing members for a statically known type.
pub fn class_of_type(ty: &Type) -> Option<Arc<ClassDef>> {
    let b = builtins();
    match ty {
        Type::Str => Some(Arc::clone(&b.string)),
        Type::List => Some(Arc::clone(&b.list)),
        Type::Map => Some(Arc::clone(&b.map)),
        Type::Array => Some(Arc::clone(&b.array)),
        _ => None,
    }
}

/// Every built-in class that can be imported by name.
pub fn standard_classes() -> Vec<Arc<ClassDef>> {
    let b = builtins();
    let mut classes = vec![
        Arc::clone(&b.string),
        Arc::clone(&b.list),
        Arc::clone(&b.map),
    ];
    classes.extend(b.statics.iter().cloned());
    classes
}

fn arg_int(args: &[Value], i: usize, member: &str) -> Result<i64, EvalErrorKind> {
    match args.get(i) {
        Some(Value::Int(n)) => Ok(*n),
        Some(Value::Float(f)) => Ok(*f as i64),
        Some(Value::Char(c)) => Ok(*c as i64),
        other => Err(EvalErrorKind::invocation(
            member,
            format!("expected int argument, got {:?}", other),
        )),
    }
}

fn arg_float(args: &[Value], i: usize, member: &str) -> Result<f64, EvalErrorKind> {
    args.get(i).and_then(Value::as_float).ok_or_else(|| {
        EvalErrorKind::invocation(member, format!("expected numeric argument, got {:?}", args.get(i)))
    })
}

fn arg_string(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_string).unwrap_or_default()
}

fn this_str(this: &Value) -> Arc<str> {
    match this {
        Value::Str(s) => Arc::clone(s),
        other => Arc::from(other.to_string()),
    }
}

fn checked_index(index: i64, len: usize) -> Result<usize, EvalErrorKind> {
    if index < 0 || index as usize >= len {
        return Err(EvalErrorKind::IndexOutOfBounds { index, len });
    }
    Ok(index as usize)
}

/// Char-based `substring(start, end)` with bounds checks.
fn substring(s: &str, start: i64, end: i64) -> Res {
    let len = s.chars().count();
    if start < 0 || start > end || end as usize > len {
        return Err(EvalErrorKind::IndexOutOfBounds {
            index: if start < 0 || start > end { start } else { end },
            len,
        });
    }
    let out: String = s
        .chars()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect();
    Ok(Value::from(out))
}

fn string_class() -> Arc<ClassDef> {
    use Type::*;
    ClassDef::builder("String")
        .method("length", vec![], Int, |this, _| {
            Ok(Value::from(this_str(this).chars().count()))
        })
        .method("isEmpty", vec![], Bool, |this, _| {
            Ok(Value::Bool(this_str(this).is_empty()))
        })
        .method("charAt", vec![Int], Char, |this, args| {
            let s = this_str(this);
            let i = arg_int(args, 0, "charAt")?;
            let len = s.chars().count();
            let idx = checked_index(i, len)?;
            Ok(s.chars().nth(idx).map(Value::Char).unwrap_or(Value::Null))
        })
        .method("substring", vec![Int], Str, |this, args| {
            let s = this_str(this);
            let start = arg_int(args, 0, "substring")?;
            substring(&s, start, s.chars().count() as i64)
        })
        .method("substring", vec![Int, Int], Str, |this, args| {
            let s = this_str(this);
            substring(&s, arg_int(args, 0, "substring")?, arg_int(args, 1, "substring")?)
        })
        .method("indexOf", vec![Str], Int, |this, args| {
            let s = this_str(this);
            let needle = arg_string(args, 0);
            Ok(Value::Int(
                s.find(&needle)
                    .map(|b| s[..b].chars().count() as i64)
                    .unwrap_or(-1),
            ))
        })
        .method("contains", vec![Str], Bool, |this, args| {
            Ok(Value::Bool(this_str(this).contains(&arg_string(args, 0))))
        })
        .method("startsWith", vec![Str], Bool, |this, args| {
            Ok(Value::Bool(this_str(this).starts_with(&arg_string(args, 0))))
        })
        .method("endsWith", vec![Str], Bool, |this, args| {
            Ok(Value::Bool(this_str(this).ends_with(&arg_string(args, 0))))
        })
        .method("toUpperCase", vec![], Str, |this, _| {
            Ok(Value::from(this_str(this).to_uppercase()))
        })
        .method("toLowerCase", vec![], Str, |this, _| {
            Ok(Value::from(this_str(this).to_lowercase()))
        })
        .method("trim", vec![], Str, |this, _| Ok(Value::from(this_str(this).trim())))
        .method("concat", vec![Str], Str, |this, args| {
            Ok(Value::from(format!("{}{}", this_str(this), arg_string(args, 0))))
        })
        .method("replace", vec![Str, Str], Str, |this, args| {
            Ok(Value::from(
                this_str(this).replace(&arg_string(args, 0), &arg_string(args, 1)),
            ))
        })
        .method("split", vec![Str], List, |this, args| {
            let s = this_str(this);
            let sep = arg_string(args, 0);
            let parts = s.split(sep.as_str()).map(Value::from).collect();
            Ok(Value::list(parts))
        })
        .method("matches", vec![Str], Bool, |this, args| {
            let pattern = arg_string(args, 0);
            let re = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| EvalErrorKind::invocation("matches", e.to_string()))?;
            Ok(Value::Bool(re.is_match(&this_str(this))))
        })
        .method("equals", vec![Any], Bool, |this, args| {
            Ok(Value::Bool(args.first().map(|a| a.loose_eq(this)).unwrap_or(false)))
        })
        .static_method("valueOf", vec![Any], Str, |args| {
            Ok(Value::from(arg_string(args, 0)))
        })
        .build()
}

fn with_list<T>(this: &Value, f: impl FnOnce(&mut Vec<Value>) -> T) -> Result<T, EvalErrorKind> {
    match this {
        Value::List(l) => Ok(f(&mut l.write())),
        other => Err(EvalErrorKind::invocation(
            "List",
            format!("receiver is {}", other.type_of()),
        )),
    }
}

fn list_class() -> Arc<ClassDef> {
    use Type::*;
    ClassDef::builder("List")
        .method("size", vec![], Int, |this, _| {
            with_list(this, |l| Value::from(l.len()))
        })
        .method("isEmpty", vec![], Bool, |this, _| {
            with_list(this, |l| Value::Bool(l.is_empty()))
        })
        .method("get", vec![Int], Any, |this, args| {
            let i = arg_int(args, 0, "get")?;
            with_list(this, |l| checked_index(i, l.len()).map(|i| l[i].clone()))?
        })
        .method("set", vec![Int, Any], Any, |this, args| {
            let i = arg_int(args, 0, "set")?;
            let v = args.get(1).cloned().unwrap_or_default();
            with_list(this, |l| {
                checked_index(i, l.len()).map(|i| std::mem::replace(&mut l[i], v))
            })?
        })
        .method("add", vec![Any], Bool, |this, args| {
            let v = args.first().cloned().unwrap_or_default();
            with_list(this, |l| {
                l.push(v);
                Value::Bool(true)
            })
        })
        .method("add", vec![Int, Any], Void, |this, args| {
            let i = arg_int(args, 0, "add")?;
            let v = args.get(1).cloned().unwrap_or_default();
            with_list(this, |l| {
                if i < 0 || i as usize > l.len() {
                    return Err(EvalErrorKind::IndexOutOfBounds { index: i, len: l.len() });
                }
                l.insert(i as usize, v);
                Ok(Value::Void)
            })?
        })
        .method("addAll", vec![List], Bool, |this, args| {
            let items: Vec<Value> = match args.first() {
                Some(Value::List(other)) => other.read().clone(),
                _ => Vec::new(),
            };
            with_list(this, |l| {
                l.extend(items);
                Value::Bool(true)
            })
        })
        .method("remove", vec![Int], Any, |this, args| {
            let i = arg_int(args, 0, "remove")?;
            with_list(this, |l| checked_index(i, l.len()).map(|i| l.remove(i)))?
        })
        .method("contains", vec![Any], Bool, |this, args| {
            let needle = args.first().cloned().unwrap_or_default();
            with_list(this, |l| Value::Bool(l.iter().any(|v| v.loose_eq(&needle))))
        })
        .method("indexOf", vec![Any], Int, |this, args| {
            let needle = args.first().cloned().unwrap_or_default();
            with_list(this, |l| {
                Value::Int(
                    l.iter()
                        .position(|v| v.loose_eq(&needle))
                        .map(|p| p as i64)
                        .unwrap_or(-1),
                )
            })
        })
        .method("clear", vec![], Void, |this, _| {
            with_list(this, |l| {
                l.clear();
                Value::Void
            })
        })
        .build()
}

fn with_map<T>(
    this: &Value,
    f: impl FnOnce(&mut indexmap::IndexMap<String, Value>) -> T,
) -> Result<T, EvalErrorKind> {
    match this {
        Value::Map(m) => Ok(f(&mut m.write())),
        other => Err(EvalErrorKind::invocation(
            "Map",
            format!("receiver is {}", other.type_of()),
        )),
    }
}

fn map_class() -> Arc<ClassDef> {
    use Type::*;
    ClassDef::builder("Map")
        .method("size", vec![], Int, |this, _| with_map(this, |m| Value::from(m.len())))
        .method("isEmpty", vec![], Bool, |this, _| {
            with_map(this, |m| Value::Bool(m.is_empty()))
        })
        .method("get", vec![Any], Any, |this, args| {
            let key = map_key(args.first().unwrap_or(&Value::Null));
            with_map(this, |m| m.get(&key).cloned().unwrap_or(Value::Null))
        })
        .method("put", vec![Any, Any], Any, |this, args| {
            let key = map_key(args.first().unwrap_or(&Value::Null));
            let v = args.get(1).cloned().unwrap_or_default();
            with_map(this, |m| m.insert(key, v).unwrap_or(Value::Null))
        })
        .method("containsKey", vec![Any], Bool, |this, args| {
            let key = map_key(args.first().unwrap_or(&Value::Null));
            with_map(this, |m| Value::Bool(m.contains_key(&key)))
        })
        .method("remove", vec![Any], Any, |this, args| {
            let key = map_key(args.first().unwrap_or(&Value::Null));
            with_map(this, |m| m.shift_remove(&key).unwrap_or(Value::Null))
        })
        .method("keySet", vec![], List, |this, _| {
            with_map(this, |m| Value::list(m.keys().map(|k| Value::from(k.as_str())).collect()))
        })
        .method("values", vec![], List, |this, _| {
            with_map(this, |m| Value::list(m.values().cloned().collect()))
        })
        .method("clear", vec![], Void, |this, _| {
            with_map(this, |m| {
                m.clear();
                Value::Void
            })
        })
        .build()
}

fn array_class() -> Arc<ClassDef> {
    ClassDef::builder("Array")
        .method("clone", vec![], Type::Array, |this, _| match this {
            Value::Array(a) => Ok(Value::array(a.read().to_vec())),
            other => Err(EvalErrorKind::invocation("clone", format!("receiver is {}", other.type_of()))),
        })
        .build()
}

fn math_class() -> Arc<ClassDef> {
    use Type::*;
    ClassDef::builder("Math")
        .constant("PI", std::f64::consts::PI)
        .constant("E", std::f64::consts::E)
        .static_method("abs", vec![Int], Int, |args| {
            let n = arg_int(args, 0, "abs")?;
            n.checked_abs()
                .map(Value::Int)
                .ok_or_else(|| EvalErrorKind::Arithmetic("integer overflow in abs".into()))
        })
        .static_method("abs", vec![Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "abs")?.abs()))
        })
        .static_method("max", vec![Int, Int], Int, |args| {
            Ok(Value::Int(arg_int(args, 0, "max")?.max(arg_int(args, 1, "max")?)))
        })
        .static_method("max", vec![Float, Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "max")?.max(arg_float(args, 1, "max")?)))
        })
        .static_method("min", vec![Int, Int], Int, |args| {
            Ok(Value::Int(arg_int(args, 0, "min")?.min(arg_int(args, 1, "min")?)))
        })
        .static_method("min", vec![Float, Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "min")?.min(arg_float(args, 1, "min")?)))
        })
        .static_method("sqrt", vec![Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "sqrt")?.sqrt()))
        })
        .static_method("pow", vec![Float, Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "pow")?.powf(arg_float(args, 1, "pow")?)))
        })
        .static_method("floor", vec![Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "floor")?.floor()))
        })
        .static_method("ceil", vec![Float], Float, |args| {
            Ok(Value::Float(arg_float(args, 0, "ceil")?.ceil()))
        })
        .static_method("round", vec![Float], Int, |args| {
            Ok(Value::Int((arg_float(args, 0, "round")? + 0.5).floor() as i64))
        })
        .build()
}

fn integer_class() -> Arc<ClassDef> {
    use Type::*;
    ClassDef::builder("Integer")
        .constant("MAX_VALUE", i32::MAX as i64)
        .constant("MIN_VALUE", i32::MIN as i64)
        .static_method("parseInt", vec![Str], Int, |args| {
            let s = arg_string(args, 0);
            s.trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| EvalErrorKind::coercion(format!("{:?}", s), Type::Int))
        })
        .static_method("valueOf", vec![Any], Int, |args| {
            crate::convert::builtin_convert(args.first().unwrap_or(&Value::Null), &Type::Int)
        })
        .build()
}

fn double_class() -> Arc<ClassDef> {
    use Type::*;
    ClassDef::builder("Double")
        .constant("MAX_VALUE", f64::MAX)
        .constant("MIN_VALUE", f64::MIN_POSITIVE)
        .static_method("parseDouble", vec![Str], Float, |args| {
            let s = arg_string(args, 0);
            s.trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| EvalErrorKind::coercion(format!("{:?}", s), Type::Float))
        })
        .static_method("isNaN", vec![Float], Bool, |args| {
            Ok(Value::Bool(arg_float(args, 0, "isNaN")?.is_nan()))
        })
        .build()
}

fn boolean_class() -> Arc<ClassDef> {
    ClassDef::builder("Boolean")
        .constant("TRUE", true)
        .constant("FALSE", false)
        .static_method("parseBoolean", vec![Type::Str], Type::Bool, |args| {
            Ok(Value::Bool(arg_string(args, 0).eq_ignore_ascii_case("true")))
        })
        .build()
}

fn character_class() -> Arc<ClassDef> {
    use Type::*;
    let as_char = |args: &[Value], member: &str| match args.first() {
        Some(Value::Char(c)) => Ok(*c),
        Some(Value::Str(s)) if s.chars().count() == 1 => Ok(s.chars().next().unwrap_or('\0')),
        other => Err(EvalErrorKind::invocation(member, format!("expected char, got {:?}", other))),
    };
    ClassDef::builder("Character")
        .static_method("isDigit", vec![Char], Bool, move |args| {
            Ok(Value::Bool(as_char(args, "isDigit")?.is_ascii_digit()))
        })
        .static_method("isLetter", vec![Char], Bool, move |args| {
            Ok(Value::Bool(as_char(args, "isLetter")?.is_alphabetic()))
        })
        .static_method("isWhitespace", vec![Char], Bool, move |args| {
            Ok(Value::Bool(as_char(args, "isWhitespace")?.is_whitespace()))
        })
        .static_method("toUpperCase", vec![Char], Char, move |args| {
            Ok(Value::Char(
                as_char(args, "toUpperCase")?.to_uppercase().next().unwrap_or('\0'),
            ))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::resolve_overload;

    fn call(receiver: &Value, name: &str, args: &[Value]) -> Res {
        let class = class_of(receiver).expect("builtin class");
        let types: Vec<Type> = args.iter().map(Value::type_of).collect();
        let resolved = resolve_overload(class.methods_named(name, args.len(), false), &types)
            .expect("method should resolve");
        resolved.member.invoke(receiver, args)
    }

    #[test]
    fn test_string_members() {
        let s = Value::from("héllo world");
        assert_eq!(call(&s, "length", &[]), Ok(Value::Int(11)));
        assert_eq!(call(&s, "charAt", &[Value::Int(1)]), Ok(Value::Char('é')));
        assert_eq!(
            call(&s, "substring", &[Value::Int(0), Value::Int(5)]),
            Ok(Value::from("héllo"))
        );
        assert_eq!(call(&s, "indexOf", &[Value::from("world")]), Ok(Value::Int(6)));
        assert_eq!(call(&s, "matches", &[Value::from("h.llo")]), Ok(Value::Bool(false)));
        assert!(matches!(
            call(&s, "charAt", &[Value::Int(40)]),
            Err(EvalErrorKind::IndexOutOfBounds { index: 40, len: 11 })
        ));
    }

    #[test]
    fn test_list_members_mutate_shared_storage() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        call(&list, "add", &[Value::Int(2)]).expect("add");
        assert_eq!(call(&alias, "size", &[]), Ok(Value::Int(2)));
        assert_eq!(call(&alias, "remove", &[Value::Int(0)]), Ok(Value::Int(1)));
        assert_eq!(call(&alias, "contains", &[Value::Int(2)]), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_map_members() {
        let map = Value::empty_map();
        call(&map, "put", &[Value::from("a"), Value::Int(1)]).expect("put");
        assert_eq!(call(&map, "get", &[Value::from("a")]), Ok(Value::Int(1)));
        assert_eq!(call(&map, "get", &[Value::from("b")]), Ok(Value::Null));
        assert_eq!(
            call(&map, "keySet", &[]),
            Ok(Value::list(vec![Value::from("a")]))
        );
    }

    #[test]
    fn test_math_overloads() {
        let math = standard_classes()
            .into_iter()
            .find(|c| c.name() == "Math")
            .expect("Math");
        let abs_int = resolve_overload(math.methods_named("abs", 1, true), &[Type::Int])
            .expect("abs(int)");
        assert_eq!(abs_int.member.returns, Type::Int);
        let abs_float = resolve_overload(math.methods_named("abs", 1, true), &[Type::Float])
            .expect("abs(double)");
        assert_eq!(abs_float.member.returns, Type::Float);
        let max = resolve_overload(math.methods_named("max", 2, true), &[Type::Int, Type::Float])
            .expect("max(double, double)");
        assert_eq!(max.member.returns, Type::Float);
        assert!(math.static_value("PI").is_some());
    }
}
