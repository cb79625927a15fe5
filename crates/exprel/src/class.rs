//! Host object model: classes, instances, native members and overload
//! resolution.
//!
//! The engine has no reflection over arbitrary Rust types. Hosts describe the
//! types they expose with a [`ClassDef`]: typed fields, static constants,
//! methods and constructors with native bodies. Built-in values (strings,
//! lists, maps, arrays) expose their members through built-in `ClassDef`s too,
//! so method lookup and overload resolution are uniform.

use crate::error::EvalErrorKind;
use crate::types::{Conformance, Type};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Body of a native method: `(receiver, args)`. Static methods receive `Null`.
pub type NativeMethod = dyn Fn(&Value, &[Value]) -> Result<Value, EvalErrorKind> + Send + Sync;

/// Body of a constructor: initializes a freshly allocated instance.
pub type NativeInit = dyn Fn(&Instance, &[Value]) -> Result<(), EvalErrorKind> + Send + Sync;

/// Body of a free native function.
pub type NativeCall = dyn Fn(&[Value]) -> Result<Value, EvalErrorKind> + Send + Sync;

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
    pub index: usize,
}

/// Anything overload resolution can choose between.
pub trait Signature {
    fn params(&self) -> &[Type];
}

pub struct MethodDef {
    pub name: String,
    pub params: Vec<Type>,
    pub returns: Type,
    pub is_static: bool,
    body: Arc<NativeMethod>,
}

impl MethodDef {
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, EvalErrorKind> {
        (self.body)(receiver, args)
    }
}

impl Signature for MethodDef {
    fn params(&self) -> &[Type] {
        &self.params
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(Type::to_string).collect();
        write!(
            f,
            "{}{} {}({})",
            if self.is_static { "static " } else { "" },
            self.returns,
            self.name,
            params.join(", ")
        )
    }
}

pub struct ConstructorDef {
    pub params: Vec<Type>,
    body: Arc<NativeInit>,
}

impl Signature for ConstructorDef {
    fn params(&self) -> &[Type] {
        &self.params
    }
}

impl fmt::Debug for ConstructorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(Type::to_string).collect();
        write!(f, "new({})", params.join(", "))
    }
}

/// A free function importable by name.
pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any number of arguments of any type.
    pub params: Option<Vec<Type>>,
    pub returns: Type,
    body: Arc<NativeCall>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, params: Option<Vec<Type>>, returns: Type, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalErrorKind> + Send + Sync + 'static,
    {
        NativeFunction {
            name: name.into(),
            params,
            returns,
            body: Arc::new(body),
        }
    }

    /// A variadic function.
    pub fn variadic<F>(name: impl Into<String>, returns: Type, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalErrorKind> + Send + Sync + 'static,
    {
        Self::new(name, None, returns, body)
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalErrorKind> {
        if let Some(params) = &self.params {
            if params.len() != args.len() {
                return Err(EvalErrorKind::invocation(
                    &self.name,
                    format!("expected {} arguments, got {}", params.len(), args.len()),
                ));
            }
        }
        (self.body)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native {}", self.name)
    }
}

/// Description of a host type.
pub struct ClassDef {
    name: Arc<str>,
    fields: Vec<FieldDef>,
    statics: IndexMap<String, Value>,
    methods: Vec<Arc<MethodDef>>,
    constructors: Vec<Arc<ConstructorDef>>,
}

impl ClassDef {
    pub fn builder(name: &str) -> ClassBuilder {
        ClassBuilder {
            class: ClassDef {
                name: Arc::from(name),
                fields: Vec::new(),
                statics: IndexMap::new(),
                methods: Vec::new(),
                constructors: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn static_value(&self, name: &str) -> Option<&Value> {
        self.statics.get(name)
    }

    pub fn methods(&self) -> &[Arc<MethodDef>] {
        &self.methods
    }

    pub fn constructors(&self) -> &[Arc<ConstructorDef>] {
        &self.constructors
    }

    /// Methods with the given name and arity, in declaration order.
    pub fn methods_named<'a>(
        &'a self,
        name: &'a str,
        arity: usize,
        statics: bool,
    ) -> impl Iterator<Item = &'a Arc<MethodDef>> + 'a {
        self.methods
            .iter()
            .filter(move |m| m.name == name && m.params.len() == arity && m.is_static == statics)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    /// Bean-style reader for `prop`: `getProp()`, `isProp()` or `prop()`.
    pub fn getter(&self, prop: &str) -> Option<&Arc<MethodDef>> {
        let cap = capitalize(prop);
        let candidates = [format!("get{}", cap), format!("is{}", cap), prop.to_string()];
        candidates.iter().find_map(|name| {
            self.methods
                .iter()
                .find(|m| !m.is_static && m.params.is_empty() && &m.name == name)
        })
    }

    /// Bean-style writer `setProp(v)`.
    pub fn setter(&self, prop: &str) -> Option<&Arc<MethodDef>> {
        let name = format!("set{}", capitalize(prop));
        self.methods
            .iter()
            .find(|m| !m.is_static && m.params.len() == 1 && m.name == name)
    }

    /// Allocates an instance with every field at its type's default value.
    pub fn instantiate(self: &Arc<Self>) -> Instance {
        let slots = self.fields.iter().map(|f| default_for(&f.ty)).collect();
        Instance {
            class: Arc::clone(self),
            slots: RwLock::new(slots),
        }
    }

    /// Allocates and initializes an instance with the given constructor.
    pub fn construct(
        self: &Arc<Self>,
        ctor: &ConstructorDef,
        args: &[Value],
    ) -> Result<Value, EvalErrorKind> {
        let instance = self.instantiate();
        (ctor.body)(&instance, args)?;
        Ok(Value::Object(Arc::new(instance)))
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .field("constructors", &self.constructors)
            .finish()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn default_for(ty: &Type) -> Value {
    match ty {
        Type::Int => Value::Int(0),
        Type::Float => Value::Float(0.0),
        Type::Bool => Value::Bool(false),
        Type::Char => Value::Char('\0'),
        _ => Value::Null,
    }
}

/// Fluent construction of a [`ClassDef`].
pub struct ClassBuilder {
    class: ClassDef,
}

impl ClassBuilder {
    pub fn field(mut self, name: &str, ty: Type) -> Self {
        let index = self.class.fields.len();
        self.class.fields.push(FieldDef {
            name: name.to_string(),
            ty,
            index,
        });
        self
    }

    pub fn constant(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.class.statics.insert(name.to_string(), value.into());
        self
    }

    pub fn method<F>(mut self, name: &str, params: Vec<Type>, returns: Type, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, EvalErrorKind> + Send + Sync + 'static,
    {
        self.class.methods.push(Arc::new(MethodDef {
            name: name.to_string(),
            params,
            returns,
            is_static: false,
            body: Arc::new(body),
        }));
        self
    }

    pub fn static_method<F>(mut self, name: &str, params: Vec<Type>, returns: Type, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalErrorKind> + Send + Sync + 'static,
    {
        self.class.methods.push(Arc::new(MethodDef {
            name: name.to_string(),
            params,
            returns,
            is_static: true,
            body: Arc::new(move |_: &Value, args: &[Value]| body(args)),
        }));
        self
    }

    pub fn constructor<F>(mut self, params: Vec<Type>, body: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> Result<(), EvalErrorKind> + Send + Sync + 'static,
    {
        self.class.constructors.push(Arc::new(ConstructorDef {
            params,
            body: Arc::new(body),
        }));
        self
    }

    /// Adds a constructor taking every field in declaration order.
    pub fn field_constructor(self) -> Self {
        let params: Vec<Type> = self.class.fields.iter().map(|f| f.ty.clone()).collect();
        self.constructor(params, |instance, args| {
            for (i, arg) in args.iter().enumerate() {
                instance.set(i, arg.clone());
            }
            Ok(())
        })
    }

    pub fn build(self) -> Arc<ClassDef> {
        Arc::new(self.class)
    }
}

/// An object of a host class.
pub struct Instance {
    class: Arc<ClassDef>,
    slots: RwLock<Vec<Value>>,
}

impl Instance {
    pub fn class(&self) -> &Arc<ClassDef> {
        &self.class
    }

    pub fn get(&self, index: usize) -> Value {
        self.slots.read().get(index).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&self, index: usize, value: Value) {
        if let Some(slot) = self.slots.write().get_mut(index) {
            *slot = value;
        }
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.class.field(name).map(|f| self.get(f.index))
    }

    /// Sets a declared field; returns `false` if the class has no such field.
    pub fn set_field(&self, name: &str, value: Value) -> bool {
        match self.class.field(name) {
            Some(f) => {
                self.set(f.index, value);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(Arc::new(Instance {
            class: Arc::clone(&self.class),
            slots: RwLock::new(self.slots.read().clone()),
        })))
    }
}

/// A chosen overload plus the per-argument conformance that selected it.
#[derive(Debug)]
pub struct Resolved<S> {
    pub member: Arc<S>,
    pub conformance: Vec<Conformance>,
}

impl<S> Clone for Resolved<S> {
    fn clone(&self) -> Self {
        Resolved {
            member: Arc::clone(&self.member),
            conformance: self.conformance.clone(),
        }
    }
}

/// Picks the best overload for the given argument types.
///
/// Every parameter must conform; candidates are ranked by the sum of their
/// per-parameter scores (exact > widening > numeric) and ties go to the one
/// declared first.
pub fn resolve_overload<'a, S, I>(candidates: I, args: &[Type]) -> Option<Resolved<S>>
where
    S: Signature + 'a,
    I: IntoIterator<Item = &'a Arc<S>>,
{
    let mut best: Option<(u32, Resolved<S>)> = None;
    for candidate in candidates {
        let params = candidate.params();
        if params.len() != args.len() {
            continue;
        }
        let conformance: Vec<Conformance> = params
            .iter()
            .zip(args)
            .map(|(param, arg)| param.conformance(arg))
            .collect();
        if !conformance.iter().all(|c| c.accepts()) {
            continue;
        }
        let score: u32 = conformance.iter().map(|c| c.score()).sum();
        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((
                score,
                Resolved {
                    member: Arc::clone(candidate),
                    conformance,
                },
            ));
        }
    }
    best.map(|(_, r)| r)
}

/// Classes available to `import` statements and `new` expressions.
#[derive(Debug, Clone, Default)]
pub struct ClassLibrary {
    classes: IndexMap<String, Arc<ClassDef>>,
}

impl ClassLibrary {
    pub fn new() -> Self {
        ClassLibrary::default()
    }

    /// A library holding the built-in classes (`Math`, `String`, `List`, ...).
    pub fn standard() -> Self {
        let mut lib = ClassLibrary::new();
        for class in crate::builtins::standard_classes() {
            lib.register(class);
        }
        lib
    }

    pub fn register(&mut self, class: Arc<ClassDef>) {
        self.classes.insert(class.name().to_string(), class);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ClassDef>> {
        self.classes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClassDef>> {
        self.classes.values()
    }
}
