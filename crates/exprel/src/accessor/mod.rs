//! Accessor optimizer framework.
//!
//! A property path (`a.b[0].c(x)`) compiles to a [`PathExpr`]. The first
//! accelerated evaluation of a node hands the path to the engine's
//! [`AccessorOptimizer`], which evaluates it once and leaves behind an
//! [`Accessor`] in the node's site. Later evaluations go straight to that
//! accessor.
//!
//! Three strategies exist:
//!
//! - [`SafeOptimizer`] builds an introspecting chain that inspects the live
//!   value at every step.
//! - [`SpecializingOptimizer`] walks the path once while recording the shapes
//!   it meets and generates a closure chain for exactly that access sequence.
//! - [`DynamicOptimizer`] starts safe and promotes hot sites to specialized
//!   units once they pass the tenuring threshold.

mod dynamic;
mod member;
mod safe;
mod specialize;

pub use dynamic::{DynamicAccessor, DynamicOptimizer, Tier};
pub use member::RootSource;
pub use safe::{AssignAccessor, CollectionAccessor, NewAccessor, SafeAccessor, SafeOptimizer};
pub use specialize::{
    ConstructorAccessor, SpecializedAccessor, SpecializedUnit, SpecializingOptimizer,
};

pub(crate) use member::{call_method, resolve_root, write_ctx};

use crate::ast::{Node, Site};
use crate::class::{resolve_overload, ClassDef, ConstructorDef};
use crate::convert::Converter;
use crate::error::{EvalErrorKind, EvaluationError};
use crate::lexer::Span;
use crate::runtime::Frame;
use crate::types::{Conformance, Type};
use crate::value::{map_key, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One step of a property path.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Variable or context property the path starts from.
    Root(String),
    This,
    /// A leading expression: `(a + b).foo`, `[1, 2].size()`, `f(x).y`.
    Base(Arc<Node>),
    Property { name: String, null_safe: bool },
    Index { index: Arc<Node>, null_safe: bool },
    Method { name: String, args: Arc<[Node]>, null_safe: bool },
}

impl Segment {
    pub fn is_null_safe(&self) -> bool {
        match self {
            Segment::Property { null_safe, .. }
            | Segment::Index { null_safe, .. }
            | Segment::Method { null_safe, .. } => *null_safe,
            _ => false,
        }
    }
}

/// A compiled property path.
#[derive(Clone)]
pub struct PathExpr {
    /// Source text; together with the root type it keys specialized units.
    pub text: Arc<str>,
    pub span: Span,
    pub segments: Arc<[Segment]>,
    /// `cuts[i]` is the length of `text` covering segments `0..=i`.
    pub cuts: Arc<[usize]>,
    /// Source line, recorded when compiled with debug symbols.
    pub line: Option<u32>,
}

impl PathExpr {
    pub fn new(text: impl Into<Arc<str>>, span: Span, segments: Vec<Segment>, cuts: Vec<usize>) -> Self {
        PathExpr {
            text: text.into(),
            span,
            segments: segments.into(),
            cuts: cuts.into(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }

    /// A path of a single variable name.
    pub fn root(name: &str, span: Span) -> Self {
        PathExpr::new(name, span, vec![Segment::Root(name.to_string())], vec![name.len()])
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `n` segments as a path of their own.
    pub fn prefix(&self, n: usize) -> PathExpr {
        let n = n.min(self.segments.len());
        let cut = match n {
            0 => 0,
            n => self.cuts.get(n - 1).copied().unwrap_or(self.text.len()),
        };
        PathExpr {
            text: Arc::from(self.text.get(..cut).unwrap_or(&self.text)),
            span: Span::new(self.span.start, self.span.start + cut),
            segments: self.segments[..n].to_vec().into(),
            cuts: self.cuts[..n.min(self.cuts.len())].to_vec().into(),
            line: self.line,
        }
    }

    /// The bare variable name when the path is a single root segment.
    pub fn as_root(&self) -> Option<&str> {
        match &*self.segments {
            [Segment::Root(name)] => Some(name),
            _ => None,
        }
    }

    pub(crate) fn error(&self, kind: EvalErrorKind, f: &Frame<'_>) -> EvaluationError {
        let mut err = f.error_at(kind, self.span.start);
        err.line = self.line.map(|l| l as usize);
        err
    }
}

impl fmt::Debug for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathExpr({:?})", self.text)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// `[a, b]`, `{a, b}` or `['k': v]`.
#[derive(Debug)]
pub enum CollectionSpec {
    List(Vec<Node>),
    Array(Vec<Node>),
    Map(Vec<(Node, Node)>),
}

impl CollectionSpec {
    pub fn egress(&self) -> Type {
        match self {
            CollectionSpec::List(_) => Type::List,
            CollectionSpec::Array(_) => Type::Array,
            CollectionSpec::Map(_) => Type::Map,
        }
    }

    /// Builds a fresh collection, evaluating every element in source order.
    pub fn build(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        Ok(match self {
            CollectionSpec::List(items) => Value::list(eval_all(items, f)?),
            CollectionSpec::Array(items) => Value::array(eval_all(items, f)?),
            CollectionSpec::Map(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = map_key(&key.eval(f)?);
                    map.insert(key, value.eval(f)?);
                }
                Value::map(map)
            }
        })
    }

    /// Whether every element is a literal, so the collection can be stamped
    /// out from a template.
    pub fn is_constant(&self) -> bool {
        match self {
            CollectionSpec::List(items) | CollectionSpec::Array(items) => {
                items.iter().all(Node::is_literal)
            }
            CollectionSpec::Map(entries) => entries
                .iter()
                .all(|(k, v)| k.is_literal() && v.is_literal()),
        }
    }
}

/// `new Name(args)`.
#[derive(Debug)]
pub struct NewSpec {
    pub class_name: String,
    pub args: Vec<Node>,
    pub span: Span,
}

pub(crate) fn eval_all(nodes: &[Node], f: &Frame<'_>) -> Result<Vec<Value>, EvaluationError> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        out.push(node.eval(f)?);
    }
    Ok(out)
}

/// Executable form of a path, collection constructor or object creation.
pub trait Accessor: Send + Sync + fmt::Debug {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError>;

    /// Writes through the accessor and returns the stored value.
    fn set_value(&self, f: &Frame<'_>, value: Value) -> Result<Value, EvaluationError>;

    /// Type of the values this accessor produces, `Any` when it varies.
    fn egress_type(&self) -> Type;
}

/// An accessor together with the value its first evaluation produced.
pub struct Optimized {
    pub accessor: Arc<dyn Accessor>,
    pub value: Value,
}

impl Optimized {
    pub fn new(accessor: Arc<dyn Accessor>, value: Value) -> Self {
        Optimized { accessor, value }
    }

    /// Type of the first value produced, falling back to the accessor's
    /// static egress when the value was null.
    pub fn result_type(&self) -> Type {
        match &self.value {
            Value::Null => self.accessor.egress_type(),
            v => v.type_of(),
        }
    }
}

/// Strategy turning paths, collection literals and `new` expressions into
/// accessors. Every method performs the first evaluation (or write) itself.
pub trait AccessorOptimizer: Send + Sync {
    fn optimize_accessor(&self, path: &PathExpr, f: &Frame<'_>) -> Result<Optimized, EvaluationError>;

    fn optimize_assignment(
        &self,
        path: &PathExpr,
        f: &Frame<'_>,
        value: Value,
    ) -> Result<Optimized, EvaluationError>;

    fn optimize_collection(
        &self,
        spec: &Arc<CollectionSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError>;

    fn optimize_object_creation(
        &self,
        spec: &Arc<NewSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError>;
}

/// Which strategy an engine uses for accelerated evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMode {
    Safe,
    Specializing,
    #[default]
    Dynamic,
}

pub fn optimizer_for(mode: OptimizerMode) -> &'static dyn AccessorOptimizer {
    static SAFE: SafeOptimizer = SafeOptimizer;
    static SPECIALIZING: SpecializingOptimizer = SpecializingOptimizer;
    static DYNAMIC: DynamicOptimizer = DynamicOptimizer;
    match mode {
        OptimizerMode::Safe => &SAFE,
        OptimizerMode::Specializing => &SPECIALIZING,
        OptimizerMode::Dynamic => &DYNAMIC,
    }
}

fn optimizer(f: &Frame<'_>) -> &'static dyn AccessorOptimizer {
    optimizer_for(f.runtime.config.optimizer)
}

/// Reads a path through its site, optimizing it on first use.
pub fn eval_path(path: &PathExpr, site: &Site, f: &Frame<'_>) -> Result<Value, EvaluationError> {
    if f.interpreted() {
        return SafeAccessor::new(path.clone()).get_value(f);
    }
    if let Some(accessor) = site.get() {
        return accessor.get_value(f);
    }
    let optimized = optimizer(f).optimize_accessor(path, f)?;
    let _ = site.set(optimized.accessor);
    Ok(optimized.value)
}

/// Current value of an assignment target, for compound assignment.
pub fn read_for_update(path: &PathExpr, site: &Site, f: &Frame<'_>) -> Result<Value, EvaluationError> {
    match site.get() {
        Some(accessor) if !f.interpreted() => accessor.get_value(f),
        _ => SafeAccessor::new(path.clone()).get_value(f),
    }
}

/// Writes `value` at the end of `path` through the assignment site.
pub fn assign_path(
    path: &PathExpr,
    site: &Site,
    f: &Frame<'_>,
    value: Value,
) -> Result<Value, EvaluationError> {
    if f.interpreted() {
        return AssignAccessor::safe(path.clone()).set_value(f, value);
    }
    if let Some(accessor) = site.get() {
        return accessor.set_value(f, value);
    }
    let optimized = optimizer(f).optimize_assignment(path, f, value)?;
    let _ = site.set(optimized.accessor);
    Ok(optimized.value)
}

pub fn eval_collection(
    spec: &Arc<CollectionSpec>,
    site: &Site,
    f: &Frame<'_>,
) -> Result<Value, EvaluationError> {
    if f.interpreted() {
        return spec.build(f);
    }
    if let Some(accessor) = site.get() {
        return accessor.get_value(f);
    }
    let optimized = optimizer(f).optimize_collection(spec, f)?;
    let _ = site.set(optimized.accessor);
    Ok(optimized.value)
}

pub fn eval_new(spec: &Arc<NewSpec>, site: &Site, f: &Frame<'_>) -> Result<Value, EvaluationError> {
    if f.interpreted() {
        return construct(spec, f).map(|(value, _)| value);
    }
    if let Some(accessor) = site.get() {
        return accessor.get_value(f);
    }
    let optimized = optimizer(f).optimize_object_creation(spec, f)?;
    let _ = site.set(optimized.accessor);
    Ok(optimized.value)
}

/// A root-level call `name(args)` that does not name a function in scope:
/// a method of `this` or of the context object, or a native function
/// stored in a context map.
pub fn invoke_on_ctx(name: &str, args: Vec<Value>, f: &Frame<'_>) -> Result<Value, EvalErrorKind> {
    for receiver in [f.this_ref, f.ctx] {
        match receiver {
            Value::Null => continue,
            Value::Map(map) => {
                let entry = map.read().get(name).cloned();
                if let Some(Value::Native(native)) = entry {
                    return native.call(&args);
                }
            }
            other => {
                let has = crate::builtins::class_of(other)
                    .map(|class| class.has_method(name))
                    .unwrap_or(false);
                if has {
                    return call_method(other, name, &args, false, f.converter());
                }
            }
        }
    }
    Err(EvalErrorKind::UnresolvableProperty(format!("{}()", name)))
}

/// What a `new` expression instantiates.
#[derive(Debug, Clone)]
pub(crate) enum NewTarget {
    Class(Arc<ClassDef>, Arc<ConstructorDef>, Vec<Conformance>),
    /// `new ArrayList()`, `new HashMap()`, `new String(..)`.
    Builtin(Type),
}

pub(crate) fn lookup_class(name: &str, f: &Frame<'_>) -> Option<Arc<ClassDef>> {
    if let Some(Value::Class(class)) = f.scope.resolve(name).map(|slot| slot.get()) {
        return Some(class);
    }
    f.runtime.classes.get(name).cloned()
}

/// Resolves the class and constructor of a `new` expression for the given
/// argument values.
pub(crate) fn resolve_new(spec: &NewSpec, args: &[Value], f: &Frame<'_>) -> Result<NewTarget, EvalErrorKind> {
    if let Some(class) = lookup_class(&spec.class_name, f) {
        if !class.constructors().is_empty() {
            let types: Vec<Type> = args.iter().map(Value::type_of).collect();
            let resolved = resolve_overload(class.constructors(), &types).ok_or_else(|| {
                EvalErrorKind::invocation(
                    format!("new {}", spec.class_name),
                    format!("no constructor accepts ({})", type_list(&types)),
                )
            })?;
            return Ok(NewTarget::Class(class, resolved.member, resolved.conformance));
        }
    }
    match Type::from_name(&spec.class_name) {
        Some(ty @ (Type::List | Type::Map)) if args.is_empty() => Ok(NewTarget::Builtin(ty)),
        Some(Type::Str) if args.len() <= 1 => Ok(NewTarget::Builtin(Type::Str)),
        _ => Err(EvalErrorKind::UnresolvableProperty(spec.class_name.clone())),
    }
}

pub(crate) fn instantiate(target: &NewTarget, args: &[Value], f: &Frame<'_>) -> Result<Value, EvalErrorKind> {
    match target {
        NewTarget::Class(class, ctor, conformance) => {
            let args = coerce_args(args, &ctor.params, conformance, f.converter())?;
            class.construct(ctor, &args)
        }
        NewTarget::Builtin(Type::List) => Ok(Value::list(Vec::new())),
        NewTarget::Builtin(Type::Map) => Ok(Value::empty_map()),
        NewTarget::Builtin(_) => Ok(Value::from(
            args.first().map(Value::to_string).unwrap_or_default(),
        )),
    }
}

/// Evaluates a `new` expression from scratch.
pub(crate) fn construct(spec: &NewSpec, f: &Frame<'_>) -> Result<(Value, NewTarget), EvaluationError> {
    let args = eval_all(&spec.args, f)?;
    let fail = |k| f.error_at(k, spec.span.start);
    let target = resolve_new(spec, &args, f).map_err(fail)?;
    let value = instantiate(&target, &args, f).map_err(fail)?;
    Ok((value, target))
}

/// Converts arguments whose type does not match the parameter exactly.
pub(crate) fn coerce_args(
    args: &[Value],
    params: &[Type],
    conformance: &[Conformance],
    converter: &dyn Converter,
) -> Result<Vec<Value>, EvalErrorKind> {
    args.iter()
        .zip(params)
        .zip(conformance)
        .map(|((arg, param), fit)| match fit {
            Conformance::Exact => Ok(arg.clone()),
            _ if *param == Type::Any || arg.is_null() => Ok(arg.clone()),
            _ => converter.convert(arg, param),
        })
        .collect()
}

pub(crate) fn type_list(types: &[Type]) -> String {
    types
        .iter()
        .map(Type::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
