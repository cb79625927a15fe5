//! Specialized units.
//!
//! A unit is generated from one traced walk of a path. Each step becomes a
//! closure holding a guard on the receiver's shape and the member access the
//! walk resolved (map key, field slot, getter, overload). A closure whose
//! guard fails reports a miss, and the site's safe chain takes over from that
//! step for the rest of the call. Errors are only ever raised by the same
//! code the safe chain runs, so both paths fail identically.

use super::member::checked;
use super::safe::{self, AssignAccessor, CollectionAccessor, Observed, SafeAccessor};
use super::{
    coerce_args, eval_all, instantiate, lookup_class, resolve_new, Accessor, AccessorOptimizer,
    CollectionSpec, NewSpec, NewTarget, Optimized, PathExpr, Segment,
};
use crate::ast::Node;
use crate::builtins::class_of;
use crate::class::{resolve_overload, ClassDef, MethodDef};
use crate::error::{EvalErrorKind, EvaluationError};
use crate::runtime::Frame;
use crate::types::{Conformance, Type};
use crate::value::{map_key, Value};
use exprel_codegen::{Registration, UnitKey};
use parking_lot::Mutex;
use std::fmt;
use std::mem::{self, Discriminant};
use std::sync::Arc;

/// Outcome of one specialized step.
pub(crate) enum Probe {
    Hit(Value),
    /// The guard failed on `receiver`. `pending` carries arguments the step
    /// already evaluated so the safe chain does not evaluate them twice.
    Miss {
        receiver: Value,
        pending: Option<Vec<Value>>,
    },
}

fn miss(receiver: Value) -> Probe {
    Probe::Miss {
        receiver,
        pending: None,
    }
}

type StepFn =
    Box<dyn Fn(&PathExpr, Value, &Frame<'_>) -> Result<Probe, EvaluationError> + Send + Sync>;

/// Cheap shape check on a step's receiver.
#[derive(Debug, Clone)]
enum Guard {
    /// Instance of exactly this class.
    Instance(Arc<ClassDef>),
    /// This class reference.
    Static(Arc<ClassDef>),
    /// Same kind of built-in value (list, map, string, ...).
    Kind(Discriminant<Value>),
}

impl Guard {
    fn of(value: &Value) -> Option<Guard> {
        match value {
            Value::Null | Value::Void => None,
            Value::Object(obj) => Some(Guard::Instance(Arc::clone(obj.class()))),
            Value::Class(class) => Some(Guard::Static(Arc::clone(class))),
            other => Some(Guard::Kind(mem::discriminant(other))),
        }
    }

    fn holds(&self, value: &Value) -> bool {
        match (self, value) {
            (Guard::Instance(class), Value::Object(obj)) => Arc::ptr_eq(class, obj.class()),
            (Guard::Static(class), Value::Class(c)) => Arc::ptr_eq(class, c),
            (Guard::Kind(kind), other) => *kind == mem::discriminant(other),
            _ => false,
        }
    }
}

/// A property read resolved against an observed receiver.
enum Read {
    MapKey(String),
    Field(usize),
    Getter(Arc<MethodDef>),
    Constant(Value),
    Length,
}

/// A method call resolved for the observed argument types.
struct Invoke {
    member: Arc<MethodDef>,
    conformance: Vec<Conformance>,
    types: Vec<Type>,
}

/// Generated closure chain for one path and declaring type.
pub struct SpecializedUnit {
    key: UnitKey,
    steps: Vec<StepFn>,
    egress: Type,
}

impl SpecializedUnit {
    pub(crate) fn generate(key: UnitKey, path: &PathExpr, trace: &[Observed], result: &Value) -> Self {
        let steps = path
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| match trace.get(i) {
                Some(observed) => specialize_step(i, segment, observed),
                None => generic(i),
            })
            .collect();
        SpecializedUnit {
            key,
            steps,
            egress: result.type_of(),
        }
    }

    pub fn key(&self) -> &UnitKey {
        &self.key
    }

    /// Type of the value the traced walk produced.
    pub fn egress(&self) -> &Type {
        &self.egress
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the chain, handing over to `safe` at the first guard miss.
    pub fn execute(&self, safe: &SafeAccessor, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let path = safe.path();
        if path.len() != self.steps.len() {
            return safe.get_value(f);
        }
        let mut value = Value::Null;
        for (i, step) in self.steps.iter().enumerate() {
            match step(path, value, f)? {
                Probe::Hit(next) => value = next,
                Probe::Miss { receiver, pending } => {
                    tracing::trace!(path = %path, step = i, "guard miss, resuming safe chain");
                    return safe.resume(i, receiver, pending, f);
                }
            }
        }
        Ok(value)
    }
}

impl fmt::Debug for SpecializedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecializedUnit")
            .field("key", &self.key)
            .field("steps", &self.steps.len())
            .field("egress", &self.egress)
            .finish()
    }
}

fn step_fn<F>(step: F) -> StepFn
where
    F: Fn(&PathExpr, Value, &Frame<'_>) -> Result<Probe, EvaluationError> + Send + Sync + 'static,
{
    Box::new(step)
}

/// Runs segment `i` of the caller's path through the safe step.
fn generic(i: usize) -> StepFn {
    step_fn(move |path, receiver, f| match path.segments.get(i) {
        Some(segment) => safe::step(segment, receiver, None, path, f, None).map(Probe::Hit),
        None => Ok(miss(receiver)),
    })
}

fn specialize_step(i: usize, segment: &Segment, observed: &Observed) -> StepFn {
    match segment {
        Segment::This => step_fn(|_, _, f| Ok(Probe::Hit(f.this_ref.clone()))),
        // Roots resolve against the per-evaluation scope chain.
        Segment::Root(_) | Segment::Base(_) => generic(i),
        Segment::Property { name, .. } => property_step(i, name, &observed.receiver),
        Segment::Index { .. } => index_step(i, &observed.receiver),
        Segment::Method { name, .. } => method_step(i, name, observed),
    }
}

fn resolve_read(receiver: &Value, name: &str) -> Option<Read> {
    match receiver {
        Value::Map(_) => Some(Read::MapKey(name.to_string())),
        Value::Object(obj) => {
            let class = obj.class();
            if let Some(field) = class.field(name) {
                return Some(Read::Field(field.index));
            }
            class.getter(name).cloned().map(Read::Getter)
        }
        Value::Class(class) => class.static_value(name).cloned().map(Read::Constant),
        Value::Array(_) if name == "length" || name == "size" => Some(Read::Length),
        other => class_of(other)
            .and_then(|class| class.getter(name).cloned())
            .map(Read::Getter),
    }
}

fn property_step(i: usize, name: &str, receiver: &Value) -> StepFn {
    let (guard, read) = match (Guard::of(receiver), resolve_read(receiver, name)) {
        (Some(guard), Some(read)) => (guard, read),
        _ => return generic(i),
    };
    step_fn(move |path, receiver, f| {
        if !guard.holds(&receiver) {
            return Ok(miss(receiver));
        }
        let value = match &read {
            Read::MapKey(key) => match &receiver {
                Value::Map(map) => map.read().get(key).cloned().unwrap_or_default(),
                _ => Value::Null,
            },
            Read::Field(index) => match &receiver {
                Value::Object(obj) => obj.get(*index),
                _ => Value::Null,
            },
            Read::Getter(getter) => getter
                .invoke(&receiver, &[])
                .map_err(|k| path.error(k, f))?,
            Read::Constant(value) => value.clone(),
            Read::Length => Value::from(receiver.len().unwrap_or(0)),
        };
        Ok(Probe::Hit(value))
    })
}

fn index_node(path: &PathExpr, i: usize) -> Option<&Arc<Node>> {
    match path.segments.get(i) {
        Some(Segment::Index { index, .. }) => Some(index),
        _ => None,
    }
}

fn index_step(i: usize, receiver: &Value) -> StepFn {
    let guard = match receiver {
        Value::List(_) | Value::Array(_) | Value::Map(_) => Guard::Kind(mem::discriminant(receiver)),
        _ => return generic(i),
    };
    step_fn(move |path, receiver, f| {
        if !guard.holds(&receiver) {
            return Ok(miss(receiver));
        }
        let Some(node) = index_node(path, i) else {
            return Ok(miss(receiver));
        };
        let index = node.eval(f)?;
        let hit = match (&receiver, &index) {
            (Value::List(items), Value::Int(n)) => {
                let items = items.read();
                checked(*n, items.len()).ok().map(|at| items[at].clone())
            }
            (Value::Array(items), Value::Int(n)) => {
                let items = items.read();
                checked(*n, items.len()).ok().map(|at| items[at].clone())
            }
            (Value::Map(map), key) => Some(map.read().get(&map_key(key)).cloned().unwrap_or_default()),
            _ => None,
        };
        Ok(match hit {
            Some(value) => Probe::Hit(value),
            None => Probe::Miss {
                receiver,
                pending: Some(vec![index]),
            },
        })
    })
}

fn resolve_invoke(receiver: &Value, name: &str, types: &[Type]) -> Option<Invoke> {
    let resolved = match receiver {
        Value::Class(class) => resolve_overload(class.methods_named(name, types.len(), true), types),
        other => {
            let class = class_of(other)?;
            resolve_overload(class.methods_named(name, types.len(), false), types)
        }
    }?;
    Some(Invoke {
        member: resolved.member,
        conformance: resolved.conformance,
        types: types.to_vec(),
    })
}

fn method_step(i: usize, name: &str, observed: &Observed) -> StepFn {
    let receiver = &observed.receiver;
    let (guard, invoke) = match (Guard::of(receiver), resolve_invoke(receiver, name, &observed.args)) {
        (Some(guard), Some(invoke)) => (guard, invoke),
        _ => return generic(i),
    };
    step_fn(move |path, receiver, f| {
        if !guard.holds(&receiver) {
            return Ok(miss(receiver));
        }
        let Some(Segment::Method { args, .. }) = path.segments.get(i) else {
            return Ok(miss(receiver));
        };
        let args = eval_all(args, f)?;
        if !args.iter().map(Value::type_of).eq(invoke.types.iter().cloned()) {
            return Ok(Probe::Miss {
                receiver,
                pending: Some(args),
            });
        }
        let fail = |k| path.error(k, f);
        let args = coerce_args(&args, &invoke.member.params, &invoke.conformance, f.converter())
            .map_err(fail)?;
        let this = if invoke.member.is_static { Value::Null } else { receiver };
        invoke.member.invoke(&this, &args).map(Probe::Hit).map_err(fail)
    })
}

/// Cache key: path text plus the type of the root value.
fn unit_key(path: &PathExpr, trace: &[Observed], result: &Value) -> UnitKey {
    let declaring = match trace.get(1) {
        Some(observed) => observed.receiver.type_of(),
        None => result.type_of(),
    };
    UnitKey::new(path.text.as_ref(), declaring.to_string())
}

/// A unit together with the registry generation it was handed out in.
pub(crate) type Installed = (Arc<SpecializedUnit>, u64);

/// Evaluates `safe` once while tracing, then finds or generates the unit for
/// what the trace saw. `None` when registering the unit evicted the registry.
pub(crate) fn specialize(
    safe: &SafeAccessor,
    f: &Frame<'_>,
) -> Result<(Value, Option<Installed>), EvaluationError> {
    let path = safe.path();
    let mut trace = Vec::with_capacity(path.len());
    let value = safe.traced(f, &mut trace)?;
    let key = unit_key(path, &trace, &value);
    let registry = &f.runtime.registry;
    if let Some(found) = registry.lookup(&key) {
        return Ok((value, Some(found)));
    }
    let unit = SpecializedUnit::generate(key.clone(), path, &trace, &value);
    let installed = match registry.register(key, unit) {
        Registration::Installed { unit, generation } | Registration::Existing { unit, generation } => {
            Some((unit, generation))
        }
        Registration::Evicted { generation } => {
            tracing::debug!(path = %path, generation, "unit dropped by registry eviction");
            None
        }
    };
    Ok((value, installed))
}

enum UnitState {
    Pending,
    Specializing,
    Ready(Arc<SpecializedUnit>, u64),
    /// The unit was evicted or could not be registered; the site stays safe.
    Retired,
}

/// Site that specializes on its first evaluation.
pub struct SpecializedAccessor {
    safe: SafeAccessor,
    state: Mutex<UnitState>,
}

enum Plan {
    Specialize,
    Run(Arc<SpecializedUnit>),
    Safe,
}

impl SpecializedAccessor {
    pub fn new(path: PathExpr) -> Self {
        SpecializedAccessor {
            safe: SafeAccessor::new(path),
            state: Mutex::new(UnitState::Pending),
        }
    }

    pub fn is_specialized(&self) -> bool {
        matches!(*self.state.lock(), UnitState::Ready(..))
    }

    fn plan(&self, f: &Frame<'_>) -> Plan {
        let mut state = self.state.lock();
        match &*state {
            UnitState::Pending => {
                *state = UnitState::Specializing;
                Plan::Specialize
            }
            UnitState::Ready(unit, generation) => {
                if *generation == f.runtime.registry.generation() {
                    return Plan::Run(Arc::clone(unit));
                }
                tracing::debug!(path = %self.safe.path(), "specialized unit evicted, site retired");
                *state = UnitState::Retired;
                Plan::Safe
            }
            UnitState::Specializing | UnitState::Retired => Plan::Safe,
        }
    }
}

impl fmt::Debug for SpecializedAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpecializedAccessor({})", self.safe.path())
    }
}

impl Accessor for SpecializedAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        match self.plan(f) {
            Plan::Run(unit) => unit.execute(&self.safe, f),
            Plan::Safe => self.safe.get_value(f),
            Plan::Specialize => match specialize(&self.safe, f) {
                Ok((value, installed)) => {
                    *self.state.lock() = match installed {
                        Some((unit, generation)) => UnitState::Ready(unit, generation),
                        None => UnitState::Retired,
                    };
                    Ok(value)
                }
                Err(err) => {
                    *self.state.lock() = UnitState::Pending;
                    Err(err)
                }
            },
        }
    }

    fn set_value(&self, f: &Frame<'_>, value: Value) -> Result<Value, EvaluationError> {
        self.safe.set_value(f, value)
    }

    fn egress_type(&self) -> Type {
        match &*self.state.lock() {
            UnitState::Ready(unit, _) => unit.egress().clone(),
            _ => Type::Any,
        }
    }
}

/// `new` with the constructor resolved once per argument-type signature.
pub struct ConstructorAccessor {
    spec: Arc<NewSpec>,
    cached: Mutex<Option<(Vec<Type>, NewTarget)>>,
}

impl ConstructorAccessor {
    pub fn new(spec: Arc<NewSpec>) -> Self {
        ConstructorAccessor {
            spec,
            cached: Mutex::new(None),
        }
    }
}

fn still_current(target: &NewTarget, spec: &NewSpec, f: &Frame<'_>) -> bool {
    let class = lookup_class(&spec.class_name, f);
    match target {
        NewTarget::Class(resolved, ..) => class.map(|c| Arc::ptr_eq(&c, resolved)).unwrap_or(false),
        NewTarget::Builtin(_) => class.map(|c| c.constructors().is_empty()).unwrap_or(true),
    }
}

impl fmt::Debug for ConstructorAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConstructorAccessor(new {})", self.spec.class_name)
    }
}

impl Accessor for ConstructorAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let fail = |k| f.error_at(k, self.spec.span.start);
        let args = eval_all(&self.spec.args, f)?;
        let types: Vec<Type> = args.iter().map(Value::type_of).collect();
        let cached = self.cached.lock().clone();
        let target = match cached {
            Some((seen, target)) if seen == types && still_current(&target, &self.spec, f) => target,
            _ => {
                let target = resolve_new(&self.spec, &args, f).map_err(fail)?;
                *self.cached.lock() = Some((types, target.clone()));
                target
            }
        };
        instantiate(&target, &args, f).map_err(fail)
    }

    fn set_value(&self, f: &Frame<'_>, _value: Value) -> Result<Value, EvaluationError> {
        Err(f.error_at(
            EvalErrorKind::NotAssignable(format!("new {}", self.spec.class_name)),
            self.spec.span.start,
        ))
    }

    fn egress_type(&self) -> Type {
        safe::new_egress(&self.spec)
    }
}

/// Specializes every path on its first evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecializingOptimizer;

impl AccessorOptimizer for SpecializingOptimizer {
    fn optimize_accessor(&self, path: &PathExpr, f: &Frame<'_>) -> Result<Optimized, EvaluationError> {
        let accessor = SpecializedAccessor::new(path.clone());
        let value = accessor.get_value(f)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_assignment(
        &self,
        path: &PathExpr,
        f: &Frame<'_>,
        value: Value,
    ) -> Result<Optimized, EvaluationError> {
        let prefix = (path.len() > 1).then(|| {
            Arc::new(SpecializedAccessor::new(path.prefix(path.len() - 1))) as Arc<dyn Accessor>
        });
        let accessor = AssignAccessor::with_prefix(path.clone(), prefix);
        let value = accessor.set_value(f, value)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_collection(
        &self,
        spec: &Arc<CollectionSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError> {
        let value = spec.build(f)?;
        let accessor = if spec.is_constant() {
            CollectionAccessor::templated(Arc::clone(spec), value.deep_clone())
        } else {
            CollectionAccessor::safe(Arc::clone(spec))
        };
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_object_creation(
        &self,
        spec: &Arc<NewSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError> {
        let accessor = ConstructorAccessor::new(Arc::clone(spec));
        let value = accessor.get_value(f)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }
}
