//! Introspecting accessors: every step inspects the live value.

use super::member;
use super::{
    construct, AccessorOptimizer, Accessor, CollectionSpec, NewSpec, Optimized, PathExpr, Segment,
};
use crate::ast::store_name;
use crate::error::{EvalErrorKind, EvaluationError};
use crate::runtime::Frame;
use crate::types::Type;
use crate::value::Value;
use std::fmt;
use std::iter;
use std::sync::Arc;

/// What a traced walk saw when it reached one step.
#[derive(Debug, Clone)]
pub(crate) struct Observed {
    /// Value the step was applied to (`null` for the first step).
    pub receiver: Value,
    /// Types of the index or call arguments.
    pub args: Vec<Type>,
}

struct AccessorNode {
    segment: Segment,
    next: Option<Box<AccessorNode>>,
}

/// Linked chain of path steps, one node per segment.
pub struct SafeAccessor {
    path: PathExpr,
    head: Option<Box<AccessorNode>>,
}

impl SafeAccessor {
    pub fn new(path: PathExpr) -> Self {
        let mut head = None;
        for segment in path.segments.iter().rev() {
            head = Some(Box::new(AccessorNode {
                segment: segment.clone(),
                next: head,
            }));
        }
        SafeAccessor { path, head }
    }

    pub fn path(&self) -> &PathExpr {
        &self.path
    }

    fn nodes(&self) -> impl Iterator<Item = &AccessorNode> {
        iter::successors(self.head.as_deref(), |node| node.next.as_deref())
    }

    /// Applies steps `from..until` starting from `receiver`. `pending` holds
    /// arguments of step `from` that were already evaluated.
    pub(crate) fn walk(
        &self,
        from: usize,
        until: usize,
        receiver: Value,
        pending: Option<Vec<Value>>,
        f: &Frame<'_>,
        mut trace: Option<&mut Vec<Observed>>,
    ) -> Result<Value, EvaluationError> {
        let mut value = receiver;
        let mut pending = pending;
        for node in self.nodes().skip(from).take(until.saturating_sub(from)) {
            value = step(
                &node.segment,
                value,
                pending.take(),
                &self.path,
                f,
                trace.as_deref_mut(),
            )?;
        }
        Ok(value)
    }

    /// Full evaluation that records the shape met at every step.
    pub(crate) fn traced(&self, f: &Frame<'_>, trace: &mut Vec<Observed>) -> Result<Value, EvaluationError> {
        self.walk(0, self.path.len(), Value::Null, None, f, Some(trace))
    }

    /// Continues at step `from` after a specialized unit gave up there.
    pub(crate) fn resume(
        &self,
        from: usize,
        receiver: Value,
        pending: Option<Vec<Value>>,
        f: &Frame<'_>,
    ) -> Result<Value, EvaluationError> {
        self.walk(from, self.path.len(), receiver, pending, f, None)
    }
}

impl fmt::Debug for SafeAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SafeAccessor({})", self.path)
    }
}

impl Accessor for SafeAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        self.walk(0, self.path.len(), Value::Null, None, f, None)
    }

    fn set_value(&self, f: &Frame<'_>, value: Value) -> Result<Value, EvaluationError> {
        let n = self.path.len();
        if n <= 1 {
            return write_root(&self.path, value, f);
        }
        let target = self.walk(0, n - 1, Value::Null, None, f, None)?;
        write_last(&self.path, target, value, f)
    }

    fn egress_type(&self) -> Type {
        Type::Any
    }
}

fn null_receiver(null_safe: bool, what: impl Into<String>) -> Result<Value, EvalErrorKind> {
    if null_safe {
        Ok(Value::Null)
    } else {
        Err(EvalErrorKind::NullReference(what.into()))
    }
}

/// One safe step.
pub(crate) fn step(
    segment: &Segment,
    receiver: Value,
    pending: Option<Vec<Value>>,
    path: &PathExpr,
    f: &Frame<'_>,
    trace: Option<&mut Vec<Observed>>,
) -> Result<Value, EvaluationError> {
    let fail = |k| path.error(k, f);
    let mut observed = trace.is_some().then(|| Observed {
        receiver: receiver.clone(),
        args: Vec::new(),
    });
    let value = match segment {
        Segment::Root(name) => member::resolve_root(name, f).map_err(fail)?.0,
        Segment::This => f.this_ref.clone(),
        Segment::Base(node) => node.eval(f)?,
        Segment::Property { name, null_safe } => {
            member::read_property(&receiver, name, *null_safe).map_err(fail)?
        }
        Segment::Index { index, null_safe } => {
            if receiver.is_null() {
                null_receiver(*null_safe, format!("{}[]", path)).map_err(fail)?
            } else {
                let index = match pending.and_then(|mut p| p.pop()) {
                    Some(v) => v,
                    None => index.eval(f)?,
                };
                if let Some(o) = observed.as_mut() {
                    o.args = vec![index.type_of()];
                }
                member::read_index(&receiver, &index, *null_safe).map_err(fail)?
            }
        }
        Segment::Method {
            name,
            args,
            null_safe,
        } => {
            if receiver.is_null() {
                null_receiver(*null_safe, format!("{}()", name)).map_err(fail)?
            } else {
                let args = match pending {
                    Some(p) => p,
                    None => super::eval_all(args, f)?,
                };
                if let Some(o) = observed.as_mut() {
                    o.args = args.iter().map(Value::type_of).collect();
                }
                member::call_method(&receiver, name, &args, *null_safe, f.converter())
                    .map_err(fail)?
            }
        }
    };
    if let (Some(trace), Some(o)) = (trace, observed) {
        trace.push(o);
    }
    Ok(value)
}

/// Assignment to a path that is a single segment.
fn write_root(path: &PathExpr, value: Value, f: &Frame<'_>) -> Result<Value, EvaluationError> {
    match path.segments.first() {
        Some(Segment::Root(name)) => store_name(name, value, None, true, f).map_err(|k| path.error(k, f)),
        _ => Err(path.error(EvalErrorKind::NotAssignable(path.to_string()), f)),
    }
}

/// Writes `value` through the last segment of `path` on `target`.
pub(crate) fn write_last(
    path: &PathExpr,
    target: Value,
    value: Value,
    f: &Frame<'_>,
) -> Result<Value, EvaluationError> {
    let fail = |k| path.error(k, f);
    match path.segments.last() {
        Some(Segment::Property { null_safe: true, .. } | Segment::Index { null_safe: true, .. })
            if target.is_null() =>
        {
            Ok(Value::Null)
        }
        Some(Segment::Property { name, .. }) => {
            member::write_property(&target, name, value, f.converter()).map_err(fail)
        }
        Some(Segment::Index { index, .. }) => {
            let index = index.eval(f)?;
            member::write_index(&target, &index, value).map_err(fail)
        }
        _ => Err(fail(EvalErrorKind::NotAssignable(path.to_string()))),
    }
}

/// Assignment site: reads the target's container through `prefix`, then
/// writes the last segment.
#[derive(Debug)]
pub struct AssignAccessor {
    path: PathExpr,
    prefix: Option<Arc<dyn Accessor>>,
}

impl AssignAccessor {
    pub fn with_prefix(path: PathExpr, prefix: Option<Arc<dyn Accessor>>) -> Self {
        AssignAccessor { path, prefix }
    }

    pub fn safe(path: PathExpr) -> Self {
        let prefix = (path.len() > 1).then(|| {
            Arc::new(SafeAccessor::new(path.prefix(path.len() - 1))) as Arc<dyn Accessor>
        });
        AssignAccessor::with_prefix(path, prefix)
    }
}

impl Accessor for AssignAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let receiver = match &self.prefix {
            Some(prefix) => prefix.get_value(f)?,
            None => Value::Null,
        };
        match self.path.segments.last() {
            Some(last) => step(last, receiver, None, &self.path, f, None),
            None => Ok(Value::Null),
        }
    }

    fn set_value(&self, f: &Frame<'_>, value: Value) -> Result<Value, EvaluationError> {
        match &self.prefix {
            Some(prefix) => {
                let target = prefix.get_value(f)?;
                write_last(&self.path, target, value, f)
            }
            None => write_root(&self.path, value, f),
        }
    }

    fn egress_type(&self) -> Type {
        Type::Any
    }
}

/// Inline collection constructor. With a template (all elements literal) it
/// copies the template instead of evaluating elements.
#[derive(Debug)]
pub struct CollectionAccessor {
    spec: Arc<CollectionSpec>,
    template: Option<Value>,
}

impl CollectionAccessor {
    pub fn safe(spec: Arc<CollectionSpec>) -> Self {
        CollectionAccessor { spec, template: None }
    }

    pub fn templated(spec: Arc<CollectionSpec>, template: Value) -> Self {
        CollectionAccessor {
            spec,
            template: Some(template),
        }
    }
}

impl Accessor for CollectionAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        match &self.template {
            Some(template) => Ok(template.deep_clone()),
            None => self.spec.build(f),
        }
    }

    fn set_value(&self, f: &Frame<'_>, _value: Value) -> Result<Value, EvaluationError> {
        Err(f.error_at(
            EvalErrorKind::NotAssignable("collection literal".into()),
            0,
        ))
    }

    fn egress_type(&self) -> Type {
        self.spec.egress()
    }
}

/// `new` expression resolved from scratch on every call.
#[derive(Debug)]
pub struct NewAccessor {
    spec: Arc<NewSpec>,
}

impl NewAccessor {
    pub fn new(spec: Arc<NewSpec>) -> Self {
        NewAccessor { spec }
    }
}

pub(crate) fn new_egress(spec: &NewSpec) -> Type {
    Type::from_name(&spec.class_name).unwrap_or_else(|| Type::object(&spec.class_name))
}

impl Accessor for NewAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        construct(&self.spec, f).map(|(value, _)| value)
    }

    fn set_value(&self, f: &Frame<'_>, _value: Value) -> Result<Value, EvaluationError> {
        Err(f.error_at(
            EvalErrorKind::NotAssignable(format!("new {}", self.spec.class_name)),
            self.spec.span.start,
        ))
    }

    fn egress_type(&self) -> Type {
        new_egress(&self.spec)
    }
}

/// Builds introspecting accessors only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeOptimizer;

impl AccessorOptimizer for SafeOptimizer {
    fn optimize_accessor(&self, path: &PathExpr, f: &Frame<'_>) -> Result<Optimized, EvaluationError> {
        let accessor = SafeAccessor::new(path.clone());
        let value = accessor.get_value(f)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_assignment(
        &self,
        path: &PathExpr,
        f: &Frame<'_>,
        value: Value,
    ) -> Result<Optimized, EvaluationError> {
        let accessor = AssignAccessor::safe(path.clone());
        let value = accessor.set_value(f, value)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_collection(
        &self,
        spec: &Arc<CollectionSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError> {
        let accessor = CollectionAccessor::safe(Arc::clone(spec));
        let value = accessor.get_value(f)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_object_creation(
        &self,
        spec: &Arc<NewSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError> {
        let accessor = NewAccessor::new(Arc::clone(spec));
        let value = accessor.get_value(f)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }
}
