use super::{Node, NodeMeta, Operator, Site};
use crate::accessor::{self, PathExpr};
use crate::engine::BlockScoping;
use crate::error::{EvalErrorKind, EvaluationError};
use crate::runtime::Frame;
use crate::scope::{nearest_target, ScopeKind, ScopeRef};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug)]
pub enum Target {
    /// A bare variable name.
    Name(String),
    /// A property path such as `a.b[0].c`.
    Path { path: PathExpr, site: Site },
}

impl Target {
    fn read(&self, meta: &NodeMeta, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        match self {
            Target::Name(name) => accessor::resolve_root(name, f)
                .map(|(value, _)| value)
                .map_err(|k| f.error(k, meta)),
            Target::Path { path, site } => accessor::read_for_update(path, site, f),
        }
    }

    fn write(
        &self,
        value: Value,
        register: Option<usize>,
        meta: &NodeMeta,
        f: &Frame<'_>,
    ) -> Result<Value, EvaluationError> {
        match self {
            Target::Name(name) => {
                store_name(name, value, register, false, f).map_err(|k| f.error(k, meta))
            }
            Target::Path { path, site } => accessor::assign_path(path, site, f, value),
        }
    }
}

/// `target = value`, `target op= value`, or a declaration `Type name = value`.
#[derive(Debug)]
pub struct Assignment {
    pub target: Target,
    pub op: Option<Operator>,
    /// `None` for a declaration without initializer.
    pub value: Option<Box<Node>>,
    /// Declared type of a declaration (`var` declares `Any`).
    pub decl: Option<Type>,
    /// Register in the enclosing function's frame, if allocated.
    pub register: Option<usize>,
}

impl Assignment {
    pub fn eval(&self, meta: &NodeMeta, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        if let (Some(decl), Target::Name(name)) = (&self.decl, &self.target) {
            let ty = Some(decl.clone()).filter(Type::is_known);
            let value = match &self.value {
                Some(node) => node.eval(f)?,
                None => default_value(ty.as_ref()),
            };
            let value = match &ty {
                Some(ty) => f.converter().convert(&value, ty).map_err(|k| f.error(k, meta))?,
                None => value,
            };
            create_in(&f.scope, name, value.clone(), ty, self.register);
            return Ok(value);
        }
        let value = match (&self.op, &self.value) {
            (Some(op), Some(node)) => {
                let current = self.target.read(meta, f)?;
                let rhs = node.eval(f)?;
                op.apply(&current, &rhs).map_err(|k| f.error(k, meta))?
            }
            (None, Some(node)) => node.eval(f)?,
            (_, None) => Value::Null,
        };
        self.target.write(value, self.register, meta, f)
    }
}

/// `x++`, `--x` and friends.
#[derive(Debug)]
pub struct Increment {
    pub target: Target,
    pub delta: i64,
    pub prefix: bool,
}

impl Increment {
    pub fn eval(&self, meta: &NodeMeta, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let current = self.target.read(meta, f)?;
        let next = Operator::Add
            .apply(&current, &Value::Int(self.delta))
            .map_err(|k| f.error(k, meta))?;
        let stored = self.target.write(next, None, meta, f)?;
        Ok(if self.prefix { stored } else { current })
    }
}

fn default_value(ty: Option<&Type>) -> Value {
    match ty {
        Some(Type::Int) => Value::Int(0),
        Some(Type::Float) => Value::Float(0.0),
        Some(Type::Bool) => Value::Bool(false),
        Some(Type::Char) => Value::Char('\0'),
        _ => Value::Null,
    }
}

pub(crate) fn create_in(
    scope: &ScopeRef,
    name: &str,
    value: Value,
    ty: Option<Type>,
    register: Option<usize>,
) {
    match register {
        Some(r) if scope.kind() == ScopeKind::Indexed => {
            scope.create_indexed(r, name, value, ty);
        }
        _ => {
            scope.create(name, value, ty);
        }
    }
}

/// Writes a variable: an existing binding first, then a property of the
/// context object, otherwise a new binding placed per the engine's block
/// scoping.
pub(crate) fn store_name(
    name: &str,
    value: Value,
    register: Option<usize>,
    insert_into_ctx: bool,
    f: &Frame<'_>,
) -> Result<Value, EvalErrorKind> {
    if let Some(slot) = f.scope.resolve(name) {
        return slot.set(value, f.converter());
    }
    if let Some(stored) = accessor::write_ctx(name, &value, insert_into_ctx, f)? {
        return Ok(stored);
    }
    let target = match f.runtime.config.block_scoping {
        BlockScoping::Local => f.scope.clone(),
        BlockScoping::Promote => nearest_target(&f.scope),
    };
    create_in(&target, name, value.clone(), None, register);
    Ok(value)
}
