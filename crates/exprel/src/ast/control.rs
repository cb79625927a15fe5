use super::{Node, NodeMeta};
use crate::error::{EvalErrorKind, EvaluationError};
use crate::runtime::Frame;
use crate::scope::MapScope;
use crate::types::Type;
use crate::value::Value;
use std::sync::OnceLock;

/// Statement sequence. The value of a block is the value of its last
/// statement, or `void` when empty.
#[derive(Debug)]
pub struct Block {
    pub stmts: Vec<Node>,
    /// Whether the block opens its own scope.
    pub scoped: bool,
}

impl Block {
    pub fn eval(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        if self.scoped {
            let inner = f.with_scope(MapScope::block(f.scope.clone()));
            self.eval_in(&inner)
        } else {
            self.eval_in(f)
        }
    }

    /// Runs the statements directly in `f`'s scope.
    pub fn eval_in(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let mut last = Value::Void;
        for stmt in &self.stmts {
            f.step(&stmt.meta);
            last = stmt.eval(f)?;
            if f.returned() {
                break;
            }
        }
        Ok(last)
    }
}

/// `if`/`else if`/`else`. The first branch whose condition holds runs.
#[derive(Debug)]
pub struct IfChain {
    pub branches: Vec<(Node, Node)>,
    pub otherwise: Option<Box<Node>>,
}

impl IfChain {
    pub fn eval(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        for (cond, body) in &self.branches {
            if cond.condition(f)? {
                return body.eval(f);
            }
        }
        match &self.otherwise {
            Some(body) => body.eval(f),
            None => Ok(Value::Void),
        }
    }
}

/// What a `foreach` subject iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterShape {
    List,
    Array,
    Chars,
    /// An integer `n` iterates `1..=n`.
    Range,
    /// Map keys in insertion order.
    MapKeys,
}

impl IterShape {
    pub fn detect(value: &Value) -> Option<IterShape> {
        match value {
            Value::List(_) => Some(IterShape::List),
            Value::Array(_) => Some(IterShape::Array),
            Value::Str(_) => Some(IterShape::Chars),
            Value::Int(_) => Some(IterShape::Range),
            Value::Map(_) => Some(IterShape::MapKeys),
            _ => None,
        }
    }

    fn matches(self, value: &Value) -> bool {
        IterShape::detect(value) == Some(self)
    }

    /// Items in iteration order. Collections are snapshotted since the body
    /// may mutate the subject; a range is produced lazily.
    fn items(self, value: &Value) -> Box<dyn Iterator<Item = Value>> {
        match (self, value) {
            (IterShape::List, Value::List(l)) => Box::new(l.read().clone().into_iter()),
            (IterShape::Array, Value::Array(a)) => Box::new(a.read().to_vec().into_iter()),
            (IterShape::Chars, Value::Str(s)) => {
                let chars: Vec<Value> = s.chars().map(Value::Char).collect();
                Box::new(chars.into_iter())
            }
            (IterShape::Range, Value::Int(n)) => Box::new((1..=*n).map(Value::Int)),
            (IterShape::MapKeys, Value::Map(m)) => {
                let keys: Vec<Value> = m.read().keys().map(|k| Value::from(k.as_str())).collect();
                Box::new(keys.into_iter())
            }
            _ => Box::new(std::iter::empty()),
        }
    }
}

#[derive(Debug)]
pub struct ForEach {
    pub item: String,
    pub item_ty: Option<Type>,
    pub subject: Box<Node>,
    /// Runs unscoped inside the per-iteration item scope.
    pub body: Box<Node>,
    pub shape: OnceLock<IterShape>,
}

impl ForEach {
    pub fn eval(&self, meta: &NodeMeta, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let subject = self.subject.eval(f)?;
        if subject.is_null() {
            return Ok(Value::Void);
        }
        let shape = if f.interpreted() {
            IterShape::detect(&subject)
        } else {
            match self.shape.get() {
                Some(cached) if cached.matches(&subject) => Some(*cached),
                Some(_) => IterShape::detect(&subject),
                None => {
                    let detected = IterShape::detect(&subject);
                    if let Some(shape) = detected {
                        let _ = self.shape.set(shape);
                    }
                    detected
                }
            }
        };
        let shape = shape.ok_or_else(|| {
            f.error(
                EvalErrorKind::invalid_op("foreach", subject.type_of(), "iteration"),
                meta,
            )
        })?;
        for item in shape.items(&subject) {
            let item = match &self.item_ty {
                Some(ty) => f.converter().convert(&item, ty).map_err(|k| f.error(k, meta))?,
                None => item,
            };
            let scope = MapScope::item(f.scope.clone(), &self.item, item, self.item_ty.clone());
            self.body.eval_unscoped(&f.with_scope(scope))?;
            if f.returned() {
                break;
            }
        }
        Ok(Value::Void)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    While,
    Until,
    DoWhile,
    DoUntil,
    /// `for (init; cond; step)`.
    For,
}

#[derive(Debug)]
pub struct Loop {
    pub kind: LoopKind,
    pub init: Option<Box<Node>>,
    pub cond: Option<Box<Node>>,
    pub step: Option<Box<Node>>,
    pub body: Box<Node>,
}

impl Loop {
    fn keep_going(&self, f: &Frame<'_>) -> Result<bool, EvaluationError> {
        let holds = match &self.cond {
            Some(cond) => cond.condition(f)?,
            None => true,
        };
        Ok(match self.kind {
            LoopKind::Until | LoopKind::DoUntil => !holds,
            _ => holds,
        })
    }

    pub fn eval(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let scoped;
        let f = if self.kind == LoopKind::For {
            scoped = f.with_scope(MapScope::block(f.scope.clone()));
            &scoped
        } else {
            f
        };
        if let Some(init) = &self.init {
            init.eval(f)?;
        }
        let post_test = matches!(self.kind, LoopKind::DoWhile | LoopKind::DoUntil);
        if !post_test && !self.keep_going(f)? {
            return Ok(Value::Void);
        }
        loop {
            self.body.eval(f)?;
            if f.returned() {
                break;
            }
            if let Some(step) = &self.step {
                step.eval(f)?;
            }
            if !self.keep_going(f)? {
                break;
            }
        }
        Ok(Value::Void)
    }
}

/// `with (target) { a = 1, b.c = 2 }`: assignments rooted at `target`.
#[derive(Debug)]
pub struct With {
    pub target: Box<Node>,
    pub assignments: Vec<Node>,
}

impl With {
    pub fn eval(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let target = self.target.eval(f)?;
        if target.is_null() {
            return Err(f.error(
                EvalErrorKind::NullReference("with target".into()),
                &self.target.meta,
            ));
        }
        let inner = f.with_this(&target);
        for assignment in &self.assignments {
            assignment.eval(&inner)?;
        }
        Ok(target.clone())
    }
}

impl Node {
    /// Evaluates a block body without opening a new scope; other nodes
    /// evaluate normally.
    pub(crate) fn eval_unscoped(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        match &self.kind {
            super::NodeKind::Block(block) => block.eval_in(f),
            _ => self.eval(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_detection() {
        assert_eq!(IterShape::detect(&Value::Int(3)), Some(IterShape::Range));
        assert_eq!(IterShape::detect(&Value::from("ab")), Some(IterShape::Chars));
        assert_eq!(IterShape::detect(&Value::Bool(true)), None);
        assert_eq!(
            IterShape::Range.items(&Value::Int(3)).collect::<Vec<_>>(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        assert_eq!(IterShape::Range.items(&Value::Int(0)).count(), 0);
        // Large ranges are not materialized.
        let mut huge = IterShape::Range.items(&Value::Int(i64::MAX));
        assert_eq!(huge.next(), Some(Value::Int(1)));
        assert_eq!(huge.next(), Some(Value::Int(2)));
    }

    #[test]
    fn test_map_keys_keep_insertion_order() {
        let map = Value::from_pairs([("b", Value::Int(1)), ("a", Value::Int(2))]);
        assert_eq!(
            IterShape::MapKeys.items(&map).collect::<Vec<_>>(),
            vec![Value::from("b"), Value::from("a")]
        );
    }
}
