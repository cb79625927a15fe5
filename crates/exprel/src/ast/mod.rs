//! AST node taxonomy and its evaluation contract.
//!
//! Nodes are immutable after parsing. The only state that changes across
//! evaluations lives in `OnceLock` caches (accessor sites, precompiled
//! regexes, foreach shapes), which accelerated evaluation fills lazily.

mod assign;
mod control;
mod function;
mod operator;

pub use assign::{Assignment, Increment, Target};
pub(crate) use assign::store_name;
pub use control::{Block, ForEach, IfChain, IterShape, Loop, LoopKind, With};
pub use function::{Function, FunctionCall, Param};
pub use operator::{instance_of, Operator, UnaryOp};

use crate::accessor::{self, Accessor, CollectionSpec, NewSpec, PathExpr};
use crate::error::{EvalErrorKind, EvaluationError};
use crate::lexer::Span;
use crate::runtime::Frame;
use crate::scope::import_into;
use crate::types::Type;
use crate::value::Value;
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Lazily optimized accessor of one node.
pub type Site = OnceLock<Arc<dyn Accessor>>;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub span: Span,
    /// Result type, fixed at construction.
    pub egress: Type,
    /// Source line, recorded when compiled with debug symbols.
    pub line: Option<u32>,
}

impl NodeMeta {
    pub fn new(span: Span, egress: Type) -> Self {
        NodeMeta {
            span,
            egress,
            line: None,
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub meta: NodeMeta,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub struct Property {
    pub path: PathExpr,
    pub site: Site,
}

#[derive(Debug)]
pub struct RegexMatch {
    pub subject: Box<Node>,
    pub pattern: Box<Node>,
    /// Set at compile time when the pattern is a literal.
    pub compiled: OnceLock<Regex>,
}

#[derive(Debug)]
pub struct InlineCollection {
    pub spec: Arc<CollectionSpec>,
    pub site: Site,
}

#[derive(Debug)]
pub struct NewObject {
    pub spec: Arc<NewSpec>,
    pub site: Site,
}

#[derive(Debug)]
pub enum NodeKind {
    Literal(Value),
    /// The `empty` literal outside of `== empty` / `!= empty`.
    Empty,
    Property(Property),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: Operator,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Ternary {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    EmptyTest {
        subject: Box<Node>,
        negate: bool,
    },
    RegexMatch(RegexMatch),
    Assignment(Assignment),
    Increment(Increment),
    If(IfChain),
    ForEach(ForEach),
    Loop(Loop),
    With(With),
    FunctionDecl(Arc<Function>),
    FunctionCall(FunctionCall),
    NewObject(NewObject),
    InlineCollection(InlineCollection),
    Substatement(Box<Node>),
    Block(Block),
    Return(Option<Box<Node>>),
    Import {
        name: String,
        value: Value,
    },
    Assert {
        expr: Box<Node>,
        text: String,
    },
}

impl Node {
    pub fn new(meta: NodeMeta, kind: NodeKind) -> Self {
        Node { meta, kind }
    }

    pub fn literal(value: Value, span: Span) -> Self {
        let egress = value.type_of();
        Node::new(NodeMeta::new(span, egress), NodeKind::Literal(value))
    }

    pub fn egress(&self) -> &Type {
        &self.meta.egress
    }

    pub fn span(&self) -> Span {
        self.meta.span
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, NodeKind::Literal(_))
    }

    pub fn eval(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        match &self.kind {
            NodeKind::Literal(v) => Ok(v.clone()),
            NodeKind::Empty => Ok(Value::Null),
            NodeKind::Property(prop) => accessor::eval_path(&prop.path, &prop.site, f),
            NodeKind::Unary { op, operand } => {
                let v = operand.eval(f)?;
                op.apply(&v).map_err(|k| f.error(k, &self.meta))
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let l = lhs.eval(f)?;
                let r = rhs.eval(f)?;
                op.apply(&l, &r).map_err(|k| f.error(k, &self.meta))
            }
            NodeKind::And(lhs, rhs) => {
                if !lhs.condition(f)? {
                    return Ok(Value::Bool(false));
                }
                rhs.condition(f).map(Value::Bool)
            }
            NodeKind::Or(lhs, rhs) => {
                if lhs.condition(f)? {
                    return Ok(Value::Bool(true));
                }
                rhs.condition(f).map(Value::Bool)
            }
            NodeKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if cond.condition(f)? {
                    then.eval(f)
                } else {
                    otherwise.eval(f)
                }
            }
            NodeKind::EmptyTest { subject, negate } => {
                let v = subject.eval(f)?;
                Ok(Value::Bool(v.is_empty_value() != *negate))
            }
            NodeKind::RegexMatch(m) => self.eval_regex(m, f),
            NodeKind::Assignment(a) => a.eval(&self.meta, f),
            NodeKind::Increment(inc) => inc.eval(&self.meta, f),
            NodeKind::If(chain) => chain.eval(f),
            NodeKind::ForEach(each) => each.eval(&self.meta, f),
            NodeKind::Loop(l) => l.eval(f),
            NodeKind::With(w) => w.eval(f),
            NodeKind::FunctionDecl(func) => {
                f.scope
                    .create(&func.name, Value::Function(Arc::clone(func)), None);
                Ok(Value::Void)
            }
            NodeKind::FunctionCall(call) => call.eval(&self.meta, f),
            NodeKind::NewObject(new) => accessor::eval_new(&new.spec, &new.site, f),
            NodeKind::InlineCollection(c) => accessor::eval_collection(&c.spec, &c.site, f),
            NodeKind::Substatement(inner) => inner.eval(f),
            NodeKind::Block(block) => block.eval(f),
            NodeKind::Return(value) => {
                let v = match value {
                    Some(node) => node.eval(f)?,
                    None => Value::Void,
                };
                f.set_return(v.clone());
                Ok(v)
            }
            NodeKind::Import { name, value } => {
                import_into(&f.scope, name, value.clone());
                Ok(Value::Void)
            }
            NodeKind::Assert { expr, text } => {
                if expr.condition(f)? {
                    Ok(Value::Bool(true))
                } else {
                    Err(f.error(EvalErrorKind::AssertionFailed(text.clone()), &self.meta))
                }
            }
        }
    }

    /// Evaluates a node whose value must be a boolean.
    pub fn condition(&self, f: &Frame<'_>) -> Result<bool, EvaluationError> {
        match self.eval(f)? {
            Value::Bool(b) => Ok(b),
            other => Err(f.error(
                EvalErrorKind::NonBooleanCondition(format!("{} ({})", other, other.type_of())),
                &self.meta,
            )),
        }
    }

    fn eval_regex(&self, m: &RegexMatch, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let subject = m.subject.eval(f)?;
        if subject.is_null() {
            return Ok(Value::Bool(false));
        }
        let text = subject.to_string();
        if !f.interpreted() {
            if let Some(re) = m.compiled.get() {
                return Ok(Value::Bool(re.is_match(&text)));
            }
        }
        let pattern = m.pattern.eval(f)?.to_string();
        let re = compile_regex(&pattern)
            .map_err(|e| f.error(EvalErrorKind::invocation("~=", e.to_string()), &self.meta))?;
        Ok(Value::Bool(re.is_match(&text)))
    }
}

/// Compiles a `~=` pattern. The match is anchored at both ends.
pub fn compile_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}
