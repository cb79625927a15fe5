use super::{Node, NodeMeta};
use crate::accessor;
use crate::error::{EvalErrorKind, EvaluationError};
use crate::lexer::Span;
use crate::runtime::Frame;
use crate::scope::{IndexedScope, ScopeRef, VariableScope};
use crate::types::Type;
use crate::value::Value;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<Type>,
}

/// A user-defined function (`def` / `function`).
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Node,
    /// Register layout: parameters first, then locals in declaration order.
    pub registers: Vec<String>,
    /// Names the body reads that it neither declares nor receives; they
    /// resolve through the root scope at call time.
    pub free_vars: Vec<String>,
    pub span: Span,
}

impl Function {
    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Runs the body in a fresh register scope chained to the root scope.
    pub fn call(
        &self,
        args: Vec<Value>,
        meta: &NodeMeta,
        f: &Frame<'_>,
    ) -> Result<Value, EvaluationError> {
        if args.len() != self.params.len() {
            let cause = format!("expected {} arguments, got {}", self.params.len(), args.len());
            return Err(f.error(EvalErrorKind::invocation(&self.name, cause), meta));
        }
        let scope = IndexedScope::new(self.registers.clone(), Rc::clone(&f.root));
        for (register, (param, arg)) in self.params.iter().zip(args).enumerate() {
            let arg = match &param.ty {
                Some(ty) => f.converter().convert(&arg, ty).map_err(|k| f.error(k, meta))?,
                None => arg,
            };
            scope.create_indexed(register, &param.name, arg, param.ty.clone());
        }
        let scope: ScopeRef = Rc::new(scope);
        let inner = f.for_call(scope).map_err(|k| f.error(k, meta))?;
        let result = self.body.eval_unscoped(&inner)?;
        Ok(inner.take_return().unwrap_or(result))
    }
}

/// `name(args)` at the root of an expression.
#[derive(Debug)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Node>,
}

impl FunctionCall {
    pub fn eval(&self, meta: &NodeMeta, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.eval(f)?);
        }
        let callee = f.scope.resolve(&self.name).map(|slot| slot.get());
        let out = match callee {
            Some(Value::Function(func)) => return func.call(args, meta, f),
            Some(Value::Native(native)) => native.call(&args),
            Some(other) => Err(EvalErrorKind::invocation(
                &self.name,
                format!("{} is not callable", other.type_of()),
            )),
            None => accessor::invoke_on_ctx(&self.name, args, f),
        };
        out.map_err(|k| f.error(k, meta))
    }
}
