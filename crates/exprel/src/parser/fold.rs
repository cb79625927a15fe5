//! Precedence folding of a flat operator sequence.
//!
//! The first pass folds every run between `&&`/`||` by precedence; the
//! second joins the runs into short-circuit nodes. Literal operands are
//! reduced at compile time when the operator succeeds on them.

use super::Compiler;
use crate::ast::{compile_regex, Node, NodeKind, Operator, RegexMatch};
use crate::error::{CompileError, CompileErrorKind};
use crate::types::Type;
use crate::value::Value;
use std::sync::OnceLock;

impl<'a> Compiler<'a> {
    pub(super) fn fold(&self, operands: Vec<Node>, ops: Vec<Operator>) -> Result<Node, CompileError> {
        let mut operands = operands.into_iter();
        let Some(first) = operands.next() else {
            return Err(self.err(CompileErrorKind::Syntax, "missing operand", 0));
        };
        let mut runs = Vec::new();
        let mut joins = Vec::new();
        let mut run = vec![first];
        let mut run_ops = Vec::new();
        for (op, rhs) in ops.into_iter().zip(operands) {
            if op.is_logical() {
                runs.push(self.shunt(std::mem::take(&mut run), std::mem::take(&mut run_ops))?);
                joins.push(op);
                run.push(rhs);
            } else {
                run_ops.push(op);
                run.push(rhs);
            }
        }
        runs.push(self.shunt(run, run_ops)?);
        self.shunt(runs, joins)
    }

    /// Operator-precedence reduction of `operands[0] ops[0] operands[1] ...`.
    fn shunt(&self, operands: Vec<Node>, ops: Vec<Operator>) -> Result<Node, CompileError> {
        let mut operands = operands.into_iter();
        let mut out: Vec<Node> = operands.next().into_iter().collect();
        let mut pending: Vec<Operator> = Vec::new();
        for (op, rhs) in ops.into_iter().zip(operands) {
            while let Some(&top) = pending.last() {
                let binds_left = top.precedence() > op.precedence()
                    || (top.precedence() == op.precedence() && !op.is_right_assoc());
                if !binds_left {
                    break;
                }
                pending.pop();
                self.reduce(&mut out, top)?;
            }
            pending.push(op);
            out.push(rhs);
        }
        while let Some(top) = pending.pop() {
            self.reduce(&mut out, top)?;
        }
        match (out.pop(), out.is_empty()) {
            (Some(node), true) => Ok(node),
            _ => Err(self.err(CompileErrorKind::Syntax, "malformed expression", 0)),
        }
    }

    fn reduce(&self, out: &mut Vec<Node>, op: Operator) -> Result<(), CompileError> {
        let (Some(rhs), Some(lhs)) = (out.pop(), out.pop()) else {
            return Err(self.err(CompileErrorKind::Syntax, "missing operand", 0));
        };
        out.push(self.binary(op, lhs, rhs)?);
        Ok(())
    }

    fn binary(&self, op: Operator, lhs: Node, rhs: Node) -> Result<Node, CompileError> {
        let span = lhs.span().to(rhs.span());
        match op {
            Operator::And | Operator::Or => {
                let (l, r) = (Box::new(lhs), Box::new(rhs));
                let kind = match op {
                    Operator::And => NodeKind::And(l, r),
                    _ => NodeKind::Or(l, r),
                };
                return Ok(self.node(span, Type::Bool, kind));
            }
            Operator::Eq | Operator::Ne if is_empty(&lhs) || is_empty(&rhs) => {
                let subject = if is_empty(&rhs) { lhs } else { rhs };
                return Ok(self.node(
                    span,
                    Type::Bool,
                    NodeKind::EmptyTest {
                        subject: Box::new(subject),
                        negate: op == Operator::Ne,
                    },
                ));
            }
            Operator::RegexMatch => return self.regex_match(lhs, rhs),
            _ => {}
        }
        if let (NodeKind::Literal(l), NodeKind::Literal(r)) = (&lhs.kind, &rhs.kind) {
            if let Ok(value) = op.apply(l, r) {
                return Ok(self.literal(value, span));
            }
        }
        let egress = op.result_type(lhs.egress(), rhs.egress());
        Ok(self.node(
            span,
            egress,
            NodeKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        ))
    }

    /// `subject ~= pattern`; a literal pattern is compiled here so a bad
    /// pattern fails compilation.
    fn regex_match(&self, subject: Node, pattern: Node) -> Result<Node, CompileError> {
        let span = subject.span().to(pattern.span());
        let compiled = OnceLock::new();
        if let NodeKind::Literal(Value::Str(text)) = &pattern.kind {
            let regex = compile_regex(text).map_err(|e| {
                self.err(
                    CompileErrorKind::InvalidRegex,
                    format!("invalid pattern '{}': {}", text, e),
                    pattern.span().start,
                )
            })?;
            let _ = compiled.set(regex);
        }
        Ok(self.node(
            span,
            Type::Bool,
            NodeKind::RegexMatch(RegexMatch {
                subject: Box::new(subject),
                pattern: Box::new(pattern),
                compiled,
            }),
        ))
    }
}

fn is_empty(node: &Node) -> bool {
    matches!(node.kind, NodeKind::Empty)
}

#[cfg(test)]
mod tests {
    use crate::ast::{Node, NodeKind, Operator};
    use crate::class::ClassLibrary;
    use crate::engine::CompileOptions;
    use crate::value::Value;

    fn root(src: &str) -> Node {
        let program =
            super::super::compile_program(src, &CompileOptions::default(), &ClassLibrary::standard())
                .unwrap_or_else(|e| panic!("{}: {}", src, e));
        match program.kind {
            NodeKind::Block(mut block) => block.stmts.remove(0),
            _ => unreachable!(),
        }
    }

    /// Renders the tree with explicit grouping.
    fn shape(node: &Node) -> String {
        match &node.kind {
            NodeKind::Binary { op, lhs, rhs } => {
                format!("({} {} {})", shape(lhs), op.symbol(), shape(rhs))
            }
            NodeKind::And(l, r) => format!("({} && {})", shape(l), shape(r)),
            NodeKind::Or(l, r) => format!("({} || {})", shape(l), shape(r)),
            NodeKind::Property(p) => p.path.text.to_string(),
            NodeKind::Literal(v) => v.to_string(),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(shape(&root("a + b * c")), "(a + (b * c))");
        assert_eq!(shape(&root("a * b + c")), "((a * b) + c)");
        assert_eq!(shape(&root("a - b - c")), "((a - b) - c)");
        assert_eq!(shape(&root("a ** b ** c")), "(a ** (b ** c))");
        assert_eq!(shape(&root("a < b == c > d")), "((a < b) == (c > d))");
    }

    #[test]
    fn test_logical_pass() {
        assert_eq!(shape(&root("a || b && c")), "(a || (b && c))");
        assert_eq!(shape(&root("a && b || c && d")), "((a && b) || (c && d))");
        assert_eq!(shape(&root("a == 1 || b + 1 > c")), "((a == 1) || ((b + 1) > c))");
    }

    #[test]
    fn test_literal_reduction() {
        assert!(matches!(root("2 + 3 * 4").kind, NodeKind::Literal(Value::Int(14))));
        assert!(matches!(root("'a' + 1").kind, NodeKind::Literal(Value::Str(ref s)) if &**s == "a1"));
        // Division by zero stays a runtime error.
        assert!(matches!(root("1 / 0").kind, NodeKind::Binary { op: Operator::Div, .. }));
    }
}
