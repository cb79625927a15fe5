//! Expressions: operands, postfix paths and the flat operator sequence.

use super::{is_reserved, Compiler};
use crate::accessor::{CollectionSpec, NewSpec, PathExpr, Segment};
use crate::ast::{
    Assignment, FunctionCall, Increment, InlineCollection, NewObject, Node, NodeKind, Operator,
    Property, Site, Target, UnaryOp, With,
};
use crate::class::ClassDef;
use crate::error::{CompileError, CompileErrorKind};
use crate::lexer::{unescape, Delim, Lexer, Span, Token, TokenKind};
use crate::types::Type;
use crate::value::Value;
use std::sync::Arc;

impl<'a> Compiler<'a> {
    /// A full expression: assignment, operator sequence and ternary.
    pub(super) fn expr(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        if let Some(name) = self.plain_assignment(lx)? {
            let value = self.expr(lx)?;
            let egress = self.declared(name.text(self.src)).map_or(Type::Any, |d| d.ty.clone());
            let path = PathExpr::root(name.text(self.src), name.span);
            let target = self.node(
                name.span,
                egress,
                NodeKind::Property(Property {
                    path,
                    site: Site::new(),
                }),
            );
            return self.assignment(target, None, value);
        }
        let first = self.unary(lx)?;
        if let TokenKind::Assign(op) = lx.peek()?.kind {
            lx.next_sub_token()?;
            let value = self.expr(lx)?;
            return self.assignment(first, op, value);
        }
        let folded = self.binary_tail(first, lx)?;
        self.ternary_tail(folded, lx)
    }

    /// Consumes `name =` when the expression is a plain assignment to a bare
    /// name. The name is not a read, so it is neither typed nor recorded as
    /// a free variable.
    fn plain_assignment(&mut self, lx: &mut Lexer<'a>) -> Result<Option<Token>, CompileError> {
        let mut ahead = lx.clone();
        let head = ahead.next_sub_token()?;
        if head.kind != TokenKind::Ident || is_reserved(head.text(self.src)) {
            return Ok(None);
        }
        if ahead.peek()?.kind != TokenKind::Assign(None) {
            return Ok(None);
        }
        ahead.next_sub_token()?;
        *lx = ahead;
        Ok(Some(head))
    }

    fn ternary_tail(&mut self, cond: Node, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        if lx.peek()?.kind != TokenKind::Question {
            return Ok(cond);
        }
        lx.next_sub_token()?;
        let then = self.expr(lx)?;
        self.expect(lx, TokenKind::Colon, "':' in conditional expression")?;
        let otherwise = self.expr(lx)?;
        let egress = if then.egress() == otherwise.egress() {
            then.egress().clone()
        } else {
            Type::Any
        };
        let span = cond.span().to(otherwise.span());
        Ok(self.node(
            span,
            egress,
            NodeKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        ))
    }

    /// Collects `(operator operand)*` after `first` and folds the sequence.
    fn binary_tail(&mut self, first: Node, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let mut operands = vec![first];
        let mut ops = Vec::new();
        loop {
            let token = lx.peek()?;
            let op = match token.kind {
                TokenKind::Operator(op) => op,
                TokenKind::Ident => match Operator::from_word(token.text(self.src)) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            lx.next_sub_token()?;
            let rhs = match op {
                Operator::InstanceOf | Operator::Is => self.type_operand(lx)?,
                _ => self.unary(lx)?,
            };
            ops.push(op);
            operands.push(rhs);
        }
        self.fold(operands, ops)
    }

    /// Right operand of `instanceof` / `is`: a class or type name becomes a
    /// class literal, anything else is an ordinary operand.
    fn type_operand(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let token = lx.peek()?;
        if token.kind == TokenKind::Ident {
            let name = token.text(self.src);
            let class = match self.class_named(name) {
                Some(class) => Some(class),
                None if Type::from_name(name).is_some() => Some(ClassDef::builder(name).build()),
                None => None,
            };
            if let Some(class) = class {
                lx.next_sub_token()?;
                return Ok(self.literal(Value::Class(class), token.span));
            }
        }
        self.unary(lx)
    }

    pub(super) fn unary(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let token = lx.peek()?;
        match token.kind {
            TokenKind::Not => {
                lx.next_sub_token()?;
                let operand = self.unary(lx)?;
                let span = token.span.to(operand.span());
                Ok(self.node(
                    span,
                    Type::Bool,
                    NodeKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                ))
            }
            TokenKind::Operator(Operator::Sub) => {
                lx.next_sub_token()?;
                if let Some(literal) = self.negative_number(lx, token.span)? {
                    return Ok(literal);
                }
                let operand = self.unary(lx)?;
                let span = token.span.to(operand.span());
                let negated = match &operand.kind {
                    NodeKind::Literal(Value::Int(i)) => i.checked_neg().map(Value::Int),
                    NodeKind::Literal(Value::Float(f)) => Some(Value::Float(-f)),
                    _ => None,
                };
                if let Some(value) = negated {
                    return Ok(self.literal(value, span));
                }
                let egress = match operand.egress() {
                    ty if ty.is_numeric() => ty.clone(),
                    _ => Type::Any,
                };
                Ok(self.node(
                    span,
                    egress,
                    NodeKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                ))
            }
            TokenKind::Operator(Operator::Add) => {
                lx.next_sub_token()?;
                self.unary(lx)
            }
            TokenKind::Incr | TokenKind::Decr => {
                lx.next_sub_token()?;
                let target = self.postfix(lx)?;
                let delta = if token.kind == TokenKind::Incr { 1 } else { -1 };
                let span = token.span.to(target.span());
                self.increment(target, delta, true, span)
            }
            _ => {
                let operand = self.postfix(lx)?;
                let next = lx.peek()?;
                match next.kind {
                    TokenKind::Incr | TokenKind::Decr => {
                        lx.next_sub_token()?;
                        let delta = if next.kind == TokenKind::Incr { 1 } else { -1 };
                        let span = operand.span().to(next.span);
                        self.increment(operand, delta, false, span)
                    }
                    _ => Ok(operand),
                }
            }
        }
    }

    /// A primary operand followed by `.name`, `?.name`, `.name(args)` and
    /// `[index]` segments.
    pub(super) fn postfix(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let token = lx.next_sub_token()?;
        let start = token.span.start;
        let mut segments = Vec::new();
        let mut cuts = Vec::new();
        let base = match token.kind {
            TokenKind::Ident => match token.text(self.src) {
                "true" => Some(self.literal(Value::Bool(true), token.span)),
                "false" => Some(self.literal(Value::Bool(false), token.span)),
                "null" | "nil" => Some(self.literal(Value::Null, token.span)),
                "empty" => Some(self.node(token.span, Type::Null, NodeKind::Empty)),
                "new" => Some(self.new_object(token, lx)?),
                "with" => Some(self.with_expr(token, lx)?),
                "this" => {
                    segments.push(Segment::This);
                    cuts.push(token.span.end - start);
                    None
                }
                word if is_reserved(word) => {
                    return Err(self.err(
                        CompileErrorKind::ReservedWord,
                        format!("unexpected reserved word '{}'", word),
                        start,
                    ))
                }
                name => {
                    if lx.peek()?.kind == TokenKind::Group(Delim::Paren) {
                        Some(self.root_call(token, lx)?)
                    } else {
                        if self.quiet == 0 {
                            self.note_read(name);
                        }
                        segments.push(Segment::Root(name.to_string()));
                        cuts.push(token.span.end - start);
                        None
                    }
                }
            },
            TokenKind::Number => Some(self.number(token, None)?),
            TokenKind::Str => {
                let text = unescape(self.src, token.span)?;
                Some(self.literal(Value::from(text), token.span))
            }
            TokenKind::Group(Delim::Paren) => {
                let inner = self.sub_expr(token.span.inner())?;
                let egress = inner.egress().clone();
                Some(self.node(token.span, egress, NodeKind::Substatement(Box::new(inner))))
            }
            TokenKind::Group(Delim::Bracket) => Some(self.inline_collection(token.span, false)?),
            TokenKind::Group(Delim::Brace) => Some(self.inline_collection(token.span, true)?),
            _ => return Err(self.unexpected(token)),
        };
        let base_end = base.as_ref().map(|b| b.span().end);

        loop {
            let next = lx.peek()?;
            let end = match next.kind {
                TokenKind::Dot | TokenKind::SafeDot => {
                    lx.next_sub_token()?;
                    let null_safe = next.kind == TokenKind::SafeDot;
                    let name_tok = self.expect_ident(lx, "member name after '.'")?;
                    let name = name_tok.text(self.src).to_string();
                    if lx.peek()?.kind == TokenKind::Group(Delim::Paren) {
                        let group = lx.next_sub_token()?;
                        let args = self.args(group.span.inner())?;
                        segments.push(Segment::Method {
                            name,
                            args: args.into(),
                            null_safe,
                        });
                        group.span.end
                    } else {
                        segments.push(Segment::Property { name, null_safe });
                        name_tok.span.end
                    }
                }
                TokenKind::Group(Delim::Bracket) => {
                    lx.next_sub_token()?;
                    let index = self.sub_expr(next.span.inner())?;
                    segments.push(Segment::Index {
                        index: Arc::new(index),
                        null_safe: false,
                    });
                    next.span.end
                }
                _ => break,
            };
            cuts.push(end - start);
        }

        match (base, base_end) {
            (Some(base), _) if segments.is_empty() => Ok(base),
            (Some(base), Some(base_end)) => {
                segments.insert(0, Segment::Base(Arc::new(base)));
                cuts.insert(0, base_end - start);
                self.path_node(start, segments, cuts)
            }
            _ => self.path_node(start, segments, cuts),
        }
    }

    fn path_node(
        &mut self,
        start: usize,
        segments: Vec<Segment>,
        cuts: Vec<usize>,
    ) -> Result<Node, CompileError> {
        let end = start + cuts.last().copied().unwrap_or(0);
        let span = Span::new(start, end);
        let egress = self.path_type(&segments, span)?;
        let meta = self.meta(span, egress);
        let path = PathExpr::new(&self.src[start..end], span, segments, cuts).with_line(meta.line);
        Ok(Node::new(
            meta,
            NodeKind::Property(Property {
                path,
                site: Site::new(),
            }),
        ))
    }

    /// Comma-separated expressions filling `inner`.
    fn args(&mut self, inner: Span) -> Result<Vec<Node>, CompileError> {
        let mut lx = Lexer::over(self.src, inner);
        let mut out = Vec::new();
        while !lx.at_end()? {
            out.push(self.expr(&mut lx)?);
            let sep = lx.next_sub_token()?;
            match sep.kind {
                TokenKind::Comma | TokenKind::Eof => {}
                _ => return Err(self.unexpected(sep)),
            }
        }
        Ok(out)
    }

    /// `name(args)` at the start of an expression.
    fn root_call(&mut self, name: Token, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let group = lx.next_sub_token()?;
        let args = self.args(group.span.inner())?;
        Ok(self.node(
            name.span.to(group.span),
            Type::Any,
            NodeKind::FunctionCall(FunctionCall {
                name: name.text(self.src).to_string(),
                args,
            }),
        ))
    }

    /// `-` directly followed by a bare number literal, read as one negative
    /// literal so that `i64::MIN` is in range.
    fn negative_number(&self, lx: &mut Lexer<'a>, minus: Span) -> Result<Option<Node>, CompileError> {
        let mut ahead = lx.clone();
        let number = ahead.next_sub_token()?;
        if number.kind != TokenKind::Number {
            return Ok(None);
        }
        let followed_by_segment = matches!(
            ahead.peek()?.kind,
            TokenKind::Dot | TokenKind::SafeDot | TokenKind::Group(Delim::Bracket)
        );
        if followed_by_segment {
            return Ok(None);
        }
        *lx = ahead;
        self.number(number, Some(minus)).map(Some)
    }

    fn number(&self, token: Token, minus: Option<Span>) -> Result<Node, CompileError> {
        let sign = if minus.is_some() { "-" } else { "" };
        let text = token.text(self.src).to_ascii_lowercase();
        let bad = || {
            self.err(
                CompileErrorKind::InvalidLiteral,
                format!("invalid number '{}{}'", sign, token.text(self.src)),
                token.span.start,
            )
        };
        let value = if let Some(hex) = text.strip_prefix("0x") {
            let digits = format!("{}{}", sign, hex.trim_end_matches('l'));
            Value::Int(i64::from_str_radix(&digits, 16).map_err(|_| bad())?)
        } else if let Some(digits) = text.strip_suffix('l') {
            Value::Int(format!("{}{}", sign, digits).parse().map_err(|_| bad())?)
        } else if let Some(digits) = text.strip_suffix('d').or_else(|| text.strip_suffix('f')) {
            Value::Float(format!("{}{}", sign, digits).parse().map_err(|_| bad())?)
        } else if text.contains(|c| c == '.' || c == 'e') {
            Value::Float(format!("{}{}", sign, text).parse().map_err(|_| bad())?)
        } else {
            Value::Int(format!("{}{}", sign, text).parse().map_err(|_| bad())?)
        };
        let span = minus.map_or(token.span, |m| m.to(token.span));
        Ok(self.literal(value, span))
    }

    /// `[a, b]`, `['k': v]`, `[:]` or, with `array`, `{a, b}`.
    fn inline_collection(&mut self, group: Span, array: bool) -> Result<Node, CompileError> {
        let inner = group.inner();
        let mut lx = Lexer::over(self.src, inner);
        let mut items = Vec::new();
        let mut entries = Vec::new();
        let mut is_map = false;
        if !array && lx.peek()?.kind == TokenKind::Colon {
            lx.next_sub_token()?;
            self.expect_end(&mut lx)?;
            is_map = true;
        }
        while !lx.at_end()? {
            let first = self.expr(&mut lx)?;
            if !array && (items.is_empty() && entries.is_empty() || is_map) {
                is_map = lx.peek()?.kind == TokenKind::Colon;
            }
            if is_map {
                self.expect(&mut lx, TokenKind::Colon, "':' after map key")?;
                let value = self.expr(&mut lx)?;
                entries.push((first, value));
            } else {
                items.push(first);
            }
            let sep = lx.next_sub_token()?;
            match sep.kind {
                TokenKind::Comma | TokenKind::Eof => {}
                _ => return Err(self.unexpected(sep)),
            }
        }
        let spec = if is_map {
            CollectionSpec::Map(entries)
        } else if array {
            CollectionSpec::Array(items)
        } else {
            CollectionSpec::List(items)
        };
        let egress = spec.egress();
        Ok(self.node(
            group,
            egress,
            NodeKind::InlineCollection(InlineCollection {
                spec: Arc::new(spec),
                site: Site::new(),
            }),
        ))
    }

    /// `new Name(args)`; a dotted name binds its last component.
    fn new_object(&mut self, keyword: Token, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let mut name_tok = self.expect_ident(lx, "class name after new")?;
        while lx.peek()?.kind == TokenKind::Dot {
            lx.next_sub_token()?;
            name_tok = self.expect_ident(lx, "class name after '.'")?;
        }
        let class_name = name_tok.text(self.src).to_string();
        let group = self.expect(lx, TokenKind::Group(Delim::Paren), "'(' after class name")?;
        let args = self.args(group.span.inner())?;
        let known = self.class_named(&class_name).is_some() || Type::from_name(&class_name).is_some();
        if !known {
            self.untyped(&class_name, name_tok.span.start, "unknown class")?;
        }
        let egress = Type::from_name(&class_name).unwrap_or_else(|| Type::object(&class_name));
        let span = keyword.span.to(group.span);
        Ok(self.node(
            span,
            egress,
            NodeKind::NewObject(NewObject {
                spec: Arc::new(NewSpec {
                    class_name,
                    args,
                    span,
                }),
                site: Site::new(),
            }),
        ))
    }

    /// `with (target) { a = 1, b.c = 2 }`.
    fn with_expr(&mut self, keyword: Token, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let head = self.expect(lx, TokenKind::Group(Delim::Paren), "'(' after with")?;
        let target = self.sub_expr(head.span.inner())?;
        let body = self.expect(lx, TokenKind::Group(Delim::Brace), "'{' for with body")?;
        let mut blx = Lexer::over(self.src, body.span.inner());
        let mut assignments = Vec::new();
        while !blx.at_end()? {
            assignments.push(self.with_item(&mut blx)?);
            let sep = blx.next_sub_token()?;
            match sep.kind {
                TokenKind::Comma | TokenKind::Semicolon | TokenKind::Eof => {}
                _ => return Err(self.unexpected(sep)),
            }
        }
        let egress = target.egress().clone();
        Ok(self.node(
            keyword.span.to(body.span),
            egress,
            NodeKind::With(With {
                target: Box::new(target),
                assignments,
            }),
        ))
    }

    /// One item of a `with` body. Assignment targets are rebased onto the
    /// `with` target; other items evaluate with it bound to `this`.
    fn with_item(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        self.quiet += 1;
        let first = self.unary(lx);
        self.quiet -= 1;
        let first = first?;
        if let TokenKind::Assign(op) = lx.peek()?.kind {
            lx.next_sub_token()?;
            let value = self.expr(lx)?;
            let target = self.rebase_on_this(first)?;
            return self.assignment(target, op, value);
        }
        let folded = self.binary_tail(first, lx)?;
        self.ternary_tail(folded, lx)
    }

    fn rebase_on_this(&self, node: Node) -> Result<Node, CompileError> {
        let span = node.span();
        let NodeKind::Property(prop) = node.kind else {
            return Err(self.err(
                CompileErrorKind::Syntax,
                "with body assignments must target a property",
                span.start,
            ));
        };
        let path = prop.path;
        if matches!(path.segments.first(), Some(Segment::This)) {
            return Ok(Node::new(node.meta, NodeKind::Property(Property { path, site: Site::new() })));
        }
        let mut segments = vec![Segment::This];
        let mut cuts = vec![4];
        for (i, segment) in path.segments.iter().enumerate() {
            segments.push(match segment {
                Segment::Root(name) => Segment::Property {
                    name: name.clone(),
                    null_safe: false,
                },
                other => other.clone(),
            });
            cuts.push(path.cuts.get(i).copied().unwrap_or(0) + 5);
        }
        let text = format!("this.{}", path.text);
        let meta = node.meta;
        Ok(Node::new(
            meta,
            NodeKind::Property(Property {
                path: PathExpr::new(text, span, segments, cuts).with_line(path.line),
                site: Site::new(),
            }),
        ))
    }

    fn target_of(&self, node: Node) -> Result<Target, CompileError> {
        let span = node.span();
        let text = self.src.get(span.start..span.end).unwrap_or("").trim();
        if is_reserved(text) {
            return Err(self.err(
                CompileErrorKind::ReservedWord,
                format!("cannot assign to reserved word '{}'", text),
                span.start,
            ));
        }
        match node.kind {
            NodeKind::Property(prop) => match prop.path.as_root() {
                Some(name) => Ok(Target::Name(name.to_string())),
                None if super::assignable(&prop.path) => Ok(Target::Path {
                    path: prop.path,
                    site: Site::new(),
                }),
                None => Err(self.err(
                    CompileErrorKind::Syntax,
                    "cannot assign to a method call",
                    span.start,
                )),
            },
            _ => Err(self.err(
                CompileErrorKind::Syntax,
                "left side of assignment is not assignable",
                span.start,
            )),
        }
    }

    fn assignment(
        &mut self,
        target: Node,
        op: Option<Operator>,
        value: Node,
    ) -> Result<Node, CompileError> {
        let span = target.span().to(value.span());
        let target_ty = target.egress().clone();
        let target = self.target_of(target)?;
        let egress = match op {
            Some(op) => op.result_type(&target_ty, value.egress()),
            None => value.egress().clone(),
        };
        let register = match &target {
            Target::Name(name) => {
                if self.declared(name).is_none() {
                    self.declare(name, value.egress().clone(), false, span.start)?;
                }
                self.allocate(name)
            }
            Target::Path { .. } => None,
        };
        Ok(self.node(
            span,
            egress,
            NodeKind::Assignment(Assignment {
                target,
                op,
                value: Some(Box::new(value)),
                decl: None,
                register,
            }),
        ))
    }

    fn increment(
        &mut self,
        target: Node,
        delta: i64,
        prefix: bool,
        span: Span,
    ) -> Result<Node, CompileError> {
        let egress = target.egress().clone();
        let target = self.target_of(target)?;
        Ok(self.node(
            span,
            egress,
            NodeKind::Increment(Increment {
                target,
                delta,
                prefix,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Node, NodeKind, Operator};
    use crate::class::ClassLibrary;
    use crate::engine::CompileOptions;
    use crate::error::CompileErrorKind;
    use crate::types::Type;
    use crate::value::Value;

    fn expr(src: &str) -> Node {
        let program = super::super::compile_program(src, &CompileOptions::default(), &ClassLibrary::standard())
            .unwrap_or_else(|e| panic!("{}: {}", src, e));
        match program.kind {
            NodeKind::Block(mut block) => block.stmts.remove(0),
            _ => unreachable!(),
        }
    }

    fn path_text(node: &Node) -> String {
        match &node.kind {
            NodeKind::Property(p) => p.path.text.to_string(),
            other => panic!("expected a path, got {:?}", other),
        }
    }

    #[test]
    fn test_path_cuts() {
        let node = expr("order.lines[0].total()");
        let NodeKind::Property(prop) = &node.kind else {
            panic!("expected a path");
        };
        assert_eq!(prop.path.len(), 4);
        assert_eq!(&*prop.path.cuts, &[5, 11, 14, 22]);
        assert_eq!(path_text(&node), "order.lines[0].total()");
        assert_eq!(prop.path.prefix(2).text.as_ref(), "order.lines");
    }

    #[test]
    fn test_base_segments() {
        let node = expr("(a + b).size()");
        let NodeKind::Property(prop) = &node.kind else {
            panic!("expected a path");
        };
        assert!(matches!(prop.path.segments[0], crate::accessor::Segment::Base(_)));
        assert_eq!(&*prop.path.cuts, &[7, 14]);
    }

    #[test]
    fn test_literals() {
        assert!(matches!(expr("0x1F").kind, NodeKind::Literal(Value::Int(31))));
        assert!(matches!(expr("10L").kind, NodeKind::Literal(Value::Int(10))));
        assert!(matches!(expr("2.5e1").kind, NodeKind::Literal(Value::Float(f)) if f == 25.0));
        assert!(matches!(expr("-3").kind, NodeKind::Literal(Value::Int(-3))));
        assert!(matches!(
            expr("-9223372036854775808").kind,
            NodeKind::Literal(Value::Int(i64::MIN))
        ));
        assert!(matches!(expr("-0x10").kind, NodeKind::Literal(Value::Int(-16))));
        assert!(matches!(expr("-1.5").kind, NodeKind::Literal(Value::Float(f)) if f == -1.5));
        let err = super::super::compile_program(
            "9223372036854775808",
            &CompileOptions::default(),
            &ClassLibrary::standard(),
        )
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidLiteral);
        assert!(matches!(expr("'a\\tb'").kind, NodeKind::Literal(Value::Str(ref s)) if &**s == "a\tb"));
    }

    #[test]
    fn test_collections() {
        let cases = [
            ("[1, 2]", Type::List),
            ("['a': 1, 'b': 2]", Type::Map),
            ("[:]", Type::Map),
            ("{1, 2}", Type::Array),
            ("[]", Type::List),
        ];
        for (src, ty) in cases {
            let node = expr(src);
            assert!(matches!(node.kind, NodeKind::InlineCollection(_)), "{}", src);
            assert_eq!(node.egress(), &ty, "{}", src);
        }
    }

    #[test]
    fn test_empty_and_regex_nodes() {
        assert!(matches!(expr("x == empty").kind, NodeKind::EmptyTest { negate: false, .. }));
        assert!(matches!(expr("x != empty").kind, NodeKind::EmptyTest { negate: true, .. }));
        assert!(matches!(expr("name ~= 'a.*'").kind, NodeKind::RegexMatch(_)));
        let err = super::super::compile_program("x ~= '('", &CompileOptions::default(), &ClassLibrary::standard())
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidRegex);
    }

    #[test]
    fn test_with_rebases_targets() {
        let node = expr("with (p) { name = 'x', address.city = 'y' }");
        let NodeKind::With(with) = &node.kind else {
            panic!("expected with");
        };
        let texts: Vec<String> = with
            .assignments
            .iter()
            .map(|a| match &a.kind {
                NodeKind::Assignment(assign) => match &assign.target {
                    crate::ast::Target::Path { path, .. } => path.text.to_string(),
                    crate::ast::Target::Name(n) => n.clone(),
                },
                other => panic!("expected assignment, got {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["this.name", "this.address.city"]);
    }

    #[test]
    fn test_assignment_targets() {
        let err = super::super::compile_program("a.size() = 1", &CompileOptions::default(), &ClassLibrary::standard())
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        let err = super::super::compile_program("this = 1", &CompileOptions::default(), &ClassLibrary::standard())
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::ReservedWord);
        assert!(matches!(expr("x += 2").kind, NodeKind::Assignment(ref a) if a.op == Some(Operator::Add)));
    }
}
