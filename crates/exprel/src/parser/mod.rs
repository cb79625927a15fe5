//! Source text to AST.
//!
//! Statements are parsed here. Expressions are parsed into a flat
//! `operand (operator operand)*` sequence ([`expr`]) which is folded by
//! precedence in two passes ([`fold`]). Paths are typed without evaluation
//! when verification is on ([`verify`]).
//!
//! Bracket groups arrive from the lexer as single tokens; their contents are
//! parsed by a sub-lexer over the same buffer so every span stays absolute.

mod expr;
mod fold;
mod verify;

use crate::accessor::{PathExpr, Segment};
use crate::ast::{
    Assignment, Block, ForEach, Function, IfChain, Loop, LoopKind, Node, NodeKind, NodeMeta,
    Operator, Param, Target,
};
use crate::class::{ClassDef, ClassLibrary};
use crate::engine::CompileOptions;
use crate::error::{CompileError, CompileErrorKind};
use crate::lexer::{Delim, Lexer, Span, Token, TokenKind};
use crate::types::Type;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::{Arc, OnceLock};

/// Words that cannot name a variable, function or parameter.
pub const RESERVED: &[&str] = &[
    "if", "else", "foreach", "for", "while", "until", "do", "def", "function", "return", "new",
    "import", "assert", "with", "true", "false", "null", "nil", "empty", "this", "var",
    "instanceof", "is", "contains",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

/// A name known at compile time.
#[derive(Debug, Clone)]
struct Declared {
    ty: Type,
    /// Declared with a type keyword (`int x`, `var x`) rather than assigned.
    explicit: bool,
}

/// Register layout of the function being compiled.
#[derive(Debug, Default)]
struct FnFrame {
    registers: Vec<String>,
    free_vars: Vec<String>,
}

pub(crate) struct Compiler<'a> {
    src: &'a str,
    options: &'a CompileOptions,
    classes: &'a ClassLibrary,
    /// Imports declared by `import` statements so far.
    imports: IndexMap<String, Value>,
    blocks: Vec<IndexMap<String, Declared>>,
    functions: Vec<FnFrame>,
    /// Byte offsets at which lines start, when recording debug symbols.
    line_starts: Option<Vec<usize>>,
    /// Non-zero while parsing paths that are typed against something other
    /// than the scope (targets inside `with` bodies).
    quiet: usize,
}

pub(crate) fn compile_program(
    src: &str,
    options: &CompileOptions,
    classes: &ClassLibrary,
) -> Result<Node, CompileError> {
    let mut c = Compiler::new(src, options, classes);
    let span = Span::new(0, src.len());
    c.blocks.push(IndexMap::new());
    let stmts = c.statements(span)?;
    let egress = stmts.last().map(|s| s.egress().clone()).unwrap_or(Type::Void);
    Ok(Node::new(
        c.meta(span, egress),
        NodeKind::Block(Block {
            stmts,
            scoped: false,
        }),
    ))
}

/// Parses a single assignable path such as `a.b[0]`.
pub(crate) fn compile_path(
    src: &str,
    options: &CompileOptions,
    classes: &ClassLibrary,
) -> Result<PathExpr, CompileError> {
    let mut c = Compiler::new(src, options, classes);
    c.blocks.push(IndexMap::new());
    let mut lx = Lexer::new(src);
    let node = c.postfix(&mut lx)?;
    c.expect_end(&mut lx)?;
    match node.kind {
        NodeKind::Property(prop) if assignable(&prop.path) => Ok(prop.path),
        _ => Err(c.err(
            CompileErrorKind::Syntax,
            "not an assignable property path",
            node.meta.span.start,
        )),
    }
}

/// Whether a path can be the target of an assignment.
fn assignable(path: &PathExpr) -> bool {
    !matches!(
        path.segments.last(),
        None | Some(Segment::Method { .. } | Segment::This | Segment::Base(_))
    )
}

impl<'a> Compiler<'a> {
    fn new(src: &'a str, options: &'a CompileOptions, classes: &'a ClassLibrary) -> Self {
        let line_starts = options.debug_symbols.then(|| {
            std::iter::once(0)
                .chain(src.match_indices('\n').map(|(i, _)| i + 1))
                .collect()
        });
        Compiler {
            src,
            options,
            classes,
            imports: IndexMap::new(),
            blocks: Vec::new(),
            functions: Vec::new(),
            line_starts,
            quiet: 0,
        }
    }

    fn err(&self, kind: CompileErrorKind, msg: impl Into<String>, at: usize) -> CompileError {
        CompileError::new(kind, msg, self.src, at)
    }

    fn unexpected(&self, token: Token) -> CompileError {
        let msg = match token.kind {
            TokenKind::Eof => "unexpected end of input".to_string(),
            _ => format!("unexpected '{}'", token.text(self.src)),
        };
        self.err(CompileErrorKind::Syntax, msg, token.span.start)
    }

    fn meta(&self, span: Span, egress: Type) -> NodeMeta {
        let mut meta = NodeMeta::new(span, egress);
        if let Some(starts) = &self.line_starts {
            let line = starts.partition_point(|&s| s <= span.start);
            meta.line = Some(line as u32);
        }
        meta
    }

    fn node(&self, span: Span, egress: Type, kind: NodeKind) -> Node {
        Node::new(self.meta(span, egress), kind)
    }

    fn literal(&self, value: Value, span: Span) -> Node {
        let egress = value.type_of();
        self.node(span, egress, NodeKind::Literal(value))
    }

    fn expect_end(&self, lx: &mut Lexer<'a>) -> Result<(), CompileError> {
        let token = lx.peek()?;
        match token.kind {
            TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected(token)),
        }
    }

    fn expect(&self, lx: &mut Lexer<'a>, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        let token = lx.next_sub_token()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.err(
                CompileErrorKind::Syntax,
                format!("expected {}", what),
                token.span.start,
            ))
        }
    }

    fn expect_ident(&self, lx: &mut Lexer<'a>, what: &str) -> Result<Token, CompileError> {
        self.expect(lx, TokenKind::Ident, what)
    }

    /// A bindable name: an identifier that is not reserved.
    fn check_name(&self, token: Token) -> Result<String, CompileError> {
        let name = token.text(self.src);
        if is_reserved(name) {
            return Err(self.err(
                CompileErrorKind::ReservedWord,
                format!("'{}' is a reserved word", name),
                token.span.start,
            ));
        }
        Ok(name.to_string())
    }

    fn class_named(&self, name: &str) -> Option<Arc<ClassDef>> {
        let imported = self
            .imports
            .get(name)
            .or_else(|| self.options.imports.get(name));
        match imported {
            Some(Value::Class(class)) => Some(Arc::clone(class)),
            _ => self.classes.get(name).cloned(),
        }
    }

    /// Type named by a declaration keyword or class name.
    fn type_named(&self, name: &str) -> Option<Type> {
        if name == "var" {
            return Some(Type::Any);
        }
        Type::from_name(name).or_else(|| self.class_named(name).map(|c| Type::object(c.name())))
    }

    fn declared(&self, name: &str) -> Option<&Declared> {
        self.blocks.iter().rev().find_map(|b| b.get(name))
    }

    fn declare(&mut self, name: &str, ty: Type, explicit: bool, at: usize) -> Result<(), CompileError> {
        let conflict = self.blocks.last().and_then(|b| b.get(name)).is_some_and(|prev| {
            explicit && prev.explicit && prev.ty != ty
        });
        if conflict {
            return Err(self.err(
                CompileErrorKind::Redeclaration,
                format!("'{}' is already declared in this block with another type", name),
                at,
            ));
        }
        if let Some(block) = self.blocks.last_mut() {
            block.insert(name.to_string(), Declared { ty, explicit });
        }
        Ok(())
    }

    /// Register for a binding created in the current function.
    fn allocate(&mut self, name: &str) -> Option<usize> {
        let frame = self.functions.last_mut()?;
        if let Some(i) = frame.registers.iter().position(|r| r == name) {
            return Some(i);
        }
        if frame.free_vars.iter().any(|v| v == name) {
            return None;
        }
        frame.registers.push(name.to_string());
        Some(frame.registers.len() - 1)
    }

    /// Records a name read inside a function that the function does not own.
    fn note_read(&mut self, name: &str) {
        let is_class = self.class_named(name).is_some();
        if let Some(frame) = self.functions.last_mut() {
            if !is_class
                && !frame.registers.iter().any(|r| r == name)
                && !frame.free_vars.iter().any(|v| v == name)
            {
                frame.free_vars.push(name.to_string());
            }
        }
    }

    fn statements(&mut self, range: Span) -> Result<Vec<Node>, CompileError> {
        let mut lx = Lexer::over(self.src, range);
        let mut out = Vec::new();
        loop {
            let token = lx.peek()?;
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon => {
                    lx.next_sub_token()?;
                    continue;
                }
                _ => {}
            }
            let (stmt, braced) = self.statement(&mut lx)?;
            out.push(stmt);
            let next = lx.peek()?;
            match next.kind {
                TokenKind::Semicolon => {
                    lx.next_sub_token()?;
                }
                TokenKind::Eof => {}
                _ if braced => {}
                _ => {
                    return Err(self.err(
                        CompileErrorKind::Syntax,
                        format!("expected ';' before '{}'", next.text(self.src)),
                        next.span.start,
                    ))
                }
            }
        }
        Ok(out)
    }

    /// One statement, and whether it ended with a brace block (in which case
    /// no `;` is needed after it).
    fn statement(&mut self, lx: &mut Lexer<'a>) -> Result<(Node, bool), CompileError> {
        let token = lx.peek()?;
        if token.kind == TokenKind::Ident {
            match token.text(self.src) {
                "if" => return Ok((self.if_chain(lx)?, true)),
                "foreach" | "for" => return Ok((self.for_loop(lx)?, true)),
                "while" => return Ok((self.while_loop(lx, LoopKind::While)?, true)),
                "until" => return Ok((self.while_loop(lx, LoopKind::Until)?, true)),
                "do" => return Ok((self.do_loop(lx)?, true)),
                "def" | "function" => return Ok((self.function_decl(lx)?, true)),
                "return" => return Ok((self.return_stmt(lx)?, false)),
                "import" => return Ok((self.import_stmt(lx)?, false)),
                "assert" => return Ok((self.assert_stmt(lx)?, false)),
                _ => {}
            }
            if let Some(decl) = self.declaration(lx)? {
                return Ok((decl, false));
            }
        }
        let node = self.expr(lx)?;
        let braced = matches!(node.kind, NodeKind::With(_));
        Ok((node, braced))
    }

    /// `{ ... }` or a single statement.
    fn body(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let token = lx.peek()?;
        if token.kind == TokenKind::Group(Delim::Brace) {
            lx.next_sub_token()?;
            return self.block(token.span, true);
        }
        self.blocks.push(IndexMap::new());
        let stmt = self.statement(lx);
        self.blocks.pop();
        let (stmt, _) = stmt?;
        let span = stmt.span();
        let egress = stmt.egress().clone();
        Ok(self.node(
            span,
            egress,
            NodeKind::Block(Block {
                stmts: vec![stmt],
                scoped: true,
            }),
        ))
    }

    fn block(&mut self, group: Span, scoped: bool) -> Result<Node, CompileError> {
        self.blocks.push(IndexMap::new());
        let stmts = self.statements(group.inner());
        self.blocks.pop();
        let stmts = stmts?;
        let egress = stmts.last().map(|s| s.egress().clone()).unwrap_or(Type::Void);
        Ok(self.node(group, egress, NodeKind::Block(Block { stmts, scoped })))
    }

    /// Parses the expression filling `range` entirely.
    fn sub_expr(&mut self, range: Span) -> Result<Node, CompileError> {
        let mut lx = Lexer::over(self.src, range);
        if lx.at_end()? {
            return Err(self.err(CompileErrorKind::Syntax, "empty expression", range.start));
        }
        let node = self.expr(&mut lx)?;
        self.expect_end(&mut lx)?;
        Ok(node)
    }

    fn paren_condition(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let group = self.expect(lx, TokenKind::Group(Delim::Paren), "'('")?;
        self.sub_expr(group.span.inner())
    }

    fn if_chain(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let cond = self.paren_condition(lx)?;
        let body = self.body(lx)?;
        let mut end = body.span();
        let mut branches = vec![(cond, body)];
        let mut otherwise = None;
        while lx.peek()?.is_ident(self.src, "else") {
            lx.next_sub_token()?;
            if lx.peek()?.is_ident(self.src, "if") {
                lx.next_sub_token()?;
                let cond = self.paren_condition(lx)?;
                let body = self.body(lx)?;
                end = body.span();
                branches.push((cond, body));
            } else {
                let body = self.body(lx)?;
                end = body.span();
                otherwise = Some(Box::new(body));
                break;
            }
        }
        let first = branches[0].1.egress().clone();
        let uniform = otherwise.as_ref().is_some_and(|o| *o.egress() == first)
            && branches.iter().all(|(_, b)| *b.egress() == first);
        let egress = if uniform { first } else { Type::Any };
        Ok(self.node(
            start.to(end),
            egress,
            NodeKind::If(IfChain {
                branches,
                otherwise,
            }),
        ))
    }

    /// `item : subject` or `Type item : subject` inside a `for` head.
    fn foreach_head(&self, inner: Span) -> Result<Option<(Token, Option<Type>, Span)>, CompileError> {
        let mut lx = Lexer::over(self.src, inner);
        let a = lx.next_sub_token()?;
        if a.kind != TokenKind::Ident {
            return Ok(None);
        }
        let b = lx.next_sub_token()?;
        let (item, ty) = match b.kind {
            TokenKind::Colon => (a, None),
            TokenKind::Ident => {
                if lx.next_sub_token()?.kind != TokenKind::Colon {
                    return Ok(None);
                }
                let ty_name = a.text(self.src);
                let ty = self.type_named(ty_name).ok_or_else(|| {
                    self.err(
                        CompileErrorKind::UnresolvedType,
                        format!("unknown type '{}'", ty_name),
                        a.span.start,
                    )
                })?;
                (b, Some(ty))
            }
            _ => return Ok(None),
        };
        Ok(Some((item, ty, Span::new(lx.pos(), inner.end))))
    }

    fn for_loop(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let head = self.expect(lx, TokenKind::Group(Delim::Paren), "'(' after for")?;
        let inner = head.span.inner();
        if let Some((item_tok, item_ty, subject_range)) = self.foreach_head(inner)? {
            let item = self.check_name(item_tok)?;
            let subject = self.sub_expr(subject_range)?;
            let item_ty = item_ty.filter(Type::is_known);
            let mut scope = IndexMap::new();
            scope.insert(
                item.clone(),
                Declared {
                    ty: item_ty.clone().unwrap_or(Type::Any),
                    explicit: true,
                },
            );
            self.blocks.push(scope);
            let body = self.body(lx);
            self.blocks.pop();
            let body = body?;
            let span = start.to(body.span());
            return Ok(self.node(
                span,
                Type::Void,
                NodeKind::ForEach(ForEach {
                    item,
                    item_ty,
                    subject: Box::new(subject),
                    body: Box::new(body),
                    shape: OnceLock::new(),
                }),
            ));
        }
        self.blocks.push(IndexMap::new());
        let parts = self.for_head(inner);
        let body = parts.and_then(|parts| Ok((parts, self.body(lx)?)));
        self.blocks.pop();
        let ((init, cond, step), body) = body?;
        let span = start.to(body.span());
        Ok(self.node(
            span,
            Type::Void,
            NodeKind::Loop(Loop {
                kind: LoopKind::For,
                init,
                cond,
                step,
                body: Box::new(body),
            }),
        ))
    }

    #[allow(clippy::type_complexity)]
    fn for_head(
        &mut self,
        inner: Span,
    ) -> Result<(Option<Box<Node>>, Option<Box<Node>>, Option<Box<Node>>), CompileError> {
        let mut lx = Lexer::over(self.src, inner);
        let init = match lx.peek()?.kind {
            TokenKind::Semicolon => None,
            _ => Some(Box::new(self.statement(&mut lx)?.0)),
        };
        self.expect(&mut lx, TokenKind::Semicolon, "';' in for head")?;
        let cond = match lx.peek()?.kind {
            TokenKind::Semicolon => None,
            _ => Some(Box::new(self.expr(&mut lx)?)),
        };
        self.expect(&mut lx, TokenKind::Semicolon, "';' in for head")?;
        let step = match lx.peek()?.kind {
            TokenKind::Eof => None,
            _ => Some(Box::new(self.expr(&mut lx)?)),
        };
        self.expect_end(&mut lx)?;
        Ok((init, cond, step))
    }

    fn while_loop(&mut self, lx: &mut Lexer<'a>, kind: LoopKind) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let cond = self.paren_condition(lx)?;
        let body = self.body(lx)?;
        let span = start.to(body.span());
        Ok(self.node(
            span,
            Type::Void,
            NodeKind::Loop(Loop {
                kind,
                init: None,
                cond: Some(Box::new(cond)),
                step: None,
                body: Box::new(body),
            }),
        ))
    }

    fn do_loop(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let body = self.body(lx)?;
        let keyword = self.expect_ident(lx, "'while' or 'until' after do body")?;
        let kind = match keyword.text(self.src) {
            "while" => LoopKind::DoWhile,
            "until" => LoopKind::DoUntil,
            _ => return Err(self.unexpected(keyword)),
        };
        let cond = self.paren_condition(lx)?;
        let span = start.to(cond.span());
        Ok(self.node(
            span,
            Type::Void,
            NodeKind::Loop(Loop {
                kind,
                init: None,
                cond: Some(Box::new(cond)),
                step: None,
                body: Box::new(body),
            }),
        ))
    }

    fn params(&self, inner: Span) -> Result<Vec<Param>, CompileError> {
        let mut lx = Lexer::over(self.src, inner);
        let mut params: Vec<Param> = Vec::new();
        while !lx.at_end()? {
            let first = self.expect_ident(&mut lx, "parameter name")?;
            let (name_tok, ty) = match lx.peek()?.kind {
                TokenKind::Ident => {
                    let name_tok = lx.next_sub_token()?;
                    let ty_name = first.text(self.src);
                    let ty = self.type_named(ty_name).ok_or_else(|| {
                        self.err(
                            CompileErrorKind::UnresolvedType,
                            format!("unknown type '{}'", ty_name),
                            first.span.start,
                        )
                    })?;
                    (name_tok, Some(ty).filter(Type::is_known))
                }
                _ => (first, None),
            };
            let name = self.check_name(name_tok)?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.err(
                    CompileErrorKind::Redeclaration,
                    format!("duplicate parameter '{}'", name),
                    name_tok.span.start,
                ));
            }
            params.push(Param { name, ty });
            match lx.next_sub_token()?.kind {
                TokenKind::Comma | TokenKind::Eof => {}
                _ => {
                    lx.back();
                    return Err(self.unexpected(lx.peek()?));
                }
            }
        }
        Ok(params)
    }

    fn function_decl(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let name_tok = self.expect_ident(lx, "function name")?;
        let name = self.check_name(name_tok)?;
        let head = self.expect(lx, TokenKind::Group(Delim::Paren), "'(' after function name")?;
        let params = self.params(head.span.inner())?;
        let body_tok = self.expect(lx, TokenKind::Group(Delim::Brace), "'{' for function body")?;

        // Declared before the body so recursive calls type-check.
        self.declare(&name, Type::Function, false, name_tok.span.start)?;
        self.functions.push(FnFrame {
            registers: params.iter().map(|p| p.name.clone()).collect(),
            free_vars: Vec::new(),
        });
        let scope = params
            .iter()
            .map(|p| {
                let ty = p.ty.clone().unwrap_or(Type::Any);
                (p.name.clone(), Declared { ty, explicit: true })
            })
            .collect();
        self.blocks.push(scope);
        let body = self.block(body_tok.span, false);
        self.blocks.pop();
        let frame = self.functions.pop().unwrap_or_default();
        let body = body?;
        let span = start.to(body_tok.span);
        tracing::trace!(
            function = %name,
            registers = ?frame.registers,
            free_vars = ?frame.free_vars,
            "compiled function"
        );
        let function = Function {
            name,
            params,
            body,
            registers: frame.registers,
            free_vars: frame.free_vars,
            span,
        };
        Ok(self.node(span, Type::Void, NodeKind::FunctionDecl(Arc::new(function))))
    }

    fn return_stmt(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let value = match lx.peek()?.kind {
            TokenKind::Semicolon | TokenKind::Eof => None,
            _ => Some(Box::new(self.expr(lx)?)),
        };
        let (span, egress) = match &value {
            Some(v) => (start.to(v.span()), v.egress().clone()),
            None => (start, Type::Void),
        };
        Ok(self.node(span, egress, NodeKind::Return(value)))
    }

    /// `import Name` or `import some.package.Name`; the last component is
    /// the bound name.
    fn import_stmt(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let mut last = self.expect_ident(lx, "class name after import")?;
        if last.text(self.src) == "static" && lx.peek()?.kind == TokenKind::Ident {
            last = lx.next_sub_token()?;
        }
        while lx.peek()?.kind == TokenKind::Dot {
            lx.next_sub_token()?;
            last = self.expect_ident(lx, "name after '.'")?;
        }
        let name = last.text(self.src).to_string();
        let value = match self.options.imports.get(&name) {
            Some(value) => value.clone(),
            None => match self.classes.get(&name) {
                Some(class) => Value::Class(Arc::clone(class)),
                None => {
                    return Err(self.err(
                        CompileErrorKind::UnresolvedType,
                        format!("cannot import unknown class '{}'", name),
                        last.span.start,
                    ))
                }
            },
        };
        self.imports.insert(name.clone(), value.clone());
        Ok(self.node(start.to(last.span), Type::Void, NodeKind::Import { name, value }))
    }

    fn assert_stmt(&mut self, lx: &mut Lexer<'a>) -> Result<Node, CompileError> {
        let start = lx.next_sub_token()?.span;
        let expr = self.expr(lx)?;
        let span = expr.span();
        let text = self.src[span.start..span.end].trim().to_string();
        Ok(self.node(
            start.to(span),
            Type::Bool,
            NodeKind::Assert {
                expr: Box::new(expr),
                text,
            },
        ))
    }

    /// `Type name [= value]`. Returns `None` without consuming anything when
    /// the statement is not a declaration.
    fn declaration(&mut self, lx: &mut Lexer<'a>) -> Result<Option<Node>, CompileError> {
        let mut ahead = lx.clone();
        let ty_tok = ahead.next_sub_token()?;
        let Some(ty) = self.type_named(ty_tok.text(self.src)) else {
            return Ok(None);
        };
        let name_tok = ahead.next_sub_token()?;
        if name_tok.kind != TokenKind::Ident
            || Operator::from_word(name_tok.text(self.src)).is_some()
        {
            return Ok(None);
        }
        let after = ahead.peek()?;
        if !matches!(
            after.kind,
            TokenKind::Assign(None) | TokenKind::Semicolon | TokenKind::Eof
        ) {
            return Ok(None);
        }
        *lx = ahead;
        let name = self.check_name(name_tok)?;
        let value = if after.kind == TokenKind::Assign(None) {
            lx.next_sub_token()?;
            Some(Box::new(self.expr(lx)?))
        } else {
            None
        };
        self.declare(&name, ty.clone(), true, name_tok.span.start)?;
        let register = self.allocate(&name);
        let end = value.as_ref().map(|v| v.span()).unwrap_or(name_tok.span);
        let egress = match (&ty, &value) {
            (Type::Any, Some(v)) => v.egress().clone(),
            _ => ty.clone(),
        };
        Ok(Some(self.node(
            ty_tok.span.to(end),
            egress,
            NodeKind::Assignment(Assignment {
                target: Target::Name(name),
                op: None,
                value,
                decl: Some(ty),
                register,
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    fn parse(src: &str) -> Result<Node, CompileError> {
        compile_program(src, &CompileOptions::default(), &ClassLibrary::standard())
    }

    fn stmts(node: &Node) -> &[Node] {
        match &node.kind {
            NodeKind::Block(block) => &block.stmts,
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_separators() {
        let program = parse("a = 5; b = a + 1; b").unwrap();
        assert_eq!(stmts(&program).len(), 3);
        let program = parse("if (x) { 1 } else { 2 } y = 3;").unwrap();
        assert_eq!(stmts(&program).len(), 2);
        let err = parse("a = 1 b = 2").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
    }

    #[test]
    fn test_reserved_words() {
        for src in ["x = if", "int new = 2", "def return(a) { a }", "def f(with) { 1 }", "foreach (null : xs) {}"] {
            let err = parse(src).unwrap_err();
            assert_eq!(err.kind, CompileErrorKind::ReservedWord, "{}", src);
        }
    }

    #[test]
    fn test_redeclaration() {
        let err = parse("int x = 1; String x = 'a'").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Redeclaration);
        assert!(parse("int x = 1; int x = 2").is_ok());
        assert!(parse("int x = 1; if (true) { String x = 'a' }").is_ok());
    }

    #[test]
    fn test_function_registers() {
        let program = parse("def f(a, int b) { c = a + b; d = c * g; d }").unwrap();
        let NodeKind::FunctionDecl(func) = &stmts(&program)[0].kind else {
            panic!("expected a function declaration");
        };
        assert_eq!(func.registers, vec!["a", "b", "c", "d"]);
        assert_eq!(func.free_vars, vec!["g"]);
        assert_eq!(func.params[1].ty, Some(Type::Int));
    }

    #[test]
    fn test_debug_lines() {
        let options = CompileOptions::new().debug_symbols(Some("calc.ex"));
        let program =
            compile_program("a = 1;\n\nb = 2", &options, &ClassLibrary::standard()).unwrap();
        let lines: Vec<_> = stmts(&program).iter().map(|s| s.meta.line).collect();
        assert_eq!(lines, vec![Some(1), Some(3)]);
    }

    #[test]
    fn test_unknown_import() {
        let err = parse("import com.acme.Widget").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedType);
        assert!(parse("import java.lang.Math; Math.abs(-1)").is_ok());
    }
}
