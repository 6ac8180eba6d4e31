//! Recursive-descent parser producing [`ast::Module`](super::ast::Module).

use super::ast::{
    BinaryOp, BoolOp, CompareOp, Comprehension, Constant, ExceptHandler, Expr, ExprKind,
    FunctionDef, Keyword as KeywordArg, Module, Param, Parameters, Stmt, StmtKind, UnaryOp,
    WithItem,
};
use super::diagnostic::{Diagnostic, Span};
use super::lexer::tokenize;
use super::token::{Keyword, Op, Token, TokenKind};

type PResult<T> = Result<T, Diagnostic>;

/// Deepest syntactic nesting accepted, counting brackets, unary and
/// operator chains, conditional expressions and indented blocks together.
pub const MAX_NESTING: usize = 200;

/// Parse script text into a syntax tree.
///
/// # Errors
///
/// Returns the first lexical or grammatical error.
pub fn parse(source: &str) -> PResult<Module> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .parse_module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    // ---------------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------------

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn span(&self) -> Span {
        let idx = self.pos.min(self.tokens.len() - 1);
        self.tokens[idx].span
    }

    fn advance(&mut self) -> Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.tokens[idx].clone()
    }

    // ---------------------------------------------------------------------
    // Nesting
    // ---------------------------------------------------------------------

    fn deepen(&mut self, what: &str) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(Diagnostic::new(self.span(), format!("too many nested {what}")));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run one recursive production one level deeper.
    fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<T> {
        self.deepen(what)?;
        let result = crate::stack::guarded(|| parse(self));
        self.depth -= 1;
        result
    }

    /// Left-associative chains build one tree level per link, so each link
    /// counts toward the nesting depth until the chain is complete.
    fn chained<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let start = self.depth;
        let result = parse(self);
        self.depth = start;
        result
    }

    fn at_op(&self, op: Op) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected<T>(&self, expected: &str) -> PResult<T> {
        Err(Diagnostic::new(
            self.span(),
            format!(
                "invalid syntax: expected {expected}, found {}",
                self.peek().describe()
            ),
        ))
    }

    fn expect_op(&mut self, op: Op) -> PResult<Span> {
        if self.at_op(op) {
            Ok(self.advance().span)
        } else {
            self.unexpected(&format!("'{}'", super::token::op_spelling(op)))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<Span> {
        if self.at_kw(kw) {
            Ok(self.advance().span)
        } else {
            self.unexpected(&format!("{kw:?}").to_lowercase())
        }
    }

    fn expect_name(&mut self) -> PResult<(String, Span)> {
        if let TokenKind::Name(name) = self.peek() {
            let name = name.clone();
            let span = self.advance().span;
            Ok((name, span))
        } else {
            self.unexpected("a name")
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::EndOfFile => Ok(()),
            _ => self.unexpected("end of line"),
        }
    }

    /// Whether the current token can begin an expression.
    fn starts_expr(&self) -> bool {
        match self.peek() {
            TokenKind::Name(_)
            | TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::Bytes(_) => true,
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::None
                    | Keyword::True
                    | Keyword::False
                    | Keyword::Not
                    | Keyword::Lambda
                    | Keyword::Await
                    | Keyword::Yield
            ),
            TokenKind::Op(op) => matches!(
                op,
                Op::LParen
                    | Op::LBracket
                    | Op::LBrace
                    | Op::Minus
                    | Op::Plus
                    | Op::Tilde
                    | Op::Star
                    | Op::Ellipsis
            ),
            _ => false,
        }
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn parse_module(mut self) -> PResult<Module> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::EndOfFile => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => return Err(Diagnostic::new(self.span(), "unexpected indent")),
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(Module { body })
    }

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        let span = self.span();
        let compound = match self.peek() {
            TokenKind::Keyword(Keyword::If) => Some(self.parse_if()?),
            TokenKind::Keyword(Keyword::While) => Some(self.parse_while()?),
            TokenKind::Keyword(Keyword::For) => Some(self.parse_for(false, span)?),
            TokenKind::Keyword(Keyword::Try) => Some(self.parse_try()?),
            TokenKind::Keyword(Keyword::With) => Some(self.parse_with(false, span)?),
            TokenKind::Keyword(Keyword::Def) => Some(self.parse_def(false, span)?),
            TokenKind::Keyword(Keyword::Class) => Some(self.parse_class()?),
            TokenKind::Keyword(Keyword::Async) => {
                self.advance();
                match self.peek() {
                    TokenKind::Keyword(Keyword::Def) => Some(self.parse_def(true, span)?),
                    TokenKind::Keyword(Keyword::For) => Some(self.parse_for(true, span)?),
                    TokenKind::Keyword(Keyword::With) => Some(self.parse_with(true, span)?),
                    _ => return self.unexpected("'def', 'for' or 'with' after 'async'"),
                }
            }
            TokenKind::Op(Op::At) => {
                return Err(Diagnostic::new(span, "decorators are not supported"));
            }
            _ => None,
        };
        match compound {
            Some(stmt) => Ok(vec![stmt]),
            None => self.parse_simple_line(),
        }
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested("blocks", Self::parse_suite)
    }

    fn parse_suite(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(Op::Colon)?;
        if !matches!(self.peek(), TokenKind::Newline) {
            return self.parse_simple_line();
        }
        self.advance();
        if !matches!(self.peek(), TokenKind::Indent) {
            return Err(Diagnostic::new(self.span(), "expected an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::EndOfFile => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let span = self.advance().span;
        let test = self.parse_namedexpr_test()?;
        let body = self.parse_block()?;
        let orelse = if self.at_kw(Keyword::Elif) {
            // elif chains are flat in source, so they do not count as nesting.
            vec![crate::stack::guarded(|| self.parse_if())?]
        } else if self.eat_kw(Keyword::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let span = self.advance().span;
        let test = self.parse_namedexpr_test()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_kw(Keyword::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            span,
        })
    }

    fn parse_for(&mut self, is_async: bool, span: Span) -> PResult<Stmt> {
        self.expect_kw(Keyword::For)?;
        let target = self.parse_target_list()?;
        validate_target(&target)?;
        self.expect_kw(Keyword::In)?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_kw(Keyword::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            },
            span,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let span = self.advance().span;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.at_kw(Keyword::Except) {
            let handler_span = self.advance().span;
            let mut kind = None;
            let mut name = None;
            if !self.at_op(Op::Colon) {
                kind = Some(self.parse_test()?);
                if self.eat_kw(Keyword::As) {
                    name = Some(self.expect_name()?.0);
                }
            }
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                span: handler_span,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw(Keyword::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw(Keyword::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(Diagnostic::new(
                span,
                "expected 'except' or 'finally' block",
            ));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            span,
        })
    }

    fn parse_with(&mut self, is_async: bool, span: Span) -> PResult<Stmt> {
        self.expect_kw(Keyword::With)?;
        let mut items = Vec::new();
        loop {
            let context = self.parse_test()?;
            let target = if self.eat_kw(Keyword::As) {
                let target = self.parse_bitor()?;
                validate_target(&target)?;
                Some(target)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::With {
                items,
                body,
                is_async,
            },
            span,
        })
    }

    fn parse_def(&mut self, is_async: bool, span: Span) -> PResult<Stmt> {
        self.expect_kw(Keyword::Def)?;
        let (name, _) = self.expect_name()?;
        self.expect_op(Op::LParen)?;
        let params = self.parse_parameters(Op::RParen, true)?;
        self.expect_op(Op::RParen)?;
        if self.eat_op(Op::Arrow) {
            self.parse_test()?;
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(FunctionDef {
                name,
                params,
                body,
                is_async,
            }),
            span,
        })
    }

    fn parse_class(&mut self) -> PResult<Stmt> {
        let span = self.advance().span;
        let (name, _) = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op(Op::LParen) {
            let (args, _) = self.parse_arguments()?;
            bases = args;
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::ClassDef { name, bases, body },
            span,
        })
    }

    /// Parameter list up to (not including) `closing`.
    fn parse_parameters(&mut self, closing: Op, annotations: bool) -> PResult<Parameters> {
        let mut params = Parameters::default();
        let mut after_star = false;
        while !self.at_op(closing) {
            let span = self.span();
            if self.eat_op(Op::Star) {
                after_star = true;
                if self.at_op(Op::Comma) || self.at_op(closing) {
                    params.bare_star = true;
                } else {
                    let (name, _) = self.expect_name()?;
                    self.skip_annotation(annotations)?;
                    params.vararg = Some(Param {
                        name,
                        default: None,
                        span,
                    });
                }
            } else if self.eat_op(Op::DoubleStar) {
                let (name, _) = self.expect_name()?;
                self.skip_annotation(annotations)?;
                params.kwarg = Some(Param {
                    name,
                    default: None,
                    span,
                });
            } else if self.at_op(Op::Slash) {
                return Err(Diagnostic::new(
                    span,
                    "positional-only parameter markers are not supported",
                ));
            } else {
                let (name, _) = self.expect_name()?;
                self.skip_annotation(annotations)?;
                let default = if self.eat_op(Op::Assign) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                let param = Param {
                    name,
                    default,
                    span,
                };
                if after_star {
                    params.kwonly.push(param);
                } else {
                    params.args.push(param);
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn skip_annotation(&mut self, annotations: bool) -> PResult<()> {
        if annotations && self.eat_op(Op::Colon) {
            self.parse_test()?;
        }
        Ok(())
    }

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.eat_op(Op::Semicolon) {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::EndOfFile) {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> PResult<Stmt> {
        let span = self.span();
        let kind = match self.peek().clone() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.starts_expr() {
                    Some(self.parse_testlist()?)
                } else {
                    None
                };
                StmtKind::Return(value)
            }
            TokenKind::Keyword(Keyword::Del) => {
                self.advance();
                let mut targets = vec![self.parse_bitor()?];
                while self.eat_op(Op::Comma) {
                    if !self.starts_expr() {
                        break;
                    }
                    targets.push(self.parse_bitor()?);
                }
                for target in &targets {
                    validate_del_target(target)?;
                }
                StmtKind::Delete(targets)
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                let mut exc = None;
                let mut cause = None;
                if self.starts_expr() {
                    exc = Some(self.parse_test()?);
                    if self.eat_kw(Keyword::From) {
                        cause = Some(self.parse_test()?);
                    }
                }
                StmtKind::Raise { exc, cause }
            }
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            TokenKind::Keyword(Keyword::Nonlocal) => {
                self.advance();
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            TokenKind::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_op(Op::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Keyword(Keyword::Import) => {
                self.advance();
                let mut names = vec![self.parse_dotted_alias()?];
                while self.eat_op(Op::Comma) {
                    names.push(self.parse_dotted_alias()?);
                }
                StmtKind::Import(names)
            }
            TokenKind::Keyword(Keyword::From) => {
                self.advance();
                let mut module = String::new();
                while self.at_op(Op::Dot) || self.at_op(Op::Ellipsis) {
                    let dots = if self.at_op(Op::Dot) { "." } else { "..." };
                    module.push_str(dots);
                    self.advance();
                }
                if !self.at_kw(Keyword::Import) {
                    module.push_str(&self.parse_dotted_name()?);
                }
                self.expect_kw(Keyword::Import)?;
                let mut names = Vec::new();
                if self.eat_op(Op::Star) {
                    names.push("*".to_string());
                } else {
                    let parens = self.eat_op(Op::LParen);
                    loop {
                        let (name, _) = self.expect_name()?;
                        if self.eat_kw(Keyword::As) {
                            self.expect_name()?;
                        }
                        names.push(name);
                        if !self.eat_op(Op::Comma) || (parens && self.at_op(Op::RParen)) {
                            break;
                        }
                    }
                    if parens {
                        self.expect_op(Op::RParen)?;
                    }
                }
                StmtKind::ImportFrom { module, names }
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, span })
    }

    fn parse_name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.expect_name()?.0];
        while self.eat_op(Op::Comma) {
            names.push(self.expect_name()?.0);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?.0;
        while self.eat_op(Op::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?.0);
        }
        Ok(name)
    }

    fn parse_dotted_alias(&mut self) -> PResult<String> {
        let name = self.parse_dotted_name()?;
        if self.eat_kw(Keyword::As) {
            self.expect_name()?;
        }
        Ok(name)
    }

    fn parse_expression_statement(&mut self) -> PResult<StmtKind> {
        let first = self.parse_yield_or_testlist_star()?;

        if let TokenKind::Op(op) = self.peek() {
            if let Some(bin) = augmented_op(*op) {
                self.advance();
                validate_target(&first)?;
                let value = self.parse_yield_or_testlist_star()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: bin,
                    value,
                });
            }
        }

        if self.eat_op(Op::Colon) {
            validate_target(&first)?;
            self.parse_test()?;
            let value = if self.eat_op(Op::Assign) {
                Some(self.parse_yield_or_testlist_star()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                value,
            });
        }

        if self.at_op(Op::Assign) {
            let mut chain = vec![first];
            while self.eat_op(Op::Assign) {
                chain.push(self.parse_yield_or_testlist_star()?);
            }
            let value = chain.pop().ok_or_else(|| Diagnostic::new(self.span(), "invalid syntax"))?;
            for target in &chain {
                validate_target(target)?;
            }
            return Ok(StmtKind::Assign {
                targets: chain,
                value,
            });
        }

        Ok(StmtKind::Expr(first))
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn parse_yield_or_testlist_star(&mut self) -> PResult<Expr> {
        if self.at_kw(Keyword::Yield) {
            self.parse_yield()
        } else {
            self.parse_testlist()
        }
    }

    fn parse_yield(&mut self) -> PResult<Expr> {
        let span = self.expect_kw(Keyword::Yield)?;
        if self.eat_kw(Keyword::From) {
            let value = self.parse_test()?;
            return Ok(Expr::new(ExprKind::YieldFrom(Box::new(value)), span));
        }
        let value = if self.starts_expr() {
            Some(Box::new(self.parse_testlist()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Yield(value), span))
    }

    /// Comma-separated expressions (stars allowed); a bare comma makes a tuple.
    fn parse_testlist(&mut self) -> PResult<Expr> {
        let span = self.span();
        let first = self.parse_test_or_star()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if !self.starts_expr() {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        Ok(Expr::new(ExprKind::Tuple(elts), span))
    }

    /// Targets of `for`: `or`-free expressions separated by commas.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let span = self.span();
        let first = self.parse_star_or_bitor()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if !self.starts_expr() {
                break;
            }
            elts.push(self.parse_star_or_bitor()?);
        }
        Ok(Expr::new(ExprKind::Tuple(elts), span))
    }

    fn parse_star_or_bitor(&mut self) -> PResult<Expr> {
        let span = self.span();
        if self.eat_op(Op::Star) {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), span));
        }
        self.parse_bitor()
    }

    fn parse_test_or_star(&mut self) -> PResult<Expr> {
        let span = self.span();
        if self.eat_op(Op::Star) {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), span));
        }
        self.parse_namedexpr_test()
    }

    fn parse_namedexpr_test(&mut self) -> PResult<Expr> {
        let span = self.span();
        let test = self.parse_test()?;
        if self.eat_op(Op::Walrus) {
            if !matches!(test.kind, ExprKind::Name(_)) {
                return Err(Diagnostic::new(
                    span,
                    "cannot use assignment expressions with this target",
                ));
            }
            let value = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::NamedExpr {
                    target: Box::new(test),
                    value: Box::new(value),
                },
                span,
            ));
        }
        Ok(test)
    }

    fn parse_test(&mut self) -> PResult<Expr> {
        self.nested("parentheses", Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        if self.at_kw(Keyword::Lambda) {
            return self.parse_lambda();
        }
        let span = self.span();
        let body = self.parse_or_test()?;
        if self.eat_kw(Keyword::If) {
            let test = self.parse_or_test()?;
            self.expect_kw(Keyword::Else)?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                span,
            ));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let span = self.expect_kw(Keyword::Lambda)?;
        let params = self.parse_parameters(Op::Colon, false)?;
        self.expect_op(Op::Colon)?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params: Box::new(params),
                body: Box::new(body),
            },
            span,
        ))
    }

    fn parse_or_test(&mut self) -> PResult<Expr> {
        let span = self.span();
        let first = self.parse_and_test()?;
        if !self.at_kw(Keyword::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Keyword::Or) {
            values.push(self.parse_and_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
            span,
        ))
    }

    fn parse_and_test(&mut self) -> PResult<Expr> {
        let span = self.span();
        let first = self.parse_not_test()?;
        if !self.at_kw(Keyword::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Keyword::And) {
            values.push(self.parse_not_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
            span,
        ))
    }

    fn parse_not_test(&mut self) -> PResult<Expr> {
        let span = self.span();
        if self.eat_kw(Keyword::Not) {
            let operand = self.nested("operators", Self::parse_not_test)?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek() {
            TokenKind::Op(Op::Lt) => CompareOp::Lt,
            TokenKind::Op(Op::Gt) => CompareOp::Gt,
            TokenKind::Op(Op::Le) => CompareOp::LtE,
            TokenKind::Op(Op::Ge) => CompareOp::GtE,
            TokenKind::Op(Op::EqEq) => CompareOp::Eq,
            TokenKind::Op(Op::NotEq) => CompareOp::NotEq,
            TokenKind::Keyword(Keyword::In) => CompareOp::In,
            TokenKind::Keyword(Keyword::Not)
                if matches!(self.peek_at(1), TokenKind::Keyword(Keyword::In)) =>
            {
                self.advance();
                CompareOp::NotIn
            }
            TokenKind::Keyword(Keyword::Is) => {
                if matches!(self.peek_at(1), TokenKind::Keyword(Keyword::Not)) {
                    self.advance();
                    CompareOp::IsNot
                } else {
                    CompareOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let span = self.span();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.compare_op() {
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            span,
        ))
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        table: &[(Op, BinaryOp)],
    ) -> PResult<Expr> {
        self.chained(|p| p.binary_chain(next, table))
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        table: &[(Op, BinaryOp)],
    ) -> PResult<Expr> {
        let span = self.span();
        let mut left = next(self)?;
        loop {
            let found = table.iter().find(|(op, _)| self.at_op(*op)).map(|(_, b)| *b);
            let Some(op) = found else { break };
            self.advance();
            self.deepen("operators")?;
            let right = next(self)?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_bitxor, &[(Op::Pipe, BinaryOp::BitOr)])
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_bitand, &[(Op::Caret, BinaryOp::BitXor)])
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.binary_level(Self::parse_shift, &[(Op::Amp, BinaryOp::BitAnd)])
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::parse_arith,
            &[(Op::LShift, BinaryOp::LShift), (Op::RShift, BinaryOp::RShift)],
        )
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::parse_term,
            &[(Op::Plus, BinaryOp::Add), (Op::Minus, BinaryOp::Sub)],
        )
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::parse_factor,
            &[
                (Op::Star, BinaryOp::Mult),
                (Op::Slash, BinaryOp::Div),
                (Op::DoubleSlash, BinaryOp::FloorDiv),
                (Op::Percent, BinaryOp::Mod),
                (Op::At, BinaryOp::MatMult),
            ],
        )
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let span = self.span();
        let op = match self.peek() {
            TokenKind::Op(Op::Minus) => Some(UnaryOp::USub),
            TokenKind::Op(Op::Plus) => Some(UnaryOp::UAdd),
            TokenKind::Op(Op::Tilde) => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.nested("operators", Self::parse_factor)?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let span = self.span();
        let base = if self.eat_kw(Keyword::Await) {
            let inner = self.parse_primary()?;
            Expr::new(ExprKind::Await(Box::new(inner)), span)
        } else {
            self.parse_primary()?
        };
        if self.eat_op(Op::DoubleStar) {
            let exponent = self.nested("operators", Self::parse_factor)?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: BinaryOp::Pow,
                    right: Box::new(exponent),
                },
                span,
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        self.chained(Self::parse_trailers)
    }

    fn parse_trailers(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            let span = expr.span;
            if matches!(self.peek(), TokenKind::Op(Op::LParen | Op::LBracket | Op::Dot)) {
                self.deepen("trailers")?;
            }
            if self.eat_op(Op::LParen) {
                let (args, keywords) = self.parse_arguments()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    span,
                );
            } else if self.eat_op(Op::LBracket) {
                let index = self.parse_subscript_list()?;
                self.expect_op(Op::RBracket)?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.eat_op(Op::Dot) {
                let (attr, _) = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Call arguments after the opening parenthesis, consuming the closing one.
    fn parse_arguments(&mut self) -> PResult<(Vec<Expr>, Vec<KeywordArg>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.at_op(Op::RParen) {
            let span = self.span();
            if self.eat_op(Op::Star) {
                let inner = self.parse_test()?;
                args.push(Expr::new(ExprKind::Starred(Box::new(inner)), span));
            } else if self.eat_op(Op::DoubleStar) {
                let value = self.parse_test()?;
                keywords.push(KeywordArg {
                    arg: None,
                    value,
                    span,
                });
            } else if matches!(self.peek(), TokenKind::Name(_))
                && matches!(self.peek_at(1), TokenKind::Op(Op::Assign))
            {
                let (name, _) = self.expect_name()?;
                self.advance();
                let value = self.parse_test()?;
                keywords.push(KeywordArg {
                    arg: Some(name),
                    value,
                    span,
                });
            } else {
                let value = self.parse_namedexpr_test()?;
                if self.at_kw(Keyword::For) || self.at_kw(Keyword::Async) {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(value),
                            generators,
                        },
                        span,
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen)?;
        Ok((args, keywords))
    }

    fn parse_subscript_list(&mut self) -> PResult<Expr> {
        let span = self.span();
        let first = self.parse_subscript()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            elts.push(self.parse_subscript()?);
        }
        Ok(Expr::new(ExprKind::Tuple(elts), span))
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let span = self.span();
        let lower = if self.at_op(Op::Colon) {
            None
        } else {
            Some(self.parse_test_or_star()?)
        };
        if !self.eat_op(Op::Colon) {
            return lower.ok_or_else(|| Diagnostic::new(span, "invalid syntax"));
        }
        let ends = |p: &Self| p.at_op(Op::RBracket) || p.at_op(Op::Comma);
        let upper = if self.at_op(Op::Colon) || ends(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat_op(Op::Colon) && !ends(self) {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper,
                step,
            },
            span,
        ))
    }

    fn parse_comprehension_clauses(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        loop {
            self.eat_kw(Keyword::Async);
            if !self.eat_kw(Keyword::For) {
                break;
            }
            let target = self.parse_target_list()?;
            validate_target(&target)?;
            self.expect_kw(Keyword::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Keyword::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn at_comprehension(&self) -> bool {
        self.at_kw(Keyword::For) || self.at_kw(Keyword::Async)
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Name(name), span))
            }
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Int(v)), span))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Float(v)), span))
            }
            TokenKind::Str(_) | TokenKind::Bytes(_) => self.parse_string_literals(),
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::None), span))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Bool(true)), span))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Bool(false)), span))
            }
            TokenKind::Op(Op::Ellipsis) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Ellipsis), span))
            }
            TokenKind::Op(Op::LParen) => self.parse_paren(),
            TokenKind::Op(Op::LBracket) => self.parse_list_display(),
            TokenKind::Op(Op::LBrace) => self.parse_brace_display(),
            _ => self.unexpected("an expression"),
        }
    }

    fn parse_string_literals(&mut self) -> PResult<Expr> {
        let span = self.span();
        let mut text: Option<String> = None;
        let mut bytes: Option<Vec<u8>> = None;
        loop {
            match self.peek().clone() {
                TokenKind::Str(s) => {
                    if bytes.is_some() {
                        return Err(Diagnostic::new(
                            self.span(),
                            "cannot mix bytes and nonbytes literals",
                        ));
                    }
                    text.get_or_insert_with(String::new).push_str(&s);
                }
                TokenKind::Bytes(b) => {
                    if text.is_some() {
                        return Err(Diagnostic::new(
                            self.span(),
                            "cannot mix bytes and nonbytes literals",
                        ));
                    }
                    bytes.get_or_insert_with(Vec::new).extend_from_slice(&b);
                }
                _ => break,
            }
            self.advance();
        }
        let constant = match (text, bytes) {
            (Some(s), _) => Constant::Str(s),
            (None, Some(b)) => Constant::Bytes(b),
            (None, None) => return self.unexpected("a string"),
        };
        Ok(Expr::new(ExprKind::Constant(constant), span))
    }

    fn parse_paren(&mut self) -> PResult<Expr> {
        let span = self.expect_op(Op::LParen)?;
        if self.eat_op(Op::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
        }
        if self.at_kw(Keyword::Yield) {
            let expr = self.parse_yield()?;
            self.expect_op(Op::RParen)?;
            return Ok(expr);
        }
        let first = self.parse_test_or_star()?;
        if self.at_comprehension() {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op(Op::RParen)?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                span,
            ));
        }
        if !self.at_op(Op::Comma) {
            self.expect_op(Op::RParen)?;
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RParen) {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        self.expect_op(Op::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(elts), span))
    }

    fn parse_list_display(&mut self) -> PResult<Expr> {
        let span = self.expect_op(Op::LBracket)?;
        if self.eat_op(Op::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), span));
        }
        let first = self.parse_test_or_star()?;
        if self.at_comprehension() {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op(Op::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    elt: Box::new(first),
                    generators,
                },
                span,
            ));
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        self.expect_op(Op::RBracket)?;
        Ok(Expr::new(ExprKind::List(elts), span))
    }

    fn parse_brace_display(&mut self) -> PResult<Expr> {
        let span = self.expect_op(Op::LBrace)?;
        if self.eat_op(Op::RBrace) {
            return Ok(Expr::new(
                ExprKind::Dict {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                span,
            ));
        }

        let is_dict = self.at_op(Op::DoubleStar);
        let first_key = if is_dict {
            None
        } else {
            Some(self.parse_test_or_star()?)
        };

        if is_dict || self.at_op(Op::Colon) {
            let mut keys = Vec::new();
            let mut values = Vec::new();
            match first_key {
                None => {
                    self.expect_op(Op::DoubleStar)?;
                    keys.push(None);
                    values.push(self.parse_bitor()?);
                }
                Some(key) => {
                    self.expect_op(Op::Colon)?;
                    let value = self.parse_test()?;
                    if self.at_comprehension() {
                        let generators = self.parse_comprehension_clauses()?;
                        self.expect_op(Op::RBrace)?;
                        return Ok(Expr::new(
                            ExprKind::DictComp {
                                key: Box::new(key),
                                value: Box::new(value),
                                generators,
                            },
                            span,
                        ));
                    }
                    keys.push(Some(key));
                    values.push(value);
                }
            }
            while self.eat_op(Op::Comma) {
                if self.at_op(Op::RBrace) {
                    break;
                }
                if self.eat_op(Op::DoubleStar) {
                    keys.push(None);
                    values.push(self.parse_bitor()?);
                } else {
                    keys.push(Some(self.parse_test()?));
                    self.expect_op(Op::Colon)?;
                    values.push(self.parse_test()?);
                }
            }
            self.expect_op(Op::RBrace)?;
            return Ok(Expr::new(ExprKind::Dict { keys, values }, span));
        }

        let first = first_key.ok_or_else(|| Diagnostic::new(span, "invalid syntax"))?;
        if self.at_comprehension() {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op(Op::RBrace)?;
            return Ok(Expr::new(
                ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                },
                span,
            ));
        }
        let mut elts = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBrace) {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        self.expect_op(Op::RBrace)?;
        Ok(Expr::new(ExprKind::Set(elts), span))
    }
}

fn augmented_op(op: Op) -> Option<BinaryOp> {
    let bin = match op {
        Op::PlusEq => BinaryOp::Add,
        Op::MinusEq => BinaryOp::Sub,
        Op::StarEq => BinaryOp::Mult,
        Op::AtEq => BinaryOp::MatMult,
        Op::SlashEq => BinaryOp::Div,
        Op::DoubleSlashEq => BinaryOp::FloorDiv,
        Op::PercentEq => BinaryOp::Mod,
        Op::DoubleStarEq => BinaryOp::Pow,
        Op::LShiftEq => BinaryOp::LShift,
        Op::RShiftEq => BinaryOp::RShift,
        Op::PipeEq => BinaryOp::BitOr,
        Op::CaretEq => BinaryOp::BitXor,
        Op::AmpEq => BinaryOp::BitAnd,
        _ => return None,
    };
    Some(bin)
}

fn describe_expr(expr: &Expr) -> &'static str {
    match &expr.kind {
        ExprKind::Call { .. } => "function call",
        ExprKind::Constant(_) => "literal",
        ExprKind::BoolOp { .. } | ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. } => {
            "expression"
        }
        ExprKind::Compare { .. } => "comparison",
        ExprKind::Lambda { .. } => "lambda",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::Dict { .. } => "dict literal",
        ExprKind::Set(_) => "set display",
        ExprKind::ListComp { .. }
        | ExprKind::SetComp { .. }
        | ExprKind::DictComp { .. }
        | ExprKind::GeneratorExp { .. } => "comprehension",
        ExprKind::NamedExpr { .. } => "named expression",
        ExprKind::Await(_) => "await expression",
        ExprKind::Yield(_) | ExprKind::YieldFrom(_) => "yield expression",
        ExprKind::Slice { .. } => "slice",
        _ => "expression",
    }
}

fn validate_target(expr: &Expr) -> PResult<()> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Starred(inner) => validate_target(inner),
        ExprKind::Tuple(elts) | ExprKind::List(elts) => elts.iter().try_for_each(validate_target),
        _ => Err(Diagnostic::new(
            expr.span,
            format!("cannot assign to {}", describe_expr(expr)),
        )),
    }
}

fn validate_del_target(expr: &Expr) -> PResult<()> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(elts) | ExprKind::List(elts) => {
            elts.iter().try_for_each(validate_del_target)
        }
        _ => Err(Diagnostic::new(
            expr.span,
            format!("cannot delete {}", describe_expr(expr)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(src: &str) -> Vec<Stmt> {
        parse(src).unwrap().body
    }

    #[test]
    fn test_parse_function_with_defaults() {
        let body = body_of("def add(a, b=2):\n    return a + b\n");
        match &body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "add");
                assert_eq!(def.params.args.len(), 2);
                assert!(def.params.args[1].default.is_some());
                assert_eq!(def.body.len(), 1);
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let body = body_of("x = 1 + 2 * 3\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        match &value.kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    right.kind,
                    ExprKind::BinOp {
                        op: BinaryOp::Mult,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let body = body_of("x = -2 ** 2\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(
            value.kind,
            ExprKind::UnaryOp {
                op: UnaryOp::USub,
                ..
            }
        ));
    }

    #[test]
    fn test_chained_assignment_keeps_all_targets() {
        let body = body_of("a = b = 10\n");
        match &body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chained_comparison() {
        let body = body_of("x = 1 < y <= 3\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        match &value.kind {
            ExprKind::Compare { ops, .. } => assert_eq!(ops, &[CompareOp::Lt, CompareOp::LtE]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejected_constructs_still_parse() {
        let src = "lambda x: x\n\
                   [x for x in y]\n\
                   {k: v for k, v in z}\n\
                   class A:\n    pass\n\
                   global q\n\
                   a += 1\n\
                   f(*args, **kw)\n\
                   (n := 3)\n";
        assert_eq!(parse(src).unwrap().body.len(), 8);
    }

    #[test]
    fn test_slices_and_tuple_index() {
        let body = body_of("x = a[1:2, ::3]\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        let ExprKind::Subscript { index, .. } = &value.kind else {
            panic!("expected subscript");
        };
        assert!(matches!(&index.kind, ExprKind::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn test_cannot_assign_to_call() {
        let err = parse("f() = 1\n").unwrap_err();
        assert!(err.message.contains("cannot assign to function call"));
    }

    #[test]
    fn test_try_requires_handler() {
        let err = parse("try:\n    pass\nx = 1\n").unwrap_err();
        assert!(err.message.contains("except"));
    }

    #[test]
    fn test_string_concatenation() {
        let body = body_of("x = 'a' \"b\"\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        assert_eq!(value.kind, ExprKind::Constant(Constant::Str("ab".into())));
    }

    #[test]
    fn test_else_if_chain() {
        let body = body_of("if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n");
        let StmtKind::If { orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_nesting_limit_on_brackets() {
        let ok = format!("x = {}1{}\n", "(".repeat(150), ")".repeat(150));
        assert!(parse(&ok).is_ok());

        let deep = format!("x = {}1{}\n", "[".repeat(250), "]".repeat(250));
        let err = parse(&deep).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");
    }

    #[test]
    fn test_nesting_limit_on_operator_chains() {
        let ok = format!("x = 1{}\n", " + 1".repeat(150));
        assert!(parse(&ok).is_ok());

        let long = format!("x = 1{}\n", " + 1".repeat(400));
        assert_eq!(parse(&long).unwrap_err().message, "too many nested operators");
        let unary = format!("x = {}1\n", "-".repeat(400));
        assert_eq!(parse(&unary).unwrap_err().message, "too many nested operators");
        let calls = format!("x = f{}\n", "()".repeat(400));
        assert_eq!(parse(&calls).unwrap_err().message, "too many nested trailers");
    }

    #[test]
    fn test_nesting_depth_resets_between_statements() {
        let line = format!("x = {}1{}\n", "(".repeat(120), ")".repeat(120));
        let mut src = String::from("def f():\n");
        for _ in 0..5 {
            src.push_str("    ");
            src.push_str(&line);
        }
        assert!(parse(&src).is_ok());
    }

    #[test]
    fn test_long_elif_chain_is_not_nesting() {
        let mut src = String::from("if a == 0:\n    pass\n");
        for i in 1..400 {
            src.push_str(&format!("elif a == {i}:\n    pass\n"));
        }
        assert!(parse(&src).is_ok());
    }

    #[test]
    fn test_deeply_indented_blocks_are_rejected() {
        let mut src = String::new();
        for level in 0..250 {
            src.push_str(&" ".repeat(level));
            src.push_str("if a:\n");
        }
        src.push_str(&" ".repeat(250));
        src.push_str("pass\n");
        let err = parse(&src).unwrap_err();
        assert!(err.message.starts_with("too many nested"), "{err:?}");
        assert!(err.span.line > 190);
    }
}
