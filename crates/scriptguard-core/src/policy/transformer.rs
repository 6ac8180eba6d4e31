//! The policy transformer: validates a parsed program and rewrites it into
//! the guarded IR in one pass.
//!
//! Errors are collected rather than returned early, so a script with several
//! violations reports all of them at once. A non-empty list fails the whole
//! compile.

use tracing::debug;

use super::guarded::{
    DeleteTarget, Expr, ExprKind, GuardedFunction, GuardedModule, GuardedParam, Handler,
    OperandCheck, Stmt, StmtKind, Target, WriteOp,
};
use super::names::is_privileged;
use crate::config::PolicyConfig;
use crate::syntax::ast;
use crate::syntax::{Diagnostic, Span};

/// Validate `module` and rewrite it into guarded form.
///
/// # Errors
///
/// Returns every policy diagnostic found, ordered by source position.
pub fn transform(
    module: &ast::Module,
    config: &PolicyConfig,
) -> Result<GuardedModule, Vec<Diagnostic>> {
    let mut transformer = PolicyTransformer::new(config);
    let guarded = transformer.module(module);
    let mut diagnostics = transformer.diagnostics;
    if diagnostics.is_empty() {
        debug!(functions = guarded.functions.len(), "policy transform passed");
        Ok(guarded)
    } else {
        diagnostics.sort_by_key(|d| d.span);
        debug!(diagnostics = diagnostics.len(), "policy transform rejected");
        Err(diagnostics)
    }
}

struct PolicyTransformer<'a> {
    config: &'a PolicyConfig,
    diagnostics: Vec<Diagnostic>,
}

fn placeholder(span: Span) -> Expr {
    Expr::new(ExprKind::Constant(ast::Constant::None), span)
}

impl<'a> PolicyTransformer<'a> {
    fn new(config: &'a PolicyConfig) -> Self {
        Self {
            config,
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(span, message));
    }

    fn not_allowed(&mut self, span: Span, construct: &str) {
        self.error(span, format!("{construct} statements are not allowed."));
    }

    fn check_name(&mut self, span: Span, name: &str) {
        if is_privileged(name) {
            self.error(
                span,
                format!(
                    "\"{name}\" is an invalid variable name because it starts or ends with \"_\""
                ),
            );
        }
    }

    fn check_attribute_name(&mut self, span: Span, name: &str) {
        if is_privileged(name) {
            self.error(
                span,
                format!(
                    "\"{name}\" is an invalid attribute name because it starts or ends with \"_\""
                ),
            );
        }
    }

    // ---------------------------------------------------------------------
    // Module and functions
    // ---------------------------------------------------------------------

    fn module(&mut self, module: &ast::Module) -> GuardedModule {
        let mut functions = Vec::new();
        for stmt in &module.body {
            match &stmt.kind {
                ast::StmtKind::FunctionDef(def) => {
                    if let Some(function) = self.function(def, stmt.span) {
                        functions.push(function);
                    }
                }
                ast::StmtKind::ClassDef { .. } => self.not_allowed(stmt.span, "ClassDef"),
                _ => self.error(
                    stmt.span,
                    "Only function definitions are allowed at module level.",
                ),
            }
        }
        GuardedModule { functions }
    }

    fn function(&mut self, def: &ast::FunctionDef, span: Span) -> Option<GuardedFunction> {
        if def.is_async {
            self.not_allowed(span, "AsyncFunctionDef");
        }
        self.check_name(span, &def.name);
        let params = self.parameters(&def.params, span);
        let body = self.block(&def.body);
        if def.is_async {
            return None;
        }
        Some(GuardedFunction {
            name: def.name.clone(),
            params,
            body,
            span,
        })
    }

    fn parameters(&mut self, params: &ast::Parameters, span: Span) -> Vec<GuardedParam> {
        if let Some(vararg) = &params.vararg {
            self.error(vararg.span, "*args is not allowed.");
        }
        if let Some(kwarg) = &params.kwarg {
            self.error(kwarg.span, "**kwargs is not allowed.");
        }
        if params.bare_star || !params.kwonly.is_empty() {
            self.error(span, "Keyword-only parameters are not allowed.");
        }
        params
            .args
            .iter()
            .map(|param| {
                self.check_name(param.span, &param.name);
                GuardedParam {
                    name: param.name.clone(),
                    default: param.default.as_ref().map(|d| self.expr(d)),
                    span: param.span,
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn block(&mut self, stmts: &[ast::Stmt]) -> Vec<Stmt> {
        stmts.iter().filter_map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, stmt: &ast::Stmt) -> Option<Stmt> {
        crate::stack::guarded(|| self.transform_stmt(stmt))
    }

    fn transform_stmt(&mut self, stmt: &ast::Stmt) -> Option<Stmt> {
        let span = stmt.span;
        let kind = match &stmt.kind {
            ast::StmtKind::FunctionDef(_) => {
                self.error(span, "Nested function definitions are not allowed.");
                return None;
            }
            ast::StmtKind::ClassDef { .. } => {
                self.not_allowed(span, "ClassDef");
                return None;
            }
            ast::StmtKind::Return(value) => StmtKind::Return(value.as_ref().map(|v| self.expr(v))),
            ast::StmtKind::Delete(targets) => {
                if targets.len() != 1 {
                    self.error(
                        span,
                        "Deleting multiple targets in one statement is not allowed.",
                    );
                    return None;
                }
                StmtKind::Delete(self.delete_target(&targets[0])?)
            }
            ast::StmtKind::Assign { targets, value } => {
                if targets.len() != 1 {
                    self.error(span, "Multiple assignment targets are not allowed.");
                }
                let value = self.expr(value);
                let target = self.target(&targets[0]);
                StmtKind::Assign { target, value }
            }
            ast::StmtKind::AugAssign { .. } => {
                self.not_allowed(span, "AugAssign");
                return None;
            }
            ast::StmtKind::AnnAssign { target, value } => {
                let target = self.target(target);
                match value {
                    Some(value) => StmtKind::Assign {
                        target,
                        value: self.expr(value),
                    },
                    None => StmtKind::Pass,
                }
            }
            ast::StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async {
                    self.not_allowed(span, "AsyncFor");
                }
                StmtKind::For {
                    target: self.target(target),
                    iter: self.expr(iter),
                    body: self.block(body),
                    orelse: self.block(orelse),
                }
            }
            ast::StmtKind::While { test, body, orelse } => StmtKind::While {
                test: self.expr(test),
                body: self.block(body),
                orelse: self.block(orelse),
            },
            ast::StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.expr(test),
                body: self.block(body),
                orelse: self.block(orelse),
            },
            ast::StmtKind::With {
                items,
                body,
                is_async,
            } => {
                if *is_async {
                    self.not_allowed(span, "AsyncWith");
                }
                if items.len() != 1 {
                    self.error(
                        span,
                        "Multiple context managers in one with statement are not allowed.",
                    );
                }
                let item = &items[0];
                StmtKind::With {
                    context: self.expr(&item.context),
                    target: item.target.as_ref().map(|t| self.target(t)),
                    body: self.block(body),
                }
            }
            ast::StmtKind::Raise { exc, cause } => StmtKind::Raise {
                exc: exc.as_ref().map(|e| self.expr(e)),
                cause: cause.as_ref().map(|e| self.expr(e)),
            },
            ast::StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => StmtKind::Try {
                body: self.block(body),
                handlers: handlers.iter().map(|h| self.handler(h)).collect(),
                orelse: self.block(orelse),
                finalbody: self.block(finalbody),
            },
            ast::StmtKind::Assert { test, msg } => StmtKind::Assert {
                test: self.expr(test),
                msg: msg.as_ref().map(|m| self.expr(m)),
            },
            ast::StmtKind::Import(_) => {
                self.not_allowed(span, "Import");
                return None;
            }
            ast::StmtKind::ImportFrom { .. } => {
                self.not_allowed(span, "ImportFrom");
                return None;
            }
            ast::StmtKind::Global(_) => {
                self.not_allowed(span, "Global");
                return None;
            }
            ast::StmtKind::Nonlocal(_) => {
                self.not_allowed(span, "Nonlocal");
                return None;
            }
            ast::StmtKind::Expr(value) => StmtKind::Expr(self.expr(value)),
            ast::StmtKind::Pass => StmtKind::Pass,
            ast::StmtKind::Break => StmtKind::Break,
            ast::StmtKind::Continue => StmtKind::Continue,
        };
        Some(Stmt { kind, span })
    }

    fn handler(&mut self, handler: &ast::ExceptHandler) -> Handler {
        if let Some(name) = &handler.name {
            self.check_name(handler.span, name);
        }
        Handler {
            kind: handler.kind.as_ref().map(|k| self.expr(k)),
            name: handler.name.clone(),
            body: self.block(&handler.body),
            span: handler.span,
        }
    }

    fn target(&mut self, expr: &ast::Expr) -> Target {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::Name(name) => {
                self.check_name(span, name);
                Target::Name(name.clone())
            }
            ast::ExprKind::Attribute { value, attr } => {
                self.check_attribute_name(span, attr);
                Target::Attr {
                    object: self.write_guarded(value, WriteOp::SetAttr),
                    name: attr.clone(),
                }
            }
            ast::ExprKind::Subscript { value, index } => Target::Item {
                object: self.write_guarded(value, WriteOp::SetItem),
                index: self.expr(index),
            },
            ast::ExprKind::Tuple(items) | ast::ExprKind::List(items) => {
                Target::Unpack(items.iter().map(|item| self.target(item)).collect())
            }
            ast::ExprKind::Starred(_) => {
                self.not_allowed(span, "Starred");
                Target::Unpack(Vec::new())
            }
            _ => {
                self.error(span, "Invalid assignment target.");
                Target::Unpack(Vec::new())
            }
        }
    }

    fn delete_target(&mut self, expr: &ast::Expr) -> Option<DeleteTarget> {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::Name(_) => {
                self.error(span, "Deleting local variables is not allowed.");
                None
            }
            ast::ExprKind::Attribute { value, attr } => {
                self.check_attribute_name(span, attr);
                Some(DeleteTarget::Attr {
                    object: self.write_guarded(value, WriteOp::DelAttr),
                    name: attr.clone(),
                })
            }
            ast::ExprKind::Subscript { value, index } => Some(DeleteTarget::Item {
                object: self.write_guarded(value, WriteOp::DelItem),
                index: self.expr(index),
            }),
            ast::ExprKind::Tuple(_) | ast::ExprKind::List(_) => {
                self.error(
                    span,
                    "Deleting multiple targets in one statement is not allowed.",
                );
                None
            }
            _ => {
                self.error(span, "Invalid deletion target.");
                None
            }
        }
    }

    fn write_guarded(&mut self, object: &ast::Expr, op: WriteOp) -> Expr {
        let object = self.expr(object);
        let span = object.span;
        Expr::new(
            ExprKind::WriteGuard {
                object: Box::new(object),
                op,
            },
            span,
        )
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn exprs(&mut self, exprs: &[ast::Expr]) -> Vec<Expr> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&mut self, expr: &ast::Expr) -> Box<Expr> {
        Box::new(self.expr(expr))
    }

    fn checked(&mut self, expr: &ast::Expr, check: OperandCheck) -> Expr {
        self.expr(expr).checked(check)
    }

    fn expr(&mut self, expr: &ast::Expr) -> Expr {
        crate::stack::guarded(|| self.transform_expr(expr))
    }

    fn transform_expr(&mut self, expr: &ast::Expr) -> Expr {
        let span = expr.span;
        let kind = match &expr.kind {
            ast::ExprKind::Constant(ast::Constant::Ellipsis) => {
                self.not_allowed(span, "Ellipsis");
                return placeholder(span);
            }
            ast::ExprKind::Constant(c) => ExprKind::Constant(c.clone()),
            ast::ExprKind::Name(name) => {
                self.check_name(span, name);
                ExprKind::Name(name.clone())
            }
            ast::ExprKind::Attribute { value, attr } => {
                self.check_attribute_name(span, attr);
                ExprKind::GetAttr {
                    object: self.boxed(value),
                    name: attr.clone(),
                }
            }
            ast::ExprKind::Subscript { value, index } => ExprKind::GetItem {
                object: self.boxed(value),
                index: self.boxed(index),
            },
            ast::ExprKind::Slice { lower, upper, step } => ExprKind::Slice {
                lower: lower.as_deref().map(|e| self.boxed(e)),
                upper: upper.as_deref().map(|e| self.boxed(e)),
                step: step.as_deref().map(|e| self.boxed(e)),
            },
            ast::ExprKind::BinOp { left, op, right } => {
                let left = self.checked(left, OperandCheck::Binary);
                let right = self.checked(right, OperandCheck::Binary);
                let binary = Expr::new(
                    ExprKind::Binary {
                        left: Box::new(left),
                        op: *op,
                        right: Box::new(right),
                    },
                    span,
                );
                return binary.checked(OperandCheck::Binary);
            }
            ast::ExprKind::UnaryOp { op, operand } => {
                let operand = self.checked(operand, OperandCheck::Unary);
                let unary = Expr::new(
                    ExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    span,
                );
                return unary.checked(OperandCheck::Unary);
            }
            ast::ExprKind::BoolOp { op, values } => {
                let values = values
                    .iter()
                    .map(|v| self.checked(v, OperandCheck::Bool))
                    .collect();
                let boolop = Expr::new(ExprKind::BoolOp { op: *op, values }, span);
                return boolop.checked(OperandCheck::Bool);
            }
            ast::ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let left = self.checked(left, OperandCheck::Compare);
                let comparators = comparators
                    .iter()
                    .map(|c| self.checked(c, OperandCheck::Compare))
                    .collect();
                let compare = Expr::new(
                    ExprKind::Compare {
                        left: Box::new(left),
                        ops: ops.clone(),
                        comparators,
                    },
                    span,
                );
                return compare.checked(OperandCheck::Compare);
            }
            ast::ExprKind::IfExp { test, body, orelse } => ExprKind::IfExp {
                test: self.boxed(test),
                body: self.boxed(body),
                orelse: self.boxed(orelse),
            },
            ast::ExprKind::Call {
                func,
                args,
                keywords,
            } => self.call(func, args, keywords, span),
            ast::ExprKind::List(items) => ExprKind::List(self.display_items(items)),
            ast::ExprKind::Tuple(items) => ExprKind::Tuple(self.display_items(items)),
            ast::ExprKind::Set(items) => ExprKind::Set(self.display_items(items)),
            ast::ExprKind::Dict { keys, values } => {
                let mut pairs = Vec::with_capacity(values.len());
                for (key, value) in keys.iter().zip(values) {
                    match key {
                        Some(key) => {
                            let key = self.expr(key);
                            pairs.push((key, self.expr(value)));
                        }
                        None => self.error(value.span, "Dict unpacking is not allowed."),
                    }
                }
                ExprKind::Dict(pairs)
            }
            ast::ExprKind::Starred(_) => {
                self.not_allowed(span, "Starred");
                return placeholder(span);
            }
            ast::ExprKind::NamedExpr { .. } => {
                self.not_allowed(span, "NamedExpr");
                return placeholder(span);
            }
            ast::ExprKind::Lambda { .. } => {
                self.not_allowed(span, "Lambda");
                return placeholder(span);
            }
            ast::ExprKind::ListComp { .. } => {
                self.not_allowed(span, "ListComp");
                return placeholder(span);
            }
            ast::ExprKind::SetComp { .. } => {
                self.not_allowed(span, "SetComp");
                return placeholder(span);
            }
            ast::ExprKind::DictComp { .. } => {
                self.not_allowed(span, "DictComp");
                return placeholder(span);
            }
            ast::ExprKind::GeneratorExp { .. } => {
                self.not_allowed(span, "GeneratorExp");
                return placeholder(span);
            }
            ast::ExprKind::Await(_) => {
                self.not_allowed(span, "Await");
                return placeholder(span);
            }
            ast::ExprKind::Yield(_) => {
                self.not_allowed(span, "Yield");
                return placeholder(span);
            }
            ast::ExprKind::YieldFrom(_) => {
                self.not_allowed(span, "YieldFrom");
                return placeholder(span);
            }
        };
        Expr::new(kind, span)
    }

    fn display_items(&mut self, items: &[ast::Expr]) -> Vec<Expr> {
        self.exprs(items)
    }

    fn call(
        &mut self,
        func: &ast::Expr,
        args: &[ast::Expr],
        keywords: &[ast::Keyword],
        span: Span,
    ) -> ExprKind {
        let func = match &func.kind {
            ast::ExprKind::Name(name) => {
                if self.config.is_denied_call(name) {
                    let mut label = name.clone();
                    if let Some(first) = label.get_mut(0..1) {
                        first.make_ascii_uppercase();
                    }
                    self.error(span, format!("{label} calls are not allowed."));
                }
                if !self.config.is_statement_marker(name) {
                    self.check_name(func.span, name);
                }
                Expr::new(ExprKind::Name(name.clone()), func.span)
            }
            _ => self.expr(func),
        };

        let args = self.exprs(args);
        let mut keyword_args = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            match &keyword.arg {
                Some(name) => {
                    self.check_name(keyword.span, name);
                    let value = self.expr(&keyword.value);
                    keyword_args.push((name.clone(), value));
                }
                None => self.error(keyword.span, "**kwargs is not allowed."),
            }
        }

        ExprKind::Call {
            func: Box::new(func),
            args,
            keywords: keyword_args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse;

    fn run(src: &str) -> Result<GuardedModule, Vec<Diagnostic>> {
        let module = parse(src).unwrap();
        transform(&module, &PolicyConfig::default())
    }

    fn in_function(body: &str) -> String {
        let indented: Vec<String> = body.lines().map(|l| format!("    {l}")).collect();
        format!("def myfunc():\n{}\n", indented.join("\n"))
    }

    fn messages(src: &str) -> Vec<String> {
        run(src)
            .unwrap_err()
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn test_simple_function_passes() {
        let guarded = run("def add(a, b):\n    return a + b\n").unwrap();
        assert_eq!(guarded.functions.len(), 1);
        assert_eq!(guarded.functions[0].params.len(), 2);
    }

    #[test]
    fn test_binary_operands_and_result_are_checked() {
        let guarded = run("def add(a, b):\n    return a + b\n").unwrap();
        let StmtKind::Return(Some(expr)) = &guarded.functions[0].body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Check { check, operand } = &expr.kind else {
            panic!("result not checked: {expr:?}");
        };
        assert_eq!(*check, OperandCheck::Binary);
        let ExprKind::Binary { left, right, .. } = &operand.kind else {
            panic!("expected binary");
        };
        assert!(matches!(
            left.kind,
            ExprKind::Check {
                check: OperandCheck::Binary,
                ..
            }
        ));
        assert!(matches!(
            right.kind,
            ExprKind::Check {
                check: OperandCheck::Binary,
                ..
            }
        ));
    }

    #[test]
    fn test_attribute_store_is_write_guarded() {
        let guarded = run(&in_function("obj.value = 1")).unwrap();
        let StmtKind::Assign { target, .. } = &guarded.functions[0].body[0].kind else {
            panic!("expected assign");
        };
        let Target::Attr { object, name } = target else {
            panic!("expected attribute target");
        };
        assert_eq!(name, "value");
        assert!(matches!(
            object.kind,
            ExprKind::WriteGuard {
                op: WriteOp::SetAttr,
                ..
            }
        ));
    }

    #[test]
    fn test_collects_every_violation() {
        let src = in_function("a = b = 10\nx = lambda y: y\nglobal q");
        let found = messages(&src);
        assert_eq!(found.len(), 3, "{found:?}");
    }

    #[test]
    fn test_top_level_statement_rejected() {
        let found = messages("x = 1\ndef f():\n    pass\n");
        assert_eq!(
            found,
            vec!["Only function definitions are allowed at module level.".to_string()]
        );
    }

    #[test]
    fn test_statement_markers_exempt_only_as_call_targets() {
        run(&in_function(
            "_begin_blockly_statement_('9472o92')\n_end_blockly_statement_('9472o92')",
        ))
        .unwrap();
        assert!(run(&in_function("_not_special_function()")).is_err());
        assert!(run(&in_function("x = _begin_blockly_statement_")).is_err());
    }

    #[test]
    fn test_denied_calls() {
        assert_eq!(
            messages(&in_function("exec(code)")),
            vec!["Exec calls are not allowed.".to_string()]
        );
        assert_eq!(
            messages(&in_function("eval('1')")),
            vec!["Eval calls are not allowed.".to_string()]
        );
    }

    #[test]
    fn test_matmul_permitted() {
        run(&in_function("b = 1\nc = 2\na = b @ c")).unwrap();
    }

    #[test]
    fn test_annotated_assignment_accepted() {
        let guarded = run(&in_function("x: int = 3")).unwrap();
        assert!(matches!(
            guarded.functions[0].body[0].kind,
            StmtKind::Assign { .. }
        ));
    }

    #[test]
    fn test_diagnostics_sorted_by_position() {
        let src = "def f():\n    y = [i for i in x]\n\nclass A:\n    pass\n";
        let diagnostics = run(src).unwrap_err();
        let lines: Vec<u32> = diagnostics.iter().map(|d| d.span.line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }
}
