//! Guarded IR to executable module.
//!
//! Resolves each function's local-variable set and rejects structural
//! errors the parser cannot see (`break` outside a loop, duplicate
//! parameters, defaults out of order).

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::policy::guarded::{Expr, GuardedFunction, GuardedModule, Stmt, StmtKind, Target};
use crate::syntax::{Diagnostic, Span};

/// A compiled script: its top-level functions, in definition order.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub filename: String,
    pub functions: Vec<Rc<CompiledFunction>>,
}

impl CompiledModule {
    /// The last definition of `name` wins, as at module level in the source.
    pub fn function(&self, name: &str) -> Option<&Rc<CompiledFunction>> {
        self.functions.iter().rev().find(|f| f.name == name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }
}

#[derive(Debug)]
pub struct CompiledFunction {
    pub name: String,
    pub params: Vec<String>,
    /// Defaults for the trailing `defaults.len()` parameters.
    pub defaults: Vec<Expr>,
    pub body: Vec<Stmt>,
    /// Every name bound anywhere in the body, parameters included.
    pub locals: BTreeSet<String>,
    pub span: Span,
}

impl CompiledFunction {
    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name)
    }

    /// Number of parameters without a default.
    pub fn required_params(&self) -> usize {
        self.params.len() - self.defaults.len()
    }
}

pub fn compile(module: GuardedModule, filename: &str) -> Result<CompiledModule, Diagnostic> {
    let functions = module
        .functions
        .into_iter()
        .map(|f| compile_function(f).map(Rc::new))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(
        filename,
        functions = functions.len(),
        "module compiled"
    );
    Ok(CompiledModule {
        filename: filename.to_string(),
        functions,
    })
}

fn compile_function(function: GuardedFunction) -> Result<CompiledFunction, Diagnostic> {
    let mut params = Vec::with_capacity(function.params.len());
    let mut defaults = Vec::new();
    let mut locals = BTreeSet::new();
    for param in function.params {
        if !locals.insert(param.name.clone()) {
            return Err(Diagnostic::new(
                param.span,
                format!(
                    "duplicate argument '{}' in function definition",
                    param.name
                ),
            ));
        }
        match param.default {
            Some(default) => defaults.push(default),
            None if !defaults.is_empty() => {
                return Err(Diagnostic::new(
                    param.span,
                    "non-default argument follows default argument",
                ))
            }
            None => {}
        }
        params.push(param.name);
    }
    check_block(&function.body, false)?;
    collect_locals(&function.body, &mut locals);
    Ok(CompiledFunction {
        name: function.name,
        params,
        defaults,
        body: function.body,
        locals,
        span: function.span,
    })
}

fn check_block(body: &[Stmt], in_loop: bool) -> Result<(), Diagnostic> {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Break if !in_loop => {
                return Err(Diagnostic::new(stmt.span, "'break' outside loop"))
            }
            StmtKind::Continue if !in_loop => {
                return Err(Diagnostic::new(
                    stmt.span,
                    "'continue' not properly in loop",
                ))
            }
            StmtKind::If { body, orelse, .. } => {
                check_block(body, in_loop)?;
                check_block(orelse, in_loop)?;
            }
            StmtKind::While { body, orelse, .. } | StmtKind::For { body, orelse, .. } => {
                check_block(body, true)?;
                check_block(orelse, in_loop)?;
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                check_block(body, in_loop)?;
                for handler in handlers {
                    check_block(&handler.body, in_loop)?;
                }
                check_block(orelse, in_loop)?;
                check_block(finalbody, in_loop)?;
            }
            StmtKind::With { body, .. } => check_block(body, in_loop)?,
            _ => {}
        }
    }
    Ok(())
}

fn collect_target(target: &Target, locals: &mut BTreeSet<String>) {
    match target {
        Target::Name(name) => {
            locals.insert(name.clone());
        }
        Target::Unpack(targets) => {
            for t in targets {
                collect_target(t, locals);
            }
        }
        Target::Attr { .. } | Target::Item { .. } => {}
    }
}

fn collect_locals(body: &[Stmt], locals: &mut BTreeSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { target, .. } => collect_target(target, locals),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                collect_target(target, locals);
                collect_locals(body, locals);
                collect_locals(orelse, locals);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_locals(body, locals);
                collect_locals(orelse, locals);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_locals(body, locals);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        locals.insert(name.clone());
                    }
                    collect_locals(&handler.body, locals);
                }
                collect_locals(orelse, locals);
                collect_locals(finalbody, locals);
            }
            StmtKind::With { target, body, .. } => {
                if let Some(target) = target {
                    collect_target(target, locals);
                }
                collect_locals(body, locals);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::policy::transform;
    use crate::syntax::parse;

    fn compile_source(source: &str) -> Result<CompiledModule, Diagnostic> {
        let module = parse(source).expect("parses");
        let guarded = transform(&module, &PolicyConfig::default()).expect("passes policy");
        compile(guarded, "<test>")
    }

    #[test]
    fn test_locals_cover_every_binding_site() {
        let module = compile_source(
            "def f(a, b=1):\n    x = a\n    for i, j in b:\n        pass\n    try:\n        pass\n    except ValueError as err:\n        pass\n    obj.attr = 3\n",
        )
        .unwrap();
        let f = module.function("f").unwrap();
        let locals: Vec<&str> = f.locals.iter().map(String::as_str).collect();
        assert_eq!(locals, ["a", "b", "err", "i", "j", "x"]);
        assert_eq!(f.required_params(), 1);
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        let err = compile_source("def f():\n    break\n").unwrap_err();
        assert_eq!(err.message, "'break' outside loop");
        assert_eq!(err.span.line, 2);
        assert!(compile_source("def f():\n    while True:\n        if x:\n            break\n").is_ok());
    }

    #[test]
    fn test_continue_in_loop_else_is_rejected() {
        let err = compile_source("def f():\n    for x in y:\n        pass\n    else:\n        continue\n")
            .unwrap_err();
        assert_eq!(err.message, "'continue' not properly in loop");
    }

    #[test]
    fn test_parameter_checks() {
        let err = compile_source("def f(a, a):\n    pass\n").unwrap_err();
        assert!(err.message.contains("duplicate argument 'a'"));
        let err = compile_source("def f(a=1, b):\n    pass\n").unwrap_err();
        assert_eq!(err.message, "non-default argument follows default argument");
    }

    #[test]
    fn test_redefinition_last_wins() {
        let module = compile_source("def f():\n    return 1\ndef f():\n    return 2\n").unwrap();
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.function_names().collect::<Vec<_>>(), ["f", "f"]);
        assert!(Rc::ptr_eq(module.function("f").unwrap(), &module.functions[1]));
    }
}
