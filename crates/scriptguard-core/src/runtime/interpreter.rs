//! Tree-walking evaluator for compiled modules.
//!
//! Every guarded node of the IR is routed through [`Guards`]; every name
//! binding goes through the [`NameGuard`]. Script exceptions unwind as
//! [`Unwind::Raise`] and can be caught; denials unwind as
//! [`Unwind::Denied`] and skip every handler and `finally` block.

use std::collections::HashMap;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::args::Args;
use super::builtins;
use super::exception::{ExceptionKind, Exec, ScriptException, Unwind};
use super::format::{repr, to_str};
use super::methods;
use super::ops;
use super::output::OutputCollector;
use super::table::{Dict, HashKey, SetTable};
use super::value::{ScriptFunction, SliceValue, Value};
use crate::compile::{CompiledFunction, CompiledModule};
use crate::guard::{Guards, NameGuard};
use crate::namespace::GuardedNamespace;
use crate::policy::guarded::{DeleteTarget, Expr, ExprKind, Handler, Stmt, StmtKind, Target};
use crate::syntax::ast::{BoolOp, Constant, UnaryOp};

/// How a block finished.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// One activation of a script function.
struct Frame {
    code: Option<Rc<CompiledFunction>>,
    locals: HashMap<String, Value>,
    /// Exceptions being handled, innermost last; bare `raise` re-raises it.
    handling: Vec<ScriptException>,
}

impl Frame {
    fn module() -> Self {
        Self {
            code: None,
            locals: HashMap::new(),
            handling: Vec::new(),
        }
    }

    fn function(code: Rc<CompiledFunction>, locals: HashMap<String, Value>) -> Self {
        Self {
            code: Some(code),
            locals,
            handling: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        self.code.as_ref().map_or("<module>", |c| c.name.as_str())
    }

    fn is_local(&self, name: &str) -> bool {
        self.code.as_ref().is_some_and(|c| c.is_local(name))
    }
}

pub struct Interpreter {
    builtins: HashMap<String, Value>,
    globals: HashMap<String, Value>,
    guards: Guards,
    name_guard: NameGuard,
    output: OutputCollector,
    rng: StdRng,
    depth: usize,
    max_depth: usize,
}

impl Interpreter {
    pub fn new(namespace: GuardedNamespace, max_depth: usize) -> Self {
        let rng = match namespace.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            builtins: namespace.builtins.into_iter().collect(),
            globals: namespace.globals.into_iter().collect(),
            guards: namespace.guards,
            name_guard: namespace.name_guard,
            output: OutputCollector::new(),
            rng,
            depth: 0,
            max_depth,
        }
    }

    pub fn guards(&self) -> &Guards {
        &self.guards
    }

    pub fn name_guard(&self) -> &NameGuard {
        &self.name_guard
    }

    pub fn output(&self) -> &OutputCollector {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputCollector {
        &mut self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output).into_string()
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Define the module's functions, evaluating default values once.
    pub fn bind(&mut self, module: &CompiledModule) -> Exec<()> {
        for code in &module.functions {
            let line = code.span.line;
            self.bind_function(code)
                .map_err(|unwind| unwind.located(&code.name, line))?;
        }
        Ok(())
    }

    fn bind_function(&mut self, code: &Rc<CompiledFunction>) -> Exec<()> {
        self.name_guard.check(&code.name)?;
        for param in &code.params {
            self.name_guard.check(param)?;
        }
        let mut frame = Frame::module();
        let mut defaults = Vec::with_capacity(code.defaults.len());
        for default in &code.defaults {
            defaults.push(self.eval(&mut frame, default)?);
        }
        let function = ScriptFunction {
            code: code.clone(),
            defaults,
        };
        self.globals
            .insert(code.name.clone(), Value::Function(Rc::new(function)));
        Ok(())
    }

    /// Call any callable value.
    pub fn call_value(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match func {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(builtin) => builtins::call(self, *builtin, args, kwargs),
            Value::BoundMethod(method) => {
                let args = Args::new(method.name.to_string(), args, kwargs);
                methods::call_method(self, &method.receiver, &method.name, args)
            }
            Value::Native(native) => {
                if !kwargs.is_empty() {
                    return Err(ScriptException::type_error(format!(
                        "{}() takes no keyword arguments",
                        native.name
                    ))
                    .into());
                }
                Ok(native.call(&args)?)
            }
            Value::ExceptionType(kind) => {
                Ok(Value::Exception(Rc::new(new_exception(*kind, args, kwargs)?)))
            }
            other => Err(ScriptException::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<ScriptFunction>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        if self.depth >= self.max_depth {
            return Err(ScriptException::new(
                ExceptionKind::RecursionError,
                "maximum recursion depth exceeded",
            )
            .into());
        }
        let code = function.code.clone();
        let locals = bind_arguments(&code, &function.defaults, args, kwargs)?;
        let mut frame = Frame::function(code.clone(), locals);
        self.depth += 1;
        let result = self.exec_block(&mut frame, &code.body);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn exec_block(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Flow> {
        crate::stack::guarded(|| self.exec_stmts(frame, body))
    }

    fn exec_stmts(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            let flow = self
                .exec_stmt(frame, stmt)
                .map_err(|unwind| unwind.located(frame.name(), stmt.span.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(frame, expr)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(frame, value)?;
                self.assign(frame, target, value)?;
            }
            StmtKind::Delete(target) => self.delete(frame, target)?,
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(frame, test)?.truthy()? {
                    body
                } else {
                    orelse
                };
                return self.exec_block(frame, branch);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval(frame, test)?.truthy()? {
                    match self.exec_block(frame, body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(frame, orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(frame, iter)?;
                let iterator = ops::iterate(&iterable)?;
                loop {
                    let next = iterator.borrow_mut().next_value()?;
                    let Some(item) = next else {
                        break;
                    };
                    self.assign(frame, target, item)?;
                    match self.exec_block(frame, body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(frame, orelse);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(frame, body, handlers, orelse, finalbody),
            StmtKind::With {
                context,
                target,
                body,
            } => return self.exec_with(frame, context, target.as_ref(), body),
            StmtKind::Raise { exc, cause } => return Err(self.raise(frame, exc, cause)),
            StmtKind::Assert { test, msg } => {
                if !self.eval(frame, test)?.truthy()? {
                    let message = match msg {
                        Some(msg) => to_str(&self.eval(frame, msg)?),
                        None => String::new(),
                    };
                    return Err(
                        ScriptException::new(ExceptionKind::AssertionError, message).into(),
                    );
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn exec_with(
        &mut self,
        frame: &mut Frame,
        context: &Expr,
        target: Option<&Target>,
        body: &[Stmt],
    ) -> Exec<Flow> {
        let context = self.eval(frame, context)?;
        let manager = self.guards.context_manager(&context)?;
        let entered = manager.enter()?;
        if let Some(target) = target {
            self.assign(frame, target, entered)?;
        }
        match self.exec_block(frame, body) {
            Ok(flow) => {
                manager.exit(None)?;
                Ok(flow)
            }
            Err(Unwind::Raise(exc)) => {
                if manager.exit(Some(exc.as_ref()))? {
                    Ok(Flow::Normal)
                } else {
                    Err(Unwind::Raise(exc))
                }
            }
            Err(denied) => Err(denied),
        }
    }

    fn exec_try(
        &mut self,
        frame: &mut Frame,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Exec<Flow> {
        let outcome = match self.exec_block(frame, body) {
            Ok(Flow::Normal) => self.exec_block(frame, orelse),
            Ok(flow) => Ok(flow),
            Err(Unwind::Raise(exc)) => self.handle(frame, *exc, handlers),
            Err(denied) => return Err(denied),
        };
        if matches!(outcome, Err(Unwind::Denied { .. })) || finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(frame, finalbody)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, frame: &mut Frame, exc: ScriptException, handlers: &[Handler]) -> Exec<Flow> {
        for handler in handlers {
            if !self.handler_matches(frame, handler, &exc)? {
                continue;
            }
            if let Some(name) = &handler.name {
                self.bind_name(frame, name, Value::Exception(Rc::new(exc.clone())))?;
            }
            frame.handling.push(exc);
            let result = self.exec_block(frame, &handler.body);
            frame.handling.pop();
            return result;
        }
        Err(Unwind::Raise(Box::new(exc)))
    }

    fn handler_matches(
        &mut self,
        frame: &mut Frame,
        handler: &Handler,
        exc: &ScriptException,
    ) -> Exec<bool> {
        let Some(kind) = &handler.kind else {
            return Ok(true);
        };
        let kind = self.eval(frame, kind)?;
        let classes = match &kind {
            Value::Tuple(items) => items.to_vec(),
            _ => vec![kind],
        };
        for class in &classes {
            match class {
                Value::ExceptionType(k) if exc.kind.is_subclass_of(*k) => return Ok(true),
                Value::ExceptionType(_) => {}
                _ => {
                    return Err(ScriptException::type_error(
                        "catching classes that do not inherit from BaseException is not allowed",
                    )
                    .into())
                }
            }
        }
        Ok(false)
    }

    fn raise(&mut self, frame: &mut Frame, exc: &Option<Expr>, cause: &Option<Expr>) -> Unwind {
        let Some(exc) = exc else {
            return match frame.handling.last() {
                Some(current) => Unwind::Raise(Box::new(current.clone())),
                None => ScriptException::new(
                    ExceptionKind::RuntimeError,
                    "No active exception to reraise",
                )
                .into(),
            };
        };
        let value = match self.eval(frame, exc) {
            Ok(value) => value,
            Err(unwind) => return unwind,
        };
        if let Some(cause) = cause {
            match self.eval(frame, cause) {
                Ok(Value::None | Value::Exception(_) | Value::ExceptionType(_)) => {}
                Ok(_) => {
                    return ScriptException::type_error(
                        "exception causes must derive from BaseException",
                    )
                    .into()
                }
                Err(unwind) => return unwind,
            }
        }
        match value {
            Value::ExceptionType(kind) => ScriptException::new(kind, "").into(),
            Value::Exception(exc) => {
                let mut exc = (*exc).clone();
                exc.location = None;
                exc.into()
            }
            _ => ScriptException::type_error("exceptions must derive from BaseException").into(),
        }
    }

    fn bind_name(&mut self, frame: &mut Frame, name: &str, value: Value) -> Exec<()> {
        self.name_guard.check(name)?;
        frame.locals.insert(name.to_string(), value);
        Ok(())
    }

    fn assign(&mut self, frame: &mut Frame, target: &Target, value: Value) -> Exec<()> {
        match target {
            Target::Name(name) => self.bind_name(frame, name, value),
            Target::Attr { object, name } => {
                let object = self.eval(frame, object)?;
                self.guards.set_attr(&object, name, value)
            }
            Target::Item { object, index } => {
                let object = self.eval(frame, object)?;
                let index = self.eval(frame, index)?;
                self.guards.set_item(&object, index, value)
            }
            Target::Unpack(targets) => {
                let items = match &value {
                    Value::Object(_) => {
                        return Err(ScriptException::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        ))
                        .into())
                    }
                    other => ops::collect(other)?,
                };
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(ScriptException::value_error(message).into());
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(frame, target, item)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, frame: &mut Frame, target: &DeleteTarget) -> Exec<()> {
        match target {
            DeleteTarget::Attr { object, name } => {
                let object = self.eval(frame, object)?;
                self.guards.del_attr(&object, name)
            }
            DeleteTarget::Item { object, index } => {
                let object = self.eval(frame, object)?;
                let index = self.eval(frame, index)?;
                self.guards.del_item(&object, &index)
            }
        }
    }

    fn lookup(&self, frame: &Frame, name: &str) -> Exec<Value> {
        if frame.is_local(name) {
            return frame.locals.get(name).cloned().ok_or_else(|| {
                ScriptException::new(
                    ExceptionKind::UnboundLocalError,
                    format!(
                        "cannot access local variable '{name}' where it is not associated with a value"
                    ),
                )
                .into()
            });
        }
        self.globals
            .get(name)
            .or_else(|| self.builtins.get(name))
            .cloned()
            .ok_or_else(|| {
                ScriptException::new(
                    ExceptionKind::NameError,
                    format!("name '{name}' is not defined"),
                )
                .into()
            })
    }

    fn eval_all(&mut self, frame: &mut Frame, exprs: &[Expr]) -> Exec<Vec<Value>> {
        exprs.iter().map(|e| self.eval(frame, e)).collect()
    }

    fn slice_bound(&mut self, frame: &mut Frame, bound: &Option<Box<Expr>>) -> Exec<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(frame, expr)? {
            Value::None => Ok(None),
            Value::Int(i) => Ok(Some(i)),
            Value::Bool(b) => Ok(Some(i64::from(b))),
            _ => Err(ScriptException::type_error(
                "slice indices must be integers or None or have an __index__ method",
            )
            .into()),
        }
    }

    fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Exec<Value> {
        crate::stack::guarded(|| self.eval_expr(frame, expr))
    }

    fn eval_expr(&mut self, frame: &mut Frame, expr: &Expr) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Constant(constant) => constant_value(constant),
            ExprKind::Name(name) => self.lookup(frame, name),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(frame, items)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(frame, items)?)),
            ExprKind::Set(items) => {
                let items = self.eval_all(frame, items)?;
                Ok(Value::set(SetTable::from_values(items)?))
            }
            ExprKind::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(frame, key)?;
                    let value = self.eval(frame, value)?;
                    dict.insert(HashKey::from_value(&key)?, key, value);
                }
                Ok(Value::dict(dict))
            }
            ExprKind::GetAttr { object, name } => {
                let object = self.eval(frame, object)?;
                self.guards.get_attr(&object, name)
            }
            ExprKind::GetItem { object, index } => {
                let object = self.eval(frame, object)?;
                let index = self.eval(frame, index)?;
                self.guards.get_item(&object, &index)
            }
            ExprKind::WriteGuard { object, op } => {
                let object = self.eval(frame, object)?;
                self.guards.write(object, *op)
            }
            ExprKind::Check { check, operand } => {
                let value = self.eval(frame, operand)?;
                self.guards.check_operand(*check, value)
            }
            ExprKind::Slice { lower, upper, step } => Ok(Value::Slice(SliceValue {
                start: self.slice_bound(frame, lower)?,
                stop: self.slice_bound(frame, upper)?,
                step: self.slice_bound(frame, step)?,
            })),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(frame, operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy()?)),
                    op => Ok(ops::unary(*op, &value)?),
                }
            }
            ExprKind::Binary { left, op, right } => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                Ok(ops::binary(*op, &left, &right)?)
            }
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(frame, value)?;
                    let truthy = last.truthy()?;
                    let short_circuit = match op {
                        BoolOp::And => !truthy,
                        BoolOp::Or => truthy,
                    };
                    if short_circuit {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::Compare {
                left,
                ops: operators,
                comparators,
            } => {
                let mut left = self.eval(frame, left)?;
                for (op, comparator) in operators.iter().zip(comparators) {
                    let right = self.eval(frame, comparator)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(frame, test)?.truthy()? {
                    self.eval(frame, body)
                } else {
                    self.eval(frame, orelse)
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.eval_call(frame, func, args, keywords),
        }
    }
    fn eval_call(
        &mut self,
        frame: &mut Frame,
        func: &Expr,
        args: &[Expr],
        keywords: &[(String, Expr)],
    ) -> Exec<Value> {
        let func = self.eval(frame, func)?;
        let args = self.eval_all(frame, args)?;
        let mut kwargs = Vec::with_capacity(keywords.len());
        for (name, value) in keywords {
            kwargs.push((name.clone(), self.eval(frame, value)?));
        }
        self.call_value(&func, args, kwargs)
    }
}

fn constant_value(constant: &Constant) -> Exec<Value> {
    Ok(match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::str(s),
        Constant::Bytes(b) => Value::bytes(b),
        Constant::Ellipsis => {
            return Err(ScriptException::type_error("Ellipsis is not supported").into())
        }
    })
}

fn new_exception(
    kind: ExceptionKind,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<ScriptException> {
    if let Some((name, _)) = kwargs.first() {
        return Err(ScriptException::type_error(format!(
            "{kind}() takes no keyword arguments (got '{name}')"
        ))
        .into());
    }
    let message = match args.as_slice() {
        [] => String::new(),
        [single] => to_str(single),
        many => repr(&Value::tuple(many.to_vec())),
    };
    Ok(ScriptException::new(kind, message))
}

fn bind_arguments(
    code: &CompiledFunction,
    defaults: &[Value],
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<HashMap<String, Value>> {
    let name = &code.name;
    let arity = code.params.len();
    if args.len() > arity {
        return Err(ScriptException::type_error(format!(
            "{name}() takes {arity} positional argument{} but {} {} given",
            if arity == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        ))
        .into());
    }
    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(arity, None);
    for (keyword, value) in kwargs {
        let Some(index) = code.params.iter().position(|p| *p == keyword) else {
            return Err(ScriptException::type_error(format!(
                "{name}() got an unexpected keyword argument '{keyword}'"
            ))
            .into());
        };
        if slots[index].is_some() {
            return Err(ScriptException::type_error(format!(
                "{name}() got multiple values for argument '{keyword}'"
            ))
            .into());
        }
        slots[index] = Some(value);
    }
    let first_default = code.required_params();
    let mut missing = Vec::new();
    let mut locals = HashMap::with_capacity(arity);
    for (index, (param, slot)) in code.params.iter().zip(slots).enumerate() {
        let value = match slot {
            Some(value) => value,
            None if index >= first_default => defaults[index - first_default].clone(),
            None => {
                missing.push(format!("'{param}'"));
                continue;
            }
        };
        locals.insert(param.clone(), value);
    }
    if !missing.is_empty() {
        let listed = match missing.as_slice() {
            [one] => one.clone(),
            [init @ .., last] if init.len() == 1 => format!("{} and {last}", init[0]),
            [init @ .., last] => format!("{}, and {last}", init.join(", ")),
            [] => String::new(),
        };
        return Err(ScriptException::type_error(format!(
            "{name}() missing {} required positional argument{}: {listed}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" }
        ))
        .into());
    }
    Ok(locals)
}
