//! Run-time capability guards around host objects.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use scriptguard_core::runtime::{Exec, Interpreter, Unwind};
use scriptguard_core::syntax::ast::{BinaryOp, CompareOp, UnaryOp};
use scriptguard_core::{
    CapabilityObject, ExceptionKind, GuardOp, GuardViolation, Hook, HookResult, HookSet,
    Invocation, NamespaceBuilder, NamespaceConfig, PolicyConfig, SandboxError, SandboxExecutor,
    ScriptException, Value,
};

#[derive(Debug)]
struct Robot {
    hooks: HookSet,
    speed: RefCell<f64>,
}

impl Robot {
    fn new(hooks: &[Hook]) -> Rc<Self> {
        Rc::new(Self {
            hooks: hooks.iter().copied().collect(),
            speed: RefCell::new(1.5),
        })
    }
}

impl CapabilityObject for Robot {
    fn type_name(&self) -> &str {
        "Robot"
    }

    fn hooks(&self) -> HookSet {
        self.hooks
    }

    fn get_attr(&self, name: &str) -> HookResult<Value> {
        match name {
            "speed" => Ok(Value::Float(*self.speed.borrow())),
            _ => Err(ScriptException::attribute_error(format!(
                "'Robot' object has no attribute '{name}'"
            ))),
        }
    }

    fn set_attr(&self, name: &str, value: Value) -> HookResult<()> {
        match (name, value) {
            ("speed", Value::Float(f)) => *self.speed.borrow_mut() = f,
            ("speed", Value::Int(i)) => *self.speed.borrow_mut() = i as f64,
            _ => {
                return Err(ScriptException::attribute_error(format!(
                    "cannot set '{name}' on Robot"
                )))
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Lock {
    log: Rc<RefCell<Vec<String>>>,
    suppress: bool,
}

impl CapabilityObject for Lock {
    fn type_name(&self) -> &str {
        "Lock"
    }

    fn hooks(&self) -> HookSet {
        HookSet::empty().with(Hook::ContextManager)
    }

    fn enter(&self) -> HookResult<Value> {
        self.log.borrow_mut().push("enter".into());
        Ok(Value::str("token"))
    }

    fn exit(&self, error: Option<&ScriptException>) -> HookResult<bool> {
        let what = error.map_or("none", |e| e.kind.name());
        self.log.borrow_mut().push(format!("exit:{what}"));
        Ok(self.suppress)
    }
}

/// Answers every operator with 999 and counts how often it was asked.
#[derive(Debug)]
struct Meter {
    hooks: HookSet,
    calls: Cell<usize>,
}

impl Meter {
    fn new(hooks: &[Hook]) -> Rc<Self> {
        Rc::new(Self {
            hooks: hooks.iter().copied().collect(),
            calls: Cell::new(0),
        })
    }

    fn tick(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl CapabilityObject for Meter {
    fn type_name(&self) -> &str {
        "Meter"
    }

    fn hooks(&self) -> HookSet {
        self.hooks
    }

    fn unary_op(&self, _op: UnaryOp) -> HookResult<Value> {
        self.tick();
        Ok(Value::Int(999))
    }

    fn binary_op(&self, _op: BinaryOp, _other: &Value, _reflected: bool) -> HookResult<Value> {
        self.tick();
        Ok(Value::Int(999))
    }

    fn compare(&self, _op: CompareOp, _other: &Value) -> HookResult<bool> {
        self.tick();
        Ok(true)
    }
}

fn run_with(source: &str, arg: Value) -> Result<Value, SandboxError> {
    SandboxExecutor::default()
        .run(source, "main", vec![arg])
        .map(|run| run.value)
}

fn denied_op(result: Result<Value, SandboxError>) -> GuardOp {
    match result {
        Err(SandboxError::CapabilityDenied {
            violation: GuardViolation::Denied { operation, .. },
            ..
        }) => operation,
        other => panic!("expected capability denial, got {other:?}"),
    }
}

#[test]
fn test_hookless_object_is_denied_everything() {
    let cases = [
        ("return obj.speed", GuardOp::GetAttr),
        ("return obj[0]", GuardOp::GetItem),
        ("return obj + 1", GuardOp::BinaryOp),
        ("return -obj", GuardOp::UnaryOp),
        ("return obj == 1", GuardOp::CompareOp),
        ("return obj or 1", GuardOp::BoolOp),
        ("obj.speed = 3", GuardOp::SetAttr),
        ("obj[0] = 3", GuardOp::SetItem),
        ("del obj.speed", GuardOp::DelAttr),
        ("del obj[0]", GuardOp::DelItem),
    ];
    for (body, expected) in cases {
        let source = format!("def main(obj):\n    {body}\n");
        let robot: Rc<dyn CapabilityObject> = Robot::new(&[]);
        let op = denied_op(run_with(&source, Value::Object(robot)));
        assert_eq!(op, expected, "for {body:?}");
    }
}

#[test]
fn test_get_attr_hook_grants_only_attribute_reads() {
    let robot: Rc<dyn CapabilityObject> = Robot::new(&[Hook::GetAttr]);
    let value = run_with("def main(obj):\n    return obj.speed * 2\n", Value::Object(robot.clone()))
        .unwrap();
    assert!(matches!(value, Value::Float(f) if f == 3.0));

    let items = run_with("def main(obj):\n    return obj[0]\n", Value::Object(robot.clone()));
    assert_eq!(denied_op(items), GuardOp::GetItem);
    let ops = run_with("def main(obj):\n    return obj < 2\n", Value::Object(robot));
    assert_eq!(denied_op(ops), GuardOp::CompareOp);
}

#[test]
fn test_set_attr_hook_mutates_host_state() {
    let robot = Robot::new(&[Hook::GetAttr, Hook::SetAttr]);
    let value = run_with(
        "def main(obj):\n    obj.speed = 4\n    return obj.speed\n",
        Value::Object(robot.clone()),
    )
    .unwrap();
    assert!(matches!(value, Value::Float(f) if f == 4.0));
    assert_eq!(*robot.speed.borrow(), 4.0);
}

#[test]
fn test_hook_errors_are_catchable() {
    let robot: Rc<dyn CapabilityObject> = Robot::new(&[Hook::GetAttr]);
    let source = "def main(obj):\n    try:\n        return obj.mass\n    except AttributeError as err:\n        return str(err)\n";
    let value = run_with(source, Value::Object(robot)).unwrap();
    assert!(matches!(&value, Value::Str(s) if s.contains("no attribute 'mass'")));
}

#[test]
fn test_denials_skip_handlers_and_finally() {
    let log = Rc::new(RefCell::new(Vec::<String>::new()));
    let sink = log.clone();
    let record = Value::native("record", move |args| {
        let text = args.first().map(|v| v.to_string()).unwrap_or_default();
        sink.borrow_mut().push(text);
        Ok(Value::None)
    });
    let source = "def main(obj):\n    try:\n        x = obj.speed\n    except Exception:\n        record('handler')\n        return 'caught'\n    finally:\n        record('finally')\n    return x\n";
    let robot: Rc<dyn CapabilityObject> = Robot::new(&[]);
    let result = SandboxExecutor::default().run_with_globals(
        source,
        &Invocation::new("main").arg(Value::Object(robot)),
        vec![("record".into(), record)],
    );
    let Err(SandboxError::CapabilityDenied { function, line, .. }) = result else {
        panic!("expected denial, got {result:?}");
    };
    assert_eq!(function, "main");
    assert_eq!(line, 3);
    assert!(log.borrow().is_empty(), "script code ran after a denial: {:?}", log.borrow());
}

#[test]
fn test_has_attr_and_getattr_default() {
    let robot: Rc<dyn CapabilityObject> = Robot::new(&[Hook::GetAttr]);
    let source = "def main(obj):\n    return [hasattr(obj, 'speed'), hasattr(obj, 'mass'), getattr(obj, 'mass', 0)]\n";
    let value = run_with(source, Value::Object(robot)).unwrap();
    assert_eq!(value.to_json().unwrap(), serde_json::json!([true, false, 0]));

    let hookless: Rc<dyn CapabilityObject> = Robot::new(&[]);
    let value = run_with("def main(obj):\n    return hasattr(obj, 'speed')\n", Value::Object(hookless.clone()))
        .unwrap();
    assert!(matches!(value, Value::Bool(false)));
    let denied = run_with("def main(obj):\n    return getattr(obj, 'speed', 0)\n", Value::Object(hookless));
    assert_eq!(denied_op(denied), GuardOp::GetAttr);
}

#[test]
fn test_str_format_is_denied() {
    let result = run_with("def main(x):\n    return '{}'.format(x)\n", Value::Int(1));
    assert!(matches!(
        result,
        Err(SandboxError::CapabilityDenied {
            violation: GuardViolation::UnsafeFormat { .. },
            ..
        })
    ));
    let value = run_with("def main(x):\n    return 'x=%d' % x\n", Value::Int(1)).unwrap();
    assert!(matches!(&value, Value::Str(s) if &**s == "x=1"));
}

#[test]
fn test_privileged_attribute_through_getattr_raises() {
    let source = "def main(x):\n    try:\n        return getattr(x, '__class__')\n    except AttributeError:\n        return 'blocked'\n";
    let value = run_with(source, Value::list(vec![])).unwrap();
    assert!(matches!(&value, Value::Str(s) if &**s == "blocked"));
}

#[test]
fn test_name_guard_blocks_builtin_rebinding() {
    let cases = [
        "def main(x):\n    len = 3\n    return len\n",
        "def main(x):\n    for print in range(3):\n        pass\n",
        "def main(x):\n    try:\n        raise ValueError('x')\n    except ValueError as str:\n        pass\n",
        "def main(x):\n    a, sorted = 1, 2\n",
    ];
    for source in cases {
        let result = run_with(source, Value::None);
        assert!(
            matches!(
                result,
                Err(SandboxError::CapabilityDenied {
                    violation: GuardViolation::ReservedName { .. },
                    ..
                })
            ),
            "{source:?} gave {result:?}"
        );
    }
}

#[test]
fn test_function_and_parameter_names_are_name_guarded() {
    let err = run_with("def print(x):\n    return x\n\ndef main(x):\n    return 1\n", Value::None)
        .unwrap_err();
    assert!(matches!(
        err,
        SandboxError::CapabilityDenied {
            violation: GuardViolation::ReservedName { ref name },
            ..
        } if name == "print"
    ));
    let err = run_with("def main(len):\n    return len\n", Value::None).unwrap_err();
    assert!(err.is_denial());
}

#[test]
fn test_injected_globals_are_reachable_and_protected() {
    let executor = SandboxExecutor::default();
    let robot: Rc<dyn CapabilityObject> = Robot::new(&[Hook::GetAttr]);
    let run = executor
        .run_with_globals(
            "def main():\n    return robot.speed\n",
            &Invocation::new("main"),
            vec![("robot".into(), Value::Object(robot.clone()))],
        )
        .unwrap();
    assert!(matches!(run.value, Value::Float(f) if f == 1.5));

    let err = executor
        .run_with_globals(
            "def main():\n    robot = 1\n    return robot\n",
            &Invocation::new("main"),
            vec![("robot".into(), Value::Object(robot))],
        )
        .unwrap_err();
    assert!(err.is_denial());
}

#[test]
fn test_context_manager_hook() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let lock: Rc<dyn CapabilityObject> = Rc::new(Lock {
        log: log.clone(),
        suppress: true,
    });
    let source = "def main(lock):\n    with lock as token:\n        print(token)\n        raise ValueError('x')\n    return 'after'\n";
    let run = SandboxExecutor::default()
        .run(source, "main", vec![Value::Object(lock)])
        .unwrap();
    assert!(matches!(&run.value, Value::Str(s) if &**s == "after"));
    assert_eq!(run.output, "token\n");
    assert_eq!(*log.borrow(), ["enter", "exit:ValueError"]);
}

#[test]
fn test_with_requires_the_hook() {
    let robot: Rc<dyn CapabilityObject> = Robot::new(&[Hook::GetAttr]);
    let result = run_with("def main(obj):\n    with obj as r:\n        pass\n", Value::Object(robot));
    assert_eq!(denied_op(result), GuardOp::ContextManager);
}

#[test]
fn test_safe_values_behave_normally() {
    let value = run_with(
        "def main(items):\n    items[0] = 5\n    items.append(6)\n    return items\n",
        Value::list(vec![Value::Int(1)]),
    )
    .unwrap();
    assert_eq!(value.to_json().unwrap(), serde_json::json!([5, 6]));

    let source = "def main(items):\n    try:\n        items.extra = 1\n    except AttributeError:\n        return 'read-only'\n";
    let value = run_with(source, Value::list(vec![])).unwrap();
    assert!(matches!(&value, Value::Str(s) if &**s == "read-only"));
}

#[test]
fn test_builtins_cannot_reach_operator_hooks_the_object_lacks() {
    let denied = [
        ("return sum([obj])", GuardOp::BinaryOp),
        ("return sum([1, 2], obj)", GuardOp::BinaryOp),
        ("return pow(obj, 2)", GuardOp::BinaryOp),
        ("return pow(2, obj)", GuardOp::BinaryOp),
        ("return obj in [1, 2]", GuardOp::CompareOp),
        ("return 1 in obj", GuardOp::CompareOp),
    ];
    for (body, expected) in denied {
        let meter = Meter::new(&[]);
        let source = format!("def main(obj):\n    {body}\n");
        let result = run_with(&source, Value::Object(meter.clone()));
        assert_eq!(denied_op(result), expected, "for {body:?}");
        assert_eq!(meter.calls.get(), 0, "host code ran for {body:?}");
    }
}

#[test]
fn test_ordering_builtins_never_consult_host_objects() {
    for body in [
        "return max([obj, 1])",
        "return min(obj, 1)",
        "return sorted([1, obj])",
    ] {
        let meter = Meter::new(&[]);
        let source = format!("def main(obj):\n    {body}\n");
        let err = run_with(&source, Value::Object(meter.clone())).unwrap_err();
        assert_eq!(err.exception_kind(), Some(ExceptionKind::TypeError), "for {body:?}");
        assert_eq!(meter.calls.get(), 0, "host code ran for {body:?}");
    }
}

#[test]
fn test_safe_containers_match_host_objects_by_identity() {
    let meter = Meter::new(&[]);
    let source = "def main(obj):\n    items = [obj, 2]\n    return [items.index(obj), items.count(obj), 1 in items, items == [obj, 2]]\n";
    let value = run_with(source, Value::Object(meter.clone())).unwrap();
    assert_eq!(value.to_json().unwrap(), serde_json::json!([0, 1, false, true]));
    assert_eq!(meter.calls.get(), 0);
}

#[test]
fn test_granted_binary_hook_serves_builtins() {
    let meter = Meter::new(&[Hook::BinaryOp]);
    let value = run_with(
        "def main(obj):\n    return [sum([obj]), pow(obj, 2), obj * 3]\n",
        Value::Object(meter.clone()),
    )
    .unwrap();
    assert_eq!(value.to_json().unwrap(), serde_json::json!([999, 999, 999]));
    assert_eq!(meter.calls.get(), 3);
}

fn hook_denial(result: Exec<Value>) -> GuardViolation {
    match result {
        Err(Unwind::Denied { violation, .. }) => violation,
        other => panic!("expected a denial, got {other:?}"),
    }
}

#[test]
fn test_namespace_guard_hooks_are_callable_by_the_host() {
    let namespace = NamespaceBuilder::new(&NamespaceConfig::default(), &PolicyConfig::default())
        .build()
        .unwrap();
    let hook = |name: &str| namespace.builtin(name).cloned().unwrap();
    let getattr = hook("_getattr_");
    let getitem = hook("_getitem_");
    let write = hook("_write_");
    let binary = hook("_check_binary_op_allowed_");
    let assign = hook("_check_assign_name_");
    let mut interp = Interpreter::new(namespace, 10);

    let robot: Rc<dyn CapabilityObject> = Robot::new(&[Hook::GetAttr]);
    let speed = interp
        .call_value(&getattr, vec![Value::Object(robot), Value::str("speed")], vec![])
        .unwrap();
    assert!(matches!(speed, Value::Float(f) if f == 1.5));

    let bare = || Value::Object(Robot::new(&[]) as Rc<dyn CapabilityObject>);
    for (func, args, expected) in [
        (&getattr, vec![bare(), Value::str("speed")], GuardOp::GetAttr),
        (&getitem, vec![bare(), Value::Int(0)], GuardOp::GetItem),
        (&write, vec![bare()], GuardOp::SetAttr),
        (&binary, vec![bare()], GuardOp::BinaryOp),
    ] {
        let violation = hook_denial(interp.call_value(func, args, vec![]));
        assert!(
            matches!(violation, GuardViolation::Denied { operation, .. } if operation == expected),
            "{violation:?}"
        );
    }

    // Safe values pass straight through.
    let list = Value::list(vec![Value::Int(7)]);
    assert!(matches!(
        interp.call_value(&getitem, vec![list.clone(), Value::Int(0)], vec![]),
        Ok(Value::Int(7))
    ));
    assert!(matches!(interp.call_value(&write, vec![list], vec![]), Ok(Value::List(_))));
    assert!(matches!(
        interp.call_value(&binary, vec![Value::Int(3)], vec![]),
        Ok(Value::Int(3))
    ));

    assert!(matches!(
        hook_denial(interp.call_value(&assign, vec![Value::str("len")], vec![])),
        GuardViolation::ReservedName { ref name } if name == "len"
    ));
    assert!(interp.call_value(&assign, vec![Value::str("speed")], vec![]).is_ok());
}
