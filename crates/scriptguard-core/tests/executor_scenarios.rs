//! End-to-end runs of permitted scripts.

use serde_json::json;

use scriptguard_core::{
    ExceptionKind, Invocation, SandboxConfig, SandboxError, SandboxExecutor, Value,
};

fn run_main(source: &str) -> (serde_json::Value, String) {
    let run = SandboxExecutor::default()
        .run(source, "main", vec![])
        .unwrap_or_else(|err| panic!("run failed: {err}"));
    let json = run
        .value
        .to_json()
        .unwrap_or_else(|| panic!("result has no JSON form: {:?}", run.value));
    (json, run.output)
}

fn value_of(source: &str) -> serde_json::Value {
    run_main(source).0
}

fn fault_of(source: &str) -> (ExceptionKind, String) {
    match SandboxExecutor::default().run(source, "main", vec![]) {
        Err(SandboxError::HostComputation(fault)) => (fault.kind, fault.message),
        other => panic!("expected a script fault, got {other:?}"),
    }
}

// -------------------------------------------------------------------------
// Control flow
// -------------------------------------------------------------------------

#[test]
fn test_loops_with_break_continue_and_else() {
    let source = r#"
def main():
    found = []
    for i in range(10):
        if i % 2 == 0:
            continue
        if i > 7:
            break
        found.append(i)
    else:
        found.append('no break')
    n = 0
    while n < 3:
        n = n + 1
    else:
        found.append(n)
    return found
"#;
    assert_eq!(value_of(source), json!([1, 3, 5, 7, 3]));
}

#[test]
fn test_try_except_else_finally_order() {
    let source = r#"
def attempt(value):
    try:
        result = 10 // value
    except ZeroDivisionError:
        print('zero')
        result = -1
    else:
        print('ok')
    finally:
        print('done')
    return result

def main():
    return [attempt(2), attempt(0)]
"#;
    let (value, output) = run_main(source);
    assert_eq!(value, json!([5, -1]));
    assert_eq!(output, "ok\ndone\nzero\ndone\n");
}

#[test]
fn test_exception_hierarchy_and_reraise() {
    let source = r#"
def lookup(table, key):
    try:
        return table[key]
    except LookupError:
        print('missing', key)
        raise

def main():
    try:
        lookup({'a': 1}, 'b')
    except KeyError as err:
        return 'caught ' + str(err)
"#;
    let (value, output) = run_main(source);
    assert_eq!(value, json!("caught 'b'"));
    assert_eq!(output, "missing b\n");
}

#[test]
fn test_finally_runs_on_return() {
    let source = r#"
def main():
    try:
        return 'body'
    finally:
        print('cleanup')
"#;
    let (value, output) = run_main(source);
    assert_eq!(value, json!("body"));
    assert_eq!(output, "cleanup\n");
}

#[test]
fn test_raise_custom_message_and_cause() {
    let (kind, message) = fault_of(
        "def main():\n    try:\n        int('x')\n    except ValueError as err:\n        raise RuntimeError('bad config') from err\n",
    );
    assert_eq!(kind, ExceptionKind::RuntimeError);
    assert_eq!(message, "bad config");
}

// -------------------------------------------------------------------------
// Functions
// -------------------------------------------------------------------------

#[test]
fn test_recursion_and_helper_functions() {
    let source = r#"
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

def main():
    return [fact(5), fact(10)]
"#;
    assert_eq!(value_of(source), json!([120, 3628800]));
}

#[test]
fn test_runaway_recursion_raises_recursion_error() {
    let (kind, _) = fault_of("def main():\n    return main()\n");
    assert_eq!(kind, ExceptionKind::RecursionError);
}

#[test]
fn test_call_depth_is_configurable() {
    let source = "def down(n):\n    if n == 0:\n        return 0\n    return down(n - 1)\n";
    let config = SandboxConfig {
        max_call_depth: 10,
        ..SandboxConfig::default()
    };
    let executor = SandboxExecutor::new(config).unwrap();
    assert!(executor.run(source, "down", vec![Value::Int(5)]).is_ok());
    let err = executor.run(source, "down", vec![Value::Int(50)]).unwrap_err();
    assert_eq!(err.exception_kind(), Some(ExceptionKind::RecursionError));
}

#[test]
fn test_defaults_are_evaluated_once() {
    let source = r#"
def remember(x, seen=[]):
    seen.append(x)
    return len(seen)

def main():
    remember(1)
    return remember(2)
"#;
    assert_eq!(value_of(source), json!(2));
}

#[test]
fn test_keyword_arguments_and_errors() {
    let source = "def area(width, height=2):\n    return width * height\n\ndef main():\n    return [area(3), area(height=4, width=5)]\n";
    assert_eq!(value_of(source), json!([6, 20]));

    let (kind, message) = fault_of("def f(a, b):\n    return a\n\ndef main():\n    return f(1)\n");
    assert_eq!(kind, ExceptionKind::TypeError);
    assert_eq!(message, "f() missing 1 required positional argument: 'b'");

    let (_, message) = fault_of("def f(a):\n    return a\n\ndef main():\n    return f(1, a=2)\n");
    assert_eq!(message, "f() got multiple values for argument 'a'");
}

#[test]
fn test_entry_arity_mismatch_is_a_fault() {
    let err = SandboxExecutor::default()
        .run("def main(a):\n    return a\n", "main", vec![])
        .unwrap_err();
    assert_eq!(err.exception_kind(), Some(ExceptionKind::TypeError));
}

#[test]
fn test_functions_as_sort_keys() {
    let source = r#"
def by_length(word):
    return len(word)

def main():
    words = ['ccc', 'a', 'bb']
    return [sorted(words, key=by_length), sorted(words, reverse=True)]
"#;
    assert_eq!(value_of(source), json!([["a", "bb", "ccc"], ["ccc", "bb", "a"]]));
}

#[test]
fn test_last_definition_wins() {
    let source = "def main():\n    return 1\n\ndef main():\n    return 2\n";
    assert_eq!(value_of(source), json!(2));
}

// -------------------------------------------------------------------------
// Name resolution
// -------------------------------------------------------------------------

#[test]
fn test_unbound_local_and_undefined_names() {
    let (kind, _) = fault_of("def main():\n    print(x)\n    x = 1\n");
    assert_eq!(kind, ExceptionKind::UnboundLocalError);
    let (kind, message) = fault_of("def main():\n    return missing\n");
    assert_eq!(kind, ExceptionKind::NameError);
    assert_eq!(message, "name 'missing' is not defined");
}

#[test]
fn test_unpacking() {
    let source = "def main():\n    a, (b, c) = 1, [2, 3]\n    return [c, b, a]\n";
    assert_eq!(value_of(source), json!([3, 2, 1]));
    let (kind, message) = fault_of("def main():\n    a, b = [1, 2, 3]\n");
    assert_eq!(kind, ExceptionKind::ValueError);
    assert_eq!(message, "too many values to unpack (expected 2)");
}

// -------------------------------------------------------------------------
// Values and built-ins
// -------------------------------------------------------------------------

#[test]
fn test_print_formats_like_str() {
    let (_, output) = run_main("def main():\n    print(1.5, 'a', [1, 'b'], None, sep='|')\n");
    assert_eq!(output, "1.5|a|[1, 'b']|None\n");
}

#[test]
fn test_containers_and_builtins() {
    let source = r#"
def main():
    totals = {}
    for name, amount in [('a', 1), ('b', 2), ('a', 3)]:
        totals[name] = totals.get(name, 0) + amount
    pairs = list(zip(['x', 'y'], range(2)))
    return [totals, sum([1, 2, 3]), max(4, 9, 2), min([5, 3]), pairs, abs(-2), len('four')]
"#;
    assert_eq!(
        value_of(source),
        json!([{"a": 4, "b": 2}, 6, 9, 3, [["x", 0], ["y", 1]], 2, 4])
    );
}

#[test]
fn test_string_methods() {
    let source = "def main():\n    words = 'Hello World'.lower().split()\n    return '-'.join(words).upper()\n";
    assert_eq!(value_of(source), json!("HELLO-WORLD"));
}

#[test]
fn test_math_and_string_modules() {
    let source = "def main():\n    return [math.sqrt(16), math.floor(2.7), string.capwords('go left')]\n";
    assert_eq!(value_of(source), json!([4.0, 2, "Go Left"]));
}

#[test]
fn test_seeded_random_is_reproducible() {
    let config = SandboxConfig {
        namespace: scriptguard_core::NamespaceConfig {
            random_seed: Some(7),
            ..Default::default()
        },
        ..SandboxConfig::default()
    };
    let executor = SandboxExecutor::new(config).unwrap();
    let source = "def main():\n    return [random.randint(1, 100), random.random()]\n";
    let first = executor.run(source, "main", vec![]).unwrap().value.to_json();
    let second = executor.run(source, "main", vec![]).unwrap().value.to_json();
    assert_eq!(first, second);
}

#[test]
fn test_integer_overflow_raises() {
    let (kind, _) = fault_of("def main():\n    return 9223372036854775807 + 1\n");
    assert_eq!(kind, ExceptionKind::OverflowError);
}

#[test]
fn test_isinstance_and_types() {
    let source = "def main():\n    return [isinstance(1, int), isinstance('s', (int, str)), isinstance([], dict)]\n";
    assert_eq!(value_of(source), json!([true, true, false]));
}

#[test]
fn test_assert_statement() {
    let (kind, message) = fault_of("def main():\n    assert 1 > 2, 'math is broken'\n");
    assert_eq!(kind, ExceptionKind::AssertionError);
    assert_eq!(message, "math is broken");
}

#[test]
fn test_runs_are_independent() {
    let executor = SandboxExecutor::default();
    let source = "def main(items):\n    items.append(len(items))\n    print(items)\n    return items\n";
    let first = executor
        .invoke(source, &Invocation::new("main").arg(Value::list(vec![])))
        .unwrap();
    let second = executor
        .invoke(source, &Invocation::new("main").arg(Value::list(vec![])))
        .unwrap();
    assert_eq!(first.output, second.output);
    assert_eq!(first.value.to_json(), second.value.to_json());
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn test_json_arguments_round_into_scripts() {
    let args = vec![Value::from_json(&json!({"speed": 2, "name": "r1"}))];
    let run = SandboxExecutor::default()
        .run(
            "def main(cfg):\n    return cfg['name'] + ':' + str(cfg['speed'] * 2)\n",
            "main",
            args,
        )
        .unwrap();
    assert_eq!(run.value.to_json(), Some(json!("r1:4")));
}
