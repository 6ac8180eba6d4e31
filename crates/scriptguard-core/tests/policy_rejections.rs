//! Compile-time policy: rejected constructs fail the whole script and
//! execute nothing.

use scriptguard_core::{SandboxError, SandboxExecutor};

fn in_function(body: &str) -> String {
    let indented: Vec<String> = body.lines().map(|l| format!("    {l}")).collect();
    format!("def main():\n{}\n    return 0\n", indented.join("\n"))
}

fn diagnostics(source: &str) -> Vec<String> {
    match SandboxExecutor::default().run(source, "main", vec![]) {
        Err(SandboxError::PolicyViolation { diagnostics, .. }) => {
            diagnostics.into_iter().map(|d| d.message).collect()
        }
        other => panic!("expected policy violation, got {other:?}"),
    }
}

fn assert_rejected(body: &str, fragment: &str) {
    let found = diagnostics(&in_function(body));
    assert!(
        found.iter().any(|m| m.contains(fragment)),
        "expected a diagnostic containing {fragment:?} for {body:?}, got {found:?}"
    );
}

#[test]
fn test_each_disallowed_construct_is_rejected() {
    let cases = [
        ("f(*items)", "Starred"),
        ("f(**options)", "**kwargs is not allowed"),
        ("x = 1\nx += 1", "AugAssign"),
        ("a = b = 1", "Multiple assignment targets"),
        ("f = lambda y: y", "Lambda"),
        ("yield 1", "Yield"),
        ("x = [i for i in range(3)]", "ListComp"),
        ("x = {i for i in range(3)}", "SetComp"),
        ("x = {i: i for i in range(3)}", "DictComp"),
        ("x = sum(i for i in range(3))", "GeneratorExp"),
        ("global counter", "Global"),
        ("nonlocal counter", "Nonlocal"),
        ("class Robot:\n    pass", "ClassDef"),
        ("def inner():\n    pass", "Nested function definitions"),
        ("if (n := 10) > 5:\n    pass", "NamedExpr"),
        ("import os", "Import"),
        ("from os import path", "ImportFrom"),
        ("eval('1')", "Eval calls"),
        ("exec('x = 1')", "Exec calls"),
    ];
    for (body, fragment) in cases {
        assert_rejected(body, fragment);
    }
}

#[test]
fn test_variadic_parameters_are_rejected() {
    let found = diagnostics("def main(*args, **kwargs):\n    return 0\n");
    assert!(found.iter().any(|m| m == "*args is not allowed."), "{found:?}");
    assert!(found.iter().any(|m| m == "**kwargs is not allowed."), "{found:?}");
}

#[test]
fn test_top_level_statements_are_rejected() {
    let found = diagnostics("x = 1\ndef main():\n    return x\n");
    assert_eq!(found, ["Only function definitions are allowed at module level."]);
}

#[test]
fn test_deleting_locals_is_rejected_but_attributes_compile() {
    assert_rejected("x = 1\ndel x", "Deleting local variables");
    let executor = SandboxExecutor::default();
    executor
        .check("def main(obj):\n    del obj.attr\n    del obj[0]\n")
        .unwrap();
}

#[test]
fn test_privileged_binding_names_are_rejected() {
    for body in [
        "_hidden = 1",
        "trailing_ = 1",
        "for _i in range(3):\n    pass",
        "try:\n    pass\nexcept ValueError as _err:\n    pass",
        "with ctx as _res:\n    pass",
        "a, (_b, c) = 1, (2, 3)",
    ] {
        assert_rejected(body, "invalid variable name");
    }
}

#[test]
fn test_privileged_attribute_names_are_rejected() {
    assert_rejected("x = items.__class__", "invalid attribute name");
    assert_rejected("items._private = 1", "invalid attribute name");
}

#[test]
fn test_multiple_with_resources_are_rejected() {
    assert_rejected("with a as x, b as y:\n    pass", "Multiple context managers");
}

#[test]
fn test_every_violation_is_reported_in_source_order() {
    let source = "def main():\n    f = lambda: 1\n    global g\n    x = y = 2\n";
    let err = SandboxExecutor::default()
        .run(source, "main", vec![])
        .unwrap_err();
    let SandboxError::PolicyViolation { diagnostics, .. } = err else {
        panic!("expected policy violation");
    };
    assert_eq!(diagnostics.len(), 3);
    let lines: Vec<u32> = diagnostics.iter().map(|d| d.span.line).collect();
    assert_eq!(lines, [2, 3, 4]);
}

#[test]
fn test_statement_markers_are_permitted_calls() {
    let source = "def main():\n    _begin_blockly_statement_('a1')\n    x = 3\n    _end_blockly_statement_('a1')\n    return x\n";
    let run = SandboxExecutor::default().run(source, "main", vec![]).unwrap();
    assert!(matches!(run.value, scriptguard_core::Value::Int(3)));
}

#[test]
fn test_matmul_compiles() {
    SandboxExecutor::default()
        .check("def main(a, b):\n    return a @ b\n")
        .unwrap();
}

#[test]
fn test_rejected_script_prints_nothing() {
    // The first function would print if anything ran.
    let source = "def main():\n    print('side effect')\n    return 1\n\ndef other():\n    x = lambda: 0\n";
    let err = SandboxExecutor::default()
        .run(source, "main", vec![])
        .unwrap_err();
    assert!(matches!(err, SandboxError::PolicyViolation { .. }));
}
