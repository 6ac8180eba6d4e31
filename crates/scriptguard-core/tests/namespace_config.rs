//! Namespace shape driven by TOML configuration.

use std::io::Write;

use scriptguard_core::{
    ExceptionKind, GuardOp, GuardViolation, Invocation, SandboxConfig, SandboxError,
    SandboxExecutor, TypeTag, Value,
};

fn executor(toml: &str) -> SandboxExecutor {
    let config = SandboxConfig::from_toml_str(toml).unwrap();
    SandboxExecutor::new(config).unwrap()
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "filename = \"robot.py\"\nmax_call_depth = 20\n\n[namespace]\nrandom_seed = 3\n"
    )
    .unwrap();
    let config = SandboxConfig::load(file.path()).unwrap();
    assert_eq!(config.filename, "robot.py");
    assert_eq!(config.max_call_depth, 20);
    assert_eq!(config.namespace.random_seed, Some(3));
    // Untouched sections keep their defaults.
    assert_eq!(config.policy, SandboxConfig::default().policy);
}

#[test]
fn test_invalid_config_is_rejected() {
    for toml in [
        "max_call_depth = 0",
        "[namespace]\nbuiltins = [\"open\"]",
        "[namespace]\nprotected_names = [\"not a name\"]",
        "[namespace]\nsafe_types = [\"pointer\"]",
        "[policy]\ndenied_calls = [\"1bad\"]",
    ] {
        let err = SandboxConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)), "{toml:?} gave {err:?}");
    }
}

#[test]
fn test_missing_config_file_is_io_error() {
    let err = SandboxConfig::load("/nonexistent/scriptguard.toml").unwrap_err();
    assert!(matches!(err, SandboxError::Io(_)));
}

#[test]
fn test_restricted_builtins_are_undefined() {
    let executor = executor("[namespace]\nbuiltins = [\"len\", \"ValueError\"]\n");
    let run = executor
        .run("def main():\n    return len('abc')\n", "main", vec![])
        .unwrap();
    assert!(matches!(run.value, Value::Int(3)));

    let err = executor
        .run("def main():\n    print('hi')\n", "main", vec![])
        .unwrap_err();
    let SandboxError::HostComputation(fault) = err else {
        panic!("expected a fault, got {err:?}");
    };
    assert_eq!(fault.kind, ExceptionKind::NameError);
    assert_eq!(fault.message, "name 'print' is not defined");
}

#[test]
fn test_unsafe_type_goes_through_guards() {
    let executor = executor(
        "[namespace]\nsafe_types = [\"none\", \"bool\", \"int\", \"float\", \"list\"]\n",
    );
    let run = executor
        .run("def main(a, b):\n    return a + b\n", "main", vec![Value::Int(1), Value::Int(2)])
        .unwrap();
    assert!(matches!(run.value, Value::Int(3)));

    let err = executor
        .run(
            "def main(a, b):\n    return a + b\n",
            "main",
            vec![Value::str("x"), Value::str("y")],
        )
        .unwrap_err();
    let SandboxError::CapabilityDenied {
        violation: GuardViolation::Denied { operation, type_name },
        ..
    } = err
    else {
        panic!("expected denial, got {err:?}");
    };
    assert_eq!(operation, GuardOp::BinaryOp);
    assert_eq!(type_name, "str");
}

#[test]
fn test_safe_type_set_reflects_config() {
    let config = SandboxConfig::from_toml_str("[namespace]\nsafe_types = [\"int\"]\n").unwrap();
    let safe = config.namespace.safe_type_set();
    assert!(safe.contains(TypeTag::Int));
    assert!(!safe.contains(TypeTag::Str));
}

#[test]
fn test_protected_names_cannot_be_rebound() {
    let executor = executor("[namespace]\nprotected_names = [\"robot\"]\n");
    let err = executor
        .run("def main():\n    robot = 1\n    return robot\n", "main", vec![])
        .unwrap_err();
    assert!(matches!(
        err,
        SandboxError::CapabilityDenied {
            violation: GuardViolation::ReservedName { ref name },
            ..
        } if name == "robot"
    ));
}

#[test]
fn test_denied_calls_are_configurable() {
    let executor = executor("[policy]\ndenied_calls = [\"exec\", \"eval\", \"compile\"]\n");
    let err = executor.check("def main():\n    compile('x')\n").unwrap_err();
    let SandboxError::PolicyViolation { diagnostics, .. } = err else {
        panic!("expected policy violation");
    };
    assert_eq!(diagnostics[0].message, "Compile calls are not allowed.");
}

#[test]
fn test_globals_must_not_shadow_builtins() {
    let err = SandboxExecutor::default()
        .run_with_globals(
            "def main():\n    return 1\n",
            &Invocation::new("main"),
            vec![("len".into(), Value::Int(1))],
        )
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidConfig(_)));
}
