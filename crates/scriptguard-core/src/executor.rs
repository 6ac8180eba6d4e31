//! Sandbox executor: parse, policy-check, compile, bind, invoke.
//!
//! Every `run` starts a fresh pipeline with its own namespace and output
//! collector. No stage is skipped; a policy rejection or a runtime error is
//! terminal for that run.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compile::{compile, CompiledModule};
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult, ScriptFault};
use crate::metrics::METRICS;
use crate::namespace::NamespaceBuilder;
use crate::obs;
use crate::policy::names::is_entry_identifier;
use crate::policy::transform;
use crate::runtime::exception::Unwind;
use crate::runtime::{Interpreter, Value};
use crate::syntax::parse;

/// Pipeline stages, in order. `Rejected` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unparsed,
    Parsed,
    PolicyChecked,
    Rejected,
    Rewritten,
    Compiled,
    Bound,
    Executing,
    Completed,
}

fn enter(stage: Stage) {
    debug!(stage = ?stage, "stage transition");
}

/// Which function to call and with what.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub entry: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl Invocation {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    pub fn with_args(entry: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            args,
            ..Self::new(entry)
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.push((name.into(), value.into()));
        self
    }

    /// Entry and parameter names must match `^[A-Za-z][A-Za-z0-9_]*$`.
    pub fn validate(&self) -> SandboxResult<()> {
        if !is_entry_identifier(&self.entry) {
            return Err(SandboxError::InvalidEntryRequest(format!(
                "invalid entry function name '{}'",
                self.entry
            )));
        }
        for (name, _) in &self.kwargs {
            if !is_entry_identifier(name) {
                return Err(SandboxError::InvalidEntryRequest(format!(
                    "invalid parameter name '{name}'"
                )));
            }
        }
        Ok(())
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct Execution {
    pub run_id: String,
    pub value: Value,
    pub output: String,
}

/// Runs scripts under one configuration. Holds no script state, so it can be
/// shared across threads; each run stays on its calling thread.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run the pipeline through `Compiled` without executing anything.
    pub fn compile(&self, source: &str) -> SandboxResult<CompiledModule> {
        let filename = &self.config.filename;
        enter(Stage::Unparsed);
        let module = parse(source).map_err(|diagnostic| SandboxError::Syntax {
            filename: filename.clone(),
            diagnostic,
        })?;
        enter(Stage::Parsed);
        let guarded = match transform(&module, &self.config.policy) {
            Ok(guarded) => guarded,
            Err(diagnostics) => {
                enter(Stage::Rejected);
                return Err(SandboxError::PolicyViolation {
                    filename: filename.clone(),
                    diagnostics,
                });
            }
        };
        enter(Stage::PolicyChecked);
        enter(Stage::Rewritten);
        let compiled = compile(guarded, filename).map_err(|diagnostic| SandboxError::Syntax {
            filename: filename.clone(),
            diagnostic,
        })?;
        enter(Stage::Compiled);
        Ok(compiled)
    }

    /// Compile only; `Ok` means the script would be accepted.
    pub fn check(&self, source: &str) -> SandboxResult<()> {
        self.compile(source).map(|_| ())
    }

    /// Call `entry(*args)` in `source`.
    pub fn run(&self, source: &str, entry: &str, args: Vec<Value>) -> SandboxResult<Execution> {
        self.invoke(source, &Invocation::with_args(entry, args))
    }

    pub fn invoke(&self, source: &str, invocation: &Invocation) -> SandboxResult<Execution> {
        self.run_with_globals(source, invocation, Vec::new())
    }

    /// Like [`invoke`](Self::invoke), with host values injected as globals.
    /// Their names join the protected set.
    pub fn run_with_globals(
        &self,
        source: &str,
        invocation: &Invocation,
        globals: Vec<(String, Value)>,
    ) -> SandboxResult<Execution> {
        invocation.validate()?;
        let run_id = obs::new_run_id();
        let _span = obs::RunSpan::enter(&run_id, &invocation.entry);
        let started = Instant::now();
        METRICS.inc_runs_started();
        obs::emit_run_started(&run_id, &invocation.entry, &obs::script_digest(source));

        let result = self.execute(&run_id, source, invocation, globals);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(execution) => {
                METRICS.inc_runs_completed();
                obs::emit_run_finished(&run_id, duration_ms, true, execution.output.len());
            }
            Err(err) => {
                match err {
                    SandboxError::PolicyViolation { diagnostics, .. } => {
                        METRICS.inc_policy_rejections();
                        obs::emit_run_rejected(&run_id, diagnostics.len());
                    }
                    SandboxError::CapabilityDenied {
                        violation,
                        function,
                        line,
                    } => {
                        METRICS.inc_capability_denials();
                        obs::emit_run_denied(&run_id, violation, function, *line);
                    }
                    _ => {}
                }
                obs::emit_run_finished(&run_id, duration_ms, false, 0);
            }
        }
        result
    }

    fn execute(
        &self,
        run_id: &str,
        source: &str,
        invocation: &Invocation,
        globals: Vec<(String, Value)>,
    ) -> SandboxResult<Execution> {
        let module = self.compile(source)?;
        let entry = invocation.entry.as_str();
        let namespace = NamespaceBuilder::new(&self.config.namespace, &self.config.policy)
            .globals(globals)
            .build()?;
        let mut interp = Interpreter::new(namespace, self.config.max_call_depth);
        interp.bind(&module).map_err(|u| terminal(u, entry))?;
        enter(Stage::Bound);

        let function = match (module.function(entry), interp.global(entry)) {
            (Some(_), Some(function)) => function.clone(),
            _ => {
                return Err(SandboxError::InvalidEntryRequest(format!(
                    "name '{entry}' is not defined"
                )))
            }
        };
        enter(Stage::Executing);
        let value = interp
            .call_value(
                &function,
                invocation.args.clone(),
                invocation.kwargs.clone(),
            )
            .map_err(|u| terminal(u, entry))?;
        enter(Stage::Completed);
        Ok(Execution {
            run_id: run_id.to_string(),
            value,
            output: interp.take_output(),
        })
    }
}

/// Convert an escaped unwind into the run's terminal error.
fn terminal(unwind: Unwind, entry: &str) -> SandboxError {
    match unwind {
        Unwind::Raise(exc) => SandboxError::HostComputation(ScriptFault::from_exception(*exc, entry)),
        Unwind::Denied {
            violation,
            location,
        } => {
            let (function, line) = match location {
                Some(location) => (location.function, location.line),
                None => (entry.to_string(), 0),
            };
            SandboxError::CapabilityDenied {
                violation,
                function,
                line,
            }
        }
    }
}
