//! scriptguard - diagnostic runner for sandboxed control scripts
//!
//! ## Commands
//!
//! - `run`: execute one function of a script and print what it printed
//! - `check`: compile a script and list every policy diagnostic

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};

use scriptguard_core::runtime::format::repr;
use scriptguard_core::{Invocation, SandboxConfig, SandboxError, SandboxExecutor, Value};

#[derive(Parser)]
#[command(name = "scriptguard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run restricted control scripts behind capability guards", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Sandbox configuration file (TOML)
    #[arg(short, long, global = true, env = "SCRIPTGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a function from a script and print its output
    Run {
        /// Script file
        #[arg(short, long)]
        file: PathBuf,

        /// Entry function to call
        #[arg(short = 'n', long, default_value = "main")]
        function: String,

        /// Positional arguments as a JSON array
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Compile a script without running it
    Check {
        /// Script file
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    scriptguard_core::init_tracing(cli.json, level);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Run {
            file,
            function,
            args,
        } => cmd_run(config, &file, &function, args.as_deref()),
        Commands::Check { file } => cmd_check(config, &file),
    }
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => SandboxConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SandboxConfig::default()),
    }
}

fn read_script(config: &mut SandboxConfig, file: &Path) -> Result<String> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script {}", file.display()))?;
    config.filename = file.display().to_string();
    Ok(source)
}

fn parse_args(args: Option<&str>) -> Result<Vec<Value>> {
    let Some(text) = args else {
        return Ok(Vec::new());
    };
    let json: serde_json::Value =
        serde_json::from_str(text).context("--args must be valid JSON")?;
    let serde_json::Value::Array(items) = json else {
        bail!("--args must be a JSON array");
    };
    Ok(items.iter().map(Value::from_json).collect())
}

fn cmd_run(mut config: SandboxConfig, file: &Path, function: &str, args: Option<&str>) -> Result<()> {
    let source = read_script(&mut config, file)?;
    let args = parse_args(args)?;
    let executor = SandboxExecutor::new(config)?;
    let invocation = Invocation::with_args(function, args);

    let execution = executor
        .invoke(&source, &invocation)
        .map_err(|err| report(&err))?;
    debug!(run_id = %execution.run_id, "run finished");

    print!("{}", execution.output);
    if !execution.value.is_none() {
        match execution.value.to_json() {
            Some(json) => println!("{json}"),
            None => println!("{}", repr(&execution.value)),
        }
    }
    Ok(())
}

fn cmd_check(mut config: SandboxConfig, file: &Path) -> Result<()> {
    let source = read_script(&mut config, file)?;
    let filename = config.filename.clone();
    let executor = SandboxExecutor::new(config)?;
    match executor.compile(&source) {
        Ok(module) => {
            let names: Vec<&str> = module.function_names().collect();
            println!("{filename}: ok ({} function(s): {})", names.len(), names.join(", "));
            Ok(())
        }
        Err(err) => Err(report(&err)),
    }
}

/// Print compile diagnostics one per line, then hand the error to anyhow.
fn report(err: &SandboxError) -> anyhow::Error {
    let filename = match err {
        SandboxError::Syntax { filename, .. } | SandboxError::PolicyViolation { filename, .. } => {
            filename.as_str()
        }
        _ => "",
    };
    for diagnostic in err.diagnostics() {
        eprintln!(
            "{filename}:{}:{}: {}",
            diagnostic.span.line, diagnostic.span.column, diagnostic.message
        );
    }
    anyhow::anyhow!("{err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args_accepts_json_array() {
        let args = parse_args(Some("[1, \"two\", [3.5]]")).unwrap();
        assert_eq!(args.len(), 3);
        assert!(matches!(args[0], Value::Int(1)));
        assert!(matches!(&args[1], Value::Str(s) if &**s == "two"));
    }

    #[test]
    fn test_parse_args_rejects_non_array() {
        assert!(parse_args(Some("{\"a\": 1}")).is_err());
        assert!(parse_args(Some("not json")).is_err());
        assert!(parse_args(None).unwrap().is_empty());
    }

    #[test]
    fn test_read_script_sets_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.py");
        std::fs::write(&path, "def main():\n    return 1\n").unwrap();
        let mut config = SandboxConfig::default();
        let source = read_script(&mut config, &path).unwrap();
        assert!(source.starts_with("def main"));
        assert!(config.filename.ends_with("controller.py"));
    }

    #[test]
    fn test_cli_parses_run_command() {
        let cli = Cli::try_parse_from([
            "scriptguard",
            "--verbose",
            "run",
            "--file",
            "a.py",
            "--function",
            "go",
            "--args",
            "[1]",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run { function, args, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(function, "go");
        assert_eq!(args.as_deref(), Some("[1]"));
    }
}
