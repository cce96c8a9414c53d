use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::context::{ExecutionContext, LanguageMode};
use crate::engine::Engine;
use crate::invoke::InvokeOptions;
use crate::runner::ClauseRunner;
use crate::services::describe_attribute;
use crate::session::Pipe;
use crate::types::{Clause, Outcome, Val};

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Tempo - run and inspect tempo scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script file
    Run {
        /// Script file to run
        file: PathBuf,

        /// Positional arguments bound to the script's parameters
        args: Vec<String>,

        /// Feed each line of stdin to the process clause
        #[arg(long)]
        stdin: bool,

        /// Report `exit` to the host instead of absorbing it
        #[arg(long)]
        rethrow_exit: bool,

        /// Language mode to run in (overrides config)
        #[arg(long, value_enum)]
        language_mode: Option<LanguageMode>,
    },

    /// Compile a script file and print its metadata as JSON
    Inspect {
        /// Script file to inspect
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments; returns the process exit code
pub fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

pub fn run_cli_from_args(args: Vec<String>) -> Result<i32> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<i32> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let mut builder = Config::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    let config = builder.build().context("Failed to load configuration")?;

    init_tracing(&config);

    match cli.command {
        Commands::Run {
            file,
            args,
            stdin,
            rethrow_exit,
            language_mode,
        } => run_script(config, file, args, stdin, rethrow_exit, language_mode),
        Commands::Inspect { file } => {
            inspect_script(config, file)?;
            Ok(0)
        }
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(0)
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_script(
    config: Config,
    file: PathBuf,
    args: Vec<String>,
    stdin: bool,
    rethrow_exit: bool,
    language_mode: Option<LanguageMode>,
) -> Result<i32> {
    let engine = Engine::builder().config(config).build();
    let mut ctx = ExecutionContext::new(engine.clone());
    if let Some(mode) = language_mode {
        ctx.set_language_mode(mode);
    }

    let block = engine
        .create_from_file(&file)
        .with_context(|| format!("Failed to load script {}", file.display()))?;

    let output = Pipe::new();
    let errors = Pipe::new();
    let options = InvokeOptions {
        args: args.iter().map(|a| parse_arg(a)).collect(),
        standalone: true,
        rethrow_exit,
        output: Some(output.clone()),
        error_pipe: Some(errors.clone()),
        ..InvokeOptions::default()
    };

    let mut runner = ClauseRunner::new(&mut ctx, block, options)
        .with_context(|| format!("Failed to compile {}", file.display()))?;

    let mut outcome = runner.begin(&mut ctx)?;
    flush(&output, &errors);

    let mut streamed = false;
    if stdin && !outcome.is_terminal() {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("Failed to read stdin")?;
            streamed = true;
            outcome = runner.process(&mut ctx, Some(Val::Str(line)))?;
            flush(&output, &errors);
            if outcome.is_terminal() {
                break;
            }
        }
    }

    // process still runs once without input
    if !streamed && !outcome.is_terminal() {
        outcome = runner.process(&mut ctx, None)?;
        flush(&output, &errors);
    }

    if !outcome.is_terminal() {
        outcome = runner.end(&mut ctx)?;
        flush(&output, &errors);
    }

    Ok(match outcome {
        Outcome::Exited(code) | Outcome::ExitRequested(code) => code,
        Outcome::Terminated => 1,
        Outcome::Completed => ctx.last_exit_code().unwrap_or(0),
    })
}

fn inspect_script(config: Config, file: PathBuf) -> Result<()> {
    let engine = Engine::builder().config(config).build();
    let block = engine
        .create_from_file(&file)
        .with_context(|| format!("Failed to load script {}", file.display()))?;

    let optimized = block
        .compile(true)
        .with_context(|| format!("Failed to compile {}", file.display()))?;
    let code = block.code();
    let metadata = code.metadata()?;

    let clauses: Vec<&str> = Clause::ALL
        .iter()
        .filter(|c| code.has_clause(**c).unwrap_or(false))
        .map(|c| c.name())
        .collect();
    let attributes: Vec<String> = metadata.attributes.iter().map(describe_attribute).collect();

    let report = json!({
        "origin": code.origin(),
        "hash": code.content_hash(),
        "parameters": metadata.parameters,
        "attributes": attributes,
        "uses_advanced_binding": metadata.uses_advanced_binding,
        "clauses": clauses,
        "tier": if optimized { "optimized" } else { "unoptimized" },
        "trusted": code.is_trusted()?,
        "suspicious": code.has_suspicious_content()?,
        "slots": code.name_to_index(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Numbers and booleans are passed typed; anything else as a string
fn parse_arg(arg: &str) -> Val {
    if let Ok(n) = arg.parse::<f64>() {
        return Val::Num(n);
    }
    match arg.to_ascii_lowercase().as_str() {
        "$true" => Val::Bool(true),
        "$false" => Val::Bool(false),
        "$null" => Val::Null,
        _ => Val::Str(arg.to_string()),
    }
}

fn flush(output: &Pipe, errors: &Pipe) {
    for value in output.take() {
        println!("{}", value);
    }
    for value in errors.take() {
        eprintln!("{}", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("42"), Val::Num(42.0));
        assert_eq!(parse_arg("$TRUE"), Val::Bool(true));
        assert_eq!(parse_arg("hello"), Val::Str("hello".into()));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["tempo", "run", "a.tempo", "1", "x", "--rethrow-exit"]);
        match cli.command {
            Commands::Run {
                file,
                args,
                rethrow_exit,
                stdin,
                ..
            } => {
                assert_eq!(file, PathBuf::from("a.tempo"));
                assert_eq!(args, vec!["1".to_string(), "x".to_string()]);
                assert!(rethrow_exit);
                assert!(!stdin);
            }
            _ => panic!("Expected Run"),
        }
    }
}
