//! CLI binary for running and validating opflow processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use opflow_engine::process::LOG_VERBOSITY;
use opflow_engine::tree::{process_from_json, process_from_xml};
use opflow_engine::{
    default_registry, BreakpointPosition, EngineConfig, EngineError, IoClass, IoContainer,
    OperatorRegistry, ParameterResolver, PausePoint, Process, ProcessContext, Severity,
};
use opflow_performance::PerformanceVector;
use opflow_types::MessageTable;

#[derive(Parser)]
#[command(name = "opflow", version, about = "Operator tree runner for data mining processes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a process file (.xml or .json)
    Run {
        /// Path to the process file
        process: PathBuf,

        /// Engine configuration file (JSON); defaults to OPFLOW_* environment variables
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run even if validation reports errors
        #[arg(long)]
        force: bool,

        /// Pause before the named operators
        #[arg(long, value_name = "OPERATOR", num_args = 1..)]
        break_before: Vec<String>,
    },

    /// Validate a process file
    Validate {
        /// Path to the process file
        process: PathBuf,
    },

    /// Show the operator tree of a process file
    Info {
        /// Path to the process file
        process: PathBuf,
    },

    /// Convert a process file between XML and JSON
    Convert {
        /// Source process file
        input: PathBuf,
        /// Target file; the extension picks the format
        output: PathBuf,
    },

    /// List the available operator types
    Operators,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let registry = default_registry();

    match cli.command {
        Commands::Run {
            process,
            config,
            force,
            break_before,
        } => {
            let config = match config {
                Some(path) => EngineConfig::load(&path)?,
                None => EngineConfig::from_env()?,
            };
            let context = ProcessContext::from_config(config)?;
            let process = load_process(&process, &registry, context)?;
            init_tracing(cli.verbose, Some(&process));
            cmd_run(process, force, &break_before).await?;
        }
        Commands::Validate { process } => {
            let process = load_process(&process, &registry, ProcessContext::default())?;
            init_tracing(cli.verbose, Some(&process));
            cmd_validate(&process);
        }
        Commands::Info { process } => {
            let process = load_process(&process, &registry, ProcessContext::default())?;
            init_tracing(cli.verbose, Some(&process));
            cmd_info(&process);
        }
        Commands::Convert { input, output } => {
            init_tracing(cli.verbose, None);
            cmd_convert(&input, &output, &registry)?;
        }
        Commands::Operators => {
            init_tracing(cli.verbose, None);
            cmd_operators(&registry);
        }
    }

    Ok(())
}

/// `--verbose` wins, then `RUST_LOG`, then the root's `logverbosity`.
fn init_tracing(verbose: bool, process: Option<&Process>) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        let level = process
            .and_then(|p| {
                ParameterResolver::new(p.root(), p.context())
                    .get_category_index("logverbosity")
                    .ok()
            })
            .and_then(|index| LOG_VERBOSITY.get(index).copied())
            .unwrap_or("info");
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_process(
    path: &Path,
    registry: &OperatorRegistry,
    context: ProcessContext,
) -> anyhow::Result<Process> {
    let text = std::fs::read_to_string(path)?;
    let record = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        process_from_json(&text)?
    } else {
        process_from_xml(&text)?
    };
    let root = record.build(registry)?;
    Ok(Process::with_context(root, Arc::new(context)))
}

fn cmd_validate(process: &Process) {
    let report = process.validate();

    if report.diagnostics.is_empty() {
        println!("Process is valid");
        return;
    }

    for diag in &report.diagnostics {
        let severity = match diag.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if report.error_count() > 0 {
        std::process::exit(2);
    }
}

fn cmd_info(process: &Process) {
    let root = process.root();
    println!("Process: {} ({})", root.name(), root.type_name());
    if let Some(text) = root.user_description() {
        println!("Description: {text}");
    }
    println!("Operators: {}", root.count());

    println!("\nTree:");
    root.walk(&mut |op, depth| {
        let mut flags = Vec::new();
        if !op.is_enabled() {
            flags.push("disabled".to_string());
        }
        for position in op.breakpoints().positions() {
            flags.push(format!("break {position}"));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{}{} ({}){}", "  ".repeat(depth + 1), op.name(), op.type_name(), flags);
        for (key, value) in op.parameters().iter() {
            println!("{}  {} = {}", "  ".repeat(depth + 1), key, value.display());
        }
    });
}

fn cmd_convert(input: &Path, output: &Path, registry: &OperatorRegistry) -> anyhow::Result<()> {
    let process = Process::load(input, registry)?;
    process.save(output)?;
    println!("Wrote {} ({} operators)", output.display(), process.root().count());
    Ok(())
}

fn cmd_operators(registry: &OperatorRegistry) {
    for desc in registry.descriptions() {
        let kind = if desc.is_chain() { "chain" } else { "operator" };
        println!("{} [{}, {}]", desc.type_name, desc.group, kind);
        if !desc.summary.is_empty() {
            println!("  {}", desc.summary);
        }
        for param in &desc.parameters {
            let default = param
                .default
                .as_ref()
                .map(|v| format!(" (default: {})", v.display()))
                .unwrap_or_default();
            let optional = if param.optional { ", optional" } else { "" };
            println!("  - {} [{}{}]{}", param.key, param.kind.name(), optional, default);
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(mut process: Process, force: bool, break_before: &[String]) -> anyhow::Result<()> {
    for name in break_before {
        process
            .operator_mut(name)?
            .set_breakpoint(BreakpointPosition::Before, true);
    }

    let report = process.validate();
    for diag in report.errors() {
        eprintln!("[ERROR] {}: {}", diag.rule, diag.message);
    }
    if report.error_count() > 0 && !force {
        eprintln!(
            "Process has {} validation error(s); use --force to run anyway",
            report.error_count()
        );
        std::process::exit(2);
    }

    println!("Running process: {}", process.root().name());
    let process = Arc::new(process);
    let controller = process.controller();
    let mut task = {
        let process = process.clone();
        tokio::spawn(async move { process.run(IoContainer::empty()).await })
    };
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let result = loop {
        tokio::select! {
            joined = &mut task => break joined?,
            pause = controller.wait_for_pause() => match pause {
                Some(point) => {
                    print_pause(&point);
                    if prompt(&mut stdin).await? {
                        controller.resume();
                    } else {
                        controller.stop();
                    }
                }
                None => break (&mut task).await?,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stop requested; finishing the current operator");
                controller.stop();
            }
        }
    };

    match result {
        Ok(output) => {
            println!("\nProcess completed");
            print_results(&output)?;
            Ok(())
        }
        Err(err) => {
            report_error(&err, process.context().messages());
            std::process::exit(err.exit_code());
        }
    }
}

fn print_pause(point: &PausePoint) {
    println!(
        "\nBreakpoint reached {} {}",
        point.position, point.operator
    );
    for artifact in point.container.summary() {
        match artifact.source {
            Some(source) => println!("  {} (from {})", artifact.class, source),
            None => println!("  {}", artifact.class),
        }
    }
}

/// `true` to resume, `false` to stop. End of input stops the run.
async fn prompt(stdin: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<bool> {
    loop {
        println!("resume / stop?");
        let Some(line) = stdin.next_line().await? else {
            return Ok(false);
        };
        match line.trim().to_ascii_lowercase().as_str() {
            "" | "r" | "resume" => return Ok(true),
            "s" | "stop" => return Ok(false),
            other => println!("Unknown command '{other}'"),
        }
    }
}

fn print_results(output: &IoContainer) -> anyhow::Result<()> {
    println!("Results: {} artifact(s)", output.len());
    println!("{}", serde_json::to_string_pretty(&output.summary())?);

    for artifact in output.get_all(&IoClass::PERFORMANCE_VECTOR) {
        if let Some(vector) = artifact.downcast_ref::<PerformanceVector>() {
            println!("\nPerformance:");
            for c in vector.summary() {
                println!(
                    "  {}: {:.4} +/- {:.4} ({} runs, {} examples)",
                    c.name, c.average, c.standard_deviation, c.runs, c.examples
                );
            }
        }
    }
    Ok(())
}

fn report_error(err: &EngineError, messages: &MessageTable) {
    if err.is_stop() {
        eprintln!("\nProcess stopped: {err}");
        return;
    }
    eprintln!("\nProcess failed: {err}");
    if let EngineError::User(user) = err {
        let long = user.long_message(messages);
        if !long.is_empty() {
            eprintln!("{long}");
        }
    }
}
