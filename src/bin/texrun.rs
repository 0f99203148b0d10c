//! texrun - Sandboxed LaTeX compiler CLI
//!
//! Compiles a single `.tex` file through the same engine a service would
//! embed. Mostly useful for operators checking a host's setup.
//!
//! ## Usage
//!
//! ```sh
//! texrun compile <input.tex> [-o <output.pdf>] [--locale <tag>] [--config <file>] [--metrics]
//! texrun check [--config <file>]
//! texrun config [--config <file>]
//! ```
//!
//! ## Configuration
//!
//! Read from `--config`, else `<config dir>/texrun/config.yaml` when it
//! exists, else built-in defaults. `TEXRUN_*` environment variables are
//! applied on top.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use texrun::{
    CompilationEngine, CompilationRequest, EngineConfig, InMemoryMetrics, MetricsSink, NoopMetrics,
};
use tracing_subscriber::EnvFilter;

// =============================================================================
// Constants
// =============================================================================

/// Default config location: `<config dir>/texrun/config.yaml`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("texrun").join("config.yaml"))
}

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Compile {
        input: PathBuf,
        output: Option<PathBuf>,
        locale: String,
        config: Option<PathBuf>,
        metrics: bool,
    },
    Check {
        config: Option<PathBuf>,
    },
    Config {
        config: Option<PathBuf>,
    },
    Version,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(sub) = args.get(1) else {
        return Ok(Command::Help);
    };

    let mut positional = Vec::new();
    let mut output = None;
    let mut locale = texrun::engine::DEFAULT_LOCALE.to_string();
    let mut config = None;
    let mut metrics = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => {
                output = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--locale" => {
                locale = flag_value(args, i)?.to_string();
                i += 2;
            }
            "--config" | "-c" => {
                config = Some(PathBuf::from(flag_value(args, i)?));
                i += 2;
            }
            "--metrics" => {
                metrics = true;
                i += 1;
            }
            flag if flag.starts_with('-') => return Err(format!("unknown flag: {flag}")),
            value => {
                positional.push(value.to_string());
                i += 1;
            }
        }
    }

    match sub.as_str() {
        "compile" => {
            let [input] = positional.as_slice() else {
                return Err("compile requires exactly one <input.tex>".to_string());
            };
            Ok(Command::Compile {
                input: PathBuf::from(input),
                output,
                locale,
                config,
                metrics,
            })
        }
        "check" => Ok(Command::Check { config }),
        "config" => Ok(Command::Config { config }),
        "version" | "--version" | "-V" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {unknown}")),
    }
}

fn flag_value(args: &[String], i: usize) -> Result<&str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", args[i]))
}

// =============================================================================
// Commands
// =============================================================================

fn load_config(explicit: Option<&Path>) -> texrun::Result<EngineConfig> {
    let base = match explicit {
        Some(path) => EngineConfig::from_file(path)?,
        None => match default_config_path() {
            Some(path) if path.is_file() => EngineConfig::from_file(&path)?,
            _ => EngineConfig::default(),
        },
    };
    let config = base.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn cmd_compile(
    input: PathBuf,
    output: Option<PathBuf>,
    locale: String,
    config: Option<PathBuf>,
    show_metrics: bool,
) -> Result<(), String> {
    let config = load_config(config.as_deref()).map_err(|e| e.to_string())?;
    let source = std::fs::read_to_string(&input)
        .map_err(|e| format!("cannot read {}: {e}", input.display()))?;
    let output = output.unwrap_or_else(|| input.with_extension("pdf"));

    let metrics = Arc::new(InMemoryMetrics::new());
    let sink: Arc<dyn MetricsSink> = metrics.clone();
    let engine = CompilationEngine::connect(config, sink).map_err(|e| e.to_string())?;

    let outcome = engine.compile(CompilationRequest::new(source, locale)).await;
    // A timed-out container is still being removed; the runtime must outlive it.
    engine.shutdown().await;

    if show_metrics {
        match serde_json::to_string_pretty(&metrics.snapshot().by_metric_name()) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => eprintln!("warning: cannot render metrics: {e}"),
        }
    }

    match outcome {
        Ok(pdf) => {
            std::fs::write(&output, pdf.bytes())
                .map_err(|e| format!("cannot write {}: {e}", output.display()))?;
            eprintln!(
                "Wrote {} ({} bytes, {:.2}s)",
                output.display(),
                pdf.len(),
                pdf.duration().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            if let Some(logs) = e.logs() {
                eprintln!("{logs}");
            }
            Err(format!("{e} [{}]", e.kind()))
        }
    }
}

async fn cmd_check(config: Option<PathBuf>) -> Result<(), String> {
    let config = load_config(config.as_deref()).map_err(|e| e.to_string())?;
    let image = config.image.clone();
    let engine =
        CompilationEngine::connect(config, Arc::new(NoopMetrics)).map_err(|e| e.to_string())?;
    let warmed = engine.warm_up().await;
    engine.shutdown().await;
    warmed.map_err(|e| e.to_string())?;
    eprintln!("Runtime '{}' ready, image {image} present", engine.runtime_name());
    Ok(())
}

fn cmd_config(config: Option<PathBuf>) -> Result<(), String> {
    let config = load_config(config.as_deref()).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn cmd_version() {
    println!("texrun {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"texrun - sandboxed LaTeX to PDF compiler

USAGE:
    texrun <command> [options]

COMMANDS:
    compile <input.tex>    Compile a document
    check                  Connect to the runtime and make sure the image is present
    config                 Print the effective configuration as JSON
    version                Print version
    help                   Print this help

OPTIONS:
    -o, --output <file>    Output PDF (default: input with .pdf extension)
        --locale <tag>     Locale passed to the toolchain (default: en)
    -c, --config <file>    YAML configuration file
        --metrics          Print lifecycle metrics after compiling

ENVIRONMENT:
    RUST_LOG               Log filter (default: info)
    TEXRUN_*               Configuration overrides"#
    );
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cmd = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("error: {e}");
            cmd_help();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let result = match cmd {
        Command::Compile {
            input,
            output,
            locale,
            config,
            metrics,
        } => cmd_compile(input, output, locale, config, metrics).await,
        Command::Check { config } => cmd_check(config).await,
        Command::Config { config } => cmd_config(config),
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
