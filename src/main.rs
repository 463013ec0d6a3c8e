use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use wasm_harness::config::HarnessConfig;
use wasm_harness::wasm::{ImportsSpec, ModuleSource, RunResult, Value, WasmHarness};

#[derive(Parser)]
#[command(name = "wasm-harness", about = "Load a WebAssembly module and run one export.")]
struct Cli {
    /// Config file (defaults to $WASM_HARNESS_CONFIG, then .wasm-harness/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the run result as JSON instead of plain values
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an export of a module given by path or http(s) URL
    Run {
        /// Module path or URL
        source: String,

        /// Arguments: 4, -3, 2.5, 7:i64, 1.5:f32
        #[arg(allow_negative_numbers = true)]
        args: Vec<Value>,

        /// Exported function to call
        #[arg(short, long, default_value = "main")]
        entry: String,

        /// Link no host functions
        #[arg(long)]
        no_imports: bool,

        /// Namespace the host functions are provided under
        #[arg(long, default_value = wasm_harness::wasm::imports::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Run a named scenario
    Scenario {
        name: String,
    },
    /// List available scenarios
    Scenarios,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wasm_harness=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = HarnessConfig::load(cli.config.as_deref())?;

    let (source, entry, args, imports) = match cli.command {
        Command::Scenarios => {
            for s in config.scenarios() {
                let args: Vec<String> = s.values()?.iter().map(|v| v.to_string()).collect();
                println!("{}\t{}\t{}({})", s.name, s.source, s.entry, args.join(", "));
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Scenario { name } => {
            let scenario = config
                .scenario(&name)
                .with_context(|| format!("no scenario named '{name}'"))?;
            let args = scenario.values()?;
            (scenario.module_source(), scenario.entry, args, scenario.imports)
        }
        Command::Run {
            source,
            args,
            entry,
            no_imports,
            namespace,
        } => {
            let imports = if no_imports {
                ImportsSpec::none()
            } else {
                ImportsSpec::print_string()
            };
            (
                ModuleSource::parse(&source),
                entry,
                args,
                imports.in_namespace(namespace),
            )
        }
    };

    let harness = WasmHarness::new(&config)?;
    info!("running {entry} from {source}");
    let result = harness.load_and_run(&source, &entry, &args, &imports).await;

    if cli.json {
        println!("{}", serde_json::to_string(&result)?);
    }
    match &result {
        RunResult::Success { results } => {
            if !cli.json {
                for value in results {
                    println!("{value}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        RunResult::Failure { stage, cause } => {
            eprintln!("error: {stage} failed: {cause}");
            Ok(ExitCode::FAILURE)
        }
    }
}
