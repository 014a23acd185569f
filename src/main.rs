//! modelbox - command-line front end for the model lifecycle core

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use modelbox::{InferenceEngine, ModelFormat, Runtime, config::ModelboxConfig, metrics};
use std::io::Write;
use std::path::PathBuf;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "modelbox")]
#[command(about = "Local model catalog, conversion and text generation", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override storage root
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Print a Prometheus metrics snapshot to stderr on exit
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known models
    List {
        /// Also show resident models
        #[arg(long)]
        resident: bool,
    },
    /// Show a model record as JSON
    Show { model_id: String },
    /// Download a native snapshot
    Download {
        model_id: String,
        /// Branch, tag or commit (defaults to the configured revision)
        #[arg(long)]
        revision: Option<String>,
    },
    /// Convert a model to another format
    Convert {
        model_id: String,
        /// Target format (onnx)
        #[arg(long, default_value = "onnx")]
        format: ModelFormat,
        /// Quantize the exported graph
        #[arg(long)]
        quantize: bool,
    },
    /// Load a model and report where it landed
    Load {
        model_id: String,
        #[arg(long)]
        runtime: Option<Runtime>,
    },
    /// Generate text and print it when complete
    Generate {
        model_id: String,
        prompt: String,
        /// Total token bound, prompt included
        #[arg(long)]
        max_length: Option<usize>,
        #[arg(long)]
        runtime: Option<Runtime>,
    },
    /// Stream generated text as it is produced (native runtime)
    Stream {
        model_id: String,
        prompt: String,
        /// Maximum number of new tokens
        #[arg(long)]
        max_length: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
    }

    // Load configuration
    let mut config = ModelboxConfig::load(cli.config)?;

    // CLI overrides
    if let Some(root) = cli.storage_root {
        config.storage_root = root;
    }

    config.validate()?;

    tracing::info!(
        storage_root = ?config.storage_root,
        default_runtime = %config.default_runtime,
        device = ?config.device,
        "Configuration loaded"
    );

    let prometheus_handle = if cli.print_metrics {
        Some(metrics::setup_metrics()?)
    } else {
        None
    };

    let engine = InferenceEngine::from_config(&config).await?;
    let result = run(&engine, &config, cli.command).await;

    if let Some(handle) = prometheus_handle {
        eprintln!("{}", handle.render());
    }

    result
}

async fn run(engine: &InferenceEngine, config: &ModelboxConfig, command: Command) -> Result<()> {
    match command {
        Command::List { resident } => {
            for model_id in engine.list_models().await {
                let record = engine.get_model(&model_id).await?;
                let formats: Vec<&str> = record.formats.keys().map(|f| f.as_str()).collect();
                println!("{}\t{}\t{}", model_id, record.revision, formats.join(","));
            }
            if resident {
                for model in engine.resident_models().await {
                    println!(
                        "resident\t{}\t{}\t{}",
                        model.model_id, model.runtime, model.device
                    );
                }
            }
        }
        Command::Show { model_id } => {
            let record = engine.get_model(&model_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("Failed to render record")?
            );
        }
        Command::Download { model_id, revision } => {
            let revision = revision.unwrap_or_else(|| config.default_revision.clone());
            let record = engine.download(&model_id, &revision).await?;
            println!("{}", record.path.display());
        }
        Command::Convert {
            model_id,
            format,
            quantize,
        } => {
            let path = engine.convert(&model_id, format, quantize).await?;
            println!("{}", path.display());
        }
        Command::Load { model_id, runtime } => {
            let runtime = runtime.unwrap_or(config.default_runtime);
            let asset = engine.load(&model_id, runtime).await?;
            println!(
                "{}\t{}\t{}\t{} bytes",
                asset.model_id, asset.runtime, asset.device, asset.resident_bytes
            );
        }
        Command::Generate {
            model_id,
            prompt,
            max_length,
            runtime,
        } => {
            let text = engine
                .generate(
                    &model_id,
                    &prompt,
                    max_length.unwrap_or(config.max_length),
                    runtime.unwrap_or(config.default_runtime),
                )
                .await?;
            println!("{}", text);
        }
        Command::Stream {
            model_id,
            prompt,
            max_length,
        } => {
            let mut stream = engine
                .generate_stream(
                    &model_id,
                    &prompt,
                    max_length.unwrap_or(config.stream_max_length),
                )
                .await?;

            let mut stdout = std::io::stdout();
            loop {
                tokio::select! {
                    fragment = stream.next() => match fragment {
                        Some(fragment) => {
                            write!(stdout, "{}", fragment?)?;
                            stdout.flush()?;
                        }
                        None => break,
                    },
                    _ = signal::ctrl_c() => {
                        // Dropping the stream stops the worker at the next token
                        tracing::info!("Received Ctrl+C signal, abandoning stream");
                        break;
                    }
                }
            }
            writeln!(stdout)?;
        }
    }

    Ok(())
}
