//! Edition Forge CLI
//!
//! Commands: build, setup, layers
//! Outputs JSON to stdout
//! Returns 1 on configuration errors, 2 when a run aborts

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use editionforge_core::{
    build_collection, BuildLayout, CatalogSource, EngineConfig, EngineError, LayerCatalog,
};

#[derive(Parser)]
#[command(name = "editionforge-cli")]
#[command(about = "Edition Forge CLI - generative layered editions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the run configuration
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long)]
    debug: bool,

    /// Override the configured random seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the build directory and generate every edition
    Build,

    /// Recreate the build directory only
    Setup,

    /// Print every layer configuration with trait weights
    Layers,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(error: &EngineError) -> ExitCode {
    let output = serde_json::json!({
        "success": false,
        "error": error.to_string(),
    });
    println!("{}", output);
    if error.is_generation_abort() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&EngineError::from(e)),
    }
}

fn describe_layers(config: &EngineConfig) -> Result<serde_json::Value, EngineError> {
    let catalog = LayerCatalog::from_config(config);
    let targets = config.batch_targets();
    let mut batches = vec![];

    for (index, spec) in config.layer_configurations.iter().enumerate() {
        let batch = catalog.load(index, spec, targets[index])?;
        let layers: Vec<_> = batch
            .layers
            .iter()
            .map(|layer| {
                let total = layer.total_weight().max(1) as f64;
                let elements: Vec<_> = layer
                    .elements
                    .iter()
                    .map(|e| serde_json::json!({
                        "id": e.id,
                        "name": e.name,
                        "filename": e.filename,
                        "weight": e.weight,
                        "probability": f64::from(e.weight) / total,
                    }))
                    .collect();
                serde_json::json!({
                    "name": layer.name,
                    "bypassDNA": layer.bypass_dna,
                    "blend": layer.blend,
                    "opacity": layer.opacity,
                    "elements": elements,
                })
            })
            .collect();
        batches.push(serde_json::json!({
            "index": index,
            "targetCount": batch.target_count,
            "layers": layers,
        }));
    }
    Ok(serde_json::Value::Array(batches))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = match EngineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    match cli.command {
        Commands::Build => match build_collection(&config) {
            Ok(summary) => print_json(&serde_json::json!({
                "success": true,
                "summary": summary,
            })),
            Err(e) => fail(&e),
        },

        Commands::Setup => match BuildLayout::new(&config.build_dir).setup(config.gif.export) {
            Ok(()) => print_json(&serde_json::json!({
                "success": true,
                "buildDir": config.build_dir,
            })),
            Err(e) => fail(&e),
        },

        Commands::Layers => match describe_layers(&config) {
            Ok(batches) => print_json(&batches),
            Err(e) => fail(&e),
        },
    }
}
