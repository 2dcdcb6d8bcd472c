//! luajit-block command line
//!
//! Inspects the embedded runtime, validates conf files and runs a conf-declared
//! block over raw sample files.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use luajit_block::{
    config::registry::REGISTRY_PREFIX,
    pipeline::{InputPort, OutputPort},
    runtime_info, BlockRegistry, BlockRunner, DType, InputBuffer, OutputBuffer,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "luajit-block", about = "LuaJIT-scripted pipeline blocks", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the embedded runtime description as JSON
    Info,

    /// Parse conf files and bind every declared block
    Check {
        #[arg(required = true)]
        confs: Vec<PathBuf>,

        /// Print each parsed entry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one block over raw sample files
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Conf file declaring the block
    conf: PathBuf,

    /// Factory path from the conf file (e.g. /dsp/gain)
    #[arg(long)]
    factory: String,

    /// Raw native-endian input file, one per input port
    #[arg(long = "input")]
    inputs: Vec<PathBuf>,

    /// Output file, one per output port
    #[arg(long = "output")]
    outputs: Vec<PathBuf>,

    /// Elements to produce when the block has no inputs
    #[arg(long)]
    elements: Option<usize>,

    /// Maximum elements per work() call
    #[arg(long)]
    chunk_size: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,luajit_block=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info => {
            println!("{}", runtime_info()?);
            Ok(())
        }
        Commands::Check { confs, json } => check(&confs, json),
        Commands::Run(args) => run(args),
    }
}

fn check(confs: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let mut registry = BlockRegistry::new();
    for conf in confs {
        let paths = registry
            .load_conf_file(conf)
            .with_context(|| format!("Failed to load {}", conf.display()))?;
        for path in paths {
            let block = registry.make(&path)?;
            if json {
                if let Some(args) = registry.get(&path) {
                    println!("{}", serde_json::to_string_pretty(args)?);
                }
                continue;
            }
            println!(
                "{}: {}({}) -> ({})",
                path,
                block.name(),
                join_types(block.input_types()),
                join_types(block.output_types())
            );
        }
    }
    tracing::info!("{} factories OK", registry.len());
    Ok(())
}

fn join_types(types: &[DType]) -> String {
    types
        .iter()
        .map(DType::name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut registry = BlockRegistry::new();
    registry.load_conf_file(&args.conf)?;
    let path = format!("{}{}", REGISTRY_PREFIX, args.factory);
    let mut block = registry.make(&path)?;

    if args.inputs.len() != block.input_types().len() {
        bail!(
            "{} takes {} inputs, {} given",
            path,
            block.input_types().len(),
            args.inputs.len()
        );
    }
    if args.outputs.len() != block.output_types().len() {
        bail!(
            "{} takes {} outputs, {} given",
            path,
            block.output_types().len(),
            args.outputs.len()
        );
    }

    let mut inputs = Vec::with_capacity(args.inputs.len());
    for (file, dtype) in args.inputs.iter().zip(block.input_types()) {
        let bytes =
            std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        inputs.push(InputBuffer::from_bytes(dtype.clone(), &bytes));
    }

    let capacity = match (inputs.iter().map(InputPort::elements).min(), args.elements) {
        (Some(available), _) => available,
        (None, Some(elements)) => elements,
        (None, None) => bail!("{} has no inputs; pass --elements", path),
    };
    let mut outputs: Vec<OutputBuffer> = block
        .output_types()
        .iter()
        .map(|dtype| OutputBuffer::with_capacity(dtype.clone(), capacity))
        .collect();

    let mut runner = BlockRunner::new(&mut block);
    if let Some(chunk_size) = args.chunk_size {
        runner = runner.with_chunk_size(chunk_size);
    }
    let summary = runner.run_to_completion(&mut inputs, &mut outputs)?;

    for (file, output) in args.outputs.iter().zip(&outputs) {
        std::fs::write(file, output.as_bytes())
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }
    if outputs.iter().any(|output| output.elements() > 0) {
        tracing::warn!("Block stopped with unused output space");
    }

    println!(
        "{} elements in {} calls ({:?})",
        summary.elements, summary.calls, summary.elapsed
    );
    Ok(())
}
