//! Command line entry point.
//!
//! Subcommands:
//!   describe -- Print the network a config builds
//!   init     -- Save freshly initialised weights for a config
//!   check    -- Load every weight file of a directory into a config's network

use anyhow::Context;
use clap::{Parser, Subcommand};
use medfusion::prelude::*;
use medfusion::weights::collect_weights;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "medfusion", about = "Clinical prediction model composition")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the variant, heads and parameter counts of a config.
    Describe {
        /// Path to the YAML model parameters.
        #[arg(long)]
        config: PathBuf,

        /// Also list every tensor with its shape.
        #[arg(long)]
        keys: bool,
    },

    /// Build a config's network and save its initial weights.
    Init {
        /// Path to the YAML model parameters.
        #[arg(long)]
        config: PathBuf,

        /// Directory the `weights` folder is created in.
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,

        /// Epoch the saved file is tagged with.
        #[arg(long, default_value = "0")]
        epoch: usize,

        /// Save as the best weight of that epoch.
        #[arg(long)]
        best: bool,
    },

    /// Reset the network and load each weight file in turn, stopping at the
    /// first failure.
    Check {
        /// Path to the YAML model parameters.
        #[arg(long)]
        config: PathBuf,

        /// Directory holding `*.safetensors` weight files.
        #[arg(long)]
        weight_dir: PathBuf,
    },
}

fn load_model(config: &Path) -> anyhow::Result<Model<f32>> {
    let params = ModelParams::from_yaml_file(config)
        .with_context(|| format!("reading {}", config.display()))?;
    Ok(Model::new(params)?)
}

fn describe(config: &Path, keys: bool) -> anyhow::Result<()> {
    let model = load_model(config)?;
    let params = model.params();
    println!("variant:   {}", model.kind());
    if let Some(mlp) = &params.mlp {
        println!("mlp:       {mlp}");
    }
    if let Some(net) = &params.net {
        println!("net:       {net}");
    }
    println!("placement: {}", model.placement());
    let prediction = model.network().prediction();
    println!("terminal:  {}", prediction.terminal_location());
    for (label, head) in prediction.heads() {
        let label = if label.is_empty() { "-" } else { label };
        println!(
            "  {label}: {} -> {}{}",
            head.linear().in_features(),
            head.linear().out_features(),
            head.dropout()
                .map(|d| format!(" (dropout {}, inplace {})", d.p, d.inplace))
                .unwrap_or_default()
        );
    }
    println!("trainable parameters: {}", model.network().num_trainable_params());
    println!("tensor elements:      {}", model.network().num_tensor_elements());
    if keys {
        model.network().iter_tensors("", &mut |key, _, t| {
            println!("{key} {:?}", t.dims());
        });
    }
    Ok(())
}

fn init(config: &Path, out_dir: &Path, epoch: usize, best: bool) -> anyhow::Result<()> {
    let mut model = load_model(config)?;
    model.store_weight(epoch);
    let path = model.save_weight(out_dir, best)?;
    println!("{}", path.display());
    Ok(())
}

fn check(config: &Path, weight_dir: &Path) -> anyhow::Result<()> {
    let mut model = load_model(config)?;
    let files = collect_weights(weight_dir)?;
    for path in &files {
        model.init_network()?;
        model
            .load_weight(path)
            .with_context(|| format!("loading {}", path.display()))?;
        model.eval();
        println!("ok {}", path.display());
    }
    println!("{} weight files checked", files.len());
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Describe { config, keys } => describe(&config, keys),
        Command::Init {
            config,
            out_dir,
            epoch,
            best,
        } => init(&config, &out_dir, epoch, best),
        Command::Check { config, weight_dir } => check(&config, &weight_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
